#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDate;
use mt5_tester::terminal::TERMINAL_EXE;
use mt5_tester::{
    BackTest, DataDirectoryLocator, InstallationRegistry, ParameterEntry, ParameterSet, ReportFiles, RunMode,
    RunOutcome, StaticElevation, TesterError,
};

// Writing an executable while another test thread forks can make the spawn
// fail with ETXTBSY, so script creation and launch are serialized.
static LAUNCH_LOCK: Mutex<()> = Mutex::new(());

fn launch_lock() -> MutexGuard<'static, ()> {
    LAUNCH_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

struct NoDataDirectory;

impl DataDirectoryLocator for NoDataDirectory {
    fn data_directory(&self, _install_path: &Path) -> std::io::Result<PathBuf> {
        Err(std::io::Error::from(std::io::ErrorKind::NotFound))
    }
}

struct SeparateDataDirectory(PathBuf);

impl DataDirectoryLocator for SeparateDataDirectory {
    fn data_directory(&self, _install_path: &Path) -> std::io::Result<PathBuf> {
        Ok(self.0.clone())
    }
}

fn test_temp_dir(prefix: &str) -> PathBuf {
    let unique = format!(
        "{}_{}_{}",
        prefix,
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock before UNIX_EPOCH")
            .as_nanos()
    );
    let dir = std::env::temp_dir().join(unique);
    fs::create_dir_all(&dir).expect("temp dir");
    dir
}

/// Installation whose `terminal64.exe` records its arguments, drops the
/// given report file and exits with `code`.
fn make_layout(dir: &Path) {
    for sub in ["Profiles", "Tester", "MQL5/Experts", "MQL5/Libraries", "MQL5/Profiles/Tester"] {
        fs::create_dir_all(dir.join(sub)).expect("layout dir");
    }
}

fn fake_installation(prefix: &str, code: i32, report: Option<&str>) -> PathBuf {
    let install = test_temp_dir(prefix);
    make_layout(&install);

    let touch = report
        .map(|name| format!("touch \"$(dirname \"$0\")/{name}\"\n"))
        .unwrap_or_default();
    let script = format!(
        "#!/bin/sh\nprintf '%s\\n' \"$@\" > \"$(dirname \"$0\")/args.txt\"\n{touch}exit {code}\n"
    );
    let exe = install.join(TERMINAL_EXE);
    fs::write(&exe, script).expect("write fake terminal");
    fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).expect("chmod");
    install
}

fn macd() -> BackTest {
    let mut bt = BackTest::new(
        "Examples\\MACD",
        "EURUSD",
        "M1",
        NaiveDate::from_ymd_opt(2018, 1, 1).expect("date"),
        NaiveDate::from_ymd_opt(2018, 1, 2).expect("date"),
    );
    bt.account_login = 5101264;
    bt.params = ParameterSet::new()
        .with("TakeProfit", ParameterEntry::int(50).with_sweep(10, 100))
        .with("UseTrailing", ParameterEntry::boolean(true));
    bt
}

fn registry_for(install: &Path, portable: bool) -> InstallationRegistry<NoDataDirectory, StaticElevation> {
    let mut registry = InstallationRegistry::new(NoDataDirectory, StaticElevation(false));
    registry.initialize("default", install, portable).expect("init");
    registry
}

#[test]
fn backtest_writes_files_launches_and_reads_report() {
    let _guard = launch_lock();
    let install = fake_installation("mt5_launch_ok", 0, Some("MACD.htm"));
    let registry = registry_for(&install, true);

    let summary = macd().run(&registry, "default", &ReportFiles).expect("run");

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.config_file, install.join("Tester").join("MACD.ini"));
    assert_eq!(
        summary.parameter_file,
        install.join("MQL5").join("Profiles").join("Tester").join("MACD.set")
    );
    let report = summary.report.expect("report requested");
    assert_eq!(report.path, install.join("MACD.htm"));
    assert_eq!(report.mode, RunMode::Backtest);

    let ini = fs::read_to_string(&summary.config_file).expect("ini");
    assert!(ini.contains("\nOptimization=0\n"));
    let set = fs::read_to_string(&summary.parameter_file).expect("set");
    assert_eq!(set, "TakeProfit=50||0||0||0||N\nUseTrailing=true||false||0||true||N\n");

    let args = fs::read_to_string(install.join("args.txt")).expect("args");
    let expected = format!("/portable\n/config:{}\n", summary.config_file.display());
    assert_eq!(args, expected);
}

#[test]
fn optimization_sweeps_and_accepts_warning_exit() {
    let _guard = launch_lock();
    let install = fake_installation("mt5_launch_opt", 3, Some("MACD.xml"));
    let registry = registry_for(&install, true);

    let mut bt = macd();
    bt.portable_mode = false;
    let summary = bt.optimize(&registry, "default", &ReportFiles).expect("optimize");

    assert_eq!(summary.outcome, RunOutcome::CompletedWithWarnings);
    assert_eq!(summary.report.expect("report").mode, RunMode::Optimization);

    let ini = fs::read_to_string(&summary.config_file).expect("ini");
    assert!(ini.contains("\nOptimization=1\n"));
    let set = fs::read_to_string(&summary.parameter_file).expect("set");
    assert_eq!(set, "TakeProfit=50||50||10||100||Y\nUseTrailing=true||false||0||true||N\n");

    // the installation itself was registered portable
    let args = fs::read_to_string(install.join("args.txt")).expect("args");
    assert!(args.starts_with("/portable\n"));
}

#[test]
fn failing_exit_code_reports_command() {
    let _guard = launch_lock();
    let install = fake_installation("mt5_launch_fail", 1, None);
    let registry = registry_for(&install, false);

    let mut bt = macd();
    bt.portable_mode = false;
    let err = bt.run(&registry, "default", &ReportFiles).expect_err("exit 1");
    match err {
        TesterError::ProcessFailure { command, code } => {
            assert_eq!(code, 1);
            let exe = install.join(TERMINAL_EXE);
            let ini = install.join("Tester").join("MACD.ini");
            assert_eq!(
                command,
                format!("\"{}\" /config:\"{}\"", exe.display(), ini.display())
            );
        }
        other => panic!("expected process failure, got {other:?}"),
    }
    // files stay in place for the next attempt
    assert!(install.join("Tester").join("MACD.ini").is_file());
}

#[test]
fn report_is_skipped_when_not_requested() {
    let _guard = launch_lock();
    let install = fake_installation("mt5_launch_noreport", 0, None);
    let registry = registry_for(&install, true);

    let mut bt = macd();
    bt.read_report = false;
    let summary = bt.run(&registry, "default", &ReportFiles).expect("run");
    assert!(summary.report.is_none());
}

#[test]
fn missing_report_file_is_not_found() {
    let _guard = launch_lock();
    let install = fake_installation("mt5_launch_lost", 0, None);
    let registry = registry_for(&install, true);

    let err = macd().run(&registry, "default", &ReportFiles).expect_err("no report");
    assert!(matches!(err, TesterError::NotFound { ref path } if path.ends_with("MACD.htm")));
}

#[test]
fn unsupported_parameter_aborts_before_launch() {
    let _guard = launch_lock();
    let install = fake_installation("mt5_launch_badparam", 0, Some("MACD.htm"));
    let registry = registry_for(&install, true);

    let mut bt = macd();
    let mut lots = ParameterEntry::int(0);
    lots.kind = "double".to_string().into();
    bt.params.insert("Lots", lots);

    let err = bt.run(&registry, "default", &ReportFiles).expect_err("bad param");
    assert!(matches!(err, TesterError::UnsupportedType { ref name, .. } if name == "Lots"));
    assert!(!install.join("args.txt").exists());
    assert!(!install.join("MQL5/Profiles/Tester/MACD.set").exists());
}

fn elevated_registry(install: &Path, appdata: &Path) -> InstallationRegistry<SeparateDataDirectory, StaticElevation> {
    let mut registry = InstallationRegistry::new(SeparateDataDirectory(appdata.to_path_buf()), StaticElevation(true));
    registry.initialize("default", install, false).expect("init");
    registry
}

#[test]
fn portable_run_on_elevated_install_keeps_files_and_switch_together() {
    let _guard = launch_lock();
    let install = fake_installation("mt5_launch_elev_install", 0, Some("MACD.htm"));
    let appdata = test_temp_dir("mt5_launch_elev_appdata");
    make_layout(&appdata);
    let registry = elevated_registry(&install, &appdata);

    let bt = macd();
    assert!(bt.portable_mode);
    let summary = bt.run(&registry, "default", &ReportFiles).expect("run");

    assert_eq!(summary.config_file, install.join("Tester").join("MACD.ini"));
    assert!(summary.parameter_file.starts_with(&install));
    assert!(!appdata.join("Tester").join("MACD.ini").exists());
    assert!(!appdata.join("MQL5/Profiles/Tester/MACD.set").exists());

    let args = fs::read_to_string(install.join("args.txt")).expect("args");
    assert_eq!(args, format!("/portable\n/config:{}\n", summary.config_file.display()));
    assert_eq!(summary.report.expect("report").path, install.join("MACD.htm"));
}

#[test]
fn regular_run_on_elevated_install_uses_data_directory() {
    let _guard = launch_lock();
    let install = fake_installation("mt5_launch_elev_regular", 0, None);
    let appdata = test_temp_dir("mt5_launch_elev_regular_appdata");
    make_layout(&appdata);
    fs::write(appdata.join("MACD.htm"), "<html/>").expect("report");
    let registry = elevated_registry(&install, &appdata);

    let mut bt = macd();
    bt.portable_mode = false;
    let summary = bt.run(&registry, "default", &ReportFiles).expect("run");

    assert_eq!(summary.config_file, appdata.join("Tester").join("MACD.ini"));
    assert!(summary.parameter_file.starts_with(&appdata));
    assert!(!install.join("Tester").join("MACD.ini").exists());

    let args = fs::read_to_string(install.join("args.txt")).expect("args");
    assert_eq!(args, format!("/config:{}\n", summary.config_file.display()));
    assert_eq!(summary.report.expect("report").path, appdata.join("MACD.htm"));
}

#[test]
fn ea_without_name_writes_nothing() {
    let _guard = launch_lock();
    let install = fake_installation("mt5_launch_noname", 0, Some("MACD.htm"));
    let registry = registry_for(&install, true);

    let mut bt = macd();
    bt.ea = "\\".to_string();
    let err = bt.run(&registry, "default", &ReportFiles).expect_err("no ea name");
    assert!(matches!(err, TesterError::MissingEaName { ref ea } if ea == "\\"));
    assert!(!install.join("args.txt").exists());
    assert!(fs::read_dir(install.join("Tester")).expect("tester dir").next().is_none());
}
