use std::fmt::{Display, Write as _};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Result, TesterError};
use crate::model::{BackTest, RunMode};

const DATE_FORMAT: &str = "%Y.%m.%d";

// The terminal must exit on its own, otherwise the launcher never returns and
// the report is never read.
const SHUTDOWN_TERMINAL: bool = true;

pub fn config_file_path(data_dir: &Path, ea_name: &str) -> PathBuf {
    data_dir.join("Tester").join(format!("{ea_name}.ini"))
}

struct IniText {
    out: String,
}

impl IniText {
    fn new() -> Self {
        Self { out: String::new() }
    }

    fn section(&mut self, name: &str) -> &mut Self {
        if !self.out.is_empty() {
            self.out.push('\n');
        }
        let _ = writeln!(self.out, "[{name}]");
        self
    }

    fn entry(&mut self, key: &str, value: impl Display) -> &mut Self {
        let _ = writeln!(self.out, "{key}={value}");
        self
    }

    fn noted(&mut self, comment: &str, key: &str, value: impl Display) -> &mut Self {
        let _ = writeln!(self.out, ";--- {comment}");
        self.entry(key, value)
    }
}

pub fn render_run_config(bt: &BackTest, mode: RunMode) -> String {
    if !bt.has_valid_range() {
        warn!(
            from = %bt.from_date,
            to = %bt.to_date,
            ea = bt.ea_name(),
            "from date is after to date, passing range to terminal unchanged"
        );
    }

    let ea_name = bt.ea_name();
    let mut ini = IniText::new();

    ini.section("Common")
        .entry("Login", bt.account_login)
        .entry("ProxyEnable", 0)
        .entry("ProxyType", 0)
        .entry("ProxyAddress", "192.168.0.1:3128")
        .entry("ProxyLogin", 10)
        .entry("ProxyPassword", 10)
        .entry("KeepPrivate", 1)
        .entry("NewsEnable", 0)
        .entry("CertInstall", 1);

    ini.section("Tester")
        .noted(
            "The Expert Advisor is located in platform_data_directory\\MQL5\\Experts",
            "Expert",
            &bt.ea,
        )
        .noted(
            "The Expert Advisor parameters are available in platform_data_directory\\MQL5\\Profiles\\Tester",
            "ExpertParameters",
            format_args!("{ea_name}.set"),
        )
        .noted("The symbol for testing/optimization", "Symbol", &bt.symbol)
        .noted("The timeframe for testing/optimization", "Period", &bt.period)
        .noted("Emulated account number", "Login", bt.account_login)
        .noted("Initial deposit", "Deposit", bt.deposit)
        .noted("Deposit currency", "Currency", &bt.deposit_currency)
        .noted("Leverage for testing", "Leverage", format_args!("1:{}", bt.leverage))
        .noted(
            "0 = every tick, 1 = control points, 2 = open prices only",
            "Model",
            bt.model.code(),
        )
        .noted("0 = Execution of trade orders without any delay", "ExecutionMode", 0)
        .noted(
            "0 = no optimization, 1 = slow complete optimization",
            "Optimization",
            u8::from(mode.is_optimization()),
        )
        .noted("Optimization criterion - maximum balance value", "OptimizationCriterion", 0)
        .noted(
            "Dates of beginning and end of the testing range",
            "FromDate",
            bt.from_date.format(DATE_FORMAT),
        )
        .entry("ToDate", bt.to_date.format(DATE_FORMAT))
        .noted("0 = No forward testing", "ForwardMode", 0)
        .noted("Start date of forward testing", "ForwardDate", bt.to_date.format(DATE_FORMAT))
        .noted(
            "A file with a report will be saved to the platform data directory",
            "Report",
            ea_name,
        )
        .noted(
            "If the specified report already exists, it will be overwritten",
            "ReplaceReport",
            bt.replace_report,
        )
        .noted(
            "Set automatic platform shutdown upon completion of testing/optimization",
            "ShutdownTerminal",
            SHUTDOWN_TERMINAL,
        )
        .noted(
            "Enable (1) or Disable (0) the visual test mode",
            "Visual",
            bt.visual.code(),
        );

    ini.out
}

pub fn write_run_config(bt: &BackTest, mode: RunMode, data_dir: &Path) -> Result<PathBuf> {
    let path = config_file_path(data_dir, bt.ea_name());
    fs::write(&path, render_run_config(bt, mode)).map_err(|e| TesterError::io(&path, e))?;
    debug!(path = %path.display(), ?mode, "run config written");
    Ok(path)
}
