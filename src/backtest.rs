use std::path::PathBuf;

use tracing::{debug, info, info_span};

use crate::error::{Result, TesterError};
use crate::installation::{DataDirectoryLocator, ElevationPolicy, InstallationHandle, InstallationRegistry};
use crate::model::{BackTest, RunMode};
use crate::terminal::{RunOutcome, TerminalCommand, terminal_executable};
use crate::{tester_ini, tester_set};

/// Turns the files the terminal left behind into a result object.
pub trait ReportReader {
    type Report;

    fn backtest_report(&self, bt: &BackTest, handle: &InstallationHandle) -> Result<Self::Report>;

    fn optimization_report(&self, bt: &BackTest, handle: &InstallationHandle) -> Result<Self::Report>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportFile {
    pub path: PathBuf,
    pub mode: RunMode,
}

/// Locates the report the terminal wrote under the data directory without
/// parsing it: `<ea_name>.htm` for backtests, `<ea_name>.xml` for optimizations.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReportFiles;

impl ReportFiles {
    fn locate(bt: &BackTest, handle: &InstallationHandle, mode: RunMode) -> Result<ReportFile> {
        let ext = match mode {
            RunMode::Backtest => "htm",
            RunMode::Optimization => "xml",
        };
        let path = handle.data_dir.join(format!("{}.{ext}", bt.ea_name()));
        if !path.is_file() {
            return Err(TesterError::NotFound { path });
        }
        Ok(ReportFile { path, mode })
    }
}

impl ReportReader for ReportFiles {
    type Report = ReportFile;

    fn backtest_report(&self, bt: &BackTest, handle: &InstallationHandle) -> Result<ReportFile> {
        Self::locate(bt, handle, RunMode::Backtest)
    }

    fn optimization_report(&self, bt: &BackTest, handle: &InstallationHandle) -> Result<ReportFile> {
        Self::locate(bt, handle, RunMode::Optimization)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSummary<R> {
    pub outcome: RunOutcome,
    pub config_file: PathBuf,
    pub parameter_file: PathBuf,
    pub report: Option<R>,
}

impl BackTest {
    /// Writes the `.ini` and `.set` files for `mode` into the installation's
    /// data directory and returns their paths.
    pub fn prepare(&self, handle: &InstallationHandle, mode: RunMode) -> Result<(PathBuf, PathBuf)> {
        if self.ea_name().is_empty() {
            return Err(TesterError::MissingEaName { ea: self.ea.clone() });
        }
        let config_file = tester_ini::write_run_config(self, mode, &handle.data_dir)?;
        info!(path = %config_file.display(), "config written");
        let parameter_file = tester_set::write_parameter_file(self.ea_name(), &self.params, mode, &handle.data_dir)?;
        info!(path = %parameter_file.display(), "parameters written");
        Ok((config_file, parameter_file))
    }

    pub fn run<L, E, R>(
        &self,
        registry: &InstallationRegistry<L, E>,
        alias: &str,
        reports: &R,
    ) -> Result<RunSummary<R::Report>>
    where
        L: DataDirectoryLocator,
        E: ElevationPolicy,
        R: ReportReader,
    {
        self.execute(registry, alias, reports, RunMode::Backtest)
    }

    pub fn optimize<L, E, R>(
        &self,
        registry: &InstallationRegistry<L, E>,
        alias: &str,
        reports: &R,
    ) -> Result<RunSummary<R::Report>>
    where
        L: DataDirectoryLocator,
        E: ElevationPolicy,
        R: ReportReader,
    {
        self.execute(registry, alias, reports, RunMode::Optimization)
    }

    fn execute<L, E, R>(
        &self,
        registry: &InstallationRegistry<L, E>,
        alias: &str,
        reports: &R,
        mode: RunMode,
    ) -> Result<RunSummary<R::Report>>
    where
        L: DataDirectoryLocator,
        E: ElevationPolicy,
        R: ReportReader,
    {
        let span = info_span!("tester", alias, ea = self.ea_name(), ?mode);
        let _enter = span.enter();

        let handle = registry.lookup_with_mode(alias, self.portable_mode)?;
        debug!(data_dir = %handle.data_dir.display(), portable = handle.portable, "run directory");
        let (config_file, parameter_file) = self.prepare(&handle, mode)?;

        let command = TerminalCommand::new(
            terminal_executable(&handle.install_path),
            &config_file,
            handle.portable,
        );
        let outcome = command.launch()?;
        info!(?outcome, "terminal finished");

        let report = if self.read_report {
            Some(match mode {
                RunMode::Backtest => reports.backtest_report(self, &handle)?,
                RunMode::Optimization => reports.optimization_report(self, &handle)?,
            })
        } else {
            None
        };

        Ok(RunSummary {
            outcome,
            config_file,
            parameter_file,
            report,
        })
    }
}
