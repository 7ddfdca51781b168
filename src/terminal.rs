use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{error, info};

use crate::error::{Result, TesterError};

pub const TERMINAL_EXE: &str = "terminal64.exe";

const EXIT_OK: i32 = 0;
// Returned when the tester finished but the terminal logged warnings.
const EXIT_COMPLETED_WITH_WARNINGS: i32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    CompletedWithWarnings,
}

pub fn terminal_executable(install_path: &Path) -> PathBuf {
    install_path.join(TERMINAL_EXE)
}

/// `"<exe>" [/portable] /config:"<ini>"`, as the terminal documents it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TerminalCommand {
    pub executable: PathBuf,
    pub config: PathBuf,
    pub portable: bool,
}

impl TerminalCommand {
    pub fn new(executable: impl Into<PathBuf>, config: impl Into<PathBuf>, portable: bool) -> Self {
        Self {
            executable: executable.into(),
            config: config.into(),
            portable,
        }
    }

    pub fn command_line(&self) -> String {
        let mut line = format!("\"{}\"", self.executable.display());
        if self.portable {
            line.push_str(" /portable");
        }
        line.push_str(&format!(" {}", self.config_switch()));
        line
    }

    fn config_switch(&self) -> String {
        format!("/config:\"{}\"", self.config.display())
    }

    fn check_paths(&self) -> Result<()> {
        for path in [&self.executable, &self.config] {
            if !path.is_file() {
                error!(path = %path.display(), "terminal launch path does not exist");
                return Err(TesterError::NotFound { path: path.clone() });
            }
        }
        Ok(())
    }

    #[cfg(windows)]
    fn to_process(&self) -> Command {
        use std::os::windows::process::CommandExt;

        let mut cmd = Command::new(&self.executable);
        if self.portable {
            cmd.arg("/portable");
        }
        // Quoted exactly once; the default argument escaping would turn the
        // inner quotes into \".
        cmd.raw_arg(self.config_switch());
        cmd
    }

    #[cfg(not(windows))]
    fn to_process(&self) -> Command {
        let mut cmd = Command::new(&self.executable);
        if self.portable {
            cmd.arg("/portable");
        }
        cmd.arg(format!("/config:{}", self.config.display()));
        cmd
    }

    /// Starts the terminal and blocks until it exits. There is no timeout: a
    /// terminal that never shuts down blocks the caller.
    pub fn launch(&self) -> Result<RunOutcome> {
        self.check_paths()?;

        let command = self.command_line();
        info!(%command, "launching terminal");
        let status = self
            .to_process()
            .status()
            .map_err(|e| TesterError::io(&self.executable, e))?;

        // A missing code means the process was killed by a signal.
        classify_exit(&command, status.code().unwrap_or(-1))
    }
}

pub fn launch(executable: &Path, config: &Path, portable: bool) -> Result<RunOutcome> {
    TerminalCommand::new(executable, config, portable).launch()
}

pub fn classify_exit(command: &str, code: i32) -> Result<RunOutcome> {
    match code {
        EXIT_OK => Ok(RunOutcome::Completed),
        EXIT_COMPLETED_WITH_WARNINGS => Ok(RunOutcome::CompletedWithWarnings),
        _ => {
            error!(command, code, "terminal exited with failure");
            Err(TesterError::ProcessFailure {
                command: command.to_string(),
                code,
            })
        }
    }
}
