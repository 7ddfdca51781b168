//! Drives the MetaTrader 5 strategy tester from Rust.
//!
//! A [`BackTest`] describes one Expert Advisor run. [`BackTest::run`] and
//! [`BackTest::optimize`] write the tester `.ini` and `.set` files into the data
//! directory of an installation registered in an [`InstallationRegistry`],
//! start `terminal64.exe` against them, wait for it to exit and hand the
//! result to a [`ReportReader`].

pub mod backtest;
pub mod error;
pub mod installation;
pub mod model;
pub mod settings;
pub mod terminal;
pub mod tester_ini;
pub mod tester_set;

pub use backtest::{ReportFile, ReportFiles, ReportReader, RunSummary};
pub use error::{Result, TesterError};
pub use installation::{
    DEFAULT_ALIAS, DataDirectoryLocator, ElevationPolicy, InstallationHandle, InstallationRegistry,
    InstallationResolver, StaticElevation, TerminalDataLocator,
};
pub use model::{BackTest, ExecutionModel, ParamKind, ParameterEntry, ParameterSet, RunMode, VisualMode};
pub use terminal::{RunOutcome, TerminalCommand};
