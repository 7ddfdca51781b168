use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TesterError {
    #[error("path {} does not exist", path.display())]
    NotFound { path: PathBuf },

    #[error("data directory {} is missing required dirs: {}", path.display(), display_paths(missing))]
    InvalidLayout { path: PathBuf, missing: Vec<PathBuf> },

    #[error("terminal[{alias}] is not initialized")]
    NotInitialized { alias: String },

    #[error("expert advisor path {ea:?} has no name")]
    MissingEaName { ea: String },

    #[error("unexpected data type {kind} for parameter {name}")]
    UnsupportedType { name: String, kind: String },

    #[error("run terminal with cmd[{command}] failed with {code} error code")]
    ProcessFailure { command: String, code: i32 },

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TesterError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, TesterError>;

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
