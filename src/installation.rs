use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{Result, TesterError};

pub const DEFAULT_ALIAS: &str = "default";

/// Written by the terminal into every per-user data directory; holds the
/// installation path the directory belongs to.
pub const ORIGIN_TXT: &str = "origin.txt";

const REQUIRED_SUBDIRS: [&[&str]; 4] = [
    &["Profiles"],
    &["Tester"],
    &["MQL5", "Experts"],
    &["MQL5", "Libraries"],
];

/// Finds the per-user data directory the terminal uses for an installation
/// when it is not running in portable mode.
pub trait DataDirectoryLocator {
    fn data_directory(&self, install_path: &Path) -> io::Result<PathBuf>;
}

/// Reports whether the host runs programs with UAC elevation, which moves
/// terminal data out of the installation directory.
pub trait ElevationPolicy {
    fn elevation_enabled(&self) -> bool;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StaticElevation(pub bool);

impl ElevationPolicy for StaticElevation {
    fn elevation_enabled(&self) -> bool {
        self.0
    }
}

/// Scans `<appdata>/MetaQuotes/Terminal/<id>/origin.txt` one level deep.
#[derive(Clone, Debug, Default)]
pub struct TerminalDataLocator {
    appdata: Option<PathBuf>,
}

impl TerminalDataLocator {
    pub fn new(appdata: impl Into<PathBuf>) -> Self {
        Self {
            appdata: Some(appdata.into()),
        }
    }

    pub fn from_env() -> Self {
        Self {
            appdata: std::env::var_os("APPDATA").map(PathBuf::from),
        }
    }

    pub fn terminals_dir(&self) -> Option<PathBuf> {
        self.appdata
            .as_ref()
            .map(|root| root.join("MetaQuotes").join("Terminal"))
    }
}

impl DataDirectoryLocator for TerminalDataLocator {
    fn data_directory(&self, install_path: &Path) -> io::Result<PathBuf> {
        let terminals = self
            .terminals_dir()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "APPDATA is not set"))?;
        let wanted = normalize_origin(&install_path.to_string_lossy());

        for entry in fs::read_dir(&terminals)? {
            let Ok(entry) = entry else {
                continue;
            };
            let origin = entry.path().join(ORIGIN_TXT);
            let Ok(raw) = fs::read(&origin) else {
                continue;
            };
            if normalize_origin(&decode_origin(&raw)) == wanted {
                return Ok(entry.path());
            }
        }

        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} does not have appdata dir", install_path.display()),
        ))
    }
}

// origin.txt is UTF-16LE, usually with a BOM.
fn decode_origin(raw: &[u8]) -> String {
    let (bytes, big_endian) = match raw {
        [0xFF, 0xFE, rest @ ..] => (rest, false),
        [0xFE, 0xFF, rest @ ..] => (rest, true),
        _ => (raw, false),
    };
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| {
            if big_endian {
                u16::from_be_bytes([c[0], c[1]])
            } else {
                u16::from_le_bytes([c[0], c[1]])
            }
        })
        .collect();
    String::from_utf16_lossy(&units)
}

fn normalize_origin(s: &str) -> String {
    s.trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .trim_end_matches(['\\', '/'])
        .to_string()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstallationHandle {
    pub alias: String,
    pub install_path: PathBuf,
    pub data_dir: PathBuf,
    /// `true` when portable mode was requested or the data directory lookup
    /// fell back to the installation path.
    pub portable: bool,
}

pub struct InstallationResolver<L, E> {
    locator: L,
    elevation: E,
}

impl<L: DataDirectoryLocator, E: ElevationPolicy> InstallationResolver<L, E> {
    pub fn new(locator: L, elevation: E) -> Self {
        Self { locator, elevation }
    }

    pub fn resolve(&self, alias: &str, install_path: &Path, portable: bool) -> Result<InstallationHandle> {
        if !install_path.exists() {
            return Err(TesterError::NotFound {
                path: install_path.to_path_buf(),
            });
        }

        let (data_dir, portable) = if self.elevation.elevation_enabled() && !portable {
            match self.locator.data_directory(install_path) {
                Ok(dir) => (dir, false),
                Err(e) => {
                    warn!(
                        alias,
                        install = %install_path.display(),
                        error = %e,
                        "data directory not found, falling back to portable mode"
                    );
                    (install_path.to_path_buf(), true)
                }
            }
        } else {
            (install_path.to_path_buf(), portable)
        };

        validate_layout(&data_dir)?;

        Ok(InstallationHandle {
            alias: alias.to_string(),
            install_path: install_path.to_path_buf(),
            data_dir,
            portable,
        })
    }
}

pub fn missing_subdirs(data_dir: &Path) -> Vec<PathBuf> {
    REQUIRED_SUBDIRS
        .iter()
        .map(|parts| parts.iter().fold(data_dir.to_path_buf(), |p, part| p.join(part)))
        .filter(|p| !p.is_dir())
        .collect()
}

pub fn validate_layout(data_dir: &Path) -> Result<()> {
    let missing = missing_subdirs(data_dir);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(TesterError::InvalidLayout {
            path: data_dir.to_path_buf(),
            missing,
        })
    }
}

/// Alias to installation map owned by the caller.
pub struct InstallationRegistry<L, E> {
    resolver: InstallationResolver<L, E>,
    handles: HashMap<String, InstallationHandle>,
}

impl<L: DataDirectoryLocator, E: ElevationPolicy> InstallationRegistry<L, E> {
    pub fn new(locator: L, elevation: E) -> Self {
        Self {
            resolver: InstallationResolver::new(locator, elevation),
            handles: HashMap::new(),
        }
    }

    /// Resolves and stores `install_path` under `alias`. An alias that is
    /// already registered keeps its original handle.
    pub fn initialize(&mut self, alias: &str, install_path: &Path, portable: bool) -> Result<&InstallationHandle> {
        if self.handles.contains_key(alias) {
            info!(alias, "installation is already initialized");
        } else {
            let handle = self.resolver.resolve(alias, install_path, portable)?;
            info!(
                alias,
                data_dir = %handle.data_dir.display(),
                portable = handle.portable,
                "installation initialized"
            );
            self.handles.insert(alias.to_string(), handle);
        }
        self.get(alias)
    }

    /// Returns the handle after checking its data directory still has the
    /// layout the tester needs.
    pub fn lookup(&self, alias: &str) -> Result<&InstallationHandle> {
        let handle = self.get(alias)?;
        validate_layout(&handle.data_dir)?;
        Ok(handle)
    }

    /// Handle as seen by a run that asks for `portable`. A portable run
    /// against a handle resolved to a per-user data directory works in the
    /// installation directory instead, so the files written and the
    /// `/portable` switch always agree. The stored handle is left as is.
    pub fn lookup_with_mode(&self, alias: &str, portable: bool) -> Result<InstallationHandle> {
        let stored = self.get(alias)?;
        let handle = if portable && !stored.portable {
            InstallationHandle {
                data_dir: stored.install_path.clone(),
                portable: true,
                ..stored.clone()
            }
        } else {
            stored.clone()
        };
        validate_layout(&handle.data_dir)?;
        Ok(handle)
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.handles.contains_key(alias)
    }

    fn get(&self, alias: &str) -> Result<&InstallationHandle> {
        self.handles.get(alias).ok_or_else(|| TesterError::NotInitialized {
            alias: alias.to_string(),
        })
    }
}
