//! JSON settings for the command-line runner: which installations to register
//! and the backtest to run against them.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::installation::{DEFAULT_ALIAS, InstallationRegistry, StaticElevation, TerminalDataLocator};
use crate::model::BackTest;

pub type Registry = InstallationRegistry<TerminalDataLocator, StaticElevation>;

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstallationSettings {
    #[serde(default = "default_alias")]
    pub alias: String,
    pub path: PathBuf,
    #[serde(default)]
    pub portable: bool,
}

fn default_alias() -> String {
    DEFAULT_ALIAS.to_string()
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub installations: Vec<InstallationSettings>,
    /// UAC elevation of the host; when set, non-portable installations keep
    /// their data under `%APPDATA%\MetaQuotes\Terminal`.
    #[serde(default)]
    pub elevation: bool,
    /// Overrides `%APPDATA%` for the data directory lookup.
    #[serde(default)]
    pub appdata: Option<PathBuf>,
    pub backtest: BackTest,
}

impl Settings {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings: {}", path.display()))?;
        let settings: Settings = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse settings JSON: {}", path.display()))?;
        settings.check()?;
        Ok(settings)
    }

    fn check(&self) -> Result<()> {
        if self.installations.is_empty() {
            bail!("settings must list at least one installation");
        }
        let mut seen = std::collections::HashSet::new();
        for inst in &self.installations {
            if !seen.insert(inst.alias.as_str()) {
                bail!("installation alias {} is listed twice", inst.alias);
            }
        }
        let bt = &self.backtest;
        if !bt.has_valid_range() {
            bail!(
                "backtest from_date {} is after to_date {}",
                bt.from_date,
                bt.to_date
            );
        }
        if bt.leverage == 0 {
            bail!("backtest leverage must be >= 1");
        }
        if bt.ea_name().is_empty() {
            bail!("backtest ea must name an Expert Advisor");
        }
        Ok(())
    }

    pub fn locator(&self) -> TerminalDataLocator {
        match &self.appdata {
            Some(dir) => TerminalDataLocator::new(dir),
            None => TerminalDataLocator::from_env(),
        }
    }

    pub fn registry(&self) -> Result<Registry> {
        let mut registry = InstallationRegistry::new(self.locator(), StaticElevation(self.elevation));
        for inst in &self.installations {
            registry
                .initialize(&inst.alias, &inst.path, inst.portable)
                .with_context(|| format!("failed to initialize installation {}", inst.alias))?;
        }
        Ok(registry)
    }
}
