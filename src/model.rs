use std::fmt;

use chrono::NaiveDate;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionModel {
    #[default]
    EveryTick = 0,
    ControlPoints = 1,
    OpenPricesOnly = 2,
}

impl ExecutionModel {
    pub fn code(self) -> u8 {
        self as u8
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualMode {
    #[default]
    Disabled = 0,
    Enabled = 1,
}

impl VisualMode {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Whether the terminal replays fixed parameters or sweeps them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
    Backtest,
    Optimization,
}

impl RunMode {
    pub fn is_optimization(self) -> bool {
        matches!(self, RunMode::Optimization)
    }
}

/// Declared type of an EA input as written in the settings file.
///
/// Only `bool` and `int` can be rendered into a `.set` file; anything else is
/// kept verbatim so the parameter writer can reject it with the offending name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ParamKind {
    Bool,
    Int,
    Unsupported(String),
}

impl From<String> for ParamKind {
    fn from(raw: String) -> Self {
        match raw.trim() {
            "bool" => ParamKind::Bool,
            "int" => ParamKind::Int,
            _ => ParamKind::Unsupported(raw),
        }
    }
}

impl From<ParamKind> for String {
    fn from(kind: ParamKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::Bool => f.write_str("bool"),
            ParamKind::Int => f.write_str("int"),
            ParamKind::Unsupported(raw) => f.write_str(raw),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterEntry {
    #[serde(rename = "type")]
    pub kind: ParamKind,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Value>,
}

impl ParameterEntry {
    pub fn int(value: i64) -> Self {
        Self {
            kind: ParamKind::Int,
            value: Value::from(value),
            interval: None,
            max: None,
        }
    }

    pub fn boolean(value: bool) -> Self {
        Self {
            kind: ParamKind::Bool,
            value: Value::from(value),
            interval: None,
            max: None,
        }
    }

    pub fn with_sweep(mut self, interval: impl Into<Value>, max: impl Into<Value>) -> Self {
        self.interval = Some(interval.into());
        self.max = Some(max.into());
        self
    }

    /// Step and upper bound, only when both are declared.
    pub fn sweep(&self) -> Option<(&Value, &Value)> {
        match (&self.interval, &self.max) {
            (Some(interval), Some(max)) => Some((interval, max)),
            _ => None,
        }
    }
}

/// EA inputs in declaration order. The `.set` file lists them in the order
/// they appear in the settings file; inserting an existing name replaces the
/// entry in place.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParameterSet(Vec<(String, ParameterEntry)>);

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: ParameterEntry) -> Option<ParameterEntry> {
        let name = name.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, entry)),
            None => {
                self.0.push((name, entry));
                None
            }
        }
    }

    pub fn with(mut self, name: impl Into<String>, entry: ParameterEntry) -> Self {
        self.insert(name, entry);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParameterEntry> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, e)| e)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterEntry)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, ParameterEntry)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (K, ParameterEntry)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (k, v) in iter {
            set.insert(k, v);
        }
        set
    }
}

impl Serialize for ParameterSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, entry) in &self.0 {
            map.serialize_entry(name, entry)?;
        }
        map.end()
    }
}

struct ParameterSetVisitor;

impl<'de> Visitor<'de> for ParameterSetVisitor {
    type Value = ParameterSet;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of parameter name to declaration")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<ParameterSet, A::Error> {
        let mut set = ParameterSet::new();
        while let Some((name, entry)) = access.next_entry::<String, ParameterEntry>()? {
            set.insert(name, entry);
        }
        Ok(set)
    }
}

impl<'de> Deserialize<'de> for ParameterSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(ParameterSetVisitor)
    }
}

/// Everything the terminal needs to know about one backtest or optimization.
///
/// `ea` is the Expert Advisor path relative to `MQL5\Experts`, e.g.
/// `Examples\MACD`. The last component is the short name used for the
/// generated `.ini`, `.set` and report files.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackTest {
    pub ea: String,
    #[serde(default)]
    pub params: ParameterSet,
    pub account_login: i64,
    pub symbol: String,
    pub period: String,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub deposit: f64,
    pub deposit_currency: String,
    pub leverage: u32,
    #[serde(default)]
    pub model: ExecutionModel,
    #[serde(default = "default_true")]
    pub replace_report: bool,
    #[serde(default = "default_true")]
    pub read_report: bool,
    #[serde(default = "default_true")]
    pub portable_mode: bool,
    #[serde(default)]
    pub visual: VisualMode,
}

fn default_true() -> bool {
    true
}

impl BackTest {
    pub fn new(
        ea: impl Into<String>,
        symbol: impl Into<String>,
        period: impl Into<String>,
        from_date: NaiveDate,
        to_date: NaiveDate,
    ) -> Self {
        Self {
            ea: ea.into(),
            params: ParameterSet::new(),
            account_login: 0,
            symbol: symbol.into(),
            period: period.into(),
            from_date,
            to_date,
            deposit: 10_000.0,
            deposit_currency: "USD".to_string(),
            leverage: 100,
            model: ExecutionModel::EveryTick,
            replace_report: true,
            read_report: true,
            portable_mode: true,
            visual: VisualMode::Disabled,
        }
    }

    /// Last non-blank path component of `ea`; empty when `ea` holds only
    /// separators.
    pub fn ea_name(&self) -> &str {
        self.ea
            .rsplit(['\\', '/'])
            .find(|part| !part.trim().is_empty())
            .map(str::trim)
            .unwrap_or("")
    }

    pub fn has_valid_range(&self) -> bool {
        self.from_date <= self.to_date
    }
}
