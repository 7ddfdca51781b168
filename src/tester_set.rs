use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::error::{Result, TesterError};
use crate::model::{ParamKind, ParameterEntry, ParameterSet, RunMode};

const BOOL_PLACEHOLDER: &str = "false||0||true||N";
const INT_PLACEHOLDER: &str = "0||0||0||N";

pub fn parameter_file_path(data_dir: &Path, ea_name: &str) -> PathBuf {
    data_dir
        .join("MQL5")
        .join("Profiles")
        .join("Tester")
        .join(format!("{ea_name}.set"))
}

/// Renders the whole `.set` file. Nothing is returned if any entry is
/// rejected, so a bad declaration never leaves a half-written file behind.
pub fn render_parameters(params: &ParameterSet, mode: RunMode) -> Result<String> {
    let mut out = String::new();
    for (name, entry) in params.iter() {
        if let Some(line) = render_line(name, entry, mode)? {
            out.push_str(&line);
            out.push('\n');
        }
    }
    Ok(out)
}

/// One `name=value||start||step||stop||Y|N` line, or `None` when a plain run
/// meets a string value (the terminal takes strings from the EA defaults).
pub fn render_line(name: &str, entry: &ParameterEntry, mode: RunMode) -> Result<Option<String>> {
    let value = match &entry.kind {
        ParamKind::Bool => bool_literal(truthy(&entry.value)).to_string(),
        ParamKind::Int => scalar(&entry.value),
        ParamKind::Unsupported(kind) => {
            return Err(TesterError::UnsupportedType {
                name: name.to_string(),
                kind: kind.clone(),
            });
        }
    };

    let fields = match (mode, entry.sweep()) {
        (RunMode::Optimization, Some((interval, max))) => {
            format!("{value}||{}||{}||Y", scalar(interval), scalar(max))
        }
        (RunMode::Backtest, _) if entry.value.is_string() => return Ok(None),
        _ => placeholder(&entry.kind).to_string(),
    };

    Ok(Some(format!("{name}={value}||{fields}")))
}

pub fn write_parameter_file(
    ea_name: &str,
    params: &ParameterSet,
    mode: RunMode,
    data_dir: &Path,
) -> Result<PathBuf> {
    let body = render_parameters(params, mode)?;
    let path = parameter_file_path(data_dir, ea_name);
    fs::write(&path, body).map_err(|e| TesterError::io(&path, e))?;
    debug!(path = %path.display(), entries = params.len(), ?mode, "parameter file written");
    Ok(path)
}

fn placeholder(kind: &ParamKind) -> &'static str {
    match kind {
        ParamKind::Bool => BOOL_PLACEHOLDER,
        _ => INT_PLACEHOLDER,
    }
}

fn bool_literal(v: bool) -> &'static str {
    if v { "true" } else { "false" }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|x| x != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Null => false,
    }
}

fn scalar(v: &Value) -> String {
    match v {
        Value::Bool(b) => bool_literal(*b).to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                n.as_f64().map(|x| x.round() as i64).unwrap_or(0).to_string()
            }
        }
        Value::String(s) => s.trim().to_string(),
        Value::Null => "0".to_string(),
        other => other.to_string(),
    }
}
