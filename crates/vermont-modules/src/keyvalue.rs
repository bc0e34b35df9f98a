//! `key=value` log lines.

use std::{collections::BTreeMap, sync::Arc};

use regex::Regex;
use serde::Deserialize;
use vermont_core::{LogFormatModule, ModuleEntry, ModuleFactory, settings};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum KeyValueError {
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("pattern `{0}` needs a key and a value capture group")]
    MissingGroups(String),
}

const DEFAULT_PATTERN: &str = r#"([A-Za-z_][A-Za-z0-9_.-]*)=("[^"]*"|\S*)"#;

/// Settings of `builtin.keyvalue`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KeyValueSettings {
    /// Regex with two capture groups, the key and the value.
    pub pattern: String,
    /// Fields a line must carry to count as this format.
    pub required_fields: Vec<String>,
}

impl Default for KeyValueSettings {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_PATTERN.to_string(),
            required_fields: Vec::new(),
        }
    }
}

/// Parses lines such as `SRC=10.0.0.1 DST=10.0.0.2 PROTO=TCP`.
#[derive(Debug)]
pub struct KeyValueFormat {
    pattern: Regex,
    required_fields: Vec<String>,
}

impl KeyValueFormat {
    /// # Errors
    ///
    /// Returns an error if the pattern is not a valid regex or does not
    /// have two capture groups.
    pub fn new(settings: KeyValueSettings) -> Result<Self, KeyValueError> {
        let pattern = Regex::new(&settings.pattern)?;
        if pattern.captures_len() < 3 {
            return Err(KeyValueError::MissingGroups(settings.pattern));
        }
        Ok(Self {
            pattern,
            required_fields: settings.required_fields,
        })
    }
}

impl LogFormatModule for KeyValueFormat {
    fn parse_line(&self, line: &str) -> Option<BTreeMap<String, String>> {
        let fields: BTreeMap<String, String> = self
            .pattern
            .captures_iter(line)
            .filter_map(|caps| {
                let key = caps.get(1)?.as_str();
                let value = caps.get(2).map_or("", |m| m.as_str());
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .unwrap_or(value);
                Some((key.to_string(), value.to_string()))
            })
            .collect();

        if fields.is_empty()
            || self
                .required_fields
                .iter()
                .any(|field| !fields.contains_key(field))
        {
            return None;
        }
        Some(fields)
    }
}

fn keyvalue_factory(table: &toml::Table) -> Result<Arc<dyn LogFormatModule>, String> {
    let settings: KeyValueSettings = settings(table)?;
    let format = KeyValueFormat::new(settings).map_err(|e| e.to_string())?;
    Ok(Arc::new(format))
}

inventory::submit! {
    ModuleEntry {
        id: "builtin.keyvalue",
        description: "Lines of key=value pairs",
        factory: ModuleFactory::LogFormat(keyvalue_factory),
    }
}
