//! Rulebook options.
//!
//! Process-wide settings for a run: where modules live, static
//! substitution seeds, environment imports, the per-resource evaluation
//! limit, and pinned system facts.
//!
//! # Resolution Algorithm
//!
//! 1. Explicit path (command line)
//! 2. `VERMONT_RULEBOOK_OPTIONS` environment variable
//! 3. Current directory, then each parent directory
//! 4. XDG config directory (`~/.config/vermont/`)
//!
//! When nothing is found the defaults apply.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

/// File name searched for in the working directory and its ancestors.
pub const OPTIONS_FILE_NAME: &str = "rulebook-options.toml";

/// Environment variable naming an options file.
pub const OPTIONS_ENV_VAR: &str = "VERMONT_RULEBOOK_OPTIONS";

/// Errors that can occur while loading rulebook options.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum OptionsError {
    /// The options file could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The options file is not valid TOML or has unknown fields.
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A `key=value` definition is malformed.
    #[error("invalid definition `{0}`: expected key=value")]
    InvalidDefine(String),
}

/// Contents of `rulebook-options.toml`.
///
/// # Example
///
/// ```toml
/// module_dirs = ["/var/vermont/modules"]
/// evaluation_timeout_ms = 5000
/// import_env = ["HOSTNAME"]
///
/// [substitutions]
/// domain = "example.com"
///
/// [system]
/// "memory.total_mib" = 1024
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RulebookOptions {
    /// Directories scanned for module files. Relative entries are resolved
    /// against the options file's directory.
    pub module_dirs: Vec<PathBuf>,

    /// Upper bound for a single resource evaluation.
    pub evaluation_timeout_ms: Option<u64>,

    /// Environment variables published as `env.<NAME>`.
    pub import_env: Vec<String>,

    /// Static substitution seeds.
    pub substitutions: BTreeMap<String, Value>,

    /// System facts pinned instead of probed.
    pub system: BTreeMap<String, Value>,
}

/// Values given on the command line, applied over the file.
#[derive(Debug, Clone, Default)]
pub struct OptionOverrides {
    /// Replaces the file's module directories when non-empty.
    pub module_dirs: Vec<PathBuf>,
    pub defines: Vec<(String, Value)>,
    pub evaluation_timeout_ms: Option<u64>,
}

impl RulebookOptions {
    /// Loads options from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, OptionsError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| OptionsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut options: Self = toml::from_str(&contents).map_err(|source| OptionsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(base) = path.parent() {
            for dir in &mut options.module_dirs {
                if dir.is_relative() {
                    *dir = base.join(&*dir);
                }
            }
        }
        Ok(options)
    }

    /// Finds and loads options with the resolution algorithm, falling back
    /// to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a located file cannot be read or parsed, or if
    /// the current directory is unavailable.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, OptionsError> {
        let current = std::env::current_dir().map_err(|source| OptionsError::Io {
            path: PathBuf::from("."),
            source,
        })?;
        let env_override = std::env::var_os(OPTIONS_ENV_VAR).map(PathBuf::from);
        let xdg = dirs::config_dir().map(|dir| dir.join("vermont").join(OPTIONS_FILE_NAME));

        match locate(explicit, env_override, &current, xdg) {
            Some(path) => {
                info!(path = %path.display(), "Using rulebook options");
                Self::load(path)
            }
            None => {
                debug!("No rulebook options file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Applies command-line overrides.
    pub fn apply(&mut self, overrides: OptionOverrides) {
        if !overrides.module_dirs.is_empty() {
            self.module_dirs = overrides.module_dirs;
        }
        self.substitutions.extend(overrides.defines);
        if overrides.evaluation_timeout_ms.is_some() {
            self.evaluation_timeout_ms = overrides.evaluation_timeout_ms;
        }
    }

    #[must_use]
    pub fn evaluation_timeout(&self) -> Option<Duration> {
        self.evaluation_timeout_ms.map(Duration::from_millis)
    }

    /// Reads the imported environment variables. Unset variables are
    /// skipped, so references to them surface as unresolved substitutions.
    #[must_use]
    pub fn env_imports(&self) -> BTreeMap<String, String> {
        self.import_env
            .iter()
            .filter_map(|name| match std::env::var(name) {
                Ok(value) => Some((name.clone(), value)),
                Err(_) => {
                    debug!(name = %name, "Imported environment variable is not set");
                    None
                }
            })
            .collect()
    }
}

/// Picks the options file to load, if any.
///
/// An explicit path is returned even if it does not exist, so the caller
/// reports it; the other candidates are skipped when absent.
pub fn locate(
    explicit: Option<&Path>,
    env_override: Option<PathBuf>,
    start: &Path,
    xdg: Option<PathBuf>,
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Some(path) = env_override
        && path.exists()
    {
        return Some(path);
    }

    if let Some(path) = start
        .ancestors()
        .map(|dir| dir.join(OPTIONS_FILE_NAME))
        .find(|path| path.is_file())
    {
        return Some(path);
    }

    xdg.filter(|path| path.is_file())
}

/// Parses a `key=value` definition. The value is read as an integer, a
/// float or a boolean when it looks like one, and as text otherwise.
///
/// # Errors
///
/// Returns [`OptionsError::InvalidDefine`] if there is no `=` or the key is
/// empty.
pub fn parse_define(definition: &str) -> Result<(String, Value), OptionsError> {
    let (key, raw) = definition
        .split_once('=')
        .ok_or_else(|| OptionsError::InvalidDefine(definition.to_string()))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(OptionsError::InvalidDefine(definition.to_string()));
    }

    let value = if let Ok(n) = raw.parse::<i64>() {
        Value::from(n)
    } else if let Ok(b) = raw.parse::<bool>() {
        Value::from(b)
    } else if let Some(n) = raw
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
    {
        Value::Number(n)
    } else {
        Value::from(raw)
    };
    Ok((key.to_string(), value))
}
