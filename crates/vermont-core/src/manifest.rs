//! Module file parsing.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{ModuleCategory, ModuleLoadError};

/// One module file.
///
/// A module file binds a compiled-in implementation to the type keywords
/// it serves, and carries the settings that implementation is built with.
///
/// # Example
///
/// ```toml
/// implementation = "builtin.memory"
/// description = "Physical memory"
///
/// [[provides]]
/// category = "resource"
/// keyword = "memory"
///
/// [settings]
/// available = false
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleManifest {
    pub implementation: String,

    pub description: Option<String>,

    #[serde(default)]
    pub provides: Vec<Provides>,

    /// Opaque to the loader; handed to the implementation's factory.
    #[serde(default)]
    pub settings: toml::Table,
}

/// A keyword a module file claims within one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Provides {
    pub category: ModuleCategory,
    pub keyword: String,
}

impl ModuleManifest {
    /// Reads and parses a module file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not a valid module
    /// file, or declares no keywords.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModuleLoadError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ModuleLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &content)
    }

    /// Parses module file content; `path` is only used in errors.
    ///
    /// # Errors
    ///
    /// Returns an error if the content is not a valid module file or
    /// declares no keywords.
    pub fn parse(path: &Path, content: &str) -> Result<Self, ModuleLoadError> {
        let manifest: Self = toml::from_str(content).map_err(|source| ModuleLoadError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if manifest.provides.is_empty() {
            return Err(ModuleLoadError::Empty {
                path: PathBuf::from(path),
            });
        }

        Ok(manifest)
    }
}
