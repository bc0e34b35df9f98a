//! Compiled-in module implementations and their discovery.
//!
//! Module files on disk do not carry code. They name an implementation id
//! and hand it a `[settings]` table; the implementation itself is compiled
//! into the binary and registered at link time with [`inventory`]:
//!
//! ```ignore
//! inventory::submit! {
//!     vermont_core::ModuleEntry {
//!         id: "builtin.memory",
//!         description: "Physical memory in MiB",
//!         factory: vermont_core::ModuleFactory::Resource(memory_factory),
//!     }
//! }
//! ```

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::{LogFormatModule, ModuleCategory, ModuleHandle, ObjectModule, ResourceModule};

/// Builds an object module from its settings table.
pub type ObjectFactory = fn(&toml::Table) -> Result<ObjectModule, String>;

/// Builds a resource module from its settings table.
pub type ResourceFactory = fn(&toml::Table) -> Result<Arc<dyn ResourceModule>, String>;

/// Builds a log-format module from its settings table.
pub type LogFormatFactory = fn(&toml::Table) -> Result<Arc<dyn LogFormatModule>, String>;

/// Constructor of an implementation, tagged by the category it serves.
#[derive(Debug, Clone, Copy)]
pub enum ModuleFactory {
    Object(ObjectFactory),
    Resource(ResourceFactory),
    LogFormat(LogFormatFactory),
}

impl ModuleFactory {
    #[must_use]
    pub fn category(&self) -> ModuleCategory {
        match self {
            Self::Object(_) => ModuleCategory::Object,
            Self::Resource(_) => ModuleCategory::Resource,
            Self::LogFormat(_) => ModuleCategory::LogFormat,
        }
    }

    /// Runs the constructor.
    ///
    /// # Errors
    ///
    /// Returns the implementation's message when it rejects the settings.
    pub fn instantiate(&self, settings: &toml::Table) -> Result<ModuleHandle, String> {
        Ok(match self {
            Self::Object(build) => ModuleHandle::Object(Arc::new(build(settings)?)),
            Self::Resource(build) => ModuleHandle::Resource(build(settings)?),
            Self::LogFormat(build) => ModuleHandle::LogFormat(build(settings)?),
        })
    }
}

/// Registration entry for one compiled-in implementation.
#[derive(Debug)]
pub struct ModuleEntry {
    /// Id referenced by module files, e.g. `builtin.memory`.
    pub id: &'static str,
    pub description: &'static str,
    pub factory: ModuleFactory,
}

inventory::collect!(ModuleEntry);

/// Looks up a compiled-in implementation by id.
pub fn find_entry(id: &str) -> Option<&'static ModuleEntry> {
    inventory::iter::<ModuleEntry>()
        .find(|entry| entry.id == id)
}

/// All compiled-in implementations, sorted by id.
pub fn entries() -> Vec<&'static ModuleEntry> {
    let mut entries: Vec<_> = inventory::iter::<ModuleEntry>().collect();
    entries.sort_by_key(|entry| entry.id);
    entries
}

/// Deserializes a settings table into an implementation's settings type.
///
/// # Errors
///
/// Returns the deserializer's message when the table does not fit `T`.
pub fn settings<T: DeserializeOwned>(table: &toml::Table) -> Result<T, String> {
    toml::Value::Table(table.clone())
        .try_into()
        .map_err(|e: toml::de::Error| e.to_string())
}
