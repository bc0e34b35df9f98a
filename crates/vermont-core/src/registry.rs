//! The plugin module registry.
//!
//! Maps a `(category, keyword)` pair to the module that serves it. The three
//! categories are independent keyword spaces, so `disk` may be both an
//! object type and a resource type, but never two resource types.
//!
//! # Thread Safety
//!
//! Registration needs `&mut self`. Once discovery has finished the registry
//! is only read, and every handle is reference-counted, so the pipeline can
//! share it with evaluation worker threads.

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use tracing::{debug, info};

use crate::{
    LogFormatModule, ModuleCategory, ModuleHandle, ObjectModule, PipelineError, ResourceModule,
    UnknownTypeError,
};

/// A registered module and where it came from.
#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
    pub keyword: String,
    pub category: ModuleCategory,
    /// Id of the compiled-in implementation.
    pub implementation: String,
    /// Module file that declared the keyword.
    pub source: PathBuf,
    pub handle: ModuleHandle,
}

impl ModuleDescriptor {
    /// Creates a descriptor whose category is taken from the handle.
    #[must_use]
    pub fn new(
        keyword: impl Into<String>,
        implementation: impl Into<String>,
        source: impl Into<PathBuf>,
        handle: ModuleHandle,
    ) -> Self {
        Self {
            keyword: keyword.into(),
            category: handle.category(),
            implementation: implementation.into(),
            source: source.into(),
            handle,
        }
    }
}

/// Index of every module available to a run.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<(ModuleCategory, String), ModuleDescriptor>,
}

impl ModuleRegistry {
    /// Creates a new, empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module under its keyword.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DuplicateType`] if the keyword is already
    /// taken within the descriptor's category. The existing registration is
    /// kept.
    pub fn register(&mut self, descriptor: ModuleDescriptor) -> Result<(), PipelineError> {
        let key = (descriptor.category, descriptor.keyword.clone());
        if let Some(existing) = self.modules.get(&key) {
            return Err(PipelineError::DuplicateType {
                category: descriptor.category,
                keyword: descriptor.keyword,
                first: existing.source.clone(),
                second: descriptor.source,
            });
        }

        debug!(
            category = %descriptor.category,
            keyword = %descriptor.keyword,
            implementation = %descriptor.implementation,
            "Registered module"
        );
        self.modules.insert(key, descriptor);
        Ok(())
    }

    /// Finds the module serving `keyword` within `category`.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownTypeError`] when nothing is registered for it.
    pub fn resolve(
        &self,
        category: ModuleCategory,
        keyword: &str,
    ) -> Result<&ModuleHandle, UnknownTypeError> {
        self.modules
            .get(&(category, keyword.to_string()))
            .map(|descriptor| &descriptor.handle)
            .ok_or_else(|| UnknownTypeError {
                category,
                keyword: keyword.to_string(),
            })
    }

    #[must_use]
    pub fn contains(&self, category: ModuleCategory, keyword: &str) -> bool {
        self.resolve(category, keyword).is_ok()
    }

    /// Resolves a resource module.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownTypeError`] when no resource module serves `keyword`.
    pub fn resource(&self, keyword: &str) -> Result<Arc<dyn ResourceModule>, UnknownTypeError> {
        match self.resolve(ModuleCategory::Resource, keyword)? {
            ModuleHandle::Resource(module) => Ok(Arc::clone(module)),
            _ => Err(Self::unknown(ModuleCategory::Resource, keyword)),
        }
    }

    /// Resolves an object module.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownTypeError`] when no object module serves `keyword`.
    pub fn object(&self, keyword: &str) -> Result<Arc<ObjectModule>, UnknownTypeError> {
        match self.resolve(ModuleCategory::Object, keyword)? {
            ModuleHandle::Object(module) => Ok(Arc::clone(module)),
            _ => Err(Self::unknown(ModuleCategory::Object, keyword)),
        }
    }

    /// Resolves a log-format module.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownTypeError`] when no log format is named `keyword`.
    pub fn log_format(&self, keyword: &str) -> Result<Arc<dyn LogFormatModule>, UnknownTypeError> {
        match self.resolve(ModuleCategory::LogFormat, keyword)? {
            ModuleHandle::LogFormat(module) => Ok(Arc::clone(module)),
            _ => Err(Self::unknown(ModuleCategory::LogFormat, keyword)),
        }
    }

    fn unknown(category: ModuleCategory, keyword: &str) -> UnknownTypeError {
        UnknownTypeError {
            category,
            keyword: keyword.to_string(),
        }
    }

    /// All descriptors, ordered by category then keyword.
    pub fn descriptors(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.modules.values()
    }

    /// Logs a one-line summary per category.
    pub fn log_summary(&self) {
        for category in ModuleCategory::ALL {
            let count = self.descriptors().filter(|d| d.category == category).count();
            info!(category = %category, count, "Module keywords available");
        }
    }

    /// Returns the number of registered keywords across all categories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns `true` if no modules are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
