//! Module discovery from module directories.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use crate::{
    ModuleDescriptor, ModuleLoadError, ModuleManifest, ModuleRegistry, PipelineError, find_entry,
};

/// Builds a registry from every module file under `directories`.
///
/// Directories are scanned in the order given and each one recursively in
/// file-name order, so duplicate detection always blames the same pair of
/// files. Files without a `.toml` extension are ignored.
///
/// # Errors
///
/// Returns [`PipelineError::ModuleLoad`] if a directory is missing or a
/// module file cannot be loaded, and [`PipelineError::DuplicateType`] if two
/// declarations claim the same keyword in one category.
#[instrument(skip_all, fields(directories = directories.len()))]
pub fn discover(directories: &[PathBuf]) -> Result<ModuleRegistry, PipelineError> {
    let mut registry = ModuleRegistry::new();
    for directory in directories {
        for path in module_files(directory)? {
            load_module_file(&mut registry, &path)?;
        }
    }
    info!(modules = registry.len(), "Module discovery complete");
    Ok(registry)
}

/// Lists module files under one directory in deterministic order.
fn module_files(directory: &Path) -> Result<Vec<PathBuf>, ModuleLoadError> {
    if !directory.is_dir() {
        return Err(ModuleLoadError::InvalidDirectory {
            path: directory.to_path_buf(),
        });
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(directory).sort_by_file_name() {
        let entry = entry.map_err(|err| {
            let path = err
                .path()
                .map_or_else(|| directory.to_path_buf(), Path::to_path_buf);
            let source = err
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
            ModuleLoadError::Io { path, source }
        })?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == "toml") {
            files.push(path.to_path_buf());
        }
    }
    debug!(directory = %directory.display(), files = files.len(), "Scanned module directory");
    Ok(files)
}

/// Parses one module file, instantiates its implementation and registers
/// every keyword it provides.
///
/// # Errors
///
/// Returns an error if the file is invalid, names an unknown
/// implementation, declares a category the implementation does not serve,
/// or claims a keyword that is already taken.
pub fn load_module_file(registry: &mut ModuleRegistry, path: &Path) -> Result<(), PipelineError> {
    let manifest = ModuleManifest::load(path)?;

    let entry =
        find_entry(&manifest.implementation).ok_or_else(|| ModuleLoadError::UnknownImplementation {
            path: path.to_path_buf(),
            implementation: manifest.implementation.clone(),
        })?;

    let actual = entry.factory.category();
    if let Some(bad) = manifest.provides.iter().find(|p| p.category != actual) {
        return Err(ModuleLoadError::CategoryMismatch {
            path: path.to_path_buf(),
            implementation: manifest.implementation.clone(),
            declared: bad.category,
            actual,
        }
        .into());
    }

    let handle =
        entry
            .factory
            .instantiate(&manifest.settings)
            .map_err(|message| ModuleLoadError::Settings {
                path: path.to_path_buf(),
                implementation: manifest.implementation.clone(),
                message,
            })?;

    info!(
        path = %path.display(),
        implementation = %manifest.implementation,
        keywords = manifest.provides.len(),
        "Loaded module file"
    );

    for provides in &manifest.provides {
        registry.register(ModuleDescriptor::new(
            provides.keyword.clone(),
            manifest.implementation.clone(),
            path,
            handle.clone(),
        ))?;
    }
    Ok(())
}
