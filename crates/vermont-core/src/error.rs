//! Fatal and lookup errors raised by the pipeline.
//!
//! Per-object problems never surface here; they become
//! [`Diagnostic`](crate::Diagnostic)s in the final report.

use std::path::PathBuf;

use crate::{ModuleCategory, ObjectId};

/// Conditions that abort a run before a report can be trusted.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PipelineError {
    /// A module file could not be read or instantiated.
    #[error(transparent)]
    ModuleLoad(#[from] ModuleLoadError),

    /// Two module files claim the same keyword within one category.
    #[error(
        "{category} type `{keyword}` is provided by both {} and {}",
        .first.display(),
        .second.display()
    )]
    DuplicateType {
        category: ModuleCategory,
        keyword: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// Resource dependencies form a loop, so no evaluation order exists.
    #[error("cyclic resource dependency: {}", format_cycle(.members))]
    CyclicDependency { members: Vec<ObjectId> },
}

fn format_cycle(members: &[ObjectId]) -> String {
    let mut path: Vec<&str> = members.iter().map(ObjectId::as_str).collect();
    if let Some(first) = members.first() {
        path.push(first.as_str());
    }
    path.join(" -> ")
}

/// Errors that can occur while discovering and instantiating module files.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ModuleLoadError {
    /// Failed to read a module file or walk a module directory.
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A module file is not valid TOML or does not match the module schema.
    #[error("failed to parse module file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The file names an implementation that is not compiled in.
    #[error("{}: unknown implementation `{implementation}`", .path.display())]
    UnknownImplementation {
        path: PathBuf,
        implementation: String,
    },

    /// The file declares a keyword in a category its implementation does not serve.
    #[error(
        "{}: implementation `{implementation}` provides {actual} modules, not {declared}",
        .path.display()
    )]
    CategoryMismatch {
        path: PathBuf,
        implementation: String,
        declared: ModuleCategory,
        actual: ModuleCategory,
    },

    /// The implementation rejected the file's `[settings]` table.
    #[error("{}: invalid settings for `{implementation}`: {message}", .path.display())]
    Settings {
        path: PathBuf,
        implementation: String,
        message: String,
    },

    /// The file does not declare any keyword.
    #[error("{}: module file provides no type keywords", .path.display())]
    Empty { path: PathBuf },

    /// A configured module directory does not exist or is not a directory.
    #[error("module directory {} is not a readable directory", .path.display())]
    InvalidDirectory { path: PathBuf },
}

/// Returned by [`ModuleRegistry::resolve`](crate::ModuleRegistry::resolve)
/// when no module serves a keyword.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no {category} module is registered for type `{keyword}`")]
pub struct UnknownTypeError {
    pub category: ModuleCategory,
    pub keyword: String,
}
