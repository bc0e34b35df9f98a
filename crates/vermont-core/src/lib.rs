//! Object resolution and validation for Vermont rulebooks.
//!
//! This crate turns a parsed tree of namespaces and typed objects into a
//! report of diagnostics. Behaviour for each object type is supplied by
//! modules discovered at startup, so the core knows nothing about concrete
//! types.
//!
//! # Key Components
//!
//! - **Module Registry**: module files are discovered with [`discover`] and
//!   bound to type keywords in a [`ModuleRegistry`]
//! - **Namespace Merger**: [`merge`] gives every object its namespace
//!   defaults
//! - **Substitution**: `${name}` tokens are resolved in two passes through a
//!   [`StaticMapping`] and a [`DynamicMapping`]
//! - **Resource Evaluation**: the [`Evaluator`] runs resource modules in
//!   dependency order and rejects cycles up front
//! - **Validation**: [`validate`] runs the rules bound to each object's type
//!
//! # Example
//!
//! ```ignore
//! use vermont_core::{ManagedObject, ParsedTree, Pipeline, RulebookOptions};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let options = RulebookOptions::resolve(None)?;
//! let pipeline = Pipeline::from_options(options)?;
//!
//! let tree = ParsedTree::new([
//!     ManagedObject::namespace("web").with_attribute("port", 80),
//!     ManagedObject::object("web.host1", "host").within("web"),
//! ])?;
//!
//! let report = pipeline.run(&tree)?;
//! for diagnostic in &report.diagnostics {
//!     println!("{diagnostic}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! The registry is built with `&mut self` during discovery and only read
//! afterwards. Module implementations must be `Send + Sync` because a
//! resource evaluation may run on a worker thread when a timeout is set.

mod diagnostic;
mod entrypoint;
mod error;
mod evaluate;
mod loader;
mod manifest;
mod merge;
mod module;
mod object;
mod options;
mod pipeline;
mod registry;
mod validate;

/// `${name}` token scanning and the two substitution passes.
pub mod substitute;

/// Live system facts offered to resource modules.
pub mod system;

/// Parsed tree, composite and resource objects.
pub use object::{
    Attributes, CompositeObject, ManagedObject, ObjectId, ObjectKind, ParsedTree,
    RESERVED_KEYWORDS, ResourceObject, ResourceOutcome, SourceLocation, TreeError, is_reserved,
};

/// Diagnostics and the final report.
pub use diagnostic::{Diagnostic, DiagnosticKind, Report, Severity};

pub use error::{ModuleLoadError, PipelineError, UnknownTypeError};

/// Interfaces implemented by modules and the contexts handed to them.
pub use module::{
    EvaluationContext, Finding, FindingSeverity, LogFormatModule, ModuleCategory, ModuleHandle,
    ObjectModule, ObjectView, ResourceModule, Rule, RuleContext, as_number, number_value,
};

pub use system::{HostProbe, PinnedProbe, SystemProbe};

/// Link-time catalogue of module implementations.
///
/// Implementations submit a [`ModuleEntry`] with `inventory::submit!`; module
/// files select one by id.
pub use entrypoint::{
    LogFormatFactory, ModuleEntry, ModuleFactory, ObjectFactory, ResourceFactory, entries,
    find_entry, settings,
};

pub use manifest::{ModuleManifest, Provides};

/// Module discovery and keyword registration.
pub use loader::{discover, load_module_file};
pub use registry::{ModuleDescriptor, ModuleRegistry};

pub use merge::{CompositeStage, merge};

pub use substitute::{DynamicMapping, StaticMapping};

pub use evaluate::{
    EvaluationOutcome, Evaluator, classify, dependencies_of, evaluation_order, resource_ids,
};

pub use validate::validate;

/// Rulebook options and their resolution.
pub use options::{
    OPTIONS_ENV_VAR, OPTIONS_FILE_NAME, OptionOverrides, OptionsError, RulebookOptions, locate,
    parse_define,
};

pub use pipeline::Pipeline;
