//! Diagnostics and the end-of-run report.

use std::{collections::BTreeMap, fmt};

use serde::Serialize;
use serde_json::Value;

use crate::{ObjectId, PipelineError, SourceLocation};

/// How bad a diagnostic is. Ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Fatal,
    Error,
    Warning,
}

impl Severity {
    /// `true` for severities that make the run fail.
    #[must_use]
    pub fn is_failure(self) -> bool {
        self <= Self::Error
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fatal => "fatal",
            Self::Error => "error",
            Self::Warning => "warning",
        })
    }
}

/// What went wrong, independent of the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    ModuleLoad,
    DuplicateType,
    UnknownType,
    ReservedKeyword,
    CyclicDependency,
    ResourceEvaluation,
    UnresolvedSubstitution,
    RuleFailure,
    RuleWarning,
    /// A substitution value was ignored because another took its key.
    ShadowedValue,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ModuleLoad => "module-load",
            Self::DuplicateType => "duplicate-type",
            Self::UnknownType => "unknown-type",
            Self::ReservedKeyword => "reserved-keyword",
            Self::CyclicDependency => "cyclic-dependency",
            Self::ResourceEvaluation => "resource-evaluation",
            Self::UnresolvedSubstitution => "unresolved-substitution",
            Self::RuleFailure => "rule-failure",
            Self::RuleWarning => "rule-warning",
            Self::ShadowedValue => "shadowed-value",
        })
    }
}

/// One entry in the final report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    /// `None` for pipeline-level problems.
    pub object: Option<ObjectId>,
    pub source: Option<SourceLocation>,
    pub message: String,
}

impl Diagnostic {
    #[must_use]
    pub fn error(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            kind,
            object: None,
            source: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn warning(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(kind, message)
        }
    }

    /// Attributes the diagnostic to an object whose location is unknown.
    #[must_use]
    pub fn about(mut self, object: &ObjectId) -> Self {
        self.object = Some(object.clone());
        self
    }

    /// Attributes the diagnostic to an object and where it was declared.
    #[must_use]
    pub fn at(mut self, object: &ObjectId, source: &SourceLocation) -> Self {
        self.object = Some(object.clone());
        self.source = Some(source.clone());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.severity, self.kind)?;
        if let Some(source) = &self.source {
            write!(f, " {source}")?;
        }
        if let Some(object) = &self.object {
            write!(f, " {object}")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Everything a run produced: the diagnostics in the order they were raised,
/// the objects whose rules ran, and the values of evaluated resources.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub diagnostics: Vec<Diagnostic>,
    pub validated: Vec<ObjectId>,
    pub resources: BTreeMap<ObjectId, Value>,
}

impl Report {
    /// Renders an aborted run: a single fatal diagnostic and nothing else.
    #[must_use]
    pub fn fatal(error: &PipelineError) -> Self {
        let kind = match error {
            PipelineError::ModuleLoad(_) => DiagnosticKind::ModuleLoad,
            PipelineError::DuplicateType { .. } => DiagnosticKind::DuplicateType,
            PipelineError::CyclicDependency { .. } => DiagnosticKind::CyclicDependency,
        };
        Self {
            diagnostics: vec![Diagnostic {
                severity: Severity::Fatal,
                kind,
                object: None,
                source: None,
                message: error.to_string(),
            }],
            ..Self::default()
        }
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// `true` if any diagnostic is an error or worse.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity.is_failure())
    }

    #[must_use]
    pub fn exit_success(&self) -> bool {
        !self.has_errors()
    }

    /// Number of diagnostics at the given severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    /// Diagnostics of one kind, in report order.
    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(move |d| d.kind == kind)
    }
}
