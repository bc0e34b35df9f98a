//! Extension interfaces for the three module categories.
//!
//! Each category has one flat trait. The registry stores instantiated
//! modules as a [`ModuleHandle`], a tagged variant over the three, and the
//! pipeline dispatches on the tag rather than on any type hierarchy.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    Attributes, CompositeObject, ModuleRegistry, ObjectId, SourceLocation, SystemProbe,
    substitute,
};

/// The independent keyword spaces a module can serve.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ModuleCategory {
    Object,
    Resource,
    LogFormat,
}

impl ModuleCategory {
    pub const ALL: [Self; 3] = [Self::Object, Self::Resource, Self::LogFormat];
}

impl fmt::Display for ModuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Object => "object",
            Self::Resource => "resource",
            Self::LogFormat => "logformat",
        })
    }
}

/// Computes the value of a resource object.
///
/// Modules run on a worker thread, so everything they see is owned by the
/// [`EvaluationContext`].
pub trait ResourceModule: Send + Sync {
    /// Produces the resource's value, or a message explaining why it cannot.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when no value can be computed.
    fn evaluate(&self, ctx: &EvaluationContext) -> Result<Value, String>;

    /// Extra substitution names the evaluated value is published under.
    fn aliases(&self, _object: &CompositeObject) -> Vec<String> {
        Vec::new()
    }
}

/// A validation procedure bound to an object type.
pub trait Rule: Send + Sync {
    fn name(&self) -> &str;

    /// Inspects the object and reports problems. Must not have side effects.
    fn check(&self, object: &ObjectView<'_>, ctx: &RuleContext<'_>) -> Vec<Finding>;
}

/// Parses lines of a log file into named fields.
pub trait LogFormatModule: Send + Sync {
    /// Returns `None` when the line does not match the format.
    fn parse_line(&self, line: &str) -> Option<BTreeMap<String, String>>;
}

/// The rules registered for one object type. A type may carry no rules at
/// all, in which case its objects are accepted as declared.
#[derive(Clone, Default)]
pub struct ObjectModule {
    pub rules: Vec<Arc<dyn Rule>>,
}

impl ObjectModule {
    #[must_use]
    pub fn new(rules: Vec<Arc<dyn Rule>>) -> Self {
        Self { rules }
    }

    #[must_use]
    pub fn with_rule(mut self, rule: impl Rule + 'static) -> Self {
        self.rules.push(Arc::new(rule));
        self
    }
}

impl fmt::Debug for ObjectModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectModule")
            .field(
                "rules",
                &self.rules.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// An instantiated module, tagged by category.
#[derive(Clone)]
pub enum ModuleHandle {
    Object(Arc<ObjectModule>),
    Resource(Arc<dyn ResourceModule>),
    LogFormat(Arc<dyn LogFormatModule>),
}

impl ModuleHandle {
    #[must_use]
    pub fn category(&self) -> ModuleCategory {
        match self {
            Self::Object(_) => ModuleCategory::Object,
            Self::Resource(_) => ModuleCategory::Resource,
            Self::LogFormat(_) => ModuleCategory::LogFormat,
        }
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object(module) => f.debug_tuple("Object").field(module).finish(),
            Self::Resource(_) => f.write_str("Resource(..)"),
            Self::LogFormat(_) => f.write_str("LogFormat(..)"),
        }
    }
}

/// Everything a resource module may consult while evaluating one object.
#[derive(Clone)]
pub struct EvaluationContext {
    object: CompositeObject,
    dependencies: BTreeMap<ObjectId, Value>,
    probe: Arc<dyn SystemProbe>,
}

impl EvaluationContext {
    #[must_use]
    pub fn new(
        object: CompositeObject,
        dependencies: BTreeMap<ObjectId, Value>,
        probe: Arc<dyn SystemProbe>,
    ) -> Self {
        Self {
            object,
            dependencies,
            probe,
        }
    }

    #[must_use]
    pub fn object(&self) -> &CompositeObject {
        &self.object
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.object.attributes.get(name)
    }

    /// Value of an already evaluated dependency.
    #[must_use]
    pub fn dependency(&self, id: &str) -> Option<&Value> {
        self.dependencies.get(id)
    }

    #[must_use]
    pub fn probe(&self) -> &dyn SystemProbe {
        self.probe.as_ref()
    }

    /// Reads an attribute with references to evaluated peers resolved.
    ///
    /// A string that is exactly `${id}`, or exactly a dependency id, becomes
    /// the peer's value with its type intact; tokens embedded in longer text
    /// are replaced by the peer's text form. Lists and maps are resolved
    /// element by element.
    #[must_use]
    pub fn value_of(&self, name: &str) -> Option<Value> {
        self.attribute(name).map(|value| self.resolve(value))
    }

    fn resolve(&self, value: &Value) -> Value {
        match value {
            Value::String(text) => {
                if let Some(peer) = self.dependencies.get(text.as_str()) {
                    return peer.clone();
                }
                let mut missing = BTreeSet::new();
                substitute::rewrite(
                    value,
                    &|name| self.dependencies.get(name).cloned(),
                    &mut missing,
                )
            }
            Value::Array(items) => Value::Array(items.iter().map(|v| self.resolve(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Reads an attribute as a number, accepting numeric strings.
    ///
    /// # Errors
    ///
    /// Returns a message when the attribute is missing or not numeric.
    pub fn number(&self, name: &str) -> Result<f64, String> {
        let value = self
            .value_of(name)
            .ok_or_else(|| format!("attribute `{name}` is missing"))?;
        as_number(&value).ok_or_else(|| format!("attribute `{name}` is not a number: {value}"))
    }
}

/// Interprets a JSON value as a number, accepting numeric strings.
#[must_use]
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Converts a computed number back to JSON, keeping whole numbers integral.
#[must_use]
pub fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "guarded by the fract and range checks"
        )]
        let whole = n as i64;
        return Value::from(whole);
    }
    serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
}

/// Read-only view of a fully substituted object handed to rules.
#[derive(Debug, Clone, Copy)]
pub struct ObjectView<'a> {
    object: &'a CompositeObject,
}

impl<'a> ObjectView<'a> {
    #[must_use]
    pub fn new(object: &'a CompositeObject) -> Self {
        Self { object }
    }

    #[must_use]
    pub fn id(&self) -> &'a ObjectId {
        &self.object.id
    }

    #[must_use]
    pub fn keyword(&self) -> &'a str {
        self.object.keyword()
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&'a Value> {
        self.object.attributes.get(name)
    }

    #[must_use]
    pub fn attributes(&self) -> &'a Attributes {
        &self.object.attributes
    }

    #[must_use]
    pub fn source(&self) -> &'a SourceLocation {
        &self.object.source
    }
}

/// What a rule may consult besides the object itself.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    registry: &'a ModuleRegistry,
}

impl<'a> RuleContext<'a> {
    #[must_use]
    pub fn new(registry: &'a ModuleRegistry) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &'a ModuleRegistry {
        self.registry
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingSeverity {
    Failure,
    Warning,
}

/// A single problem reported by a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub severity: FindingSeverity,
    pub attribute: Option<String>,
    pub message: String,
}

impl Finding {
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            severity: FindingSeverity::Failure,
            attribute: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: FindingSeverity::Warning,
            ..Self::failure(message)
        }
    }

    /// Names the attribute the finding is about.
    #[must_use]
    pub fn on(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }
}
