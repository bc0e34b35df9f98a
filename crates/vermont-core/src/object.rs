//! Managed objects and the staged collections they flow through.
//!
//! Every node in a rulebook is a [`ManagedObject`]: either a namespace, which
//! groups children and supplies default attributes, or an object, which
//! declares a type keyword. The parser hands the core a [`ParsedTree`]; the
//! merger turns its objects into [`CompositeObject`]s and the evaluator
//! refines resource-typed composites into [`ResourceObject`]s.

use std::{
    borrow::Borrow,
    collections::{BTreeMap, BTreeSet},
    fmt,
    path::PathBuf,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Attribute mapping of a single object. Ordered so every stage iterates
/// deterministically.
pub type Attributes = BTreeMap<String, Value>;

/// Structural words that may never be used as attribute names.
pub const RESERVED_KEYWORDS: [&str; 2] = ["namespace", "object"];

/// Returns `true` if `name` is one of the [`RESERVED_KEYWORDS`].
pub fn is_reserved(name: &str) -> bool {
    RESERVED_KEYWORDS.contains(&name)
}

/// Dotted identifier of a namespace or object, e.g. `mem.reserved`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Appends `name` as a new path segment.
    #[must_use]
    pub fn child(&self, name: &str) -> Self {
        Self(format!("{}.{name}", self.0))
    }

    /// Drops the final path segment; `None` for a top-level id.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.0
            .rsplit_once('.')
            .map(|(parent, _)| Self(parent.to_string()))
    }

    /// Returns the final path segment.
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.rsplit_once('.').map_or(self.0.as_str(), |(_, name)| name)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ObjectId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for ObjectId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Structural role of a [`ManagedObject`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Namespace,
    Object,
}

/// File and line an object was declared at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: PathBuf,
    pub line: Option<u32>,
}

impl SourceLocation {
    #[must_use]
    pub fn new(file: impl Into<PathBuf>, line: Option<u32>) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }

    /// Location used for objects built in memory rather than read from disk.
    #[must_use]
    pub fn unknown() -> Self {
        Self::new("<memory>", None)
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{line}", self.file.display()),
            None => write!(f, "{}", self.file.display()),
        }
    }
}

/// A namespace or object exactly as the parser delivered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedObject {
    pub id: ObjectId,
    pub kind: ObjectKind,
    /// Keyword used to select a module. Namespaces normally carry none.
    pub declared_type: Option<String>,
    #[serde(default)]
    pub attributes: Attributes,
    pub source: SourceLocation,
    /// Enclosing namespace, looked up by id. Never owned.
    pub parent: Option<ObjectId>,
}

impl ManagedObject {
    /// Creates an empty top-level namespace.
    #[must_use]
    pub fn namespace(id: impl Into<ObjectId>) -> Self {
        Self {
            id: id.into(),
            kind: ObjectKind::Namespace,
            declared_type: None,
            attributes: Attributes::new(),
            source: SourceLocation::unknown(),
            parent: None,
        }
    }

    /// Creates an object of the given type with no attributes and no parent.
    #[must_use]
    pub fn object(id: impl Into<ObjectId>, declared_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ObjectKind::Object,
            declared_type: Some(declared_type.into()),
            attributes: Attributes::new(),
            source: SourceLocation::unknown(),
            parent: None,
        }
    }

    #[must_use]
    pub fn within(mut self, parent: impl Into<ObjectId>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: SourceLocation) -> Self {
        self.source = source;
        self
    }
}

/// Errors raised when the parsed tree violates its structural invariants.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TreeError {
    /// Two nodes share the same id.
    #[error("duplicate object id: {0}")]
    DuplicateId(ObjectId),

    /// A node names a parent that is not in the tree.
    #[error("{id} refers to missing parent namespace {parent}")]
    MissingParent { id: ObjectId, parent: ObjectId },

    /// A node names a parent that is an object rather than a namespace.
    #[error("{id} is nested under {parent}, which is not a namespace")]
    ParentNotNamespace { id: ObjectId, parent: ObjectId },

    /// Following parent links never reaches a root.
    #[error("namespace nesting loops back through {0}")]
    ParentCycle(ObjectId),
}

/// The parsed-but-unmerged rulebook handed to the pipeline.
#[derive(Debug, Clone, Default)]
pub struct ParsedTree {
    nodes: BTreeMap<ObjectId, ManagedObject>,
    depths: BTreeMap<ObjectId, usize>,
}

impl ParsedTree {
    /// Indexes the parser's nodes and checks id uniqueness and nesting.
    ///
    /// # Errors
    ///
    /// Returns a [`TreeError`] if an id repeats, a parent is missing or is
    /// not a namespace, or parent links form a loop.
    pub fn new(nodes: impl IntoIterator<Item = ManagedObject>) -> Result<Self, TreeError> {
        let mut index = BTreeMap::new();
        for node in nodes {
            if index.contains_key(&node.id) {
                return Err(TreeError::DuplicateId(node.id));
            }
            index.insert(node.id.clone(), node);
        }

        for node in index.values() {
            if let Some(parent) = &node.parent {
                match index.get(parent) {
                    None => {
                        return Err(TreeError::MissingParent {
                            id: node.id.clone(),
                            parent: parent.clone(),
                        });
                    }
                    Some(p) if p.kind != ObjectKind::Namespace => {
                        return Err(TreeError::ParentNotNamespace {
                            id: node.id.clone(),
                            parent: parent.clone(),
                        });
                    }
                    Some(_) => {}
                }
            }
        }

        let mut depths = BTreeMap::new();
        for id in index.keys() {
            let mut depth = 0;
            let mut cursor = index.get(id).and_then(|n| n.parent.as_ref());
            while let Some(parent) = cursor {
                depth += 1;
                if depth > index.len() {
                    return Err(TreeError::ParentCycle(id.clone()));
                }
                cursor = index.get(parent).and_then(|n| n.parent.as_ref());
            }
            depths.insert(id.clone(), depth);
        }

        Ok(Self {
            nodes: index,
            depths,
        })
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ManagedObject> {
        self.nodes.get(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Namespaces ordered so every parent precedes its children; siblings at
    /// the same depth are ordered by id.
    pub fn namespaces_top_down(&self) -> Vec<&ManagedObject> {
        let mut namespaces: Vec<_> = self
            .nodes
            .values()
            .filter(|n| n.kind == ObjectKind::Namespace)
            .collect();
        let depth = |n: &ManagedObject| self.depths.get(&n.id).copied().unwrap_or(0);
        namespaces.sort_by(|a, b| depth(a).cmp(&depth(b)).then_with(|| a.id.cmp(&b.id)));
        namespaces
    }

    /// Non-namespace nodes in ascending id order.
    pub fn objects(&self) -> impl Iterator<Item = &ManagedObject> {
        self.nodes.values().filter(|n| n.kind == ObjectKind::Object)
    }
}

/// An object after its enclosing namespaces' defaults have been merged in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeObject {
    pub id: ObjectId,
    pub declared_type: Option<String>,
    pub attributes: Attributes,
    pub source: SourceLocation,
}

impl CompositeObject {
    /// The declared type keyword, or the empty string when none was given.
    #[must_use]
    pub fn keyword(&self) -> &str {
        self.declared_type.as_deref().unwrap_or_default()
    }
}

/// Final state of a resource after the evaluator has visited it.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceOutcome {
    Evaluated(Value),
    Failed(String),
    /// A dependency did not evaluate, so this resource was never attempted.
    Unevaluable { blocked_by: ObjectId },
}

/// A composite whose type is served by a resource module.
#[derive(Debug, Clone)]
pub struct ResourceObject {
    pub composite: CompositeObject,
    pub depends_on: BTreeSet<ObjectId>,
    outcome: Option<ResourceOutcome>,
}

impl ResourceObject {
    #[must_use]
    pub fn new(composite: CompositeObject) -> Self {
        Self {
            composite,
            depends_on: BTreeSet::new(),
            outcome: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &ObjectId {
        &self.composite.id
    }

    #[must_use]
    pub fn outcome(&self) -> Option<&ResourceOutcome> {
        self.outcome.as_ref()
    }

    /// The computed value, if evaluation succeeded.
    #[must_use]
    pub fn evaluated_value(&self) -> Option<&Value> {
        match &self.outcome {
            Some(ResourceOutcome::Evaluated(value)) => Some(value),
            _ => None,
        }
    }

    /// Records the evaluation outcome. A resource settles once; later calls
    /// are ignored and return `false`.
    pub fn settle(&mut self, outcome: ResourceOutcome) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.outcome = Some(outcome);
        true
    }
}
