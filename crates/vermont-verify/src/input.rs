//! Reads an already-structured object tree from TOML.
//!
//! ```toml
//! [namespace.web]
//! line = 1
//! attributes = { port = 80 }
//!
//! [namespace.web.object.host1]
//! type = "host"
//! line = 4
//! attributes = { name = "h1" }
//!
//! [object.standalone]
//! type = "note"
//! ```
//!
//! Ids are the dotted path of names: the object above is `web.host1`.

use std::{collections::BTreeMap, fs, path::Path};

use anyhow::{Context, Result};
use serde::Deserialize;
use vermont_core::{Attributes, ManagedObject, ObjectId, ParsedTree, SourceLocation};

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TreeDocument {
    namespace: BTreeMap<String, NamespaceNode>,
    object: BTreeMap<String, ObjectNode>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct NamespaceNode {
    line: Option<u32>,
    attributes: Attributes,
    namespace: BTreeMap<String, NamespaceNode>,
    object: BTreeMap<String, ObjectNode>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ObjectNode {
    #[serde(rename = "type")]
    declared_type: String,
    line: Option<u32>,
    #[serde(default)]
    attributes: Attributes,
}

struct Flattener<'a> {
    file: &'a Path,
    nodes: Vec<ManagedObject>,
}

impl Flattener<'_> {
    fn source(&self, line: Option<u32>) -> SourceLocation {
        SourceLocation::new(self.file, line)
    }

    fn namespace(&mut self, id: ObjectId, parent: Option<&ObjectId>, node: NamespaceNode) {
        let mut managed = ManagedObject::namespace(id.clone()).with_source(self.source(node.line));
        managed.attributes = node.attributes;
        if let Some(parent) = parent {
            managed = managed.within(parent.clone());
        }
        self.nodes.push(managed);

        for (name, child) in node.namespace {
            self.namespace(id.child(&name), Some(&id), child);
        }
        for (name, child) in node.object {
            self.object(id.child(&name), Some(&id), child);
        }
    }

    fn object(&mut self, id: ObjectId, parent: Option<&ObjectId>, node: ObjectNode) {
        let mut managed =
            ManagedObject::object(id, node.declared_type).with_source(self.source(node.line));
        managed.attributes = node.attributes;
        if let Some(parent) = parent {
            managed = managed.within(parent.clone());
        }
        self.nodes.push(managed);
    }
}

/// Parses a tree document. `file` is recorded as every node's source.
pub fn parse_tree(file: &Path, contents: &str) -> Result<ParsedTree> {
    let document: TreeDocument = toml::from_str(contents)
        .with_context(|| format!("failed to parse object tree {}", file.display()))?;

    let mut flattener = Flattener {
        file,
        nodes: Vec::new(),
    };
    for (name, node) in document.namespace {
        flattener.namespace(ObjectId::new(name), None, node);
    }
    for (name, node) in document.object {
        flattener.object(ObjectId::new(name), None, node);
    }

    ParsedTree::new(flattener.nodes)
        .with_context(|| format!("invalid object tree {}", file.display()))
}

/// Reads and parses a tree document from disk.
pub fn load_tree(path: &Path) -> Result<ParsedTree> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read object tree {}", path.display()))?;
    parse_tree(path, &contents)
}
