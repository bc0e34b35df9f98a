//! Namespace merging.
//!
//! Namespaces are processed top-down so a nested namespace starts from its
//! parent's already merged defaults. Each object then receives a private
//! copy of its namespace's defaults overlaid with its own attributes.

use std::collections::BTreeMap;

use tracing::{debug, instrument};

use crate::{
    Attributes, CompositeObject, Diagnostic, DiagnosticKind, ManagedObject, ObjectId, ParsedTree,
    Report, is_reserved,
};

/// Output of the merger.
#[derive(Debug, Clone, Default)]
pub struct CompositeStage {
    /// Merged objects in ascending id order.
    pub objects: Vec<CompositeObject>,
    /// Enclosing namespace of every merged object that has one.
    pub namespace_of: BTreeMap<ObjectId, ObjectId>,
}

fn reserved_attributes(node: &ManagedObject) -> Vec<&str> {
    node.attributes
        .keys()
        .map(String::as_str)
        .filter(|name| is_reserved(name))
        .collect()
}

fn reserved_error(node: &ManagedObject, names: &[&str]) -> Diagnostic {
    let what = match node.kind {
        crate::ObjectKind::Namespace => "namespace",
        crate::ObjectKind::Object => "object",
    };
    Diagnostic::error(
        DiagnosticKind::ReservedKeyword,
        format!(
            "{what} uses reserved keyword(s) {} as attribute names",
            names
                .iter()
                .map(|name| format!("`{name}`"))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    )
    .at(&node.id, &node.source)
}

/// Merges namespace defaults into every object of the tree.
///
/// A namespace that uses a reserved keyword as an attribute name is
/// reported and contributes none of its own defaults; its children inherit
/// from the nearest valid ancestor instead. An object that does so is
/// reported and left out of the stage.
#[instrument(skip_all, fields(nodes = tree.len()))]
pub fn merge(tree: &ParsedTree, report: &mut Report) -> CompositeStage {
    let mut defaults: BTreeMap<&ObjectId, Attributes> = BTreeMap::new();

    for namespace in tree.namespaces_top_down() {
        let mut merged = namespace
            .parent
            .as_ref()
            .and_then(|parent| defaults.get(parent))
            .cloned()
            .unwrap_or_default();

        let reserved = reserved_attributes(namespace);
        if reserved.is_empty() {
            merged.extend(
                namespace
                    .attributes
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
        } else {
            report.push(reserved_error(namespace, &reserved));
        }
        defaults.insert(&namespace.id, merged);
    }

    let mut stage = CompositeStage::default();
    for object in tree.objects() {
        let reserved = reserved_attributes(object);
        if !reserved.is_empty() {
            report.push(reserved_error(object, &reserved));
            continue;
        }

        let mut attributes = object
            .parent
            .as_ref()
            .and_then(|parent| defaults.get(parent))
            .cloned()
            .unwrap_or_default();
        attributes.extend(
            object
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        if let Some(parent) = &object.parent {
            stage
                .namespace_of
                .insert(object.id.clone(), parent.clone());
        }
        stage.objects.push(CompositeObject {
            id: object.id.clone(),
            declared_type: object.declared_type.clone(),
            attributes,
            source: object.source.clone(),
        });
    }

    debug!(objects = stage.objects.len(), "Merged namespace defaults");
    stage
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn find<'a>(stage: &'a CompositeStage, id: &str) -> Option<&'a CompositeObject> {
        stage.objects.iter().find(|o| o.id.as_str() == id)
    }

    #[test]
    fn test_object_values_take_precedence_over_namespace() {
        // Arrange
        let tree = ParsedTree::new([
            ManagedObject::namespace("web")
                .with_attribute("port", 80)
                .with_attribute("owner", "ops"),
            ManagedObject::object("web.host1", "host")
                .within("web")
                .with_attribute("port", 8080)
                .with_attribute("name", "h1"),
        ])
        .unwrap();
        let mut report = Report::default();

        // Act
        let stage = merge(&tree, &mut report);

        // Assert
        let host = find(&stage, "web.host1").unwrap();
        assert_eq!(host.attributes["port"], json!(8080));
        assert_eq!(host.attributes["owner"], json!("ops"));
        assert_eq!(host.attributes["name"], json!("h1"));
        assert_eq!(host.declared_type.as_deref(), Some("host"));
        assert!(report.diagnostics.is_empty());
    }

    #[test]
    fn test_nested_namespaces_inherit_merged_defaults() {
        let tree = ParsedTree::new([
            ManagedObject::namespace("site")
                .with_attribute("region", "eu")
                .with_attribute("tier", "gold"),
            ManagedObject::namespace("site.web")
                .within("site")
                .with_attribute("tier", "silver"),
            ManagedObject::object("site.web.host1", "host").within("site.web"),
        ])
        .unwrap();

        let stage = merge(&tree, &mut Report::default());

        let host = find(&stage, "site.web.host1").unwrap();
        assert_eq!(host.attributes["region"], json!("eu"));
        assert_eq!(host.attributes["tier"], json!("silver"));
        assert_eq!(
            stage.namespace_of.get("site.web.host1").map(ObjectId::as_str),
            Some("site.web")
        );
    }

    #[test]
    fn test_merge_leaves_parsed_tree_untouched() {
        let tree = ParsedTree::new([
            ManagedObject::namespace("web").with_attribute("port", 80),
            ManagedObject::object("web.host1", "host").within("web"),
        ])
        .unwrap();

        let _stage = merge(&tree, &mut Report::default());

        assert!(tree.get("web.host1").unwrap().attributes.is_empty());
    }

    #[test]
    fn test_reserved_namespace_contributes_no_defaults_at_any_depth() {
        // Arrange
        let tree = ParsedTree::new([
            ManagedObject::namespace("site").with_attribute("region", "eu"),
            ManagedObject::namespace("site.web")
                .within("site")
                .with_attribute("object", "oops")
                .with_attribute("port", 80),
            ManagedObject::namespace("site.web.inner")
                .within("site.web")
                .with_attribute("namespace", "oops"),
            ManagedObject::object("site.web.host1", "host").within("site.web"),
            ManagedObject::object("site.web.inner.host2", "host").within("site.web.inner"),
        ])
        .unwrap();
        let mut report = Report::default();

        // Act
        let stage = merge(&tree, &mut report);

        // Assert
        let errors: Vec<_> = report.of_kind(DiagnosticKind::ReservedKeyword).collect();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].object.as_ref().map(ObjectId::as_str), Some("site.web"));
        assert_eq!(
            errors[1].object.as_ref().map(ObjectId::as_str),
            Some("site.web.inner")
        );

        for id in ["site.web.host1", "site.web.inner.host2"] {
            let host = find(&stage, id).unwrap();
            assert_eq!(host.attributes.get("region"), Some(&json!("eu")));
            assert!(!host.attributes.contains_key("port"));
            assert!(!host.attributes.contains_key("object"));
            assert!(!host.attributes.contains_key("namespace"));
        }
    }

    #[test]
    fn test_object_with_reserved_attribute_is_skipped() {
        let tree = ParsedTree::new([
            ManagedObject::namespace("web"),
            ManagedObject::object("web.bad", "host")
                .within("web")
                .with_attribute("namespace", "x"),
            ManagedObject::object("web.good", "host").within("web"),
        ])
        .unwrap();
        let mut report = Report::default();

        let stage = merge(&tree, &mut report);

        assert!(find(&stage, "web.bad").is_none());
        assert!(find(&stage, "web.good").is_some());
        assert_eq!(report.of_kind(DiagnosticKind::ReservedKeyword).count(), 1);
        assert!(report.has_errors());
    }

    #[test]
    fn test_top_level_object_has_no_namespace() {
        let tree = ParsedTree::new([ManagedObject::object("standalone", "host")
            .with_attribute("a", 1)])
        .unwrap();

        let stage = merge(&tree, &mut Report::default());

        assert_eq!(stage.objects.len(), 1);
        assert!(stage.namespace_of.is_empty());
    }
}
