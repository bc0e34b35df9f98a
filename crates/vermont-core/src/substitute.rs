//! Two-phase `${name}` substitution.
//!
//! The static pass runs right after merging with values known up front. The
//! dynamic pass runs after resource evaluation with a mapping extended by the
//! evaluated values, and anything still unresolved then is an error.
//!
//! Both mappings are plain immutable values passed into the substitution
//! calls. Building the dynamic mapping consumes the static one.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::LazyLock,
};

use regex::{Captures, Regex};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::{CompositeObject, Diagnostic, DiagnosticKind, ObjectId, Report};

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z0-9_.:-]+)\}").expect("token pattern is valid")
});

/// Names of all tokens in `text`, in order of appearance. A `${` that does
/// not open a well-formed token is literal text.
pub fn token_names(text: &str) -> Vec<&str> {
    TOKEN
        .captures_iter(text)
        .filter_map(|captures| captures.get(1))
        .map(|name| name.as_str())
        .collect()
}

/// The token name if `text` consists of exactly one token and nothing else.
pub fn whole_token(text: &str) -> Option<&str> {
    let captures = TOKEN.captures(text)?;
    if captures.get(0)?.len() != text.len() {
        return None;
    }
    captures.get(1).map(|name| name.as_str())
}

/// Every token name found in `value`, at any nesting depth.
pub fn tokens_in(value: &Value) -> BTreeSet<&str> {
    fn collect<'a>(value: &'a Value, out: &mut BTreeSet<&'a str>) {
        match value {
            Value::String(text) => out.extend(token_names(text)),
            Value::Array(items) => items.iter().for_each(|item| collect(item, out)),
            Value::Object(map) => map.values().for_each(|item| collect(item, out)),
            _ => {}
        }
    }

    let mut out = BTreeSet::new();
    collect(value, &mut out);
    out
}

/// Text form used when a value is embedded in a longer string.
pub fn text_form(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Replaces every token in `value` that `lookup` can resolve.
///
/// A string that is exactly one token takes the resolved value with its
/// type intact. Unresolved names are left in place and added to `missing`.
/// Replacement text is never rescanned, and map keys are never rewritten.
pub fn rewrite(
    value: &Value,
    lookup: &dyn Fn(&str) -> Option<Value>,
    missing: &mut BTreeSet<String>,
) -> Value {
    match value {
        Value::String(text) => {
            if let Some(name) = whole_token(text) {
                return lookup(name).unwrap_or_else(|| {
                    missing.insert(name.to_string());
                    value.clone()
                });
            }
            if !TOKEN.is_match(text) {
                return value.clone();
            }
            let rewritten = TOKEN.replace_all(text, |captures: &Captures<'_>| {
                let name = &captures[1];
                if let Some(resolved) = lookup(name) {
                    text_form(&resolved)
                } else {
                    missing.insert(name.to_string());
                    captures[0].to_string()
                }
            });
            Value::String(rewritten.into_owned())
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| rewrite(item, lookup, missing))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), rewrite(item, lookup, missing)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Adds `<object id>.<attribute>` for every scalar attribute that resolves
/// completely against `values`, repeating until a round adds nothing, so
/// attributes that refer to other attributes resolve in chains.
///
/// Each candidate is rewritten from its declared form, never from text an
/// earlier round produced. A key naming a resource is not added; it is
/// warned about once and remembered in `shadowed`.
fn add_cross_references(
    values: &mut BTreeMap<String, Value>,
    composites: &[&CompositeObject],
    resource_ids: &BTreeSet<ObjectId>,
    shadowed: &mut BTreeSet<String>,
    report: &mut Report,
) {
    loop {
        let mut added = 0_usize;
        for composite in composites {
            for (attribute, value) in &composite.attributes {
                if !matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_)) {
                    continue;
                }
                let key = composite.id.child(attribute);
                let name = key.to_string();
                if values.contains_key(&name) || shadowed.contains(&name) {
                    continue;
                }
                let mut missing = BTreeSet::new();
                let resolved = rewrite(value, &|token: &str| values.get(token).cloned(), &mut missing);
                if !missing.is_empty() {
                    continue;
                }
                if resource_ids.contains(&key) {
                    report.push(
                        Diagnostic::warning(
                            DiagnosticKind::ShadowedValue,
                            format!(
                                "`{key}` refers to the resource, not to attribute `{attribute}`"
                            ),
                        )
                        .at(&composite.id, &composite.source),
                    );
                    shadowed.insert(name);
                    continue;
                }
                values.insert(name, resolved);
                added += 1;
            }
        }
        if added == 0 {
            break;
        }
        debug!(added, "Resolved attribute cross-references");
    }
}

/// Values known before any resource is evaluated.
#[derive(Debug, Clone, Default)]
pub struct StaticMapping {
    values: BTreeMap<String, Value>,
    resource_ids: BTreeSet<ObjectId>,
    shadowed: BTreeSet<String>,
}

impl StaticMapping {
    /// Collects option seeds, imported environment variables as
    /// `env.<NAME>`, and `<object id>.<attribute>` for every scalar
    /// attribute that resolves without a resource value.
    ///
    /// A key equal to a resource id would hide the resource's evaluated
    /// value, so it is dropped and reported as a warning.
    #[instrument(skip_all, fields(composites = composites.len()))]
    pub fn build(
        seeds: &BTreeMap<String, Value>,
        env: &BTreeMap<String, String>,
        composites: &[CompositeObject],
        resource_ids: &BTreeSet<ObjectId>,
        report: &mut Report,
    ) -> Self {
        let mut values = BTreeMap::new();
        let mut shadowed = BTreeSet::new();

        for (name, value) in seeds {
            if resource_ids.contains(name.as_str()) {
                warn!(name = %name, "substitution seed shadows a resource");
                report.push(Diagnostic::warning(
                    DiagnosticKind::ShadowedValue,
                    format!("substitution `{name}` is ignored because a resource has that id"),
                ));
                continue;
            }
            values.insert(name.clone(), value.clone());
        }

        for (name, value) in env {
            values.insert(format!("env.{name}"), Value::String(value.clone()));
        }

        let composites: Vec<&CompositeObject> = composites.iter().collect();
        add_cross_references(&mut values, &composites, resource_ids, &mut shadowed, report);

        debug!(entries = values.len(), "Built static substitution mapping");
        Self {
            values,
            resource_ids: resource_ids.clone(),
            shadowed,
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// The static mapping extended with evaluated resource values.
#[derive(Debug, Clone, Default)]
pub struct DynamicMapping {
    values: BTreeMap<String, Value>,
}

impl DynamicMapping {
    /// Adds each evaluated value under its resource id and under every
    /// alias its module declared, then the `<object id>.<attribute>` entries
    /// of `composites` that resolve only now. An alias that collides with an
    /// existing name is dropped with a warning.
    pub fn extend(
        base: StaticMapping,
        evaluated: &BTreeMap<ObjectId, Value>,
        aliases: &BTreeMap<ObjectId, Vec<String>>,
        composites: &[&CompositeObject],
        report: &mut Report,
    ) -> Self {
        let StaticMapping {
            mut values,
            resource_ids,
            mut shadowed,
        } = base;
        for (id, value) in evaluated {
            values.insert(id.to_string(), value.clone());
        }
        for (id, names) in aliases {
            let Some(value) = evaluated.get(id) else {
                continue;
            };
            for alias in names {
                if values.contains_key(alias) {
                    warn!(id = %id, alias = %alias, "alias collides with an existing name");
                    report.push(
                        Diagnostic::warning(
                            DiagnosticKind::ShadowedValue,
                            format!("alias `{alias}` is already defined and was ignored"),
                        )
                        .about(id),
                    );
                    continue;
                }
                values.insert(alias.clone(), value.clone());
            }
        }
        add_cross_references(&mut values, composites, &resource_ids, &mut shadowed, report);
        Self { values }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

/// Error for one attribute left with unresolved tokens.
pub(crate) fn unresolved_error<'a>(
    composite: &CompositeObject,
    attribute: &str,
    names: impl IntoIterator<Item = &'a str>,
    looped: bool,
) -> Diagnostic {
    let names: Vec<_> = names.into_iter().map(|name| format!("${{{name}}}")).collect();
    let message = if looped {
        format!(
            "attribute `{attribute}` references {}, which refers back to it",
            names.join(", ")
        )
    } else {
        format!("attribute `{attribute}` references undefined {}", names.join(", "))
    };
    Diagnostic::error(DiagnosticKind::UnresolvedSubstitution, message)
        .at(&composite.id, &composite.source)
}

/// `true` if following unresolved references from `start` leads back to it.
fn in_reference_loop(start: &str, edges: &BTreeMap<String, BTreeSet<String>>) -> bool {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<&str> = edges
        .get(start)
        .into_iter()
        .flatten()
        .map(String::as_str)
        .collect();
    while let Some(name) = stack.pop() {
        if name == start {
            return true;
        }
        if seen.insert(name) {
            stack.extend(edges.get(name).into_iter().flatten().map(String::as_str));
        }
    }
    false
}

/// Applies the static mapping. Unresolved tokens are left for the dynamic
/// pass, so this never fails.
#[instrument(skip_all, fields(objects = composites.len()))]
pub fn substitute_static(
    composites: Vec<CompositeObject>,
    mapping: &StaticMapping,
) -> Vec<CompositeObject> {
    let lookup = |name: &str| mapping.get(name).cloned();
    composites
        .into_iter()
        .map(|mut composite| {
            let mut pending = BTreeSet::new();
            for value in composite.attributes.values_mut() {
                *value = rewrite(value, &lookup, &mut pending);
            }
            composite
        })
        .collect()
}

/// Applies the dynamic mapping and drops every object left with an
/// unresolved token, reporting one error per offending attribute. An
/// attribute whose unresolved references lead back to itself is reported
/// as a reference loop.
#[instrument(skip_all, fields(objects = composites.len()))]
pub fn substitute_dynamic(
    mut composites: Vec<CompositeObject>,
    mapping: &DynamicMapping,
    report: &mut Report,
) -> Vec<CompositeObject> {
    let lookup = |name: &str| mapping.get(name).cloned();
    let mut pending: BTreeMap<(usize, String), BTreeSet<String>> = BTreeMap::new();
    for (index, composite) in composites.iter_mut().enumerate() {
        for (attribute, value) in &mut composite.attributes {
            let mut missing = BTreeSet::new();
            *value = rewrite(value, &lookup, &mut missing);
            if !missing.is_empty() {
                pending.insert((index, attribute.clone()), missing);
            }
        }
    }

    let edges: BTreeMap<String, BTreeSet<String>> = pending
        .iter()
        .map(|((index, attribute), missing)| {
            (composites[*index].id.child(attribute).to_string(), missing.clone())
        })
        .collect();
    for ((index, attribute), missing) in &pending {
        let composite = &composites[*index];
        let looped = in_reference_loop(composite.id.child(attribute).as_str(), &edges);
        debug!(id = %composite.id, attribute = %attribute, looped, "Unresolved substitution");
        report.push(unresolved_error(
            composite,
            attribute,
            missing.iter().map(String::as_str),
            looped,
        ));
    }

    let incomplete: BTreeSet<usize> = pending.keys().map(|(index, _)| *index).collect();
    composites
        .into_iter()
        .enumerate()
        .filter(|(index, _)| !incomplete.contains(index))
        .map(|(_, composite)| composite)
        .collect()
}
