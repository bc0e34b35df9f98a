//! Declarative attribute checks configured from module settings.
//!
//! ```toml
//! implementation = "builtin.attributes"
//!
//! [[provides]]
//! category = "object"
//! keyword = "host"
//!
//! [settings]
//! required = ["port", "name"]
//! numeric = ["port"]
//! range.port = { min = 1, max = 65535 }
//! allowed.protocol = ["http", "https"]
//! ```

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use vermont_core::{
    Finding, ModuleEntry, ModuleFactory, ObjectModule, ObjectView, Rule, RuleContext, as_number,
    settings,
};

/// Settings of `builtin.attributes`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AttributeSettings {
    /// Attributes every object must declare.
    pub required: Vec<String>,
    /// Attributes that must be numbers when present.
    pub numeric: Vec<String>,
    /// Inclusive bounds for numeric attributes.
    pub range: BTreeMap<String, Range>,
    /// Closed sets of accepted values.
    pub allowed: BTreeMap<String, Vec<Value>>,
}

/// Inclusive numeric bounds. Either side may be open.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Range {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Range {
    fn contains(self, n: f64) -> bool {
        self.min.is_none_or(|min| n >= min) && self.max.is_none_or(|max| n <= max)
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.min, self.max) {
            (Some(min), Some(max)) => write!(f, "between {min} and {max}"),
            (Some(min), None) => write!(f, "at least {min}"),
            (None, Some(max)) => write!(f, "at most {max}"),
            (None, None) => f.write_str("any number"),
        }
    }
}

struct Required(Vec<String>);

impl Rule for Required {
    fn name(&self) -> &str {
        "required"
    }

    fn check(&self, object: &ObjectView<'_>, _ctx: &RuleContext<'_>) -> Vec<Finding> {
        self.0
            .iter()
            .filter(|name| object.attribute(name).is_none())
            .map(|name| Finding::failure("is required but missing").on(name.as_str()))
            .collect()
    }
}

struct Numeric(Vec<String>);

impl Rule for Numeric {
    fn name(&self) -> &str {
        "numeric"
    }

    fn check(&self, object: &ObjectView<'_>, _ctx: &RuleContext<'_>) -> Vec<Finding> {
        self.0
            .iter()
            .filter_map(|name| {
                let value = object.attribute(name)?;
                as_number(value).is_none().then(|| {
                    Finding::failure(format!("must be a number, found {value}")).on(name.as_str())
                })
            })
            .collect()
    }
}

struct Bounds(BTreeMap<String, Range>);

impl Rule for Bounds {
    fn name(&self) -> &str {
        "range"
    }

    fn check(&self, object: &ObjectView<'_>, _ctx: &RuleContext<'_>) -> Vec<Finding> {
        let mut findings = Vec::new();
        for (name, range) in &self.0 {
            let Some(value) = object.attribute(name) else {
                continue;
            };
            match as_number(value) {
                Some(n) if range.contains(n) => {}
                Some(n) => findings.push(
                    Finding::failure(format!("{n} is out of range, expected {range}"))
                        .on(name.as_str()),
                ),
                None => findings.push(
                    Finding::failure(format!("cannot range-check non-number {value}"))
                        .on(name.as_str()),
                ),
            }
        }
        findings
    }
}

struct Allowed(BTreeMap<String, Vec<Value>>);

impl Rule for Allowed {
    fn name(&self) -> &str {
        "allowed"
    }

    fn check(&self, object: &ObjectView<'_>, _ctx: &RuleContext<'_>) -> Vec<Finding> {
        self.0
            .iter()
            .filter_map(|(name, accepted)| {
                let value = object.attribute(name)?;
                (!accepted.contains(value)).then(|| {
                    let choices: Vec<String> = accepted.iter().map(Value::to_string).collect();
                    Finding::failure(format!(
                        "{value} is not one of {}",
                        choices.join(", ")
                    ))
                    .on(name.as_str())
                })
            })
            .collect()
    }
}

fn attributes_factory(table: &toml::Table) -> Result<ObjectModule, String> {
    let settings: AttributeSettings = settings(table)?;
    if let Some((name, range)) = settings
        .range
        .iter()
        .find(|(_, r)| matches!((r.min, r.max), (Some(min), Some(max)) if min > max))
    {
        return Err(format!("range for `{name}` is empty: {range:?}"));
    }

    let mut module = ObjectModule::default();
    if !settings.required.is_empty() {
        module = module.with_rule(Required(settings.required));
    }
    if !settings.numeric.is_empty() {
        module = module.with_rule(Numeric(settings.numeric));
    }
    if !settings.range.is_empty() {
        module = module.with_rule(Bounds(settings.range));
    }
    if !settings.allowed.is_empty() {
        module = module.with_rule(Allowed(settings.allowed));
    }
    Ok(module)
}

inventory::submit! {
    ModuleEntry {
        id: "builtin.attributes",
        description: "Required, numeric, range and allowed-value checks",
        factory: ModuleFactory::Object(attributes_factory),
    }
}
