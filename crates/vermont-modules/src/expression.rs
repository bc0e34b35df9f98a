//! Rules written as CEL expressions.
//!
//! Each check is a boolean expression over the object. A check whose
//! expression is false produces a finding carrying its `fail_message`.
//!
//! ```toml
//! implementation = "builtin.expression"
//!
//! [[provides]]
//! category = "object"
//! keyword = "host"
//!
//! [[settings.check]]
//! name = "unprivileged-port"
//! when = "attributes.port >= 1024"
//! fail_message = "services must not bind privileged ports"
//! severity = "warning"
//! ```
//!
//! Variables available to expressions:
//! - `attributes`: the object's attributes as a map
//! - `id`: the object id
//! - `keyword`: the declared type keyword

use std::{collections::HashMap, sync::Arc};

use cel_interpreter::{
    Context, ParseErrors, Program, Value,
    objects::{Key, Map as CelMap},
};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;
use vermont_core::{
    Attributes, Finding, FindingSeverity, ModuleEntry, ModuleFactory, ObjectModule, ObjectView,
    Rule, RuleContext, settings,
};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExpressionError {
    #[error("check `{name}`: {message}")]
    Compile { name: String, message: String },
    #[error("check `{name}` could not be evaluated: {message}")]
    Evaluate { name: String, message: String },
    #[error("check `{name}` must produce a boolean, got {found}")]
    NotBoolean { name: String, found: String },
}

/// One configured check.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Check {
    pub name: String,
    /// CEL expression that must hold.
    pub when: String,
    pub fail_message: Option<String>,
    #[serde(default = "default_severity")]
    pub severity: FindingSeverity,
}

fn default_severity() -> FindingSeverity {
    FindingSeverity::Failure
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ExpressionSettings {
    check: Vec<Check>,
}

/// A compiled [`Check`].
#[derive(Debug)]
pub struct ExpressionRule {
    check: Check,
    program: Program,
}

impl ExpressionRule {
    /// Compiles a check.
    ///
    /// # Errors
    ///
    /// Returns [`ExpressionError::Compile`] if the expression does not parse.
    pub fn compile(check: Check) -> Result<Self, ExpressionError> {
        let program =
            Program::compile(&check.when).map_err(|e: ParseErrors| ExpressionError::Compile {
                name: check.name.clone(),
                message: e.to_string(),
            })?;
        Ok(Self { check, program })
    }

    /// Evaluates the expression against an object.
    ///
    /// # Errors
    ///
    /// Returns an error if evaluation fails or yields a non-boolean.
    pub fn holds(&self, object: &ObjectView<'_>) -> Result<bool, ExpressionError> {
        let mut ctx = Context::default();
        ctx.add_variable_from_value("attributes", to_cel_map(object.attributes()));
        ctx.add_variable_from_value("id", Value::String(Arc::new(object.id().to_string())));
        ctx.add_variable_from_value(
            "keyword",
            Value::String(Arc::new(object.keyword().to_string())),
        );

        match self.program.execute(&ctx) {
            Ok(Value::Bool(holds)) => Ok(holds),
            Ok(other) => Err(ExpressionError::NotBoolean {
                name: self.check.name.clone(),
                found: format!("{other:?}"),
            }),
            Err(e) => Err(ExpressionError::Evaluate {
                name: self.check.name.clone(),
                message: e.to_string(),
            }),
        }
    }
}

impl Rule for ExpressionRule {
    fn name(&self) -> &str {
        &self.check.name
    }

    fn check(&self, object: &ObjectView<'_>, _ctx: &RuleContext<'_>) -> Vec<Finding> {
        match self.holds(object) {
            Ok(true) => Vec::new(),
            Ok(false) => {
                let message = self
                    .check
                    .fail_message
                    .clone()
                    .unwrap_or_else(|| format!("condition `{}` does not hold", self.check.when));
                let finding = match self.check.severity {
                    FindingSeverity::Failure => Finding::failure(message),
                    FindingSeverity::Warning => Finding::warning(message),
                };
                vec![finding]
            }
            Err(err) => {
                debug!(id = %object.id(), error = %err, "Expression check errored");
                vec![Finding::failure(err.to_string())]
            }
        }
    }
}

fn to_cel(value: &JsonValue) -> Value {
    match value {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(u) = n.as_u64() {
                Value::UInt(u)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        JsonValue::String(s) => Value::String(Arc::new(s.clone())),
        JsonValue::Array(items) => Value::List(Arc::new(items.iter().map(to_cel).collect())),
        JsonValue::Object(map) => {
            let map: HashMap<Key, Value> = map
                .iter()
                .map(|(k, v)| (k.clone().into(), to_cel(v)))
                .collect();
            Value::Map(CelMap { map: Arc::new(map) })
        }
    }
}

fn to_cel_map(attributes: &Attributes) -> Value {
    let map: HashMap<Key, Value> = attributes
        .iter()
        .map(|(k, v)| (k.clone().into(), to_cel(v)))
        .collect();
    Value::Map(CelMap { map: Arc::new(map) })
}

fn expression_factory(table: &toml::Table) -> Result<ObjectModule, String> {
    let settings: ExpressionSettings = settings(table)?;
    let rules = settings
        .check
        .into_iter()
        .map(|check| {
            ExpressionRule::compile(check)
                .map(|rule| Arc::new(rule) as Arc<dyn Rule>)
                .map_err(|e| e.to_string())
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ObjectModule::new(rules))
}

inventory::submit! {
    ModuleEntry {
        id: "builtin.expression",
        description: "CEL conditions over an object's attributes",
        factory: ModuleFactory::Object(expression_factory),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use vermont_core::{CompositeObject, ModuleRegistry, ObjectId, SourceLocation};

    use super::*;

    fn object(attributes: JsonValue) -> CompositeObject {
        let JsonValue::Object(map) = attributes else {
            panic!("attributes must be a JSON object");
        };
        CompositeObject {
            id: ObjectId::new("web.host1"),
            declared_type: Some("host".into()),
            attributes: map.into_iter().collect(),
            source: SourceLocation::unknown(),
        }
    }

    fn check(when: &str) -> Check {
        Check {
            name: "test".into(),
            when: when.into(),
            fail_message: Some("condition failed".into()),
            severity: FindingSeverity::Failure,
        }
    }

    fn run(rule: &ExpressionRule, attributes: JsonValue) -> Vec<Finding> {
        let registry = ModuleRegistry::new();
        let object = object(attributes);
        rule.check(&ObjectView::new(&object), &RuleContext::new(&registry))
    }

    #[test]
    fn test_true_condition_passes() {
        let rule = ExpressionRule::compile(check("attributes.port >= 1024")).unwrap();

        assert!(run(&rule, json!({"port": 8080})).is_empty());
    }

    #[test]
    fn test_false_condition_reports_fail_message() {
        // Arrange
        let rule = ExpressionRule::compile(check("attributes.port >= 1024")).unwrap();

        // Act
        let found = run(&rule, json!({"port": 80}));

        // Assert
        assert_eq!(found, vec![Finding::failure("condition failed")]);
    }

    #[test]
    fn test_warning_severity_is_carried() {
        let rule = ExpressionRule::compile(Check {
            severity: FindingSeverity::Warning,
            fail_message: None,
            ..check("id == 'web.other'")
        })
        .unwrap();

        let found = run(&rule, json!({}));

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, FindingSeverity::Warning);
        assert!(found[0].message.contains("id == 'web.other'"));
    }

    #[test]
    fn test_type_and_nested_values_are_visible() {
        let rule = ExpressionRule::compile(check(
            "keyword == 'host' && attributes.tags.size() == 2 && attributes.tls.enabled",
        ))
        .unwrap();

        let found = run(&rule, json!({"tags": ["a", "b"], "tls": {"enabled": true}}));

        assert!(found.is_empty(), "{found:?}");
    }

    #[test]
    fn test_non_boolean_result_is_a_failure() {
        let rule = ExpressionRule::compile(check("attributes.port")).unwrap();

        let found = run(&rule, json!({"port": 80}));

        assert_eq!(found.len(), 1);
        assert!(found[0].message.contains("must produce a boolean"));
    }

    #[test]
    fn test_missing_attribute_is_an_evaluation_failure() {
        let rule = ExpressionRule::compile(check("attributes.port > 1")).unwrap();

        let found = run(&rule, json!({}));

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, FindingSeverity::Failure);
        assert!(found[0].message.contains("could not be evaluated"));
    }

    #[test]
    fn test_factory_rejects_invalid_expression() {
        let table: toml::Table = toml::from_str(
            r#"
[[check]]
name = "broken"
when = "attributes.port >"
"#,
        )
        .unwrap();

        let err = expression_factory(&table).unwrap_err();

        assert!(err.contains("broken"));
    }

    #[test]
    fn test_factory_builds_one_rule_per_check() {
        let table: toml::Table = toml::from_str(
            r#"
[[check]]
name = "a"
when = "true"

[[check]]
name = "b"
when = "false"
severity = "warning"
"#,
        )
        .unwrap();

        let module = expression_factory(&table).unwrap();

        let names: Vec<_> = module.rules.iter().map(|r| r.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
