//! Resource implementations backed by system facts and arithmetic.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use vermont_core::{
    CompositeObject, EvaluationContext, ModuleEntry, ModuleFactory, ResourceModule, as_number,
    number_value, settings,
    system::{CPU_COUNT, MEMORY_AVAILABLE_MIB, MEMORY_TOTAL_MIB},
};

/// Attribute naming extra substitution names for a resource's value.
const ALIAS_ATTRIBUTE: &str = "alias";

fn declared_aliases(object: &CompositeObject) -> Vec<String> {
    match object.attributes.get(ALIAS_ATTRIBUTE) {
        Some(Value::String(name)) => vec![name.clone()],
        Some(Value::Array(names)) => names
            .iter()
            .filter_map(|name| name.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

fn fact(ctx: &EvaluationContext, key: &str) -> Result<Value, String> {
    ctx.probe()
        .read(key)
        .ok_or_else(|| format!("system fact `{key}` is not available on this host"))
}

/// Sums a number or a list of numbers.
fn total(value: &Value, attribute: &str) -> Result<f64, String> {
    match value {
        Value::Array(items) => items.iter().try_fold(0.0, |acc, item| {
            as_number(item)
                .map(|n| acc + n)
                .ok_or_else(|| format!("attribute `{attribute}` holds a non-number: {item}"))
        }),
        other => as_number(other)
            .ok_or_else(|| format!("attribute `{attribute}` is not a number: {other}")),
    }
}

/// Settings of implementations that take none.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NoSettings {}

fn no_settings(table: &toml::Table) -> Result<(), String> {
    settings::<NoSettings>(table).map(|NoSettings {}| ())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct MemorySettings {
    /// Report available instead of total memory.
    available: bool,
}

/// Physical memory in MiB. A `value` attribute overrides the probe.
#[derive(Debug)]
struct Memory {
    key: &'static str,
}

impl ResourceModule for Memory {
    fn evaluate(&self, ctx: &EvaluationContext) -> Result<Value, String> {
        if ctx.attribute("value").is_some() {
            return ctx.number("value").map(number_value);
        }
        fact(ctx, self.key)
    }

    fn aliases(&self, object: &CompositeObject) -> Vec<String> {
        declared_aliases(object)
    }
}

fn memory_factory(table: &toml::Table) -> Result<Arc<dyn ResourceModule>, String> {
    let settings: MemorySettings = settings(table)?;
    let key = if settings.available {
        MEMORY_AVAILABLE_MIB
    } else {
        MEMORY_TOTAL_MIB
    };
    Ok(Arc::new(Memory { key }))
}

/// Number of CPUs usable by this process.
#[derive(Debug)]
struct Cpu;

impl ResourceModule for Cpu {
    fn evaluate(&self, ctx: &EvaluationContext) -> Result<Value, String> {
        fact(ctx, CPU_COUNT)
    }

    fn aliases(&self, object: &CompositeObject) -> Vec<String> {
        declared_aliases(object)
    }
}

fn cpu_factory(table: &toml::Table) -> Result<Arc<dyn ResourceModule>, String> {
    no_settings(table)?;
    Ok(Arc::new(Cpu))
}

/// The `value` attribute, with references to other resources resolved.
#[derive(Debug)]
struct Constant;

impl ResourceModule for Constant {
    fn evaluate(&self, ctx: &EvaluationContext) -> Result<Value, String> {
        ctx.value_of("value")
            .ok_or_else(|| "attribute `value` is missing".to_string())
    }

    fn aliases(&self, object: &CompositeObject) -> Vec<String> {
        declared_aliases(object)
    }
}

fn constant_factory(table: &toml::Table) -> Result<Arc<dyn ResourceModule>, String> {
    no_settings(table)?;
    Ok(Arc::new(Constant))
}

/// `from` minus everything listed in `reserve`.
#[derive(Debug)]
struct Reservation;

impl ResourceModule for Reservation {
    fn evaluate(&self, ctx: &EvaluationContext) -> Result<Value, String> {
        let from = ctx.number("from")?;
        let reserved = match ctx.value_of("reserve") {
            Some(value) => total(&value, "reserve")?,
            None => 0.0,
        };
        let remaining = from - reserved;
        if remaining < 0.0 {
            return Err(format!(
                "reservation of {reserved} exceeds the {from} available"
            ));
        }
        Ok(number_value(remaining))
    }

    fn aliases(&self, object: &CompositeObject) -> Vec<String> {
        declared_aliases(object)
    }
}

fn reservation_factory(table: &toml::Table) -> Result<Arc<dyn ResourceModule>, String> {
    no_settings(table)?;
    Ok(Arc::new(Reservation))
}

/// Sum of the `values` attribute.
#[derive(Debug)]
struct Sum;

impl ResourceModule for Sum {
    fn evaluate(&self, ctx: &EvaluationContext) -> Result<Value, String> {
        let values = ctx
            .value_of("values")
            .ok_or_else(|| "attribute `values` is missing".to_string())?;
        total(&values, "values").map(number_value)
    }

    fn aliases(&self, object: &CompositeObject) -> Vec<String> {
        declared_aliases(object)
    }
}

fn sum_factory(table: &toml::Table) -> Result<Arc<dyn ResourceModule>, String> {
    no_settings(table)?;
    Ok(Arc::new(Sum))
}

inventory::submit! {
    ModuleEntry {
        id: "builtin.memory",
        description: "Physical memory in MiB, total or available",
        factory: ModuleFactory::Resource(memory_factory),
    }
}

inventory::submit! {
    ModuleEntry {
        id: "builtin.cpu",
        description: "Number of usable CPUs",
        factory: ModuleFactory::Resource(cpu_factory),
    }
}

inventory::submit! {
    ModuleEntry {
        id: "builtin.constant",
        description: "The object's `value` attribute",
        factory: ModuleFactory::Resource(constant_factory),
    }
}

inventory::submit! {
    ModuleEntry {
        id: "builtin.reservation",
        description: "`from` minus the sum of `reserve`",
        factory: ModuleFactory::Resource(reservation_factory),
    }
}

inventory::submit! {
    ModuleEntry {
        id: "builtin.sum",
        description: "Sum of the `values` list",
        factory: ModuleFactory::Resource(sum_factory),
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, path::Path};

    use serde_json::json;
    use vermont_core::{
        ModuleHandle, ModuleManifest, ObjectId, PinnedProbe, SourceLocation, find_entry,
    };

    use super::*;

    fn context(attributes: Value, dependencies: &[(&str, Value)]) -> EvaluationContext {
        let Value::Object(map) = attributes else {
            panic!("attributes must be a JSON object");
        };
        let object = CompositeObject {
            id: ObjectId::new("res"),
            declared_type: Some("test".into()),
            attributes: map.into_iter().collect(),
            source: SourceLocation::unknown(),
        };
        let dependencies: BTreeMap<ObjectId, Value> = dependencies
            .iter()
            .map(|(id, value)| (ObjectId::new(*id), value.clone()))
            .collect();
        let probe = PinnedProbe::default()
            .pin(MEMORY_TOTAL_MIB, 2048)
            .pin(MEMORY_AVAILABLE_MIB, 512)
            .pin(CPU_COUNT, 4);
        EvaluationContext::new(object, dependencies, Arc::new(probe))
    }

    fn instantiate(id: &str, settings: &str) -> Arc<dyn ResourceModule> {
        let table: toml::Table = toml::from_str(settings).unwrap();
        match find_entry(id).unwrap().factory {
            ModuleFactory::Resource(build) => build(&table).unwrap(),
            _ => panic!("{id} is not a resource implementation"),
        }
    }

    #[test]
    fn test_memory_reads_total_or_available() {
        let total = instantiate("builtin.memory", "");
        let available = instantiate("builtin.memory", "available = true");

        assert_eq!(total.evaluate(&context(json!({}), &[])), Ok(json!(2048)));
        assert_eq!(available.evaluate(&context(json!({}), &[])), Ok(json!(512)));
    }

    #[test]
    fn test_memory_literal_value_overrides_probe() {
        let memory = instantiate("builtin.memory", "");

        let value = memory.evaluate(&context(json!({"value": "1024"}), &[]));

        assert_eq!(value, Ok(json!(1024)));
    }

    #[test]
    fn test_memory_module_file_with_settings_loads() {
        // Arrange
        let manifest = ModuleManifest::parse(
            Path::new("memory.toml"),
            r#"
implementation = "builtin.memory"
description = "Physical memory"

[[provides]]
category = "resource"
keyword = "memory"

[settings]
available = false
"#,
        )
        .unwrap();

        // Act
        let handle = find_entry(&manifest.implementation)
            .unwrap()
            .factory
            .instantiate(&manifest.settings)
            .unwrap();

        // Assert
        let ModuleHandle::Resource(memory) = handle else {
            panic!("builtin.memory is not a resource implementation");
        };
        assert_eq!(memory.evaluate(&context(json!({}), &[])), Ok(json!(2048)));
    }

    #[test]
    fn test_memory_rejects_unknown_settings() {
        let table: toml::Table = toml::from_str("avail = true").unwrap();
        let ModuleFactory::Resource(build) = find_entry("builtin.memory").unwrap().factory else {
            panic!("builtin.memory is not a resource implementation");
        };

        assert!(build(&table).is_err());
    }

    #[test]
    fn test_cpu_count_comes_from_probe() {
        let cpu = instantiate("builtin.cpu", "");

        assert_eq!(cpu.evaluate(&context(json!({}), &[])), Ok(json!(4)));
    }

    #[test]
    fn test_reservation_subtracts_every_reserve() {
        // Arrange
        let reservation = instantiate("builtin.reservation", "");
        let ctx = context(
            json!({"from": "${mem.total}", "reserve": [128, "mem.os", 64]}),
            &[("mem.total", json!(1024)), ("mem.os", json!(64))],
        );

        // Act
        let value = reservation.evaluate(&ctx);

        // Assert
        assert_eq!(value, Ok(json!(768)));
    }

    #[test]
    fn test_reservation_below_zero_is_an_error() {
        let reservation = instantiate("builtin.reservation", "");
        let ctx = context(json!({"from": 100, "reserve": 200}), &[]);

        let err = reservation.evaluate(&ctx).unwrap_err();

        assert!(err.contains("exceeds"));
    }

    #[test]
    fn test_sum_adds_resolved_values() {
        let sum = instantiate("builtin.sum", "");
        let ctx = context(json!({"values": ["${a}", "b", 0.5]}), &[
            ("a", json!(1)),
            ("b", json!(2)),
        ]);

        assert_eq!(sum.evaluate(&ctx), Ok(json!(3.5)));
    }

    #[test]
    fn test_constant_declares_aliases() {
        let constant = instantiate("builtin.constant", "");
        let ctx = context(json!({"value": "eu-west", "alias": ["region", 7]}), &[]);

        assert_eq!(constant.evaluate(&ctx), Ok(json!("eu-west")));
        assert_eq!(constant.aliases(ctx.object()), vec!["region".to_string()]);
    }

    #[test]
    fn test_missing_value_is_an_error() {
        let constant = instantiate("builtin.constant", "");

        assert!(constant.evaluate(&context(json!({}), &[])).is_err());
    }
}
