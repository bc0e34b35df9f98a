//! Resource classification and dependency-ordered evaluation.
//!
//! # Graph Construction
//!
//! A resource depends on another when any of its attribute values, at any
//! nesting depth, carries a `${id}` token naming the other resource or is a
//! string exactly equal to the other resource's id. A resource that refers
//! to itself forms a cycle of one.
//!
//! # Ordering
//!
//! Kahn's algorithm with an ordered ready set: among resources whose
//! dependencies have all been attempted, the smallest id goes first. The
//! whole order is computed before any module runs, so a cycle aborts the run
//! without side effects.

use std::{
    any::Any,
    collections::{BTreeMap, BTreeSet},
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        mpsc::{self, RecvTimeoutError},
    },
    thread,
    time::Duration,
};

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::{
    CompositeObject, Diagnostic, DiagnosticKind, EvaluationContext, ModuleCategory,
    ModuleRegistry, ObjectId, PipelineError, Report, ResourceModule, ResourceObject,
    ResourceOutcome, SystemProbe, substitute,
};

/// Ids of the composites whose declared type is a registered resource type.
pub fn resource_ids(composites: &[CompositeObject], registry: &ModuleRegistry) -> BTreeSet<ObjectId> {
    composites
        .iter()
        .filter(|c| registry.contains(ModuleCategory::Resource, c.keyword()))
        .map(|c| c.id.clone())
        .collect()
}

/// Splits composites into resources and validation candidates.
///
/// A composite whose type is registered as a resource is always a resource,
/// even if the same keyword is also registered as an object type.
pub fn classify(
    composites: Vec<CompositeObject>,
    registry: &ModuleRegistry,
) -> (Vec<ResourceObject>, Vec<CompositeObject>) {
    let mut resources = Vec::new();
    let mut others = Vec::new();
    for composite in composites {
        if registry.contains(ModuleCategory::Resource, composite.keyword()) {
            resources.push(ResourceObject::new(composite));
        } else {
            others.push(composite);
        }
    }
    (resources, others)
}

/// Resources referenced anywhere in the object's attributes.
pub fn dependencies_of(
    object: &CompositeObject,
    resource_ids: &BTreeSet<ObjectId>,
) -> BTreeSet<ObjectId> {
    let mut out = BTreeSet::new();
    for value in object.attributes.values() {
        collect_references(value, resource_ids, &mut out);
    }
    out
}

fn collect_references(value: &Value, ids: &BTreeSet<ObjectId>, out: &mut BTreeSet<ObjectId>) {
    match value {
        Value::String(text) => {
            if let Some(id) = ids.get(text.as_str()) {
                out.insert(id.clone());
            }
            for name in substitute::token_names(text) {
                if let Some(id) = ids.get(name) {
                    out.insert(id.clone());
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, ids, out);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_references(item, ids, out);
            }
        }
        _ => {}
    }
}

/// Topologically sorts a dependency graph given as `node -> dependencies`.
///
/// Dependencies that are not nodes of the graph are ignored.
///
/// # Errors
///
/// Returns [`PipelineError::CyclicDependency`] naming the members of one
/// cycle when no complete order exists.
pub fn evaluation_order(
    graph: &BTreeMap<ObjectId, BTreeSet<ObjectId>>,
) -> Result<Vec<ObjectId>, PipelineError> {
    let mut in_degree: BTreeMap<&ObjectId, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&ObjectId, Vec<&ObjectId>> = BTreeMap::new();
    for (node, deps) in graph {
        let known: Vec<_> = deps.iter().filter(|d| graph.contains_key(*d)).collect();
        in_degree.insert(node, known.len());
        for dep in known {
            dependents.entry(dep).or_default().push(node);
        }
    }

    let mut ready: BTreeSet<&ObjectId> = in_degree
        .iter()
        .filter(|&(_, &degree)| degree == 0)
        .map(|(node, _)| *node)
        .collect();
    let mut order = Vec::with_capacity(graph.len());

    while let Some(node) = ready.pop_first() {
        order.push(node.clone());
        for &dependent in dependents.get(node).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }

    if order.len() == graph.len() {
        return Ok(order);
    }

    let stuck: BTreeSet<&ObjectId> = in_degree
        .into_iter()
        .filter(|&(_, degree)| degree > 0)
        .map(|(node, _)| node)
        .collect();
    Err(PipelineError::CyclicDependency {
        members: trace_cycle(&stuck, graph),
    })
}

/// Follows dependencies among stuck nodes from the smallest one until a node
/// repeats, and returns the loop rotated to start at its smallest member.
fn trace_cycle(
    stuck: &BTreeSet<&ObjectId>,
    graph: &BTreeMap<ObjectId, BTreeSet<ObjectId>>,
) -> Vec<ObjectId> {
    let Some(&start) = stuck.first() else {
        return Vec::new();
    };

    let mut path: Vec<&ObjectId> = vec![start];
    let mut current = start;
    loop {
        // Every stuck node waits on at least one other stuck node.
        let Some(next) = graph
            .get(current)
            .and_then(|deps| deps.iter().find(|d| stuck.contains(d)))
        else {
            break;
        };
        if let Some(position) = path.iter().position(|seen| *seen == next) {
            path.drain(..position);
            break;
        }
        path.push(next);
        current = next;
    }

    if let Some(smallest) = path
        .iter()
        .enumerate()
        .min_by_key(|(_, id)| **id)
        .map(|(index, _)| index)
    {
        path.rotate_left(smallest);
    }
    path.into_iter().cloned().collect()
}

/// Result of evaluating every resource.
#[derive(Debug, Default)]
pub struct EvaluationOutcome {
    /// Every resource with its settled outcome.
    pub resources: BTreeMap<ObjectId, ResourceObject>,
    /// Values of the resources that evaluated successfully.
    pub values: BTreeMap<ObjectId, Value>,
    /// Extra substitution names declared by modules, per resource.
    pub aliases: BTreeMap<ObjectId, Vec<String>>,
    /// Order in which resources were visited.
    pub order: Vec<ObjectId>,
}

/// Runs resource modules in dependency order.
pub struct Evaluator<'a> {
    registry: &'a ModuleRegistry,
    probe: Arc<dyn SystemProbe>,
    timeout: Option<Duration>,
}

impl<'a> Evaluator<'a> {
    #[must_use]
    pub fn new(registry: &'a ModuleRegistry, probe: Arc<dyn SystemProbe>) -> Self {
        Self {
            registry,
            probe,
            timeout: None,
        }
    }

    /// Bounds each module call. Without a limit modules run inline.
    ///
    /// With a limit each call runs on its own worker thread. A worker that
    /// overruns cannot be stopped and is left running detached, so once a
    /// module type has expired the remaining resources of that type are
    /// failed without calling it again. That leaves at most one abandoned
    /// thread per module type.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Evaluates all resources.
    ///
    /// A failing resource is reported and its dependents are reported as
    /// unevaluable; independent resources still run.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::CyclicDependency`] before any module runs if
    /// the dependency graph has a cycle.
    #[instrument(skip_all, fields(resources = resources.len()))]
    pub fn evaluate(
        &self,
        resources: Vec<ResourceObject>,
        report: &mut Report,
    ) -> Result<EvaluationOutcome, PipelineError> {
        let ids: BTreeSet<ObjectId> = resources.iter().map(|r| r.id().clone()).collect();
        let mut by_id: BTreeMap<ObjectId, ResourceObject> = resources
            .into_iter()
            .map(|mut resource| {
                resource.depends_on = dependencies_of(&resource.composite, &ids);
                (resource.id().clone(), resource)
            })
            .collect();

        let graph: BTreeMap<ObjectId, BTreeSet<ObjectId>> = by_id
            .iter()
            .map(|(id, resource)| (id.clone(), resource.depends_on.clone()))
            .collect();
        let order = evaluation_order(&graph)?;
        debug!(order = ?order, "Resolved evaluation order");

        let mut outcome = EvaluationOutcome::default();
        let mut expired = BTreeSet::new();
        for id in &order {
            let Some(resource) = by_id.get_mut(id) else {
                continue;
            };
            let settled = self.evaluate_one(resource, &ids, &outcome.values, &mut expired, report);
            if let ResourceOutcome::Evaluated(value) = &settled {
                outcome.values.insert(id.clone(), value.clone());
                if let Ok(module) = self.registry.resource(resource.composite.keyword()) {
                    let aliases = module.aliases(&resource.composite);
                    if !aliases.is_empty() {
                        outcome.aliases.insert(id.clone(), aliases);
                    }
                }
            }
            resource.settle(settled);
        }

        info!(
            evaluated = outcome.values.len(),
            total = by_id.len(),
            "Resource evaluation complete"
        );
        outcome.resources = by_id;
        outcome.order = order;
        Ok(outcome)
    }

    fn evaluate_one(
        &self,
        resource: &ResourceObject,
        ids: &BTreeSet<ObjectId>,
        values: &BTreeMap<ObjectId, Value>,
        expired: &mut BTreeSet<String>,
        report: &mut Report,
    ) -> ResourceOutcome {
        let composite = &resource.composite;

        // Tokens left after the static pass can only name other resources.
        let mut unresolved = Vec::new();
        for (attribute, value) in &composite.attributes {
            let names: Vec<&str> = substitute::tokens_in(value)
                .into_iter()
                .filter(|name| !ids.contains(*name))
                .collect();
            if !names.is_empty() {
                report.push(substitute::unresolved_error(composite, attribute, names, false));
                unresolved.push(attribute.as_str());
            }
        }
        if !unresolved.is_empty() {
            debug!(id = %composite.id, attributes = ?unresolved, "Resource has unresolved tokens");
            return ResourceOutcome::Failed(format!(
                "unresolved substitution in {}",
                unresolved.join(", ")
            ));
        }

        if let Some(blocked_by) = resource.depends_on.iter().find(|d| !values.contains_key(*d)) {
            report.push(
                Diagnostic::error(
                    DiagnosticKind::ResourceEvaluation,
                    format!("not evaluated because dependency `{blocked_by}` has no value"),
                )
                .at(&composite.id, &composite.source),
            );
            return ResourceOutcome::Unevaluable {
                blocked_by: blocked_by.clone(),
            };
        }

        let module = match self.registry.resource(composite.keyword()) {
            Ok(module) => module,
            Err(err) => {
                report.push(
                    Diagnostic::error(DiagnosticKind::UnknownType, err.to_string())
                        .at(&composite.id, &composite.source),
                );
                return ResourceOutcome::Failed(err.to_string());
            }
        };

        let keyword = composite.keyword();
        if expired.contains(keyword) {
            let message = format!(
                "skipped because module `{keyword}` already exceeded the evaluation timeout"
            );
            report.push(
                Diagnostic::error(DiagnosticKind::ResourceEvaluation, message.clone())
                    .at(&composite.id, &composite.source),
            );
            return ResourceOutcome::Failed(message);
        }

        let dependencies = resource
            .depends_on
            .iter()
            .filter_map(|dep| values.get(dep).map(|v| (dep.clone(), v.clone())))
            .collect();
        let ctx = EvaluationContext::new(composite.clone(), dependencies, Arc::clone(&self.probe));

        match self.run(module, ctx) {
            Ok(value) => {
                debug!(id = %composite.id, value = %value, "Evaluated resource");
                ResourceOutcome::Evaluated(value)
            }
            Err(RunError::Expired(message)) => {
                warn!(id = %composite.id, keyword = %keyword, "Resource evaluation timed out");
                expired.insert(keyword.to_string());
                report.push(
                    Diagnostic::error(DiagnosticKind::ResourceEvaluation, message.clone())
                        .at(&composite.id, &composite.source),
                );
                ResourceOutcome::Failed(message)
            }
            Err(RunError::Failed(message)) => {
                warn!(id = %composite.id, error = %message, "Resource evaluation failed");
                report.push(
                    Diagnostic::error(DiagnosticKind::ResourceEvaluation, message.clone())
                        .at(&composite.id, &composite.source),
                );
                ResourceOutcome::Failed(message)
            }
        }
    }

    fn run(
        &self,
        module: Arc<dyn ResourceModule>,
        ctx: EvaluationContext,
    ) -> Result<Value, RunError> {
        let Some(limit) = self.timeout else {
            return catch_unwind(AssertUnwindSafe(|| module.evaluate(&ctx)))
                .unwrap_or_else(|payload| Err(panic_message(payload.as_ref())))
                .map_err(RunError::Failed);
        };

        let (tx, rx) = mpsc::channel();
        let name = format!("evaluate-{}", ctx.object().id);
        thread::Builder::new()
            .name(name)
            .spawn(move || {
                let result = catch_unwind(AssertUnwindSafe(|| module.evaluate(&ctx)))
                    .unwrap_or_else(|payload| Err(panic_message(payload.as_ref())));
                // The receiver is gone once the deadline has passed.
                let _ = tx.send(result);
            })
            .map_err(|e| RunError::Failed(format!("failed to start evaluation worker: {e}")))?;

        match rx.recv_timeout(limit) {
            Ok(result) => result.map_err(RunError::Failed),
            Err(RecvTimeoutError::Timeout) => Err(RunError::Expired(format!(
                "evaluation did not finish within {} ms",
                limit.as_millis()
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(RunError::Failed(
                "evaluation worker exited without a result".to_string(),
            )),
        }
    }
}

enum RunError {
    Failed(String),
    Expired(String),
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    format!("module panicked: {detail}")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::{
        Attributes, ModuleDescriptor, ModuleHandle, ObjectModule, PinnedProbe, SourceLocation,
    };

    struct Constant;

    impl ResourceModule for Constant {
        fn evaluate(&self, ctx: &EvaluationContext) -> Result<Value, String> {
            ctx.value_of("value")
                .ok_or_else(|| "missing `value`".to_string())
        }

        fn aliases(&self, object: &CompositeObject) -> Vec<String> {
            object
                .attributes
                .get("alias")
                .and_then(Value::as_str)
                .map(|alias| vec![alias.to_string()])
                .unwrap_or_default()
        }
    }

    struct Difference;

    impl ResourceModule for Difference {
        fn evaluate(&self, ctx: &EvaluationContext) -> Result<Value, String> {
            let from = ctx.number("from")?;
            let minus = ctx.number("minus")?;
            Ok(crate::number_value(from - minus))
        }
    }

    struct Broken;

    impl ResourceModule for Broken {
        fn evaluate(&self, _ctx: &EvaluationContext) -> Result<Value, String> {
            Err("system resource is absent".to_string())
        }
    }

    struct Slow;

    impl ResourceModule for Slow {
        fn evaluate(&self, _ctx: &EvaluationContext) -> Result<Value, String> {
            thread::sleep(Duration::from_secs(2));
            Ok(json!(0))
        }
    }

    struct SlowCounting(Arc<AtomicUsize>);

    impl ResourceModule for SlowCounting {
        fn evaluate(&self, _ctx: &EvaluationContext) -> Result<Value, String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_secs(2));
            Ok(json!(0))
        }
    }

    struct Panicking;

    impl ResourceModule for Panicking {
        fn evaluate(&self, _ctx: &EvaluationContext) -> Result<Value, String> {
            panic!("boom");
        }
    }

    struct Counting(Arc<AtomicUsize>);

    impl ResourceModule for Counting {
        fn evaluate(&self, _ctx: &EvaluationContext) -> Result<Value, String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(json!(1))
        }
    }

    fn module(module: impl ResourceModule + 'static) -> Arc<dyn ResourceModule> {
        Arc::new(module)
    }

    fn registry_with(modules: Vec<(&str, Arc<dyn ResourceModule>)>) -> ModuleRegistry {
        let mut registry = ModuleRegistry::new();
        for (keyword, module) in modules {
            registry
                .register(ModuleDescriptor::new(
                    keyword,
                    "test",
                    format!("{keyword}.toml"),
                    ModuleHandle::Resource(module),
                ))
                .unwrap();
        }
        registry
    }

    fn standard_registry() -> ModuleRegistry {
        registry_with(vec![
            ("constant", module(Constant)),
            ("difference", module(Difference)),
            ("broken", module(Broken)),
        ])
    }

    fn resource(id: &str, keyword: &str, attributes: Value) -> ResourceObject {
        let Value::Object(map) = attributes else {
            panic!("attributes must be a JSON object");
        };
        ResourceObject::new(CompositeObject {
            id: ObjectId::new(id),
            declared_type: Some(keyword.into()),
            attributes: map.into_iter().collect::<Attributes>(),
            source: SourceLocation::unknown(),
        })
    }

    fn evaluator(registry: &ModuleRegistry) -> Evaluator<'_> {
        Evaluator::new(registry, Arc::new(PinnedProbe::default()))
    }

    #[test]
    fn test_dependencies_found_in_tokens_and_bare_ids() {
        let ids = BTreeSet::from([ObjectId::new("a"), ObjectId::new("b"), ObjectId::new("c")]);
        let object = resource(
            "x",
            "constant",
            json!({"p": "${a}", "q": ["b"], "r": {"s": "text ${c} text"}, "t": "d"}),
        );

        let deps = dependencies_of(&object.composite, &ids);

        assert_eq!(
            deps.into_iter().map(|d| d.to_string()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
    }

    #[test]
    fn test_order_respects_dependencies_with_ascending_tie_break() {
        let graph = BTreeMap::from([
            (ObjectId::new("z"), BTreeSet::new()),
            (ObjectId::new("b"), BTreeSet::from([ObjectId::new("z")])),
            (ObjectId::new("a"), BTreeSet::from([ObjectId::new("b")])),
            (ObjectId::new("m"), BTreeSet::new()),
        ]);

        let order = evaluation_order(&graph).unwrap();

        let order: Vec<_> = order.iter().map(ObjectId::as_str).collect();
        assert_eq!(order, vec!["m", "z", "b", "a"]);
    }

    #[test]
    fn test_cycle_is_traced_from_smallest_stuck_id() {
        // "a" waits on the loop b -> c -> b but is not part of it.
        let graph = BTreeMap::from([
            (ObjectId::new("a"), BTreeSet::from([ObjectId::new("c")])),
            (ObjectId::new("b"), BTreeSet::from([ObjectId::new("c")])),
            (ObjectId::new("c"), BTreeSet::from([ObjectId::new("b")])),
            (ObjectId::new("d"), BTreeSet::new()),
        ]);

        let err = evaluation_order(&graph).unwrap_err();

        match err {
            PipelineError::CyclicDependency { members } => {
                let members: Vec<_> = members.iter().map(ObjectId::as_str).collect();
                assert_eq!(members, vec!["b", "c"]);
            }
            other => panic!("expected CyclicDependency, got {other:?}"),
        }
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let registry = standard_registry();
        let mut report = Report::default();

        let err = evaluator(&registry)
            .evaluate(vec![resource("a", "constant", json!({"value": "${a}"}))], &mut report)
            .unwrap_err();

        assert!(matches!(err, PipelineError::CyclicDependency { members } if members.len() == 1));
    }

    #[test]
    fn test_cycle_aborts_before_any_module_runs() {
        // Arrange
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(vec![("counting", module(Counting(Arc::clone(&calls))))]);
        let resources = vec![
            resource("a", "counting", json!({"needs": "${b}"})),
            resource("b", "counting", json!({"needs": "${a}"})),
            resource("c", "counting", json!({})),
        ];
        let mut report = Report::default();

        // Act
        let err = evaluator(&registry).evaluate(resources, &mut report).unwrap_err();

        // Assert
        match err {
            PipelineError::CyclicDependency { members } => {
                let members: Vec<_> = members.iter().map(ObjectId::as_str).collect();
                assert_eq!(members, vec!["a", "b"]);
            }
            other => panic!("expected CyclicDependency, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(report.diagnostics.is_empty());
    }

    #[test]
    fn test_dependent_sees_evaluated_peer_value() {
        // Arrange
        let registry = standard_registry();
        let resources = vec![
            resource("mem.reserved", "difference", json!({"from": "${mem.total}", "minus": 256})),
            resource("mem.total", "constant", json!({"value": 1024})),
        ];
        let mut report = Report::default();

        // Act
        let outcome = evaluator(&registry).evaluate(resources, &mut report).unwrap();

        // Assert
        assert_eq!(
            outcome.order.iter().map(ObjectId::as_str).collect::<Vec<_>>(),
            vec!["mem.total", "mem.reserved"]
        );
        assert_eq!(outcome.values.get("mem.reserved"), Some(&json!(768)));
        assert_eq!(
            outcome.resources["mem.total"].evaluated_value(),
            Some(&json!(1024))
        );
        assert!(report.diagnostics.is_empty());
    }

    #[test]
    fn test_failure_blocks_dependents_but_not_independent_resources() {
        // Arrange
        let registry = standard_registry();
        let resources = vec![
            resource("disk.free", "broken", json!({})),
            resource("disk.spare", "difference", json!({"from": "disk.free", "minus": 1})),
            resource("cpu.count", "constant", json!({"value": 4})),
        ];
        let mut report = Report::default();

        // Act
        let outcome = evaluator(&registry).evaluate(resources, &mut report).unwrap();

        // Assert
        assert_eq!(outcome.values.get("cpu.count"), Some(&json!(4)));
        assert!(matches!(
            outcome.resources["disk.free"].outcome(),
            Some(ResourceOutcome::Failed(message)) if message.contains("absent")
        ));
        assert!(matches!(
            outcome.resources["disk.spare"].outcome(),
            Some(ResourceOutcome::Unevaluable { blocked_by }) if blocked_by.as_str() == "disk.free"
        ));
        let errors: Vec<_> = report.of_kind(DiagnosticKind::ResourceEvaluation).collect();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].object.as_ref().map(ObjectId::as_str), Some("disk.free"));
        assert_eq!(errors[1].object.as_ref().map(ObjectId::as_str), Some("disk.spare"));
    }

    #[test]
    fn test_aliases_are_collected_for_evaluated_resources() {
        let registry = standard_registry();
        let resources = vec![resource(
            "mem.total",
            "constant",
            json!({"value": 1024, "alias": "total_memory"}),
        )];

        let outcome = evaluator(&registry)
            .evaluate(resources, &mut Report::default())
            .unwrap();

        assert_eq!(
            outcome.aliases.get("mem.total"),
            Some(&vec!["total_memory".to_string()])
        );
    }

    #[test]
    fn test_slow_module_times_out() {
        let registry = registry_with(vec![("slow", module(Slow))]);
        let mut report = Report::default();

        let outcome = evaluator(&registry)
            .with_timeout(Some(Duration::from_millis(50)))
            .evaluate(vec![resource("s", "slow", json!({}))], &mut report)
            .unwrap();

        assert!(outcome.values.is_empty());
        let error = report.of_kind(DiagnosticKind::ResourceEvaluation).next().unwrap();
        assert!(error.message.contains("within 50 ms"));
    }

    #[test]
    fn test_panicking_module_is_reported_not_propagated() {
        let registry = registry_with(vec![("panicking", module(Panicking))]);

        for timeout in [None, Some(Duration::from_secs(5))] {
            let mut report = Report::default();
            let outcome = evaluator(&registry)
                .with_timeout(timeout)
                .evaluate(vec![resource("p", "panicking", json!({}))], &mut report)
                .unwrap();

            assert!(outcome.values.is_empty());
            let error = report.of_kind(DiagnosticKind::ResourceEvaluation).next().unwrap();
            assert!(error.message.contains("boom"), "{}", error.message);
        }
    }

    #[test]
    fn test_resource_keyword_wins_over_object_keyword() {
        let mut registry = standard_registry();
        registry
            .register(ModuleDescriptor::new(
                "constant",
                "test",
                "rules.toml",
                ModuleHandle::Object(Arc::new(ObjectModule::default())),
            ))
            .unwrap();
        let composite = resource("a", "constant", json!({"value": 1})).composite;

        let (resources, others) = classify(vec![composite], &registry);

        assert_eq!(resources.len(), 1);
        assert!(others.is_empty());
    }

    #[test]
    fn test_unresolved_token_fails_resource_and_blocks_dependents() {
        // Arrange
        let registry = standard_registry();
        let resources = vec![
            resource("r", "constant", json!({"value": "${nope}"})),
            resource("after", "difference", json!({"from": "${r}", "minus": 1})),
            resource("ok", "constant", json!({"value": "${after} ${nope}"})),
            resource("plain", "constant", json!({"value": 3})),
        ];
        let mut report = Report::default();

        // Act
        let outcome = evaluator(&registry).evaluate(resources, &mut report).unwrap();

        // Assert
        assert_eq!(outcome.values.len(), 1);
        assert_eq!(outcome.values.get("plain"), Some(&json!(3)));
        assert!(matches!(
            outcome.resources["r"].outcome(),
            Some(ResourceOutcome::Failed(message)) if message.contains("value")
        ));
        assert!(matches!(
            outcome.resources["after"].outcome(),
            Some(ResourceOutcome::Unevaluable { blocked_by }) if blocked_by.as_str() == "r"
        ));
        let unresolved: Vec<_> = report
            .of_kind(DiagnosticKind::UnresolvedSubstitution)
            .collect();
        assert_eq!(unresolved.len(), 2);
        assert_eq!(unresolved[0].object.as_ref().map(ObjectId::as_str), Some("r"));
        assert_eq!(unresolved[1].object.as_ref().map(ObjectId::as_str), Some("ok"));
        assert!(unresolved[1].message.contains("${nope}"));
        assert!(!unresolved[1].message.contains("${after}"));
    }

    #[test]
    fn test_expired_module_is_not_called_again() {
        // Arrange
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(vec![("slow", module(SlowCounting(Arc::clone(&calls))))]);
        let resources = vec![
            resource("s1", "slow", json!({})),
            resource("s2", "slow", json!({})),
        ];
        let mut report = Report::default();

        // Act
        let outcome = evaluator(&registry)
            .with_timeout(Some(Duration::from_millis(50)))
            .evaluate(resources, &mut report)
            .unwrap();

        // Assert
        assert!(outcome.values.is_empty());
        assert!(calls.load(Ordering::SeqCst) <= 1);
        let errors: Vec<_> = report.of_kind(DiagnosticKind::ResourceEvaluation).collect();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].message.contains("within 50 ms"));
        assert!(errors[1].message.contains("skipped"), "{}", errors[1].message);
    }
}
