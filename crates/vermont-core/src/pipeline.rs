//! End-to-end object resolution.
//!
//! A run takes the parsed tree through five stages, each consuming what the
//! previous one produced:
//!
//! 1. namespace merge
//! 2. static substitution
//! 3. resource classification and dependency-ordered evaluation
//! 4. dynamic substitution
//! 5. rule validation

use std::sync::Arc;

use tracing::{info, instrument};

use crate::{
    CompositeObject, DynamicMapping, Evaluator, HostProbe, ModuleRegistry, ParsedTree, PinnedProbe, PipelineError,
    Report, RulebookOptions, StaticMapping, SystemProbe, classify, discover, merge,
    resource_ids, substitute::{substitute_dynamic, substitute_static}, validate,
};

/// A loaded registry plus the options that drive a run.
pub struct Pipeline {
    registry: ModuleRegistry,
    options: RulebookOptions,
    probe: Arc<dyn SystemProbe>,
}

impl Pipeline {
    /// Creates a pipeline. System facts come from the options' `system`
    /// table first and from the running host otherwise.
    #[must_use]
    pub fn new(registry: ModuleRegistry, options: RulebookOptions) -> Self {
        let probe = PinnedProbe::new(options.system.clone()).with_fallback(Arc::new(HostProbe));
        Self {
            registry,
            options,
            probe: Arc::new(probe),
        }
    }

    /// Discovers modules from the option's module directories.
    ///
    /// # Errors
    ///
    /// Returns the discovery error; no stage runs after a failed load.
    pub fn from_options(options: RulebookOptions) -> Result<Self, PipelineError> {
        let registry = discover(&options.module_dirs)?;
        registry.log_summary();
        Ok(Self::new(registry, options))
    }

    /// Replaces the system probe handed to resource modules.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn SystemProbe>) -> Self {
        self.probe = probe;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    #[must_use]
    pub fn options(&self) -> &RulebookOptions {
        &self.options
    }

    /// Resolves and validates the tree.
    ///
    /// Per-object problems become diagnostics in the returned report.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::CyclicDependency`] if resources depend on
    /// each other in a cycle. No resource module or rule runs in that case.
    #[instrument(skip_all, fields(nodes = tree.len(), modules = self.registry.len()))]
    pub fn run(&self, tree: &ParsedTree) -> Result<Report, PipelineError> {
        let mut report = Report::default();

        let stage = merge(tree, &mut report);

        let resources = resource_ids(&stage.objects, &self.registry);
        let env = self.options.env_imports();
        let mapping = StaticMapping::build(
            &self.options.substitutions,
            &env,
            &stage.objects,
            &resources,
            &mut report,
        );
        let composites = substitute_static(stage.objects, &mapping);

        let (resources, others) = classify(composites, &self.registry);
        let outcome = Evaluator::new(&self.registry, Arc::clone(&self.probe))
            .with_timeout(self.options.evaluation_timeout())
            .evaluate(resources, &mut report)?;

        let known: Vec<&CompositeObject> = outcome
            .resources
            .values()
            .map(|resource| &resource.composite)
            .chain(&others)
            .collect();
        let mapping = DynamicMapping::extend(
            mapping,
            &outcome.values,
            &outcome.aliases,
            &known,
            &mut report,
        );
        let resolved = substitute_dynamic(others, &mapping, &mut report);

        validate(&resolved, &self.registry, &mut report);
        report.resources = outcome.values;

        info!(
            diagnostics = report.diagnostics.len(),
            validated = report.validated.len(),
            resources = report.resources.len(),
            "Pipeline complete"
        );
        Ok(report)
    }
}
