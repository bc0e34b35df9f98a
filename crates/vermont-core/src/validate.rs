//! Keyword-driven rule validation.

use tracing::{debug, instrument};

use crate::{
    CompositeObject, Diagnostic, DiagnosticKind, FindingSeverity, ModuleRegistry, ObjectView,
    Report, RuleContext,
};

/// Runs the rules registered for each object's type.
///
/// Objects are visited in ascending id order. An object whose type has no
/// object module is reported as an unknown type and not validated. Every
/// finding is collected; nothing stops at the first failure.
#[instrument(skip_all, fields(objects = objects.len()))]
pub fn validate(objects: &[CompositeObject], registry: &ModuleRegistry, report: &mut Report) {
    let ctx = RuleContext::new(registry);

    let mut ordered: Vec<&CompositeObject> = objects.iter().collect();
    ordered.sort_by(|a, b| a.id.cmp(&b.id));

    for object in ordered {
        let module = match registry.object(object.keyword()) {
            Ok(module) => module,
            Err(err) => {
                report.push(
                    Diagnostic::error(DiagnosticKind::UnknownType, err.to_string())
                        .at(&object.id, &object.source),
                );
                continue;
            }
        };

        let view = ObjectView::new(object);
        for rule in &module.rules {
            for finding in rule.check(&view, &ctx) {
                let message = match &finding.attribute {
                    Some(attribute) => {
                        format!("{}: attribute `{attribute}`: {}", rule.name(), finding.message)
                    }
                    None => format!("{}: {}", rule.name(), finding.message),
                };
                let diagnostic = match finding.severity {
                    FindingSeverity::Failure => {
                        Diagnostic::error(DiagnosticKind::RuleFailure, message)
                    }
                    FindingSeverity::Warning => {
                        Diagnostic::warning(DiagnosticKind::RuleWarning, message)
                    }
                };
                report.push(diagnostic.at(&object.id, &object.source));
            }
        }

        debug!(id = %object.id, rules = module.rules.len(), "Validated object");
        report.validated.push(object.id.clone());
    }
}
