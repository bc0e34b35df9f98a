//! Log file objects must name a registered log format.

use serde::Deserialize;
use serde_json::Value;
use vermont_core::{
    Finding, ModuleEntry, ModuleFactory, ObjectModule, ObjectView, Rule,
    RuleContext, settings,
};

/// Settings of `builtin.logfile`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogFileSettings {
    /// Attribute holding the log format keyword.
    pub attribute: String,
    /// Report objects that do not declare a format.
    pub required: bool,
    /// Attribute holding example lines the format must parse.
    pub sample_attribute: String,
}

impl Default for LogFileSettings {
    fn default() -> Self {
        Self {
            attribute: "logformat".to_string(),
            required: true,
            sample_attribute: "sample".to_string(),
        }
    }
}

/// Checks the format reference and, when samples are declared, that the
/// format parses them.
#[derive(Debug)]
pub struct LogFileRule {
    settings: LogFileSettings,
}

impl LogFileRule {
    #[must_use]
    pub fn new(settings: LogFileSettings) -> Self {
        Self { settings }
    }

    fn samples<'a>(&self, object: &ObjectView<'a>) -> Vec<&'a str> {
        match object.attribute(&self.settings.sample_attribute) {
            Some(Value::String(line)) => vec![line.as_str()],
            Some(Value::Array(lines)) => lines.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

impl Rule for LogFileRule {
    fn name(&self) -> &str {
        "logfile"
    }

    fn check(&self, object: &ObjectView<'_>, ctx: &RuleContext<'_>) -> Vec<Finding> {
        let attribute = self.settings.attribute.as_str();
        let keyword = match object.attribute(attribute) {
            Some(Value::String(keyword)) => keyword.as_str(),
            Some(other) => {
                return vec![
                    Finding::failure(format!("must name a log format, found {other}"))
                        .on(attribute),
                ];
            }
            None if self.settings.required => {
                return vec![Finding::failure("is required but missing").on(attribute)];
            }
            None => return Vec::new(),
        };

        let format = match ctx.registry().log_format(keyword) {
            Ok(format) => format,
            Err(err) => return vec![Finding::failure(err.to_string()).on(attribute)],
        };

        self.samples(object)
            .into_iter()
            .filter(|line| format.parse_line(line).is_none())
            .map(|line| {
                Finding::warning(format!("`{line}` is not a `{keyword}` line"))
                    .on(self.settings.sample_attribute.as_str())
            })
            .collect()
    }
}

fn logfile_factory(table: &toml::Table) -> Result<ObjectModule, String> {
    let settings: LogFileSettings = settings(table)?;
    Ok(ObjectModule::default().with_rule(LogFileRule::new(settings)))
}

inventory::submit! {
    ModuleEntry {
        id: "builtin.logfile",
        description: "Checks that a log file names a registered log format",
        factory: ModuleFactory::Object(logfile_factory),
    }
}
