//! Resolve an object tree and report every problem found.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use tracing::{error, info};
use vermont_core::{Diagnostic, Pipeline, Report, Severity};

use super::{OptionArgs, OutputFormat};
use crate::input;

#[derive(Debug, Args)]
pub struct VerifyArgs {
    #[command(flatten)]
    pub options: OptionArgs,

    /// Report format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Also print the value of every evaluated resource
    #[arg(long)]
    pub show_resources: bool,

    /// Object tree to verify (TOML)
    pub tree: PathBuf,
}

/// Runs the pipeline and prints the report.
///
/// Returns whether the rulebook passed: `false` if any error or fatal
/// diagnostic was raised.
pub fn run(args: &VerifyArgs) -> Result<bool> {
    let options = args.options.load()?;
    let tree = input::load_tree(&args.tree)?;
    info!(tree = %args.tree.display(), nodes = tree.len(), "Loaded object tree");

    let report = match Pipeline::from_options(options).and_then(|p| p.run(&tree)) {
        Ok(report) => report,
        Err(err) => {
            error!(error = %err, "Pipeline aborted");
            Report::fatal(&err)
        }
    };

    match args.format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to serialize report")?
        ),
        OutputFormat::Text => print_text(&report, args.show_resources),
    }

    Ok(report.exit_success())
}

fn severity_label(severity: Severity) -> console::StyledObject<String> {
    let label = severity.to_string();
    match severity {
        Severity::Fatal => style(label).red().bold(),
        Severity::Error => style(label).red(),
        Severity::Warning => style(label).yellow(),
    }
}

fn print_diagnostic(diagnostic: &Diagnostic) {
    let mut line = format!(
        "{} [{}]",
        severity_label(diagnostic.severity),
        diagnostic.kind
    );
    if let Some(source) = &diagnostic.source {
        line.push_str(&format!(" {}", style(source).dim()));
    }
    if let Some(object) = &diagnostic.object {
        line.push_str(&format!(" {}", style(object).cyan()));
    }
    println!("{line}: {}", diagnostic.message);
}

fn print_text(report: &Report, show_resources: bool) {
    for diagnostic in &report.diagnostics {
        print_diagnostic(diagnostic);
    }

    if show_resources && !report.resources.is_empty() {
        println!("\n{}", style("RESOURCES").bold());
        for (id, value) in &report.resources {
            println!("  {id:<40} {value}");
        }
    }

    let errors = report.count(Severity::Fatal) + report.count(Severity::Error);
    let warnings = report.count(Severity::Warning);
    let mark = if report.exit_success() {
        style("✓").green()
    } else {
        style("✗").red()
    };
    println!(
        "\n{mark} {} object(s) validated, {errors} error(s), {warnings} warning(s)",
        report.validated.len()
    );
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn args(dir: &TempDir, tree: &str) -> VerifyArgs {
        vermont_modules::link();
        fs::write(dir.path().join("options.toml"), "").unwrap();
        let modules = dir.path().join("modules");
        fs::create_dir_all(&modules).unwrap();
        fs::write(
            modules.join("resources.toml"),
            r#"
implementation = "builtin.reservation"

[[provides]]
category = "resource"
keyword = "reservation"
"#,
        )
        .unwrap();
        fs::write(
            modules.join("host.toml"),
            r#"
implementation = "builtin.attributes"

[[provides]]
category = "object"
keyword = "host"

[settings]
required = ["port"]
"#,
        )
        .unwrap();
        let tree_path = dir.path().join("tree.toml");
        fs::write(&tree_path, tree).unwrap();

        VerifyArgs {
            options: OptionArgs {
                options: Some(dir.path().join("options.toml")),
                module_dirs: vec![modules],
                ..OptionArgs::default()
            },
            format: OutputFormat::Json,
            show_resources: false,
            tree: tree_path,
        }
    }

    const TREE: &str = r#"
[object.pool]
type = "reservation"
attributes = { from = 100, reserve = 20 }

[object.good]
type = "host"
attributes = { port = "${pool}" }
"#;

    #[test]
    fn test_missing_explicit_options_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut args = args(&dir, TREE);
        args.options.options = Some(dir.path().join("absent-options.toml"));

        let err = run(&args).unwrap_err();

        assert!(format!("{err:#}").contains("absent-options.toml"));
    }

    #[test]
    fn test_resolved_tree_passes() {
        let dir = TempDir::new().unwrap();

        let passed = run(&args(&dir, TREE)).unwrap();

        assert!(passed);
    }

    #[test]
    fn test_rule_failure_fails_the_run() {
        // Arrange
        let dir = TempDir::new().unwrap();
        let tree = format!("{TREE}\n[object.bad]\ntype = \"host\"\n");
        let args = args(&dir, &tree);

        // Act
        let passed = run(&args).unwrap();

        // Assert
        assert!(!passed);
    }

    #[test]
    fn test_cycle_is_reported_not_raised() {
        let dir = TempDir::new().unwrap();
        let tree = r#"
[object.a]
type = "reservation"
attributes = { from = "${b}" }

[object.b]
type = "reservation"
attributes = { from = "${a}" }
"#;

        let passed = run(&args(&dir, tree)).unwrap();

        assert!(!passed);
    }
}
