//! List discovered modules or compiled-in implementations.

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use serde_json::json;
use vermont_core::{ModuleRegistry, discover, entries};

use super::{OptionArgs, OutputFormat};

#[derive(Debug, Args)]
pub struct ModulesArgs {
    #[command(flatten)]
    pub options: OptionArgs,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// List the implementations compiled into this binary instead of the
    /// module directories
    #[arg(long)]
    pub implementations: bool,
}

pub fn run(args: &ModulesArgs) -> Result<()> {
    if args.implementations {
        print_implementations(args.format)
    } else {
        let options = args.options.load()?;
        let registry = discover(&options.module_dirs).context("module discovery failed")?;
        print_registry(&registry, args.format)
    }
}

fn print_registry(registry: &ModuleRegistry, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        let modules: Vec<_> = registry
            .descriptors()
            .map(|d| {
                json!({
                    "keyword": d.keyword,
                    "category": d.category,
                    "implementation": d.implementation,
                    "source": d.source,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&modules)?);
        return Ok(());
    }

    if registry.is_empty() {
        println!("No modules found");
        return Ok(());
    }

    println!(
        "{:<24} {:<10} {:<24} {}",
        style("KEYWORD").bold(),
        style("CATEGORY").bold(),
        style("IMPLEMENTATION").bold(),
        style("SOURCE").bold()
    );
    println!("{}", "-".repeat(80));
    for d in registry.descriptors() {
        println!(
            "{:<24} {:<10} {:<24} {}",
            d.keyword,
            d.category,
            d.implementation,
            d.source.display()
        );
    }
    println!(
        "\n{} {} module(s) registered",
        style("✓").green(),
        registry.len()
    );
    Ok(())
}

fn print_implementations(format: OutputFormat) -> Result<()> {
    let entries = entries();
    if format == OutputFormat::Json {
        let implementations: Vec<_> = entries
            .iter()
            .map(|e| {
                json!({
                    "id": e.id,
                    "category": e.factory.category(),
                    "description": e.description,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&implementations)?);
        return Ok(());
    }

    println!(
        "{:<24} {:<10} {}",
        style("ID").bold(),
        style("CATEGORY").bold(),
        style("DESCRIPTION").bold()
    );
    println!("{}", "-".repeat(80));
    for e in &entries {
        println!(
            "{:<24} {:<10} {}",
            e.id,
            e.factory.category(),
            e.description
        );
    }
    Ok(())
}
