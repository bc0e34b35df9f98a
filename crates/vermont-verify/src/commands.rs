//! CLI command implementations for `vermont-verify`.
//!
//! - **`verify`**: Run the resolution pipeline over an object tree and print
//!   the report
//! - **`modules`**: List the modules discovered in the module directories
//!
//! Each command module exports an `*Args` struct and a `run` function.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use vermont_core::{OptionOverrides, RulebookOptions, parse_define};

pub mod modules;
pub mod verify;

/// Output format shared by all commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// Machine-readable JSON
    Json,
}

/// Flags that locate and override the rulebook options.
#[derive(Debug, Clone, Default, Args)]
pub struct OptionArgs {
    /// Rulebook options file (default: search the current directory, its
    /// parents, then ~/.config/vermont)
    #[arg(long, value_name = "FILE")]
    pub options: Option<PathBuf>,

    /// Module directory to scan; repeat for several. Replaces the
    /// directories from the options file
    #[arg(short = 'm', long = "module-dir", value_name = "DIR")]
    pub module_dirs: Vec<PathBuf>,

    /// Static substitution value, e.g. `-D domain=example.com`
    #[arg(short = 'D', long = "define", value_name = "KEY=VALUE")]
    pub defines: Vec<String>,

    /// Upper bound for a single resource evaluation, in milliseconds
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,
}

impl OptionArgs {
    /// Resolves the options file and applies the command-line overrides.
    pub fn load(&self) -> Result<RulebookOptions> {
        let mut options = RulebookOptions::resolve(self.options.as_deref())
            .context("failed to load rulebook options")?;

        let defines = self
            .defines
            .iter()
            .map(|definition| parse_define(definition))
            .collect::<Result<Vec<_>, _>>()?;

        options.apply(OptionOverrides {
            module_dirs: self.module_dirs.clone(),
            defines,
            evaluation_timeout_ms: self.timeout_ms,
        });
        Ok(options)
    }
}
