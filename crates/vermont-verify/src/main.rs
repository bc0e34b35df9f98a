//! Resolve and validate a Vermont rulebook.
//!
//! Usage:
//! ```bash
//! vermont-verify verify rulebook.toml             # Print the report
//! vermont-verify verify -m ./modules tree.toml    # Use a module directory
//! vermont-verify verify -D domain=example.com ... # Add a substitution
//! vermont-verify modules                          # List discovered modules
//! vermont-verify modules --implementations        # List built-in implementations
//! ```
//!
//! The process exits with status 1 when the report contains an error, and
//! with status 2 when the command itself could not run.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod commands;
mod input;

#[derive(Debug, Parser)]
#[command(name = "vermont-verify", author, version, about)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve an object tree and report problems
    Verify(commands::verify::VerifyArgs),

    /// List modules
    Modules(commands::modules::ModulesArgs),
}

fn default_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

fn init_tracing(verbose: u8) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(
            default_directive(verbose)
                .parse()
                .context("failed to parse log directive")?,
        )
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn run(cli: &Cli) -> Result<bool> {
    match &cli.command {
        Command::Verify(args) => commands::verify::run(args),
        Command::Modules(args) => commands::modules::run(args).map(|()| true),
    }
}

fn main() -> ExitCode {
    vermont_modules::link();
    let cli = Cli::parse();

    if let Err(err) = init_tracing(cli.verbose) {
        eprintln!("error: {err:#}");
        return ExitCode::from(2);
    }
    info!(
        command_line = %std::env::args().collect::<Vec<_>>().join(" "),
        "Start"
    );

    let code = match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!(error = %err, "Command failed");
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    };

    info!("End");
    code
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use clap::error::ErrorKind;

    use super::*;
    use crate::commands::OutputFormat;

    #[test]
    fn test_cli_verify_requires_tree_argument() {
        let err = Cli::try_parse_from(["vermont-verify", "verify"])
            .expect_err("expected clap parse error");
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_cli_parses_verify_flags() -> Result<(), clap::Error> {
        let cli = Cli::try_parse_from([
            "vermont-verify",
            "-vv",
            "verify",
            "-m",
            "/a",
            "--module-dir",
            "/b",
            "-D",
            "domain=example.com",
            "--timeout-ms",
            "250",
            "--format",
            "json",
            "tree.toml",
        ])?;

        let Command::Verify(args) = cli.command else {
            panic!("expected Command::Verify");
        };

        assert_eq!(cli.verbose, 2);
        assert_eq!(
            args.options.module_dirs,
            vec![PathBuf::from("/a"), PathBuf::from("/b")]
        );
        assert_eq!(args.options.defines, vec!["domain=example.com".to_string()]);
        assert_eq!(args.options.timeout_ms, Some(250));
        assert_eq!(args.format, OutputFormat::Json);
        assert_eq!(args.tree, PathBuf::from("tree.toml"));
        Ok(())
    }

    #[test]
    fn test_cli_verify_defaults() -> Result<(), clap::Error> {
        let cli = Cli::try_parse_from(["vermont-verify", "verify", "tree.toml"])?;

        let Command::Verify(args) = cli.command else {
            panic!("expected Command::Verify");
        };

        assert_eq!(cli.verbose, 0);
        assert_eq!(args.format, OutputFormat::Text);
        assert!(args.options.options.is_none());
        assert!(args.options.module_dirs.is_empty());
        assert!(!args.show_resources);
        Ok(())
    }

    #[test]
    fn test_cli_modules_implementations_flag() -> Result<(), clap::Error> {
        let cli = Cli::try_parse_from(["vermont-verify", "modules", "--implementations"])?;

        let Command::Modules(args) = cli.command else {
            panic!("expected Command::Modules");
        };

        assert!(args.implementations);
        Ok(())
    }

    #[test]
    fn test_cli_rejects_unknown_format() {
        let err = Cli::try_parse_from(["vermont-verify", "verify", "--format", "xml", "t.toml"])
            .expect_err("expected clap parse error");
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
    }

    #[test]
    fn test_cli_requires_subcommand() {
        let err = Cli::try_parse_from(["vermont-verify"]).expect_err("expected clap parse error");
        assert!(
            matches!(
                err.kind(),
                ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand | ErrorKind::MissingSubcommand
            ),
            "unexpected error kind: {:?}",
            err.kind()
        );
    }

    #[test]
    fn test_default_directive_follows_verbosity() {
        assert_eq!(default_directive(0), "warn");
        assert_eq!(default_directive(1), "info");
        assert_eq!(default_directive(5), "debug");
    }
}
