use {anyhow::Result, clap::Subcommand};

use taskhub_config::{Severity, TaskhubConfig, validate};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the loaded configuration and report errors/warnings.
    Check,
    /// Print the effective configuration (after env overrides) as TOML.
    Show,
}

pub fn handle_config(action: ConfigAction, config: &TaskhubConfig) -> Result<()> {
    match action {
        ConfigAction::Check => check(config),
        ConfigAction::Show => {
            print!("{}", toml::to_string_pretty(config)?);
            Ok(())
        },
    }
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn check(config: &TaskhubConfig) -> Result<()> {
    let result = validate(config);

    for d in &result.diagnostics {
        let (color, label) = match d.severity {
            Severity::Error => (RED, "error"),
            Severity::Warning => (YELLOW, "warning"),
        };
        eprintln!("  {BOLD}{color}{label}{RESET} {}: {}", d.path, d.message);
    }

    let errors = result
        .diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .count();
    let warnings = result.diagnostics.len() - errors;

    if !result.diagnostics.is_empty() {
        eprintln!();
    }

    if result.diagnostics.is_empty() {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        std::process::exit(1);
    }

    Ok(())
}
