//! Config command - View and validate bisync configuration
//!
//! Provides the `bisync config` CLI command which:
//! 1. Shows the effective configuration (YAML or JSON)
//! 2. Validates the configuration file and reports errors

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Subcommand;
use tracing::info;

use bisync_core::config::Config;

use crate::output::{Counted, OutputFormat};
use crate::Invocation;

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display current configuration
    Show,
    /// Validate configuration file
    Validate,
}

impl ConfigCommand {
    pub async fn execute(&self, invocation: Invocation) -> Result<ExitCode> {
        match self {
            ConfigCommand::Show => execute_show(invocation),
            ConfigCommand::Validate => execute_validate(invocation),
        }
    }
}

fn execute_show(invocation: Invocation) -> Result<ExitCode> {
    let formatter = invocation.format.formatter(invocation.quiet);
    let config = &invocation.config;

    info!(config_path = %invocation.config_path.display(), "Showing configuration");

    if matches!(invocation.format, OutputFormat::Json) {
        let json =
            serde_json::to_value(config).context("Failed to serialize configuration to JSON")?;
        formatter.print_json(&json);
    } else {
        formatter.success(&format!(
            "Configuration ({})",
            invocation.config_path.display()
        ));
        formatter.info("");

        let yaml =
            serde_yaml::to_string(config).context("Failed to serialize configuration to YAML")?;
        for line in yaml.lines() {
            formatter.info(line);
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn execute_validate(invocation: Invocation) -> Result<ExitCode> {
    let formatter = invocation.format.formatter(invocation.quiet);
    let config_path = &invocation.config_path;

    // Read the file explicitly; the loaded config may be defaults
    let config = match Config::load(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            let message = if config_path.exists() {
                format!("Failed to parse configuration: {e}")
            } else {
                "Configuration file not found. Using defaults.".to_string()
            };
            if matches!(invocation.format, OutputFormat::Json) {
                formatter.print_json(&serde_json::json!({
                    "valid": false,
                    "config_path": config_path.display().to_string(),
                    "errors": [message],
                }));
            } else {
                formatter.error(&message);
                formatter.info(&format!("File: {}", config_path.display()));
            }
            return Ok(ExitCode::from(1));
        }
    };

    info!(config_path = %config_path.display(), "Validating configuration");

    let errors = config.validate();

    if matches!(invocation.format, OutputFormat::Json) {
        let error_strings: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        formatter.print_json(&serde_json::json!({
            "valid": errors.is_empty(),
            "config_path": config_path.display().to_string(),
            "errors": error_strings,
        }));
    } else if errors.is_empty() {
        formatter.success("Configuration is valid");
        formatter.info(&format!("File: {}", config_path.display()));
    } else {
        formatter.error(&format!(
            "Configuration has {}:",
            Counted::new(errors.len(), "error")
        ));
        formatter.info(&format!("File: {}", config_path.display()));
        formatter.info("");
        for error in &errors {
            formatter.info(&format!("  {} - {}", error.field, error.message));
        }
    }

    Ok(if errors.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
