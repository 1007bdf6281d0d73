//! `validate` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use contracts::PushConfig;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<PushConfig>,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: Vec::new(),
            config: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(config) => ValidationResult {
            valid: true,
            config_path,
            error: None,
            warnings: collect_warnings(&config),
            config: Some(config),
        },
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: Vec::new(),
            config: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
pub(crate) fn collect_warnings(config: &PushConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.queue_capacity < 16 {
        warnings.push(format!(
            "queue_capacity {} is small - consumers will hit back-pressure and fall back to WAL recovery often",
            config.queue_capacity
        ));
    }

    if config.poll_timeout_ms < 100 {
        warnings.push(format!(
            "poll_timeout_ms {} is very short - requests may expire before data arrives",
            config.poll_timeout_ms
        ));
    }

    if config.max_response_bytes < 64 * 1024 {
        warnings.push(format!(
            "max_response_bytes {} leaves little room for result blocks",
            config.max_response_bytes
        ));
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref config) = result.config {
            println!("\n  Vgroup: {}", config.vgroup_id);
            println!("  Workers: {}", config.worker_count);
            println!("  Queue capacity: {}", config.queue_capacity);
            println!("  Poll timeout: {} ms", config.poll_timeout_ms);
            println!("  Max handles: {}", config.max_handles);
        }

        if !result.warnings.is_empty() {
            println!("\n⚠ Warnings:");
            for warning in &result.warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
