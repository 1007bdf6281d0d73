//! `info` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use contracts::{PushConfig, MIN_RESPONSE_BYTES};

use crate::cli::InfoArgs;
use crate::commands::validate::collect_warnings;

/// Effective configuration plus derived values
#[derive(Serialize)]
struct ConfigInfo {
    source: String,
    config: PushConfig,
    derived: DerivedInfo,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
}

#[derive(Serialize)]
struct DerivedInfo {
    /// Payload references a full registry can hold
    max_queued_refs: usize,
    /// Largest single block that still fits in a response
    max_block_bytes: usize,
    poll_timeout_secs: f64,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    let source = args
        .config
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<defaults>".to_string());
    info!(source = %source, "Loading configuration info");

    let config = config_loader::ConfigLoader::load_or_default(args.config.as_deref())
        .with_context(|| format!("Failed to load config from {source}"))?;
    let info = build_config_info(source, config);

    if args.json {
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&info);
    }

    Ok(())
}

fn build_config_info(source: String, config: PushConfig) -> ConfigInfo {
    let derived = DerivedInfo {
        max_queued_refs: config.max_handles.saturating_mul(config.queue_capacity),
        // One block: fixed prefix plus its length field
        max_block_bytes: config.max_response_bytes.saturating_sub(MIN_RESPONSE_BYTES + 4),
        poll_timeout_secs: config.poll_timeout().as_secs_f64(),
    };
    ConfigInfo {
        source,
        warnings: collect_warnings(&config),
        config,
        derived,
    }
}

fn print_config_info(info: &ConfigInfo) {
    let config = &info.config;
    println!("\n=== Push Configuration ({}) ===\n", info.source);
    println!("  Version: {:?}", config.version);
    println!("  Vgroup: {}", config.vgroup_id);
    println!("  Workers: {}", config.worker_count);
    println!("  Queue capacity: {}", config.queue_capacity);
    println!("  Max handles: {}", config.max_handles);
    println!("  Poll timeout: {:.3}s", info.derived.poll_timeout_secs);
    println!("  Max response: {} bytes", config.max_response_bytes);
    println!("  WAL scan limit: {}", config.wal_scan_limit);

    println!("\nDerived:");
    println!("  Max queued payload refs: {}", info.derived.max_queued_refs);
    println!("  Max single block: {} bytes", info.derived.max_block_bytes);

    if !info.warnings.is_empty() {
        println!("\nWarnings:");
        for warning in &info.warnings {
            println!("  - {}", warning);
        }
    }
    println!();
}
