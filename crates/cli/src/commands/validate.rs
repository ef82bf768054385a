//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{OutputPattern, PolicyConfig, RepeaterConfig, UpstreamPattern};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    upstream: String,
    upstream_pattern: String,
    output_count: usize,
    writer_count: usize,
    block_size: u64,
    io_threads: usize,
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
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(config) => {
            let warnings = collect_warnings(&config);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    upstream: config.upstream.address.clone(),
                    upstream_pattern: config.upstream.pattern.to_string(),
                    output_count: config.outputs.len(),
                    writer_count: config.outputs.iter().filter(|o| o.is_writer()).count(),
                    block_size: config.block_size,
                    io_threads: config.io_threads,
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(config: &RepeaterConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.upstream.pattern == UpstreamPattern::Sub {
        warnings.push(
            "upstream uses SUB - frames published before the connection is up are lost".to_string(),
        );
    }

    for output in &config.outputs {
        if output.is_writer() && output.pattern == OutputPattern::Pub {
            warnings.push(format!(
                "Output '{}' is a writer on PUB - frames sent before the writer subscribes are lost",
                output.name
            ));
        }
        if let PolicyConfig::Block { n } = output.policy {
            if n < config.block_size {
                warnings.push(format!(
                    "Output '{}' uses block n={} below block_size={} - triggers inside a burst are ignored",
                    output.name, n, config.block_size
                ));
            }
        }
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!(
                "\n  Upstream: {} ({})",
                summary.upstream, summary.upstream_pattern
            );
            println!("  Outputs: {}", summary.output_count);
            println!("  Writers: {}", summary.writer_count);
            println!("  Block size: {}", summary.block_size);
            println!("  I/O threads: {}", summary.io_threads);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
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
