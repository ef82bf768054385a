//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{PolicyConfig, RepeaterConfig};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    upstream: UpstreamInfo,
    block_size: u64,
    io_threads: usize,
    outputs: Vec<OutputInfo>,
}

#[derive(Serialize)]
struct UpstreamInfo {
    address: String,
    pattern: String,
    expected_source: String,
}

#[derive(Serialize)]
struct OutputInfo {
    name: String,
    endpoint: String,
    pattern: String,
    policy: String,
    queue_capacity: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    writer: Option<WriterInfo>,
}

#[derive(Serialize)]
struct WriterInfo {
    output_file: String,
    run_id: u64,
    n_images: u64,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let config = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&config);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&config);
    }

    Ok(())
}

/// Human-readable policy, e.g. `every_nth(2)` or `throttle(5s)`
fn describe_policy(policy: &PolicyConfig, block_size: u64) -> String {
    match *policy {
        PolicyConfig::EveryNth { n } => format!("every_nth({n})"),
        PolicyConfig::Stride { n } => format!("stride({n})"),
        PolicyConfig::Block { n } => format!("block({n}, burst {block_size})"),
        PolicyConfig::Throttle { seconds } => format!("throttle({seconds}s)"),
    }
}

fn build_config_info(config: &RepeaterConfig) -> ConfigInfo {
    let outputs = config
        .outputs
        .iter()
        .map(|o| OutputInfo {
            name: o.name.clone(),
            endpoint: format!("tcp://0.0.0.0:{}", o.port),
            pattern: o.pattern.to_string(),
            policy: describe_policy(&o.policy, config.block_size),
            queue_capacity: o.queue_capacity,
            writer: o.writer.as_ref().map(|w| WriterInfo {
                output_file: w.output_file.clone(),
                run_id: w.run_id,
                n_images: w.n_images,
            }),
        })
        .collect();

    ConfigInfo {
        upstream: UpstreamInfo {
            address: config.upstream.address.clone(),
            pattern: config.upstream.pattern.to_string(),
            expected_source: config.upstream.expected_source.clone(),
        },
        block_size: config.block_size,
        io_threads: config.io_threads,
        outputs,
    }
}

fn print_config_info(config: &RepeaterConfig) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                  repstream Configuration                     ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    println!("📥 Upstream");
    println!("   ├─ Address: {}", config.upstream.address);
    println!("   ├─ Pattern: {}", config.upstream.pattern);
    println!("   └─ Expected source: {}", config.upstream.expected_source);

    println!("\n⚙️  Settings");
    println!("   ├─ Block size: {}", config.block_size);
    println!("   └─ I/O threads: {}", config.io_threads);

    println!("\n📤 Outputs ({})", config.outputs.len());
    for (i, output) in config.outputs.iter().enumerate() {
        let is_last = i == config.outputs.len() - 1;
        let prefix = if is_last { "└─" } else { "├─" };
        let child_prefix = if is_last { "   " } else { "│  " };

        println!(
            "   {} {} (:{}, {}, {}, queue {})",
            prefix,
            output.name,
            output.port,
            output.pattern,
            describe_policy(&output.policy, config.block_size),
            output.queue_capacity
        );
        if let Some(ref writer) = output.writer {
            println!(
                "   {}  └─ writer: {} (run {}, {} images)",
                child_prefix, writer.output_file, writer.run_id, writer.n_images
            );
        }
    }

    println!();
}
