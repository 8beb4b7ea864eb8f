//! # Publisher Configuration Check
//!
//! Loads the layered publisher configuration, validates it and prints the effective
//! settings. Exits non-zero when loading or validation fails.

use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use publisher_core::config::{ConfigManager, LoggingConfig};
use publisher_core::logging::init_structured_logging;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Parser)]
#[command(name = "publisher-config-check")]
#[command(about = "Validate publisher configuration")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file; environment variables with prefix PUBLISHER__ still apply
    #[arg(short, long, env = "PUBLISHER_CONFIG", default_value = "config/publisher.toml")]
    config: PathBuf,

    /// Environment overlay to apply (publisher.<environment>.toml)
    #[arg(short, long, env = "PUBLISHER_ENV", default_value = "development")]
    environment: String,

    /// Output format of the effective settings
    #[arg(long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    init_structured_logging(&LoggingConfig {
        level: level.to_string(),
        ..LoggingConfig::default()
    });

    match check(&cli) {
        Ok(()) => {
            info!("Configuration is valid");
        }
        Err(e) => {
            error!("Configuration check failed: {e:#}");
            eprintln!("Configuration check failed: {e:#}");
            process::exit(1);
        }
    }
}

fn check(cli: &Cli) -> anyhow::Result<()> {
    let manager = ConfigManager::load_from_file_with_env(&cli.config, &cli.environment)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
        }
        OutputFormat::Table => print_table(&manager),
    }
    Ok(())
}

fn print_table(manager: &ConfigManager) {
    let config = manager.config();
    println!("Publisher configuration ({})", manager.environment());
    if let Some(path) = manager.source_path() {
        let state = if path.exists() { "found" } else { "not found, defaults used" };
        println!("  file: {} ({state})", path.display());
    }
    println!();
    println!("  server.identity                     {}", config.server.identity);
    println!(
        "  server.pub_server_id                {}",
        config
            .server
            .pub_server_id
            .map_or_else(|| "-".to_string(), |id| id.to_string())
    );
    println!("  orchestration.dispatch_batch_size   {}", config.orchestration.dispatch_batch_size);
    println!("  orchestration.post_tasks_on_abort   {}", config.orchestration.post_tasks_on_abort);
    println!("  orchestration.max_concurrent_jobs   {}", config.orchestration.max_concurrent_jobs);
    println!("  tracking.item_page_size             {}", config.tracking.item_page_size);
    println!("  tracking.prefer_read_uncommitted    {}", config.tracking.prefer_read_uncommitted);
    println!("  tracking.retention_days             {}", config.tracking.retention_days);
    println!(
        "  unpublish.unpublish_flags           {}",
        config.unpublish.unpublish_flags.join(",")
    );
    println!("  unpublish.check_folders             {}", config.unpublish.check_folders);
    println!("  recovery.policy                     {:?}", config.recovery.policy);
    println!("  recovery.run_on_startup             {}", config.recovery.run_on_startup);
    println!("  database.max_connections            {}", config.database.max_connections);
    println!("  logging.level                       {}", config.logging.level);
}
