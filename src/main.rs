use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crawler_stats::analytics::{GeoIpService, StatsAggregator};
use crawler_stats::config::Config;
use crawler_stats::storage::{export, LogStore};

#[derive(Parser)]
#[command(name = "crawler-stats")]
#[command(about = "Aggregate crawler logs into time-bucketed peer statistics", long_about = None)]
struct Cli {
    /// Delete log files that share a time tick with an earlier log
    #[arg(long)]
    cleanup: bool,

    /// Aggregate and report without writing stats or deleting logs
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration");

    let resolver = GeoIpService::new(config.geoip_db_path.as_deref())?;
    if resolver.is_enabled() {
        info!(
            "Using GeoIP database: {}",
            config.geoip_db_path.as_deref().unwrap_or_default()
        );
    } else {
        info!("GeoIP disabled, peers count under the unknown country code");
    }

    let store = LogStore::new(&config.logs_dir, &config.aggregation.log_extension);
    let aggregator = StatsAggregator::new(store, resolver, config.aggregation.clone());

    info!("Collecting stats...");
    let outcome = aggregator.run_from_path(&config.raw_stats_file, cli.cleanup);

    outcome.check_not_empty()?;

    if cli.dry_run {
        info!(
            "Dry run: {} files would be folded, {} removed",
            outcome.report.folded,
            outcome.files_to_delete.len()
        );
        return Ok(());
    }

    export(
        &outcome.tree,
        &config.raw_stats_file,
        &config.public_stats_file,
    )
    .context("Failed to write stats files")?;

    // Only delete logs once the state that accounts for them is on disk
    if cli.cleanup && !outcome.files_to_delete.is_empty() {
        let removed = aggregator.store().remove(&outcome.files_to_delete);
        info!(
            "Removed {} of {} superseded log files",
            removed,
            outcome.files_to_delete.len()
        );
    }

    Ok(())
}
