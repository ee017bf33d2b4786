use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use crawler_stats::analytics::StatsTree;
use crawler_stats::config::Config;
use crawler_stats::storage::write_atomic;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "crawler-stats-admin")]
#[command(about = "Inspect and maintain crawler stats files", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print global stats and per-year totals
    Show {
        /// Stats file to read (defaults to STATS_RAW_FILE)
        file: Option<PathBuf>,
    },
    /// Write a copy of a stats file with every IP cache removed
    Redact {
        /// Raw stats file
        #[arg(long)]
        input: PathBuf,
        /// Destination for the redacted copy
        #[arg(long)]
        output: PathBuf,
    },
}

/// Unlike the aggregator, admin commands refuse to guess on a bad file
fn read_tree(path: &Path) -> Result<StatsTree> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read stats file {}", path.display()))?;
    serde_json::from_str(contents.trim())
        .with_context(|| format!("Failed to parse stats file {}", path.display()))
}

fn format_timestamp(timestamp: i64) -> String {
    match DateTime::<Utc>::from_timestamp(timestamp, 0) {
        Some(time) if timestamp != 0 && timestamp != i64::MAX => {
            format!("{} ({})", timestamp, time.to_rfc3339())
        }
        _ => "never".to_string(),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Show { file } => {
            let path = match file {
                Some(path) => path,
                None => Config::from_env()?.raw_stats_file,
            };
            let tree = read_tree(&path)?;
            let (record_at, record_count) = tree.misc.most_online_record;

            println!("Last update:  {}", format_timestamp(tree.misc.last_update));
            println!("Oldest entry: {}", format_timestamp(tree.misc.oldest_entry));
            println!(
                "Most online:  {} peers at {}",
                record_count,
                format_timestamp(record_at)
            );

            if tree.is_empty() {
                println!("No yearly stats recorded.");
            } else {
                println!();
                println!("{:<6} {:>10} {:>10}", "Year", "Nodes", "Countries");
                println!("{}", "-".repeat(28));
                for (year, bucket) in &tree.years {
                    println!("{:<6} {:>10} {:>10}", year, bucket.nodes, bucket.geo.len());
                }
            }
        }
        Commands::Redact { input, output } => {
            if input == output {
                bail!("Refusing to redact {} in place", input.display());
            }
            let tree = read_tree(&input)?;
            let json = serde_json::to_vec(&tree.redacted())?;
            write_atomic(&output, &json)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!(
                "✓ Wrote redacted stats from '{}' to '{}'",
                input.display(),
                output.display()
            );
        }
    }

    Ok(())
}
