use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{StatsError, StatsResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base directory of the crawler logs (`<base>/<date>/<timestamp>.<ext>`)
    pub logs_dir: PathBuf,
    /// Stats file including IP caches, read back on the next run
    pub raw_stats_file: PathBuf,
    /// Stats file without IP caches, for public consumption
    pub public_stats_file: PathBuf,
    /// Path to a MaxMind Country or City database
    /// If None, every peer is counted under the unknown country code
    pub geoip_db_path: Option<String>,
    pub aggregation: AggregationConfig,
}

/// Settings the aggregation pass itself depends on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Width of the smallest time bucket, in minutes
    pub tick_interval_minutes: u32,
    /// Files with fewer unique peers than this are treated as noise
    pub min_peer_count: usize,
    /// Extension of finished crawler log files
    pub log_extension: String,
}

impl AggregationConfig {
    pub const DEFAULT_TICK_INTERVAL_MINUTES: u32 = 5;
    pub const DEFAULT_MIN_PEER_COUNT: usize = 100;
    pub const DEFAULT_LOG_EXTENSION: &'static str = "cwl";

    pub fn new(
        tick_interval_minutes: u32,
        min_peer_count: usize,
        log_extension: impl Into<String>,
    ) -> StatsResult<Self> {
        if !(1..=60).contains(&tick_interval_minutes) || 60 % tick_interval_minutes != 0 {
            return Err(StatsError::InvalidConfig(format!(
                "tick interval must divide an hour evenly, got {tick_interval_minutes} minutes"
            )));
        }

        let log_extension = log_extension.into();
        if log_extension.is_empty() {
            return Err(StatsError::InvalidConfig(
                "log file extension must not be empty".to_string(),
            ));
        }

        Ok(Self {
            tick_interval_minutes,
            min_peer_count,
            log_extension,
        })
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            tick_interval_minutes: Self::DEFAULT_TICK_INTERVAL_MINUTES,
            min_peer_count: Self::DEFAULT_MIN_PEER_COUNT,
            log_extension: Self::DEFAULT_LOG_EXTENSION.to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let logs_dir = var("CRAWLER_LOGS_DIR").unwrap_or_else(|| "../../crawler_logs".to_string());
        let raw_stats_file = var("STATS_RAW_FILE").unwrap_or_else(|| "../raw.json".to_string());
        let public_stats_file =
            var("STATS_PUBLIC_FILE").unwrap_or_else(|| "../stats.json".to_string());

        let geoip_db_path = var("GEOIP_DB_PATH").filter(|p| !p.trim().is_empty());
        if geoip_db_path.is_none() {
            tracing::warn!(
                "GEOIP_DB_PATH is not set, all peers will be counted under the unknown country code"
            );
        }

        let tick_interval_minutes = match var("TICK_INTERVAL_MINUTES") {
            Some(v) => v
                .parse::<u32>()
                .with_context(|| format!("TICK_INTERVAL_MINUTES must be an integer, got '{v}'"))?,
            None => AggregationConfig::DEFAULT_TICK_INTERVAL_MINUTES,
        };

        let min_peer_count = match var("MIN_PEER_COUNT") {
            Some(v) => v
                .parse::<usize>()
                .with_context(|| format!("MIN_PEER_COUNT must be an integer, got '{v}'"))?,
            None => AggregationConfig::DEFAULT_MIN_PEER_COUNT,
        };

        let log_extension = var("LOG_FILE_EXTENSION")
            .unwrap_or_else(|| AggregationConfig::DEFAULT_LOG_EXTENSION.to_string());

        let aggregation = AggregationConfig::new(tick_interval_minutes, min_peer_count, log_extension)?;

        Ok(Config {
            logs_dir: logs_dir.into(),
            raw_stats_file: raw_stats_file.into(),
            public_stats_file: public_stats_file.into(),
            geoip_db_path,
            aggregation,
        })
    }
}
