//! Incremental aggregation of crawler logs into the stats tree
//!
//! Each run replays the log files newer than the tree's watermark in
//! timestamp order. Every file's peer set is folded into its
//! year/month/day/hour buckets and its time tick. With cleanup enabled,
//! every file after the first one in a tick is skipped and returned for
//! deletion instead.

use std::collections::BTreeSet;
use std::io;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::analytics::geoip::{country_of, GeoResolver};
use crate::analytics::models::{BucketKey, StatsTree};
use crate::config::AggregationConfig;
use crate::error::{StatsError, StatsResult};
use crate::storage::{load_tree, LogFile, LogStore};

/// Counters describing one aggregation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Log files newer than the watermark
    pub discovered: usize,
    /// Files folded into the tree
    pub folded: usize,
    /// Files below the minimum peer count
    pub noise: usize,
    /// Files that could not be read or dated
    pub unreadable: usize,
    /// Files marked for deletion by cleanup
    pub superseded: usize,
}

/// Result of an aggregation pass
#[derive(Debug)]
pub struct RunOutcome {
    pub tree: StatsTree,
    pub files_to_delete: Vec<LogFile>,
    pub report: RunReport,
}

impl RunOutcome {
    /// An empty tree means the logs never produced anything usable,
    /// which is a failure rather than a quiet no-op
    pub fn check_not_empty(&self) -> StatsResult<()> {
        if self.tree.is_empty() {
            return Err(StatsError::EmptyTree);
        }
        Ok(())
    }
}

/// Folds new crawler logs into a stats tree
pub struct StatsAggregator<R> {
    store: LogStore,
    resolver: R,
    config: AggregationConfig,
}

impl<R: GeoResolver> StatsAggregator<R> {
    pub fn new(store: LogStore, resolver: R, config: AggregationConfig) -> Self {
        Self {
            store,
            resolver,
            config,
        }
    }

    pub fn store(&self) -> &LogStore {
        &self.store
    }

    /// Load the raw stats file, then run
    pub fn run_from_path(&self, stats_path: &Path, do_cleanup: bool) -> RunOutcome {
        self.run(load_tree(stats_path), do_cleanup)
    }

    /// Replay every log file newer than `tree`'s watermark into `tree`
    pub fn run(&self, tree: StatsTree, do_cleanup: bool) -> RunOutcome {
        let files = self.store.discover(tree.misc.last_update);

        info!(
            "Processing {} new log files from {}",
            files.len(),
            self.store.base_dir().display()
        );

        self.replay(tree, files, do_cleanup, |file| self.store.read_peers(file))
    }

    fn replay<F>(
        &self,
        mut tree: StatsTree,
        files: Vec<LogFile>,
        do_cleanup: bool,
        mut read_peers: F,
    ) -> RunOutcome
    where
        F: FnMut(&LogFile) -> io::Result<BTreeSet<String>>,
    {
        let started = Instant::now();
        let watermark = tree.misc.last_update;

        let mut report = RunReport {
            discovered: files.len(),
            ..Default::default()
        };
        let mut files_to_delete = Vec::new();
        // Tick of the last log that was actually read
        let mut last_tick: Option<BucketKey> = None;

        for file in files {
            let Some(key) =
                BucketKey::from_timestamp(file.timestamp, self.config.tick_interval_minutes)
            else {
                warn!("Log {} has an out-of-range timestamp", file.path.display());
                report.unreadable += 1;
                continue;
            };

            if do_cleanup && last_tick.as_ref() == Some(&key) {
                debug!("Log {} shares its tick with an earlier log", file.path.display());
                // Still move the watermark past it, in case deletion fails.
                tree.misc.observe(file.timestamp);
                report.superseded += 1;
                files_to_delete.push(file);
                continue;
            }

            let peers = match read_peers(&file) {
                Ok(peers) => peers,
                Err(e) => {
                    warn!("Skipping unreadable log {}: {}", file.path.display(), e);
                    report.unreadable += 1;
                    continue;
                }
            };
            let peer_count = peers.len();
            last_tick = Some(key.clone());

            tree.misc.observe(file.timestamp);

            if file.timestamp <= watermark {
                continue;
            }

            tree.misc.record_online(file.timestamp, peer_count as u64);

            if peer_count < self.config.min_peer_count {
                debug!(
                    "Log {} has only {} peers, not folding",
                    file.path.display(),
                    peer_count
                );
                report.noise += 1;
                continue;
            }

            let summary = tree.fold_file(&key, &peers, |address| {
                country_of(&self.resolver, address)
            });
            debug!(
                "Folded {} ({} peers, {} new this hour, new tick: {})",
                file.path.display(),
                peer_count,
                summary.new_in_hour,
                summary.new_tick
            );
            report.folded += 1;
        }

        info!(
            "Aggregation finished in {:.2?}: {} folded, {} noise, {} unreadable, {} superseded",
            started.elapsed(),
            report.folded,
            report.noise,
            report.unreadable,
            report.superseded
        );

        RunOutcome {
            tree,
            files_to_delete,
            report,
        }
    }
}
