//! Crawler log directory access
//!
//! The crawler writes one file per crawl to `<base>/<date>/<timestamp>.<ext>`,
//! each holding the space-separated addresses it found.

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A finished crawler log file
///
/// Ordered by timestamp first so a sorted list replays chronologically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct LogFile {
    pub timestamp: i64,
    pub path: PathBuf,
}

pub struct LogStore {
    base_dir: PathBuf,
    extension: String,
}

impl LogStore {
    pub fn new(base_dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            extension: extension.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// List every log file newer than `after`, oldest first
    ///
    /// Only date directories directly under the base directory are walked.
    /// A missing base directory yields no files.
    pub fn discover(&self, after: i64) -> Vec<LogFile> {
        let entries = match fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    "Cannot read crawler log directory {}: {}",
                    self.base_dir.display(),
                    e
                );
                return Vec::new();
            }
        };

        let mut files = Vec::new();
        let mut date_dirs = 0usize;

        for entry in entries.flatten() {
            let date_dir = entry.path();
            if !date_dir.is_dir() {
                continue;
            }
            date_dirs += 1;

            let logs = match fs::read_dir(&date_dir) {
                Ok(logs) => logs,
                Err(e) => {
                    warn!("Skipping log directory {}: {}", date_dir.display(), e);
                    continue;
                }
            };

            files.extend(
                logs.flatten()
                    .filter_map(|log| self.parse_log_path(log.path()))
                    .filter(|log| log.timestamp > after),
            );
        }

        if date_dirs == 0 {
            info!("No date directories under {}", self.base_dir.display());
        }

        // read_dir order is arbitrary; replay must be chronological
        files.sort();
        debug!("Discovered {} log files newer than {}", files.len(), after);
        files
    }

    fn parse_log_path(&self, path: PathBuf) -> Option<LogFile> {
        if path.extension().and_then(OsStr::to_str) != Some(self.extension.as_str()) {
            return None;
        }
        let timestamp = path.file_stem()?.to_str()?.parse::<i64>().ok()?;
        if !path.is_file() {
            return None;
        }
        Some(LogFile { timestamp, path })
    }

    /// Read the distinct peer addresses of a log file
    ///
    /// Tokens that are not valid UTF-8 are dropped on their own; the rest of
    /// the file still counts.
    pub fn read_peers(&self, file: &LogFile) -> io::Result<BTreeSet<String>> {
        let bytes = fs::read(&file.path)?;

        let mut dropped = 0usize;
        let peers: BTreeSet<String> = bytes
            .split(u8::is_ascii_whitespace)
            .filter(|token| !token.is_empty())
            .filter_map(|token| match std::str::from_utf8(token) {
                Ok(address) => Some(address.to_owned()),
                Err(_) => {
                    dropped += 1;
                    None
                }
            })
            .collect();

        if dropped > 0 {
            debug!(
                "Dropped {} malformed entries from {}",
                dropped,
                file.path.display()
            );
        }
        Ok(peers)
    }

    /// Delete log files, continuing past individual failures
    ///
    /// Returns the number of files removed.
    pub fn remove(&self, files: &[LogFile]) -> usize {
        let mut removed = 0;
        for file in files {
            match fs::remove_file(&file.path) {
                Ok(()) => {
                    debug!("Removed superseded log {}", file.path.display());
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove {}: {}", file.path.display(), e),
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, relative: &str, contents: &str) -> PathBuf {
        let path = dir.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_discover_sorts_across_date_dirs() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "2024-03-16/1710590000.cwl", "");
        write(temp.path(), "2024-03-15/1710500000.cwl", "");
        write(temp.path(), "2024-03-15/1710400000.cwl", "");

        let store = LogStore::new(temp.path(), "cwl");
        let timestamps: Vec<i64> = store.discover(0).iter().map(|f| f.timestamp).collect();
        assert_eq!(timestamps, vec![1710400000, 1710500000, 1710590000]);
    }

    #[test]
    fn test_discover_filters_by_watermark() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "d/100.cwl", "");
        write(temp.path(), "d/200.cwl", "");
        write(temp.path(), "d/300.cwl", "");

        let store = LogStore::new(temp.path(), "cwl");
        let timestamps: Vec<i64> = store.discover(200).iter().map(|f| f.timestamp).collect();
        assert_eq!(timestamps, vec![300]);
    }

    #[test]
    fn test_discover_ignores_foreign_files() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "d/100.cwl", "");
        write(temp.path(), "d/200.cwl.tmp", "");
        write(temp.path(), "d/notes.cwl", "");
        write(temp.path(), "d/300.txt", "");
        write(temp.path(), "400.cwl", "");
        fs::create_dir_all(temp.path().join("d/500.cwl")).unwrap();

        let store = LogStore::new(temp.path(), "cwl");
        let files = store.discover(0);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].timestamp, 100);
    }

    #[test]
    fn test_discover_missing_base_dir() {
        let temp = TempDir::new().unwrap();
        let store = LogStore::new(temp.path().join("missing"), "cwl");
        assert!(store.discover(0).is_empty());
    }

    #[test]
    fn test_read_peers_dedups_and_trims() {
        let temp = TempDir::new().unwrap();
        let path = write(temp.path(), "d/100.cwl", "1.1.1.1 2.2.2.2  1.1.1.1 \n");

        let store = LogStore::new(temp.path(), "cwl");
        let peers = store
            .read_peers(&LogFile {
                timestamp: 100,
                path,
            })
            .unwrap();
        assert_eq!(peers.len(), 2);
        assert!(peers.contains("1.1.1.1"));
        assert!(!peers.contains(""));
    }

    #[test]
    fn test_read_peers_drops_only_malformed_tokens() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("d/100.cwl");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut contents = b"1.1.1.1 ".to_vec();
        contents.extend_from_slice(&[0xff, 0x31, 0xfe]);
        contents.extend_from_slice(b" 2.2.2.2\n3.3.3.3 ");
        fs::write(&path, contents).unwrap();

        let store = LogStore::new(temp.path(), "cwl");
        let peers = store
            .read_peers(&LogFile {
                timestamp: 100,
                path,
            })
            .unwrap();

        let expected: BTreeSet<String> = ["1.1.1.1", "2.2.2.2", "3.3.3.3"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(peers, expected);
    }

    #[test]
    fn test_read_peers_missing_file() {
        let temp = TempDir::new().unwrap();
        let store = LogStore::new(temp.path(), "cwl");
        let result = store.read_peers(&LogFile {
            timestamp: 1,
            path: temp.path().join("d/1.cwl"),
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_remove_counts_successes() {
        let temp = TempDir::new().unwrap();
        let kept = write(temp.path(), "d/100.cwl", "");
        let doomed = write(temp.path(), "d/200.cwl", "");

        let store = LogStore::new(temp.path(), "cwl");
        let removed = store.remove(&[
            LogFile {
                timestamp: 200,
                path: doomed.clone(),
            },
            LogFile {
                timestamp: 300,
                path: temp.path().join("d/300.cwl"),
            },
        ]);

        assert_eq!(removed, 1);
        assert!(kept.exists());
        assert!(!doomed.exists());
    }
}
