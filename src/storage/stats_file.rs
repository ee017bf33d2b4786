//! Loading and exporting the persisted stats tree

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::analytics::models::StatsTree;
use crate::error::StatsResult;

/// Load the raw stats tree
///
/// A missing or unparseable file is not fatal: the run starts over from an
/// empty tree.
pub fn load_tree(path: &Path) -> StatsTree {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("No stats file at {}, starting fresh", path.display());
            return StatsTree::default();
        }
        Err(e) => {
            warn!("Cannot read stats file {}: {}, starting fresh", path.display(), e);
            return StatsTree::default();
        }
    };

    match serde_json::from_str(contents.trim()) {
        Ok(tree) => tree,
        Err(e) => {
            warn!("Stats file {} is malformed: {}, starting fresh", path.display(), e);
            StatsTree::default()
        }
    }
}

/// Replace `path` with `bytes` so readers never observe a partial file
///
/// The temporary file lives in the target's directory so the final rename
/// never crosses filesystems. It is removed if anything fails before then.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> StatsResult<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|err| err.error)?;

    Ok(())
}

/// Write the public (redacted) and raw stats files
pub fn export(tree: &StatsTree, raw_path: &Path, public_path: &Path) -> StatsResult<()> {
    let public = serde_json::to_vec(&tree.redacted())?;
    let raw = serde_json::to_vec(tree)?;

    write_atomic(public_path, &public)?;
    info!("Wrote {}", public_path.display());
    write_atomic(raw_path, &raw)?;
    info!("Wrote {}", raw_path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::models::BucketKey;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn sample_tree() -> StatsTree {
        let mut tree = StatsTree::default();
        let key = BucketKey::from_timestamp(1_710_498_360, 5).unwrap();
        let peers: BTreeSet<String> = ["1.0.0.1", "1.0.0.2"].iter().map(|s| s.to_string()).collect();
        tree.misc.observe(1_710_498_360);
        tree.fold_file(&key, &peers, |_| "US".to_string());
        tree
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let temp = TempDir::new().unwrap();
        let tree = load_tree(&temp.path().join("raw.json"));
        assert_eq!(tree, StatsTree::default());
        assert_eq!(tree.misc.oldest_entry, i64::MAX);
    }

    #[test]
    fn test_load_malformed_file_is_default() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("raw.json");
        fs::write(&path, "{\"misc\": {\"lastUpdate\": ").unwrap();
        assert_eq!(load_tree(&path), StatsTree::default());

        fs::write(&path, "[1, 2, 3]").unwrap();
        assert_eq!(load_tree(&path), StatsTree::default());
    }

    #[test]
    fn test_write_atomic_replaces_and_cleans_up() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("raw.json");
        fs::write(&path, "old").unwrap();

        write_atomic(&path, b"new").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
        let leftovers: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("raw.json")]);
    }

    #[test]
    fn test_write_atomic_missing_directory_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing/raw.json");
        assert!(write_atomic(&path, b"new").is_err());
    }

    #[test]
    fn test_export_writes_both_forms() {
        let temp = TempDir::new().unwrap();
        let raw_path = temp.path().join("raw.json");
        let public_path = temp.path().join("stats.json");
        let tree = sample_tree();

        export(&tree, &raw_path, &public_path).unwrap();

        assert_eq!(load_tree(&raw_path), tree);

        let public = load_tree(&public_path);
        assert_eq!(public, tree.redacted());
        assert!(public.years["2024"].ips.is_empty());
        assert_eq!(public.years["2024"].nodes, 2);
    }
}
