//! Enumeration of promoted snapshots for a given reference volume, shared by
//! the cleaner and push-to-fleet.

use std::path::Path;

use anyhow::{Context, Result};
use cow_core::naming::promoted_snapshot_glob;

/// Every promoted snapshot LV path for `origin` under `vg_dir`, sorted
/// lexicographically (chronological, since the embedded timestamp sorts
/// lexicographically). Excludes `-copy`/`-cache` companions, which match the
/// naming glob's trailing wildcard but are not themselves promoted
/// snapshots.
pub fn list_promoted_snapshots(vg_dir: &Path, origin: &str) -> Result<Vec<String>> {
    let pattern = promoted_snapshot_glob(vg_dir, origin);
    let mut names: Vec<String> = glob::glob(&pattern)
        .with_context(|| format!("invalid snapshot glob {pattern}"))?
        .filter_map(|entry| entry.ok())
        .filter(|path| path.to_string_lossy().ends_with("-snapshot"))
        .map(|path| path.to_string_lossy().into_owned())
        .collect();
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn test_list_promoted_snapshots_excludes_copy_and_cache_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "vm1-at-2024-05-01-09-00-00-snapshot",
            "vm1-at-2024-05-02-09-00-00-snapshot",
            "vm1-at-2024-05-02-09-00-00-snapshot-copy",
            "vm1-at-2024-05-02-09-00-00-snapshot-cache",
            "vm1-at-2024-05-02-09-00-00",
        ] {
            File::create(dir.path().join(name)).unwrap();
        }

        let snapshots = list_promoted_snapshots(dir.path(), "vm1").unwrap();
        assert_eq!(
            snapshots,
            vec![
                dir.path()
                    .join("vm1-at-2024-05-01-09-00-00-snapshot")
                    .to_string_lossy()
                    .into_owned(),
                dir.path()
                    .join("vm1-at-2024-05-02-09-00-00-snapshot")
                    .to_string_lossy()
                    .into_owned(),
            ]
        );
    }
}
