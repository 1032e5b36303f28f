//! The snapshot lifecycle cleaner (C14, `spec.md` §4.12): reclaim a
//! promoted snapshot's dependent resources in the correct order once no
//! active initiator still holds it.

use std::fs;
use std::path::Path;

use anyhow::{bail, Result};
use cow_core::config::CacheConfig;
use cow_core::naming::{
    artifacts_dir, backstore_name, cache_lv_name, iscsi_target_name, ipxe_config_path,
    snapshot_copy_name,
};
use cow_core::CowError;
use cow_publish::iscsi::{remove_iscsi_backstore, remove_iscsi_target, saveconfig};
use cow_storage::{cleanup_kpartx, is_lv_open, lv_exists, remove_lv};
use tracing::{info, warn};

use crate::sessions::dynamic_sessions;
use crate::snapshots::list_promoted_snapshots;

/// Reclaim `name` (a promoted snapshot's LV path) unless it still has
/// active initiators and `force` is not set. Every reclamation step is
/// best-effort with a logged failure, except the "still open" assertion
/// before the final `lvremove`, which is fatal.
pub fn clean_snapshot(
    output: &Path,
    cache_config: Option<&CacheConfig>,
    name: &str,
    force: bool,
) -> Result<()> {
    let backstore = backstore_name(name);
    let target = iscsi_target_name(&backstore);

    if !force {
        let sessions = dynamic_sessions(&target)?;
        if !sessions.is_empty() {
            info!(name, target, sessions = ?sessions, "snapshot has active sessions; skipping");
            return Ok(());
        }
    }

    best_effort("unlink ipxe config", || {
        let path = ipxe_config_path(output, &target);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    });

    best_effort("remove artifacts directory", || {
        let dir = artifacts_dir(output, name);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    });

    best_effort("remove iscsi target", || remove_iscsi_target(&target));
    best_effort("remove iscsi backstore", || remove_iscsi_backstore(&backstore));
    best_effort("persist targetcli config", saveconfig);
    best_effort("cleanup kpartx mapping", || cleanup_kpartx(Path::new(name)));

    if let Some(cfg) = cache_config {
        let record = cfg.record_path(name);
        best_effort("remove cache record", || {
            if record.exists() {
                fs::remove_file(&record)?;
            }
            Ok(())
        });
    }

    let copy_name = snapshot_copy_name(name);
    best_effort("remove offline snapshot copy", || {
        if lv_exists(&copy_name)? {
            remove_lv(&copy_name)?;
        }
        Ok(())
    });

    if is_lv_open(name)? {
        bail!(CowError::invariant(format!(
            "refusing to remove {name}: still open"
        )));
    }
    best_effort("remove promoted snapshot lv", || remove_lv(name));

    let cache_name = cache_lv_name(name);
    best_effort("remove cache lv", || {
        if lv_exists(&cache_name)? {
            remove_lv(&cache_name)?;
        }
        Ok(())
    });

    Ok(())
}

fn best_effort(step: &str, f: impl FnOnce() -> Result<()>) {
    if let Err(e) = f() {
        warn!(step, error = %e, "reclamation step failed (best effort)");
    }
}

/// Reclaim every promoted snapshot for `origin` under `vg_dir` except the
/// latest, passing `force_old` through as their `force` flag. If
/// `force_latest`, the latest is reclaimed too, unconditionally.
pub fn clean_snapshots(
    output: &Path,
    cache_config: Option<&CacheConfig>,
    vg_dir: &Path,
    origin: &str,
    force_old: bool,
    force_latest: bool,
) -> Result<()> {
    let snapshots = list_promoted_snapshots(vg_dir, origin)?;
    let Some((latest, older)) = snapshots.split_last() else {
        return Ok(());
    };

    for name in older {
        clean_snapshot(output, cache_config, name, force_old)?;
    }
    if force_latest {
        clean_snapshot(output, cache_config, latest, true)?;
    }
    Ok(())
}
