//! The write-through cache subsystem (`spec.md` §4.5). Enablement and
//! disablement must be idempotent across crashes and system startups: a
//! cache record on disk is the durable fact that a cache companion LV is
//! (or was) attached to a given promoted snapshot.

use std::fs::{self, File};
use std::path::Path;

use anyhow::Result;
use cow_core::config::CacheConfig;
use cow_core::naming::cache_lv_name;
use cow_exec::{run, RunOptions, ScopeStack};
use tracing::{info, warn};

use crate::volume::{create_lvm_volume_sized, remove_lv};

/// Attach a write-through cache to `vol`, if `cfg` is given. Caching
/// failure is non-fatal at publish time: any inner failure rolls back the
/// cache LV and record and returns `vol` unchanged so the caller continues
/// without a cache, as `spec.md` §4.5 specifies.
pub fn configure_caching(vol: &str, cfg: Option<&CacheConfig>) -> Result<String> {
    let Some(cfg) = cfg else {
        return Ok(vol.to_string());
    };

    match try_configure_caching(vol, cfg) {
        Ok(()) => Ok(vol.to_string()),
        Err(e) => {
            warn!(vol, error = %e, "failed to configure caching; continuing without cache");
            Ok(vol.to_string())
        }
    }
}

fn try_configure_caching(vol: &str, cfg: &CacheConfig) -> Result<()> {
    let mut stack = ScopeStack::new();
    let cache_name = cache_lv_name(vol);

    create_lvm_volume_sized(
        &cache_name,
        &cfg.cache_volume_size,
        &cfg.volume_group,
        Some(&cfg.cache_pv),
    )?;
    {
        let cache_name = cache_name.clone();
        stack.on_rollback(format!("remove cache lv {cache_name}"), move || {
            remove_lv(&cache_name)
        });
    }

    let record = cfg.record_path(vol);
    write_cache_record(&record)?;
    {
        let record = record.clone();
        stack.on_rollback(format!("remove cache record {}", record.display()), move || {
            remove_cache_record(&record)
        });
    }

    let result = run(
        &[
            "lvconvert",
            "-y",
            "--type",
            "cache",
            "--cachevol",
            &cache_name,
            "--cachemode",
            "writethrough",
            vol,
        ],
        RunOptions::default(),
    );

    match result {
        Ok(_) => {
            stack.finish(true);
            Ok(())
        }
        Err(e) => {
            stack.finish(false);
            Err(e)
        }
    }
}

fn write_cache_record(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    File::create(path)?;
    Ok(())
}

fn remove_cache_record(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}

/// List every recorded volume under `cfg.cached_volumes_path`.
fn recorded_volumes(cfg: &CacheConfig) -> Result<Vec<String>> {
    let dir = Path::new(&cfg.cached_volumes_path);
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut volumes = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            volumes.push(name.to_string());
        }
    }
    volumes.sort();
    Ok(volumes)
}

/// `lvconvert --uncache <vol>-cache>` applied to the LV backing `record`.
/// Best-effort — logged, never propagated, mirroring the cleaner's
/// reclamation-phase policy.
fn uncache_best_effort(vg: &str, record_name: &str) {
    let vol = format!("{vg}/{record_name}");
    if let Err(e) = run(
        &["lvconvert", "--uncache", &vol],
        RunOptions::default(),
    ) {
        warn!(vol, error = %e, "failed to uncache volume (best effort)");
    }
}

/// Re-establish caching after a PV replacement or a crash mid-enable.
/// `cleanup`: first uncache every recorded volume, `vgreduce
/// --removemissing`, `vgchange -ay`. Then `pvcreate`, `vgextend`, and
/// reapply `configure_caching` to every recorded volume — idempotent:
/// running this twice in a row leaves the same set of cache records.
pub fn enable_cache(cfg: &CacheConfig, cleanup: bool) -> Result<()> {
    if cleanup {
        for volname in recorded_volumes(cfg)? {
            uncache_best_effort(&cfg.volume_group, &volname);
        }
        if let Err(e) = run(
            &["vgreduce", "--removemissing", &cfg.volume_group],
            RunOptions::default(),
        ) {
            warn!(error = %e, "vgreduce --removemissing failed (best effort)");
        }
        if let Err(e) = run(&["vgchange", "-ay", &cfg.volume_group], RunOptions::default()) {
            warn!(error = %e, "vgchange -ay failed (best effort)");
        }
    }

    run(&["pvcreate", "-y", &cfg.cache_pv], RunOptions::default())?;
    run(
        &["vgextend", &cfg.volume_group, &cfg.cache_pv],
        RunOptions::default(),
    )?;

    for volname in recorded_volumes(cfg)? {
        let vol = format!("{}/{}", cfg.volume_group, volname);
        info!(vol, "re-enabling cache");
        let _ = configure_caching(&vol, Some(cfg))?;
    }
    Ok(())
}

/// Detach caching from every recorded volume and release the cache PV.
/// Every step is best-effort: one failure must not block the rest
/// (`spec.md` §4.5, §7). Running this twice in a row is a no-op the second
/// time.
pub fn disable_cache(cfg: &CacheConfig) -> Result<()> {
    for volname in recorded_volumes(cfg)? {
        uncache_best_effort(&cfg.volume_group, &volname);
    }
    if let Err(e) = run(
        &["vgreduce", &cfg.volume_group, &cfg.cache_pv],
        RunOptions::default(),
    ) {
        warn!(error = %e, "vgreduce failed (best effort)");
    }
    if let Err(e) = run(&["pvremove", "-f", &cfg.cache_pv], RunOptions::default()) {
        warn!(error = %e, "pvremove failed (best effort)");
    }
    Ok(())
}
