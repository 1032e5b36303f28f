//! cow-cli: argument parsing, the advisory lock, logging initialization,
//! and top-level orchestration (C15) wiring the other `cow-*` crates into
//! the `cow` binary.

pub mod cli;
pub mod lock;
pub mod logging;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cow_core::config::{CacheConfig, PartitionsConfig};
use cow_core::naming::basename;
use cow_fleet::{clean_snapshots, list_promoted_snapshots, push_to_fleet};
use cow_publish::{add as publish_add, AddOptions};
use cow_storage::{disable_cache, enable_cache, SnapshotSize};
use cow_vm::Virsh;
use tracing::info;

use cli::{AddArgs, Cli, CleanArgs, Commands, CowInvocation, DisableCacheArgs, EnableCacheArgs};
use lock::Lock;
use logging::LogFormat;

/// iPXE resolves this to the booting client's own FQDN at boot time; the
/// server never substitutes a concrete hostname itself.
const CLIENT_FQDN_VAR: &str = "${net0/fqdn}";

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let (verbose, lock_path, command) = match &cli.config {
        Some(path) => {
            let invocation = load_invocation(path)?;
            (invocation.verbose, invocation.lock, invocation.command)
        }
        None => {
            let command = cli
                .command
                .clone()
                .ok_or_else(|| anyhow::anyhow!("a subcommand is required unless --config is given"))?;
            (cli.verbose, cli.lock, command)
        }
    };

    logging::init(verbose, LogFormat::Human);

    let _lock = match &lock_path {
        Some(path) => Some(Lock::acquire(path)?),
        None => None,
    };

    dispatch(command)
}

fn load_invocation(path: &Path) -> Result<CowInvocation> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read invocation config {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse invocation config {}", path.display()))
}

fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Add(args) => cmd_add(args),
        Commands::Clean(args) => cmd_clean(args),
        Commands::EnableCache(args) => cmd_enable_cache(args),
        Commands::DisableCache(args) => cmd_disable_cache(args),
    }
}

fn parse_snapshot_size(s: &str) -> SnapshotSize {
    match s.strip_suffix('%') {
        Some(extents) => SnapshotSize::Extents(extents.to_string()),
        None => SnapshotSize::Bytes(s.to_string()),
    }
}

fn cmd_add(args: AddArgs) -> Result<()> {
    let partitions_config = PartitionsConfig::load(&args.partitions_config)?;
    let cache_config = args
        .cache_config
        .as_deref()
        .map(CacheConfig::load)
        .transpose()?;

    let opts = AddOptions {
        ref_vm: args.ref_vm,
        ref_host: args.ref_host,
        partitions_config,
        output: args.output,
        test_vm: args.test_vm,
        test_host: args.test_host,
        fqdn: CLIENT_FQDN_VAR.to_string(),
        snapshot_size: parse_snapshot_size(&args.snapshot_size),
        cache_config,
        to_copy: args.to_copy,
        chroot_script: args.chroot_script,
        link_snapshot_copy: args.link_snapshot_copy,
    };

    let vmm: Arc<dyn cow_vm::VirtualMachineManager> = Arc::new(Virsh);
    let result = publish_add(vmm, &opts)?;
    info!(
        timestamp = %result.timestamp,
        snapshot = %result.promoted_snapshot.display(),
        target = %result.iscsi_target,
        "promoted new snapshot"
    );

    if args.push {
        let all = list_promoted_snapshots(&result.vg_dir, &result.origin_basename)?;
        let promoted_str = result.promoted_snapshot.to_string_lossy().into_owned();
        let old: Vec<String> = all.into_iter().filter(|s| *s != promoted_str).collect();
        push_to_fleet(&old, &opts.test_host)?;
    }

    Ok(())
}

fn cmd_clean(args: CleanArgs) -> Result<()> {
    let cache_config = args
        .cache_config
        .as_deref()
        .map(CacheConfig::load)
        .transpose()?;

    // `REF_VM` here names the origin volume, not a running VM; `vg_dir`
    // is implicit in how promoted snapshots were laid out at `add` time —
    // alongside the reference volume itself.
    let vg_dir = Path::new(&args.ref_vm)
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| Path::new("/dev").to_path_buf());
    let origin = basename(&args.ref_vm);

    clean_snapshots(
        &args.output,
        cache_config.as_ref(),
        &vg_dir,
        &origin,
        args.force_old,
        args.force_latest,
    )
}

fn cmd_enable_cache(args: EnableCacheArgs) -> Result<()> {
    let cfg = CacheConfig::load(&args.cache_config)?;
    enable_cache(&cfg, args.cleanup)
}

fn cmd_disable_cache(args: DisableCacheArgs) -> Result<()> {
    let cfg = CacheConfig::load(&args.cache_config)?;
    disable_cache(&cfg)
}
