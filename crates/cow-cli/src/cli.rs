use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(
    name = "cow",
    version,
    about = "Transactional snapshot-promotion pipeline for diskless VM fleets"
)]
pub struct Cli {
    /// Increase log verbosity (repeatable): info, then debug.
    #[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Advisory exclusive lock file; failure to acquire exits with code 2.
    #[arg(short = 'l', long = "lock", global = true)]
    pub lock: Option<PathBuf>,

    /// JSON file describing the full invocation; when given, replaces every
    /// other parsed flag and the subcommand.
    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Deserialize, Debug, Clone)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum Commands {
    /// Promote a fresh snapshot of the reference VM's disk to the fleet.
    Add(AddArgs),
    /// Reclaim old promoted snapshots' dependent resources.
    Clean(CleanArgs),
    /// (Re-)establish the write-through cache for every recorded volume.
    EnableCache(EnableCacheArgs),
    /// Detach the write-through cache from every recorded volume.
    DisableCache(DisableCacheArgs),
}

#[derive(Args, Deserialize, Debug, Clone)]
pub struct AddArgs {
    /// Size passed to `lvcreate` for the ephemeral COW snapshot, e.g. `5G`
    /// or `20%ORIGIN`.
    #[arg(short = 's', long = "snapshot-size", default_value = "5G")]
    #[serde(default = "default_snapshot_size")]
    pub snapshot_size: String,

    #[arg(long = "cache-config")]
    pub cache_config: Option<PathBuf>,

    #[arg(long = "to-copy")]
    #[serde(default)]
    pub to_copy: Vec<PathBuf>,

    #[arg(long = "chroot-script")]
    pub chroot_script: Option<PathBuf>,

    #[arg(long = "link-snapshot-copy")]
    pub link_snapshot_copy: Option<PathBuf>,

    /// After a successful promotion, roll idle fleet clients still booted
    /// against an older snapshot onto the new one.
    #[arg(long = "push")]
    #[serde(default)]
    pub push: bool,

    pub ref_vm: String,
    pub ref_host: String,
    pub partitions_config: PathBuf,
    pub output: PathBuf,
    pub test_vm: String,
    pub test_host: String,
}

fn default_snapshot_size() -> String {
    "5G".to_string()
}

#[derive(Args, Deserialize, Debug, Clone)]
pub struct CleanArgs {
    #[arg(long = "force-old")]
    #[serde(default)]
    pub force_old: bool,

    #[arg(long = "force-latest")]
    #[serde(default)]
    pub force_latest: bool,

    #[arg(long = "cache-config")]
    pub cache_config: Option<PathBuf>,

    pub ref_vm: String,
    pub output: PathBuf,
}

#[derive(Args, Deserialize, Debug, Clone)]
pub struct EnableCacheArgs {
    #[arg(long = "cleanup")]
    #[serde(default)]
    pub cleanup: bool,

    pub cache_config: PathBuf,
}

#[derive(Args, Deserialize, Debug, Clone)]
pub struct DisableCacheArgs {
    pub cache_config: PathBuf,
}

/// The shape of `--config <json>`: a complete invocation, replacing every
/// other root flag and the subcommand.
#[derive(Deserialize, Debug)]
pub struct CowInvocation {
    #[serde(default)]
    pub verbose: u8,
    #[serde(default)]
    pub lock: Option<PathBuf>,
    pub command: Commands,
}
