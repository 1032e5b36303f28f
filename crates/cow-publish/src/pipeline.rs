//! The end-to-end `add` pipeline (`spec.md` §4.8): a single transactional
//! stack composing VM control, storage, the chroot preparator, the
//! block-target publisher, and the boot-config publisher.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use cow_core::config::{CacheConfig, PartitionsConfig};
use cow_core::naming::{artifacts_dir, lvm_snapshot_name, snapshot_copy_name, vm_snapshot_name};
use cow_core::time::generate_timestamp;
use cow_core::CowError;
use cow_exec::{wait_for, ScopeStack};
use cow_storage::{
    configure_caching, create_lvm_snapshot, disk_info, is_lv_open, remove_lv, set_partition_name,
    volume_copy, SnapshotSize,
};
use cow_vm::{is_accessible, vm_shut_down, VirtualMachineManager};
use tracing::{info, warn};

use crate::chroot::{chroot, partitions_exposed, seed_filesystem, SeedOptions};
use crate::ipxe::{generate_ipxe_config, published_ipxe_config, IpxeParams};
use crate::iscsi::publish_to_iscsi;
use crate::testboot::reboot_and_check_test_vm;

/// Everything `add` needs beyond the ambient VM manager.
pub struct AddOptions {
    pub ref_vm: String,
    pub ref_host: String,
    pub partitions_config: PartitionsConfig,
    pub output: PathBuf,
    pub test_vm: String,
    pub test_host: String,
    pub fqdn: String,
    pub snapshot_size: SnapshotSize,
    pub cache_config: Option<CacheConfig>,
    pub to_copy: Vec<PathBuf>,
    pub chroot_script: Option<PathBuf>,
    pub link_snapshot_copy: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AddResult {
    pub timestamp: String,
    pub promoted_snapshot: PathBuf,
    pub iscsi_target: String,
    /// Basename of the reference disk device, e.g. `vm1` for
    /// `/dev/vg0/vm1` — the `origin` argument `list_promoted_snapshots`
    /// needs to enumerate this VM's other promoted snapshots.
    pub origin_basename: String,
    /// Directory promoted snapshots for this origin live in, e.g. `/dev/vg0`.
    pub vg_dir: PathBuf,
}

/// Run the full transactional `add` pipeline. `vmm` drives both the
/// reference and test VMs.
pub fn add(vmm: Arc<dyn VirtualMachineManager>, opts: &AddOptions) -> Result<AddResult> {
    check_preconditions(vmm.as_ref(), &opts.ref_vm, &opts.ref_host)?;

    let timestamp = generate_timestamp();
    let non_volatile_pv = opts
        .cache_config
        .as_ref()
        .map(|c| c.non_volatile_pv.as_str());

    let mut stack = ScopeStack::new();
    let result = run_add(&mut stack, vmm, opts, &timestamp, non_volatile_pv);
    stack.finish(result.is_ok());
    result
}

fn check_preconditions(
    vmm: &dyn VirtualMachineManager,
    ref_vm: &str,
    ref_host: &str,
) -> Result<()> {
    if !vmm.is_vm_running(ref_vm)? {
        bail!(CowError::invariant(format!("reference vm {ref_vm} is not running")));
    }
    if !is_accessible(ref_host)? {
        bail!(CowError::invariant(format!("reference host {ref_host} is not reachable")));
    }
    Ok(())
}

fn run_add(
    stack: &mut ScopeStack,
    vmm: Arc<dyn VirtualMachineManager>,
    opts: &AddOptions,
    timestamp: &str,
    non_volatile_pv: Option<&str>,
) -> Result<AddResult> {
    let disks = vmm.disks(&opts.ref_vm)?;
    let origin = match disks.as_slice() {
        [single] => single.clone(),
        other => bail!(CowError::invariant(format!(
            "expected exactly one disk for {}, found {}",
            opts.ref_vm,
            other.len()
        ))),
    };

    let promoted_path = vm_disk_snapshot(
        stack,
        vmm.clone(),
        &opts.ref_vm,
        &opts.ref_host,
        &origin,
        timestamp,
        &opts.snapshot_size,
        non_volatile_pv,
    )?;
    let promoted_str = promoted_path.to_string_lossy().into_owned();

    let artifacts = snapshot_artifacts_dir(stack, &opts.output, &promoted_str)?;

    let net_partition_kpartx_name =
        relabel_partition(&promoted_path, &opts.partitions_config)?;

    seed_chroot(
        &promoted_path,
        &net_partition_kpartx_name,
        &opts.partitions_config,
        timestamp,
        opts,
        &artifacts,
    )?;

    if let Some(target_symlink) = &opts.link_snapshot_copy {
        link_snapshot_copy(&promoted_str, target_symlink, non_volatile_pv)?;
    }

    let cached_path = configure_caching(&promoted_str, opts.cache_config.as_ref())?;

    let (_backstore, target) = publish_to_iscsi(stack, &cached_path)?;

    let kernel = artifacts.join("vmlinuz");
    let initrd = artifacts.join("initrd.img");
    let ipxe_params = IpxeParams { fqdn: &opts.fqdn };
    let per_target_ipxe =
        generate_ipxe_config(stack, &opts.output, &target, &kernel, &initrd, &ipxe_params)?;

    {
        let vmm = vmm.clone();
        let test_vm = opts.test_vm.clone();
        stack.on_rollback("reset test vm after failed promotion", move || {
            vmm.reset(&test_vm)
        });
    }

    published_ipxe_config(stack, &opts.output, &per_target_ipxe, true)?;

    reboot_and_check_test_vm(vmm.as_ref(), &opts.test_vm, &opts.test_host, timestamp)?;

    published_ipxe_config(stack, &opts.output, &per_target_ipxe, false)?;

    let vg_dir = Path::new(&origin)
        .parent()
        .ok_or_else(|| CowError::invariant(format!("{origin} has no parent directory")))?
        .to_path_buf();
    Ok(AddResult {
        timestamp: timestamp.to_string(),
        promoted_snapshot: promoted_path,
        iscsi_target: target,
        origin_basename: cow_core::naming::basename(&origin),
        vg_dir,
    })
}

/// C6+C8 composite (`spec.md` §4.8(b)): shut the reference VM down just
/// long enough to snapshot its disk, then restart it immediately — the
/// rest of the pipeline works from the promoted copy, not the live LV.
fn vm_disk_snapshot(
    stack: &mut ScopeStack,
    vmm: Arc<dyn VirtualMachineManager>,
    ref_vm: &str,
    ref_host: &str,
    origin: &str,
    timestamp: &str,
    size: &SnapshotSize,
    non_volatile_pv: Option<&str>,
) -> Result<PathBuf> {
    let lvm_name = lvm_snapshot_name(origin, timestamp);
    let vg_dir = Path::new(origin)
        .parent()
        .ok_or_else(|| CowError::invariant(format!("{origin} has no parent directory")))?;
    let lvm_path = vg_dir.join(&lvm_name);
    let lvm_path_str = lvm_path.to_string_lossy().into_owned();

    let mut shutdown_stack = ScopeStack::new();
    let snapshot_created: Result<()> = (|| {
        vm_shut_down(&mut shutdown_stack, vmm.clone(), ref_vm, ref_host)?;
        wait_for(
            "reference lv closed",
            Duration::from_secs(30),
            Duration::from_secs(1),
            || Ok(!is_lv_open(origin)?),
        )?;
        create_lvm_snapshot(origin, &lvm_name, size, non_volatile_pv)?;
        Ok(())
    })();
    // The VM is restarted here regardless of outcome, whether or not the
    // snapshot itself succeeded — it must not stay down longer than needed.
    shutdown_stack.finish(snapshot_created.is_ok());
    snapshot_created?;

    let promoted_name = vm_snapshot_name(&lvm_name);
    let promoted_path = volume_copy(stack, &lvm_path_str, &promoted_name, non_volatile_pv)?;

    // The ephemeral COW snapshot has served its purpose once its bytes are
    // safely in the promoted copy; removing it is best-effort since it
    // carries no state the rest of the pipeline depends on.
    if let Err(e) = remove_lv(&lvm_path_str) {
        warn!(lv = %lvm_path_str, error = %e, "failed to remove ephemeral cow snapshot");
    }

    Ok(promoted_path)
}

fn snapshot_artifacts_dir(
    stack: &mut ScopeStack,
    output: &Path,
    promoted: &str,
) -> Result<PathBuf> {
    let dir = artifacts_dir(output, promoted);
    if dir.exists() {
        bail!(CowError::invariant(format!(
            "artifacts directory {} already exists",
            dir.display()
        )));
    }
    std::fs::create_dir_all(&dir)?;

    let rollback_dir = dir.clone();
    stack.on_rollback(format!("remove artifacts directory {}", dir.display()), move || {
        if rollback_dir.exists() {
            std::fs::remove_dir_all(&rollback_dir)?;
        }
        Ok(())
    });
    Ok(dir)
}

/// Rename the base partition to the network name and resolve its
/// device-mapper node under the new name (`spec.md` §4.8(d)).
fn relabel_partition(promoted_path: &Path, partitions_config: &PartitionsConfig) -> Result<String> {
    let info = disk_info(promoted_path)?;
    if info.partition_table_type != "gpt" {
        bail!(CowError::invariant(format!(
            "{} has partition table type {}, expected gpt",
            promoted_path.display(),
            info.partition_table_type
        )));
    }
    let base = info.find_partition(&partitions_config.base)?;
    let number = base.number;
    set_partition_name(promoted_path, number, &partitions_config.network)?;

    let info = disk_info(promoted_path)?;
    let net = info.find_partition(&partitions_config.network)?;
    Ok(net.kpartx_name.clone())
}

/// The inner chroot scope (`spec.md` §4.8(e)): released immediately after
/// seeding so kpartx holds no locks while the snapshot is exposed over
/// iSCSI.
fn seed_chroot(
    promoted_path: &Path,
    net_partition_kpartx_name: &str,
    partitions_config: &PartitionsConfig,
    timestamp: &str,
    opts: &AddOptions,
    artifacts: &Path,
) -> Result<()> {
    let mut inner = ScopeStack::new();
    let seeded: Result<()> = (|| {
        partitions_exposed(&mut inner, promoted_path)?;
        let handle = chroot(&mut inner, net_partition_kpartx_name)?;
        let seed_opts = SeedOptions {
            to_copy: opts.to_copy.clone(),
            chroot_script: opts.chroot_script.clone(),
        };
        seed_filesystem(&handle, partitions_config, timestamp, &seed_opts, artifacts)?;
        Ok(())
    })();
    inner.finish(seeded.is_ok());
    seeded
}

/// Supplemented feature (`--link-snapshot-copy`): an offline-deployment
/// byte-for-byte copy whose symlink swap commits independently of the rest
/// of the pipeline once the copy itself has succeeded.
fn link_snapshot_copy(
    promoted: &str,
    target_symlink: &Path,
    non_volatile_pv: Option<&str>,
) -> Result<()> {
    let mut local = ScopeStack::new();
    let linked: Result<()> = (|| {
        let copy_path = volume_copy(
            &mut local,
            promoted,
            &snapshot_copy_name(promoted),
            non_volatile_pv,
        )?;

        if let Some(parent) = target_symlink.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if target_symlink.exists() || target_symlink.is_symlink() {
            std::fs::remove_file(target_symlink)?;
        }
        #[cfg(unix)]
        std::os::unix::fs::symlink(&copy_path, target_symlink)?;
        info!(copy = %copy_path.display(), link = %target_symlink.display(), "linked offline snapshot copy");
        Ok(())
    })();
    local.finish(linked.is_ok());
    linked
}
