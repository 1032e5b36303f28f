//! The chroot preparator (C9): expose a snapshot's partitions as
//! `/dev/mapper` nodes, mount the root partition plus the virtual
//! filesystems a chroot needs, seed the tree from the overlay directories,
//! optionally run a customization script, and pull the kernel/initrd back
//! out to the artifacts directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cow_core::config::PartitionsConfig;
use cow_exec::{run, RunOptions, ScopeStack};
use cow_storage::{cleanup_kpartx, expose_partitions};
use tracing::info;

/// Expose `device`'s partitions via `kpartx -a -s`, registering
/// `cleanup_kpartx` to run unconditionally when the scope unwinds.
pub fn partitions_exposed(stack: &mut ScopeStack, device: &Path) -> Result<()> {
    expose_partitions(device)?;
    let device = device.to_path_buf();
    stack.on_final("tear down kpartx mapping", move |_success| {
        cleanup_kpartx(&device)
    });
    Ok(())
}

/// A live chroot root, with its virtual-filesystem mounts registered on
/// `stack` for unconditional teardown (reverse order: `dev/pts`, `dev`,
/// `sys`, `proc`, then the root partition itself).
pub struct ChrootHandle {
    pub root: PathBuf,
}

/// Mount `partition` at a fresh temporary directory, then stack `proc`,
/// `sysfs`, and bind-mounts of `/dev` and `/dev/pts` on top, in that exact
/// order (`spec.md` §4.6). Every mount is torn down as a `final` action, so
/// partial mounts still unwind correctly if a later one fails.
pub fn chroot(stack: &mut ScopeStack, partition: &str) -> Result<ChrootHandle> {
    let root = tempfile::Builder::new()
        .prefix("cow-chroot-")
        .tempdir()?
        .into_path();
    {
        let root = root.clone();
        stack.on_final("remove chroot tempdir", move |_success| {
            if root.exists() {
                fs::remove_dir_all(&root)?;
            }
            Ok(())
        });
    }

    mounted(stack, Some(partition), &root, None, None)?;

    let proc_dir = root.join("proc");
    fs::create_dir_all(&proc_dir)?;
    mounted(stack, Some("proc"), &proc_dir, Some("proc"), None)?;

    let sys_dir = root.join("sys");
    fs::create_dir_all(&sys_dir)?;
    mounted(stack, Some("sysfs"), &sys_dir, Some("sysfs"), None)?;

    let dev_dir = root.join("dev");
    fs::create_dir_all(&dev_dir)?;
    bind_mounted(stack, Path::new("/dev"), &dev_dir)?;

    let dev_pts_dir = dev_dir.join("pts");
    fs::create_dir_all(&dev_pts_dir)?;
    bind_mounted(stack, Path::new("/dev/pts"), &dev_pts_dir)?;

    Ok(ChrootHandle { root })
}

/// `mount [-t type] [device] mountpoint`, final `umount mountpoint`.
fn mounted(
    stack: &mut ScopeStack,
    device: Option<&str>,
    mountpoint: &Path,
    fstype: Option<&str>,
    options: Option<&str>,
) -> Result<()> {
    let mp = mountpoint.to_string_lossy().into_owned();
    let mut argv: Vec<&str> = vec!["mount"];
    if let Some(t) = fstype {
        argv.push("-t");
        argv.push(t);
    }
    if let Some(o) = options {
        argv.push("-o");
        argv.push(o);
    }
    if let Some(d) = device {
        argv.push(d);
    }
    argv.push(&mp);
    run(&argv, RunOptions::default())?;

    let mp_final = mp.clone();
    stack.on_final(format!("unmount {mp}"), move |_success| {
        run(&["umount", &mp_final], RunOptions::default())?;
        Ok(())
    });
    Ok(())
}

/// `mount --bind src dst`, final `umount dst`.
fn bind_mounted(stack: &mut ScopeStack, src: &Path, dst: &Path) -> Result<()> {
    let src_str = src.to_string_lossy().into_owned();
    let dst_str = dst.to_string_lossy().into_owned();
    run(
        &["mount", "--bind", &src_str, &dst_str],
        RunOptions::default(),
    )?;

    stack.on_final(format!("unmount bind {dst_str}"), move |_success| {
        run(&["umount", &dst_str], RunOptions::default())?;
        Ok(())
    });
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct SeedOptions {
    pub to_copy: Vec<PathBuf>,
    pub chroot_script: Option<PathBuf>,
}

/// Copy each overlay directory (in order) into the chroot root, write
/// `/etc/timestamp` and `/etc/cow.conf`, optionally run a customization
/// script inside the chroot, then copy `/vmlinuz` and `/initrd.img` out to
/// `artifacts_dir`.
pub fn seed_filesystem(
    handle: &ChrootHandle,
    partitions_config: &PartitionsConfig,
    timestamp: &str,
    opts: &SeedOptions,
    artifacts_dir: &Path,
) -> Result<()> {
    for dir in &opts.to_copy {
        copy_tree(dir, &handle.root)
            .with_context(|| format!("copying overlay directory {}", dir.display()))?;
    }

    write_timestamp(&handle.root, timestamp)?;
    write_cow_conf(&handle.root, partitions_config)?;

    if let Some(script) = &opts.chroot_script {
        run_chroot_script(&handle.root, script)?;
    }

    fs::create_dir_all(artifacts_dir)?;
    extract_boot_files(&handle.root, artifacts_dir)?;
    Ok(())
}

/// Recursively copy `src`'s contents into `dst`, overwriting existing
/// files and preserving their metadata (mirrors `shutil.copy2`'s semantics
/// via `fs::copy`, which on Unix preserves permissions).
fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in walk(src)? {
        let relative = entry.strip_prefix(src).expect("walk yields children of src");
        let target = dst.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&entry, &target)?;
        }
    }
    Ok(())
}

fn walk(root: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                out.push(path.clone());
                stack.push(path);
            } else {
                out.push(path);
            }
        }
    }
    Ok(out)
}

fn write_timestamp(root: &Path, timestamp: &str) -> Result<()> {
    let etc = root.join("etc");
    fs::create_dir_all(&etc)?;
    fs::write(etc.join("timestamp"), format!("{timestamp}\n"))?;
    Ok(())
}

fn write_cow_conf(root: &Path, cfg: &PartitionsConfig) -> Result<()> {
    let etc = root.join("etc");
    fs::create_dir_all(&etc)?;
    let mut contents = String::from("declare -A PARTITION_NAMES\n");
    for (key, value) in cfg.entries() {
        contents.push_str(&format!("PARTITION_NAMES[{key}]={value}\n"));
    }
    fs::write(etc.join("cow.conf"), contents)?;
    Ok(())
}

fn run_chroot_script(root: &Path, script: &Path) -> Result<()> {
    let root_str = root.to_string_lossy().into_owned();
    let script_str = script.to_string_lossy().into_owned();
    info!(script = %script_str, "running chroot script");
    run(&["chroot", &root_str, &script_str], RunOptions::default())?;
    Ok(())
}

fn extract_boot_files(root: &Path, artifacts_dir: &Path) -> Result<()> {
    for name in ["vmlinuz", "initrd.img"] {
        fs::copy(root.join(name), artifacts_dir.join(name))
            .with_context(|| format!("copying {name} out of chroot"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cow_exec::mock;

    fn sample_partitions_config() -> PartitionsConfig {
        PartitionsConfig {
            base: "primary".into(),
            network: "net".into(),
            local: "local".into(),
            cow: "cow".into(),
            conf: "conf".into(),
            sign: "sign".into(),
            keyimage: "keyimage".into(),
            place: "place".into(),
        }
    }

    #[test]
    fn test_partitions_exposed_registers_final_cleanup() {
        let (_guard,) = mock::install(|argv| match argv {
            ["kpartx", "-a", "-s", _] => Some(mock::MockResponse::empty()),
            ["kpartx", "-d", "-v", _] => Some(mock::MockResponse::empty()),
            _ => None,
        });
        let mut stack = ScopeStack::new();
        partitions_exposed(&mut stack, Path::new("/dev/vg/vm1-at-ts")).unwrap();
        assert_eq!(stack.len(), 1);
        stack.finish(true);
    }

    #[test]
    fn test_write_cow_conf_contains_all_fields() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = sample_partitions_config();
        write_cow_conf(dir.path(), &cfg).unwrap();
        let contents = fs::read_to_string(dir.path().join("etc/cow.conf")).unwrap();
        assert!(contents.starts_with("declare -A PARTITION_NAMES\n"));
        assert!(contents.contains("PARTITION_NAMES[base]=primary"));
        assert!(contents.contains("PARTITION_NAMES[place]=place"));
    }

    #[test]
    fn test_write_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        write_timestamp(dir.path(), "2024-05-01-10-00-00").unwrap();
        let contents = fs::read_to_string(dir.path().join("etc/timestamp")).unwrap();
        assert_eq!(contents, "2024-05-01-10-00-00\n");
    }

    #[test]
    fn test_copy_tree_preserves_structure_and_overwrites() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("etc/sub")).unwrap();
        fs::write(src.path().join("etc/sub/file.txt"), "new").unwrap();
        fs::create_dir_all(dst.path().join("etc/sub")).unwrap();
        fs::write(dst.path().join("etc/sub/file.txt"), "old").unwrap();

        copy_tree(src.path(), dst.path()).unwrap();
        let contents = fs::read_to_string(dst.path().join("etc/sub/file.txt")).unwrap();
        assert_eq!(contents, "new");
    }

    #[test]
    fn test_seed_filesystem_writes_boot_artifacts() {
        let chroot_dir = tempfile::tempdir().unwrap();
        fs::write(chroot_dir.path().join("vmlinuz"), b"kernel").unwrap();
        fs::write(chroot_dir.path().join("initrd.img"), b"initrd").unwrap();

        let artifacts = tempfile::tempdir().unwrap();
        let handle = ChrootHandle {
            root: chroot_dir.path().to_path_buf(),
        };
        let cfg = sample_partitions_config();
        seed_filesystem(
            &handle,
            &cfg,
            "2024-05-01-10-00-00",
            &SeedOptions::default(),
            artifacts.path(),
        )
        .unwrap();

        assert!(artifacts.path().join("vmlinuz").exists());
        assert!(artifacts.path().join("initrd.img").exists());
        assert!(chroot_dir.path().join("etc/timestamp").exists());
        assert!(chroot_dir.path().join("etc/cow.conf").exists());
    }
}
