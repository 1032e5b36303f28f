//! Pure name-derivation functions. None of these touch the filesystem or
//! shell out — the three volume-name families and the iSCSI/ipxe names are
//! all functions of their inputs (`spec.md` §3).

use std::path::{Path, PathBuf};

/// `basename(origin) + "-at-" + timestamp` — the ephemeral LVM COW snapshot.
pub fn lvm_snapshot_name(origin: &str, timestamp: &str) -> String {
    format!("{}-at-{}", basename(origin), timestamp)
}

/// `snapshot + "-snapshot"` — the promoted, durable copy clients boot against.
pub fn vm_snapshot_name(snapshot: &str) -> String {
    format!("{}-snapshot", snapshot)
}

/// `volume + "-copy"` — an optional additional byte-for-byte copy for
/// offline deployment.
pub fn snapshot_copy_name(volume: &str) -> String {
    format!("{}-copy", volume)
}

/// `volume + "-cache"` — the write-through cache companion LV.
pub fn cache_lv_name(volume: &str) -> String {
    format!("{}-cache", volume)
}

/// `basename(device)` — the iSCSI backstore name.
pub fn backstore_name(device: &str) -> String {
    basename(device)
}

/// `"iqn.2013-07.cow." + backstore` — the iSCSI target IQN.
pub fn iscsi_target_name(backstore: &str) -> String {
    format!("iqn.2013-07.cow.{}", backstore)
}

/// `<output>/<target>.ipxe`
pub fn ipxe_config_path(output: &Path, target: &str) -> PathBuf {
    output.join(format!("{}.ipxe", target))
}

/// `<output>/basename(volume)/` — per-snapshot artifacts directory
/// (kernel/initrd land here).
pub fn artifacts_dir(output: &Path, volume: &str) -> PathBuf {
    output.join(basename(volume))
}

/// `<output>/boot.ipxe` — the production boot symlink.
pub fn production_symlink(output: &Path) -> PathBuf {
    output.join("boot.ipxe")
}

/// `<output>/boot-test.ipxe` — the test-boot symlink.
pub fn test_symlink(output: &Path) -> PathBuf {
    output.join("boot-test.ipxe")
}

/// Glob pattern matching every promoted snapshot for `origin` under a
/// volume-group directory. Lexicographic sort on the matches is
/// chronological because the embedded timestamp sorts lexicographically.
pub fn promoted_snapshot_glob(vg_dir: &Path, origin: &str) -> String {
    format!(
        "{}/*{}-at-*-snapshot*",
        vg_dir.display(),
        basename(origin)
    )
}

/// `basename` as the Python source uses it: the final path component,
/// irrespective of whether the path exists.
pub fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lvm_snapshot_name() {
        assert_eq!(
            lvm_snapshot_name("/dev/vg/vm1", "2024-05-01-10-00-00"),
            "vm1-at-2024-05-01-10-00-00"
        );
    }

    #[test]
    fn test_vm_snapshot_name() {
        assert_eq!(
            vm_snapshot_name("vm1-at-2024-05-01-10-00-00"),
            "vm1-at-2024-05-01-10-00-00-snapshot"
        );
    }

    #[test]
    fn test_cache_and_copy_names() {
        let v = "/dev/vg/vm1-at-2024-05-01-10-00-00-snapshot";
        assert_eq!(cache_lv_name(v), format!("{v}-cache"));
        assert_eq!(snapshot_copy_name(v), format!("{v}-copy"));
    }

    #[test]
    fn test_iscsi_names() {
        let backstore = backstore_name("/dev/vg/vm1-at-2024-05-01-10-00-00-snapshot");
        assert_eq!(backstore, "vm1-at-2024-05-01-10-00-00-snapshot");
        assert_eq!(
            iscsi_target_name(&backstore),
            "iqn.2013-07.cow.vm1-at-2024-05-01-10-00-00-snapshot"
        );
    }

    #[test]
    fn test_ipxe_and_artifacts_paths() {
        let output = Path::new("/srv/boot");
        assert_eq!(
            ipxe_config_path(output, "iqn.2013-07.cow.vm1-snapshot"),
            output.join("iqn.2013-07.cow.vm1-snapshot.ipxe")
        );
        assert_eq!(
            artifacts_dir(output, "/dev/vg/vm1-snapshot"),
            output.join("vm1-snapshot")
        );
        assert_eq!(production_symlink(output), output.join("boot.ipxe"));
        assert_eq!(test_symlink(output), output.join("boot-test.ipxe"));
    }

    #[test]
    fn test_promoted_snapshot_glob() {
        let pattern = promoted_snapshot_glob(Path::new("/dev/vg"), "vm1");
        assert_eq!(pattern, "/dev/vg/*vm1-at-*-snapshot*");
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("/dev/vg/vm1"), "vm1");
        assert_eq!(basename("vm1"), "vm1");
    }
}
