//! The boot-config publisher (C11): per-target ipxe script generation and
//! the atomic production/test symlink swap with saved-old-copy rollback.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use cow_core::naming::ipxe_config_path;
use cow_exec::ScopeStack;
use tracing::info;

/// Inputs to the ipxe template that aren't already implied by `target`,
/// `kernel`, and `initrd`.
pub struct IpxeParams<'a> {
    pub fqdn: &'a str,
}

/// Write `<output>/<target>.ipxe`. `kernel`/`initrd` are stored relative to
/// `output`, matching what the boot ROM will resolve them against.
/// Rollback removes the file.
pub fn generate_ipxe_config(
    stack: &mut ScopeStack,
    output: &Path,
    target: &str,
    kernel: &Path,
    initrd: &Path,
    params: &IpxeParams,
) -> Result<PathBuf> {
    let path = ipxe_config_path(output, target);
    let kernel_rel = relative_to(output, kernel);
    let initrd_rel = relative_to(output, initrd);

    let contents = format!(
        "#!ipxe\n\
         set iti {fqdn}\n\
         set itn {target}\n\
         set iscsi_params iscsi_initiator=${{iti}} iscsi_target_name={target}\n\
         set cow_params cow_timestamp=${{itn}}\n\
         kernel {kernel_rel} ${{iscsi_params}} ${{cow_params}}\n\
         initrd {initrd_rel}\n\
         boot\n",
        fqdn = params.fqdn,
        target = target,
        kernel_rel = kernel_rel.display(),
        initrd_rel = initrd_rel.display(),
    );
    fs::write(&path, contents)?;

    let rollback_path = path.clone();
    stack.on_rollback(format!("remove ipxe config {}", path.display()), move || {
        if rollback_path.exists() {
            fs::remove_file(&rollback_path)?;
        }
        Ok(())
    });

    Ok(path)
}

fn relative_to(base: &Path, target: &Path) -> PathBuf {
    pathdiff(target, base).unwrap_or_else(|| target.to_path_buf())
}

/// Minimal `relpath`: works for the sibling-under-a-common-root layout
/// every caller here actually uses (`target` lives under `base` or a
/// sibling directory of it).
fn pathdiff(target: &Path, base: &Path) -> Option<PathBuf> {
    let target_components: Vec<_> = target.components().collect();
    let base_components: Vec<_> = base.components().collect();

    let mut common = 0;
    while common < target_components.len()
        && common < base_components.len()
        && target_components[common] == base_components[common]
    {
        common += 1;
    }

    let mut result = PathBuf::new();
    for _ in common..base_components.len() {
        result.push("..");
    }
    for component in &target_components[common..] {
        result.push(component.as_os_str());
    }
    Some(result)
}

/// Pre-enter: remove any stale `<path>.old`, move an existing `<path>`
/// there. On success, drop `<path>.old`. On failure, restore `<path>` from
/// `<path>.old` — a pre-existing production symlink is never lost across a
/// failing promotion.
fn saved_config(stack: &mut ScopeStack, path: &Path) -> Result<()> {
    let old = old_path(path);
    if old.exists() {
        fs::remove_file(&old)?;
    }
    let had_existing = path.exists();
    if had_existing {
        fs::rename(path, &old)?;
    }

    let path_commit = path.to_path_buf();
    let old_commit = old.clone();
    stack.on_commit(format!("drop saved copy of {}", path.display()), move || {
        if old_commit.exists() {
            fs::remove_file(&old_commit)?;
        }
        Ok(())
    });

    let path_rollback = path.to_path_buf();
    let old_rollback = old;
    stack.on_rollback(format!("restore {} from saved copy", path.display()), move || {
        if had_existing {
            fs::rename(&old_rollback, &path_rollback)?;
        }
        Ok(())
    });

    Ok(())
}

fn old_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".old");
    PathBuf::from(name)
}

/// Swap `<output>/boot.ipxe` (or `boot-test.ipxe` when `testing`) to point
/// at `per_target_ipxe`, wrapped in `saved_config` so the previous symlink
/// is restored verbatim if anything later in the outer transaction fails.
pub fn published_ipxe_config(
    stack: &mut ScopeStack,
    output: &Path,
    per_target_ipxe: &Path,
    testing: bool,
) -> Result<()> {
    let link_path = if testing {
        cow_core::naming::test_symlink(output)
    } else {
        cow_core::naming::production_symlink(output)
    };

    saved_config(stack, &link_path)?;

    info!(
        link = %link_path.display(),
        target = %per_target_ipxe.display(),
        testing,
        "swapping boot symlink"
    );
    #[cfg(unix)]
    std::os::unix::fs::symlink(per_target_ipxe, &link_path)?;

    let rollback_path = link_path.clone();
    stack.on_rollback(format!("remove symlink {}", link_path.display()), move || {
        if rollback_path.exists() || rollback_path.is_symlink() {
            fs::remove_file(&rollback_path)?;
        }
        Ok(())
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_ipxe_config_uses_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path();
        let artifacts = output.join("vm1-snapshot");
        fs::create_dir_all(&artifacts).unwrap();

        let mut stack = ScopeStack::new();
        let params = IpxeParams { fqdn: "host.example.com" };
        let path = generate_ipxe_config(
            &mut stack,
            output,
            "iqn.2013-07.cow.vm1-snapshot",
            &artifacts.join("vmlinuz"),
            &artifacts.join("initrd.img"),
            &params,
        )
        .unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("kernel vm1-snapshot/vmlinuz"));
        assert!(contents.contains("initrd vm1-snapshot/initrd.img"));
        assert!(contents.contains("set iti host.example.com"));
    }

    #[test]
    fn test_generate_ipxe_config_rollback_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut stack = ScopeStack::new();
        let params = IpxeParams { fqdn: "host" };
        let path = generate_ipxe_config(
            &mut stack,
            dir.path(),
            "tgt",
            Path::new("/vmlinuz"),
            Path::new("/initrd.img"),
            &params,
        )
        .unwrap();
        assert!(path.exists());
        stack.finish(false);
        assert!(!path.exists());
    }

    #[test]
    fn test_published_ipxe_config_restores_previous_on_rollback() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path();
        let old_target = output.join("old.ipxe");
        fs::write(&old_target, "old").unwrap();
        let boot_link = cow_core::naming::production_symlink(output);
        std::os::unix::fs::symlink(&old_target, &boot_link).unwrap();

        let new_target = output.join("new.ipxe");
        fs::write(&new_target, "new").unwrap();

        let mut stack = ScopeStack::new();
        published_ipxe_config(&mut stack, output, &new_target, false).unwrap();
        assert_eq!(fs::read_link(&boot_link).unwrap(), new_target);

        stack.finish(false);
        assert_eq!(fs::read_link(&boot_link).unwrap(), old_target);
    }

    #[test]
    fn test_published_ipxe_config_commit_drops_saved_copy() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path();
        let new_target = output.join("new.ipxe");
        fs::write(&new_target, "new").unwrap();

        let mut stack = ScopeStack::new();
        published_ipxe_config(&mut stack, output, &new_target, true).unwrap();
        stack.finish(true);

        let test_link = cow_core::naming::test_symlink(output);
        assert_eq!(fs::read_link(&test_link).unwrap(), new_target);
        assert!(!old_path(&test_link).exists());
    }
}
