//! The block-target publisher (C10): `targetcli`-driven export of a
//! promoted snapshot as a read-only iSCSI LUN.

use anyhow::Result;
use cow_core::naming::{backstore_name, iscsi_target_name};
use cow_exec::{run, RunOptions, ScopeStack};
use tracing::info;

/// `targetcli /backstores/block create dev=<dev> name=<name> readonly=True`;
/// rollback deletes it.
fn create_iscsi_backstore(stack: &mut ScopeStack, device: &str, name: &str) -> Result<()> {
    info!(device, name, "creating iscsi backstore");
    let dev_arg = format!("dev={device}");
    let name_arg = format!("name={name}");
    run(
        &[
            "targetcli",
            "/backstores/block",
            "create",
            &dev_arg,
            &name_arg,
            "readonly=True",
        ],
        RunOptions::default(),
    )?;

    let name = name.to_string();
    stack.on_rollback(format!("delete iscsi backstore {name}"), move || {
        remove_iscsi_backstore(&name)
    });
    Ok(())
}

/// `targetcli /backstores/block delete <name>`.
pub fn remove_iscsi_backstore(name: &str) -> Result<()> {
    run(
        &["targetcli", "/backstores/block", "delete", name],
        RunOptions::default(),
    )?;
    Ok(())
}

/// `targetcli /iscsi create <target>`, attach the backstore as a LUN;
/// rollback deletes the target.
fn create_iscsi_target(stack: &mut ScopeStack, backstore: &str, target: &str) -> Result<()> {
    info!(backstore, target, "creating iscsi target");
    run(&["targetcli", "/iscsi", "create", target], RunOptions::default())?;

    {
        let target = target.to_string();
        stack.on_rollback(format!("delete iscsi target {target}"), move || {
            remove_iscsi_target(&target)
        });
    }

    let lun_path = format!("/iscsi/{target}/tpg1/luns");
    let backstore_path = format!("/backstores/block/{backstore}");
    run(
        &["targetcli", &lun_path, "create", &backstore_path],
        RunOptions::default(),
    )?;
    Ok(())
}

/// `targetcli /iscsi delete <target>`.
pub fn remove_iscsi_target(target: &str) -> Result<()> {
    run(&["targetcli", "/iscsi", "delete", target], RunOptions::default())?;
    Ok(())
}

/// `targetcli /iscsi/<target>/tpg1 set attribute generate_node_acls=1`.
fn configure_authentication(target: &str) -> Result<()> {
    let tpg_path = format!("/iscsi/{target}/tpg1");
    run(
        &[
            "targetcli",
            &tpg_path,
            "set",
            "attribute",
            "generate_node_acls=1",
        ],
        RunOptions::default(),
    )?;
    Ok(())
}

/// `targetcli saveconfig`.
pub fn saveconfig() -> Result<()> {
    run(&["targetcli", "saveconfig"], RunOptions::default())?;
    Ok(())
}

/// The full C10 composition: backstore, target+LUN, dynamic ACLs,
/// `saveconfig`. An outer scope ensures `saveconfig` runs on rollback too,
/// so a partially-removed target is persisted rather than left dangling in
/// the live (unsaved) configuration.
pub fn publish_to_iscsi(stack: &mut ScopeStack, device: &str) -> Result<(String, String)> {
    let backstore = backstore_name(device);
    let target = iscsi_target_name(&backstore);

    create_iscsi_backstore(stack, device, &backstore)?;
    create_iscsi_target(stack, &backstore, &target)?;
    configure_authentication(&target)?;
    saveconfig()?;

    stack.on_final("persist targetcli config", |_success| saveconfig());

    Ok((backstore, target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cow_exec::mock;

    #[test]
    fn test_publish_to_iscsi_happy_path() {
        let (_guard,) = mock::install(|argv| match argv {
            ["targetcli", "/backstores/block", "create", ..] => Some(mock::MockResponse::empty()),
            ["targetcli", "/iscsi", "create", _] => Some(mock::MockResponse::empty()),
            ["targetcli", luns, "create", _] if luns.contains("/luns") => {
                Some(mock::MockResponse::empty())
            }
            ["targetcli", tpg, "set", "attribute", "generate_node_acls=1"]
                if tpg.contains("/tpg1") =>
            {
                Some(mock::MockResponse::empty())
            }
            ["targetcli", "saveconfig"] => Some(mock::MockResponse::empty()),
            _ => None,
        });

        let mut stack = ScopeStack::new();
        let (backstore, target) =
            publish_to_iscsi(&mut stack, "/dev/vg/vm1-at-ts-snapshot").unwrap();
        assert_eq!(backstore, "vm1-at-ts-snapshot");
        assert_eq!(target, "iqn.2013-07.cow.vm1-at-ts-snapshot");
        stack.finish(true);
    }

    #[test]
    fn test_publish_to_iscsi_rolls_back_backstore_on_target_failure() {
        use std::cell::Cell;
        use std::rc::Rc;
        let backstore_deleted = Rc::new(Cell::new(false));
        let b = backstore_deleted.clone();
        let (_guard,) = mock::install(move |argv| match argv {
            ["targetcli", "/backstores/block", "create", ..] => Some(mock::MockResponse::empty()),
            ["targetcli", "/backstores/block", "delete", _] => {
                b.set(true);
                Some(mock::MockResponse::empty())
            }
            ["targetcli", "/iscsi", "create", _] => {
                Some(mock::MockResponse::failure(1, "no space in target list"))
            }
            _ => None,
        });

        let mut stack = ScopeStack::new();
        let result = publish_to_iscsi(&mut stack, "/dev/vg/vm1-at-ts-snapshot");
        assert!(result.is_err());
        stack.finish(false);
        assert!(backstore_deleted.get());
    }
}
