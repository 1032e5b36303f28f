use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use cow_exec::{ssh, ssh_capture, wait_for, ScopeStack, SshOptions};
use tracing::warn;

use crate::manager::VirtualMachineManager;

const DPKG_LOCK_TIMEOUT: Duration = Duration::from_secs(900);
const DPKG_LOCK_STEP: Duration = Duration::from_secs(10);
const VM_STOP_TIMEOUT: Duration = Duration::from_secs(180);
const VM_STOP_STEP: Duration = Duration::from_secs(3);
const ACCESSIBLE_TIMEOUT: Duration = Duration::from_secs(300);
const ACCESSIBLE_STEP: Duration = Duration::from_secs(5);

/// True once no process holds the dpkg lock on `host`.
pub fn no_dpkg_locks(host: &str) -> Result<bool> {
    let code = ssh(host, "! fuser /var/lib/dpkg/lock", &SshOptions::default())?;
    Ok(code == 0)
}

/// `ssh -o ConnectTimeout=1 host id` exiting zero.
pub fn is_accessible(host: &str) -> Result<bool> {
    let code = ssh(host, "id", &SshOptions::with(&["-o", "ConnectTimeout=1"]))?;
    Ok(code == 0)
}

/// Wait for any in-flight package management on `host` to clear, then shut
/// it down. Does not wait for the shutdown to complete.
pub fn shutdown(host: &str) -> Result<()> {
    wait_for(
        "dpkg lock release",
        DPKG_LOCK_TIMEOUT,
        DPKG_LOCK_STEP,
        || no_dpkg_locks(host),
    )?;
    ssh_capture(host, "shutdown now", &SshOptions::default())?;
    Ok(())
}

/// Shut the VM down for the duration of the scope, then bring it back up.
///
/// The restart happens as a scope-final action so it runs regardless of
/// whether the body committed or rolled back. A timeout waiting for the
/// VM to come back up is logged, not propagated — by the time we're
/// restarting, the publication the scope exists to protect has already
/// succeeded or failed, and raising here would mask that outcome.
pub fn vm_shut_down(
    stack: &mut ScopeStack,
    vmm: Arc<dyn VirtualMachineManager>,
    name: &str,
    host: &str,
) -> Result<()> {
    shutdown(host)?;
    wait_for("vm stopped", VM_STOP_TIMEOUT, VM_STOP_STEP, || {
        Ok(!vmm.is_vm_running(name)?)
    })?;

    let name = name.to_string();
    let host = host.to_string();
    stack.on_final("restart vm", move |_success| {
        vmm.start(&name)?;
        if let Err(e) = wait_for("vm accessible", ACCESSIBLE_TIMEOUT, ACCESSIBLE_STEP, || {
            is_accessible(&host)
        }) {
            warn!(host = %host, error = %e, "vm did not become accessible after restart");
        }
        Ok(())
    });
    Ok(())
}
