//! Push-to-fleet rolling reboot (C13, `spec.md` §4.13): after a new
//! snapshot is promoted, nudge idle clients still booted against an older
//! one to reboot onto it.

use std::collections::BTreeSet;

use anyhow::Result;
use cow_core::naming::{backstore_name, iscsi_target_name};
use cow_exec::{ssh_capture, SshOptions};
use regex::Regex;
use tracing::{info, warn};

use crate::sessions::dynamic_sessions;

fn session_host_pattern() -> &'static Regex {
    use std::sync::OnceLock;
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^.+:(?P<host>.+)_\d{4}-\d{2}-\d{2}_\d{2}-\d{2}-\d{2}$").unwrap()
    })
}

/// Extract the client hostname from an iSCSI session identifier, per the
/// initiator naming convention `...:<host>_YYYY-MM-DD_HH-MM-SS`. Sessions
/// that don't match the convention are not ours to manage.
fn host_from_session(session: &str) -> Option<String> {
    session_host_pattern()
        .captures(session)
        .map(|c| c["host"].to_string())
}

/// True if `ssh host who` reports any logged-in user — a host mid-use is
/// left alone rather than rebooted out from under someone.
fn is_busy(host: &str) -> Result<bool> {
    let out = ssh_capture(host, "who", &SshOptions::default())?;
    Ok(!out.trim().is_empty())
}

/// For every snapshot in `old_snapshots`, enumerate its iSCSI sessions,
/// derive each session's client host, and `ssh host reboot` any idle one
/// not already booted against the newly promoted snapshot. `test_host` is
/// always left alone — it is rebooted separately by the verification step.
pub fn push_to_fleet(old_snapshots: &[String], test_host: &str) -> Result<()> {
    let mut hosts = BTreeSet::new();
    for snapshot in old_snapshots {
        let backstore = backstore_name(snapshot);
        let target = iscsi_target_name(&backstore);
        for session in dynamic_sessions(&target)? {
            match host_from_session(&session) {
                Some(host) if host != test_host => {
                    hosts.insert(host);
                }
                Some(_) => {}
                None => warn!(session, "session name does not match host convention; skipping"),
            }
        }
    }

    for host in hosts {
        match is_busy(&host) {
            Ok(true) => {
                info!(host, "host is busy; skipping");
                continue;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(host, error = %e, "failed to check host for active sessions; skipping");
                continue;
            }
        }
        info!(host, "rebooting idle host onto new snapshot");
        if let Err(e) = ssh_capture(&host, "reboot", &SshOptions::default()) {
            warn!(host, error = %e, "failed to reboot host (best effort)");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_from_session_matches_convention() {
        assert_eq!(
            host_from_session("iqn.initiator:client01_2024-05-01_10-00-00"),
            Some("client01".to_string())
        );
    }

    #[test]
    fn test_host_from_session_rejects_unmatchable() {
        assert_eq!(host_from_session("not-a-session-name"), None);
    }

    #[test]
    fn test_push_to_fleet_with_no_sessions_is_noop() {
        push_to_fleet(&["/dev/vg0/vm1-at-2024-05-01-10-00-00-snapshot".to_string()], "testhost")
            .unwrap();
    }
}
