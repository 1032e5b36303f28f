//! Dynamic iSCSI session enumeration, shared by the cleaner and the
//! push-to-fleet rolling reboot.

use std::fs;
use std::path::PathBuf;

use anyhow::Result;

/// `/sys/kernel/config/target/iscsi/<target>/tpgt_1/dynamic_sessions`,
/// NUL-separated. A target with no active initiators, or one whose
/// configfs entry no longer exists, has no sessions.
pub fn dynamic_sessions(target: &str) -> Result<Vec<String>> {
    let path = dynamic_sessions_path(target);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(&path)?;
    Ok(raw
        .split('\0')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

fn dynamic_sessions_path(target: &str) -> PathBuf {
    PathBuf::from(format!(
        "/sys/kernel/config/target/iscsi/{target}/tpgt_1/dynamic_sessions"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dynamic_sessions_missing_path_is_empty() {
        let sessions = dynamic_sessions("iqn.2013-07.cow.does-not-exist").unwrap();
        assert!(sessions.is_empty());
    }
}
