use thiserror::Error;

/// Typed leaf errors. Callers generally propagate these wrapped in
/// `anyhow::Error` with added context; the variants exist so that
/// call sites which need to distinguish failure kinds (the lock-file exit
/// code, the cleaner's best-effort steps, the `is_lv_open` boundary cases)
/// can match on them via `anyhow::Error::downcast_ref`.
#[derive(Debug, Error)]
pub enum CowError {
    #[error("command failed (exit {exit_code}): {}", argv.join(" "))]
    ProcessFailure {
        argv: Vec<String>,
        exit_code: i32,
        stderr: String,
    },

    #[error("timed out after {after_secs}s waiting for {what}")]
    Timeout { what: String, after_secs: u64 },

    #[error("{reason} for device {device} (real device {real_device}). parted output was: {output}")]
    DiskConfig {
        device: String,
        real_device: String,
        output: String,
        reason: String,
    },

    #[error("{0}")]
    Invariant(String),
}

impl CowError {
    pub fn invariant(msg: impl Into<String>) -> Self {
        CowError::Invariant(msg.into())
    }
}
