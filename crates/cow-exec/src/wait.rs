use std::time::{Duration, Instant};

use anyhow::Result;
use cow_core::CowError;

/// Poll `predicate` every `step` until it returns `true` or `timeout`
/// elapses; the step is honoured *between* polls, never before the first
/// one. Raises `CowError::Timeout` naming `what` once the deadline passes.
pub fn wait_for<F>(what: &str, timeout: Duration, step: Duration, mut predicate: F) -> Result<()>
where
    F: FnMut() -> Result<bool>,
{
    let start = Instant::now();
    loop {
        if predicate()? {
            return Ok(());
        }
        if start.elapsed() >= timeout {
            return Err(CowError::Timeout {
                what: what.to_string(),
                after_secs: timeout.as_secs(),
            }
            .into());
        }
        std::thread::sleep(step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_wait_for_succeeds_immediately() {
        let calls = Cell::new(0);
        wait_for(
            "immediate",
            Duration::from_millis(50),
            Duration::from_millis(5),
            || {
                calls.set(calls.get() + 1);
                Ok(true)
            },
        )
        .unwrap();
        assert_eq!(calls.get(), 1, "step must not be honoured before the first poll");
    }

    #[test]
    fn test_wait_for_succeeds_after_retries() {
        let calls = Cell::new(0);
        wait_for(
            "eventually",
            Duration::from_millis(200),
            Duration::from_millis(5),
            || {
                let c = calls.get() + 1;
                calls.set(c);
                Ok(c >= 3)
            },
        )
        .unwrap();
        assert!(calls.get() >= 3);
    }

    #[test]
    fn test_wait_for_times_out() {
        let err = wait_for(
            "never",
            Duration::from_millis(20),
            Duration::from_millis(5),
            || Ok(false),
        )
        .unwrap_err();
        let timeout = err.downcast_ref::<CowError>().unwrap();
        match timeout {
            CowError::Timeout { what, .. } => assert_eq!(what, "never"),
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_wait_for_propagates_predicate_error() {
        let err = wait_for(
            "erroring",
            Duration::from_millis(50),
            Duration::from_millis(5),
            || anyhow::bail!("predicate blew up"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("predicate blew up"));
    }
}
