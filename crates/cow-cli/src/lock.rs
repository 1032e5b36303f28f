use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use fs2::FileExt;

/// Advisory exclusive lock held for the lifetime of the process
/// (`spec.md` §5): concurrent runs against the same `--lock` path must not
/// interleave. Released automatically when the guard drops, including on
/// panic unwind.
pub struct Lock {
    file: File,
}

/// Sentinel exit code reserved exclusively for lock contention
/// (`spec.md` §6, §7).
pub const LOCK_CONTENTION_EXIT_CODE: i32 = 2;

impl Lock {
    /// Open (creating if necessary) and non-blockingly acquire an exclusive
    /// lock on `path`. On contention, prints an error and exits the process
    /// with [`LOCK_CONTENTION_EXIT_CODE`] directly — the caller never sees
    /// that case as a normal `Result`, matching the CLI's documented exit
    /// code contract.
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(path)
            .with_context(|| format!("failed to open lock file {}", path.display()))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { file }),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                eprintln!("cow: another run holds the lock at {}", path.display());
                std::process::exit(LOCK_CONTENTION_EXIT_CODE);
            }
            Err(e) => Err(e).with_context(|| format!("failed to lock {}", path.display())),
        }
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_creates_and_locks_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cow.lock");
        let lock = Lock::acquire(&path).unwrap();
        assert!(path.exists());
        drop(lock);
    }
}
