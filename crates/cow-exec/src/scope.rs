//! The transactional scope stack (`spec.md` §4.3, C4). Rust has no
//! coroutine-based `contextlib.contextmanager` equivalent, so this is
//! modeled directly as the design notes suggest: a tagged record per
//! acquisition (`commit` / `rollback` / `final`) pushed onto a stack, run in
//! reverse push order on `finish`. Every storage, mount, target, or symlink
//! acquisition in `cow-publish`/`cow-storage` registers one entry here; the
//! `add` pipeline is their stacked composition.

use anyhow::Result;
use tracing::{error, warn};

enum Cleanup {
    /// Runs only if the scope committed successfully.
    Commit(Box<dyn FnOnce() -> Result<()>>),
    /// Runs only if the enclosing transaction failed.
    Rollback(Box<dyn FnOnce() -> Result<()>>),
    /// Runs unconditionally; receives whether the transaction succeeded.
    Final(Box<dyn FnOnce(bool) -> Result<()>>),
}

struct Entry {
    label: String,
    cleanup: Cleanup,
}

/// A LIFO stack of pending cleanup actions. Build it up as the pipeline
/// acquires resources, then call `finish(success)` exactly once at the end —
/// whether the pipeline returned `Ok` or `Err`.
#[derive(Default)]
pub struct ScopeStack {
    entries: Vec<Entry>,
}

/// Marker type kept for API symmetry with `spec.md`'s `transact`; a scope
/// is simply an `Entry` pushed onto the enclosing `ScopeStack`, there is
/// nothing further to hold onto once `push_*` returns.
pub struct Scope;

impl ScopeStack {
    pub fn new() -> Self {
        ScopeStack { entries: Vec::new() }
    }

    /// Register a commit-only action: fires iff the transaction commits.
    pub fn on_commit(
        &mut self,
        label: impl Into<String>,
        f: impl FnOnce() -> Result<()> + 'static,
    ) -> Scope {
        self.entries.push(Entry {
            label: label.into(),
            cleanup: Cleanup::Commit(Box::new(f)),
        });
        Scope
    }

    /// Register a rollback-only action: fires iff the transaction fails.
    /// This is how every fatal, rollback-guarded acquisition in
    /// `cow-storage`/`cow-publish` is expressed.
    pub fn on_rollback(
        &mut self,
        label: impl Into<String>,
        f: impl FnOnce() -> Result<()> + 'static,
    ) -> Scope {
        self.entries.push(Entry {
            label: label.into(),
            cleanup: Cleanup::Rollback(Box::new(f)),
        });
        Scope
    }

    /// Register an unconditional action (`final` in `spec.md` §4.3):
    /// mutually exclusive in spirit with `on_commit`/`on_rollback` for the
    /// same acquisition — used for things like unmounting or releasing a
    /// kpartx mapping that must happen either way.
    pub fn on_final(
        &mut self,
        label: impl Into<String>,
        f: impl FnOnce(bool) -> Result<()> + 'static,
    ) -> Scope {
        self.entries.push(Entry {
            label: label.into(),
            cleanup: Cleanup::Final(Box::new(f)),
        });
        Scope
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Unwind the stack in reverse push order. A cleanup action's own
    /// failure is logged and never shadows the transaction's original
    /// outcome — callers propagate whatever error they already had.
    pub fn finish(self, success: bool) {
        for entry in self.entries.into_iter().rev() {
            let result = match entry.cleanup {
                Cleanup::Commit(f) => {
                    if success {
                        f()
                    } else {
                        Ok(())
                    }
                }
                Cleanup::Rollback(f) => {
                    if !success {
                        f()
                    } else {
                        Ok(())
                    }
                }
                Cleanup::Final(f) => f(success),
            };
            if let Err(e) = result {
                if success {
                    warn!(scope = %entry.label, error = %e, "scope cleanup failed after commit");
                } else {
                    error!(scope = %entry.label, error = %e, "rollback handler failed; continuing unwind");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_rollback_runs_in_reverse_on_failure() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut stack = ScopeStack::new();

        let o1 = order.clone();
        stack.on_rollback("first", move || {
            o1.borrow_mut().push("first");
            Ok(())
        });
        let o2 = order.clone();
        stack.on_rollback("second", move || {
            o2.borrow_mut().push("second");
            Ok(())
        });

        stack.finish(false);
        assert_eq!(*order.borrow(), vec!["second", "first"]);
    }

    #[test]
    fn test_commit_only_runs_on_success() {
        let ran = Rc::new(RefCell::new(false));
        let mut stack = ScopeStack::new();
        let r = ran.clone();
        stack.on_commit("swap symlink", move || {
            *r.borrow_mut() = true;
            Ok(())
        });
        stack.finish(false);
        assert!(!*ran.borrow(), "commit action must not run on failure");
    }

    #[test]
    fn test_rollback_only_runs_on_failure() {
        let ran = Rc::new(RefCell::new(false));
        let mut stack = ScopeStack::new();
        let r = ran.clone();
        stack.on_rollback("remove lv", move || {
            *r.borrow_mut() = true;
            Ok(())
        });
        stack.finish(true);
        assert!(!*ran.borrow(), "rollback action must not run on success");
    }

    #[test]
    fn test_final_runs_either_way() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut stack = ScopeStack::new();
        let s1 = seen.clone();
        stack.on_final("umount", move |success| {
            s1.borrow_mut().push(success);
            Ok(())
        });
        stack.finish(true);

        let seen2 = Rc::new(RefCell::new(Vec::new()));
        let mut stack2 = ScopeStack::new();
        let s2 = seen2.clone();
        stack2.on_final("umount", move |success| {
            s2.borrow_mut().push(success);
            Ok(())
        });
        stack2.finish(false);

        assert_eq!(*seen.borrow(), vec![true]);
        assert_eq!(*seen2.borrow(), vec![false]);
    }

    #[test]
    fn test_rollback_handler_failure_does_not_panic() {
        let mut stack = ScopeStack::new();
        stack.on_rollback("flaky", || anyhow::bail!("cleanup exploded"));
        stack.on_rollback("ok", || Ok(()));
        // Should not panic; both handlers run, failure is logged only.
        stack.finish(false);
    }
}
