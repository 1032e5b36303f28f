//! Test mock for `process::run` (and, transitively, `ssh::ssh*`). Lets the
//! rest of the workspace unit-test pipeline/cleaner ordering without LVM,
//! `targetcli`, or `virsh` present — mirrors the teacher's `shell_mock`.

use std::cell::RefCell;

use super::process::CapturedOutput;

/// Canned response for a mocked command.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl MockResponse {
    pub fn ok(stdout: &str) -> Self {
        MockResponse {
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn empty() -> Self {
        Self::ok("")
    }

    pub fn failure(exit_code: i32, stderr: &str) -> Self {
        MockResponse {
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    fn into_captured(self) -> CapturedOutput {
        CapturedOutput {
            exit_code: self.exit_code,
            stdout: self.stdout,
            stderr: self.stderr,
        }
    }
}

type Handler = Box<dyn Fn(&[&str]) -> Option<MockResponse>>;

thread_local! {
    static HANDLER: RefCell<Option<Handler>> = const { RefCell::new(None) };
}

/// Guard that clears the installed handler on drop, so one test's mock
/// never leaks into the next on the same thread.
pub struct MockGuard;

impl Drop for MockGuard {
    fn drop(&mut self) {
        HANDLER.with(|h| *h.borrow_mut() = None);
    }
}

/// Install a handler for the lifetime of the returned guard. The handler
/// returns `Some(response)` for argvs it wants to intercept, `None` to fall
/// through to the previous behavior (real execution).
pub fn install<F>(handler: F) -> (MockGuard,)
where
    F: Fn(&[&str]) -> Option<MockResponse> + 'static,
{
    HANDLER.with(|h| *h.borrow_mut() = Some(Box::new(handler)));
    (MockGuard,)
}

pub(crate) fn intercept(argv: &[&str]) -> Option<CapturedOutput> {
    HANDLER.with(|h| {
        h.borrow()
            .as_ref()
            .and_then(|f| f(argv))
            .map(MockResponse::into_captured)
    })
}
