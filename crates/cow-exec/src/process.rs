use std::process::{Command, Stdio};

use anyhow::Result;
use cow_core::CowError;
use tracing::debug;

/// Captured result of a process invocation.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// How to run a command. `expect_success` defaults on (mutating calls should
/// fail loudly); lookahead probes (`is_accessible`, `no_dpkg_locks`) build
/// their own `RunOptions { expect_success: false, .. }` and inspect
/// `exit_code` themselves instead of letting this raise.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub capture_stdout: bool,
    pub capture_stderr: bool,
    pub expect_success: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            capture_stdout: true,
            capture_stderr: true,
            expect_success: true,
        }
    }
}

impl RunOptions {
    pub fn probe() -> Self {
        RunOptions {
            expect_success: false,
            ..Default::default()
        }
    }
}

/// Run `argv[0] argv[1..]`, tracing the command line at debug level before
/// execution (`spec.md` §4.1, §7). Raises `CowError::ProcessFailure` when
/// `expect_success` is set and the exit code is non-zero.
pub fn run(argv: &[&str], opts: RunOptions) -> Result<CapturedOutput> {
    debug!(argv = ?argv, "running command");

    // Thread-local test hook: if a test has installed a mock handler via
    // `cow_exec::mock::install`, it intercepts here instead of reaching the
    // real `Command`. No handler is installed outside of tests, so this is
    // a single cheap thread-local check on the normal path.
    if let Some(output) = crate::mock::intercept(argv) {
        return finish(argv, output, &opts);
    }

    let mut cmd = Command::new(argv[0]);
    cmd.args(&argv[1..]);
    cmd.stdin(Stdio::null());
    cmd.stdout(if opts.capture_stdout {
        Stdio::piped()
    } else {
        Stdio::inherit()
    });
    cmd.stderr(if opts.capture_stderr {
        Stdio::piped()
    } else {
        Stdio::inherit()
    });

    let output = cmd.output()?;
    let captured = CapturedOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    };
    finish(argv, captured, &opts)
}

fn finish(argv: &[&str], captured: CapturedOutput, opts: &RunOptions) -> Result<CapturedOutput> {
    if opts.expect_success && !captured.success() {
        return Err(CowError::ProcessFailure {
            argv: argv.iter().map(|s| s.to_string()).collect(),
            exit_code: captured.exit_code,
            stderr: captured.stderr.clone(),
        }
        .into());
    }
    Ok(captured)
}
