use anyhow::Result;

use crate::process::{run, CapturedOutput, RunOptions};

/// Extra `ssh` options to splice in before `host command` (e.g.
/// `-o ConnectTimeout=1` for `is_accessible`).
#[derive(Debug, Clone, Default)]
pub struct SshOptions {
    pub extra_args: Vec<String>,
}

impl SshOptions {
    pub fn with(args: &[&str]) -> Self {
        SshOptions {
            extra_args: args.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// `ssh <host> <command>`, returning the exit code only — used for
/// lookahead probes that must never raise (`is_accessible`, `no_dpkg_locks`).
pub fn ssh(host: &str, command: &str, options: &SshOptions) -> Result<i32> {
    let out = ssh_run(host, command, options, RunOptions::probe())?;
    Ok(out.exit_code)
}

/// `ssh <host> <command>`, returning captured stdout. Raises on non-zero
/// exit (the caller wants the output and expects success).
pub fn ssh_capture(host: &str, command: &str, options: &SshOptions) -> Result<String> {
    let out = ssh_run(host, command, options, RunOptions::default())?;
    Ok(out.stdout.trim().to_string())
}

fn ssh_run(
    host: &str,
    command: &str,
    options: &SshOptions,
    run_opts: RunOptions,
) -> Result<CapturedOutput> {
    let mut argv: Vec<&str> = vec!["ssh"];
    for a in &options.extra_args {
        argv.push(a);
    }
    argv.push(host);
    argv.push(command);
    run(&argv, run_opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock;

    #[test]
    fn test_ssh_returns_exit_code_without_raising() {
        let (_guard,) = mock::install(|argv| {
            if argv.first() == Some(&"ssh") {
                Some(mock::MockResponse::failure(1, "no route to host"))
            } else {
                None
            }
        });
        let code = ssh("host1", "id", &SshOptions::default()).unwrap();
        assert_eq!(code, 1);
    }

    #[test]
    fn test_ssh_capture_returns_trimmed_stdout() {
        let (_guard,) = mock::install(|argv| {
            if argv.first() == Some(&"ssh") {
                Some(mock::MockResponse::ok("2024-05-01-10-00-00\n"))
            } else {
                None
            }
        });
        let out = ssh_capture("host1", "cat /etc/timestamp", &SshOptions::default()).unwrap();
        assert_eq!(out, "2024-05-01-10-00-00");
    }

    #[test]
    fn test_ssh_options_splice_before_host() {
        let (_guard,) = mock::install(|argv| {
            assert_eq!(argv, ["ssh", "-o", "ConnectTimeout=1", "host1", "id"]);
            Some(mock::MockResponse::ok(""))
        });
        ssh(
            "host1",
            "id",
            &SshOptions::with(&["-o", "ConnectTimeout=1"]),
        )
        .unwrap();
    }
}
