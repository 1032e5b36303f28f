use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable output, for interactive use.
    Human,
    /// Structured JSON, for unattended/cron invocations.
    Json,
}

/// Initialize the global tracing subscriber.
///
/// Respects `RUST_LOG` if set; otherwise derives a filter from the `-v`
/// count: 0 → `cow=warn`, 1 → `cow=info`, 2+ → `cow=debug`.
pub fn init(verbosity: u8, format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directive = match verbosity {
            0 => "cow=warn",
            1 => "cow=info",
            _ => "cow=debug",
        };
        EnvFilter::new(directive)
    });

    match format {
        LogFormat::Human => {
            let subscriber = fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .compact();
            tracing_subscriber::registry()
                .with(env_filter)
                .with(subscriber)
                .init();
        }
        LogFormat::Json => {
            let subscriber = fmt::layer().json().with_target(true);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(subscriber)
                .init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_equality() {
        assert_eq!(LogFormat::Human, LogFormat::Human);
        assert_eq!(LogFormat::Json, LogFormat::Json);
        assert_ne!(LogFormat::Human, LogFormat::Json);
    }
}
