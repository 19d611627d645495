//! Logging initialization.
//!
//! Console output is always enabled; when a log directory is configured,
//! a second daily-rotated file layer is added via `tracing-appender`.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{Error, Result};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "ocado_agent=info,ocado_api=info";

/// Initialize the global tracing subscriber.
///
/// # Arguments
/// * `log_dir` - Directory for daily-rotated log files; `None` disables
///   file output.
///
/// # Returns
/// The appender worker guard when file output is enabled; keep it alive
/// for the process lifetime or buffered log lines are lost.
pub fn init(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer());

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, "ocado-agent.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            registry
                .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                .try_init()
                .map_err(|e| Error::Other(format!("failed to set global subscriber: {e}")))?;
            Ok(Some(guard))
        }
        None => {
            registry
                .try_init()
                .map_err(|e| Error::Other(format!("failed to set global subscriber: {e}")))?;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert!(DEFAULT_LOG_FILTER.contains("ocado_agent=info"));
        assert!(DEFAULT_LOG_FILTER.contains("ocado_api=info"));
    }
}
