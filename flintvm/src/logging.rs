//! Tracing subscriber setup for binaries embedding flintvm.
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is left to the application. [`init_logging`] is the stock setup: stderr
//! output filtered by `RUST_LOG`, plus an optional log file.

use flintvm_shared::{FlintError, FlintResult};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_FILE_NAME: &str = "flintvm.log";

#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// Filter used when `RUST_LOG` is unset.
    pub default_filter: String,
    /// Also write plain-text logs to `<dir>/flintvm.log`.
    pub log_dir: Option<PathBuf>,
    pub ansi: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            default_filter: "info".to_string(),
            log_dir: None,
            ansi: true,
        }
    }
}

/// Keeps the file writer alive. Buffered lines are flushed when dropped.
pub struct LogGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(options: &LoggingOptions) -> FlintResult<LogGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&options.default_filter))
        .map_err(|e| {
            FlintError::InvalidConfiguration(format!(
                "invalid log filter '{}': {}",
                options.default_filter, e
            ))
        })?;

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(options.ansi);

    let (file_layer, file_guard) = match &options.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| FlintError::Internal(format!("logging already initialized: {e}")))?;

    Ok(LogGuard {
        _file_guard: file_guard,
    })
}
