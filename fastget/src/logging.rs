//! Logging setup.
//!
//! Installs a `tracing` subscriber with a stderr layer and an optional
//! file layer. `RUST_LOG` overrides the default filter.

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;

use thiserror::Error;
use time::macros::format_description;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Error)]
pub enum LogError {
    #[error("failed to open log file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid log filter: {0}")]
    Filter(String),

    #[error("subscriber init failed: {0}")]
    SubscriberInit(#[from] tracing_subscriber::util::TryInitError),
}

/// Logging options.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Verbose output for the downloader crates.
    pub debug: bool,
    /// Append logs to this file as well.
    pub file: Option<PathBuf>,
    /// Disable ANSI colors on stderr.
    pub no_color: bool,
}

/// Keeps the non-blocking file writer alive. Drop it last.
#[must_use = "dropping the guard stops the file writer"]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Filter used when `RUST_LOG` is not set.
pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        "warn,fastget=debug,fastget_cli=debug"
    } else {
        "warn"
    }
}

/// Install the global subscriber.
pub fn init_logging(options: &LogOptions) -> Result<LoggingGuard, LogError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive(options.debug))
            .map_err(|e| LogError::Filter(e.to_string()))?,
    };

    let timer = LocalTime::new(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
    ));

    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_timer(timer.clone())
        .with_ansi(!options.no_color)
        .with_target(options.debug);

    let (file_layer, file_guard) = match &options.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| LogError::Io {
                    path: path.clone(),
                    source: e,
                })?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_timer(timer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()?;

    Ok(LoggingGuard { _file: file_guard })
}
