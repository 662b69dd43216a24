//! Logging setup.
//!
//! Console output with local timezone timestamps, optionally mirrored to a
//! daily rotated log file.

use std::path::PathBuf;

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::Error;

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "notify_dispatch=info,sqlx=warn";

/// Base name of rotated log files.
const LOG_FILE_NAME: &str = "notify-dispatch.log";

/// Custom timer that uses the local timezone via chrono.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Options for [`init_logging`].
#[derive(Debug, Clone, Default)]
pub struct LoggingOptions {
    /// Filter directive. `RUST_LOG` wins when set, then this, then
    /// [`DEFAULT_LOG_FILTER`].
    pub filter: Option<String>,
    /// Directory for daily rotated log files. Console only when unset.
    pub log_dir: Option<PathBuf>,
    /// Emit JSON lines on the console instead of human-readable text.
    pub json: bool,
}

impl LoggingOptions {
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(self.filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER))
        })
    }
}

/// Initialize the global tracing subscriber.
///
/// # Returns
/// The file writer guard when file logging is enabled. Keep it alive for the
/// lifetime of the process or buffered lines are lost.
pub fn init_logging(options: &LoggingOptions) -> crate::Result<Option<WorkerGuard>> {
    let console = if options.json {
        fmt::layer().json().with_timer(LocalTimer).boxed()
    } else {
        fmt::layer().with_ansi(true).with_timer(LocalTimer).boxed()
    };

    let (file_layer, guard) = match &options.log_dir {
        Some(log_dir) => {
            std::fs::create_dir_all(log_dir)
                .map_err(|e| Error::io_path("creating log directory", log_dir, e))?;
            let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(options.env_filter())
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Other(format!("Failed to set global default subscriber: {}", e)))?;

    Ok(guard)
}
