//! Logging initialization with optional file-based daily rotation.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_NAME: &str = "quizgate.log";

#[derive(Debug, Clone)]
pub struct LogOptions<'a> {
    /// Default filter directive; `RUST_LOG` wins when set.
    pub level: &'a str,
    pub to_file: bool,
    pub log_dir: Option<&'a str>,
    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global tracing subscriber.
///
/// With `to_file` the output goes to `{log_dir}/quizgate.log.YYYY-MM-DD`
/// through a non-blocking writer, and the returned guard **must be held**
/// until shutdown so buffered lines are flushed.
pub fn init_logging(options: &LogOptions<'_>) -> Option<WorkerGuard> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(options.level))
        .with_target(false);

    if options.to_file {
        let dir = options.log_dir.unwrap_or("./logs");
        let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let builder = builder.with_writer(non_blocking).with_ansi(false);
        if options.json {
            builder.json().init();
        } else {
            builder.init();
        }
        Some(guard)
    } else {
        if options.json {
            builder.json().init();
        } else {
            builder.init();
        }
        None
    }
}
