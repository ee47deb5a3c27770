//! Logging infrastructure for sessionmon
//!
//! Logs are written to `~/.local/state/sessionmon/sessionmon.log.<date>`
//! following XDG standards. Stdout is never a log target: it carries the
//! binary's snapshot and event stream. If the state directory cannot be
//! created, logs go to stderr instead.

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// File name prefix; the daily appender adds the date.
pub const LOG_FILE_PREFIX: &str = "sessionmon.log";

/// Initialize the logging system
///
/// Sets up tracing with:
/// - File output to XDG state directory, rotated daily
/// - stderr output if that directory is unusable
/// - Level from the RUST_LOG env var, else from config
///
/// An invalid level in the config is an error; an invalid RUST_LOG falls
/// back to the config level.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => level_filter(&config.level)?,
    };

    let log_dir = Config::state_dir();
    let (writer, guard, target) = match std::fs::create_dir_all(&log_dir) {
        Ok(()) => {
            let appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (writer, guard, LogTarget::File(log_dir.clone()))
        }
        Err(e) => {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
            (writer, guard, LogTarget::Stderr(e))
        }
    };

    let to_file = matches!(target, LogTarget::File(_));
    let fmt_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(to_file)
        .with_file(to_file)
        .with_line_number(to_file);

    // try_init: a second call (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();

    match &target {
        LogTarget::File(dir) => {
            tracing::info!(log_dir = %dir.display(), level = %config.level, "Logging initialized");
        }
        LogTarget::Stderr(e) => {
            tracing::warn!(
                log_dir = %log_dir.display(),
                error = %e,
                "Cannot create log directory, logging to stderr"
            );
        }
    }

    Ok(LoggingGuard { _guard: guard })
}

enum LogTarget {
    File(PathBuf),
    Stderr(std::io::Error),
}

/// Parse a configured level such as `info` or `sessionmon_core=debug,warn`.
pub fn level_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level)
        .map_err(|e| Error::Config(format!("invalid logging level {level:?}: {e}")))
}

/// Initialize logging for tests (logs to the test writer)
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

/// Guard that keeps the logging system alive
///
/// When dropped, flushes any pending log writes.
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Returns the log file path, without the date suffix added by rotation
pub fn log_file_path() -> PathBuf {
    Config::log_path()
}
