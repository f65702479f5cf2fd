//! Tracing setup for Sluice binaries.
//!
//! Console output follows the level the user picked (or `RUST_LOG`), while a
//! file layer records every event of the run at trace level. Controller
//! decisions are logged at debug and trace, so the file is where admission
//! and eviction sequences can be reconstructed after the fact.

use std::fs::{File, create_dir_all};
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// File the trace layer writes to, overwritten on every run.
pub const LOG_FILE_NAME: &str = "sluice-last-run.log";

/// Errors raised while installing the global subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("Failed to prepare log file: {0}")]
    Io(#[from] std::io::Error),

    #[error("A global tracing subscriber is already installed: {reason}")]
    AlreadyInitialized { reason: String },
}

/// Returns where the trace log of a run lands.
pub fn log_file_path(logs_dir: Option<&Path>) -> PathBuf {
    logs_dir.unwrap_or_else(|| Path::new("logs")).join(LOG_FILE_NAME)
}

/// Installs the console and file layers as the global subscriber.
///
/// `logs_dir` defaults to `./logs`. The console filter honours `RUST_LOG`
/// when set and falls back to `console_level` otherwise.
///
/// # Errors
///
/// - `TracingError::Io` - The logs directory or file could not be created
/// - `TracingError::AlreadyInitialized` - Another subscriber was installed first
pub fn init_tracing(console_level: Level, logs_dir: Option<&Path>) -> Result<(), TracingError> {
    let log_path = log_file_path(logs_dir);
    if let Some(parent) = log_path.parent() {
        create_dir_all(parent)?;
    }
    let log_file = File::create(&log_path)?;

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_level.to_string()));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_filter(console_filter);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(log_file)
        .with_filter(EnvFilter::new("trace"));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| TracingError::AlreadyInitialized {
            reason: e.to_string(),
        })?;

    tracing::info!(
        "Tracing initialized: console={}, trace_file={}",
        console_level,
        log_path.display()
    );

    Ok(())
}

/// Console verbosity selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CliLogLevel {
    /// Only error messages
    Error,
    /// Quota rejections, dropped appends and stalled eviction
    #[default]
    Warn,
    /// Sufficiency, outrun and recovery transitions
    Info,
    /// Every append, removal and quality switch
    Debug,
    /// Admission waits and buffered range dumps
    Trace,
}

impl CliLogLevel {
    /// Converts CLI log level to tracing Level enum.
    ///
    /// # Examples
    /// ```
    /// use sluice_core::tracing_setup::CliLogLevel;
    ///
    /// let level = CliLogLevel::Debug.as_tracing_level();
    /// assert_eq!(level, tracing::Level::DEBUG);
    /// ```
    pub fn as_tracing_level(self) -> Level {
        match self {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

impl std::fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CliLogLevel::Error => "error",
            CliLogLevel::Warn => "warn",
            CliLogLevel::Info => "info",
            CliLogLevel::Debug => "debug",
            CliLogLevel::Trace => "trace",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use clap::ValueEnum;

    use super::*;

    #[test]
    fn test_log_file_path_defaults_to_logs_dir() {
        assert_eq!(
            log_file_path(None),
            Path::new("logs").join("sluice-last-run.log")
        );
        assert_eq!(
            log_file_path(Some(Path::new("/tmp/run"))),
            Path::new("/tmp/run/sluice-last-run.log")
        );
    }

    #[test]
    fn test_cli_level_parsing() {
        let level = CliLogLevel::from_str("info", true).unwrap();
        assert_eq!(level, CliLogLevel::Info);
        assert_eq!(level.to_string(), "info");
        assert_eq!(CliLogLevel::default().as_tracing_level(), Level::WARN);
        assert!(CliLogLevel::from_str("verbose", true).is_err());
    }

    #[test]
    fn test_init_tracing_writes_log_file() {
        let dir = tempfile::tempdir().unwrap();
        // Another test binary may already own the global subscriber
        let _ = init_tracing(Level::WARN, Some(dir.path()));
        assert!(dir.path().join(LOG_FILE_NAME).exists());
    }
}
