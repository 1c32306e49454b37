//! Logging bootstrap.
//!
//! Console output always; a rolling file under `LOG_DIRECTORY` when file
//! logging is enabled. The file writer is non-blocking so slow disks never
//! stall a game turn; its flush guard is handed back to the caller, who
//! keeps it alive for the life of the server so buffered lines land on
//! shutdown.

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt::time::UtcTime, prelude::*, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

/// Install the global subscriber. Returns the file writer's guard when
/// file logging is active; dropping it stops the background flusher.
pub fn init_with_config(cfg: &LoggingConfig) -> Option<WorkerGuard> {
    let (file_writer, guard) = match file_writer(cfg) {
        Some((writer, guard)) => (Some(writer), Some(guard)),
        None => (None, None),
    };

    match cfg.format {
        LogFormat::Json => {
            let console = tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(std::io::stdout);
            let file = file_writer.map(|writer| {
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_timer(UtcTime::rfc_3339())
                    .with_writer(writer)
            });
            let _ = tracing_subscriber::registry()
                .with(env_filter(cfg))
                .with(console)
                .with(file)
                .try_init();
        }
        LogFormat::Text => {
            let console = tracing_subscriber::fmt::layer()
                .with_ansi(true)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(std::io::stdout);
            let file = file_writer.map(|writer| {
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_timer(UtcTime::rfc_3339())
                    .with_writer(writer)
            });
            let _ = tracing_subscriber::registry()
                .with(env_filter(cfg))
                .with(console)
                .with(file)
                .try_init();
        }
    }

    guard
}

/// Level resolution order: `LOG_LEVEL` from config, then `RUST_LOG`, then
/// "info".
fn env_filter(cfg: &LoggingConfig) -> EnvFilter {
    match &cfg.level {
        Some(level) => EnvFilter::new(level.as_str()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

/// Non-blocking writer over the rolling log file, or `None` when file
/// logging is off or the directory cannot be created (the server then runs
/// on console logs alone).
fn file_writer(cfg: &LoggingConfig) -> Option<(NonBlocking, WorkerGuard)> {
    if !cfg.enable_file_logging {
        return None;
    }
    if let Err(err) = std::fs::create_dir_all(&cfg.dir) {
        eprintln!(
            "Failed to create log directory '{}': {err}; continuing with console logs only",
            cfg.dir
        );
        return None;
    }
    let appender = RollingFileAppender::new(parse_rotation(&cfg.rotation), &cfg.dir, &cfg.filename);
    Some(tracing_appender::non_blocking(appender))
}

/// `LOG_ROTATION` accepts "daily", "hourly", or "never"; anything else
/// falls back to daily.
fn parse_rotation(raw: &str) -> Rotation {
    match raw.to_ascii_lowercase().as_str() {
        "hourly" => Rotation::HOURLY,
        "never" => Rotation::NEVER,
        "daily" => Rotation::DAILY,
        other => {
            eprintln!("Unknown LOG_ROTATION '{other}', using daily");
            Rotation::DAILY
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_config(dir: &std::path::Path) -> LoggingConfig {
        LoggingConfig {
            enable_file_logging: true,
            dir: dir.to_string_lossy().into_owned(),
            ..LoggingConfig::default()
        }
    }

    #[test]
    fn test_parse_rotation() {
        assert_eq!(parse_rotation("daily"), Rotation::DAILY);
        assert_eq!(parse_rotation("HOURLY"), Rotation::HOURLY);
        assert_eq!(parse_rotation("never"), Rotation::NEVER);
        assert_eq!(parse_rotation("weekly"), Rotation::DAILY);
        assert_eq!(parse_rotation(""), Rotation::DAILY);
    }

    #[test]
    fn test_file_writer_disabled_by_default() {
        let cfg = LoggingConfig::default();
        assert!(file_writer(&cfg).is_none());
    }

    #[test]
    fn test_file_writer_creates_missing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("logs").join("server");
        let cfg = file_config(&dir);

        let writer = file_writer(&cfg);
        assert!(writer.is_some());
        assert!(dir.is_dir(), "log directory is created on demand");
    }

    #[test]
    fn test_file_writer_falls_back_when_directory_unwritable() {
        // A plain file where the directory should go makes create_dir_all
        // fail; logging falls back to console-only instead of erroring.
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("logs");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let cfg = file_config(&blocker);
        assert!(file_writer(&cfg).is_none());
    }

    #[test]
    fn test_env_filter_prefers_configured_level() {
        use crate::config::LogLevel;
        let cfg = LoggingConfig {
            level: Some(LogLevel::Debug),
            ..LoggingConfig::default()
        };
        assert_eq!(env_filter(&cfg).to_string(), "debug");
    }
}
