use std::path::Path;
use thiserror::Error;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_FILE_NAME: &str = "monitord_relay.log";

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Cannot open log file '{path}': {source}")]
    LogFile {
        path: String,
        #[source]
        source: InitError,
    },
    #[error("Failed to install the tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

/// Opens `log_path` for appending, creating missing parent directories.
/// Rotation of the file is left to the system's logrotate.
pub fn log_file_appender(log_path: &Path) -> Result<RollingFileAppender, LoggingError> {
    let directory = match log_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = log_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_LOG_FILE_NAME.to_string());

    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(directory)
        .map_err(|source| LoggingError::LogFile {
            path: log_path.display().to_string(),
            source,
        })
}

/// Installs the process-wide subscriber: human-readable output on stdout and
/// JSON lines appended to `log_path`.
///
/// `RUST_LOG` takes precedence over `default_directive` when set.
pub fn init_logging(default_directive: &str, log_path: &Path) -> Result<(), LoggingError> {
    let file_layer = fmt::layer()
        .with_writer(log_file_appender(log_path)?)
        .with_ansi(false)
        .json();

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_is_created_with_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("nested").join("relay.log");

        log_file_appender(&log_path).unwrap();

        assert!(log_path.is_file());
    }

    #[test]
    fn test_unusable_log_path_is_an_error() {
        // A regular file cannot act as the log directory.
        let not_a_directory = tempfile::NamedTempFile::new().unwrap();
        let log_path = not_a_directory.path().join("relay.log");

        let err = log_file_appender(&log_path).unwrap_err();

        assert!(matches!(err, LoggingError::LogFile { .. }));
        assert!(err.to_string().contains("relay.log"));
    }

    #[test]
    fn test_init_logging_reports_unusable_log_path() {
        let not_a_directory = tempfile::NamedTempFile::new().unwrap();
        let log_path = not_a_directory.path().join("relay.log");

        assert!(matches!(
            init_logging("info", &log_path),
            Err(LoggingError::LogFile { .. })
        ));
    }
}
