// Logging module - Logging infrastructure
use crate::domain::error::{RelayError, RelayResult};
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is not set.
pub fn default_filter(level: &str) -> String {
    format!("ttyrelay={}", level)
}

/// Initialize logging system
///
/// Output goes to `log_file` when given so it never lands in the middle of
/// the raw console, otherwise to stderr.
pub fn init_logging(level: &str, log_file: Option<&Path>) -> RelayResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(level)));

    let (writer, ansi) = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| RelayError::Config {
                    message: format!("Could not open log file '{}': {}", path.display(), e),
                })?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(io::stderr), true),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(ansi)
                .with_target(true)
                .with_level(true)
                .with_file(true)
                .with_line_number(true),
        )
        .try_init()
        .map_err(|e| RelayError::Config {
            message: format!("Failed to initialize logging: {}", e),
        })?;

    tracing::debug!("ttyrelay logging system initialized");
    Ok(())
}
