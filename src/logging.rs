//! Daemon logging setup.
//!
//! # Example
//!
//! ```rust,no_run
//! use hybris_location::logging::init_logging;
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(None)?;
//!     tracing::info!("Provider started");
//!     Ok(())
//! }
//! ```

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Log file name inside the log directory.
pub const LOG_FILE: &str = "daemon.log";

pub fn log_file_path(log_dir: &Path) -> PathBuf {
    log_dir.join(LOG_FILE)
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize logging.
///
/// With a `log_dir`, writes plain-text logs to `<log_dir>/daemon.log`;
/// otherwise logs go to stderr. The level comes from `RUST_LOG` and
/// defaults to `info`.
pub fn init_logging(log_dir: Option<&Path>) -> Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter());

    match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir).context("Failed to create log directory")?;
            let file = File::create(log_file_path(dir)).context("Failed to create log file")?;
            let subscriber = registry.with(
                fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false)
                    .with_target(true)
                    .with_thread_names(true),
            );
            tracing::subscriber::set_global_default(subscriber)
                .context("Failed to set subscriber")?;
        }
        None => {
            let subscriber = registry.with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            );
            tracing::subscriber::set_global_default(subscriber)
                .context("Failed to set subscriber")?;
        }
    }

    Ok(())
}

/// Initialize file logging with daily rotation.
///
/// Older logs are kept as `daemon.log.YYYY-MM-DD`.
#[cfg(feature = "log-rotation")]
pub fn init_logging_with_rotation(log_dir: &Path) -> Result<()> {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};

    fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE);

    let subscriber = tracing_subscriber::registry().with(env_filter()).with(
        fmt::layer()
            .with_writer(file_appender)
            .with_ansi(false)
            .with_target(true),
    );

    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")?;

    Ok(())
}
