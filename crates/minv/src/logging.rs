//! Process-wide logging setup.
//!
//! Library code logs through the `log` macros. The daemon installs a
//! `tracing` fmt subscriber and forwards `log` records into it.

use std::fs::OpenOptions;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing_log::LogTracer;
use tracing_subscriber::EnvFilter;

use crate::config::schema::LogConfig;
use crate::error::ConfigError;

pub const LOG_FILE_NAME: &str = "minv.log";

static INITIALIZED: AtomicBool = AtomicBool::new(false);

fn filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber. `RUST_LOG` overrides `log.level`. With
/// `log.directory` set, output is appended to `minv.log` in that directory
/// instead of stderr. Calling this again is a no-op.
pub fn init_logging(config: &LogConfig) -> Result<(), ConfigError> {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    LogTracer::init().map_err(|e| ConfigError::Logging(e.to_string()))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(config))
        .with_target(true)
        .with_thread_names(true);

    let installed = match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| ConfigError::WriteFile {
                path: dir.clone(),
                source: e,
            })?;
            let path = dir.join(LOG_FILE_NAME);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| ConfigError::WriteFile { path, source: e })?;
            tracing::subscriber::set_global_default(
                builder.with_ansi(false).with_writer(Mutex::new(file)).finish(),
            )
        }
        None => tracing::subscriber::set_global_default(
            builder.with_writer(std::io::stderr).finish(),
        ),
    };
    installed.map_err(|e| ConfigError::Logging(e.to_string()))
}
