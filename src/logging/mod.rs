//! Structured logging for the discovery engine
//!
//! Console output goes to stderr so JSON results on stdout stay clean.
//! A JSON copy of every event is written to a daily rotating file under
//! the platform config directory: `<config>/netinv/logs/netinv.log.YYYY-MM-DD`.

pub mod macros;
pub mod redact;

use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub use redact::{mask_json_secrets, mask_secret};

/// Initialize the logging system
///
/// Set `RUST_LOG` to control the level (`info` when unset), e.g.
/// `RUST_LOG=netinv_core=debug`.
pub fn init_logging() -> Result<PathBuf, Box<dyn std::error::Error>> {
    let log_dir = get_log_directory()?;
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "netinv.log");

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .compact();

    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .json();

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let init_result = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    if let Err(e) = init_result {
        // Tests and embedding hosts may have installed a subscriber already.
        if e.to_string().contains("already been set") {
            return Ok(log_dir);
        }
        return Err(Box::new(e));
    }

    tracing::info!("Logging initialized. Log directory: {}", log_dir.display());

    Ok(log_dir)
}

fn get_log_directory() -> Result<PathBuf, Box<dyn std::error::Error>> {
    let base_dir = if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .ok_or("Could not find local data directory")?
            .join("netinv")
    } else {
        dirs::config_dir()
            .ok_or("Could not find config directory")?
            .join("netinv")
    };

    Ok(base_dir.join("logs"))
}

/// Path of today's log file
pub fn get_current_log_file() -> Result<PathBuf, Box<dyn std::error::Error>> {
    let log_dir = get_log_directory()?;
    let today = chrono::Local::now().format("%Y-%m-%d").to_string();
    Ok(log_dir.join(format!("netinv.log.{}", today)))
}
