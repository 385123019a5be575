use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_DIR: &str = "logs";

fn env_filter(level: &str) -> EnvFilter {
    // other crates only report warnings
    EnvFilter::try_new(format!("warn,kraken_report={}", level))
        .unwrap_or_else(|_| EnvFilter::new("warn,kraken_report=info"))
}

/// Installs the console logger and, when `log_to_file` is set, a JSON file
/// logger under `logs/`. The returned guard flushes the file on drop and has
/// to live as long as logging is used.
pub(crate) fn init(level: &str, log_to_file: bool) -> Result<Option<WorkerGuard>> {
    let console_layer = fmt::Layer::new()
        .pretty()
        .with_filter(env_filter(level));

    if !log_to_file {
        tracing_subscriber::registry()
            .with(console_layer)
            .try_init()?;
        return Ok(None);
    }

    let log_dir = Path::new(LOG_DIR);
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
    let file_name = format!("{}.log", chrono::Local::now().format("%Y-%m-%d_%H-%M-%S"));

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::Layer::new()
        .json()
        .with_writer(non_blocking)
        .with_filter(env_filter(level));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(Some(guard))
}
