use std::fs;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::infrastructure::config::LoggingConfig;

/// Keeps the background log writer alive; dropping it flushes and stops
/// file logging.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize console logging plus an optional daily rolling log file.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{}={level},tower_http={level},sqlx=warn",
            env!("CARGO_CRATE_NAME"),
            level = config.log_level
        ))
    });

    let mut layers: Vec<Box<dyn Layer<_> + Send + Sync>> = Vec::new();

    let console_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true);
    if config.enable_json {
        layers.push(console_layer.json().boxed());
    } else {
        layers.push(console_layer.with_ansi(true).boxed());
    }

    let mut file_guard = None;
    if let Some(log_dir) = &config.log_dir {
        fs::create_dir_all(log_dir)?;
        let appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "banking-ledger.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        file_guard = Some(guard);

        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_target(false)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false);
        layers.push(file_layer.boxed());
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}
