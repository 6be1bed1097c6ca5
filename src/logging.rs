//! Tracing setup: a compact stdout layer plus a daily-rotated file layer.

use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize the tracing subscriber. `level` is the default filter; the
/// `RUST_LOG` environment variable overrides it when set.
///
/// Panics if a subscriber is already installed.
pub fn init_logging<P: AsRef<Path>>(
    log_dir: P,
    level: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let log_path = log_dir.as_ref();
    std::fs::create_dir_all(log_path)?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file_appender = tracing_appender::rolling::daily(log_path, "crawler.log");
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_target(true)
        .with_ansi(false)
        .compact()
        .with_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        );

    let stdout_layer = fmt::layer()
        .with_target(false)
        .compact()
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .init();

    // The guard must outlive the program for the background writer to keep
    // flushing.
    Box::leak(Box::new(file_guard));

    tracing::debug!("logging initialized, files under {}", log_path.display());
    Ok(())
}
