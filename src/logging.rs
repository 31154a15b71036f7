//! Tracing setup: stderr always, plus a daily-rolling file when configured.

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Install the global subscriber. Keep the returned guard alive until exit so
/// buffered file output is flushed.
///
/// An unusable log file is an error; the subscriber is not installed then.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
  let stderr_layer = fmt::layer().with_target(true).with_writer(std::io::stderr);

  match &config.file {
    Some(path) => {
      let (writer, guard) = tracing_appender::non_blocking(file_writer(path)?);
      let file_layer = fmt::layer().with_ansi(false).with_writer(writer);

      tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .init();
      Ok(None)
    }
  }
}

/// Daily-rolling appender whose files are named after `path` and live beside it.
fn file_writer(path: &Path) -> Result<RollingFileAppender> {
  let dir = path
    .parent()
    .filter(|p| !p.as_os_str().is_empty())
    .unwrap_or(Path::new("."));
  std::fs::create_dir_all(dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
  let file_name = path
    .file_name()
    .and_then(|n| n.to_str())
    .unwrap_or("ansury-sw.log");

  RollingFileAppender::builder()
    .rotation(Rotation::DAILY)
    .filename_prefix(file_name)
    .build(dir)
    .map_err(|e| eyre!("Failed to open log file {}: {}", path.display(), e))
}
