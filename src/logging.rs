//! Tracing subscriber setup for the binary.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Install the global subscriber.
///
/// The filter comes from `RUST_LOG`, falling back to `default_level`. When
/// `log_dir` is set, logs also go to a daily rolling file there; keep the
/// returned guard alive so buffered lines are flushed on exit.
pub fn init_logging(default_level: &str, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(default_level).unwrap_or_else(|_| {
            eprintln!("Invalid log level '{default_level}', defaulting to 'info'");
            EnvFilter::new("info")
        })
    });

    let stdout_layer = fmt::layer().with_target(false);

    match log_dir {
        Some(dir) => {
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "orchestrator.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer().with_ansi(false).with_writer(writer);

            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .init();
            None
        }
    }
}
