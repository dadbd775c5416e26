//! Tracing subsystem initialisation.

use anyhow::Context;
use std::path::Path;
use tracing::metadata::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Maps the `-d` debug level onto a tracing filter.
pub fn level_filter(debug: u8) -> LevelFilter {
    match debug {
        0 => LevelFilter::ERROR,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Configures and initialises the tracing subscriber.
///
/// The filter starts from `level` and can be extended through `RUST_LOG`.
/// With a logfile, events go through a non-blocking appender; the returned
/// guard must stay alive for the lifetime of the process or trailing
/// events are lost.
pub fn init(level: LevelFilter, logfile: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    match logfile {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open logfile {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);

            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false),
                )
                .try_init()
                .context("cannot initialise tracing")?;

            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .try_init()
                .context("cannot initialise tracing")?;

            Ok(None)
        }
    }
}

#[cfg(test)]
mod levels {
    use super::*;

    #[test]
    fn debug_flag_mapping() {
        assert_eq!(level_filter(0), LevelFilter::ERROR);
        assert_eq!(level_filter(1), LevelFilter::INFO);
        assert_eq!(level_filter(2), LevelFilter::DEBUG);
        assert_eq!(level_filter(3), LevelFilter::TRACE);
        assert_eq!(level_filter(200), LevelFilter::TRACE);
    }
}
