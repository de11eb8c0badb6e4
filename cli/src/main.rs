//! speedlog - periodic internet-speed measurement logger
//!
//! Drives the measurement scheduler on a fixed interval until the
//! configured number of iterations is done. Ctrl+C pauses the run and
//! exits after draining any in-flight cycle.

use anyhow::{Context, Result};
use clap::Parser;
use speedlog_core::config::Config;
use speedlog_core::scheduler::{MeasurementScheduler, log_events};
use speedlog_core::{NetworkContext, ProbeRunner, ResultStore};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "speedlog")]
#[command(version = "0.1.0")]
#[command(about = "Periodic internet-speed measurement logger", long_about = None)]
struct Args {
    /// Configuration file path (defaults are used when absent)
    #[arg(short, long, default_value = "speedlog.conf")]
    config: PathBuf,

    /// Tick interval in seconds, 20..3600 (overrides the config file)
    #[arg(short, long)]
    frequency: Option<u64>,

    /// Number of measurements to run, 1..1000 (overrides the config file)
    #[arg(short, long)]
    iterations: Option<u32>,

    /// Erase the record log and the application log, then exit
    #[arg(long)]
    erase: bool,
}

/// Level filter from the config, overridable through the environment.
/// An unparsable level falls back to INFO rather than aborting startup.
fn log_filter(level: &str) -> EnvFilter {
    let directive = level
        .parse()
        .unwrap_or_else(|_| tracing::Level::INFO.into());
    EnvFilter::from_default_env().add_directive(directive)
}

/// The application log file that erase-all later deletes.
fn open_log_file(path: &Path) -> std::io::Result<File> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load_or_default(&args.config)?;
    if let Some(frequency) = args.frequency {
        config.schedule.frequency_secs = frequency;
    }
    if let Some(iterations) = args.iterations {
        config.schedule.iterations = iterations;
    }
    speedlog_core::validate_params(config.schedule.frequency_secs, config.schedule.iterations)?;

    let log_file = open_log_file(&config.storage.log_path)
        .with_context(|| format!("failed to open log file {:?}", config.storage.log_path))?;
    tracing_subscriber::registry()
        .with(log_filter(&config.logging.level))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(log_file)),
        )
        .init();

    let store = Arc::new(ResultStore::new(&config.storage));

    if args.erase {
        store.erase_all()?;
        info!(
            "erased {:?} and {:?}",
            config.storage.records_path, config.storage.log_path
        );
        return Ok(());
    }

    info!(
        "speedlog starting: every {}s, {} iterations, records at {:?}",
        config.schedule.frequency_secs, config.schedule.iterations, config.storage.records_path
    );

    let network = Arc::new(NetworkContext::new(&config.network));
    let probe = Arc::new(ProbeRunner::new(&config.probe));
    let (mut scheduler, events) =
        MeasurementScheduler::new(&config.schedule, store, network, probe);

    let listener = tokio::spawn(log_events(events));

    scheduler.start();
    let mut interval = tokio::time::interval(Duration::from_secs(
        scheduler.state().frequency_secs,
    ));
    interval.tick().await; // the first tick of a tokio interval is immediate

    loop {
        tokio::select! {
            _ = interval.tick() => {
                scheduler.tick();
                info!("{}", scheduler.status_string());
                if scheduler.state().done {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                scheduler.pause();
                info!("interrupted: {}", scheduler.status_string());
                break;
            }
        }
    }

    let final_status = scheduler.status_string();

    // Dropping the scheduler closes its event sender; the listener then
    // ends once every in-flight cycle has finished and reported.
    drop(scheduler);
    listener.await?;

    info!("speedlog finished: {final_status}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_layer_writes_to_the_log_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("speedlog.log");
        let file = open_log_file(&path).unwrap();

        let subscriber = tracing_subscriber::registry()
            .with(log_filter("info"))
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            );
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("log file smoke line");
        });

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("log file smoke line"));
    }

    #[test]
    fn open_log_file_appends_across_reopens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("speedlog.log");
        {
            use std::io::Write;
            let mut file = open_log_file(&path).unwrap();
            writeln!(file, "first run").unwrap();
        }
        {
            use std::io::Write;
            let mut file = open_log_file(&path).unwrap();
            writeln!(file, "second run").unwrap();
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("first run"));
        assert!(contents.contains("second run"));
    }

    #[test]
    fn unparsable_level_falls_back_without_panicking() {
        let _ = log_filter("not-a-level");
        let _ = log_filter("debug");
    }
}
