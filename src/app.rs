//! Core application runner for `blewatch`.
//!
//! This module is intentionally decoupled from CLI parsing and process exit codes
//! so it can be tested deterministically with an injected scanner, clock and
//! output stream.

use crate::aggregator::{Aggregator, DEFAULT_STALE_AFTER, SnapshotPolicy};
use crate::advertisement::EventResult;
use crate::output::{Format, WriterSink};
use crate::scanner::{Backend, ScanError, Source};
use crate::scheduler::{
    Clock, DEFAULT_PERIOD, SchedulerConfig, SchedulerError, SinkError, SnapshotScheduler,
    SnapshotSink,
};
use clap::Parser;
use std::future::Future;
use std::io::{self, Write};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Configuration for the core run loop.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Where advertisements come from
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,

    /// Input for the replay backend, `-` for stdin
    #[arg(long, default_value = "-")]
    pub input: PathBuf,

    /// How snapshots are written to stdout
    #[arg(long, default_value_t, value_enum)]
    pub format: Format,

    /// The name of the measurement in InfluxDB line protocol.
    #[arg(long, default_value = "ble_device")]
    pub influxdb_measurement: String,

    /// Time between snapshots.
    /// Accepts duration with suffix: 500ms, 3s, 1m, 2h.
    /// Without suffix, value is interpreted as seconds.
    #[arg(long, value_parser = crate::duration::parse_duration, default_value = "500ms")]
    pub period: Duration,

    /// Hide devices not seen for longer than this
    #[arg(long, value_parser = crate::duration::parse_duration, default_value = "300s")]
    pub stale_after: Duration,

    /// Forget devices not seen for longer than this. By default every device
    /// is remembered for the life of the process.
    #[arg(long, value_parser = crate::duration::parse_duration)]
    pub evict_after: Option<Duration>,

    /// Also list devices that never advertised a name
    #[arg(short = 'a', long)]
    pub include_unnamed: bool,

    /// Verbose output, print rejected advertisement reports
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            input: PathBuf::from("-"),
            format: Format::default(),
            influxdb_measurement: "ble_device".to_string(),
            period: DEFAULT_PERIOD,
            stale_after: DEFAULT_STALE_AFTER,
            evict_after: None,
            include_unnamed: false,
            verbose: false,
        }
    }
}

impl Options {
    pub fn source(&self) -> Source {
        Source::new(self.backend, self.input.clone())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            period: self.period,
            policy: SnapshotPolicy {
                include_unnamed: self.include_unnamed,
                stale_after: self.stale_after,
            },
            evict_after: self.evict_after,
        }
    }
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Scanner abstraction to enable deterministic unit tests without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    fn start_scan(
        &self,
        source: Source,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<EventResult>, ScanError>> + Send + '_>>;
}

/// Real scanner implementation that delegates to the compiled-in backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn start_scan(
        &self,
        source: Source,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<EventResult>, ScanError>> + Send + '_>>
    {
        Box::pin(crate::scanner::start_scan(source))
    }
}

/// Run until the source is exhausted or `shutdown` completes.
///
/// - Events are ingested as they arrive; rejected reports go to `err` only when
///   `options.verbose` is true.
/// - Snapshots are written to `out` every `options.period`, plus one final
///   snapshot after the scheduler stops, so a finite source always produces output.
///
/// Returns `out` once the scheduler has released it.
pub async fn run_with_io<W, F>(
    options: Options,
    scanner: &dyn Scanner,
    clock: Arc<dyn Clock>,
    out: W,
    err: &mut dyn Write,
    shutdown: F,
) -> Result<W, RunError>
where
    W: Write + Send + 'static,
    F: Future<Output = ()>,
{
    let aggregator = Arc::new(Aggregator::new());
    let config = options.scheduler_config();
    let formatter = options.format.formatter(&options.influxdb_measurement);

    let mut events = scanner.start_scan(options.source()).await?;
    let scheduler = SnapshotScheduler::start(
        Arc::clone(&aggregator),
        Arc::clone(&clock),
        config,
        WriterSink::new(formatter, out),
    )?;

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
            next = events.recv() => match next {
                Some(Ok(event)) => aggregator.ingest(event),
                Some(Err(rejected)) => {
                    debug!(%rejected, "rejected advertisement report");
                    if options.verbose {
                        writeln!(err, "{rejected}")?;
                    }
                }
                None => {
                    info!("advertisement source closed");
                    break;
                }
            }
        }
    }

    let mut sink = scheduler.stop().await?;
    let last = aggregator.snapshot(clock.now(), &config.policy);
    sink.consume(&last)?;
    info!(
        tracked = aggregator.len(),
        ingested = aggregator.ingested(),
        "finished"
    );

    Ok(sink.into_inner())
}
