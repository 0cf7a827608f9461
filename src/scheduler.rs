//! Periodic snapshot production.
//!
//! The scheduler takes a snapshot of the aggregator at a fixed cadence and
//! hands it to a [`SnapshotSink`]. Producing state and displaying it are
//! decoupled: ingest keeps running at whatever rate the scanner delivers,
//! while consumers see one ranked list per period.
//!
//! Ticks are fixed-rate: they land on `start + k * period`. When a consumer
//! overruns a period the missed ticks are skipped rather than replayed in a
//! burst, so a slow consumer cannot build up lag.

use crate::aggregator::{Aggregator, Snapshot, SnapshotPolicy};
use std::io;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default time between snapshots.
pub const DEFAULT_PERIOD: Duration = Duration::from_millis(500);

/// Source of "now" for snapshot freshness.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Errors a consumer can report for a single snapshot.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("could not render snapshot: {0}")]
    Format(String),
}

/// Receives every snapshot the scheduler produces.
///
/// `consume` runs on the scheduler task. An error drops that one snapshot;
/// the next tick proceeds as usual. A panicking consumer ends the loop, and
/// [`SnapshotScheduler::stop`] then returns [`SchedulerError::Join`].
pub trait SnapshotSink: Send + 'static {
    fn consume(&mut self, snapshot: &Snapshot) -> Result<(), SinkError>;
}

/// Errors returned by the scheduler itself.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("snapshot period must be greater than zero")]
    ZeroPeriod,
    #[error("scheduler task failed: {0}")]
    Join(#[from] JoinError),
}

/// Scheduler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub period: Duration,
    pub policy: SnapshotPolicy,
    /// Forget devices unseen for this long after each tick. `None` keeps
    /// every device for the life of the process.
    pub evict_after: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD,
            policy: SnapshotPolicy::default(),
            evict_after: None,
        }
    }
}

/// Handle to a running snapshot loop.
///
/// Dropping the handle without calling [`SnapshotScheduler::stop`] also ends
/// the loop, but the sink is lost.
#[derive(Debug)]
pub struct SnapshotScheduler<S> {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<S>,
}

impl<S: SnapshotSink> SnapshotScheduler<S> {
    /// Spawn the snapshot loop on the current tokio runtime.
    ///
    /// The first snapshot is taken immediately.
    pub fn start(
        aggregator: Arc<Aggregator>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
        sink: S,
    ) -> Result<Self, SchedulerError> {
        if config.period.is_zero() {
            return Err(SchedulerError::ZeroPeriod);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_loop(aggregator, clock, config, sink, stop_rx));
        Ok(Self { stop_tx, task })
    }

    /// Stop ticking and hand back the sink.
    ///
    /// A tick already running completes first; none starts afterwards.
    pub async fn stop(self) -> Result<S, SchedulerError> {
        // The receiver is gone only if the loop already exited.
        let _ = self.stop_tx.send(true);
        Ok(self.task.await?)
    }
}

async fn run_loop<S: SnapshotSink>(
    aggregator: Arc<Aggregator>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    mut sink: S,
    mut stop_rx: watch::Receiver<bool>,
) -> S {
    let mut ticker = time::interval(config.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(period = ?config.period, "snapshot scheduler started");

    loop {
        tokio::select! {
            biased;
            // Fires on stop, or when the handle is dropped.
            _ = stop_rx.changed() => break,
            _ = ticker.tick() => {}
        }

        // No await points from here on: a tick cannot be interrupted.
        tick(&aggregator, clock.as_ref(), &config, &mut sink);
    }

    info!("snapshot scheduler stopped");
    sink
}

fn tick<S: SnapshotSink>(
    aggregator: &Aggregator,
    clock: &dyn Clock,
    config: &SchedulerConfig,
    sink: &mut S,
) {
    let now = clock.now();
    let snapshot = aggregator.snapshot(now, &config.policy);
    debug!(
        visible = snapshot.len(),
        tracked = aggregator.len(),
        "snapshot taken"
    );

    if let Err(error) = sink.consume(&snapshot) {
        warn!(%error, "snapshot consumer failed, skipping this cycle");
    }

    if let Some(older_than) = config.evict_after {
        let evicted = aggregator.evict_unseen(now, older_than);
        if evicted > 0 {
            debug!(evicted, "evicted unseen devices");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TEST_MAC, at, event, mac};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    struct FixedClock(SystemTime);

    impl Clock for FixedClock {
        fn now(&self) -> SystemTime {
            self.0
        }
    }

    fn fixed_clock(secs: u64) -> Arc<dyn Clock> {
        Arc::new(FixedClock(at(secs)))
    }

    #[derive(Default)]
    struct RecordingSink {
        snapshots: Vec<Snapshot>,
        ticks: Vec<Instant>,
    }

    impl SnapshotSink for RecordingSink {
        fn consume(&mut self, snapshot: &Snapshot) -> Result<(), SinkError> {
            self.snapshots.push(snapshot.clone());
            self.ticks.push(Instant::now());
            Ok(())
        }
    }

    /// Fails every other snapshot.
    #[derive(Default)]
    struct FlakySink {
        calls: usize,
        delivered: usize,
    }

    impl SnapshotSink for FlakySink {
        fn consume(&mut self, _snapshot: &Snapshot) -> Result<(), SinkError> {
            self.calls += 1;
            if self.calls % 2 == 1 {
                return Err(SinkError::Format("display went away".to_string()));
            }
            self.delivered += 1;
            Ok(())
        }
    }

    struct CountingSink(Arc<AtomicUsize>);

    impl SnapshotSink for CountingSink {
        fn consume(&mut self, _snapshot: &Snapshot) -> Result<(), SinkError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_at_fixed_period() {
        let aggregator = Arc::new(Aggregator::new());
        let scheduler = SnapshotScheduler::start(
            aggregator,
            fixed_clock(0),
            SchedulerConfig::default(),
            RecordingSink::default(),
        )
        .unwrap();

        time::sleep(Duration::from_millis(1_250)).await;
        let sink = scheduler.stop().await.unwrap();

        // 0 ms, 500 ms, 1000 ms
        assert_eq!(sink.snapshots.len(), 3);
        for pair in sink.ticks.windows(2) {
            assert_eq!(pair[1] - pair[0], DEFAULT_PERIOD);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_overrun_skips_missed_ticks_and_keeps_grid() {
        /// Blocks for 1.4 periods on its first snapshot.
        #[derive(Default)]
        struct OverrunOnce {
            ticks: Vec<Instant>,
        }

        impl SnapshotSink for OverrunOnce {
            fn consume(&mut self, _snapshot: &Snapshot) -> Result<(), SinkError> {
                self.ticks.push(Instant::now());
                if self.ticks.len() == 1 {
                    std::thread::sleep(Duration::from_millis(700));
                }
                Ok(())
            }
        }

        let scheduler = SnapshotScheduler::start(
            Arc::new(Aggregator::new()),
            fixed_clock(0),
            SchedulerConfig::default(),
            OverrunOnce::default(),
        )
        .unwrap();

        time::sleep(Duration::from_millis(1_800)).await;
        let sink = scheduler.stop().await.unwrap();

        let offsets: Vec<Duration> = sink.ticks.iter().map(|t| *t - sink.ticks[0]).collect();
        // The 500 ms tick is dropped, not fired late at 700 ms, and the ticks
        // after it are back on the 500 ms grid.
        assert_eq!(offsets.len(), 3, "ticks at {offsets:?}");
        let tolerance = Duration::from_millis(100);
        for (offset, expected_ms) in offsets[1..].iter().zip([1_000, 1_500]) {
            let expected = Duration::from_millis(expected_ms);
            assert!(
                offset.abs_diff(expected) < tolerance,
                "tick at {offset:?}, expected {expected:?} (all ticks {offsets:?})"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_consumer_ends_loop() {
        struct PanicSink;

        impl SnapshotSink for PanicSink {
            fn consume(&mut self, _snapshot: &Snapshot) -> Result<(), SinkError> {
                panic!("consumer blew up");
            }
        }

        let scheduler = SnapshotScheduler::start(
            Arc::new(Aggregator::new()),
            fixed_clock(0),
            SchedulerConfig::default(),
            PanicSink,
        )
        .unwrap();

        time::sleep(Duration::from_millis(750)).await;
        assert!(matches!(
            scheduler.stop().await,
            Err(SchedulerError::Join(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshots_follow_aggregator_state() {
        let aggregator = Arc::new(Aggregator::new());
        aggregator.ingest(event(TEST_MAC, Some("Foo"), -60, 100));

        let scheduler = SnapshotScheduler::start(
            Arc::clone(&aggregator),
            fixed_clock(100),
            SchedulerConfig::default(),
            RecordingSink::default(),
        )
        .unwrap();

        time::sleep(Duration::from_millis(250)).await;
        aggregator.ingest(event(mac(1), Some("Bar"), -30, 100));
        time::sleep(Duration::from_millis(500)).await;

        let sink = scheduler.stop().await.unwrap();
        assert_eq!(sink.snapshots.len(), 2);
        assert_eq!(sink.snapshots[0].len(), 1);
        let names: Vec<&str> = sink.snapshots[1]
            .iter()
            .map(|d| d.display_name())
            .collect();
        assert_eq!(names, vec!["Bar", "Foo"]);
        assert!(sink.snapshots.iter().all(|s| s.taken_at == at(100)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_consumer_failure_does_not_stop_ticks() {
        let scheduler = SnapshotScheduler::start(
            Arc::new(Aggregator::new()),
            fixed_clock(0),
            SchedulerConfig::default(),
            FlakySink::default(),
        )
        .unwrap();

        time::sleep(Duration::from_millis(1_750)).await;
        let sink = scheduler.stop().await.unwrap();

        assert_eq!(sink.calls, 4);
        assert_eq!(sink.delivered, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ticks_after_stop() {
        let count = Arc::new(AtomicUsize::new(0));
        let scheduler = SnapshotScheduler::start(
            Arc::new(Aggregator::new()),
            fixed_clock(0),
            SchedulerConfig::default(),
            CountingSink(Arc::clone(&count)),
        )
        .unwrap();

        time::sleep(Duration::from_millis(750)).await;
        scheduler.stop().await.unwrap();
        let stopped_at = count.load(Ordering::SeqCst);
        assert_eq!(stopped_at, 2);

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), stopped_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_halts_loop() {
        let count = Arc::new(AtomicUsize::new(0));
        let scheduler = SnapshotScheduler::start(
            Arc::new(Aggregator::new()),
            fixed_clock(0),
            SchedulerConfig::default(),
            CountingSink(Arc::clone(&count)),
        )
        .unwrap();

        time::sleep(Duration::from_millis(250)).await;
        drop(scheduler);
        time::sleep(Duration::from_secs(5)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_period_rejected() {
        let config = SchedulerConfig {
            period: Duration::ZERO,
            ..SchedulerConfig::default()
        };
        let result = SnapshotScheduler::start(
            Arc::new(Aggregator::new()),
            fixed_clock(0),
            config,
            RecordingSink::default(),
        );
        assert!(matches!(result, Err(SchedulerError::ZeroPeriod)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_runs_after_tick_when_configured() {
        let aggregator = Arc::new(Aggregator::new());
        aggregator.ingest(event(mac(1), Some("Old"), -50, 0));
        aggregator.ingest(event(mac(2), Some("New"), -50, 7_000));

        let config = SchedulerConfig {
            evict_after: Some(Duration::from_secs(3_600)),
            ..SchedulerConfig::default()
        };
        let scheduler = SnapshotScheduler::start(
            Arc::clone(&aggregator),
            fixed_clock(7_200),
            config,
            RecordingSink::default(),
        )
        .unwrap();

        time::sleep(Duration::from_millis(100)).await;
        scheduler.stop().await.unwrap();

        assert_eq!(aggregator.len(), 1);
        assert!(aggregator.get(&mac(2)).is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_lets_running_tick_finish() {
        use std::sync::atomic::AtomicBool;

        struct SlowSink {
            started: Arc<AtomicBool>,
            finished: Arc<AtomicBool>,
            calls: usize,
        }

        impl SnapshotSink for SlowSink {
            fn consume(&mut self, _snapshot: &Snapshot) -> Result<(), SinkError> {
                self.calls += 1;
                self.started.store(true, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(100));
                self.finished.store(true, Ordering::SeqCst);
                Ok(())
            }
        }

        let started = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let scheduler = SnapshotScheduler::start(
            Arc::new(Aggregator::new()),
            fixed_clock(0),
            SchedulerConfig::default(),
            SlowSink {
                started: Arc::clone(&started),
                finished: Arc::clone(&finished),
                calls: 0,
            },
        )
        .unwrap();

        while !started.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        let sink = scheduler.stop().await.unwrap();

        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(sink.calls, 1);
    }
}
