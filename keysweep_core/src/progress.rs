//! Attempt counting and periodic progress reporting.
//!
//! Every executor owns one [`AttemptCounter`] and is the only writer to it.
//! The [`ProgressAggregator`] periodically sums all counters registered in the
//! [`CounterRegistry`] and hands a [`ProgressSnapshot`] to a [`Reporter`].
//! Counters are never unregistered, so an executor that stops early keeps
//! contributing its final count and one that starts late is picked up on the
//! next sample.

use crate::executor::panic_message;
use crate::state::SearchState;
use crossbeam_channel::{Receiver, select, tick};
use crossbeam_utils::CachePadded;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Default cadence of progress snapshots.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Monotonic per-executor attempt counter.
#[derive(Debug, Default)]
pub struct AttemptCounter {
    attempts: CachePadded<AtomicU64>,
}

impl AttemptCounter {
    #[inline]
    pub fn increment(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }
}

/// Set of all attempt counters created during one search.
#[derive(Debug, Default)]
pub struct CounterRegistry {
    counters: RwLock<Vec<Arc<AttemptCounter>>>,
}

impl CounterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fresh counter and adds it to the registry.
    pub fn register(&self) -> Arc<AttemptCounter> {
        let counter = Arc::new(AttemptCounter::default());
        self.counters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&counter));
        counter
    }

    /// Sum of every counter registered so far.
    pub fn total(&self) -> u64 {
        self.counters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|c| c.get())
            .sum()
    }

    pub fn len(&self) -> usize {
        self.counters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read-only view of search progress at one point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    /// Time since the search started.
    pub elapsed: Duration,
    /// Candidates tested so far, summed over all executors.
    pub attempts: u64,
    /// Attempts per second since the previous snapshot.
    pub rate: f64,
    /// Total number of candidates in the keyspace.
    pub keyspace: u64,
}

impl ProgressSnapshot {
    pub fn percent_complete(&self) -> f64 {
        if self.keyspace == 0 {
            return 100.0;
        }
        self.attempts as f64 / self.keyspace as f64 * 100.0
    }

    /// Attempts per second over the whole run.
    pub fn average_rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.attempts as f64 / secs
        } else {
            0.0
        }
    }

    /// Estimated time to exhaust the remaining keyspace at the average rate.
    pub fn eta(&self) -> Option<Duration> {
        let rate = self.average_rate();
        if rate <= 0.0 {
            return None;
        }
        let remaining = self.keyspace.saturating_sub(self.attempts) as f64;
        Duration::try_from_secs_f64(remaining / rate).ok()
    }
}

/// Receives progress snapshots from the aggregator.
///
/// Reporting is best effort: implementations should return quickly because
/// they run on the aggregator's thread.
pub trait Reporter: Send + Sync {
    fn report(&self, snapshot: &ProgressSnapshot);
}

impl<F> Reporter for F
where
    F: Fn(&ProgressSnapshot) + Send + Sync,
{
    fn report(&self, snapshot: &ProgressSnapshot) {
        self(snapshot)
    }
}

/// Discards every snapshot.
#[derive(Default, Debug, Clone, Copy)]
pub struct NoOpReporter;

impl Reporter for NoOpReporter {
    fn report(&self, _snapshot: &ProgressSnapshot) {}
}

/// Emits each snapshot as a structured `tracing` event.
#[derive(Default, Debug, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, snapshot: &ProgressSnapshot) {
        tracing::info!(
            attempts = snapshot.attempts,
            keyspace = snapshot.keyspace,
            elapsed_secs = format_args!("{:.1}", snapshot.elapsed.as_secs_f64()),
            rate = format_args!("{:.0}", snapshot.rate),
            percent = format_args!("{:.2}", snapshot.percent_complete()),
            eta = ?snapshot.eta(),
            "Search progress"
        );
    }
}

/// Hands `snapshot` to `reporter`, logging and swallowing any panic.
fn report_guarded(reporter: &dyn Reporter, snapshot: &ProgressSnapshot) {
    if let Err(panic_payload) = catch_unwind(AssertUnwindSafe(|| reporter.report(snapshot))) {
        tracing::warn!(
            attempts = snapshot.attempts,
            panic = %panic_message(panic_payload.as_ref()),
            "Progress reporter panicked, snapshot dropped"
        );
    }
}

/// Samples the attempt counters of a [`SearchState`] and derives throughput.
pub struct ProgressAggregator<'a> {
    state: &'a SearchState,
    keyspace: u64,
    interval: Duration,
    started: Instant,
    last_sample_at: Instant,
    last_attempts: u64,
}

impl<'a> ProgressAggregator<'a> {
    pub fn new(state: &'a SearchState, keyspace: u64, interval: Duration, started: Instant) -> Self {
        Self {
            state,
            keyspace,
            interval,
            started,
            last_sample_at: started,
            last_attempts: 0,
        }
    }

    /// Takes a snapshot without blocking any executor.
    pub fn sample(&mut self) -> ProgressSnapshot {
        let now = Instant::now();
        let attempts = self.state.total_attempts();
        let dt = now.duration_since(self.last_sample_at).as_secs_f64();
        let delta = attempts.saturating_sub(self.last_attempts);
        let rate = if dt > 0.0 { delta as f64 / dt } else { 0.0 };

        self.last_sample_at = now;
        self.last_attempts = attempts;

        ProgressSnapshot {
            elapsed: now.duration_since(self.started),
            attempts,
            rate,
            keyspace: self.keyspace,
        }
    }

    /// Reports a snapshot every interval until `stop` disconnects, then
    /// reports and returns one final snapshot.
    pub fn run(mut self, reporter: &dyn Reporter, stop: Receiver<()>) -> ProgressSnapshot {
        let ticker = tick(self.interval);
        loop {
            select! {
                recv(stop) -> _ => break,
                recv(ticker) -> _ => {
                    let snapshot = self.sample();
                    report_guarded(reporter, &snapshot);
                }
            }
        }
        let last = self.sample();
        report_guarded(reporter, &last);
        last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::sync::Mutex;

    #[test]
    fn registry_sums_counters_registered_at_any_time() {
        let registry = CounterRegistry::new();
        assert!(registry.is_empty());

        let first = registry.register();
        for _ in 0..5 {
            first.increment();
        }
        assert_eq!(registry.total(), 5);

        let second = registry.register();
        second.increment();
        assert_eq!(registry.total(), 6, "A late counter should be included in the next sum");

        drop(first);
        assert_eq!(
            registry.total(),
            6,
            "Counts from a finished executor must not be lost when its handle is dropped"
        );
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn registry_handles_concurrent_writers() {
        let registry = CounterRegistry::new();
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let counter = registry.register();
                    for _ in 0..1000 {
                        counter.increment();
                    }
                });
            }
        });
        assert_eq!(registry.total(), 4000, "No increment should be lost or double counted");
    }

    #[test]
    fn snapshot_derived_metrics() {
        let snapshot = ProgressSnapshot {
            elapsed: Duration::from_secs(2),
            attempts: 50,
            rate: 30.0,
            keyspace: 200,
        };
        assert_eq!(snapshot.percent_complete(), 25.0);
        assert_eq!(snapshot.average_rate(), 25.0);
        assert_eq!(snapshot.eta(), Some(Duration::from_secs(6)));

        let fresh = ProgressSnapshot {
            elapsed: Duration::ZERO,
            attempts: 0,
            rate: 0.0,
            keyspace: 200,
        };
        assert_eq!(fresh.average_rate(), 0.0);
        assert!(fresh.eta().is_none(), "No ETA can be computed before any attempt");
    }

    #[test]
    fn sample_reports_rate_since_previous_sample() {
        let state = SearchState::new();
        let counter = state.register_counter();
        let started = Instant::now()
            .checked_sub(Duration::from_secs(1))
            .unwrap_or_else(Instant::now);
        let mut aggregator = ProgressAggregator::new(&state, 1000, Duration::from_secs(1), started);

        for _ in 0..100 {
            counter.increment();
        }
        let first = aggregator.sample();
        assert_eq!(first.attempts, 100);
        assert!(first.rate > 0.0, "Rate should be positive after attempts were made");
        assert!(first.elapsed >= Duration::from_secs(1));

        let second = aggregator.sample();
        assert_eq!(second.attempts, 100);
        assert_eq!(second.rate, 0.0, "No new attempts means zero instantaneous rate");
    }

    #[test]
    fn run_emits_final_snapshot_when_stopped() {
        let state = SearchState::new();
        let counter = state.register_counter();
        counter.increment();
        counter.increment();

        let seen = Mutex::new(Vec::new());
        let reporter = |s: &ProgressSnapshot| seen.lock().unwrap().push(*s);
        let aggregator = ProgressAggregator::new(&state, 10, Duration::from_secs(3600), Instant::now());
        let (stop_tx, stop_rx) = bounded::<()>(0);
        drop(stop_tx);

        let last = aggregator.run(&reporter, stop_rx);
        assert_eq!(last.attempts, 2);
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 1, "Only the final snapshot should be reported: {seen:?}");
        assert_eq!(seen[0].keyspace, 10);
    }

    #[test]
    fn run_survives_panicking_reporter() {
        let state = SearchState::new();
        state.register_counter().increment();
        let calls = Mutex::new(0usize);
        let reporter = |_: &ProgressSnapshot| {
            *calls.lock().unwrap() += 1;
            panic!("reporter broke");
        };
        let (stop_tx, stop_rx) = bounded::<()>(0);

        let last = std::thread::scope(|s| {
            let aggregator =
                ProgressAggregator::new(&state, 10, Duration::from_millis(2), Instant::now());
            let handle = s.spawn(|| aggregator.run(&reporter, stop_rx));
            std::thread::sleep(Duration::from_millis(20));
            drop(stop_tx);
            handle.join()
        })
        .expect("A panicking reporter must not take down the aggregator");

        assert_eq!(last.attempts, 1);
        assert!(
            *calls.lock().unwrap() >= 2,
            "The aggregator should keep reporting after a reporter panic"
        );
    }

    #[test]
    fn run_ticks_until_stopped() {
        let state = SearchState::new();
        let seen = Mutex::new(0usize);
        let reporter = |_: &ProgressSnapshot| *seen.lock().unwrap() += 1;
        let (stop_tx, stop_rx) = bounded::<()>(0);

        std::thread::scope(|s| {
            let aggregator =
                ProgressAggregator::new(&state, 10, Duration::from_millis(5), Instant::now());
            let handle = s.spawn(|| aggregator.run(&reporter, stop_rx));
            std::thread::sleep(Duration::from_millis(60));
            drop(stop_tx);
            handle.join().unwrap();
        });
        assert!(
            *seen.lock().unwrap() >= 2,
            "Expected periodic snapshots plus a final one"
        );
    }
}
