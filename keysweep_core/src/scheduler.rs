//! Search orchestration.
//!
//! The [`Scheduler`] owns the validated parameters of a search, cuts the
//! keyspace into work units, and drives one run through its phases:
//!
//! ```text
//! Idle -> Running -> Found | Exhausted | Aborted -> Terminated
//! ```
//!
//! Index 0 is probed on the calling thread before anything is dispatched, so
//! an oracle that cannot engage the resource at all aborts the run before any
//! executor or progress thread exists. Everything else runs on a pool of
//! executors that pull units from a shared queue; the queue holds several units
//! per executor so fast executors keep working while slow ones finish.

use crate::enumerator::{Alphabet, CandidateEnumerator, EnumerationOrder};
use crate::executor::{DEFAULT_CHECK_INTERVAL, ExecutorKind, UnitExecutor, UnitExit, WorkerStats};
use crate::oracle::Oracle;
use crate::partition::{self, DEFAULT_OVERSUBSCRIPTION, PartitionError, WorkUnit};
use crate::progress::{DEFAULT_PROGRESS_INTERVAL, ProgressAggregator, Reporter};
use crate::sink::{ResultSink, SearchOutcome, SinkError};
use crate::state::{SearchPhase, SearchState, Verdict};
use crossbeam_channel::{Receiver, bounded, unbounded};
use std::panic::resume_unwind;
use std::thread::{self, Scope, ScopedJoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Structural failures of a search.
///
/// A wrong candidate is never an error; these variants mean the search as a
/// whole could not produce a usable result.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid search parameters: {0}")]
    InvalidParameters(#[from] PartitionError),
    #[error("Oracle cannot engage the protected resource after {attempts} attempts: {reason}")]
    OracleUnusable { reason: String, attempts: u64 },
    #[error("Search was cancelled after {attempts} attempts without a result")]
    Cancelled { attempts: u64 },
    #[error("Search state has already been used by another run")]
    StateInUse,
    #[error("Failed to spawn search thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("Search concluded but its result could not be persisted: {source}")]
    Sink {
        report: Box<SearchReport>,
        #[source]
        source: SinkError,
    },
}

impl SearchError {
    /// The completed report, for errors raised after the search itself concluded.
    pub fn report(&self) -> Option<&SearchReport> {
        match self {
            SearchError::Sink { report, .. } => Some(report),
            _ => None,
        }
    }
}

/// Summary of a completed search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchReport {
    pub outcome: SearchOutcome,
    /// Candidates tested, including the initial probe.
    pub attempts: u64,
    pub elapsed: Duration,
    /// Work units the keyspace was cut into.
    pub units: usize,
    /// Executors that took part, not counting the probe.
    pub executors: usize,
}

impl SearchReport {
    pub fn average_rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.attempts as f64 / secs
        } else {
            0.0
        }
    }
}

/// Parameters of a keyspace search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParams {
    pub alphabet: Alphabet,
    pub length: u32,
    pub order: EnumerationOrder,
    pub executor: ExecutorKind,
    /// Size of the executor pool. Ignored by [`ExecutorKind::Sequential`].
    pub executors: usize,
    pub oversubscription: usize,
    /// Candidates tested between two cancellation checks.
    pub check_interval: u64,
    pub progress_interval: Duration,
}

impl SearchParams {
    pub fn new(alphabet: Alphabet, length: u32) -> Self {
        Self {
            alphabet,
            length,
            order: EnumerationOrder::default(),
            executor: ExecutorKind::default(),
            executors: num_cpus::get(),
            oversubscription: DEFAULT_OVERSUBSCRIPTION,
            check_interval: DEFAULT_CHECK_INTERVAL,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn with_order(mut self, order: EnumerationOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_executor(mut self, executor: ExecutorKind) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_executors(mut self, executors: usize) -> Self {
        self.executors = executors;
        self
    }

    pub fn with_oversubscription(mut self, oversubscription: usize) -> Self {
        self.oversubscription = oversubscription;
        self
    }

    pub fn with_check_interval(mut self, check_interval: u64) -> Self {
        self.check_interval = check_interval;
        self
    }

    pub fn with_progress_interval(mut self, progress_interval: Duration) -> Self {
        self.progress_interval = progress_interval;
        self
    }

    /// Executors that will actually run for this configuration.
    pub fn effective_executors(&self) -> usize {
        match self.executor {
            ExecutorKind::Sequential => 1,
            ExecutorKind::Threads => self.executors,
        }
    }
}

/// Validated, partitioned search ready to run.
#[derive(Debug, Clone)]
pub struct Scheduler {
    params: SearchParams,
    enumerator: CandidateEnumerator,
    units: Vec<WorkUnit>,
}

impl Scheduler {
    /// Validates `params` and partitions the keyspace.
    ///
    /// # Errors
    /// Any [`PartitionError`]; no parameter problem can surface after this.
    pub fn new(params: SearchParams) -> Result<Self, PartitionError> {
        if params.executors == 0 {
            return Err(PartitionError::ZeroExecutors);
        }
        if params.oversubscription == 0 {
            return Err(PartitionError::ZeroOversubscription);
        }
        if params.check_interval == 0 {
            return Err(PartitionError::ZeroCheckInterval);
        }
        if params.progress_interval.is_zero() {
            return Err(PartitionError::ZeroProgressInterval);
        }
        let enumerator = CandidateEnumerator::new(&params.alphabet, params.length, &params.order)?;
        let unit_count =
            partition::unit_count(params.effective_executors(), params.oversubscription);
        let units = partition::partition(enumerator.keyspace(), unit_count)?;
        Ok(Self {
            params,
            enumerator,
            units,
        })
    }

    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    pub fn enumerator(&self) -> &CandidateEnumerator {
        &self.enumerator
    }

    pub fn units(&self) -> &[WorkUnit] {
        &self.units
    }

    pub fn keyspace(&self) -> u64 {
        self.enumerator.keyspace()
    }

    /// Runs the search with a fresh [`SearchState`].
    pub fn run(
        &self,
        oracle: &dyn Oracle,
        reporter: &dyn Reporter,
        sink: &dyn ResultSink,
    ) -> Result<SearchReport, SearchError> {
        self.run_with_state(&SearchState::new(), oracle, reporter, sink)
    }

    /// Runs the search against a caller-owned state, which lets the caller
    /// watch [`SearchState::phase`] or cancel the run from another thread.
    ///
    /// # Errors
    /// [`SearchError::StateInUse`] if `state` is not idle. See [`SearchError`]
    /// for the rest.
    pub fn run_with_state(
        &self,
        state: &SearchState,
        oracle: &dyn Oracle,
        reporter: &dyn Reporter,
        sink: &dyn ResultSink,
    ) -> Result<SearchReport, SearchError> {
        if !state.transition(SearchPhase::Idle, SearchPhase::Running) {
            return Err(SearchError::StateInUse);
        }
        let started = Instant::now();
        let executors = self.params.effective_executors();
        tracing::info!(
            oracle = oracle.name(),
            keyspace = self.keyspace(),
            length = self.enumerator.length(),
            order = %self.params.order,
            executor = ?self.params.executor,
            executors,
            units = self.units.len(),
            "Starting keyspace search"
        );

        let probe_exit =
            UnitExecutor::new(&self.enumerator, oracle, state, 1).execute(WorkUnit::new(0, 1));

        let mut pool_size = 0;
        match probe_exit {
            UnitExit::Completed => {
                if let Err(e) = self.dispatch(state, oracle, reporter, started) {
                    return Err(abort_run(state, e));
                }
                pool_size = executors;
            }
            UnitExit::Hit => tracing::debug!("Probe candidate hit, skipping dispatch"),
            UnitExit::Unusable | UnitExit::Cancelled => {}
        }

        let attempts = state.total_attempts();
        let elapsed = started.elapsed();
        let outcome = match state.verdict() {
            Some(Verdict::Found(discovery)) => {
                state.transition(SearchPhase::Running, SearchPhase::Found);
                tracing::info!(
                    candidate = %discovery.candidate,
                    index = discovery.index,
                    attempts,
                    elapsed_secs = format_args!("{:.2}", elapsed.as_secs_f64()),
                    "Secret found"
                );
                SearchOutcome::Found(discovery.clone())
            }
            Some(Verdict::Unusable { reason, candidate }) => {
                tracing::error!(%candidate, attempts, reason = %reason, "Search aborted");
                return Err(abort_run(
                    state,
                    SearchError::OracleUnusable {
                        reason: reason.clone(),
                        attempts,
                    },
                ));
            }
            // Every index is tested at most once, so a full count means the
            // pool drained the queue even if a cancel arrived afterwards.
            None if state.is_cancelled() && attempts < self.keyspace() => {
                tracing::warn!(attempts, "Search cancelled before a verdict was reached");
                return Err(abort_run(state, SearchError::Cancelled { attempts }));
            }
            None => {
                state.transition(SearchPhase::Running, SearchPhase::Exhausted);
                debug_assert_eq!(attempts, self.keyspace(), "Exhaustion must test every index");
                tracing::info!(
                    attempts,
                    elapsed_secs = format_args!("{:.2}", elapsed.as_secs_f64()),
                    "Keyspace exhausted without a hit"
                );
                SearchOutcome::Exhausted {
                    keyspace: self.keyspace(),
                }
            }
        };

        let report = SearchReport {
            outcome,
            attempts,
            elapsed,
            units: self.units.len(),
            executors: pool_size,
        };
        let recorded = sink.record(&report.outcome);
        state.transition(state.phase(), SearchPhase::Terminated);
        match recorded {
            Ok(()) => Ok(report),
            Err(source) => {
                tracing::error!(error = %source, "Failed to persist search result");
                Err(SearchError::Sink {
                    report: Box::new(report),
                    source,
                })
            }
        }
    }

    /// Queues every unit not covered by the probe, then runs the executor pool
    /// and the progress aggregator until the pool exits.
    fn dispatch(
        &self,
        state: &SearchState,
        oracle: &dyn Oracle,
        reporter: &dyn Reporter,
        started: Instant,
    ) -> Result<(), SearchError> {
        let (unit_tx, unit_rx) = unbounded();
        for (i, unit) in self.units.iter().enumerate() {
            let unit = if i == 0 { unit.skip_front(1) } else { *unit };
            if !unit.is_empty() {
                // The receiver is held below, so sending cannot fail.
                let _ = unit_tx.send(unit);
            }
        }
        drop(unit_tx);

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let aggregator =
            ProgressAggregator::new(state, self.keyspace(), self.params.progress_interval, started);

        thread::scope(|scope| -> Result<(), SearchError> {
            let progress = thread::Builder::new()
                .name("keysweep-progress".to_string())
                .spawn_scoped(scope, move || aggregator.run(reporter, stop_rx))
                .map_err(SearchError::Spawn)?;

            let pool = self.run_pool(scope, state, oracle, &unit_rx);
            if pool.is_err() {
                state.cancel();
            }
            drop(stop_tx);
            let last = join_or_propagate(progress);
            let stats = pool?;
            tracing::debug!(
                executors = stats.len(),
                units = stats.iter().map(|s| s.units).sum::<usize>(),
                attempts = last.attempts,
                "Executor pool drained"
            );
            Ok(())
        })
    }

    fn run_pool<'scope, 'env>(
        &'env self,
        scope: &'scope Scope<'scope, 'env>,
        state: &'env SearchState,
        oracle: &'env dyn Oracle,
        units: &'env Receiver<WorkUnit>,
    ) -> Result<Vec<WorkerStats>, SearchError> {
        let check_interval = self.params.check_interval;
        match self.params.executor {
            ExecutorKind::Sequential => {
                let mut executor = UnitExecutor::new(&self.enumerator, oracle, state, check_interval);
                Ok(vec![executor.drain(0, units)])
            }
            ExecutorKind::Threads => {
                let mut handles: Vec<ScopedJoinHandle<'scope, WorkerStats>> =
                    Vec::with_capacity(self.params.executors);
                let mut spawn_error = None;
                for worker_id in 0..self.params.executors {
                    let enumerator = &self.enumerator;
                    let spawned = thread::Builder::new()
                        .name(format!("keysweep-worker-{worker_id}"))
                        .spawn_scoped(scope, move || {
                            UnitExecutor::new(enumerator, oracle, state, check_interval)
                                .drain(worker_id, units)
                        });
                    match spawned {
                        Ok(handle) => handles.push(handle),
                        Err(e) => {
                            tracing::error!(worker_id, error = %e, "Failed to spawn executor thread");
                            state.cancel();
                            spawn_error = Some(e);
                            break;
                        }
                    }
                }
                let stats: Vec<WorkerStats> = handles.into_iter().map(join_or_propagate).collect();
                match spawn_error {
                    Some(e) => Err(SearchError::Spawn(e)),
                    None => Ok(stats),
                }
            }
        }
    }
}

/// Moves a running search to `Aborted` and hands back the error that ended it.
fn abort_run(state: &SearchState, error: SearchError) -> SearchError {
    state.transition(SearchPhase::Running, SearchPhase::Aborted);
    error
}

fn join_or_propagate<T>(handle: ScopedJoinHandle<'_, T>) -> T {
    match handle.join() {
        Ok(value) => value,
        Err(panic_payload) => resume_unwind(panic_payload),
    }
}
