use crate::enumerator::{Candidate, CandidateEnumerator};
use crate::oracle::{HitResult, Oracle};
use crate::partition::WorkUnit;
use crate::progress::AttemptCounter;
use crate::state::{Discovery, SearchState};
use crossbeam_channel::Receiver;
use serde::Deserialize;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// Default number of candidates tested between two cancellation checks.
pub const DEFAULT_CHECK_INTERVAL: u64 = 128;

/// How the executor pool is realised.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutorKind {
    /// A single executor running on the caller's thread.
    Sequential,
    /// A pool of scoped OS threads.
    #[default]
    Threads,
}

/// Why an executor stopped working on a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitExit {
    /// Every index of the unit was tested.
    Completed,
    /// Cancellation was observed before the unit was finished.
    Cancelled,
    /// This executor's oracle call returned a hit.
    Hit,
    /// This executor's oracle call reported the resource as unusable.
    Unusable,
}

/// Per-executor totals, collected when the executor exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub worker_id: usize,
    pub units: usize,
    pub attempts: u64,
}

/// Calls the oracle, turning a panic into a miss.
pub fn guarded_test(oracle: &dyn Oracle, candidate: &str) -> HitResult {
    match catch_unwind(AssertUnwindSafe(|| oracle.test(candidate))) {
        Ok(result) => result,
        Err(panic_payload) => {
            tracing::warn!(
                oracle = oracle.name(),
                candidate,
                panic = %panic_message(panic_payload.as_ref()),
                "Oracle panicked, counting the candidate as a miss"
            );
            HitResult::Miss
        }
    }
}

pub(crate) fn panic_message(panic_payload: &(dyn Any + Send)) -> String {
    if let Some(s) = panic_payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic type".to_string()
    }
}

/// Tests the candidates of work units against an oracle.
///
/// Each executor owns one attempt counter, registered with the shared
/// [`SearchState`] on construction, and one candidate buffer that is reused
/// for every decode.
pub struct UnitExecutor<'a> {
    enumerator: &'a CandidateEnumerator,
    oracle: &'a dyn Oracle,
    state: &'a SearchState,
    counter: Arc<AttemptCounter>,
    check_interval: u64,
    buf: String,
}

impl<'a> UnitExecutor<'a> {
    pub fn new(
        enumerator: &'a CandidateEnumerator,
        oracle: &'a dyn Oracle,
        state: &'a SearchState,
        check_interval: u64,
    ) -> Self {
        Self {
            enumerator,
            oracle,
            state,
            counter: state.register_counter(),
            check_interval: check_interval.max(1),
            buf: enumerator.candidate_buffer(),
        }
    }

    /// Candidates tested by this executor so far.
    pub fn attempts(&self) -> u64 {
        self.counter.get()
    }

    /// Tests every index of `unit` in order until a verdict is reached or
    /// cancellation is observed.
    ///
    /// The cancellation flag is checked before the first candidate and then
    /// once every `check_interval` candidates.
    pub fn execute(&mut self, unit: WorkUnit) -> UnitExit {
        for (offset, index) in unit.range().enumerate() {
            if offset as u64 % self.check_interval == 0 && self.state.is_cancelled() {
                return UnitExit::Cancelled;
            }

            self.enumerator.decode_into(index, &mut self.buf);
            let result = guarded_test(self.oracle, &self.buf);
            self.counter.increment();

            match result {
                HitResult::Miss => {}
                HitResult::Hit(payload) => {
                    let discovery = Discovery {
                        candidate: Candidate::from(self.buf.clone()),
                        index,
                        payload,
                    };
                    if self.state.publish_found(discovery) {
                        tracing::info!(candidate = %self.buf, index, "Oracle accepted candidate");
                    } else {
                        tracing::debug!(
                            candidate = %self.buf,
                            index,
                            "Hit discarded, another executor already published a verdict"
                        );
                    }
                    return UnitExit::Hit;
                }
                HitResult::Unusable(reason) => {
                    tracing::error!(
                        oracle = self.oracle.name(),
                        candidate = %self.buf,
                        reason = %reason,
                        "Oracle reports the resource as unusable, cancelling search"
                    );
                    self.state
                        .publish_unusable(reason, Candidate::from(self.buf.clone()));
                    return UnitExit::Unusable;
                }
            }
        }
        UnitExit::Completed
    }

    /// Pulls units from `units` until the queue is drained, a verdict is
    /// reached, or the search is cancelled.
    pub fn drain(&mut self, worker_id: usize, units: &Receiver<WorkUnit>) -> WorkerStats {
        let mut stats = WorkerStats {
            worker_id,
            ..WorkerStats::default()
        };
        while !self.state.is_cancelled() {
            let Ok(unit) = units.recv() else {
                break;
            };
            stats.units += 1;
            tracing::debug!(
                worker_id,
                start = unit.start_index,
                count = unit.count,
                "Executor picked up work unit"
            );
            if self.execute(unit) != UnitExit::Completed {
                break;
            }
        }
        stats.attempts = self.attempts();
        tracing::debug!(
            worker_id,
            units = stats.units,
            attempts = stats.attempts,
            "Executor finished"
        );
        stats
    }
}
