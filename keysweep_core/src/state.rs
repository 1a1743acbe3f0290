use crate::enumerator::Candidate;
use crate::progress::{AttemptCounter, CounterRegistry};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

/// The winning candidate of a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub candidate: Candidate,
    /// Index of the candidate in the enumeration order used by the search.
    pub index: u64,
    /// Data the oracle extracted while verifying the candidate.
    pub payload: Option<Vec<u8>>,
}

/// Terminal verdict published by the first executor that reaches one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Found(Discovery),
    Unusable { reason: String, candidate: Candidate },
}

/// Lifecycle of a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SearchPhase {
    Idle = 0,
    Running = 1,
    Found = 2,
    Exhausted = 3,
    Aborted = 4,
    Terminated = 5,
}

impl SearchPhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SearchPhase::Idle,
            1 => SearchPhase::Running,
            2 => SearchPhase::Found,
            3 => SearchPhase::Exhausted,
            4 => SearchPhase::Aborted,
            _ => SearchPhase::Terminated,
        }
    }
}

/// State shared by the dispatcher, every executor and the progress aggregator
/// for the duration of one search.
///
/// The verdict slot can be written exactly once; whichever executor publishes
/// first wins and later writers are ignored. Readers only ever see a complete
/// verdict.
#[derive(Debug)]
pub struct SearchState {
    verdict: OnceLock<Verdict>,
    cancelled: AtomicBool,
    phase: AtomicU8,
    counters: CounterRegistry,
}

impl SearchState {
    pub fn new() -> Self {
        Self {
            verdict: OnceLock::new(),
            cancelled: AtomicBool::new(false),
            phase: AtomicU8::new(SearchPhase::Idle as u8),
            counters: CounterRegistry::new(),
        }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Asks every executor to stop at its next cancellation check.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Publishes a winning candidate and cancels the search.
    ///
    /// Returns `true` if this call set the verdict, `false` if another
    /// verdict was already in place.
    pub fn publish_found(&self, discovery: Discovery) -> bool {
        self.publish(Verdict::Found(discovery))
    }

    /// Records that the oracle cannot engage the resource and cancels the search.
    pub fn publish_unusable(&self, reason: String, candidate: Candidate) -> bool {
        self.publish(Verdict::Unusable { reason, candidate })
    }

    fn publish(&self, verdict: Verdict) -> bool {
        let won = self.verdict.set(verdict).is_ok();
        self.cancel();
        won
    }

    pub fn verdict(&self) -> Option<&Verdict> {
        self.verdict.get()
    }

    pub fn found(&self) -> Option<&Discovery> {
        match self.verdict.get() {
            Some(Verdict::Found(discovery)) => Some(discovery),
            _ => None,
        }
    }

    /// Registers a new per-executor attempt counter.
    pub fn register_counter(&self) -> Arc<AttemptCounter> {
        self.counters.register()
    }

    /// Attempts made so far, summed over every registered counter.
    pub fn total_attempts(&self) -> u64 {
        self.counters.total()
    }

    /// Counters registered so far. The index 0 probe registers one, so after
    /// dispatch this is one more than the pool size.
    pub fn counter_count(&self) -> usize {
        self.counters.len()
    }

    pub fn phase(&self) -> SearchPhase {
        SearchPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Moves from `from` to `to`. Returns `false` if the state was not in `from`.
    pub(crate) fn transition(&self, from: SearchPhase, to: SearchPhase) -> bool {
        self.phase
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for SearchState {
    fn default() -> Self {
        Self::new()
    }
}
