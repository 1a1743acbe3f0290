pub mod config;
pub mod enumerator;
pub mod executor;
pub mod oracle;
pub mod partition;
pub mod progress;
pub mod scheduler;
pub mod sink;
pub mod state;

pub use config::KeysweepConfig;
pub use enumerator::{Alphabet, Candidate, CandidateEnumerator, EnumerationOrder};
pub use executor::{ExecutorKind, UnitExecutor, UnitExit, WorkerStats};
pub use oracle::{FnOracle, HitResult, Md5DigestOracle, Oracle, OracleError};
pub use partition::{PartitionError, WorkUnit, partition, unit_count};
pub use progress::{
    NoOpReporter, ProgressAggregator, ProgressSnapshot, Reporter, TracingReporter,
};
pub use scheduler::{Scheduler, SearchError, SearchParams, SearchReport};
pub use sink::{FileSink, InMemorySink, ResultSink, SearchOutcome, SinkContent, SinkError};
pub use state::{Discovery, SearchPhase, SearchState, Verdict};
