use crate::state::Discovery;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Final result of a search that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Found(Discovery),
    /// Every candidate was tested without a hit.
    Exhausted { keyspace: u64 },
}

impl SearchOutcome {
    pub fn discovery(&self) -> Option<&Discovery> {
        match self {
            SearchOutcome::Found(discovery) => Some(discovery),
            SearchOutcome::Exhausted { .. } => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to write search result to {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Result sink rejected the outcome: {0}")]
    Rejected(String),
}

/// Persists the outcome of a search. Called exactly once per completed search.
pub trait ResultSink: Send + Sync {
    fn record(&self, outcome: &SearchOutcome) -> Result<(), SinkError>;
}

/// Keeps every recorded outcome in memory.
#[derive(Debug, Default)]
pub struct InMemorySink {
    records: Mutex<Vec<SearchOutcome>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<SearchOutcome> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ResultSink for InMemorySink {
    fn record(&self, outcome: &SearchOutcome) -> Result<(), SinkError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(outcome.clone());
        Ok(())
    }
}

/// What a [`FileSink`] writes for a discovered secret.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SinkContent {
    /// The winning candidate itself.
    #[default]
    Candidate,
    /// The payload the oracle extracted. Falls back to the candidate when the
    /// oracle produced none.
    Payload,
}

/// Writes the discovered secret to a file. Nothing is written on exhaustion.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
    content: SinkContent,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>, content: SinkContent) -> Self {
        Self {
            path: path.into(),
            content,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn contents_for(&self, discovery: &Discovery) -> Vec<u8> {
        match (self.content, &discovery.payload) {
            (SinkContent::Payload, Some(payload)) => match std::str::from_utf8(payload) {
                Ok(text) => text.trim().as_bytes().to_vec(),
                Err(_) => payload.clone(),
            },
            (SinkContent::Payload, None) => {
                tracing::warn!(
                    path = ?self.path,
                    "Oracle produced no payload, writing the candidate instead"
                );
                discovery.candidate.as_bytes().to_vec()
            }
            (SinkContent::Candidate, _) => discovery.candidate.as_bytes().to_vec(),
        }
    }
}

impl ResultSink for FileSink {
    fn record(&self, outcome: &SearchOutcome) -> Result<(), SinkError> {
        let SearchOutcome::Found(discovery) = outcome else {
            tracing::debug!(path = ?self.path, "Keyspace exhausted, nothing to persist");
            return Ok(());
        };
        fs::write(&self.path, self.contents_for(discovery)).map_err(|source| SinkError::Io {
            path: self.path.clone(),
            source,
        })?;
        tracing::info!(path = ?self.path, content = ?self.content, "Search result saved");
        Ok(())
    }
}
