//! Password oracle for encrypted ZIP entries.

use keysweep_core::oracle::{HitResult, Oracle};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use zip::ZipArchive;
use zip::result::ZipError;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Failed to read archive {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path:?} is not a readable ZIP archive: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: ZipError,
    },
    #[error("Archive has no entry named {0:?}")]
    EntryNotFound(String),
    #[error("Archive entry {0:?} is not encrypted")]
    NotEncrypted(String),
    #[error("Archive contains no encrypted file entry")]
    NoEncryptedEntry,
}

/// Tests candidates as passwords for one encrypted entry of a ZIP archive.
///
/// The archive is read into memory once. Every test works on a clone of the
/// parsed archive, so executors never share a reader.
pub struct ZipArchiveOracle {
    archive: ZipArchive<Cursor<Arc<[u8]>>>,
    entry_index: usize,
    entry_name: String,
}

impl ZipArchiveOracle {
    /// Opens `path` and selects `entry`, or the first encrypted file entry
    /// when no name is given.
    pub fn open(path: &Path, entry: Option<&str>) -> Result<Self, ArchiveError> {
        let bytes = std::fs::read(path).map_err(|source| ArchiveError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(bytes, entry).map_err(|e| match e {
            ArchiveError::Invalid { source, .. } => ArchiveError::Invalid {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn from_bytes(bytes: Vec<u8>, entry: Option<&str>) -> Result<Self, ArchiveError> {
        let bytes: Arc<[u8]> = bytes.into();
        let mut archive =
            ZipArchive::new(Cursor::new(bytes)).map_err(|source| ArchiveError::Invalid {
                path: PathBuf::new(),
                source,
            })?;

        let entry_index = match entry {
            Some(name) => {
                let index = archive
                    .index_for_name(name)
                    .ok_or_else(|| ArchiveError::EntryNotFound(name.to_string()))?;
                if !is_encrypted_file(&mut archive, index) {
                    return Err(ArchiveError::NotEncrypted(name.to_string()));
                }
                index
            }
            None => (0..archive.len())
                .find(|&i| is_encrypted_file(&mut archive, i))
                .ok_or(ArchiveError::NoEncryptedEntry)?,
        };
        let entry_name = archive
            .by_index_raw(entry_index)
            .map(|file| file.name().to_string())
            .unwrap_or_default();
        tracing::debug!(entry = %entry_name, index = entry_index, "Selected archive entry");

        Ok(Self {
            archive,
            entry_index,
            entry_name,
        })
    }

    pub fn entry_name(&self) -> &str {
        &self.entry_name
    }
}

fn is_encrypted_file(archive: &mut ZipArchive<Cursor<Arc<[u8]>>>, index: usize) -> bool {
    archive
        .by_index_raw(index)
        .map(|file| file.encrypted() && !file.is_dir())
        .unwrap_or(false)
}

impl Oracle for ZipArchiveOracle {
    fn name(&self) -> &str {
        "zip-archive"
    }

    fn test(&self, candidate: &str) -> HitResult {
        let mut archive = self.archive.clone();
        let mut file = match archive.by_index_decrypt(self.entry_index, candidate.as_bytes()) {
            Ok(file) => file,
            Err(ZipError::InvalidPassword) => return HitResult::Miss,
            Err(e @ (ZipError::UnsupportedArchive(_) | ZipError::FileNotFound)) => {
                return HitResult::Unusable(format!("{}: {e}", self.entry_name));
            }
            Err(e) => {
                tracing::debug!(candidate, error = %e, "Archive entry could not be opened");
                return HitResult::Miss;
            }
        };

        // A wrong password can pass the header check; the CRC at end of
        // stream catches it.
        let mut content = Vec::new();
        match file.read_to_end(&mut content) {
            Ok(_) => HitResult::hit_with(content),
            Err(e) => {
                tracing::debug!(candidate, error = %e, "Archive entry failed to decrypt");
                HitResult::Miss
            }
        }
    }
}
