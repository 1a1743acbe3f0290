use crate::enumerator::{Alphabet, DEFAULT_ALPHABET, EnumerationOrder};
use crate::executor::{DEFAULT_CHECK_INTERVAL, ExecutorKind};
use crate::partition::{DEFAULT_OVERSUBSCRIPTION, PartitionError};
use crate::scheduler::SearchParams;
use crate::sink::SinkContent;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct KeyspaceSettings {
    #[serde(default = "default_alphabet")]
    pub alphabet: String,
    #[serde(default = "default_length")]
    pub length: u32,
    #[serde(default)]
    pub order: EnumerationOrder,
}

fn default_alphabet() -> String {
    DEFAULT_ALPHABET.to_string()
}

pub fn default_length() -> u32 {
    6
}

impl Default for KeyspaceSettings {
    fn default() -> Self {
        Self {
            alphabet: default_alphabet(),
            length: default_length(),
            order: EnumerationOrder::default(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SearchSettings {
    #[serde(default)]
    pub executor_type: ExecutorKind,
    /// `0` means one executor per logical CPU.
    #[serde(default)]
    pub threads: usize,
    #[serde(default = "default_oversubscription")]
    pub oversubscription: usize,
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
}

fn default_oversubscription() -> usize {
    DEFAULT_OVERSUBSCRIPTION
}

fn default_check_interval() -> u64 {
    DEFAULT_CHECK_INTERVAL
}

pub fn default_progress_interval_ms() -> u64 {
    1000
}

impl SearchSettings {
    pub fn effective_threads(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get()
        } else {
            self.threads
        }
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(1))
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            executor_type: ExecutorKind::default(),
            threads: 0,
            oversubscription: default_oversubscription(),
            check_interval: default_check_interval(),
            progress_interval_ms: default_progress_interval_ms(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TargetType {
    #[default]
    Archive,
    Md5Digest,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Archive => "archive",
            TargetType::Md5Digest => "md5-digest",
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ArchiveTargetSettings {
    #[serde(default = "default_archive_path")]
    pub path: PathBuf,
    /// Entry to decrypt. Defaults to the first encrypted file in the archive.
    pub entry: Option<String>,
}

pub fn default_archive_path() -> PathBuf {
    PathBuf::from("emergency_storage_key.zip")
}

impl Default for ArchiveTargetSettings {
    fn default() -> Self {
        Self {
            path: default_archive_path(),
            entry: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    #[serde(default)]
    pub target_type: TargetType,
    #[serde(default)]
    pub archive: Option<ArchiveTargetSettings>,
    /// Hex encoded MD5 digest, required when `target-type = "md5-digest"`.
    #[serde(default)]
    pub md5_digest: Option<String>,
}

impl TargetConfig {
    pub fn archive_settings(&self) -> ArchiveTargetSettings {
        self.archive.clone().unwrap_or_default()
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct OutputSettings {
    #[serde(default = "default_output_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub content: SinkContent,
}

pub fn default_output_path() -> PathBuf {
    PathBuf::from("password.txt")
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            path: default_output_path(),
            content: SinkContent::default(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct KeysweepConfig {
    #[serde(default)]
    pub keyspace: KeyspaceSettings,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub output: OutputSettings,
}

impl KeysweepConfig {
    pub fn load_from_file(path: &PathBuf) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: KeysweepConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        Ok(config)
    }

    /// Builds the search parameters described by this config.
    ///
    /// Only the alphabet is validated here; the remaining checks happen when
    /// the parameters are handed to [`crate::Scheduler::new`].
    pub fn to_search_params(&self) -> Result<SearchParams, PartitionError> {
        let alphabet = Alphabet::new(&self.keyspace.alphabet)?;
        Ok(SearchParams::new(alphabet, self.keyspace.length)
            .with_order(self.keyspace.order.clone())
            .with_executor(self.search.executor_type)
            .with_executors(self.search.effective_threads())
            .with_oversubscription(self.search.oversubscription)
            .with_check_interval(self.search.check_interval)
            .with_progress_interval(self.search.progress_interval()))
    }
}
