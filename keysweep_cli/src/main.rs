mod archive;

use archive::ZipArchiveOracle;
use keysweep_core::config::{KeysweepConfig, TargetType};
use keysweep_core::enumerator::EnumerationOrder;
use keysweep_core::executor::ExecutorKind;
use keysweep_core::oracle::{Md5DigestOracle, Oracle};
use keysweep_core::progress::TracingReporter;
use keysweep_core::scheduler::{Scheduler, SearchError, SearchReport};
use keysweep_core::sink::{FileSink, SearchOutcome, SinkContent};

use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "keysweep.toml";

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum OrderArg {
    Lexicographic,
    FrequencyBiased,
    Shuffled,
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Encrypted ZIP archive to unlock.
    #[clap(long, value_parser)]
    archive: Option<PathBuf>,
    /// Archive entry to decrypt. Defaults to the first encrypted entry.
    #[clap(long)]
    entry: Option<String>,
    /// Hex MD5 digest to invert instead of an archive.
    #[clap(long, conflicts_with_all = ["archive", "entry"])]
    md5: Option<String>,
    #[clap(short, long)]
    length: Option<u32>,
    #[clap(long)]
    alphabet: Option<String>,
    #[clap(long, value_enum)]
    order: Option<OrderArg>,
    /// Seed for the shuffled order.
    #[clap(long)]
    seed: Option<u64>,
    /// Executor threads, 0 for one per CPU.
    #[clap(short, long)]
    threads: Option<usize>,
    #[clap(long)]
    sequential: bool,
    #[clap(long)]
    oversubscription: Option<usize>,
    #[clap(short, long, value_parser)]
    output: Option<PathBuf>,
    /// Write the decrypted payload instead of the password.
    #[clap(long)]
    write_payload: bool,
    #[clap(long, value_parser)]
    report_json: Option<PathBuf>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "kebab-case")]
struct RunSummary<'a> {
    outcome: &'static str,
    candidate: Option<&'a str>,
    index: Option<u64>,
    attempts: u64,
    keyspace: u64,
    elapsed_secs: f64,
    average_rate: f64,
    units: usize,
    executors: usize,
    order: &'a EnumerationOrder,
    target: &'static str,
}

impl<'a> RunSummary<'a> {
    fn new(report: &'a SearchReport, scheduler: &'a Scheduler, target: TargetType) -> Self {
        let discovery = report.outcome.discovery();
        Self {
            outcome: match report.outcome {
                SearchOutcome::Found(_) => "found",
                SearchOutcome::Exhausted { .. } => "exhausted",
            },
            candidate: discovery.map(|d| d.candidate.as_str()),
            index: discovery.map(|d| d.index),
            attempts: report.attempts,
            keyspace: scheduler.keyspace(),
            elapsed_secs: report.elapsed.as_secs_f64(),
            average_rate: report.average_rate(),
            units: report.units,
            executors: report.executors,
            order: &scheduler.params().order,
            target: target.as_str(),
        }
    }
}

fn load_config(config_file: Option<&Path>) -> Result<KeysweepConfig, anyhow::Error> {
    match config_file {
        Some(config_path) => {
            tracing::info!(path = ?config_path, "Loading configuration");
            KeysweepConfig::load_from_file(&config_path.to_path_buf())
        }
        None => {
            let default_config_path = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default_config_path.exists() {
                tracing::info!(path = ?default_config_path, "Loading default configuration");
                KeysweepConfig::load_from_file(&default_config_path)
            } else {
                tracing::info!(
                    "No config file specified and default '{DEFAULT_CONFIG_PATH}' not found, using built-in defaults"
                );
                Ok(KeysweepConfig::default())
            }
        }
    }
}

fn apply_overrides(cli: &Cli, config: &mut KeysweepConfig) {
    if let Some(length) = cli.length {
        config.keyspace.length = length;
    }
    if let Some(alphabet) = &cli.alphabet {
        config.keyspace.alphabet = alphabet.clone();
    }
    match (cli.order, cli.seed) {
        (Some(OrderArg::Lexicographic), _) => {
            config.keyspace.order = EnumerationOrder::Lexicographic;
        }
        (Some(OrderArg::FrequencyBiased), _) => {
            config.keyspace.order = EnumerationOrder::frequency_biased();
        }
        (Some(OrderArg::Shuffled), seed) => {
            let seed = match (&config.keyspace.order, seed) {
                (_, Some(seed)) => seed,
                (EnumerationOrder::Shuffled { seed }, None) => *seed,
                _ => 0,
            };
            config.keyspace.order = EnumerationOrder::Shuffled { seed };
        }
        (None, Some(new_seed)) => match &mut config.keyspace.order {
            EnumerationOrder::Shuffled { seed } => *seed = new_seed,
            other => tracing::warn!(order = %other, "--seed only applies to the shuffled order"),
        },
        (None, None) => {}
    }

    if let Some(threads) = cli.threads {
        config.search.threads = threads;
    }
    if cli.sequential {
        config.search.executor_type = ExecutorKind::Sequential;
    }
    if let Some(oversubscription) = cli.oversubscription {
        config.search.oversubscription = oversubscription;
    }

    if let Some(md5) = &cli.md5 {
        config.target.target_type = TargetType::Md5Digest;
        config.target.md5_digest = Some(md5.clone());
    }
    if cli.archive.is_some() || cli.entry.is_some() {
        config.target.target_type = TargetType::Archive;
        let settings = config.target.archive.get_or_insert_with(Default::default);
        if let Some(path) = &cli.archive {
            settings.path = path.clone();
        }
        if let Some(entry) = &cli.entry {
            settings.entry = Some(entry.clone());
        }
    }

    if let Some(output) = &cli.output {
        config.output.path = output.clone();
    }
    if cli.write_payload {
        config.output.content = SinkContent::Payload;
    }
}

fn build_oracle(config: &KeysweepConfig) -> Result<Box<dyn Oracle>, anyhow::Error> {
    match config.target.target_type {
        TargetType::Archive => {
            let settings = config.target.archive_settings();
            let oracle = ZipArchiveOracle::open(&settings.path, settings.entry.as_deref())?;
            tracing::info!(
                archive = ?settings.path,
                entry = oracle.entry_name(),
                "Archive target ready"
            );
            Ok(Box::new(oracle))
        }
        TargetType::Md5Digest => {
            let hex = config.target.md5_digest.as_deref().ok_or_else(|| {
                anyhow::anyhow!("target-type \"md5-digest\" requires an md5-digest value")
            })?;
            Ok(Box::new(Md5DigestOracle::from_hex(hex)?))
        }
    }
}

fn write_report_json(path: &Path, summary: &RunSummary<'_>) -> Result<(), anyhow::Error> {
    let json = serde_json::to_string_pretty(summary)
        .map_err(|e| anyhow::anyhow!("Failed to serialize run report: {}", e))?;
    std::fs::write(path, json)
        .map_err(|e| anyhow::anyhow!("Failed to write run report to {:?}: {}", path, e))?;
    tracing::info!(path = ?path, "Run report written");
    Ok(())
}

fn run(cli: Cli) -> Result<ExitCode, anyhow::Error> {
    let mut config = load_config(cli.config_file.as_deref())?;
    apply_overrides(&cli, &mut config);

    let scheduler = Scheduler::new(config.to_search_params()?)?;
    let oracle = build_oracle(&config)?;
    let sink = FileSink::new(config.output.path.clone(), config.output.content);

    let (report, sink_error) = match scheduler.run(oracle.as_ref(), &TracingReporter, &sink) {
        Ok(report) => (report, None),
        Err(SearchError::Sink { report, source }) => (*report, Some(source)),
        Err(e) => return Err(e.into()),
    };

    let code = match &report.outcome {
        SearchOutcome::Found(discovery) => {
            let saved = match &sink_error {
                None => format!("saved to {:?}", sink.path()),
                Some(_) => format!("NOT saved to {:?}", sink.path()),
            };
            println!(
                "Found {} after {} attempts in {:.2}s, {saved}",
                discovery.candidate,
                report.attempts,
                report.elapsed.as_secs_f64(),
            );
            ExitCode::SUCCESS
        }
        SearchOutcome::Exhausted { keyspace } => {
            println!("No candidate out of {keyspace} unlocked the target");
            ExitCode::from(1)
        }
    };

    if let Some(path) = &cli.report_json {
        let summary = RunSummary::new(&report, &scheduler, config.target.target_type.clone());
        write_report_json(path, &summary)?;
    }

    match sink_error {
        Some(source) => Err(anyhow::Error::new(source).context("Search result could not be saved")),
        None => Ok(code),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_thread_names(true)
        .init();

    match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keysweep_core::config::ArchiveTargetSettings;
    use keysweep_core::{InMemorySink, NoOpReporter};

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("keysweep").chain(args.iter().copied()))
            .expect("Arguments should parse")
    }

    #[test]
    fn cli_overrides_config_values() {
        let cli = parse(&[
            "--length",
            "4",
            "--alphabet",
            "01",
            "--threads",
            "3",
            "--oversubscription",
            "5",
            "--output",
            "out.txt",
            "--write-payload",
            "--archive",
            "vault.zip",
            "--entry",
            "key.txt",
        ]);
        let mut config = KeysweepConfig::default();
        apply_overrides(&cli, &mut config);

        assert_eq!(config.keyspace.length, 4);
        assert_eq!(config.keyspace.alphabet, "01");
        assert_eq!(config.search.threads, 3);
        assert_eq!(config.search.oversubscription, 5);
        assert_eq!(config.output.path, PathBuf::from("out.txt"));
        assert_eq!(config.output.content, SinkContent::Payload);
        assert_eq!(config.target.target_type, TargetType::Archive);
        assert_eq!(
            config.target.archive_settings(),
            ArchiveTargetSettings {
                path: PathBuf::from("vault.zip"),
                entry: Some("key.txt".to_string()),
            }
        );
    }

    #[test]
    fn order_flags_build_enumeration_orders() {
        let mut config = KeysweepConfig::default();
        apply_overrides(&parse(&["--order", "frequency-biased"]), &mut config);
        assert_eq!(config.keyspace.order, EnumerationOrder::frequency_biased());

        apply_overrides(&parse(&["--order", "shuffled", "--seed", "9"]), &mut config);
        assert_eq!(config.keyspace.order, EnumerationOrder::Shuffled { seed: 9 });

        apply_overrides(&parse(&["--seed", "11"]), &mut config);
        assert_eq!(
            config.keyspace.order,
            EnumerationOrder::Shuffled { seed: 11 },
            "A bare --seed should reseed an already shuffled order"
        );

        apply_overrides(&parse(&["--order", "lexicographic"]), &mut config);
        assert_eq!(config.keyspace.order, EnumerationOrder::Lexicographic);
    }

    #[test]
    fn sequential_flag_and_md5_target() {
        let mut config = KeysweepConfig::default();
        apply_overrides(
            &parse(&["--sequential", "--md5", "81dc9bdb52d04dc20036dbd8313ed055"]),
            &mut config,
        );
        assert_eq!(config.search.executor_type, ExecutorKind::Sequential);
        assert_eq!(config.target.target_type, TargetType::Md5Digest);
        assert!(build_oracle(&config).is_ok());
    }

    #[test]
    fn md5_conflicts_with_archive() {
        let result = Cli::try_parse_from(["keysweep", "--md5", "00", "--archive", "a.zip"]);
        assert!(result.is_err(), "--md5 and --archive must not be combined");
    }

    #[test]
    fn md5_target_requires_digest() {
        let mut config = KeysweepConfig::default();
        config.target.target_type = TargetType::Md5Digest;
        let err = build_oracle(&config).err().expect("Missing digest should be rejected");
        assert!(err.to_string().contains("md5-digest"), "Unexpected error: {err}");
    }

    #[test]
    fn missing_archive_is_rejected_before_search() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = KeysweepConfig::default();
        apply_overrides(
            &parse(&["--archive", dir.path().join("absent.zip").to_str().unwrap()]),
            &mut config,
        );
        assert!(build_oracle(&config).is_err());
    }

    #[test]
    fn sink_failure_still_writes_report_and_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("keysweep.toml");
        std::fs::write(&config_path, "").unwrap();
        let report_path = dir.path().join("report.json");
        let unwritable = dir.path().join("no-such-dir").join("password.txt");

        let cli = parse(&[
            "--config-file",
            config_path.to_str().unwrap(),
            "--md5",
            "81dc9bdb52d04dc20036dbd8313ed055",
            "--alphabet",
            "0123456789",
            "--length",
            "4",
            "--threads",
            "2",
            "--output",
            unwritable.to_str().unwrap(),
            "--report-json",
            report_path.to_str().unwrap(),
        ]);

        let err = run(cli).expect_err("A failed save must end with an error exit");
        assert!(
            err.to_string().contains("could not be saved"),
            "Unexpected error: {err:#}"
        );
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
        assert_eq!(
            json["candidate"], "1234",
            "The found password must survive a failed save"
        );
    }

    #[test]
    fn report_json_describes_the_run() {
        let mut config = KeysweepConfig::default();
        apply_overrides(
            &parse(&[
                "--md5",
                "81dc9bdb52d04dc20036dbd8313ed055",
                "--alphabet",
                "0123456789",
                "--length",
                "4",
                "--threads",
                "2",
            ]),
            &mut config,
        );
        let scheduler = Scheduler::new(config.to_search_params().unwrap()).unwrap();
        let oracle = build_oracle(&config).unwrap();
        let report = scheduler
            .run(oracle.as_ref(), &NoOpReporter, &InMemorySink::new())
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let summary = RunSummary::new(&report, &scheduler, config.target.target_type.clone());
        write_report_json(&path, &summary).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["outcome"], "found");
        assert_eq!(json["candidate"], "1234");
        assert_eq!(json["index"], 1234);
        assert_eq!(json["keyspace"], 10_000);
        assert_eq!(json["order"], "lexicographic");
        assert_eq!(json["target"], "md5-digest");
    }
}
