use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::unbounded;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use phase_stability::analysis::tagger::{MissingKeyPolicy, Record, TagRule, TaskTagger};
use phase_stability::core::domain::{EvaluationMethod, HullPartition, ThermoParams};
use phase_stability::engine::external::json_store::JsonStore;
use phase_stability::engine::store::{EntryQuery, RecordStore};
use phase_stability::pipeline::batch::ThermoBuilder;
use phase_stability::pipeline::{BatchEvent, SystemStats};

// --- CLI Definitions ---

#[derive(Parser, Debug)]
#[command(author, version, about = "Phase stability analysis for computed energies", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build convex hulls and write one thermo document per material
    Thermo(ThermoArgs),
    /// Assign task types to calculation records using weighted rules
    Tag(TagArgs),
}

#[derive(Args, Debug)]
struct ThermoArgs {
    /// JSON array of entries
    #[arg(short, long)]
    input: PathBuf,

    /// JSON file receiving the documents (upserted by material_id)
    #[arg(short, long)]
    output: PathBuf,

    /// JSON file with ThermoParams; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of worker threads
    #[arg(short, long)]
    threads: Option<usize>,

    /// Stable/unstable boundary in eV/atom
    #[arg(long)]
    tolerance: Option<f64>,

    /// Evaluation methods, most preferred first (e.g. R2SCAN,GGA+U,GGA)
    #[arg(long, value_delimiter = ',')]
    priority: Vec<String>,

    /// Build a separate hull for each evaluation method
    #[arg(long)]
    per_method: bool,

    /// Only process entries inside this chemical system (e.g. Fe-O)
    #[arg(long)]
    chemsys: Option<String>,

    /// Write a per-system CSV summary here
    #[arg(long)]
    summary: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct TagArgs {
    /// JSON array of tag rules
    #[arg(short, long)]
    rules: PathBuf,

    /// JSON array of {"task_id": ..., "incar": {...}} records
    #[arg(long)]
    records: PathBuf,

    /// Score missing keys the way the historical tagger did
    #[arg(long)]
    legacy: bool,
}

#[derive(Debug, Deserialize)]
struct TaskRecord {
    task_id: String,
    #[serde(default)]
    incar: Record,
}

#[derive(Debug, Serialize)]
struct SummaryRow<'a> {
    chemsys: &'a str,
    entries: usize,
    compositions: usize,
    facets: usize,
    stable: usize,
    unstable: usize,
    failures: usize,
    documents: usize,
    elapsed_ms: u128,
}

impl<'a> From<&'a SystemStats> for SummaryRow<'a> {
    fn from(s: &'a SystemStats) -> Self {
        Self {
            chemsys: &s.chemsys,
            entries: s.entries,
            compositions: s.compositions,
            facets: s.facets,
            stable: s.stable,
            unstable: s.unstable,
            failures: s.failures,
            documents: s.documents,
            elapsed_ms: s.elapsed_ms,
        }
    }
}

// --- Initialization Helpers ---

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn load_params(args: &ThermoArgs) -> Result<ThermoParams> {
    let mut params = match &args.config {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => ThermoParams::default(),
    };

    if let Some(t) = args.threads {
        params.threads = t;
    }
    if let Some(tol) = args.tolerance {
        if !(tol.is_finite() && tol >= 0.0) {
            return Err(anyhow!("--tolerance must be a non-negative number, got {}", tol));
        }
        params.hull.energy_tolerance = tol;
    }
    if !args.priority.is_empty() {
        params.priority = args.priority.iter().map(|m| EvaluationMethod::new(m.trim())).collect();
    }
    if args.per_method {
        params.partition = HullPartition::PerMethod;
    }
    Ok(params)
}

fn write_summary(path: &Path, stats: &[SystemStats]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for s in stats {
        writer.serialize(SummaryRow::from(s))?;
    }
    writer.flush()?;
    Ok(())
}

// --- Commands ---

fn run_thermo(args: ThermoArgs) -> Result<()> {
    let params = load_params(&args)?;

    let _ = rayon::ThreadPoolBuilder::new()
        .num_threads(params.threads)
        .build_global();

    let store = JsonStore::new(&args.input, &args.output);
    let query = args
        .chemsys
        .clone()
        .map(EntryQuery::Chemsys)
        .unwrap_or(EntryQuery::All);
    let entries = store.entries(&query)?;
    if entries.is_empty() {
        warn!("No entries matched; nothing to do");
        return Ok(());
    }

    // Worker thread runs the batch; this thread reports progress.
    let (tx, rx) = unbounded();
    let builder = ThermoBuilder::new(params);
    let worker = thread::Builder::new()
        .name("Thermo-Worker".to_string())
        .spawn(move || builder.run(entries, &tx))
        .context("Failed to spawn worker thread")?;

    for event in rx {
        match event {
            BatchEvent::Log(msg) => info!("{}", msg),
            BatchEvent::SystemFinished(s) => info!(
                "{}: {} entries, {} stable, {} unstable, {} failed ({} ms)",
                s.chemsys, s.entries, s.stable, s.unstable, s.failures, s.elapsed_ms
            ),
            BatchEvent::SystemFailed { chemsys, error } => warn!("{}: {}", chemsys, error),
            BatchEvent::Finished => break,
        }
    }

    let report = worker
        .join()
        .map_err(|_| anyhow!("Worker thread panicked"))?;

    for failure in &report.entry_failures {
        error!("{} / {}: {}", failure.chemsys, failure.entry, failure.error);
    }
    for (chemsys, warning) in &report.warnings {
        warn!("{}: {}", chemsys, warning);
    }

    let written = store.upsert(&report.documents)?;
    info!("Wrote {} documents via {} store", written, store.name());

    if let Some(path) = &args.summary {
        write_summary(path, &report.stats)?;
        info!("Summary written to {}", path.display());
    }
    Ok(())
}

fn run_tag(args: TagArgs) -> Result<()> {
    let rules: Vec<TagRule> = serde_json::from_str(
        &fs::read_to_string(&args.rules)
            .with_context(|| format!("Failed to read rules {}", args.rules.display()))?,
    )
    .context("Invalid rules file")?;
    let records: Vec<TaskRecord> = serde_json::from_str(
        &fs::read_to_string(&args.records)
            .with_context(|| format!("Failed to read records {}", args.records.display()))?,
    )
    .context("Invalid records file")?;

    let policy = if args.legacy {
        MissingKeyPolicy::Legacy
    } else {
        MissingKeyPolicy::Ignore
    };
    let tagger = TaskTagger::new(rules).with_missing_policy(policy);

    for record in &records {
        match tagger.classify(&record.incar) {
            Some(task_type) => println!("{}\t{}", record.task_id, task_type),
            None => warn!("No rule matched task {}", record.task_id),
        }
    }
    Ok(())
}

// --- Main ---

fn main() -> Result<()> {
    setup_logging();
    let cli = Cli::parse();

    match cli.command {
        Command::Thermo(args) => run_thermo(args),
        Command::Tag(args) => run_tag(args),
    }
}
