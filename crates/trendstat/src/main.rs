// crates/trendstat/src/main.rs

use std::env;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use comfy_table::Table;
use serde_json::Value;
use trendstat_core::config::WindowColumns;
use trendstat_core::io::{self as record_io, RecordBatch};
use trendstat_core::projector::DATE_COLUMN;
use trendstat_core::{EngineConfig, Record, RollingStatsEngine};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Grouped rolling statistics for metric anomaly datasets", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enrich a batch of metric records with trailing-window statistics
    Compute(ComputeArgs),
    /// Print one group's rows oldest-first to check the calculation by hand
    Explain(ExplainArgs),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Json,
    Csv,
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Input file, or `-` for stdin
    #[arg(short, long)]
    input: PathBuf,
    #[arg(long, value_enum, default_value_t = Format::Json)]
    format: Format,
    /// Engine config TOML (defaults to $TRENDSTAT_CONFIG when set)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Window length in observations; repeat for several windows
    #[arg(long = "window")]
    windows: Vec<usize>,
    /// Entity key field; repeat for composite keys
    #[arg(long = "group-key")]
    group_keys: Vec<String>,
}

#[derive(Args, Debug)]
struct ComputeArgs {
    #[command(flatten)]
    input: InputArgs,
    /// Output file; stdout when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,
    #[arg(long)]
    pretty: bool,
}

#[derive(Args, Debug)]
struct ExplainArgs {
    #[command(flatten)]
    input: InputArgs,
    /// Entity key value(s), in group-key order
    #[arg(long = "entity", required = true)]
    entity: Vec<String>,
    #[arg(long)]
    metric: String,
    /// Most recent rows to show
    #[arg(long, default_value_t = 10)]
    limit: usize,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Compute(args) => handle_compute(args),
        Command::Explain(args) => handle_explain(args),
    }
}

fn handle_compute(args: ComputeArgs) -> Result<()> {
    let engine = build_engine(&args.input)?;
    let batch = read_batch(&args.input)?;

    let output = engine
        .run(&batch.records)
        .context("failed to compute rolling statistics")?;
    let records = output.to_records()?;

    let writer: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(
            File::create(path)
                .with_context(|| format!("failed to create output file {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };
    let mut writer = BufWriter::new(writer);

    match args.input.format {
        Format::Json => {
            record_io::write_json_records(&mut writer, &records, batch.envelope, args.pretty)?
        }
        Format::Csv => record_io::write_csv_records(&mut writer, &records)?,
    }
    writer.flush()?;

    info!(
        rows = records.len(),
        dropped = output.dropped.total_dropped(),
        groups = output.group_count,
        "wrote enriched records"
    );
    Ok(())
}

fn handle_explain(args: ExplainArgs) -> Result<()> {
    let engine = build_engine(&args.input)?;
    check_entity(engine.config(), &args.entity)?;
    let batch = read_batch(&args.input)?;
    let records = engine.run_records(&batch.records)?;

    let config = engine.config();
    let window = WindowColumns::new(config.windows[0]);

    // Output is newest first; keep the most recent rows, then show them oldest first.
    let mut rows: Vec<&Record> = records
        .iter()
        .filter(|record| matches_group(record, config, &args.entity, &args.metric))
        .take(args.limit)
        .collect();
    rows.reverse();

    if rows.is_empty() {
        println!(
            "No rows found for {} / {}",
            args.entity.join("+"),
            args.metric
        );
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec![
        DATE_COLUMN.to_string(),
        config.value_field.clone(),
        window.mean.clone(),
        window.std.clone(),
        window.z_score.clone(),
        window.pct_change.clone(),
    ]);
    for record in rows {
        table.add_row(vec![
            cell(record, DATE_COLUMN),
            cell(record, &config.value_field),
            cell(record, &window.mean),
            cell(record, &window.std),
            cell(record, &window.z_score),
            cell(record, &window.pct_change),
        ]);
    }

    println!("{} / {}", args.entity.join("+"), args.metric);
    println!("{table}");
    Ok(())
}

fn build_engine(args: &InputArgs) -> Result<RollingStatsEngine> {
    let config_path = args
        .config
        .clone()
        .or_else(|| env::var_os("TRENDSTAT_CONFIG").map(PathBuf::from));

    let mut config = match config_path {
        Some(path) => EngineConfig::load(&path)
            .with_context(|| format!("failed to load engine config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if !args.windows.is_empty() {
        config = config.with_windows(args.windows.clone());
    }
    if !args.group_keys.is_empty() {
        config = config.with_group_keys(args.group_keys.iter().cloned());
    }

    RollingStatsEngine::new(config).context("invalid engine configuration")
}

fn read_batch(args: &InputArgs) -> Result<RecordBatch> {
    let reader = open_input(&args.input)?;
    let batch = match args.format {
        Format::Json => record_io::read_json_records(reader),
        Format::Csv => record_io::read_csv_records(reader),
    }
    .with_context(|| format!("failed to read records from {}", args.input.display()))?;

    info!(records = batch.records.len(), "read input batch");
    Ok(batch)
}

fn open_input(path: &Path) -> Result<Box<dyn Read>> {
    if path.as_os_str() == "-" {
        return Ok(Box::new(io::stdin().lock()));
    }
    let file = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

fn check_entity(config: &EngineConfig, entity: &[String]) -> Result<()> {
    if entity.len() != config.group_keys.len() {
        bail!(
            "expected {} --entity value(s) for group keys {}, got {}",
            config.group_keys.len(),
            config.group_keys.join(", "),
            entity.len()
        );
    }
    Ok(())
}

fn matches_group(record: &Record, config: &EngineConfig, entity: &[String], metric: &str) -> bool {
    let entity_matches = config
        .group_keys
        .iter()
        .zip(entity)
        .all(|(key, expected)| record.get(key).and_then(Value::as_str) == Some(expected.as_str()));
    entity_matches && record.get(&config.metric_field).and_then(Value::as_str) == Some(metric)
}

fn cell(record: &Record, column: &str) -> String {
    match record.get(column) {
        None | Some(Value::Null) => "-".to_string(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}
