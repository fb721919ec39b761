//! Funnel CLI - Command-line interface for Funnel Flux
//!
//! Commands:
//! - sessionize: Turn a raw event log into the session table
//! - metrics: Compute the funnel report from a raw log or a stored session table
//! - validate: Validate raw event records
//! - schema: Print input/output schema information

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use funnel_flux::schema::{RawEventReader, SCHEMA_VERSION};
use funnel_flux::store::{self, CsvDirStore, SessionRow, SESSION_TABLE};
use funnel_flux::types::{FunnelReport, TrailingCyclePolicy};
use funnel_flux::{FunnelConfig, FunnelError, FunnelProcessor, FUNNEL_VERSION, PRODUCER_NAME};

/// Funnel - Batch compute engine for purchase-funnel metrics
#[derive(Parser)]
#[command(name = "funnel")]
#[command(author = "Synheart AI Inc")]
#[command(version = FUNNEL_VERSION)]
#[command(about = "Compute purchase-funnel metrics from customer event logs", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Turn a raw event log into the session table
    Sessionize {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Output format
        #[arg(long, default_value = "csv")]
        output_format: TableFormat,

        /// Also save the table into a CSV store directory
        #[arg(long)]
        store_dir: Option<PathBuf>,

        /// Table name inside the store
        #[arg(long, default_value = SESSION_TABLE)]
        table: String,

        /// Segment customers on worker threads
        #[arg(long)]
        parallel: bool,

        /// Worker count for parallel segmentation
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Compute the funnel report
    Metrics {
        /// Raw event log (use - for stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// CSV store directory; read the session table from here when no input is given
        #[arg(long)]
        store_dir: Option<PathBuf>,

        /// Table name inside the store
        #[arg(long, default_value = SESSION_TABLE)]
        table: String,

        /// How purchase-less trailing cycles are treated
        #[arg(long)]
        trailing_cycles: Option<PolicyArg>,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Segment customers on worker threads
        #[arg(long)]
        parallel: bool,

        /// Worker count for parallel segmentation
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Validate raw event records
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print schema information
    Schema {
        /// Schema to print (input, table or output)
        #[arg(value_enum)]
        schema_type: SchemaType,

        /// Output as JSON schema
        #[arg(long)]
        json_schema: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum TableFormat {
    /// Comma-separated values with the session table header
    Csv,
    /// JSON array of rows
    Json,
    /// Newline-delimited JSON (one row per line)
    Ndjson,
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    /// Keep trailing purchase-less cycles in the averages
    Include,
    /// Drop cycles that did not end in a purchase
    Exclude,
}

impl From<PolicyArg> for TrailingCyclePolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Include => TrailingCyclePolicy::Include,
            PolicyArg::Exclude => TrailingCyclePolicy::Exclude,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Raw event records
    Input,
    /// Session table columns
    Table,
    /// Funnel report
    Output,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

/// Install the stderr subscriber; `RUST_LOG` wins over `-v`
fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(verbose >= 2)
        .init();

    debug!("funnel started with verbosity level: {}", verbose);
}

fn run(cli: Cli) -> Result<(), FunnelCliError> {
    let config = match &cli.config {
        Some(path) => FunnelConfig::load(path)?,
        None => FunnelConfig::default(),
    };

    match cli.command {
        Commands::Sessionize {
            input,
            output,
            output_format,
            store_dir,
            table,
            parallel,
            workers,
        } => {
            let config = apply_overrides(config, None, parallel, workers)?;
            cmd_sessionize(
                config,
                &input,
                &output,
                output_format,
                store_dir.as_deref(),
                &table,
            )
        }

        Commands::Metrics {
            input,
            store_dir,
            table,
            trailing_cycles,
            output,
            parallel,
            workers,
        } => {
            let config = apply_overrides(config, trailing_cycles, parallel, workers)?;
            cmd_metrics(config, input.as_deref(), store_dir.as_deref(), &table, &output)
        }

        Commands::Validate { input, json } => cmd_validate(&input, json),

        Commands::Schema {
            schema_type,
            json_schema,
        } => cmd_schema(schema_type, json_schema),
    }
}

/// Command-line flags take precedence over the configuration file
fn apply_overrides(
    mut config: FunnelConfig,
    trailing_cycles: Option<PolicyArg>,
    parallel: bool,
    workers: Option<usize>,
) -> Result<FunnelConfig, FunnelCliError> {
    if let Some(policy) = trailing_cycles {
        config.trailing_cycles = policy.into();
    }
    if parallel {
        config.parallel = true;
    }
    if workers.is_some() {
        config.workers = workers;
    }
    config.validate()?;
    Ok(config)
}

fn cmd_sessionize(
    config: FunnelConfig,
    input: &Path,
    output: &Path,
    output_format: TableFormat,
    store_dir: Option<&Path>,
    table: &str,
) -> Result<(), FunnelCliError> {
    let processor = FunnelProcessor::with_config(config);

    let records = RawEventReader::read_path(input)?;
    let sessioned = processor.sessionize(&records)?;

    if let Some(dir) = store_dir {
        let mut store = CsvDirStore::open(dir)?;
        processor.persist(&mut store, table, &sessioned)?;
    }

    let rows: Vec<SessionRow> = sessioned.iter().map(SessionRow::from).collect();
    let output_data = format_table(&rows, &output_format)?;
    write_output(output, &output_data)?;

    info!(rows = rows.len(), "wrote session table");
    Ok(())
}

fn cmd_metrics(
    config: FunnelConfig,
    input: Option<&Path>,
    store_dir: Option<&Path>,
    table: &str,
    output: &Path,
) -> Result<(), FunnelCliError> {
    let processor = FunnelProcessor::with_config(config);

    let report: FunnelReport = match (input, store_dir) {
        (Some(input), Some(dir)) => {
            let records = RawEventReader::read_path(input)?;
            let sessioned = processor.sessionize(&records)?;
            let mut store = CsvDirStore::open(dir)?;
            processor.persist(&mut store, table, &sessioned)?;
            let summaries = processor.aggregate_from_store(&store, table)?;
            processor.report(&summaries)
        }
        (Some(input), None) => {
            let records = RawEventReader::read_path(input)?;
            let sessioned = processor.sessionize(&records)?;
            let summaries = processor.summarize(sessioned.as_slice());
            processor.report(&summaries)
        }
        (None, Some(dir)) => {
            let store = CsvDirStore::open(dir)?;
            let summaries = processor.aggregate_from_store(&store, table)?;
            processor.report(&summaries)
        }
        (None, None) => return Err(FunnelCliError::MissingSource),
    };

    let output_data = serde_json::to_string_pretty(&report)? + "\n";
    write_output(output, &output_data)?;

    info!(customers = report.customers.len(), "wrote funnel report");
    Ok(())
}

fn cmd_validate(input: &Path, json: bool) -> Result<(), FunnelCliError> {
    let records = RawEventReader::read_path(input)?;
    let failures = RawEventReader::validate_records(&records);

    let report = ValidationReport {
        schema: SCHEMA_VERSION.to_string(),
        total_events: records.len(),
        valid_events: records.len() - failures.len(),
        invalid_events: failures.len(),
        errors: failures
            .iter()
            .map(|f| ValidationErrorDetail {
                index: f.index,
                event_id: f.event_id.clone(),
                error: f.error.to_string(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total events:   {}", report.total_events);
        println!("Valid events:   {}", report.valid_events);
        println!("Invalid events: {}", report.invalid_events);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!(
                    "  - Event {} (index {}): {}",
                    err.event_id.as_deref().unwrap_or("unknown"),
                    err.index,
                    err.error
                );
            }
        }
    }

    if report.invalid_events > 0 {
        Err(FunnelCliError::ValidationFailed(report.invalid_events))
    } else {
        Ok(())
    }
}

fn cmd_schema(schema_type: SchemaType, json_schema: bool) -> Result<(), FunnelCliError> {
    match schema_type {
        SchemaType::Input => {
            if json_schema {
                println!("{}", get_input_json_schema());
            } else {
                println!("Input Schema: {}", SCHEMA_VERSION);
                println!();
                println!("Each record is an object (JSON array or NDJSON):");
                println!("- id: string or number");
                println!("- type: event type, e.g. \"view\" or \"placed_order\"");
                println!("- event.customer-id: string, number or null (null = anonymous, dropped)");
                println!("- event.timestamp: ISO-8601 instant (naive values are UTC)");
            }
        }
        SchemaType::Table => {
            if json_schema {
                println!("{}", get_table_json_schema());
            } else {
                println!("Session table: {}", SESSION_TABLE);
                println!();
                println!("- id: event id");
                println!("- type: event type");
                println!("- customer-id: customer key");
                println!("- timestamp: RFC 3339 instant");
                println!("- time_diff: seconds since the customer's previous event");
                println!("- session: session id (non-decreasing per customer)");
            }
        }
        SchemaType::Output => {
            if json_schema {
                println!("{}", get_output_json_schema());
            } else {
                println!("Output Schema: funnel report");
                println!();
                println!("- producer: {{ name, version, instance_id }}");
                println!("- computed_at_utc: RFC 3339 timestamp");
                println!("- trailing_cycles: include | exclude");
                println!("- median_visits_before_order: {{ customer_id: mean sessions per cycle }}");
                println!("- median_session_duration_minutes_before_order: {{ customer_id: mean seconds per cycle }}");
                println!("- customers: per-customer summaries");
                println!("- global: averages across customers (omitted when empty)");
                println!();
                println!("Note: the \"median\" keys hold means and durations are in seconds.");
            }
        }
    }

    Ok(())
}

// Helper functions

fn format_table(rows: &[SessionRow], format: &TableFormat) -> Result<String, FunnelCliError> {
    match format {
        TableFormat::Csv => {
            let mut buffer = Vec::new();
            store::write_csv_to(&mut buffer, rows)?;
            String::from_utf8(buffer).map_err(|e| FunnelCliError::Output(e.to_string()))
        }
        TableFormat::Json => Ok(serde_json::to_string_pretty(rows)? + "\n"),
        TableFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for row in rows {
                lines.push(serde_json::to_string(row)?);
            }
            Ok(lines.join("\n") + "\n")
        }
    }
}

fn write_output(output: &Path, data: &str) -> Result<(), FunnelCliError> {
    if output.to_string_lossy() == "-" {
        print!("{}", data);
    } else {
        fs::write(output, data)?;
    }
    Ok(())
}

fn get_input_json_schema() -> String {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": SCHEMA_VERSION,
        "description": "Raw customer event record",
        "type": "object",
        "required": ["id", "type", "event"],
        "properties": {
            "id": { "type": ["string", "number"] },
            "type": { "type": "string" },
            "event": {
                "type": "object",
                "required": ["customer-id", "timestamp"],
                "properties": {
                    "customer-id": { "type": ["string", "number", "null"] },
                    "timestamp": { "type": "string", "format": "date-time" }
                }
            }
        }
    })
    .to_string()
}

fn get_table_json_schema() -> String {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": SESSION_TABLE,
        "type": "object",
        "required": ["id", "type", "customer-id", "timestamp", "time_diff", "session"],
        "properties": {
            "id": { "type": "string" },
            "type": { "type": "string" },
            "customer-id": { "type": "string" },
            "timestamp": { "type": "string", "format": "date-time" },
            "time_diff": { "type": "number", "minimum": 0 },
            "session": { "type": "integer", "minimum": 1 }
        }
    })
    .to_string()
}

fn get_output_json_schema() -> String {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "funnel.report.v1",
        "description": "Purchase funnel report",
        "type": "object",
        "required": [
            "producer",
            "computed_at_utc",
            "trailing_cycles",
            "median_visits_before_order",
            "median_session_duration_minutes_before_order",
            "customers"
        ],
        "properties": {
            "producer": {
                "type": "object",
                "properties": {
                    "name": { "type": "string", "const": PRODUCER_NAME },
                    "version": { "type": "string" },
                    "instance_id": { "type": "string" }
                }
            },
            "computed_at_utc": { "type": "string", "format": "date-time" },
            "trailing_cycles": { "type": "string", "enum": ["include", "exclude"] },
            "median_visits_before_order": {
                "type": "object",
                "additionalProperties": { "type": "number" }
            },
            "median_session_duration_minutes_before_order": {
                "type": "object",
                "additionalProperties": { "type": "number" }
            },
            "customers": { "type": "array", "items": { "type": "object" } },
            "global": { "type": "object" }
        }
    })
    .to_string()
}

// Error types

#[derive(Debug)]
enum FunnelCliError {
    Io(io::Error),
    Funnel(FunnelError),
    Json(serde_json::Error),
    Output(String),
    MissingSource,
    ValidationFailed(usize),
}

impl From<io::Error> for FunnelCliError {
    fn from(e: io::Error) -> Self {
        FunnelCliError::Io(e)
    }
}

impl From<FunnelError> for FunnelCliError {
    fn from(e: FunnelError) -> Self {
        FunnelCliError::Funnel(e)
    }
}

impl From<serde_json::Error> for FunnelCliError {
    fn from(e: serde_json::Error) -> Self {
        FunnelCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<FunnelCliError> for CliError {
    fn from(e: FunnelCliError) -> Self {
        match e {
            FunnelCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            FunnelCliError::Funnel(e) => {
                let (code, hint) = match &e {
                    FunnelError::InputRead(_) => {
                        ("INPUT_READ_ERROR", "Check that the event log exists and is valid JSON")
                    }
                    FunnelError::JsonError(_) => ("ENCODING_ERROR", "Report this as a bug"),
                    FunnelError::MalformedEvent { .. } => {
                        ("MALFORMED_EVENT", "Run 'funnel validate' for details")
                    }
                    FunnelError::StorageError(_) | FunnelError::CsvError(_) => {
                        ("STORAGE_ERROR", "Check the store directory and table name")
                    }
                    FunnelError::ConfigError(_) => {
                        ("CONFIG_ERROR", "Check the configuration file and flags")
                    }
                    FunnelError::WorkerPool(_) => {
                        ("WORKER_POOL_ERROR", "Retry with fewer --workers or without --parallel")
                    }
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            FunnelCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            FunnelCliError::Output(msg) => CliError {
                code: "OUTPUT_ERROR".to_string(),
                message: msg,
                hint: None,
            },
            FunnelCliError::MissingSource => CliError {
                code: "MISSING_SOURCE".to_string(),
                message: "Nothing to compute from".to_string(),
                hint: Some("Pass --input, --store-dir, or both".to_string()),
            },
            FunnelCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} events failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    schema: String,
    total_events: usize,
    valid_events: usize,
    invalid_events: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    event_id: Option<String>,
    error: String,
}
