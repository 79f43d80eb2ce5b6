//! canparse - command-line interface for the CANEdge parser
//!
//! Commands:
//! - process: derive heartbeat, PSU SDO and timestamped logs for robots
//! - series: extract a heartbeat latency series for plotting
//! - doctor: diagnose data and configuration directories

use clap::{Parser, Subcommand, ValueEnum};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

use canedge_parser::config::{CONFIG_FILE_NAME, CONFIG_PATH_VAR, DATA_PATH_VAR};
use canedge_parser::discovery::list_bots;
use canedge_parser::normalizer::parse_calendar;
use canedge_parser::series::{read_latency_series, write_csv, SeriesQuery};
use canedge_parser::types::{format_latency, BotStatus, CobId, RunReport};
use canedge_parser::{
    process_bots, CanParseError, DataLayout, ParserConfig, PRODUCER_NAME, VERSION,
};

/// canparse - heartbeat and PSU SDO latency logs from CANEdge exports
#[derive(Parser)]
#[command(name = "canparse")]
#[command(version = VERSION)]
#[command(about = "Derive heartbeat and PSU SDO latency logs from CANEdge exports", long_about = None)]
struct Cli {
    /// Data root containing input/, output/ and plot/
    #[arg(long, env = DATA_PATH_VAR, global = true)]
    data_dir: Option<PathBuf>,

    /// Directory holding canparser.toml
    #[arg(long, env = CONFIG_PATH_VAR, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse the log folders of the given bots
    Process {
        /// Bots to parse ("*" for all bots)
        #[arg(long, num_args = 1.., required = true)]
        bots: Vec<String>,

        /// Delete input files once they are processed
        #[arg(long)]
        delete_input_files: bool,

        /// Also write the run report as JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Extract the latency series of one heartbeat COB-ID
    Series {
        /// Bot whose heartbeat log is read
        #[arg(long)]
        bot: String,

        /// COB-ID in hex (e.g. 705 or 0x80)
        #[arg(long)]
        id: String,

        /// Window start ("YYYY-MM-DD HH:MM:SS.ffffff", UTC)
        #[arg(long)]
        start: Option<String>,

        /// Window end ("YYYY-MM-DD HH:MM:SS.ffffff", UTC)
        #[arg(long)]
        end: Option<String>,

        /// Output file (use - for stdout); defaults to the plot directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "csv")]
        format: SeriesFormat,
    },

    /// Diagnose data and configuration directories
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum SeriesFormat {
    /// `;`-separated timestamp, latency and failure flag
    Csv,
    /// JSON array of samples
    Json,
}

impl SeriesFormat {
    fn extension(&self) -> &'static str {
        match self {
            SeriesFormat::Csv => "csv",
            SeriesFormat::Json => "json",
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

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

fn run(cli: Cli) -> Result<(), CliFailure> {
    let Cli {
        data_dir,
        config_dir,
        command,
    } = cli;

    if let Commands::Doctor { json } = command {
        init_logging(&ParserConfig::default().log_filter);
        return cmd_doctor(data_dir.as_deref(), config_dir.as_deref(), json);
    }

    let config = match config_dir.as_deref() {
        Some(dir) => ParserConfig::load_dir(dir)?,
        None => ParserConfig::default(),
    };
    init_logging(&config.log_filter);
    let layout = data_layout(data_dir)?;

    match command {
        Commands::Process {
            bots,
            delete_input_files,
            report,
            json,
        } => cmd_process(
            &layout,
            config,
            &bots,
            delete_input_files,
            report.as_deref(),
            json,
        ),

        Commands::Series {
            bot,
            id,
            start,
            end,
            output,
            format,
        } => cmd_series(
            &layout,
            &config,
            &bot,
            &id,
            start.as_deref(),
            end.as_deref(),
            output.as_deref(),
            format,
        ),

        Commands::Doctor { .. } => Ok(()),
    }
}

fn init_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn data_layout(data_dir: Option<PathBuf>) -> Result<DataLayout, CliFailure> {
    data_dir
        .map(DataLayout::new)
        .ok_or_else(|| CliFailure::Parse(CanParseError::MissingEnv(DATA_PATH_VAR.to_string())))
}

fn cmd_process(
    layout: &DataLayout,
    mut config: ParserConfig,
    bots: &[String],
    delete_input_files: bool,
    report_path: Option<&Path>,
    json: bool,
) -> Result<(), CliFailure> {
    config.delete_input_files |= delete_input_files;

    let report = process_bots(bots, layout, &config)?;

    if let Some(path) = report_path {
        fs::write(path, serde_json::to_string_pretty(&report)?)?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_run_report(&report);
    }

    Ok(())
}

fn print_run_report(report: &RunReport) {
    println!("Run Report {}", report.run_id);
    println!("==========");

    for bot in &report.bots {
        match bot.status {
            BotStatus::MissingInput => {
                println!("{}: input directory missing", bot.bot);
                continue;
            }
            BotStatus::NoLogFiles => {
                println!("{}: no log files", bot.bot);
                continue;
            }
            BotStatus::Failed => {
                println!(
                    "{}: failed: {}",
                    bot.bot,
                    bot.error.as_deref().unwrap_or("unknown error")
                );
                continue;
            }
            BotStatus::Processed => {}
        }

        let processed: u64 = bot.files.iter().map(|f| f.processed).sum();
        let skipped: u64 = bot.files.iter().map(|f| f.skipped + f.dropped).sum();
        println!(
            "{}: {} files, {} records, {} skipped",
            bot.bot,
            bot.files.len(),
            processed,
            skipped
        );

        for heartbeat in &bot.heartbeats {
            let min = heartbeat
                .min_failure_latency_s
                .map(|s| format!(" (min {:.6} s)", s))
                .unwrap_or_default();
            println!(
                "  heartbeat 0x{}: {} frames, {} failures{}",
                heartbeat.id, heartbeat.frames, heartbeat.failures, min
            );
        }

        let sdo = &bot.transactions;
        println!(
            "  psu sdo: {} frames, {} pairs, {} failures",
            sdo.frames,
            sdo.pairs,
            sdo.failures()
        );
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_series(
    layout: &DataLayout,
    config: &ParserConfig,
    bot: &str,
    id: &str,
    start: Option<&str>,
    end: Option<&str>,
    output: Option<&Path>,
    format: SeriesFormat,
) -> Result<(), CliFailure> {
    let id = CobId::from_hex(id)?;
    let start = start.map(parse_calendar).transpose()?;
    let end = end.map(parse_calendar).transpose()?;
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            return Err(CliFailure::InvalidWindow(format!(
                "end {} is before start {}",
                end, start
            )));
        }
    }

    let log_path = layout.bot_outputs(bot).heartbeats;
    let reader = BufReader::new(File::open(&log_path)?);
    let query = SeriesQuery::new(id).with_window(start, end);
    let samples = read_latency_series(reader, &query, &config.columns.id)?;

    let output = match output {
        Some(path) => path.to_path_buf(),
        None => {
            let plot_dir = layout.plot_dir();
            fs::create_dir_all(&plot_dir)?;
            plot_dir.join(format!("{}_{}_latency.{}", bot, id, format.extension()))
        }
    };

    let writer: Box<dyn Write> = if output.to_string_lossy() == "-" {
        Box::new(io::stdout().lock())
    } else {
        Box::new(BufWriter::new(File::create(&output)?))
    };

    match format {
        SeriesFormat::Csv => write_csv(&samples, writer)?,
        SeriesFormat::Json => {
            let mut writer = writer;
            serde_json::to_writer_pretty(&mut writer, &samples)?;
            writeln!(writer)?;
            writer.flush()?;
        }
    }

    let failures = samples.iter().filter(|s| s.failure).count();
    let worst = samples
        .iter()
        .map(|s| s.latency_s)
        .fold(None, |max: Option<f64>, v| Some(max.map_or(v, |m| m.max(v))));
    info!(
        bot,
        id = %id,
        samples = samples.len(),
        failures,
        worst_latency_s = worst,
        output = %output.display(),
        "wrote latency series"
    );

    Ok(())
}

fn cmd_doctor(
    data_dir: Option<&Path>,
    config_dir: Option<&Path>,
    json: bool,
) -> Result<(), CliFailure> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("{} {}", PRODUCER_NAME, VERSION),
    });

    // Configuration directory
    match config_dir {
        None => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Warning,
            message: format!("{} not set, using defaults", CONFIG_PATH_VAR),
        }),
        Some(dir) if !dir.is_dir() => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Error,
            message: format!("Config directory {} does not exist", dir.display()),
        }),
        Some(dir) => {
            let file = dir.join(CONFIG_FILE_NAME);
            let check = if !file.exists() {
                DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: format!("No {}, using defaults", CONFIG_FILE_NAME),
                }
            } else {
                match ParserConfig::load_dir(dir) {
                    Ok(config) => DoctorCheck {
                        name: "config".to_string(),
                        status: CheckStatus::Ok,
                        message: format!(
                            "{} valid (columns {} / {})",
                            file.display(),
                            config.columns.id,
                            config.columns.payload
                        ),
                    },
                    Err(e) => DoctorCheck {
                        name: "config".to_string(),
                        status: CheckStatus::Error,
                        message: format!("Invalid {}: {}", file.display(), e),
                    },
                }
            };
            checks.push(check);
        }
    }

    // Data directory layout
    match data_dir {
        None => checks.push(DoctorCheck {
            name: "data_dir".to_string(),
            status: CheckStatus::Error,
            message: format!("{} not set and --data-dir not given", DATA_PATH_VAR),
        }),
        Some(dir) => {
            let layout = DataLayout::new(dir);
            let input_dir = layout.input_dir();
            checks.push(match list_bots(&input_dir) {
                Ok(bots) => DoctorCheck {
                    name: "input".to_string(),
                    status: if bots.is_empty() {
                        CheckStatus::Warning
                    } else {
                        CheckStatus::Ok
                    },
                    message: format!("{} bot folders in {}", bots.len(), input_dir.display()),
                },
                Err(e) => DoctorCheck {
                    name: "input".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Cannot read {}: {}", input_dir.display(), e),
                },
            });

            let output_dir = layout.output_dir();
            checks.push(if output_dir.is_dir() {
                DoctorCheck {
                    name: "output".to_string(),
                    status: CheckStatus::Ok,
                    message: format!("{} exists", output_dir.display()),
                }
            } else {
                DoctorCheck {
                    name: "output".to_string(),
                    status: CheckStatus::Warning,
                    message: format!("{} will be created", output_dir.display()),
                }
            });
        }
    }

    checks.push(DoctorCheck {
        name: "thresholds".to_string(),
        status: CheckStatus::Ok,
        message: format!(
            "sync {} s, heartbeat {} s, psu sdo {} s",
            format_latency(chrono::Duration::milliseconds(
                canedge_parser::classifier::SYNC_THRESHOLD_MS
            )),
            format_latency(chrono::Duration::milliseconds(
                canedge_parser::classifier::HEARTBEAT_THRESHOLD_MS
            )),
            format_latency(canedge_parser::classifier::transaction_threshold()),
        ),
    });

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("canparse Doctor Report");
        println!("======================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(CliFailure::DoctorFailed)
    } else {
        Ok(())
    }
}

// Error types

#[derive(Debug)]
enum CliFailure {
    Io(io::Error),
    Parse(CanParseError),
    Json(serde_json::Error),
    InvalidWindow(String),
    DoctorFailed,
}

impl From<io::Error> for CliFailure {
    fn from(e: io::Error) -> Self {
        CliFailure::Io(e)
    }
}

impl From<CanParseError> for CliFailure {
    fn from(e: CanParseError) -> Self {
        CliFailure::Parse(e)
    }
}

impl From<serde_json::Error> for CliFailure {
    fn from(e: serde_json::Error) -> Self {
        CliFailure::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<CliFailure> for CliError {
    fn from(e: CliFailure) -> Self {
        match e {
            CliFailure::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            CliFailure::Parse(CanParseError::MissingEnv(var)) => CliError {
                code: "MISSING_ENV".to_string(),
                message: format!("Environment variable {} not defined", var),
                hint: Some("Set it or pass --data-dir".to_string()),
            },
            CliFailure::Parse(CanParseError::ConfigError(e)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: e.to_string(),
                hint: Some(format!("Check {}", CONFIG_FILE_NAME)),
            },
            CliFailure::Parse(e) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Ensure input files are CANEdge CSV exports".to_string()),
            },
            CliFailure::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            CliFailure::InvalidWindow(msg) => CliError {
                code: "INVALID_WINDOW".to_string(),
                message: msg,
                hint: Some("Pass --start before --end".to_string()),
            },
            CliFailure::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
