use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use costwatch_core::CostwatchConfig;
use costwatch_core::config::DEFAULT_CONFIG_FILE;

mod commands;

#[derive(Parser)]
#[command(
    name = "costwatch",
    about = "costwatch — GCP billing export anomaly detector",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Config file (default: ./costwatch.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run detection once for a report date and notify.
    ///
    /// The report date defaults to yesterday (UTC). Exit status is 0 unless
    /// the run fails, or anomalies are found with --fail-on-anomaly (2).
    Run {
        /// Report date (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<chrono::NaiveDate>,
        /// Output format: text or json
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Write the report to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Detect without sending notifications
        #[arg(long)]
        dry_run: bool,
        /// Notify even if this anomaly set was already delivered
        #[arg(long)]
        force: bool,
        /// Exit with status 2 when anomalies are found
        #[arg(long)]
        fail_on_anomaly: bool,
    },
    /// Run detection on an interval until interrupted.
    Watch {
        /// Interval between runs, e.g. "24h" (default: schedule.interval)
        #[arg(short, long)]
        interval: Option<String>,
        /// Detect without sending notifications
        #[arg(long)]
        dry_run: bool,
    },
    /// Show recorded runs, newest first.
    History {
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
        /// Output format: text or json
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Generate a costwatch.toml scaffold.
    Init {
        #[arg(short, long, default_value = ".")]
        path: PathBuf,
        /// Billing export table to put in the scaffold
        #[arg(short, long)]
        table: Option<String>,
    },
    /// Print the effective settings with secrets redacted.
    Config,
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info,costwatch=debug"))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

/// Load the explicit config file, or `./costwatch.toml` if it exists.
fn load_config(explicit: Option<&Path>) -> anyhow::Result<CostwatchConfig> {
    match explicit {
        Some(path) => CostwatchConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            if default.is_file() {
                Ok(CostwatchConfig::from_file(default)?)
            } else {
                Ok(CostwatchConfig::default())
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    if let Commands::Init { path, table } = &cli.command {
        commands::init::init(path, table.as_deref())?;
        return Ok(ExitCode::SUCCESS);
    }

    let file = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            date,
            format,
            output,
            dry_run,
            force,
            fail_on_anomaly,
        } => {
            commands::run::run(
                file,
                commands::run::RunArgs {
                    date,
                    format,
                    output,
                    dry_run,
                    force,
                    fail_on_anomaly,
                },
            )
            .await
        }
        Commands::Watch { interval, dry_run } => {
            commands::watch::watch(file, interval.as_deref(), dry_run).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::History { limit, format } => {
            commands::history::history(file, limit, format)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config => {
            commands::config::show(file)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Init { .. } => Ok(ExitCode::SUCCESS),
    }
}
