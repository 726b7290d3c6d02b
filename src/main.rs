mod actions;
mod api_client;
mod batch_client;
mod config;
mod countries;
mod data;
mod dimensions;
mod entities;
mod error;
mod extractor;
mod facts;
mod loader;
mod placements;
mod retry;
mod runner;
mod targeting;
mod transform;
mod warehouse;
mod workers;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use config::Config;
use error::Error;
use log::{error, info};
use runner::RunOutcome;

#[derive(Parser)]
struct Args {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, transform and load the pull window into the warehouse.
    Run {
        #[arg(long, help = "Date should be in the form YYYY-MM-DD", value_parser = validate_date)]
        start: Option<NaiveDate>,

        #[arg(long, help = "Date should be in the form YYYY-MM-DD", value_parser = validate_date)]
        end: Option<NaiveDate>,
    },
    /// Create the warehouse schema and unknown members only.
    Init,
}

fn validate_date(s: &str) -> Result<NaiveDate, String> {
    let error_message = "Invalid date, expected YYYY-MM-DD";

    let parts = s
        .split("-")
        .map(|part| part.parse::<u16>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| error_message)?;

    match parts.as_slice() {
        &[year, month, day] if month <= 12 && day <= 31 => {
            Ok(
                NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                    .ok_or(error_message)?,
            )
        }
        _ => Err(error_message.to_string()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    env_logger::init();

    match args.command {
        Command::Run { start, end } => match runner::run_pipeline(args.config, start, end).await {
            Ok(outcome) => {
                let stats = outcome.stats();
                if !stats.failed_tables.is_empty() {
                    error!("run completed with failed tables: {}", stats.failed_tables.join(", "));
                    std::process::exit(1);
                }
                match outcome {
                    RunOutcome::UpToDate(_) => info!("Nothing to load"),
                    RunOutcome::Completed(stats) => {
                        info!("run completed with {} warnings", stats.warnings.len())
                    }
                }
            }
            Err(err) => {
                error!("failed to run the pipeline: {}", err);
                std::process::exit(1);
            }
        },
        Command::Init => {
            if let Err(err) = runner::init_warehouse(&args.config) {
                error!("failed to initialize the warehouse: {}", err);
                std::process::exit(1);
            }
        }
    };

    Ok(())
}
