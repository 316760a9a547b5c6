use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};

mod aggregate;
mod counts;
mod filter;
mod forecast;
mod loader;
mod models;
mod report;
mod series;

use forecast::{ArimaForecaster, DriftForecaster};
use models::{AggregateResult, Dataset, FilterSelection, ALL};

const DATA_PATH_ENV: &str = "TCN_DATA_CSV";

#[derive(Parser)]
#[command(name = "tcn-paths")]
#[command(about = "Screening and enrollment summaries for the TCN PATHS study", long_about = None)]
struct Cli {
    /// CSV export to load (falls back to TCN_DATA_CSV)
    #[arg(long, global = true)]
    csv: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the values accepted by the site and enrollment type filters
    Options,
    /// Compute every chart and card for one filter selection
    Summary {
        #[arg(long, default_value = ALL)]
        site: String,
        #[arg(long, default_value = ALL)]
        enrollment_type: String,
        #[arg(long, value_enum, default_value_t = OutputFormat::Markdown)]
        format: OutputFormat,
        #[arg(long, value_enum, default_value_t = ForecasterKind::Arima)]
        forecaster: ForecasterKind,
        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Markdown,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum ForecasterKind {
    Arima,
    Drift,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let csv_path = match cli.csv {
        Some(path) => path,
        None => std::env::var(DATA_PATH_ENV)
            .map(PathBuf::from)
            .with_context(|| format!("pass --csv or set {DATA_PATH_ENV} to the study export"))?,
    };

    let dataset = loader::load_csv(&csv_path)
        .with_context(|| format!("failed to load dataset from {}", csv_path.display()))?;

    if dataset.is_empty() {
        warn!("{} contains no records", csv_path.display());
    }

    match cli.command {
        Commands::Options => {
            let options = filter::filter_options(&dataset);
            println!("Sites:");
            for site in &options.sites {
                println!("- {site}");
            }
            println!("Enrollment types:");
            for enrollment_type in &options.enrollment_types {
                println!("- {enrollment_type}");
            }
        }
        Commands::Summary {
            site,
            enrollment_type,
            format,
            forecaster,
            out,
        } => {
            let selection = FilterSelection::new(site, enrollment_type);
            if !filter::filter_options(&dataset).contains(&selection) {
                warn!(
                    "site {:?} / enrollment type {:?} does not appear in the dataset",
                    selection.site, selection.enrollment_type
                );
            }

            let result = summarize(&dataset, &selection, forecaster);
            let rendered = match format {
                OutputFormat::Markdown => report::build_report(&result),
                OutputFormat::Json => serde_json::to_string_pretty(&result)?,
            };

            match out {
                Some(path) => {
                    std::fs::write(&path, rendered)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    info!("Summary written to {}.", path.display());
                }
                None => println!("{rendered}"),
            }
        }
    }

    Ok(())
}

fn summarize(
    dataset: &Dataset,
    selection: &FilterSelection,
    forecaster: ForecasterKind,
) -> AggregateResult {
    match forecaster {
        ForecasterKind::Arima => aggregate::assemble(dataset, selection, &ArimaForecaster::new()),
        ForecasterKind::Drift => aggregate::assemble(dataset, selection, &DriftForecaster),
    }
}
