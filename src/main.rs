mod bank;
mod error;
mod output;
mod plazas;
mod qualification;
mod reconcile;
mod records;
mod report_date;
mod summary;
mod trip_window;
mod utils;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use output::{ProjectOutput, RunReport};
use reconcile::RunTotals;

/// Reconciles toll plaza Annual Pass reads into trip counts and a daily
/// ATP/NAP summary per plaza.
#[derive(Parser)]
#[clap(version)]
struct Args {
    /// Transaction CSV extract; repeat to combine several files
    #[clap(long, required = true)]
    input_path: Vec<PathBuf>,
    #[clap(long)]
    output_directory: PathBuf,
    /// Directory holding plazas.toml
    #[clap(long, env = "RECONCILER_CONFIG_DIR", default_value = "./config")]
    config_dir: PathBuf,
    /// Only look plazas up under this bank
    #[clap(long)]
    bank: Option<bank::Bank>,
    /// Only reconcile reads at this project's plazas
    #[clap(long)]
    project: Option<String>,
    #[clap(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("annual-pass-reconciler v{}", env!("CARGO_PKG_VERSION"));
    fs_err::create_dir_all(&args.output_directory)?;

    let mut report = RunReport::new(&args.input_path, args.bank, args.project.clone());
    info!("Run {}", report.run_id);

    match run(&args) {
        Ok((totals, projects)) => {
            info!(
                total_transactions = totals.total_transactions,
                total_nap = totals.total_nap,
                total_over_limit = totals.total_over_limit,
                needs_review = totals.needs_review,
                "Pipeline completed"
            );
            report.complete(totals, projects);
            report.write(&args.output_directory)
        }
        Err(err) => {
            error!("Pipeline failed: {err:#}");
            report.fail(&err);
            if let Err(write_err) = report.write(&args.output_directory) {
                warn!("Could not write the run report: {write_err:#}");
            }
            Err(err)
        }
    }
}

fn run(args: &Args) -> Result<(RunTotals, Vec<ProjectOutput>)> {
    let directory = plazas::PlazaDirectory::load(&args.config_dir)
        .with_context(|| format!("loading plaza directory from {}", args.config_dir.display()))?;

    let table = records::read_files(&args.input_path).context("reading transaction extracts")?;
    let mut transactions = records::transactions(&table)?;
    if let Some(project) = &args.project {
        plazas::retain_project(&mut transactions, &directory, project, args.bank);
    }
    if transactions.is_empty() {
        warn!("No data to reconcile");
    }

    plazas::enrich(&mut transactions, &directory, args.bank);
    let reconciliation = reconcile::reconcile(&transactions);
    let projects = output::write_outputs(&reconciliation, &args.output_directory)
        .context("writing reconciliation outputs")?;

    Ok((reconciliation.totals(), projects))
}
