use anyhow::{Result, bail};
use chrono::{DateTime, NaiveDate, Utc};
use fs_err::File;
use indicatif::ProgressIterator;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

use super::bank::Bank;
use super::reconcile::{ReconciledTransaction, Reconciliation, RunTotals};
use super::records::columns;
use super::summary::DailySummary;
use super::utils::{path_component, progress_bar_for_count, write_json_file};

const READ_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const TRANSACTION_HEADERS: [&str; 13] = [
    columns::PLAZA_ID,
    columns::PLAZA_NAME,
    columns::PROJECT_NAME,
    columns::BANK,
    columns::VEHICLE_REG_NO,
    columns::TAG_ID,
    columns::READER_READ_TIME,
    "SourceMonth",
    columns::TRIP_TYPE,
    "TripCount",
    "ReportDate",
    "IsQualifiedNAP",
    "NeedsReview",
];

const SUMMARY_HEADERS: [&str; 6] = ["ProjectName", "PlazaID", "PlazaName", "ReportDate", "ATP", "NAP"];

/// Field order must match `TRANSACTION_HEADERS`.
#[derive(Serialize)]
struct TransactionRow<'a> {
    plaza_id: &'a str,
    plaza_name: Option<&'a str>,
    project_name: Option<&'a str>,
    bank: Option<&'a str>,
    vehicle_reg_no: &'a str,
    tag_id: Option<&'a str>,
    reader_read_time: Option<String>,
    source_month: Option<String>,
    trip_type: Option<&'a str>,
    trip_count: Option<u32>,
    report_date: Option<NaiveDate>,
    is_qualified_nap: bool,
    needs_review: bool,
}

impl<'a> From<&'a ReconciledTransaction> for TransactionRow<'a> {
    fn from(row: &'a ReconciledTransaction) -> Self {
        let transaction = &row.transaction;
        TransactionRow {
            plaza_id: &transaction.plaza_id,
            plaza_name: transaction.plaza_name.as_deref(),
            project_name: transaction.project_name.as_deref(),
            bank: transaction.bank.as_deref(),
            vehicle_reg_no: &transaction.vehicle_reg_no,
            tag_id: transaction.tag_id.as_deref(),
            reader_read_time: transaction
                .reader_read_time
                .map(|t| t.format(READ_TIME_FORMAT).to_string()),
            source_month: transaction.source_month(),
            trip_type: transaction.trip_type.as_deref(),
            trip_count: row.trip_count,
            report_date: row.report_date,
            is_qualified_nap: row.is_qualified_nap,
            needs_review: row.needs_review,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProjectOutput {
    pub project_name: String,
    pub transactions: usize,
    pub summary_rows: usize,
    pub directory: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

/// Written next to the CSV outputs so a run can be traced afterwards.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub bank: Option<Bank>,
    pub project: Option<String>,
    pub input_files: Vec<PathBuf>,
    pub status: RunStatus,
    pub totals: Option<RunTotals>,
    pub projects: Vec<ProjectOutput>,
    pub error: Option<String>,
}

impl RunReport {
    pub fn new(input_files: &[PathBuf], bank: Option<Bank>, project: Option<String>) -> Self {
        RunReport {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            bank,
            project,
            input_files: input_files.to_vec(),
            status: RunStatus::Running,
            totals: None,
            projects: Vec::new(),
            error: None,
        }
    }

    pub fn complete(&mut self, totals: RunTotals, projects: Vec<ProjectOutput>) {
        self.status = RunStatus::Completed;
        self.totals = Some(totals);
        self.projects = projects;
        self.generated_at = Utc::now();
    }

    pub fn fail(&mut self, error: &anyhow::Error) {
        self.status = RunStatus::Failed;
        self.error = Some(format!("{error:#}"));
        self.generated_at = Utc::now();
    }

    pub fn write(&self, output_directory: &Path) -> Result<()> {
        write_json_file("run_report", output_directory, self)
    }
}

/// Writes the reconciled rows and daily summary of each project into its
/// own directory. Rows without a project go to one review file.
pub fn write_outputs(reconciliation: &Reconciliation, output_directory: &Path) -> Result<Vec<ProjectOutput>> {
    let mut by_project: BTreeMap<&str, Vec<&ReconciledTransaction>> = BTreeMap::new();
    let mut unattributed: Vec<&ReconciledTransaction> = Vec::new();
    for row in &reconciliation.transactions {
        match row.transaction.project_name.as_deref() {
            Some(project) => by_project.entry(project).or_default().push(row),
            None => unattributed.push(row),
        }
    }

    let mut summary_by_project: BTreeMap<&str, Vec<&DailySummary>> = BTreeMap::new();
    for summary in &reconciliation.daily_summary {
        summary_by_project
            .entry(summary.project_name.as_str())
            .or_default()
            .push(summary);
    }

    let names = project_directory_names(by_project.keys().copied())?;

    let mut outputs = Vec::with_capacity(by_project.len());
    let progress = progress_bar_for_count(by_project.len());
    for (project, rows) in by_project.into_iter().progress_with(progress) {
        let name = &names[project];
        let directory = output_directory.join(name);
        fs_err::create_dir_all(&directory)?;

        write_transactions(
            &directory.join(format!("{name}_transactions_with_tripcount.csv")),
            &rows,
        )?;
        let summary = summary_by_project.remove(project).unwrap_or_default();
        write_summary(
            &directory.join(format!("{name}_daily_ATP_NAP_plaza.csv")),
            &summary,
        )?;

        info!(
            transactions = rows.len(),
            summary_rows = summary.len(),
            "Wrote project {}",
            project
        );
        outputs.push(ProjectOutput {
            project_name: project.to_string(),
            transactions: rows.len(),
            summary_rows: summary.len(),
            directory,
        });
    }

    if !unattributed.is_empty() {
        let path = output_directory.join("unattributed_transactions.csv");
        write_transactions(&path, &unattributed)?;
        info!(
            transactions = unattributed.len(),
            "Wrote rows without a project to {}",
            path.display()
        );
    }

    Ok(outputs)
}

/// Picks the directory name of every project before anything is written.
/// Fails when a name is unusable or two projects would share a directory.
fn project_directory_names<'a>(
    projects: impl Iterator<Item = &'a str>,
) -> Result<HashMap<&'a str, String>> {
    let mut names: HashMap<&str, String> = HashMap::new();
    let mut claimed: HashMap<String, &str> = HashMap::new();
    for project in projects {
        let Some(name) = path_component(project) else {
            bail!("project name {project:?} cannot be used as an output directory");
        };
        if let Some(other) = claimed.insert(name.clone(), project) {
            bail!("projects {other:?} and {project:?} would both be written to {name}");
        }
        names.insert(project, name);
    }
    Ok(names)
}

fn write_transactions(path: &Path, rows: &[&ReconciledTransaction]) -> Result<()> {
    let mut writer = csv_writer(path)?;
    writer.write_record(TRANSACTION_HEADERS)?;
    for row in rows {
        writer.serialize(TransactionRow::from(*row))?;
    }
    writer.flush()?;
    Ok(())
}

fn write_summary(path: &Path, rows: &[&DailySummary]) -> Result<()> {
    let mut writer = csv_writer(path)?;
    writer.write_record(SUMMARY_HEADERS)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn csv_writer(path: &Path) -> Result<csv::Writer<BufWriter<File>>> {
    let file = File::create(path)?;
    Ok(csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(BufWriter::new(file)))
}
