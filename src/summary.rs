use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

use super::reconcile::ReconciledTransaction;

/// ATP/NAP counts for one plaza on one report day.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DailySummary {
    #[serde(rename = "ProjectName")]
    pub project_name: String,
    #[serde(rename = "PlazaID")]
    pub plaza_id: String,
    #[serde(rename = "PlazaName")]
    pub plaza_name: String,
    #[serde(rename = "ReportDate")]
    pub report_date: NaiveDate,
    /// Every Annual Pass read.
    #[serde(rename = "ATP")]
    pub atp: u32,
    /// Reads that were within the first two trips of their window.
    #[serde(rename = "NAP")]
    pub nap: u32,
}

// Field order is the output sort order.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SummaryKey<'a> {
    project_name: &'a str,
    plaza_id: &'a str,
    report_date: NaiveDate,
    plaza_name: &'a str,
}

/// `None` for rows that were not windowed or cannot be attributed to a
/// project, plaza and day.
pub fn summary_key(row: &ReconciledTransaction) -> Option<SummaryKey<'_>> {
    row.trip_count?;
    let transaction = &row.transaction;
    Some(SummaryKey {
        project_name: transaction.project_name.as_deref()?,
        plaza_id: &transaction.plaza_id,
        report_date: row.report_date?,
        plaza_name: transaction.plaza_name.as_deref()?,
    })
}

pub fn summarize(rows: &[ReconciledTransaction]) -> Vec<DailySummary> {
    let mut counts: BTreeMap<SummaryKey, (u32, u32)> = BTreeMap::new();
    let mut unattributed = 0usize;

    for row in rows {
        let Some(key) = summary_key(row) else {
            unattributed += 1;
            continue;
        };
        let (atp, nap) = counts.entry(key).or_default();
        *atp += 1;
        if row.is_qualified_nap {
            *nap += 1;
        }
    }

    if unattributed > 0 {
        warn!(
            unattributed,
            "Transactions without a trip count, project, plaza name or report date left out of the daily summary"
        );
    }

    counts
        .into_iter()
        .map(|(key, (atp, nap))| DailySummary {
            project_name: key.project_name.to_string(),
            plaza_id: key.plaza_id.to_string(),
            plaza_name: key.plaza_name.to_string(),
            report_date: key.report_date,
            atp,
            nap,
        })
        .collect()
}
