use chrono::NaiveDate;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::qualification::{is_over_limit, is_qualified_nap};
use super::records::Transaction;
use super::report_date;
use super::summary::{self, DailySummary};
use super::trip_window::{PartitionMember, segment_partition};

#[derive(Clone, Debug, PartialEq)]
pub struct ReconciledTransaction {
    pub transaction: Transaction,
    /// `None` when the read had no usable timestamp, plaza or vehicle.
    pub trip_count: Option<u32>,
    pub report_date: Option<NaiveDate>,
    pub is_qualified_nap: bool,
    /// Set when the row could not be windowed or dated.
    pub needs_review: bool,
}

#[derive(Debug)]
pub struct Reconciliation {
    pub transactions: Vec<ReconciledTransaction>,
    pub daily_summary: Vec<DailySummary>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RunTotals {
    pub total_transactions: usize,
    pub total_nap: usize,
    pub total_over_limit: usize,
    pub summary_rows: usize,
    pub needs_review: usize,
    /// Rows left out of the daily summary.
    pub unattributed: usize,
}

/// Windows, dates, classifies and summarises a batch of transactions.
///
/// Rows come back ordered by plaza, vehicle and read time, with reads
/// that have no timestamp after the timed reads of their partition.
/// Reads missing a plaza or vehicle are never windowed together; they are
/// handled like untimed reads.
pub fn reconcile(transactions: &[Transaction]) -> Reconciliation {
    let mut partitions: BTreeMap<(&str, &str), Vec<PartitionMember>> = BTreeMap::new();
    for (index, transaction) in transactions.iter().enumerate() {
        let read_time = transaction
            .reader_read_time
            .filter(|_| transaction.has_window_key());
        partitions
            .entry((
                transaction.plaza_id.as_str(),
                transaction.vehicle_reg_no.as_str(),
            ))
            .or_default()
            .push((index, read_time));
    }
    debug!(partitions = partitions.len(), "Partitioned by plaza and vehicle");

    let partitions: Vec<Vec<PartitionMember>> = partitions.into_values().collect();
    let segmented: Vec<Vec<(usize, Option<u32>)>> = partitions
        .par_iter()
        .map(|members| segment_partition(members))
        .collect();

    let reconciled: Vec<ReconciledTransaction> = segmented
        .into_iter()
        .flatten()
        .map(|(index, trip_count)| reconcile_row(&transactions[index], trip_count))
        .collect();

    let daily_summary = summary::summarize(&reconciled);
    info!(
        transactions = reconciled.len(),
        summary_rows = daily_summary.len(),
        "Reconciled transactions"
    );

    Reconciliation {
        transactions: reconciled,
        daily_summary,
    }
}

fn reconcile_row(transaction: &Transaction, trip_count: Option<u32>) -> ReconciledTransaction {
    let report_date = transaction.reader_read_time.and_then(report_date::resolve);
    ReconciledTransaction {
        transaction: transaction.clone(),
        trip_count,
        report_date,
        is_qualified_nap: trip_count.is_some_and(is_qualified_nap),
        needs_review: trip_count.is_none() || report_date.is_none(),
    }
}

impl Reconciliation {
    pub fn totals(&self) -> RunTotals {
        RunTotals {
            total_transactions: self.transactions.len(),
            total_nap: self.transactions.iter().filter(|row| row.is_qualified_nap).count(),
            total_over_limit: self
                .transactions
                .iter()
                .filter(|row| is_over_limit(row.trip_count))
                .count(),
            summary_rows: self.daily_summary.len(),
            needs_review: self.transactions.iter().filter(|row| row.needs_review).count(),
            unattributed: self
                .transactions
                .iter()
                .filter(|row| summary::summary_key(row).is_none())
                .count(),
        }
    }
}
