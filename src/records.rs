use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::StringRecord;
use indicatif::ParallelProgressIterator;
use rayon::prelude::*;
use std::path::PathBuf;
use tracing::{info, warn};

use super::error::ReconcileError;
use super::utils::progress_bar_for_count;

/// Canonical column headers of a cleaned transaction extract.
pub mod columns {
    pub const PLAZA_ID: &str = "PlazaID";
    pub const VEHICLE_REG_NO: &str = "Vehicle Reg. No.";
    pub const TAG_ID: &str = "Tag ID";
    pub const READER_READ_TIME: &str = "Reader Read Time";
    pub const TRIP_TYPE: &str = "TripType";
    pub const PLAZA_NAME: &str = "PlazaName";
    pub const PROJECT_NAME: &str = "ProjectName";
    pub const BANK: &str = "Bank";
}

/// Checked in this order; the first one missing is reported.
pub const REQUIRED_COLUMNS: [&str; 3] = [
    columns::PLAZA_ID,
    columns::VEHICLE_REG_NO,
    columns::READER_READ_TIME,
];

/// Plaza codes are six digits, zero padded.
const PLAZA_ID_WIDTH: usize = 6;

/// Reason code headers the bank extracts use, in lookup order. Matched
/// case-insensitively.
const REASON_CODE_HEADERS: [&str; 5] = [
    "acq_txn_reason",
    "acqtxnreason",
    "ReasonCode",
    "TRC_VRC_REASON_CODE",
    "TransactionReasonCode",
];

const ANNUAL_PASS_VALUES: [&str; 3] = ["ANNUALPASS", "ANNUAL PASS", "ANNUAL_PASS"];

const SOURCE_MONTH_FORMAT: &str = "%b-%y";

const DATETIME_FORMATS: [&str; 7] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%d-%m-%Y %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

/// String cells as read from one or more transaction extracts.
#[derive(Debug, Default)]
pub struct RawTable {
    pub headers: StringRecord,
    pub records: Vec<StringRecord>,
}

impl RawTable {
    fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header.trim() == name)
    }

    fn required_column(&self, name: &'static str) -> Result<usize, ReconcileError> {
        self.column(name).ok_or(ReconcileError::MissingColumn(name))
    }

    /// Adds the rows of another extract, lining its columns up with the
    /// columns already in the table by header name. Headers not seen
    /// before are appended.
    pub fn append(&mut self, headers: &StringRecord, records: Vec<StringRecord>) {
        let mut positions = Vec::with_capacity(headers.len());
        for header in headers.iter() {
            let position = match self.column(header.trim()) {
                Some(position) => position,
                None => {
                    self.headers.push_field(header.trim());
                    self.headers.len() - 1
                }
            };
            positions.push(position);
        }

        let in_place = positions.iter().enumerate().all(|(i, &p)| i == p);
        for record in records {
            if in_place {
                self.records.push(record);
                continue;
            }
            let mut cells = vec![""; self.headers.len()];
            for (value, &position) in record.iter().zip(&positions) {
                cells[position] = value;
            }
            self.records.push(StringRecord::from(cells));
        }
    }

    #[cfg(test)]
    pub fn from_rows(headers: &[&str], rows: &[&[&str]]) -> Self {
        RawTable {
            headers: StringRecord::from(headers.to_vec()),
            records: rows.iter().map(|row| StringRecord::from(row.to_vec())).collect(),
        }
    }
}

/// One Annual Pass read at a toll plaza.
#[derive(Clone, Debug, PartialEq)]
pub struct Transaction {
    pub plaza_id: String,
    pub vehicle_reg_no: String,
    pub tag_id: Option<String>,
    /// `None` when the source value was empty or could not be parsed.
    pub reader_read_time: Option<NaiveDateTime>,
    pub trip_type: Option<String>,
    pub plaza_name: Option<String>,
    pub project_name: Option<String>,
    pub bank: Option<String>,
}

impl Transaction {
    pub fn new(plaza_id: &str, vehicle_reg_no: &str, reader_read_time: Option<NaiveDateTime>) -> Self {
        Transaction {
            plaza_id: normalize_plaza_id(plaza_id),
            vehicle_reg_no: vehicle_reg_no.trim().to_string(),
            tag_id: None,
            reader_read_time,
            trip_type: None,
            plaza_name: None,
            project_name: None,
            bank: None,
        }
    }

    /// Whether the row has both a plaza and a vehicle to partition on.
    pub fn has_window_key(&self) -> bool {
        !self.plaza_id.is_empty() && !self.vehicle_reg_no.is_empty()
    }

    /// Month of the read, e.g. `Jan-23`.
    pub fn source_month(&self) -> Option<String> {
        self.reader_read_time
            .map(|t| t.format(SOURCE_MONTH_FORMAT).to_string())
    }
}

/// Reads the given CSV extracts into one table. Every extract must carry
/// the required columns on its own.
pub fn read_files(paths: &[PathBuf]) -> Result<RawTable, ReconcileError> {
    let mut table = RawTable::default();
    for path in paths {
        info!("Reading {}", path.display());
        let file = fs_err::File::open(path)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(file);
        let headers = reader.headers()?.clone();
        if let Some(missing) = REQUIRED_COLUMNS
            .iter()
            .find(|required| !headers.iter().any(|header| header == **required))
        {
            return Err(ReconcileError::MissingColumn(*missing));
        }
        let mut records = reader.records().collect::<Result<Vec<_>, _>>()?;
        info!("Number of rows: {}", records.len());
        retain_annual_pass(&headers, &mut records);
        table.append(&headers, records);
    }
    Ok(table)
}

/// Keeps only Annual Pass reads when the extract has a reason code column.
/// Extracts without one are taken as already filtered.
pub fn retain_annual_pass(headers: &StringRecord, records: &mut Vec<StringRecord>) {
    let Some(reason) = REASON_CODE_HEADERS.iter().find_map(|candidate| {
        headers
            .iter()
            .position(|header| header.trim().eq_ignore_ascii_case(candidate))
    }) else {
        info!("No reason code column, keeping all {} rows", records.len());
        return;
    };

    let before = records.len();
    records.retain(|record| {
        let value = record.get(reason).unwrap_or("").trim().to_uppercase();
        ANNUAL_PASS_VALUES.iter().any(|pass| *pass == value)
    });
    info!(
        kept = records.len(),
        dropped = before - records.len(),
        "Filtered to Annual Pass reads on {}",
        headers.get(reason).unwrap_or_default()
    );
}

/// Converts the raw table into transactions, failing fast when a required
/// column is absent. Unparseable timestamps become `None`.
pub fn transactions(table: &RawTable) -> Result<Vec<Transaction>, ReconcileError> {
    let plaza_id = table.required_column(columns::PLAZA_ID)?;
    let vehicle_reg_no = table.required_column(columns::VEHICLE_REG_NO)?;
    let reader_read_time = table.required_column(columns::READER_READ_TIME)?;
    let tag_id = table.column(columns::TAG_ID);
    let trip_type = table.column(columns::TRIP_TYPE);
    let plaza_name = table.column(columns::PLAZA_NAME);
    let project_name = table.column(columns::PROJECT_NAME);
    let bank = table.column(columns::BANK);

    let progress = progress_bar_for_count(table.records.len());
    let transactions: Vec<Transaction> = table
        .records
        .par_iter()
        .progress_with(progress)
        .map(|record| Transaction {
            tag_id: cell(record, tag_id),
            trip_type: cell(record, trip_type),
            plaza_name: cell(record, plaza_name),
            project_name: cell(record, project_name),
            bank: cell(record, bank),
            ..Transaction::new(
                record.get(plaza_id).unwrap_or(""),
                record.get(vehicle_reg_no).unwrap_or(""),
                record.get(reader_read_time).and_then(parse_read_time),
            )
        })
        .collect();

    let unparseable = transactions
        .iter()
        .filter(|transaction| transaction.reader_read_time.is_none())
        .count();
    if unparseable > 0 {
        warn!(unparseable, "Transactions with a missing or unparseable Reader Read Time");
    }
    let keyless = transactions
        .iter()
        .filter(|transaction| !transaction.has_window_key())
        .count();
    if keyless > 0 {
        warn!(keyless, "Transactions without a PlazaID or Vehicle Reg. No.");
    }
    Ok(transactions)
}

fn cell(record: &StringRecord, index: Option<usize>) -> Option<String> {
    index
        .and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Trims a plaza ID and left pads it with zeros to six characters. A blank
/// ID stays empty.
pub fn normalize_plaza_id(plaza_id: &str) -> String {
    let plaza_id = plaza_id.trim();
    if plaza_id.is_empty() {
        return String::new();
    }
    format!("{:0>width$}", plaza_id, width = PLAZA_ID_WIDTH)
}

/// Parses a reader timestamp as local plaza wall-clock time.
pub fn parse_read_time(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(s) {
        return Some(with_offset.naive_local());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_parse_read_time_formats() {
        let expected = at("2023-01-02 07:59:00");
        assert_eq!(parse_read_time("2023-01-02 07:59:00"), Some(expected));
        assert_eq!(parse_read_time("2023-01-02T07:59:00"), Some(expected));
        assert_eq!(parse_read_time("2023-01-02 07:59"), Some(expected));
        assert_eq!(parse_read_time("02-01-2023 07:59:00"), Some(expected));
        assert_eq!(parse_read_time("02/01/2023 07:59"), Some(expected));
        assert_eq!(parse_read_time("2023-01-02T07:59:00+05:30"), Some(expected));
        assert_eq!(
            parse_read_time("2023-01-02"),
            Some(at("2023-01-02 00:00:00"))
        );
        assert_eq!(
            parse_read_time("2023-01-02 07:59:00.250").map(|t| t.and_utc().timestamp()),
            Some(expected.and_utc().timestamp())
        );
    }

    #[test]
    fn test_parse_read_time_rejects_garbage() {
        assert_eq!(parse_read_time(""), None);
        assert_eq!(parse_read_time("   "), None);
        assert_eq!(parse_read_time("not a time"), None);
        assert_eq!(parse_read_time("2023-13-45 10:00:00"), None);
    }

    #[test]
    fn test_normalize_plaza_id() {
        assert_eq!(normalize_plaza_id("123"), "000123");
        assert_eq!(normalize_plaza_id(" 220001 "), "220001");
        assert_eq!(normalize_plaza_id("1234567"), "1234567");
        assert_eq!(normalize_plaza_id("   "), "");
    }

    #[test]
    fn test_blank_keys_are_flagged() {
        let table = RawTable::from_rows(
            &["PlazaID", "Vehicle Reg. No.", "Reader Read Time"],
            &[
                &["142001", "", "2023-01-01 10:00:00"],
                &["", "MH01AB1234", "2023-01-01 10:00:00"],
                &["142001", "MH01AB1234", "2023-01-01 10:00:00"],
            ],
        );
        let transactions = transactions(&table).unwrap();
        assert_eq!(transactions[1].plaza_id, "");
        let keyed: Vec<bool> = transactions.iter().map(Transaction::has_window_key).collect();
        assert_eq!(keyed, vec![false, false, true]);
    }

    #[test]
    fn test_source_month() {
        let read = Transaction::new("142001", "A", Some(at("2023-01-02 07:59:00")));
        assert_eq!(read.source_month().as_deref(), Some("Jan-23"));
        assert_eq!(Transaction::new("142001", "A", None).source_month(), None);
    }

    #[test]
    fn test_retain_annual_pass() {
        let headers = StringRecord::from(vec!["PlazaID", "ACQ_TXN_REASON"]);
        let mut records: Vec<StringRecord> = [
            "ANNUALPASS",
            " annual pass ",
            "Annual_Pass",
            "NORMAL",
            "",
        ]
        .iter()
        .map(|reason| StringRecord::from(vec!["142001", *reason]))
        .collect();
        retain_annual_pass(&headers, &mut records);
        let kept: Vec<&str> = records.iter().map(|record| &record[1]).collect();
        assert_eq!(kept, vec!["ANNUALPASS", " annual pass ", "Annual_Pass"]);

        let headers = StringRecord::from(vec!["PlazaID", "Vehicle Reg. No."]);
        let mut records = vec![StringRecord::from(vec!["142001", "A"])];
        retain_annual_pass(&headers, &mut records);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_read_files_filters_each_extract() {
        let dir = tempfile::tempdir().unwrap();
        let with_reason = dir.path().join("with_reason.csv");
        let without_reason = dir.path().join("without_reason.csv");
        std::fs::write(
            &with_reason,
            "PlazaID,Vehicle Reg. No.,Reader Read Time,ReasonCode\n\
             123,A,2023-01-01 10:00:00,ANNUALPASS\n\
             123,B,2023-01-01 11:00:00,CASH\n",
        )
        .unwrap();
        std::fs::write(
            &without_reason,
            "PlazaID,Vehicle Reg. No.,Reader Read Time\n123,C,2023-01-01 12:00:00\n",
        )
        .unwrap();

        let table = read_files(&[with_reason, without_reason]).unwrap();
        let transactions = transactions(&table).unwrap();
        let vehicles: Vec<&str> = transactions.iter().map(|t| t.vehicle_reg_no.as_str()).collect();
        assert_eq!(vehicles, vec!["A", "C"]);
    }

    #[test]
    fn test_missing_required_column_is_named() {
        let table = RawTable::from_rows(
            &["PlazaID", "Reader Read Time"],
            &[&["123", "2023-01-01 10:00:00"]],
        );
        match transactions(&table) {
            Err(ReconcileError::MissingColumn(column)) => assert_eq!(column, "Vehicle Reg. No."),
            other => panic!("expected a missing column error, got {:?}", other),
        }
    }

    #[test]
    fn test_transactions_keep_bad_timestamps_as_none() {
        let table = RawTable::from_rows(
            &["PlazaID", "Vehicle Reg. No.", "Reader Read Time", "ProjectName"],
            &[
                &["123", " MH01AB1234 ", "2023-01-01 10:00:00", "GHOTI"],
                &["123", "MH01AB1234", "yesterday", ""],
            ],
        );
        let transactions = transactions(&table).unwrap();
        assert_eq!(transactions.len(), 2);
        assert_eq!(transactions[0].plaza_id, "000123");
        assert_eq!(transactions[0].vehicle_reg_no, "MH01AB1234");
        assert_eq!(transactions[0].reader_read_time, Some(at("2023-01-01 10:00:00")));
        assert_eq!(transactions[0].project_name.as_deref(), Some("GHOTI"));
        assert_eq!(transactions[1].reader_read_time, None);
        assert_eq!(transactions[1].project_name, None);
        assert_eq!(transactions[1].tag_id, None);
    }

    #[test]
    fn test_append_lines_up_columns_by_header() {
        let mut table = RawTable::from_rows(
            &["PlazaID", "Vehicle Reg. No.", "Reader Read Time"],
            &[&["1", "A", "2023-01-01 10:00:00"]],
        );
        table.append(
            &StringRecord::from(vec!["Reader Read Time", "Tag ID", "PlazaID", "Vehicle Reg. No."]),
            vec![StringRecord::from(vec!["2023-01-02 11:00:00", "TAG9", "2", "B"])],
        );
        assert_eq!(
            table.headers,
            StringRecord::from(vec!["PlazaID", "Vehicle Reg. No.", "Reader Read Time", "Tag ID"])
        );
        let transactions = transactions(&table).unwrap();
        assert_eq!(transactions[1].plaza_id, "000002");
        assert_eq!(transactions[1].vehicle_reg_no, "B");
        assert_eq!(transactions[1].tag_id.as_deref(), Some("TAG9"));
        assert_eq!(transactions[0].tag_id, None);
    }

    #[test]
    fn test_read_files_requires_columns_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.csv");
        let bad = dir.path().join("bad.csv");
        std::fs::write(&good, "PlazaID,Vehicle Reg. No.,Reader Read Time\n123,A,2023-01-01 10:00:00\n").unwrap();
        std::fs::write(&bad, "PlazaID,Reader Read Time\n123,2023-01-01 10:00:00\n").unwrap();

        let table = read_files(&[good.clone()]).unwrap();
        assert_eq!(table.records.len(), 1);

        match read_files(&[good, bad]) {
            Err(ReconcileError::MissingColumn(column)) => assert_eq!(column, "Vehicle Reg. No."),
            other => panic!("expected a missing column error, got {:?}", other),
        }
    }
}
