use chrono::{NaiveDate, NaiveDateTime, Timelike};

/// The toll business day closes at 08:00, not midnight.
pub const DAY_CUTOFF_HOUR: u32 = 8;

/// Business date a read is reported under. Reads before 08:00:00 belong
/// to the previous calendar day; 08:00:00 itself starts the new day.
pub fn resolve(read_time: NaiveDateTime) -> Option<NaiveDate> {
    let date = read_time.date();
    if read_time.hour() < DAY_CUTOFF_HOUR {
        date.pred_opt()
    } else {
        Some(date)
    }
}
