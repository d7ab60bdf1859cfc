use chrono::{NaiveDateTime, TimeDelta};

/// A usage window runs for 24 hours from the read that opened it.
pub const WINDOW_LENGTH_HOURS: i64 = 24;

/// One read of a (plaza, vehicle) partition: its row index in the input
/// table and its timestamp, if it had a usable one.
pub type PartitionMember = (usize, Option<NaiveDateTime>);

#[derive(Clone, Copy, Debug)]
struct TripWindow {
    end: NaiveDateTime,
    trip_count: u32,
}

/// Numbers reads within rolling 24 hour windows. `read_times` must be
/// sorted ascending. A read exactly at the window end still belongs to
/// that window; only a strictly later read opens a new one.
pub fn assign_trip_counts(read_times: &[NaiveDateTime]) -> Vec<u32> {
    let window_length = TimeDelta::hours(WINDOW_LENGTH_HOURS);
    read_times
        .iter()
        .scan(None, |current_window: &mut Option<TripWindow>, &read_time| {
            let window = match *current_window {
                Some(window) if read_time <= window.end => TripWindow {
                    trip_count: window.trip_count + 1,
                    ..window
                },
                _ => TripWindow {
                    end: read_time
                        .checked_add_signed(window_length)
                        .unwrap_or(NaiveDateTime::MAX),
                    trip_count: 1,
                },
            };
            *current_window = Some(window);
            Some(window.trip_count)
        })
        .collect()
}

/// Orders one partition chronologically and assigns trip counts.
///
/// Members must arrive in input row order. Reads sharing a timestamp keep
/// that order. Reads without a timestamp cannot be placed in a window: they
/// come last, in input order, with no trip count.
pub fn segment_partition(members: &[PartitionMember]) -> Vec<(usize, Option<u32>)> {
    let mut timed: Vec<(usize, NaiveDateTime)> = members
        .iter()
        .filter_map(|&(index, read_time)| read_time.map(|t| (index, t)))
        .collect();
    timed.sort_by_key(|&(_, read_time)| read_time);

    let read_times: Vec<NaiveDateTime> = timed.iter().map(|&(_, t)| t).collect();
    let trip_counts = assign_trip_counts(&read_times);

    let untimed = members
        .iter()
        .filter(|(_, read_time)| read_time.is_none())
        .map(|&(index, _)| (index, None));

    timed
        .iter()
        .zip(trip_counts)
        .map(|(&(index, _), trip_count)| (index, Some(trip_count)))
        .chain(untimed)
        .collect()
}
