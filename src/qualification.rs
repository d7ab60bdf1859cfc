/// Uses within one window that still count as ordinary Annual Pass usage.
pub const NAP_TRIP_LIMIT: u32 = 2;

/// The first two reads of a window are NAP qualified; the third and later
/// are over the limit.
pub fn is_qualified_nap(trip_count: u32) -> bool {
    trip_count <= NAP_TRIP_LIMIT
}

/// Rows that were windowed but fell past the NAP limit.
pub fn is_over_limit(trip_count: Option<u32>) -> bool {
    trip_count.is_some_and(|count| !is_qualified_nap(count))
}
