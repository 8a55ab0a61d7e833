use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock time as unix seconds, the format every persisted timestamp
/// uses. Clamps to 0 for clocks set before the epoch.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
