//! Wall-clock formatting for the two date shapes S3 speaks.

use jiff::Timestamp;

fn timestamp(unix_secs: i64) -> Timestamp {
    Timestamp::from_second(unix_secs).unwrap_or(Timestamp::UNIX_EPOCH)
}

/// `2024-01-01T00:00:00.000Z` — bucket creation dates and object
/// `LastModified` fields in listing XML.
pub fn iso8601_millis(unix_secs: i64) -> String {
    format!("{}.000Z", timestamp(unix_secs).strftime("%Y-%m-%dT%H:%M:%S"))
}

/// `Mon, 01 Jan 2024 00:00:00 GMT` — the `Last-Modified` header.
pub fn http_date(unix_secs: i64) -> String {
    timestamp(unix_secs)
        .strftime("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}
