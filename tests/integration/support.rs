use chrono::{TimeZone, Utc};
use plottag::concurrency::{Backoff, RetryPolicy};
use plottag::{ImageRecord, OpenOptions, TagValue};
use std::time::Duration;

pub fn record(path: &str) -> ImageRecord {
    ImageRecord::with_timestamp(path, Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap())
}

pub fn tags(values: &[&str]) -> Vec<TagValue> {
    values.iter().map(|v| TagValue::from(*v)).collect()
}

/// No sleeping between attempts; SQLite's own busy wait still applies.
pub fn fast_options() -> OpenOptions {
    OpenOptions::new().retry(RetryPolicy::new(3, Duration::from_secs(2), Backoff::None))
}
