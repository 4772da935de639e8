//! Small shared helpers

/// Current wall-clock time as Unix milliseconds, the granularity used for
/// `last_modified` and tombstone timestamps.
pub fn unix_timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_timestamp_ms_is_millisecond_scale() {
        // Well past 2020-01-01 in milliseconds, far too large for seconds
        assert!(unix_timestamp_ms() > 1_577_836_800_000);
    }
}
