use chrono::{DateTime, TimeZone, Utc};

/// Truncate an instant to whole-second precision.
///
/// Containment intervals and version timestamps are stored at second
/// precision so comparisons behave identically across backends with
/// differing sub-second resolution.
pub fn truncate_to_seconds(instant: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(instant.timestamp(), 0)
        .single()
        .unwrap_or(instant)
}

/// The current instant at second precision.
pub fn now_seconds() -> DateTime<Utc> {
    truncate_to_seconds(Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_drops_subsecond_part() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 15).unwrap()
            + chrono::Duration::milliseconds(750);
        let truncated = truncate_to_seconds(t);
        assert_eq!(truncated.timestamp_subsec_millis(), 0);
        assert_eq!(truncated.timestamp(), t.timestamp());
    }

    #[test]
    fn truncation_is_idempotent() {
        let now = now_seconds();
        assert_eq!(truncate_to_seconds(now), now);
    }
}
