use time::{format_description::well_known::Rfc3339, OffsetDateTime};

pub(crate) fn format_offset(value: OffsetDateTime) -> String {
    value.format(&Rfc3339).unwrap_or_else(|_| value.to_string())
}

/// Whole seconds from `from` to `to`, never negative.
pub(crate) fn seconds_between(from: OffsetDateTime, to: OffsetDateTime) -> i64 {
    (to - from).whole_seconds().max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::{macros::datetime, UtcOffset};

    #[test]
    fn format_offset_outputs_utc_z() {
        assert_eq!(format_offset(datetime!(2025-01-02 10:20:30 UTC)), "2025-01-02T10:20:30Z");
    }

    #[test]
    fn format_offset_preserves_offset() {
        let offset = UtcOffset::from_hms(3, 0, 0).unwrap();
        let shifted = datetime!(2025-01-02 10:20:30 UTC).to_offset(offset);
        assert_eq!(format_offset(shifted), "2025-01-02T13:20:30+03:00");
    }

    #[test]
    fn seconds_between_clamps_negative_spans() {
        let earlier = datetime!(2025-01-02 10:00:00 UTC);
        let later = datetime!(2025-01-02 10:01:30 UTC);
        assert_eq!(seconds_between(earlier, later), 90);
        assert_eq!(seconds_between(later, earlier), 0);
    }
}
