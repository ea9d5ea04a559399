//! Server-side source of "now". Remaining time is always derived from the
//! stored `end_time`; client-reported timers are display hints only.

use time::OffsetDateTime;

pub(crate) trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// `max(0, end_time - now)` in whole seconds.
pub(crate) fn remaining_seconds(now: OffsetDateTime, end_time: OffsetDateTime) -> i64 {
    crate::core::time::seconds_between(now, end_time)
}

pub(crate) fn is_expired(now: OffsetDateTime, end_time: OffsetDateTime) -> bool {
    now >= end_time
}

#[cfg(test)]
pub(crate) use manual::ManualClock;

#[cfg(test)]
mod manual {
    use std::sync::Mutex;

    use time::{Duration, OffsetDateTime};

    use super::Clock;

    pub(crate) struct ManualClock {
        now: Mutex<OffsetDateTime>,
    }

    impl ManualClock {
        pub(crate) fn new(now: OffsetDateTime) -> Self {
            Self { now: Mutex::new(now) }
        }

        pub(crate) fn advance(&self, by: Duration) {
            let mut now = self.now.lock().expect("clock lock");
            *now += by;
        }

        pub(crate) fn set(&self, value: OffsetDateTime) {
            *self.now.lock().expect("clock lock") = value;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> OffsetDateTime {
            *self.now.lock().expect("clock lock")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::{macros::datetime, Duration};

    #[test]
    fn remaining_is_clamped_at_zero() {
        let end = datetime!(2025-03-01 10:00:00 UTC);
        assert_eq!(remaining_seconds(end - Duration::seconds(45), end), 45);
        assert_eq!(remaining_seconds(end, end), 0);
        assert_eq!(remaining_seconds(end + Duration::minutes(3), end), 0);
    }

    #[test]
    fn expiry_is_inclusive_of_end_time() {
        let end = datetime!(2025-03-01 10:00:00 UTC);
        assert!(!is_expired(end - Duration::milliseconds(1), end));
        assert!(is_expired(end, end));
    }

    #[test]
    fn manual_clock_advances() {
        let start = datetime!(2025-03-01 09:00:00 UTC);
        let clock = ManualClock::new(start);
        clock.advance(Duration::minutes(61));
        assert_eq!(clock.now(), start + Duration::minutes(61));
        clock.set(start);
        assert_eq!(clock.now(), start);
    }
}
