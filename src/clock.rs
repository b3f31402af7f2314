use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeDelta, Utc};

/// Source of "now" for past-slot and expiry checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    millis: AtomicI64,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(at.timestamp_millis()),
        }
    }

    /// Clock reading `local` in the given fixed offset.
    pub fn at_local(local: NaiveDateTime, offset: FixedOffset) -> Self {
        let utc = local - TimeDelta::seconds(i64::from(offset.local_minus_utc()));
        Self::new(DateTime::from_naive_utc_and_offset(utc, Utc))
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: TimeDelta) {
        self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn fixed_clock_local_round_trip() {
        let offset = FixedOffset::east_opt(3 * 3600).unwrap();
        let local = NaiveDate::from_ymd_opt(2025, 6, 1)
            .unwrap()
            .and_hms_opt(18, 30, 0)
            .unwrap();
        let clock = FixedClock::at_local(local, offset);
        assert_eq!(clock.now().with_timezone(&offset).naive_local(), local);
    }

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::new(DateTime::from_timestamp(0, 0).unwrap());
        clock.advance(TimeDelta::hours(2));
        assert_eq!(clock.now().timestamp(), 7200);
    }
}
