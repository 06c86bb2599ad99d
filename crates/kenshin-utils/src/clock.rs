//! Wall-clock timestamps.
//!
//! Ledger timestamps are local wall-clock with microsecond precision,
//! matching the `DATETIME(6)` columns they land in.

use std::time::SystemTime;

use chrono::{DateTime, Local, NaiveDateTime};

/// Current local wall-clock time, microsecond precision.
#[must_use]
pub fn now_micro() -> NaiveDateTime {
    let now = Local::now().naive_local();
    // DATETIME(6) cannot carry nanoseconds; truncate instead of rounding
    // so a value written and re-read compares equal.
    truncate_to_micro(now)
}

/// Convert a filesystem mtime to a local `NaiveDateTime`.
#[must_use]
pub fn from_system_time(t: SystemTime) -> NaiveDateTime {
    let dt: DateTime<Local> = t.into();
    truncate_to_micro(dt.naive_local())
}

fn truncate_to_micro(t: NaiveDateTime) -> NaiveDateTime {
    let micros = i64::from(t.and_utc().timestamp_subsec_micros());
    let nanos = t.and_utc().timestamp_subsec_nanos();
    let extra = i64::from(nanos) - micros * 1000;
    t - chrono::Duration::nanoseconds(extra)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn now_micro_has_no_sub_microsecond_part() {
        let t = now_micro();
        assert_eq!(t.nanosecond() % 1000, 0);
    }

    #[test]
    fn from_system_time_roundtrips_epoch() {
        let t = from_system_time(SystemTime::UNIX_EPOCH);
        assert_eq!(t.and_utc().timestamp_subsec_nanos() % 1000, 0);
    }
}
