use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};

/// Milliseconds since the Unix epoch for the current instant.
#[must_use]
pub fn epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Epoch milliseconds of a filesystem timestamp.
#[must_use]
pub fn system_time_ms(time: SystemTime) -> i64 {
    DateTime::<Utc>::from(time).timestamp_millis()
}

#[must_use]
pub fn rfc3339_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::{rfc3339_now, system_time_ms};

    #[test]
    fn system_time_converts_to_millis() {
        let t = SystemTime::UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        assert_eq!(system_time_ms(t), 1_700_000_000_123);
    }

    #[test]
    fn rfc3339_is_utc() {
        assert!(rfc3339_now().ends_with('Z'));
    }
}
