//! Clock-time strings (`HH:MM`, 24h) and their minute-of-day offsets.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

pub const MINUTES_PER_DAY: u32 = 24 * 60;

static CLOCK_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([01][0-9]|2[0-3]):([0-5][0-9])$").expect("clock time pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeError {
    #[error("Invalid time format '{0}', expected HH:MM")]
    InvalidFormat(String),

    #[error("Minute offset {0} is outside a single day")]
    OutOfRange(u32),
}

/// `"09:30"` -> `570`.
pub fn time_to_minutes(value: &str) -> Result<u32, TimeError> {
    let caps = CLOCK_TIME
        .captures(value)
        .ok_or_else(|| TimeError::InvalidFormat(value.to_string()))?;

    let hours: u32 = caps[1].parse().map_err(|_| TimeError::InvalidFormat(value.to_string()))?;
    let minutes: u32 = caps[2].parse().map_err(|_| TimeError::InvalidFormat(value.to_string()))?;
    Ok(hours * 60 + minutes)
}

/// `570` -> `"09:30"`.
pub fn minutes_to_time(minutes: u32) -> Result<String, TimeError> {
    if minutes >= MINUTES_PER_DAY {
        return Err(TimeError::OutOfRange(minutes));
    }
    Ok(format!("{:02}:{:02}", minutes / 60, minutes % 60))
}

pub fn add_minutes(value: &str, delta: u32) -> Result<String, TimeError> {
    minutes_to_time(time_to_minutes(value)? + delta)
}

pub fn is_valid_time(value: &str) -> bool {
    CLOCK_TIME.is_match(value)
}

/// Postgres `time` columns come back as `HH:MM:SS`; whole-minute values are
/// cut back to `HH:MM`.
pub fn trim_seconds(value: &mut String) {
    if value.len() == 8 && value.ends_with(":00") {
        value.truncate(5);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_formats() {
        assert_eq!(time_to_minutes("00:00"), Ok(0));
        assert_eq!(time_to_minutes("09:30"), Ok(570));
        assert_eq!(time_to_minutes("23:59"), Ok(1439));
        assert_eq!(minutes_to_time(570).as_deref(), Ok("09:30"));
    }

    #[test]
    fn rejects_loose_formats() {
        for bad in ["9:30", "09:3", "24:00", "12:60", "0930", "09:30:00", ""] {
            assert!(time_to_minutes(bad).is_err(), "{bad} should be rejected");
        }
        assert_eq!(minutes_to_time(1440), Err(TimeError::OutOfRange(1440)));
    }

    #[test]
    fn add_minutes_rolls_over_hours() {
        assert_eq!(add_minutes("09:45", 30).as_deref(), Ok("10:15"));
        tokio_test::assert_err!(add_minutes("23:45", 30));
    }

    #[test]
    fn trim_seconds_only_drops_zero_seconds() {
        let mut stored = "09:30:00".to_string();
        trim_seconds(&mut stored);
        assert_eq!(stored, "09:30");

        let mut odd = "09:30:15".to_string();
        trim_seconds(&mut odd);
        assert_eq!(odd, "09:30:15");
    }
}
