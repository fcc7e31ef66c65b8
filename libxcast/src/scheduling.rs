//! Schedule-time parsing
//!
//! Parses the `scheduled_for` value accepted by the scheduling API into an
//! absolute UTC time.

use crate::{Result, XcastError};
use chrono::{DateTime, Duration, Utc};

/// Parse a schedule string into a DateTime
///
/// Supports multiple formats:
/// - Absolute RFC 3339 timestamps: "2026-08-07T15:00:00Z"
/// - Relative durations: "1h", "30m", "2d"
/// - Natural language: "tomorrow", "next friday 10am"
///
/// # Errors
///
/// Returns an error if the time format is invalid or cannot be parsed.
pub fn parse_schedule(input: &str) -> Result<DateTime<Utc>> {
    let input = input.trim();

    if input.is_empty() {
        return Err(XcastError::InvalidInput(
            "Schedule string cannot be empty".to_string(),
        ));
    }

    // Absolute timestamps first: what API clients normally send
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }

    // Relative duration ("30m", "2 hours")
    if let Ok(duration) = parse_duration(input) {
        return Ok(Utc::now() + duration);
    }

    // Natural language ("tomorrow", "next friday")
    if let Ok(dt) = parse_natural_language(input) {
        return Ok(dt);
    }

    Err(XcastError::InvalidInput(format!(
        "Could not parse schedule string: {}",
        input
    )))
}

/// Parse a duration string into a chrono::Duration
fn parse_duration(input: &str) -> Result<Duration> {
    if let Ok(std_duration) = humantime::parse_duration(input) {
        let seconds = std_duration.as_secs() as i64;
        return Duration::try_seconds(seconds)
            .ok_or_else(|| XcastError::InvalidInput("Duration out of range".to_string()));
    }

    Err(XcastError::InvalidInput(format!(
        "Could not parse duration: {}",
        input
    )))
}

/// Parse natural language time expression
fn parse_natural_language(input: &str) -> Result<DateTime<Utc>> {
    chrono_english::parse_date_string(input, Utc::now(), chrono_english::Dialect::Us)
        .map_err(|e| XcastError::InvalidInput(format!("Could not parse time: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rfc3339() {
        let result = parse_schedule("2030-01-02T03:04:05Z");
        assert!(result.is_ok());

        let dt = result.unwrap();
        assert_eq!(dt.timestamp(), 1_893_553_445);
    }

    #[test]
    fn test_parse_rfc3339_with_offset() {
        let utc = parse_schedule("2030-01-02T03:04:05Z").unwrap();
        let offset = parse_schedule("2030-01-02T05:04:05+02:00").unwrap();
        assert_eq!(utc.timestamp(), offset.timestamp());
    }

    #[test]
    fn test_parse_duration_minutes() {
        let result = parse_schedule("30m");
        assert!(result.is_ok());

        let scheduled_time = result.unwrap();
        let diff = (scheduled_time - Utc::now()).num_minutes();

        // Should be approximately 30 minutes from now (allow 1 minute tolerance)
        assert!(diff >= 29 && diff <= 31, "Expected ~30 minutes, got {}", diff);
    }

    #[test]
    fn test_parse_duration_hours() {
        let result = parse_schedule("2h");
        assert!(result.is_ok());

        let diff = (result.unwrap() - Utc::now()).num_minutes();
        assert!(diff >= 119 && diff <= 121, "Expected ~120 minutes, got {}", diff);
    }

    #[test]
    fn test_parse_duration_with_space() {
        let result = parse_schedule("1 hour");
        assert!(result.is_ok());

        let diff = (result.unwrap() - Utc::now()).num_minutes();
        assert!(diff >= 59 && diff <= 61, "Expected ~60 minutes, got {}", diff);
    }

    #[test]
    fn test_parse_tomorrow() {
        let result = parse_schedule("tomorrow");
        assert!(result.is_ok());

        let diff = (result.unwrap() - Utc::now()).num_hours();

        // Should be approximately 24 hours from now (20-28 hours tolerance)
        assert!(diff >= 20 && diff <= 28, "Expected ~24 hours, got {}", diff);
    }

    #[test]
    fn test_parse_empty_string() {
        assert!(parse_schedule("").is_err());
        assert!(parse_schedule("   ").is_err());
    }

    #[test]
    fn test_parse_invalid_format() {
        assert!(parse_schedule("not a time").is_err());
    }

    #[test]
    fn test_parse_malformed_rfc3339_falls_through_to_error() {
        assert!(parse_schedule("2030-13-45T99:99:99Z").is_err());
    }
}
