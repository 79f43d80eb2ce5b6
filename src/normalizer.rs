//! Timestamp normalization
//!
//! CANEdge exports start every record with a fractional Unix epoch timestamp.
//! This module replaces that prefix with a fixed-width UTC calendar timestamp:
//! - the remainder of the record is kept byte for byte
//! - sub-microsecond digits are rounded to the nearest microsecond
//! - records without an epoch prefix are reported as not matched

use crate::error::CanParseError;
use crate::types::TimestampedRecord;
use chrono::{DateTime, NaiveDateTime, Utc};

/// Calendar format written into every derived log
pub const CALENDAR_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Accepts any number of fractional digits, including none
const CALENDAR_PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Normalizer for the epoch timestamp field of raw records
pub struct TimestampNormalizer;

impl TimestampNormalizer {
    /// Rewrite the leading epoch timestamp of `line`.
    ///
    /// Returns `Ok(None)` when the line does not start with `digits.digits`,
    /// and a record-level error when the digits do not fit a calendar instant.
    pub fn normalize(line: &str) -> Result<Option<TimestampedRecord>, CanParseError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let Some((seconds, fraction, rest)) = split_epoch_prefix(line) else {
            return Ok(None);
        };

        let timestamp = epoch_to_utc(seconds, fraction)?;
        let mut normalized = format_calendar(&timestamp);
        normalized.push_str(rest);

        Ok(Some(TimestampedRecord {
            line: normalized,
            timestamp,
        }))
    }
}

/// Format an instant the way the derived logs carry it
pub fn format_calendar(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(CALENDAR_FORMAT).to_string()
}

/// Parse a calendar timestamp written by [`format_calendar`]
pub fn parse_calendar(raw: &str) -> Result<DateTime<Utc>, CanParseError> {
    NaiveDateTime::parse_from_str(raw.trim(), CALENDAR_PARSE_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| CanParseError::DateParseError(format!("{}: {}", raw, e)))
}

/// Split `line` into integer seconds, fractional digits and the remainder
fn split_epoch_prefix(line: &str) -> Option<(&str, &str, &str)> {
    let int_len = line.bytes().take_while(u8::is_ascii_digit).count();
    if int_len == 0 {
        return None;
    }

    let after_dot = line[int_len..].strip_prefix('.')?;
    let frac_len = after_dot.bytes().take_while(u8::is_ascii_digit).count();
    if frac_len == 0 {
        return None;
    }

    Some((
        &line[..int_len],
        &after_dot[..frac_len],
        &after_dot[frac_len..],
    ))
}

fn epoch_to_utc(seconds: &str, fraction: &str) -> Result<DateTime<Utc>, CanParseError> {
    let out_of_range = || CanParseError::TimestampOutOfRange(format!("{}.{}", seconds, fraction));

    let mut secs: i64 = seconds.parse().map_err(|_| out_of_range())?;

    // Six digits of microseconds plus one rounding digit
    let padded: Vec<u8> = fraction
        .bytes()
        .chain(std::iter::repeat(b'0'))
        .take(7)
        .map(|b| b - b'0')
        .collect();
    let mut micros = padded[..6]
        .iter()
        .fold(0u32, |acc, digit| acc * 10 + u32::from(*digit));
    if padded[6] >= 5 {
        micros += 1;
    }
    if micros == 1_000_000 {
        secs = secs.checked_add(1).ok_or_else(out_of_range)?;
        micros = 0;
    }

    DateTime::<Utc>::from_timestamp(secs, micros * 1_000).ok_or_else(out_of_range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalize_keeps_remainder() {
        let record = TimestampNormalizer::normalize("1699999999.123456;1;80;0;0;0;0;0;0;\n")
            .unwrap()
            .unwrap();

        assert_eq!(record.line, "2023-11-14 22:13:19.123456;1;80;0;0;0;0;0;0;");
        assert_eq!(record.timestamp.timestamp(), 1_699_999_999);
        assert_eq!(record.timestamp.timestamp_subsec_micros(), 123_456);
    }

    #[test]
    fn test_round_trip_to_microsecond() {
        let record = TimestampNormalizer::normalize("1699999999.123456")
            .unwrap()
            .unwrap();
        let calendar = format_calendar(&record.timestamp);

        assert_eq!(calendar, "2023-11-14 22:13:19.123456");
        assert_eq!(parse_calendar(&calendar).unwrap(), record.timestamp);
    }

    #[test]
    fn test_short_fraction_is_padded() {
        let record = TimestampNormalizer::normalize("1628776543.5;x").unwrap().unwrap();
        assert_eq!(record.line, "2021-08-12 13:55:43.500000;x");
    }

    #[test]
    fn test_sub_microsecond_digits_round() {
        let down = TimestampNormalizer::normalize("10.0000014").unwrap().unwrap();
        assert_eq!(down.timestamp.timestamp_subsec_micros(), 1);

        let up = TimestampNormalizer::normalize("10.0000015").unwrap().unwrap();
        assert_eq!(up.timestamp.timestamp_subsec_micros(), 2);

        let carry = TimestampNormalizer::normalize("10.9999999").unwrap().unwrap();
        assert_eq!(carry.timestamp.timestamp(), 11);
        assert_eq!(carry.timestamp.timestamp_subsec_micros(), 0);
    }

    #[test]
    fn test_trailing_text_in_timestamp_field() {
        let record = TimestampNormalizer::normalize("1628776543.250000 UTC;1;705")
            .unwrap()
            .unwrap();
        assert_eq!(record.line, "2021-08-12 13:55:43.250000 UTC;1;705");
    }

    #[test]
    fn test_non_matching_records() {
        assert!(TimestampNormalizer::normalize("TimestampEpoch;BusChannel;ID")
            .unwrap()
            .is_none());
        assert!(TimestampNormalizer::normalize("1628776543;1;705").unwrap().is_none());
        assert!(TimestampNormalizer::normalize("1628776543.;1;705").unwrap().is_none());
        assert!(TimestampNormalizer::normalize(";1628776543.1").unwrap().is_none());
        assert!(TimestampNormalizer::normalize("").unwrap().is_none());
    }

    #[test]
    fn test_out_of_range_is_record_level() {
        let err = TimestampNormalizer::normalize("99999999999999999999.5;1;705").unwrap_err();
        assert!(err.is_record_level());

        let err = TimestampNormalizer::normalize("9999999999999.5;1;705").unwrap_err();
        assert!(matches!(err, CanParseError::TimestampOutOfRange(_)));
    }

    #[test]
    fn test_parse_calendar_accepts_short_fraction() {
        let parsed = parse_calendar("2021-08-12 15:50:00.0").unwrap();
        assert_eq!(parsed.year(), 2021);
        assert_eq!(parsed.hour(), 15);
        assert_eq!(parsed.minute(), 50);

        assert!(parse_calendar("12/08/2021 15:50").is_err());
    }
}
