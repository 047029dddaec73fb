// ibsync/src/timestamp.rs
// Parsing of the date strings the gateway sends back.

use crate::base::IBSyncError;
use crate::contract::DateFormat;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::str::FromStr;

/// Parses a head timestamp into UTC.
///
/// Unix replies are seconds since the epoch. Formatted replies come in several
/// shapes depending on gateway version:
/// - `20230103-14:30:00` (already UTC)
/// - `20230103 09:30:00 US/Eastern`
/// - `20230103 09:30:00` or `20230103  09:30:00` (in the login time zone, `default_tz`)
/// - `20230103` (midnight in `default_tz`)
pub fn parse_head_timestamp(value: &str, format: DateFormat, default_tz: Tz) -> Result<DateTime<Utc>, IBSyncError> {
  let value = value.trim();
  match format {
    DateFormat::Unix => {
      let secs = value.parse::<i64>()
        .map_err(|e| IBSyncError::ParseError(format!("Invalid unix timestamp '{}': {}", value, e)))?;
      Utc.timestamp_opt(secs, 0).single()
        .ok_or_else(|| IBSyncError::ParseError(format!("Unix timestamp out of range: {}", secs)))
    }
    DateFormat::Formatted => parse_formatted(value, default_tz),
  }
}

fn parse_formatted(value: &str, default_tz: Tz) -> Result<DateTime<Utc>, IBSyncError> {
  let tokens: Vec<&str> = value.split_whitespace().collect();
  match tokens.as_slice() {
    [utc] if utc.contains('-') => NaiveDateTime::parse_from_str(utc, "%Y%m%d-%H:%M:%S")
      .map(|naive| naive.and_utc())
      .map_err(|e| IBSyncError::ParseError(format!("Invalid UTC timestamp '{}': {}", value, e))),
    [date] => {
      let day = NaiveDate::parse_from_str(date, "%Y%m%d")
        .map_err(|e| IBSyncError::ParseError(format!("Invalid date '{}': {}", value, e)))?;
      localize(day.and_hms_opt(0, 0, 0).unwrap_or_default(), default_tz, value)
    }
    [date, time] => localize(parse_naive(date, time, value)?, default_tz, value),
    [date, time, tz_name] => {
      let tz = Tz::from_str(tz_name)
        .map_err(|e| IBSyncError::ParseError(format!("Unknown time zone '{}': {}", tz_name, e)))?;
      localize(parse_naive(date, time, value)?, tz, value)
    }
    _ => Err(IBSyncError::ParseError(format!("Unrecognized timestamp format: '{}'", value))),
  }
}

fn parse_naive(date: &str, time: &str, raw: &str) -> Result<NaiveDateTime, IBSyncError> {
  NaiveDateTime::parse_from_str(&format!("{} {}", date, time), "%Y%m%d %H:%M:%S")
    .map_err(|e| IBSyncError::ParseError(format!("Invalid timestamp '{}': {}", raw, e)))
}

fn localize(naive: NaiveDateTime, tz: Tz, raw: &str) -> Result<DateTime<Utc>, IBSyncError> {
  tz.from_local_datetime(&naive)
    .earliest()
    .map(|local| local.with_timezone(&Utc))
    .ok_or_else(|| IBSyncError::ParseError(format!("Timestamp '{}' does not exist in {}", raw, tz)))
}
