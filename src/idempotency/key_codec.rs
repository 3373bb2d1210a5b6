//! Encoding and decoding of idempotency key strings.
//!
//! A key is 33 ASCII characters laid out as
//! `<timestamp:12><sequence:6><table:10><random:5>`:
//!
//! - `timestamp` is the creation minute as `yyyymmddhhmm` (UTC)
//! - `sequence` is the allocated sequence number modulo 1,000,000, zero padded
//! - `table` keeps the leftmost 10 characters of the table name, right padded
//!   with `_` when shorter. Decoding strips every trailing `_`, so a name
//!   that itself ends in `_` (`tbl_`) decodes without it (`tbl`)
//! - `random` is 5 alphanumeric characters

use crate::error::{AppError, Result};
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;

pub const KEY_LENGTH: usize = 33;
pub const TIMESTAMP_WIDTH: usize = 12;
pub const SEQUENCE_WIDTH: usize = 6;
pub const TABLE_NAME_WIDTH: usize = 10;
pub const RANDOM_SUFFIX_WIDTH: usize = 5;

const SEQUENCE_MODULUS: i64 = 1_000_000;
const TABLE_PAD: char = '_';

/// Components recovered from an encoded key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedKey {
    pub created_at: DateTime<Utc>,
    pub sequence_number: i64,
    pub table_name: String,
    pub random_suffix: String,
}

/// Encodes a key for `table_name` and `sequence` stamped with the current time.
pub fn encode(table_name: &str, sequence: i64) -> Result<String> {
    encode_at(table_name, sequence, Utc::now())
}

/// Encodes a key stamped with `at` and a freshly drawn random suffix.
pub fn encode_at(table_name: &str, sequence: i64, at: DateTime<Utc>) -> Result<String> {
    let suffix = random_suffix();
    encode_with_suffix(table_name, sequence, at, &suffix)
}

/// Fully deterministic encoding. `suffix` must be 5 ASCII alphanumerics.
pub fn encode_with_suffix(
    table_name: &str,
    sequence: i64,
    at: DateTime<Utc>,
    suffix: &str,
) -> Result<String> {
    if table_name.is_empty() {
        return Err(AppError::Validation(
            "Table name is required to encode an idempotency key".to_string(),
        ));
    }
    if suffix.len() != RANDOM_SUFFIX_WIDTH || !suffix.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(AppError::Validation(format!(
            "Random suffix must be {} alphanumeric characters",
            RANDOM_SUFFIX_WIDTH
        )));
    }

    let key = format!(
        "{}{:06}{}{}",
        at.format("%Y%m%d%H%M"),
        sequence.rem_euclid(SEQUENCE_MODULUS),
        table_segment(table_name),
        suffix
    );

    debug_assert_eq!(key.len(), KEY_LENGTH);
    Ok(key)
}

/// Splits a key back into its components.
pub fn decode(key: &str) -> Result<DecodedKey> {
    if key.len() != KEY_LENGTH {
        return Err(AppError::InvalidKeyFormat(format!(
            "expected {} characters, got {}",
            KEY_LENGTH,
            key.len()
        )));
    }
    if !key.is_ascii() {
        return Err(AppError::InvalidKeyFormat(
            "key must contain only ASCII characters".to_string(),
        ));
    }

    let (timestamp, rest) = key.split_at(TIMESTAMP_WIDTH);
    let (sequence, rest) = rest.split_at(SEQUENCE_WIDTH);
    let (table, suffix) = rest.split_at(TABLE_NAME_WIDTH);

    let created_at = parse_timestamp(timestamp)?;

    if !sequence.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AppError::InvalidKeyFormat(format!(
            "sequence segment '{}' is not numeric",
            sequence
        )));
    }
    let sequence_number = sequence.parse::<i64>().map_err(|e| {
        AppError::InvalidKeyFormat(format!("sequence segment '{}': {}", sequence, e))
    })?;

    Ok(DecodedKey {
        created_at,
        sequence_number,
        table_name: table.trim_end_matches(TABLE_PAD).to_string(),
        random_suffix: suffix.to_string(),
    })
}

/// Checks that `key` is a well-formed idempotency key.
pub fn validate(key: &str) -> Result<()> {
    decode(key).map(|_| ())
}

fn parse_timestamp(segment: &str) -> Result<DateTime<Utc>> {
    let invalid = || {
        AppError::InvalidKeyFormat(format!(
            "timestamp segment '{}' is not a valid yyyymmddhhmm value",
            segment
        ))
    };

    if !segment.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let field = |range: std::ops::Range<usize>| -> Result<u32> {
        segment
            .get(range)
            .and_then(|s| s.parse::<u32>().ok())
            .ok_or_else(invalid)
    };

    let year = i32::try_from(field(0..4)?).map_err(|_| invalid())?;
    let naive = NaiveDate::from_ymd_opt(year, field(4..6)?, field(6..8)?)
        .and_then(|date| date.and_hms_opt(field(8..10).ok()?, field(10..12).ok()?, 0))
        .ok_or_else(invalid)?;

    Ok(Utc.from_utc_datetime(&naive))
}

fn table_segment(table_name: &str) -> String {
    let mut segment: String = table_name
        .chars()
        .take(TABLE_NAME_WIDTH)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                TABLE_PAD
            }
        })
        .collect();

    while segment.len() < TABLE_NAME_WIDTH {
        segment.push(TABLE_PAD);
    }
    segment
}

fn random_suffix() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_SUFFIX_WIDTH)
        .map(char::from)
        .collect()
}

/// Truncates a timestamp to the minute precision a key can carry.
pub fn truncate_to_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(at.year(), at.month(), at.day(), at.hour(), at.minute(), 0)
        .single()
        .unwrap_or(at)
}
