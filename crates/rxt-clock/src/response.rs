//! Time-server response parsing.
//!
//! Public time APIs disagree on shape. [`RESPONSE_FIELDS`] is the whole
//! parsing table: adding or removing a provider shape is a one-line change
//! here and nowhere else.
//!
//! Rules:
//! - Fields are tried in table order; the first present field is authoritative.
//! - A present authoritative field that does not parse is a failure (no
//!   silent fallback to a lower-priority field).
//! - Lower-priority fields that also parse must agree with the
//!   authoritative one within [`AMBIGUITY_TOLERANCE_MS`], otherwise the
//!   response is ambiguous and rejected.
//! - Values before [`MIN_PLAUSIBLE_EPOCH_MS`] are not absolute times
//!   (e.g. a millisecond-of-second component) and do not count as candidates.
//!   Values after [`MAX_PLAUSIBLE_EPOCH_MS`] are rejected the same way.

use std::fmt;

use chrono::{DateTime, NaiveDateTime};
use serde_json::Value;

use crate::EpochMillis;

/// 2000-01-01T00:00:00Z.
pub const MIN_PLAUSIBLE_EPOCH_MS: EpochMillis = 946_684_800_000;

/// 9999-12-31T23:59:59.999Z.
pub const MAX_PLAUSIBLE_EPOCH_MS: EpochMillis = 253_402_300_799_999;

/// Maximum disagreement tolerated between two recognised fields of one body.
pub const AMBIGUITY_TOLERANCE_MS: EpochMillis = 2_000;

/// How a field encodes the time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Number of seconds since the epoch (integer or fractional).
    UnixSeconds,
    /// ISO-8601 / RFC 3339 string; a missing offset means UTC.
    Iso8601,
    /// Number of milliseconds since the epoch.
    EpochMillis,
}

/// Recognised fields, highest priority first.
pub const RESPONSE_FIELDS: &[(&str, FieldKind)] = &[
    ("unixtime", FieldKind::UnixSeconds),
    ("datetime", FieldKind::Iso8601),
    ("dateTime", FieldKind::Iso8601),
    ("milliSeconds", FieldKind::EpochMillis),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeParseError {
    NotAnObject,
    NoTimeField,
    InvalidField {
        field: &'static str,
        reason: String,
    },
    Ambiguous {
        primary: &'static str,
        primary_ms: EpochMillis,
        other: &'static str,
        other_ms: EpochMillis,
    },
}

impl fmt::Display for TimeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeParseError::NotAnObject => write!(f, "response body is not a JSON object"),
            TimeParseError::NoTimeField => write!(f, "no recognised time field"),
            TimeParseError::InvalidField { field, reason } => {
                write!(f, "field '{field}' is not a usable time: {reason}")
            }
            TimeParseError::Ambiguous {
                primary,
                primary_ms,
                other,
                other_ms,
            } => write!(
                f,
                "ambiguous response: '{primary}'={primary_ms} disagrees with '{other}'={other_ms}"
            ),
        }
    }
}

impl std::error::Error for TimeParseError {}

/// Normalise a time-server JSON body to epoch milliseconds.
pub fn parse_time_response(body: &Value) -> Result<EpochMillis, TimeParseError> {
    let obj = body.as_object().ok_or(TimeParseError::NotAnObject)?;

    let mut primary: Option<(&'static str, EpochMillis)> = None;
    for &(field, kind) in RESPONSE_FIELDS {
        let Some(raw) = obj.get(field) else {
            continue;
        };
        let parsed = parse_field(kind, raw).and_then(plausible);

        match (primary, parsed) {
            (None, Ok(ms)) => primary = Some((field, ms)),
            (None, Err(reason)) => return Err(TimeParseError::InvalidField { field, reason }),
            (Some((primary_field, primary_ms)), Ok(ms)) => {
                if (ms - primary_ms).abs() > AMBIGUITY_TOLERANCE_MS {
                    return Err(TimeParseError::Ambiguous {
                        primary: primary_field,
                        primary_ms,
                        other: field,
                        other_ms: ms,
                    });
                }
            }
            // Unusable secondary fields carry no weight.
            (Some(_), Err(_)) => {}
        }
    }

    primary
        .map(|(_, ms)| ms)
        .ok_or(TimeParseError::NoTimeField)
}

fn parse_field(kind: FieldKind, raw: &Value) -> Result<EpochMillis, String> {
    match kind {
        FieldKind::UnixSeconds => {
            let secs = number(raw)?;
            scale(secs, 1_000.0)
        }
        FieldKind::EpochMillis => {
            let ms = number(raw)?;
            scale(ms, 1.0)
        }
        FieldKind::Iso8601 => {
            let s = raw
                .as_str()
                .ok_or_else(|| format!("expected string, got {raw}"))?;
            parse_iso(s)
        }
    }
}

enum Num {
    Int(i64),
    Float(f64),
}

fn number(raw: &Value) -> Result<Num, String> {
    if let Some(i) = raw.as_i64() {
        return Ok(Num::Int(i));
    }
    match raw.as_f64() {
        Some(f) if f.is_finite() => Ok(Num::Float(f)),
        _ => Err(format!("expected number, got {raw}")),
    }
}

fn scale(n: Num, factor: f64) -> Result<EpochMillis, String> {
    match n {
        Num::Int(i) => i
            .checked_mul(factor as i64)
            .ok_or_else(|| format!("{i} overflows epoch millis")),
        Num::Float(f) => {
            let ms = (f * factor).round();
            if ms.abs() >= i64::MAX as f64 {
                return Err(format!("{f} overflows epoch millis"));
            }
            Ok(ms as i64)
        }
    }
}

fn parse_iso(s: &str) -> Result<EpochMillis, String> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    // Offset-less forms (timeapi.io style) are UTC.
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| naive.and_utc().timestamp_millis())
        .map_err(|e| format!("'{s}' is not ISO-8601: {e}"))
}

fn plausible(ms: EpochMillis) -> Result<EpochMillis, String> {
    if ms < MIN_PLAUSIBLE_EPOCH_MS {
        return Err(format!("{ms} is not an absolute time"));
    }
    if ms > MAX_PLAUSIBLE_EPOCH_MS {
        return Err(format!("{ms} is past year 9999"));
    }
    Ok(ms)
}
