//! EDM primitive literal formatting.
//!
//! Two wire shapes exist for every primitive value:
//! - the JSON body form ([`format_json`]), which follows the
//!   `IEEE754Compatible=true` rules (`Edm.Int64` and `Edm.Decimal` travel as strings);
//! - the URI form ([`format_uri_literal`]), used inside key segments such as
//!   `Orders(OrderId=42,Region='EU')`.
//!
//! [`parse_json`] is the inverse of [`format_json`] for values coming back from
//! the server.

use std::str::FromStr;

use base64::Engine;
use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

#[allow(clippy::expect_used)] // good regex, it doesn't panic
static DURATION_REGEX: std::sync::LazyLock<Regex> = std::sync::LazyLock::new(|| {
    Regex::new(
        r"^-?P(?:\d+Y)?(?:\d+M)?(?:\d+W)?(?:\d+D)?(?:T(?:\d+H)?(?:\d+M)?(?:\d+(?:[.,]\d+)?S)?)?$",
    )
    .expect("static regex should not panic")
});

#[allow(clippy::expect_used)] // good regex, it doesn't panic
static GUID_REGEX: std::sync::LazyLock<Regex> = std::sync::LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("static regex should not panic")
});

/// EDM primitive type tags understood by the formatter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdmPrimitive {
    Binary,
    Boolean,
    Byte,
    SByte,
    Int16,
    Int32,
    Int64,
    Single,
    Double,
    Decimal,
    String,
    Guid,
    /// Legacy `Edm.DateTime`, kept for services that still advertise it.
    DateTime,
    DateTimeOffset,
    Date,
    TimeOfDay,
    /// Legacy `Edm.Time`; carries an ISO 8601 duration.
    Time,
    Duration,
}

impl EdmPrimitive {
    /// Resolve a qualified EDM name such as `Edm.Int64`.
    #[must_use]
    pub fn from_edm_name(name: &str) -> Option<Self> {
        let short = name.strip_prefix("Edm.")?;
        let ty = match short {
            "Binary" | "Stream" => Self::Binary,
            "Boolean" => Self::Boolean,
            "Byte" => Self::Byte,
            "SByte" => Self::SByte,
            "Int16" => Self::Int16,
            "Int32" => Self::Int32,
            "Int64" => Self::Int64,
            "Single" => Self::Single,
            "Double" => Self::Double,
            "Decimal" => Self::Decimal,
            "String" => Self::String,
            "Guid" => Self::Guid,
            "DateTime" => Self::DateTime,
            "DateTimeOffset" => Self::DateTimeOffset,
            "Date" => Self::Date,
            "TimeOfDay" => Self::TimeOfDay,
            "Time" => Self::Time,
            "Duration" => Self::Duration,
            _ => return None,
        };
        Some(ty)
    }

    /// Qualified EDM name of this primitive.
    #[must_use]
    pub fn edm_name(self) -> &'static str {
        match self {
            Self::Binary => "Edm.Binary",
            Self::Boolean => "Edm.Boolean",
            Self::Byte => "Edm.Byte",
            Self::SByte => "Edm.SByte",
            Self::Int16 => "Edm.Int16",
            Self::Int32 => "Edm.Int32",
            Self::Int64 => "Edm.Int64",
            Self::Single => "Edm.Single",
            Self::Double => "Edm.Double",
            Self::Decimal => "Edm.Decimal",
            Self::String => "Edm.String",
            Self::Guid => "Edm.Guid",
            Self::DateTime => "Edm.DateTime",
            Self::DateTimeOffset => "Edm.DateTimeOffset",
            Self::Date => "Edm.Date",
            Self::TimeOfDay => "Edm.TimeOfDay",
            Self::Time => "Edm.Time",
            Self::Duration => "Edm.Duration",
        }
    }
}

impl std::fmt::Display for EdmPrimitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.edm_name())
    }
}

/// A value that cannot be encoded as its declared EDM type.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("'{value}' is not a valid {expected}")]
pub struct FormatError {
    /// Declared type of the value.
    pub edm_type: EdmPrimitive,
    /// Rendering of the rejected value.
    pub value: String,
    /// Grammar the value failed to match, e.g. `guid`.
    pub expected: &'static str,
}

impl FormatError {
    fn new(edm_type: EdmPrimitive, value: &Value, expected: &'static str) -> Self {
        let value = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self {
            edm_type,
            value,
            expected,
        }
    }
}

/// Format a client value for a JSON request body.
///
/// # Errors
/// Returns [`FormatError`] when the value does not match the grammar of `ty`.
pub fn format_json(ty: EdmPrimitive, value: &Value) -> Result<Value, FormatError> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    match ty {
        EdmPrimitive::Int64 => to_int64(ty, value).map(|n| Value::String(n.to_string())),
        EdmPrimitive::Decimal => to_decimal(ty, value).map(|d| Value::String(d.to_string())),
        EdmPrimitive::Single | EdmPrimitive::Double => to_float(ty, value),
        EdmPrimitive::Byte | EdmPrimitive::SByte | EdmPrimitive::Int16 | EdmPrimitive::Int32 => {
            to_small_int(ty, value).map(Value::from)
        }
        EdmPrimitive::Boolean => to_bool(ty, value).map(Value::Bool),
        EdmPrimitive::DateTime | EdmPrimitive::DateTimeOffset => {
            if is_blank(value) {
                return Ok(Value::Null);
            }
            to_instant(ty, value).map(|dt| Value::String(instant_string(dt)))
        }
        EdmPrimitive::Date => {
            if is_blank(value) {
                return Ok(Value::Null);
            }
            to_date(ty, value).map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
        }
        EdmPrimitive::TimeOfDay => {
            if is_blank(value) {
                return Ok(Value::Null);
            }
            check_time_of_day(ty, value).map(|s| Value::String(s.to_owned()))
        }
        EdmPrimitive::Time | EdmPrimitive::Duration => {
            if is_blank(value) {
                return Ok(Value::Null);
            }
            check_duration(ty, value).map(|s| Value::String(s.to_owned()))
        }
        EdmPrimitive::Guid => {
            if is_blank(value) {
                return Ok(Value::Null);
            }
            check_guid(ty, value).map(|s| Value::String(s.to_owned()))
        }
        EdmPrimitive::String | EdmPrimitive::Binary => Ok(value.clone()),
    }
}

/// Parse a JSON wire value back into its client form.
///
/// Stringified `Edm.Int64` / `Edm.Decimal` values become numbers again and
/// instants are normalized to UTC. Everything else is validated like
/// [`format_json`] does.
///
/// # Errors
/// Returns [`FormatError`] when the wire value does not match the grammar of `ty`.
pub fn parse_json(ty: EdmPrimitive, value: &Value) -> Result<Value, FormatError> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    match ty {
        EdmPrimitive::Int64 => to_int64(ty, value).map(Value::from),
        EdmPrimitive::Decimal => {
            let d = to_decimal(ty, value)?;
            let text = d.to_string();
            Ok(Number::from_str(&text).map_or(Value::String(text), Value::Number))
        }
        _ => format_json(ty, value),
    }
}

/// Format a client value as a URI literal for key segments.
///
/// # Errors
/// Returns [`FormatError`] when the value does not match the grammar of `ty`.
pub fn format_uri_literal(ty: EdmPrimitive, value: &Value) -> Result<String, FormatError> {
    if value.is_null() {
        return Ok("null".to_owned());
    }

    let literal = match ty {
        EdmPrimitive::Int64 => to_int64(ty, value)?.to_string(),
        EdmPrimitive::Decimal => to_decimal(ty, value)?.to_string(),
        EdmPrimitive::Single | EdmPrimitive::Double => match to_float(ty, value)? {
            Value::String(special) => special,
            other => other.to_string(),
        },
        EdmPrimitive::Byte | EdmPrimitive::SByte | EdmPrimitive::Int16 | EdmPrimitive::Int32 => {
            to_small_int(ty, value)?.to_string()
        }
        EdmPrimitive::Boolean => to_bool(ty, value)?.to_string(),
        EdmPrimitive::DateTime | EdmPrimitive::DateTimeOffset => {
            instant_string(to_instant(ty, value)?)
        }
        EdmPrimitive::Date => to_date(ty, value)?.format("%Y-%m-%d").to_string(),
        EdmPrimitive::TimeOfDay => check_time_of_day(ty, value)?.to_owned(),
        EdmPrimitive::Time | EdmPrimitive::Duration => {
            format!("duration'{}'", check_duration(ty, value)?)
        }
        EdmPrimitive::Guid => check_guid(ty, value)?.to_owned(),
        EdmPrimitive::String => {
            let Value::String(s) = value else {
                return Err(FormatError::new(ty, value, "string"));
            };
            quote_string(s)
        }
        EdmPrimitive::Binary => {
            let Value::String(s) = value else {
                return Err(FormatError::new(ty, value, "binary"));
            };
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(s)
                .or_else(|_| base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(s))
                .map_err(|_| FormatError::new(ty, value, "binary"))?;
            format!(
                "binary'{}'",
                base64::engine::general_purpose::URL_SAFE.encode(bytes)
            )
        }
    };

    Ok(literal)
}

/// Check a value against the ISO 8601 duration grammar.
#[must_use]
pub fn is_duration(s: &str) -> bool {
    let body = s.strip_prefix('-').unwrap_or(s);
    body.len() > 1 && !body.ends_with('T') && DURATION_REGEX.is_match(s)
}

/// Check a value against the canonical GUID grammar (`8-4-4-4-12` hex digits).
#[must_use]
pub fn is_guid(s: &str) -> bool {
    GUID_REGEX.is_match(s)
}

fn quote_string(s: &str) -> String {
    let escaped = s.replace('\'', "''");
    format!("'{}'", urlencoding::encode(&escaped).replace("%27", "'"))
}

fn is_blank(value: &Value) -> bool {
    matches!(value, Value::String(s) if s.trim().is_empty())
}

fn instant_string(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn numeric_text(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.trim().to_owned()),
        _ => None,
    }
}

/// Whole numbers only; `42.0` and `"4.2e1"` are accepted as 42.
fn integral(value: &Value) -> Option<i64> {
    let n = BigDecimal::from_str(&numeric_text(value)?).ok()?;
    // exponents outside this window are never a whole i64
    if !(-19..=64).contains(&n.fractional_digit_count()) || !n.is_integer() {
        return None;
    }
    n.to_i64()
}

fn to_int64(ty: EdmPrimitive, value: &Value) -> Result<i64, FormatError> {
    integral(value).ok_or_else(|| FormatError::new(ty, value, "int64"))
}

fn to_small_int(ty: EdmPrimitive, value: &Value) -> Result<i64, FormatError> {
    let expected = match ty {
        EdmPrimitive::Byte => "byte",
        EdmPrimitive::SByte => "sbyte",
        EdmPrimitive::Int16 => "int16",
        _ => "int32",
    };
    let n = integral(value).ok_or_else(|| FormatError::new(ty, value, expected))?;
    let fits = match ty {
        EdmPrimitive::Byte => u8::try_from(n).is_ok(),
        EdmPrimitive::SByte => i8::try_from(n).is_ok(),
        EdmPrimitive::Int16 => i16::try_from(n).is_ok(),
        _ => i32::try_from(n).is_ok(),
    };
    if fits {
        Ok(n)
    } else {
        Err(FormatError::new(ty, value, expected))
    }
}

fn to_decimal(ty: EdmPrimitive, value: &Value) -> Result<BigDecimal, FormatError> {
    numeric_text(value)
        .and_then(|t| BigDecimal::from_str(&t).ok())
        .ok_or_else(|| FormatError::new(ty, value, "decimal"))
}

fn to_float(ty: EdmPrimitive, value: &Value) -> Result<Value, FormatError> {
    match value {
        Value::Number(_) => Ok(value.clone()),
        Value::String(s) => {
            let s = s.trim();
            if matches!(s, "NaN" | "INF" | "-INF") {
                return Ok(Value::String(s.to_owned()));
            }
            s.parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| FormatError::new(ty, value, "double"))
        }
        _ => Err(FormatError::new(ty, value, "double")),
    }
}

fn to_bool(ty: EdmPrimitive, value: &Value) -> Result<bool, FormatError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
        _ => Err(FormatError::new(ty, value, "boolean")),
    }
}

fn to_instant(ty: EdmPrimitive, value: &Value) -> Result<DateTime<Utc>, FormatError> {
    let expected = if ty == EdmPrimitive::DateTime {
        "dateTime"
    } else {
        "dateTimeOffset"
    };

    let parsed = match value {
        Value::String(s) => parse_instant_text(s.trim()),
        Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    };

    parsed.ok_or_else(|| FormatError::new(ty, value, expected))
}

fn parse_instant_text(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn to_date(ty: EdmPrimitive, value: &Value) -> Result<NaiveDate, FormatError> {
    let parsed = match value {
        Value::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok(),
        _ => None,
    };
    parsed.ok_or_else(|| FormatError::new(ty, value, "date"))
}

fn check_time_of_day(ty: EdmPrimitive, value: &Value) -> Result<&str, FormatError> {
    match value {
        Value::String(s)
            if NaiveTime::parse_from_str(s, "%H:%M:%S%.f").is_ok()
                || NaiveTime::parse_from_str(s, "%H:%M").is_ok() =>
        {
            Ok(s.as_str())
        }
        _ => Err(FormatError::new(ty, value, "timeOfDay")),
    }
}

fn check_duration(ty: EdmPrimitive, value: &Value) -> Result<&str, FormatError> {
    match value {
        Value::String(s) if is_duration(s) => Ok(s.as_str()),
        _ => Err(FormatError::new(ty, value, "ISO 8601 duration")),
    }
}

fn check_guid(ty: EdmPrimitive, value: &Value) -> Result<&str, FormatError> {
    match value {
        Value::String(s) if is_guid(s) => Ok(s.as_str()),
        _ => Err(FormatError::new(ty, value, "guid")),
    }
}
