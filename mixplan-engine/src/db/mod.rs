//! Storage queries for the recommendation engine
//!
//! Free functions over a `SqlitePool` (or any SQLite executor, so writes can
//! join a transaction). UUIDs and timestamps are stored as TEXT, JSON values
//! as serialized TEXT.

pub mod gear;
pub mod knowledge;
pub mod locations;
pub mod quotas;
pub mod setups;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use mixplan_common::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Fixed-width RFC 3339 so stored timestamps sort lexically
pub(crate) fn timestamp_text(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_uuid(raw: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|e| Error::Internal(format!("Invalid UUID in {}: {} ({})", column, raw, e)))
}

pub(crate) fn parse_opt_uuid(raw: Option<String>, column: &str) -> Result<Option<Uuid>> {
    raw.map(|r| parse_uuid(&r, column)).transpose()
}

pub(crate) fn parse_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Invalid timestamp in {}: {} ({})", column, raw, e)))
}

pub(crate) fn parse_opt_timestamp(
    raw: Option<String>,
    column: &str,
) -> Result<Option<DateTime<Utc>>> {
    raw.map(|r| parse_timestamp(&r, column)).transpose()
}

pub(crate) fn parse_opt_date(raw: Option<String>, column: &str) -> Result<Option<NaiveDate>> {
    raw.map(|r| {
        NaiveDate::parse_from_str(&r, "%Y-%m-%d")
            .map_err(|e| Error::Internal(format!("Invalid date in {}: {} ({})", column, r, e)))
    })
    .transpose()
}

/// Decode an optional JSON column
pub(crate) fn parse_json(raw: Option<String>) -> Result<Option<Value>> {
    match raw {
        Some(text) if !text.trim().is_empty() => Ok(Some(serde_json::from_str(&text)?)),
        _ => Ok(None),
    }
}

/// Decode a JSON column into a typed value, defaulting when NULL
pub(crate) fn parse_typed<T>(raw: Option<String>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match raw {
        Some(text) if !text.trim().is_empty() => Ok(serde_json::from_str(&text)?),
        _ => Ok(T::default()),
    }
}

pub(crate) fn json_text<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

pub(crate) fn opt_json_text(value: Option<&Value>) -> Result<Option<String>> {
    value.map(json_text).transpose()
}
