//! Bucket targets and index selections
//!
//! Writes name their bucket in one of three ways: an explicit timestamp, a
//! document identity with a creation time embedded in it, or the raw
//! document itself. All three are reduced to a date once, here.

use crate::index::{IndexError, IndexResult};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde_json::Value;

/// What a caller hands in to find the bucket a document belongs to
#[derive(Debug, Clone, PartialEq)]
pub enum BucketTarget {
    Date(DateTime<Utc>),
    /// 24-hex object id whose first 8 hex digits are seconds since the epoch
    Identity(String),
    /// A document; its date is read from the configured timestamp field
    Raw(Value),
}

impl From<DateTime<Utc>> for BucketTarget {
    fn from(date: DateTime<Utc>) -> Self {
        BucketTarget::Date(date)
    }
}

impl From<NaiveDate> for BucketTarget {
    fn from(date: NaiveDate) -> Self {
        BucketTarget::Date(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)))
    }
}

impl BucketTarget {
    /// The instant this target falls on
    pub fn resolve_date(&self, timestamp_field: Option<&str>) -> IndexResult<DateTime<Utc>> {
        match self {
            BucketTarget::Date(date) => Ok(*date),
            BucketTarget::Identity(id) => date_from_object_id(id),
            BucketTarget::Raw(document) => {
                let field = timestamp_field.ok_or_else(|| {
                    IndexError::InvalidTarget(
                        "raw document given but no timestamp field is configured".to_string(),
                    )
                })?;
                let value = lookup(document, field).ok_or_else(|| {
                    IndexError::InvalidTarget(format!("document has no '{}' field", field))
                })?;
                date_from_value(value).ok_or_else(|| {
                    IndexError::InvalidTarget(format!("'{}' is not a date: {}", field, value))
                })
            }
        }
    }
}

fn date_from_object_id(id: &str) -> IndexResult<DateTime<Utc>> {
    let invalid = || IndexError::InvalidTarget(format!("'{}' is not an object id", id));

    if id.len() != 24 || !id.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    let seconds = u32::from_str_radix(&id[..8], 16).map_err(|_| invalid())?;
    Utc.timestamp_opt(i64::from(seconds), 0)
        .single()
        .ok_or_else(invalid)
}

/// Follow a dotted path into nested objects
fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(document, |current, key| current.get(key))
}

fn date_from_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .map(|d| d.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(text, "%Y-%m-%d")
                    .ok()
                    .map(|d| Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN)))
            }),
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}

/// Which physical names a read should address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexSelection {
    /// The logical name itself
    All,
    DateRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// Names passed through untouched
    Explicit(Vec<String>),
}
