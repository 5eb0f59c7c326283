//! Wire types for change envelopes as row-capture connectors publish them.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Topic for organization unit row changes.
pub const ORGANIZATION_UNITS_TOPIC: &str = "organization_db.public.organization_units";

/// Topic carrying row changes for one table: `<db>.<schema>.<table>`.
pub fn capture_topic(db: &str, schema: &str, table: &str) -> String {
    format!("{db}.{schema}.{table}")
}

/// A date as connectors emit it: either days since the Unix epoch or an
/// ISO `YYYY-MM-DD` string, depending on connector configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CdcDate {
    Days(i64),
    Text(String),
}

impl CdcDate {
    /// Resolve to a calendar date. `None` for unparseable text or day
    /// counts outside the calendar.
    pub fn to_naive_date(&self) -> Option<NaiveDate> {
        match self {
            CdcDate::Days(days) => NaiveDate::from_ymd_opt(1970, 1, 1)?
                .checked_add_signed(Duration::days(*days)),
            CdcDate::Text(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d").ok(),
        }
    }
}

/// Row image carried in `before`/`after`.
///
/// Every column is optional: connectors may project a subset, and the
/// consumer decides per operation which fields it actually needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapturedRow {
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub parent_code: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub unit_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub level: Option<i32>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub sort_order: Option<i32>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub effective_date: Option<CdcDate>,
    #[serde(default)]
    pub end_date: Option<CdcDate>,
    #[serde(default)]
    pub version: Option<i64>,
    #[serde(default)]
    pub supersedes_version: Option<i64>,
    #[serde(default)]
    pub change_reason: Option<String>,
    #[serde(default)]
    pub is_current: Option<bool>,
}

/// Connector-side provenance block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CdcSource {
    #[serde(default)]
    pub connector: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub ts_ms: Option<i64>,
    #[serde(default)]
    pub db: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default, rename = "txId")]
    pub tx_id: Option<i64>,
    #[serde(default)]
    pub lsn: Option<i64>,
}

/// Inner payload of the change envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CdcPayload {
    #[serde(default)]
    pub before: Option<CapturedRow>,
    #[serde(default)]
    pub after: Option<CapturedRow>,
    #[serde(default)]
    pub source: Option<CdcSource>,
    /// Single-letter operation code: c, u, d or r.
    pub op: String,
    #[serde(default)]
    pub ts_ms: Option<i64>,
}

/// Outer envelope as published on the capture topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CdcEnvelope {
    pub payload: CdcPayload,
}
