//! Domain events announcing version writes.

use serde::{Deserialize, Serialize};

use chrono::NaiveDate;
use orgledger_core::{DomainError, DomainResult, UnitCode};
use orgledger_events::DomainEvent;

use crate::unit::{OrganizationVersion, UnitStatus, UnitType};

/// Published when version 1 of a unit is written.
pub const ORGANIZATION_CREATED: &str = "organization.created";
/// Published when a successor version is written.
pub const ORGANIZATION_UPDATED: &str = "organization.updated";
/// Published when the terminal deleted version is written.
pub const ORGANIZATION_DELETED: &str = "organization.deleted";

/// Which kind of write produced a version row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

impl ChangeKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            ChangeKind::Created => ORGANIZATION_CREATED,
            ChangeKind::Updated => ORGANIZATION_UPDATED,
            ChangeKind::Deleted => ORGANIZATION_DELETED,
        }
    }
}

/// Event payload: snapshot of the version row that was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationChanged {
    pub code: UnitCode,
    pub parent_code: Option<UnitCode>,
    pub name: String,
    pub unit_type: UnitType,
    pub status: UnitStatus,
    pub level: i32,
    pub path: String,
    pub effective_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub version: i64,
    pub supersedes_version: Option<i64>,
    pub change_reason: Option<String>,
}

impl OrganizationChanged {
    pub fn from_version(row: &OrganizationVersion) -> Self {
        Self {
            code: row.code.clone(),
            parent_code: row.parent_code.clone(),
            name: row.name.clone(),
            unit_type: row.unit_type,
            status: row.status,
            level: row.level,
            path: row.path.clone(),
            effective_date: row.effective_date,
            end_date: row.end_date,
            version: row.version,
            supersedes_version: row.supersedes_version,
            change_reason: row.change_reason.clone(),
        }
    }
}

/// Build the domain event announcing that `row` was written.
///
/// The unit code becomes the aggregate id, so transports keep all events
/// for one unit in order.
pub fn change_event(kind: ChangeKind, row: &OrganizationVersion) -> DomainResult<DomainEvent> {
    let payload = serde_json::to_value(OrganizationChanged::from_version(row))
        .map_err(|e| DomainError::validation(format!("event payload encoding failed: {e}")))?;
    Ok(DomainEvent::new(
        kind.event_type(),
        row.tenant_id,
        row.code.clone(),
        payload,
    ))
}
