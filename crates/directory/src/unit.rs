//! The organizational unit model: version rows, classifications, lifecycle.

use chrono::{DateTime, NaiveDate, Utc};
use core::str::FromStr;
use serde::{Deserialize, Serialize};

use orgledger_core::{DomainError, TenantId, UnitCode};

/// Deepest allowed placement in the unit tree. Roots sit at level 1.
pub const MAX_DEPTH: i32 = 10;

/// Classification of an organizational unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitType {
    Company,
    Department,
    Team,
    CostCenter,
    ProjectTeam,
}

impl UnitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitType::Company => "COMPANY",
            UnitType::Department => "DEPARTMENT",
            UnitType::Team => "TEAM",
            UnitType::CostCenter => "COST_CENTER",
            UnitType::ProjectTeam => "PROJECT_TEAM",
        }
    }
}

impl core::fmt::Display for UnitType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COMPANY" => Ok(UnitType::Company),
            "DEPARTMENT" => Ok(UnitType::Department),
            "TEAM" => Ok(UnitType::Team),
            "COST_CENTER" => Ok(UnitType::CostCenter),
            "PROJECT_TEAM" => Ok(UnitType::ProjectTeam),
            other => Err(DomainError::validation(format!(
                "unknown unit type: '{other}'"
            ))),
        }
    }
}

/// Lifecycle status of a unit version.
///
/// `Active`, `Inactive` and `Planned` can be assigned directly; `Dissolved`
/// and `Deleted` are reached only through transitions and are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitStatus {
    Active,
    Inactive,
    Planned,
    Dissolved,
    Deleted,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Active => "ACTIVE",
            UnitStatus::Inactive => "INACTIVE",
            UnitStatus::Planned => "PLANNED",
            UnitStatus::Dissolved => "DISSOLVED",
            UnitStatus::Deleted => "DELETED",
        }
    }

    /// Whether the status may be assigned on create or plain update.
    pub fn is_assignable(&self) -> bool {
        matches!(
            self,
            UnitStatus::Active | UnitStatus::Inactive | UnitStatus::Planned
        )
    }

    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitStatus::Dissolved | UnitStatus::Deleted)
    }

    /// Status transition matrix.
    pub fn can_transition_to(self, next: UnitStatus) -> bool {
        use UnitStatus::*;
        matches!(
            (self, next),
            (Active, Inactive)
                | (Active, Dissolved)
                | (Active, Deleted)
                | (Inactive, Active)
                | (Inactive, Deleted)
                | (Planned, Active)
                | (Planned, Deleted)
        )
    }
}

impl core::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(UnitStatus::Active),
            "INACTIVE" => Ok(UnitStatus::Inactive),
            "PLANNED" => Ok(UnitStatus::Planned),
            "DISSOLVED" => Ok(UnitStatus::Dissolved),
            "DELETED" => Ok(UnitStatus::Deleted),
            other => Err(DomainError::validation(format!(
                "unknown unit status: '{other}'"
            ))),
        }
    }
}

/// How a version's validity interval relates to a reference date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalStatus {
    AlwaysActive,
    CurrentlyActive,
    FutureActive,
    Expired,
    Unknown,
}

impl TemporalStatus {
    /// Classify a validity interval against `today`.
    ///
    /// Bounds are optional so rows imported without temporal limits still
    /// classify: no bounds at all means always active.
    pub fn from_bounds(
        effective: Option<NaiveDate>,
        end: Option<NaiveDate>,
        today: NaiveDate,
    ) -> Self {
        match (effective, end) {
            (None, None) => TemporalStatus::AlwaysActive,
            (Some(from), _) if from > today => TemporalStatus::FutureActive,
            (_, Some(to)) if to <= today => TemporalStatus::Expired,
            _ => TemporalStatus::CurrentlyActive,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TemporalStatus::AlwaysActive => "always_active",
            TemporalStatus::CurrentlyActive => "currently_active",
            TemporalStatus::FutureActive => "future_active",
            TemporalStatus::Expired => "expired",
            TemporalStatus::Unknown => "unknown",
        }
    }
}

/// One immutable row in a unit's version chain.
///
/// Validity is the half-open interval `[effective_date, end_date)`; an
/// absent `end_date` means open-ended. Rows for one `(tenant_id, code)`
/// never overlap: superseding a version closes it at the successor's
/// effective date, so adjacent intervals share a boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationVersion {
    pub tenant_id: TenantId,
    pub code: UnitCode,
    pub parent_code: Option<UnitCode>,
    pub name: String,
    pub unit_type: UnitType,
    pub status: UnitStatus,
    /// Depth in the tree; roots are level 1.
    pub level: i32,
    /// Materialized path of codes from the root, e.g. `/1000001/1000002`.
    pub path: String,
    pub sort_order: i32,
    pub description: Option<String>,
    pub effective_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    /// Strictly increasing per `(tenant_id, code)`, starting at 1.
    pub version: i64,
    pub supersedes_version: Option<i64>,
    pub change_reason: Option<String>,
    /// Whether this row was in force when it was last written.
    pub is_current: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrganizationVersion {
    /// Whether `date` falls inside the validity interval. The start is
    /// inclusive, the end exclusive.
    pub fn active_on(&self, date: NaiveDate) -> bool {
        self.effective_date <= date && self.end_date.map_or(true, |end| date < end)
    }

    /// Whether the validity interval intersects the half-open `[from, to)`.
    pub fn intersects(&self, from: NaiveDate, to: NaiveDate) -> bool {
        self.effective_date < to && self.end_date.map_or(true, |end| from < end)
    }

    pub fn temporal_status(&self, today: NaiveDate) -> TemporalStatus {
        TemporalStatus::from_bounds(Some(self.effective_date), self.end_date, today)
    }
}
