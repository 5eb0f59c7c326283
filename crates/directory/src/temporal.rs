//! Read-side queries over version chains.

use chrono::{NaiveDate, Utc};
use serde::Serialize;

use orgledger_core::{DomainError, DomainResult, TenantId, UnitCode};

use crate::repository::VersionRepository;
use crate::unit::{OrganizationVersion, TemporalStatus, UnitStatus};

/// Narrowing criteria for [`TemporalQueryEngine::query`].
///
/// Criteria compose by logical AND. Without `as_of` or `version` the query
/// keeps only the current version; future-dated and dissolved/deleted rows
/// are excluded unless explicitly included.
#[derive(Debug, Clone, Default)]
pub struct TemporalFilter {
    /// Keep only the version in force on this date.
    pub as_of: Option<NaiveDate>,
    /// Keep only this exact version number.
    pub version: Option<i64>,
    /// Keep versions that only take effect in the future.
    pub include_future: bool,
    /// Keep dissolved and deleted versions.
    pub include_dissolved: bool,
    /// Truncate to the N most recent versions after filtering.
    pub max_versions: Option<usize>,
}

impl TemporalFilter {
    fn keeps(&self, row: &OrganizationVersion, today: NaiveDate) -> bool {
        if let Some(version) = self.version {
            if row.version != version {
                return false;
            }
        }
        if let Some(as_of) = self.as_of {
            if !row.active_on(as_of) {
                return false;
            }
        }
        // Currency comes from the validity window, not the stored flag:
        // the flag reflects write time and goes stale after a cutover.
        let pinned = self.version.is_some() || self.as_of.is_some();
        let current = row.status != UnitStatus::Deleted && row.active_on(today);
        if !pinned && !current {
            return false;
        }
        if !self.include_future && self.as_of.is_none() && row.effective_date > today {
            return false;
        }
        if !self.include_dissolved && row.status.is_terminal() {
            return false;
        }
        true
    }
}

/// A version row annotated with its classification relative to today.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotatedVersion {
    #[serde(flatten)]
    pub version: OrganizationVersion,
    pub temporal_status: TemporalStatus,
}

/// Point-in-time, range and history queries over a unit's version chain.
pub struct TemporalQueryEngine<R> {
    repo: R,
}

impl<R: VersionRepository> TemporalQueryEngine<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// The version in force on `date`.
    ///
    /// Honors the half-open interval: a version is in force from its
    /// effective date up to, but excluding, its end date. The terminal
    /// `Deleted` row never matches; after the deletion cutover the unit has
    /// no version in force.
    pub fn as_of(
        &self,
        tenant_id: TenantId,
        code: &UnitCode,
        date: NaiveDate,
    ) -> DomainResult<OrganizationVersion> {
        let versions = self.load_known(tenant_id, code)?;
        versions
            .into_iter()
            .filter(|v| v.status != UnitStatus::Deleted)
            .find(|v| v.active_on(date))
            .ok_or_else(|| {
                DomainError::not_found(format!("no version of {code} in force on {date}"))
            })
    }

    /// All versions whose validity intersects `[from, to)`, oldest first.
    pub fn range(
        &self,
        tenant_id: TenantId,
        code: &UnitCode,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DomainResult<Vec<OrganizationVersion>> {
        if to <= from {
            return Err(DomainError::validation(format!(
                "range start {from} must precede end {to}"
            )));
        }
        let mut versions: Vec<OrganizationVersion> = self
            .load_known(tenant_id, code)?
            .into_iter()
            .filter(|v| v.status != UnitStatus::Deleted && v.intersects(from, to))
            .collect();
        versions.sort_by_key(|v| v.effective_date);
        Ok(versions)
    }

    /// Full audit history, newest version first, each row annotated.
    /// Deleted terminal rows are part of the history.
    pub fn history(
        &self,
        tenant_id: TenantId,
        code: &UnitCode,
        max_versions: Option<usize>,
    ) -> DomainResult<Vec<AnnotatedVersion>> {
        let mut versions = self.load_known(tenant_id, code)?;
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        if let Some(n) = max_versions {
            versions.truncate(n);
        }
        let today = Utc::now().date_naive();
        Ok(versions
            .into_iter()
            .map(|v| AnnotatedVersion {
                temporal_status: v.temporal_status(today),
                version: v,
            })
            .collect())
    }

    /// Filtered listing of a unit's versions, newest first.
    pub fn query(
        &self,
        tenant_id: TenantId,
        code: &UnitCode,
        filter: &TemporalFilter,
    ) -> DomainResult<Vec<OrganizationVersion>> {
        let today = Utc::now().date_naive();
        let mut kept: Vec<OrganizationVersion> = self
            .load_known(tenant_id, code)?
            .into_iter()
            .filter(|v| filter.keeps(v, today))
            .collect();
        kept.sort_by(|a, b| b.version.cmp(&a.version));
        if let Some(n) = filter.max_versions {
            kept.truncate(n);
        }
        Ok(kept)
    }

    fn load_known(
        &self,
        tenant_id: TenantId,
        code: &UnitCode,
    ) -> DomainResult<Vec<OrganizationVersion>> {
        let versions = self.repo.load_versions(tenant_id, code)?;
        if versions.is_empty() {
            return Err(DomainError::not_found(format!(
                "organization not found: {code}"
            )));
        }
        Ok(versions)
    }
}
