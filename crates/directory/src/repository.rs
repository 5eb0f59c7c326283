//! Storage port for version chains, plus the in-memory reference store.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::{NaiveDate, Utc};

use orgledger_core::{CODE_MAX, CODE_MIN, DomainError, DomainResult, TenantId, UnitCode};

use crate::unit::{OrganizationVersion, UnitStatus, UnitType};

/// Hierarchy placement of a unit: depth and materialized path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub level: i32,
    pub path: String,
}

/// Input for writing a version row.
///
/// Temporal bookkeeping (version number, supersedes pointer, currency flag)
/// is assigned by the repository; `level` and `path` come from the
/// hierarchy service.
#[derive(Debug, Clone)]
pub struct NewVersion {
    pub tenant_id: TenantId,
    pub code: UnitCode,
    pub parent_code: Option<UnitCode>,
    pub name: String,
    pub unit_type: UnitType,
    pub status: UnitStatus,
    pub level: i32,
    pub path: String,
    pub sort_order: i32,
    pub description: Option<String>,
    pub effective_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub change_reason: Option<String>,
}

/// Storage port for organization version chains.
///
/// Write operations enforce the bitemporal rules: rows are immutable once
/// written (only their `end_date` closes), intervals per `(tenant_id, code)`
/// never overlap, and version numbers grow by one per write.
pub trait VersionRepository: Send + Sync {
    /// Insert version 1 of a new unit. Fails with a conflict when any chain
    /// already occupies the code, deleted or not.
    fn create(&self, input: NewVersion) -> DomainResult<OrganizationVersion>;

    /// Close the newest version at `input.effective_date` and insert its
    /// successor in the same logical write.
    fn update(&self, input: NewVersion) -> DomainResult<OrganizationVersion>;

    /// Terminate a unit: close the newest version and append a `Deleted`
    /// terminal version. All rows are retained for audit.
    fn delete(
        &self,
        tenant_id: TenantId,
        code: &UnitCode,
        reason: &str,
    ) -> DomainResult<OrganizationVersion>;

    /// The version currently in force, if any. Deleted units yield `None`.
    fn find_by_code(
        &self,
        tenant_id: TenantId,
        code: &UnitCode,
    ) -> DomainResult<Option<OrganizationVersion>>;

    /// Currently effective children of `code`, ordered by sort order then
    /// code.
    fn find_children(
        &self,
        tenant_id: TenantId,
        code: &UnitCode,
    ) -> DomainResult<Vec<OrganizationVersion>>;

    /// Whether any version chain occupies the code. Codes are never reused,
    /// so deleted chains still count.
    fn exists(&self, tenant_id: TenantId, code: &UnitCode) -> DomainResult<bool>;

    /// Whether the unit has any currently effective children.
    fn has_children(&self, tenant_id: TenantId, code: &UnitCode) -> DomainResult<bool>;

    /// Placement of the currently effective version, if any.
    fn placement(&self, tenant_id: TenantId, code: &UnitCode)
    -> DomainResult<Option<Placement>>;

    /// Lowest unoccupied seven-digit code for the tenant.
    fn generate_next_code(&self, tenant_id: TenantId) -> DomainResult<UnitCode>;

    /// Full version chain, newest version first, deleted rows included.
    fn load_versions(
        &self,
        tenant_id: TenantId,
        code: &UnitCode,
    ) -> DomainResult<Vec<OrganizationVersion>>;
}

impl<R: VersionRepository + ?Sized> VersionRepository for Arc<R> {
    fn create(&self, input: NewVersion) -> DomainResult<OrganizationVersion> {
        (**self).create(input)
    }

    fn update(&self, input: NewVersion) -> DomainResult<OrganizationVersion> {
        (**self).update(input)
    }

    fn delete(
        &self,
        tenant_id: TenantId,
        code: &UnitCode,
        reason: &str,
    ) -> DomainResult<OrganizationVersion> {
        (**self).delete(tenant_id, code, reason)
    }

    fn find_by_code(
        &self,
        tenant_id: TenantId,
        code: &UnitCode,
    ) -> DomainResult<Option<OrganizationVersion>> {
        (**self).find_by_code(tenant_id, code)
    }

    fn find_children(
        &self,
        tenant_id: TenantId,
        code: &UnitCode,
    ) -> DomainResult<Vec<OrganizationVersion>> {
        (**self).find_children(tenant_id, code)
    }

    fn exists(&self, tenant_id: TenantId, code: &UnitCode) -> DomainResult<bool> {
        (**self).exists(tenant_id, code)
    }

    fn has_children(&self, tenant_id: TenantId, code: &UnitCode) -> DomainResult<bool> {
        (**self).has_children(tenant_id, code)
    }

    fn placement(
        &self,
        tenant_id: TenantId,
        code: &UnitCode,
    ) -> DomainResult<Option<Placement>> {
        (**self).placement(tenant_id, code)
    }

    fn generate_next_code(&self, tenant_id: TenantId) -> DomainResult<UnitCode> {
        (**self).generate_next_code(tenant_id)
    }

    fn load_versions(
        &self,
        tenant_id: TenantId,
        code: &UnitCode,
    ) -> DomainResult<Vec<OrganizationVersion>> {
        (**self).load_versions(tenant_id, code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct UnitKey {
    tenant_id: TenantId,
    code: UnitCode,
}

/// In-memory `VersionRepository` for tests and single-process setups.
///
/// Currency flags are recomputed after every write, so the store always
/// satisfies the at-most-one-current invariant per chain.
#[derive(Debug, Default)]
pub struct InMemoryVersionStore {
    chains: RwLock<HashMap<UnitKey, Vec<OrganizationVersion>>>,
}

impl InMemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    fn key(tenant_id: TenantId, code: &UnitCode) -> UnitKey {
        UnitKey {
            tenant_id,
            code: code.clone(),
        }
    }

    fn lock_poisoned() -> DomainError {
        DomainError::transient_store("version store lock poisoned")
    }

    // Currency is computed from the validity dates, not the stored flag:
    // the flag reflects write time and goes stale once a cutover passes
    // without a new write.
    fn current_of(chain: &[OrganizationVersion]) -> Option<&OrganizationVersion> {
        let today = Self::today();
        chain
            .iter()
            .find(|v| v.status != UnitStatus::Deleted && v.active_on(today))
    }

    fn refresh_currency(chain: &mut [OrganizationVersion], today: NaiveDate) {
        for row in chain.iter_mut() {
            row.is_current = row.active_on(today);
        }
    }

    fn guard_interval(input: &NewVersion) -> DomainResult<()> {
        if let Some(end) = input.end_date {
            if end <= input.effective_date {
                return Err(DomainError::validation(format!(
                    "end_date {end} must be after effective_date {}",
                    input.effective_date
                )));
            }
        }
        Ok(())
    }
}

impl VersionRepository for InMemoryVersionStore {
    fn create(&self, input: NewVersion) -> DomainResult<OrganizationVersion> {
        Self::guard_interval(&input)?;
        let mut chains = self.chains.write().map_err(|_| Self::lock_poisoned())?;
        let key = Self::key(input.tenant_id, &input.code);
        if chains.contains_key(&key) {
            return Err(DomainError::conflict(format!(
                "organization code already in use: {}",
                input.code
            )));
        }

        let now = Utc::now();
        let mut row = OrganizationVersion {
            tenant_id: input.tenant_id,
            code: input.code,
            parent_code: input.parent_code,
            name: input.name,
            unit_type: input.unit_type,
            status: input.status,
            level: input.level,
            path: input.path,
            sort_order: input.sort_order,
            description: input.description,
            effective_date: input.effective_date,
            end_date: input.end_date,
            version: 1,
            supersedes_version: None,
            change_reason: input.change_reason,
            is_current: false,
            created_at: now,
            updated_at: now,
        };
        row.is_current = row.active_on(Self::today());
        chains.insert(key, vec![row.clone()]);
        Ok(row)
    }

    fn update(&self, input: NewVersion) -> DomainResult<OrganizationVersion> {
        Self::guard_interval(&input)?;
        let mut chains = self.chains.write().map_err(|_| Self::lock_poisoned())?;
        let key = Self::key(input.tenant_id, &input.code);
        let chain = chains.get_mut(&key).ok_or_else(|| {
            DomainError::not_found(format!("organization not found: {}", input.code))
        })?;

        let newest = chain
            .iter()
            .max_by_key(|v| v.version)
            .cloned()
            .ok_or_else(|| {
                DomainError::not_found(format!("organization not found: {}", input.code))
            })?;
        if newest.status == UnitStatus::Deleted {
            return Err(DomainError::not_found(format!(
                "organization not found: {}",
                input.code
            )));
        }
        if input.effective_date < newest.effective_date {
            return Err(DomainError::validation(format!(
                "effective_date {} precedes the version it supersedes ({})",
                input.effective_date, newest.effective_date
            )));
        }

        let now = Utc::now();
        for row in chain.iter_mut() {
            if row.version == newest.version {
                row.end_date = Some(input.effective_date);
                row.updated_at = now;
            }
        }

        let mut successor = OrganizationVersion {
            tenant_id: input.tenant_id,
            code: input.code,
            parent_code: input.parent_code,
            name: input.name,
            unit_type: input.unit_type,
            status: input.status,
            level: input.level,
            path: input.path,
            sort_order: input.sort_order,
            description: input.description,
            effective_date: input.effective_date,
            end_date: input.end_date,
            version: newest.version + 1,
            supersedes_version: Some(newest.version),
            change_reason: input.change_reason,
            is_current: false,
            created_at: now,
            updated_at: now,
        };
        successor.is_current = successor.active_on(Self::today());
        chain.push(successor.clone());
        Self::refresh_currency(chain, Self::today());
        Ok(successor)
    }

    fn delete(
        &self,
        tenant_id: TenantId,
        code: &UnitCode,
        reason: &str,
    ) -> DomainResult<OrganizationVersion> {
        let mut chains = self.chains.write().map_err(|_| Self::lock_poisoned())?;
        let key = Self::key(tenant_id, code);
        let chain = chains
            .get_mut(&key)
            .ok_or_else(|| DomainError::not_found(format!("organization not found: {code}")))?;

        let newest = chain
            .iter()
            .max_by_key(|v| v.version)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("organization not found: {code}")))?;
        if newest.status == UnitStatus::Deleted {
            return Err(DomainError::not_found(format!(
                "organization not found: {code}"
            )));
        }

        let today = Self::today();
        // A future-dated newest version keeps the chain contiguous: the
        // terminal row starts where that version would have.
        let terminal_effective = newest.effective_date.max(today);
        let now = Utc::now();
        for row in chain.iter_mut() {
            if row.version == newest.version {
                row.end_date = Some(terminal_effective);
                row.updated_at = now;
            }
        }

        let mut terminal = OrganizationVersion {
            tenant_id,
            code: code.clone(),
            parent_code: newest.parent_code,
            name: newest.name,
            unit_type: newest.unit_type,
            status: UnitStatus::Deleted,
            level: newest.level,
            path: newest.path,
            sort_order: newest.sort_order,
            description: newest.description,
            effective_date: terminal_effective,
            end_date: None,
            version: newest.version + 1,
            supersedes_version: Some(newest.version),
            change_reason: Some(reason.to_string()),
            is_current: false,
            created_at: now,
            updated_at: now,
        };
        terminal.is_current = terminal.active_on(today);
        chain.push(terminal.clone());
        Self::refresh_currency(chain, today);
        Ok(terminal)
    }

    fn find_by_code(
        &self,
        tenant_id: TenantId,
        code: &UnitCode,
    ) -> DomainResult<Option<OrganizationVersion>> {
        let chains = self.chains.read().map_err(|_| Self::lock_poisoned())?;
        Ok(chains
            .get(&Self::key(tenant_id, code))
            .and_then(|chain| Self::current_of(chain))
            .cloned())
    }

    fn find_children(
        &self,
        tenant_id: TenantId,
        code: &UnitCode,
    ) -> DomainResult<Vec<OrganizationVersion>> {
        let chains = self.chains.read().map_err(|_| Self::lock_poisoned())?;
        let mut children: Vec<OrganizationVersion> = chains
            .iter()
            .filter(|(key, _)| key.tenant_id == tenant_id)
            .filter_map(|(_, chain)| Self::current_of(chain))
            .filter(|v| v.parent_code.as_ref() == Some(code))
            .cloned()
            .collect();
        children.sort_by(|a, b| {
            a.sort_order
                .cmp(&b.sort_order)
                .then_with(|| a.code.cmp(&b.code))
        });
        Ok(children)
    }

    fn exists(&self, tenant_id: TenantId, code: &UnitCode) -> DomainResult<bool> {
        let chains = self.chains.read().map_err(|_| Self::lock_poisoned())?;
        Ok(chains.contains_key(&Self::key(tenant_id, code)))
    }

    fn has_children(&self, tenant_id: TenantId, code: &UnitCode) -> DomainResult<bool> {
        let chains = self.chains.read().map_err(|_| Self::lock_poisoned())?;
        Ok(chains
            .iter()
            .filter(|(key, _)| key.tenant_id == tenant_id)
            .filter_map(|(_, chain)| Self::current_of(chain))
            .any(|v| v.parent_code.as_ref() == Some(code)))
    }

    fn placement(
        &self,
        tenant_id: TenantId,
        code: &UnitCode,
    ) -> DomainResult<Option<Placement>> {
        Ok(self.find_by_code(tenant_id, code)?.map(|v| Placement {
            level: v.level,
            path: v.path,
        }))
    }

    fn generate_next_code(&self, tenant_id: TenantId) -> DomainResult<UnitCode> {
        let chains = self.chains.read().map_err(|_| Self::lock_poisoned())?;
        let used: HashSet<u32> = chains
            .keys()
            .filter(|key| key.tenant_id == tenant_id)
            .map(|key| key.code.as_number())
            .collect();
        for n in CODE_MIN..=CODE_MAX {
            if !used.contains(&n) {
                return UnitCode::from_number(n);
            }
        }
        Err(DomainError::business_rule(
            "organization code space exhausted",
        ))
    }

    fn load_versions(
        &self,
        tenant_id: TenantId,
        code: &UnitCode,
    ) -> DomainResult<Vec<OrganizationVersion>> {
        let chains = self.chains.read().map_err(|_| Self::lock_poisoned())?;
        let mut versions = chains
            .get(&Self::key(tenant_id, code))
            .cloned()
            .unwrap_or_default();
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(versions)
    }
}
