//! Placement and referential rules for the unit tree.

use orgledger_core::{DomainError, DomainResult, TenantId, UnitCode};

use crate::repository::{NewVersion, Placement, VersionRepository};
use crate::unit::{MAX_DEPTH, OrganizationVersion, UnitStatus};

/// Check a status change against the transition matrix. Staying put is
/// always allowed.
pub fn validate_transition(from: UnitStatus, to: UnitStatus) -> DomainResult<()> {
    if from == to || from.can_transition_to(to) {
        return Ok(());
    }
    Err(DomainError::business_rule(format!(
        "status transition {from} -> {to} is not allowed"
    )))
}

/// Enforces the tree rules around writes: referential checks, placement
/// computation, the depth ceiling, and guarded moves.
///
/// The service validates; the repository writes. Callers run the relevant
/// `validate_*` first, then [`HierarchyService::placement_for`], and hand
/// the completed [`NewVersion`] to the repository.
pub struct HierarchyService<R> {
    repo: R,
}

impl<R: VersionRepository> HierarchyService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Rules that must hold before inserting version 1 of a unit.
    pub fn validate_create(&self, input: &NewVersion) -> DomainResult<()> {
        if input.name.trim().is_empty() {
            return Err(DomainError::validation(
                "organization name must not be blank",
            ));
        }
        if !input.status.is_assignable() {
            return Err(DomainError::validation(format!(
                "status {} cannot be assigned directly",
                input.status
            )));
        }
        if self.repo.exists(input.tenant_id, &input.code)? {
            return Err(DomainError::conflict(format!(
                "organization code already in use: {}",
                input.code
            )));
        }
        if let Some(parent) = &input.parent_code {
            if self.repo.find_by_code(input.tenant_id, parent)?.is_none() {
                return Err(DomainError::not_found(format!(
                    "parent organization not found: {parent}"
                )));
            }
        }
        Ok(())
    }

    /// Rules for superseding the current version. Returns the version being
    /// superseded so callers can diff against it.
    pub fn validate_update(&self, input: &NewVersion) -> DomainResult<OrganizationVersion> {
        let current = self
            .repo
            .find_by_code(input.tenant_id, &input.code)?
            .ok_or_else(|| {
                DomainError::not_found(format!("organization not found: {}", input.code))
            })?;
        if input.name.trim().is_empty() {
            return Err(DomainError::validation(
                "organization name must not be blank",
            ));
        }
        validate_transition(current.status, input.status)?;
        if current.parent_code != input.parent_code {
            self.validate_move(&current, input.parent_code.as_ref())?;
        }
        Ok(current)
    }

    /// A unit can be deleted only while it has no effective children.
    pub fn validate_delete(&self, tenant_id: TenantId, code: &UnitCode) -> DomainResult<()> {
        if self.repo.find_by_code(tenant_id, code)?.is_none() {
            return Err(DomainError::not_found(format!(
                "organization not found: {code}"
            )));
        }
        if self.repo.has_children(tenant_id, code)? {
            return Err(DomainError::business_rule(format!(
                "organization {code} has children and cannot be deleted"
            )));
        }
        Ok(())
    }

    /// Guards for reparenting `current` under `new_parent` (`None` makes it
    /// a root).
    ///
    /// Only leaves move: a reparented unit's descendants would otherwise
    /// keep stale paths. Cycles are detected from the prospective parent's
    /// materialized path.
    pub fn validate_move(
        &self,
        current: &OrganizationVersion,
        new_parent: Option<&UnitCode>,
    ) -> DomainResult<()> {
        if let Some(parent) = new_parent {
            if parent == &current.code {
                return Err(DomainError::business_rule(format!(
                    "organization {parent} cannot be its own parent"
                )));
            }
            let parent_row = self
                .repo
                .find_by_code(current.tenant_id, parent)?
                .ok_or_else(|| {
                    DomainError::not_found(format!("parent organization not found: {parent}"))
                })?;
            if path_contains(&parent_row.path, &current.code) {
                return Err(DomainError::business_rule(format!(
                    "moving {} under {parent} would create a cycle",
                    current.code
                )));
            }
        }
        if self.repo.has_children(current.tenant_id, &current.code)? {
            return Err(DomainError::business_rule(format!(
                "organization {} has children; move them first",
                current.code
            )));
        }
        Ok(())
    }

    /// Compute level and path for a unit placed under `parent_code`.
    ///
    /// Roots sit at level 1 with path `/<code>`. The depth ceiling is
    /// enforced here, before any row is written.
    pub fn placement_for(
        &self,
        tenant_id: TenantId,
        code: &UnitCode,
        parent_code: Option<&UnitCode>,
    ) -> DomainResult<Placement> {
        let placement = match parent_code {
            None => Placement {
                level: 1,
                path: format!("/{code}"),
            },
            Some(parent) => {
                let parent_placement =
                    self.repo.placement(tenant_id, parent)?.ok_or_else(|| {
                        DomainError::not_found(format!("parent organization not found: {parent}"))
                    })?;
                Placement {
                    level: parent_placement.level + 1,
                    path: format!("{}/{code}", parent_placement.path),
                }
            }
        };
        if placement.level > MAX_DEPTH {
            return Err(DomainError::business_rule(format!(
                "hierarchy depth {} exceeds the maximum of {MAX_DEPTH}",
                placement.level
            )));
        }
        Ok(placement)
    }

    /// Next unused code for server-side assignment.
    pub fn generate_code(&self, tenant_id: TenantId) -> DomainResult<UnitCode> {
        self.repo.generate_next_code(tenant_id)
    }
}

fn path_contains(path: &str, code: &UnitCode) -> bool {
    path.split('/').any(|segment| segment == code.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryVersionStore;
    use crate::unit::UnitType;
    use chrono::{Duration, NaiveDate, Utc};
    use std::sync::Arc;

    fn code(s: &str) -> UnitCode {
        UnitCode::parse(s).unwrap()
    }

    fn effective() -> NaiveDate {
        Utc::now().date_naive() - Duration::days(30)
    }

    fn draft(tenant_id: TenantId, code_str: &str, parent: Option<&str>) -> NewVersion {
        NewVersion {
            tenant_id,
            code: code(code_str),
            parent_code: parent.map(code),
            name: format!("Unit {code_str}"),
            unit_type: UnitType::Department,
            status: UnitStatus::Active,
            level: 0,
            path: String::new(),
            sort_order: 0,
            description: None,
            effective_date: effective(),
            end_date: None,
            change_reason: None,
        }
    }

    struct Fixture {
        tenant: TenantId,
        store: Arc<InMemoryVersionStore>,
        service: HierarchyService<Arc<InMemoryVersionStore>>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryVersionStore::new());
        Fixture {
            tenant: TenantId::new(),
            store: Arc::clone(&store),
            service: HierarchyService::new(store),
        }
    }

    impl Fixture {
        /// Place and persist a unit, returning the written version.
        fn seed(&self, code_str: &str, parent: Option<&str>) -> OrganizationVersion {
            let mut input = draft(self.tenant, code_str, parent);
            let placement = self
                .service
                .placement_for(self.tenant, &input.code, input.parent_code.as_ref())
                .unwrap();
            input.level = placement.level;
            input.path = placement.path;
            self.store.create(input).unwrap()
        }
    }

    #[test]
    fn roots_are_level_one_with_single_segment_paths() {
        let fx = fixture();
        let root = fx.seed("1000001", None);
        assert_eq!(root.level, 1);
        assert_eq!(root.path, "/1000001");
    }

    #[test]
    fn child_placement_extends_the_parent_path() {
        let fx = fixture();
        fx.seed("1000001", None);
        let child = fx.seed("1000002", Some("1000001"));
        assert_eq!(child.level, 2);
        assert_eq!(child.path, "/1000001/1000002");
    }

    #[test]
    fn placement_at_depth_eleven_is_rejected() {
        let fx = fixture();
        // Chain 1000001 -> ... -> 1000010 fills all ten allowed levels.
        let mut parent: Option<String> = None;
        for n in 1..=10u32 {
            let code_str = format!("{}", 1_000_000 + n);
            fx.seed(&code_str, parent.as_deref());
            parent = Some(code_str);
        }

        match fx.service.placement_for(
            fx.tenant,
            &code("1000011"),
            Some(&code("1000010")),
        ) {
            Err(DomainError::BusinessRule(_)) => {}
            other => panic!("Expected BusinessRule error, got {other:?}"),
        }
    }

    #[test]
    fn validate_create_rejects_blank_names() {
        let fx = fixture();
        let mut input = draft(fx.tenant, "1000001", None);
        input.name = "   ".to_string();
        match fx.service.validate_create(&input) {
            Err(DomainError::Validation(_)) => {}
            other => panic!("Expected Validation error, got {other:?}"),
        }
    }

    #[test]
    fn validate_create_rejects_terminal_statuses() {
        let fx = fixture();
        let mut input = draft(fx.tenant, "1000001", None);
        input.status = UnitStatus::Dissolved;
        match fx.service.validate_create(&input) {
            Err(DomainError::Validation(_)) => {}
            other => panic!("Expected Validation error, got {other:?}"),
        }
    }

    #[test]
    fn validate_create_rejects_occupied_codes() {
        let fx = fixture();
        fx.seed("1000001", None);
        match fx.service.validate_create(&draft(fx.tenant, "1000001", None)) {
            Err(DomainError::Conflict(_)) => {}
            other => panic!("Expected Conflict error, got {other:?}"),
        }
    }

    #[test]
    fn validate_create_requires_an_existing_parent() {
        let fx = fixture();
        match fx
            .service
            .validate_create(&draft(fx.tenant, "1000002", Some("1000001")))
        {
            Err(DomainError::NotFound(_)) => {}
            other => panic!("Expected NotFound error, got {other:?}"),
        }
    }

    #[test]
    fn validate_update_returns_the_superseded_version() {
        let fx = fixture();
        fx.seed("1000001", None);
        let mut input = draft(fx.tenant, "1000001", None);
        input.name = "Renamed".to_string();
        let current = fx.service.validate_update(&input).unwrap();
        assert_eq!(current.version, 1);
    }

    #[test]
    fn validate_update_enforces_the_transition_matrix() {
        let fx = fixture();
        fx.seed("1000001", None);
        let mut input = draft(fx.tenant, "1000001", None);
        input.status = UnitStatus::Planned;
        match fx.service.validate_update(&input) {
            Err(DomainError::BusinessRule(_)) => {}
            other => panic!("Expected BusinessRule error, got {other:?}"),
        }
    }

    #[test]
    fn validate_delete_blocks_units_with_children() {
        let fx = fixture();
        fx.seed("1000001", None);
        fx.seed("1000002", Some("1000001"));

        match fx.service.validate_delete(fx.tenant, &code("1000001")) {
            Err(DomainError::BusinessRule(_)) => {}
            other => panic!("Expected BusinessRule error, got {other:?}"),
        }
        fx.service
            .validate_delete(fx.tenant, &code("1000002"))
            .unwrap();
    }

    #[test]
    fn validate_move_rejects_self_parenting() {
        let fx = fixture();
        let root = fx.seed("1000001", None);
        match fx.service.validate_move(&root, Some(&code("1000001"))) {
            Err(DomainError::BusinessRule(_)) => {}
            other => panic!("Expected BusinessRule error, got {other:?}"),
        }
    }

    #[test]
    fn validate_move_detects_cycles_through_descendants() {
        let fx = fixture();
        let root = fx.seed("1000001", None);
        fx.seed("1000002", Some("1000001"));
        fx.seed("1000003", Some("1000002"));

        // Moving the root under its grandchild would close a loop.
        match fx.service.validate_move(&root, Some(&code("1000003"))) {
            Err(DomainError::BusinessRule(_)) => {}
            other => panic!("Expected BusinessRule error, got {other:?}"),
        }
    }

    #[test]
    fn validate_move_only_allows_leaves_to_move() {
        let fx = fixture();
        fx.seed("1000001", None);
        let middle = fx.seed("1000002", Some("1000001"));
        fx.seed("1000003", Some("1000002"));
        fx.seed("1000009", None);

        match fx.service.validate_move(&middle, Some(&code("1000009"))) {
            Err(DomainError::BusinessRule(_)) => {}
            other => panic!("Expected BusinessRule error, got {other:?}"),
        }
    }

    #[test]
    fn validate_move_accepts_a_leaf_under_a_new_parent() {
        let fx = fixture();
        fx.seed("1000001", None);
        let leaf = fx.seed("1000002", Some("1000001"));
        fx.seed("1000009", None);

        fx.service
            .validate_move(&leaf, Some(&code("1000009")))
            .unwrap();
        // Promoting a leaf to a root is a move too.
        fx.service.validate_move(&leaf, None).unwrap();
    }

    #[test]
    fn transition_to_same_status_is_a_no_op() {
        validate_transition(UnitStatus::Dissolved, UnitStatus::Dissolved).unwrap();
        match validate_transition(UnitStatus::Dissolved, UnitStatus::Active) {
            Err(DomainError::BusinessRule(_)) => {}
            other => panic!("Expected BusinessRule error, got {other:?}"),
        }
    }

    #[test]
    fn generate_code_delegates_to_the_repository() {
        let fx = fixture();
        fx.seed("1000000", None);
        let next = fx.service.generate_code(fx.tenant).unwrap();
        assert_eq!(next.as_str(), "1000001");
    }
}
