//! Organization directory domain: bitemporal version chains, hierarchy
//! placement rules, and temporal queries.
//!
//! Pure domain logic over the [`VersionRepository`] port. Storage backends
//! and change propagation live in `orgledger-infra`.

pub mod events;
pub mod hierarchy;
pub mod repository;
pub mod temporal;
pub mod unit;

pub use events::{
    ChangeKind, ORGANIZATION_CREATED, ORGANIZATION_DELETED, ORGANIZATION_UPDATED,
    OrganizationChanged, change_event,
};
pub use hierarchy::{HierarchyService, validate_transition};
pub use repository::{InMemoryVersionStore, NewVersion, Placement, VersionRepository};
pub use temporal::{AnnotatedVersion, TemporalFilter, TemporalQueryEngine};
pub use unit::{MAX_DEPTH, OrganizationVersion, TemporalStatus, UnitStatus, UnitType};
