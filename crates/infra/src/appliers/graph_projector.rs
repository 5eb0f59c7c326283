//! Graph projection of the hierarchy.
//!
//! Nodes are keyed by (tenant_id, code) and parent edges are replaced
//! wholesale on every upsert, so redelivery and out-of-order arrival
//! across different codes converge on the same graph. A child arriving
//! before its parent merges a placeholder parent node that a later
//! upsert fills in.

use serde_json::{json, Value as JsonValue};
use tracing::info;

use orgledger_capture::{Applier, ApplyError, CapturedRow, CdcDate, ChangeEvent, ChangeOp};

use crate::graph::{GraphParams, GraphStore, GraphStoreError};

const UPSERT_UNIT: &str = "\
MERGE (u:OrganizationUnit {tenant_id: $tenant_id, code: $code})
SET u.name = $name, u.unit_type = $unit_type, u.status = $status,
    u.level = $level, u.path = $path, u.version = $version,
    u.effective_date = $effective_date, u.updated_at = timestamp()";

const LINK_PARENT: &str = "\
MATCH (u:OrganizationUnit {tenant_id: $tenant_id, code: $code})
OPTIONAL MATCH (:OrganizationUnit)-[old:HAS_CHILD]->(u)
DELETE old
WITH DISTINCT u
MERGE (p:OrganizationUnit {tenant_id: $tenant_id, code: $parent_code})
MERGE (p)-[:HAS_CHILD]->(u)";

const UNLINK_PARENT: &str = "\
MATCH (:OrganizationUnit)-[old:HAS_CHILD]->(u:OrganizationUnit {tenant_id: $tenant_id, code: $code})
DELETE old";

const DELETE_UNIT: &str = "\
MATCH (u:OrganizationUnit {tenant_id: $tenant_id, code: $code})
DETACH DELETE u";

pub struct GraphProjector<G> {
    store: G,
}

impl<G: GraphStore> GraphProjector<G> {
    pub fn new(store: G) -> Self {
        Self { store }
    }

    fn upsert(&self, change: &ChangeEvent) -> Result<(), ApplyError> {
        let row = change
            .row
            .as_ref()
            .ok_or_else(|| ApplyError::fatal("change has no row image to project"))?;
        let params = node_params(change, row)?;
        self.store.run(UPSERT_UNIT, &params).map_err(map_store_error)?;

        let mut edge = identity_params(change);
        match &row.parent_code {
            Some(parent_code) => {
                edge.insert("parent_code".to_string(), json!(parent_code));
                self.store.run(LINK_PARENT, &edge).map_err(map_store_error)?;
            }
            None => {
                self.store.run(UNLINK_PARENT, &edge).map_err(map_store_error)?;
            }
        }
        info!(
            tenant_id = %change.tenant_id,
            code = %change.code,
            "graph node upserted"
        );
        Ok(())
    }

    fn remove(&self, change: &ChangeEvent) -> Result<(), ApplyError> {
        self.store
            .run(DELETE_UNIT, &identity_params(change))
            .map_err(map_store_error)?;
        info!(
            tenant_id = %change.tenant_id,
            code = %change.code,
            "graph node removed"
        );
        Ok(())
    }
}

impl<G: GraphStore> Applier for GraphProjector<G> {
    fn name(&self) -> &'static str {
        "graph_projector"
    }

    fn apply(&self, change: &ChangeEvent) -> Result<(), ApplyError> {
        match change.op {
            ChangeOp::Delete => self.remove(change),
            ChangeOp::Create | ChangeOp::Update | ChangeOp::Snapshot => self.upsert(change),
        }
    }
}

fn identity_params(change: &ChangeEvent) -> GraphParams {
    let mut params = GraphParams::new();
    params.insert("tenant_id".to_string(), json!(change.tenant_id.to_string()));
    params.insert("code".to_string(), json!(change.code.as_str()));
    params
}

fn node_params(change: &ChangeEvent, row: &CapturedRow) -> Result<GraphParams, ApplyError> {
    let mut params = identity_params(change);
    params.insert("name".to_string(), json!(required(&row.name, "name")?));
    params.insert(
        "unit_type".to_string(),
        json!(required(&row.unit_type, "unit_type")?),
    );
    params.insert("status".to_string(), json!(required(&row.status, "status")?));
    params.insert("level".to_string(), json!(required(&row.level, "level")?));
    params.insert("path".to_string(), json!(required(&row.path, "path")?));
    params.insert("version".to_string(), json!(required(&row.version, "version")?));
    let effective = row.effective_date.as_ref().and_then(CdcDate::to_naive_date);
    params.insert(
        "effective_date".to_string(),
        match effective {
            Some(date) => json!(date.to_string()),
            None => JsonValue::Null,
        },
    );
    Ok(params)
}

fn required<T: Clone>(field: &Option<T>, name: &str) -> Result<T, ApplyError> {
    field
        .clone()
        .ok_or_else(|| ApplyError::fatal(format!("change row is missing {name}")))
}

fn map_store_error(err: GraphStoreError) -> ApplyError {
    match err {
        GraphStoreError::Connection(message) => ApplyError::transient(message),
        GraphStoreError::Command(message) => ApplyError::fatal(message),
    }
}
