//! Normalized change events handed to appliers.

use orgledger_core::{TenantId, UnitCode};

use crate::envelope::{CapturedRow, CdcEnvelope};

/// Row operation decoded from the connector's single-letter code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Create,
    Update,
    Delete,
    /// Initial snapshot read; applied like an update.
    Snapshot,
}

impl ChangeOp {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "c" => Some(ChangeOp::Create),
            "u" => Some(ChangeOp::Update),
            "d" => Some(ChangeOp::Delete),
            "r" => Some(ChangeOp::Snapshot),
            _ => None,
        }
    }

    pub fn as_code(&self) -> &'static str {
        match self {
            ChangeOp::Create => "c",
            ChangeOp::Update => "u",
            ChangeOp::Delete => "d",
            ChangeOp::Snapshot => "r",
        }
    }

    /// Deletes identify the row by its `before` image; everything else by
    /// `after`.
    pub fn identity_from_before(&self) -> bool {
        matches!(self, ChangeOp::Delete)
    }
}

/// A change normalized to what appliers act on: tenant, unit code, the
/// operation, and the surviving row image.
///
/// `row` is the `after` image for creates, updates and snapshots. Deletes
/// carry no image: the row is gone, and appliers only need its identity.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub tenant_id: TenantId,
    pub code: UnitCode,
    pub op: ChangeOp,
    pub row: Option<CapturedRow>,
}

impl ChangeEvent {
    /// Normalize a decoded envelope.
    ///
    /// `None` means the envelope carries no actionable identity: an unknown
    /// op code, a missing row image, or a tenant/code that fails to parse.
    /// Such changes are skipped, never retried.
    pub fn from_envelope(envelope: &CdcEnvelope) -> Option<Self> {
        let op = ChangeOp::from_code(&envelope.payload.op)?;
        let image = if op.identity_from_before() {
            envelope.payload.before.as_ref()
        } else {
            envelope.payload.after.as_ref()
        }?;
        let tenant_id = image.tenant_id.as_deref()?.parse::<TenantId>().ok()?;
        let code = image.code.as_deref()?.parse::<UnitCode>().ok()?;
        let row = if op.identity_from_before() {
            None
        } else {
            Some(image.clone())
        };
        Some(Self {
            tenant_id,
            code,
            op,
            row,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::CdcPayload;

    fn image(tenant: &str, code: &str) -> CapturedRow {
        CapturedRow {
            tenant_id: Some(tenant.to_string()),
            code: Some(code.to_string()),
            name: Some("Head Office".to_string()),
            ..CapturedRow::default()
        }
    }

    fn envelope(op: &str, before: Option<CapturedRow>, after: Option<CapturedRow>) -> CdcEnvelope {
        CdcEnvelope {
            payload: CdcPayload {
                before,
                after,
                source: None,
                op: op.to_string(),
                ts_ms: None,
            },
        }
    }

    const TENANT: &str = "0190b5a4-0000-7000-8000-000000000000";

    #[test]
    fn creates_normalize_from_the_after_image() {
        let env = envelope("c", None, Some(image(TENANT, "1000001")));
        let change = ChangeEvent::from_envelope(&env).unwrap();
        assert_eq!(change.op, ChangeOp::Create);
        assert_eq!(change.code.as_str(), "1000001");
        assert!(change.row.is_some());
    }

    #[test]
    fn deletes_take_identity_from_the_before_image() {
        let env = envelope("d", Some(image(TENANT, "1000002")), None);
        let change = ChangeEvent::from_envelope(&env).unwrap();
        assert_eq!(change.op, ChangeOp::Delete);
        assert_eq!(change.code.as_str(), "1000002");
        assert!(change.row.is_none());
    }

    #[test]
    fn snapshots_normalize_like_updates() {
        let env = envelope("r", None, Some(image(TENANT, "1000003")));
        let change = ChangeEvent::from_envelope(&env).unwrap();
        assert_eq!(change.op, ChangeOp::Snapshot);
        assert!(change.row.is_some());
    }

    #[test]
    fn unknown_ops_are_not_actionable() {
        let env = envelope("t", None, Some(image(TENANT, "1000001")));
        assert!(ChangeEvent::from_envelope(&env).is_none());
    }

    #[test]
    fn missing_images_are_not_actionable() {
        assert!(ChangeEvent::from_envelope(&envelope("c", None, None)).is_none());
        assert!(ChangeEvent::from_envelope(&envelope("d", None, None)).is_none());
    }

    #[test]
    fn unparseable_identity_is_not_actionable() {
        let env = envelope("c", None, Some(image("not-a-uuid", "1000001")));
        assert!(ChangeEvent::from_envelope(&env).is_none());

        let env = envelope("c", None, Some(image(TENANT, "123")));
        assert!(ChangeEvent::from_envelope(&env).is_none());
    }
}
