//! The published domain event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use orgledger_core::{TenantId, UnitCode};

/// A domain event as it travels over the wire.
///
/// Immutable once constructed. The unit code doubles as the aggregate
/// identity: transports key their partitioning on it so all events for one
/// unit stay ordered, and consumers use `event_id` as the deduplication key
/// under at-least-once delivery.
///
/// Wire JSON uses exactly these field names:
/// `{event_type, event_id, tenant_id, aggregate_id, event_time, payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    event_id: Uuid,
    event_type: String,
    tenant_id: TenantId,
    aggregate_id: UnitCode,
    event_time: DateTime<Utc>,
    payload: JsonValue,
}

impl DomainEvent {
    /// Create a new event with a fresh UUIDv7 id and the current instant.
    pub fn new(
        event_type: impl Into<String>,
        tenant_id: TenantId,
        aggregate_id: UnitCode,
        payload: JsonValue,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            event_type: event_type.into(),
            tenant_id,
            aggregate_id,
            event_time: Utc::now(),
            payload,
        }
    }

    /// Rebuild an event from stored parts (deterministic; used by tests and
    /// by transports that deserialize the wire form).
    pub fn from_parts(
        event_id: Uuid,
        event_type: impl Into<String>,
        tenant_id: TenantId,
        aggregate_id: UnitCode,
        event_time: DateTime<Utc>,
        payload: JsonValue,
    ) -> Self {
        Self {
            event_id,
            event_type: event_type.into(),
            tenant_id,
            aggregate_id,
            event_time,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn aggregate_id(&self) -> &UnitCode {
        &self.aggregate_id
    }

    pub fn event_time(&self) -> DateTime<Utc> {
        self.event_time
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    /// Transport headers, mirroring the wire fields.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("event-type", self.event_type.clone()),
            ("tenant-id", self.tenant_id.to_string()),
            ("event-id", self.event_id.to_string()),
            ("event-time", self.event_time.to_rfc3339()),
            ("aggregate-id", self.aggregate_id.to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DomainEvent {
        DomainEvent::new(
            "organization.created",
            TenantId::new(),
            UnitCode::parse("1000001").expect("valid code"),
            serde_json::json!({"name": "Head Office"}),
        )
    }

    #[test]
    fn wire_json_uses_contract_field_names() {
        let event = sample();
        let json = serde_json::to_value(&event).expect("serializable");
        let obj = json.as_object().expect("object");

        for field in [
            "event_type",
            "event_id",
            "tenant_id",
            "aggregate_id",
            "event_time",
            "payload",
        ] {
            assert!(obj.contains_key(field), "missing wire field {field}");
        }
        assert_eq!(obj.len(), 6);
        assert_eq!(obj["aggregate_id"], "1000001");
    }

    #[test]
    fn headers_mirror_wire_fields() {
        let event = sample();
        let headers = event.headers();
        assert_eq!(headers.len(), 5);
        assert_eq!(headers[0].0, "event-type");
        assert_eq!(headers[0].1, "organization.created");
        assert_eq!(headers[4], ("aggregate-id", "1000001".to_string()));
    }

    #[test]
    fn wire_round_trip_preserves_identity() {
        let event = sample();
        let json = serde_json::to_string(&event).expect("serializable");
        let back: DomainEvent = serde_json::from_str(&json).expect("deserializable");
        assert_eq!(back, event);
    }
}
