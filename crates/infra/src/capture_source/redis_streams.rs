//! Redis Streams capture source.
//!
//! The capture connector appends one entry per row change, with the
//! change envelope JSON in the `payload` field. A consumer group gives
//! each worker its own pending list: entries are claimed back after a
//! short idle window and parked on a dead-letter stream once they have
//! been delivered too often.

use std::collections::HashMap;
use std::time::Duration;

use redis::Client;
use tracing::warn;

use super::{CaptureSource, RawChange, SourceError};
use crate::config::PropagationConfig;

pub const DEFAULT_CLAIM_IDLE_MS: u64 = 1_000;

pub struct RedisCaptureSource {
    client: Client,
    stream_key: String,
    dlq_key: String,
    group: String,
    consumer: String,
    max_deliveries: u32,
    claim_idle: Duration,
}

impl RedisCaptureSource {
    /// Opens the client and ensures the consumer group exists.
    pub fn connect(config: &PropagationConfig) -> Result<Self, SourceError> {
        let client = Client::open(config.redis_url.as_str())
            .map_err(|e| SourceError::Connection(e.to_string()))?;
        let source = Self {
            client,
            stream_key: config.capture_stream.clone(),
            dlq_key: format!("{}.dlq", config.capture_stream),
            group: config.consumer_group.clone(),
            consumer: config.consumer_name.clone(),
            max_deliveries: config.max_deliveries.max(1),
            claim_idle: Duration::from_millis(DEFAULT_CLAIM_IDLE_MS),
        };
        source.ensure_group()?;
        Ok(source)
    }

    /// Idempotent group creation; an already-exists reply is ignored.
    fn ensure_group(&self) -> Result<(), SourceError> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| SourceError::Connection(e.to_string()))?;
        let _: Result<String, _> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query(&mut conn);
        Ok(())
    }

    fn read_pending(
        &self,
        conn: &mut redis::Connection,
        count: usize,
    ) -> Result<Vec<RawChange>, SourceError> {
        // (id, consumer, idle_ms, deliveries) per pending entry.
        let pending: Vec<(String, String, u64, u64)> = match redis::cmd("XPENDING")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg("-")
            .arg("+")
            .arg(count.to_string())
            .arg(&self.consumer)
            .query(conn)
        {
            Ok(entries) => entries,
            Err(_) => return Ok(Vec::new()),
        };
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let mut parked = Vec::new();
        let mut retry_ids = Vec::new();
        let mut deliveries_by_id = HashMap::new();
        for (id, _consumer, _idle, deliveries) in pending {
            if deliveries >= u64::from(self.max_deliveries) {
                parked.push(id);
            } else {
                deliveries_by_id.insert(id.clone(), deliveries);
                retry_ids.push(id);
            }
        }
        if !parked.is_empty() {
            self.park(conn, &parked)?;
        }
        if retry_ids.is_empty() {
            return Ok(Vec::new());
        }

        // Claiming bumps the delivery counter; the idle floor keeps a
        // failed entry from spinning through every tick.
        let claimed: Vec<redis::Value> = match redis::cmd("XCLAIM")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg(&self.consumer)
            .arg(self.claim_idle.as_millis().to_string())
            .arg(&retry_ids[..])
            .query(conn)
        {
            Ok(entries) => entries,
            Err(_) => return Ok(Vec::new()),
        };

        let mut changes = Vec::new();
        for entry in &claimed {
            if let Some((id, body)) = parse_entry(entry) {
                let delivery_count = deliveries_by_id
                    .get(&id)
                    .map(|d| *d as u32 + 1)
                    .unwrap_or(1);
                changes.push(RawChange {
                    id,
                    body,
                    delivery_count,
                });
            }
        }
        Ok(changes)
    }

    /// Moves exhausted entries onto the dead-letter stream and settles
    /// them on the source stream.
    fn park(&self, conn: &mut redis::Connection, ids: &[String]) -> Result<(), SourceError> {
        let claimed: Vec<redis::Value> = match redis::cmd("XCLAIM")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("0")
            .arg(&ids[..])
            .query(conn)
        {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };
        for entry in &claimed {
            let Some((id, body)) = parse_entry(entry) else {
                continue;
            };
            let _: String = redis::cmd("XADD")
                .arg(&self.dlq_key)
                .arg("*")
                .arg("original_message_id")
                .arg(&id)
                .arg("delivery_count")
                .arg(self.max_deliveries.to_string())
                .arg("failed_at")
                .arg(chrono::Utc::now().to_rfc3339())
                .arg("payload")
                .arg(&body)
                .query(conn)
                .map_err(|e| SourceError::Command(format!("DLQ XADD failed: {e}")))?;
            let _: u64 = redis::cmd("XACK")
                .arg(&self.stream_key)
                .arg(&self.group)
                .arg(&id)
                .query(conn)
                .map_err(|e| SourceError::Command(format!("XACK failed: {e}")))?;
            warn!(
                message_id = %id,
                deliveries = self.max_deliveries,
                "change parked on dead-letter stream"
            );
        }
        Ok(())
    }

    fn read_new(
        &self,
        conn: &mut redis::Connection,
        count: usize,
        wait: Duration,
    ) -> Result<Vec<RawChange>, SourceError> {
        // BLOCK timeout answers with nil, not an error.
        let reply: Option<HashMap<String, Vec<redis::Value>>> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(count.to_string())
            .arg("BLOCK")
            .arg(wait.as_millis().to_string())
            .arg("STREAMS")
            .arg(&self.stream_key)
            .arg(">")
            .query(conn)
            .map_err(|e| SourceError::Command(format!("XREADGROUP failed: {e}")))?;

        let entries = reply
            .and_then(|mut streams| streams.remove(&self.stream_key))
            .unwrap_or_default();

        let mut changes = Vec::new();
        for entry in &entries {
            if let Some((id, body)) = parse_entry(entry) {
                changes.push(RawChange {
                    id,
                    body,
                    delivery_count: 1,
                });
            }
        }
        Ok(changes)
    }
}

impl CaptureSource for RedisCaptureSource {
    fn poll(&self, count: usize, wait: Duration) -> Result<Vec<RawChange>, SourceError> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| SourceError::Connection(e.to_string()))?;
        let pending = self.read_pending(&mut conn, count)?;
        if !pending.is_empty() {
            return Ok(pending);
        }
        self.read_new(&mut conn, count, wait)
    }

    fn ack(&self, ids: &[String]) -> Result<(), SourceError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| SourceError::Connection(e.to_string()))?;
        let _: u64 = redis::cmd("XACK")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg(&ids[..])
            .query(&mut conn)
            .map_err(|e| SourceError::Command(format!("XACK failed: {e}")))?;
        Ok(())
    }
}

/// Entry format: [message_id, [field1, value1, field2, value2, ...]].
/// Returns the id and the `payload` field bytes; a missing payload
/// yields an empty body the consumer will settle as undecodable.
fn parse_entry(entry: &redis::Value) -> Option<(String, Vec<u8>)> {
    let parts = match entry {
        redis::Value::Bulk(parts) => parts,
        _ => return None,
    };
    if parts.len() < 2 {
        return None;
    }
    let id = match &parts[0] {
        redis::Value::Data(data) => String::from_utf8_lossy(data).to_string(),
        _ => return None,
    };
    let fields = match &parts[1] {
        redis::Value::Bulk(fields) => fields,
        _ => return None,
    };
    let mut body = Vec::new();
    for chunk in fields.chunks(2) {
        if chunk.len() == 2 {
            if let (redis::Value::Data(key), redis::Value::Data(value)) = (&chunk[0], &chunk[1]) {
                if key.as_slice() == b"payload" {
                    body = value.clone();
                }
            }
        }
    }
    Some((id, body))
}
