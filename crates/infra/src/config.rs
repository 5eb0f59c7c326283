//! Environment-driven settings for the propagation pipeline.

use std::env;

use orgledger_capture::envelope::ORGANIZATION_UNITS_TOPIC;

pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
pub const DEFAULT_STREAM_BASE: &str = "orgledger.events";
pub const DEFAULT_PARTITIONS: u32 = 8;
pub const DEFAULT_CONSUMER_GROUP: &str = "orgledger-sync";
pub const DEFAULT_CONSUMER_NAME: &str = "sync-worker-1";
pub const DEFAULT_CACHE_PREFIX: &str = "cache:org";
pub const DEFAULT_MAX_DELIVERIES: u32 = 5;

/// Settings shared by the publishing and consuming sides of the pipeline.
///
/// Everything has a workable local default so `from_env` never fails;
/// deployments override through the environment.
#[derive(Debug, Clone)]
pub struct PropagationConfig {
    pub redis_url: String,
    pub database_url: Option<String>,
    /// Base name for the partitioned outbound event streams.
    pub stream_base: String,
    pub partitions: u32,
    /// Stream carrying row-level change envelopes from the capture connector.
    pub capture_stream: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub cache_prefix: String,
    /// Deliveries after which a change is parked on the dead-letter stream.
    pub max_deliveries: u32,
}

impl PropagationConfig {
    pub fn from_env() -> Self {
        Self {
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string()),
            database_url: env::var("DATABASE_URL").ok(),
            stream_base: env::var("ORG_EVENTS_STREAM")
                .unwrap_or_else(|_| DEFAULT_STREAM_BASE.to_string()),
            partitions: parse_u32("ORG_EVENTS_PARTITIONS", DEFAULT_PARTITIONS).max(1),
            capture_stream: env::var("ORG_CAPTURE_STREAM")
                .unwrap_or_else(|_| ORGANIZATION_UNITS_TOPIC.to_string()),
            consumer_group: env::var("ORG_SYNC_GROUP")
                .unwrap_or_else(|_| DEFAULT_CONSUMER_GROUP.to_string()),
            consumer_name: env::var("ORG_SYNC_CONSUMER")
                .unwrap_or_else(|_| DEFAULT_CONSUMER_NAME.to_string()),
            cache_prefix: env::var("ORG_CACHE_PREFIX")
                .unwrap_or_else(|_| DEFAULT_CACHE_PREFIX.to_string()),
            max_deliveries: parse_u32("ORG_SYNC_MAX_DELIVERIES", DEFAULT_MAX_DELIVERIES).max(1),
        }
    }
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            database_url: None,
            stream_base: DEFAULT_STREAM_BASE.to_string(),
            partitions: DEFAULT_PARTITIONS,
            capture_stream: ORGANIZATION_UNITS_TOPIC.to_string(),
            consumer_group: DEFAULT_CONSUMER_GROUP.to_string(),
            consumer_name: DEFAULT_CONSUMER_NAME.to_string(),
            cache_prefix: DEFAULT_CACHE_PREFIX.to_string(),
            max_deliveries: DEFAULT_MAX_DELIVERIES,
        }
    }
}

fn parse_u32(var: &str, default: u32) -> u32 {
    env::var(var)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
