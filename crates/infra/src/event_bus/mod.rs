//! Infrastructure event bus implementations.
//!
//! The bus abstraction lives in `orgledger-events` as pure mechanics.
//! This module adds the Redis Streams transport plus the partitioning
//! scheme that keeps every unit's events on a single, ordered stream.

use orgledger_core::UnitCode;

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsConfig, RedisStreamsError, RedisStreamsEventBus};

/// Picks the partition for a unit so all of its events stay ordered.
///
/// FNV-1a rather than the std hasher: the assignment must be stable
/// across processes and releases, or a restart could split one unit's
/// events over two streams.
pub fn partition_for(code: &UnitCode, partitions: u32) -> u32 {
    (fnv1a(code.as_str().as_bytes()) % u64::from(partitions.max(1))) as u32
}

/// Stream key for one partition of the outbound event stream.
pub fn partition_stream(base: &str, partition: u32) -> String {
    format!("{base}.{partition}")
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_code_always_lands_on_same_partition() {
        let code = UnitCode::parse("1000001").unwrap();
        let first = partition_for(&code, 8);
        for _ in 0..10 {
            assert_eq!(partition_for(&code, 8), first);
        }
    }

    #[test]
    fn partitions_stay_in_range() {
        for n in 1_000_000u32..1_000_200 {
            let code = UnitCode::from_number(n).unwrap();
            assert!(partition_for(&code, 8) < 8);
        }
    }

    #[test]
    fn codes_spread_over_more_than_one_partition() {
        let mut seen = std::collections::HashSet::new();
        for n in 1_000_000u32..1_000_100 {
            let code = UnitCode::from_number(n).unwrap();
            seen.insert(partition_for(&code, 8));
        }
        assert!(seen.len() > 1, "hash collapsed onto a single partition");
    }

    #[test]
    fn zero_partition_count_is_clamped() {
        let code = UnitCode::parse("9999999").unwrap();
        assert_eq!(partition_for(&code, 0), 0);
    }

    #[test]
    fn stream_key_joins_base_and_partition() {
        assert_eq!(partition_stream("orgledger.events", 3), "orgledger.events.3");
    }
}
