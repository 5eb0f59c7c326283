//! Redis-backed cache store.

use redis::Client;

use super::{CacheStore, CacheStoreError};

pub struct RedisCacheStore {
    client: Client,
}

impl RedisCacheStore {
    pub fn connect(url: &str) -> Result<Self, CacheStoreError> {
        Client::open(url)
            .map(|client| Self { client })
            .map_err(|e| CacheStoreError::Connection(e.to_string()))
    }

    fn conn(&self) -> Result<redis::Connection, CacheStoreError> {
        self.client
            .get_connection()
            .map_err(|e| CacheStoreError::Connection(e.to_string()))
    }
}

impl CacheStore for RedisCacheStore {
    fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheStoreError> {
        let mut conn = self.conn()?;
        redis::cmd("KEYS")
            .arg(pattern)
            .query(&mut conn)
            .map_err(|e| CacheStoreError::Command(format!("KEYS failed: {e}")))
    }

    fn del(&self, keys: &[String]) -> Result<u64, CacheStoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        redis::cmd("DEL")
            .arg(&keys[..])
            .query(&mut conn)
            .map_err(|e| CacheStoreError::Command(format!("DEL failed: {e}")))
    }
}
