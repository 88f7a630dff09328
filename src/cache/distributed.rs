//! Distributed cache backed by a RESP server.

use std::time::Duration;

use crate::cache::pool::RedisPool;
use crate::cache::resp::Reply;
use crate::cache::{ttl_secs, CacheError};

/// Key-value client over a shared [`RedisPool`]. Keys are prefixed.
#[derive(Debug, Clone)]
pub struct RedisCache {
    pool: RedisPool,
    prefix: String,
}

impl RedisCache {
    pub fn new(pool: RedisPool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }

    pub fn pool(&self) -> &RedisPool {
        &self.pool
    }

    fn key(&self, key: &str) -> Vec<u8> {
        let mut full = Vec::with_capacity(self.prefix.len() + key.len());
        full.extend_from_slice(self.prefix.as_bytes());
        full.extend_from_slice(key.as_bytes());
        full
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.pool.get().await?;
        match conn.call(&[b"GET", &self.key(key)]).await? {
            Reply::Bulk(value) => Ok(value),
            other => Err(unexpected("GET", other)),
        }
    }

    pub async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.pool.get().await?;
        let full = self.key(key);
        let reply = match ttl {
            Some(ttl) => {
                let secs = ttl_secs(ttl).to_string();
                conn.call(&[b"SET", &full, value, b"EX", secs.as_bytes()]).await?
            }
            None => conn.call(&[b"SET", &full, value]).await?,
        };
        match reply {
            Reply::Status(_) => Ok(()),
            other => Err(unexpected("SET", other)),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.pool.get().await?;
        match conn.call(&[b"DEL", &self.key(key)]).await? {
            Reply::Integer(_) => Ok(()),
            other => Err(unexpected("DEL", other)),
        }
    }

    pub async fn has(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.pool.get().await?;
        match conn.call(&[b"EXISTS", &self.key(key)]).await? {
            Reply::Integer(n) => Ok(n > 0),
            other => Err(unexpected("EXISTS", other)),
        }
    }

    /// Increment a counter, setting its expiry when it is first created.
    pub async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, CacheError> {
        let mut conn = self.pool.get().await?;
        let full = self.key(key);
        let count = match conn.call(&[b"INCR", &full]).await? {
            Reply::Integer(n) => n,
            other => return Err(unexpected("INCR", other)),
        };
        if count == 1 {
            let secs = ttl_secs(ttl).to_string();
            conn.call(&[b"EXPIRE", &full, secs.as_bytes()]).await?;
        }
        Ok(count)
    }

    /// Verify the backend is reachable.
    pub async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.pool.get().await?;
        match conn.call(&[b"PING"]).await? {
            Reply::Status(status) if status == "PONG" => Ok(()),
            other => Err(unexpected("PING", other)),
        }
    }
}

fn unexpected(command: &str, reply: Reply) -> CacheError {
    CacheError::Protocol(format!("unexpected {command} reply {reply:?}"))
}
