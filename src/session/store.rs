//! Session storage backends.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde_json::{Map, Value};
use sqlx::Row;

use crate::cache::CacheHandle;
use crate::config::schema::DatabaseKind;
use crate::persistence::Database;
use crate::session::SessionError;

/// Serialized session payload.
pub type SessionData = Map<String, Value>;

const CACHE_PREFIX: &str = "session:";

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS sessions (\
    token VARCHAR(64) PRIMARY KEY, \
    data TEXT NOT NULL, \
    expiry BIGINT NOT NULL)";

/// Where session payloads live.
#[derive(Debug, Clone)]
pub enum SessionStore {
    /// Process memory, keyed by the cookie token.
    Memory(Arc<DashMap<String, (SessionData, Instant)>>),
    /// The selected cache backend.
    Cache(CacheHandle),
    /// The `sessions` table.
    Database(Database),
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl SessionStore {
    pub fn memory() -> Self {
        SessionStore::Memory(Arc::new(DashMap::new()))
    }

    /// Relational store, creating the `sessions` table when missing.
    pub async fn database(db: Database) -> Result<Self, SessionError> {
        sqlx::query(CREATE_TABLE).execute(db.pool()).await?;
        Ok(SessionStore::Database(db))
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionStore::Memory(_) => "cookie",
            SessionStore::Cache(_) => "cache",
            SessionStore::Database(_) => "database",
        }
    }

    pub async fn load(&self, token: &str) -> Result<Option<SessionData>, SessionError> {
        match self {
            SessionStore::Memory(map) => {
                let data = map.get(token).and_then(|entry| {
                    let (data, expires) = entry.value();
                    (*expires > Instant::now()).then(|| data.clone())
                });
                if data.is_none() {
                    map.remove(token);
                }
                Ok(data)
            }
            SessionStore::Cache(cache) => {
                let raw = cache.get(&format!("{CACHE_PREFIX}{token}")).await?;
                raw.map(|raw| serde_json::from_slice(&raw))
                    .transpose()
                    .map_err(SessionError::from)
            }
            SessionStore::Database(db) => {
                let sql = format!(
                    "SELECT data FROM sessions WHERE token = {} AND expiry > {}",
                    db.placeholder(1),
                    db.placeholder(2)
                );
                let row = sqlx::query(&sql)
                    .bind(token.to_string())
                    .bind(unix_now())
                    .fetch_optional(db.pool())
                    .await?;
                match row {
                    Some(row) => {
                        let raw: String = row.try_get(0)?;
                        Ok(Some(serde_json::from_str(&raw)?))
                    }
                    None => Ok(None),
                }
            }
        }
    }

    pub async fn save(&self, token: &str, data: &SessionData, lifetime: Duration) -> Result<(), SessionError> {
        match self {
            SessionStore::Memory(map) => {
                map.insert(token.to_string(), (data.clone(), Instant::now() + lifetime));
                Ok(())
            }
            SessionStore::Cache(cache) => {
                let raw = serde_json::to_vec(data)?;
                cache
                    .set(&format!("{CACHE_PREFIX}{token}"), &raw, Some(lifetime))
                    .await?;
                Ok(())
            }
            SessionStore::Database(db) => {
                let sql = upsert_sql(db);
                let expiry = unix_now() + lifetime.as_secs() as i64;
                sqlx::query(&sql)
                    .bind(token.to_string())
                    .bind(serde_json::to_string(data)?)
                    .bind(expiry)
                    .execute(db.pool())
                    .await?;
                Ok(())
            }
        }
    }

    /// Remove expired sessions; returns how many were dropped. Cache entries
    /// expire on their own TTL.
    pub async fn sweep(&self) -> Result<usize, SessionError> {
        match self {
            SessionStore::Memory(map) => {
                let before = map.len();
                let now = Instant::now();
                map.retain(|_, (_, expires)| *expires > now);
                Ok(before.saturating_sub(map.len()))
            }
            SessionStore::Cache(_) => Ok(0),
            SessionStore::Database(db) => {
                let sql = format!("DELETE FROM sessions WHERE expiry <= {}", db.placeholder(1));
                let result = sqlx::query(&sql).bind(unix_now()).execute(db.pool()).await?;
                Ok(result.rows_affected() as usize)
            }
        }
    }

    pub async fn destroy(&self, token: &str) -> Result<(), SessionError> {
        match self {
            SessionStore::Memory(map) => {
                map.remove(token);
                Ok(())
            }
            SessionStore::Cache(cache) => Ok(cache.delete(&format!("{CACHE_PREFIX}{token}")).await?),
            SessionStore::Database(db) => {
                let sql = format!("DELETE FROM sessions WHERE token = {}", db.placeholder(1));
                sqlx::query(&sql).bind(token.to_string()).execute(db.pool()).await?;
                Ok(())
            }
        }
    }
}

fn upsert_sql(db: &Database) -> String {
    let (p1, p2, p3) = (db.placeholder(1), db.placeholder(2), db.placeholder(3));
    match db.kind() {
        DatabaseKind::Mysql => format!(
            "INSERT INTO sessions (token, data, expiry) VALUES ({p1}, {p2}, {p3}) \
             ON DUPLICATE KEY UPDATE data = VALUES(data), expiry = VALUES(expiry)"
        ),
        DatabaseKind::Postgres | DatabaseKind::Sqlite => format!(
            "INSERT INTO sessions (token, data, expiry) VALUES ({p1}, {p2}, {p3}) \
             ON CONFLICT (token) DO UPDATE SET data = excluded.data, expiry = excluded.expiry"
        ),
    }
}
