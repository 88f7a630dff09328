//! Relational persistence.
//!
//! # Responsibilities
//! - Build the connection string for the configured database kind
//! - Open a bounded connection pool sized from settings
//! - Release the pool once at teardown
//!
//! # Design Decisions
//! - One `AnyPool` for every supported kind, drivers installed on first use
//! - The pool connects eagerly so an unreachable database fails bootstrap
//! - In-memory SQLite is pinned to one connection so every query sees the same data

pub mod dsn;

use std::path::Path;
use std::sync::Once;
use std::time::Duration;

use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use thiserror::Error;

use crate::config::schema::{DatabaseConfig, DatabaseKind};

pub use dsn::build_dsn;

/// Error type for persistence.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("invalid connection settings: {0}")]
    Dsn(String),
    #[error("database error")]
    Sqlx(#[from] sqlx::Error),
    #[error("failed to prepare database directory")]
    Io(#[from] std::io::Error),
    #[error("database pool already closed")]
    Closed,
}

static DRIVERS: Once = Once::new();

/// Pooled relational connection. Clones share the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: AnyPool,
    kind: DatabaseKind,
}

impl Database {
    /// Connect using `config`.
    pub async fn connect(config: &DatabaseConfig, root: &Path) -> Result<Self, DatabaseError> {
        DRIVERS.call_once(sqlx::any::install_default_drivers);

        let kind = config
            .kind
            .ok_or_else(|| DatabaseError::Dsn("database kind is not set".into()))?;
        let dsn = build_dsn(config, root)?;
        if kind == DatabaseKind::Sqlite && dsn != dsn::SQLITE_MEMORY {
            if let Some(parent) = root.join(config.name.trim()).parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let max_connections = if dsn == dsn::SQLITE_MEMORY {
            1
        } else {
            config.max_open_conns
        };

        let mut options = AnyPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(config.min_idle_conns.min(max_connections))
            .acquire_timeout(Duration::from_secs(10));
        if config.max_idle_time_secs > 0 {
            options = options.idle_timeout(Duration::from_secs(config.max_idle_time_secs));
        }

        let pool = options.connect(&dsn).await?;
        tracing::info!(
            kind = ?kind,
            max_connections,
            "Database pool opened"
        );
        Ok(Self { pool, kind })
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn kind(&self) -> DatabaseKind {
        self.kind
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Bind placeholder for the `n`th parameter (1-based).
    pub fn placeholder(&self, n: usize) -> String {
        match self.kind {
            DatabaseKind::Postgres => format!("${n}"),
            DatabaseKind::Mysql | DatabaseKind::Sqlite => "?".to_string(),
        }
    }

    /// Round-trip a trivial query.
    pub async fn ping(&self) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) -> Result<(), DatabaseError> {
        if self.pool.is_closed() {
            return Err(DatabaseError::Closed);
        }
        self.pool.close().await;
        tracing::info!(kind = ?self.kind, "Database pool closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sqlite_pool_opens_and_closes_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            kind: Some(DatabaseKind::Sqlite),
            name: "data/app.db".into(),
            ..Default::default()
        };
        let db = Database::connect(&config, dir.path()).await.unwrap();
        db.ping().await.unwrap();
        assert_eq!(db.placeholder(2), "?");
        db.close().await.unwrap();
        assert!(matches!(db.close().await, Err(DatabaseError::Closed)));
    }
}
