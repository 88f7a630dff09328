//! Cache subsystem.
//!
//! # Data Flow
//! ```text
//! settings.cache.backend
//!     → select()
//!         distributed → pool.rs (bounded, PING on borrow) → distributed.rs
//!         embedded    → embedded.rs (value log) + compaction job on the scheduler
//!         none        → Disabled handle
//!     → CacheHandle shared by sessions, rate limiter and application code
//! ```
//!
//! # Design Decisions
//! - One enum resolved at bootstrap, no trait objects on the request path
//! - Embedded I/O runs on the blocking pool
//! - A distributed pool is created for distributed sessions even when the
//!   cache backend is something else

pub mod distributed;
pub mod embedded;
pub mod pool;
pub mod resp;

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::schema::{CacheBackend, CacheConfig};
use crate::scheduler::{Cadence, JobError, JobId, Scheduler};

pub use distributed::RedisCache;
pub use embedded::{EmbeddedStore, GcOutcome};
pub use pool::{PooledConnection, RedisPool};

/// Name of the embedded store compaction job.
pub const COMPACTION_JOB: &str = "embedded-value-log-gc";

/// Error type for cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("connection pool exhausted")]
    PoolExhausted,
    #[error("connection pool closed")]
    PoolClosed,
    #[error("connecting to {address} timed out")]
    Timeout { address: String },
    #[error("cache I/O failed")]
    Io(#[from] io::Error),
    #[error("cache server error: {0}")]
    Server(String),
    #[error("cache protocol error: {0}")]
    Protocol(String),
    #[error("embedded store corrupt: {0}")]
    Corrupt(String),
    #[error("record encoding failed")]
    Encode(#[from] bincode::Error),
    #[error("embedded store closed")]
    StoreClosed,
    #[error("blocking cache task failed")]
    Join(#[from] tokio::task::JoinError),
}

/// Whole seconds for a TTL, rounded up and never below one.
pub fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs()
        .saturating_add(u64::from(ttl.subsec_nanos() > 0))
        .max(1)
}

/// Handle to the selected cache backend. Clones share the backend.
#[derive(Debug, Clone)]
pub enum CacheHandle {
    Distributed(RedisCache),
    Embedded(Arc<EmbeddedStore>),
    Disabled,
}

impl CacheHandle {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, CacheHandle::Disabled)
    }

    pub fn kind(&self) -> CacheBackend {
        match self {
            CacheHandle::Distributed(_) => CacheBackend::Distributed,
            CacheHandle::Embedded(_) => CacheBackend::Embedded,
            CacheHandle::Disabled => CacheBackend::None,
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        match self {
            CacheHandle::Distributed(cache) => cache.get(key).await,
            CacheHandle::Embedded(store) => {
                let store = store.clone();
                let key = key.to_string();
                tokio::task::spawn_blocking(move || store.get(&key)).await?
            }
            CacheHandle::Disabled => Ok(None),
        }
    }

    pub async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), CacheError> {
        match self {
            CacheHandle::Distributed(cache) => cache.set(key, value, ttl).await,
            CacheHandle::Embedded(store) => {
                let store = store.clone();
                let key = key.to_string();
                let value = value.to_vec();
                tokio::task::spawn_blocking(move || store.set(&key, &value, ttl)).await?
            }
            CacheHandle::Disabled => Ok(()),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        match self {
            CacheHandle::Distributed(cache) => cache.delete(key).await,
            CacheHandle::Embedded(store) => {
                let store = store.clone();
                let key = key.to_string();
                tokio::task::spawn_blocking(move || store.delete(&key)).await?
            }
            CacheHandle::Disabled => Ok(()),
        }
    }

    pub async fn has(&self, key: &str) -> Result<bool, CacheError> {
        match self {
            CacheHandle::Distributed(cache) => cache.has(key).await,
            CacheHandle::Embedded(store) => {
                let store = store.clone();
                let key = key.to_string();
                tokio::task::spawn_blocking(move || store.has(&key)).await?
            }
            CacheHandle::Disabled => Ok(false),
        }
    }

    /// Release the backend. A second call reports the backend as closed.
    pub async fn close(&self) -> Result<(), CacheError> {
        match self {
            CacheHandle::Distributed(cache) => cache.pool().close(),
            CacheHandle::Embedded(store) => {
                let store = store.clone();
                tokio::task::spawn_blocking(move || store.close()).await?
            }
            CacheHandle::Disabled => Ok(()),
        }
    }
}

/// Outcome of backend selection.
#[derive(Debug)]
pub struct CacheSelection {
    pub handle: CacheHandle,
    /// Distributed pool, also present when only sessions need it.
    pub pool: Option<RedisPool>,
    /// Compaction job registered for the embedded store.
    pub compaction_job: Option<JobId>,
}

/// Resolve the cache backend.
///
/// `need_pool` requests a distributed pool regardless of the backend. Any
/// created pool is checked once so an unreachable server fails here.
pub async fn select(
    config: &CacheConfig,
    root: &Path,
    need_pool: bool,
    scheduler: &Scheduler,
) -> Result<CacheSelection, CacheError> {
    let pool = if need_pool || config.backend == CacheBackend::Distributed {
        let pool = RedisPool::new(config.redis.clone());
        drop(pool.get().await?);
        tracing::info!(address = %pool.address(), "Cache pool ready");
        Some(pool)
    } else {
        None
    };

    let mut compaction_job = None;
    let handle = match config.backend {
        CacheBackend::Distributed => match &pool {
            Some(pool) => CacheHandle::Distributed(RedisCache::new(
                pool.clone(),
                config.redis.prefix.clone(),
            )),
            None => CacheHandle::Disabled,
        },
        CacheBackend::Embedded => {
            let dir = root.join(&config.embedded.path);
            let store = Arc::new(
                tokio::task::spawn_blocking(move || EmbeddedStore::open(dir)).await??,
            );
            let cadence: Cadence = config
                .embedded
                .compaction_schedule
                .parse()
                .unwrap_or(Cadence::DAILY);
            let ratio = config.embedded.discard_ratio;
            let job_store = store.clone();
            compaction_job = Some(scheduler.add_job(COMPACTION_JOB, cadence, move || {
                let store = job_store.clone();
                async move { compact(store, ratio).await }
            }));
            CacheHandle::Embedded(store)
        }
        CacheBackend::None => CacheHandle::Disabled,
    };

    tracing::info!(backend = ?handle.kind(), "Cache selected");
    Ok(CacheSelection {
        handle,
        pool,
        compaction_job,
    })
}

async fn compact(store: Arc<EmbeddedStore>, ratio: f64) -> Result<(), JobError> {
    let outcome = tokio::task::spawn_blocking(move || store.run_value_log_gc(ratio))
        .await
        .map_err(JobError::new)?
        .map_err(JobError::new)?;
    match outcome {
        GcOutcome::Skipped { ratio } => {
            tracing::info!(garbage_ratio = ratio, "Value log compaction not needed");
        }
        GcOutcome::Rewritten { reclaimed_bytes } => {
            tracing::info!(reclaimed_bytes, "Value log compacted");
        }
    }
    Ok(())
}
