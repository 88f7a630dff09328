//! Release of pooled resources at shutdown.
//!
//! # Responsibilities
//! - Record resources in acquisition order during bootstrap
//! - Release them newest first, exactly once
//!
//! # Design Decisions
//! - Release errors are logged and do not stop the remaining releases
//! - The registry empties itself on release, a second call does nothing

use std::sync::{Arc, Mutex, PoisonError};

use crate::cache::{CacheHandle, RedisPool};
use crate::persistence::Database;

/// A resource owned by the process until teardown.
#[derive(Debug, Clone)]
pub enum Resource {
    Database(Database),
    /// A distributed pool not owned by the cache handle.
    Pool(RedisPool),
    Cache(CacheHandle),
}

impl Resource {
    pub fn name(&self) -> &'static str {
        match self {
            Resource::Database(_) => "database",
            Resource::Pool(_) => "cache pool",
            Resource::Cache(_) => "cache",
        }
    }

    async fn release(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        match self {
            Resource::Database(db) => db.close().await?,
            Resource::Pool(pool) => pool.close()?,
            Resource::Cache(cache) => cache.close().await?,
        }
        Ok(())
    }
}

/// Ordered registry of acquired resources. Clones share the registry.
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    resources: Arc<Mutex<Vec<Resource>>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, resource: Resource) {
        tracing::debug!(resource = resource.name(), "Resource registered");
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(resource);
    }

    pub fn len(&self) -> usize {
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of registered resources in acquisition order.
    pub fn names(&self) -> Vec<&'static str> {
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(Resource::name)
            .collect()
    }

    /// Release everything, newest first. Returns the names in release order.
    pub async fn release_all(&self) -> Vec<&'static str> {
        let resources = std::mem::take(
            &mut *self.resources.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let mut released = Vec::with_capacity(resources.len());
        for resource in resources.into_iter().rev() {
            let name = resource.name();
            match resource.release().await {
                Ok(()) => tracing::info!(resource = name, "Resource released"),
                Err(err) => tracing::error!(resource = name, error = %err, "Failed to release resource"),
            }
            released.push(name);
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EmbeddedStore;

    #[tokio::test]
    async fn releases_in_reverse_order_once() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ResourceRegistry::new();
        let pool = RedisPool::new(Default::default());
        let store = std::sync::Arc::new(EmbeddedStore::open(dir.path()).unwrap());

        registry.register(Resource::Pool(pool.clone()));
        registry.register(Resource::Cache(CacheHandle::Embedded(store.clone())));

        assert_eq!(registry.release_all().await, vec!["cache", "cache pool"]);
        assert!(pool.is_closed());
        assert!(store.get("k").is_err());
        assert!(registry.release_all().await.is_empty());
    }
}
