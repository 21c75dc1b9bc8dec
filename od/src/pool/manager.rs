//! Pool manager - named pools sharing one allocator

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::allocate::Allocator;

use super::config::PoolConfig;
use super::core::{PoolStats, WorkerPool};

/// Owns every pool in the process, keyed by name
pub struct PoolManager {
    allocator: Arc<Allocator>,
    pools: Mutex<HashMap<String, Arc<WorkerPool>>>,
}

impl PoolManager {
    pub fn new(allocator: Arc<Allocator>) -> Self {
        Self {
            allocator,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Create a pool. Returns the existing pool when the name is taken.
    pub async fn create_pool(&self, name: &str, config: PoolConfig) -> Arc<WorkerPool> {
        let mut pools = self.pools.lock().await;
        if let Some(existing) = pools.get(name) {
            warn!(pool = name, "Pool already exists");
            return existing.clone();
        }
        let pool = Arc::new(WorkerPool::new(name, config, self.allocator.clone()));
        pools.insert(name.to_string(), pool.clone());
        pool
    }

    /// Look up a pool by name
    pub async fn get(&self, name: &str) -> Option<Arc<WorkerPool>> {
        self.pools.lock().await.get(name).cloned()
    }

    /// Shut a pool down and drop it
    pub async fn remove_pool(&self, name: &str) -> bool {
        let pool = self.pools.lock().await.remove(name);
        match pool {
            Some(pool) => {
                pool.shutdown().await;
                info!(pool = name, "Removed pool");
                true
            }
            None => false,
        }
    }

    /// Stats for every pool
    pub async fn status_all(&self) -> HashMap<String, PoolStats> {
        let pools: Vec<(String, Arc<WorkerPool>)> = {
            let pools = self.pools.lock().await;
            pools.iter().map(|(n, p)| (n.clone(), p.clone())).collect()
        };
        let mut status = HashMap::new();
        for (name, pool) in pools {
            status.insert(name, pool.stats().await);
        }
        status
    }

    /// Shut every pool down
    pub async fn shutdown(&self) {
        let pools: Vec<Arc<WorkerPool>> = self.pools.lock().await.values().cloned().collect();
        for pool in pools {
            pool.shutdown().await;
        }
        info!("All pools shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::WorkerRegistry;

    fn manager() -> PoolManager {
        PoolManager::new(Arc::new(Allocator::new(Arc::new(WorkerRegistry::new()))))
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let manager = manager();
        manager.create_pool("main", PoolConfig::default()).await;

        assert!(manager.get("main").await.is_some());
        assert!(manager.get("other").await.is_none());
    }

    #[tokio::test]
    async fn test_create_duplicate_returns_existing() {
        let manager = manager();
        let first = manager.create_pool("main", PoolConfig::default()).await;
        let second = manager.create_pool("main", PoolConfig::default()).await;
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_remove_pool() {
        let manager = manager();
        manager.create_pool("main", PoolConfig::default()).await;

        assert!(manager.remove_pool("main").await);
        assert!(!manager.remove_pool("main").await);
        assert!(manager.get("main").await.is_none());
    }

    #[tokio::test]
    async fn test_status_all() {
        let manager = manager();
        manager.create_pool("a", PoolConfig::default()).await;
        manager.create_pool("b", PoolConfig::default()).await;

        let status = manager.status_all().await;
        assert_eq!(status.len(), 2);
        assert_eq!(status["a"].total, 0);
    }
}
