//! Tenant connection routing.
//!
//! `PoolRegistry` is the concurrency core: a keyed get-or-create that
//! guarantees at most one resource per key even under racing first accesses.
//! It is generic so the at-most-once property is testable without a
//! database. `TenantRouter` instantiates it over `PgPool`, building each
//! tenant's pool from its admin-store record on first use.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::Mutex;
use tracing::{error, info};

use analyticsql::{PipelineError, Result};

use crate::tenant::TenantRecord;

/// Per-tenant pool size ceiling. Tenant databases are small; a handful of
/// connections per tenant keeps aggregate connection count bounded.
const TENANT_POOL_MIN: u32 = 1;
const TENANT_POOL_MAX: u32 = 3;
const TENANT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Keyed lazy registry with at-most-once creation per key.
pub struct PoolRegistry<P> {
    pools: DashMap<String, Arc<P>>,
    create_lock: Mutex<()>,
}

impl<P> Default for PoolRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> PoolRegistry<P> {
    pub fn new() -> Self {
        Self {
            pools: DashMap::new(),
            create_lock: Mutex::new(()),
        }
    }

    /// Return the resource for `key`, creating it with `factory` on first
    /// access. Creation is serialized and double-checked, so two concurrent
    /// first accesses observe the same `Arc`. A factory error leaves the
    /// registry unchanged; the next access retries.
    pub async fn get_or_create<F, Fut>(&self, key: &str, factory: F) -> Result<Arc<P>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<P>>,
    {
        if let Some(existing) = self.pools.get(key) {
            return Ok(Arc::clone(&existing));
        }

        let _guard = self.create_lock.lock().await;
        if let Some(existing) = self.pools.get(key) {
            return Ok(Arc::clone(&existing));
        }

        let created = Arc::new(factory().await?);
        self.pools.insert(key.to_string(), Arc::clone(&created));
        Ok(created)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Remove and return every resource, for shutdown.
    pub fn drain(&self) -> Vec<Arc<P>> {
        let keys: Vec<String> = self.pools.iter().map(|e| e.key().clone()).collect();
        keys.iter()
            .filter_map(|k| self.pools.remove(k).map(|(_, v)| v))
            .collect()
    }
}

/// Resolves tenants to cached connection pools.
pub struct TenantRouter {
    registry: PoolRegistry<PgPool>,
}

impl TenantRouter {
    pub fn new() -> Self {
        Self {
            registry: PoolRegistry::new(),
        }
    }

    /// Get or create the pool for a tenant. The pool is cached by tenant
    /// identity; the record is only consulted on first access.
    pub async fn resolve(&self, record: &TenantRecord) -> Result<Arc<PgPool>> {
        let tenant_id = record.tenant_id.clone();
        self.registry
            .get_or_create(&record.tenant_id, || async move {
                info!(tenant = %tenant_id, "creating tenant connection pool");
                PgPoolOptions::new()
                    .min_connections(TENANT_POOL_MIN)
                    .max_connections(TENANT_POOL_MAX)
                    .acquire_timeout(TENANT_ACQUIRE_TIMEOUT)
                    .connect(&record.connection_url())
                    .await
                    .map_err(|e| {
                        error!(tenant = %tenant_id, error = %e, "tenant pool creation failed");
                        PipelineError::Connection(format!(
                            "failed to connect to tenant database: {e}"
                        ))
                    })
            })
            .await
    }

    /// Number of live tenant pools.
    pub fn active_pool_count(&self) -> usize {
        self.registry.len()
    }

    /// Close every pool. Used at process shutdown.
    pub async fn shutdown(&self) {
        let pools = self.registry.drain();
        info!(pools = pools.len(), "closing tenant connection pools");
        for pool in pools {
            pool.close().await;
        }
    }
}

impl Default for TenantRouter {
    fn default() -> Self {
        Self::new()
    }
}
