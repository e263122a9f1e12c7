//! PostgreSQL backing for the `analyticsql` pipeline.
//!
//! Supplies the concrete halves the core crate leaves abstract: an
//! [`AdminStore`] over the onboarding admin database, a [`TenantRouter`]
//! that lazily creates one bounded pool per tenant, a [`PgExecutor`] that
//! runs validated SQL under a statement timeout with JSON-normalized
//! results, and the [`AnalyticsService`] tool surface
//! (`text_to_sql`, `execute_query`, `get_schema`, `health`, cache ops).
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use analyticsql::ServiceConfig;
//! use analyticsql_postgres::{AnalyticsService, TextToSqlOptions};
//!
//! async fn example(generator: Arc<dyn analyticsql::SqlGenerator>) -> analyticsql::Result<()> {
//!     let config = ServiceConfig::from_env()?;
//!     let service = AnalyticsService::new(config, generator).await?;
//!     let outcome = service
//!         .text_to_sql("top 5 users by order count", TextToSqlOptions::default())
//!         .await;
//!     println!("{}", serde_json::to_string_pretty(&outcome).unwrap_or_default());
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```

mod executor;
mod router;
mod service;
mod tenant;

pub use executor::PgExecutor;
pub use router::{PoolRegistry, TenantRouter};
pub use service::{
    AnalyticsService, FeatureFlags, HealthStatus, SchemaInfo, TextToSqlOptions,
};
pub use tenant::{AdminStore, TenantRecord};
