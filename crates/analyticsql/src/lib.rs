//! Query safety and multi-tenant execution pipeline for LLM-generated SQL.
//!
//! Natural-language questions become SQL through an injected
//! [`SqlGenerator`]; before anything touches a database the statement passes
//! a lexical [security check](security) (read-only, no forbidden keywords,
//! single statement) and a [table-access check](access) against the tenant's
//! catalog-derived allow-list. Execution goes through an injected
//! [`QueryExecutor`] under a row cap and statement timeout, and failures are
//! fed back to the generator in a bounded self-repair loop. Successful
//! answers are memoized in a [`QueryCache`].
//!
//! This crate is driver-free: it defines the pipeline and its collaborator
//! traits. The `analyticsql-postgres` crate supplies the Postgres-backed
//! tenant router, executor, and service surface.
//!
//! ```no_run
//! use std::sync::Arc;
//! use analyticsql::{Orchestrator, OrchestratorConfig, QueryCache};
//! # use analyticsql::{QueryExecutor, SqlGenerator};
//!
//! # async fn run(generator: Arc<dyn SqlGenerator>, executor: impl QueryExecutor) {
//! let cache = Arc::new(QueryCache::new());
//! let orchestrator = Orchestrator::new(generator, cache, OrchestratorConfig::default());
//! let outcome = orchestrator
//!     .run("top 5 users by order count", "## Table: `users`", &executor)
//!     .await;
//! assert!(outcome.success || outcome.error.is_some());
//! # }
//! ```

pub mod access;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod executor;
pub mod generator;
pub mod orchestrator;
pub mod scanner;
pub mod security;

pub use access::{validate_table_access, AllowedAccessSet};
pub use cache::{CacheEntry, CacheStats, QueryCache};
pub use catalog::parse_catalog;
pub use config::ServiceConfig;
pub use error::{PipelineError, Result};
pub use executor::{append_row_limit, ExecutionResult, QueryExecutor};
pub use generator::{strip_sql_fences, SqlGenerator, SqlRequest};
pub use orchestrator::{Orchestrator, OrchestratorConfig, TextToSqlOutcome};
pub use scanner::{extract_table_refs, strip_comments_and_strings, TableRef};
pub use security::validate_sql_security;

#[cfg(any(test, feature = "test-doubles"))]
pub use executor::FakeExecutor;
#[cfg(any(test, feature = "test-doubles"))]
pub use generator::FakeSqlGenerator;
