//! Tool-style service surface.
//!
//! `AnalyticsService` wires the pipeline to Postgres: tenant resolution
//! through the admin store and router (or a single global pool when tenant
//! auth is disabled), per-request orchestration, and the operational
//! endpoints (`health`, `cache_stats`, `clear_cache`). Every operation
//! returns structured data; pipeline failures surface as typed errors or as
//! a failed outcome object, never as a panic.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

use analyticsql::cache::CacheStats;
use analyticsql::{
    append_row_limit, parse_catalog, validate_sql_security, validate_table_access,
    ExecutionResult, Orchestrator, OrchestratorConfig, PipelineError, QueryCache, QueryExecutor,
    Result, ServiceConfig, SqlGenerator, TextToSqlOutcome,
};

use crate::executor::PgExecutor;
use crate::router::TenantRouter;
use crate::tenant::AdminStore;

/// Default row cap for `text_to_sql` when the caller does not ask for one.
const DEFAULT_TEXT_TO_SQL_ROW_LIMIT: usize = 100;

/// Per-call options for [`AnalyticsService::text_to_sql`].
#[derive(Debug, Clone)]
pub struct TextToSqlOptions {
    /// Tenant identity; falls back to the configured default
    pub tenant_id: Option<String>,
    /// When false, generate and validate but do not run the SQL
    pub execute: bool,
    /// Per-call row cap, clamped to the configured maximum
    pub row_limit: Option<usize>,
    /// Per-call cache opt-out
    pub use_cache: bool,
}

impl Default for TextToSqlOptions {
    fn default() -> Self {
        Self {
            tenant_id: None,
            execute: true,
            row_limit: None,
            use_cache: true,
        }
    }
}

/// Response of [`AnalyticsService::get_schema`].
#[derive(Debug, Clone, Serialize)]
pub struct SchemaInfo {
    pub tenant_id: Option<String>,
    pub catalog: String,
    pub allowed_tables: Vec<String>,
    pub allowed_schemas: Vec<String>,
    pub table_count: usize,
}

/// Response of [`AnalyticsService::health`].
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub admin_database_status: String,
    pub active_tenant_pool_count: usize,
    pub cache_enabled: bool,
    pub cached_query_count: usize,
    pub features: FeatureFlags,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureFlags {
    pub tenant_auth: bool,
    pub query_cache: bool,
    pub max_repair_attempts: u32,
    pub statement_timeout_secs: u64,
}

/// Everything needed to serve one tenant's request.
struct TenantContext {
    tenant_id: Option<String>,
    catalog: String,
    executor: PgExecutor,
}

/// The assembled pipeline service.
pub struct AnalyticsService {
    config: ServiceConfig,
    generator: Arc<dyn SqlGenerator>,
    cache: Arc<QueryCache>,
    admin: Option<Arc<AdminStore>>,
    router: Option<TenantRouter>,
    global_pool: Option<Arc<PgPool>>,
    global_catalog: String,
}

impl AnalyticsService {
    /// Build the service: connect the admin store (or the single global
    /// database when tenant auth is off) and load what that mode needs.
    pub async fn new(config: ServiceConfig, generator: Arc<dyn SqlGenerator>) -> Result<Self> {
        config.validate()?;
        config.log_summary();

        let cache = Arc::new(QueryCache::new());

        if config.require_tenant_auth {
            let url = config.admin_db_connection.as_deref().ok_or_else(|| {
                PipelineError::Config("ADMIN_DB_CONNECTION is required".to_string())
            })?;
            let admin = AdminStore::connect(
                url,
                &config.tenant_connections_table,
                &config.audit_log_table,
            )
            .await?;
            Ok(Self {
                config,
                generator,
                cache,
                admin: Some(Arc::new(admin)),
                router: Some(TenantRouter::new()),
                global_pool: None,
                global_catalog: String::new(),
            })
        } else {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| PipelineError::Config("DATABASE_URL is required".to_string()))?;
            let pool = PgPoolOptions::new()
                .min_connections(1)
                .max_connections(5)
                .acquire_timeout(Duration::from_secs(30))
                .connect(url)
                .await
                .map_err(|e| {
                    PipelineError::Connection(format!("database connection failed: {e}"))
                })?;
            info!("connected to global database (tenant auth disabled)");

            let global_catalog = match tokio::fs::read_to_string(&config.catalog_path).await {
                Ok(content) => {
                    info!(path = %config.catalog_path, bytes = content.len(), "loaded catalog");
                    content
                }
                Err(e) => {
                    warn!(path = %config.catalog_path, error = %e, "catalog not loaded; all queries will be rejected");
                    String::new()
                }
            };

            Ok(Self {
                config,
                generator,
                cache,
                admin: None,
                router: None,
                global_pool: Some(Arc::new(pool)),
                global_catalog,
            })
        }
    }

    /// Answer a natural-language question end to end.
    pub async fn text_to_sql(&self, question: &str, options: TextToSqlOptions) -> TextToSqlOutcome {
        let context = match self.tenant_context(options.tenant_id.as_deref()).await {
            Ok(context) => context,
            Err(err) => return failed_outcome(question, &err),
        };

        let orchestrator = Orchestrator::new(
            Arc::clone(&self.generator),
            Arc::clone(&self.cache),
            self.per_call_config(&options),
        );

        let outcome = if options.execute {
            orchestrator
                .run(question, &context.catalog, &context.executor)
                .await
        } else {
            orchestrator
                .run(question, &context.catalog, &DryRunExecutor)
                .await
        };

        if outcome.success && !outcome.cached && options.execute {
            if let (Some(admin), Some(tenant_id)) = (&self.admin, &context.tenant_id) {
                admin.touch_last_query(tenant_id).await;
                admin
                    .record_audit(
                        tenant_id,
                        "query",
                        serde_json::json!({
                            "question": question,
                            "sql": outcome.sql,
                            "row_count": outcome.row_count,
                            "attempts": outcome.attempts,
                        }),
                    )
                    .await;
            }
        }

        outcome
    }

    /// Direct execution path: no generation, both validators still apply.
    pub async fn execute_query(
        &self,
        sql: &str,
        tenant_id: Option<&str>,
        row_limit: Option<usize>,
    ) -> Result<ExecutionResult> {
        validate_sql_security(sql)?;
        let context = self.tenant_context(tenant_id).await?;
        let allowed = parse_catalog(&context.catalog);
        validate_table_access(sql, &allowed)?;

        let limit = self.clamp_row_limit(row_limit);
        let limited = append_row_limit(sql, limit);
        context.executor.execute(&limited, limit).await
    }

    /// A tenant's catalog document plus the allow-list derived from it.
    pub async fn get_schema(&self, tenant_id: Option<&str>) -> Result<SchemaInfo> {
        let context = self.tenant_context(tenant_id).await?;
        let allowed = parse_catalog(&context.catalog);
        Ok(SchemaInfo {
            tenant_id: context.tenant_id,
            table_count: allowed.tables().len(),
            allowed_tables: allowed.tables().iter().cloned().collect(),
            allowed_schemas: allowed.schemas().iter().cloned().collect(),
            catalog: context.catalog,
        })
    }

    /// Service liveness and feature summary.
    pub async fn health(&self) -> HealthStatus {
        let admin_database_status = match &self.admin {
            Some(admin) => {
                if admin.ping().await {
                    "connected".to_string()
                } else {
                    "error".to_string()
                }
            }
            None => "disabled".to_string(),
        };
        let status = if admin_database_status == "error" {
            "degraded".to_string()
        } else {
            "healthy".to_string()
        };
        HealthStatus {
            status,
            admin_database_status,
            active_tenant_pool_count: self
                .router
                .as_ref()
                .map(TenantRouter::active_pool_count)
                .unwrap_or(0),
            cache_enabled: self.config.query_cache_enabled,
            cached_query_count: self.cache.len(),
            features: FeatureFlags {
                tenant_auth: self.config.require_tenant_auth,
                query_cache: self.config.query_cache_enabled,
                max_repair_attempts: self.config.max_repair_attempts,
                statement_timeout_secs: self.config.query_timeout_secs,
            },
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Evict every cached result, returning how many were dropped.
    pub fn clear_cache(&self) -> usize {
        self.cache.clear()
    }

    /// Close every pool the service owns.
    pub async fn shutdown(&self) {
        if let Some(router) = &self.router {
            router.shutdown().await;
        }
        if let Some(admin) = &self.admin {
            admin.close().await;
        }
        if let Some(pool) = &self.global_pool {
            pool.close().await;
        }
        info!("service shut down");
    }

    async fn tenant_context(&self, explicit: Option<&str>) -> Result<TenantContext> {
        if self.config.require_tenant_auth {
            let tenant_id = resolve_tenant_id(&self.config, explicit)?;
            let admin = self
                .admin
                .as_ref()
                .ok_or_else(|| PipelineError::Config("admin store not initialized".to_string()))?;
            let router = self
                .router
                .as_ref()
                .ok_or_else(|| PipelineError::Config("router not initialized".to_string()))?;

            let record = admin.fetch_active_tenant(&tenant_id).await?;
            let pool = router.resolve(&record).await?;
            Ok(TenantContext {
                tenant_id: Some(tenant_id),
                catalog: record.catalog.unwrap_or_default(),
                executor: PgExecutor::new(pool, self.config.query_timeout_secs),
            })
        } else {
            let pool = self
                .global_pool
                .as_ref()
                .ok_or_else(|| PipelineError::Config("global pool not initialized".to_string()))?;
            Ok(TenantContext {
                tenant_id: None,
                catalog: self.global_catalog.clone(),
                executor: PgExecutor::new(Arc::clone(pool), self.config.query_timeout_secs),
            })
        }
    }

    fn per_call_config(&self, options: &TextToSqlOptions) -> OrchestratorConfig {
        let mut config = self.config.orchestrator_config();
        config.row_limit = options
            .row_limit
            .unwrap_or(DEFAULT_TEXT_TO_SQL_ROW_LIMIT)
            .min(self.config.max_result_rows);
        // Dry runs are never cached; an empty result would shadow a real one.
        config.use_cache =
            self.config.query_cache_enabled && options.use_cache && options.execute;
        config
    }

    fn clamp_row_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.config.max_result_rows)
            .min(self.config.max_result_rows)
    }
}

/// Tenant identity precedence: explicit argument, then the configured
/// default, then rejection. Never inferred.
fn resolve_tenant_id(config: &ServiceConfig, explicit: Option<&str>) -> Result<String> {
    explicit
        .map(str::to_string)
        .or_else(|| config.default_tenant_id.clone())
        .ok_or_else(|| {
            PipelineError::Authentication(
                "no tenant identity supplied and no default configured".to_string(),
            )
        })
}

fn failed_outcome(question: &str, err: &PipelineError) -> TextToSqlOutcome {
    TextToSqlOutcome {
        question: question.to_string(),
        plan: None,
        sql: String::new(),
        success: false,
        columns: Vec::new(),
        rows: Vec::new(),
        row_count: 0,
        total_rows: 0,
        execution_time: 0.0,
        total_time: 0.0,
        attempts: 0,
        cached: false,
        error: Some(err.to_string()),
    }
}

/// Executor used when the caller asks for SQL without execution.
struct DryRunExecutor;

#[async_trait::async_trait]
impl QueryExecutor for DryRunExecutor {
    async fn execute(&self, _sql: &str, _row_limit: usize) -> Result<ExecutionResult> {
        Ok(ExecutionResult {
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            total_rows: 0,
            execution_time: 0.0,
        })
    }
}
