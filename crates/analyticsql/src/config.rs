//! Environment-driven service configuration.
//!
//! Every knob is a single environment variable whose effect matches its name.
//! `from_env` reads the process environment; `from_lookup` takes an arbitrary
//! source so tests never mutate process state.

use std::time::Duration;

use tracing::info;

use crate::error::{PipelineError, Result};
use crate::orchestrator::OrchestratorConfig;

/// Runtime configuration for the pipeline service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Admin store connection string (`ADMIN_DB_CONNECTION`). Required when
    /// tenant auth is on.
    pub admin_db_connection: Option<String>,
    /// Single global database (`DATABASE_URL`). Required when tenant auth is
    /// off.
    pub database_url: Option<String>,
    /// Whether tenants must be resolved through the admin store
    /// (`REQUIRE_TENANT_AUTH`, default true). When false the router is
    /// skipped entirely and every query runs against `DATABASE_URL`.
    pub require_tenant_auth: bool,
    /// Fallback tenant identity when none is supplied (`DEFAULT_TENANT_ID`).
    pub default_tenant_id: Option<String>,
    /// Catalog document path used in single-database mode (`CATALOG_PATH`,
    /// default `database_catalog.md`). Ignored when tenant auth is on, since
    /// each tenant's catalog comes from the admin store.
    pub catalog_path: String,
    /// Hard cap on returned rows (`MAX_RESULT_ROWS`, default 1000)
    pub max_result_rows: usize,
    /// Per-statement timeout in seconds (`QUERY_TIMEOUT_SECS`, default 30)
    pub query_timeout_secs: u64,
    /// Repair loop attempt ceiling (`MAX_REPAIR_ATTEMPTS`, default 5)
    pub max_repair_attempts: u32,
    /// Result cache toggle (`QUERY_CACHE_ENABLED`, default true)
    pub query_cache_enabled: bool,
    /// Optional end-to-end deadline (`REQUEST_DEADLINE_SECS`, default unset)
    pub request_deadline_secs: Option<u64>,
    /// Admin-store table holding tenant connection records
    /// (`TENANT_CONNECTIONS_TABLE`, default `db_connection_infos`)
    pub tenant_connections_table: String,
    /// Admin-store audit table (`AUDIT_LOG_TABLE`, default
    /// `onboarding_audit_log`)
    pub audit_log_table: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            admin_db_connection: None,
            database_url: None,
            require_tenant_auth: true,
            default_tenant_id: None,
            catalog_path: "database_catalog.md".to_string(),
            max_result_rows: 1000,
            query_timeout_secs: 30,
            max_repair_attempts: 5,
            query_cache_enabled: true,
            request_deadline_secs: None,
            tenant_connections_table: "db_connection_infos".to_string(),
            audit_log_table: "onboarding_audit_log".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            admin_db_connection: lookup("ADMIN_DB_CONNECTION"),
            database_url: lookup("DATABASE_URL"),
            require_tenant_auth: parse_bool(
                &lookup,
                "REQUIRE_TENANT_AUTH",
                defaults.require_tenant_auth,
            )?,
            default_tenant_id: lookup("DEFAULT_TENANT_ID"),
            catalog_path: lookup("CATALOG_PATH").unwrap_or(defaults.catalog_path),
            max_result_rows: parse_number(&lookup, "MAX_RESULT_ROWS", defaults.max_result_rows)?,
            query_timeout_secs: parse_number(
                &lookup,
                "QUERY_TIMEOUT_SECS",
                defaults.query_timeout_secs,
            )?,
            max_repair_attempts: parse_number(
                &lookup,
                "MAX_REPAIR_ATTEMPTS",
                defaults.max_repair_attempts,
            )?,
            query_cache_enabled: parse_bool(
                &lookup,
                "QUERY_CACHE_ENABLED",
                defaults.query_cache_enabled,
            )?,
            request_deadline_secs: match lookup("REQUEST_DEADLINE_SECS") {
                Some(raw) => Some(parse_raw(&raw, "REQUEST_DEADLINE_SECS")?),
                None => None,
            },
            tenant_connections_table: lookup("TENANT_CONNECTIONS_TABLE")
                .unwrap_or(defaults.tenant_connections_table),
            audit_log_table: lookup("AUDIT_LOG_TABLE").unwrap_or(defaults.audit_log_table),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency and identifier safety.
    pub fn validate(&self) -> Result<()> {
        if self.require_tenant_auth && self.admin_db_connection.is_none() {
            return Err(PipelineError::Config(
                "REQUIRE_TENANT_AUTH is on but ADMIN_DB_CONNECTION is not set".to_string(),
            ));
        }
        if !self.require_tenant_auth && self.database_url.is_none() {
            return Err(PipelineError::Config(
                "REQUIRE_TENANT_AUTH is off but DATABASE_URL is not set".to_string(),
            ));
        }
        if self.max_repair_attempts == 0 {
            return Err(PipelineError::Config(
                "MAX_REPAIR_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.max_result_rows == 0 {
            return Err(PipelineError::Config(
                "MAX_RESULT_ROWS must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("TENANT_CONNECTIONS_TABLE", &self.tenant_connections_table),
            ("AUDIT_LOG_TABLE", &self.audit_log_table),
        ] {
            if !is_safe_identifier(value) {
                return Err(PipelineError::Config(format!(
                    "{} is not a valid table identifier: {:?}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Derive the per-run orchestrator settings.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_attempts: self.max_repair_attempts,
            row_limit: self.max_result_rows,
            use_cache: self.query_cache_enabled,
            planning_enabled: false,
            deadline: self.request_deadline_secs.map(Duration::from_secs),
        }
    }

    /// Log the effective configuration at startup. Connection strings are
    /// reported by presence only.
    pub fn log_summary(&self) {
        info!(
            require_tenant_auth = self.require_tenant_auth,
            admin_db_configured = self.admin_db_connection.is_some(),
            global_db_configured = self.database_url.is_some(),
            default_tenant = self.default_tenant_id.as_deref().unwrap_or("<none>"),
            max_result_rows = self.max_result_rows,
            query_timeout_secs = self.query_timeout_secs,
            max_repair_attempts = self.max_repair_attempts,
            cache_enabled = self.query_cache_enabled,
            request_deadline_secs = ?self.request_deadline_secs,
            "service configuration loaded"
        );
    }
}

/// Table names from configuration get interpolated into SQL; restrict them
/// to plain identifiers.
pub fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_bool<F>(lookup: &F, name: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(PipelineError::Config(format!(
                "{} must be a boolean, got {:?}",
                name, other
            ))),
        },
    }
}

fn parse_number<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => parse_raw(&raw, name),
    }
}

fn parse_raw<T: std::str::FromStr>(raw: &str, name: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| PipelineError::Config(format!("{} must be a number, got {:?}", name, raw)))
}
