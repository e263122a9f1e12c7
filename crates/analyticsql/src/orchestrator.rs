//! Self-repair orchestrator.
//!
//! Drives one question through the pipeline as an explicit state machine:
//!
//! ```text
//! CacheCheck -> Planning -> Generating -> ValidatingSecurity
//!     -> ValidatingAccess -> Executing -> Done
//!                                |
//!                            Repairing -> Generating (while attempts remain)
//!                                |
//!                              Failed
//! ```
//!
//! Validation rejections are treated exactly like execution failures: the
//! rejection reason becomes repair context for the next generation attempt.
//! Generator failures and connection-level failures short-circuit; rewriting
//! the SQL cannot fix them. Every terminal path produces a well-formed
//! [`TextToSqlOutcome`] rather than a bare error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::access::validate_table_access;
use crate::cache::{CacheEntry, QueryCache};
use crate::catalog::parse_catalog;
use crate::error::PipelineError;
use crate::executor::{append_row_limit, QueryExecutor};
use crate::generator::{strip_sql_fences, SqlGenerator, SqlRequest};
use crate::security::validate_sql_security;

/// Tuning knobs for one orchestrator instance.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum SQL generation attempts (the first generation is attempt 1)
    pub max_attempts: u32,
    /// Row cap appended to statements lacking a LIMIT
    pub row_limit: usize,
    /// Whether to consult and populate the result cache
    pub use_cache: bool,
    /// Whether to ask the generator for a reasoning plan first
    pub planning_enabled: bool,
    /// Optional end-to-end wall-clock budget across all attempts
    pub deadline: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            row_limit: 100,
            use_cache: true,
            planning_enabled: false,
            deadline: None,
        }
    }
}

/// The structured result of one orchestration run. Failures populate
/// `error` and leave `success` false; no variant escapes as a bare error.
#[derive(Debug, Clone, Serialize)]
pub struct TextToSqlOutcome {
    pub question: String,
    pub plan: Option<String>,
    pub sql: String,
    pub success: bool,
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Value>,
    /// Rows returned after the row cap
    pub row_count: usize,
    /// Rows the statement produced before the cap
    pub total_rows: usize,
    /// Database-side time of the final attempt, seconds
    pub execution_time: f64,
    /// Wall-clock time of the whole run, seconds
    pub total_time: f64,
    /// Generation attempts consumed (0 on a cache hit)
    pub attempts: u32,
    /// True when the answer came from the result cache
    pub cached: bool,
    pub error: Option<String>,
}

enum State {
    CacheCheck,
    Planning,
    Generating,
    ValidatingSecurity,
    ValidatingAccess,
    Executing,
    Repairing,
}

/// Runs questions through generate → validate → execute → repair.
pub struct Orchestrator {
    generator: Arc<dyn SqlGenerator>,
    cache: Arc<QueryCache>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        generator: Arc<dyn SqlGenerator>,
        cache: Arc<QueryCache>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            generator,
            cache,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run one question to completion. The allow-list is rebuilt from
    /// `catalog` on every call, so catalog updates apply without a restart.
    pub async fn run(
        &self,
        question: &str,
        catalog: &str,
        executor: &dyn QueryExecutor,
    ) -> TextToSqlOutcome {
        let started = Instant::now();
        let allowed = parse_catalog(catalog);

        let mut state = State::CacheCheck;
        let mut attempts: u32 = 0;
        let mut plan: Option<String> = None;
        let mut sql = String::new();
        let mut last_error: Option<String> = None;

        loop {
            match state {
                State::CacheCheck => {
                    if self.config.use_cache {
                        if let Some(entry) = self.cache.get(question) {
                            info!(question, "answering from cache");
                            return self.cached_outcome(question, entry, started);
                        }
                    }
                    state = if self.config.planning_enabled {
                        State::Planning
                    } else {
                        State::Generating
                    };
                }

                State::Planning => {
                    match self.generator.plan(question, catalog).await {
                        Ok(p) => {
                            plan = p;
                            state = State::Generating;
                        }
                        Err(err) => {
                            warn!(error = %err, "planning failed");
                            return self.failed_outcome(
                                question, plan, sql, attempts, &err, started,
                            );
                        }
                    }
                }

                State::Generating => {
                    if self.deadline_exceeded(started) {
                        let err = PipelineError::Timeout(
                            "request deadline exceeded before generation".to_string(),
                        );
                        return self.failed_outcome(question, plan, sql, attempts, &err, started);
                    }
                    attempts += 1;
                    let request = SqlRequest {
                        question,
                        catalog,
                        plan: plan.as_deref(),
                        failed_sql: if last_error.is_some() {
                            Some(sql.as_str())
                        } else {
                            None
                        },
                        error: last_error.as_deref(),
                    };
                    debug!(attempt = attempts, repair = request.is_repair(), "generating SQL");
                    match self.generator.generate(&request).await {
                        Ok(raw) => {
                            sql = strip_sql_fences(&raw);
                            state = State::ValidatingSecurity;
                        }
                        Err(err) => {
                            // Generator failures are not repairable by
                            // rewriting SQL.
                            warn!(error = %err, attempt = attempts, "generation failed");
                            return self.failed_outcome(
                                question, plan, sql, attempts, &err, started,
                            );
                        }
                    }
                }

                State::ValidatingSecurity => match validate_sql_security(&sql) {
                    Ok(()) => state = State::ValidatingAccess,
                    Err(err) => {
                        warn!(error = %err, attempt = attempts, "security validation rejected SQL");
                        last_error = Some(err.to_string());
                        state = State::Repairing;
                    }
                },

                State::ValidatingAccess => match validate_table_access(&sql, &allowed) {
                    Ok(()) => state = State::Executing,
                    Err(err) => {
                        warn!(error = %err, attempt = attempts, "access validation rejected SQL");
                        last_error = Some(err.to_string());
                        state = State::Repairing;
                    }
                },

                State::Executing => {
                    if self.deadline_exceeded(started) {
                        let err = PipelineError::Timeout(
                            "request deadline exceeded before execution".to_string(),
                        );
                        return self.failed_outcome(question, plan, sql, attempts, &err, started);
                    }
                    let limited = append_row_limit(&sql, self.config.row_limit);
                    match executor.execute(&limited, self.config.row_limit).await {
                        Ok(result) => {
                            info!(
                                attempt = attempts,
                                rows = result.row_count,
                                "query succeeded"
                            );
                            if self.config.use_cache {
                                self.cache.insert(
                                    question,
                                    CacheEntry {
                                        sql: limited.clone(),
                                        columns: result.columns.clone(),
                                        rows: result.rows.clone(),
                                        row_count: result.row_count,
                                        total_rows: result.total_rows,
                                        created_at: chrono::Utc::now(),
                                    },
                                );
                            }
                            return TextToSqlOutcome {
                                question: question.to_string(),
                                plan,
                                sql: limited,
                                success: true,
                                row_count: result.row_count,
                                total_rows: result.total_rows,
                                columns: result.columns,
                                rows: result.rows,
                                execution_time: result.execution_time,
                                total_time: started.elapsed().as_secs_f64(),
                                attempts,
                                cached: false,
                                error: None,
                            };
                        }
                        Err(err) if err.is_repairable() => {
                            warn!(error = %err, attempt = attempts, "execution failed");
                            last_error = Some(err.to_string());
                            state = State::Repairing;
                        }
                        Err(err) => {
                            // Connection-level failures short-circuit.
                            warn!(error = %err, "execution failed without repair path");
                            return self.failed_outcome(
                                question, plan, sql, attempts, &err, started,
                            );
                        }
                    }
                }

                State::Repairing => {
                    if attempts >= self.config.max_attempts {
                        let err = PipelineError::RetryExhausted {
                            attempts,
                            last_sql: sql.clone(),
                            last_error: last_error.clone().unwrap_or_default(),
                        };
                        warn!(attempts, "repair attempts exhausted");
                        return self.failed_outcome(question, plan, sql, attempts, &err, started);
                    }
                    debug!(attempt = attempts, "repairing");
                    state = State::Generating;
                }
            }
        }
    }

    fn deadline_exceeded(&self, started: Instant) -> bool {
        self.config
            .deadline
            .is_some_and(|budget| started.elapsed() >= budget)
    }

    fn cached_outcome(
        &self,
        question: &str,
        entry: CacheEntry,
        started: Instant,
    ) -> TextToSqlOutcome {
        TextToSqlOutcome {
            question: question.to_string(),
            plan: None,
            sql: entry.sql,
            success: true,
            row_count: entry.row_count,
            total_rows: entry.total_rows,
            columns: entry.columns,
            rows: entry.rows,
            execution_time: 0.0,
            total_time: started.elapsed().as_secs_f64(),
            attempts: 0,
            cached: true,
            error: None,
        }
    }

    fn failed_outcome(
        &self,
        question: &str,
        plan: Option<String>,
        sql: String,
        attempts: u32,
        err: &PipelineError,
        started: Instant,
    ) -> TextToSqlOutcome {
        TextToSqlOutcome {
            question: question.to_string(),
            plan,
            sql,
            success: false,
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            total_rows: 0,
            execution_time: 0.0,
            total_time: started.elapsed().as_secs_f64(),
            attempts,
            cached: false,
            error: Some(err.to_string()),
        }
    }
}
