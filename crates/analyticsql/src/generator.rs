//! SQL generation boundary.
//!
//! The pipeline never talks to a language model directly; it goes through
//! `SqlGenerator`, which a deployment implements over whatever provider it
//! uses. The orchestrator passes full repair context (prior failing SQL and
//! the error text) on retry attempts.

use async_trait::async_trait;

use crate::error::Result;

/// Everything a generator gets to work with for one attempt.
#[derive(Debug, Clone)]
pub struct SqlRequest<'a> {
    /// The natural-language question
    pub question: &'a str,
    /// The tenant's catalog document
    pub catalog: &'a str,
    /// Reasoning plan from the planning stage, if one was produced
    pub plan: Option<&'a str>,
    /// On repair attempts, the SQL that failed
    pub failed_sql: Option<&'a str>,
    /// On repair attempts, the error the failing SQL produced
    pub error: Option<&'a str>,
}

impl SqlRequest<'_> {
    /// True when this is a repair attempt rather than a first generation.
    pub fn is_repair(&self) -> bool {
        self.failed_sql.is_some()
    }
}

/// An LLM-backed SQL producer.
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    /// Produce an optional reasoning plan for the question. Implementations
    /// without a planning stage keep the default.
    async fn plan(&self, _question: &str, _catalog: &str) -> Result<Option<String>> {
        Ok(None)
    }

    /// Produce a SQL statement for the request. The returned text may carry
    /// markdown fences; the orchestrator strips them with
    /// [`strip_sql_fences`].
    async fn generate(&self, request: &SqlRequest<'_>) -> Result<String>;
}

/// Strip markdown code fences from model output.
///
/// Handles ```` ```sql ```` / ```` ``` ```` fence lines and a bare leading
/// `sql` language tag. Unfenced input passes through trimmed.
pub fn strip_sql_fences(raw: &str) -> String {
    let mut text = raw.trim();

    if let Some(rest) = text.strip_prefix("```") {
        // Drop the language tag on the fence line, if any.
        text = match rest.split_once('\n') {
            Some((_, body)) => body,
            None => rest,
        };
        if let Some(body) = text.strip_suffix("```") {
            text = body;
        }
        text = text.trim();
    }

    if let Some(rest) = text.strip_prefix("sql\n").or_else(|| {
        text.strip_prefix("SQL\n")
    }) {
        text = rest.trim();
    }

    text.to_string()
}

#[cfg(any(test, feature = "test-doubles"))]
pub use fake::FakeSqlGenerator;

#[cfg(any(test, feature = "test-doubles"))]
mod fake {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{SqlGenerator, SqlRequest};
    use crate::error::{PipelineError, Result};

    /// Scripted generator for tests. Returns responses in order and repeats
    /// the last one once the script is exhausted; records call counts and the
    /// most recent repair context for assertions.
    #[derive(Debug)]
    pub struct FakeSqlGenerator {
        responses: Vec<String>,
        plan_response: Option<String>,
        index: AtomicUsize,
        plan_calls: AtomicUsize,
        last_error: Mutex<Option<String>>,
    }

    impl FakeSqlGenerator {
        pub fn new<I, S>(responses: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                responses: responses.into_iter().map(Into::into).collect(),
                plan_response: None,
                index: AtomicUsize::new(0),
                plan_calls: AtomicUsize::new(0),
                last_error: Mutex::new(None),
            }
        }

        pub fn with_plan(mut self, plan: impl Into<String>) -> Self {
            self.plan_response = Some(plan.into());
            self
        }

        /// Number of `generate` calls made so far.
        pub fn generate_calls(&self) -> usize {
            self.index.load(Ordering::SeqCst)
        }

        /// Number of `plan` calls made so far.
        pub fn plan_calls(&self) -> usize {
            self.plan_calls.load(Ordering::SeqCst)
        }

        /// The error text passed with the most recent repair request.
        pub fn last_repair_error(&self) -> Option<String> {
            self.last_error.lock().ok().and_then(|g| g.clone())
        }
    }

    #[async_trait]
    impl SqlGenerator for FakeSqlGenerator {
        async fn plan(&self, _question: &str, _catalog: &str) -> Result<Option<String>> {
            self.plan_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.plan_response.clone())
        }

        async fn generate(&self, request: &SqlRequest<'_>) -> Result<String> {
            if let Ok(mut guard) = self.last_error.lock() {
                *guard = request.error.map(str::to_string);
            }
            let i = self.index.fetch_add(1, Ordering::SeqCst);
            if self.responses.is_empty() {
                return Err(PipelineError::Generation(
                    "fake generator has no scripted responses".to_string(),
                ));
            }
            let i = i.min(self.responses.len() - 1);
            Ok(self.responses[i].clone())
        }
    }
}
