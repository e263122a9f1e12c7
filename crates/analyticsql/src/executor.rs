//! Query execution boundary.
//!
//! `QueryExecutor` is the seam between the pipeline and a concrete database
//! driver. Implementations run a validated statement under a statement
//! timeout and a row cap, returning normalized rows; database failures come
//! back as `Execution`/`Timeout`/`Connection` errors for the repair loop to
//! classify, never as a panic.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::scanner::strip_comments_and_strings;

/// A normalized, transport-safe query result.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// Result column names, in select-list order
    pub columns: Vec<String>,
    /// One JSON object per row, keyed by column name
    pub rows: Vec<serde_json::Value>,
    /// Number of rows returned (after the row cap)
    pub row_count: usize,
    /// Number of rows the statement produced before the row cap
    pub total_rows: usize,
    /// Database-side execution time in seconds
    pub execution_time: f64,
}

/// Executes validated SQL for one tenant.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run `sql` with at most `row_limit` rows returned.
    async fn execute(&self, sql: &str, row_limit: usize) -> Result<ExecutionResult>;
}

/// Append `LIMIT n` unless the statement already carries one.
///
/// The check is a word-boundary scan over comment- and string-stripped text,
/// so `LIMIT` inside a literal or an identifier like `rate_limit` does not
/// suppress the cap. Trailing semicolons and comments are dropped first so
/// the appended clause cannot land inside a `--` line comment.
pub fn append_row_limit(sql: &str, row_limit: usize) -> String {
    let trimmed = trim_statement_tail(sql);
    if contains_limit_keyword(trimmed) {
        return trimmed.to_string();
    }
    format!("{} LIMIT {}", trimmed, row_limit)
}

/// Strip trailing whitespace, semicolons, and comments. Stripping a semicolon
/// can expose another trailing comment, so iterate until stable. Byte offsets
/// in the stripped text line up with the original because
/// `strip_comments_and_strings` blanks in place.
fn trim_statement_tail(sql: &str) -> &str {
    let mut s = sql.trim();
    loop {
        let cleaned = strip_comments_and_strings(s);
        let end = cleaned.trim_end().len();
        let next = s[..end].trim_end_matches(';').trim_end();
        if next.len() == s.len() {
            return next;
        }
        s = next;
    }
}

fn contains_limit_keyword(sql: &str) -> bool {
    let cleaned = strip_comments_and_strings(sql);
    let bytes = cleaned.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_alphabetic() || b == b'_' {
            let mut end = i + 1;
            while end < bytes.len()
                && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_')
            {
                end += 1;
            }
            if cleaned[i..end].eq_ignore_ascii_case("limit") {
                return true;
            }
            i = end;
            continue;
        }
        i += 1;
    }
    false
}

#[cfg(any(test, feature = "test-doubles"))]
pub use fake::FakeExecutor;

#[cfg(any(test, feature = "test-doubles"))]
mod fake {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{ExecutionResult, QueryExecutor};
    use crate::error::Result;

    /// Scripted executor for tests. Returns outcomes in order, repeating the
    /// last once exhausted; records call count and the most recent statement.
    #[derive(Debug)]
    pub struct FakeExecutor {
        outcomes: Vec<Result<ExecutionResult>>,
        index: AtomicUsize,
        last_sql: Mutex<Option<String>>,
    }

    impl FakeExecutor {
        pub fn new(outcomes: Vec<Result<ExecutionResult>>) -> Self {
            Self {
                outcomes,
                index: AtomicUsize::new(0),
                last_sql: Mutex::new(None),
            }
        }

        /// An executor that always succeeds with the given result.
        pub fn always(result: ExecutionResult) -> Self {
            Self::new(vec![Ok(result)])
        }

        /// Number of `execute` calls made so far.
        pub fn calls(&self) -> usize {
            self.index.load(Ordering::SeqCst)
        }

        /// The most recently executed statement.
        pub fn last_sql(&self) -> Option<String> {
            self.last_sql.lock().ok().and_then(|g| g.clone())
        }
    }

    #[async_trait]
    impl QueryExecutor for FakeExecutor {
        async fn execute(&self, sql: &str, _row_limit: usize) -> Result<ExecutionResult> {
            if let Ok(mut guard) = self.last_sql.lock() {
                *guard = Some(sql.to_string());
            }
            let i = self.index.fetch_add(1, Ordering::SeqCst);
            if self.outcomes.is_empty() {
                return Err(crate::error::PipelineError::Execution(
                    "fake executor has no scripted outcomes".to_string(),
                ));
            }
            let i = i.min(self.outcomes.len() - 1);
            self.outcomes[i].clone()
        }
    }
}
