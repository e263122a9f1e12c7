//! Error types for the pipeline.
//!
//! The taxonomy mirrors the stages of the pipeline: authentication and
//! connection failures happen before any SQL is judged and are never
//! repairable by rewriting the statement; security, access, execution, and
//! timeout failures are fed back into the repair loop while attempts remain.

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Pipeline error types
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    /// Tenant unknown, inactive, or no identity could be resolved
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Statement is not read-only, contains a forbidden keyword, or bundles
    /// multiple statements
    #[error("Security violation: {0}")]
    SecurityViolation(String),

    /// Statement references tables or schemas outside the tenant's allow-list,
    /// or no table reference could be extracted at all
    #[error("Access violation: {message}")]
    AccessViolation {
        /// Human-readable rejection reason
        message: String,
        /// The offending references, formatted as `schema.table` or `table`
        unauthorized: Vec<String>,
    },

    /// Pool creation or connection acquisition failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// The database rejected the statement
    #[error("Execution error: {0}")]
    Execution(String),

    /// The statement exceeded its time budget
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The repair loop ran out of attempts
    #[error("Retry exhausted after {attempts} attempts; last error: {last_error}")]
    RetryExhausted {
        /// Number of generation attempts made
        attempts: u32,
        /// The final SQL candidate
        last_sql: String,
        /// The error that terminated the final attempt
        last_error: String,
    },

    /// The SQL generator collaborator failed (not repairable by rewriting SQL)
    #[error("Generation error: {0}")]
    Generation(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Returns true if the repair loop may recover from this error by asking
    /// the generator for a corrected statement.
    pub fn is_repairable(&self) -> bool {
        matches!(
            self,
            PipelineError::SecurityViolation(_)
                | PipelineError::AccessViolation { .. }
                | PipelineError::Execution(_)
                | PipelineError::Timeout(_)
        )
    }

    /// Convenience constructor for an access violation over a list of
    /// unauthorized references.
    pub fn access_violation(unauthorized: Vec<String>) -> Self {
        PipelineError::AccessViolation {
            message: format!(
                "query references unauthorized tables: {}",
                unauthorized.join(", ")
            ),
            unauthorized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repairable_classification() {
        assert!(PipelineError::SecurityViolation("x".into()).is_repairable());
        assert!(PipelineError::access_violation(vec!["secrets".into()]).is_repairable());
        assert!(PipelineError::Execution("syntax error".into()).is_repairable());
        assert!(PipelineError::Timeout("canceled".into()).is_repairable());

        assert!(!PipelineError::Authentication("unknown tenant".into()).is_repairable());
        assert!(!PipelineError::Connection("refused".into()).is_repairable());
        assert!(!PipelineError::Generation("model unavailable".into()).is_repairable());
        assert!(!PipelineError::Config("bad value".into()).is_repairable());
        assert!(!PipelineError::RetryExhausted {
            attempts: 5,
            last_sql: "SELECT 1".into(),
            last_error: "boom".into(),
        }
        .is_repairable());
    }

    #[test]
    fn test_access_violation_message_lists_tables() {
        let err = PipelineError::access_violation(vec!["secrets".into(), "audit.log".into()]);
        let msg = err.to_string();
        assert!(msg.contains("secrets"));
        assert!(msg.contains("audit.log"));
    }

    #[test]
    fn test_retry_exhausted_message() {
        let err = PipelineError::RetryExhausted {
            attempts: 5,
            last_sql: "SELECT * FROM t".into(),
            last_error: "relation \"t\" does not exist".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("5 attempts"));
        assert!(msg.contains("does not exist"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<PipelineError>();
        assert_sync::<PipelineError>();
    }
}
