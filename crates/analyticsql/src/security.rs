//! Security validation for machine-generated SQL.
//!
//! Three independent checks, all performed on comment- and string-stripped
//! text so literals like `'DROP SHIPMENT'` never trip a rejection:
//!
//! 1. the statement must be read-only (first word `SELECT` or `WITH`),
//! 2. no forbidden write/DDL/control keyword may appear as a whole word,
//! 3. only a single statement is allowed (at most one `;`, and only at the
//!    very end).
//!
//! Rejections carry a message naming the violated rule; the repair loop feeds
//! that message back to the generator.

use crate::error::{PipelineError, Result};
use crate::scanner::strip_comments_and_strings;

/// Keywords that are never acceptable in a read-only analytics statement,
/// matched as whole words.
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "drop", "delete", "update", "insert", "alter", "create", "truncate", "exec", "execute",
    "call", "grant", "revoke", "commit", "rollback",
];

/// Validate that `sql` is a single read-only statement.
pub fn validate_sql_security(sql: &str) -> Result<()> {
    let cleaned = strip_comments_and_strings(sql);
    let trimmed = cleaned.trim();

    if trimmed.is_empty() {
        return Err(PipelineError::SecurityViolation(
            "statement is empty".to_string(),
        ));
    }

    let first_word: String = trimmed
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect::<String>()
        .to_ascii_lowercase();
    if first_word != "select" && first_word != "with" {
        return Err(PipelineError::SecurityViolation(format!(
            "only SELECT statements are allowed, got '{}'",
            first_word.to_ascii_uppercase()
        )));
    }

    if let Some(keyword) = find_forbidden_keyword(trimmed) {
        return Err(PipelineError::SecurityViolation(format!(
            "forbidden keyword '{}' detected",
            keyword.to_ascii_uppercase()
        )));
    }

    check_single_statement(trimmed)?;

    Ok(())
}

/// Word-boundary scan for forbidden keywords. Operates on stripped text, so
/// a column named `created_at` does not match `CREATE` and a literal
/// containing `DELETE` was already blanked out. Quoted identifiers are
/// skipped as opaque units.
fn find_forbidden_keyword(cleaned: &str) -> Option<&'static str> {
    let bytes = cleaned.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'"' {
            let mut end = i + 1;
            while end < bytes.len() && bytes[end] != b'"' {
                end += 1;
            }
            i = (end + 1).min(bytes.len());
            continue;
        }
        if b.is_ascii_alphabetic() || b == b'_' {
            let mut end = i + 1;
            while end < bytes.len()
                && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_' || bytes[end] == b'$')
            {
                end += 1;
            }
            let word = cleaned[i..end].to_ascii_lowercase();
            if let Some(hit) = FORBIDDEN_KEYWORDS.iter().find(|k| **k == word) {
                return Some(hit);
            }
            i = end;
            continue;
        }
        i += 1;
    }
    None
}

/// Reject statement bundling: more than one `;`, or a `;` anywhere but the
/// trailing position.
fn check_single_statement(cleaned: &str) -> Result<()> {
    let trimmed = cleaned.trim_end();
    for (pos, _) in trimmed.match_indices(';') {
        if pos != trimmed.len() - 1 {
            return Err(PipelineError::SecurityViolation(
                "multiple statements are not allowed".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_rejected(sql: &str, expected_fragment: &str) {
        match validate_sql_security(sql) {
            Err(PipelineError::SecurityViolation(msg)) => {
                assert!(
                    msg.contains(expected_fragment),
                    "expected '{}' in message '{}' for sql: {}",
                    expected_fragment,
                    msg,
                    sql
                );
            }
            other => panic!("expected security violation for {:?}, got {:?}", sql, other),
        }
    }

    // ==================== read-only check ====================

    #[test]
    fn test_accepts_select() {
        assert!(validate_sql_security("SELECT * FROM users").is_ok());
        assert!(validate_sql_security("  select id from t  ").is_ok());
    }

    #[test]
    fn test_accepts_with() {
        assert!(
            validate_sql_security("WITH c AS (SELECT 1) SELECT * FROM c").is_ok()
        );
    }

    #[test]
    fn test_accepts_trailing_semicolon() {
        assert!(validate_sql_security("SELECT 1;").is_ok());
        assert!(validate_sql_security("SELECT 1; \n").is_ok());
    }

    #[test]
    fn test_rejects_non_select() {
        assert_rejected("DELETE FROM users", "only SELECT");
        assert_rejected("UPDATE t SET x = 1", "only SELECT");
        assert_rejected("EXPLAIN SELECT 1", "only SELECT");
    }

    #[test]
    fn test_rejects_empty() {
        assert_rejected("", "empty");
        assert_rejected("   ", "empty");
        assert_rejected("-- just a comment", "empty");
    }

    // ==================== forbidden keywords ====================

    #[test]
    fn test_rejects_embedded_forbidden_keyword() {
        assert_rejected("SELECT 1; DROP TABLE users", "DROP");
        assert_rejected("WITH c AS (SELECT 1) INSERT INTO t SELECT * FROM c", "INSERT");
        assert_rejected("SELECT * FROM t WHERE EXECUTE", "EXECUTE");
    }

    #[test]
    fn test_keyword_requires_word_boundary() {
        // Substring hits inside identifiers must not reject.
        assert!(validate_sql_security("SELECT created_at FROM t").is_ok());
        assert!(validate_sql_security("SELECT * FROM updates_summary").is_ok());
        assert!(validate_sql_security("SELECT dropped_count FROM stats").is_ok());
        assert!(validate_sql_security("SELECT * FROM grants_view").is_ok());
    }

    #[test]
    fn test_keyword_in_string_literal_is_ignored() {
        assert!(validate_sql_security("SELECT * FROM t WHERE name = 'DROP TABLE'").is_ok());
        assert!(validate_sql_security("SELECT 'delete me' FROM t").is_ok());
    }

    #[test]
    fn test_keyword_in_comment_is_ignored() {
        assert!(validate_sql_security("SELECT 1 -- drop table users").is_ok());
        assert!(validate_sql_security("SELECT 1 /* truncate t */").is_ok());
    }

    #[test]
    fn test_keyword_in_quoted_identifier_is_ignored() {
        assert!(validate_sql_security("SELECT \"delete\" FROM t").is_ok());
    }

    #[test]
    fn test_keyword_case_insensitive() {
        assert_rejected("SELECT 1; DrOp TABLE t", "DROP");
    }

    // ==================== multi-statement check ====================

    #[test]
    fn test_rejects_multiple_statements() {
        assert_rejected("SELECT 1; SELECT 2", "multiple statements");
        assert_rejected("SELECT 1;;", "multiple statements");
    }

    #[test]
    fn test_semicolon_in_literal_is_fine() {
        assert!(validate_sql_security("SELECT * FROM t WHERE s = 'a;b'").is_ok());
    }
}
