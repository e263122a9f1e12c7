//! Table access validation against a tenant allow-list.
//!
//! Runs the scanner over the statement and checks every extracted reference
//! for membership in the tenant's allowed table set (and, when schemas are
//! restricted, the allowed schema set). The allow-list is rebuilt from the
//! tenant's catalog on every call by the caller, so catalog updates take
//! effect on the next query.

use std::collections::BTreeSet;

use tracing::warn;

use crate::error::{PipelineError, Result};
use crate::scanner::{extract_table_refs, TableRef};

/// The set of tables (and optionally schemas) a tenant's SQL may reference.
///
/// All entries are lowercase; membership checks fold the candidate to
/// lowercase before comparing. An empty `schemas` set means schemas are
/// unrestricted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedAccessSet {
    tables: BTreeSet<String>,
    schemas: BTreeSet<String>,
}

impl AllowedAccessSet {
    /// Build an access set from table and schema names. Entries are folded
    /// to lowercase.
    pub fn new<T, S>(tables: T, schemas: S) -> Self
    where
        T: IntoIterator,
        T::Item: AsRef<str>,
        S: IntoIterator,
        S::Item: AsRef<str>,
    {
        Self {
            tables: tables
                .into_iter()
                .map(|t| t.as_ref().to_ascii_lowercase())
                .collect(),
            schemas: schemas
                .into_iter()
                .map(|s| s.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Allowed table names.
    pub fn tables(&self) -> &BTreeSet<String> {
        &self.tables
    }

    /// Allowed schema names. Empty means unrestricted.
    pub fn schemas(&self) -> &BTreeSet<String> {
        &self.schemas
    }

    /// True when no tables are allowed at all.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    fn allows_table(&self, table: &str) -> bool {
        self.tables.contains(&table.to_ascii_lowercase())
    }

    fn allows_schema(&self, schema: &str) -> bool {
        self.schemas.is_empty() || self.schemas.contains(&schema.to_ascii_lowercase())
    }
}

/// Validate every table reference in `sql` against `allowed`.
///
/// Rejects when the statement references a table outside the allow-list,
/// when a schema-qualified reference names a disallowed schema, when no
/// table reference could be extracted at all (a parse failure is not an
/// implicit allow), or when the allow-list itself is empty.
pub fn validate_table_access(sql: &str, allowed: &AllowedAccessSet) -> Result<()> {
    let refs = extract_table_refs(sql);

    if refs.is_empty() {
        return Err(PipelineError::AccessViolation {
            message: "no table references could be extracted from the statement".to_string(),
            unauthorized: Vec::new(),
        });
    }

    if allowed.is_empty() {
        // Fail closed. An empty allow-list usually means the tenant's catalog
        // yielded no parseable tables, which the operator needs to see.
        warn!(
            referenced = refs.len(),
            "allow-list is empty; rejecting all access (catalog likely yielded no tables)"
        );
        return Err(PipelineError::AccessViolation {
            message: "tenant catalog produced an empty allow-list; no table access is possible"
                .to_string(),
            unauthorized: refs.iter().map(TableRef::to_string).collect(),
        });
    }

    // Table membership takes precedence over schema membership in the report.
    let unauthorized: Vec<String> = refs
        .iter()
        .filter(|r| {
            !allowed.allows_table(&r.table)
                || r.schema
                    .as_deref()
                    .is_some_and(|s| !allowed.allows_schema(s))
        })
        .map(TableRef::to_string)
        .collect();

    if unauthorized.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::access_violation(unauthorized))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allow(tables: &[&str]) -> AllowedAccessSet {
        AllowedAccessSet::new(tables.iter().copied(), std::iter::empty::<&str>())
    }

    fn unauthorized_of(err: PipelineError) -> Vec<String> {
        match err {
            PipelineError::AccessViolation { unauthorized, .. } => unauthorized,
            other => panic!("expected access violation, got {:?}", other),
        }
    }

    #[test]
    fn test_authorized_query_passes() {
        let allowed = allow(&["users", "orders"]);
        assert!(validate_table_access(
            "SELECT * FROM users u JOIN orders o ON u.id = o.user_id",
            &allowed
        )
        .is_ok());
    }

    #[test]
    fn test_unauthorized_table_listed_alone() {
        let allowed = allow(&["users", "orders"]);
        let err = validate_table_access(
            "SELECT * FROM users JOIN secrets ON users.id = secrets.uid",
            &allowed,
        )
        .unwrap_err();
        let unauthorized = unauthorized_of(err);
        assert_eq!(unauthorized, vec!["secrets".to_string()]);
    }

    #[test]
    fn test_membership_is_case_insensitive() {
        let allowed = allow(&["Users"]);
        assert!(validate_table_access("SELECT * FROM USERS", &allowed).is_ok());
    }

    #[test]
    fn test_schema_restriction() {
        let allowed = AllowedAccessSet::new(["events"], ["analytics"]);
        assert!(validate_table_access("SELECT * FROM analytics.events", &allowed).is_ok());

        let err =
            validate_table_access("SELECT * FROM internal.events", &allowed).unwrap_err();
        assert_eq!(unauthorized_of(err), vec!["internal.events".to_string()]);
    }

    #[test]
    fn test_unrestricted_schemas_accept_any_qualifier() {
        let allowed = allow(&["events"]);
        assert!(validate_table_access("SELECT * FROM whatever.events", &allowed).is_ok());
    }

    #[test]
    fn test_no_extractable_tables_is_rejected() {
        let allowed = allow(&["users"]);
        let err = validate_table_access("SELECT 1 + 1", &allowed).unwrap_err();
        match err {
            PipelineError::AccessViolation { message, .. } => {
                assert!(message.contains("no table references"));
            }
            other => panic!("expected access violation, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_allow_list_locks_out() {
        let allowed = allow(&[]);
        let err = validate_table_access("SELECT * FROM users", &allowed).unwrap_err();
        match err {
            PipelineError::AccessViolation {
                message,
                unauthorized,
            } => {
                assert!(message.contains("empty allow-list"));
                assert_eq!(unauthorized, vec!["users".to_string()]);
            }
            other => panic!("expected access violation, got {:?}", other),
        }
    }

    #[test]
    fn test_cte_body_tables_are_checked() {
        let allowed = allow(&["users", "recent"]);
        // Table hidden inside a CTE body must still be validated.
        let err = validate_table_access(
            "WITH recent AS (SELECT * FROM secrets) SELECT * FROM recent JOIN users ON 1=1",
            &allowed,
        )
        .unwrap_err();
        assert_eq!(unauthorized_of(err), vec!["secrets".to_string()]);
    }
}
