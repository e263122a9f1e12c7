//! Catalog document parsing.
//!
//! A tenant's catalog is a human/LLM-authored markdown document describing
//! the tables it may query. The expected shape is a title line naming the
//! schema and one `## Table:` section per table, with identifiers in
//! backticks:
//!
//! ```markdown
//! # Data Catalog for Schema: `analytics`
//!
//! ## Table: `page_views`
//! ...
//! ```
//!
//! Parsing is heuristic and line-based. The adapter degrades gracefully on
//! malformed input (empty sets, never an error); the access validator treats
//! an empty result as a lockout, not an implicit allow.

use tracing::debug;

use crate::access::AllowedAccessSet;

/// Maximum identifier length accepted from a catalog header (the Postgres
/// NAMEDATALEN limit).
const MAX_IDENTIFIER_LEN: usize = 63;

/// Header words that introduce prose sections rather than tables.
const PROSE_HEADER_WORDS: &[&str] = &[
    "overview",
    "description",
    "columns",
    "column",
    "notes",
    "note",
    "summary",
    "example",
    "examples",
    "sample",
    "samples",
    "usage",
    "relationships",
    "index",
    "indexes",
    "tables",
    "schema",
    "catalog",
    "contents",
];

/// Parse a markdown catalog document into the tenant's allow-list.
///
/// Recognizes `## Table:` headers (any heading level) and
/// `# Data Catalog for Schema:` / `## Schema:` headers. A qualified
/// `schema.table` in a table header contributes to both sets. Returns empty
/// sets for input that contains no recognizable headers.
pub fn parse_catalog(doc: &str) -> AllowedAccessSet {
    let mut tables: Vec<String> = Vec::new();
    let mut schemas: Vec<String> = Vec::new();

    for line in doc.lines() {
        let stripped = line.trim().trim_start_matches('#').trim();
        let lower = stripped.to_ascii_lowercase();

        if let Some(rest) = lower
            .strip_prefix("data catalog for schema:")
            .or_else(|| lower.strip_prefix("schema:"))
        {
            let rest_original = &stripped[stripped.len() - rest.len()..];
            if let Some(name) = extract_identifier(rest_original) {
                schemas.push(name);
            }
            continue;
        }

        if let Some(rest) = lower.strip_prefix("table:") {
            let rest_original = &stripped[stripped.len() - rest.len()..];
            if let Some(name) = extract_identifier(rest_original) {
                match name.split_once('.') {
                    Some((schema, table)) => {
                        schemas.push(schema.to_string());
                        tables.push(table.to_string());
                    }
                    None => tables.push(name),
                }
            }
        }
    }

    debug!(
        tables = tables.len(),
        schemas = schemas.len(),
        "parsed catalog document"
    );
    AllowedAccessSet::new(tables, schemas)
}

/// Pull a single identifier out of header-line text: the first backticked
/// token if present, otherwise the whole remainder. Returns `None` when the
/// candidate looks like prose rather than an identifier.
fn extract_identifier(text: &str) -> Option<String> {
    let candidate = match text.find('`') {
        Some(open) => {
            let after = &text[open + 1..];
            let close = after.find('`')?;
            &after[..close]
        }
        None => text.trim(),
    };
    let candidate = candidate.trim().to_ascii_lowercase();

    if !is_identifier_like(&candidate) {
        return None;
    }
    if PROSE_HEADER_WORDS.contains(&candidate.as_str()) {
        return None;
    }
    Some(candidate)
}

/// True when `s` is a plausible (optionally schema-qualified) SQL identifier.
fn is_identifier_like(s: &str) -> bool {
    if s.is_empty() || s.len() > MAX_IDENTIFIER_LEN * 2 + 1 {
        return false;
    }
    let mut parts = s.split('.');
    let count = s.split('.').count();
    if count > 2 {
        return false;
    }
    parts.all(|part| {
        !part.is_empty()
            && part.len() <= MAX_IDENTIFIER_LEN
            && part
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"# Data Catalog for Schema: `analytics`

Generated from a live database.

## Table: `page_views`

| Column | Type |
|---|---|
| id | bigint |
| viewed_at | timestamptz |

## Table: `sessions`

Session-level rollups.

## Notes

These tables refresh nightly.
"#;

    #[test]
    fn test_parses_tables_and_schema() {
        let allowed = parse_catalog(SAMPLE);
        assert!(allowed.tables().contains("page_views"));
        assert!(allowed.tables().contains("sessions"));
        assert_eq!(allowed.tables().len(), 2);
        assert!(allowed.schemas().contains("analytics"));
    }

    #[test]
    fn test_prose_headers_are_skipped() {
        let allowed = parse_catalog(SAMPLE);
        assert!(!allowed.tables().contains("notes"));
    }

    #[test]
    fn test_unbackticked_headers_accepted() {
        let allowed = parse_catalog("## Table: user_accounts\n## Table: Orders\n");
        assert!(allowed.tables().contains("user_accounts"));
        assert!(allowed.tables().contains("orders"));
    }

    #[test]
    fn test_qualified_table_header() {
        let allowed = parse_catalog("## Table: `sales.invoices`\n");
        assert!(allowed.tables().contains("invoices"));
        assert!(allowed.schemas().contains("sales"));
    }

    #[test]
    fn test_prose_header_text_rejected() {
        let allowed =
            parse_catalog("## Table: the main table used for reporting purposes\n");
        assert!(allowed.is_empty());
    }

    #[test]
    fn test_malformed_input_degrades_to_empty() {
        assert!(parse_catalog("").is_empty());
        assert!(parse_catalog("just some prose\nwith no headers").is_empty());
        assert!(parse_catalog("## Table: `unclosed\n").is_empty());
    }

    #[test]
    fn test_heading_level_is_irrelevant() {
        let allowed = parse_catalog("### Table: `deep`\n# Table: `shallow`\nTable: `bare`\n");
        assert!(allowed.tables().contains("deep"));
        assert!(allowed.tables().contains("shallow"));
        assert!(allowed.tables().contains("bare"));
    }

    #[test]
    fn test_identifier_like() {
        assert!(is_identifier_like("users"));
        assert!(is_identifier_like("_private"));
        assert!(is_identifier_like("a.b"));
        assert!(!is_identifier_like(""));
        assert!(!is_identifier_like("a.b.c"));
        assert!(!is_identifier_like("has space"));
        assert!(!is_identifier_like("1starts_numeric"));
    }
}
