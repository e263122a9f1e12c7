//! Lexical SQL scanner and table-reference extractor.
//!
//! This is deliberately not a SQL grammar. The contract is soundness for
//! access control: every real table reference in the input must be captured,
//! and false positives (e.g. a CTE alias surfacing as a candidate "table")
//! are acceptable. The scanner strips comments and string literals first so
//! table-like tokens inside quoted text never match, then walks the text
//! recognizing targets after `FROM`, `JOIN`, `UPDATE`, and `INSERT INTO`,
//! recursing into CTE bodies and parenthesized subqueries.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

/// Nesting ceiling for CTE/subquery recursion. Deeper input is pathological;
/// the scanner stops descending rather than blowing the stack.
const MAX_RECURSION_DEPTH: usize = 32;

/// A table reference extracted from SQL text.
///
/// Unquoted identifiers are folded to ASCII lowercase; quoted identifiers
/// preserve case with the quote characters stripped.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TableRef {
    /// Optional schema qualifier
    pub schema: Option<String>,
    /// Table name
    pub table: String,
}

impl TableRef {
    /// An unqualified reference.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            schema: None,
            table: table.into(),
        }
    }

    /// A schema-qualified reference.
    pub fn qualified(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.table),
            None => write!(f, "{}", self.table),
        }
    }
}

/// Blank out comments and string literals without disturbing structure.
///
/// Replaces every character of `--` line comments, `/* */` block comments,
/// single-quoted literals (including `''` escapes), and Postgres dollar-quoted
/// strings with spaces. Double-quoted identifiers are preserved. Unterminated
/// constructs blank to end of input rather than erroring.
pub fn strip_comments_and_strings(sql: &str) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());

    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                out.push(' ');
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'\'' {
                        out.push(' ');
                        if i + 1 < bytes.len() && bytes[i + 1] == b'\'' {
                            out.push(' ');
                            i += 2;
                            continue;
                        }
                        i += 1;
                        break;
                    }
                    out.push(' ');
                    i += 1;
                }
            }
            b'-' if i + 1 < bytes.len() && bytes[i + 1] == b'-' => {
                out.push(' ');
                out.push(' ');
                i += 2;
                while i < bytes.len() && bytes[i] != b'\n' {
                    out.push(' ');
                    i += 1;
                }
            }
            b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'*' => {
                out.push(' ');
                out.push(' ');
                i += 2;
                while i < bytes.len() {
                    if i + 1 < bytes.len() && bytes[i] == b'*' && bytes[i + 1] == b'/' {
                        out.push(' ');
                        out.push(' ');
                        i += 2;
                        break;
                    }
                    out.push(' ');
                    i += 1;
                }
            }
            b'$' => {
                // Dollar-quoted strings: $tag$ ... $tag$. A bare $1 is a
                // parameter placeholder, not a quote.
                let mut j = i + 1;
                while j < bytes.len() {
                    let b = bytes[j];
                    if b == b'$' {
                        break;
                    }
                    if !(b.is_ascii_alphanumeric() || b == b'_') {
                        j = bytes.len();
                        break;
                    }
                    j += 1;
                }

                if j < bytes.len() && bytes[j] == b'$' {
                    let tag = &sql[i..=j];
                    if let Some(end_rel) = sql[j + 1..].find(tag) {
                        let end = (j + 1) + end_rel + tag.len();
                        for _ in 0..(end - i) {
                            out.push(' ');
                        }
                        i = end;
                        continue;
                    }
                }

                out.push('$');
                i += 1;
            }
            _ => {
                let ch = sql[i..].chars().next().unwrap_or('\0');
                out.push(ch);
                i += ch.len_utf8();
            }
        }
    }

    out
}

/// Extract every table reference from a SQL string.
///
/// Comments and string literals are stripped first, so the returned set
/// reflects only structural references. The result includes targets inside
/// CTE bodies and nested subqueries.
pub fn extract_table_refs(sql: &str) -> BTreeSet<TableRef> {
    let cleaned = strip_comments_and_strings(sql);
    let mut refs = BTreeSet::new();
    collect_refs(&cleaned, &mut refs, 0);
    refs
}

/// Words that terminate a FROM table list or can never be a table name.
fn is_reserved(word: &str) -> bool {
    matches!(
        word,
        "select"
            | "from"
            | "where"
            | "join"
            | "inner"
            | "left"
            | "right"
            | "full"
            | "cross"
            | "natural"
            | "outer"
            | "on"
            | "using"
            | "group"
            | "order"
            | "limit"
            | "offset"
            | "union"
            | "intersect"
            | "except"
            | "having"
            | "returning"
            | "set"
            | "values"
            | "as"
            | "with"
            | "and"
            | "or"
            | "not"
            | "case"
            | "when"
            | "then"
            | "else"
            | "end"
            | "distinct"
            | "fetch"
            | "for"
            | "window"
    )
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_cont(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

fn skip_whitespace(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

/// Read the unquoted word starting at `i`, returning it lowercased along with
/// the index one past its end. Caller guarantees `is_ident_start(bytes[i])`.
fn read_word(sql: &str, i: usize) -> (String, usize) {
    let bytes = sql.as_bytes();
    let mut end = i + 1;
    while end < bytes.len() && is_ident_cont(bytes[end]) {
        end += 1;
    }
    (sql[i..end].to_ascii_lowercase(), end)
}

/// Read one identifier part at `i`: either `"Quoted"` (case preserved, quotes
/// stripped) or an unquoted word (lowercased). Returns `None` when the text
/// at `i` is not an identifier or is a reserved word.
fn read_identifier(sql: &str, i: usize) -> Option<(String, usize)> {
    let bytes = sql.as_bytes();
    if i >= bytes.len() {
        return None;
    }
    if bytes[i] == b'"' {
        let mut end = i + 1;
        while end < bytes.len() && bytes[end] != b'"' {
            end += 1;
        }
        if end >= bytes.len() || end == i + 1 {
            return None; // unterminated or empty
        }
        return Some((sql[i + 1..end].to_string(), end + 1));
    }
    if !is_ident_start(bytes[i]) {
        return None;
    }
    let (word, end) = read_word(sql, i);
    if is_reserved(&word) {
        return None;
    }
    Some((word, end))
}

/// Find the index of the `)` matching the `(` at `open`.
fn find_matching_paren(sql: &str, open: usize) -> Option<usize> {
    let bytes = sql.as_bytes();
    debug_assert_eq!(bytes.get(open), Some(&b'('));
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn collect_refs(sql: &str, out: &mut BTreeSet<TableRef>, depth: usize) {
    if depth > MAX_RECURSION_DEPTH {
        return;
    }

    let bytes = sql.as_bytes();
    let start = skip_whitespace(bytes, 0);
    if start < bytes.len() && is_ident_start(bytes[start]) {
        let (word, _) = read_word(sql, start);
        if word == "with" {
            collect_with_block(sql, start, out, depth);
            return;
        }
    }

    scan_clause_targets(sql, out, depth);
}

/// Resolve a `WITH` block: split the comma-separated CTE definitions at
/// top-level paren depth, recurse into each body, then extract from the
/// trailing main query. Malformed structure falls back to a flat scan of the
/// whole text — over-inclusion is the safe direction here.
fn collect_with_block(sql: &str, with_start: usize, out: &mut BTreeSet<TableRef>, depth: usize) {
    let bytes = sql.as_bytes();
    // Past "WITH" and optional "RECURSIVE".
    let (_, mut i) = read_word(sql, with_start);
    i = skip_whitespace(bytes, i);
    if i < bytes.len() && is_ident_start(bytes[i]) {
        let (word, end) = read_word(sql, i);
        if word == "recursive" {
            i = skip_whitespace(bytes, end);
        }
    }

    loop {
        // CTE alias (we do not record it as a table; if the main query
        // references it via FROM it will surface there as a candidate).
        let Some((_, after_alias)) = read_identifier(sql, i) else {
            scan_clause_targets(&sql[i.min(sql.len())..], out, depth);
            return;
        };
        i = skip_whitespace(bytes, after_alias);

        // Optional column list: alias (col1, col2) AS (...)
        if i < bytes.len() && bytes[i] == b'(' {
            match find_matching_paren(sql, i) {
                Some(close) => i = skip_whitespace(bytes, close + 1),
                None => {
                    scan_clause_targets(&sql[i..], out, depth);
                    return;
                }
            }
        }

        // AS keyword, then optional MATERIALIZED / NOT MATERIALIZED.
        let Some(after_as) = expect_word(sql, i, "as") else {
            scan_clause_targets(&sql[i..], out, depth);
            return;
        };
        i = skip_whitespace(bytes, after_as);
        if let Some(after_not) = expect_word(sql, i, "not") {
            i = skip_whitespace(bytes, after_not);
        }
        if let Some(after_mat) = expect_word(sql, i, "materialized") {
            i = skip_whitespace(bytes, after_mat);
        }

        // CTE body.
        if i >= bytes.len() || bytes[i] != b'(' {
            scan_clause_targets(&sql[i.min(sql.len())..], out, depth);
            return;
        }
        let Some(close) = find_matching_paren(sql, i) else {
            scan_clause_targets(&sql[i..], out, depth);
            return;
        };
        collect_refs(&sql[i + 1..close], out, depth + 1);
        i = skip_whitespace(bytes, close + 1);

        // Comma at top level continues the CTE list; anything else starts the
        // main query.
        if i < bytes.len() && bytes[i] == b',' {
            i = skip_whitespace(bytes, i + 1);
            continue;
        }
        collect_refs(&sql[i.min(sql.len())..], out, depth + 1);
        return;
    }
}

/// If the unquoted word at `i` equals `expected`, return the index past it.
fn expect_word(sql: &str, i: usize, expected: &str) -> Option<usize> {
    let bytes = sql.as_bytes();
    if i < bytes.len() && is_ident_start(bytes[i]) {
        let (word, end) = read_word(sql, i);
        if word == expected {
            return Some(end);
        }
    }
    None
}

/// Flat scan: walk the text and consume table targets after the trigger
/// keywords. Parenthesized targets after FROM/JOIN recurse as subqueries.
fn scan_clause_targets(sql: &str, out: &mut BTreeSet<TableRef>, depth: usize) {
    let bytes = sql.as_bytes();
    let mut i = 0;
    let mut prev_word = String::new();

    while i < bytes.len() {
        let b = bytes[i];
        if b == b'"' {
            // Skip a quoted identifier as a unit so its contents are never
            // mistaken for keywords.
            let mut end = i + 1;
            while end < bytes.len() && bytes[end] != b'"' {
                end += 1;
            }
            i = (end + 1).min(bytes.len());
            prev_word.clear();
            continue;
        }
        if !is_ident_start(b) {
            i += 1;
            continue;
        }

        let (word, end) = read_word(sql, i);
        let next = match word.as_str() {
            "from" => consume_table_list(sql, end, out, depth, true),
            "join" => consume_single_target(sql, end, out, depth, true),
            "update" => consume_single_target(sql, end, out, depth, false),
            "into" if prev_word == "insert" => {
                consume_single_target(sql, end, out, depth, false)
            }
            _ => end,
        };
        prev_word = word;
        i = next;
    }
}

/// Consume the comma-separated table list after `FROM`. Returns the index at
/// which the caller should resume scanning.
fn consume_table_list(
    sql: &str,
    mut i: usize,
    out: &mut BTreeSet<TableRef>,
    depth: usize,
    paren_is_subquery: bool,
) -> usize {
    let bytes = sql.as_bytes();
    loop {
        i = consume_single_target(sql, i, out, depth, paren_is_subquery);
        i = skip_alias(sql, i);
        let at = skip_whitespace(bytes, i);
        if at < bytes.len() && bytes[at] == b',' {
            i = at + 1;
            continue;
        }
        return i;
    }
}

/// Consume one table target: a parenthesized subquery (recursed into), a
/// set-returning function call (skipped), or a possibly schema-qualified
/// identifier (recorded).
fn consume_single_target(
    sql: &str,
    i: usize,
    out: &mut BTreeSet<TableRef>,
    depth: usize,
    paren_is_subquery: bool,
) -> usize {
    let bytes = sql.as_bytes();
    let mut i = skip_whitespace(bytes, i);

    // ONLY / LATERAL prefixes.
    loop {
        if let Some(end) = expect_word(sql, i, "only").or_else(|| expect_word(sql, i, "lateral")) {
            i = skip_whitespace(bytes, end);
        } else {
            break;
        }
    }

    if i < bytes.len() && bytes[i] == b'(' {
        if !paren_is_subquery {
            return i + 1;
        }
        return match find_matching_paren(sql, i) {
            Some(close) => {
                collect_refs(&sql[i + 1..close], out, depth + 1);
                close + 1
            }
            None => {
                collect_refs(&sql[i + 1..], out, depth + 1);
                sql.len()
            }
        };
    }

    let Some((first, after_first)) = read_identifier(sql, i) else {
        return i;
    };
    let mut end = after_first;

    let mut schema = None;
    let mut table = first;
    if end < bytes.len() && bytes[end] == b'.' {
        if let Some((second, after_second)) = read_identifier(sql, end + 1) {
            schema = Some(table);
            table = second;
            end = after_second;
        }
    }

    // `FROM generate_series(...)` and `FROM schema.fn(...)` are function
    // calls, not tables.
    if paren_is_subquery && end < bytes.len() && bytes[end] == b'(' {
        return end;
    }

    out.insert(TableRef { schema, table });
    end
}

/// Skip an optional alias (`AS name` or a bare identifier) after a consumed
/// table target.
fn skip_alias(sql: &str, i: usize) -> usize {
    let bytes = sql.as_bytes();
    let at = skip_whitespace(bytes, i);
    if let Some(after_as) = expect_word(sql, at, "as") {
        let name_at = skip_whitespace(bytes, after_as);
        if let Some((_, after_name)) = read_identifier(sql, name_at) {
            return after_name;
        }
        return after_as;
    }
    if let Some((_, after_name)) = read_identifier(sql, at) {
        return after_name;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn refs(items: &[(&str, Option<&str>)]) -> BTreeSet<TableRef> {
        items
            .iter()
            .map(|(table, schema)| TableRef {
                schema: schema.map(str::to_string),
                table: (*table).to_string(),
            })
            .collect()
    }

    macro_rules! extract_test {
        ($name:ident, $sql:expr, [$(($table:expr, $schema:expr)),* $(,)?]) => {
            #[test]
            fn $name() {
                let actual = extract_table_refs($sql);
                let expected = refs(&[$(($table, $schema)),*]);
                assert_eq!(actual, expected, "sql: {}", $sql);
            }
        };
    }

    // ==================== strip_comments_and_strings ====================

    #[test]
    fn strip_empty() {
        assert_eq!(strip_comments_and_strings(""), "");
    }

    #[test]
    fn strip_plain_passthrough() {
        let input = "SELECT * FROM users WHERE id = 1";
        assert_eq!(strip_comments_and_strings(input), input);
    }

    #[test]
    fn strip_line_comment() {
        let out = strip_comments_and_strings("SELECT * -- FROM bogus\nFROM users");
        assert!(!out.contains("bogus"));
        assert!(out.contains("FROM users"));
    }

    #[test]
    fn strip_block_comment() {
        let out = strip_comments_and_strings("SELECT * /* FROM bogus */ FROM users");
        assert!(!out.contains("bogus"));
        assert!(out.contains("FROM users"));
    }

    #[test]
    fn strip_string_literal() {
        let out = strip_comments_and_strings("SELECT 'FROM bogus' FROM users");
        assert!(!out.contains("bogus"));
        assert!(out.contains("FROM users"));
    }

    #[test]
    fn strip_escaped_quote_in_literal() {
        let out = strip_comments_and_strings("SELECT 'it''s FROM x' FROM users");
        assert!(!out.contains("FROM x"));
        assert!(out.contains("FROM users"));
    }

    #[test]
    fn strip_dollar_quoted() {
        let out = strip_comments_and_strings("SELECT $tag$ FROM bogus $tag$ FROM users");
        assert!(!out.contains("bogus"));
        assert!(out.contains("FROM users"));
    }

    #[test]
    fn strip_keeps_parameter_placeholder() {
        let out = strip_comments_and_strings("SELECT $1 FROM users");
        assert!(out.contains("$1"));
    }

    #[test]
    fn strip_preserves_length() {
        let input = "SELECT 'abc' /* x */ FROM t -- y";
        assert_eq!(strip_comments_and_strings(input).len(), input.len());
    }

    #[test]
    fn strip_unterminated_constructs() {
        // Must not panic, must not leak literal contents.
        assert!(strip_comments_and_strings("SELECT 'oops").contains("SELECT"));
        assert!(strip_comments_and_strings("SELECT /* oops").contains("SELECT"));
    }

    // ==================== extraction grid ====================

    extract_test!(extract_simple, "SELECT * FROM users", [("users", None)]);

    extract_test!(
        extract_join,
        "SELECT * FROM a JOIN b ON a.id=b.id",
        [("a", None), ("b", None)]
    );

    extract_test!(
        extract_join_variants,
        "SELECT * FROM a LEFT JOIN b ON a.x=b.x RIGHT JOIN c ON b.y=c.y \
         INNER JOIN d ON c.z=d.z FULL OUTER JOIN e ON d.w=e.w CROSS JOIN f",
        [
            ("a", None),
            ("b", None),
            ("c", None),
            ("d", None),
            ("e", None),
            ("f", None)
        ]
    );

    extract_test!(
        extract_schema_qualified,
        "SELECT * FROM analytics.events e JOIN public.users u ON e.uid=u.id",
        [("events", Some("analytics")), ("users", Some("public"))]
    );

    extract_test!(
        extract_comma_list,
        "SELECT * FROM users u, orders o WHERE u.id = o.user_id",
        [("users", None), ("orders", None)]
    );

    extract_test!(
        extract_lowercases_unquoted,
        "SELECT * FROM Users JOIN ORDERS ON 1=1",
        [("users", None), ("orders", None)]
    );

    extract_test!(
        extract_quoted_preserves_case,
        "SELECT * FROM \"MixedCase\" JOIN \"other\" ON 1=1",
        [("MixedCase", None), ("other", None)]
    );

    extract_test!(
        extract_subquery,
        "SELECT * FROM (SELECT id FROM inner_t) sub",
        [("inner_t", None)]
    );

    extract_test!(
        extract_nested_subquery,
        "SELECT * FROM (SELECT * FROM (SELECT * FROM deep_t) a) b",
        [("deep_t", None)]
    );

    extract_test!(
        extract_join_subquery,
        "SELECT * FROM a JOIN (SELECT * FROM b WHERE x > 1) s ON a.id=s.id",
        [("a", None), ("b", None)]
    );

    extract_test!(
        extract_cte,
        "WITH c AS (SELECT * FROM inner_t) SELECT * FROM c JOIN outer_t ON c.id=outer_t.id",
        [("inner_t", None), ("c", None), ("outer_t", None)]
    );

    extract_test!(
        extract_multiple_ctes,
        "WITH a AS (SELECT * FROM t1), b AS (SELECT * FROM t2, t3) SELECT * FROM a JOIN b ON 1=1",
        [
            ("t1", None),
            ("t2", None),
            ("t3", None),
            ("a", None),
            ("b", None)
        ]
    );

    extract_test!(
        extract_recursive_cte,
        "WITH RECURSIVE r AS (SELECT * FROM seed UNION ALL SELECT * FROM r) SELECT * FROM r",
        [("seed", None), ("r", None)]
    );

    extract_test!(
        extract_cte_with_column_list,
        "WITH c(x, y) AS (SELECT a, b FROM src) SELECT * FROM c",
        [("src", None), ("c", None)]
    );

    extract_test!(
        extract_nested_cte,
        "WITH outer_c AS (WITH inner_c AS (SELECT * FROM base_t) SELECT * FROM inner_c) \
         SELECT * FROM outer_c",
        [("base_t", None), ("inner_c", None), ("outer_c", None)]
    );

    extract_test!(
        extract_update,
        "UPDATE accounts SET balance = 0",
        [("accounts", None)]
    );

    extract_test!(
        extract_insert_into,
        "INSERT INTO audit_log (a) SELECT a FROM events",
        [("audit_log", None), ("events", None)]
    );

    extract_test!(
        extract_union,
        "SELECT id FROM t1 UNION SELECT id FROM t2",
        [("t1", None), ("t2", None)]
    );

    extract_test!(
        extract_ignores_string_contents,
        "SELECT * FROM real_t WHERE name = 'FROM fake_t'",
        [("real_t", None)]
    );

    extract_test!(
        extract_ignores_comment_contents,
        "SELECT * FROM real_t -- JOIN fake_t\n/* FROM also_fake */",
        [("real_t", None)]
    );

    extract_test!(
        extract_skips_function_call,
        "SELECT * FROM generate_series(1, 10)",
        []
    );

    extract_test!(
        extract_skips_schema_qualified_function,
        "SELECT * FROM util.generate_series(1, 10) JOIN real_t ON 1=1",
        [("real_t", None)]
    );

    extract_test!(
        extract_lateral_join,
        "SELECT * FROM a JOIN LATERAL (SELECT * FROM b WHERE b.x = a.x) s ON true",
        [("a", None), ("b", None)]
    );

    extract_test!(extract_empty_input, "", []);

    extract_test!(extract_no_tables, "SELECT 1 + 1", []);

    extract_test!(
        extract_semijoin_subquery_in_where,
        "SELECT * FROM t1 WHERE id IN (SELECT id FROM t2)",
        [("t1", None), ("t2", None)]
    );

    // ==================== identifier parsing ====================

    #[test]
    fn read_identifier_rejects_reserved() {
        assert!(read_identifier("where", 0).is_none());
        assert!(read_identifier("select", 0).is_none());
    }

    #[test]
    fn read_identifier_quoted_reserved_is_fine() {
        let (name, _) = read_identifier("\"select\"", 0).expect("quoted");
        assert_eq!(name, "select");
    }

    #[test]
    fn table_ref_display() {
        assert_eq!(TableRef::new("users").to_string(), "users");
        assert_eq!(
            TableRef::qualified("public", "users").to_string(),
            "public.users"
        );
    }

    #[test]
    fn malformed_with_falls_back_to_flat_scan() {
        // Broken CTE structure must still capture the real reference.
        let found = extract_table_refs("WITH c AS SELECT * FROM hidden_t");
        assert!(found.contains(&TableRef::new("hidden_t")));
    }

    #[test]
    fn deep_nesting_terminates() {
        let mut sql = String::from("SELECT * FROM ");
        for _ in 0..100 {
            sql.push_str("(SELECT * FROM ");
        }
        sql.push_str("bottom");
        for _ in 0..100 {
            sql.push_str(") x");
        }
        // Must terminate without stack overflow; capture is best-effort past
        // the recursion ceiling.
        let _ = extract_table_refs(&sql);
    }

    proptest! {
        #[test]
        fn extraction_never_panics(sql in "\\PC{0,200}") {
            let _ = extract_table_refs(&sql);
        }

        #[test]
        fn stripping_preserves_byte_length_for_ascii(sql in "[ -~]{0,200}") {
            let stripped = strip_comments_and_strings(&sql);
            prop_assert_eq!(stripped.len(), sql.len());
        }
    }
}
