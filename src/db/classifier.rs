//! Quote- and parenthesis-aware scanning of raw SQL text.
//!
//! Only used to decide whether a user statement can be wrapped in a
//! `COUNT(*)` / `LIMIT ... OFFSET ...` pair. This is not a SQL parser.
//! Comments (`--` and `/* */`) are treated as whitespace.

/// Returns the index just past the quoted run that opens at `start`.
///
/// Two consecutive quote characters inside the run are an escaped quote.
/// An unterminated run consumes the rest of the text.
pub fn skip_quoted_string(text: &str, start: usize, quote: u8) -> usize {
    let bytes = text.as_bytes();
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Returns the index just past the balanced `(...)` span that opens at
/// `start`, or the text length if the span is never closed.
pub fn skip_parenthesized_section(text: &str, start: usize) -> usize {
    closing_paren(text, start).unwrap_or(text.len())
}

/// True if a top-level `;` is followed by anything other than whitespace,
/// comments or further empty statements.
pub fn has_additional_statements(sql: &str) -> bool {
    let bytes = sql.as_bytes();
    let Some(mut j) = first_top_level_semicolon(sql) else {
        return false;
    };
    loop {
        j = skip_trivia(sql, j + 1);
        if bytes.get(j) != Some(&b';') {
            return j < bytes.len();
        }
    }
}

/// Lower-cased first keyword of the statement. A leading `WITH` block is
/// walked CTE by CTE and the keyword of the main statement is returned.
/// `None` when the text is empty or the CTE block is malformed.
pub fn get_initial_statement_keyword(sql: &str) -> Option<String> {
    let bytes = sql.as_bytes();
    let mut i = skip_trivia(sql, 0);
    loop {
        if bytes.get(i) == Some(&b'(') {
            closing_paren(sql, i)?;
            while bytes.get(i) == Some(&b'(') {
                i = skip_trivia(sql, i + 1);
            }
        }
        let (word, end) = read_word(sql, i);
        if word.is_empty() {
            return None;
        }
        if !word.eq_ignore_ascii_case("with") {
            return Some(word.to_ascii_lowercase());
        }
        i = skip_cte_block(sql, end)?;
    }
}

/// True iff `sql` is a single statement whose leading keyword is `select`.
pub fn is_selectable_query(sql: &str) -> bool {
    !has_additional_statements(sql)
        && get_initial_statement_keyword(sql).as_deref() == Some("select")
}

/// Cuts a single statement at its terminating `;` and drops trailing
/// whitespace, so it can be embedded as a subquery. Whatever follows the
/// terminator (more `;`, comments) goes with it.
pub fn strip_statement_terminator(sql: &str) -> &str {
    match first_top_level_semicolon(sql) {
        Some(i) => sql[..i].trim_end(),
        None => sql.trim_end(),
    }
}

fn first_top_level_semicolon(sql: &str) -> Option<usize> {
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if let Some(end) = skip_comment(bytes, i) {
            i = end;
            continue;
        }
        match bytes[i] {
            b'\'' | b'"' | b'`' => i = skip_quoted_string(sql, i, bytes[i]),
            b'(' => i = skip_parenthesized_section(sql, i),
            b';' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

/// Walks `name [(cols)] AS [[NOT] MATERIALIZED] (...)` entries separated by
/// commas and returns the index where the main statement starts.
fn skip_cte_block(sql: &str, start: usize) -> Option<usize> {
    let bytes = sql.as_bytes();
    let mut i = skip_trivia(sql, start);
    let (word, end) = read_word(sql, i);
    if word.eq_ignore_ascii_case("recursive") {
        i = end;
    }

    loop {
        i = skip_trivia(sql, i);
        i = skip_identifier(sql, i)?;
        i = skip_trivia(sql, i);

        // optional column list
        if bytes.get(i) == Some(&b'(') {
            i = closing_paren(sql, i)?;
            i = skip_trivia(sql, i);
        }

        let (word, end) = read_word(sql, i);
        if !word.eq_ignore_ascii_case("as") {
            return None;
        }
        i = skip_trivia(sql, end);

        let (word, end) = read_word(sql, i);
        if word.eq_ignore_ascii_case("not") {
            i = skip_trivia(sql, end);
            let (word, end) = read_word(sql, i);
            if !word.eq_ignore_ascii_case("materialized") {
                return None;
            }
            i = skip_trivia(sql, end);
        } else if word.eq_ignore_ascii_case("materialized") {
            i = skip_trivia(sql, end);
        }

        if bytes.get(i) != Some(&b'(') {
            return None;
        }
        i = closing_paren(sql, i)?;
        i = skip_trivia(sql, i);

        if bytes.get(i) == Some(&b',') {
            i += 1;
            continue;
        }
        return Some(i);
    }
}

/// Index just past the `)` that balances the `(` at `start`.
fn closing_paren(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut i = start;
    while i < bytes.len() {
        if let Some(end) = skip_comment(bytes, i) {
            i = end;
            continue;
        }
        match bytes[i] {
            b'\'' | b'"' | b'`' => i = skip_quoted_string(text, i, bytes[i]),
            b'(' => {
                depth += 1;
                i += 1;
            }
            b')' => {
                i += 1;
                if depth <= 1 {
                    return Some(i);
                }
                depth -= 1;
            }
            _ => i += 1,
        }
    }
    None
}

fn skip_comment(bytes: &[u8], i: usize) -> Option<usize> {
    match (bytes.get(i), bytes.get(i + 1)) {
        (Some(b'-'), Some(b'-')) => {
            let rest = &bytes[i..];
            Some(
                rest.iter()
                    .position(|&b| b == b'\n')
                    .map_or(bytes.len(), |p| i + p + 1),
            )
        }
        (Some(b'/'), Some(b'*')) => {
            let rest = &bytes[i + 2..];
            Some(
                rest.windows(2)
                    .position(|w| w == b"*/")
                    .map_or(bytes.len(), |p| i + 2 + p + 2),
            )
        }
        _ => None,
    }
}

fn skip_trivia(text: &str, start: usize) -> usize {
    let bytes = text.as_bytes();
    let mut i = start;
    while i < bytes.len() {
        if bytes[i].is_ascii_whitespace() {
            i += 1;
        } else if let Some(end) = skip_comment(bytes, i) {
            i = end;
        } else {
            break;
        }
    }
    i
}

fn read_word(text: &str, start: usize) -> (&str, usize) {
    let bytes = text.as_bytes();
    let mut end = start;
    while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
        end += 1;
    }
    (&text[start.min(end)..end], end)
}

fn skip_identifier(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    match bytes.get(start)? {
        q @ (b'"' | b'`') => Some(skip_quoted_string(text, start, *q)),
        _ => {
            let (word, end) = read_word(text, start);
            if word.is_empty() {
                None
            } else {
                Some(end)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_quoted_string_handles_doubled_quotes() {
        let sql = "'it''s' rest";
        assert_eq!(skip_quoted_string(sql, 0, b'\''), 7);
        assert_eq!(&sql[7..], " rest");
        assert_eq!(skip_quoted_string("'open", 0, b'\''), 5);
    }

    #[test]
    fn test_skip_parenthesized_section_ignores_parens_in_strings() {
        let sql = "(a, ')', (b)) tail";
        let end = skip_parenthesized_section(sql, 0);
        assert_eq!(&sql[end..], " tail");
        assert_eq!(skip_parenthesized_section("((x)", 0), 4);
    }

    #[test]
    fn test_trailing_semicolon_is_not_a_second_statement() {
        assert!(!has_additional_statements("SELECT 1;"));
        assert!(!has_additional_statements("SELECT 1;  \n"));
        assert!(!has_additional_statements("SELECT 1;;"));
        assert!(!has_additional_statements("SELECT 1; -- done"));
        assert!(has_additional_statements("SELECT 1; SELECT 2"));
        assert!(has_additional_statements("DELETE FROM t; DROP TABLE t;"));
    }

    #[test]
    fn test_semicolons_inside_literals_and_parens() {
        assert!(!has_additional_statements("SELECT ';' AS s"));
        assert!(!has_additional_statements("SELECT \"a;b\" FROM t"));
        assert!(!has_additional_statements("SELECT `x;` FROM t"));
        assert!(!has_additional_statements(
            "WITH x AS (SELECT 1; ) SELECT * FROM x"
        ));
        assert!(!has_additional_statements("SELECT 1 /* ; */"));
        assert!(!has_additional_statements("SELECT 'it''s; fine'"));
    }

    #[test]
    fn test_initial_keyword_simple() {
        assert_eq!(
            get_initial_statement_keyword("INSERT INTO t VALUES (1)").as_deref(),
            Some("insert")
        );
        assert_eq!(
            get_initial_statement_keyword("  -- hi\n select 1").as_deref(),
            Some("select")
        );
        assert_eq!(
            get_initial_statement_keyword("(SELECT 1) UNION (SELECT 2)").as_deref(),
            Some("select")
        );
        assert_eq!(get_initial_statement_keyword("   "), None);
    }

    #[test]
    fn test_initial_keyword_after_cte() {
        assert_eq!(
            get_initial_statement_keyword("WITH x AS (SELECT 1) SELECT * FROM x").as_deref(),
            Some("select")
        );
        assert_eq!(
            get_initial_statement_keyword(
                "with recursive t(n) as (select 1 union all select n + 1 from t where n < 5), \
                 u as materialized (select ')' from t) select * from u"
            )
            .as_deref(),
            Some("select")
        );
        assert_eq!(
            get_initial_statement_keyword(
                "WITH gone AS (SELECT id FROM t) DELETE FROM t WHERE id IN (SELECT id FROM gone)"
            )
            .as_deref(),
            Some("delete")
        );
        assert_eq!(
            get_initial_statement_keyword("WITH \"q\" AS NOT MATERIALIZED (SELECT 1) UPDATE t SET a = 1")
                .as_deref(),
            Some("update")
        );
    }

    #[test]
    fn test_malformed_cte_yields_none() {
        assert_eq!(get_initial_statement_keyword("WITH x AS (SELECT 1)"), None);
        assert_eq!(get_initial_statement_keyword("WITH x (SELECT 1) SELECT 1"), None);
        assert_eq!(get_initial_statement_keyword("WITH x AS (SELECT 1 SELECT 2"), None);
        assert_eq!(get_initial_statement_keyword("WITH"), None);
    }

    #[test]
    fn test_is_selectable_query() {
        assert!(is_selectable_query("SELECT * FROM users"));
        assert!(is_selectable_query("select * from users;"));
        assert!(is_selectable_query("WITH a AS (SELECT 1) SELECT * FROM a"));
        assert!(!is_selectable_query("SELECT 1; SELECT 2"));
        assert!(!is_selectable_query("UPDATE users SET a = 1"));
        assert!(!is_selectable_query("SELECTED"));
        assert!(!is_selectable_query("WITH a AS (SELECT 1) INSERT INTO b SELECT * FROM a"));
        assert!(!is_selectable_query(""));
    }

    #[test]
    fn test_strip_statement_terminator() {
        assert_eq!(strip_statement_terminator("SELECT 1 ; \n;"), "SELECT 1");
        assert_eq!(strip_statement_terminator("SELECT ';'"), "SELECT ';'");
        assert_eq!(strip_statement_terminator("SELECT 1; -- note"), "SELECT 1");
        assert_eq!(
            strip_statement_terminator("SELECT * FROM t; /* done */"),
            "SELECT * FROM t"
        );
        assert_eq!(
            strip_statement_terminator("SELECT a -- keep; this\nFROM t;"),
            "SELECT a -- keep; this\nFROM t"
        );
        assert_eq!(strip_statement_terminator("SELECT 1 -- tail"), "SELECT 1 -- tail");
    }

    #[test]
    fn test_deep_nesting_is_scanned_without_recursion() {
        let depth = 200_000;
        let nested = format!("{}1{}", "(".repeat(depth), ")".repeat(depth));

        let sql = format!("SELECT {}", nested);
        assert!(is_selectable_query(&sql));
        assert_eq!(skip_parenthesized_section(&sql, 7), sql.len());

        let wrapped = format!("{}SELECT 1{}", "(".repeat(depth), ")".repeat(depth));
        assert_eq!(get_initial_statement_keyword(&wrapped).as_deref(), Some("select"));

        let unclosed = format!("SELECT {}", "(".repeat(depth));
        assert!(is_selectable_query(&unclosed));
        assert_eq!(get_initial_statement_keyword(&unclosed[7..]), None);
    }
}
