use crate::error::{AppError, AppResult};
use crate::index::Value;

use super::where_clause::{WhereClause, WhereJoiner, WhereOperator, WhereStatement};
use super::IndexQuery;

fn invalid(msg: impl Into<String>) -> AppError {
    AppError::invalid_query("invalid_query".to_string(), format!("Invalid query: {}", msg.into()))
}

fn where_error(msg: impl Into<String>) -> AppError {
    AppError::invalid_query("invalid_where".to_string(), format!("Failed to parse where clause: {}", msg.into()))
}

/// Convert a SQL LIKE pattern to a regex anchored at both ends.
/// `%` -> `.*`, `_` -> `.`; other regex metacharacters are escaped.
pub fn sql_like_to_regex(pat: &str) -> String {
    let mut out = String::from("^");
    for c in pat.chars() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            '.' | '+' | '*' | '?' | '(' | ')' | '|' | '{' | '}' | '[' | ']' | '^' | '$' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out.push('$');
    out
}

/// Uppercased copy of `s` with quoted sections blanked, same byte length as `s`,
/// so keyword positions found in the shadow index straight into the input text.
fn keyword_shadow(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut quote: Option<char> = None;
    for ch in s.chars() {
        match quote {
            Some(q) => {
                if ch == q { quote = None; }
                for _ in 0..ch.len_utf8() { out.push(' '); }
            }
            None => {
                if ch == '\'' || ch == '"' { quote = Some(ch); }
                match ch {
                    '\n' | '\r' | '\t' => out.push(' '),
                    c if c.is_ascii() => out.push(c.to_ascii_uppercase()),
                    c => for _ in 0..c.len_utf8() { out.push('_'); },
                }
            }
        }
    }
    out
}

/// Byte offset of `kw` as a whole word in the shadow, searching from `from`.
fn find_keyword(shadow: &str, kw: &str, from: usize) -> Option<usize> {
    let bytes = shadow.as_bytes();
    let mut start = from;
    while let Some(rel) = shadow.get(start..)?.find(kw) {
        let i = start + rel;
        let before_ok = i == 0 || !is_word_byte(bytes[i - 1]);
        let after = i + kw.len();
        let after_ok = after >= bytes.len() || !is_word_byte(bytes[after]);
        if before_ok && after_ok { return Some(i); }
        start = i + 1;
    }
    None
}

fn is_word_byte(b: u8) -> bool { b.is_ascii_alphanumeric() || b == b'_' }

fn find_order_by(shadow: &str, from: usize) -> Option<(usize, usize)> {
    let mut start = from;
    while let Some(i) = find_keyword(shadow, "ORDER", start) {
        let rest = &shadow[i + 5..];
        let trimmed = rest.trim_start();
        if trimmed.starts_with("BY") && trimmed[2..].chars().next().map(|c| !c.is_ascii_alphanumeric() && c != '_').unwrap_or(true) {
            let end = i + 5 + (rest.len() - trimmed.len()) + 2;
            return Some((i, end));
        }
        start = i + 5;
    }
    None
}

/// Parse a full index query.
pub fn parse_query(text: &str) -> AppResult<IndexQuery> {
    let text = text.trim().trim_end_matches(';').trim();
    let shadow = keyword_shadow(text);
    if find_keyword(&shadow, "SELECT", 0) != Some(0) {
        return Err(invalid(format!("expected SELECT at start of '{}'", text)));
    }
    let cursor = "SELECT".len();

    let where_pos = find_keyword(&shadow, "WHERE", cursor);
    let order_pos = find_order_by(&shadow, cursor);
    let limit_pos = find_keyword(&shadow, "LIMIT", cursor);

    // Clause boundaries, in the order they must appear
    let select_end = [where_pos, order_pos.map(|p| p.0), limit_pos].into_iter().flatten().min().unwrap_or(text.len());
    if let (Some(w), Some((o, _))) = (where_pos, order_pos) {
        if o < w { return Err(invalid("WHERE must come before ORDER BY")); }
    }
    if let (Some(l), Some((o, _))) = (limit_pos, order_pos) {
        if l < o { return Err(invalid("LIMIT must come after ORDER BY")); }
    }
    if let (Some(l), Some(w)) = (limit_pos, where_pos) {
        if l < w { return Err(invalid("LIMIT must come after WHERE")); }
    }

    let mut select_text = text[cursor..select_end].trim();
    let mut distinct = false;
    let select_shadow = keyword_shadow(select_text);
    if find_keyword(&select_shadow, "DISTINCT", 0) == Some(0) {
        distinct = true;
        select_text = select_text[8..].trim();
    }
    let select: Vec<String> = select_text.split(',').map(|c| c.trim().to_string()).collect();
    if select.iter().any(|c| c.is_empty()) {
        return Err(invalid("empty column in SELECT list"));
    }
    if let Some(bad) = select.iter().find(|c| !is_identifier(c)) {
        return Err(invalid(format!("bad column name '{}' in SELECT list", bad)));
    }

    // WHERE is parsed before the ORDER BY list is checked against SELECT
    let where_clause = match where_pos {
        Some(w) => {
            let end = [order_pos.map(|p| p.0), limit_pos].into_iter().flatten().filter(|p| *p > w).min().unwrap_or(text.len());
            Some(parse_where(text[w + 5..end].trim())?)
        }
        None => None,
    };

    let mut order_by: Vec<String> = Vec::new();
    let mut ascending = true;
    if let Some((o, body)) = order_pos {
        let end = limit_pos.filter(|l| *l > o).unwrap_or(text.len());
        let mut items: Vec<String> = text[body..end].split(',').map(|c| c.trim().to_string()).collect();
        if let Some(last) = items.last_mut() {
            let mut parts: Vec<&str> = last.split_whitespace().collect();
            if parts.len() == 2 {
                match parts[1].to_ascii_uppercase().as_str() {
                    "ASC" => { ascending = true; parts.pop(); }
                    "DESC" => { ascending = false; parts.pop(); }
                    other => return Err(invalid(format!("unexpected '{}' in ORDER BY", other))),
                }
                *last = parts[0].to_string();
            }
        }
        if items.iter().any(|c| !is_identifier(c)) {
            return Err(invalid(format!("bad ORDER BY list '{}'", text[body..end].trim())));
        }
        for col in &items {
            if !select.contains(col) {
                return Err(invalid(format!("ORDER BY column '{}' must appear in the SELECT list", col)));
            }
        }
        order_by = items;
    }

    let mut limit = None;
    if let Some(l) = limit_pos {
        let n = text[l + 5..].trim();
        limit = Some(n.parse::<i64>().map_err(|_| invalid(format!("LIMIT expects a number, got '{}'", n)))?);
    }

    Ok(IndexQuery { distinct, select, where_clause, order_by, ascending, limit })
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '.')
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(String),
    Op(WhereOperator),
    And,
    Or,
}

fn lex_where(text: &str) -> AppResult<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() { i += 1; continue; }
        match c {
            '\'' | '"' => {
                let q = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(where_error(format!("unterminated string in '{}'", text))),
                        Some('\\') if chars.get(i + 1) == Some(&q) => { s.push(q); i += 2; }
                        Some(ch) if *ch == q => {
                            // doubled quote is an escaped quote
                            if chars.get(i + 1) == Some(&q) { s.push(q); i += 2; } else { i += 1; break; }
                        }
                        Some(ch) => { s.push(*ch); i += 1; }
                    }
                }
                out.push(Token::Str(s));
            }
            '=' => {
                i += if chars.get(i + 1) == Some(&'=') { 2 } else { 1 };
                out.push(Token::Op(WhereOperator::Eq));
            }
            '!' if chars.get(i + 1) == Some(&'=') => { out.push(Token::Op(WhereOperator::Ne)); i += 2; }
            '<' if chars.get(i + 1) == Some(&'>') => { out.push(Token::Op(WhereOperator::Ne)); i += 2; }
            '<' => { out.push(Token::Op(WhereOperator::Lt)); i += 1; }
            '>' => { out.push(Token::Op(WhereOperator::Gt)); i += 1; }
            c if c.is_ascii_digit() || ((c == '-' || c == '+') && chars.get(i + 1).map(|d| d.is_ascii_digit()).unwrap_or(false)) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.' || chars[i] == 'e' || chars[i] == 'E') {
                    i += 1;
                }
                out.push(Token::Num(chars[start..i].iter().collect()));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.to_ascii_uppercase().as_str() {
                    "AND" => out.push(Token::And),
                    "OR" => out.push(Token::Or),
                    "LIKE" => out.push(Token::Op(WhereOperator::Like)),
                    _ => out.push(Token::Ident(word)),
                }
            }
            other => return Err(where_error(format!("unexpected character '{}' in '{}'", other, text))),
        }
    }
    Ok(out)
}

fn literal_value(tok: &Token) -> Option<Value> {
    match tok {
        Token::Str(s) => Some(Value::String(s.clone())),
        Token::Num(n) => match n.parse::<i64>() {
            Ok(i) => Some(Value::Integer(i)),
            Err(_) => n.parse::<f64>().ok().map(Value::Double),
        },
        Token::Ident(w) if w.eq_ignore_ascii_case("true") => Some(Value::Boolean(true)),
        Token::Ident(w) if w.eq_ignore_ascii_case("false") => Some(Value::Boolean(false)),
        Token::Ident(w) if w.eq_ignore_ascii_case("null") => Some(Value::Null),
        _ => None,
    }
}

/// Parse the body of a WHERE clause (without the `WHERE` keyword).
pub fn parse_where(text: &str) -> AppResult<WhereClause> {
    let tokens = lex_where(text)?;
    if tokens.is_empty() {
        return Err(where_error("empty where clause"));
    }
    let mut clause = WhereClause::new();
    let mut i = 0;
    let mut joiner = WhereJoiner::And;
    loop {
        let field = match tokens.get(i) {
            Some(Token::Ident(f)) => f.clone(),
            other => return Err(where_error(format!("expected a column name at position {} in '{}', got {:?}", i, text, other))),
        };
        let op = match tokens.get(i + 1) {
            Some(Token::Op(op)) => *op,
            other => return Err(where_error(format!("expected an operator after '{}' in '{}', got {:?}", field, text, other))),
        };
        let value = match tokens.get(i + 2).and_then(literal_value) {
            Some(v) => v,
            None => return Err(where_error(format!("expected a value after '{} {}' in '{}'", field, op.as_str(), text))),
        };
        let stmt = WhereStatement::new(field, op, value)?;
        clause.append_statement(joiner, stmt);
        i += 3;
        match tokens.get(i) {
            None => break,
            Some(Token::And) => joiner = WhereJoiner::And,
            Some(Token::Or) => joiner = WhereJoiner::Or,
            Some(other) => return Err(where_error(format!("expected AND or OR in '{}', got {:?}", text, other))),
        }
        i += 1;
        if i >= tokens.len() {
            return Err(where_error(format!("dangling joiner at end of '{}'", text)));
        }
    }
    Ok(clause)
}
