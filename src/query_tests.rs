use super::*;
use crate::error::{AppError, AppResult};
use crate::index::IndexRow;

fn row(pairs: &[(&str, Value)]) -> IndexRow {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn work_orders() -> Vec<IndexRow> {
    [("u1", 0, 4, 5), ("u2", 0, 3, 10), ("u3", 4, 2, 10), ("u4", 5, 1, 12)]
        .into_iter()
        .map(|(u, p, s, e)| row(&[
            ("uri", Value::from(u)),
            ("priority", Value::Integer(p)),
            ("startTime", Value::Integer(s)),
            ("endTime", Value::Integer(e)),
        ]))
        .collect()
}

fn run(text: &str) -> AppResult<TableQueryResult> {
    let rows = work_orders();
    execute(&parse_query(text)?, rows.iter())
}


fn uris(r: &TableQueryResult) -> Vec<String> {
    r.column("uri").unwrap().into_iter().map(|v| v.to_string()).collect()
}

#[test]
fn select_keeps_column_order() {
    let r = run(r#"SELECT endTime, startTime, priority, uri WHERE uri="u1""#).unwrap();
    assert_eq!(r.column_names, vec!["endTime", "startTime", "priority", "uri"]);
    assert_eq!(r.rows, vec![vec![Value::Integer(5), Value::Integer(4), Value::Integer(0), Value::from("u1")]]);
}

#[test]
fn comparisons_coerce_string_literals() {
    assert_eq!(run(r#"SELECT uri WHERE priority > "0""#).unwrap().len(), 2);
    assert_eq!(run(r#"SELECT uri WHERE priority > "4""#).unwrap().len(), 1);
    assert_eq!(run(r#"SELECT uri WHERE priority < "4""#).unwrap().len(), 2);
    assert_eq!(run(r#"SELECT uri WHERE priority < 5"#).unwrap().len(), 3);
    assert_eq!(run(r#"SELECT uri WHERE priority != "4""#).unwrap().len(), 3);
    assert_eq!(run(r#"SELECT uri WHERE priority <> 0"#).unwrap().len(), 2);
    assert_eq!(run(r#"SELECT uri WHERE priority > "0" AND priority < "5""#).unwrap().len(), 1);
}

#[test]
fn where_is_strictly_left_to_right() {
    // (u1 OR u4) AND priority = 0 -> only u1; with precedence it would be u1 and u4
    let r = run(r#"SELECT uri WHERE uri = "u4" OR uri = "u1" AND priority = 0"#).unwrap();
    assert_eq!(uris(&r), vec!["u1"]);
    // (priority = 0 AND uri = u2) OR uri = u4
    let r = run(r#"SELECT uri WHERE priority = 0 AND uri = 'u2' OR uri = 'u4'"#).unwrap();
    assert_eq!(uris(&r), vec!["u2", "u4"]);
}

#[test]
fn like_patterns() {
    let r = run(r#"SELECT uri WHERE uri LIKE "u%""#).unwrap();
    assert_eq!(r.len(), 4);
    let r = run(r#"SELECT uri WHERE uri LIKE "_3""#).unwrap();
    assert_eq!(uris(&r), vec!["u3"]);
    let r = run(r#"SELECT uri WHERE uri LIKE "u.""#).unwrap();
    assert!(r.is_empty());
    assert_eq!(sql_like_to_regex("a%b_c.d"), "^a.*b.c\\.d$");
}

#[test]
fn order_by_directions() {
    let r = run(r#"SELECT uri, startTime, priority WHERE priority < "5" ORDER BY startTime"#).unwrap();
    assert_eq!(uris(&r), vec!["u3", "u2", "u1"]);
    let r = run(r#"SELECT uri, startTime, priority WHERE priority < "5" ORDER BY startTime ASC"#).unwrap();
    assert_eq!(uris(&r), vec!["u3", "u2", "u1"]);
    let r = run(r#"SELECT uri, startTime, priority WHERE priority < "5" ORDER BY startTime DESC"#).unwrap();
    assert_eq!(uris(&r), vec!["u1", "u2", "u3"]);
    // one trailing direction applies to the whole list
    let r = run(r#"SELECT uri, startTime, priority WHERE priority < "5" ORDER BY priority, startTime DESC"#).unwrap();
    assert_eq!(uris(&r), vec!["u3", "u1", "u2"]);
}

#[test]
fn numeric_order_is_strict_and_strings_are_lexical() {
    let rows: Vec<IndexRow> = [10, 9, 100, 2]
        .into_iter()
        .map(|n| row(&[("n", Value::Integer(n)), ("s", Value::String(n.to_string()))]))
        .collect();
    let asc = execute(&parse_query("SELECT n ORDER BY n").unwrap(), rows.iter()).unwrap();
    let ns: Vec<i64> = asc.rows.iter().map(|r| match r[0] { Value::Integer(i) => i, _ => -1 }).collect();
    assert!(ns.windows(2).all(|w| w[0] < w[1]));
    let desc = execute(&parse_query("SELECT n ORDER BY n DESC").unwrap(), rows.iter()).unwrap();
    let ns: Vec<i64> = desc.rows.iter().map(|r| match r[0] { Value::Integer(i) => i, _ => -1 }).collect();
    assert!(ns.windows(2).all(|w| w[0] > w[1]));
    let lex = execute(&parse_query("SELECT s ORDER BY s").unwrap(), rows.iter()).unwrap();
    let ss: Vec<String> = lex.rows.iter().map(|r| r[0].to_string()).collect();
    assert_eq!(ss, vec!["10", "100", "2", "9"]);
}

#[test]
fn limit_after_sort() {
    let r = run(r#"SELECT uri, startTime WHERE priority < "5" ORDER BY startTime LIMIT 1"#).unwrap();
    assert_eq!(uris(&r), vec!["u3"]);
    assert_eq!(run("SELECT uri LIMIT 2").unwrap().len(), 2);
    assert_eq!(run("SELECT uri LIMIT -1").unwrap().len(), 4);
    assert_eq!(run("SELECT uri LIMIT 0").unwrap().len(), 0);
    assert!(run("SELECT uri LIMIT many").is_err());
}

#[test]
fn distinct_projection() {
    let r = run("SELECT DISTINCT priority ORDER BY priority").unwrap();
    assert_eq!(r.rows, vec![vec![Value::Integer(0)], vec![Value::Integer(4)], vec![Value::Integer(5)]]);
}

#[test]
fn order_by_outside_select_is_invalid() {
    let err = run("SELECT a WHERE x<5 ORDER BY y").unwrap_err();
    assert!(matches!(err, AppError::InvalidQuery { .. }));
    assert!(err.message().contains("Invalid query"));
    let err = run(r#"SELECT uri, priority WHERE priority < "5" ORDER BY startTime DESC"#).unwrap_err();
    assert!(err.message().contains("Invalid query"));
}

#[test]
fn malformed_where_reports_parse_failure() {
    let err = parse_where("id*43").unwrap_err();
    assert!(err.to_string().contains("Failed to parse where clause"));
    let err = run("SELECT id WHERE id*43").unwrap_err();
    assert!(err.message().contains("Failed to parse where clause"));
    // a bad WHERE is reported even when ORDER BY is also wrong
    let err = run("SELECT id WHERE id*43 ORDER BY missing").unwrap_err();
    assert!(err.message().contains("Failed to parse where clause"), "{}", err);
    for bad in ["", "id =", "= 4", "id = 4 AND", "id = 4 name = 5", "id = 'open"] {
        assert!(parse_where(bad).is_err(), "{:?} should not parse", bad);
    }
}

#[test]
fn keywords_inside_strings_are_not_clause_boundaries() {
    let q = parse_query(r#"SELECT uri WHERE uri = "a ORDER BY b LIMIT 3""#).unwrap();
    assert!(q.order_by.is_empty());
    assert_eq!(q.limit, None);
    let w = q.where_clause.unwrap();
    assert_eq!(w.primary().unwrap().value, Value::from("a ORDER BY b LIMIT 3"));
}

#[test]
fn first_joiner_is_ignored() {
    let mut w = WhereClause::new();
    w.append_statement(WhereJoiner::Or, WhereStatement::new("a", WhereOperator::Eq, Value::Integer(1)).unwrap());
    w.append_statement(WhereJoiner::And, WhereStatement::new("b", WhereOperator::Eq, Value::Integer(2)).unwrap());
    assert_eq!(w.extensions().len(), 1);
    assert!(!w.matches(&row(&[("a", Value::Integer(7)), ("b", Value::Integer(2))])));
    assert!(w.matches(&row(&[("a", Value::Integer(1)), ("b", Value::Integer(2))])));
    assert_eq!(w.to_string(), "where a = 1 and b = 2");
}

#[test]
fn missing_and_null_cells() {
    let w = parse_where("gone = 1 OR gone != 1").unwrap();
    assert!(w.matches(&IndexRow::new()));
    let w = parse_where("gone LIKE '%'").unwrap();
    assert!(!w.matches(&IndexRow::new()));
}
