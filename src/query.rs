//! Index query language.
//!
//! `SELECT [DISTINCT] col[, col...] [WHERE stmt [AND|OR stmt...]] [ORDER BY col[, col...] [ASC|DESC]] [LIMIT n]`
//!
//! WHERE statements are evaluated strictly left to right with no precedence
//! between AND and OR. ORDER BY columns must be part of the SELECT list, a
//! single trailing direction applies to the whole ORDER BY list, and LIMIT is
//! applied after sorting (a negative LIMIT returns every row).

use serde::Serialize;

use crate::index::Value;

pub mod where_clause;
pub mod parse;
pub mod exec;

pub use exec::execute;
pub use parse::{parse_query, parse_where, sql_like_to_regex};
pub use where_clause::{WhereClause, WhereExtension, WhereJoiner, WhereOperator, WhereStatement};

/// A parsed index query.
#[derive(Debug, Clone)]
pub struct IndexQuery {
    pub distinct: bool,
    pub select: Vec<String>,
    pub where_clause: Option<WhereClause>,
    pub order_by: Vec<String>,
    pub ascending: bool,
    pub limit: Option<i64>,
}

/// Ordered column names plus rows whose cells follow that order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableQueryResult {
    pub column_names: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl TableQueryResult {
    pub fn len(&self) -> usize { self.rows.len() }

    pub fn is_empty(&self) -> bool { self.rows.is_empty() }

    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let i = self.column_names.iter().position(|c| c == name)?;
        Some(self.rows.iter().filter_map(|r| r.get(i)).collect())
    }
}

#[cfg(test)]
#[path = "query_tests.rs"]
mod query_tests;
