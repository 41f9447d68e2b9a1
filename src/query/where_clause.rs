use std::cmp::Ordering;
use std::fmt;

use regex::Regex;

use crate::error::{AppError, AppResult};
use crate::index::{IndexRow, Value};

use super::parse::sql_like_to_regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhereOperator {
    Eq,
    Ne,
    Lt,
    Gt,
    Like,
}

impl WhereOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            WhereOperator::Eq => "=",
            WhereOperator::Ne => "!=",
            WhereOperator::Lt => "<",
            WhereOperator::Gt => ">",
            WhereOperator::Like => "LIKE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhereJoiner {
    And,
    Or,
}

#[derive(Debug, Clone)]
pub struct WhereStatement {
    pub field: String,
    pub op: WhereOperator,
    pub value: Value,
    /// Compiled once for LIKE statements.
    like: Option<Regex>,
}

impl WhereStatement {
    pub fn new(field: impl Into<String>, op: WhereOperator, value: Value) -> AppResult<Self> {
        let like = if op == WhereOperator::Like {
            let pat = match &value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let re = Regex::new(&sql_like_to_regex(&pat)).map_err(|e| {
                AppError::invalid_query("invalid_query".to_string(), format!("Failed to parse where clause: bad LIKE pattern '{}': {}", pat, e))
            })?;
            Some(re)
        } else {
            None
        };
        Ok(Self { field: field.into(), op, value, like })
    }

    /// Evaluate against a row. A missing column reads as null.
    pub fn matches(&self, row: &IndexRow) -> bool {
        let cell = row.get(&self.field).unwrap_or(&Value::Null);
        match self.op {
            WhereOperator::Like => match (cell, &self.like) {
                (Value::Null, _) | (_, None) => false,
                (Value::String(s), Some(re)) => re.is_match(s),
                (other, Some(re)) => re.is_match(&other.to_string()),
            },
            WhereOperator::Eq => cell.compare(&self.value) == Some(Ordering::Equal),
            WhereOperator::Ne => cell.compare(&self.value) != Some(Ordering::Equal),
            WhereOperator::Lt => cell.compare(&self.value) == Some(Ordering::Less),
            WhereOperator::Gt => cell.compare(&self.value) == Some(Ordering::Greater),
        }
    }
}

impl PartialEq for WhereStatement {
    fn eq(&self, other: &Self) -> bool {
        self.field == other.field && self.op == other.op && self.value == other.value
    }
}

impl fmt::Display for WhereStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Value::String(s) => write!(f, "{} {} \"{}\"", self.field, self.op.as_str(), s.replace('"', "\\\"")),
            other => write!(f, "{} {} {}", self.field, self.op.as_str(), other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhereExtension {
    pub joiner: WhereJoiner,
    pub statement: WhereStatement,
}

/// A primary statement plus ordered `(joiner, statement)` extensions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereClause {
    primary: Option<WhereStatement>,
    extensions: Vec<WhereExtension>,
}

impl WhereClause {
    pub fn new() -> Self { Self::default() }

    /// The first statement becomes the primary and its joiner is ignored.
    pub fn append_statement(&mut self, joiner: WhereJoiner, statement: WhereStatement) -> &mut Self {
        if self.primary.is_none() {
            self.primary = Some(statement);
        } else {
            self.extensions.push(WhereExtension { joiner, statement });
        }
        self
    }

    pub fn primary(&self) -> Option<&WhereStatement> { self.primary.as_ref() }

    pub fn extensions(&self) -> &[WhereExtension] { &self.extensions }

    pub fn is_empty(&self) -> bool { self.primary.is_none() }

    /// Left-to-right: `a OR b AND c` is `(a OR b) AND c`. An empty clause matches everything.
    pub fn matches(&self, row: &IndexRow) -> bool {
        let Some(primary) = self.primary.as_ref() else { return true };
        let mut acc = primary.matches(row);
        for ext in &self.extensions {
            acc = match ext.joiner {
                WhereJoiner::And => acc && ext.statement.matches(row),
                WhereJoiner::Or => acc || ext.statement.matches(row),
            };
        }
        acc
    }
}

impl fmt::Display for WhereClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(primary) = self.primary.as_ref() else { return Ok(()) };
        write!(f, "where {}", primary)?;
        for ext in &self.extensions {
            let j = match ext.joiner { WhereJoiner::And => "and", WhereJoiner::Or => "or" };
            write!(f, " {} {}", j, ext.statement)?;
        }
        Ok(())
    }
}
