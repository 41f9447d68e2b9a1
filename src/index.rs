//! Secondary index: typed values, index definitions, rows and the in-memory index handler.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value as JsonValue;

use crate::error::{AppError, AppResult};
use crate::query::{self, TableQueryResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Integer,
    Double,
    Boolean,
    Timestamp,
}

impl FromStr for ColumnType {
    type Err = AppError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "string" | "text" => Ok(ColumnType::String),
            "integer" | "int" | "long" => Ok(ColumnType::Integer),
            "double" | "float" | "number" => Ok(ColumnType::Double),
            "boolean" | "bool" => Ok(ColumnType::Boolean),
            "timestamp" | "date" => Ok(ColumnType::Timestamp),
            other => Err(AppError::user("invalid_column_type".to_string(), format!("Unknown column type '{}'", other))),
        }
    }
}

impl ColumnType {
    /// Convert a JSON value to this column's type. Values that do not convert become `Null`.
    pub fn coerce(&self, v: &JsonValue) -> Value {
        match (self, v) {
            (_, JsonValue::Null) => Value::Null,
            (ColumnType::String, JsonValue::String(s)) => Value::String(s.clone()),
            (ColumnType::String, other) => Value::String(other.to_string()),
            (ColumnType::Integer, JsonValue::Number(n)) => n.as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .map(Value::Integer)
                .unwrap_or(Value::Null),
            (ColumnType::Double, JsonValue::Number(n)) => n.as_f64().map(Value::Double).unwrap_or(Value::Null),
            (ColumnType::Boolean, JsonValue::Bool(b)) => Value::Boolean(*b),
            (ColumnType::Timestamp, JsonValue::Number(n)) => n.as_i64().map(Value::Timestamp).unwrap_or(Value::Null),
            (_, JsonValue::String(s)) => self.coerce_str(s),
            _ => Value::Null,
        }
    }

    pub fn coerce_str(&self, s: &str) -> Value {
        let t = s.trim();
        match self {
            ColumnType::String => Value::String(s.to_string()),
            ColumnType::Integer => t.parse::<i64>().map(Value::Integer).unwrap_or(Value::Null),
            ColumnType::Double => t.parse::<f64>().map(Value::Double).unwrap_or(Value::Null),
            ColumnType::Boolean => match t.to_ascii_lowercase().as_str() {
                "true" => Value::Boolean(true),
                "false" => Value::Boolean(false),
                _ => Value::Null,
            },
            ColumnType::Timestamp => parse_timestamp_ms(t).map(Value::Timestamp).unwrap_or(Value::Null),
        }
    }
}

/// Milliseconds since the epoch from either a number or an RFC 3339 date.
pub fn parse_timestamp_ms(s: &str) -> Option<i64> {
    if let Ok(ms) = s.parse::<i64>() { return Some(ms); }
    chrono::DateTime::parse_from_rfc3339(s).ok().map(|d| d.timestamp_millis())
}

/// A typed index cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    String(String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
    /// Milliseconds since the epoch.
    Timestamp(i64),
}

impl Value {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) | Value::Timestamp(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) | Value::Double(_) | Value::Timestamp(_) => 2,
            Value::String(_) => 3,
        }
    }

    /// Type-aware comparison; `None` when the two values cannot be compared.
    /// A string literal compared with a number (or a timestamp) is read as one.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), Value::String(s)) => s.trim().parse::<bool>().ok().map(|b| a.cmp(&b)),
            (Value::String(s), Value::Boolean(b)) => s.trim().parse::<bool>().ok().map(|a| a.cmp(b)),
            (Value::Integer(a), Value::Integer(b))
            | (Value::Timestamp(a), Value::Timestamp(b))
            | (Value::Integer(a), Value::Timestamp(b))
            | (Value::Timestamp(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::String(s)) => parse_timestamp_ms(s.trim()).map(|b| a.cmp(&b)),
            (Value::String(s), Value::Timestamp(b)) => parse_timestamp_ms(s.trim()).map(|a| a.cmp(b)),
            (a, b) => {
                let (x, y) = (a.as_f64()?, b.as_f64()?);
                x.partial_cmp(&y)
            }
        }
    }

    /// Total order used for sorting: nulls first, then values by `compare`, incomparable values by type.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match self.compare(other) {
            Some(o) => o,
            None => self.type_rank().cmp(&other.type_rank()),
        }
    }

    pub fn is_null(&self) -> bool { matches!(self, Value::Null) }

    pub fn from_json(v: &JsonValue) -> Value {
        match v {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Boolean(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => n.as_f64().map(Value::Double).unwrap_or(Value::Null),
            },
            JsonValue::String(s) => Value::String(s.clone()),
            other => Value::String(other.to_string()),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Integer(i) | Value::Timestamp(i) => JsonValue::from(*i),
            Value::Double(d) => serde_json::Number::from_f64(*d).map(JsonValue::Number).unwrap_or(JsonValue::Null),
            Value::Boolean(b) => JsonValue::Bool(*b),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::String(s) => f.write_str(s),
            Value::Integer(i) | Value::Timestamp(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{}", d),
            Value::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for Value { fn from(s: &str) -> Self { Value::String(s.to_string()) } }
impl From<String> for Value { fn from(s: String) -> Self { Value::String(s) } }
impl From<i64> for Value { fn from(i: i64) -> Self { Value::Integer(i) } }
impl From<f64> for Value { fn from(d: f64) -> Self { Value::Double(d) } }
impl From<bool> for Value { fn from(b: bool) -> Self { Value::Boolean(b) } }

/// Column name -> value for one indexed document.
pub type IndexRow = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSource {
    /// `$N`: the N-th segment of the document path, counting from 0.
    Segment(usize),
    /// Dotted path into the JSON content.
    Json(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexField {
    pub name: String,
    pub source: FieldSource,
    pub column_type: ColumnType,
}

impl IndexField {
    pub fn extract(&self, doc_path: &str, content: Option<&JsonValue>) -> Value {
        match &self.source {
            FieldSource::Segment(n) => match doc_path.split('/').nth(*n) {
                Some(seg) => self.column_type.coerce_str(seg),
                None => Value::Null,
            },
            FieldSource::Json(parts) => {
                let Some(mut cur) = content else { return Value::Null };
                for p in parts {
                    match cur.get(p.as_str()) {
                        Some(next) => cur = next,
                        None => return Value::Null,
                    }
                }
                self.column_type.coerce(cur)
            }
        }
    }
}

static FIELD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*([A-Za-z_][A-Za-z0-9_]*)\s*\(\s*([^()]*?)\s*\)\s*(?:as\s+([A-Za-z]+))?\s*$")
        .expect("index field pattern")
});

/// Index layout parsed from `name(source) as type, ...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    pub fields: Vec<IndexField>,
}

impl IndexDefinition {
    pub fn parse(text: &str) -> AppResult<Self> {
        let mut fields = Vec::new();
        for part in text.split(',').map(|p| p.trim()).filter(|p| !p.is_empty()) {
            let caps = FIELD_RE.captures(part).ok_or_else(|| {
                AppError::user("invalid_index".to_string(), format!("Invalid index field '{}'", part))
            })?;
            let name = caps[1].to_string();
            let src = caps[2].trim();
            let source = if let Some(n) = src.strip_prefix('$') {
                let n = n.parse::<usize>().map_err(|_| {
                    AppError::user("invalid_index".to_string(), format!("Invalid segment reference '{}'", src))
                })?;
                FieldSource::Segment(n)
            } else if src.is_empty() {
                FieldSource::Json(vec![name.clone()])
            } else {
                FieldSource::Json(src.split('.').map(|s| s.to_string()).collect())
            };
            let column_type = match caps.get(3) {
                Some(t) => t.as_str().parse::<ColumnType>()?,
                None => ColumnType::String,
            };
            if fields.iter().any(|f: &IndexField| f.name == name) {
                return Err(AppError::user("invalid_index".to_string(), format!("Duplicate index field '{}'", name)));
            }
            fields.push(IndexField { name, source, column_type });
        }
        if fields.is_empty() {
            return Err(AppError::user("invalid_index".to_string(), "Index definition has no fields".to_string()));
        }
        Ok(Self { fields })
    }

    pub fn column_names(&self) -> Vec<String> { self.fields.iter().map(|f| f.name.clone()).collect() }

    /// Extract one row. Content that is not JSON still yields the path-derived columns.
    pub fn extract_row(&self, doc_path: &str, content: &str) -> IndexRow {
        let json = serde_json::from_str::<JsonValue>(content).ok();
        self.fields
            .iter()
            .map(|f| (f.name.clone(), f.extract(doc_path, json.as_ref())))
            .collect()
    }
}

/// Storage of index rows keyed by document path, queried with the WHERE language.
pub trait IndexHandler: Send + Sync {
    fn update_row(&self, key: &str, row: IndexRow) -> AppResult<()>;
    fn delete_row(&self, key: &str) -> AppResult<bool>;
    /// Rows in first-insertion order.
    fn rows(&self) -> AppResult<Vec<(String, IndexRow)>>;
    fn drop_index(&self) -> AppResult<()>;

    fn query(&self, text: &str) -> AppResult<TableQueryResult> {
        let q = query::parse_query(text)?;
        let rows = self.rows()?;
        query::execute(&q, rows.iter().map(|(_, r)| r))
    }
}

#[derive(Default)]
struct IndexRows {
    next_seq: u64,
    /// key -> (insertion sequence, row)
    by_key: HashMap<String, (u64, IndexRow)>,
    /// insertion sequence -> key
    order: BTreeMap<u64, String>,
}

/// In-process index. Rows keep the position of their first insertion across updates.
#[derive(Default)]
pub struct MemoryIndex {
    inner: RwLock<IndexRows>,
}

impl MemoryIndex {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.inner.read().by_key.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn get(&self, key: &str) -> Option<IndexRow> { self.inner.read().by_key.get(key).map(|(_, r)| r.clone()) }
}

impl IndexHandler for MemoryIndex {
    fn update_row(&self, key: &str, row: IndexRow) -> AppResult<()> {
        let mut w = self.inner.write();
        if let Some(entry) = w.by_key.get_mut(key) {
            entry.1 = row;
            return Ok(());
        }
        let seq = w.next_seq;
        w.next_seq += 1;
        w.order.insert(seq, key.to_string());
        w.by_key.insert(key.to_string(), (seq, row));
        Ok(())
    }

    fn delete_row(&self, key: &str) -> AppResult<bool> {
        let mut w = self.inner.write();
        match w.by_key.remove(key) {
            Some((seq, _)) => {
                w.order.remove(&seq);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn rows(&self) -> AppResult<Vec<(String, IndexRow)>> {
        let r = self.inner.read();
        Ok(r.order
            .values()
            .filter_map(|k| r.by_key.get(k).map(|(_, row)| (k.clone(), row.clone())))
            .collect())
    }

    fn drop_index(&self) -> AppResult<()> {
        *self.inner.write() = IndexRows::default();
        Ok(())
    }
}

#[cfg(test)]
#[path = "index_tests.rs"]
mod index_tests;
