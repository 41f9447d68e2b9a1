//! Small typed row tables stored on a driver.
//!
//! Each table keeps its schema under `schema/<table>` and one JSON document per
//! row under `rows/<table>/<seq>`, where `seq` is a zero-padded insertion
//! counter so key order is insertion order. Filters use the WHERE language of
//! the index engine, with cells typed by the column definitions.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::driver::Driver;
use crate::error::{AppError, AppResult};
use crate::index::{ColumnType, IndexRow, Value};
use crate::query::{parse_where, WhereClause};

pub type Row = Map<String, JsonValue>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self { Self { name: name.into(), column_type } }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: String,
}

impl TableSchema {
    fn column(&self, name: &str) -> Option<&ColumnDef> { self.columns.iter().find(|c| c.name == name) }

    fn typed(&self, row: &Row) -> IndexRow {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), row.get(&c.name).map(|v| c.column_type.coerce(v)).unwrap_or(Value::Null)))
            .collect()
    }

    fn pk_of(&self, row: &Row) -> AppResult<String> {
        match row.get(&self.primary_key) {
            Some(JsonValue::Null) | None => Err(AppError::user(
                "missing_primary_key".to_string(),
                format!("Row for table {} has no value for primary key {}", self.name, self.primary_key),
            )),
            Some(JsonValue::String(s)) => Ok(s.clone()),
            Some(other) => Ok(other.to_string()),
        }
    }

    fn check_columns(&self, row: &Row) -> AppResult<()> {
        for k in row.keys() {
            if self.column(k).is_none() {
                return Err(AppError::user("unknown_column".to_string(), format!("Table {} has no column {}", self.name, k)));
            }
        }
        Ok(())
    }
}

struct Table {
    schema: TableSchema,
    next_seq: u64,
    rows: BTreeMap<u64, Row>,
    /// primary key -> seq
    by_pk: HashMap<String, u64>,
}

fn schema_key(table: &str) -> String { format!("schema/{}", table) }
fn rows_prefix(table: &str) -> String { format!("rows/{}", table) }
fn row_key(table: &str, seq: u64) -> String { format!("rows/{}/{:020}", table, seq) }

pub struct TableStore {
    driver: Arc<dyn Driver>,
    tables: RwLock<HashMap<String, Arc<RwLock<Table>>>>,
}

impl TableStore {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self { driver, tables: RwLock::new(HashMap::new()) }
    }

    fn check_name(name: &str) -> AppResult<()> {
        if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
            return Err(AppError::user("invalid_table".to_string(), format!("Invalid table name '{}'", name)));
        }
        Ok(())
    }

    fn missing(name: &str) -> AppError {
        AppError::not_found("table_not_found".to_string(), format!("Table {} does not exist", name))
    }

    /// Loaded table, reading schema and rows from the driver on first use.
    fn table(&self, name: &str) -> AppResult<Arc<RwLock<Table>>> {
        if let Some(t) = self.tables.read().get(name).cloned() { return Ok(t); }
        let Some(raw) = self.driver.get(&schema_key(name))? else { return Err(Self::missing(name)) };
        let schema: TableSchema = serde_json::from_str(&raw).map_err(|e| AppError::decode_failed("TableSchema", &raw, e))?;
        let mut rows = BTreeMap::new();
        let mut by_pk = HashMap::new();
        let mut next_seq = 0;
        let prefix = format!("{}/", rows_prefix(name));
        for item in self.driver.scan_keys(&prefix)? {
            let (k, v) = item?;
            let Ok(seq) = k[prefix.len()..].parse::<u64>() else { continue };
            let row: Row = serde_json::from_str(&v).map_err(|e| AppError::decode_failed("Row", &v, e))?;
            by_pk.insert(schema.pk_of(&row)?, seq);
            rows.insert(seq, row);
            next_seq = next_seq.max(seq + 1);
        }
        let t = Arc::new(RwLock::new(Table { schema, next_seq, rows, by_pk }));
        self.tables.write().insert(name.to_string(), t.clone());
        Ok(t)
    }

    pub fn table_exists(&self, name: &str) -> AppResult<bool> {
        if self.tables.read().contains_key(name) { return Ok(true); }
        self.driver.contains_key(&schema_key(name))
    }

    pub fn schema(&self, name: &str) -> AppResult<TableSchema> {
        Ok(self.table(name)?.read().schema.clone())
    }

    pub fn create_table(&self, name: &str, columns: Vec<ColumnDef>, primary_key: &str) -> AppResult<()> {
        Self::check_name(name)?;
        if !columns.iter().any(|c| c.name == primary_key) {
            return Err(AppError::user("invalid_table".to_string(), format!("Primary key {} is not a column of {}", primary_key, name)));
        }
        let schema = TableSchema { name: name.to_string(), columns, primary_key: primary_key.to_string() };
        let json = serde_json::to_string(&schema)?;
        if !self.driver.put_if_absent(&schema_key(name), &json)? {
            return Err(AppError::conflict("table_exists".to_string(), format!("Table {} already exists", name)));
        }
        self.tables.write().insert(
            name.to_string(),
            Arc::new(RwLock::new(Table { schema, next_seq: 0, rows: BTreeMap::new(), by_pk: HashMap::new() })),
        );
        debug!(target: "docrepo::repo", "created table '{}'", name);
        Ok(())
    }

    pub fn drop_table(&self, name: &str) -> AppResult<()> {
        if !self.table_exists(name)? { return Err(Self::missing(name)); }
        let keys = self.driver.get_all_sub_keys(&rows_prefix(name))?;
        self.driver.delete_keys(&keys)?;
        self.driver.delete(&schema_key(name))?;
        self.tables.write().remove(name);
        debug!(target: "docrepo::repo", "dropped table '{}' ({} rows)", name, keys.len());
        Ok(())
    }

    pub fn insert_row(&self, name: &str, row: Row) -> AppResult<()> {
        self.insert_rows(name, vec![row]).map(|_| ())
    }

    /// All rows are validated before any is written; a duplicate primary key rejects the whole batch.
    pub fn insert_rows(&self, name: &str, rows: Vec<Row>) -> AppResult<usize> {
        let t = self.table(name)?;
        let mut t = t.write();
        let mut batch_pks: Vec<String> = Vec::with_capacity(rows.len());
        for row in &rows {
            t.schema.check_columns(row)?;
            let pk = t.schema.pk_of(row)?;
            if t.by_pk.contains_key(&pk) || batch_pks.contains(&pk) {
                return Err(AppError::conflict("duplicate_key".to_string(), format!("Duplicate primary key {} in table {}", pk, name)));
            }
            batch_pks.push(pk);
        }
        let n = rows.len();
        for (row, pk) in rows.into_iter().zip(batch_pks) {
            let seq = t.next_seq;
            self.driver.put(&row_key(name, seq), &serde_json::to_string(&row)?)?;
            t.next_seq += 1;
            t.by_pk.insert(pk, seq);
            t.rows.insert(seq, row);
        }
        Ok(n)
    }

    fn filter(where_text: Option<&str>) -> AppResult<Option<WhereClause>> {
        match where_text.map(str::trim).filter(|w| !w.is_empty()) {
            Some(w) => Ok(Some(parse_where(w)?)),
            None => Ok(None),
        }
    }

    /// Apply `values` to every row matching `where_text`; returns the number of rows changed.
    /// Primary keys are checked for the whole batch first, so a conflict leaves every row untouched.
    pub fn update_rows(&self, name: &str, values: &Row, where_text: Option<&str>) -> AppResult<usize> {
        let clause = Self::filter(where_text)?;
        let t = self.table(name)?;
        let mut t = t.write();
        t.schema.check_columns(values)?;
        let mut planned: Vec<(u64, String, String, Row)> = Vec::new();
        for (seq, old) in t.rows.iter() {
            if !clause.as_ref().map(|c| c.matches(&t.schema.typed(old))).unwrap_or(true) { continue; }
            let mut updated = old.clone();
            for (k, v) in values { updated.insert(k.clone(), v.clone()); }
            planned.push((*seq, t.schema.pk_of(old)?, t.schema.pk_of(&updated)?, updated));
        }

        {
            let mut keys: HashMap<&str, u64> = t.by_pk.iter().map(|(pk, seq)| (pk.as_str(), *seq)).collect();
            for (_, old_pk, _, _) in &planned { keys.remove(old_pk.as_str()); }
            for (seq, _, new_pk, _) in &planned {
                if keys.insert(new_pk.as_str(), *seq).is_some() {
                    return Err(AppError::conflict("duplicate_key".to_string(), format!("Duplicate primary key {} in table {}", new_pk, name)));
                }
            }
        }

        let changed = planned.len();
        for (seq, old_pk, new_pk, updated) in planned {
            self.driver.put(&row_key(name, seq), &serde_json::to_string(&updated)?)?;
            t.by_pk.remove(&old_pk);
            t.by_pk.insert(new_pk, seq);
            t.rows.insert(seq, updated);
        }
        Ok(changed)
    }

    pub fn delete_rows(&self, name: &str, where_text: Option<&str>) -> AppResult<usize> {
        let clause = Self::filter(where_text)?;
        let t = self.table(name)?;
        let mut t = t.write();
        let targets: Vec<u64> = t.rows.iter()
            .filter(|(_, r)| clause.as_ref().map(|c| c.matches(&t.schema.typed(r))).unwrap_or(true))
            .map(|(s, _)| *s)
            .collect();
        for seq in &targets {
            self.driver.delete(&row_key(name, *seq))?;
            if let Some(row) = t.rows.remove(seq) {
                let pk = t.schema.pk_of(&row)?;
                t.by_pk.remove(&pk);
            }
        }
        Ok(targets.len())
    }

    /// Rows in insertion order unless `order_by` is given. An empty `columns` selects every column.
    pub fn select_rows(
        &self,
        name: &str,
        columns: &[String],
        where_text: Option<&str>,
        order_by: &[String],
        ascending: bool,
        limit: Option<i64>,
    ) -> AppResult<Vec<Row>> {
        let clause = Self::filter(where_text)?;
        let t = self.table(name)?;
        let t = t.read();
        for c in columns.iter().chain(order_by.iter()) {
            if t.schema.column(c).is_none() {
                return Err(AppError::invalid_query("invalid_query".to_string(), format!("Invalid query: table {} has no column {}", name, c)));
            }
        }
        let mut picked: Vec<(IndexRow, &Row)> = t.rows
            .values()
            .map(|r| (t.schema.typed(r), r))
            .filter(|(typed, _)| clause.as_ref().map(|c| c.matches(typed)).unwrap_or(true))
            .collect();
        if !order_by.is_empty() {
            picked.sort_by(|(a, _), (b, _)| {
                let mut ord = std::cmp::Ordering::Equal;
                for c in order_by {
                    ord = a.get(c).unwrap_or(&Value::Null).sort_cmp(b.get(c).unwrap_or(&Value::Null));
                    if ord != std::cmp::Ordering::Equal { break; }
                }
                if ascending { ord } else { ord.reverse() }
            });
        }
        if let Some(n) = limit {
            if n >= 0 { picked.truncate(n as usize); }
        }
        let wanted: Vec<&str> = if columns.is_empty() {
            t.schema.columns.iter().map(|c| c.name.as_str()).collect()
        } else {
            columns.iter().map(|c| c.as_str()).collect()
        };
        Ok(picked
            .into_iter()
            .map(|(_, row)| {
                wanted.iter()
                    .filter_map(|c| row.get(*c).map(|v| (c.to_string(), v.clone())))
                    .collect::<Row>()
            })
            .collect())
    }
}
