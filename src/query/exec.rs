use std::collections::HashSet;

use tracing::debug;

use crate::error::AppResult;
use crate::index::{IndexRow, Value};

use super::{IndexQuery, TableQueryResult};

/// Run a parsed query over rows in their stored order: filter, project, sort, dedupe, limit.
pub fn execute<'r, I>(q: &IndexQuery, rows: I) -> AppResult<TableQueryResult>
where
    I: IntoIterator<Item = &'r IndexRow>,
{
    let mut out: Vec<Vec<Value>> = rows
        .into_iter()
        .filter(|row| q.where_clause.as_ref().map(|w| w.matches(row)).unwrap_or(true))
        .map(|row| q.select.iter().map(|c| row.get(c).cloned().unwrap_or(Value::Null)).collect())
        .collect();

    if !q.order_by.is_empty() {
        let positions: Vec<usize> = q
            .order_by
            .iter()
            .filter_map(|c| q.select.iter().position(|s| s == c))
            .collect();
        // sort_by is stable, equal keys keep their stored order in both directions
        out.sort_by(|a, b| {
            let mut ord = std::cmp::Ordering::Equal;
            for &p in &positions {
                ord = a[p].sort_cmp(&b[p]);
                if ord != std::cmp::Ordering::Equal { break; }
            }
            if q.ascending { ord } else { ord.reverse() }
        });
    }

    if q.distinct {
        let mut seen: HashSet<String> = HashSet::new();
        out.retain(|row| {
            let key = serde_json::to_string(row).unwrap_or_default();
            seen.insert(key)
        });
    }

    if let Some(n) = q.limit {
        if n >= 0 { out.truncate(n as usize); }
    }

    debug!(target: "docrepo::query", "query over {} columns returned {} rows", q.select.len(), out.len());
    Ok(TableQueryResult { column_names: q.select.clone(), rows: out })
}
