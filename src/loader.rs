use crate::data::{collect_rows, Cell, Rows};
use crate::error::Error;
use crate::transform::{coerce_entity_id, UNKNOWN_ID};
use crate::warehouse::{AttributeDim, TableKind, TableSpec, Warehouse};
use datafusion::prelude::DataFrame;
use indexmap::IndexMap;
use log::{debug, error, info, warn};
use rusqlite::types::Value as SqlValue;
use rusqlite::params_from_iter;
use serde::Serialize;
use std::collections::HashMap;

/// `*_id` columns that hold upstream text identifiers rather than keys.
const TEXT_ID_COLUMNS: &[&str] = &["video_id"];

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoadOutcome {
    Loaded { table: String, rows: usize },
    Failed { table: String, error: String },
}

impl LoadOutcome {
    pub fn table(&self) -> &str {
        match self {
            LoadOutcome::Loaded { table, .. } | LoadOutcome::Failed { table, .. } => table,
        }
    }

    #[cfg(test)]
    pub fn is_failed(&self) -> bool {
        matches!(self, LoadOutcome::Failed { .. })
    }
}

/// Name to ID maps of the attribute dimensions, reloaded after dimension writes.
#[derive(Clone, Debug, Default)]
pub struct LookupCache {
    entries: HashMap<AttributeDim, HashMap<String, i64>>,
}

impl LookupCache {
    pub fn reload(&mut self, warehouse: &Warehouse) -> Result<(), Error> {
        let mut entries = HashMap::new();
        for dim in AttributeDim::ALL {
            let lookup = warehouse.attribute_lookup(dim)?;
            debug!("Cached {} {} entries", lookup.len(), dim.table().name);
            entries.insert(dim, lookup);
        }
        self.entries = entries;
        Ok(())
    }

    pub fn resolve(&self, dim: AttributeDim, name: &str) -> Option<i64> {
        self.entries.get(&dim)?.get(name).copied()
    }

    pub fn unknown_id(&self, dim: AttributeDim) -> Option<i64> {
        self.resolve(dim, dim.unknown_name())
    }

    pub fn entries(&self, dim: AttributeDim) -> impl Iterator<Item = (&str, i64)> {
        self.entries
            .get(&dim)
            .into_iter()
            .flat_map(|lookup| lookup.iter().map(|(name, id)| (name.as_str(), *id)))
    }

    #[cfg(test)]
    pub fn insert(&mut self, dim: AttributeDim, name: &str, id: i64) {
        self.entries.entry(dim).or_default().insert(name.to_string(), id);
    }
}

pub struct WarehouseLoader {
    warehouse: Warehouse,
    cache: LookupCache,
}

impl WarehouseLoader {
    pub fn new(warehouse: Warehouse) -> Self {
        WarehouseLoader {
            warehouse,
            cache: LookupCache::default(),
        }
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }

    pub fn lookups(&self) -> &LookupCache {
        &self.cache
    }

    pub fn reload_lookups(&mut self) -> Result<(), Error> {
        self.cache.reload(&self.warehouse)
    }

    /// Persists one frame into `spec`. Failures are reported, never raised.
    ///
    /// # Arguments
    /// * `df` - [`DataFrame`] whose columns match the target table
    /// * `spec` - The [`TableSpec`] naming the table and its natural key
    ///
    /// # Returns
    /// A [`LoadOutcome`] with the number of rows written or the failure message
    pub async fn load_dataframe(&self, df: DataFrame, spec: &TableSpec) -> LoadOutcome {
        let result = match collect_rows(df).await {
            Ok(rows) => self.load_rows(rows, spec),
            Err(err) => Err(err),
        };

        match result {
            Ok(rows) => {
                info!("Loaded {} rows into {}", rows, spec.name);
                LoadOutcome::Loaded {
                    table: spec.name.to_string(),
                    rows,
                }
            }
            Err(err) => {
                error!("Failed to load {}: {}", spec.name, err);
                LoadOutcome::Failed {
                    table: spec.name.to_string(),
                    error: err.to_string(),
                }
            }
        }
    }

    fn load_rows(&self, rows: Rows, spec: &TableSpec) -> Result<usize, Error> {
        let key_indexes = spec
            .key_columns
            .iter()
            .map(|key| {
                rows.column_index(key).ok_or_else(|| Error::NoData {
                    message: format!("{} frame is missing key column {}", spec.name, key),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let prepared = prepare_rows(rows, &key_indexes, spec.name);
        if prepared.is_empty() {
            return Ok(0);
        }
        upsert(&self.warehouse, spec, &prepared)
    }
}

fn coerce_id_cell(cell: Cell) -> Cell {
    match cell {
        Cell::Int(v) if v < 0 => Cell::Int(UNKNOWN_ID as i64),
        Cell::Int(v) => Cell::Int(v),
        Cell::Float(v) if v.is_finite() && v >= 0.0 && v < i64::MAX as f64 => {
            Cell::Int(v.trunc() as i64)
        }
        Cell::Float(_) => Cell::Int(UNKNOWN_ID as i64),
        Cell::Text(s) => Cell::Int(coerce_entity_id(&s) as i64),
        Cell::Null => Cell::Null,
    }
}

fn key_text(cell: &Cell) -> String {
    match cell {
        Cell::Null => String::new(),
        Cell::Int(v) => v.to_string(),
        Cell::Float(v) => v.to_string(),
        Cell::Text(s) => s.clone(),
    }
}

/// Coerced, key-complete rows, deduplicated by key with the last row winning.
fn prepare_rows(rows: Rows, key_indexes: &[usize], table: &str) -> Rows {
    let id_indexes: Vec<usize> = rows
        .columns
        .iter()
        .enumerate()
        .filter(|(_, name)| name.ends_with("_id") && !TEXT_ID_COLUMNS.contains(&name.as_str()))
        .map(|(i, _)| i)
        .collect();

    let total = rows.len();
    let mut null_keys = 0;
    let mut unique: IndexMap<Vec<String>, Vec<Cell>> = IndexMap::with_capacity(total);

    for mut row in rows.rows {
        for &i in &id_indexes {
            let cell = std::mem::replace(&mut row[i], Cell::Null);
            row[i] = coerce_id_cell(cell);
        }
        if key_indexes.iter().any(|&i| row[i] == Cell::Null) {
            null_keys += 1;
            continue;
        }
        let key = key_indexes.iter().map(|&i| key_text(&row[i])).collect();
        unique.insert(key, row);
    }

    if null_keys > 0 {
        warn!("Dropped {} rows with a null key before loading {}", null_keys, table);
    }
    let duplicates = total - null_keys - unique.len();
    if duplicates > 0 {
        warn!("Collapsed {} duplicate keys before loading {}", duplicates, table);
    }

    Rows {
        columns: rows.columns,
        rows: unique.into_values().collect(),
    }
}

fn sql_value(cell: &Cell) -> SqlValue {
    match cell {
        Cell::Null => SqlValue::Null,
        Cell::Int(v) => SqlValue::Integer(*v),
        Cell::Float(v) => SqlValue::Real(*v),
        Cell::Text(s) => SqlValue::Text(s.clone()),
    }
}

fn conflict_clause(spec: &TableSpec, columns: &[String]) -> String {
    let updates: Vec<String> = columns
        .iter()
        .filter(|c| !spec.key_columns.contains(&c.as_str()))
        .map(|c| format!("{c} = excluded.{c}"))
        .collect();

    match spec.kind {
        TableKind::Dimension if !updates.is_empty() => format!(
            "ON CONFLICT ({}) DO UPDATE SET {}",
            spec.key_columns.join(", "),
            updates.join(", ")
        ),
        _ => format!("ON CONFLICT ({}) DO NOTHING", spec.key_columns.join(", ")),
    }
}

/// Stage rows in a temp table and upsert them, all in one transaction.
fn upsert(warehouse: &Warehouse, spec: &TableSpec, rows: &Rows) -> Result<usize, Error> {
    let staging = format!("staging_{}", spec.name);
    let column_list = rows.columns.join(", ");
    let placeholders = (1..=rows.columns.len())
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");

    warehouse.with_connection(|conn| {
        let tx = conn.transaction()?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS temp.{staging}; CREATE TEMP TABLE {staging} ({column_list});"
        ))?;
        {
            let mut insert = tx.prepare(&format!(
                "INSERT INTO temp.{staging} ({column_list}) VALUES ({placeholders})"
            ))?;
            for row in &rows.rows {
                insert.execute(params_from_iter(row.iter().map(sql_value)))?;
            }
        }
        // `WHERE true` keeps SQLite from parsing ON CONFLICT as a join constraint.
        let written = tx.execute(
            &format!(
                "INSERT INTO {} ({column_list}) SELECT {column_list} FROM temp.{staging} WHERE true {}",
                spec.name,
                conflict_clause(spec, &rows.columns)
            ),
            [],
        )?;
        tx.execute_batch(&format!("DROP TABLE temp.{staging};"))?;
        tx.commit()?;
        Ok(written)
    })
}
