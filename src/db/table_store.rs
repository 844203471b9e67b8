//! Physical table store
//!
//! Uploaded frames are written as ordinary SQLite tables. Identifiers reaching
//! this module are expected to be sanitized already; they are still quoted in
//! every statement.

use crate::db::connection::open_connection;
use crate::error::{IntakeError, Result};
use crate::identifier::quote_identifier;
use parking_lot::Mutex;
use polars::prelude::*;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Column as declared in the physical schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table_name: String,
    pub columns: Vec<SchemaColumn>,
    pub primary_keys: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
}

pub struct TableStore {
    db: Mutex<Connection>,
}

impl TableStore {
    pub fn open(url: &str) -> Result<Self> {
        let conn = open_connection(url)?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(Self { db: Mutex::new(conn) })
    }

    /// User tables, sorted by name
    pub fn list_tables(&self) -> Result<Vec<String>> {
        let db = self.db.lock();
        let mut stmt = db.prepare(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool> {
        let db = self.db.lock();
        let found = db
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1 LIMIT 1",
                params![table_name],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn column_names(&self, table_name: &str) -> Result<Vec<String>> {
        Ok(self
            .table_schema(table_name)?
            .columns
            .into_iter()
            .map(|c| c.name)
            .collect())
    }

    pub fn row_count(&self, table_name: &str) -> Result<usize> {
        let db = self.db.lock();
        let count: i64 = db.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_identifier(table_name)),
            [],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    /// Drop any table called `table_name` and write `df` in its place
    pub fn replace_table(&self, table_name: &str, df: &DataFrame) -> Result<()> {
        let quoted = quote_identifier(table_name);
        let columns = df.get_columns();
        if columns.is_empty() {
            return Err(IntakeError::Database(format!("Refusing to write {} without columns", table_name)));
        }

        let column_defs: Vec<String> = columns
            .iter()
            .map(|s| format!("{} {}", quote_identifier(s.name()), sql_type(s.dtype())))
            .collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let column_list: Vec<String> = columns.iter().map(|s| quote_identifier(s.name())).collect();

        let mut db = self.db.lock();
        let tx = db.transaction()?;
        tx.execute(&format!("DROP TABLE IF EXISTS {}", quoted), [])?;
        tx.execute(&format!("CREATE TABLE {} ({})", quoted, column_defs.join(", ")), [])?;
        {
            let mut insert = tx.prepare(&format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quoted,
                column_list.join(", "),
                placeholders.join(", ")
            ))?;
            for row_idx in 0..df.height() {
                let row = columns
                    .iter()
                    .map(|s| s.get(row_idx).map(|v| to_sql_value(&v)))
                    .collect::<PolarsResult<Vec<SqlValue>>>()?;
                insert.execute(params_from_iter(row.iter()))?;
            }
        }
        tx.commit()?;

        debug!("Wrote {} rows into {}", df.height(), table_name);
        Ok(())
    }

    pub fn drop_table(&self, table_name: &str) -> Result<()> {
        let db = self.db.lock();
        db.execute(&format!("DROP TABLE IF EXISTS {}", quote_identifier(table_name)), [])?;
        Ok(())
    }

    /// Read a whole table back into a frame
    pub fn read_table(&self, table_name: &str) -> Result<DataFrame> {
        if !self.table_exists(table_name)? {
            return Err(IntakeError::TableNotFound(table_name.to_string()));
        }

        let db = self.db.lock();
        let mut stmt = db.prepare(&format!("SELECT * FROM {}", quote_identifier(table_name)))?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = names.len();

        let mut cells: Vec<Vec<SqlValue>> = vec![Vec::new(); width];
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            for (idx, column) in cells.iter_mut().enumerate() {
                column.push(row.get::<_, SqlValue>(idx)?);
            }
        }

        let series = names
            .iter()
            .zip(cells)
            .map(|(name, values)| column_series(name, values))
            .collect::<Vec<_>>();
        Ok(DataFrame::new(series)?)
    }

    /// Declared columns, primary key and foreign keys of a table
    pub fn table_schema(&self, table_name: &str) -> Result<TableSchema> {
        let db = self.db.lock();
        let quoted = quote_identifier(table_name);

        let mut stmt = db.prepare(&format!("PRAGMA table_info({})", quoted))?;
        let mut pk_columns: Vec<(i64, String)> = Vec::new();
        let columns = stmt
            .query_map([], |row| {
                let not_null: i64 = row.get(3)?;
                let pk: i64 = row.get(5)?;
                Ok((
                    SchemaColumn {
                        name: row.get(1)?,
                        data_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                        nullable: not_null == 0,
                        default: row.get(4)?,
                        primary_key: pk > 0,
                    },
                    pk,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .map(|(column, pk)| {
                if pk > 0 {
                    pk_columns.push((pk, column.name.clone()));
                }
                column
            })
            .collect::<Vec<_>>();

        if columns.is_empty() {
            return Err(IntakeError::TableNotFound(table_name.to_string()));
        }
        pk_columns.sort();

        let mut stmt = db.prepare(&format!("PRAGMA foreign_key_list({})", quoted))?;
        let foreign_keys = stmt
            .query_map([], |row| {
                Ok(ForeignKey {
                    ref_table: row.get(2)?,
                    column: row.get(3)?,
                    ref_column: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(TableSchema {
            table_name: table_name.to_string(),
            columns,
            primary_keys: pk_columns.into_iter().map(|(_, name)| name).collect(),
            foreign_keys,
        })
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        self.db.lock().execute_batch(sql)?;
        Ok(())
    }
}

/// SQLite column affinity for a frame dtype
fn sql_type(dtype: &DataType) -> &'static str {
    match dtype {
        DataType::Boolean => "BOOLEAN",
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => "INTEGER",
        DataType::Float32 | DataType::Float64 => "REAL",
        DataType::Date => "DATE",
        DataType::Datetime(..) => "TIMESTAMP",
        _ => "TEXT",
    }
}

fn to_sql_value(value: &AnyValue) -> SqlValue {
    match value {
        AnyValue::Null => SqlValue::Null,
        AnyValue::Boolean(b) => SqlValue::Integer(*b as i64),
        AnyValue::Int8(v) => SqlValue::Integer(*v as i64),
        AnyValue::Int16(v) => SqlValue::Integer(*v as i64),
        AnyValue::Int32(v) => SqlValue::Integer(*v as i64),
        AnyValue::Int64(v) => SqlValue::Integer(*v),
        AnyValue::UInt8(v) => SqlValue::Integer(*v as i64),
        AnyValue::UInt16(v) => SqlValue::Integer(*v as i64),
        AnyValue::UInt32(v) => SqlValue::Integer(*v as i64),
        AnyValue::UInt64(v) => match i64::try_from(*v) {
            Ok(i) => SqlValue::Integer(i),
            Err(_) => SqlValue::Real(*v as f64),
        },
        AnyValue::Float32(v) if v.is_nan() => SqlValue::Null,
        AnyValue::Float64(v) if v.is_nan() => SqlValue::Null,
        AnyValue::Float32(v) => SqlValue::Real(*v as f64),
        AnyValue::Float64(v) => SqlValue::Real(*v),
        AnyValue::String(s) => SqlValue::Text(s.to_string()),
        AnyValue::StringOwned(s) => SqlValue::Text(s.to_string()),
        AnyValue::Binary(b) => SqlValue::Blob(b.to_vec()),
        AnyValue::BinaryOwned(b) => SqlValue::Blob(b.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Build one frame column from SQLite cells, choosing the narrowest dtype
/// that holds every non-null cell.
fn column_series(name: &str, values: Vec<SqlValue>) -> Series {
    let non_null = values.iter().filter(|v| !matches!(v, SqlValue::Null));
    let mut all_int = true;
    let mut all_numeric = true;
    for value in non_null {
        match value {
            SqlValue::Integer(_) => {}
            SqlValue::Real(_) => all_int = false,
            _ => {
                all_int = false;
                all_numeric = false;
            }
        }
    }

    if all_int {
        let ints: Vec<Option<i64>> = values
            .iter()
            .map(|v| match v {
                SqlValue::Integer(i) => Some(*i),
                _ => None,
            })
            .collect();
        Series::new(name, ints)
    } else if all_numeric {
        let floats: Vec<Option<f64>> = values
            .iter()
            .map(|v| match v {
                SqlValue::Integer(i) => Some(*i as f64),
                SqlValue::Real(f) => Some(*f),
                _ => None,
            })
            .collect();
        Series::new(name, floats)
    } else {
        let texts: Vec<Option<String>> = values
            .into_iter()
            .map(|v| match v {
                SqlValue::Null => None,
                SqlValue::Integer(i) => Some(i.to_string()),
                SqlValue::Real(f) => Some(f.to_string()),
                SqlValue::Text(s) => Some(s),
                SqlValue::Blob(b) => Some(String::from_utf8_lossy(&b).into_owned()),
            })
            .collect();
        Series::new(name, texts)
    }
}
