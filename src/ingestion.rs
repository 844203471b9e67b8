//! Table ingestion pipeline
//!
//! parse -> naming plan (optional) -> table/column names -> physical write ->
//! column profiles -> catalog + registry -> report

use crate::catalog::{CatalogEntry, TableCatalog, TableSource};
use crate::db::metadata_repo::{MetadataRecord, MetadataRegistry};
use crate::db::table_store::TableStore;
use crate::error::{IntakeError, Result};
use crate::identifier::{dedupe_name, sanitize_column_name, sanitize_table_name, unique_table_name};
use crate::inference::ColumnProfile;
use crate::naming::{propose_naming, resolve_sample_questions, NamingOracle, NamingPlan};
use crate::scalar::normalize;
use crate::upload::{parse_upload, FileKind};
use parking_lot::Mutex;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_FILENAME: &str = "uploaded_file";
pub const UPLOAD_DESCRIPTION: &str = "用户上传的文件（已合并入主数据库）";

/// Rows shown to the naming oracle
const ORACLE_SAMPLE_ROWS: usize = 3;

/// Outcome of a successful ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionReport {
    pub table_name: String,
    pub table_comment_cn: String,
    pub headers: Vec<String>,
    pub sample_questions: Vec<String>,
    pub column_comments: BTreeMap<String, String>,
    pub column_info: Vec<ColumnProfile>,
    pub total_columns: usize,
    pub estimated_rows: usize,
}

/// A physical column name with its provenance
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedColumn {
    pub name: String,
    pub comment: String,
    pub original_name: String,
}

pub struct IngestionPipeline {
    store: Arc<TableStore>,
    registry: Option<Arc<MetadataRegistry>>,
    catalog: Arc<TableCatalog>,
    oracle: Option<Arc<dyn NamingOracle>>,
    oracle_timeout: Duration,
    /// Held around "pick a free name + write the table"
    write_gate: Arc<Mutex<()>>,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<TableStore>,
        registry: Option<Arc<MetadataRegistry>>,
        catalog: Arc<TableCatalog>,
        oracle: Option<Arc<dyn NamingOracle>>,
        oracle_timeout: Duration,
        write_gate: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            store,
            registry,
            catalog,
            oracle,
            oracle_timeout,
            write_gate,
        }
    }

    pub async fn ingest(&self, bytes: &[u8], kind: FileKind, filename: Option<&str>) -> Result<IngestionReport> {
        let mut df = parse_upload(bytes, kind)?;
        if df.height() == 0 || df.width() == 0 {
            return Err(IntakeError::EmptyUpload);
        }

        let filename = filename
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .unwrap_or(DEFAULT_FILENAME);
        let stem = file_stem(filename);
        let original_columns: Vec<String> = df.get_column_names().iter().map(|c| c.to_string()).collect();

        let sample_rows = sample_rows(&df, ORACLE_SAMPLE_ROWS)?;
        let plan = propose_naming(
            self.oracle.as_deref(),
            self.oracle_timeout,
            filename,
            &original_columns,
            &sample_rows,
        )
        .await
        .into_plan();

        let table_comment = plan
            .as_ref()
            .map(|p| p.table_comment_cn.trim())
            .filter(|c| !c.is_empty())
            .unwrap_or(&stem)
            .to_string();
        let sample_questions = resolve_sample_questions(plan.as_ref(), &table_comment, &original_columns);
        let table_base = plan
            .as_ref()
            .map(|p| p.table_name_en.trim())
            .filter(|n| !n.is_empty())
            .map(sanitize_table_name)
            .unwrap_or_else(|| sanitize_table_name(&stem));

        let columns = resolve_columns(&original_columns, plan.as_ref());
        let physical_columns: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        df.set_column_names(physical_columns.as_slice())?;

        let table_name = {
            let _gate = self.write_gate.lock();
            let table_name = unique_table_name(&table_base, |candidate| {
                Ok(self.catalog.contains(candidate) || self.store.table_exists(candidate)?)
            })?;
            self.store.replace_table(&table_name, &df)?;
            table_name
        };
        info!(
            "Ingested {} into {} ({} rows, {} columns)",
            filename,
            table_name,
            df.height(),
            df.width()
        );

        let column_info: Vec<ColumnProfile> = df
            .get_columns()
            .iter()
            .zip(&columns)
            .map(|(series, column)| {
                ColumnProfile::from_series(series)
                    .with_provenance(Some(column.comment.clone()), Some(column.original_name.clone()))
            })
            .collect();

        let column_comments: BTreeMap<String, String> =
            columns.iter().map(|c| (c.name.clone(), c.comment.clone())).collect();
        let column_original_names: BTreeMap<String, String> =
            columns.iter().map(|c| (c.name.clone(), c.original_name.clone())).collect();

        let entry = CatalogEntry {
            physical_name: table_name.clone(),
            display_name: table_comment.clone(),
            description: UPLOAD_DESCRIPTION.to_string(),
            column_names: physical_columns.clone(),
            row_count: df.height(),
            source: TableSource::Upload,
            column_comments: column_comments.clone(),
            column_original_names,
            sample_questions: sample_questions.clone(),
        };
        let record = entry.to_record();
        self.catalog.insert(entry);
        self.persist_metadata(&table_name, &record);

        Ok(IngestionReport {
            table_name,
            table_comment_cn: table_comment,
            headers: physical_columns,
            sample_questions,
            column_comments,
            column_info,
            total_columns: df.width(),
            estimated_rows: df.height(),
        })
    }

    /// Registry writes are best effort; the physical table is already durable
    fn persist_metadata(&self, table_name: &str, record: &MetadataRecord) {
        let Some(registry) = &self.registry else {
            debug!("No metadata registry configured; skipping metadata for {}", table_name);
            return;
        };
        if let Err(e) = registry.upsert(table_name, record) {
            warn!("Failed to save metadata for {}: {}", table_name, e);
        }
    }
}

/// Map each original header to a safe, table-unique physical name.
///
/// Plan suggestions are matched on the exact original header. Positions are
/// 1-based for the `col_<n>` fallback.
pub fn resolve_columns(original_columns: &[String], plan: Option<&NamingPlan>) -> Vec<ResolvedColumn> {
    let suggestions = plan.map(NamingPlan::column_suggestions).unwrap_or_default();
    let mut assigned: HashSet<String> = HashSet::new();

    original_columns
        .iter()
        .enumerate()
        .map(|(idx, original)| {
            let suggestion = suggestions.get(original);
            let candidate = suggestion.map(|s| s.column_name_en.as_str()).unwrap_or(original);
            let base = sanitize_column_name(candidate, idx + 1);
            let name = dedupe_name(&base, |n| assigned.contains(n));
            assigned.insert(name.clone());

            ResolvedColumn {
                name,
                comment: suggestion
                    .map(|s| s.column_comment_cn.clone())
                    .unwrap_or_else(|| original.clone()),
                original_name: original.clone(),
            }
        })
        .collect()
}

fn file_stem(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_FILENAME)
        .to_string()
}

/// First `limit` rows keyed by original header, values normalized
fn sample_rows(df: &DataFrame, limit: usize) -> Result<Vec<Map<String, Value>>> {
    let mut rows = Vec::new();
    for idx in 0..df.height().min(limit) {
        let mut row = Map::new();
        for series in df.get_columns() {
            row.insert(series.name().to_string(), normalize(&series.get(idx)?).to_json());
        }
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::NamingColumn;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_resolve_columns_without_plan() {
        let resolved = resolve_columns(&names(&["订单号", "Amount ($)", "amount", "1st"]), None);
        let physical: Vec<&str> = resolved.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(physical, vec!["col_1", "amount", "amount_2", "col_1st"]);
        assert_eq!(resolved[0].comment, "订单号");
        assert_eq!(resolved[0].original_name, "订单号");
    }

    #[test]
    fn test_resolve_columns_with_plan() {
        let plan = NamingPlan {
            table_name_en: "orders".to_string(),
            table_comment_cn: "订单".to_string(),
            columns: vec![
                NamingColumn {
                    source_name: "订单号".to_string(),
                    column_name_en: "Order ID".to_string(),
                    column_comment_cn: "订单编号".to_string(),
                },
                NamingColumn {
                    source_name: "金额".to_string(),
                    column_name_en: "order_id".to_string(),
                    column_comment_cn: String::new(),
                },
            ],
            sample_questions: vec![],
        };
        let resolved = resolve_columns(&names(&["订单号", "金额", "备注"]), Some(&plan));

        assert_eq!(resolved[0].name, "order_id");
        assert_eq!(resolved[0].comment, "订单编号");
        assert_eq!(resolved[1].name, "order_id_2");
        assert_eq!(resolved[1].comment, "金额");
        assert_eq!(resolved[2].name, "col_3");
        assert_eq!(resolved[2].comment, "备注");
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("销售数据.xlsx"), "销售数据");
        assert_eq!(file_stem("report.final.csv"), "report.final");
        assert_eq!(file_stem("noext"), "noext");
    }

    #[test]
    fn test_sample_rows_normalizes_values() {
        let df = df![
            "a" => [Some(1i64), None, Some(3), Some(4)],
            "b" => ["x", "y", "z", "w"]
        ]
        .unwrap();
        let rows = sample_rows(&df, 3).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["a"], Value::from(1));
        assert_eq!(rows[1]["a"], Value::Null);
        assert_eq!(rows[2]["b"], Value::from("z"));
    }
}
