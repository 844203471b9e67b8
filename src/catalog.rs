//! In-memory catalog of physical tables
//!
//! The catalog is a read-through cache over the metadata registry: entries are
//! rebuilt from the physical store plus the registry on scan, and overwritten
//! after every ingestion or delete. It also keeps a per-process frame cache
//! for `read_table`.

use crate::db::metadata_repo::MetadataRecord;
use crate::naming::MAX_SAMPLE_QUESTIONS;
use parking_lot::{Mutex, RwLock};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableSource {
    Db,
    Upload,
}

/// Cached description of one physical table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub physical_name: String,
    pub display_name: String,
    pub description: String,
    pub column_names: Vec<String>,
    /// Snapshot taken at scan/ingest time
    pub row_count: usize,
    pub source: TableSource,
    pub column_comments: BTreeMap<String, String>,
    pub column_original_names: BTreeMap<String, String>,
    pub sample_questions: Vec<String>,
}

impl CatalogEntry {
    /// Bare entry for a table found in the store: column names double as
    /// comments and original names, no sample questions.
    pub fn scanned(physical_name: &str, column_names: Vec<String>, row_count: usize) -> Self {
        let identity: BTreeMap<String, String> =
            column_names.iter().map(|c| (c.clone(), c.clone())).collect();
        Self {
            physical_name: physical_name.to_string(),
            display_name: physical_name.to_string(),
            description: format!("{} 数据表", physical_name),
            column_names,
            row_count,
            source: TableSource::Db,
            column_comments: identity.clone(),
            column_original_names: identity,
            sample_questions: Vec::new(),
        }
    }

    /// Overlay a registry record. Keys that are not live columns are dropped.
    pub fn apply_record(&mut self, record: &MetadataRecord) {
        if !record.table_comment_cn.is_empty() {
            self.display_name = record.table_comment_cn.clone();
        }
        for (column, comment) in &record.column_comments {
            if self.column_names.contains(column) {
                self.column_comments.insert(column.clone(), comment.clone());
            }
        }
        for (column, original) in &record.column_original_names {
            if self.column_names.contains(column) {
                self.column_original_names.insert(column.clone(), original.clone());
            }
        }
        if !record.sample_questions.is_empty() {
            self.sample_questions = record
                .sample_questions
                .iter()
                .take(MAX_SAMPLE_QUESTIONS)
                .cloned()
                .collect();
        }
    }

    pub fn to_record(&self) -> MetadataRecord {
        MetadataRecord {
            table_comment_cn: self.display_name.clone(),
            column_comments: self.column_comments.clone(),
            column_original_names: self.column_original_names.clone(),
            sample_questions: self.sample_questions.clone(),
        }
    }
}

/// Lock-guarded catalog shared by the ingestion pipeline and the lifecycle
/// manager. When both locks are needed, `entries` is taken before `frames`.
#[derive(Default)]
pub struct TableCatalog {
    entries: RwLock<BTreeMap<String, CatalogEntry>>,
    frames: Mutex<HashMap<String, DataFrame>>,
}

impl TableCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, physical_name: &str) -> bool {
        self.entries.read().contains_key(physical_name)
    }

    pub fn get(&self, physical_name: &str) -> Option<CatalogEntry> {
        self.entries.read().get(physical_name).cloned()
    }

    /// Insert or replace; any cached frame for the table is evicted
    pub fn insert(&self, entry: CatalogEntry) {
        let mut entries = self.entries.write();
        self.frames.lock().remove(&entry.physical_name);
        entries.insert(entry.physical_name.clone(), entry);
    }

    pub fn remove(&self, physical_name: &str) -> Option<CatalogEntry> {
        let mut entries = self.entries.write();
        self.frames.lock().remove(physical_name);
        entries.remove(physical_name)
    }

    /// Read-modify-write under one write lock. Returns `None` when absent.
    pub fn update<F>(&self, physical_name: &str, f: F) -> Option<CatalogEntry>
    where
        F: FnOnce(&mut CatalogEntry),
    {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(physical_name)?;
        f(entry);
        Some(entry.clone())
    }

    /// Entries ordered by physical name
    pub fn snapshot(&self) -> Vec<CatalogEntry> {
        self.entries.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write();
        self.frames.lock().clear();
        entries.clear();
    }

    pub fn cached_frame(&self, physical_name: &str) -> Option<DataFrame> {
        self.frames.lock().get(physical_name).cloned()
    }

    /// Cache `df` only while the table is still cataloged. The entries lock
    /// is held across the insert so a concurrent `remove` cannot slip in
    /// between the check and the write. Returns whether the frame was cached.
    pub fn cache_frame(&self, physical_name: &str, df: DataFrame) -> bool {
        let entries = self.entries.read();
        if !entries.contains_key(physical_name) {
            return false;
        }
        self.frames.lock().insert(physical_name.to_string(), df);
        true
    }
}
