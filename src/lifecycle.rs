//! Table lifecycle: startup scan, listing, detail, reads and deletion

use crate::catalog::{CatalogEntry, TableCatalog, TableSource};
use crate::db::metadata_repo::{MetadataRecord, MetadataRegistry};
use crate::db::table_store::{TableSchema, TableStore};
use crate::error::{IntakeError, Result};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// One row of the catalog listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableListing {
    /// Display name
    pub name: String,
    /// Physical name
    pub table: String,
    pub rows: usize,
    pub columns: Vec<String>,
    pub description: String,
    pub source: TableSource,
    pub table_comment_cn: String,
    pub column_comments: BTreeMap<String, String>,
    pub sample_questions: Vec<String>,
}

impl From<&CatalogEntry> for TableListing {
    fn from(entry: &CatalogEntry) -> Self {
        Self {
            name: entry.display_name.clone(),
            table: entry.physical_name.clone(),
            rows: entry.row_count,
            columns: entry.column_names.clone(),
            description: entry.description.clone(),
            source: entry.source,
            table_comment_cn: entry.display_name.clone(),
            column_comments: entry.column_comments.clone(),
            sample_questions: entry.sample_questions.clone(),
        }
    }
}

pub struct TableLifecycle {
    store: Arc<TableStore>,
    registry: Option<Arc<MetadataRegistry>>,
    catalog: Arc<TableCatalog>,
}

impl TableLifecycle {
    pub fn new(store: Arc<TableStore>, registry: Option<Arc<MetadataRegistry>>, catalog: Arc<TableCatalog>) -> Self {
        Self { store, registry, catalog }
    }

    /// Populate the catalog from the physical store. Tables that cannot be
    /// inspected are logged and skipped. Returns the number cataloged.
    pub fn scan(&self) -> Result<usize> {
        let tables = self.store.list_tables()?;
        let mut loaded = 0;
        for table in &tables {
            match self.scan_table(table) {
                Ok(entry) => {
                    self.catalog.insert(entry);
                    loaded += 1;
                }
                Err(e) => error!("Failed to load table {}: {}", table, e),
            }
        }
        info!("Loaded {} of {} tables from the database", loaded, tables.len());
        Ok(loaded)
    }

    fn scan_table(&self, table: &str) -> Result<CatalogEntry> {
        let columns = self.store.column_names(table)?;
        let rows = self.store.row_count(table)?;
        let mut entry = CatalogEntry::scanned(table, columns, rows);
        if let Some(record) = self.fetch_metadata(table) {
            entry.apply_record(&record);
        }
        Ok(entry)
    }

    /// Drop a cataloged table, then its cached state, then its metadata.
    ///
    /// Unknown names are rejected before anything is touched; a failed drop
    /// leaves catalog and registry unchanged.
    pub fn delete_table(&self, physical_name: &str) -> Result<String> {
        if !self.catalog.contains(physical_name) {
            return Err(IntakeError::TableNotFound(physical_name.to_string()));
        }

        self.store.drop_table(physical_name).map_err(|e| {
            error!("Failed to drop {}: {}", physical_name, e);
            e
        })?;
        self.catalog.remove(physical_name);

        if let Some(registry) = &self.registry {
            if let Err(e) = registry.delete(physical_name) {
                warn!("Failed to delete metadata for {}: {}", physical_name, e);
            }
        }

        info!("Deleted table {}", physical_name);
        Ok(format!("表 {} 已删除", physical_name))
    }

    /// Listing rows, preferring registry metadata over cached fields
    pub fn list_tables(&self) -> Vec<TableListing> {
        self.catalog
            .snapshot()
            .into_iter()
            .map(|mut entry| {
                if let Some(record) = self.fetch_metadata(&entry.physical_name) {
                    entry.apply_record(&record);
                }
                TableListing::from(&entry)
            })
            .collect()
    }

    /// Catalog entry reconciled with the latest registry record; the
    /// reconciled entry is written back to the catalog.
    pub fn table_detail(&self, physical_name: &str) -> Result<CatalogEntry> {
        if !self.catalog.contains(physical_name) {
            return Err(IntakeError::TableNotFound(physical_name.to_string()));
        }
        let record = self.fetch_metadata(physical_name);
        self.catalog
            .update(physical_name, |entry| {
                if let Some(record) = &record {
                    entry.apply_record(record);
                }
            })
            .ok_or_else(|| IntakeError::TableNotFound(physical_name.to_string()))
    }

    /// Whole table as a frame, served from the per-process cache when warm.
    /// Only cataloged tables are cached.
    pub fn read_table(&self, physical_name: &str) -> Result<DataFrame> {
        if let Some(df) = self.catalog.cached_frame(physical_name) {
            return Ok(df);
        }
        let df = self.store.read_table(physical_name)?;
        if !self.catalog.cache_frame(physical_name, df.clone()) {
            debug!("Serving uncataloged table {} without caching", physical_name);
        }
        Ok(df)
    }

    pub fn table_schema(&self, physical_name: &str) -> Result<TableSchema> {
        self.store.table_schema(physical_name)
    }

    fn fetch_metadata(&self, physical_name: &str) -> Option<MetadataRecord> {
        let registry = self.registry.as_ref()?;
        match registry.fetch(physical_name) {
            Ok(record) => record,
            Err(e) => {
                warn!("Failed to read metadata for {}: {}", physical_name, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn setup() -> (Arc<TableStore>, Arc<MetadataRegistry>, Arc<TableCatalog>, TableLifecycle) {
        let store = Arc::new(TableStore::open(":memory:").unwrap());
        let registry = Arc::new(MetadataRegistry::open(":memory:").unwrap());
        let catalog = Arc::new(TableCatalog::new());
        let lifecycle = TableLifecycle::new(store.clone(), Some(registry.clone()), catalog.clone());
        (store, registry, catalog, lifecycle)
    }

    fn orders() -> DataFrame {
        df!["order_id" => ["A1", "A2"], "amount" => [1.5, 2.0]].unwrap()
    }

    #[test]
    fn test_scan_uses_defaults_and_registry() {
        let (store, registry, catalog, lifecycle) = setup();
        store.replace_table("orders", &orders()).unwrap();
        store.replace_table("plain", &df!["x" => [1i64]].unwrap()).unwrap();
        registry
            .upsert(
                "orders",
                &MetadataRecord {
                    table_comment_cn: "订单".to_string(),
                    column_comments: [("amount".to_string(), "金额".to_string())].into_iter().collect(),
                    column_original_names: [("amount".to_string(), "金额".to_string())].into_iter().collect(),
                    sample_questions: vec!["订单一共有多少条数据？".to_string()],
                },
            )
            .unwrap();

        assert_eq!(lifecycle.scan().unwrap(), 2);

        let orders = catalog.get("orders").unwrap();
        assert_eq!(orders.display_name, "订单");
        assert_eq!(orders.row_count, 2);
        assert_eq!(orders.column_comments["amount"], "金额");
        assert_eq!(orders.column_comments["order_id"], "order_id");
        assert_eq!(orders.sample_questions.len(), 1);

        let plain = catalog.get("plain").unwrap();
        assert_eq!(plain.description, "plain 数据表");
        assert!(plain.sample_questions.is_empty());
    }

    #[test]
    fn test_delete_unknown_table_touches_nothing() {
        let (store, _registry, _catalog, lifecycle) = setup();
        // physically present but never cataloged
        store.replace_table("orders", &orders()).unwrap();

        let err = lifecycle.delete_table("orders").unwrap_err();
        assert!(matches!(err, IntakeError::TableNotFound(_)));
        assert!(store.table_exists("orders").unwrap());
    }

    #[test]
    fn test_delete_purges_all_state() {
        let (store, registry, catalog, lifecycle) = setup();
        store.replace_table("orders", &orders()).unwrap();
        registry.upsert("orders", &MetadataRecord::default()).unwrap();
        lifecycle.scan().unwrap();
        lifecycle.read_table("orders").unwrap();
        assert!(catalog.cached_frame("orders").is_some());

        let message = lifecycle.delete_table("orders").unwrap();
        assert_eq!(message, "表 orders 已删除");
        assert!(!store.table_exists("orders").unwrap());
        assert!(!catalog.contains("orders"));
        assert!(catalog.cached_frame("orders").is_none());
        assert!(registry.fetch("orders").unwrap().is_none());
    }

    #[test]
    fn test_list_prefers_registry_metadata() {
        let (store, registry, _catalog, lifecycle) = setup();
        store.replace_table("orders", &orders()).unwrap();
        lifecycle.scan().unwrap();

        registry
            .upsert(
                "orders",
                &MetadataRecord {
                    table_comment_cn: "订单表".to_string(),
                    ..MetadataRecord::default()
                },
            )
            .unwrap();

        let listing = lifecycle.list_tables();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "订单表");
        assert_eq!(listing[0].table, "orders");
        assert_eq!(listing[0].rows, 2);

        let detail = lifecycle.table_detail("orders").unwrap();
        assert_eq!(detail.display_name, "订单表");
        assert!(matches!(lifecycle.table_detail("nope"), Err(IntakeError::TableNotFound(_))));
    }

    #[test]
    fn test_read_table_is_cached() {
        let (store, _registry, catalog, lifecycle) = setup();
        store.replace_table("orders", &orders()).unwrap();
        lifecycle.scan().unwrap();

        let first = lifecycle.read_table("orders").unwrap();
        assert_eq!(first.height(), 2);
        // served from cache even after the physical table changes underneath
        store.drop_table("orders").unwrap();
        assert_eq!(lifecycle.read_table("orders").unwrap().height(), 2);

        catalog.remove("orders");
        assert!(lifecycle.read_table("orders").is_err());
    }

    #[test]
    fn test_read_of_uncataloged_table_is_not_cached() {
        let (store, _registry, catalog, lifecycle) = setup();
        store.replace_table("orders", &orders()).unwrap();
        lifecycle.scan().unwrap();
        catalog.remove("orders");

        assert_eq!(lifecycle.read_table("orders").unwrap().height(), 2);
        assert!(catalog.cached_frame("orders").is_none());

        store.drop_table("orders").unwrap();
        assert!(matches!(lifecycle.read_table("orders"), Err(IntakeError::TableNotFound(_))));
    }
}
