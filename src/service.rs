//! Service boundary
//!
//! Owns the shared catalog and both stores, and turns every operation into an
//! `ApiResponse` with an explicit success flag. Nothing below this layer is
//! allowed to surface a raw error to callers.

use crate::catalog::{CatalogEntry, TableCatalog};
use crate::config::IntakeConfig;
use crate::db::metadata_repo::MetadataRegistry;
use crate::db::table_store::{TableSchema, TableStore};
use crate::error::{IntakeError, Result};
use crate::ingestion::{IngestionPipeline, IngestionReport};
use crate::lifecycle::{TableLifecycle, TableListing};
use crate::llm::LlmClient;
use crate::naming::NamingOracle;
use crate::upload::FileKind;
use parking_lot::Mutex;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(flatten)]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl ToString) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }
}

impl<T> From<Result<T>> for ApiResponse<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::failure(e),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableList {
    pub tables: Vec<TableListing>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub message: String,
}

pub struct IntakeService {
    catalog: Arc<TableCatalog>,
    store: Option<Arc<TableStore>>,
    registry: Option<Arc<MetadataRegistry>>,
    oracle: Option<Arc<dyn NamingOracle>>,
    oracle_timeout: Duration,
    write_gate: Arc<Mutex<()>>,
}

impl IntakeService {
    pub fn new(
        store: Option<Arc<TableStore>>,
        registry: Option<Arc<MetadataRegistry>>,
        oracle: Option<Arc<dyn NamingOracle>>,
        oracle_timeout: Duration,
    ) -> Self {
        Self {
            catalog: Arc::new(TableCatalog::new()),
            store,
            registry,
            oracle,
            oracle_timeout,
            write_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Open both stores from `config` and scan the physical store.
    ///
    /// A store that fails to open is logged and left unset: without the table
    /// store every data operation reports `StoreUnavailable`; without the
    /// registry metadata is kept in the catalog only.
    pub fn from_config(config: &IntakeConfig) -> Self {
        let store = match TableStore::open(&config.database_url) {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                error!("Failed to open table store {}: {}", config.database_url, e);
                None
            }
        };
        let registry = match MetadataRegistry::open(&config.metadata_database_url) {
            Ok(registry) => Some(Arc::new(registry)),
            Err(e) => {
                warn!("Metadata registry unavailable ({}): {}", config.metadata_database_url, e);
                None
            }
        };
        let oracle: Option<Arc<dyn NamingOracle>> = match LlmClient::from_config(config) {
            Ok(Some(client)) => {
                info!("Naming oracle enabled with model {}", client.model());
                Some(Arc::new(client))
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Naming oracle disabled: {}", e);
                None
            }
        };

        let service = Self::new(store, registry, oracle, config.naming_timeout);
        if let Err(e) = service.scan() {
            error!("Initial table scan failed: {}", e);
        }
        service
    }

    pub fn catalog(&self) -> &Arc<TableCatalog> {
        &self.catalog
    }

    fn store(&self) -> Result<Arc<TableStore>> {
        self.store.clone().ok_or(IntakeError::StoreUnavailable)
    }

    fn lifecycle(&self) -> Result<TableLifecycle> {
        Ok(TableLifecycle::new(self.store()?, self.registry.clone(), self.catalog.clone()))
    }

    fn pipeline(&self) -> Result<IngestionPipeline> {
        Ok(IngestionPipeline::new(
            self.store()?,
            self.registry.clone(),
            self.catalog.clone(),
            self.oracle.clone(),
            self.oracle_timeout,
            self.write_gate.clone(),
        ))
    }

    /// Rebuild the catalog from the physical store
    pub fn scan(&self) -> Result<usize> {
        self.catalog.clear();
        self.lifecycle()?.scan()
    }

    pub async fn import_upload(
        &self,
        bytes: &[u8],
        kind: &str,
        filename: Option<&str>,
    ) -> ApiResponse<IngestionReport> {
        let result = match (kind.parse::<FileKind>(), self.pipeline()) {
            (Ok(kind), Ok(pipeline)) => pipeline.ingest(bytes, kind, filename).await,
            (Err(e), _) | (_, Err(e)) => Err(e),
        };
        if let Err(e) = &result {
            error!("Upload of {} failed: {}", filename.unwrap_or("<unnamed>"), e);
        }
        result.into()
    }

    pub fn list_tables(&self) -> ApiResponse<TableList> {
        self.lifecycle()
            .map(|lifecycle| TableList {
                tables: lifecycle.list_tables(),
            })
            .into()
    }

    pub fn table_info(&self, physical_name: &str) -> ApiResponse<CatalogEntry> {
        self.lifecycle()
            .and_then(|lifecycle| lifecycle.table_detail(physical_name))
            .into()
    }

    pub fn delete_table(&self, physical_name: &str) -> ApiResponse<DeleteOutcome> {
        self.lifecycle()
            .and_then(|lifecycle| lifecycle.delete_table(physical_name))
            .map(|message| DeleteOutcome { message })
            .into()
    }

    /// Frames are not serializable as responses; callers get the error text
    pub fn read_table(&self, physical_name: &str) -> Result<DataFrame> {
        self.lifecycle()?.read_table(physical_name)
    }

    pub fn table_schema(&self, physical_name: &str) -> ApiResponse<TableSchema> {
        self.lifecycle()
            .and_then(|lifecycle| lifecycle.table_schema(physical_name))
            .into()
    }
}
