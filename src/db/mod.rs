//! SQLite-backed stores: the physical table store and the metadata registry
//!
//! The two stores are opened from separate connection strings and never share
//! a transaction.

pub mod connection;
pub mod metadata_repo;
pub mod table_store;

pub use connection::{open_connection, parse_database_url, DatabaseTarget};
pub use metadata_repo::{MetadataRecord, MetadataRegistry};
pub use table_store::{ForeignKey, SchemaColumn, TableSchema, TableStore};
