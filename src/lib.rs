pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod identifier;
pub mod inference;
pub mod ingestion;
pub mod lifecycle;
pub mod llm;
pub mod naming;
pub mod scalar;
pub mod service;
pub mod upload;

pub use config::IntakeConfig;
pub use error::{IntakeError, Result};
pub use service::{ApiResponse, IntakeService};
