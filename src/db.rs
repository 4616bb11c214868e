//! Database export driver collaborator interface: connection management
//! and schema are a host concern, so this crate specifies only the trait
//! the `database_row` export arm consumes.

use std::collections::HashMap;

use thiserror::Error;

/// The evaluated field values and metadata handed to an [`ExportDriver`]
/// for one `database_row` export.
#[derive(Debug, Clone)]
pub struct ExportRowContext {
    pub hotfolder_id: String,
    pub hotfolder_name: String,
    pub pdf_path: std::path::PathBuf,
    pub fields: HashMap<String, String>,
}

#[derive(Debug, Error)]
pub enum ExportDriverError {
    #[error("database export failed: {0}")]
    Failed(String),
}

/// Connection management, pooling, and schema all live outside this crate;
/// the router only ever writes one row per successful `database_row` export.
#[async_trait::async_trait]
pub trait ExportDriver: Send + Sync {
    async fn write_row(&self, ctx: &ExportRowContext) -> Result<(), ExportDriverError>;
}
