//! Hotfolder configuration: data model, durable store, and process-wide
//! settings.

pub mod model;
pub mod settings;
pub mod store;

pub use model::{
    ExportConfig, FieldMapping, HotfolderConfig, HotfolderConfigBuilder, HotfolderId, OcrZone,
    ProcessingAction, SourceKind, StampConfig, TargetKind,
};
pub use settings::Settings;
pub use store::ConfigStore;
