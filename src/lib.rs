//! # hotfolder-core
//!
//! A document-processing engine that watches input directories ("hotfolders"),
//! pairs arriving PDFs with optional sidecar XML metadata, and runs each pair
//! through a configurable pipeline of analysis, field extraction,
//! compression, and export.
//!
//! ## Why this crate?
//!
//! Hotfolder-style document automation needs to survive crashes mid-write,
//! never double-process a file, keep a monotonic invoice counter correct
//! across restarts, and run external tools (ghostscript, tesseract) under a
//! deadline without leaking subprocesses. This crate owns exactly that hard
//! part — filesystem watching, atomic moves, and subprocess control — and
//! leaves configuration UI, licensing policy, and database connection
//! management to the host application via small trait interfaces.
//!
//! ## Pipeline Overview
//!
//! ```text
//! filesystem event
//!  │
//!  ├─ 1. Supervisor   watch, debounce, pair PDF+XML, enqueue
//!  ├─ 2. Workspace    move files into a scratch directory
//!  ├─ 3. Validate     open + raster page 1 (pdfium)
//!  ├─ 4. Analyse      text density, image DPI, forms, scanned/native
//!  ├─ 5. Fields       zone OCR → expression evaluation → XML sidecar
//!  ├─ 6. Actions      compress via ghostscript, quality profile
//!  └─ 7. Export       one or more targets, atomic write, aggregate result
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hotfolder_core::{HotfolderConfig, Settings, CounterStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::load_or_init(std::path::Path::new("config/settings.json"))?;
//!     let counters = CounterStore::open("counters.json");
//!     let config = HotfolderConfig::builder("Invoices", "/in/invoices").build()?;
//!     println!("configured {} with pool size {}", config.name, settings.worker_pool_size);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `hotfolderd` binary (clap + anyhow + tracing-subscriber) |
//! | `bundled` | on    | Embeds the pdfium shared library at compile time |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! hotfolder-core = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod compress;
pub mod config;
pub mod counters;
pub mod db;
pub mod error;
pub mod export;
pub mod expr;
pub mod fields;
pub mod fsutil;
pub mod license;
pub mod ocr;
pub mod pdf;
pub mod pipeline;
pub mod supervisor;
pub mod tooling;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ConfigStore, ExportConfig, FieldMapping, HotfolderConfig, HotfolderConfigBuilder, HotfolderId,
    OcrZone, ProcessingAction, Settings, SourceKind, StampConfig, TargetKind,
};
pub use counters::CounterStore;
pub use db::{ExportDriver, ExportDriverError, ExportRowContext};
pub use error::{ErrorKind, HotfolderError, PipelineError};
pub use expr::{evaluate, VariableContext};
pub use license::{AlwaysLicensed, LicenseGate};
pub use pdf::PdfAnalysis;
pub use pipeline::{DocumentPair, Pipeline, PipelineOutcome, Workspace};
pub use supervisor::Supervisor;
