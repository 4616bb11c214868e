//! Error types for the hotfolder document-processing engine.
//!
//! Two distinct error types reflect two distinct failure modes, the same
//! split the conversion pipeline this crate is modelled on uses:
//!
//! * [`HotfolderError`] — **fatal / administrative**: a config load failed,
//!   a config can't be enabled, the store is corrupt. Returned from
//!   constructor and admin-operation functions.
//!
//! * [`PipelineError`] — **per-document**: one document's processing failed.
//!   Carries an [`ErrorKind`] so callers (and the error-bucket namer) can
//!   branch on the failure class without string-matching messages.

use std::path::PathBuf;
use thiserror::Error;

/// The category of a per-document pipeline failure.
///
/// A closed set so downstream consumers (GUI collaborator, error-bucket
/// naming) can rely on a stable enumeration rather than message matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    ValidationFailed,
    DependencyMissing,
    AnalysisFailed,
    FieldEvaluationFailed,
    OcrFailed,
    CompressionFailed,
    ExportFailed,
    UnpairedInput,
    DuplicateInputPath,
    Unlicensed,
    Cancelled,
    ConfigInvalid,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::ValidationFailed => "VALIDATION_FAILED",
            ErrorKind::DependencyMissing => "DEPENDENCY_MISSING",
            ErrorKind::AnalysisFailed => "ANALYSIS_FAILED",
            ErrorKind::FieldEvaluationFailed => "FIELD_EVALUATION_FAILED",
            ErrorKind::OcrFailed => "OCR_FAILED",
            ErrorKind::CompressionFailed => "COMPRESSION_FAILED",
            ErrorKind::ExportFailed => "EXPORT_FAILED",
            ErrorKind::UnpairedInput => "UNPAIRED_INPUT",
            ErrorKind::DuplicateInputPath => "DUPLICATE_INPUT_PATH",
            ErrorKind::Unlicensed => "UNLICENSED",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::ConfigInvalid => "CONFIG_INVALID",
        };
        f.write_str(s)
    }
}

/// A per-document pipeline failure.
///
/// Stored on the terminal pipeline state and logged with `kind` + `message`
/// before the document is moved to the error bucket.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl PipelineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// All fatal errors returned by administrative and construction APIs.
///
/// Per-document failures use [`PipelineError`] instead and never surface
/// here — a single bad document must never prevent the supervisor or the
/// config store from answering the next call.
#[derive(Debug, Error)]
pub enum HotfolderError {
    #[error("config file not found: '{path}'")]
    ConfigNotFound { path: PathBuf },

    #[error("failed to read config '{path}': {source}")]
    ConfigReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config '{path}': {source}")]
    ConfigParseFailed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write config '{path}': {source}")]
    ConfigWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid hotfolder configuration: {0}")]
    ConfigInvalid(String),

    #[error("input path '{path}' is already used by enabled hotfolder '{other_name}'")]
    DuplicateInputPath { path: PathBuf, other_name: String },

    #[error("cannot enable hotfolder '{name}': not licensed")]
    Unlicensed { name: String },

    #[error("unknown hotfolder id: {0}")]
    UnknownHotfolder(String),

    #[error("counter store error: {0}")]
    CounterStore(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Render a `(bool, String)` pair for a [`HotfolderError`], as consumed
/// verbatim by the GUI collaborator.
pub fn as_message_pair<T>(result: Result<T, HotfolderError>) -> (bool, String) {
    match result {
        Ok(_) => (true, "OK".to_string()),
        Err(e) => (false, e.to_string()),
    }
}
