//! PDF inspection (component C): validation and structural analysis.

mod analyzer;

pub use analyzer::{analyze, validate};

use serde::{Deserialize, Serialize};

/// Derived (never persisted) structural summary of a PDF, used to drive
/// compression-profile auto-selection and `needs_ocr` routing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PdfAnalysis {
    pub pages: usize,
    pub has_text: bool,
    pub has_images: bool,
    pub has_forms: bool,
    pub is_scanned: bool,
    pub needs_ocr: bool,
    pub avg_image_dpi: f64,
    pub file_size: u64,
}
