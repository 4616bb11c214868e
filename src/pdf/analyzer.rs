//! Validation and structural analysis, implemented with `pdfium-render`
//! the same way the page rasteriser this module is modelled on does:
//! `Pdfium::default()`, `load_pdf_from_file`, and `spawn_blocking` because
//! pdfium is not async-safe.

use std::path::Path;

use pdfium_render::prelude::*;
use tracing::{debug, warn};

use super::PdfAnalysis;
use crate::error::{ErrorKind, PipelineError};

/// Points per inch, used to derive embedded-image DPI from its placement
/// rectangle.
const POINTS_PER_INCH: f64 = 72.0;

/// Up to this many leading pages are inspected for `analyze`.
const MAX_ANALYSED_PAGES: usize = 5;

/// Open `pdf_path` and raster its first page to prove the document decodes.
/// An unreadable document fails validation.
pub async fn validate(pdf_path: &Path) -> Result<(), PipelineError> {
    let path = pdf_path.to_path_buf();
    tokio::task::spawn_blocking(move || validate_blocking(&path))
        .await
        .map_err(|e| PipelineError::new(ErrorKind::ValidationFailed, format!("validation task panicked: {e}")))?
}

fn validate_blocking(pdf_path: &Path) -> Result<(), PipelineError> {
    let pdfium = Pdfium::default();
    let document = pdfium.load_pdf_from_file(pdf_path, None).map_err(|e| {
        PipelineError::new(
            ErrorKind::ValidationFailed,
            format!("cannot open '{}': {e:?}", pdf_path.display()),
        )
    })?;

    let pages = document.pages();
    let first = pages.get(0).map_err(|e| {
        PipelineError::new(
            ErrorKind::ValidationFailed,
            format!("document has no readable first page: {e:?}"),
        )
    })?;

    let render_config = PdfRenderConfig::new().set_target_width(64).set_maximum_height(64);
    first.render_with_config(&render_config).map_err(|e| {
        PipelineError::new(
            ErrorKind::ValidationFailed,
            format!("failed to raster first page: {e:?}"),
        )
    })?;

    Ok(())
}

/// Inspect up to the first `MAX_ANALYSED_PAGES` pages. Any failure here
/// yields an empty, all-false analysis and is logged — analysis never
/// fails the pipeline.
pub async fn analyze(pdf_path: &Path) -> PdfAnalysis {
    let path = pdf_path.to_path_buf();
    let file_size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

    let result = tokio::task::spawn_blocking(move || analyze_blocking(&path)).await;

    match result {
        Ok(Ok(mut analysis)) => {
            analysis.file_size = file_size;
            analysis
        }
        Ok(Err(e)) => {
            warn!("PDF analysis failed for {}: {e}", pdf_path.display());
            PdfAnalysis {
                file_size,
                ..Default::default()
            }
        }
        Err(e) => {
            warn!("PDF analysis task panicked for {}: {e}", pdf_path.display());
            PdfAnalysis {
                file_size,
                ..Default::default()
            }
        }
    }
}

fn analyze_blocking(pdf_path: &Path) -> Result<PdfAnalysis, String> {
    let pdfium = Pdfium::default();
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| format!("{e:?}"))?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    let inspect_count = total_pages.min(MAX_ANALYSED_PAGES);

    let mut text_chars = 0usize;
    let mut has_images = false;
    let mut has_forms = false;
    let mut dpi_samples: Vec<f64> = Vec::new();

    for idx in 0..inspect_count {
        let page = match pages.get(idx as u16) {
            Ok(p) => p,
            Err(e) => {
                warn!("could not open page {} during analysis: {e:?}", idx + 1);
                continue;
            }
        };

        if let Ok(text) = page.text() {
            text_chars += text.all().chars().count();
        }

        for object in page.objects().iter() {
            match object.object_type() {
                PdfPageObjectType::Image => {
                    has_images = true;
                    if let Some(dpi) = image_dpi(&object) {
                        dpi_samples.push(dpi);
                    }
                }
                PdfPageObjectType::FormField => has_forms = true,
                _ => {}
            }
        }

        if !has_forms {
            has_forms = page
                .annotations()
                .iter()
                .any(|a| matches!(a.annotation_type(), PdfPageAnnotationType::Widget));
        }
    }

    let has_text = text_chars > 100;
    let avg_image_dpi = if dpi_samples.is_empty() {
        0.0
    } else {
        dpi_samples.iter().sum::<f64>() / dpi_samples.len() as f64
    };
    let is_scanned = has_images && !has_text;

    debug!(
        pages = total_pages,
        text_chars, has_images, has_forms, avg_image_dpi, "pdf analysis complete"
    );

    Ok(PdfAnalysis {
        pages: total_pages,
        has_text,
        has_images,
        has_forms,
        is_scanned,
        needs_ocr: is_scanned,
        avg_image_dpi,
        file_size: 0,
    })
}

/// Estimate an embedded image's DPI from its pixel dimensions divided by
/// its placement rectangle in inches.
fn image_dpi(object: &PdfPageObject) -> Option<f64> {
    let image_object = object.as_image_object()?;
    let bitmap = image_object.get_raw_bitmap().ok()?;
    let bounds = object.bounds().ok()?;

    let width_in = (bounds.right().value - bounds.left().value) as f64 / POINTS_PER_INCH;
    let height_in = (bounds.top().value - bounds.bottom().value) as f64 / POINTS_PER_INCH;
    if width_in <= 0.0 || height_in <= 0.0 {
        return None;
    }

    let dpi_x = bitmap.width() as f64 / width_in;
    let dpi_y = bitmap.height() as f64 / height_in;
    Some((dpi_x + dpi_y) / 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_analysis_is_all_false() {
        let analysis = PdfAnalysis::default();
        assert!(!analysis.has_text);
        assert!(!analysis.has_images);
        assert!(!analysis.is_scanned);
        assert!(!analysis.needs_ocr);
        assert_eq!(analysis.pages, 0);
    }
}
