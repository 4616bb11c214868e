//! Rasterises whole pages or page zones to PNG bytes for OCR, reusing the
//! same `pdfium-render` + `spawn_blocking` approach as the PDF analyzer.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use pdfium_render::prelude::*;

/// OCR works best well above screen resolution; this targets roughly
/// 300 DPI for a letter/A4-sized page.
const RASTER_TARGET_PX: i32 = 2480;

pub async fn rasterize_all_pages(pdf_path: &Path) -> Result<Vec<Vec<u8>>, String> {
    let path = pdf_path.to_path_buf();
    tokio::task::spawn_blocking(move || rasterize_all_pages_blocking(&path))
        .await
        .map_err(|e| format!("rasterisation task panicked: {e}"))?
}

fn rasterize_all_pages_blocking(pdf_path: &Path) -> Result<Vec<Vec<u8>>, String> {
    let pdfium = Pdfium::default();
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| format!("{e:?}"))?;

    let render_config = PdfRenderConfig::new()
        .set_target_width(RASTER_TARGET_PX)
        .set_maximum_height(RASTER_TARGET_PX);

    let pages = document.pages();
    let mut out = Vec::with_capacity(pages.len() as usize);
    for page in pages.iter() {
        let bitmap = page.render_with_config(&render_config).map_err(|e| format!("{e:?}"))?;
        out.push(encode_png(&bitmap.as_image())?);
    }
    Ok(out)
}

/// Rasterise `page_number` (1-based) and crop to `rectangle` (PDF points).
/// Returns `Ok(None)` if `page_number` is beyond the document's page count.
pub async fn rasterize_zone(
    pdf_path: &Path,
    page_number: u32,
    rectangle: (f64, f64, f64, f64),
) -> Result<Option<Vec<u8>>, String> {
    let path = pdf_path.to_path_buf();
    tokio::task::spawn_blocking(move || rasterize_zone_blocking(&path, page_number, rectangle))
        .await
        .map_err(|e| format!("rasterisation task panicked: {e}"))?
}

fn rasterize_zone_blocking(
    pdf_path: &PathBuf,
    page_number: u32,
    rectangle: (f64, f64, f64, f64),
) -> Result<Option<Vec<u8>>, String> {
    let pdfium = Pdfium::default();
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| format!("{e:?}"))?;

    let pages = document.pages();
    let index = page_number.saturating_sub(1);
    if index as u16 as u32 != index || index >= pages.len() as u32 {
        return Ok(None);
    }

    let page = pages.get(index as u16).map_err(|e| format!("{e:?}"))?;
    let page_width_pt = page.width().value as f64;
    let page_height_pt = page.height().value as f64;

    let render_config = PdfRenderConfig::new()
        .set_target_width(RASTER_TARGET_PX)
        .set_maximum_height(RASTER_TARGET_PX);
    let bitmap = page.render_with_config(&render_config).map_err(|e| format!("{e:?}"))?;
    let image = bitmap.as_image();

    let scale_x = image.width() as f64 / page_width_pt;
    let scale_y = image.height() as f64 / page_height_pt;

    let (x0, y0, x1, y1) = rectangle;
    // PDF coordinates are bottom-left origin; image coordinates are top-left.
    let left = (x0.min(x1) * scale_x).max(0.0) as u32;
    let right = (x0.max(x1) * scale_x).min(image.width() as f64) as u32;
    let top = ((page_height_pt - y0.max(y1)) * scale_y).max(0.0) as u32;
    let bottom = ((page_height_pt - y0.min(y1)) * scale_y).min(image.height() as f64) as u32;

    if right <= left || bottom <= top {
        return Err(format!("zone rectangle {rectangle:?} is degenerate or out of bounds"));
    }

    let cropped = image.crop_imm(left, top, right - left, bottom - top);
    Ok(Some(encode_png(&cropped)?))
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, String> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| format!("PNG encode failed: {e}"))?;
    Ok(bytes)
}
