//! Full-document and zone-level OCR extraction (component D).
//!
//! Rasterises the referenced page region via `pdfium-render` (same
//! `spawn_blocking` pattern as the PDF analyzer) and shells out to an
//! external `tesseract` binary, resolved with [`crate::tooling::ToolResolver`].
//! Subprocess calls run under a deadline and are killed on expiry, adapting
//! the retry/backoff-under-deadline shape this crate's network-call code
//! uses elsewhere to a single bounded subprocess invocation instead.

mod rasterize;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{ErrorKind, PipelineError};
use crate::tooling::ToolResolver;

const DEFAULT_OCR_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-pipeline-execution OCR cache and subprocess driver. A fresh instance
/// is created for every document so caches never leak across pipelines.
pub struct OcrService {
    resolver: ToolResolver,
    timeout: Duration,
    full_text_cache: Mutex<HashMap<PathBuf, String>>,
    zone_cache: Mutex<HashMap<(PathBuf, String), String>>,
}

impl OcrService {
    pub fn new(resolver: ToolResolver) -> Self {
        Self {
            resolver,
            timeout: DEFAULT_OCR_TIMEOUT,
            full_text_cache: Mutex::new(HashMap::new()),
            zone_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// OCR the full document, one page at a time, concatenating page text.
    /// Cached per pdf path within this service's lifetime.
    pub async fn full_text(&self, pdf_path: &Path) -> Result<String, PipelineError> {
        if let Some(cached) = self.full_text_cache.lock().unwrap().get(pdf_path) {
            return Ok(cached.clone());
        }

        let tesseract = self.require_tesseract()?;
        let page_images = rasterize::rasterize_all_pages(pdf_path)
            .await
            .map_err(|e| PipelineError::new(ErrorKind::OcrFailed, e))?;

        let mut full = String::new();
        for (idx, png) in page_images.into_iter().enumerate() {
            if idx > 0 {
                full.push('\n');
            }
            let text = self.run_tesseract(&tesseract, &png, "eng").await?;
            full.push_str(text.trim());
        }

        self.full_text_cache
            .lock()
            .unwrap()
            .insert(pdf_path.to_path_buf(), full.clone());
        Ok(full)
    }

    /// OCR a single rectangular zone on one page. Cached per `(pdf, zone
    /// name)`. A page number beyond the document's page count yields an
    /// empty string with a logged warning, not an error.
    pub async fn zone_text(
        &self,
        pdf_path: &Path,
        zone_name: &str,
        page_number: u32,
        rectangle: (f64, f64, f64, f64),
        language: &str,
    ) -> Result<String, PipelineError> {
        let cache_key = (pdf_path.to_path_buf(), zone_name.to_string());
        if let Some(cached) = self.zone_cache.lock().unwrap().get(&cache_key) {
            return Ok(cached.clone());
        }

        let tesseract = self.require_tesseract()?;
        let cropped = match rasterize::rasterize_zone(pdf_path, page_number, rectangle).await {
            Ok(Some(png)) => png,
            Ok(None) => {
                warn!(
                    "zone '{zone_name}' references page {page_number}, beyond document length; evaluates to empty"
                );
                self.zone_cache.lock().unwrap().insert(cache_key, String::new());
                return Ok(String::new());
            }
            Err(e) => return Err(PipelineError::new(ErrorKind::OcrFailed, e)),
        };

        let text = self.run_tesseract(&tesseract, &cropped, language).await?;
        let trimmed = text.trim().to_string();
        self.zone_cache.lock().unwrap().insert(cache_key, trimmed.clone());
        Ok(trimmed)
    }

    fn require_tesseract(&self) -> Result<PathBuf, PipelineError> {
        self.resolver.resolve("tesseract").ok_or_else(|| {
            PipelineError::new(
                ErrorKind::DependencyMissing,
                "tesseract binary not found in bundled dependencies, standard install paths, or PATH",
            )
        })
    }

    /// Run `tesseract - - -l <language>`, feeding `png_bytes` on stdin and
    /// reading recognised text from stdout, under `self.timeout`.
    async fn run_tesseract(&self, tesseract: &Path, png_bytes: &[u8], language: &str) -> Result<String, PipelineError> {
        let mut child = Command::new(tesseract)
            .args(["-", "-", "-l", language])
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            // `wait_with_output` is dropped, not awaited to completion, when
            // the `timeout` below elapses first; without this the orphaned
            // tesseract process keeps running instead of being hard-killed.
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PipelineError::with_source(ErrorKind::OcrFailed, "failed to spawn tesseract", e))?;

        if let Some(mut stdin) = child.stdin.take() {
            let png_bytes = png_bytes.to_vec();
            let _ = stdin.write_all(&png_bytes).await;
        }

        let run = tokio::time::timeout(self.timeout, child.wait_with_output()).await;
        match run {
            Ok(Ok(output)) if output.status.success() => {
                debug!("tesseract produced {} bytes of text", output.stdout.len());
                Ok(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Ok(Ok(output)) => Err(PipelineError::new(
                ErrorKind::OcrFailed,
                format!("tesseract exited with {}: {}", output.status, String::from_utf8_lossy(&output.stderr)),
            )),
            Ok(Err(e)) => Err(PipelineError::with_source(ErrorKind::OcrFailed, "tesseract I/O error", e)),
            Err(_) => Err(PipelineError::new(ErrorKind::OcrFailed, "tesseract timed out and was killed")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tesseract_is_dependency_missing() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = ToolResolver::new(Some(dir.path().to_path_buf()));
        let service = OcrService::new(resolver);
        let err = service.require_tesseract().unwrap_err();
        assert_eq!(err.kind, ErrorKind::DependencyMissing);
    }
}
