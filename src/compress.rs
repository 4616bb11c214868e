//! Invokes an external PDF renderer to apply a quality profile and
//! validates the result (component F).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{ErrorKind, PipelineError};
use crate::pdf::PdfAnalysis;
use crate::tooling::ToolResolver;

/// Ghostscript gets this long to finish before it's hard-killed and the
/// action fails with `COMPRESSION_FAILED`, matching the OCR subprocess's
/// own deadline-and-kill contract (component F / §5, §9).
const DEFAULT_COMPRESS_TIMEOUT: Duration = Duration::from_secs(120);

/// A named bundle of compression parameters. Numeric defaults are the exact
/// values the original quality profiles used (see `DESIGN.md`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionProfile {
    pub color_dpi: u32,
    pub gray_dpi: u32,
    pub mono_dpi: u32,
    pub jpeg_quality: u8,
    pub downsample_images: bool,
    pub subset_fonts: bool,
    pub remove_duplicates: bool,
    pub optimize: bool,
    pub preserve_quality: bool,
}

impl CompressionProfile {
    pub const RECHNUNG: CompressionProfile = CompressionProfile {
        color_dpi: 300,
        gray_dpi: 300,
        mono_dpi: 600,
        jpeg_quality: 85,
        downsample_images: true,
        subset_fonts: true,
        remove_duplicates: true,
        optimize: true,
        preserve_quality: true,
    };

    pub const ARCHIV: CompressionProfile = CompressionProfile {
        color_dpi: 200,
        gray_dpi: 200,
        mono_dpi: 400,
        jpeg_quality: 80,
        downsample_images: true,
        subset_fonts: true,
        remove_duplicates: true,
        optimize: true,
        preserve_quality: true,
    };

    pub const SCAN: CompressionProfile = CompressionProfile {
        color_dpi: 150,
        gray_dpi: 150,
        mono_dpi: 300,
        jpeg_quality: 75,
        downsample_images: true,
        subset_fonts: true,
        remove_duplicates: true,
        optimize: true,
        preserve_quality: false,
    };

    pub const EMAIL: CompressionProfile = CompressionProfile {
        color_dpi: 100,
        gray_dpi: 100,
        mono_dpi: 200,
        jpeg_quality: 65,
        downsample_images: true,
        subset_fonts: true,
        remove_duplicates: true,
        optimize: true,
        preserve_quality: false,
    };

    pub fn by_name(name: &str) -> Option<CompressionProfile> {
        match name {
            "rechnung" => Some(Self::RECHNUNG),
            "archiv" => Some(Self::ARCHIV),
            "scan" => Some(Self::SCAN),
            "email" => Some(Self::EMAIL),
            _ => None,
        }
    }

    /// Apply `color_dpi`/`gray_dpi`/`mono_dpi`/`jpeg_quality` overrides from
    /// `action_params`, if present.
    pub fn with_overrides(mut self, params: &serde_json::Value) -> Self {
        if let Some(v) = params.get("color_dpi").and_then(|v| v.as_u64()) {
            self.color_dpi = v as u32;
        }
        if let Some(v) = params.get("gray_dpi").and_then(|v| v.as_u64()) {
            self.gray_dpi = v as u32;
        }
        if let Some(v) = params.get("mono_dpi").and_then(|v| v.as_u64()) {
            self.mono_dpi = v as u32;
        }
        if let Some(v) = params.get("jpeg_quality").and_then(|v| v.as_u64()) {
            self.jpeg_quality = v as u8;
        }
        self
    }
}

/// Auto-selection rules in priority order: scanned ⇒ `scan`;
/// file size > 10 MB ⇒ `email`; has forms ⇒ `rechnung`; else ⇒ `archiv`.
pub fn select_profile(params: &serde_json::Value, analysis: &PdfAnalysis) -> CompressionProfile {
    let explicit = params
        .get("compression_profile")
        .and_then(|v| v.as_str())
        .filter(|name| *name != "auto")
        .and_then(CompressionProfile::by_name);

    let base = explicit.unwrap_or_else(|| {
        const MB: u64 = 1024 * 1024;
        if analysis.is_scanned {
            CompressionProfile::SCAN
        } else if analysis.file_size > 10 * MB {
            CompressionProfile::EMAIL
        } else if analysis.has_forms {
            CompressionProfile::RECHNUNG
        } else {
            CompressionProfile::ARCHIV
        }
    });

    base.with_overrides(params)
}

/// Compress `pdf_path` in place using ghostscript, selecting `profile`.
/// Writes to a sibling temp file, validates it, and atomically replaces the
/// source only if validation passes; otherwise the temp file is discarded
/// and the action fails.
pub async fn compress(
    pdf_path: &Path,
    profile: &CompressionProfile,
    analysis: &PdfAnalysis,
    is_pdfa: bool,
    resolver: &ToolResolver,
) -> Result<(), PipelineError> {
    compress_with_timeout(pdf_path, profile, analysis, is_pdfa, resolver, DEFAULT_COMPRESS_TIMEOUT).await
}

/// As [`compress`], but with an explicit deadline for the ghostscript
/// invocation rather than [`DEFAULT_COMPRESS_TIMEOUT`].
pub async fn compress_with_timeout(
    pdf_path: &Path,
    profile: &CompressionProfile,
    analysis: &PdfAnalysis,
    is_pdfa: bool,
    resolver: &ToolResolver,
    timeout: Duration,
) -> Result<(), PipelineError> {
    let gs = resolver.resolve("gs").ok_or_else(|| {
        PipelineError::new(
            ErrorKind::DependencyMissing,
            "ghostscript binary not found in bundled dependencies, standard install paths, or PATH",
        )
    })?;

    let temp_output = pdf_path.with_extension("pdf.compressed");

    let mut cmd = Command::new(&gs);
    cmd.arg("-sDEVICE=pdfwrite")
        .arg("-dCompatibilityLevel=1.7")
        .arg("-dNOPAUSE")
        .arg("-dBATCH")
        .arg("-dQUIET")
        .arg("-dSAFER")
        .arg(format!("-sOutputFile={}", temp_output.display()))
        .arg(format!("-dColorImageResolution={}", profile.color_dpi))
        .arg(format!("-dGrayImageResolution={}", profile.gray_dpi))
        .arg(format!("-dMonoImageResolution={}", profile.mono_dpi));

    if profile.downsample_images {
        if analysis.avg_image_dpi > profile.color_dpi as f64 {
            cmd.arg("-dDownsampleColorImages=true")
                .arg("-dDownsampleGrayImages=true")
                .arg("-dDownsampleMonoImages=true")
                .arg("-dColorImageDownsampleType=/Bicubic")
                .arg("-dGrayImageDownsampleType=/Bicubic")
                .arg("-dMonoImageDownsampleType=/Bicubic")
                .arg("-dColorImageDownsampleThreshold=1.0")
                .arg("-dGrayImageDownsampleThreshold=1.0")
                .arg("-dMonoImageDownsampleThreshold=1.0");
        } else {
            cmd.arg("-dDownsampleColorImages=false")
                .arg("-dDownsampleGrayImages=false")
                .arg("-dDownsampleMonoImages=false");
        }
    }

    let jpeg_q = profile.jpeg_quality as f64 / 100.0;
    if profile.preserve_quality {
        cmd.arg("-dAutoFilterColorImages=true")
            .arg("-dAutoFilterGrayImages=true")
            .arg(format!("-dJPEGQ={jpeg_q:.2}"))
            .arg("-dColorImageFilter=/DCTEncode")
            .arg("-dGrayImageFilter=/DCTEncode")
            .arg("-dMonoImageFilter=/CCITTFaxEncode")
            .arg("-dEncodeColorImages=true")
            .arg("-dEncodeGrayImages=true")
            .arg("-dEncodeMonoImages=true");
    } else {
        cmd.arg("-dAutoFilterColorImages=false")
            .arg("-dAutoFilterGrayImages=false")
            .arg(format!("-dJPEGQ={jpeg_q:.2}"))
            .arg("-dColorImageFilter=/DCTEncode")
            .arg("-dGrayImageFilter=/DCTEncode")
            .arg("-dMonoImageFilter=/CCITTFaxEncode");
    }

    if profile.subset_fonts {
        cmd.arg("-dSubsetFonts=true")
            .arg("-dEmbedAllFonts=true")
            .arg("-dCompressFonts=true");
    }

    if profile.optimize {
        cmd.arg("-dOptimize=true")
            .arg("-dCompressPages=true")
            .arg("-dUseFlateCompression=true");
    }

    if profile.remove_duplicates {
        cmd.arg("-dDetectDuplicateImages=true");
    }

    if is_pdfa {
        cmd.arg("-dPDFA=2").arg("-dPDFACompatibilityPolicy=1");
    }

    cmd.arg(pdf_path);
    // See the OCR subprocess: without this, a timed-out ghostscript process
    // is left running in the background instead of hard-killed.
    cmd.kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(result) => result
            .map_err(|e| PipelineError::with_source(ErrorKind::CompressionFailed, "failed to spawn ghostscript", e))?,
        Err(_) => {
            let _ = tokio::fs::remove_file(&temp_output).await;
            return Err(PipelineError::new(
                ErrorKind::CompressionFailed,
                format!("ghostscript timed out after {:?} and was killed", timeout),
            ));
        }
    };

    if !output.status.success() {
        let _ = tokio::fs::remove_file(&temp_output).await;
        return Err(PipelineError::new(
            ErrorKind::CompressionFailed,
            format!("ghostscript exited with {}: {}", output.status, String::from_utf8_lossy(&output.stderr)),
        ));
    }

    let temp_len = tokio::fs::metadata(&temp_output).await.map(|m| m.len()).unwrap_or(0);
    if temp_len == 0 {
        return Err(PipelineError::new(
            ErrorKind::CompressionFailed,
            "ghostscript produced no output",
        ));
    }

    crate::pdf::validate(&temp_output).await.map_err(|e| {
        PipelineError::new(
            ErrorKind::CompressionFailed,
            format!("compressed output failed validation: {}", e.message),
        )
    })?;

    let original_len = tokio::fs::metadata(pdf_path).await.map(|m| m.len()).unwrap_or(0);
    crate::fsutil::move_file(&temp_output, pdf_path)
        .map_err(|e| PipelineError::with_source(ErrorKind::CompressionFailed, "failed to replace source with compressed output", e))?;

    if original_len > 0 {
        let reduction = 1.0 - (temp_len as f64 / original_len as f64);
        info!("compression reduced size by {:.1}%", reduction * 100.0);
        if reduction > 0.70 && profile.preserve_quality {
            warn!("high compression ratio ({:.1}%) with preserve_quality set — check output quality", reduction * 100.0);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis(is_scanned: bool, file_size: u64, has_forms: bool) -> PdfAnalysis {
        PdfAnalysis {
            is_scanned,
            file_size,
            has_forms,
            ..Default::default()
        }
    }

    #[test]
    fn auto_selects_scan_when_scanned() {
        let profile = select_profile(&serde_json::json!({}), &analysis(true, 0, false));
        assert_eq!(profile.color_dpi, CompressionProfile::SCAN.color_dpi);
    }

    #[test]
    fn auto_selects_email_for_large_files() {
        let profile = select_profile(&serde_json::json!({}), &analysis(false, 11 * 1024 * 1024, false));
        assert_eq!(profile.color_dpi, CompressionProfile::EMAIL.color_dpi);
    }

    #[test]
    fn auto_selects_rechnung_for_forms() {
        let profile = select_profile(&serde_json::json!({}), &analysis(false, 0, true));
        assert_eq!(profile.color_dpi, CompressionProfile::RECHNUNG.color_dpi);
    }

    #[test]
    fn auto_selects_archiv_otherwise() {
        let profile = select_profile(&serde_json::json!({}), &analysis(false, 0, false));
        assert_eq!(profile.color_dpi, CompressionProfile::ARCHIV.color_dpi);
    }

    #[test]
    fn explicit_profile_name_wins_over_auto_rules() {
        let profile = select_profile(
            &serde_json::json!({"compression_profile": "email"}),
            &analysis(true, 0, false),
        );
        assert_eq!(profile.color_dpi, CompressionProfile::EMAIL.color_dpi);
    }

    #[test]
    fn overrides_replace_matching_profile_keys() {
        let profile = select_profile(
            &serde_json::json!({"compression_profile": "archiv", "jpeg_quality": 50}),
            &analysis(false, 0, false),
        );
        assert_eq!(profile.jpeg_quality, 50);
        assert_eq!(profile.color_dpi, CompressionProfile::ARCHIV.color_dpi);
    }
}
