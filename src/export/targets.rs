//! One implementation per `TargetKind`, each using the write-temp/fsync/
//! rename protocol from `fsutil`.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::db::{ExportDriver, ExportRowContext};
use crate::fields::XmlSidecar;
use crate::tooling::ToolResolver;

/// Deadline for the `ocrmypdf` subprocess, matching ghostscript's own
/// default (component F's `DEFAULT_COMPRESS_TIMEOUT`) — neither gets an
/// unbounded `.output().await` per §5/§9's kill-on-cancellation contract.
const OCRMYPDF_TIMEOUT: Duration = Duration::from_secs(120);

fn filename_with_extension(filename: &str, ext: &str) -> String {
    if Path::new(filename).extension().is_some() {
        filename.to_string()
    } else {
        format!("{filename}.{ext}")
    }
}

pub fn write_pdf_file(pdf_path: &Path, dir: &Path, filename: &str) -> Result<String, String> {
    let target = dir.join(filename_with_extension(filename, "pdf"));
    let bytes = std::fs::read(pdf_path).map_err(|e| format!("failed to read source PDF: {e}"))?;
    crate::fsutil::atomic_write(&target, &bytes).map_err(|e| format!("failed to write {}: {e}", target.display()))?;
    Ok(target.display().to_string())
}

/// Runs OCR text embedding (`ocrmypdf --output-type pdfa`, resolved the same
/// way as `gs`/`tesseract`) on the source PDF before writing the searchable
/// result to the target path.
pub async fn write_searchable_pdf_a(
    pdf_path: &Path,
    dir: &Path,
    filename: &str,
    resolver: &ToolResolver,
) -> Result<String, String> {
    let ocrmypdf = resolver
        .resolve("ocrmypdf")
        .ok_or_else(|| "ocrmypdf binary not found in bundled dependencies, standard install paths, or PATH".to_string())?;

    let target = dir.join(filename_with_extension(filename, "pdf"));
    let temp_output = target.with_extension("pdf.pending");

    let mut cmd = tokio::process::Command::new(&ocrmypdf);
    cmd.arg("--output-type")
        .arg("pdfa")
        .arg("--skip-text")
        .arg(pdf_path)
        .arg(&temp_output)
        .kill_on_drop(true);

    let output = match tokio::time::timeout(OCRMYPDF_TIMEOUT, cmd.output()).await {
        Ok(result) => result.map_err(|e| format!("failed to spawn ocrmypdf: {e}"))?,
        Err(_) => {
            let _ = std::fs::remove_file(&temp_output);
            return Err(format!("ocrmypdf timed out after {OCRMYPDF_TIMEOUT:?} and was killed"));
        }
    };

    if !output.status.success() {
        let _ = std::fs::remove_file(&temp_output);
        return Err(format!(
            "ocrmypdf exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    crate::fsutil::move_file(&temp_output, &target).map_err(|e| format!("failed to place searchable PDF/A at {}: {e}", target.display()))?;
    Ok(target.display().to_string())
}

pub fn write_xml_file(sidecar: &XmlSidecar, dir: &Path, filename: &str) -> Result<String, String> {
    let target = dir.join(filename_with_extension(filename, "xml"));
    sidecar
        .write_to(&target)
        .map_err(|e| format!("failed to write {}: {e}", target.display()))?;
    Ok(target.display().to_string())
}

pub async fn write_database_row(
    driver: Option<&dyn ExportDriver>,
    hotfolder_id: &str,
    hotfolder_name: &str,
    pdf_path: &Path,
    sidecar: &XmlSidecar,
) -> Result<String, String> {
    let driver = driver.ok_or_else(|| "no database export driver configured".to_string())?;

    let fields: HashMap<String, String> = sidecar.fields.iter().cloned().collect();
    let ctx = ExportRowContext {
        hotfolder_id: hotfolder_id.to_string(),
        hotfolder_name: hotfolder_name.to_string(),
        pdf_path: pdf_path.to_path_buf(),
        fields,
    };

    driver
        .write_row(&ctx)
        .await
        .map_err(|e| e.to_string())?;
    Ok("database row written".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_pdf_file_copies_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("source.pdf");
        std::fs::write(&src, b"%PDF-1.4 fake").unwrap();

        let out_dir = dir.path().join("out");
        let result = write_pdf_file(&src, &out_dir, "invoice_1").unwrap();
        assert!(result.ends_with("invoice_1.pdf"));
        assert_eq!(std::fs::read(&result).unwrap(), b"%PDF-1.4 fake");
    }

    #[test]
    fn write_xml_file_writes_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let mut sidecar = XmlSidecar::default();
        sidecar.set("Sum", "123.45");

        let result = write_xml_file(&sidecar, dir.path(), "invoice_1").unwrap();
        assert!(result.ends_with("invoice_1.xml"));
        assert!(std::fs::read_to_string(&result).unwrap().contains("123.45"));
    }

    #[tokio::test]
    async fn database_row_without_driver_fails() {
        let sidecar = XmlSidecar::default();
        let result = write_database_row(None, "hf1", "Invoices", Path::new("/tmp/x.pdf"), &sidecar).await;
        assert!(result.is_err());
    }
}
