//! Writes a (PDF, XML) pair to every configured export target (component G).

mod targets;

use std::path::Path;

use tracing::warn;

use crate::config::{ExportConfig, TargetKind};
use crate::counters::CounterStore;
use crate::db::ExportDriver;
use crate::expr::{self, VariableContext};
use crate::fields::XmlSidecar;
use crate::tooling::ToolResolver;

/// Everything the router needs beyond the per-export config: the finished
/// document, its sidecar, and collaborators for kinds that need them.
pub struct ExportInputs<'a> {
    pub pdf_path: &'a Path,
    pub sidecar: &'a XmlSidecar,
    pub hotfolder_id: &'a str,
    pub hotfolder_name: &'a str,
    pub resolver: &'a ToolResolver,
    pub db_driver: Option<&'a dyn ExportDriver>,
}

/// Run every `ExportConfig` in order. Does not abort on a failed export;
/// returns one `(success, message)` per attempt.
pub async fn run_exports(
    exports: &[ExportConfig],
    ctx: &VariableContext,
    counters: Option<&CounterStore>,
    inputs: &ExportInputs<'_>,
) -> Vec<(bool, String)> {
    let mut results = Vec::with_capacity(exports.len());
    for export in exports {
        let result = run_one(export, ctx, counters, inputs).await;
        if let Err(ref msg) = result {
            warn!("export to {:?} failed: {msg}", export.target_kind);
        }
        results.push(match result {
            Ok(path) => (true, path),
            Err(msg) => (false, msg),
        });
    }
    results
}

async fn run_one(
    export: &ExportConfig,
    ctx: &VariableContext,
    counters: Option<&CounterStore>,
    inputs: &ExportInputs<'_>,
) -> Result<String, String> {
    let dir = expr::evaluate(&export.output_path_expression, ctx, counters)
        .map_err(|e| format!("output_path_expression evaluation failed: {e}"))?;
    let filename = expr::evaluate(&export.filename_expression, ctx, counters)
        .map_err(|e| format!("filename_expression evaluation failed: {e}"))?;

    let dir = std::path::PathBuf::from(dir);
    std::fs::create_dir_all(&dir).map_err(|e| format!("failed to create export directory: {e}"))?;

    match export.target_kind {
        TargetKind::PdfFile => targets::write_pdf_file(inputs.pdf_path, &dir, &filename),
        TargetKind::SearchablePdfA => {
            targets::write_searchable_pdf_a(inputs.pdf_path, &dir, &filename, inputs.resolver).await
        }
        TargetKind::XmlFile => targets::write_xml_file(inputs.sidecar, &dir, &filename),
        TargetKind::DatabaseRow => {
            targets::write_database_row(
                inputs.db_driver,
                inputs.hotfolder_id,
                inputs.hotfolder_name,
                inputs.pdf_path,
                inputs.sidecar,
            )
            .await
        }
    }
}
