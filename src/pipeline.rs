//! Orchestrates per-document processing: the single-document state machine
//! from validate through export, with an atomic scratch workspace and error
//! bucketing on any stage failure (component H).

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Local;
use tracing::{info, warn};

use crate::compress;
use crate::config::{HotfolderConfig, ProcessingAction};
use crate::counters::CounterStore;
use crate::db::ExportDriver;
use crate::error::{ErrorKind, PipelineError};
use crate::export::{self, ExportInputs};
use crate::expr::{self, VariableContext};
use crate::fields::{self, XmlSidecar};
use crate::ocr::OcrService;
use crate::pdf;
use crate::tooling::ToolResolver;

/// A PDF, paired with its optional sidecar XML, as observed by the
/// supervisor once both are stable on disk.
#[derive(Debug, Clone)]
pub struct DocumentPair {
    pub pdf_path: PathBuf,
    pub xml_path: Option<PathBuf>,
    pub arrival_time: SystemTime,
}

/// A per-pipeline-execution scratch directory. Unconditionally removed on
/// drop, including on panics — the workspace is a scoped resource, not
/// something that relies on the happy path to clean up.
pub struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    /// Create a fresh workspace under `scratch_root`, named with a random
    /// identifier.
    pub fn create(scratch_root: &Path) -> std::io::Result<Self> {
        let dir = scratch_root.join(uuid::Uuid::new_v4().to_string());
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Move `src` into the workspace, keeping its file name, falling back to
    /// copy+remove across filesystems.
    pub fn claim(&self, src: &Path) -> std::io::Result<PathBuf> {
        let file_name = src.file_name().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "source path has no file name")
        })?;
        let dest = self.dir.join(file_name);
        crate::fsutil::move_file(src, &dest)?;
        Ok(dest)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove workspace {}: {e}", self.dir.display());
            }
        }
    }
}

/// Best-effort sweep removing workspace directories under `scratch_root`
/// older than `max_age` — the belt-and-braces recovery the original
/// `cleanup_temp_dir` performs for workspaces orphaned by a killed process
/// (the per-execution `Workspace` guard already handles the common case).
pub fn cleanup_stale_workspaces(scratch_root: &Path, max_age: Duration) {
    let Ok(entries) = std::fs::read_dir(scratch_root) else {
        return;
    };
    let now = SystemTime::now();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let age = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|modified| now.duration_since(modified).ok());
        if age.map(|a| a > max_age).unwrap_or(false) {
            info!("removing stale workspace {}", path.display());
            let _ = std::fs::remove_dir_all(&path);
        }
    }
}

/// The terminal result of one pipeline execution.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// Reached `EXPORTED`/`DONE`. Carries one `(success, message)` per
    /// configured export (exports don't abort on sibling
    /// failure, but an overall failed export still fails the pipeline).
    Done { exports: Vec<(bool, String)> },
    /// Failed at some stage; the pair has already been moved to the error
    /// bucket by the time this is returned.
    Failed { error: PipelineError },
}

/// Collaborators a pipeline execution needs, gathered once per hotfolder
/// rather than reconstructed per document.
pub struct Pipeline<'a> {
    pub config: &'a HotfolderConfig,
    pub counters: &'a CounterStore,
    pub resolver: &'a ToolResolver,
    pub scratch_root: &'a Path,
    pub db_driver: Option<&'a dyn ExportDriver>,
}

impl<'a> Pipeline<'a> {
    pub async fn run(&self, pair: DocumentPair) -> PipelineOutcome {
        // The workspace must outlive any error bucketing: its `Drop` impl
        // unconditionally removes the scratch directory, and `run_inner`
        // claims (moves) the input files into it as its first step. If the
        // workspace were dropped before bucketing ran, a failure on any
        // later stage would destroy the claimed files instead of relocating
        // them to the error path. So it's created here, in `run`, and
        // stays alive across both `run_inner` and `bucket_on_failure`.
        let workspace = match Workspace::create(self.scratch_root) {
            Ok(w) => w,
            Err(e) => {
                let error = PipelineError::with_source(ErrorKind::ValidationFailed, "failed to create scratch workspace", e);
                self.bucket_on_failure(&pair, &pair, &error).await;
                return PipelineOutcome::Failed { error };
            }
        };

        // Tracks wherever the PDF/XML currently live: the original input
        // location until `Workspace::claim` moves them, the workspace
        // location after. Error bucketing must move from *this*, not from
        // `pair`'s original paths — once claimed, nothing remains there to
        // move, and bucketing against a stale path would silently drop the
        // file.
        let mut current = pair.clone();
        match self.run_inner(&workspace, &pair, &mut current).await {
            Ok(exports) => PipelineOutcome::Done { exports },
            Err(error) => {
                self.bucket_on_failure(&pair, &current, &error).await;
                PipelineOutcome::Failed { error }
            }
        }
    }

    async fn run_inner(
        &self,
        workspace: &Workspace,
        pair: &DocumentPair,
        current: &mut DocumentPair,
    ) -> Result<Vec<(bool, String)>, PipelineError> {
        let pdf_path = workspace
            .claim(&pair.pdf_path)
            .map_err(|e| PipelineError::with_source(ErrorKind::ValidationFailed, "failed to move input into workspace", e))?;
        current.pdf_path = pdf_path.clone();
        let xml_path = pair
            .xml_path
            .as_ref()
            .map(|p| workspace.claim(p))
            .transpose()
            .map_err(|e| PipelineError::with_source(ErrorKind::ValidationFailed, "failed to move sidecar into workspace", e))?;
        current.xml_path = xml_path.clone();

        pdf::validate(&pdf_path).await?;
        let analysis = pdf::analyze(&pdf_path).await;

        let resolver = self.resolver.clone();
        let ocr = OcrService::new(resolver.clone());

        let mut ctx = VariableContext::new();
        self.build_context(&mut ctx, &pair.pdf_path, &pdf_path, &analysis, &ocr).await?;

        let mut sidecar = XmlSidecar::read_or_default(xml_path.as_deref())?;

        if !self.config.xml_field_mappings.is_empty() || !self.config.ocr_zones.is_empty() {
            fields::apply_field_mappings(
                &pdf_path,
                &mut sidecar,
                &self.config.xml_field_mappings,
                &self.config.ocr_zones,
                &mut ctx,
                &ocr,
                Some(self.counters),
            )
            .await?;
        }

        let sidecar_path = pdf_path.with_extension("xml");
        sidecar.write_to(&sidecar_path)?;

        self.apply_actions(&pdf_path, &analysis).await?;

        let inputs = ExportInputs {
            pdf_path: &pdf_path,
            sidecar: &sidecar,
            hotfolder_id: &self.config.id,
            hotfolder_name: &self.config.name,
            resolver: &resolver,
            db_driver: self.db_driver,
        };
        let results = export::run_exports(&self.config.export_configs, &ctx, Some(self.counters), &inputs).await;

        if results.iter().any(|(ok, _)| !ok) {
            let summary = results
                .iter()
                .filter(|(ok, _)| !ok)
                .map(|(_, msg)| msg.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(PipelineError::new(ErrorKind::ExportFailed, summary));
        }

        Ok(results)
    }

    async fn build_context(
        &self,
        ctx: &mut VariableContext,
        original_pdf_path: &Path,
        workspace_pdf_path: &Path,
        analysis: &pdf::PdfAnalysis,
        ocr: &OcrService,
    ) -> Result<(), PipelineError> {
        let file_stem = original_pdf_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = original_pdf_path
            .extension()
            .map(|s| format!(".{}", s.to_string_lossy()))
            .unwrap_or_default();
        let full_name = original_pdf_path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        ctx.set("FileName", file_stem);
        ctx.set("FileExtension", extension);
        ctx.set("FilePath", original_pdf_path.to_string_lossy().into_owned());
        ctx.set("FullFileName", full_name);
        ctx.set("FileSize", analysis.file_size.to_string());
        ctx.set("FileSizeMB", format!("{:.2}", analysis.file_size as f64 / (1024.0 * 1024.0)));
        ctx.set("InputPath", self.config.input_path.to_string_lossy().into_owned());
        ctx.set_datetime_builtins(Local::now());

        self.set_level_variables(ctx, original_pdf_path);

        if self.references_ocr_full_text() {
            let text = ocr.full_text(workspace_pdf_path).await?;
            ctx.set("OCR_FullText", text);
        } else {
            ctx.set("OCR_FullText", String::new());
        }

        Ok(())
    }

    /// `level0..level5` reconstruct the path of `pdf_path` relative to
    /// `input_path`, one component per level; absent levels are empty.
    fn set_level_variables(&self, ctx: &mut VariableContext, pdf_path: &Path) {
        set_level_variables_for(self.config, ctx, pdf_path)
    }

    /// Whether any expression this pipeline will evaluate references
    /// `OCR_FullText` — used to avoid running full-document OCR (and
    /// therefore requiring the OCR tool) unless the value is actually
    /// consumed.
    fn references_ocr_full_text(&self) -> bool {
        let mentions = |s: &str| s.contains("OCR_FullText");
        mentions(&self.config.output_filename_expression)
            || mentions(&self.config.error_path_expression)
            || self
                .config
                .xml_field_mappings
                .iter()
                .any(|m| mentions(&m.value_or_expression))
            || self
                .config
                .export_configs
                .iter()
                .any(|e| mentions(&e.output_path_expression) || mentions(&e.filename_expression))
    }

    async fn apply_actions(&self, pdf_path: &Path, analysis: &pdf::PdfAnalysis) -> Result<(), PipelineError> {
        for action in &self.config.actions {
            match action {
                ProcessingAction::Compress => {
                    let empty_params = serde_json::Value::Object(serde_json::Map::new());
                    let params = self
                        .config
                        .action_params
                        .get("compress")
                        .unwrap_or(&empty_params);
                    let profile = compress::select_profile(params, analysis);
                    compress::compress(pdf_path, &profile, analysis, false, self.resolver).await?;
                }
                other => {
                    warn!(hotfolder_id = %self.config.id, action = ?other, "action is recognised but not executed by this engine");
                }
            }
        }
        Ok(())
    }

    async fn bucket_on_failure(&self, original: &DocumentPair, current: &DocumentPair, error: &PipelineError) {
        bucket_failure(self.config, self.counters, original, current, error).await
    }
}

/// Move a (PDF, XML) pair to the hotfolder's resolved error bucket,
/// inserting a timestamp suffix on any filename collision.
///
/// `original` supplies the pre-claim path used to build the variable
/// context (`FileName`, `level0..level5` are relative to `input_path`,
/// which a workspace path is not); `current` supplies the actual file
/// locations to move from, since those may already be inside the scratch
/// workspace by the time a later stage fails.
///
/// A free function rather than a `Pipeline` method so the supervisor can
/// bucket a document directly for failures that never reach a pipeline
/// execution at all — e.g. `UNPAIRED_INPUT` after the pairing timeout,
/// where the PDF never left the input directory to begin with (there,
/// `original` and `current` are the same pair).
pub(crate) async fn bucket_failure(
    config: &HotfolderConfig,
    counters: &CounterStore,
    original: &DocumentPair,
    current: &DocumentPair,
    error: &PipelineError,
) {
    warn!(hotfolder_id = %config.id, kind = %error.kind, "pipeline failed: {}", error.message);

    let mut ctx = VariableContext::new();
    let file_stem = original
        .pdf_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    ctx.set("FileName", file_stem);
    ctx.set("InputPath", config.input_path.to_string_lossy().into_owned());
    ctx.set_datetime_builtins(Local::now());
    set_level_variables_for(config, &mut ctx, &original.pdf_path);

    let error_dir = match expr::evaluate(&config.error_path_expression, &ctx, Some(counters)) {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            warn!("failed to evaluate error_path_expression: {e}");
            config.input_path.join("error")
        }
    };

    if let Err(e) = std::fs::create_dir_all(&error_dir) {
        warn!("failed to create error directory {}: {e}", error_dir.display());
        return;
    }

    for source in [Some(&current.pdf_path), current.xml_path.as_ref()].into_iter().flatten() {
        if !source.exists() {
            continue;
        }
        let file_name = match source.file_name() {
            Some(n) => n.to_string_lossy().into_owned(),
            None => continue,
        };
        let dest = crate::fsutil::collision_safe_destination(&error_dir, &file_name, Local::now());
        if let Err(e) = crate::fsutil::move_file(source, &dest) {
            warn!("failed to move {} to error bucket: {e}", source.display());
        }
    }
}

/// `level0..level5` reconstruction shared by [`Pipeline::set_level_variables`]
/// and [`bucket_failure`] (which has no `Pipeline` instance to call through).
fn set_level_variables_for(config: &HotfolderConfig, ctx: &mut VariableContext, pdf_path: &Path) {
    let relative = pdf_path.strip_prefix(&config.input_path).unwrap_or(pdf_path);
    let components: Vec<String> = relative
        .parent()
        .map(|parent| {
            parent
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();

    for level in 0..=5 {
        ctx.set(format!("level{level}"), components.get(level).cloned().unwrap_or_default());
    }
}
