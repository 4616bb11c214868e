//! The persisted hotfolder configuration shape.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::HotfolderError;
use crate::expr;

pub type HotfolderId = String;

fn new_id() -> HotfolderId {
    uuid::Uuid::new_v4().to_string()
}

/// One watched input directory and everything it takes to process what
/// arrives there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotfolderConfig {
    pub id: HotfolderId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub enabled: bool,
    pub input_path: PathBuf,
    #[serde(default = "default_error_path_expression")]
    pub error_path_expression: String,
    #[serde(default)]
    pub actions: Vec<ProcessingAction>,
    #[serde(default)]
    pub action_params: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub process_pairs: bool,
    #[serde(default)]
    pub xml_field_mappings: Vec<FieldMapping>,
    #[serde(default = "default_output_filename_expression")]
    pub output_filename_expression: String,
    #[serde(default)]
    pub ocr_zones: Vec<OcrZone>,
    #[serde(default)]
    pub export_configs: Vec<ExportConfig>,
    #[serde(default)]
    pub stamp_configs: Vec<StampConfig>,
}

fn default_error_path_expression() -> String {
    "<InputPath>/error".to_string()
}

fn default_output_filename_expression() -> String {
    "<FileName>".to_string()
}

impl HotfolderConfig {
    /// Start building a config with a freshly generated id.
    pub fn builder(name: impl Into<String>, input_path: impl Into<PathBuf>) -> HotfolderConfigBuilder {
        HotfolderConfigBuilder::new(name, input_path)
    }

    /// Validate invariants that can be checked without
    /// consulting other configs: zone name uniqueness and non-collision
    /// with built-ins, and that every `zone`-sourced field mapping refers
    /// to a zone that exists.
    pub fn validate(&self) -> Result<(), HotfolderError> {
        let mut seen = std::collections::HashSet::new();
        for zone in &self.ocr_zones {
            if expr::is_builtin_name(&zone.name) {
                return Err(HotfolderError::ConfigInvalid(format!(
                    "zone name '{}' collides with a built-in variable",
                    zone.name
                )));
            }
            if !seen.insert(zone.name.as_str()) {
                return Err(HotfolderError::ConfigInvalid(format!(
                    "duplicate zone name '{}'",
                    zone.name
                )));
            }
        }

        for mapping in &self.xml_field_mappings {
            if mapping.source_kind == SourceKind::Zone {
                let zone_ref = mapping.zone_ref.as_deref().ok_or_else(|| {
                    HotfolderError::ConfigInvalid(format!(
                        "field '{}' has source_kind=zone but no zone_ref",
                        mapping.field_name
                    ))
                })?;
                if !self.ocr_zones.iter().any(|z| z.name == zone_ref) {
                    return Err(HotfolderError::ConfigInvalid(format!(
                        "field '{}' references unknown zone '{zone_ref}'",
                        mapping.field_name
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Builder for [`HotfolderConfig`], mirroring the conversion config builder
/// this crate's pipeline style is modelled on: defaults filled in, explicit
/// `.build()` runs validation rather than failing lazily at use time.
pub struct HotfolderConfigBuilder {
    inner: HotfolderConfig,
}

impl HotfolderConfigBuilder {
    pub fn new(name: impl Into<String>, input_path: impl Into<PathBuf>) -> Self {
        Self {
            inner: HotfolderConfig {
                id: new_id(),
                name: name.into(),
                description: String::new(),
                enabled: false,
                input_path: input_path.into(),
                error_path_expression: default_error_path_expression(),
                actions: Vec::new(),
                action_params: HashMap::new(),
                process_pairs: false,
                xml_field_mappings: Vec::new(),
                output_filename_expression: default_output_filename_expression(),
                ocr_zones: Vec::new(),
                export_configs: Vec::new(),
                stamp_configs: Vec::new(),
            },
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.inner.description = description.into();
        self
    }

    pub fn error_path_expression(mut self, expr: impl Into<String>) -> Self {
        self.inner.error_path_expression = expr.into();
        self
    }

    pub fn output_filename_expression(mut self, expr: impl Into<String>) -> Self {
        self.inner.output_filename_expression = expr.into();
        self
    }

    pub fn process_pairs(mut self, value: bool) -> Self {
        self.inner.process_pairs = value;
        self
    }

    pub fn action(mut self, action: ProcessingAction) -> Self {
        self.inner.actions.push(action);
        self
    }

    pub fn action_param(mut self, action_kind: impl Into<String>, params: serde_json::Value) -> Self {
        self.inner.action_params.insert(action_kind.into(), params);
        self
    }

    pub fn zone(mut self, zone: OcrZone) -> Self {
        self.inner.ocr_zones.push(zone);
        self
    }

    pub fn field_mapping(mut self, mapping: FieldMapping) -> Self {
        self.inner.xml_field_mappings.push(mapping);
        self
    }

    pub fn export(mut self, export: ExportConfig) -> Self {
        self.inner.export_configs.push(export);
        self
    }

    pub fn stamp(mut self, stamp: StampConfig) -> Self {
        self.inner.stamp_configs.push(stamp);
        self
    }

    /// Validate and produce the finished config.
    pub fn build(self) -> Result<HotfolderConfig, HotfolderError> {
        self.inner.validate()?;
        Ok(self.inner)
    }
}

/// The source of a field's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Static,
    Expression,
    Zone,
}

/// One entry in `xml_field_mappings`: how to compute one XML sidecar field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMapping {
    pub field_name: String,
    pub source_kind: SourceKind,
    pub value_or_expression: String,
    #[serde(default)]
    pub zone_ref: Option<String>,
}

impl FieldMapping {
    pub fn static_value(field_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            source_kind: SourceKind::Static,
            value_or_expression: value.into(),
            zone_ref: None,
        }
    }

    pub fn expression(field_name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            source_kind: SourceKind::Expression,
            value_or_expression: expression.into(),
            zone_ref: None,
        }
    }

    pub fn zone(field_name: impl Into<String>, zone_ref: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            source_kind: SourceKind::Zone,
            value_or_expression: String::new(),
            zone_ref: Some(zone_ref.into()),
        }
    }
}

/// A rectangular OCR-extraction region on one page of a PDF.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrZone {
    pub name: String,
    /// 1-based page number.
    pub page_number: u32,
    /// `(x0, y0, x1, y1)` in PDF points.
    pub rectangle: (f64, f64, f64, f64),
    pub language: String,
}

/// A processing step applied to a document.
///
/// `Compress` is the only action the pipeline actually executes.
/// `Stamp`/`Ocr`/`Rename` are accepted so configs exported by older/other
/// builds still import cleanly, but the pipeline logs a one-line warning
/// and skips them (see `DESIGN.md`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingAction {
    Compress,
    Stamp,
    Ocr,
    Rename,
}

/// Inert stamp parameters, retained only so configs round-trip (no stamping
/// executor exists in this engine — see `DESIGN.md` Open Question decisions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StampConfig {
    pub text_expression: String,
    pub page_selector: String,
    pub position: String,
    pub font_size: f32,
}

/// Where and how a finished (PDF, XML) pair is written out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    pub target_kind: TargetKind,
    pub output_path_expression: String,
    pub filename_expression: String,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// The kind of export target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    PdfFile,
    SearchablePdfA,
    XmlFile,
    DatabaseRow,
}
