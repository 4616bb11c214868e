//! Resolves configured field mappings into an XML sidecar document
//! (component E).
//!
//! The sidecar shape is fixed: `<Document><Fields><FieldName>value
//! </FieldName>...</Fields></Document>`, read back with `quick-xml` to seed
//! context with values from a prior run and written with the same writer
//! after mappings are applied.

use std::path::Path;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracing::debug;

use crate::config::{FieldMapping, OcrZone, SourceKind};
use crate::counters::CounterStore;
use crate::error::{ErrorKind, PipelineError};
use crate::expr::{self, VariableContext};
use crate::ocr::OcrService;

/// An in-memory field sidecar: an ordered list of `(field_name, value)`.
#[derive(Debug, Clone, Default)]
pub struct XmlSidecar {
    pub fields: Vec<(String, String)>,
}

impl XmlSidecar {
    pub fn get(&self, field_name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == field_name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, field_name: impl Into<String>, value: impl Into<String>) {
        let field_name = field_name.into();
        let value = value.into();
        if let Some(entry) = self.fields.iter_mut().find(|(name, _)| *name == field_name) {
            entry.1 = value;
        } else {
            self.fields.push((field_name, value));
        }
    }

    /// Read an existing sidecar, or an empty one if `path` is absent.
    pub fn read_or_default(path: Option<&Path>) -> Result<Self, PipelineError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::with_source(ErrorKind::FieldEvaluationFailed, "failed to read XML sidecar", e))?;
        Self::parse(&content)
    }

    fn parse(xml: &str) -> Result<Self, PipelineError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut fields = Vec::new();
        let mut in_fields = false;
        let mut current_field: Option<String> = None;
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) if e.name().as_ref() == b"Fields" => in_fields = true,
                Ok(Event::End(e)) if e.name().as_ref() == b"Fields" => in_fields = false,
                Ok(Event::Start(e)) if in_fields => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    current_field = Some(name);
                }
                Ok(Event::Text(t)) if in_fields && current_field.is_some() => {
                    let text = t
                        .unescape()
                        .map_err(|e| {
                            PipelineError::with_source(ErrorKind::FieldEvaluationFailed, "malformed XML sidecar text", e)
                        })?
                        .into_owned();
                    fields.push((current_field.clone().unwrap(), text));
                }
                Ok(Event::End(_)) if in_fields => current_field = None,
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(PipelineError::with_source(
                        ErrorKind::FieldEvaluationFailed,
                        "failed to parse XML sidecar",
                        e,
                    ))
                }
            }
            buf.clear();
        }

        Ok(Self { fields })
    }

    /// Write `/root/Document/Fields/<FieldName>value</FieldName>` to `path`
    /// atomically.
    pub fn write_to(&self, path: &Path) -> Result<(), PipelineError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

        writer
            .write_event(Event::Start(BytesStart::new("Document")))
            .map_err(xml_write_err)?;
        writer
            .write_event(Event::Start(BytesStart::new("Fields")))
            .map_err(xml_write_err)?;

        for (name, value) in &self.fields {
            writer
                .write_event(Event::Start(BytesStart::new(name.as_str())))
                .map_err(xml_write_err)?;
            writer
                .write_event(Event::Text(BytesText::new(value)))
                .map_err(xml_write_err)?;
            writer
                .write_event(Event::End(BytesEnd::new(name.as_str())))
                .map_err(xml_write_err)?;
        }

        writer
            .write_event(Event::End(BytesEnd::new("Fields")))
            .map_err(xml_write_err)?;
        writer
            .write_event(Event::End(BytesEnd::new("Document")))
            .map_err(xml_write_err)?;

        let bytes = writer.into_inner();
        crate::fsutil::atomic_write(path, &bytes)
            .map_err(|e| PipelineError::with_source(ErrorKind::FieldEvaluationFailed, "failed to write XML sidecar", e))
    }
}

fn xml_write_err(e: quick_xml::Error) -> PipelineError {
    PipelineError::with_source(ErrorKind::FieldEvaluationFailed, "failed to write XML sidecar", e)
}

/// Apply every configured field mapping, in order, against `ctx`.
///
/// Evaluation order: zones first (each set into `ctx` under its
/// own name so expressions can reference it), then static/expression
/// mappings in config order, with each mapping's resolved value folded
/// back into `ctx` before the next mapping evaluates — so later mappings
/// see earlier ones.
pub async fn apply_field_mappings(
    pdf_path: &Path,
    sidecar: &mut XmlSidecar,
    mappings: &[FieldMapping],
    zones: &[OcrZone],
    ctx: &mut VariableContext,
    ocr: &OcrService,
    counters: Option<&CounterStore>,
) -> Result<(), PipelineError> {
    for zone in zones {
        let text = ocr
            .zone_text(pdf_path, &zone.name, zone.page_number, zone.rectangle, &zone.language)
            .await?;
        ctx.set(zone.name.clone(), text);
    }

    for mapping in mappings {
        let value = match mapping.source_kind {
            SourceKind::Static => mapping.value_or_expression.clone(),
            SourceKind::Expression => expr::evaluate(&mapping.value_or_expression, ctx, counters)
                .map_err(|e| PipelineError::with_source(ErrorKind::FieldEvaluationFailed, "expression evaluation failed", e))?,
            SourceKind::Zone => {
                // Validated at config load: zone_ref must name an existing zone,
                // whose value is already in `ctx` from the loop above.
                let zone_ref = mapping.zone_ref.as_deref().unwrap_or_default();
                ctx.get(zone_ref).unwrap_or_default().to_string()
            }
        };

        debug!(field = %mapping.field_name, "resolved field value");
        sidecar.set(mapping.field_name.clone(), value.clone());
        ctx.set(mapping.field_name.clone(), value);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecar_round_trips_through_xml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.xml");

        let mut sidecar = XmlSidecar::default();
        sidecar.set("Sum", "123.45");
        sidecar.set("Vendor", "Acme & Co");
        sidecar.write_to(&path).unwrap();

        let reread = XmlSidecar::read_or_default(Some(&path)).unwrap();
        assert_eq!(reread.get("Sum"), Some("123.45"));
        assert_eq!(reread.get("Vendor"), Some("Acme & Co"));
    }

    #[test]
    fn missing_sidecar_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.xml");
        let sidecar = XmlSidecar::read_or_default(Some(&path)).unwrap();
        assert!(sidecar.fields.is_empty());
    }

    #[test]
    fn no_path_reads_as_empty() {
        let sidecar = XmlSidecar::read_or_default(None).unwrap();
        assert!(sidecar.fields.is_empty());
    }
}
