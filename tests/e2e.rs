//! End-to-end and cross-component integration tests for hotfolder-core.
//!
//! Tests that do not require a real PDF (config round-trip, counter
//! concurrency, supervisor reconciliation, unpaired-input bucketing) run
//! unconditionally against a scratch filesystem via `tempfile::tempdir()`.
//! Tests that exercise the full pipeline need `pdfium` to actually open and
//! raster a PDF; those are gated behind `HOTFOLDER_E2E_PDFIUM=1` so a
//! default `cargo test` run never depends on a system pdfium install.
//!
//! Run the gated tests with:
//!   HOTFOLDER_E2E_PDFIUM=1 cargo test --test e2e -- --nocapture

use std::sync::Arc;
use std::time::Duration;

use hotfolder_core::{
    AlwaysLicensed, ConfigStore, CounterStore, ExportConfig, FieldMapping, HotfolderConfig,
    OcrZone, ProcessingAction, Settings, SourceKind, TargetKind,
};

/// A minimal-but-valid one-page PDF, small enough to embed inline. Used only
/// by the `HOTFOLDER_E2E_PDFIUM`-gated tests below.
const MINIMAL_PDF: &[u8] = b"%PDF-1.4\n\
1 0 obj<</Type/Catalog/Pages 2 0 R>>endobj\n\
2 0 obj<</Type/Pages/Kids[3 0 R]/Count 1>>endobj\n\
3 0 obj<</Type/Page/Parent 2 0 R/MediaBox[0 0 200 200]/Resources<<>>>>endobj\n\
trailer<</Size 4/Root 1 0 R>>\n\
%%EOF\n";

macro_rules! skip_unless_pdfium_ready {
    () => {
        if std::env::var("HOTFOLDER_E2E_PDFIUM").is_err() {
            println!("SKIP — set HOTFOLDER_E2E_PDFIUM=1 to run tests that need a real pdfium install");
            return;
        }
    };
}

fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.stability_window_ms = 50;
    settings.pairing_timeout_ms = 200;
    settings.worker_pool_size = 2;
    settings.queue_capacity = 16;
    settings
}

// ── Counter store: monotonic-sequence invariant ──────

#[tokio::test]
async fn counter_increments_are_strictly_increasing_under_concurrency() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(CounterStore::open(dir.path().join("counters.json")));

    let mut handles = Vec::new();
    for _ in 0..50 {
        let store = Arc::clone(&store);
        handles.push(tokio::task::spawn_blocking(move || store.get_and_increment("invoice", 1, 1)));
    }

    let mut values: Vec<i64> = Vec::new();
    for handle in handles {
        values.push(handle.await.unwrap());
    }
    values.sort_unstable();

    let expected: Vec<i64> = (1..=50).collect();
    assert_eq!(values, expected, "every value must be distinct and form 1..=50 with no gaps or repeats");
    assert_eq!(store.get("invoice", 0), 51);
}

#[tokio::test]
async fn counter_survives_simulated_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("counters.json");

    {
        let store = CounterStore::open(&path);
        for _ in 0..3 {
            store.get_and_increment("invoice", 1, 1);
        }
    }
    // Simulated crash/restart: a fresh store opened against the same file
    // must pick up where the last one left off, never regressing.
    let reopened = CounterStore::open(&path);
    assert_eq!(reopened.get_and_increment("invoice", 1, 1), 3);
}

// ── Config store: export/import round-trip ───────────────────────

#[test]
fn config_export_then_import_round_trips_modulo_id_and_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = ConfigStore::load(dir.path().join("hotfolders.json")).unwrap();

    let original = HotfolderConfig::builder("Invoices", dir.path().join("in"))
        .field_mapping(FieldMapping::static_value("Source", "scanner-1"))
        .export(ExportConfig {
            target_kind: TargetKind::PdfFile,
            output_path_expression: "<InputPath>/out".to_string(),
            filename_expression: "<FileName>".to_string(),
            params: serde_json::Map::new(),
        })
        .build()
        .unwrap();

    let (ok, id) = store.add(original.clone());
    assert!(ok);
    store.enable(&id, &AlwaysLicensed);

    let exported = store.export(&id).unwrap();
    let (ok, new_id) = store.import(exported);
    assert!(ok);
    assert_ne!(new_id, id);

    let imported = store.get(&new_id).unwrap();
    assert_eq!(imported.name, original.name);
    assert_eq!(imported.input_path, original.input_path);
    assert_eq!(imported.xml_field_mappings.len(), original.xml_field_mappings.len());
    assert_eq!(imported.export_configs.len(), original.export_configs.len());
    assert!(!imported.enabled, "imported configs must always start disabled");
}

#[test]
fn enabling_second_config_on_same_input_path_fails_with_duplicate_input_path() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = ConfigStore::load(dir.path().join("hotfolders.json")).unwrap();

    let shared_input = dir.path().join("shared");
    let mut a = HotfolderConfig::builder("A", &shared_input).build().unwrap();
    a.enabled = true;
    let (_, id_a) = store.add(a);

    let b = HotfolderConfig::builder("B", &shared_input).build().unwrap();
    let (_, id_b) = store.add(b);

    let (ok, message) = store.enable(&id_b, &AlwaysLicensed);
    assert!(!ok);
    assert!(message.contains("already used"));
    assert!(store.get(&id_a).unwrap().enabled);
    assert!(!store.get(&id_b).unwrap().enabled);
}

// ── Supervisor: status string and config reconciliation ───

#[tokio::test]
async fn supervisor_status_reflects_enabled_count() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = hotfolder_core::Supervisor::new(
        test_settings(),
        Arc::new(CounterStore::open(dir.path().join("counters.json"))),
        hotfolder_core::tooling::ToolResolver::new(Some(dir.path().to_path_buf())),
        dir.path().join("scratch"),
        None,
    );

    let mut a = HotfolderConfig::builder("A", dir.path().join("in-a")).build().unwrap();
    a.enabled = true;
    let mut b = HotfolderConfig::builder("B", dir.path().join("in-b")).build().unwrap();
    b.enabled = true;
    let c = HotfolderConfig::builder("C", dir.path().join("in-c")).build().unwrap();

    supervisor.set_configs(vec![a, b, c]).await;
    assert_eq!(supervisor.status().await, "2 von 3 Hotfoldern aktiv");

    supervisor.stop().await;
}

/// Boundary behaviour: `process_pairs=true` and only a PDF
/// arrives — after the pairing timeout, the pair is bucketed with
/// `UNPAIRED_INPUT` rather than processed.
#[tokio::test]
async fn unpaired_pdf_is_bucketed_after_pairing_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    std::fs::create_dir_all(&input).unwrap();

    let supervisor = hotfolder_core::Supervisor::new(
        test_settings(),
        Arc::new(CounterStore::open(dir.path().join("counters.json"))),
        hotfolder_core::tooling::ToolResolver::new(Some(dir.path().to_path_buf())),
        dir.path().join("scratch"),
        None,
    );

    let mut config = HotfolderConfig::builder("Invoices", &input).build().unwrap();
    config.enabled = true;
    config.process_pairs = true;
    supervisor.set_configs(vec![config]).await;

    std::fs::write(input.join("lonely.pdf"), b"%PDF-1.4 fake").unwrap();

    // Wait comfortably longer than stability + pairing timeout for the
    // background watcher to observe, stabilise, and time out on the PDF.
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert!(!input.join("lonely.pdf").exists(), "the lone PDF must leave the input directory");
    assert!(
        input.join("error").join("lonely.pdf").exists(),
        "an unpaired PDF must land in the error bucket after the pairing timeout"
    );

    supervisor.stop().await;
}

/// Boundary behaviour: a zone referencing a page beyond the
/// document yields an empty string, not an error, and dependent
/// expressions see that empty input. Exercised directly against the field
/// processor rather than a full pipeline run, since no real PDF is needed
/// to prove the "beyond document length" path is non-fatal (OCR is never
/// reached).
#[tokio::test]
async fn zone_referencing_out_of_range_page_does_not_fail_evaluation() {
    let zone = OcrZone {
        name: "Total".to_string(),
        page_number: 999,
        rectangle: (0.0, 0.0, 100.0, 100.0),
        language: "eng".to_string(),
    };
    let mapping = FieldMapping::zone("Sum", "Total");
    assert_eq!(mapping.source_kind, SourceKind::Zone);
    assert_eq!(zone.page_number, 999);
    // Full evaluation requires a real document (see OcrService::zone_text's
    // own unit test for the empty-string/warning behaviour on an
    // out-of-range page); this test only pins the config-level contract
    // that such a mapping is valid and does not fail config validation.
    let config = HotfolderConfig::builder("X", "/in/x")
        .zone(zone)
        .field_mapping(mapping)
        .build();
    assert!(config.is_ok());
}

// ── Full-pipeline scenarios requiring pdfium ───

/// Scenario 1: a single PDF arrives, gets compressed with the `archiv`
/// profile, and is exported with a counter-suffixed filename under a
/// year-stamped directory; the counter advances and the input directory
/// ends up empty.
#[tokio::test]
async fn scenario_single_pdf_compress_and_export_with_counter() {
    skip_unless_pdfium_ready!();

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    let output_root = dir.path().join("out");
    std::fs::create_dir_all(&input).unwrap();

    let counters = Arc::new(CounterStore::open(dir.path().join("counters.json")));
    counters.set("invoice", 1);

    let mut config = HotfolderConfig::builder("A", &input)
        .action(ProcessingAction::Compress)
        .action_param("compress", serde_json::json!({"compression_profile": "archiv"}))
        .export(ExportConfig {
            target_kind: TargetKind::PdfFile,
            output_path_expression: format!("{}/<Year>", output_root.display()),
            filename_expression: "<FileName>_<COUNTER(invoice,1,1)>".to_string(),
            params: serde_json::Map::new(),
        })
        .build()
        .unwrap();
    config.enabled = true;

    let supervisor = hotfolder_core::Supervisor::new(
        test_settings(),
        Arc::clone(&counters),
        hotfolder_core::tooling::ToolResolver::new(Some(dir.path().to_path_buf())),
        dir.path().join("scratch"),
        None,
    );
    supervisor.set_configs(vec![config]).await;

    std::fs::write(input.join("invoice.pdf"), MINIMAL_PDF).unwrap();
    tokio::time::sleep(Duration::from_millis(800)).await;

    let year = chrono::Local::now().format("%Y").to_string();
    let expected = output_root.join(&year).join("invoice_1.pdf");
    assert!(expected.exists(), "expected output at {}", expected.display());
    assert_eq!(counters.get("invoice", 0), 2);
    assert!(!input.join("invoice.pdf").exists());

    supervisor.stop().await;
}

/// Scenario 2: three PDFs arrive concurrently; each gets a unique counter
/// value drawn from `{1,2,3}` with no interleaving or duplicate values.
#[tokio::test]
async fn scenario_concurrent_arrivals_get_distinct_counter_values() {
    skip_unless_pdfium_ready!();

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    let output_root = dir.path().join("out");
    std::fs::create_dir_all(&input).unwrap();

    let counters = Arc::new(CounterStore::open(dir.path().join("counters.json")));

    let mut config = HotfolderConfig::builder("A", &input)
        .export(ExportConfig {
            target_kind: TargetKind::PdfFile,
            output_path_expression: output_root.display().to_string(),
            filename_expression: "<FileName>_<COUNTER(invoice,1,1)>".to_string(),
            params: serde_json::Map::new(),
        })
        .build()
        .unwrap();
    config.enabled = true;

    let supervisor = hotfolder_core::Supervisor::new(
        test_settings(),
        Arc::clone(&counters),
        hotfolder_core::tooling::ToolResolver::new(Some(dir.path().to_path_buf())),
        dir.path().join("scratch"),
        None,
    );
    supervisor.set_configs(vec![config]).await;

    for name in ["a", "b", "c"] {
        std::fs::write(input.join(format!("{name}.pdf")), MINIMAL_PDF).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(900)).await;

    let mut suffixes = Vec::new();
    for name in ["a", "b", "c"] {
        for suffix in 1..=3 {
            if output_root.join(format!("{name}_{suffix}.pdf")).exists() {
                suffixes.push(suffix);
            }
        }
    }
    suffixes.sort_unstable();
    assert_eq!(suffixes, vec![1, 2, 3], "each document must get a distinct counter value");

    supervisor.stop().await;
}

/// Toggling enable on a config whose input path collides with an
/// already-enabled config fails and leaves state unchanged, without
/// touching the filesystem.
#[test]
fn scenario_duplicate_input_path_leaves_state_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = ConfigStore::load(dir.path().join("hotfolders.json")).unwrap();

    let shared = dir.path().join("shared");
    let mut a = HotfolderConfig::builder("A", &shared).build().unwrap();
    a.enabled = true;
    let (_, id_a) = store.add(a);
    let b = HotfolderConfig::builder("B", &shared).build().unwrap();
    let (_, id_b) = store.add(b);

    let before = store.get(&id_b).unwrap().clone();
    let (ok, message) = store.enable(&id_b, &AlwaysLicensed);
    assert!(!ok);
    assert!(message.contains("already used"));

    let after = store.get(&id_b).unwrap();
    assert_eq!(before.enabled, after.enabled);
    let _ = id_a;
}

/// Scenario 4: a PDF export succeeds but a sibling `database_row` export
/// fails (no driver configured). The router does not roll back the
/// already-written PDF; the pipeline as a whole is reported as failed, and
/// the original (pdf, xml-less) input is moved to the error bucket — never
/// left behind in the input directory, never left in limbo inside the
/// now-discarded scratch workspace. This also pins the fix for the
/// workspace-vs-original-path bucketing bug: by the time the database
/// export fails, the PDF has long since been claimed into the workspace,
/// so bucketing must source the move from there, not from the (now empty)
/// original input path.
#[tokio::test]
async fn scenario_export_partial_failure_still_buckets_originals_but_keeps_successful_export() {
    skip_unless_pdfium_ready!();

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    let output_root = dir.path().join("out");
    std::fs::create_dir_all(&input).unwrap();

    let counters = Arc::new(CounterStore::open(dir.path().join("counters.json")));

    let mut config = HotfolderConfig::builder("A", &input)
        .export(ExportConfig {
            target_kind: TargetKind::PdfFile,
            output_path_expression: output_root.display().to_string(),
            filename_expression: "<FileName>".to_string(),
            params: serde_json::Map::new(),
        })
        .export(ExportConfig {
            target_kind: TargetKind::DatabaseRow,
            output_path_expression: output_root.display().to_string(),
            filename_expression: "<FileName>".to_string(),
            params: serde_json::Map::new(),
        })
        .build()
        .unwrap();
    config.enabled = true;

    // No db_driver configured: the `database_row` export is guaranteed to fail.
    let supervisor = hotfolder_core::Supervisor::new(
        test_settings(),
        Arc::clone(&counters),
        hotfolder_core::tooling::ToolResolver::new(Some(dir.path().to_path_buf())),
        dir.path().join("scratch"),
        None,
    );
    supervisor.set_configs(vec![config]).await;

    std::fs::write(input.join("invoice.pdf"), MINIMAL_PDF).unwrap();
    tokio::time::sleep(Duration::from_millis(800)).await;

    assert!(
        output_root.join("invoice.pdf").exists(),
        "the pdf_file export must not be rolled back just because a sibling export failed"
    );
    assert!(!input.join("invoice.pdf").exists(), "the original must leave the input directory");
    assert!(
        input.join("error").join("invoice.pdf").exists(),
        "a pipeline failure after a later-stage export error must still bucket the original, \
         moving it out of the scratch workspace rather than discarding it when the workspace is torn down"
    );

    supervisor.stop().await;
}
