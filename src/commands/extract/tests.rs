use std::collections::HashMap;

use super::pipeline::RecordState;
use super::*;
use crate::model::{Field, Mileage};
use crate::table::GridTable;

struct FixedTables {
    tables: HashMap<String, GridTable>,
}

impl TableSource for FixedTables {
    fn describe(&self) -> String {
        "fixed".to_string()
    }

    fn load(&self, image: &Path) -> Result<GridTable> {
        let name = image
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        self.tables
            .get(name)
            .cloned()
            .with_context(|| format!("no table for {name}"))
    }
}

fn drawing_json(description: &str, elr: &str, mileage_cells: &[&str]) -> String {
    let mut rows = vec![
        serde_json::json!(["Route", "ELR"]),
        serde_json::json!([description, elr]),
        serde_json::json!(["Item", "M Ch"]),
    ];
    for cell in mileage_cells {
        rows.push(serde_json::json!([null, cell]));
    }
    serde_json::json!({ "rows": rows }).to_string()
}

fn drawing(description: &str, elr: &str, mileage_cells: &[&str]) -> GridTable {
    GridTable::from_json(drawing_json(description, elr, mileage_cells).as_bytes())
        .expect("fixture table should parse")
}

fn parser_with(tables: Vec<(&str, GridTable)>) -> RecordParser {
    let source = FixedTables {
        tables: tables
            .into_iter()
            .map(|(name, table)| (name.to_string(), table))
            .collect(),
    };
    RecordParser::new(Box::new(source), HeaderLayout::default()).expect("parser should build")
}

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("tablea_extract_{}_{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    ensure_directory(&dir.join(INTAKE_DIR)).expect("intake dir");
    dir
}

fn stage_image(dir: &Path, name: &str, table_json: &str) {
    let image = dir.join(INTAKE_DIR).join(name);
    fs::write(&image, name.as_bytes()).expect("write image");
    fs::write(SidecarTableSource::sidecar_path(&image), table_json).expect("write sidecar");
}

fn extract_args(work_dir: &Path) -> ExtractArgs {
    ExtractArgs {
        work_dir: work_dir.to_path_buf(),
        intake_dir: None,
        processed_dir: None,
        failed_dir: None,
        output_path: None,
        manifest_path: None,
        table_source: TableSourceKind::Sidecar,
        ocr_command: None,
        ocr_args: Vec::new(),
        ocr_timeout_ms: 1_000,
        workers: 2,
        field_header_row: 0,
        mileage_header_row: 2,
        dry_run: false,
    }
}

#[test]
fn complete_drawing_is_parsed() {
    let parser = parser_with(vec![(
        "EA1010-001.png",
        drawing("Anglia | Colchester Jn", "LTN1 sheet", &["52 34"]),
    )]);

    let processed = parser.process(Path::new("/nowhere/EA1010-001.png"));
    let record = &processed.record;
    assert_eq!(record.status, RecordStatus::Parsed);
    assert_eq!(record.lor_code, Field::Defined("EA1010".to_string()));
    assert_eq!(record.sequence, Field::Defined("001".to_string()));
    assert_eq!(record.lineref.defined().map(|code| code.as_str()), Some("LTN1"));
    assert_eq!(record.mileage, Field::Defined(Mileage::new(52, 34)));
    assert_eq!(record.description, Field::Defined("Colchester Jn".to_string()));
    assert!(processed.errors.is_empty());
    assert!(processed.sha256.is_none());
}

#[test]
fn state_machine_passes_through_extracted() {
    let parser = parser_with(vec![("EA1010-002.png", drawing("Down Main", "ECM1", &["10 5"]))]);

    let pending = RecordState::Pending {
        image: PathBuf::from("EA1010-002.png"),
    };
    let extracted = parser.advance(pending);
    assert!(matches!(extracted, RecordState::Extracted { .. }));

    let terminal = parser.advance(extracted);
    assert!(matches!(terminal, RecordState::Parsed(_)));
    assert!(matches!(parser.advance(terminal), RecordState::Parsed(_)));
}

#[test]
fn missing_fields_fail_but_keep_what_parsed() {
    let parser = parser_with(vec![("EA1010-003.png", drawing("Down Main", "none", &["12\n34\n56"]))]);

    let processed = parser.process(Path::new("EA1010-003.png"));
    let record = &processed.record;
    assert_eq!(record.status, RecordStatus::Failed);
    assert_eq!(record.lineref, Field::Undefined);
    assert_eq!(record.mileage, Field::Undefined);
    assert_eq!(record.description, Field::Defined("Down Main".to_string()));
    assert_eq!(processed.errors.len(), 2);
    assert!(processed.errors[1].contains("do not pair up"));
}

#[test]
fn unavailable_table_is_extraction_failure_for_that_record_only() {
    let parser = parser_with(vec![("EA1010-005.png", drawing("Up Slow", "ECM1", &["1 1"]))]);

    let failed = parser.process(Path::new("EA1010-004.png"));
    assert_eq!(failed.record.status, RecordStatus::Failed);
    assert!(!failed.table_available);
    assert!(failed.errors[0].starts_with("table:"));

    let parsed = parser.process(Path::new("EA1010-005.png"));
    assert_eq!(parsed.record.status, RecordStatus::Parsed);
}

#[test]
fn multiple_mileages_write_the_first_and_keep_the_rest() {
    let parser = parser_with(vec![("EA1010-006.png", drawing("Boundary", "ECM1", &["12\n34", "56\n78"]))]);

    let processed = parser.process(Path::new("EA1010-006.png"));
    assert_eq!(processed.mileages, vec![Mileage::new(12, 34), Mileage::new(56, 78)]);
    assert_eq!(processed.record.mileage, Field::Defined(Mileage::new(12, 34)));
}

#[test]
fn run_writes_every_record_in_order_and_routes_images() {
    let dir = scratch("run");
    stage_image(&dir, "EA1010-002.png", &drawing_json("Up Fast", "ECM1", &["3\n15*"]));
    stage_image(&dir, "EA1010-001.png", &drawing_json("Route | Down Fast", "ECM1", &["2 40"]));
    stage_image(&dir, "EA1010-003.png", &drawing_json("Down Fast", "????", &["2 41"]));

    run(extract_args(&dir)).expect("extraction should succeed");

    let output = fs::read_to_string(dir.join(PRIMARY_OUTPUT)).expect("primary output");
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(
        lines,
        vec![
            "EA1010-001.png\tEA1010\t001\tECM1\t2\t40\t880\tDown Fast",
            "EA1010-002.png\tEA1010\t002\tECM1\t3\t15\t330\tUp Fast",
            "EA1010-003.png\tEA1010\t003\tUndefined\t2\t41\t902\tDown Fast",
        ]
    );

    assert!(dir.join(PROCESSED_DIR).join("EA1010-001.png").exists());
    assert!(dir.join(PROCESSED_DIR).join("EA1010-001.json").exists());
    assert!(dir.join(PROCESSED_DIR).join("EA1010-002.png").exists());
    assert!(dir.join(FAILED_DIR).join("EA1010-003.png").exists());
    assert!(!dir.join(INTAKE_DIR).join("EA1010-001.png").exists());

    let manifests: Vec<_> = fs::read_dir(dir.join(MANIFEST_DIR))
        .expect("manifest dir")
        .collect();
    assert_eq!(manifests.len(), 1);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn rerun_over_parsed_images_is_byte_identical() {
    let dir = scratch("rerun");
    stage_image(&dir, "EA2020-001.png", &drawing_json("Down Main", "LTN1", &["40 12"]));
    stage_image(&dir, "EA2020-002.png", &drawing_json("Down Main", "LTN1", &["40\n20*"]));

    let first_output = dir.join("first.tsv");
    let mut args = extract_args(&dir);
    args.output_path = Some(first_output.clone());
    args.manifest_path = Some(dir.join("first.json"));
    run(args).expect("first run");

    let second_output = dir.join("second.tsv");
    let mut args = extract_args(&dir);
    args.intake_dir = Some(dir.join(PROCESSED_DIR));
    args.output_path = Some(second_output.clone());
    args.manifest_path = Some(dir.join("second.json"));
    run(args).expect("second run");

    let first = fs::read(&first_output).expect("first output");
    let second = fs::read(&second_output).expect("second output");
    assert!(!first.is_empty());
    assert_eq!(first, second);
    assert!(dir.join(PROCESSED_DIR).join("EA2020-002.png").exists());
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn dry_run_leaves_intake_untouched() {
    let dir = scratch("dry");
    stage_image(&dir, "EA3030-001.png", &drawing_json("Down Main", "LTN1", &["40 12"]));

    let mut args = extract_args(&dir);
    args.dry_run = true;
    run(args).expect("dry run");

    assert!(dir.join(INTAKE_DIR).join("EA3030-001.png").exists());
    assert!(!dir.join(PRIMARY_OUTPUT).exists());
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn empty_intake_is_a_quiet_no_op() {
    let dir = scratch("empty");
    run(extract_args(&dir)).expect("nothing to do is not an error");
    assert!(!dir.join(PRIMARY_OUTPUT).exists());
    assert!(!dir.join(MANIFEST_DIR).exists());
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn successive_batches_keep_earlier_records() {
    let dir = scratch("batches");
    stage_image(&dir, "EA1010-001.png", &drawing_json("Down Main", "ECM1", &["2 40"]));
    run(extract_args(&dir)).expect("first batch");

    stage_image(&dir, "EA1010-002.png", &drawing_json("Down Main", "ECM1", &["2 41"]));
    run(extract_args(&dir)).expect("second batch");
    run(extract_args(&dir)).expect("repeat with empty intake");

    let output = fs::read_to_string(dir.join(PRIMARY_OUTPUT)).expect("primary output");
    assert_eq!(
        output,
        "EA1010-001.png\tEA1010\t001\tECM1\t2\t40\t880\tDown Main\n\
         EA1010-002.png\tEA1010\t002\tECM1\t2\t41\t902\tDown Main\n"
    );
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn reprocessed_image_replaces_its_line_in_place() {
    let dir = scratch("replace");
    stage_image(&dir, "EA1010-001.png", &drawing_json("Down Main", "????", &["2 40"]));
    stage_image(&dir, "EA1010-002.png", &drawing_json("Down Main", "ECM1", &["2 41"]));
    run(extract_args(&dir)).expect("first run");

    // Fix the failed drawing's table and feed it back through intake.
    let failed = dir.join(FAILED_DIR);
    fs::write(
        failed.join("EA1010-001.json"),
        drawing_json("Down Main", "ECM1", &["2 40"]),
    )
    .expect("corrected sidecar");
    let mut args = extract_args(&dir);
    args.intake_dir = Some(failed);
    run(args).expect("second run");

    let output = fs::read_to_string(dir.join(PRIMARY_OUTPUT)).expect("primary output");
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(
        lines,
        vec![
            "EA1010-001.png\tEA1010\t001\tECM1\t2\t40\t880\tDown Main",
            "EA1010-002.png\tEA1010\t002\tECM1\t2\t41\t902\tDown Main",
        ]
    );
    assert!(dir.join(PROCESSED_DIR).join("EA1010-001.png").exists());
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn table_command_timeout_fails_only_that_record() {
    let source = CommandTableSource::new(
        "sh".to_string(),
        vec!["-c".to_string(), "exec sleep 5".to_string()],
        Duration::from_millis(200),
    )
    .expect("sh should be runnable");
    let parser = RecordParser::new(Box::new(source), HeaderLayout::default()).expect("parser");

    let started = std::time::Instant::now();
    let processed = parser.process(Path::new("EA1010-001.png"));

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(processed.record.status, RecordStatus::Failed);
    assert!(!processed.table_available);
    assert!(processed.errors[0].contains("timed out after 200 ms"));
    assert_eq!(processed.record.lor_code, Field::Defined("EA1010".to_string()));
}

#[test]
fn command_line_is_rendered_for_the_manifest() {
    let mut args = extract_args(Path::new("work"));
    args.output_path = Some(PathBuf::from("out.tsv"));
    assert_eq!(
        render_extract_command(&args),
        "tablea extract --work-dir work --table-source sidecar --output-path out.tsv --workers 2"
    );
}
