use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::cli::{ExtractArgs, TableSourceKind};
use crate::commands::{FAILED_DIR, INTAKE_DIR, MANIFEST_DIR, PRIMARY_OUTPUT, PROCESSED_DIR};
use crate::model::{
    ExtractCounts, ExtractEntry, ExtractPaths, ExtractRunManifest, RecordRow, RecordStatus,
};
use crate::record::{RecordFile, format_row};
use crate::table::HeaderLayout;
use crate::util::{ensure_directory, move_into, now_utc_string, utc_compact_string, write_json_pretty};

mod pipeline;
mod table_source;
#[cfg(test)]
mod tests;

use pipeline::{ProcessedRecord, RecordParser};
use table_source::{CommandTableSource, SidecarTableSource, TableSource};

/// Images handed to the worker pool per batch, per worker.
const BATCH_PER_WORKER: usize = 4;

struct ExtractLayout {
    work_dir: PathBuf,
    intake_dir: PathBuf,
    processed_dir: PathBuf,
    failed_dir: PathBuf,
    output_path: PathBuf,
}

impl ExtractLayout {
    fn resolve(args: &ExtractArgs) -> Self {
        let work_dir = args.work_dir.clone();
        Self {
            intake_dir: args
                .intake_dir
                .clone()
                .unwrap_or_else(|| work_dir.join(INTAKE_DIR)),
            processed_dir: args
                .processed_dir
                .clone()
                .unwrap_or_else(|| work_dir.join(PROCESSED_DIR)),
            failed_dir: args
                .failed_dir
                .clone()
                .unwrap_or_else(|| work_dir.join(FAILED_DIR)),
            output_path: args
                .output_path
                .clone()
                .unwrap_or_else(|| work_dir.join(PRIMARY_OUTPUT)),
            work_dir,
        }
    }

    fn paths(&self) -> ExtractPaths {
        ExtractPaths {
            work_dir: self.work_dir.display().to_string(),
            intake_dir: self.intake_dir.display().to_string(),
            processed_dir: self.processed_dir.display().to_string(),
            failed_dir: self.failed_dir.display().to_string(),
            output_path: self.output_path.display().to_string(),
        }
    }
}

pub fn run(args: ExtractArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("extract-{}", utc_compact_string(started_ts));
    let layout = ExtractLayout::resolve(&args);

    info!(work_dir = %layout.work_dir.display(), run_id = %run_id, "starting extraction");

    let images = discover_images(&layout.intake_dir)?;
    if images.is_empty() {
        warn!(intake_dir = %layout.intake_dir.display(), "no PNG images waiting, nothing to do");
        return Ok(());
    }

    let parser = RecordParser::new(
        build_table_source(&args)?,
        HeaderLayout {
            field_header_row: args.field_header_row,
            mileage_header_row: args.mileage_header_row,
        },
    )?;
    let table_source = parser.source_description();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.workers.max(1))
        .build()
        .context("failed to build extraction worker pool")?;

    let (counts, entries) = if args.dry_run {
        let processed = pool.install(|| {
            images
                .par_iter()
                .map(|image| parser.process(image))
                .collect::<Vec<_>>()
        });
        for item in &processed {
            log_record(item);
        }
        summarize(&processed)
    } else {
        ensure_directory(&layout.processed_dir)?;
        ensure_directory(&layout.failed_dir)?;
        let mut store = RecordFile::open(&layout.output_path)?;
        let mut all = Vec::with_capacity(images.len());

        for batch in images.chunks(args.workers.max(1) * BATCH_PER_WORKER) {
            let processed = pool.install(|| {
                batch
                    .par_iter()
                    .map(|image| parser.process(image))
                    .collect::<Vec<_>>()
            });
            write_batch(&mut store, &processed)?;
            route_batch(&layout, &processed)?;
            all.extend(processed);
        }
        info!(
            path = %layout.output_path.display(),
            rows = store.len(),
            "primary output updated"
        );
        summarize(&all)
    };

    info!(
        images = counts.image_count,
        parsed = counts.parsed_count,
        failed = counts.failed_count,
        "extraction completed"
    );

    if args.dry_run {
        info!("dry-run: no output written and no images moved");
        return Ok(());
    }

    let manifest_path = args.manifest_path.clone().unwrap_or_else(|| {
        layout
            .work_dir
            .join(MANIFEST_DIR)
            .join(format!("extract_run_{}.json", utc_compact_string(started_ts)))
    });
    let manifest = ExtractRunManifest {
        manifest_version: 1,
        run_id,
        status: "completed".to_string(),
        started_at,
        updated_at: now_utc_string(),
        command: render_extract_command(&args),
        table_source,
        paths: layout.paths(),
        counts,
        entries,
    };
    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote extraction run manifest");

    Ok(())
}

fn build_table_source(args: &ExtractArgs) -> Result<Box<dyn TableSource>> {
    match args.table_source {
        TableSourceKind::Sidecar => Ok(Box::new(SidecarTableSource)),
        TableSourceKind::Command => {
            let program = args
                .ocr_command
                .clone()
                .context("--ocr-command is required with --table-source command")?;
            Ok(Box::new(CommandTableSource::new(
                program,
                args.ocr_args.clone(),
                Duration::from_millis(args.ocr_timeout_ms),
            )?))
        }
    }
}

fn discover_images(intake_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();

    let entries = fs::read_dir(intake_dir)
        .with_context(|| format!("failed to read {}", intake_dir.display()))?;

    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", intake_dir.display()))?;
        let path = entry.path();

        if !entry
            .file_type()
            .with_context(|| format!("failed to inspect file type: {}", path.display()))?
            .is_file()
        {
            continue;
        }

        let is_png = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("png"))
            .unwrap_or(false);

        if is_png {
            images.push(path);
        }
    }

    images.sort();
    Ok(images)
}

/// Persists the batch before its images are routed, so a routed image always
/// has its record on disk.
fn write_batch(store: &mut RecordFile, processed: &[ProcessedRecord]) -> Result<()> {
    for item in processed {
        log_record(item);
        store.upsert(format_row(&RecordRow::from(&item.record)));
    }
    store.persist()
}

fn route_batch(layout: &ExtractLayout, processed: &[ProcessedRecord]) -> Result<()> {
    for item in processed {
        let target_dir = match item.record.status {
            RecordStatus::Parsed => &layout.processed_dir,
            RecordStatus::Failed => &layout.failed_dir,
        };
        move_into(&item.image, target_dir)?;

        // The table sidecar travels with its image so a re-run finds it.
        let sidecar = SidecarTableSource::sidecar_path(&item.image);
        if sidecar.is_file() {
            move_into(&sidecar, target_dir)?;
        }
    }
    Ok(())
}

fn log_record(item: &ProcessedRecord) {
    let record = &item.record;
    match record.status {
        RecordStatus::Parsed => info!(
            file = %record.file_id,
            lineref = %record.lineref,
            mileage = ?record.mileage.defined(),
            description = %record.description,
            "record parsed"
        ),
        RecordStatus::Failed => warn!(
            file = %record.file_id,
            errors = %item.errors.join("; "),
            "record failed extraction"
        ),
    }
    if item.mileages.len() > 1 {
        info!(
            file = %record.file_id,
            mileages = ?item.mileages,
            "multiple mileages found, first one written"
        );
    }
}

fn summarize(processed: &[ProcessedRecord]) -> (ExtractCounts, Vec<ExtractEntry>) {
    let mut counts = ExtractCounts {
        image_count: processed.len(),
        ..ExtractCounts::default()
    };
    let mut entries = Vec::with_capacity(processed.len());

    for item in processed {
        match item.record.status {
            RecordStatus::Parsed => counts.parsed_count += 1,
            RecordStatus::Failed => counts.failed_count += 1,
        }
        if !item.table_available {
            counts.extraction_failed_count += 1;
        }
        if item.mileages.len() > 1 {
            counts.multi_mileage_count += 1;
        }
        entries.push(ExtractEntry {
            file: item.record.file_id.clone(),
            sha256: item.sha256.clone(),
            status: item.record.status,
            errors: item.errors.clone(),
            linerefs: item.linerefs.clone(),
            mileages: item.mileages.clone(),
        });
    }

    (counts, entries)
}

fn render_extract_command(args: &ExtractArgs) -> String {
    let mut command = vec![
        "tablea".to_string(),
        "extract".to_string(),
        "--work-dir".to_string(),
        args.work_dir.display().to_string(),
        "--table-source".to_string(),
        args.table_source.as_str().to_string(),
    ];

    let optional_paths = [
        ("--intake-dir", &args.intake_dir),
        ("--processed-dir", &args.processed_dir),
        ("--failed-dir", &args.failed_dir),
        ("--output-path", &args.output_path),
        ("--manifest-path", &args.manifest_path),
    ];
    for (flag, path) in optional_paths {
        if let Some(path) = path {
            command.push(flag.to_string());
            command.push(path.display().to_string());
        }
    }
    if let Some(program) = &args.ocr_command {
        command.push("--ocr-command".to_string());
        command.push(program.clone());
        for arg in &args.ocr_args {
            command.push("--ocr-arg".to_string());
            command.push(arg.clone());
        }
        command.push("--ocr-timeout-ms".to_string());
        command.push(args.ocr_timeout_ms.to_string());
    }
    command.push("--workers".to_string());
    command.push(args.workers.to_string());
    if args.field_header_row != 0 || args.mileage_header_row != 2 {
        command.push("--field-header-row".to_string());
        command.push(args.field_header_row.to_string());
        command.push("--mileage-header-row".to_string());
        command.push(args.mileage_header_row.to_string());
    }

    command.join(" ")
}
