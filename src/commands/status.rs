use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::commands::{
    CORRECTED_OUTPUT, FAILED_DIR, GEOTAGGED_OUTPUT, INTAKE_DIR, MANIFEST_DIR, PRIMARY_OUTPUT,
    PROCESSED_DIR,
};
use crate::model::ExtractRunSummary;
use crate::record::read_rows;

pub fn run(args: StatusArgs) -> Result<()> {
    let work_dir = &args.work_dir;
    info!(work_dir = %work_dir.display(), "status requested");

    for name in [INTAKE_DIR, PROCESSED_DIR, FAILED_DIR] {
        let dir = work_dir.join(name);
        if dir.is_dir() {
            info!(area = name, images = count_images(&dir)?, "image area");
        } else {
            warn!(path = %dir.display(), "image area missing");
        }
    }

    for name in [PRIMARY_OUTPUT, CORRECTED_OUTPUT] {
        let path = work_dir.join(name);
        if path.exists() {
            let rows = read_rows(&path)?;
            info!(
                path = %path.display(),
                rows = rows.len(),
                incomplete = rows.iter().filter(|row| row.has_undefined()).count(),
                "record file status"
            );
        } else {
            warn!(path = %path.display(), "record file missing");
        }
    }

    let geotagged_path = work_dir.join(GEOTAGGED_OUTPUT);
    if geotagged_path.exists() {
        let raw = fs::read_to_string(&geotagged_path)
            .with_context(|| format!("failed to read {}", geotagged_path.display()))?;
        info!(
            path = %geotagged_path.display(),
            rows = raw.lines().filter(|line| !line.trim().is_empty()).count(),
            "geotagged file status"
        );
    } else {
        warn!(path = %geotagged_path.display(), "geotagged file missing");
    }

    match latest_manifest(&work_dir.join(MANIFEST_DIR))? {
        Some(path) => {
            let raw = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
            let summary: ExtractRunSummary = serde_json::from_slice(&raw)
                .with_context(|| format!("failed to parse {}", path.display()))?;

            info!(
                run_id = %summary.run_id,
                status = %summary.status,
                updated_at = %summary.updated_at,
                images = summary.counts.image_count,
                parsed = summary.counts.parsed_count,
                failed = summary.counts.failed_count,
                extraction_failed = summary.counts.extraction_failed_count,
                multi_mileage = summary.counts.multi_mileage_count,
                "loaded latest extraction manifest"
            );
        }
        None => warn!(path = %work_dir.join(MANIFEST_DIR).display(), "no extraction manifest found"),
    }

    Ok(())
}

fn count_images(dir: &Path) -> Result<usize> {
    let entries = fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    let mut count = 0;
    for entry in entries {
        let path = entry
            .with_context(|| format!("failed to read entry in {}", dir.display()))?
            .path();
        if path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
        {
            count += 1;
        }
    }
    Ok(count)
}

/// Manifest names embed a compact UTC timestamp, so the greatest name is the
/// newest run.
fn latest_manifest(dir: &Path) -> Result<Option<PathBuf>> {
    if !dir.is_dir() {
        return Ok(None);
    }

    let mut latest: Option<PathBuf> = None;
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let path = entry
            .with_context(|| format!("failed to read entry in {}", dir.display()))?
            .path();
        let is_manifest = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("extract_run_") && name.ends_with(".json"));
        if is_manifest && latest.as_ref().is_none_or(|current| &path > current) {
            latest = Some(path);
        }
    }
    Ok(latest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_newest_manifest_by_name() {
        let dir = std::env::temp_dir().join(format!("tablea_status_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let manifests = dir.join(MANIFEST_DIR);
        fs::create_dir_all(&manifests).expect("manifest dir");
        for name in [
            "extract_run_20260101T000000Z.json",
            "extract_run_20260301T000000Z.json",
            "notes.json",
        ] {
            fs::write(manifests.join(name), "{}").expect("manifest");
        }

        assert_eq!(
            latest_manifest(&manifests).expect("scan"),
            Some(manifests.join("extract_run_20260301T000000Z.json"))
        );
        assert_eq!(latest_manifest(&dir.join("absent")).expect("scan"), None);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn reports_on_a_partial_work_dir() {
        let dir = std::env::temp_dir().join(format!("tablea_status_run_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(dir.join(INTAKE_DIR)).expect("intake dir");
        fs::write(dir.join(INTAKE_DIR).join("EA1010-001.png"), b"png").expect("image");
        fs::write(
            dir.join(PRIMARY_OUTPUT),
            "EA1010-001.png\tEA1010\t001\tLTN1\t52\t34\t748\tUndefined\n",
        )
        .expect("primary output");

        assert_eq!(count_images(&dir.join(INTAKE_DIR)).expect("count"), 1);
        run(StatusArgs {
            work_dir: dir.clone(),
        })
        .expect("status should tolerate missing files");
        let _ = fs::remove_dir_all(&dir);
    }
}
