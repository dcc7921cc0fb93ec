use std::path::PathBuf;

use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::cli::GeotagArgs;
use crate::commands::{CORRECTED_OUTPUT, GEOTAGGED_OUTPUT, MARKERS_FILE};
use crate::error::MatchError;
use crate::geo::gpkg::{MarkerLayer, load_markers};
use crate::geo::{FeatureCache, GeoMatcher, ReferenceSet};
use crate::model::{GeoTaggedRecord, RecordRow};
use crate::record::{format_tagged, read_rows, write_lines};

#[derive(Debug, Default)]
struct TagOutcome {
    tagged: Vec<GeoTaggedRecord>,
    skipped: usize,
}

pub fn run(args: GeotagArgs) -> Result<()> {
    let input_path = resolve(&args.input_path, &args, CORRECTED_OUTPUT);
    let markers_path = resolve(&args.markers_path, &args, MARKERS_FILE);
    let output_path = resolve(&args.output_path, &args, GEOTAGGED_OUTPUT);

    info!(
        input = %input_path.display(),
        markers = %markers_path.display(),
        "starting geotag pass"
    );

    let rows = read_rows(&input_path)?;
    let layer = MarkerLayer {
        table: args.layer.clone(),
        id_column: args.id_column.clone(),
        code_column: args.code_column.clone(),
        value_column: args.value_column.clone(),
    };
    let reference = ReferenceSet::new(load_markers(&markers_path, &layer)?);
    if reference.is_empty() {
        bail!(
            "no usable reference markers in layer {} of {}",
            layer.table,
            markers_path.display()
        );
    }

    let matcher = GeoMatcher::new(&reference, FeatureCache::for_reference(&reference));
    let outcome = tag_rows(&matcher, &rows)?;

    write_lines(&output_path, outcome.tagged.iter().map(format_tagged))?;

    info!(
        output = %output_path.display(),
        rows = rows.len(),
        tagged = outcome.tagged.len(),
        skipped = outcome.skipped,
        markers = reference.len(),
        lines_cached = matcher.cache().populated(),
        "geotag pass completed"
    );
    Ok(())
}

fn resolve(explicit: &Option<PathBuf>, args: &GeotagArgs, default_name: &str) -> PathBuf {
    explicit
        .clone()
        .unwrap_or_else(|| args.work_dir.join(default_name))
}

/// Matches every complete row. Any line reference missing from the markers
/// fails the whole batch before a single row is matched.
fn tag_rows(matcher: &GeoMatcher<'_>, rows: &[RecordRow]) -> Result<TagOutcome, MatchError> {
    matcher.check_known(rows.iter().filter_map(|row| row.lineref.defined()))?;

    let mut outcome = TagOutcome::default();
    for row in rows {
        let (Some(code), Some(mileage)) = (row.lineref.defined(), row.mileage()) else {
            warn!(file = %row.file, "skipping row without line reference or mileage");
            outcome.skipped += 1;
            continue;
        };

        let location = matcher.locate(code, mileage)?;
        info!(
            file = %row.file,
            lineref = %code,
            longitude = location.longitude,
            latitude = location.latitude,
            feature_id = location.parent_feature_id,
            "record geotagged"
        );
        outcome.tagged.push(GeoTaggedRecord {
            row: row.clone(),
            location,
        });
    }

    Ok(outcome)
}
