pub mod correct;
pub mod extract;
pub mod geotag;
pub mod status;

pub const PRIMARY_OUTPUT: &str = "output.tsv";
pub const CORRECTED_OUTPUT: &str = "corrected.tsv";
pub const GEOTAGGED_OUTPUT: &str = "geo_tagged.tsv";
pub const MARKERS_FILE: &str = "mileposts.gpkg";
pub const INTAKE_DIR: &str = "intake";
pub const PROCESSED_DIR: &str = "processed";
pub const FAILED_DIR: &str = "failed";
pub const MANIFEST_DIR: &str = "manifests";
