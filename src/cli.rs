use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "tablea",
    version,
    about = "Table A drawing metadata extraction, correction and geotagging"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Extract(ExtractArgs),
    Correct(CorrectArgs),
    Geotag(GeotagArgs),
    Status(StatusArgs),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum TableSourceKind {
    Sidecar,
    Command,
}

impl TableSourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sidecar => "sidecar",
            Self::Command => "command",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ExtractArgs {
    #[arg(long, default_value = ".")]
    pub work_dir: PathBuf,

    #[arg(long)]
    pub intake_dir: Option<PathBuf>,

    #[arg(long)]
    pub processed_dir: Option<PathBuf>,

    #[arg(long)]
    pub failed_dir: Option<PathBuf>,

    #[arg(long)]
    pub output_path: Option<PathBuf>,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = TableSourceKind::Sidecar)]
    pub table_source: TableSourceKind,

    #[arg(long)]
    pub ocr_command: Option<String>,

    #[arg(long = "ocr-arg", allow_hyphen_values = true)]
    pub ocr_args: Vec<String>,

    #[arg(long, default_value_t = 120_000)]
    pub ocr_timeout_ms: u64,

    #[arg(long, default_value_t = 4)]
    pub workers: usize,

    #[arg(long, default_value_t = 0)]
    pub field_header_row: usize,

    #[arg(long, default_value_t = 2)]
    pub mileage_header_row: usize,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CorrectArgs {
    #[arg(long, default_value = ".")]
    pub work_dir: PathBuf,

    #[arg(long)]
    pub input_path: Option<PathBuf>,

    #[arg(long)]
    pub output_path: Option<PathBuf>,

    #[arg(long, default_value_t = 5)]
    pub max_attempts: usize,
}

#[derive(Args, Debug, Clone)]
pub struct GeotagArgs {
    #[arg(long, default_value = ".")]
    pub work_dir: PathBuf,

    #[arg(long)]
    pub input_path: Option<PathBuf>,

    #[arg(long)]
    pub markers_path: Option<PathBuf>,

    #[arg(long)]
    pub output_path: Option<PathBuf>,

    #[arg(long, default_value = "mileposts")]
    pub layer: String,

    #[arg(long, default_value = "fid")]
    pub id_column: String,

    #[arg(long, default_value = "ELR")]
    pub code_column: String,

    #[arg(long, default_value = "VALUE")]
    pub value_column: String,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".")]
    pub work_dir: PathBuf,
}
