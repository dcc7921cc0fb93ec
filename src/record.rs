//! Tab-separated persistence of records.
//!
//! Column order: file, lor, seq, lineref, miles, chains, yards, description.
//! Geotagged rows append longitude, latitude and parent feature id.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result, bail};

use crate::model::{Field, GeoTaggedRecord, LineRefCode, RecordRow, UNDEFINED};
use crate::util::ensure_directory;

pub const RECORD_COLUMNS: usize = 8;

const FILE_ID_SEPARATOR: char = '-';

/// Splits `EA1010-001.png` into `("EA1010", "001")`.
pub fn split_file_id(file_name: &str) -> Option<(String, String)> {
    let stem = Path::new(file_name).file_stem()?.to_str()?;
    let (lor, seq) = stem.split_once(FILE_ID_SEPARATOR)?;
    if lor.is_empty() || seq.is_empty() || seq.contains(FILE_ID_SEPARATOR) {
        return None;
    }
    Some((lor.to_string(), seq.to_string()))
}

pub fn format_row(row: &RecordRow) -> String {
    [
        row.file.clone(),
        row.lor.to_string(),
        row.seq.to_string(),
        row.lineref.to_string(),
        row.miles.to_string(),
        row.chains.to_string(),
        row.yards.to_string(),
        row.description.to_string(),
    ]
    .join("\t")
}

pub fn format_tagged(record: &GeoTaggedRecord) -> String {
    format!(
        "{}\t{:.6}\t{:.6}\t{}",
        format_row(&record.row),
        record.location.longitude,
        record.location.latitude,
        record.location.parent_feature_id
    )
}

pub fn parse_row(line: &str) -> Result<RecordRow> {
    let columns: Vec<&str> = line.split('\t').collect();
    if columns.len() != RECORD_COLUMNS {
        bail!(
            "expected {} tab-separated columns, found {}",
            RECORD_COLUMNS,
            columns.len()
        );
    }

    let lineref = match parse_text(columns[3]) {
        Field::Defined(raw) => Field::Defined(
            LineRefCode::parse(&raw).with_context(|| format!("invalid line reference: {raw}"))?,
        ),
        Field::Undefined => Field::Undefined,
    };

    Ok(RecordRow {
        file: columns[0].to_string(),
        lor: parse_text(columns[1]),
        seq: parse_text(columns[2]),
        lineref,
        miles: parse_number(columns[4], "miles")?,
        chains: parse_number(columns[5], "chains")?,
        yards: parse_number(columns[6], "yards")?,
        description: parse_text(columns[7]),
    })
}

fn parse_text(raw: &str) -> Field<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == UNDEFINED {
        Field::Undefined
    } else {
        Field::Defined(trimmed.to_string())
    }
}

fn parse_number<T: FromStr>(raw: &str, name: &str) -> Result<Field<T>> {
    match parse_text(raw) {
        Field::Defined(value) => value
            .parse()
            .map(Field::Defined)
            .map_err(|_| anyhow::anyhow!("invalid {name} value: {value}")),
        Field::Undefined => Ok(Field::Undefined),
    }
}

pub fn read_rows(path: &Path) -> Result<Vec<RecordRow>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;

    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            parse_row(line).with_context(|| format!("{}:{}", path.display(), index + 1))
        })
        .collect()
}

/// Line-oriented TSV output. Every line is newline terminated.
pub struct TsvWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl TsvWriter {
    /// Truncates any existing file.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            ensure_directory(parent)?;
        }
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        Ok(Self::wrap(path, file))
    }

    pub fn append(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            ensure_directory(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open {} for append", path.display()))?;
        Ok(Self::wrap(path, file))
    }

    fn wrap(path: &Path, file: File) -> Self {
        Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        }
    }

    pub fn write_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.writer, "{line}")
            .with_context(|| format!("failed to write {}", self.path.display()))
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .with_context(|| format!("failed to flush {}", self.path.display()))
    }
}

/// Replaces `path` with the given lines.
pub fn write_lines<I>(path: &Path, lines: I) -> Result<()>
where
    I: IntoIterator<Item = String>,
{
    let mut writer = TsvWriter::create(path)?;
    for line in lines {
        writer.write_line(&line)?;
    }
    writer.flush()
}

/// Record lines keyed by their file column.
///
/// Upserting a file that is already present replaces its line in place; new
/// files go to the end. Lines for files not touched by a run are kept as read.
pub struct RecordFile {
    path: PathBuf,
    lines: Vec<String>,
    index: HashMap<String, usize>,
}

impl RecordFile {
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = Self {
            path: path.to_path_buf(),
            lines: Vec::new(),
            index: HashMap::new(),
        };
        if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            for line in raw.lines().filter(|line| !line.trim().is_empty()) {
                file.upsert(line.to_string());
            }
        }
        Ok(file)
    }

    pub fn upsert(&mut self, line: String) {
        let key = line.split('\t').next().unwrap_or_default().to_string();
        match self.index.get(&key) {
            Some(&position) => self.lines[position] = line,
            None => {
                self.index.insert(key, self.lines.len());
                self.lines.push(line);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Writes to a sibling temp file, then renames it over the target.
    pub fn persist(&self) -> Result<()> {
        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);

        write_lines(&staging, self.lines.iter().cloned())?;
        fs::rename(&staging, &self.path).with_context(|| {
            format!(
                "failed to replace {} with {}",
                self.path.display(),
                staging.display()
            )
        })
    }
}
