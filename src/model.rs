use std::fmt;

use serde::{Deserialize, Serialize};

pub const UNDEFINED: &str = "Undefined";

pub const YARDS_PER_CHAIN: u64 = 22;

/// A value that is either known or explicitly marked `Undefined`.
///
/// `Undefined` is written to every output as the literal token and drives the
/// correction pass; it is not the same thing as an absent column.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Field<T> {
    Defined(T),
    #[default]
    Undefined,
}

impl<T> Field<T> {
    pub fn is_defined(&self) -> bool {
        matches!(self, Self::Defined(_))
    }

    pub fn defined(&self) -> Option<&T> {
        match self {
            Self::Defined(value) => Some(value),
            Self::Undefined => None,
        }
    }
}

impl<T> From<Option<T>> for Field<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Undefined, Self::Defined)
    }
}

impl<T: fmt::Display> fmt::Display for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Defined(value) => value.fmt(f),
            Self::Undefined => f.write_str(UNDEFINED),
        }
    }
}

/// Distance along a line. Only built through [`Mileage::new`] so that
/// `yards == chains * 22` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Mileage {
    miles: u32,
    chains: u32,
    yards: u64,
}

impl Mileage {
    pub fn new(miles: u32, chains: u32) -> Self {
        Self {
            miles,
            chains,
            yards: u64::from(chains) * YARDS_PER_CHAIN,
        }
    }

    pub fn miles(&self) -> u32 {
        self.miles
    }

    pub fn chains(&self) -> u32 {
        self.chains
    }

    pub fn yards(&self) -> u64 {
        self.yards
    }
}

/// Three upper-case letters with an optional trailing digit, e.g. `ECM1`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct LineRefCode(String);

impl LineRefCode {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let bytes = trimmed.as_bytes();
        let valid = matches!(bytes.len(), 3 | 4)
            && bytes[..3].iter().all(u8::is_ascii_uppercase)
            && bytes[3..].iter().all(u8::is_ascii_digit);
        valid.then(|| Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LineRefCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Parsed,
    Failed,
}

/// One drawing after extraction and parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub file_id: String,
    pub lor_code: Field<String>,
    pub sequence: Field<String>,
    pub lineref: Field<LineRefCode>,
    pub mileage: Field<Mileage>,
    pub description: Field<String>,
    pub status: RecordStatus,
}

/// The persisted tab-separated shape of a record.
///
/// Miles and chains are separate columns here because a persisted row can
/// have one of them corrected before the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRow {
    pub file: String,
    pub lor: Field<String>,
    pub seq: Field<String>,
    pub lineref: Field<LineRefCode>,
    pub miles: Field<u32>,
    pub chains: Field<u32>,
    pub yards: Field<u64>,
    pub description: Field<String>,
}

impl RecordRow {
    pub fn has_undefined(&self) -> bool {
        !(self.lor.is_defined()
            && self.seq.is_defined()
            && self.lineref.is_defined()
            && self.miles.is_defined()
            && self.chains.is_defined()
            && self.yards.is_defined()
            && self.description.is_defined())
    }

    /// Miles and chains combined, when both are known.
    pub fn mileage(&self) -> Option<Mileage> {
        match (&self.miles, &self.chains) {
            (Field::Defined(miles), Field::Defined(chains)) => Some(Mileage::new(*miles, *chains)),
            _ => None,
        }
    }
}

impl From<&Record> for RecordRow {
    fn from(record: &Record) -> Self {
        let mileage = record.mileage.defined();
        Self {
            file: record.file_id.clone(),
            lor: record.lor_code.clone(),
            seq: record.sequence.clone(),
            lineref: record.lineref.clone(),
            miles: mileage.map(Mileage::miles).into(),
            chains: mileage.map(Mileage::chains).into(),
            yards: mileage.map(Mileage::yards).into(),
            description: record.description.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoMatchResult {
    pub longitude: f64,
    pub latitude: f64,
    pub parent_feature_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeoTaggedRecord {
    pub row: RecordRow,
    pub location: GeoMatchResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractPaths {
    pub work_dir: String,
    pub intake_dir: String,
    pub processed_dir: String,
    pub failed_dir: String,
    pub output_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractCounts {
    pub image_count: usize,
    pub parsed_count: usize,
    pub failed_count: usize,
    pub extraction_failed_count: usize,
    pub multi_mileage_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractEntry {
    pub file: String,
    pub sha256: Option<String>,
    pub status: RecordStatus,
    pub errors: Vec<String>,
    pub linerefs: Vec<LineRefCode>,
    pub mileages: Vec<Mileage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub command: String,
    pub table_source: String,
    pub paths: ExtractPaths,
    pub counts: ExtractCounts,
    pub entries: Vec<ExtractEntry>,
}

/// The parts of an extraction manifest that `status` reports.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractRunSummary {
    pub run_id: String,
    pub status: String,
    pub updated_at: String,
    pub counts: ExtractCounts,
}
