use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, warn};

use super::table_source::TableSource;
use crate::description;
use crate::lineref::LineRefMatcher;
use crate::mileage::MileageParser;
use crate::model::{Field, LineRefCode, Mileage, Record, RecordStatus};
use crate::record::split_file_id;
use crate::table::{FieldExtractor, HeaderLayout, RawExtraction};
use crate::util::sha256_file;

/// Everything needed to turn one image into a record. Shared read-only
/// across extraction workers.
pub struct RecordParser {
    source: Box<dyn TableSource>,
    extractor: FieldExtractor,
    mileage: MileageParser,
    lineref: LineRefMatcher,
}

/// Lifecycle of a single drawing. Each image passes through it once.
#[derive(Debug)]
pub enum RecordState {
    Pending {
        image: PathBuf,
    },
    Extracted {
        image: PathBuf,
        raw: RawExtraction,
        errors: Vec<String>,
    },
    Parsed(ProcessedRecord),
    ExtractionFailed(ProcessedRecord),
}

#[derive(Debug, Clone)]
pub struct ProcessedRecord {
    pub image: PathBuf,
    pub sha256: Option<String>,
    pub record: Record,
    pub linerefs: Vec<LineRefCode>,
    pub mileages: Vec<Mileage>,
    pub errors: Vec<String>,
    pub table_available: bool,
}

impl RecordParser {
    pub fn new(source: Box<dyn TableSource>, layout: HeaderLayout) -> Result<Self> {
        Ok(Self {
            source,
            extractor: FieldExtractor::new(layout)?,
            mileage: MileageParser::new()?,
            lineref: LineRefMatcher::new()?,
        })
    }

    pub fn source_description(&self) -> String {
        self.source.describe()
    }

    /// Drives an image from `Pending` to a terminal state.
    pub fn process(&self, image: &Path) -> ProcessedRecord {
        let mut state = RecordState::Pending {
            image: image.to_path_buf(),
        };
        loop {
            state = match state {
                RecordState::Parsed(processed) | RecordState::ExtractionFailed(processed) => {
                    return processed;
                }
                other => self.advance(other),
            };
        }
    }

    pub fn advance(&self, state: RecordState) -> RecordState {
        match state {
            RecordState::Pending { image } => self.extract(image),
            RecordState::Extracted { image, raw, errors } => self.parse(image, raw, errors),
            terminal => terminal,
        }
    }

    fn extract(&self, image: PathBuf) -> RecordState {
        match self.source.load(&image) {
            Ok(table) => RecordState::Extracted {
                raw: self.extractor.extract(&table),
                image,
                errors: Vec::new(),
            },
            Err(err) => {
                warn!(image = %image.display(), error = %format!("{err:#}"), "table extraction failed");
                RecordState::Extracted {
                    image,
                    raw: RawExtraction::unavailable(),
                    errors: vec![format!("table: {err:#}")],
                }
            }
        }
    }

    fn parse(&self, image: PathBuf, raw: RawExtraction, mut errors: Vec<String>) -> RecordState {
        let table_available = errors.is_empty();
        let file_id = image
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let (lor_code, sequence) = match split_file_id(&file_id) {
            Some((lor, seq)) => (Field::Defined(lor), Field::Defined(seq)),
            None => {
                errors.push(format!("file name: cannot split LOR and sequence from {file_id}"));
                (Field::Undefined, Field::Undefined)
            }
        };

        let linerefs = raw
            .lineref_raw
            .and_then(|text| self.lineref.extract(&text))
            .unwrap_or_else(|err| {
                errors.push(format!("line reference: {err}"));
                Vec::new()
            });

        let mileages = raw
            .mileage_raw
            .and_then(|text| self.mileage.parse(&text))
            .unwrap_or_else(|err| {
                errors.push(format!("mileage: {err}"));
                Vec::new()
            });

        let description = match raw.description_raw {
            Ok(text) => {
                let normalized = description::normalize(&text);
                if !normalized.is_defined() {
                    errors.push("description: empty after normalisation".to_string());
                }
                normalized
            }
            Err(err) => {
                errors.push(format!("description: {err}"));
                Field::Undefined
            }
        };

        let record = Record {
            file_id,
            lor_code,
            sequence,
            lineref: linerefs.first().cloned().into(),
            mileage: mileages.first().copied().into(),
            description,
            status: RecordStatus::Failed,
        };

        let complete = record.lor_code.is_defined()
            && record.sequence.is_defined()
            && record.lineref.is_defined()
            && record.mileage.is_defined()
            && record.description.is_defined();

        let sha256 = match sha256_file(&image) {
            Ok(hash) => Some(hash),
            Err(err) => {
                warn!(image = %image.display(), error = %err, "failed to hash image");
                None
            }
        };

        debug!(file = %record.file_id, linerefs = linerefs.len(), mileages = mileages.len(), "record parsed");

        let mut processed = ProcessedRecord {
            image,
            sha256,
            record,
            linerefs,
            mileages,
            errors,
            table_available,
        };
        if complete {
            processed.record.status = RecordStatus::Parsed;
            RecordState::Parsed(processed)
        } else {
            RecordState::ExtractionFailed(processed)
        }
    }
}
