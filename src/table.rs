//! Locating the raw description, line reference and mileage cells in a
//! detected drawing table.

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;

use crate::error::FieldError;

pub const DESCRIPTION_HEADER: &str = "Route";
pub const LINE_REF_HEADER: &str = "ELR";
pub const MILEAGE_HEADER: &str = "M Ch";

/// Read access to a table produced by the table-detection collaborator.
pub trait CellGrid {
    fn column_count(&self) -> usize;

    fn row_count(&self) -> usize;

    /// Cell text, or `None` when the cell is missing or blank.
    fn cell(&self, column: usize, row: usize) -> Option<&str>;
}

/// Row-major table as handed over in JSON: `{"rows": [["Route", null], ...]}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GridTable {
    rows: Vec<Vec<Option<String>>>,
}

impl GridTable {
    #[cfg(test)]
    pub fn from_rows(rows: Vec<Vec<Option<String>>>) -> Self {
        Self { rows }
    }

    pub fn from_json(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw).context("failed to parse table json")
    }
}

impl CellGrid for GridTable {
    fn column_count(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn cell(&self, column: usize, row: usize) -> Option<&str> {
        self.rows
            .get(row)?
            .get(column)?
            .as_deref()
            .filter(|value| !value.trim().is_empty())
    }
}

/// Where the header cells live. Table A drawings put the route and ELR
/// headers on the first row and the miles/chains header on the third.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderLayout {
    pub field_header_row: usize,
    pub mileage_header_row: usize,
}

impl Default for HeaderLayout {
    fn default() -> Self {
        Self {
            field_header_row: 0,
            mileage_header_row: 2,
        }
    }
}

/// Raw strings for one drawing, before any parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct RawExtraction {
    pub description_raw: Result<String, FieldError>,
    pub lineref_raw: Result<String, FieldError>,
    pub mileage_raw: Result<String, FieldError>,
}

impl RawExtraction {
    /// Used when no table could be produced for the image at all.
    pub fn unavailable() -> Self {
        Self {
            description_raw: Err(FieldError::NotFound(DESCRIPTION_HEADER)),
            lineref_raw: Err(FieldError::NotFound(LINE_REF_HEADER)),
            mileage_raw: Err(FieldError::NotFound(MILEAGE_HEADER)),
        }
    }
}

pub struct FieldExtractor {
    layout: HeaderLayout,
    mileage_header: Regex,
}

impl FieldExtractor {
    pub fn new(layout: HeaderLayout) -> Result<Self> {
        Ok(Self {
            layout,
            mileage_header: Regex::new(r"M[^A-Za-z0-9]{0,2}C[hH]")
                .context("failed to compile mileage header regex")?,
        })
    }

    pub fn extract(&self, table: &impl CellGrid) -> RawExtraction {
        RawExtraction {
            description_raw: self.locate(table, DESCRIPTION_HEADER),
            lineref_raw: self.locate(table, LINE_REF_HEADER),
            mileage_raw: self.locate_mileage(table),
        }
    }

    /// Value under the first header cell containing `key`.
    pub fn locate(&self, table: &impl CellGrid, key: &'static str) -> Result<String, FieldError> {
        let header_row = self.layout.field_header_row;

        (0..table.column_count())
            .find(|&column| {
                table
                    .cell(column, header_row)
                    .is_some_and(|header| header.contains(key))
            })
            .and_then(|column| table.cell(column, header_row + 1))
            .map(ToOwned::to_owned)
            .ok_or(FieldError::NotFound(key))
    }

    /// Joins the distinct cells below the miles/chains header into one blob.
    pub fn locate_mileage(&self, table: &impl CellGrid) -> Result<String, FieldError> {
        let header_row = self.layout.mileage_header_row;
        let column = (0..table.column_count())
            .find(|&column| {
                table
                    .cell(column, header_row)
                    .is_some_and(|header| self.is_mileage_header(header))
            })
            .ok_or(FieldError::NotFound(MILEAGE_HEADER))?;

        let mut parts = Vec::<&str>::new();
        let mut gap_row = None;
        for row in header_row + 1..table.row_count() {
            match (table.cell(column, row), gap_row) {
                (None, None) => gap_row = Some(row),
                (None, Some(_)) => {}
                (Some(_), Some(gap)) => return Err(FieldError::Incomplete { row: gap }),
                (Some(value), None) => {
                    if !parts.contains(&value) {
                        parts.push(value);
                    }
                }
            }
        }

        if parts.is_empty() {
            return Err(FieldError::Incomplete { row: header_row + 1 });
        }
        Ok(parts.join("\n"))
    }

    fn is_mileage_header(&self, header: &str) -> bool {
        let compact: String = header.chars().filter(|c| !c.is_whitespace()).collect();
        self.mileage_header.is_match(&compact)
    }
}
