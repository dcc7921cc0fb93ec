use anyhow::{Context, Result};
use regex::Regex;

use crate::error::FieldError;
use crate::model::LineRefCode;

pub struct LineRefMatcher {
    code: Regex,
}

impl LineRefMatcher {
    pub fn new() -> Result<Self> {
        Ok(Self {
            code: Regex::new(r"[A-Z]{3}[0-9]?").context("failed to compile line reference regex")?,
        })
    }

    /// All candidate codes in reading order. Duplicates are kept; the first
    /// entry is the primary code.
    pub fn extract(&self, raw: &str) -> Result<Vec<LineRefCode>, FieldError> {
        let codes: Vec<LineRefCode> = self
            .code
            .find_iter(raw)
            .filter_map(|found| LineRefCode::parse(found.as_str()))
            .collect();

        if codes.is_empty() {
            return Err(FieldError::NotFound("line reference"));
        }
        Ok(codes)
    }
}
