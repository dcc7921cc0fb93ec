//! Mileage recovery from OCR text.
//!
//! OCR of the miles/chains column is unreliable, so the parser runs an
//! ordered chain of strategies and stops at the first one that yields a
//! result. Each strategy is public so it can be exercised on its own.

use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

use crate::error::FieldError;
use crate::model::Mileage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MileageStage {
    Direct,
    StarAnchored,
    PairedDigits,
}

impl MileageStage {
    pub const ORDERED: [MileageStage; 3] = [Self::Direct, Self::StarAnchored, Self::PairedDigits];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::StarAnchored => "star-anchored",
            Self::PairedDigits => "paired-digits",
        }
    }
}

pub struct MileageParser {
    direct: Regex,
    star_token: Regex,
}

impl MileageParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            direct: Regex::new(r"([0-9]{1,3}) {1,4}([0-9]{1,4})")
                .context("failed to compile direct mileage regex")?,
            star_token: Regex::new(r"[0-9]{2}[ *]+")
                .context("failed to compile starred mileage token regex")?,
        })
    }

    /// Parses a raw mileage blob into one or more mileages.
    pub fn parse(&self, raw: &str) -> Result<Vec<Mileage>, FieldError> {
        self.parse_with_stage(raw).map(|(_, mileages)| mileages)
    }

    /// Like [`MileageParser::parse`], also reporting which stage succeeded.
    pub fn parse_with_stage(&self, raw: &str) -> Result<(MileageStage, Vec<Mileage>), FieldError> {
        if raw.trim().is_empty() {
            return Err(FieldError::Unparseable);
        }

        for stage in MileageStage::ORDERED {
            if let Some(mileages) = self.run_stage(stage, raw)? {
                debug!(stage = stage.as_str(), count = mileages.len(), "mileage parsed");
                return Ok((stage, mileages));
            }
        }

        Err(FieldError::Unparseable)
    }

    fn run_stage(&self, stage: MileageStage, raw: &str) -> Result<Option<Vec<Mileage>>, FieldError> {
        match stage {
            MileageStage::Direct => Ok(self.direct(raw).map(|mileage| vec![mileage])),
            MileageStage::StarAnchored => Ok(self.star_anchored(raw).map(|mileage| vec![mileage])),
            MileageStage::PairedDigits => {
                let mileages = paired_digits(raw)?;
                Ok((!mileages.is_empty()).then_some(mileages))
            }
        }
    }

    /// First `miles<spaces>chains` occurrence, e.g. `"12 345"`.
    pub fn direct(&self, raw: &str) -> Option<Mileage> {
        let captures = self.direct.captures(raw)?;
        let miles = captures.get(1)?.as_str().parse().ok()?;
        let chains = captures.get(2)?.as_str().parse().ok()?;
        Some(Mileage::new(miles, chains))
    }

    /// Chains marked with an asterisk, miles taken from the token before it.
    ///
    /// Only the last starred token in the text is considered.
    pub fn star_anchored(&self, raw: &str) -> Option<Mileage> {
        let flattened = raw.replace('\n', " ");
        let tokens: Vec<&str> = self
            .star_token
            .find_iter(&flattened)
            .map(|found| found.as_str().trim())
            .collect();

        let starred = tokens.iter().rposition(|token| token.contains('*'))?;
        let chains = leading_pair(tokens[starred])?;
        let miles = leading_pair(tokens.get(starred.checked_sub(1)?)?)?;
        Some(Mileage::new(miles, chains))
    }
}

/// Alternating digit runs read as miles, chains, miles, chains, ...
pub fn paired_digits(raw: &str) -> Result<Vec<Mileage>, FieldError> {
    let filtered: String = raw
        .chars()
        .filter(|character| character.is_ascii_digit() || character.is_whitespace())
        .collect();

    let runs = filtered
        .split_whitespace()
        .map(|run| run.parse::<u32>().map_err(|_| FieldError::Unparseable))
        .collect::<Result<Vec<_>, _>>()?;

    let miles: Vec<u32> = runs.iter().copied().step_by(2).collect();
    let chains: Vec<u32> = runs.iter().copied().skip(1).step_by(2).collect();
    if miles.len() != chains.len() {
        return Err(FieldError::MismatchedPairs {
            miles: miles.len(),
            chains: chains.len(),
        });
    }

    Ok(miles
        .into_iter()
        .zip(chains)
        .map(|(miles, chains)| Mileage::new(miles, chains))
        .collect())
}

fn leading_pair(token: &str) -> Option<u32> {
    token.get(..2)?.parse().ok()
}
