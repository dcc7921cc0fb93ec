use thiserror::Error;

use crate::model::LineRefCode;

/// Why a single field of a single drawing could not be produced.
///
/// These never abort a run: the field becomes `Undefined` and the drawing is
/// routed to the failed intake area.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("{0} not found in table")]
    NotFound(&'static str),

    #[error("multi-row field interrupted by an empty cell at row {row}")]
    Incomplete { row: usize },

    #[error("mileage text could not be parsed")]
    Unparseable,

    #[error("mileage digit runs do not pair up ({miles} miles, {chains} chains)")]
    MismatchedPairs { miles: usize, chains: usize },
}

/// Errors raised while matching records against the marker layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    #[error("{} line reference code(s) not found in reference markers: {}", .0.len(), join_codes(.0))]
    UnknownLineRef(Vec<LineRefCode>),

    #[error("no reference markers cached for known line reference {0}")]
    NoMatch(LineRefCode),
}

fn join_codes(codes: &[LineRefCode]) -> String {
    codes
        .iter()
        .map(LineRefCode::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}
