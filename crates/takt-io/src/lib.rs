//! # takt-io: Plan Exchange
//!
//! Bidirectional JSON exchange of the takt entity graph. The document
//! format is name-keyed and tagged; see [`PlanDocument`]. The wire
//! contract is fixed: dates as `%Y-%m-%dT%H:%M:%S`, durations as
//! ISO-8601 periods with a 31,536,000 second year, and the horizon
//! sentinels preserved bit-exact across round-trips.

use thiserror::Error;

pub mod document;

pub use document::{LoadedPlan, PlanDocument};

#[derive(Error, Debug)]
pub enum IoError {
    /// Malformed JSON or field values.
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// A record references an entity that doesn't exist.
    #[error("reference error: {0}")]
    Reference(String),

    /// Underlying model error.
    #[error(transparent)]
    Core(#[from] takt_core::CoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type IoResult<T> = Result<T, IoError>;
