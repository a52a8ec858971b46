//! Error taxonomy shared by every component of the crate.

use std::io;
use thiserror::Error;

/// Errors produced while parsing, indexing, unifying, loading or validating.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// Malformed range text, unknown contig, out-of-bounds coordinates,
    /// or a range set that violates disjointness.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No stored range overlaps the query.
    #[error("No stored range overlaps {0}")]
    NotFound(String),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Inconsistent catalog: {0}")]
    InconsistentCatalog(String),

    #[error("Source '{source_name}' rejected: {reason}")]
    SourceRejected { source_name: String, reason: String },

    #[error(
        "Iteration mismatch on pass {iteration}: strategy '{strategy}' diverges at record {position} \
         (expected {expected}, found {found})"
    )]
    ConsistencyViolation {
        iteration: usize,
        strategy: String,
        position: usize,
        expected: String,
        found: String,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Encoding error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn rejected(source_name: &str, reason: impl Into<String>) -> Self {
        Error::SourceRejected {
            source_name: source_name.to_string(),
            reason: reason.into(),
        }
    }
}
