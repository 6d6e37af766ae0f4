use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("taxonomy header: expecting {column:?} field")]
    MalformedHeader { column: String },

    #[error("taxonomy row {line}: field {field:?}: invalid value {value:?}")]
    MalformedRow {
        line: u64,
        field: String,
        value: String,
    },

    #[error("ambiguous taxon name {name:?}: found {} IDs", .ids.len())]
    #[diagnostic(help("pass one of the candidate IDs instead of the name"))]
    AmbiguousName { name: String, ids: Vec<u64> },

    #[error("GBIF request failed after {retries} retries: {message}")]
    TransportExhausted { retries: usize, message: String },

    #[error("GBIF gave no answer after {retries} retries")]
    NoAnswer { retries: usize },

    #[error("invalid GBIF query: {0}")]
    InvalidQuery(String),

    #[error("invalid rank: {0}")]
    InvalidRank(String),

    #[error("GBIF request failed: {0}")]
    GbifHttp(String),

    #[error("GBIF returned status {status}: {message}")]
    GbifStatus { status: u16, message: String },

    #[error("failed to decode GBIF response: {0}")]
    GbifDecode(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
