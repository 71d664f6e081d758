// /src/errors.rs
//! Error taxonomy shared by the diff engine, the applier and the controller
use std::fmt;
use thiserror::Error;

/// Which snapshot of a diff a problem was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Old,
    New,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Old => f.write_str("old"),
            Side::New => f.write_str("new"),
        }
    }
}

/// What kind of coordinate an out-of-range patch index was addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexTarget {
    /// A section index in the old snapshot (delete/reload).
    Section,
    /// A section index in the new snapshot (insert).
    InsertedSection,
    /// A row coordinate in the old snapshot (delete/reload).
    Row,
    /// A row coordinate in the new snapshot (insert).
    InsertedRow,
}

impl fmt::Display for IndexTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IndexTarget::Section => "section",
            IndexTarget::InsertedSection => "inserted section",
            IndexTarget::Row => "row",
            IndexTarget::InsertedRow => "inserted row",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum TableError {
    #[error("Invalid patch index: {target} {index} out of range (len {len})")]
    InvalidPatchIndex {
        target: IndexTarget,
        index: String,
        len: usize,
    },

    #[error("Malformed patch: {reason}")]
    MalformedPatch { reason: String },

    #[error("Ambiguous row id '{id}' in {side} section {section}")]
    AmbiguousRowId {
        side: Side,
        section: usize,
        id: String,
    },

    #[error("Table update rejected: {pending} updates already pending")]
    ConcurrentApplyRejected { pending: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

impl TableError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        TableError::MalformedPatch {
            reason: reason.into(),
        }
    }

    pub(crate) fn out_of_range(target: IndexTarget, index: impl fmt::Display, len: usize) -> Self {
        TableError::InvalidPatchIndex {
            target,
            index: index.to_string(),
            len,
        }
    }
}

#[cfg(feature = "python")]
impl From<TableError> for pyo3::PyErr {
    fn from(err: TableError) -> Self {
        pyo3::exceptions::PyValueError::new_err(err.to_string())
    }
}
