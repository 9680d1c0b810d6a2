use std::path::PathBuf;

use crate::unit::UnitKind;

#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("unit `{0}` not found in any library")]
    NotFound(String),
    #[error("library {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("unit `{unit}` is corrupt: {reason}")]
    CorruptUnit { unit: String, reason: String },
    #[error("no writable library for unit `{0}`")]
    WriteProtected(String),
    #[error("unit `{name}` already exists as a {existing}")]
    Conflict { name: String, existing: UnitKind },
    #[error("replacing unit `{0}` would change whether it needs a body")]
    BodyConflict(String),
    #[error("cannot access library {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Malformed bytes inside one stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("unexpected end of stream at byte {0}")]
    Eof(usize),
    #[error("invalid {what} value {value}")]
    Invalid { what: &'static str, value: u64 },
    #[error("string is not valid UTF-8")]
    Utf8,
}

impl CodecError {
    pub fn in_unit(self, unit: &str) -> LibraryError {
        LibraryError::CorruptUnit {
            unit: unit.to_string(),
            reason: self.to_string(),
        }
    }
}
