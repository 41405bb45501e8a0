//! Error type shared by every parsing stage.
//!
//! Every failure names the [`Stage`] that produced it, and where the input
//! was malformed, the absolute byte offset that was being read.

use std::fmt;
use std::io;
use thiserror::Error;

/// The pipeline stage a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Container,
    Directory,
    FormatHeader,
    ExtendedMetadata,
    ContentRecord,
    Fcis,
    Flis,
    Eof,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Container        => "container header",
            Stage::Directory        => "record directory",
            Stage::FormatHeader     => "format header",
            Stage::ExtendedMetadata => "extended metadata",
            Stage::ContentRecord    => "content record",
            Stage::Fcis             => "FCIS record",
            Stage::Flis             => "FLIS record",
            Stage::Eof              => "EOF record",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum MobiError {
    /// Fewer bytes were available at `offset` than the layout requires.
    #[error("Truncated {stage} at offset {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        stage:     Stage,
        offset:    u64,
        needed:    u64,
        available: u64,
    },
    /// The container declares no records, so there is no format header.
    #[error("Container at offset {offset} declares no records")]
    NoRecords { offset: u64 },
    #[error("Unsupported compression type: {0}")]
    UnsupportedCompression(u16),
    #[error("Unsupported encryption type: {0}")]
    UnsupportedEncryption(u16),
    /// Content records `first..=last` cannot be bounded by the directory.
    #[error("Invalid content range {first}..={last} for a directory of {directory_len} entries")]
    InvalidRange {
        first:         usize,
        last:          usize,
        directory_len: usize,
    },
    /// A back-reference pointed outside the output produced so far.
    #[error("Corrupt content record {record}: {skipped} back-reference byte(s) out of range")]
    CorruptRecord { record: usize, skipped: usize },
    #[error("Bad {stage} identifier at offset {offset}: expected {expected:?}, found {found:?}")]
    BadIdentifier {
        stage:    Stage,
        offset:   u64,
        expected: &'static str,
        found:    String,
    },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl MobiError {
    /// The stage that failed, when the error carries one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            MobiError::Truncated { stage, .. } | MobiError::BadIdentifier { stage, .. } => Some(*stage),
            MobiError::NoRecords { .. } => Some(Stage::Container),
            MobiError::UnsupportedCompression(_) | MobiError::UnsupportedEncryption(_) => {
                Some(Stage::FormatHeader)
            }
            MobiError::InvalidRange { .. } | MobiError::CorruptRecord { .. } => Some(Stage::ContentRecord),
            MobiError::Io(_) => None,
        }
    }

    /// Absolute byte offset of the failed read, when known.
    pub fn offset(&self) -> Option<u64> {
        match self {
            MobiError::Truncated { offset, .. }
            | MobiError::BadIdentifier { offset, .. }
            | MobiError::NoRecords { offset } => Some(*offset),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MobiError>;
