//! EXTH extended metadata block.
//!
//! ```text
//! "EXTH" | u32 block length | u32 record count
//! record: u32 type | u32 length (including these 8 bytes) | value
//! ```
//!
//! Records are laid end to end; each one starts where the previous ended.

use std::io::{Read, Seek};

use byteorder::{BigEndian, ReadBytesExt};
use log::{debug, trace, warn};
use serde::Serialize;

use crate::error::{MobiError, Result, Stage};
use crate::field::{read_fixed, read_tag, tag_str};
use crate::format::TextEncoding;

pub const EXTH_MAGIC:        &[u8; 4] = b"EXTH";
pub const EXTH_HEADER_SIZE:  u64      = 12;
pub const EXTH_RECORD_HEADER: u64     = 8;

/// Well-known EXTH record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExthKind {
    Author,
    Publisher,
    Description,
    Isbn,
    Subject,
    PublishDate,
    Contributor,
    Rights,
    CoverOffset,
    ThumbOffset,
    UpdatedTitle,
    Language,
    Other(u32),
}

impl ExthKind {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            100 => ExthKind::Author,
            101 => ExthKind::Publisher,
            103 => ExthKind::Description,
            104 => ExthKind::Isbn,
            105 => ExthKind::Subject,
            106 => ExthKind::PublishDate,
            108 => ExthKind::Contributor,
            109 => ExthKind::Rights,
            201 => ExthKind::CoverOffset,
            202 => ExthKind::ThumbOffset,
            503 => ExthKind::UpdatedTitle,
            524 => ExthKind::Language,
            other => ExthKind::Other(other),
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            ExthKind::Author       => 100,
            ExthKind::Publisher    => 101,
            ExthKind::Description  => 103,
            ExthKind::Isbn         => 104,
            ExthKind::Subject      => 105,
            ExthKind::PublishDate  => 106,
            ExthKind::Contributor  => 108,
            ExthKind::Rights       => 109,
            ExthKind::CoverOffset  => 201,
            ExthKind::ThumbOffset  => 202,
            ExthKind::UpdatedTitle => 503,
            ExthKind::Language     => 524,
            ExthKind::Other(raw)   => raw,
        }
    }

    /// Offsets are stored as big-endian integers, everything else as text.
    pub fn is_numeric(self) -> bool {
        matches!(self, ExthKind::CoverOffset | ExthKind::ThumbOffset)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExthRecord {
    pub record_type: u32,
    pub data:        Vec<u8>,
}

impl ExthRecord {
    pub fn kind(&self) -> ExthKind {
        ExthKind::from_raw(self.record_type)
    }

    /// The value as a big-endian integer, if it is exactly 1, 2 or 4 bytes.
    pub fn as_u32(&self) -> Option<u32> {
        let mut d = self.data.as_slice();
        match d.len() {
            1 => d.read_u8().ok().map(u32::from),
            2 => d.read_u16::<BigEndian>().ok().map(u32::from),
            4 => d.read_u32::<BigEndian>().ok(),
            _ => None,
        }
    }

    pub fn as_string(&self, encoding: TextEncoding) -> String {
        encoding.decode(&self.data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtendedMetadata {
    /// Declared block length, header included.
    pub length:  u32,
    pub records: Vec<ExthRecord>,
}

impl ExtendedMetadata {
    pub fn get(&self, kind: ExthKind) -> Option<&ExthRecord> {
        self.records.iter().find(|r| r.record_type == kind.raw())
    }

    /// Every text value of `kind`, in file order (books may list several
    /// authors or subjects).
    pub fn strings(&self, kind: ExthKind, encoding: TextEncoding) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.record_type == kind.raw())
            .map(|r| r.as_string(encoding))
            .collect()
    }

    pub fn u32_value(&self, kind: ExthKind) -> Option<u32> {
        self.get(kind).and_then(ExthRecord::as_u32)
    }

    /// Bytes actually covered by the block header and its records.
    pub fn records_len(&self) -> u64 {
        EXTH_HEADER_SIZE
            + self.records.iter().map(|r| EXTH_RECORD_HEADER + r.data.len() as u64).sum::<u64>()
    }

    /// Whether the declared block length matches the records it holds.
    pub fn is_consistent(&self) -> bool {
        self.records_len() == self.length as u64
    }
}

/// Read the EXTH block that begins at `offset`.
///
/// Any failure discards the records decoded so far.
pub fn read_extended_metadata<R: Read + Seek>(source: &mut R, offset: u64) -> Result<ExtendedMetadata> {
    let head = read_fixed(source, offset, EXTH_HEADER_SIZE, Stage::ExtendedMetadata)?;
    let mut cur = head.as_slice();
    let magic = read_tag(&mut cur)?;
    if &magic != EXTH_MAGIC {
        return Err(MobiError::BadIdentifier {
            stage:    Stage::ExtendedMetadata,
            offset,
            expected: "EXTH",
            found:    tag_str(&magic),
        });
    }
    let length = cur.read_u32::<BigEndian>()?;
    let count  = cur.read_u32::<BigEndian>()?;
    debug!("EXTH at {}: {} bytes, {} record(s)", offset, length, count);

    let block_end = offset + length as u64;
    let mut pos = offset + EXTH_HEADER_SIZE;
    let mut records = Vec::new();

    for _ in 0..count {
        let rec_head = read_fixed(source, pos, EXTH_RECORD_HEADER, Stage::ExtendedMetadata)?;
        let mut cur = rec_head.as_slice();
        let record_type = cur.read_u32::<BigEndian>()?;
        let rec_len     = cur.read_u32::<BigEndian>()? as u64;

        if rec_len < EXTH_RECORD_HEADER || pos + rec_len > block_end {
            return Err(MobiError::Truncated {
                stage:     Stage::ExtendedMetadata,
                offset:    pos,
                needed:    rec_len.max(EXTH_RECORD_HEADER),
                available: block_end.saturating_sub(pos).min(rec_len),
            });
        }

        let data = read_fixed(source, pos + EXTH_RECORD_HEADER, rec_len - EXTH_RECORD_HEADER, Stage::ExtendedMetadata)?;
        trace!("EXTH record type {} ({} bytes) at {}", record_type, data.len(), pos);
        records.push(ExthRecord { record_type, data });
        pos += rec_len;
    }

    let meta = ExtendedMetadata { length, records };
    if !meta.is_consistent() {
        warn!(
            "EXTH at {}: declared length {} but records cover {} bytes",
            offset,
            length,
            meta.records_len()
        );
    }
    Ok(meta)
}
