//! FCIS, FLIS and EOF records.
//!
//! None of these carry text. They are located through the directory and
//! checked for their identifiers; of their fields only the FCIS copy of
//! the text length is kept.
//!
//! ```text
//! FCIS (44 bytes): "FCIS" u32=20 u32=16 u32=1 u32=0 u32 text_length
//!                  u32=0 u32=32 u32=8 u16=1 u16=1 u32=0
//! FLIS (36 bytes): "FLIS" u32=8 u16=65 u16=0 u32=0 u32=-1 u16=1 u16=3
//!                  u32=3 u32=1 u32=-1
//! EOF  (4 bytes):  E9 8E 0D 0A
//! ```

use std::io::{Read, Seek};

use byteorder::{BigEndian, ReadBytesExt};
use log::debug;
use serde::Serialize;

use crate::container::DirectoryEntry;
use crate::error::{MobiError, Result, Stage};
use crate::field::{read_fixed, read_tag, skip, tag_str};

pub const FCIS_MAGIC: &[u8; 4] = b"FCIS";
pub const FLIS_MAGIC: &[u8; 4] = b"FLIS";
pub const EOF_MARKER: [u8; 4]  = [0xE9, 0x8E, 0x0D, 0x0A];

pub const FCIS_SIZE: u64 = 44;
pub const FLIS_SIZE: u64 = 36;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fcis {
    pub index:       usize,
    pub offset:      u64,
    pub text_length: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Flis {
    pub index:  usize,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EofRecord {
    pub index:  usize,
    pub offset: u64,
}

fn entry_offset(directory: &[DirectoryEntry], index: usize) -> Result<u64> {
    directory
        .get(index)
        .map(|e| e.data_offset as u64)
        .ok_or(MobiError::InvalidRange { first: index, last: index, directory_len: directory.len() })
}

fn expect_tag(buf: &mut &[u8], magic: &[u8; 4], expected: &'static str, stage: Stage, offset: u64) -> Result<()> {
    let tag = read_tag(buf)?;
    if &tag != magic {
        return Err(MobiError::BadIdentifier {
            stage,
            offset,
            expected,
            found: tag_str(&tag),
        });
    }
    Ok(())
}

/// Read the FCIS record at directory `index`.
pub fn read_fcis<R: Read + Seek>(source: &mut R, directory: &[DirectoryEntry], index: usize) -> Result<Fcis> {
    let offset = entry_offset(directory, index)?;
    let buf = read_fixed(source, offset, FCIS_SIZE, Stage::Fcis)?;
    let mut cur = buf.as_slice();
    expect_tag(&mut cur, FCIS_MAGIC, "FCIS", Stage::Fcis, offset)?;
    skip(&mut cur, 16)?;
    let text_length = cur.read_u32::<BigEndian>()?;
    debug!("FCIS at record {} (offset {}), text length {}", index, offset, text_length);
    Ok(Fcis { index, offset, text_length })
}

/// Read the FLIS record at directory `index`.
pub fn read_flis<R: Read + Seek>(source: &mut R, directory: &[DirectoryEntry], index: usize) -> Result<Flis> {
    let offset = entry_offset(directory, index)?;
    let buf = read_fixed(source, offset, FLIS_SIZE, Stage::Flis)?;
    expect_tag(&mut buf.as_slice(), FLIS_MAGIC, "FLIS", Stage::Flis, offset)?;
    debug!("FLIS at record {} (offset {})", index, offset);
    Ok(Flis { index, offset })
}

/// Check whether the final directory entry is the EOF sentinel.
pub fn read_eof<R: Read + Seek>(source: &mut R, directory: &[DirectoryEntry]) -> Result<Option<EofRecord>> {
    let Some(index) = directory.len().checked_sub(1) else {
        return Ok(None);
    };
    let offset = entry_offset(directory, index)?;
    let buf = read_fixed(source, offset, EOF_MARKER.len() as u64, Stage::Eof)?;
    if buf[..] == EOF_MARKER {
        Ok(Some(EofRecord { index, offset }))
    } else {
        Ok(None)
    }
}
