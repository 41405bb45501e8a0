//! Palm database container: the 78-byte header and the record directory.
//!
//! ```text
//! offset  size  field
//!      0    32  name (NUL padded)
//!     32     2  attributes
//!     34     2  version
//!     36     4  creation date
//!     40     4  modification date
//!     44     4  backup date
//!     48     4  modification number
//!     52     4  app info id
//!     56     4  sort info id
//!     60     4  type tag      ("BOOK", "TEXt", ...)
//!     64     4  creator tag   ("MOBI", "REAd", ...)
//!     68     4  unique id seed
//!     72     4  next record list id (reserved, skipped)
//!     76     2  section count
//! ```
//!
//! The directory follows immediately: `section count` entries of 8 bytes
//! (u32 data offset, u8 attributes, u24 unique id).

use std::io::{Read, Seek};

use byteorder::{BigEndian, ReadBytesExt};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;

use crate::error::{MobiError, Result, Stage};
use crate::field::{read_fixed, read_tag, skip, tag_str};

pub const CONTAINER_HEADER_SIZE: u64 = 78;
pub const DIRECTORY_ENTRY_SIZE:  u64 = 8;
/// Offset of the section count within the header.
pub const SECTION_COUNT_OFFSET:  u64 = 76;

/// Seconds between the Palm epoch (1904-01-01) and the Unix epoch.
const PALM_EPOCH_OFFSET: i64 = 2_082_844_800;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerHeader {
    pub name:                [u8; 32],
    pub attributes:          u16,
    pub version:             u16,
    pub creation_date:       u32,
    pub modification_date:   u32,
    pub backup_date:         u32,
    pub modification_number: u32,
    pub app_info_id:         u32,
    pub sort_info_id:        u32,
    pub type_tag:            [u8; 4],
    pub creator:             [u8; 4],
    pub unique_id_seed:      u32,
    pub section_count:       u16,
}

impl ContainerHeader {
    pub fn decode(mut buf: &[u8]) -> std::io::Result<Self> {
        let mut name = [0u8; 32];
        buf.read_exact(&mut name)?;
        let attributes          = buf.read_u16::<BigEndian>()?;
        let version             = buf.read_u16::<BigEndian>()?;
        let creation_date       = buf.read_u32::<BigEndian>()?;
        let modification_date   = buf.read_u32::<BigEndian>()?;
        let backup_date         = buf.read_u32::<BigEndian>()?;
        let modification_number = buf.read_u32::<BigEndian>()?;
        let app_info_id         = buf.read_u32::<BigEndian>()?;
        let sort_info_id        = buf.read_u32::<BigEndian>()?;
        let type_tag            = read_tag(&mut buf)?;
        let creator             = read_tag(&mut buf)?;
        let unique_id_seed      = buf.read_u32::<BigEndian>()?;
        skip(&mut buf, 4)?;
        let section_count       = buf.read_u16::<BigEndian>()?;
        Ok(Self {
            name,
            attributes,
            version,
            creation_date,
            modification_date,
            backup_date,
            modification_number,
            app_info_id,
            sort_info_id,
            type_tag,
            creator,
            unique_id_seed,
            section_count,
        })
    }

    /// Database name up to the first NUL.
    pub fn name(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        tag_str(&self.name[..end])
    }

    /// `"BOOKMOBI"`, `"TEXtREAd"`, ...
    pub fn type_creator(&self) -> String {
        format!("{}{}", tag_str(&self.type_tag), tag_str(&self.creator))
    }

    pub fn created(&self)   -> Option<DateTime<Utc>> { pdb_time(self.creation_date) }
    pub fn modified(&self)  -> Option<DateTime<Utc>> { pdb_time(self.modification_date) }
    pub fn backed_up(&self) -> Option<DateTime<Utc>> { pdb_time(self.backup_date) }
}

/// Interpret a PDB timestamp. Values with the high bit set count from the
/// Palm epoch, the rest from the Unix epoch. Zero means unset.
pub fn pdb_time(raw: u32) -> Option<DateTime<Utc>> {
    if raw == 0 {
        return None;
    }
    let secs = if raw & 0x8000_0000 != 0 {
        raw as i64 - PALM_EPOCH_OFFSET
    } else {
        raw as i64
    };
    DateTime::from_timestamp(secs, 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DirectoryEntry {
    pub data_offset: u32,
    pub attributes:  u8,
    pub unique_id:   u32,
}

impl DirectoryEntry {
    pub fn decode(mut buf: &[u8]) -> std::io::Result<Self> {
        Ok(Self {
            data_offset: buf.read_u32::<BigEndian>()?,
            attributes:  buf.read_u8()?,
            unique_id:   buf.read_u24::<BigEndian>()?,
        })
    }
}

/// Read the 78-byte header at the start of the source.
///
/// A section count of zero is rejected: record 0 must hold the format
/// header.
pub fn read_container_header<R: Read + Seek>(source: &mut R) -> Result<ContainerHeader> {
    let buf = read_fixed(source, 0, CONTAINER_HEADER_SIZE, Stage::Container)?;
    let header = ContainerHeader::decode(&buf)?;
    if header.section_count == 0 {
        return Err(MobiError::NoRecords { offset: SECTION_COUNT_OFFSET });
    }
    info!(
        "Container '{}' ({}) with {} section(s)",
        header.name(),
        header.type_creator(),
        header.section_count
    );
    Ok(header)
}

/// Read `count` directory entries starting at `start`.
///
/// Any short read aborts the whole directory; no partial list is returned.
pub fn read_directory<R: Read + Seek>(source: &mut R, count: u16, start: u64) -> Result<Vec<DirectoryEntry>> {
    let mut entries = Vec::with_capacity(count as usize);
    for i in 0..count as u64 {
        let offset = start + i * DIRECTORY_ENTRY_SIZE;
        let buf = read_fixed(source, offset, DIRECTORY_ENTRY_SIZE, Stage::Directory)?;
        entries.push(DirectoryEntry::decode(&buf)?);
    }
    debug!("Read {} directory entries from offset {}", entries.len(), start);
    Ok(entries)
}
