//! Format header stored in record 0: the PalmDOC header, optionally
//! followed by a MOBI header.
//!
//! ```text
//! record offset  size  field
//!             0     2  compression (1 = none, 2 = PalmDOC)
//!             4     4  uncompressed text length
//!             8     2  text record count
//!            10     2  text record size
//!            12     2  encryption type
//!            16     4  "MOBI"
//!            20     4  MOBI header length
//!            24     4  MOBI type
//!            28     4  text encoding (1252, 65001)
//!            32     4  unique id
//!            36     4  file version
//!            80     4  first non-book index
//!            84     4  full name offset (from record start)
//!            88     4  full name length
//!            92     4  locale
//!           108     4  first image index
//!           128     4  EXTH flags (0x40 = EXTH present)
//!           192     2  first content record
//!           194     2  last content record
//!           200     4  FCIS record index
//!           204     4  FCIS count
//!           208     4  FLIS record index
//!           212     4  FLIS count
//!           240     4  extra record data flags (low 16 bits)
//! ```
//!
//! Everything not listed is reserved and skipped. Fields that fall past
//! `16 + header length` belong to whatever follows the header and are
//! decoded as zero.

use std::io::{Read, Seek};

use byteorder::{BigEndian, ReadBytesExt};
use encoding_rs::{UTF_8, WINDOWS_1252};
use log::{debug, info};
use serde::Serialize;

use crate::container::DirectoryEntry;
use crate::error::{MobiError, Result, Stage};
use crate::field::{read_fixed, skip};

pub const PALMDOC_HEADER_SIZE: u64 = 16;
/// Fixed decode span of PalmDOC + MOBI header, from the record start.
pub const FORMAT_HEADER_SIZE:  u64 = 248;

/// End of the first/last content record fields, from the record start.
const CONTENT_RANGE_END:   u64 = 196;

pub const MOBI_MAGIC: &[u8; 4] = b"MOBI";
pub const EXTH_FLAG:  u32      = 0x40;

// ── Compression / encoding ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Compression {
    None,
    PalmDoc,
}

impl Compression {
    pub fn from_raw(raw: u16) -> Result<Self> {
        match raw {
            1 => Ok(Compression::None),
            2 => Ok(Compression::PalmDoc),
            other => Err(MobiError::UnsupportedCompression(other)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Compression::None    => "none",
            Compression::PalmDoc => "palmdoc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TextEncoding {
    Cp1252,
    Utf8,
    Unknown(u32),
}

impl TextEncoding {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1252  => TextEncoding::Cp1252,
            65001 => TextEncoding::Utf8,
            other => TextEncoding::Unknown(other),
        }
    }

    /// Decode bytes to text. Unknown code pages fall back to CP1252, the
    /// PalmDOC default.
    pub fn decode(self, bytes: &[u8]) -> String {
        let enc = match self {
            TextEncoding::Utf8 => UTF_8,
            TextEncoding::Cp1252 | TextEncoding::Unknown(_) => WINDOWS_1252,
        };
        let (text, _, _) = enc.decode(bytes);
        text.into_owned()
    }
}

// ── Headers ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PalmDocHeader {
    pub compression:  u16,
    pub text_length:  u32,
    pub record_count: u16,
    pub record_size:  u16,
    pub encryption:   u16,
}

impl PalmDocHeader {
    pub fn decode(mut buf: &[u8]) -> std::io::Result<Self> {
        let compression  = buf.read_u16::<BigEndian>()?;
        skip(&mut buf, 2)?;
        let text_length  = buf.read_u32::<BigEndian>()?;
        let record_count = buf.read_u16::<BigEndian>()?;
        let record_size  = buf.read_u16::<BigEndian>()?;
        let encryption   = buf.read_u16::<BigEndian>()?;
        Ok(Self { compression, text_length, record_count, record_size, encryption })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MobiHeader {
    pub header_length:        u32,
    pub mobi_type:            u32,
    pub text_encoding:        u32,
    pub unique_id:            u32,
    pub file_version:         u32,
    pub first_non_book_index: u32,
    pub full_name_offset:     u32,
    pub full_name_length:     u32,
    pub locale:               u32,
    pub first_image_index:    u32,
    pub exth_flags:           u32,
    pub first_content_record: u16,
    pub last_content_record:  u16,
    pub fcis_index:           u32,
    pub fcis_count:           u32,
    pub flis_index:           u32,
    pub flis_count:           u32,
    pub extra_data_flags:     u16,
}

impl MobiHeader {
    /// Decode from a buffer positioned just past the `"MOBI"` tag.
    fn decode(mut buf: &[u8]) -> std::io::Result<Self> {
        let header_length        = buf.read_u32::<BigEndian>()?;
        let mobi_type            = buf.read_u32::<BigEndian>()?;
        let text_encoding        = buf.read_u32::<BigEndian>()?;
        let unique_id            = buf.read_u32::<BigEndian>()?;
        let file_version         = buf.read_u32::<BigEndian>()?;
        skip(&mut buf, 40)?;
        let first_non_book_index = buf.read_u32::<BigEndian>()?;
        let full_name_offset     = buf.read_u32::<BigEndian>()?;
        let full_name_length     = buf.read_u32::<BigEndian>()?;
        let locale               = buf.read_u32::<BigEndian>()?;
        skip(&mut buf, 12)?;
        let first_image_index    = buf.read_u32::<BigEndian>()?;
        skip(&mut buf, 16)?;
        let exth_flags           = buf.read_u32::<BigEndian>()?;
        skip(&mut buf, 60)?;
        let first_content_record = buf.read_u16::<BigEndian>()?;
        let last_content_record  = buf.read_u16::<BigEndian>()?;
        skip(&mut buf, 4)?;
        let fcis_index           = buf.read_u32::<BigEndian>()?;
        let fcis_count           = buf.read_u32::<BigEndian>()?;
        let flis_index           = buf.read_u32::<BigEndian>()?;
        let flis_count           = buf.read_u32::<BigEndian>()?;
        skip(&mut buf, 24)?;
        let extra_data_flags     = (buf.read_u32::<BigEndian>()? & 0xFFFF) as u16;
        Ok(Self {
            header_length,
            mobi_type,
            text_encoding,
            unique_id,
            file_version,
            first_non_book_index,
            full_name_offset,
            full_name_length,
            locale,
            first_image_index,
            exth_flags,
            first_content_record,
            last_content_record,
            fcis_index,
            fcis_count,
            flis_index,
            flis_count,
            extra_data_flags,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatHeader {
    /// Absolute offset of record 0.
    pub offset:  u64,
    pub palmdoc: PalmDocHeader,
    /// Absent for plain PalmDOC files.
    pub mobi:    Option<MobiHeader>,
}

impl FormatHeader {
    pub fn compression(&self) -> Result<Compression> {
        Compression::from_raw(self.palmdoc.compression)
    }

    /// Reject anything the content decoder cannot handle.
    pub fn validate(&self) -> Result<Compression> {
        let compression = self.compression()?;
        if self.palmdoc.encryption != 0 {
            return Err(MobiError::UnsupportedEncryption(self.palmdoc.encryption));
        }
        Ok(compression)
    }

    pub fn text_encoding(&self) -> TextEncoding {
        match &self.mobi {
            Some(m) => TextEncoding::from_raw(m.text_encoding),
            None    => TextEncoding::Cp1252,
        }
    }

    pub fn has_exth(&self) -> bool {
        self.mobi.as_ref().map_or(false, |m| m.exth_flags & EXTH_FLAG != 0)
    }

    /// Absolute offset just past the format header, where EXTH begins.
    pub fn end_offset(&self) -> u64 {
        match &self.mobi {
            Some(m) => self.offset + PALMDOC_HEADER_SIZE + m.header_length as u64,
            None    => self.offset + PALMDOC_HEADER_SIZE,
        }
    }

    /// Inclusive directory-index range of the text records, bounded by the
    /// declared record count so trailing image records are left alone.
    /// `None` when the book declares no text records.
    ///
    /// MOBI headers too short to carry the range, or naming record 0, fall
    /// back to the PalmDOC layout of text starting at record 1.
    pub fn content_range(&self) -> Option<(usize, usize)> {
        let count = self.palmdoc.record_count as usize;
        if count == 0 {
            return None;
        }
        match &self.mobi {
            Some(m)
                if m.first_content_record > 0
                    && PALMDOC_HEADER_SIZE + m.header_length as u64 >= CONTENT_RANGE_END =>
            {
                let first = m.first_content_record as usize;
                let last  = (m.last_content_record as usize).min(first + count - 1);
                Some((first, last))
            }
            _ => Some((1, count)),
        }
    }

    /// Trailing-entry flags applied to every text record.
    pub fn extra_data_flags(&self) -> u16 {
        self.mobi.as_ref().map_or(0, |m| m.extra_data_flags)
    }

    /// Decode from the bytes of record 0 starting at its first byte.
    ///
    /// `buf` must hold at least the PalmDOC header. When it also carries a
    /// MOBI tag it must span [`FORMAT_HEADER_SIZE`] bytes.
    pub fn decode(buf: &[u8], offset: u64) -> Result<Self> {
        let palmdoc = PalmDocHeader::decode(buf)?;
        let rest = buf.get(PALMDOC_HEADER_SIZE as usize..).unwrap_or(&[]);
        if rest.len() < 4 || &rest[..4] != MOBI_MAGIC {
            return Ok(Self { offset, palmdoc, mobi: None });
        }
        if (buf.len() as u64) < FORMAT_HEADER_SIZE {
            return Err(MobiError::Truncated {
                stage:     Stage::FormatHeader,
                offset,
                needed:    FORMAT_HEADER_SIZE,
                available: buf.len() as u64,
            });
        }
        let header_length = (&buf[20..24]).read_u32::<BigEndian>()?;

        let mut masked = [0u8; FORMAT_HEADER_SIZE as usize];
        masked.copy_from_slice(&buf[..FORMAT_HEADER_SIZE as usize]);
        let declared_end = (PALMDOC_HEADER_SIZE + header_length as u64).min(FORMAT_HEADER_SIZE) as usize;
        masked[declared_end..].fill(0);
        // Length field itself always survives the mask.
        masked[20..24].copy_from_slice(&header_length.to_be_bytes());

        let mobi = MobiHeader::decode(&masked[20..])?;
        Ok(Self { offset, palmdoc, mobi: Some(mobi) })
    }
}

/// Read and validate the format header at `directory[0]`.
pub fn read_format_header<R: Read + Seek>(source: &mut R, directory: &[DirectoryEntry]) -> Result<FormatHeader> {
    let header = read_format_header_unchecked(source, directory)?;
    header.validate()?;
    Ok(header)
}

/// Read the format header without checking compression or encryption.
pub fn read_format_header_unchecked<R: Read + Seek>(
    source:    &mut R,
    directory: &[DirectoryEntry],
) -> Result<FormatHeader> {
    let entry = directory.first().ok_or(MobiError::InvalidRange {
        first:         0,
        last:          0,
        directory_len: 0,
    })?;
    let offset = entry.data_offset as u64;

    let prefix = read_fixed(source, offset, PALMDOC_HEADER_SIZE + 4, Stage::FormatHeader);
    let buf = match prefix {
        Ok(p) if &p[PALMDOC_HEADER_SIZE as usize..] == MOBI_MAGIC => {
            read_fixed(source, offset, FORMAT_HEADER_SIZE, Stage::FormatHeader)?
        }
        Ok(p) => p,
        // A bare PalmDOC header at the very end of the file.
        Err(MobiError::Truncated { available, .. }) if available >= PALMDOC_HEADER_SIZE => {
            read_fixed(source, offset, PALMDOC_HEADER_SIZE, Stage::FormatHeader)?
        }
        Err(e) => return Err(e),
    };

    let header = FormatHeader::decode(&buf, offset)?;
    match &header.mobi {
        Some(m) => info!(
            "MOBI header v{} at {}: compression={}, {} text record(s), encoding={}, exth={}",
            m.file_version,
            offset,
            header.palmdoc.compression,
            header.palmdoc.record_count,
            m.text_encoding,
            header.has_exth()
        ),
        None => info!(
            "PalmDOC header at {}: compression={}, {} text record(s)",
            offset, header.palmdoc.compression, header.palmdoc.record_count
        ),
    }
    debug!("Content range {:?}, extra data flags {:#06x}", header.content_range(), header.extra_data_flags());
    Ok(header)
}

/// Read the book title stored inside record 0.
pub fn read_full_name<R: Read + Seek>(source: &mut R, header: &FormatHeader) -> Result<Option<String>> {
    let mobi = match &header.mobi {
        Some(m) if m.full_name_length > 0 && m.full_name_offset > 0 => m,
        _ => return Ok(None),
    };
    let offset = header.offset + mobi.full_name_offset as u64;
    let bytes = read_fixed(source, offset, mobi.full_name_length as u64, Stage::FormatHeader)?;
    Ok(Some(header.text_encoding().decode(&bytes)))
}
