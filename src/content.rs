//! Raw content record extraction.
//!
//! A record has no stored length: it runs from its own directory offset to
//! the next entry's offset. The last directory entry has nothing after it
//! and is only readable when bounded by the end of the source.

use std::io::{Read, Seek, SeekFrom};

use log::{debug, trace};

use crate::container::DirectoryEntry;
use crate::error::{MobiError, Result, Stage};
use crate::field::read_fixed;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Directory index.
    pub index:  usize,
    /// Absolute byte offset.
    pub offset: u64,
    pub data:   Vec<u8>,
}

/// Offset and length of record `index`, bounded by the following entry.
pub fn record_span(directory: &[DirectoryEntry], index: usize) -> Result<(u64, u64)> {
    span(directory, index, None)
}

// With `source_end` set, the final entry runs to the end of the source.
fn span(directory: &[DirectoryEntry], index: usize, source_end: Option<u64>) -> Result<(u64, u64)> {
    let invalid = || MobiError::InvalidRange {
        first:         index,
        last:          index,
        directory_len: directory.len(),
    };
    let start = directory.get(index).ok_or_else(invalid)?.data_offset as u64;
    let end = match (directory.get(index + 1), source_end) {
        (Some(next), _)     => next.data_offset as u64,
        (None, Some(end))   => end,
        (None, None)        => return Err(invalid()),
    };
    let len = end.checked_sub(start).ok_or_else(invalid)?;
    Ok((start, len))
}

/// Read the raw bytes of directory records `first..=last`.
///
/// The final directory entry has no length of its own, so `last` must be
/// followed by at least one more entry.
pub fn extract_content_records<R: Read + Seek>(
    source:    &mut R,
    directory: &[DirectoryEntry],
    first:     usize,
    last:      usize,
) -> Result<Vec<RawRecord>> {
    if first > last || last + 1 >= directory.len() {
        return Err(MobiError::InvalidRange { first, last, directory_len: directory.len() });
    }
    extract(source, directory, first, last, None)
}

/// Like [`extract_content_records`], but `last` may be the final directory
/// entry, which then ends where the source ends.
pub fn extract_content_records_to_end<R: Read + Seek>(
    source:    &mut R,
    directory: &[DirectoryEntry],
    first:     usize,
    last:      usize,
) -> Result<Vec<RawRecord>> {
    if first > last || last >= directory.len() {
        return Err(MobiError::InvalidRange { first, last, directory_len: directory.len() });
    }
    let source_end = source.seek(SeekFrom::End(0))?;
    extract(source, directory, first, last, Some(source_end))
}

fn extract<R: Read + Seek>(
    source:     &mut R,
    directory:  &[DirectoryEntry],
    first:      usize,
    last:       usize,
    source_end: Option<u64>,
) -> Result<Vec<RawRecord>> {
    let mut records = Vec::with_capacity(last - first + 1);
    for index in first..=last {
        let (offset, len) = span(directory, index, source_end)?;
        let data = read_fixed(source, offset, len, Stage::ContentRecord)?;
        trace!("Content record {} at {}: {} bytes", index, offset, data.len());
        records.push(RawRecord { index, offset, data });
    }
    debug!("Extracted {} content record(s) [{}..={}]", records.len(), first, last);
    Ok(records)
}

/// Number of trailing bytes the extra-data `flags` append to `data`.
///
/// Bits 1..16 each describe one entry whose size is stored as a
/// backward-read variable-width integer at the current end. Bit 0 marks a
/// multibyte-overlap entry whose size sits in the low two bits of the
/// final byte. The result never exceeds `data.len()`.
pub fn trailing_entries_size(data: &[u8], flags: u16) -> usize {
    let mut size = data.len();
    let mut bits = flags >> 1;
    while bits != 0 {
        if bits & 1 != 0 {
            size = size.saturating_sub(backward_varint(&data[..size]));
        }
        bits >>= 1;
    }
    if flags & 1 != 0 && size > 0 {
        let overlap = (data[size - 1] & 0x03) as usize + 1;
        size = size.saturating_sub(overlap);
    }
    data.len() - size
}

/// Drop the trailing entries from a record in place.
pub fn strip_trailing_entries(data: &mut Vec<u8>, flags: u16) {
    if flags == 0 {
        return;
    }
    let n = trailing_entries_size(data, flags);
    data.truncate(data.len() - n);
}

// 7 bits per byte, read from the end; the byte with the high bit set is
// the last one consumed. At most four bytes.
fn backward_varint(buf: &[u8]) -> usize {
    let mut result = 0usize;
    let mut bitpos = 0u32;
    for &v in buf.iter().rev() {
        result |= ((v & 0x7F) as usize) << bitpos;
        bitpos += 7;
        if v & 0x80 != 0 || bitpos >= 28 {
            break;
        }
    }
    result
}
