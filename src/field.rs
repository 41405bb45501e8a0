//! Fixed-length big-endian field reading.
//!
//! Every read takes an explicit absolute offset; no stage relies on the
//! position a previous read left the source at. Layouts are decoded field
//! by field with `byteorder` from the returned buffer, never overlaid.

use std::io::{self, Read, Seek, SeekFrom};

use crate::error::{MobiError, Result, Stage};

/// Read exactly `len` bytes at `offset`.
///
/// The buffer grows with what the source actually yields, so a bogus `len`
/// taken from the file cannot force a large allocation up front.
pub fn read_fixed<R: Read + Seek>(source: &mut R, offset: u64, len: u64, stage: Stage) -> Result<Vec<u8>> {
    source.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::new();
    source.by_ref().take(len).read_to_end(&mut buf)?;
    if (buf.len() as u64) < len {
        return Err(MobiError::Truncated {
            stage,
            offset,
            needed:    len,
            available: buf.len() as u64,
        });
    }
    Ok(buf)
}

/// Advance a slice cursor past `n` reserved bytes.
pub fn skip(buf: &mut &[u8], n: usize) -> io::Result<()> {
    if buf.len() < n {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    *buf = &buf[n..];
    Ok(())
}

/// Read a 4-byte tag such as `b"MOBI"`.
pub fn read_tag(buf: &mut &[u8]) -> io::Result<[u8; 4]> {
    let mut tag = [0u8; 4];
    buf.read_exact(&mut tag)?;
    Ok(tag)
}

/// Lossy printable form of a tag, for diagnostics.
pub fn tag_str(tag: &[u8]) -> String {
    String::from_utf8_lossy(tag).into_owned()
}
