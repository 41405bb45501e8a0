//! Content record codecs.
//!
//! Only two schemes are recognised: stored (type 1) and the PalmDOC
//! byte-pair / back-reference scheme (type 2). Anything else is rejected
//! by the format header before a codec is ever requested.
//!
//! # PalmDOC token classes
//!
//! | byte          | meaning                                              |
//! |---------------|------------------------------------------------------|
//! | `0x00`        | literal zero                                         |
//! | `0x01..=0x08` | copy the next *n* input bytes verbatim               |
//! | `0x09..=0x7F` | literal byte                                         |
//! | `0x80..=0xBF` | two-byte back-reference: 11-bit distance, 3-bit length |
//! | `0xC0..=0xFF` | space followed by `byte ^ 0x80`                      |
//!
//! Back-references may overlap the bytes they produce, so they are copied
//! one byte at a time.

use crate::format::Compression;

/// Output of decoding one record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Decoded {
    pub data:    Vec<u8>,
    /// Back-reference bytes dropped because they pointed outside the output.
    pub skipped: usize,
}

impl Decoded {
    pub fn is_clean(&self) -> bool {
        self.skipped == 0
    }
}

pub trait Codec: Send + Sync {
    fn compression(&self) -> Compression;
    fn decompress(&self, raw: &[u8]) -> Decoded;
}

pub struct NoneCodec;
impl Codec for NoneCodec {
    fn compression(&self) -> Compression { Compression::None }
    fn decompress(&self, raw: &[u8]) -> Decoded {
        Decoded { data: raw.to_vec(), skipped: 0 }
    }
}

pub struct PalmDocCodec;
impl Codec for PalmDocCodec {
    fn compression(&self) -> Compression { Compression::PalmDoc }
    fn decompress(&self, raw: &[u8]) -> Decoded { decompress(raw) }
}

pub fn get_codec(compression: Compression) -> Box<dyn Codec> {
    match compression {
        Compression::None    => Box::new(NoneCodec),
        Compression::PalmDoc => Box::new(PalmDocCodec),
    }
}

/// Decode one PalmDOC-compressed record.
///
/// Never fails: input that ends inside a token ends the record, and
/// back-reference bytes that would read outside the output are dropped and
/// counted in [`Decoded::skipped`].
pub fn decompress(raw: &[u8]) -> Decoded {
    let mut out: Vec<u8> = Vec::with_capacity(raw.len());
    let mut skipped = 0usize;
    let mut p = 0usize;

    while p < raw.len() {
        let c = raw[p];
        p += 1;

        match c {
            0x01..=0x08 => {
                let end = (p + c as usize).min(raw.len());
                out.extend_from_slice(&raw[p..end]);
                p = end;
            }
            0x00..=0x7F => out.push(c),
            0xC0..=0xFF => {
                out.push(b' ');
                out.push(c ^ 0x80);
            }
            0x80..=0xBF => {
                let Some(&next) = raw.get(p) else { break };
                p += 1;

                let d = u16::from_be_bytes([c, next]);
                let distance = ((d >> 3) & 0x07FF) as usize;
                let length   = (d & 0x0007) as usize + 3;

                let start = out.len();
                for k in 0..length {
                    match (start + k).checked_sub(distance) {
                        Some(src) if src < out.len() => {
                            let b = out[src];
                            out.push(b);
                        }
                        _ => skipped += 1,
                    }
                }
            }
        }
    }

    Decoded { data: out, skipped }
}
