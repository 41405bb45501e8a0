//! Record decoding, sequential or parallel.
//!
//! Each content record decodes on its own with no shared state, so the
//! records of a book can be spread over a Rayon pool. Without the
//! `parallel` feature everything runs on the calling thread. Either way
//! the output keeps directory order.

use log::{trace, warn};

use crate::codec::{get_codec, Codec};
use crate::content::{strip_trailing_entries, RawRecord};
use crate::format::Compression;

/// One decoded content record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRecord {
    /// Directory index of the source record.
    pub index:   usize,
    pub data:    Vec<u8>,
    /// Back-reference bytes dropped as out of range.
    pub skipped: usize,
}

impl DecodedRecord {
    pub fn is_clean(&self) -> bool {
        self.skipped == 0
    }
}

/// Strip trailing entries (when `extra_flags` is non-zero) and decode one record.
pub fn decode_record(codec: &dyn Codec, mut raw: RawRecord, extra_flags: u16) -> DecodedRecord {
    strip_trailing_entries(&mut raw.data, extra_flags);
    let decoded = codec.decompress(&raw.data);
    trace!(
        "Record {}: {} -> {} bytes ({})",
        raw.index,
        raw.data.len(),
        decoded.data.len(),
        codec.compression().name()
    );
    if !decoded.is_clean() {
        warn!(
            "Record {}: {} back-reference byte(s) out of range, output is best effort",
            raw.index, decoded.skipped
        );
    }
    DecodedRecord { index: raw.index, data: decoded.data, skipped: decoded.skipped }
}

/// Decode `records` in order.
///
/// With `parallel` set and the `parallel` feature enabled the work is
/// spread across Rayon's global pool; otherwise it runs sequentially.
pub fn decode_records(
    records:     Vec<RawRecord>,
    compression: Compression,
    extra_flags: u16,
    parallel:    bool,
) -> Vec<DecodedRecord> {
    let codec = get_codec(compression);

    #[cfg(feature = "parallel")]
    {
        if parallel {
            use rayon::prelude::*;
            return records
                .into_par_iter()
                .map(|raw| decode_record(codec.as_ref(), raw, extra_flags))
                .collect();
        }
    }
    #[cfg(not(feature = "parallel"))]
    let _ = parallel;

    records
        .into_iter()
        .map(|raw| decode_record(codec.as_ref(), raw, extra_flags))
        .collect()
}
