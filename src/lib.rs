//! Decoder for PalmDOC / MOBI e-book containers.
//!
//! The pipeline runs strictly forward: container header, record directory,
//! format header (record 0), optional EXTH block, then the text records,
//! each decoded on its own. [`Book`] drives the whole chain; the stage
//! modules are public for callers that want a single step.

pub mod error;
pub mod field;
pub mod container;
pub mod format;
pub mod exth;
pub mod content;
pub mod codec;
pub mod auxiliary;
pub mod perf;
pub mod book;

pub use error::{MobiError, Result, Stage};
pub use container::{ContainerHeader, DirectoryEntry, read_container_header, read_directory};
pub use format::{Compression, FormatHeader, TextEncoding, read_format_header};
pub use exth::{ExthKind, ExthRecord, ExtendedMetadata, read_extended_metadata};
pub use content::{RawRecord, extract_content_records};
pub use codec::{Codec, Decoded, decompress, get_codec};
pub use perf::DecodedRecord;
pub use book::{Book, ParseOptions};
