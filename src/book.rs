//! High-level [`Book`] API, the primary embedding surface.
//!
//! ```no_run
//! use mobidec::book::{Book, ParseOptions};
//!
//! let book = Book::open("novel.mobi")?;
//! println!("{}", book.title());
//! std::fs::write("novel.txt", book.text_bytes())?;
//!
//! // Refuse books with broken back-references instead of decoding them
//! // best effort.
//! let strict = ParseOptions { strict: true, ..ParseOptions::default() };
//! let book = Book::open_with_options("novel.mobi", &strict)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, Write};
use std::path::Path;

use log::{debug, info, warn};

use crate::auxiliary::{read_eof, read_fcis, read_flis, EofRecord, Fcis, Flis};
use crate::container::{read_container_header, read_directory, ContainerHeader, DirectoryEntry, CONTAINER_HEADER_SIZE};
use crate::content::extract_content_records_to_end;
use crate::error::{MobiError, Result};
use crate::exth::{read_extended_metadata, ExthKind, ExtendedMetadata};
use crate::format::{read_format_header, read_full_name, FormatHeader, TextEncoding};
use crate::perf::{decode_records, DecodedRecord};

// ── ParseOptions ──────────────────────────────────────────────────────────────

/// Configuration for [`Book::parse_with_options`].
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Fail on out-of-range back-references and on unreadable auxiliary
    /// records instead of continuing best effort.
    pub strict:                 bool,
    /// Remove the trailing entries declared by the extra-data flags before
    /// decoding each text record.
    pub strip_trailing_entries: bool,
    /// Decode records on the Rayon pool (needs the `parallel` feature).
    pub parallel:               bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            strict:                 false,
            strip_trailing_entries: true,
            parallel:               true,
        }
    }
}

// ── Book ──────────────────────────────────────────────────────────────────────

/// A fully parsed container. Owns everything it decoded; the source is
/// only borrowed while parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct Book {
    pub header:    ContainerHeader,
    pub directory: Vec<DirectoryEntry>,
    pub format:    FormatHeader,
    pub full_name: Option<String>,
    pub exth:      Option<ExtendedMetadata>,
    pub fcis:      Option<Fcis>,
    pub flis:      Option<Flis>,
    pub eof:       Option<EofRecord>,
    /// Decoded text records in directory order.
    pub records:   Vec<DecodedRecord>,
}

impl Book {
    // ── Constructors ─────────────────────────────────────────────────────────

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_options(path, &ParseOptions::default())
    }

    pub fn open_with_options<P: AsRef<Path>>(path: P, opts: &ParseOptions) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening {}", path.display());
        let mut reader = BufReader::new(File::open(path)?);
        Self::parse_with_options(&mut reader, opts)
    }

    pub fn parse<R: Read + Seek>(source: &mut R) -> Result<Self> {
        Self::parse_with_options(source, &ParseOptions::default())
    }

    /// Run the whole pipeline: container header, directory, format header,
    /// EXTH, content records, auxiliary records.
    ///
    /// Header-chain failures abort immediately. Auxiliary records and
    /// out-of-range back-references only abort in strict mode.
    pub fn parse_with_options<R: Read + Seek>(source: &mut R, opts: &ParseOptions) -> Result<Self> {
        let header    = read_container_header(source)?;
        let directory = read_directory(source, header.section_count, CONTAINER_HEADER_SIZE)?;
        let format    = read_format_header(source, &directory)?;
        let compression = format.compression()?;

        let full_name = optional(read_full_name(source, &format), opts.strict, "full name")?.flatten();

        let exth = if format.has_exth() {
            Some(read_extended_metadata(source, format.end_offset())?)
        } else {
            None
        };

        let records = match format.content_range() {
            Some((first, last)) => {
                let raw = extract_content_records_to_end(source, &directory, first, last)?;
                let flags = if opts.strip_trailing_entries { format.extra_data_flags() } else { 0 };
                decode_records(raw, compression, flags, opts.parallel)
            }
            None => Vec::new(),
        };
        if opts.strict {
            if let Some(bad) = records.iter().find(|r| !r.is_clean()) {
                return Err(MobiError::CorruptRecord { record: bad.index, skipped: bad.skipped });
            }
        }

        let (mut fcis, mut flis) = (None, None);
        if let Some(m) = &format.mobi {
            if m.fcis_count > 0 {
                fcis = optional(read_fcis(source, &directory, m.fcis_index as usize), opts.strict, "FCIS")?;
            }
            if m.flis_count > 0 {
                flis = optional(read_flis(source, &directory, m.flis_index as usize), opts.strict, "FLIS")?;
            }
        }
        let eof = optional(read_eof(source, &directory), opts.strict, "EOF")?.flatten();

        let book = Self { header, directory, format, full_name, exth, fcis, flis, eof, records };
        book.check_lengths();
        Ok(book)
    }

    fn check_lengths(&self) {
        let declared = self.format.palmdoc.text_length as usize;
        let decoded  = self.records.iter().map(|r| r.data.len()).sum::<usize>();
        if decoded != declared {
            debug!("Decoded {} text bytes, header declares {}", decoded, declared);
        }
        if let Some(f) = &self.fcis {
            if f.text_length != self.format.palmdoc.text_length {
                warn!("FCIS text length {} differs from header {}", f.text_length, declared);
            }
        }
    }

    // ── Export ───────────────────────────────────────────────────────────────

    /// All decoded records concatenated in directory order.
    pub fn text_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.records.iter().map(|r| r.data.len()).sum());
        for r in &self.records {
            out.extend_from_slice(&r.data);
        }
        out
    }

    /// Stream the concatenated text to `writer`. Returns bytes written.
    pub fn write_text<W: Write>(&self, mut writer: W) -> io::Result<u64> {
        let mut written = 0u64;
        for r in &self.records {
            writer.write_all(&r.data)?;
            written += r.data.len() as u64;
        }
        writer.flush()?;
        Ok(written)
    }

    /// The text decoded with the book's declared encoding.
    pub fn text(&self) -> String {
        self.encoding().decode(&self.text_bytes())
    }

    // ── Metadata ─────────────────────────────────────────────────────────────

    pub fn encoding(&self) -> TextEncoding {
        self.format.text_encoding()
    }

    /// EXTH updated title, else the record-0 full name, else the database name.
    pub fn title(&self) -> String {
        self.exth_string(ExthKind::UpdatedTitle)
            .or_else(|| self.full_name.clone())
            .unwrap_or_else(|| self.header.name())
    }

    pub fn authors(&self) -> Vec<String> {
        self.exth
            .as_ref()
            .map(|x| x.strings(ExthKind::Author, self.encoding()))
            .unwrap_or_default()
    }

    pub fn exth_string(&self, kind: ExthKind) -> Option<String> {
        let rec = self.exth.as_ref()?.get(kind)?;
        Some(rec.as_string(self.encoding()))
    }

    /// Records that needed best-effort decoding.
    pub fn corrupt_records(&self) -> impl Iterator<Item = &DecodedRecord> {
        self.records.iter().filter(|r| !r.is_clean())
    }
}

fn optional<T>(res: Result<T>, strict: bool, what: &str) -> Result<Option<T>> {
    match res {
        Ok(v) => Ok(Some(v)),
        Err(e) if !strict => {
            warn!("Ignoring unreadable {}: {}", what, e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
