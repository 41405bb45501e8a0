use clap::{Parser, Subcommand};
use mobidec::book::{Book, ParseOptions};
use mobidec::content::record_span;
use mobidec::exth::ExthRecord;
use mobidec::TextEncoding;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;

/// Placeholder for absent values in text output.
const MISSING: &str = "-";

#[derive(Parser)]
#[command(name = "mobidec", about = "Decode PalmDOC/MOBI e-book containers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show container and format header details
    Info {
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// List the record directory
    Records {
        input: PathBuf,
    },
    /// Dump EXTH metadata records
    Exth {
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Write the decoded text (stdout by default)
    Text {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Fail on corrupt back-references or unreadable auxiliary records
        #[arg(long)]
        strict: bool,
        /// Keep trailing record entries instead of stripping them
        #[arg(long)]
        raw_trailing: bool,
        /// Decode records on the calling thread only
        #[arg(long)]
        sequential: bool,
    },
}

#[derive(Serialize)]
struct InfoReport {
    name:          String,
    type_creator:  String,
    created:       Option<chrono::DateTime<chrono::Utc>>,
    modified:      Option<chrono::DateTime<chrono::Utc>>,
    sections:      u16,
    compression:   u16,
    encoding:      TextEncoding,
    text_length:   u32,
    text_records:  usize,
    decoded_bytes: usize,
    corrupt:       Vec<usize>,
    title:         String,
    authors:       Vec<String>,
    mobi_version:  Option<u32>,
    exth_records:  usize,
    fcis:          bool,
    flis:          bool,
    eof:           bool,
}

#[derive(Serialize)]
struct ExthEntry {
    record_type: u32,
    kind:        String,
    value:       String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();

    match Cli::parse().command {

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input, json } => {
            let book = Book::open(&input)?;
            let report = InfoReport {
                name:          book.header.name(),
                type_creator:  book.header.type_creator(),
                created:       book.header.created(),
                modified:      book.header.modified(),
                sections:      book.header.section_count,
                compression:   book.format.palmdoc.compression,
                encoding:      book.encoding(),
                text_length:   book.format.palmdoc.text_length,
                text_records:  book.records.len(),
                decoded_bytes: book.records.iter().map(|r| r.data.len()).sum(),
                corrupt:       book.corrupt_records().map(|r| r.index).collect(),
                title:         book.title(),
                authors:       book.authors(),
                mobi_version:  book.format.mobi.as_ref().map(|m| m.file_version),
                exth_records:  book.exth.as_ref().map_or(0, |x| x.records.len()),
                fcis:          book.fcis.is_some(),
                flis:          book.flis.is_some(),
                eof:           book.eof.is_some(),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }
            println!("── Container ────────────────────────────────────────────");
            println!("  Path           {}", input.display());
            println!("  Name           {}", report.name);
            println!("  Type/creator   {}", report.type_creator);
            println!("  Created        {}", fmt_time(report.created));
            println!("  Modified       {}", fmt_time(report.modified));
            println!("  Sections       {}", report.sections);
            println!("── Book ─────────────────────────────────────────────────");
            println!("  Title          {}", report.title);
            println!("  Authors        {}", report.authors.join(", "));
            println!("  MOBI version   {}", report.mobi_version.map_or(MISSING.into(), |v| v.to_string()));
            println!("  Compression    {}", report.compression);
            println!("  Encoding       {:?}", report.encoding);
            println!("  Text length    {} B (decoded {} B)", report.text_length, report.decoded_bytes);
            println!("  Text records   {}", report.text_records);
            println!("  EXTH records   {}", report.exth_records);
            println!("  FCIS/FLIS/EOF  {}/{}/{}", report.fcis, report.flis, report.eof);
            if !report.corrupt.is_empty() {
                println!("  Corrupt        {:?}", report.corrupt);
            }
        }

        // ── Records ──────────────────────────────────────────────────────────
        Commands::Records { input } => {
            let book = Book::open(&input)?;
            let text: Vec<usize> = book.records.iter().map(|r| r.index).collect();
            println!("{:>6} {:>10} {:>8} {:>5} {:>8}  Role", "Index", "Offset", "Length", "Attr", "UID");
            for (i, e) in book.directory.iter().enumerate() {
                let len = record_span(&book.directory, i)
                    .map(|(_, l)| l.to_string())
                    .unwrap_or_else(|_| MISSING.into());
                let role = if i == 0 {
                    "header"
                } else if text.contains(&i) {
                    "text"
                } else if book.fcis.as_ref().map_or(false, |f| f.index == i) {
                    "FCIS"
                } else if book.flis.as_ref().map_or(false, |f| f.index == i) {
                    "FLIS"
                } else if book.eof.as_ref().map_or(false, |f| f.index == i) {
                    "EOF"
                } else {
                    ""
                };
                println!("{:>6} {:>10} {:>8} {:>#5x} {:>8}  {}", i, e.data_offset, len, e.attributes, e.unique_id, role);
            }
        }

        // ── Exth ─────────────────────────────────────────────────────────────
        Commands::Exth { input, json } => {
            let book = Book::open(&input)?;
            let entries: Vec<ExthEntry> = book.exth
                .as_ref()
                .map(|x| x.records.iter().map(|r| exth_entry(r, book.encoding())).collect())
                .unwrap_or_default();
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("No EXTH metadata.");
            } else {
                for e in &entries {
                    println!("{:>5}  {:<14} {}", e.record_type, e.kind, e.value);
                }
            }
        }

        // ── Text ─────────────────────────────────────────────────────────────
        Commands::Text { input, output, strict, raw_trailing, sequential } => {
            let opts = ParseOptions {
                strict,
                strip_trailing_entries: !raw_trailing,
                parallel:               !sequential,
            };
            let book = Book::open_with_options(&input, &opts)?;
            match output {
                Some(path) => {
                    let n = book.write_text(BufWriter::new(File::create(&path)?))?;
                    eprintln!("Wrote {} bytes -> {}", n, path.display());
                }
                None => {
                    book.write_text(io::stdout().lock())?;
                }
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn fmt_time(t: Option<chrono::DateTime<chrono::Utc>>) -> String {
    t.map(|t| t.to_rfc3339()).unwrap_or_else(|| MISSING.into())
}

fn exth_entry(r: &ExthRecord, encoding: TextEncoding) -> ExthEntry {
    let kind = r.kind();
    let value = match r.as_u32() {
        Some(n) if kind.is_numeric() => n.to_string(),
        _ if std::str::from_utf8(&r.data).is_ok() || encoding != TextEncoding::Utf8 => r.as_string(encoding),
        _ => hex::encode(&r.data),
    };
    ExthEntry { record_type: r.record_type, kind: format!("{:?}", kind), value }
}
