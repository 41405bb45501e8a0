use byteorder::{BigEndian, WriteBytesExt};
use mobidec::auxiliary::EOF_MARKER;
use mobidec::book::{Book, ParseOptions};
use mobidec::exth::ExthKind;
use mobidec::{MobiError, Stage};
use std::io::{Cursor, Write};
use tempfile::NamedTempFile;

// ── Container builder ────────────────────────────────────────────────────────

struct Fixture {
    compression:  u16,
    encryption:   u16,
    encoding:     u32,
    mobi:         bool,
    text:         Vec<Vec<u8>>,
    text_length:  u32,
    exth:         Vec<(u32, Vec<u8>)>,
    full_name:    Option<&'static str>,
    extra_flags:  u16,
    aux:          bool,
    pad:          bool,
    header_len:   u32,
}

impl Default for Fixture {
    fn default() -> Self {
        Self {
            compression: 2,
            encryption:  0,
            encoding:    65001,
            mobi:        true,
            text:        Vec::new(),
            text_length: 0,
            exth:        Vec::new(),
            full_name:   None,
            extra_flags: 0,
            aux:         false,
            pad:         true,
            header_len:  232,
        }
    }
}

fn put_u16(buf: &mut [u8], at: usize, v: u16) {
    buf[at..at + 2].copy_from_slice(&v.to_be_bytes());
}

fn put_u32(buf: &mut [u8], at: usize, v: u32) {
    buf[at..at + 4].copy_from_slice(&v.to_be_bytes());
}

fn fcis(text_length: u32) -> Vec<u8> {
    let mut b = b"FCIS".to_vec();
    for v in [20u32, 16, 1, 0, text_length, 0, 32, 8] {
        b.write_u32::<BigEndian>(v).unwrap();
    }
    b.extend_from_slice(&[0, 1, 0, 1, 0, 0, 0, 0]);
    b
}

fn flis() -> Vec<u8> {
    let mut b = b"FLIS".to_vec();
    b.write_u32::<BigEndian>(8).unwrap();
    b.extend_from_slice(&[0, 65, 0, 0, 0, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF, 0, 1, 0, 3]);
    b.write_u32::<BigEndian>(3).unwrap();
    b.write_u32::<BigEndian>(1).unwrap();
    b.write_u32::<BigEndian>(u32::MAX).unwrap();
    b
}

impl Fixture {
    fn record0(&self) -> Vec<u8> {
        let n_text = self.text.len();
        let mut r = vec![0u8; if self.mobi { 248 } else { 16 }];
        put_u16(&mut r, 0, self.compression);
        put_u32(&mut r, 4, self.text_length);
        put_u16(&mut r, 8, n_text as u16);
        put_u16(&mut r, 10, 4096);
        put_u16(&mut r, 12, self.encryption);
        if !self.mobi {
            return r;
        }
        r[16..20].copy_from_slice(b"MOBI");
        put_u32(&mut r, 20, self.header_len);
        put_u32(&mut r, 24, 2);
        put_u32(&mut r, 28, self.encoding);
        put_u32(&mut r, 36, 6);
        put_u16(&mut r, 192, 1);
        put_u16(&mut r, 194, n_text as u16);
        put_u32(&mut r, 240, self.extra_flags as u32);
        if self.aux {
            put_u32(&mut r, 200, n_text as u32 + 2);
            put_u32(&mut r, 204, 1);
            put_u32(&mut r, 208, n_text as u32 + 1);
            put_u32(&mut r, 212, 1);
        } else {
            put_u32(&mut r, 200, u32::MAX);
            put_u32(&mut r, 208, u32::MAX);
        }
        if !self.exth.is_empty() {
            put_u32(&mut r, 128, 0x50);
            let body: usize = self.exth.iter().map(|(_, v)| v.len() + 8).sum();
            r.extend_from_slice(b"EXTH");
            r.write_u32::<BigEndian>((body + 12) as u32).unwrap();
            r.write_u32::<BigEndian>(self.exth.len() as u32).unwrap();
            for (t, v) in &self.exth {
                r.write_u32::<BigEndian>(*t).unwrap();
                r.write_u32::<BigEndian>(v.len() as u32 + 8).unwrap();
                r.extend_from_slice(v);
            }
        }
        if let Some(name) = self.full_name {
            let at = r.len() as u32;
            put_u32(&mut r, 84, at);
            put_u32(&mut r, 88, name.len() as u32);
            r.extend_from_slice(name.as_bytes());
            r.extend_from_slice(&[0, 0]);
        }
        r
    }

    /// Records: header, text..., then FLIS, FCIS, EOF (aux) or a pad record
    /// (unless `pad` is off, leaving text as the final record).
    fn build(&self) -> Vec<u8> {
        let mut records = vec![self.record0()];
        records.extend(self.text.iter().cloned());
        if self.aux {
            records.push(flis());
            records.push(fcis(self.text_length));
            records.push(EOF_MARKER.to_vec());
        } else if self.pad {
            records.push(vec![0; 4]);
        }

        let count = records.len();
        let mut out = Vec::new();
        let mut name = [0u8; 32];
        name[..9].copy_from_slice(b"Fixture_1");
        out.extend_from_slice(&name);
        out.extend_from_slice(&[0u8; 4]);
        out.write_u32::<BigEndian>(0x8000_0000 | 3_000_000_000).unwrap();
        out.extend_from_slice(&[0u8; 20]);
        out.extend_from_slice(if self.mobi { b"BOOKMOBI" } else { b"TEXtREAd" });
        out.extend_from_slice(&[0u8; 8]);
        out.write_u16::<BigEndian>(count as u16).unwrap();
        assert_eq!(out.len(), 78);

        let mut offset = 78 + 8 * count + 2;
        for (i, rec) in records.iter().enumerate() {
            out.write_u32::<BigEndian>(offset as u32).unwrap();
            out.write_u8(0).unwrap();
            out.write_u24::<BigEndian>(i as u32).unwrap();
            offset += rec.len();
        }
        out.extend_from_slice(&[0, 0]);
        for rec in &records {
            out.extend_from_slice(rec);
        }
        out
    }
}

fn parse(bytes: Vec<u8>) -> Result<Book, MobiError> {
    Book::parse(&mut Cursor::new(bytes))
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[test]
fn test_single_record_decodes_literal_run_and_space_pair() {
    let fx = Fixture {
        text: vec![vec![0x03, b'a', b'b', b'c', 0xC1]],
        text_length: 5,
        ..Fixture::default()
    };
    let book = parse(fx.build()).unwrap();
    assert_eq!(book.directory.len(), book.header.section_count as usize);
    assert_eq!(book.records.len(), 1);
    assert_eq!(book.text_bytes(), b"abc A".to_vec());
    assert_eq!(book.text(), "abc A");
}

#[test]
fn test_multi_record_concatenation_keeps_directory_order() {
    let fx = Fixture {
        text: vec![
            b"Call me ".to_vec(),
            vec![b'I', b's', b'h', b'm', b'a', b'e', b'l', b'.', 0x80, 0x42],
            b"!".to_vec(),
        ],
        text_length: 22,
        ..Fixture::default()
    };
    let book = parse(fx.build()).unwrap();
    let indices: Vec<usize> = book.records.iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![1, 2, 3]);
    // 0x8042: distance 8, length 5 -> "Ishma"
    assert_eq!(book.text(), "Call me Ishmael.Ishma!");

    let mut sink = Vec::new();
    let n = book.write_text(&mut sink).unwrap();
    assert_eq!(n, 22);
    assert_eq!(sink, book.text_bytes());
}

#[test]
fn test_directory_offsets_are_monotonic() {
    let fx = Fixture {
        text: vec![b"one".to_vec(), b"two".to_vec()],
        aux: true,
        ..Fixture::default()
    };
    let book = parse(fx.build()).unwrap();
    for pair in book.directory.windows(2) {
        assert!(pair[0].data_offset <= pair[1].data_offset);
    }
}

#[test]
fn test_metadata_and_auxiliary_records() {
    let fx = Fixture {
        text: vec![b"Body text".to_vec()],
        text_length: 9,
        exth: vec![
            (100, b"A. Writer".to_vec()),
            (100, b"B. Editor".to_vec()),
            (503, b"The Updated Title".to_vec()),
            (201, vec![0, 0, 0, 2]),
        ],
        full_name: Some("Record Zero Title"),
        aux: true,
        ..Fixture::default()
    };
    let book = parse(fx.build()).unwrap();
    assert_eq!(book.full_name.as_deref(), Some("Record Zero Title"));
    assert_eq!(book.title(), "The Updated Title");
    assert_eq!(book.authors(), vec!["A. Writer", "B. Editor"]);
    let exth = book.exth.as_ref().unwrap();
    assert_eq!(exth.records.len(), 4);
    assert_eq!(exth.u32_value(ExthKind::CoverOffset), Some(2));

    assert_eq!(book.flis.as_ref().unwrap().index, 2);
    assert_eq!(book.fcis.as_ref().unwrap().index, 3);
    assert_eq!(book.fcis.as_ref().unwrap().text_length, 9);
    assert_eq!(book.eof.as_ref().unwrap().index, 4);
    assert_eq!(book.text(), "Body text");
}

#[test]
fn test_title_falls_back_to_full_name_then_database_name() {
    let fx = Fixture {
        text: vec![b"x".to_vec()],
        full_name: Some("Full Name"),
        ..Fixture::default()
    };
    assert_eq!(parse(fx.build()).unwrap().title(), "Full Name");

    let fx = Fixture { text: vec![b"x".to_vec()], ..Fixture::default() };
    let book = parse(fx.build()).unwrap();
    assert_eq!(book.title(), "Fixture_1");
    assert!(book.header.created().is_some());
}

#[test]
fn test_trailing_entries_are_stripped_by_default() {
    // "hi" + multibyte overlap entry (low bits 0b01 -> 2 bytes)
    let fx = Fixture {
        text: vec![vec![b'h', b'i', b'!', 0x09]],
        extra_flags: 0b1,
        ..Fixture::default()
    };
    let bytes = fx.build();
    assert_eq!(parse(bytes.clone()).unwrap().text_bytes(), b"hi".to_vec());

    let raw = ParseOptions { strip_trailing_entries: false, ..ParseOptions::default() };
    let book = Book::parse_with_options(&mut Cursor::new(bytes), &raw).unwrap();
    assert_eq!(book.text(), "hi!\t");
}

#[test]
fn test_uncompressed_book_is_copied_verbatim() {
    let fx = Fixture {
        compression: 1,
        encoding: 1252,
        text: vec![vec![b'c', b'a', b'f', 0xE9]],
        ..Fixture::default()
    };
    let book = parse(fx.build()).unwrap();
    assert_eq!(book.text_bytes(), vec![b'c', b'a', b'f', 0xE9]);
    assert_eq!(book.text(), "café");
}

#[test]
fn test_plain_palmdoc_book() {
    let fx = Fixture {
        mobi: false,
        text: vec![b"first ".to_vec(), b"second".to_vec()],
        ..Fixture::default()
    };
    let book = parse(fx.build()).unwrap();
    assert!(book.format.mobi.is_none());
    assert!(book.exth.is_none());
    assert_eq!(book.header.type_creator(), "TEXtREAd");
    assert_eq!(book.text(), "first second");
}

#[test]
fn test_plain_palmdoc_text_runs_to_end_of_file() {
    let fx = Fixture {
        mobi: false,
        pad:  false,
        text: vec![b"hello ".to_vec(), b"world".to_vec()],
        ..Fixture::default()
    };
    let book = parse(fx.build()).unwrap();
    assert_eq!(book.directory.len(), 3);
    let indices: Vec<usize> = book.records.iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![1, 2]);
    assert_eq!(book.text(), "hello world");
    assert!(book.eof.is_none());
}

#[test]
fn test_short_mobi_header_never_decodes_record_zero() {
    let fx = Fixture {
        header_len: 0x74,
        compression: 1,
        text: vec![b"TEXT".to_vec()],
        ..Fixture::default()
    };
    let book = parse(fx.build()).unwrap();
    assert_eq!(book.format.content_range(), Some((1, 1)));
    assert_eq!(book.records.len(), 1);
    assert_eq!(book.records[0].index, 1);
    assert_eq!(book.text_bytes(), b"TEXT".to_vec());
}

#[test]
fn test_zero_section_count_is_rejected_at_container() {
    let mut bytes = Fixture { text: vec![b"x".to_vec()], ..Fixture::default() }.build();
    bytes[76..78].copy_from_slice(&[0, 0]);
    let err = parse(bytes).unwrap_err();
    assert!(matches!(err, MobiError::NoRecords { offset: 76 }));
    assert_eq!(err.stage(), Some(Stage::Container));
    assert_eq!(err.offset(), Some(76));
}

#[test]
fn test_truncated_container_header() {
    let bytes = Fixture { text: vec![b"abc".to_vec()], ..Fixture::default() }.build();
    match parse(bytes[..40].to_vec()) {
        Err(MobiError::Truncated { stage, offset, needed, available }) => {
            assert_eq!(stage, Stage::Container);
            assert_eq!(offset, 0);
            assert_eq!(needed, 78);
            assert_eq!(available, 40);
        }
        other => panic!("expected Truncated, got {other:?}"),
    }
}

#[test]
fn test_truncated_content_record_names_stage_and_offset() {
    let bytes = Fixture { text: vec![b"abcdef".to_vec()], ..Fixture::default() }.build();
    let cut = bytes.len() - 5;
    let err = parse(bytes[..cut].to_vec()).unwrap_err();
    assert_eq!(err.stage(), Some(Stage::ContentRecord));
    assert!(err.offset().is_some());
}

#[test]
fn test_unsupported_compression_and_encryption() {
    let huff = Fixture { compression: 17480, text: vec![b"x".to_vec()], ..Fixture::default() };
    assert!(matches!(parse(huff.build()), Err(MobiError::UnsupportedCompression(17480))));

    let drm = Fixture { encryption: 2, text: vec![b"x".to_vec()], ..Fixture::default() };
    let err = parse(drm.build()).unwrap_err();
    assert!(matches!(err, MobiError::UnsupportedEncryption(2)));
    assert_eq!(err.stage(), Some(Stage::FormatHeader));
}

#[test]
fn test_corrupt_record_is_best_effort_unless_strict() {
    let fx = Fixture {
        text: vec![b"good".to_vec(), vec![b'x', 0x80, 0x50, b'y']],
        ..Fixture::default()
    };
    let bytes = fx.build();

    let book = parse(bytes.clone()).unwrap();
    assert_eq!(book.text(), "goodxy");
    let corrupt: Vec<usize> = book.corrupt_records().map(|r| r.index).collect();
    assert_eq!(corrupt, vec![2]);

    let strict = ParseOptions { strict: true, ..ParseOptions::default() };
    let err = Book::parse_with_options(&mut Cursor::new(bytes), &strict).unwrap_err();
    assert!(matches!(err, MobiError::CorruptRecord { record: 2, skipped: 3 }));
}

#[test]
fn test_broken_auxiliary_record_only_fails_in_strict_mode() {
    let fx = Fixture { text: vec![b"text".to_vec()], aux: true, ..Fixture::default() };
    let mut bytes = fx.build();
    let pos = bytes.windows(4).position(|w| w == b"FCIS").unwrap();
    bytes[pos..pos + 4].copy_from_slice(b"XXXX");

    let book = parse(bytes.clone()).unwrap();
    assert!(book.fcis.is_none());
    assert!(book.flis.is_some());

    let strict = ParseOptions { strict: true, ..ParseOptions::default() };
    let err = Book::parse_with_options(&mut Cursor::new(bytes), &strict).unwrap_err();
    assert!(matches!(err, MobiError::BadIdentifier { stage: Stage::Fcis, .. }));
}

#[test]
fn test_sequential_and_parallel_parse_agree() {
    let text: Vec<Vec<u8>> = (0..32u8)
        .map(|i| vec![0x02, b'a' + (i % 26), b'-', 0x80, 0x13, 0xC9])
        .collect();
    let bytes = Fixture { text, ..Fixture::default() }.build();
    let seq = ParseOptions { parallel: false, ..ParseOptions::default() };
    let a = Book::parse_with_options(&mut Cursor::new(bytes.clone()), &seq).unwrap();
    let b = Book::parse(&mut Cursor::new(bytes)).unwrap();
    assert_eq!(a, b);
    assert_eq!(&a.records[0].data, b"a-a-a-a- I");
}

#[test]
fn test_reparsing_is_idempotent() {
    let fx = Fixture {
        text: vec![b"same".to_vec(), b" bytes".to_vec()],
        exth: vec![(100, b"Someone".to_vec())],
        aux: true,
        ..Fixture::default()
    };
    let mut src = Cursor::new(fx.build());
    let first = Book::parse(&mut src).unwrap();
    let second = Book::parse(&mut src).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_open_from_file() {
    let fx = Fixture {
        text: vec![vec![0x03, b'a', b'b', b'c', 0xC1]],
        aux: true,
        ..Fixture::default()
    };
    let mut tmp = NamedTempFile::new().unwrap();
    tmp.write_all(&fx.build()).unwrap();
    tmp.flush().unwrap();

    let book = Book::open(tmp.path()).unwrap();
    assert_eq!(book.text_bytes(), b"abc A".to_vec());
    assert!(book.eof.is_some());
}
