#![allow(dead_code)]

use catprint::{MemoryTransport, Model, Pf2Font, PrinterOptions, CatPrinter, parse_notification};

pub const LINE: usize = 48;

/// Split a byte stream back into (command, payload) frames.
pub fn commands(bytes: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut out = Vec::new();
    let mut rest = bytes;
    while !rest.is_empty() {
        let n = parse_notification(rest).expect("well-formed frame");
        assert!(n.checksum_ok(), "bad checksum in {rest:02x?}");
        rest = &rest[8 + n.payload.len()..];
        out.push((n.command, n.payload));
    }
    out
}

/// A 384 pixel wide PBM document with the given lines.
pub fn pbm(lines: &[[u8; LINE]]) -> Vec<u8> {
    let mut out = format!("P4\n384 {}\n", lines.len()).into_bytes();
    for line in lines {
        out.extend_from_slice(line);
    }
    out
}

pub fn line(fill: u8) -> [u8; LINE] {
    [fill; LINE]
}

fn chunk(out: &mut Vec<u8>, tag: &[u8; 4], body: &[u8]) {
    out.extend_from_slice(tag);
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
}

/// PF2 font with a 3 x 4 "A", a blank space and a solid "?" fallback.
///
/// Point size 8, max height 8, ascent 6, descent 2: text rows are 10 lines.
pub fn font() -> Pf2Font {
    let glyphs: [(char, u16, u16, i16, &[u8]); 3] = [
        ('A', 3, 4, 4, &[0b0101_0111, 0b1101_0000]),
        (' ', 0, 0, 4, &[]),
        ('?', 3, 4, 4, &[0xff, 0xf0]),
    ];
    let mut out = b"FILE\x00\x00\x00\x04PFF2".to_vec();
    chunk(&mut out, b"NAME", b"Test Regular 8\0");
    for (tag, value) in [(b"PTSZ", 8u16), (b"MAXW", 8), (b"MAXH", 8), (b"ASCE", 6), (b"DESC", 2)] {
        chunk(&mut out, tag, &value.to_be_bytes());
    }
    let mut offset = out.len() + 8 + glyphs.len() * 9 + 8;
    let mut index = Vec::new();
    let mut records = Vec::new();
    for (ch, width, height, device_width, bitmap) in glyphs {
        index.extend_from_slice(&(ch as u32).to_be_bytes());
        index.push(0);
        index.extend_from_slice(&(offset as u32).to_be_bytes());
        let start = records.len();
        records.extend_from_slice(&width.to_be_bytes());
        records.extend_from_slice(&height.to_be_bytes());
        records.extend_from_slice(&[0, 0, 0, 0]);
        records.extend_from_slice(&device_width.to_be_bytes());
        records.extend_from_slice(bitmap);
        offset += records.len() - start;
    }
    chunk(&mut out, b"CHIX", &index);
    chunk(&mut out, b"DATA", &records);
    Pf2Font::from_bytes(out).expect("fixture font parses")
}

/// A connected printer over an in-memory transport, plus a handle to it.
pub async fn printer(
    transport: MemoryTransport,
    model: Model,
    options: PrinterOptions,
) -> (CatPrinter<MemoryTransport>, MemoryTransport) {
    let handle = transport.clone();
    let printer = CatPrinter::connect(transport, model, options).await.expect("connect");
    (printer, handle)
}
