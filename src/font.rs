//! PF2 bitmap fonts (the GRUB font format).
//!
//! A PF2 file is a 12-byte magic followed by tagged chunks
//! (`NAME FAMI WEIG SLAN PTSZ MAXW MAXH ASCE DESC CHIX DATA`). The `CHIX`
//! chunk maps code points to glyph records; glyphs are decoded on demand.

use std::collections::HashMap;
use std::path::Path;

use crate::{CatPrinterError, Result};

const MAGIC: &[u8; 12] = b"FILE\x00\x00\x00\x04PFF2";

/// Bytes per `CHIX` entry: code point, compression flag, offset.
const INDEX_ENTRY: usize = 4 + 1 + 4;

/// Bytes of a glyph record before its bitmap.
const GLYPH_HEADER: usize = 10;

fn broken(msg: impl Into<String>) -> CatPrinterError {
    CatPrinterError::BrokenFont(msg.into())
}

fn u16be(b: &[u8]) -> u16 {
    u16::from_be_bytes([b[0], b[1]])
}

fn i16be(b: &[u8]) -> i16 {
    i16::from_be_bytes([b[0], b[1]])
}

fn u32be(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

/// A single rasterized character.
///
/// `bitmap` is packed row-major, MSB first, with no row padding. For scaled
/// glyphs the geometry is multiplied by `scale` while `bitmap` keeps its
/// original resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Glyph {
    pub width: usize,
    pub height: usize,
    pub x_offset: i32,
    pub y_offset: i32,
    pub device_width: i32,
    pub bitmap: Vec<u8>,
    pub scale: usize,
}

impl Glyph {
    /// Whether the pixel at (`x`, `y`) is set.
    pub fn get_bit(&self, x: usize, y: usize) -> bool {
        let scale = self.scale.max(1);
        let width = self.width / scale;
        let index = width * (y / scale) + x / scale;
        self.bitmap
            .get(index / 8)
            .is_some_and(|byte| byte & (0x80 >> (index % 8)) != 0)
    }

    /// The same glyph with every geometric field multiplied by `scale`.
    pub fn scaled(self, scale: usize) -> Glyph {
        let s = scale.max(1);
        let si = s as i32;
        Glyph {
            width: self.width * s,
            height: self.height * s,
            x_offset: self.x_offset * si,
            y_offset: self.y_offset * si,
            device_width: self.device_width * si,
            bitmap: self.bitmap,
            scale: self.scale.max(1) * s,
        }
    }
}

/// Vertical and size metrics of a font.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FontMetrics {
    pub point_size: usize,
    pub max_width: usize,
    pub max_height: usize,
    pub ascent: usize,
    pub descent: usize,
}

/// A parsed PF2 font.
#[derive(Debug, Clone)]
pub struct Pf2Font {
    data: Vec<u8>,
    index: HashMap<u32, (u8, usize)>,
    name: String,
    family: String,
    weight: String,
    slant: String,
    metrics: FontMetrics,
    missing: char,
}

impl Pf2Font {
    /// Read and parse a font file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .map_err(|e| broken(format!("{}: {e}", path.display())))?;
        Self::from_bytes(data)
    }

    /// Parse a font held in memory.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if data.len() < MAGIC.len() || &data[..MAGIC.len()] != MAGIC {
            return Err(broken("not a PF2 font"));
        }
        let mut font = Pf2Font {
            data: Vec::new(),
            index: HashMap::new(),
            name: String::new(),
            family: String::new(),
            weight: String::new(),
            slant: String::new(),
            metrics: FontMetrics::default(),
            missing: '?',
        };
        let mut seen_index = false;
        let mut seen = [false; 4];
        let mut pos = MAGIC.len();
        loop {
            let header = data
                .get(pos..pos + 8)
                .ok_or_else(|| broken("font ended before the DATA chunk"))?;
            let tag: [u8; 4] = [header[0], header[1], header[2], header[3]];
            let len = u32be(&header[4..]) as usize;
            pos += 8;
            if &tag == b"DATA" {
                break;
            }
            let body = data
                .get(pos..pos.saturating_add(len))
                .ok_or_else(|| broken(format!("truncated {} chunk", String::from_utf8_lossy(&tag))))?;
            pos += len;
            match &tag {
                b"NAME" => font.name = chunk_string(body),
                b"FAMI" => font.family = chunk_string(body),
                b"WEIG" => font.weight = chunk_string(body),
                b"SLAN" => font.slant = chunk_string(body),
                b"PTSZ" | b"MAXW" | b"MAXH" | b"ASCE" | b"DESC" => {
                    if body.len() < 2 {
                        return Err(broken("short metric chunk"));
                    }
                    let value = u16be(body) as usize;
                    let m = &mut font.metrics;
                    match &tag {
                        b"PTSZ" => (m.point_size, seen[0]) = (value, true),
                        b"MAXW" => m.max_width = value,
                        b"MAXH" => (m.max_height, seen[1]) = (value, true),
                        b"ASCE" => (m.ascent, seen[2]) = (value, true),
                        _ => (m.descent, seen[3]) = (value, true),
                    }
                }
                b"CHIX" => {
                    for entry in body.chunks_exact(INDEX_ENTRY) {
                        let code_point = u32be(entry);
                        let offset = u32be(&entry[5..]) as usize;
                        font.index.insert(code_point, (entry[4], offset));
                    }
                    seen_index = true;
                }
                _ => tracing::debug!(tag = %String::from_utf8_lossy(&tag), "skipping unknown PF2 chunk"),
            }
        }
        if !seen_index {
            return Err(broken("missing CHIX chunk"));
        }
        if seen.contains(&false) {
            return Err(broken("missing one of PTSZ, MAXH, ASCE, DESC"));
        }
        font.data = data;
        tracing::debug!(
            name = %font.name,
            glyphs = font.index.len(),
            point_size = font.metrics.point_size,
            "loaded PF2 font"
        );
        Ok(font)
    }

    /// Use `missing` in place of characters the font does not have.
    pub fn with_missing_character(mut self, missing: char) -> Self {
        self.missing = missing;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn weight(&self) -> &str {
        &self.weight
    }

    pub fn slant(&self) -> &str {
        &self.slant
    }

    pub fn metrics(&self) -> FontMetrics {
        self.metrics
    }

    /// Whether the font has its own glyph for `ch`.
    pub fn contains(&self, ch: char) -> bool {
        self.index.contains_key(&(ch as u32))
    }

    /// Decode the glyph for `ch`, or the missing-character glyph.
    pub fn get_glyph(&self, ch: char) -> Result<Glyph> {
        let (_compression, offset) = self
            .index
            .get(&(ch as u32))
            .or_else(|| self.index.get(&(self.missing as u32)))
            .copied()
            .ok_or_else(|| broken(format!("no glyph for {ch:?} and no {:?} fallback", self.missing)))?;
        let header = self
            .data
            .get(offset..offset + GLYPH_HEADER)
            .ok_or_else(|| broken(format!("glyph offset {offset} out of range")))?;
        let width = u16be(header) as usize;
        let height = u16be(&header[2..]) as usize;
        let bitmap_len = (width * height).div_ceil(8);
        let start = offset + GLYPH_HEADER;
        let bitmap = self
            .data
            .get(start..start + bitmap_len)
            .ok_or_else(|| broken(format!("truncated glyph at offset {offset}")))?
            .to_vec();
        Ok(Glyph {
            width,
            height,
            x_offset: i16be(&header[4..]) as i32,
            y_offset: i16be(&header[6..]) as i32,
            device_width: i16be(&header[8..]) as i32,
            bitmap,
            scale: 1,
        })
    }

    /// Wrap this font so glyphs and metrics are scaled by `scale`.
    pub fn scaled(self, scale: usize) -> ScaledFont {
        ScaledFont::new(self, scale)
    }
}

/// Strip the NUL terminator from a string chunk.
fn chunk_string(body: &[u8]) -> String {
    let end = body.iter().position(|&b| b == 0).unwrap_or(body.len());
    String::from_utf8_lossy(&body[..end]).into_owned()
}

/// A font whose glyphs are enlarged by an integer factor.
///
/// Bitmaps are not re-rasterized; each source pixel covers a
/// `scale` x `scale` block.
#[derive(Debug, Clone)]
pub struct ScaledFont {
    font: Pf2Font,
    scale: usize,
}

impl ScaledFont {
    pub fn new(font: Pf2Font, scale: usize) -> Self {
        Self {
            font,
            scale: scale.max(1),
        }
    }

    pub fn scale(&self) -> usize {
        self.scale
    }

    pub fn font(&self) -> &Pf2Font {
        &self.font
    }

    pub fn metrics(&self) -> FontMetrics {
        let m = self.font.metrics;
        let s = self.scale;
        FontMetrics {
            point_size: m.point_size * s,
            max_width: m.max_width * s,
            max_height: m.max_height * s,
            ascent: m.ascent * s,
            descent: m.descent * s,
        }
    }

    pub fn get_glyph(&self, ch: char) -> Result<Glyph> {
        Ok(self.font.get_glyph(ch)?.scaled(self.scale))
    }
}

impl From<Pf2Font> for ScaledFont {
    fn from(font: Pf2Font) -> Self {
        ScaledFont::new(font, 1)
    }
}

/// Builds small PF2 fonts for tests.
#[cfg(test)]
pub(crate) mod fixture {
    pub(crate) struct GlyphSpec {
        pub ch: char,
        pub width: u16,
        pub height: u16,
        pub x_offset: i16,
        pub y_offset: i16,
        pub device_width: i16,
        pub bitmap: Vec<u8>,
    }

    pub(crate) fn glyph(ch: char, width: u16, height: u16, device_width: i16, bitmap: &[u8]) -> GlyphSpec {
        GlyphSpec {
            ch,
            width,
            height,
            x_offset: 0,
            y_offset: 0,
            device_width,
            bitmap: bitmap.to_vec(),
        }
    }

    fn chunk(out: &mut Vec<u8>, tag: &[u8; 4], body: &[u8]) {
        out.extend_from_slice(tag);
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(body);
    }

    /// point size 8, max height 8, ascent 6, descent 2
    pub(crate) fn build(glyphs: &[GlyphSpec]) -> Vec<u8> {
        build_with(8, 8, 6, 2, glyphs)
    }

    pub(crate) fn build_with(point_size: u16, max_height: u16, ascent: u16, descent: u16, glyphs: &[GlyphSpec]) -> Vec<u8> {
        let mut out = super::MAGIC.to_vec();
        chunk(&mut out, b"NAME", b"Test Regular 8\0");
        chunk(&mut out, b"FAMI", b"Test\0");
        chunk(&mut out, b"PTSZ", &point_size.to_be_bytes());
        chunk(&mut out, b"MAXW", &8u16.to_be_bytes());
        chunk(&mut out, b"MAXH", &max_height.to_be_bytes());
        chunk(&mut out, b"ASCE", &ascent.to_be_bytes());
        chunk(&mut out, b"DESC", &descent.to_be_bytes());

        let index_len = glyphs.len() * super::INDEX_ENTRY;
        let mut offset = out.len() + 8 + index_len + 8;
        let mut index = Vec::new();
        let mut records = Vec::new();
        for g in glyphs {
            index.extend_from_slice(&(g.ch as u32).to_be_bytes());
            index.push(0);
            index.extend_from_slice(&(offset as u32).to_be_bytes());
            let mut record = Vec::new();
            record.extend_from_slice(&g.width.to_be_bytes());
            record.extend_from_slice(&g.height.to_be_bytes());
            record.extend_from_slice(&g.x_offset.to_be_bytes());
            record.extend_from_slice(&g.y_offset.to_be_bytes());
            record.extend_from_slice(&g.device_width.to_be_bytes());
            record.extend_from_slice(&g.bitmap);
            offset += record.len();
            records.extend(record);
        }
        chunk(&mut out, b"CHIX", &index);
        out.extend_from_slice(b"DATA");
        out.extend_from_slice(&u32::MAX.to_be_bytes());
        out.extend(records);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::fixture::{self, glyph};
    use super::*;

    // 3 x 4 "A": 010 / 101 / 111 / 101
    const A_BITMAP: [u8; 2] = [0b0101_0111, 0b1101_0000];

    fn font() -> Pf2Font {
        Pf2Font::from_bytes(fixture::build(&[
            glyph('A', 3, 4, 4, &A_BITMAP),
            glyph('?', 2, 2, 3, &[0b1111_0000]),
        ]))
        .unwrap()
    }

    #[test]
    fn parses_header_chunks() {
        let font = font();
        assert_eq!(font.name(), "Test Regular 8");
        assert_eq!(font.family(), "Test");
        assert_eq!(
            font.metrics(),
            FontMetrics {
                point_size: 8,
                max_width: 8,
                max_height: 8,
                ascent: 6,
                descent: 2
            }
        );
    }

    #[test]
    fn decodes_glyph_on_demand() {
        let a = font().get_glyph('A').unwrap();
        assert_eq!((a.width, a.height, a.device_width), (3, 4, 4));
        let rows: Vec<String> = (0..4)
            .map(|y| (0..3).map(|x| if a.get_bit(x, y) { '#' } else { '.' }).collect())
            .collect();
        assert_eq!(rows, vec![".#.", "#.#", "###", "#.#"]);
    }

    #[test]
    fn falls_back_to_missing_character() {
        let g = font().get_glyph('Z').unwrap();
        assert_eq!((g.width, g.height), (2, 2));
    }

    #[test]
    fn missing_fallback_is_broken_font() {
        let font = font().with_missing_character('~');
        let err = font.get_glyph('Z').unwrap_err();
        assert!(matches!(err, CatPrinterError::BrokenFont(_)));
    }

    #[test]
    fn rejects_bad_magic() {
        let err = Pf2Font::from_bytes(b"FILE\0\0\0\x04XXXX".to_vec()).unwrap_err();
        assert!(matches!(err, CatPrinterError::BrokenFont(_)));
    }

    #[test]
    fn rejects_font_without_data_chunk() {
        let mut bytes = fixture::build(&[glyph('?', 1, 1, 1, &[0x80])]);
        let data_at = bytes.windows(4).position(|w| w == b"DATA").unwrap();
        bytes.truncate(data_at);
        assert!(matches!(
            Pf2Font::from_bytes(bytes),
            Err(CatPrinterError::BrokenFont(_))
        ));
    }

    #[test]
    fn truncated_glyph_is_broken_font() {
        let mut bytes = fixture::build(&[glyph('?', 8, 8, 8, &[0xff; 8])]);
        bytes.truncate(bytes.len() - 4);
        let font = Pf2Font::from_bytes(bytes).unwrap();
        assert!(matches!(font.get_glyph('?'), Err(CatPrinterError::BrokenFont(_))));
    }

    #[test]
    fn scaling_multiplies_geometry_and_replicates_pixels() {
        let scaled = font().scaled(2);
        assert_eq!(scaled.metrics().ascent, 12);
        assert_eq!(scaled.metrics().point_size, 16);
        let a = scaled.get_glyph('A').unwrap();
        assert_eq!((a.width, a.height, a.device_width), (6, 8, 8));
        assert_eq!(a.bitmap, A_BITMAP.to_vec());
        // top row ".#." becomes "..##.."
        let top: Vec<bool> = (0..6).map(|x| a.get_bit(x, 0)).collect();
        assert_eq!(top, vec![false, false, true, true, false, false]);
        assert_eq!(a.get_bit(2, 1), a.get_bit(2, 0));
    }
}
