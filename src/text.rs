//! Text to raster lines with a PF2 font.
//!
//! Each input line is walked twice. The first pass estimates widths (half
//! the point size per character) to pick wrap points at spaces; the second
//! composites the real glyphs and hands out a canvas whenever a wrap point,
//! a newline or an overflowing glyph is reached.

use std::collections::{HashMap, HashSet};

use crate::{CatPrinterError, Result};
use crate::font::{Glyph, ScaledFont};

/// Raster canvas one text line tall, reused for a whole text job.
#[derive(Debug)]
pub struct TextCanvas {
    font: ScaledFont,
    width: usize,
    height: usize,
    canvas: Vec<u8>,
    cursor: usize,
    wrap: bool,
    rtl: bool,
    started: bool,
    dirty: bool,
}

impl TextCanvas {
    /// Create a canvas `width` pixels wide.
    ///
    /// Fails with [`CatPrinterError::InvalidImageData`] unless `width` is a
    /// non-zero multiple of 8.
    pub fn new(font: impl Into<ScaledFont>, width: usize) -> Result<Self> {
        if width == 0 || width % 8 != 0 {
            return Err(CatPrinterError::InvalidImageData(format!(
                "canvas width {width} is not a multiple of 8"
            )));
        }
        let font = font.into();
        let metrics = font.metrics();
        let height = metrics.max_height + metrics.descent;
        let mut canvas = Self {
            font,
            width,
            height,
            canvas: vec![0; width * height / 8],
            cursor: 0,
            wrap: true,
            rtl: false,
            started: false,
            dirty: false,
        };
        canvas.flush_canvas();
        Ok(canvas)
    }

    /// Break lines at spaces instead of only when a glyph overflows.
    pub fn with_wrap(mut self, wrap: bool) -> Self {
        self.wrap = wrap;
        self
    }

    /// Lay glyphs out from the right edge.
    pub fn with_rtl(mut self, rtl: bool) -> Self {
        self.rtl = rtl;
        self
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn font(&self) -> &ScaledFont {
        &self.font
    }

    /// The live canvas.
    pub fn canvas(&self) -> &[u8] {
        &self.canvas
    }

    /// Hand out the filled canvas and clear it in place.
    ///
    /// Returns `None` only for the call made when the canvas is created.
    pub fn flush_canvas(&mut self) -> Option<Vec<u8>> {
        let previous = self.started.then(|| self.canvas.clone());
        self.canvas.fill(0);
        self.cursor = 0;
        self.started = true;
        self.dirty = false;
        previous
    }

    /// Put `text` on the canvas.
    ///
    /// Returns every canvas completed along the way; a trailing partial line
    /// stays on the canvas until more text arrives or [`finish`](Self::finish).
    pub fn puttext(&mut self, text: &str) -> Result<Vec<Vec<u8>>> {
        let text: Vec<char> = text.replace('\t', "    ").chars().collect();
        let breaks = self.break_points(&text);
        let mut glyphs: HashMap<char, Glyph> = HashMap::new();
        let mut lines = Vec::new();

        for (i, &ch) in text.iter().enumerate() {
            if ch == '\n' {
                lines.extend(self.flush_canvas());
                continue;
            }
            if (ch as u32) < 0x20 {
                continue;
            }
            if !glyphs.contains_key(&ch) {
                glyphs.insert(ch, self.font.get_glyph(ch)?);
            }
            let glyph = &glyphs[&ch];
            let at_break = self.wrap && breaks.contains(&i);
            let overflow = self.cursor > 0 && self.cursor + glyph.width > self.width;
            if at_break || overflow {
                lines.extend(self.flush_canvas());
                if ch == ' ' {
                    continue;
                }
            }
            let origin = self.origin(glyph);
            let ascent = self.font.metrics().ascent;
            draw_glyph(&mut self.canvas, self.width, self.height, ascent, glyph, origin);
            self.cursor = (self.cursor as i64 + glyph.device_width as i64).max(0) as usize;
            self.dirty = true;
        }
        Ok(lines)
    }

    /// Flush the trailing partial line, if anything was put since the last flush.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        if self.dirty { self.flush_canvas() } else { None }
    }

    /// Put `text` and flush the tail.
    pub fn render(&mut self, text: &str) -> Result<Vec<Vec<u8>>> {
        let mut lines = self.puttext(text)?;
        lines.extend(self.finish());
        Ok(lines)
    }

    /// Candidate wrap points, estimated at half the point size per character.
    fn break_points(&self, text: &[char]) -> HashSet<usize> {
        let advance = self.font.metrics().point_size / 2;
        let mut breaks = HashSet::new();
        let mut width = self.cursor;
        let mut last_space: Option<(usize, usize)> = None;
        for (i, &ch) in text.iter().enumerate() {
            if ch == ' ' {
                last_space = Some((i, width));
            }
            if width > self.width {
                if let Some((at, width_at)) = last_space.take() {
                    breaks.insert(at);
                    width -= width_at;
                }
            }
            if ch == '\n' {
                width = 0;
                last_space = None;
                continue;
            }
            width += advance;
        }
        breaks
    }

    /// Horizontal position of the glyph's origin.
    fn origin(&self, glyph: &Glyph) -> i64 {
        if self.rtl {
            self.width as i64 - self.cursor as i64 - glyph.width as i64 - 1
        } else {
            self.cursor as i64
        }
    }

    /// A "-------+" ruler as wide as the number of average characters per line.
    pub fn ruler(&self) -> Result<String> {
        let width_of = |ch| self.font.get_glyph(ch).map(|g| g.width);
        let monospace = {
            let space = width_of(' ')?;
            [width_of('i')?, width_of('m')?, width_of('M')?]
                .iter()
                .all(|&w| w == space)
        };
        let average = if monospace {
            width_of('A')?
        } else {
            (width_of('a')? + width_of('A')? + width_of('0')? + width_of('+')?) / 4
        };
        let average = if average == 0 { self.font.metrics().point_size / 2 } else { average }.max(1);
        let columns = self.width / average;
        Ok("-------+".repeat(columns / 8) + &"-".repeat(columns % 8))
    }
}

/// OR the set pixels of `glyph` into the canvas, clipping at its edges.
fn draw_glyph(canvas: &mut [u8], width: usize, height: usize, ascent: usize, glyph: &Glyph, origin: i64) {
    for y in 0..glyph.height {
        for x in 0..glyph.width {
            if !glyph.get_bit(x, y) {
                continue;
            }
            let tx = origin + x as i64 + glyph.x_offset as i64;
            let ty = ascent as i64 + y as i64 - glyph.height as i64 - glyph.y_offset as i64;
            if tx < 0 || ty < 0 || tx >= width as i64 || ty >= height as i64 {
                continue;
            }
            let index = ty as usize * width + tx as usize;
            canvas[index / 8] |= 0x80 >> (index % 8);
        }
    }
}
