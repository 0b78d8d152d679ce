//! Page-aware raster store and the PBM interchange format.
//!
//! The store is a bounded ring: once a write would pass `max_size` the cursor
//! wraps to 0 and the oldest page records are dropped until the retained page
//! heights fit the retained data again.

use std::borrow::Cow;
use std::collections::VecDeque;
use std::io::{BufRead, Read};

use image::{GrayImage, Luma};

use crate::{CatPrinterError, Result};

/// Default store capacity.
pub const DEFAULT_MAX_SIZE: usize = 64 * 1024 * 1024;

/// Bytes read from a PBM stream at a time.
const PBM_CHUNK: usize = 4 * 1024 * 1024;

/// One logical image within a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl Page {
    /// Serialise as a binary PBM (`P4`) document.
    pub fn to_pbm(&self) -> Vec<u8> {
        let mut out = format!("P4\n{} {}\n", self.width, self.height).into_bytes();
        out.extend_from_slice(&self.data);
        out
    }

    /// Convert to a grayscale image (black = 0) for debug output.
    ///
    /// Fails when `data` holds fewer than `height` rows.
    pub fn to_image(&self) -> Result<GrayImage> {
        let row_len = self.width.div_ceil(8);
        let expected = row_len * self.height;
        if self.data.len() < expected {
            return Err(CatPrinterError::InvalidImageData(format!(
                "page of {}x{} needs {expected} bytes, has {}",
                self.width,
                self.height,
                self.data.len()
            )));
        }
        Ok(GrayImage::from_fn(self.width as u32, self.height as u32, |x, y| {
            let byte = self.data[y as usize * row_len + x as usize / 8];
            let black = byte & (0x80 >> (x % 8)) != 0;
            Luma([if black { 0 } else { 255 }])
        }))
    }
}

/// Bounded, page-aware store of packed raster lines.
#[derive(Debug)]
pub struct BitmapStore {
    width: usize,
    line_bytes: usize,
    max_size: usize,
    data: Vec<u8>,
    cursor: usize,
    pages: VecDeque<usize>,
    unpaged_lines: usize,
    full: bool,
}

impl BitmapStore {
    /// Create an empty store for lines of `width` pixels.
    ///
    /// `max_size` is rounded down to whole lines (at least one line).
    pub fn new(width: usize, max_size: usize) -> Self {
        let line_bytes = (width / 8).max(1);
        let max_size = (max_size / line_bytes).max(1) * line_bytes;
        Self {
            width,
            line_bytes,
            max_size,
            data: Vec::with_capacity(max_size.min(PBM_CHUNK)),
            cursor: 0,
            pages: VecDeque::new(),
            unpaged_lines: 0,
            full: false,
        }
    }

    /// Create a store and fill it from a PBM stream.
    pub fn from_pbm<R: BufRead>(width: usize, reader: R, max_size: usize) -> Result<Self> {
        let mut store = Self::new(width, max_size);
        store.read_pbm(reader)?;
        Ok(store)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn line_bytes(&self) -> usize {
        self.line_bytes
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Whether the store has wrapped at least once.
    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Current write offset.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Heights of the retained pages, oldest first.
    pub fn pages(&self) -> impl Iterator<Item = usize> + '_ {
        self.pages.iter().copied()
    }

    /// Bytes of valid data currently held.
    pub fn len(&self) -> usize {
        if self.full { self.data.len() } else { self.cursor }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whole lines currently held.
    pub fn height(&self) -> usize {
        self.len() / self.line_bytes
    }

    /// Append raw line data, wrapping to offset 0 when `max_size` would be passed.
    ///
    /// Returns the write offset after the append.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let bytes = if bytes.len() > self.max_size {
            // only the newest max_size bytes can survive
            tracing::debug!(len = bytes.len(), max_size = self.max_size, "append larger than store");
            self.full = true;
            self.cursor = 0;
            &bytes[bytes.len() - self.max_size..]
        } else {
            bytes
        };
        if self.cursor + bytes.len() > self.max_size {
            tracing::debug!(cursor = self.cursor, "bitmap store wrapped");
            self.full = true;
            self.cursor = 0;
        }
        let end = self.cursor + bytes.len();
        let overlap = end.min(self.data.len());
        if overlap > self.cursor {
            self.data[self.cursor..overlap].copy_from_slice(&bytes[..overlap - self.cursor]);
        }
        if end > overlap {
            self.data.extend_from_slice(&bytes[overlap - self.cursor..]);
        }
        self.cursor = end;
        self.unpaged_lines += bytes.len() / self.line_bytes;
        self.evict();
        self.cursor
    }

    /// Record the lines appended since the last page record as a page.
    ///
    /// Returns the height of the new page, 0 if nothing was pending.
    pub fn finish_page(&mut self) -> usize {
        let height = std::mem::take(&mut self.unpaged_lines);
        if height > 0 {
            self.pages.push_back(height);
            self.evict();
        }
        height
    }

    /// Drop the oldest page records until the retained heights fit the data.
    fn evict(&mut self) {
        let retained_lines = self.height();
        self.unpaged_lines = self.unpaged_lines.min(retained_lines);
        let room = retained_lines - self.unpaged_lines;
        while self.pages.iter().sum::<usize>() > room {
            if let Some(height) = self.pages.pop_front() {
                tracing::debug!(height, "evicted oldest page");
            }
        }
    }

    /// Retained data as (older, newer) halves around the write cursor.
    fn parts(&self) -> (&[u8], &[u8]) {
        if self.full {
            let (newer, older) = self.data.split_at(self.cursor);
            (older, newer)
        } else {
            (&self.data[..self.cursor], &self.data[..0])
        }
    }

    /// Retained data in the order it was written.
    fn ordered(&self) -> impl Iterator<Item = &[u8]> + '_ {
        let (older, newer) = self.parts();
        [older, newer].into_iter().filter(|part| !part.is_empty())
    }

    /// Read the retained data in chunks of at most `chunk_len` bytes.
    ///
    /// The read borrows the store, so it can be restarted any number of
    /// times and never moves the write cursor.
    pub fn read(&self, chunk_len: usize) -> impl Iterator<Item = &[u8]> + '_ {
        let chunk_len = chunk_len.max(1);
        self.ordered().flat_map(move |part| part.chunks(chunk_len))
    }

    /// Retained whole lines, oldest first.
    ///
    /// Only a line straddling the wrap point is copied.
    pub fn lines(&self) -> impl Iterator<Item = Cow<'_, [u8]>> + '_ {
        let line_bytes = self.line_bytes;
        let (older, newer) = self.parts();
        let head = older.len() / line_bytes * line_bytes;
        let split = older.len() - head;
        let (seam, newer) = if split == 0 {
            (None, newer)
        } else {
            let need = (line_bytes - split).min(newer.len());
            let mut joined = older[head..].to_vec();
            joined.extend_from_slice(&newer[..need]);
            ((joined.len() == line_bytes).then_some(Cow::Owned(joined)), &newer[need..])
        };
        older[..head]
            .chunks_exact(line_bytes)
            .map(Cow::Borrowed)
            .chain(seam)
            .chain(newer.chunks_exact(line_bytes).map(Cow::Borrowed))
    }

    /// Split the retained data into pages, or merge everything into one.
    ///
    /// Only lines covered by page records are included.
    pub fn to_pages(&self, merge: bool) -> Vec<Page> {
        let paged_lines: usize = self.pages.iter().sum();
        let end = (self.height() - self.unpaged_lines) * self.line_bytes;
        let start = end - paged_lines * self.line_bytes;
        let data: Vec<u8> = self
            .ordered()
            .flatten()
            .copied()
            .skip(start)
            .take(end - start)
            .collect();
        if merge {
            return vec![Page {
                width: self.width,
                height: paged_lines,
                data,
            }];
        }
        let mut offset = 0;
        self.pages
            .iter()
            .map(|&height| {
                let size = height * self.line_bytes;
                let page = Page {
                    width: self.width,
                    height,
                    data: data[offset..offset + size].to_vec(),
                };
                offset += size;
                page
            })
            .collect()
    }

    /// Read one or more concatenated PBM documents into the store.
    ///
    /// Pages are committed one at a time: a malformed page aborts the read
    /// but leaves every earlier page in place.
    pub fn read_pbm<R: BufRead>(&mut self, mut reader: R) -> Result<usize> {
        let mut count = 0;
        let mut signature = Vec::new();
        loop {
            signature.clear();
            if reader.read_until(b'\n', &mut signature)? == 0 {
                break;
            }
            if signature != b"P4\n" {
                return Err(CatPrinterError::InvalidImageData("input is not a PBM image".into()));
            }
            let (width, height) = read_dimensions(&mut reader)?;
            if width != self.width {
                return Err(CatPrinterError::InvalidImageData(format!(
                    "unsuitable image width: expected {}, got {width}",
                    self.width
                )));
            }
            let expected = self.line_bytes * height;
            let mut page = Vec::with_capacity(expected.min(PBM_CHUNK));
            while page.len() < expected {
                let want = (expected - page.len()).min(PBM_CHUNK);
                let got = (&mut reader).take(want as u64).read_to_end(&mut page)?;
                if got == 0 {
                    return Err(CatPrinterError::InvalidImageData(format!(
                        "broken PBM image: expected {expected} bytes, got {}",
                        page.len()
                    )));
                }
            }
            for chunk in page.chunks(self.max_size) {
                self.append(chunk);
            }
            self.finish_page();
            tracing::debug!(width, height, "read PBM page");
            count += 1;
        }
        Ok(count)
    }
}

/// Skip comment lines and parse `"<width> <height>"`.
fn read_dimensions<R: BufRead>(reader: &mut R) -> Result<(usize, usize)> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(CatPrinterError::InvalidImageData("missing PBM dimensions".into()));
        }
        if !line.starts_with('#') {
            break;
        }
    }
    let mut fields = line.split_ascii_whitespace().map(str::parse::<usize>);
    match (fields.next(), fields.next(), fields.next()) {
        (Some(Ok(width)), Some(Ok(height)), None) => Ok((width, height)),
        _ => Err(CatPrinterError::InvalidImageData(format!(
            "bad PBM dimensions: {:?}",
            line.trim_end()
        ))),
    }
}
