//! Bit-level flips over packed 1-bit rasters (MSB-first rows).

use std::borrow::Cow;

/// Mirror one packed row: reverse the bits of every byte, then the byte order.
fn mirror_row(row: &mut [u8]) {
    for b in row.iter_mut() {
        *b = b.reverse_bits();
    }
    row.reverse();
}

/// Flip a packed raster horizontally and/or vertically.
///
/// - `buffer`: packed rows of `width / 8` bytes
/// - `width`, `height`: raster size in pixels
///
/// Returns the input untouched when no flip is requested. Bytes beyond
/// `height` whole rows are carried over unchanged.
pub fn flip(buffer: &[u8], width: usize, height: usize, horizontal: bool, vertical: bool) -> Cow<'_, [u8]> {
    if !horizontal && !vertical {
        return Cow::Borrowed(buffer);
    }
    let mut out = buffer.to_vec();
    flip_in_place(&mut out, width, height, horizontal, vertical);
    Cow::Owned(out)
}

/// Like [`flip`], overwriting `buffer`.
pub fn flip_in_place(buffer: &mut [u8], width: usize, height: usize, horizontal: bool, vertical: bool) {
    let row_len = width / 8;
    if row_len == 0 {
        return;
    }
    let rows = height.min(buffer.len() / row_len);
    let image = &mut buffer[..rows * row_len];
    if horizontal {
        image.chunks_exact_mut(row_len).for_each(mirror_row);
    }
    if vertical {
        for top in 0..rows / 2 {
            let bottom = rows - 1 - top;
            let (upper, lower) = image.split_at_mut(bottom * row_len);
            upper[top * row_len..(top + 1) * row_len].swap_with_slice(&mut lower[..row_len]);
        }
    }
}
