//! Font rasterizer
//!
//! Renders characters into fixed-size cell bitmaps for a console:
//! - `fontconfig`: system font lookup
//! - `freetype`: FreeType glyph rendering (`FreetypeFont`)
//!
//! The helpers in this module do the pixel work that does not need
//! FreeType (cell sizing, blitting, underline placement).

pub mod fontconfig;
pub mod freetype;

pub use self::freetype::FreetypeFont;

/// Default family when none is configured
pub const DEFAULT_FONT_NAME: &str = "monospace";
/// Default cell height in pixels
pub const DEFAULT_FONT_HEIGHT: u32 = 16;

/// Requested (and, after loading, actual) font attributes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FontAttr {
    /// fontconfig family name
    pub name: String,
    pub bold: bool,
    pub underline: bool,
    /// Cell height in pixels
    pub height: u32,
    /// Cell width in pixels (filled in by the font)
    pub width: u32,
}

impl FontAttr {
    pub fn new(name: &str, height: u32) -> Self {
        Self {
            name: name.to_string(),
            height,
            ..Self::default()
        }
    }

    /// Fill in defaults for unset fields
    pub fn normalize(mut self) -> Self {
        if self.name.is_empty() {
            self.name = DEFAULT_FONT_NAME.to_string();
        }
        if self.height == 0 {
            self.height = DEFAULT_FONT_HEIGHT;
        }
        self
    }
}

/// Rendered glyph: 8-bit greyscale, `stride == width`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Glyph {
    /// Number of cells covered (1 or 2)
    pub cells: u32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub data: Vec<u8>,
}

impl Glyph {
    /// Blank glyph covering `cells` cells
    pub fn blank(cells: u32, cell_width: u32, cell_height: u32) -> Self {
        let width = cell_width * cells;
        Self {
            cells,
            width,
            height: cell_height,
            stride: width,
            data: vec![0; (width * cell_height) as usize],
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> u8 {
        self.data[(y * self.stride + x) as usize]
    }
}

/// Cells a glyph needs: two when its ink runs past 1.2 cells, otherwise
/// its Unicode width
pub fn glyph_cells(bitmap_width: i32, bitmap_left: i32, cell_width: u32, unicode_width: usize) -> u32 {
    if bitmap_width + bitmap_left > (cell_width as i32) * 6 / 5 {
        2
    } else {
        unicode_width.clamp(1, 2) as u32
    }
}

/// 16.16 fixed point multiply (FT_MulFix)
pub fn mul_fix(a: i64, b: i64) -> i64 {
    let product = a * b;
    (product + 0x8000 - i64::from(product < 0)) >> 16
}

/// Underline stripe `(row, thickness)` for a cell of `height` pixels.
/// Inputs are 26.6 values already scaled to the pixel size.
pub fn underline_rect(ascender: i64, position: i64, thickness: i64, height: u32) -> (u32, u32) {
    let height = height as i64;
    let mut thick = thickness * 3 / 2 / 64;
    if thick < 1 || thick > height / 4 {
        thick = 1;
    }
    let mut row = (ascender - position) / 64;
    if row + thick > height {
        row = height - thick;
    }
    (row.max(0) as u32, thick as u32)
}

/// Copy a greyscale bitmap into `glyph` at `(x, y)`, clipping at the edges
pub fn blit_gray(glyph: &mut Glyph, src: &[u8], src_width: usize, rows: usize, pitch: usize, x: i32, y: i32) {
    for row in 0..rows {
        let dy = y + row as i32;
        if dy < 0 || dy >= glyph.height as i32 {
            continue;
        }
        for col in 0..src_width {
            let dx = x + col as i32;
            if dx < 0 || dx >= glyph.width as i32 {
                continue;
            }
            let Some(&value) = src.get(row * pitch + col) else {
                continue;
            };
            glyph.data[(dy as u32 * glyph.stride + dx as u32) as usize] = value;
        }
    }
}

/// Copy a 1-bit bitmap into `glyph` at `(x, y)`, expanding set bits to 255
pub fn blit_mono(glyph: &mut Glyph, src: &[u8], src_width: usize, rows: usize, pitch: usize, x: i32, y: i32) {
    for row in 0..rows {
        let dy = y + row as i32;
        if dy < 0 || dy >= glyph.height as i32 {
            continue;
        }
        for col in 0..src_width {
            let dx = x + col as i32;
            if dx < 0 || dx >= glyph.width as i32 {
                continue;
            }
            let Some(&byte) = src.get(row * pitch + col / 8) else {
                continue;
            };
            if byte & (0x80 >> (col % 8)) != 0 {
                glyph.data[(dy as u32 * glyph.stride + dx as u32) as usize] = 0xff;
            }
        }
    }
}

/// Paint `thickness` full rows starting at `row`
pub fn paint_underline(glyph: &mut Glyph, row: u32, thickness: u32) {
    let end = (row + thickness).min(glyph.height);
    for y in row..end {
        let start = (y * glyph.stride) as usize;
        glyph.data[start..start + glyph.width as usize].fill(0xff);
    }
}
