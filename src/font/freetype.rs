//! FreeType wrapper
//!
//! Greyscale cell rendering for console fonts, scalable or bitmap.

use anyhow::{anyhow, bail, Context, Result};
use freetype::bitmap::PixelMode;
use freetype::face::LoadFlag;
use freetype::render_mode::RenderMode;
use freetype::Library;
use log::{debug, info};
use std::collections::HashMap;
use std::rc::Rc;
use unicode_width::UnicodeWidthChar;

use super::fontconfig::resolve_font;
use super::{blit_gray, blit_mono, glyph_cells, mul_fix, paint_underline, underline_rect, FontAttr, Glyph};

// Directly declare functions not exported by freetype-sys
extern "C" {
    fn FT_Select_Size(face: freetype::ffi::FT_Face, strike_index: freetype::ffi::FT_Int) -> freetype::ffi::FT_Error;
}

/// Index of the strike whose height is nearest to `target`
pub fn nearest_size(heights: &[i32], target: i32) -> Option<usize> {
    heights
        .iter()
        .enumerate()
        .min_by_key(|(_, h)| (**h - target).abs())
        .map(|(i, _)| i)
}

/// FreeType console font
pub struct FreetypeFont {
    face: freetype::Face,
    _library: Library,
    attr: FontAttr,
    /// Baseline offset from the cell top (pixels)
    ascender: i32,
    /// Underline stripe (row, thickness)
    underline: (u32, u32),
    cache: HashMap<char, Rc<Glyph>>,
}

impl FreetypeFont {
    /// Find and load the font described by `attr`
    pub fn new(attr: FontAttr) -> Result<Self> {
        let mut attr = attr.normalize();
        let font_match = resolve_font(&attr.name, attr.bold)?;

        let library =
            Library::init().map_err(|e| anyhow!("FreeType initialization failed: {:?}", e))?;
        let mut face = library
            .new_face(&font_match.path, 0)
            .map_err(|e| anyhow!("FreeType font loading failed: {:?}", e))
            .with_context(|| format!("font file {}", font_match.path.display()))?;

        if face.is_scalable() {
            face.set_pixel_sizes(0, attr.height)
                .map_err(|e| anyhow!("FreeType size setting failed: {:?}", e))?;
        } else {
            let raw = face.raw();
            let heights: Vec<i32> = if raw.available_sizes.is_null() || raw.num_fixed_sizes <= 0 {
                Vec::new()
            } else {
                let sizes = unsafe {
                    std::slice::from_raw_parts(raw.available_sizes, raw.num_fixed_sizes as usize)
                };
                sizes.iter().map(|s| s.height as i32).collect()
            };
            let index = nearest_size(&heights, attr.height as i32)
                .ok_or_else(|| anyhow!("bitmap font {} has no strikes", font_match.family))?;
            let err = unsafe { FT_Select_Size(face.raw_mut() as *mut _, index as freetype::ffi::FT_Int) };
            if err != 0 {
                bail!("FreeType cannot select strike {} (error {})", index, err);
            }
        }

        let metrics = face
            .size_metrics()
            .ok_or_else(|| anyhow!("FreeType size not set"))?;
        let cell_height = (metrics.height >> 6) as u32;

        face.load_char('M' as usize, LoadFlag::DEFAULT)
            .map_err(|e| anyhow!("FreeType cannot load 'M': {:?}", e))?;
        let cell_width = (face.glyph().advance().x >> 6) as u32;

        if cell_width == 0 || cell_height == 0 {
            bail!("invalid cell size {}x{} for {}", cell_width, cell_height, font_match.family);
        }

        let raw = face.raw();
        let position = mul_fix(raw.underline_position as i64, metrics.y_scale as i64);
        let thickness = mul_fix(raw.underline_thickness as i64, metrics.y_scale as i64);
        let underline = underline_rect(metrics.ascender as i64, position, thickness, cell_height);

        attr.width = cell_width;
        attr.height = cell_height;
        info!(
            "Font loaded: {} ({}x{}, bold={}, underline={})",
            font_match.family, cell_width, cell_height, attr.bold, attr.underline
        );

        Ok(Self {
            face,
            _library: library,
            attr,
            ascender: (metrics.ascender >> 6) as i32,
            underline,
            cache: HashMap::new(),
        })
    }

    /// Actual attributes (cell size filled in)
    pub fn attr(&self) -> &FontAttr {
        &self.attr
    }

    /// Render one character
    pub fn render(&mut self, ch: char) -> Result<Rc<Glyph>> {
        if let Some(glyph) = self.cache.get(&ch) {
            return Ok(glyph.clone());
        }
        let glyph = Rc::new(self.rasterize(ch)?);
        self.cache.insert(ch, glyph.clone());
        Ok(glyph)
    }

    /// Render a base character with combining marks; only the base is drawn
    pub fn render_sequence(&mut self, seq: &[char]) -> Result<Rc<Glyph>> {
        let (&base, rest) = seq
            .split_first()
            .ok_or_else(|| anyhow!("empty character sequence"))?;
        if !rest.is_empty() {
            debug!("font: dropping {} combining characters after {:?}", rest.len(), base);
        }
        self.render(base)
    }

    pub fn render_empty(&mut self) -> Result<Rc<Glyph>> {
        self.render(' ')
    }

    /// Glyph for characters that cannot be rendered
    pub fn render_inval(&mut self) -> Result<Rc<Glyph>> {
        self.render('?')
    }

    fn rasterize(&self, ch: char) -> Result<Glyph> {
        let width = UnicodeWidthChar::width(ch).unwrap_or(0);
        if width == 0 {
            bail!("zero-width character U+{:04X}", ch as u32);
        }

        self.face
            .load_char(ch as usize, LoadFlag::DEFAULT | LoadFlag::NO_HINTING)
            .map_err(|e| anyhow!("FreeType cannot load U+{:04X}: {:?}", ch as u32, e))?;
        let slot = self.face.glyph();
        slot.render_glyph(RenderMode::Normal)
            .map_err(|e| anyhow!("FreeType cannot render U+{:04X}: {:?}", ch as u32, e))?;

        let bitmap = slot.bitmap();
        let cells = glyph_cells(bitmap.width(), slot.bitmap_left(), self.attr.width, width);
        let mut glyph = Glyph::blank(cells, self.attr.width, self.attr.height);

        let x = slot.bitmap_left();
        let y = self.ascender - slot.bitmap_top();
        let src_width = bitmap.width().max(0) as usize;
        let rows = bitmap.rows().max(0) as usize;
        let pitch = bitmap.pitch().unsigned_abs() as usize;

        match bitmap.pixel_mode() {
            Ok(PixelMode::Mono) => {
                blit_mono(&mut glyph, bitmap.buffer(), src_width, rows, pitch, x, y);
                if self.attr.underline {
                    let last = glyph.height - 1;
                    paint_underline(&mut glyph, last, 1);
                }
            }
            Ok(PixelMode::Gray) => {
                blit_gray(&mut glyph, bitmap.buffer(), src_width, rows, pitch, x, y);
                if self.attr.underline {
                    let (row, thickness) = self.underline;
                    paint_underline(&mut glyph, row, thickness);
                }
            }
            _ => bail!("unsupported pixel mode for U+{:04X}", ch as u32),
        }

        Ok(glyph)
    }
}
