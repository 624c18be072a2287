//! Glyph cache for text rendering.
//!
//! Rasterizing and shaping text is left to the application (or a crate such as
//! `fontdue`/`cosmic-text`). A [`Font`] stores the rasterized coverage bitmaps in a single
//! growing `R8` atlas and remembers where each glyph went; text draws then refer to glyphs
//! by id through a list of [`ShapedGlyph`]s.

use std::collections::HashMap;

use anyhow::{Context, Result, ensure};
use cgmath::Vector2;

use crate::{
    backend::{ChannelFormat, Filter, Gpu, TextureId},
    config::AtlasConfig,
    data_structures::{
        atlas::{AtlasRect, DynamicAtlas},
        texture::pixel_bytes,
    },
};

pub type GlyphId = u32;

/// A rasterized glyph as produced by a font rasterizer.
#[derive(Debug, Clone, PartialEq)]
pub struct GlyphBitmap {
    pub width: u32,
    pub height: u32,
    /// Offset of the bitmap's top-left corner from the pen position, in pixels.
    pub bearing: Vector2<f32>,
    /// One coverage byte per pixel, row-major.
    pub pixels: Vec<u8>,
}

/// Where a cached glyph lives in the atlas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Glyph {
    pub rect: AtlasRect,
    pub bearing: Vector2<f32>,
}

/// One positioned glyph of shaped text. `position` is the pen position relative to the
/// text draw's transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapedGlyph {
    pub id: GlyphId,
    pub position: Vector2<f32>,
}

impl ShapedGlyph {
    pub fn new(id: GlyphId, x: f32, y: f32) -> Self {
        Self {
            id,
            position: Vector2::new(x, y),
        }
    }
}

#[derive(Debug)]
pub struct Font {
    name: String,
    atlas: DynamicAtlas,
    glyphs: HashMap<GlyphId, Glyph>,
}

impl Font {
    pub fn new(gpu: &Gpu, name: &str) -> Result<Self> {
        Self::with_config(gpu, name, AtlasConfig::default())
    }

    pub fn with_config(gpu: &Gpu, name: &str, config: AtlasConfig) -> Result<Self> {
        let atlas = DynamicAtlas::new(
            gpu,
            &format!("font atlas `{name}`"),
            ChannelFormat::R8,
            Filter::Linear,
            config,
        )?;
        Ok(Self {
            name: name.to_string(),
            atlas,
            glyphs: HashMap::new(),
        })
    }

    /// Caches a glyph bitmap. Adding an id twice keeps the first bitmap.
    pub fn add_glyph(&mut self, id: GlyphId, bitmap: &GlyphBitmap) -> Result<Glyph> {
        if let Some(glyph) = self.glyphs.get(&id) {
            return Ok(*glyph);
        }
        ensure!(
            pixel_bytes(bitmap.width, bitmap.height, ChannelFormat::R8)
                == Some(bitmap.pixels.len()),
            "Glyph {id} of font `{}` has {} coverage bytes for a {}x{} bitmap",
            self.name,
            bitmap.pixels.len(),
            bitmap.width,
            bitmap.height
        );
        let rect = self
            .atlas
            .insert(bitmap.width, bitmap.height, &bitmap.pixels)
            .with_context(|| format!("Adding glyph {id} to font `{}`", self.name))?;
        let glyph = Glyph {
            rect,
            bearing: bitmap.bearing,
        };
        self.glyphs.insert(id, glyph);
        Ok(glyph)
    }

    pub fn glyph(&self, id: GlyphId) -> Option<&Glyph> {
        self.glyphs.get(&id)
    }

    pub fn contains(&self, id: GlyphId) -> bool {
        self.glyphs.contains_key(&id)
    }

    pub fn texture_id(&self) -> TextureId {
        self.atlas.texture_id()
    }

    pub fn resolution(&self) -> u32 {
        self.atlas.resolution()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
