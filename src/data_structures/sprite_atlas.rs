//! Sprite sheets built at runtime.
//!
//! A [`SpriteAtlas`] packs RGBA images into one growing texture and hands out dense
//! [`SpriteId`]s. Sprite regions are looked up at draw time, so they stay valid when the
//! atlas grows.

use anyhow::{Context, Result};

use crate::{
    backend::{ChannelFormat, Filter, Gpu, TextureId},
    config::AtlasConfig,
    data_structures::atlas::{AtlasRect, DynamicAtlas},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpriteId(pub u32);

/// Many small images packed into one texture, drawable as sprites without texture
/// rebinds between them.
#[derive(Debug)]
pub struct SpriteAtlas {
    atlas: DynamicAtlas,
    sprites: Vec<AtlasRect>,
}

impl SpriteAtlas {
    pub fn new(gpu: &Gpu, label: &str) -> Result<Self> {
        Self::with_config(gpu, label, AtlasConfig::default())
    }

    pub fn with_config(gpu: &Gpu, label: &str, config: AtlasConfig) -> Result<Self> {
        let atlas = DynamicAtlas::new(gpu, label, ChannelFormat::Rgba8Srgb, Filter::Nearest, config)?;
        Ok(Self {
            atlas,
            sprites: Vec::new(),
        })
    }

    pub fn add_sprite(&mut self, image: &image::RgbaImage) -> Result<SpriteId> {
        let rect = self
            .atlas
            .insert(image.width(), image.height(), image.as_raw())
            .with_context(|| format!("Adding {}x{} sprite", image.width(), image.height()))?;
        let id = SpriteId(self.sprites.len() as u32);
        self.sprites.push(rect);
        Ok(id)
    }

    pub fn sprite(&self, id: SpriteId) -> Option<AtlasRect> {
        self.sprites.get(id.0 as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.sprites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sprites.is_empty()
    }

    pub fn texture_id(&self) -> TextureId {
        self.atlas.texture_id()
    }

    pub fn resolution(&self) -> u32 {
        self.atlas.resolution()
    }
}
