//! Online rectangle packing for dynamically populated atlases.
//!
//! [`AtlasPacker`] places rectangles of unknown future sizes into a square that grows by
//! doubling. Rectangles go onto horizontal shelves that are never moved, removed or
//! resized, so every placement handed out stays valid for the lifetime of the packer.
//! Growth only extends the addressable square.
//!
//! [`DynamicAtlas`] couples a packer with the texture it describes and takes care of
//! growing that texture whenever the packer reports a resize.

use anyhow::{Context, Result, ensure};

use crate::{
    backend::{ChannelFormat, Filter, Gpu, TextureId, TextureRegion},
    config::AtlasConfig,
    data_structures::texture::{Texture, pixel_bytes},
};

pub const INITIAL_RESOLUTION: u32 = 128;
pub const PADDING: u32 = 2;

/// Shelves accept rectangles whose padded height is within this fraction of the shelf.
const MIN_HEIGHT_RATIO: f32 = 0.7;
/// New shelves reserve this much height for slightly taller later insertions.
const SHELF_SLACK: f32 = 1.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub x: u32,
    pub y: u32,
    /// The atlas resolution grew during this insertion. The backing texture must be
    /// reallocated before the new region is written.
    pub resized: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shelf {
    pub top: u32,
    pub height: u32,
    /// Horizontally consumed space.
    pub width: u32,
}

#[derive(Debug, Clone)]
pub struct AtlasPacker {
    resolution: u32,
    padding: u32,
    shelves: Vec<Shelf>,
}

impl AtlasPacker {
    pub fn new() -> Self {
        Self::with_config(AtlasConfig::default())
    }

    pub fn with_config(config: AtlasConfig) -> Self {
        debug_assert!(config.initial_resolution > 0, "atlas resolution must be positive");
        Self {
            resolution: config.initial_resolution.max(1),
            padding: config.padding,
            shelves: Vec::new(),
        }
    }

    /// Finds room for a `width` x `height` rectangle, growing the atlas if needed.
    ///
    /// Never fails. Zero sized rectangles are not expected here, callers special-case
    /// them.
    pub fn insert_rectangle(&mut self, width: u32, height: u32) -> Placement {
        // Saturating: oversized requests must not wrap into a small placement.
        let border = self.padding.saturating_mul(2);
        let padded_w = width.saturating_add(border);
        let padded_h = height.saturating_add(border);
        let mut resized = false;

        let resolution = self.resolution;
        let index = match self.shelves.iter().position(|shelf| {
            let ratio = padded_h as f32 / shelf.height as f32;
            (MIN_HEIGHT_RATIO..=1.0).contains(&ratio)
                && padded_w <= resolution.saturating_sub(shelf.width)
        }) {
            Some(index) => index,
            None => {
                let top = self
                    .shelves
                    .last()
                    .map_or(0, |s| s.top.saturating_add(s.height));
                let shelf = Shelf {
                    top,
                    height: ((padded_h as f32 * SHELF_SLACK) as u32).max(padded_h),
                    width: 0,
                };
                while shelf.top.saturating_add(shelf.height) > self.resolution
                    || padded_w > self.resolution
                {
                    self.resolution = self.resolution.saturating_mul(2);
                    resized = true;
                }
                if resized {
                    log::debug!("Atlas packer grew to {0}x{0}", self.resolution);
                }
                self.shelves.push(shelf);
                self.shelves.len() - 1
            }
        };

        let shelf = &mut self.shelves[index];
        let placement = Placement {
            x: shelf.width.saturating_add(self.padding),
            y: shelf.top.saturating_add(self.padding),
            resized,
        };
        shelf.width = shelf.width.saturating_add(padded_w);
        placement
    }

    /// Current side length of the square atlas.
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn padding(&self) -> u32 {
        self.padding
    }

    pub fn shelves(&self) -> &[Shelf] {
        &self.shelves
    }
}

impl Default for AtlasPacker {
    fn default() -> Self {
        Self::new()
    }
}

/// A pixel rectangle inside an atlas texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AtlasRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl AtlasRect {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Offset and scale of this rectangle in normalized texture coordinates of an atlas
    /// with side length `resolution`.
    ///
    /// Atlases grow, so this has to be evaluated against the current resolution whenever
    /// the rectangle is drawn.
    pub fn tex_coords(&self, resolution: u32) -> ([f32; 2], [f32; 2]) {
        let r = resolution as f32;
        (
            [self.x as f32 / r, self.y as f32 / r],
            [self.width as f32 / r, self.height as f32 / r],
        )
    }
}

/// A packer together with the texture it fills.
#[derive(Debug)]
pub struct DynamicAtlas {
    packer: AtlasPacker,
    texture: Texture,
}

impl DynamicAtlas {
    pub fn new(
        gpu: &Gpu,
        label: &str,
        format: ChannelFormat,
        filter: Filter,
        config: AtlasConfig,
    ) -> Result<Self> {
        let packer = AtlasPacker::with_config(config);
        let resolution = packer.resolution();
        let texture = Texture::new(gpu, label, [resolution, resolution], format, filter, None)
            .with_context(|| format!("Creating atlas `{label}`"))?;
        Ok(Self { packer, texture })
    }

    /// Packs and uploads a tightly packed bitmap, growing the texture when the packer
    /// asks for it. Zero sized bitmaps take no space and yield an empty rectangle.
    pub fn insert(&mut self, width: u32, height: u32, pixels: &[u8]) -> Result<AtlasRect> {
        if width == 0 || height == 0 {
            return Ok(AtlasRect::default());
        }
        let format = self.texture.channel_format();
        ensure!(
            pixel_bytes(width, height, format) == Some(pixels.len()),
            "A {width}x{height} {format:?} bitmap cannot have {} bytes",
            pixels.len()
        );
        let previous = self.packer.clone();
        let placement = self.packer.insert_rectangle(width, height);
        if placement.resized {
            let resolution = self.packer.resolution();
            if let Err(e) = self.texture.grow([resolution, resolution]) {
                // The packer must keep describing the texture that actually exists.
                self.packer = previous;
                return Err(e);
            }
        }

        let rect = AtlasRect {
            x: placement.x,
            y: placement.y,
            width,
            height,
        };
        self.texture.write(
            TextureRegion {
                x: rect.x,
                y: rect.y,
                width,
                height,
            },
            pixels,
        );
        Ok(rect)
    }

    pub fn resolution(&self) -> u32 {
        self.packer.resolution()
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    pub fn texture_id(&self) -> TextureId {
        self.texture.id()
    }

    pub fn packer(&self) -> &AtlasPacker {
        &self.packer
    }
}
