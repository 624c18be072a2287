//! GPU textures.
//!
//! This module provides [`Texture`], an owning handle to a backend texture. The GPU object
//! is deleted when the handle is dropped. Besides image-backed textures it offers the
//! small solid-colour textures the renderer uses as fallbacks for absent material slots.

use std::fmt;

use anyhow::{Context, Result, ensure};

use crate::backend::{ChannelFormat, Filter, Gpu, TextureDescriptor, TextureId, TextureRegion};

/// Byte length of tightly packed pixel data, `None` if it does not fit in memory.
pub fn pixel_bytes(width: u32, height: u32, format: ChannelFormat) -> Option<usize> {
    let bytes = u64::from(width)
        .checked_mul(u64::from(height))?
        .checked_mul(u64::from(format.bytes_per_pixel()))?;
    usize::try_from(bytes).ok()
}

pub struct Texture {
    gpu: Gpu,
    id: TextureId,
    size: [u32; 2],
    format: ChannelFormat,
}

impl Texture {
    /// Creates a texture, optionally initialized with tightly packed `pixels`.
    pub fn new(
        gpu: &Gpu,
        label: &str,
        size: [u32; 2],
        format: ChannelFormat,
        filter: Filter,
        pixels: Option<&[u8]>,
    ) -> Result<Self> {
        if let Some(pixels) = pixels {
            let expected = pixel_bytes(size[0], size[1], format);
            ensure!(
                expected == Some(pixels.len()),
                "Texture `{label}` ({}x{}) cannot hold {} bytes of pixel data",
                size[0],
                size[1],
                pixels.len()
            );
        }
        let descriptor = TextureDescriptor {
            label,
            size,
            format,
            filter,
        };
        let id = gpu
            .create_texture(&descriptor, pixels)
            .with_context(|| format!("Creating texture `{label}` ({}x{})", size[0], size[1]))?;

        Ok(Self {
            gpu: gpu.clone(),
            id,
            size,
            format,
        })
    }

    /// Creates an sRGB texture from decoded image data.
    pub fn from_image(gpu: &Gpu, label: &str, image: &image::RgbaImage) -> Result<Self> {
        Self::new(
            gpu,
            label,
            [image.width(), image.height()],
            ChannelFormat::Rgba8Srgb,
            Filter::Linear,
            Some(image.as_raw()),
        )
    }

    /// A 1x1 texture of a single linear RGBA colour.
    pub fn solid(gpu: &Gpu, label: &str, rgba: [u8; 4]) -> Result<Self> {
        Self::new(
            gpu,
            label,
            [1, 1],
            ChannelFormat::Rgba8,
            Filter::Nearest,
            Some(&rgba),
        )
    }

    /// A flat normal map (neutral blue, representing no deformation).
    pub fn default_normal_map(gpu: &Gpu) -> Result<Self> {
        Self::solid(gpu, "default normal map", [127, 127, 255, 255])
    }

    /// Uploads tightly packed `pixels` into a region of the texture.
    pub fn write(&self, region: TextureRegion, pixels: &[u8]) {
        debug_assert!(
            u64::from(region.x) + u64::from(region.width) <= u64::from(self.size[0])
                && u64::from(region.y) + u64::from(region.height) <= u64::from(self.size[1]),
            "region {region:?} outside of texture {:?}",
            self.size
        );
        debug_assert_eq!(
            Some(pixels.len()),
            pixel_bytes(region.width, region.height, self.format)
        );
        self.gpu.write_texture(self.id, region, pixels);
    }

    /// Reallocates the texture at a larger size. Existing texels keep their pixel
    /// coordinates and the handle keeps its identity.
    pub fn grow(&mut self, new_size: [u32; 2]) -> Result<()> {
        debug_assert!(new_size[0] >= self.size[0] && new_size[1] >= self.size[1]);
        if new_size == self.size {
            return Ok(());
        }
        self.gpu.resize_texture(self.id, new_size).with_context(|| {
            format!(
                "Growing texture {:?} from {:?} to {new_size:?}",
                self.id, self.size
            )
        })?;
        log::info!(
            "Texture {:?} grown from {}x{} to {}x{}",
            self.id,
            self.size[0],
            self.size[1],
            new_size[0],
            new_size[1]
        );
        self.size = new_size;
        Ok(())
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn size(&self) -> [u32; 2] {
        self.size
    }

    pub fn channel_format(&self) -> ChannelFormat {
        self.format
    }
}

impl fmt::Debug for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("format", &self.format)
            .finish()
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.gpu.delete_texture(self.id);
    }
}
