//! Renderer and atlas configuration.

use crate::data_structures::instance::Color;

/// Parameters of the dynamic atlases backing fonts and sprite atlases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasConfig {
    /// Side length of a fresh atlas. Atlases grow by doubling from here.
    pub initial_resolution: u32,
    /// Empty pixels kept around every packed rectangle, so that linear filtering does not
    /// bleed neighbouring entries.
    pub padding: u32,
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            initial_resolution: crate::data_structures::atlas::INITIAL_RESOLUTION,
            padding: crate::data_structures::atlas::PADDING,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RendererConfig {
    /// Colour used by [`Renderer::clear_default`](crate::renderer::Renderer::clear_default).
    pub clear_color: Color,
    pub atlas: AtlasConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            clear_color: Color::rgb(0.1, 0.2, 0.3),
            atlas: AtlasConfig::default(),
        }
    }
}
