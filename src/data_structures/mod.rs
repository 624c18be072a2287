//! Engine data structures: GPU resource handles, atlases and instance records.
//!
//! - `atlas` contains the shelf packer and the growing atlas texture built on it
//! - `font` and `sprite_atlas` are the two atlas users
//! - `instance` holds the per-instance records uploaded for instanced draws
//! - `model` contains vertex layouts, meshes, materials and models
//! - `texture`, `shader` and `framebuffer` wrap backend objects and delete them on drop

pub mod atlas;
pub mod font;
pub mod framebuffer;
pub mod instance;
pub mod model;
pub mod shader;
pub mod sprite_atlas;
pub mod texture;
