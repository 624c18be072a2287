//! batch-ngin
//!
//! An instancing-oriented draw batching renderer. Applications record the draws of a
//! frame (models, textures, rectangles, sprites, text and raw quads) into a
//! [`RenderPass`](render::RenderPass), which groups them into sorted batches of one
//! `(shader, resource)` pair each. The [`Renderer`](renderer::Renderer) then turns every
//! batch into a single instanced draw call with as few state changes as possible.
//! Fonts and sprite atlases are backed by growing texture atlases filled by an online
//! shelf packer.
//!
//! High-level modules
//! - `backend`: the GPU boundary trait, resource handles and the wgpu implementation
//! - `camera`: camera matrices and viewports
//! - `config`: renderer and atlas configuration
//! - `data_structures`: textures, shaders, meshes, atlases, fonts and instance records
//! - `logging`: logger initialisation
//! - `pipelines`: built-in shaders and binding conventions
//! - `render`: draw submission and batching
//! - `renderer`: execution of recorded passes
//!

pub mod backend;
pub mod camera;
pub mod config;
pub mod data_structures;
pub mod logging;
pub mod pipelines;
pub mod render;
pub mod renderer;

// Re-exports commonly used types for convenience in downstream code.
pub use cgmath;
pub use wgpu;
