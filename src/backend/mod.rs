//! The GPU boundary.
//!
//! Everything the engine does on the GPU goes through the [`Backend`] trait: resource
//! creation and deletion on one side, a small immediate-style command set (bind, upload,
//! draw) on the other. Resources are referred to by opaque integer handles that are
//! allocated monotonically and never reused, which makes them usable as a deterministic
//! resource identity when ordering batches.
//!
//! The production implementation is [`WgpuBackend`]. Tests substitute a recording backend.

use std::{borrow::Cow, rc::Rc};

use thiserror::Error;

use crate::camera::Viewport;

mod wgpu_backend;

pub use wgpu_backend::WgpuBackend;

/// Shared handle to the active backend.
///
/// Rendering is single-threaded, every resource handle keeps one of these to delete its
/// GPU object on drop.
pub type Gpu = Rc<dyn Backend>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TextureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProgramId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VertexArrayId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FramebufferId(pub u32);

/// Location of a uniform inside a program, as resolved by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelFormat {
    /// Single channel coverage, used by glyph atlases.
    R8,
    Rgba8,
    Rgba8Srgb,
}

impl ChannelFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            ChannelFormat::R8 => 1,
            ChannelFormat::Rgba8 | ChannelFormat::Rgba8Srgb => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Filter {
    #[default]
    Linear,
    Nearest,
}

#[derive(Debug, Clone)]
pub struct TextureDescriptor<'a> {
    pub label: &'a str,
    pub size: [u32; 2],
    pub format: ChannelFormat,
    pub filter: Filter,
}

/// A pixel rectangle inside a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// The two pipeline families of the engine.
///
/// `Model` programs consume [`ModelVertex`](crate::data_structures::model::ModelVertex)
/// meshes with per-object instances, `Quad` programs consume the shared unit quad with
/// per-quad instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    Model,
    Quad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    Opaque,
    #[default]
    Alpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformType {
    Float,
    Int,
    Vec2,
    Vec3,
    Vec4,
    Mat3,
    Mat4,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniformDecl {
    pub name: Cow<'static, str>,
    pub ty: UniformType,
}

impl UniformDecl {
    pub fn new(name: impl Into<Cow<'static, str>>, ty: UniformType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Everything a backend needs to build a program.
///
/// `uniforms` declares the program's uniform block in declaration order. Backends that
/// lay the block out themselves (wgpu) rely on this order matching the shader source.
#[derive(Debug, Clone)]
pub struct ShaderDescriptor {
    pub label: Cow<'static, str>,
    pub kind: PipelineKind,
    pub source: Cow<'static, str>,
    pub uniforms: Vec<UniformDecl>,
    pub blend: BlendMode,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat3([[f32; 3]; 3]),
    Mat4([[f32; 4]; 4]),
}

impl UniformValue {
    pub fn ty(&self) -> UniformType {
        match self {
            UniformValue::Float(_) => UniformType::Float,
            UniformValue::Int(_) => UniformType::Int,
            UniformValue::Vec2(_) => UniformType::Vec2,
            UniformValue::Vec3(_) => UniformType::Vec3,
            UniformValue::Vec4(_) => UniformType::Vec4,
            UniformValue::Mat3(_) => UniformType::Mat3,
            UniformValue::Mat4(_) => UniformType::Mat4,
        }
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        UniformValue::Float(v)
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        UniformValue::Int(v)
    }
}

impl From<[f32; 2]> for UniformValue {
    fn from(v: [f32; 2]) -> Self {
        UniformValue::Vec2(v)
    }
}

impl From<[f32; 3]> for UniformValue {
    fn from(v: [f32; 3]) -> Self {
        UniformValue::Vec3(v)
    }
}

impl From<[f32; 4]> for UniformValue {
    fn from(v: [f32; 4]) -> Self {
        UniformValue::Vec4(v)
    }
}

impl From<cgmath::Vector2<f32>> for UniformValue {
    fn from(v: cgmath::Vector2<f32>) -> Self {
        UniformValue::Vec2(v.into())
    }
}

impl From<cgmath::Vector3<f32>> for UniformValue {
    fn from(v: cgmath::Vector3<f32>) -> Self {
        UniformValue::Vec3(v.into())
    }
}

impl From<cgmath::Vector4<f32>> for UniformValue {
    fn from(v: cgmath::Vector4<f32>) -> Self {
        UniformValue::Vec4(v.into())
    }
}

impl From<cgmath::Matrix3<f32>> for UniformValue {
    fn from(m: cgmath::Matrix3<f32>) -> Self {
        UniformValue::Mat3(m.into())
    }
}

impl From<cgmath::Matrix4<f32>> for UniformValue {
    fn from(m: cgmath::Matrix4<f32>) -> Self {
        UniformValue::Mat4(m.into())
    }
}

/// An instanced draw of the currently bound vertex array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawCall {
    /// Indexed triangle list, used for model meshes.
    Indexed { index_count: u32, instance_count: u32 },
    /// Non-indexed triangle strip, used for the shared unit quad.
    Strip { vertex_count: u32, instance_count: u32 },
}

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("shader `{label}` failed to compile: {log}")]
    ShaderCompilation { label: String, log: String },
    #[error("allocating {what} failed: {reason}")]
    Allocation { what: String, reason: String },
    #[error("texture size {width}x{height} exceeds the backend maximum of {max}")]
    TextureTooLarge { width: u32, height: u32, max: u32 },
    #[error("unknown {kind} handle {id}")]
    UnknownHandle { kind: &'static str, id: u32 },
}

/// The entry points through which the engine reaches the GPU.
///
/// Methods take `&self`, implementations use interior mutability. Commands are issued
/// in order between two [`flush`](Backend::flush) calls, a backend is free to execute
/// them immediately or defer them until `flush`.
pub trait Backend {
    fn max_texture_size(&self) -> u32;

    fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
        pixels: Option<&[u8]>,
    ) -> Result<TextureId, GpuError>;
    fn write_texture(&self, texture: TextureId, region: TextureRegion, pixels: &[u8]);
    /// Reallocates `texture` at `size`, keeping its existing texels at the same pixel
    /// coordinates. The handle stays valid and keeps its identity.
    fn resize_texture(&self, texture: TextureId, size: [u32; 2]) -> Result<(), GpuError>;
    fn delete_texture(&self, texture: TextureId);

    fn create_program(&self, descriptor: &ShaderDescriptor) -> Result<ProgramId, GpuError>;
    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;
    fn delete_program(&self, program: ProgramId);

    fn create_vertex_array(
        &self,
        layout: PipelineKind,
        vertices: &[u8],
        indices: Option<&[u32]>,
    ) -> Result<VertexArrayId, GpuError>;
    fn delete_vertex_array(&self, vertex_array: VertexArrayId);

    fn create_framebuffer(&self, size: [u32; 2]) -> Result<FramebufferId, GpuError>;
    fn delete_framebuffer(&self, framebuffer: FramebufferId);

    /// Binds a render target, `None` selects the screen.
    fn bind_framebuffer(&self, framebuffer: Option<FramebufferId>);
    /// Clears colour and depth of the bound render target.
    fn clear(&self, color: [f32; 4]);
    fn set_viewport(&self, viewport: Viewport);
    fn use_program(&self, program: ProgramId);
    fn upload_uniform(&self, program: ProgramId, location: UniformLocation, value: UniformValue);
    fn bind_texture(&self, unit: u32, texture: TextureId);
    fn bind_vertex_array(&self, vertex_array: VertexArrayId);
    /// Provides the per-instance records for the next draw call.
    fn upload_instances(&self, data: &[u8]);
    fn draw(&self, call: DrawCall);
    /// Ends a render: everything issued so far is submitted.
    fn flush(&self);
}
