//! Built-in shaders and the pipeline conventions every shader follows.
//!
//! All programs share one binding scheme so that the backend can build pipelines for user
//! shaders without reflection:
//!
//! - `@group(0) @binding(0)` is the program's uniform block, declared in the same order
//!   as the [`UniformDecl`]s of its [`ShaderDescriptor`].
//! - `@group(1)` holds the textures. Model programs bind diffuse, specular, normal and
//!   emissive textures at bindings 0 to 3 and a sampler at 4. Quad programs bind one
//!   texture at 0 and its sampler at 1.
//! - Vertex locations follow [`ModelVertex`]/[`ObjectInstance`] for model programs and
//!   [`QuadVertex`]/[`QuadInstance`] for quad programs.
//!
//! Uniforms named [`PROJECTION`], [`VIEW`] and [`PROJECTION_VIEW`] receive the camera,
//! model programs additionally receive the material uniforms.

use std::borrow::Cow;

use crate::{
    backend::{BlendMode, PipelineKind, ShaderDescriptor, UniformDecl, UniformType},
    data_structures::{
        instance::{ObjectInstance, QuadInstance},
        model::{ModelVertex, QuadVertex, Vertex},
    },
};

pub const PROJECTION: &str = "projection";
pub const VIEW: &str = "view";
pub const PROJECTION_VIEW: &str = "projection_view";

pub const DIFFUSE_COLOR: &str = "diffuse_color";
pub const SPECULAR_COLOR: &str = "specular_color";
pub const SHININESS: &str = "shininess";
pub const EMISSIVE_COLOR: &str = "emissive_color";
pub const OPACITY: &str = "opacity";

pub const DIFFUSE_UNIT: u32 = 0;
pub const SPECULAR_UNIT: u32 = 1;
pub const NORMAL_UNIT: u32 = 2;
pub const EMISSIVE_UNIT: u32 = 3;
pub const QUAD_TEXTURE_UNIT: u32 = 0;

/// Number of texture units a program of `kind` samples.
pub fn texture_units(kind: PipelineKind) -> u32 {
    match kind {
        PipelineKind::Model => 4,
        PipelineKind::Quad => 1,
    }
}

pub fn camera_uniforms() -> Vec<UniformDecl> {
    vec![
        UniformDecl::new(PROJECTION, UniformType::Mat4),
        UniformDecl::new(VIEW, UniformType::Mat4),
        UniformDecl::new(PROJECTION_VIEW, UniformType::Mat4),
    ]
}

pub fn model_shader() -> ShaderDescriptor {
    let mut uniforms = camera_uniforms();
    uniforms.extend([
        UniformDecl::new(DIFFUSE_COLOR, UniformType::Vec4),
        UniformDecl::new(SPECULAR_COLOR, UniformType::Vec3),
        UniformDecl::new(SHININESS, UniformType::Float),
        UniformDecl::new(EMISSIVE_COLOR, UniformType::Vec3),
        UniformDecl::new(OPACITY, UniformType::Float),
    ]);
    ShaderDescriptor {
        label: Cow::Borrowed("model"),
        kind: PipelineKind::Model,
        source: Cow::Borrowed(include_str!("model.wgsl")),
        uniforms,
        blend: BlendMode::Alpha,
    }
}

pub fn quad_shader() -> ShaderDescriptor {
    ShaderDescriptor {
        label: Cow::Borrowed("quad"),
        kind: PipelineKind::Quad,
        source: Cow::Borrowed(include_str!("quad.wgsl")),
        uniforms: camera_uniforms(),
        blend: BlendMode::Alpha,
    }
}

pub fn text_shader() -> ShaderDescriptor {
    ShaderDescriptor {
        label: Cow::Borrowed("text"),
        kind: PipelineKind::Quad,
        source: Cow::Borrowed(include_str!("text.wgsl")),
        uniforms: camera_uniforms(),
        blend: BlendMode::Alpha,
    }
}

/// Byte layout of a uniform block under WGSL's uniform address space rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformBlockLayout {
    /// Offset and type of every member, in declaration order.
    pub members: Vec<(u32, UniformType)>,
    /// Size of the whole block, at least 16 bytes.
    pub size: u32,
}

impl UniformBlockLayout {
    pub fn new(uniforms: &[UniformDecl]) -> Self {
        let mut offset: u32 = 0;
        let mut members = Vec::with_capacity(uniforms.len());
        for decl in uniforms {
            let (align, size) = align_and_size(decl.ty);
            offset = offset.next_multiple_of(align);
            members.push((offset, decl.ty));
            offset += size;
        }
        Self {
            members,
            size: offset.next_multiple_of(16).max(16),
        }
    }
}

fn align_and_size(ty: UniformType) -> (u32, u32) {
    match ty {
        UniformType::Float | UniformType::Int => (4, 4),
        UniformType::Vec2 => (8, 8),
        UniformType::Vec3 => (16, 12),
        UniformType::Vec4 => (16, 16),
        // Matrix columns are vectors aligned to 16 bytes.
        UniformType::Mat3 => (16, 48),
        UniformType::Mat4 => (16, 64),
    }
}

pub(crate) fn vertex_layouts(kind: PipelineKind) -> [wgpu::VertexBufferLayout<'static>; 2] {
    match kind {
        PipelineKind::Model => [ModelVertex::desc(), ObjectInstance::desc()],
        PipelineKind::Quad => [QuadVertex::desc(), QuadInstance::desc()],
    }
}

pub(crate) fn mk_uniform_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("uniform_bind_group_layout"),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: true,
                min_binding_size: None,
            },
            count: None,
        }],
    })
}

pub(crate) fn mk_texture_bind_group_layout(
    device: &wgpu::Device,
    kind: PipelineKind,
) -> wgpu::BindGroupLayout {
    let units = texture_units(kind);
    let mut entries: Vec<wgpu::BindGroupLayoutEntry> = (0..units)
        .map(|binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                multisampled: false,
                view_dimension: wgpu::TextureViewDimension::D2,
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
            },
            count: None,
        })
        .collect();
    entries.push(wgpu::BindGroupLayoutEntry {
        binding: units,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    });

    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(match kind {
            PipelineKind::Model => "model_texture_bind_group_layout",
            PipelineKind::Quad => "quad_texture_bind_group_layout",
        }),
        entries: &entries,
    })
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn mk_render_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    shader: &wgpu::ShaderModule,
    kind: PipelineKind,
    blend: BlendMode,
    color_format: wgpu::TextureFormat,
    depth_format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    let blend = match blend {
        BlendMode::Opaque => wgpu::BlendState::REPLACE,
        BlendMode::Alpha => wgpu::BlendState::ALPHA_BLENDING,
    };
    let (topology, cull_mode, depth_write_enabled, depth_compare) = match kind {
        PipelineKind::Model => (
            wgpu::PrimitiveTopology::TriangleList,
            Some(wgpu::Face::Back),
            true,
            wgpu::CompareFunction::Less,
        ),
        // 2D content is stacked by render order, and the pixel space camera flips Y.
        PipelineKind::Quad => (
            wgpu::PrimitiveTopology::TriangleStrip,
            None,
            false,
            wgpu::CompareFunction::Always,
        ),
    };
    let buffers = vertex_layouts(kind);

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            buffers: &buffers,
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: color_format,
                blend: Some(blend),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: depth_format,
            depth_write_enabled,
            depth_compare,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        multiview: None,
        cache: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_block_matches_wgsl_layout() {
        let layout = UniformBlockLayout::new(&model_shader().uniforms);
        let offsets: Vec<u32> = layout.members.iter().map(|(offset, _)| *offset).collect();
        // vec3 members leave room for a trailing scalar.
        assert_eq!(offsets, vec![0, 64, 128, 192, 208, 220, 224, 236]);
        assert_eq!(layout.size, 240);
    }

    #[test]
    fn scalars_pad_the_block_to_sixteen_bytes() {
        let layout = UniformBlockLayout::new(&[
            UniformDecl::new("time", UniformType::Float),
            UniformDecl::new("offset", UniformType::Vec2),
        ]);
        assert_eq!(layout.members, vec![(0, UniformType::Float), (8, UniformType::Vec2)]);
        assert_eq!(layout.size, 16);
        assert_eq!(UniformBlockLayout::new(&[]).size, 16);
    }

    #[test]
    fn mat3_occupies_three_padded_columns() {
        let layout = UniformBlockLayout::new(&[
            UniformDecl::new("a", UniformType::Mat3),
            UniformDecl::new("b", UniformType::Float),
        ]);
        assert_eq!(layout.members[1].0, 48);
        assert_eq!(layout.size, 64);
    }

    #[test]
    fn built_in_shaders_share_the_camera_block() {
        for descriptor in [model_shader(), quad_shader(), text_shader()] {
            assert_eq!(&descriptor.uniforms[..3], &camera_uniforms()[..]);
        }
    }
}
