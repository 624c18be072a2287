//! Executes recorded render passes.
//!
//! The [`Renderer`] walks the sorted batches of a [`RenderPass`] and issues the minimal
//! sequence of backend state changes: a shader is bound (and the camera uploaded) only
//! when it changes, quad textures are rebound only when they change and every batch is
//! one instanced draw call.

use anyhow::{Context, Result};

use crate::{
    backend::{DrawCall, Gpu, ProgramId, TextureId, UniformValue},
    camera::{Camera, Viewport},
    config::RendererConfig,
    data_structures::{
        font::Font,
        framebuffer::Framebuffer,
        instance::Color,
        model::{Material, Mesh},
        shader::Shader,
        sprite_atlas::SpriteAtlas,
        texture::Texture,
    },
    pipelines,
    render::RenderPass,
};

/// Order index of the built-in model and quad shaders.
pub const DEFAULT_ORDER_INDEX: i32 = 0;
/// Order index of the built-in text shader, so that text is drawn over default quads.
pub const TEXT_ORDER_INDEX: i32 = 1;

/// Resources the renderer owns for its whole lifetime: fallback textures for absent
/// material slots, the default shaders and the shared unit quad.
#[derive(Debug)]
pub struct Builtins {
    white: Texture,
    gray: Texture,
    default_normal: Texture,
    transparent: Texture,
    model_shader: Shader,
    quad_shader: Shader,
    text_shader: Shader,
    unit_quad: Mesh,
}

impl Builtins {
    pub fn new(gpu: &Gpu) -> Result<Self> {
        Ok(Self {
            white: Texture::solid(gpu, "white", [255, 255, 255, 255])?,
            gray: Texture::solid(gpu, "gray", [128, 128, 128, 255])?,
            default_normal: Texture::default_normal_map(gpu)?,
            transparent: Texture::solid(gpu, "transparent", [0, 0, 0, 0])?,
            model_shader: Shader::new(gpu, &pipelines::model_shader(), DEFAULT_ORDER_INDEX)?,
            quad_shader: Shader::new(gpu, &pipelines::quad_shader(), DEFAULT_ORDER_INDEX)?,
            text_shader: Shader::new(gpu, &pipelines::text_shader(), TEXT_ORDER_INDEX)?,
            unit_quad: Mesh::unit_quad(gpu)?,
        })
    }

    /// Fallback diffuse texture, also the texture of rectangles.
    pub fn white(&self) -> &Texture {
        &self.white
    }

    /// Fallback specular texture.
    pub fn gray(&self) -> &Texture {
        &self.gray
    }

    pub fn default_normal(&self) -> &Texture {
        &self.default_normal
    }

    /// Fallback emissive texture.
    pub fn transparent(&self) -> &Texture {
        &self.transparent
    }

    pub fn model_shader(&self) -> &Shader {
        &self.model_shader
    }

    pub fn quad_shader(&self) -> &Shader {
        &self.quad_shader
    }

    pub fn text_shader(&self) -> &Shader {
        &self.text_shader
    }

    pub fn unit_quad(&self) -> &Mesh {
        &self.unit_quad
    }

    /// The textures bound for `material`, in texture unit order.
    fn material_textures<'m>(&'m self, material: &'m Material) -> [(u32, &'m Texture); 4] {
        [
            (
                pipelines::DIFFUSE_UNIT,
                material.diffuse_texture.as_ref().unwrap_or(&self.white),
            ),
            (
                pipelines::SPECULAR_UNIT,
                material.specular_texture.as_ref().unwrap_or(&self.gray),
            ),
            (
                pipelines::NORMAL_UNIT,
                material.normal_texture.as_ref().unwrap_or(&self.default_normal),
            ),
            (
                pipelines::EMISSIVE_UNIT,
                material.emissive_texture.as_ref().unwrap_or(&self.transparent),
            ),
        ]
    }
}

/// What one [`Renderer::render`] call issued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub draw_calls: u32,
    pub shader_binds: u32,
    pub texture_binds: u32,
    pub instances: u32,
}

pub struct Renderer {
    gpu: Gpu,
    config: RendererConfig,
    builtins: Builtins,
}

impl Renderer {
    pub fn new(gpu: &Gpu) -> Result<Self> {
        Self::with_config(gpu, RendererConfig::default())
    }

    pub fn with_config(gpu: &Gpu, config: RendererConfig) -> Result<Self> {
        let builtins = Builtins::new(gpu).context("Creating renderer resources")?;
        log::info!("Renderer ready");
        Ok(Self {
            gpu: gpu.clone(),
            config,
            builtins,
        })
    }

    /// Opens an empty pass that falls back to this renderer's default shaders.
    pub fn begin_pass(&self) -> RenderPass<'_> {
        RenderPass::new(&self.builtins)
    }

    pub fn builtins(&self) -> &Builtins {
        &self.builtins
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn gpu(&self) -> &Gpu {
        &self.gpu
    }

    /// An empty glyph cache using the configured atlas parameters.
    pub fn create_font(&self, name: &str) -> Result<Font> {
        Font::with_config(&self.gpu, name, self.config.atlas)
    }

    pub fn create_sprite_atlas(&self, label: &str) -> Result<SpriteAtlas> {
        SpriteAtlas::with_config(&self.gpu, label, self.config.atlas)
    }

    /// Clears colour and depth of `framebuffer`.
    pub fn clear(&self, framebuffer: &Framebuffer, color: Color) {
        self.gpu.bind_framebuffer(framebuffer.id());
        self.gpu.clear(color.into());
        self.gpu.flush();
    }

    /// Clears `framebuffer` with the configured clear colour.
    pub fn clear_default(&self, framebuffer: &Framebuffer) {
        self.clear(framebuffer, self.config.clear_color);
    }

    /// Draws all batches of `pass` into `framebuffer`, model batches first, quads on top.
    pub fn render(
        &self,
        framebuffer: &Framebuffer,
        pass: &RenderPass,
        viewport: Viewport,
        camera: &Camera,
    ) -> RenderStats {
        let gpu = &self.gpu;
        let mut stats = RenderStats::default();
        gpu.bind_framebuffer(framebuffer.id());
        gpu.set_viewport(viewport);

        let mut bound_shader: Option<ProgramId> = None;
        for batch in pass.model_batches() {
            let shader = batch.shader;
            if bound_shader != Some(shader.id()) {
                self.bind_shader(shader, camera);
                bound_shader = Some(shader.id());
                stats.shader_binds += 1;
            }

            let material = &batch.object.material;
            for (unit, texture) in self.builtins.material_textures(material) {
                gpu.bind_texture(unit, texture.id());
                stats.texture_binds += 1;
            }
            upload_material(gpu, shader, material);

            let mesh = &batch.object.mesh;
            let instance_count = batch.instances.len() as u32;
            gpu.bind_vertex_array(mesh.vertex_array());
            gpu.upload_instances(bytemuck::cast_slice(&batch.instances));
            gpu.draw(DrawCall::Indexed {
                index_count: mesh.index_count(),
                instance_count,
            });
            stats.draw_calls += 1;
            stats.instances += instance_count;
        }

        if !pass.quad_batches().is_empty() {
            let unit_quad = self.builtins.unit_quad();
            gpu.bind_vertex_array(unit_quad.vertex_array());

            let mut bound_shader: Option<ProgramId> = None;
            let mut bound_texture: Option<TextureId> = None;
            for batch in pass.quad_batches() {
                if bound_shader != Some(batch.shader.id()) {
                    self.bind_shader(batch.shader, camera);
                    bound_shader = Some(batch.shader.id());
                    stats.shader_binds += 1;
                }
                if bound_texture != Some(batch.texture) {
                    gpu.bind_texture(pipelines::QUAD_TEXTURE_UNIT, batch.texture);
                    bound_texture = Some(batch.texture);
                    stats.texture_binds += 1;
                }

                let instance_count = batch.instances.len() as u32;
                gpu.upload_instances(bytemuck::cast_slice(&batch.instances));
                gpu.draw(DrawCall::Strip {
                    vertex_count: unit_quad.vertex_count(),
                    instance_count,
                });
                stats.draw_calls += 1;
                stats.instances += instance_count;
            }
        }

        gpu.flush();
        log::debug!("Rendered {stats:?}");
        stats
    }

    /// Binds `shader`, drains its pending uniform writes and uploads the camera.
    fn bind_shader(&self, shader: &Shader, camera: &Camera) {
        self.gpu.use_program(shader.id());
        shader.flush_uniforms();
        let camera_uniforms = [
            (pipelines::PROJECTION, camera.projection),
            (pipelines::VIEW, camera.view),
            (pipelines::PROJECTION_VIEW, camera.projection_view()),
        ];
        for (name, matrix) in camera_uniforms {
            if let Some(location) = shader.location(name) {
                self.gpu.upload_uniform(shader.id(), location, matrix.into());
            }
        }
    }
}

fn upload_material(gpu: &Gpu, shader: &Shader, material: &Material) {
    let values: [(&str, UniformValue); 5] = [
        (pipelines::DIFFUSE_COLOR, <[f32; 4]>::from(material.diffuse_color).into()),
        (pipelines::SPECULAR_COLOR, material.specular_color.into()),
        (pipelines::SHININESS, material.shininess.into()),
        (pipelines::EMISSIVE_COLOR, material.emissive_color.into()),
        (pipelines::OPACITY, material.opacity.into()),
    ];
    for (name, value) in values {
        if let Some(location) = shader.location(name) {
            gpu.upload_uniform(shader.id(), location, value);
        }
    }
}
