//! Draw submission and batching.
//!
//! A [`RenderPass`] records everything one frame draws. Every [`Draw`] is normalized into
//! one of two canonical instance records, [`ObjectInstance`] for model objects and
//! [`QuadInstance`] for everything drawn on the shared unit quad, and appended to the
//! batch of its `(shader, resource)` pair.
//!
//! # Ordering
//!
//! Batches are kept sorted by [`BatchKey`]: the shader's order index first, then the
//! identity of the drawn resource, then the shader's identity. Within a batch instances
//! keep their submission order. Across batches the submission order does not matter, only
//! depth testing (3D) or order indices (2D) control which batch ends up on top.
//!
//! Consecutive draws with the same key land in the most recently used batch without a
//! search. Other draws binary search the sorted batch list and insert a new batch where
//! needed.
//!
//! # Key types
//!
//! - [`Draw<'a>`] is the sum of all submissions, built from [`ModelDraw`],
//!   [`TextureDraw`], [`RectangleDraw`], [`QuadDraw`], [`SpriteDraw`] and [`TextDraw`]
//! - [`ModelBatch<'a>`] and [`QuadBatch<'a>`] are what the renderer consumes

use std::cmp::Ordering;

use cgmath::{Matrix4, Vector2};

use crate::{
    backend::{PipelineKind, ProgramId, TextureId, VertexArrayId},
    data_structures::{
        font::{Font, ShapedGlyph},
        instance::{Color, ObjectInstance, QuadInstance, Transform2D},
        model::{Model, ModelObject},
        shader::Shader,
        sprite_atlas::{SpriteAtlas, SpriteId},
        texture::Texture,
    },
    renderer::Builtins,
};

/// Sort key of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchKey<R> {
    pub order_index: i32,
    pub resource: R,
    /// Separates shaders that share an order index and draw the same resource. Program
    /// handles are allocated monotonically, so this orders by shader creation.
    pub program: ProgramId,
}

impl<R: Copy> BatchKey<R> {
    pub fn new(shader: &Shader, resource: R) -> Self {
        Self {
            order_index: shader.order_index(),
            resource,
            program: shader.id(),
        }
    }
}

impl<R: Ord> Ord for BatchKey<R> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order_index
            .cmp(&other.order_index)
            .then_with(|| self.resource.cmp(&other.resource))
            .then_with(|| self.program.cmp(&other.program))
    }
}

impl<R: Ord> PartialOrd for BatchKey<R> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The instances of one model object drawn with one shader.
pub struct ModelBatch<'a> {
    key: BatchKey<VertexArrayId>,
    pub shader: &'a Shader,
    pub object: &'a ModelObject,
    pub instances: Vec<ObjectInstance>,
}

/// The instances of the unit quad drawn with one shader and one texture.
pub struct QuadBatch<'a> {
    key: BatchKey<TextureId>,
    pub shader: &'a Shader,
    pub texture: TextureId,
    pub instances: Vec<QuadInstance>,
}

trait Keyed {
    type Resource: Ord + Copy;
    fn key(&self) -> BatchKey<Self::Resource>;
}

impl Keyed for ModelBatch<'_> {
    type Resource = VertexArrayId;
    fn key(&self) -> BatchKey<VertexArrayId> {
        self.key
    }
}

impl Keyed for QuadBatch<'_> {
    type Resource = TextureId;
    fn key(&self) -> BatchKey<TextureId> {
        self.key
    }
}

impl ModelBatch<'_> {
    pub fn key(&self) -> BatchKey<VertexArrayId> {
        self.key
    }
}

impl QuadBatch<'_> {
    pub fn key(&self) -> BatchKey<TextureId> {
        self.key
    }
}

/// Index of the batch for `key`, created with `new` if missing.
fn batch_index<B: Keyed>(
    batches: &mut Vec<B>,
    key: BatchKey<B::Resource>,
    new: impl FnOnce() -> B,
) -> usize {
    match batches.last() {
        Some(last) if last.key() == key => batches.len() - 1,
        _ => match batches.binary_search_by(|batch| batch.key().cmp(&key)) {
            Ok(index) => index,
            Err(index) => {
                batches.insert(index, new());
                index
            }
        },
    }
}

/// A model drawn with one transform. Every object of the model becomes one instance in
/// its object's batch.
#[derive(Clone, Copy)]
pub struct ModelDraw<'a> {
    pub model: &'a Model,
    pub shader: Option<&'a Shader>,
    pub transform: Matrix4<f32>,
    pub color: Color,
}

impl<'a> ModelDraw<'a> {
    pub fn new(model: &'a Model) -> Self {
        Self {
            model,
            shader: None,
            transform: cgmath::SquareMatrix::identity(),
            color: Color::WHITE,
        }
    }

    pub fn transform(mut self, transform: impl Into<Matrix4<f32>>) -> Self {
        self.transform = transform.into();
        self
    }

    pub fn color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    pub fn shader(mut self, shader: &'a Shader) -> Self {
        self.shader = Some(shader);
        self
    }
}

/// A texture drawn at its pixel size, or a pixel region of it.
#[derive(Clone, Copy)]
pub struct TextureDraw<'a> {
    pub texture: &'a Texture,
    pub shader: Option<&'a Shader>,
    pub transform: Transform2D,
    pub color: Color,
    /// `[x, y, width, height]` in texture pixels; the whole texture if `None`.
    pub source: Option<[u32; 4]>,
}

impl<'a> TextureDraw<'a> {
    pub fn new(texture: &'a Texture) -> Self {
        Self {
            texture,
            shader: None,
            transform: Transform2D::new(),
            color: Color::WHITE,
            source: None,
        }
    }

    pub fn transform(mut self, transform: Transform2D) -> Self {
        self.transform = transform;
        self
    }

    pub fn color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    pub fn shader(mut self, shader: &'a Shader) -> Self {
        self.shader = Some(shader);
        self
    }

    pub fn source(mut self, x: u32, y: u32, width: u32, height: u32) -> Self {
        self.source = Some([x, y, width, height]);
        self
    }
}

/// A solid rectangle of `size` pixels.
#[derive(Clone, Copy)]
pub struct RectangleDraw<'a> {
    pub size: Vector2<f32>,
    pub shader: Option<&'a Shader>,
    pub transform: Transform2D,
    pub color: Color,
}

impl<'a> RectangleDraw<'a> {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            size: Vector2::new(width, height),
            shader: None,
            transform: Transform2D::new(),
            color: Color::WHITE,
        }
    }

    pub fn transform(mut self, transform: Transform2D) -> Self {
        self.transform = transform;
        self
    }

    pub fn color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    pub fn shader(mut self, shader: &'a Shader) -> Self {
        self.shader = Some(shader);
        self
    }
}

/// A ready-made quad instance, stored as given.
#[derive(Clone, Copy)]
pub struct QuadDraw<'a> {
    pub texture: &'a Texture,
    pub shader: Option<&'a Shader>,
    pub instance: QuadInstance,
}

impl<'a> QuadDraw<'a> {
    pub fn new(texture: &'a Texture, instance: QuadInstance) -> Self {
        Self {
            texture,
            shader: None,
            instance,
        }
    }

    pub fn shader(mut self, shader: &'a Shader) -> Self {
        self.shader = Some(shader);
        self
    }
}

/// One sprite of a sprite atlas, drawn at its pixel size.
#[derive(Clone, Copy)]
pub struct SpriteDraw<'a> {
    pub atlas: &'a SpriteAtlas,
    pub sprite: SpriteId,
    pub shader: Option<&'a Shader>,
    pub transform: Transform2D,
    pub color: Color,
}

impl<'a> SpriteDraw<'a> {
    pub fn new(atlas: &'a SpriteAtlas, sprite: SpriteId) -> Self {
        Self {
            atlas,
            sprite,
            shader: None,
            transform: Transform2D::new(),
            color: Color::WHITE,
        }
    }

    pub fn transform(mut self, transform: Transform2D) -> Self {
        self.transform = transform;
        self
    }

    pub fn color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    pub fn shader(mut self, shader: &'a Shader) -> Self {
        self.shader = Some(shader);
        self
    }
}

/// Shaped text. Glyph positions are pen positions relative to `transform`.
#[derive(Clone, Copy)]
pub struct TextDraw<'a> {
    pub font: &'a Font,
    pub glyphs: &'a [ShapedGlyph],
    pub shader: Option<&'a Shader>,
    pub transform: Transform2D,
    pub color: Color,
}

impl<'a> TextDraw<'a> {
    pub fn new(font: &'a Font, glyphs: &'a [ShapedGlyph]) -> Self {
        Self {
            font,
            glyphs,
            shader: None,
            transform: Transform2D::new(),
            color: Color::WHITE,
        }
    }

    pub fn transform(mut self, transform: Transform2D) -> Self {
        self.transform = transform;
        self
    }

    pub fn color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    pub fn shader(mut self, shader: &'a Shader) -> Self {
        self.shader = Some(shader);
        self
    }
}

/// Everything a [`RenderPass`] accepts.
pub enum Draw<'a> {
    Model(ModelDraw<'a>),
    Texture(TextureDraw<'a>),
    Rectangle(RectangleDraw<'a>),
    Quad(QuadDraw<'a>),
    Sprite(SpriteDraw<'a>),
    Text(TextDraw<'a>),
}

impl<'a> From<ModelDraw<'a>> for Draw<'a> {
    fn from(draw: ModelDraw<'a>) -> Self {
        Draw::Model(draw)
    }
}

impl<'a> From<TextureDraw<'a>> for Draw<'a> {
    fn from(draw: TextureDraw<'a>) -> Self {
        Draw::Texture(draw)
    }
}

impl<'a> From<RectangleDraw<'a>> for Draw<'a> {
    fn from(draw: RectangleDraw<'a>) -> Self {
        Draw::Rectangle(draw)
    }
}

impl<'a> From<QuadDraw<'a>> for Draw<'a> {
    fn from(draw: QuadDraw<'a>) -> Self {
        Draw::Quad(draw)
    }
}

impl<'a> From<SpriteDraw<'a>> for Draw<'a> {
    fn from(draw: SpriteDraw<'a>) -> Self {
        Draw::Sprite(draw)
    }
}

impl<'a> From<TextDraw<'a>> for Draw<'a> {
    fn from(draw: TextDraw<'a>) -> Self {
        Draw::Text(draw)
    }
}

/// The draws of one frame, grouped into sorted batches.
///
/// A pass is recorded, handed to [`Renderer::render`](crate::renderer::Renderer::render)
/// and then [`reset`](Self::reset) for the next frame. Everything it references is
/// borrowed until then.
pub struct RenderPass<'a> {
    builtins: &'a Builtins,
    models: Vec<ModelBatch<'a>>,
    quads: Vec<QuadBatch<'a>>,
    // Instance storage of reset batches, reused by new batches.
    spare_objects: Vec<Vec<ObjectInstance>>,
    spare_quads: Vec<Vec<QuadInstance>>,
}

impl<'a> RenderPass<'a> {
    pub fn new(builtins: &'a Builtins) -> Self {
        Self {
            builtins,
            models: Vec::new(),
            quads: Vec::new(),
            spare_objects: Vec::new(),
            spare_quads: Vec::new(),
        }
    }

    pub fn draw(&mut self, draw: impl Into<Draw<'a>>) {
        match draw.into() {
            Draw::Model(draw) => self.draw_model(draw),
            Draw::Texture(draw) => self.draw_texture(draw),
            Draw::Rectangle(draw) => self.draw_rectangle(draw),
            Draw::Quad(draw) => {
                let shader = draw.shader.unwrap_or(self.builtins.quad_shader());
                self.push_quad(shader, draw.texture.id(), draw.instance);
            }
            Draw::Sprite(draw) => self.draw_sprite(draw),
            Draw::Text(draw) => self.draw_text(draw),
        }
    }

    fn draw_model(&mut self, draw: ModelDraw<'a>) {
        let shader = draw.shader.unwrap_or(self.builtins.model_shader());
        let instance = ObjectInstance::new(draw.transform, draw.color);
        for object in &draw.model.objects {
            self.push_object(shader, object, instance);
        }
    }

    fn draw_texture(&mut self, draw: TextureDraw<'a>) {
        let shader = draw.shader.unwrap_or(self.builtins.quad_shader());
        let [width, height] = draw.texture.size();
        let [x, y, w, h] = draw.source.unwrap_or([0, 0, width, height]);
        let (width, height) = (width as f32, height as f32);
        let instance = QuadInstance::new(
            draw.transform.to_quad_matrix(Vector2::new(w as f32, h as f32)),
            [x as f32 / width, y as f32 / height],
            [w as f32 / width, h as f32 / height],
            draw.color,
        );
        self.push_quad(shader, draw.texture.id(), instance);
    }

    fn draw_rectangle(&mut self, draw: RectangleDraw<'a>) {
        let shader = draw.shader.unwrap_or(self.builtins.quad_shader());
        let instance = QuadInstance::untextured(draw.transform.to_quad_matrix(draw.size), draw.color);
        self.push_quad(shader, self.builtins.white().id(), instance);
    }

    fn draw_sprite(&mut self, draw: SpriteDraw<'a>) {
        let Some(rect) = draw.atlas.sprite(draw.sprite) else {
            log::warn!("Sprite {:?} is not part of its atlas, draw skipped", draw.sprite);
            return;
        };
        let shader = draw.shader.unwrap_or(self.builtins.quad_shader());
        let (tex_offset, tex_scale) = rect.tex_coords(draw.atlas.resolution());
        let size = Vector2::new(rect.width as f32, rect.height as f32);
        let instance = QuadInstance::new(
            draw.transform.to_quad_matrix(size),
            tex_offset,
            tex_scale,
            draw.color,
        );
        self.push_quad(shader, draw.atlas.texture_id(), instance);
    }

    fn draw_text(&mut self, draw: TextDraw<'a>) {
        let shader = draw.shader.unwrap_or(self.builtins.text_shader());
        let texture = draw.font.texture_id();
        let resolution = draw.font.resolution();
        let base = draw.transform.to_matrix();

        for shaped in draw.glyphs {
            let Some(glyph) = draw.font.glyph(shaped.id) else {
                log::debug!("Glyph {} missing from font `{}`", shaped.id, draw.font.name());
                continue;
            };
            if glyph.rect.is_empty() {
                continue;
            }
            let origin = shaped.position + glyph.bearing;
            let transform = base
                * Matrix4::from_translation(origin.extend(0.0))
                * Matrix4::from_nonuniform_scale(glyph.rect.width as f32, glyph.rect.height as f32, 1.0);
            let (tex_offset, tex_scale) = glyph.rect.tex_coords(resolution);
            self.push_quad(
                shader,
                texture,
                QuadInstance::new(transform, tex_offset, tex_scale, draw.color),
            );
        }
    }

    fn push_object(&mut self, shader: &'a Shader, object: &'a ModelObject, instance: ObjectInstance) {
        debug_assert_eq!(
            shader.kind(),
            PipelineKind::Model,
            "shader `{}` cannot draw models",
            shader.label()
        );
        let key = BatchKey::new(shader, object.mesh.vertex_array());
        let spare = &mut self.spare_objects;
        let index = batch_index(&mut self.models, key, || ModelBatch {
            key,
            shader,
            object,
            instances: spare.pop().unwrap_or_default(),
        });
        self.models[index].instances.push(instance);
    }

    fn push_quad(&mut self, shader: &'a Shader, texture: TextureId, instance: QuadInstance) {
        debug_assert_eq!(
            shader.kind(),
            PipelineKind::Quad,
            "shader `{}` cannot draw quads",
            shader.label()
        );
        let key = BatchKey::new(shader, texture);
        let spare = &mut self.spare_quads;
        let index = batch_index(&mut self.quads, key, || QuadBatch {
            key,
            shader,
            texture,
            instances: spare.pop().unwrap_or_default(),
        });
        self.quads[index].instances.push(instance);
    }

    /// Drops all batches, keeping their storage for the next frame.
    pub fn reset(&mut self) {
        for mut batch in self.models.drain(..) {
            batch.instances.clear();
            self.spare_objects.push(batch.instances);
        }
        for mut batch in self.quads.drain(..) {
            batch.instances.clear();
            self.spare_quads.push(batch.instances);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty() && self.quads.is_empty()
    }

    /// Model batches in render order.
    pub fn model_batches(&self) -> &[ModelBatch<'a>] {
        &self.models
    }

    /// Quad batches in render order.
    pub fn quad_batches(&self) -> &[QuadBatch<'a>] {
        &self.quads
    }

    pub fn instance_count(&self) -> usize {
        self.models.iter().map(|b| b.instances.len()).sum::<usize>()
            + self.quads.iter().map(|b| b.instances.len()).sum::<usize>()
    }

    pub fn builtins(&self) -> &'a Builtins {
        self.builtins
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(order_index: i32, resource: u32, program: u32) -> BatchKey<TextureId> {
        BatchKey {
            order_index,
            resource: TextureId(resource),
            program: ProgramId(program),
        }
    }

    #[test]
    fn order_index_dominates_resource() {
        assert!(key(0, 9, 9) < key(1, 0, 0));
        assert!(key(-1, 5, 0) < key(0, 1, 0));
    }

    #[test]
    fn program_breaks_ties() {
        assert!(key(0, 3, 1) < key(0, 3, 2));
        assert_eq!(key(0, 3, 1).cmp(&key(0, 3, 1)), Ordering::Equal);
    }
}
