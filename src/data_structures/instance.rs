//! Per-instance data for GPU rendering.
//!
//! Draw submissions are normalized into one of two canonical records that are uploaded
//! as-is to the instance buffer: [`QuadInstance`] for everything drawn on the shared unit
//! quad and [`ObjectInstance`] for model objects.

use cgmath::{Matrix, Matrix3, Matrix4, One, Rad, SquareMatrix, Vector2, Vector3};

use crate::data_structures::model::Vertex;

/// Linear RGBA tint colour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const WHITE: Color = Color::rgba(1.0, 1.0, 1.0, 1.0);
    pub const BLACK: Color = Color::rgba(0.0, 0.0, 0.0, 1.0);
    pub const TRANSPARENT: Color = Color::rgba(0.0, 0.0, 0.0, 0.0);

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self::rgba(r, g, b, 1.0)
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::WHITE
    }
}

impl From<[f32; 4]> for Color {
    fn from([r, g, b, a]: [f32; 4]) -> Self {
        Self { r, g, b, a }
    }
}

impl From<Color> for [f32; 4] {
    fn from(c: Color) -> Self {
        [c.r, c.g, c.b, c.a]
    }
}

/// A 3D placement: position, rotation (as quaternion), and scale.
#[derive(Clone, Debug, PartialEq)]
pub struct Transform {
    pub position: Vector3<f32>,
    pub rotation: cgmath::Quaternion<f32>,
    pub scale: Vector3<f32>,
}

impl Transform {
    /// The identity transformation (no move, rotate, or scale).
    pub fn new() -> Self {
        Self {
            position: Vector3::new(0.0, 0.0, 0.0),
            rotation: cgmath::Quaternion::one(),
            scale: Vector3::new(1.0, 1.0, 1.0),
        }
    }

    pub fn to_matrix(&self) -> Matrix4<f32> {
        Matrix4::from_translation(self.position)
            * Matrix4::from(self.rotation)
            * Matrix4::from_nonuniform_scale(self.scale.x, self.scale.y, self.scale.z)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vector3<f32>> for Transform {
    fn from(position: Vector3<f32>) -> Self {
        Transform {
            position,
            ..Default::default()
        }
    }
}

impl From<&Transform> for Matrix4<f32> {
    fn from(t: &Transform) -> Self {
        t.to_matrix()
    }
}

/// A 2D placement of a sized source (texture, sprite, rectangle) on the XY plane.
///
/// `origin` is the pivot in source pixels, measured from the source's top-left corner. The
/// source is moved so that its origin lands on `position`, then scaled and rotated around
/// it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform2D {
    pub position: Vector2<f32>,
    pub scale: Vector2<f32>,
    pub angle: Rad<f32>,
    pub origin: Vector2<f32>,
}

impl Transform2D {
    pub fn new() -> Self {
        Self {
            position: Vector2::new(0.0, 0.0),
            scale: Vector2::new(1.0, 1.0),
            angle: Rad(0.0),
            origin: Vector2::new(0.0, 0.0),
        }
    }

    pub fn at(x: f32, y: f32) -> Self {
        Self {
            position: Vector2::new(x, y),
            ..Self::new()
        }
    }

    /// The placement matrix without the source size, in source pixels.
    pub fn to_matrix(&self) -> Matrix4<f32> {
        Matrix4::from_translation(self.position.extend(0.0))
            * Matrix4::from_angle_z(self.angle)
            * Matrix4::from_nonuniform_scale(self.scale.x, self.scale.y, 1.0)
            * Matrix4::from_translation(-self.origin.extend(0.0))
    }

    /// The matrix mapping the unit quad onto a source of `size` pixels.
    pub fn to_quad_matrix(&self, size: Vector2<f32>) -> Matrix4<f32> {
        self.to_matrix() * Matrix4::from_nonuniform_scale(size.x, size.y, 1.0)
    }
}

impl Default for Transform2D {
    fn default() -> Self {
        Self::new()
    }
}

/// The GPU record of one quad: transform of the unit quad, the texture sub-rectangle in
/// normalized coordinates and a tint.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct QuadInstance {
    pub transform: [[f32; 4]; 4],
    pub tex_offset: [f32; 2],
    pub tex_scale: [f32; 2],
    pub color: [f32; 4],
}

impl QuadInstance {
    pub fn new(transform: Matrix4<f32>, tex_offset: [f32; 2], tex_scale: [f32; 2], color: Color) -> Self {
        Self {
            transform: transform.into(),
            tex_offset,
            tex_scale,
            color: color.into(),
        }
    }

    /// A quad sampling its whole texture.
    pub fn untextured(transform: Matrix4<f32>, color: Color) -> Self {
        Self::new(transform, [0.0, 0.0], [1.0, 1.0], color)
    }
}

impl Vertex for QuadInstance {
    fn desc() -> wgpu::VertexBufferLayout<'static> {
        const ATTRIBUTES: [wgpu::VertexAttribute; 7] = wgpu::vertex_attr_array![
            // A mat4 takes up 4 vertex slots as it is technically 4 vec4s.
            1 => Float32x4,
            2 => Float32x4,
            3 => Float32x4,
            4 => Float32x4,
            5 => Float32x2, // tex_offset
            6 => Float32x2, // tex_scale
            7 => Float32x4  // color
        ];
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadInstance>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &ATTRIBUTES,
        }
    }
}

/// The GPU record of one model object instance.
///
/// The normal matrix is the inverse transpose of the transform's upper 3x3, so that
/// non-uniform scales keep normals perpendicular to their surfaces.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ObjectInstance {
    pub transform: [[f32; 4]; 4],
    pub normal: [[f32; 3]; 3],
    pub color: [f32; 4],
}

impl ObjectInstance {
    pub fn new(transform: Matrix4<f32>, color: Color) -> Self {
        Self {
            transform: transform.into(),
            normal: normal_matrix(&transform).into(),
            color: color.into(),
        }
    }
}

pub fn normal_matrix(transform: &Matrix4<f32>) -> Matrix3<f32> {
    let upper = Matrix3::from_cols(
        transform.x.truncate(),
        transform.y.truncate(),
        transform.z.truncate(),
    );
    // Degenerate (zero scale) transforms keep their upper 3x3; nothing is visible anyway.
    upper.invert().map(|m| m.transpose()).unwrap_or(upper)
}

impl Vertex for ObjectInstance {
    fn desc() -> wgpu::VertexBufferLayout<'static> {
        const ATTRIBUTES: [wgpu::VertexAttribute; 8] = wgpu::vertex_attr_array![
            5 => Float32x4,
            6 => Float32x4,
            7 => Float32x4,
            8 => Float32x4,
            // The normal matrix is stored as three vec3 columns.
            9 => Float32x3,
            10 => Float32x3,
            11 => Float32x3,
            12 => Float32x4
        ];
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<ObjectInstance>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &ATTRIBUTES,
        }
    }
}
