//! Camera and viewport types consumed by the renderer.
//!
//! The renderer only needs the projection and view matrices of a camera; how an
//! application moves its camera is outside of this crate.

use cgmath::{Matrix4, Point3, Rad, Vector2, Vector3};

/// wgpu's normalized device coordinates have Z in 0..1, cgmath builds OpenGL style -1..1.
#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

/// A pixel rectangle of the render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub position: Vector2<u32>,
    pub size: Vector2<u32>,
}

impl Viewport {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            position: Vector2::new(x, y),
            size: Vector2::new(width, height),
        }
    }

    /// A viewport covering a whole target of the given size.
    pub fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn aspect(&self) -> f32 {
        self.size.x as f32 / self.size.y.max(1) as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub projection: Matrix4<f32>,
    pub view: Matrix4<f32>,
}

impl Camera {
    pub fn new(projection: Matrix4<f32>, view: Matrix4<f32>) -> Self {
        Self { projection, view }
    }

    /// A right-handed perspective camera looking from `eye` at `target` with +Y up.
    pub fn perspective(
        eye: Point3<f32>,
        target: Point3<f32>,
        fovy: impl Into<Rad<f32>>,
        aspect: f32,
        znear: f32,
        zfar: f32,
    ) -> Self {
        let projection = OPENGL_TO_WGPU_MATRIX * cgmath::perspective(fovy, aspect, znear, zfar);
        let view = Matrix4::look_at_rh(eye, target, Vector3::unit_y());
        Self { projection, view }
    }

    /// A pixel-space camera: origin at the top-left corner, +Y pointing down, one unit per
    /// pixel. This is what 2D quads, sprites and text are usually drawn with.
    pub fn orthographic(width: f32, height: f32) -> Self {
        let projection = OPENGL_TO_WGPU_MATRIX * cgmath::ortho(0.0, width, height, 0.0, -1.0, 1.0);
        Self {
            projection,
            view: cgmath::SquareMatrix::identity(),
        }
    }

    pub fn projection_view(&self) -> Matrix4<f32> {
        self.projection * self.view
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use cgmath::Vector4;

    use super::*;

    #[test]
    fn orthographic_maps_pixel_corners_to_ndc() {
        let camera = Camera::orthographic(200.0, 100.0);
        let m = camera.projection_view();

        let top_left = m * Vector4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(top_left.x, -1.0);
        assert_relative_eq!(top_left.y, 1.0);

        let bottom_right = m * Vector4::new(200.0, 100.0, 0.0, 1.0);
        assert_relative_eq!(bottom_right.x, 1.0);
        assert_relative_eq!(bottom_right.y, -1.0);
        assert_relative_eq!(bottom_right.z, 0.5);
    }

    #[test]
    fn aspect_tolerates_zero_height() {
        assert_relative_eq!(Viewport::from_size(16, 0).aspect(), 16.0);
        assert_relative_eq!(Viewport::from_size(16, 8).aspect(), 2.0);
    }
}
