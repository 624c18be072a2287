//! Meshes, materials and models.
//!
//! A [`Model`] is a list of objects, each pairing one [`Mesh`] with one [`Material`]. The
//! renderer draws every object of a model as its own batch, so instances of the same
//! object across a frame share one instanced draw call. Loading models from files is the
//! job of the application; this module only turns vertex data into GPU resources.

use std::fmt;

use anyhow::{Context, Result};

use crate::{
    backend::{Gpu, PipelineKind, VertexArrayId},
    data_structures::{instance::Color, texture::Texture},
};

/// Types that describe their own vertex buffer layout.
pub trait Vertex {
    fn desc() -> wgpu::VertexBufferLayout<'static>;
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ModelVertex {
    pub position: [f32; 3],
    pub tex_coords: [f32; 2],
    pub normal: [f32; 3],
    pub tangent: [f32; 3],
    pub bitangent: [f32; 3],
}

impl Vertex for ModelVertex {
    fn desc() -> wgpu::VertexBufferLayout<'static> {
        const ATTRIBUTES: [wgpu::VertexAttribute; 5] = wgpu::vertex_attr_array![
            0 => Float32x3, // position
            1 => Float32x2, // tex_coords
            2 => Float32x3, // normal
            3 => Float32x3, // tangent
            4 => Float32x3  // bitangent
        ];
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<ModelVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &ATTRIBUTES,
        }
    }
}

/// Corner of the shared unit quad, 0..1 on both axes.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 2],
}

impl Vertex for QuadVertex {
    fn desc() -> wgpu::VertexBufferLayout<'static> {
        const ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x2];
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &ATTRIBUTES,
        }
    }
}

/// The unit quad as a 4 vertex triangle strip.
pub const UNIT_QUAD: [QuadVertex; 4] = [
    QuadVertex { position: [0.0, 0.0] },
    QuadVertex { position: [1.0, 0.0] },
    QuadVertex { position: [0.0, 1.0] },
    QuadVertex { position: [1.0, 1.0] },
];

/// CPU side mesh data, indexed triangle list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<ModelVertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(vertices: Vec<ModelVertex>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    /// Derives tangents and bitangents from positions and texture coordinates.
    ///
    /// Each triangle contributes its tangent space to its three vertices, the results are
    /// averaged per vertex. Triangles with degenerate texture coordinates are skipped.
    pub fn compute_tangents(&mut self) {
        let vertices = &mut self.vertices;
        for v in vertices.iter_mut() {
            v.tangent = [0.0; 3];
            v.bitangent = [0.0; 3];
        }
        let mut triangles_included = vec![0u32; vertices.len()];

        for c in self.indices.chunks_exact(3) {
            let [i0, i1, i2] = [c[0] as usize, c[1] as usize, c[2] as usize];
            if i0 >= vertices.len() || i1 >= vertices.len() || i2 >= vertices.len() {
                log::warn!("Mesh index out of range, triangle {c:?} skipped");
                continue;
            }
            let (v0, v1, v2) = (vertices[i0], vertices[i1], vertices[i2]);

            let pos0: cgmath::Vector3<f32> = v0.position.into();
            let pos1: cgmath::Vector3<f32> = v1.position.into();
            let pos2: cgmath::Vector3<f32> = v2.position.into();

            let uv0: cgmath::Vector2<f32> = v0.tex_coords.into();
            let uv1: cgmath::Vector2<f32> = v1.tex_coords.into();
            let uv2: cgmath::Vector2<f32> = v2.tex_coords.into();

            let delta_pos1 = pos1 - pos0;
            let delta_pos2 = pos2 - pos0;
            let delta_uv1 = uv1 - uv0;
            let delta_uv2 = uv2 - uv0;

            // Solves
            //     delta_pos1 = delta_uv1.x * T + delta_uv1.y * B
            //     delta_pos2 = delta_uv2.x * T + delta_uv2.y * B
            let det = delta_uv1.x * delta_uv2.y - delta_uv1.y * delta_uv2.x;
            if det.abs() <= f32::EPSILON {
                continue;
            }
            let r = 1.0 / det;
            let tangent = (delta_pos1 * delta_uv2.y - delta_pos2 * delta_uv1.y) * r;
            // Flipped for right-handed normal maps with wgpu's texture coordinate system.
            let bitangent = (delta_pos2 * delta_uv1.x - delta_pos1 * delta_uv2.x) * -r;

            for i in [i0, i1, i2] {
                let v = &mut vertices[i];
                v.tangent = (tangent + cgmath::Vector3::from(v.tangent)).into();
                v.bitangent = (bitangent + cgmath::Vector3::from(v.bitangent)).into();
                triangles_included[i] += 1;
            }
        }

        for (v, n) in vertices.iter_mut().zip(triangles_included) {
            if n == 0 {
                continue;
            }
            let denom = 1.0 / n as f32;
            v.tangent = (cgmath::Vector3::from(v.tangent) * denom).into();
            v.bitangent = (cgmath::Vector3::from(v.bitangent) * denom).into();
        }
    }
}

/// A GPU resident mesh.
pub struct Mesh {
    gpu: Gpu,
    vertex_array: VertexArrayId,
    vertex_count: u32,
    index_count: u32,
}

impl Mesh {
    pub fn new(gpu: &Gpu, label: &str, data: &MeshData) -> Result<Self> {
        let vertex_array = gpu
            .create_vertex_array(
                PipelineKind::Model,
                bytemuck::cast_slice(&data.vertices),
                Some(&data.indices),
            )
            .with_context(|| format!("Creating mesh `{label}`"))?;

        Ok(Self {
            gpu: gpu.clone(),
            vertex_array,
            vertex_count: data.vertices.len() as u32,
            index_count: data.indices.len() as u32,
        })
    }

    /// The shared unit quad all quad batches are drawn with, a non-indexed strip.
    pub fn unit_quad(gpu: &Gpu) -> Result<Self> {
        let vertex_array = gpu
            .create_vertex_array(PipelineKind::Quad, bytemuck::cast_slice(&UNIT_QUAD), None)
            .context("Creating unit quad")?;
        Ok(Self {
            gpu: gpu.clone(),
            vertex_array,
            vertex_count: UNIT_QUAD.len() as u32,
            index_count: 0,
        })
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn vertex_array(&self) -> VertexArrayId {
        self.vertex_array
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

impl fmt::Debug for Mesh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mesh")
            .field("vertex_array", &self.vertex_array)
            .field("vertex_count", &self.vertex_count)
            .field("index_count", &self.index_count)
            .finish()
    }
}

impl Drop for Mesh {
    fn drop(&mut self) {
        self.gpu.delete_vertex_array(self.vertex_array);
    }
}

/// Surface description of a model object.
///
/// Absent texture slots are substituted by the renderer's fallback textures: white for
/// diffuse, gray for specular, a flat normal map for normal and transparent black for
/// emissive.
#[derive(Debug)]
pub struct Material {
    pub name: String,
    pub diffuse_texture: Option<Texture>,
    pub specular_texture: Option<Texture>,
    pub normal_texture: Option<Texture>,
    pub emissive_texture: Option<Texture>,
    pub diffuse_color: Color,
    pub specular_color: [f32; 3],
    pub shininess: f32,
    pub emissive_color: [f32; 3],
    pub opacity: f32,
}

impl Material {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            diffuse_texture: None,
            specular_texture: None,
            normal_texture: None,
            emissive_texture: None,
            diffuse_color: Color::WHITE,
            specular_color: [0.5, 0.5, 0.5],
            shininess: 32.0,
            emissive_color: [0.0, 0.0, 0.0],
            opacity: 1.0,
        }
    }
}

impl Default for Material {
    fn default() -> Self {
        Self::new("default")
    }
}

#[derive(Debug)]
pub struct ModelObject {
    pub mesh: Mesh,
    pub material: Material,
}

#[derive(Debug, Default)]
pub struct Model {
    pub objects: Vec<ModelObject>,
}

impl Model {
    pub fn new(objects: Vec<ModelObject>) -> Self {
        Self { objects }
    }

    /// Uploads all meshes and pairs them with their materials.
    pub fn from_meshes(gpu: &Gpu, label: &str, parts: Vec<(MeshData, Material)>) -> Result<Self> {
        let objects = parts
            .into_iter()
            .enumerate()
            .map(|(i, (data, material))| {
                let mesh = Mesh::new(gpu, &format!("{label}[{i}]"), &data)?;
                Ok(ModelObject { mesh, material })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { objects })
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn vertex(position: [f32; 3], tex_coords: [f32; 2]) -> ModelVertex {
        ModelVertex {
            position,
            tex_coords,
            normal: [0.0, 0.0, 1.0],
            ..Default::default()
        }
    }

    #[test]
    fn tangents_follow_texture_u_axis() {
        let mut data = MeshData::new(
            vec![
                vertex([0.0, 0.0, 0.0], [0.0, 0.0]),
                vertex([1.0, 0.0, 0.0], [1.0, 0.0]),
                vertex([0.0, 1.0, 0.0], [0.0, 1.0]),
            ],
            vec![0, 1, 2],
        );
        data.compute_tangents();

        for v in &data.vertices {
            assert_relative_eq!(v.tangent[0], 1.0);
            assert_relative_eq!(v.tangent[1], 0.0);
            assert_relative_eq!(v.bitangent[1], -1.0);
        }
    }

    #[test]
    fn degenerate_uvs_leave_tangents_zero() {
        let mut data = MeshData::new(
            vec![
                vertex([0.0, 0.0, 0.0], [0.5, 0.5]),
                vertex([1.0, 0.0, 0.0], [0.5, 0.5]),
                vertex([0.0, 1.0, 0.0], [0.5, 0.5]),
            ],
            vec![0, 1, 2],
        );
        data.compute_tangents();
        assert!(data.vertices.iter().all(|v| v.tangent == [0.0; 3]));
    }
}
