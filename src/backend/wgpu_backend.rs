//! [`Backend`] implementation on top of wgpu.
//!
//! wgpu has no global binding state, so the command entry points only update a shadow of
//! the bound state and record draws. Every draw snapshots its program's uniform block into
//! a per-frame uniform arena (addressed through a dynamic offset) and references a range of
//! the per-frame instance arena. [`flush`](Backend::flush) uploads both arenas once and
//! replays the recorded draws into render passes.

use std::{
    cell::RefCell,
    collections::HashMap,
    num::NonZeroU64,
    ops::Range,
};

use anyhow::{Context, anyhow};
use futures::executor::block_on;
use wgpu::util::DeviceExt;

use crate::{
    backend::{
        Backend, ChannelFormat, DrawCall, Filter, FramebufferId, GpuError, PipelineKind,
        ProgramId, ShaderDescriptor, TextureDescriptor, TextureId, TextureRegion,
        UniformLocation, UniformValue, VertexArrayId,
    },
    camera::Viewport,
    pipelines::{self, UniformBlockLayout},
};

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

const MAX_TEXTURE_UNITS: usize = 4;
const MIN_ARENA_SIZE: u64 = 1024;
/// Vertex buffer offsets must be multiples of four bytes.
const INSTANCE_ALIGNMENT: u64 = 4;

type TextureSet = [Option<TextureId>; MAX_TEXTURE_UNITS];

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    sampler: wgpu::Sampler,
    size: [u32; 2],
    format: ChannelFormat,
    filter: Filter,
    label: String,
}

struct Program {
    kind: PipelineKind,
    pipeline: wgpu::RenderPipeline,
    layout: UniformBlockLayout,
    names: HashMap<String, UniformLocation>,
    block: Vec<u8>,
}

struct VertexArray {
    vertices: wgpu::Buffer,
    indices: Option<wgpu::Buffer>,
}

struct Target {
    color: wgpu::TextureView,
    depth: wgpu::TextureView,
    size: [u32; 2],
    /// The depth attachment has not been cleared since it was created.
    depth_fresh: bool,
}

struct OffscreenTarget {
    color: wgpu::Texture,
    target: Target,
}

#[derive(Default)]
struct BoundState {
    framebuffer: Option<FramebufferId>,
    viewport: Option<Viewport>,
    program: Option<ProgramId>,
    textures: TextureSet,
    vertex_array: Option<VertexArrayId>,
    instances: Option<Range<u64>>,
}

struct RecordedDraw {
    program: ProgramId,
    kind: PipelineKind,
    vertex_array: VertexArrayId,
    textures: TextureSet,
    uniform_offset: u32,
    uniform_size: u64,
    instances: Range<u64>,
    viewport: Option<Viewport>,
    call: DrawCall,
}

struct RecordedPass {
    target: Option<FramebufferId>,
    clear: Option<[f32; 4]>,
    draws: Vec<RecordedDraw>,
}

/// A GPU buffer that is refilled every frame and grows to the next power of two when the
/// frame's data no longer fits.
struct Arena {
    label: &'static str,
    usage: wgpu::BufferUsages,
    buffer: wgpu::Buffer,
    capacity: u64,
    data: Vec<u8>,
}

impl Arena {
    fn new(device: &wgpu::Device, label: &'static str, usage: wgpu::BufferUsages) -> Self {
        let usage = usage | wgpu::BufferUsages::COPY_DST;
        Self {
            label,
            usage,
            buffer: Self::allocate(device, label, usage, MIN_ARENA_SIZE),
            capacity: MIN_ARENA_SIZE,
            data: Vec::new(),
        }
    }

    fn allocate(
        device: &wgpu::Device,
        label: &'static str,
        usage: wgpu::BufferUsages,
        size: u64,
    ) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        })
    }

    /// Appends `bytes` at the next multiple of `align` and returns their range.
    fn push(&mut self, bytes: &[u8], align: u64) -> Range<u64> {
        let start = (self.data.len() as u64).next_multiple_of(align);
        self.data.resize(start as usize, 0);
        self.data.extend_from_slice(bytes);
        start..self.data.len() as u64
    }

    /// Uploads the frame's data. Returns `true` if the buffer was reallocated.
    fn upload(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) -> bool {
        let len = (self.data.len() as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        self.data.resize(len as usize, 0);
        let mut reallocated = false;
        if len > self.capacity {
            self.capacity = len.next_power_of_two();
            self.buffer = Self::allocate(device, self.label, self.usage, self.capacity);
            log::debug!("{} grown to {} bytes", self.label, self.capacity);
            reallocated = true;
        }
        if len > 0 {
            queue.write_buffer(&self.buffer, 0, &self.data);
        }
        reallocated
    }
}

struct Inner {
    next_id: u32,
    textures: HashMap<TextureId, GpuTexture>,
    programs: HashMap<ProgramId, Program>,
    vertex_arrays: HashMap<VertexArrayId, VertexArray>,
    framebuffers: HashMap<FramebufferId, OffscreenTarget>,
    screen: Option<Target>,
    /// Depth attachment of the screen, kept across frames of the same size.
    screen_depth: Option<([u32; 2], wgpu::TextureView)>,
    texture_bind_groups: HashMap<(PipelineKind, TextureSet), wgpu::BindGroup>,
    uniform_bind_groups: HashMap<u64, wgpu::BindGroup>,
    uniforms: Arena,
    instances: Arena,
    bound: BoundState,
    passes: Vec<RecordedPass>,
}

impl Inner {
    fn allocate_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    /// The pass draws are currently recorded into.
    fn current_pass(&mut self) -> &mut RecordedPass {
        let target = self.bound.framebuffer;
        if self.passes.last().is_none_or(|pass| pass.target != target) {
            self.passes.push(RecordedPass {
                target,
                clear: None,
                draws: Vec::new(),
            });
        }
        let last = self.passes.len() - 1;
        &mut self.passes[last]
    }

    fn forget_texture(&mut self, texture: TextureId) {
        self.texture_bind_groups
            .retain(|(_, set), _| !set.contains(&Some(texture)));
    }
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    color_format: wgpu::TextureFormat,
    uniform_layout: wgpu::BindGroupLayout,
    model_texture_layout: wgpu::BindGroupLayout,
    quad_texture_layout: wgpu::BindGroupLayout,
    uniform_alignment: u64,
    inner: RefCell<Inner>,
}

impl WgpuBackend {
    /// Wraps an existing device. Every program renders into `color_format`, which is the
    /// format of the surface as well as of offscreen framebuffers.
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, color_format: wgpu::TextureFormat) -> Self {
        let uniform_layout = pipelines::mk_uniform_bind_group_layout(&device);
        let model_texture_layout =
            pipelines::mk_texture_bind_group_layout(&device, PipelineKind::Model);
        let quad_texture_layout =
            pipelines::mk_texture_bind_group_layout(&device, PipelineKind::Quad);
        let uniform_alignment = device.limits().min_uniform_buffer_offset_alignment as u64;
        let inner = Inner {
            next_id: 0,
            textures: HashMap::new(),
            programs: HashMap::new(),
            vertex_arrays: HashMap::new(),
            framebuffers: HashMap::new(),
            screen: None,
            screen_depth: None,
            texture_bind_groups: HashMap::new(),
            uniform_bind_groups: HashMap::new(),
            uniforms: Arena::new(&device, "uniform arena", wgpu::BufferUsages::UNIFORM),
            instances: Arena::new(&device, "instance arena", wgpu::BufferUsages::VERTEX),
            bound: BoundState::default(),
            passes: Vec::new(),
        };

        Self {
            device,
            queue,
            color_format,
            uniform_layout,
            model_texture_layout,
            quad_texture_layout,
            uniform_alignment,
            inner: RefCell::new(inner),
        }
    }

    /// Requests an adapter and device without a surface, for offscreen rendering.
    pub async fn request_headless(color_format: wgpu::TextureFormat) -> anyhow::Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .context("No suitable GPU adapter")?;
        log::info!("Using adapter {:?}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("batch-ngin device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                ..Default::default()
            })
            .await
            .context("Requesting GPU device")?;

        Ok(Self::new(device, queue, color_format))
    }

    /// Blocking variant of [`request_headless`](Self::request_headless).
    pub fn headless(color_format: wgpu::TextureFormat) -> anyhow::Result<Self> {
        block_on(Self::request_headless(color_format))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn color_format(&self) -> wgpu::TextureFormat {
        self.color_format
    }

    /// Sets the view that the screen framebuffer renders into until [`end_frame`].
    ///
    /// [`end_frame`]: Self::end_frame
    pub fn begin_frame(&self, view: wgpu::TextureView, size: [u32; 2]) {
        let mut inner = self.inner.borrow_mut();
        let depth = match inner.screen_depth.take() {
            Some((depth_size, depth)) if depth_size == size => depth,
            _ => create_depth_view(&self.device, size),
        };
        inner.screen_depth = Some((size, depth.clone()));
        inner.screen = Some(Target {
            color: view,
            depth,
            size,
            depth_fresh: true,
        });
    }

    /// Releases the screen view so that the surface texture can be presented.
    pub fn end_frame(&self) {
        self.inner.borrow_mut().screen = None;
    }

    /// Copies the colour attachment of an offscreen framebuffer into an image.
    ///
    /// Only what has been flushed is visible.
    pub fn read_framebuffer(&self, framebuffer: FramebufferId) -> anyhow::Result<image::RgbaImage> {
        let inner = self.inner.borrow();
        let target = inner
            .framebuffers
            .get(&framebuffer)
            .ok_or(GpuError::UnknownHandle {
                kind: "framebuffer",
                id: framebuffer.0,
            })?;
        let [width, height] = target.target.size;
        let unpadded_bytes_per_row = width * 4;
        let padded_bytes_per_row =
            unpadded_bytes_per_row.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

        let output_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("framebuffer readback"),
            size: (padded_bytes_per_row * height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("framebuffer readback encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                aspect: wgpu::TextureAspect::All,
                texture: &target.color,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &output_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            extent(target.target.size),
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        // The mapping has to be requested before polling, otherwise the wait never ends.
        let buffer_slice = output_buffer.slice(..);
        let (tx, rx) = futures_intrusive::channel::shared::oneshot_channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            tx.send(result).ok();
        });
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| anyhow!("Waiting for framebuffer readback: {e}"))?;
        block_on(rx.receive())
            .ok_or_else(|| anyhow!("Framebuffer readback was cancelled"))?
            .map_err(|e| anyhow!("Mapping framebuffer readback: {e}"))?;

        let data = buffer_slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((unpadded_bytes_per_row * height) as usize);
        for row in data.chunks(padded_bytes_per_row as usize) {
            pixels.extend_from_slice(&row[..unpadded_bytes_per_row as usize]);
        }
        drop(data);
        output_buffer.unmap();

        if matches!(
            self.color_format,
            wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb
        ) {
            for pixel in pixels.chunks_exact_mut(4) {
                pixel.swap(0, 2);
            }
        }
        image::RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("Framebuffer readback has an unexpected size"))
    }

    fn texture_layout(&self, kind: PipelineKind) -> &wgpu::BindGroupLayout {
        match kind {
            PipelineKind::Model => &self.model_texture_layout,
            PipelineKind::Quad => &self.quad_texture_layout,
        }
    }

    fn create_gpu_texture(
        &self,
        label: &str,
        size: [u32; 2],
        format: ChannelFormat,
        filter: Filter,
    ) -> Result<GpuTexture, GpuError> {
        let max = self.max_texture_size();
        if size[0] > max || size[1] > max {
            return Err(GpuError::TextureTooLarge {
                width: size[0],
                height: size[1],
                max,
            });
        }
        if size[0] == 0 || size[1] == 0 {
            return Err(GpuError::Allocation {
                what: format!("texture `{label}`"),
                reason: "zero sized".to_string(),
            });
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent(size),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(format),
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let filter_mode = match filter {
            Filter::Linear => wgpu::FilterMode::Linear,
            Filter::Nearest => wgpu::FilterMode::Nearest,
        };
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(label),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: filter_mode,
            min_filter: filter_mode,
            ..Default::default()
        });

        Ok(GpuTexture {
            texture,
            view,
            sampler,
            size,
            format,
            filter,
            label: label.to_string(),
        })
    }

    /// Creates the bind groups the recorded draws need and drops draws that reference
    /// deleted resources.
    fn prepare(&self, inner: &mut Inner, passes: &mut [RecordedPass]) {
        for pass in passes.iter_mut() {
            pass.draws.retain(|draw| {
                let key = (draw.kind, draw.textures);
                if inner.texture_bind_groups.contains_key(&key) {
                    return true;
                }
                let units = pipelines::texture_units(draw.kind) as usize;
                let views: Option<Vec<&GpuTexture>> = draw.textures[..units]
                    .iter()
                    .map(|id| id.and_then(|id| inner.textures.get(&id)))
                    .collect();
                let Some(views) = views else {
                    log::warn!(
                        "Draw with program {:?} skipped, texture units {:?} are not all bound",
                        draw.program,
                        &draw.textures[..units]
                    );
                    return false;
                };

                let mut entries: Vec<wgpu::BindGroupEntry> = views
                    .iter()
                    .enumerate()
                    .map(|(binding, texture)| wgpu::BindGroupEntry {
                        binding: binding as u32,
                        resource: wgpu::BindingResource::TextureView(&texture.view),
                    })
                    .collect();
                entries.push(wgpu::BindGroupEntry {
                    binding: units as u32,
                    resource: wgpu::BindingResource::Sampler(&views[0].sampler),
                });
                let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("texture_bind_group"),
                    layout: self.texture_layout(draw.kind),
                    entries: &entries,
                });
                inner.texture_bind_groups.insert(key, bind_group);
                true
            });

            for draw in &pass.draws {
                if inner.uniform_bind_groups.contains_key(&draw.uniform_size) {
                    continue;
                }
                let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("uniform_bind_group"),
                    layout: &self.uniform_layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer: &inner.uniforms.buffer,
                            offset: 0,
                            size: NonZeroU64::new(draw.uniform_size),
                        }),
                    }],
                });
                inner.uniform_bind_groups.insert(draw.uniform_size, bind_group);
            }
        }
    }

    fn replay(&self, inner: &Inner, passes: &[RecordedPass]) {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });

        for pass in passes {
            let target = match pass.target {
                None => inner.screen.as_ref(),
                Some(id) => inner.framebuffers.get(&id).map(|fb| &fb.target),
            };
            let Some(target) = target else {
                log::warn!("Render pass for {:?} skipped, target is gone", pass.target);
                continue;
            };

            let color_load = match pass.clear {
                Some([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
                    r: r as f64,
                    g: g as f64,
                    b: b as f64,
                    a: a as f64,
                }),
                None => wgpu::LoadOp::Load,
            };
            let depth_load = if pass.clear.is_some() || target.depth_fresh {
                wgpu::LoadOp::Clear(1.0)
            } else {
                wgpu::LoadOp::Load
            };

            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.color,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &target.depth,
                    depth_ops: Some(wgpu::Operations {
                        load: depth_load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            for draw in &pass.draws {
                let (Some(program), Some(vertex_array), Some(textures), Some(uniforms)) = (
                    inner.programs.get(&draw.program),
                    inner.vertex_arrays.get(&draw.vertex_array),
                    inner.texture_bind_groups.get(&(draw.kind, draw.textures)),
                    inner.uniform_bind_groups.get(&draw.uniform_size),
                ) else {
                    log::warn!("Draw with program {:?} skipped, resources are gone", draw.program);
                    continue;
                };
                let Some(viewport) = clamp_viewport(draw.viewport, target.size) else {
                    continue;
                };
                if draw.instances.is_empty() {
                    continue;
                }

                render_pass.set_viewport(
                    viewport.position.x as f32,
                    viewport.position.y as f32,
                    viewport.size.x as f32,
                    viewport.size.y as f32,
                    0.0,
                    1.0,
                );
                render_pass.set_pipeline(&program.pipeline);
                render_pass.set_bind_group(0, uniforms, &[draw.uniform_offset]);
                render_pass.set_bind_group(1, textures, &[]);
                render_pass.set_vertex_buffer(0, vertex_array.vertices.slice(..));
                render_pass.set_vertex_buffer(1, inner.instances.buffer.slice(draw.instances.clone()));
                match (draw.call, &vertex_array.indices) {
                    (
                        DrawCall::Indexed {
                            index_count,
                            instance_count,
                        },
                        Some(indices),
                    ) => {
                        render_pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
                        render_pass.draw_indexed(0..index_count, 0, 0..instance_count);
                    }
                    (
                        DrawCall::Strip {
                            vertex_count,
                            instance_count,
                        },
                        _,
                    ) => render_pass.draw(0..vertex_count, 0..instance_count),
                    (DrawCall::Indexed { .. }, None) => {
                        log::warn!("Indexed draw of {:?} without indices", draw.vertex_array)
                    }
                }
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
    }
}

impl Backend for WgpuBackend {
    fn max_texture_size(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
        pixels: Option<&[u8]>,
    ) -> Result<TextureId, GpuError> {
        let texture = self.create_gpu_texture(
            descriptor.label,
            descriptor.size,
            descriptor.format,
            descriptor.filter,
        )?;
        if let Some(pixels) = pixels {
            write_region(
                &self.queue,
                &texture,
                TextureRegion {
                    x: 0,
                    y: 0,
                    width: descriptor.size[0],
                    height: descriptor.size[1],
                },
                pixels,
            );
        }
        let mut inner = self.inner.borrow_mut();
        let id = TextureId(inner.allocate_id());
        inner.textures.insert(id, texture);
        Ok(id)
    }

    fn write_texture(&self, texture: TextureId, region: TextureRegion, pixels: &[u8]) {
        let inner = self.inner.borrow();
        match inner.textures.get(&texture) {
            Some(gpu_texture) => write_region(&self.queue, gpu_texture, region, pixels),
            None => log::warn!("Write to unknown texture {texture:?} ignored"),
        }
    }

    fn resize_texture(&self, texture: TextureId, size: [u32; 2]) -> Result<(), GpuError> {
        let (label, old_size, format, filter) = {
            let inner = self.inner.borrow();
            let old = inner.textures.get(&texture).ok_or(GpuError::UnknownHandle {
                kind: "texture",
                id: texture.0,
            })?;
            (old.label.clone(), old.size, old.format, old.filter)
        };
        let resized = self.create_gpu_texture(&label, size, format, filter)?;

        let mut inner = self.inner.borrow_mut();
        if let Some(old) = inner.textures.get(&texture) {
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("texture resize encoder"),
                });
            encoder.copy_texture_to_texture(
                wgpu::TexelCopyTextureInfo {
                    aspect: wgpu::TextureAspect::All,
                    texture: &old.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                },
                wgpu::TexelCopyTextureInfo {
                    aspect: wgpu::TextureAspect::All,
                    texture: &resized.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                },
                extent([old_size[0].min(size[0]), old_size[1].min(size[1])]),
            );
            self.queue.submit(std::iter::once(encoder.finish()));
        }
        inner.textures.insert(texture, resized);
        inner.forget_texture(texture);
        Ok(())
    }

    fn delete_texture(&self, texture: TextureId) {
        let mut inner = self.inner.borrow_mut();
        inner.textures.remove(&texture);
        inner.forget_texture(texture);
    }

    fn create_program(&self, descriptor: &ShaderDescriptor) -> Result<ProgramId, GpuError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(descriptor.label.as_ref()),
                source: wgpu::ShaderSource::Wgsl(descriptor.source.clone()),
            });
        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(descriptor.label.as_ref()),
                bind_group_layouts: &[&self.uniform_layout, self.texture_layout(descriptor.kind)],
                push_constant_ranges: &[],
            });
        let pipeline = pipelines::mk_render_pipeline(
            &self.device,
            &descriptor.label,
            &layout,
            &module,
            descriptor.kind,
            descriptor.blend,
            self.color_format,
            DEPTH_FORMAT,
        );
        if let Some(error) = block_on(self.device.pop_error_scope()) {
            return Err(GpuError::ShaderCompilation {
                label: descriptor.label.to_string(),
                log: error.to_string(),
            });
        }

        let layout = UniformBlockLayout::new(&descriptor.uniforms);
        let names = descriptor
            .uniforms
            .iter()
            .enumerate()
            .map(|(i, decl)| (decl.name.to_string(), UniformLocation(i as u32)))
            .collect();
        let program = Program {
            kind: descriptor.kind,
            pipeline,
            block: vec![0; layout.size as usize],
            layout,
            names,
        };

        let mut inner = self.inner.borrow_mut();
        let id = ProgramId(inner.allocate_id());
        inner.programs.insert(id, program);
        Ok(id)
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let inner = self.inner.borrow();
        inner.programs.get(&program)?.names.get(name).copied()
    }

    fn delete_program(&self, program: ProgramId) {
        self.inner.borrow_mut().programs.remove(&program);
    }

    fn create_vertex_array(
        &self,
        layout: PipelineKind,
        vertices: &[u8],
        indices: Option<&[u32]>,
    ) -> Result<VertexArrayId, GpuError> {
        if vertices.is_empty() || indices.is_some_and(|i| i.is_empty()) {
            return Err(GpuError::Allocation {
                what: format!("{layout:?} vertex array"),
                reason: "no vertex data".to_string(),
            });
        }
        let vertices = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Vertex Buffer"),
                contents: vertices,
                usage: wgpu::BufferUsages::VERTEX,
            });
        let indices = indices.map(|indices| {
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Index Buffer"),
                    contents: bytemuck::cast_slice(indices),
                    usage: wgpu::BufferUsages::INDEX,
                })
        });

        let mut inner = self.inner.borrow_mut();
        let id = VertexArrayId(inner.allocate_id());
        inner
            .vertex_arrays
            .insert(id, VertexArray { vertices, indices });
        Ok(id)
    }

    fn delete_vertex_array(&self, vertex_array: VertexArrayId) {
        self.inner.borrow_mut().vertex_arrays.remove(&vertex_array);
    }

    fn create_framebuffer(&self, size: [u32; 2]) -> Result<FramebufferId, GpuError> {
        let max = self.max_texture_size();
        if size[0] > max || size[1] > max || size[0] == 0 || size[1] == 0 {
            return Err(GpuError::Allocation {
                what: format!("{}x{} framebuffer", size[0], size[1]),
                reason: format!("size must be within 1..={max}"),
            });
        }
        let color = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("framebuffer colour"),
            size: extent(size),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: self.color_format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let target = Target {
            color: color.create_view(&wgpu::TextureViewDescriptor::default()),
            depth: create_depth_view(&self.device, size),
            size,
            depth_fresh: true,
        };

        let mut inner = self.inner.borrow_mut();
        let id = FramebufferId(inner.allocate_id());
        inner
            .framebuffers
            .insert(id, OffscreenTarget { color, target });
        Ok(id)
    }

    fn delete_framebuffer(&self, framebuffer: FramebufferId) {
        let mut inner = self.inner.borrow_mut();
        inner.framebuffers.remove(&framebuffer);
        if inner.bound.framebuffer == Some(framebuffer) {
            inner.bound.framebuffer = None;
        }
    }

    fn bind_framebuffer(&self, framebuffer: Option<FramebufferId>) {
        let mut inner = self.inner.borrow_mut();
        inner.bound.framebuffer = framebuffer;
        inner.bound.viewport = None;
    }

    fn clear(&self, color: [f32; 4]) {
        let mut inner = self.inner.borrow_mut();
        let target = inner.bound.framebuffer;
        let pass = inner.current_pass();
        if pass.draws.is_empty() {
            pass.clear = Some(color);
        } else {
            inner.passes.push(RecordedPass {
                target,
                clear: Some(color),
                draws: Vec::new(),
            });
        }
    }

    fn set_viewport(&self, viewport: Viewport) {
        self.inner.borrow_mut().bound.viewport = Some(viewport);
    }

    fn use_program(&self, program: ProgramId) {
        self.inner.borrow_mut().bound.program = Some(program);
    }

    fn upload_uniform(&self, program: ProgramId, location: UniformLocation, value: UniformValue) {
        let mut inner = self.inner.borrow_mut();
        let Some(program_data) = inner.programs.get_mut(&program) else {
            log::warn!("Uniform upload to unknown program {program:?} ignored");
            return;
        };
        let Some(&(offset, ty)) = program_data.layout.members.get(location.0 as usize) else {
            log::warn!("Uniform location {location:?} is not part of program {program:?}");
            return;
        };
        if ty != value.ty() {
            log::warn!(
                "Uniform {location:?} of program {program:?} is {ty:?}, got {:?}",
                value.ty()
            );
            return;
        }
        write_uniform(&mut program_data.block[offset as usize..], value);
    }

    fn bind_texture(&self, unit: u32, texture: TextureId) {
        let mut inner = self.inner.borrow_mut();
        match inner.bound.textures.get_mut(unit as usize) {
            Some(slot) => *slot = Some(texture),
            None => log::warn!("Texture unit {unit} does not exist"),
        }
    }

    fn bind_vertex_array(&self, vertex_array: VertexArrayId) {
        self.inner.borrow_mut().bound.vertex_array = Some(vertex_array);
    }

    fn upload_instances(&self, data: &[u8]) {
        let mut inner = self.inner.borrow_mut();
        let range = inner.instances.push(data, INSTANCE_ALIGNMENT);
        inner.bound.instances = Some(range);
    }

    fn draw(&self, call: DrawCall) {
        let mut inner = self.inner.borrow_mut();
        let bound = &inner.bound;
        let (Some(program), Some(vertex_array), Some(instances)) =
            (bound.program, bound.vertex_array, bound.instances.clone())
        else {
            log::warn!("Draw without program, vertex array or instances ignored");
            return;
        };
        let Some(program_data) = inner.programs.get(&program) else {
            log::warn!("Draw with unknown program {program:?} ignored");
            return;
        };
        let kind = program_data.kind;
        let units = pipelines::texture_units(kind) as usize;
        let mut textures = TextureSet::default();
        textures[..units].copy_from_slice(&bound.textures[..units]);
        let viewport = bound.viewport;
        let block = program_data.block.clone();

        let alignment = self.uniform_alignment;
        let uniform_range = inner.uniforms.push(&block, alignment);
        let draw = RecordedDraw {
            program,
            kind,
            vertex_array,
            textures,
            uniform_offset: uniform_range.start as u32,
            uniform_size: block.len() as u64,
            instances,
            viewport,
            call,
        };
        inner.current_pass().draws.push(draw);
    }

    fn flush(&self) {
        let mut inner = self.inner.borrow_mut();
        let mut passes = std::mem::take(&mut inner.passes);
        passes.retain(|pass| pass.clear.is_some() || !pass.draws.is_empty());

        if !passes.is_empty() {
            if inner.uniforms.upload(&self.device, &self.queue) {
                inner.uniform_bind_groups.clear();
            }
            inner.instances.upload(&self.device, &self.queue);
            self.prepare(&mut inner, &mut passes);
            self.replay(&inner, &passes);

            let screen_used = passes.iter().any(|pass| pass.target.is_none());
            let used: Vec<FramebufferId> = passes.iter().filter_map(|pass| pass.target).collect();
            if screen_used {
                if let Some(screen) = inner.screen.as_mut() {
                    screen.depth_fresh = false;
                }
            }
            for id in used {
                if let Some(fb) = inner.framebuffers.get_mut(&id) {
                    fb.target.depth_fresh = false;
                }
            }
            log::debug!("Flushed {} render passes", passes.len());
        }

        inner.uniforms.data.clear();
        inner.instances.data.clear();
        inner.bound.instances = None;
    }
}

fn texture_format(format: ChannelFormat) -> wgpu::TextureFormat {
    match format {
        ChannelFormat::R8 => wgpu::TextureFormat::R8Unorm,
        ChannelFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        ChannelFormat::Rgba8Srgb => wgpu::TextureFormat::Rgba8UnormSrgb,
    }
}

fn extent(size: [u32; 2]) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: size[0].max(1),
        height: size[1].max(1),
        depth_or_array_layers: 1,
    }
}

fn create_depth_view(device: &wgpu::Device, size: [u32; 2]) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("depth texture"),
        size: extent(size),
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

fn write_region(queue: &wgpu::Queue, texture: &GpuTexture, region: TextureRegion, pixels: &[u8]) {
    let bytes_per_pixel = texture.format.bytes_per_pixel();
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            aspect: wgpu::TextureAspect::All,
            texture: &texture.texture,
            mip_level: 0,
            origin: wgpu::Origin3d {
                x: region.x,
                y: region.y,
                z: 0,
            },
        },
        pixels,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(region.width * bytes_per_pixel),
            rows_per_image: Some(region.height),
        },
        extent([region.width, region.height]),
    );
}

/// Restricts a viewport to the target, `None` when nothing of it remains. No viewport
/// means the whole target.
fn clamp_viewport(viewport: Option<Viewport>, target: [u32; 2]) -> Option<Viewport> {
    let viewport = viewport.unwrap_or_else(|| Viewport::from_size(target[0], target[1]));
    let x = viewport.position.x.min(target[0]);
    let y = viewport.position.y.min(target[1]);
    let width = viewport.size.x.min(target[0] - x);
    let height = viewport.size.y.min(target[1] - y);
    (width > 0 && height > 0).then(|| Viewport::new(x, y, width, height))
}

/// Writes `value` at the start of `dst` using the uniform address space layout.
fn write_uniform(dst: &mut [u8], value: UniformValue) {
    match value {
        UniformValue::Float(v) => dst[..4].copy_from_slice(bytemuck::bytes_of(&v)),
        UniformValue::Int(v) => dst[..4].copy_from_slice(bytemuck::bytes_of(&v)),
        UniformValue::Vec2(v) => dst[..8].copy_from_slice(bytemuck::cast_slice(&v)),
        UniformValue::Vec3(v) => dst[..12].copy_from_slice(bytemuck::cast_slice(&v)),
        UniformValue::Vec4(v) => dst[..16].copy_from_slice(bytemuck::cast_slice(&v)),
        UniformValue::Mat3(m) => {
            for (i, column) in m.iter().enumerate() {
                dst[i * 16..i * 16 + 12].copy_from_slice(bytemuck::cast_slice(column));
            }
        }
        UniformValue::Mat4(m) => dst[..64].copy_from_slice(bytemuck::cast_slice(&m)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mat3_columns_are_padded() {
        let mut block = [0.0f32; 12];
        write_uniform(
            bytemuck::cast_slice_mut(&mut block),
            UniformValue::Mat3([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]),
        );
        assert_eq!(
            block,
            [1.0, 2.0, 3.0, 0.0, 4.0, 5.0, 6.0, 0.0, 7.0, 8.0, 9.0, 0.0]
        );
    }

    #[test]
    fn scalar_lands_after_vec3() {
        let mut block = [0.0f32; 4];
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut block);
        write_uniform(bytes, UniformValue::Vec3([1.0, 2.0, 3.0]));
        write_uniform(&mut bytes[12..], UniformValue::Float(4.0));
        assert_eq!(block, [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn viewport_is_clamped_to_target() {
        assert_eq!(
            clamp_viewport(Some(Viewport::new(50, 10, 100, 100)), [100, 80]),
            Some(Viewport::new(50, 10, 50, 70))
        );
        assert_eq!(clamp_viewport(Some(Viewport::new(100, 0, 10, 10)), [100, 80]), None);
        assert_eq!(clamp_viewport(None, [64, 32]), Some(Viewport::from_size(64, 32)));
    }
}
