use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
};

use batch_ngin::{
    backend::{
        Backend, ChannelFormat, DrawCall, FramebufferId, Gpu, GpuError, PipelineKind, ProgramId,
        ShaderDescriptor, TextureDescriptor, TextureId, TextureRegion, UniformLocation,
        UniformValue, VertexArrayId,
    },
    camera::Viewport,
};

/// Everything the engine asked the backend to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateTexture {
        id: TextureId,
        size: [u32; 2],
        format: ChannelFormat,
    },
    WriteTexture {
        id: TextureId,
        region: TextureRegion,
    },
    ResizeTexture {
        id: TextureId,
        size: [u32; 2],
    },
    DeleteTexture(TextureId),
    CreateProgram {
        id: ProgramId,
        label: String,
    },
    DeleteProgram(ProgramId),
    CreateVertexArray {
        id: VertexArrayId,
        kind: PipelineKind,
    },
    DeleteVertexArray(VertexArrayId),
    CreateFramebuffer {
        id: FramebufferId,
        size: [u32; 2],
    },
    DeleteFramebuffer(FramebufferId),
    BindFramebuffer(Option<FramebufferId>),
    Clear([f32; 4]),
    SetViewport(Viewport),
    UseProgram(ProgramId),
    UploadUniform {
        program: ProgramId,
        location: UniformLocation,
        value: UniformValue,
    },
    BindTexture {
        unit: u32,
        texture: TextureId,
    },
    BindVertexArray(VertexArrayId),
    /// Instance data as floats, every instance record is made of `f32`s.
    UploadInstances(Vec<f32>),
    Draw(DrawCall),
    Flush,
}

impl Call {
    pub fn is_command(&self) -> bool {
        !matches!(
            self,
            Call::CreateTexture { .. }
                | Call::WriteTexture { .. }
                | Call::ResizeTexture { .. }
                | Call::DeleteTexture(_)
                | Call::CreateProgram { .. }
                | Call::DeleteProgram(_)
                | Call::CreateVertexArray { .. }
                | Call::DeleteVertexArray(_)
                | Call::CreateFramebuffer { .. }
                | Call::DeleteFramebuffer(_)
        )
    }
}

/// A call-recording backend with the same handle allocation scheme as the real one.
pub struct MockBackend {
    calls: RefCell<Vec<Call>>,
    next_id: Cell<u32>,
    max_texture_size: u32,
    uniforms: RefCell<HashMap<ProgramId, Vec<String>>>,
    textures: RefCell<HashMap<TextureId, [u32; 2]>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::with_max_texture_size(8192)
    }

    pub fn with_max_texture_size(max_texture_size: u32) -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
            max_texture_size,
            uniforms: RefCell::new(HashMap::new()),
            textures: RefCell::new(HashMap::new()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    /// Recorded commands, without resource creation and deletion.
    pub fn commands(&self) -> Vec<Call> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.is_command())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn draws(&self) -> Vec<DrawCall> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::Draw(d) => Some(*d),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.borrow().iter().filter(|c| predicate(c)).count()
    }

    pub fn texture_size(&self, texture: TextureId) -> Option<[u32; 2]> {
        self.textures.borrow().get(&texture).copied()
    }

    fn allocate(&self) -> u32 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }

    fn check_size(&self, size: [u32; 2]) -> Result<(), GpuError> {
        if size[0] > self.max_texture_size || size[1] > self.max_texture_size {
            return Err(GpuError::TextureTooLarge {
                width: size[0],
                height: size[1],
                max: self.max_texture_size,
            });
        }
        Ok(())
    }
}

/// A mock backend and the same backend as the engine sees it.
pub fn setup() -> (Rc<MockBackend>, Gpu) {
    let mock = Rc::new(MockBackend::new());
    let gpu: Gpu = mock.clone();
    (mock, gpu)
}

impl Backend for MockBackend {
    fn max_texture_size(&self) -> u32 {
        self.max_texture_size
    }

    fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
        _pixels: Option<&[u8]>,
    ) -> Result<TextureId, GpuError> {
        self.check_size(descriptor.size)?;
        let id = TextureId(self.allocate());
        self.textures.borrow_mut().insert(id, descriptor.size);
        self.record(Call::CreateTexture {
            id,
            size: descriptor.size,
            format: descriptor.format,
        });
        Ok(id)
    }

    fn write_texture(&self, texture: TextureId, region: TextureRegion, _pixels: &[u8]) {
        self.record(Call::WriteTexture { id: texture, region });
    }

    fn resize_texture(&self, texture: TextureId, size: [u32; 2]) -> Result<(), GpuError> {
        self.check_size(size)?;
        let mut textures = self.textures.borrow_mut();
        let entry = textures.get_mut(&texture).ok_or(GpuError::UnknownHandle {
            kind: "texture",
            id: texture.0,
        })?;
        *entry = size;
        self.record(Call::ResizeTexture { id: texture, size });
        Ok(())
    }

    fn delete_texture(&self, texture: TextureId) {
        self.textures.borrow_mut().remove(&texture);
        self.record(Call::DeleteTexture(texture));
    }

    fn create_program(&self, descriptor: &ShaderDescriptor) -> Result<ProgramId, GpuError> {
        if descriptor.source.trim().is_empty() {
            return Err(GpuError::ShaderCompilation {
                label: descriptor.label.to_string(),
                log: "empty shader source".to_string(),
            });
        }
        let id = ProgramId(self.allocate());
        self.uniforms.borrow_mut().insert(
            id,
            descriptor.uniforms.iter().map(|u| u.name.to_string()).collect(),
        );
        self.record(Call::CreateProgram {
            id,
            label: descriptor.label.to_string(),
        });
        Ok(id)
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        self.uniforms
            .borrow()
            .get(&program)?
            .iter()
            .position(|n| n == name)
            .map(|i| UniformLocation(i as u32))
    }

    fn delete_program(&self, program: ProgramId) {
        self.record(Call::DeleteProgram(program));
    }

    fn create_vertex_array(
        &self,
        layout: PipelineKind,
        _vertices: &[u8],
        _indices: Option<&[u32]>,
    ) -> Result<VertexArrayId, GpuError> {
        let id = VertexArrayId(self.allocate());
        self.record(Call::CreateVertexArray { id, kind: layout });
        Ok(id)
    }

    fn delete_vertex_array(&self, vertex_array: VertexArrayId) {
        self.record(Call::DeleteVertexArray(vertex_array));
    }

    fn create_framebuffer(&self, size: [u32; 2]) -> Result<FramebufferId, GpuError> {
        self.check_size(size)?;
        let id = FramebufferId(self.allocate());
        self.record(Call::CreateFramebuffer { id, size });
        Ok(id)
    }

    fn delete_framebuffer(&self, framebuffer: FramebufferId) {
        self.record(Call::DeleteFramebuffer(framebuffer));
    }

    fn bind_framebuffer(&self, framebuffer: Option<FramebufferId>) {
        self.record(Call::BindFramebuffer(framebuffer));
    }

    fn clear(&self, color: [f32; 4]) {
        self.record(Call::Clear(color));
    }

    fn set_viewport(&self, viewport: Viewport) {
        self.record(Call::SetViewport(viewport));
    }

    fn use_program(&self, program: ProgramId) {
        self.record(Call::UseProgram(program));
    }

    fn upload_uniform(&self, program: ProgramId, location: UniformLocation, value: UniformValue) {
        self.record(Call::UploadUniform {
            program,
            location,
            value,
        });
    }

    fn bind_texture(&self, unit: u32, texture: TextureId) {
        self.record(Call::BindTexture { unit, texture });
    }

    fn bind_vertex_array(&self, vertex_array: VertexArrayId) {
        self.record(Call::BindVertexArray(vertex_array));
    }

    fn upload_instances(&self, data: &[u8]) {
        let floats = data
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        self.record(Call::UploadInstances(floats));
    }

    fn draw(&self, call: DrawCall) {
        self.record(Call::Draw(call));
    }

    fn flush(&self) {
        self.record(Call::Flush);
    }
}
