//! Shader programs.
//!
//! A [`Shader`] owns a backend program together with its render order index and a queue
//! of pending uniform writes. `set_uniform` only records the value; the renderer drains
//! the queue the first time the shader is bound during a render, so a shader that is
//! used by many batches uploads each written value once.

use std::{cell::RefCell, collections::HashMap, fmt};

use anyhow::{Context, Result};

use crate::backend::{Gpu, PipelineKind, ProgramId, ShaderDescriptor, UniformLocation, UniformValue};

pub struct Shader {
    gpu: Gpu,
    id: ProgramId,
    label: String,
    kind: PipelineKind,
    order_index: i32,
    locations: HashMap<String, UniformLocation>,
    pending: RefCell<Vec<(UniformLocation, UniformValue)>>,
}

impl Shader {
    /// Compiles `descriptor` and resolves the locations of its declared uniforms.
    ///
    /// Batches are rendered in ascending `order_index`, shaders with equal indices are
    /// ordered by the resources they draw.
    pub fn new(gpu: &Gpu, descriptor: &ShaderDescriptor, order_index: i32) -> Result<Self> {
        let id = gpu
            .create_program(descriptor)
            .with_context(|| format!("Creating shader `{}`", descriptor.label))?;

        let locations = descriptor
            .uniforms
            .iter()
            .filter_map(|decl| {
                let location = gpu.uniform_location(id, &decl.name);
                if location.is_none() {
                    log::warn!(
                        "Uniform `{}` declared by shader `{}` has no location",
                        decl.name,
                        descriptor.label
                    );
                }
                location.map(|l| (decl.name.to_string(), l))
            })
            .collect();
        log::info!(
            "Shader `{}` created as {id:?} with order index {order_index}",
            descriptor.label
        );

        Ok(Self {
            gpu: gpu.clone(),
            id,
            label: descriptor.label.to_string(),
            kind: descriptor.kind,
            order_index,
            locations,
            pending: RefCell::new(Vec::new()),
        })
    }

    /// Queues a uniform write by name. Unknown names are logged and ignored.
    pub fn set_uniform(&self, name: &str, value: impl Into<UniformValue>) {
        match self.location(name) {
            Some(location) => self.set_uniform_at(location, value),
            None => log::warn!("Shader `{}` has no uniform named `{name}`", self.label),
        }
    }

    pub fn set_uniform_at(&self, location: UniformLocation, value: impl Into<UniformValue>) {
        self.pending.borrow_mut().push((location, value.into()));
    }

    pub fn location(&self, name: &str) -> Option<UniformLocation> {
        self.locations.get(name).copied()
    }

    /// Number of uniform writes waiting for the next bind.
    pub fn pending_uniforms(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Uploads and clears the pending uniform writes.
    pub(crate) fn flush_uniforms(&self) {
        for (location, value) in self.pending.borrow_mut().drain(..) {
            self.gpu.upload_uniform(self.id, location, value);
        }
    }

    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    pub fn order_index(&self) -> i32 {
        self.order_index
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for Shader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shader")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("kind", &self.kind)
            .field("order_index", &self.order_index)
            .finish()
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        self.gpu.delete_program(self.id);
    }
}
