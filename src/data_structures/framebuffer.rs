use std::fmt;

use anyhow::{Context, Result};

use crate::backend::{FramebufferId, Gpu};

/// A render target: either the screen or an offscreen colour + depth target.
pub struct Framebuffer {
    gpu: Gpu,
    id: Option<FramebufferId>,
    size: Option<[u32; 2]>,
}

impl Framebuffer {
    /// The backend's screen target. Its size is whatever the current frame is.
    pub fn screen(gpu: &Gpu) -> Self {
        Self {
            gpu: gpu.clone(),
            id: None,
            size: None,
        }
    }

    pub fn new(gpu: &Gpu, size: [u32; 2]) -> Result<Self> {
        let id = gpu
            .create_framebuffer(size)
            .with_context(|| format!("Creating {}x{} framebuffer", size[0], size[1]))?;
        Ok(Self {
            gpu: gpu.clone(),
            id: Some(id),
            size: Some(size),
        })
    }

    /// `None` for the screen.
    pub fn id(&self) -> Option<FramebufferId> {
        self.id
    }

    pub fn size(&self) -> Option<[u32; 2]> {
        self.size
    }

    pub fn is_screen(&self) -> bool {
        self.id.is_none()
    }
}

impl fmt::Debug for Framebuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Framebuffer")
            .field("id", &self.id)
            .field("size", &self.size)
            .finish()
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            self.gpu.delete_framebuffer(id);
        }
    }
}
