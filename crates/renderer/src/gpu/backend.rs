use std::sync::mpsc::{Receiver, TryRecvError};

use crate::compile::{ComposedShader, DiagnosticOrigin, Severity, ShaderDiagnostics};
use crate::error::RenderError;

/// Opaque handle to a buffer owned by a [`GpuBackend`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub(crate) u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    Uniform,
    /// Storage buffer that can also be read back.
    Storage,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferDesc {
    pub label: String,
    pub size: u64,
    pub usage: BufferUsage,
}

/// Width/height pair in physical pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Divides by `scale`, rounding up so partially covered pixels still render.
    pub fn scaled_down(self, scale: u32) -> Self {
        let scale = scale.max(1);
        Self {
            width: self.width.div_ceil(scale),
            height: self.height.div_ceil(scale),
        }
    }
}

impl std::fmt::Display for Extent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceLimits {
    pub max_buffer_size: u64,
    pub max_storage_binding: u64,
    pub max_uniform_binding: u64,
    pub max_surface_dimension: u32,
}

/// What a backend needs to build one pipeline generation.
#[derive(Clone, Debug)]
pub struct PipelineRequest {
    pub generation: u64,
    pub shader: ComposedShader,
    /// Ping-pong pairs bound after the color buffer, two bindings each.
    pub pair_count: usize,
}

/// Buffers and extents for one frame, in binding order.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameSubmission {
    pub uniform: BufferId,
    pub color: BufferId,
    /// `(read, write)` halves per declared pair.
    pub pairs: Vec<(BufferId, BufferId)>,
    pub workgroups: [u32; 2],
    pub render_extent: Extent,
}

/// Result slot for a pipeline build that may finish on another thread.
pub enum PipelineFuture<P> {
    Ready(Result<P, ShaderDiagnostics>),
    Threaded {
        receiver: Receiver<Result<P, ShaderDiagnostics>>,
    },
}

impl<P> PipelineFuture<P> {
    pub fn ready(pipeline: P) -> Self {
        PipelineFuture::Ready(Ok(pipeline))
    }

    /// Returns the build result once available. A `Ready` future yields its
    /// result exactly once; later polls report a disconnected worker.
    pub fn poll(&mut self) -> Option<Result<P, ShaderDiagnostics>> {
        match self {
            PipelineFuture::Ready(_) => {
                let taken = std::mem::replace(self, PipelineFuture::Ready(Err(disconnected())));
                match taken {
                    PipelineFuture::Ready(result) => Some(result),
                    PipelineFuture::Threaded { .. } => None,
                }
            }
            PipelineFuture::Threaded { receiver } => match receiver.try_recv() {
                Ok(result) => Some(result),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => Some(Err(disconnected())),
            },
        }
    }

    /// Blocks until the build finishes.
    pub fn wait(self) -> Result<P, ShaderDiagnostics> {
        match self {
            PipelineFuture::Ready(result) => result,
            PipelineFuture::Threaded { receiver } => {
                receiver.recv().unwrap_or_else(|_| Err(disconnected()))
            }
        }
    }
}

fn disconnected() -> ShaderDiagnostics {
    ShaderDiagnostics::single(
        Severity::Error,
        DiagnosticOrigin::BaseShader,
        "pipeline build worker disconnected before returning a result",
    )
}

/// Device operations the resource manager and render driver rely on.
///
/// Buffers are owned by the backend and addressed through [`BufferId`]s;
/// pipelines only ever see those ids when a frame is submitted.
pub trait GpuBackend {
    type Pipeline: Send + 'static;

    fn limits(&self) -> DeviceLimits;

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferId, RenderError>;

    fn write_buffer(&mut self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), RenderError>;

    /// Copies `len` bytes starting at `offset` back to the host. Blocks.
    fn read_buffer(&mut self, id: BufferId, offset: u64, len: u64) -> Result<Vec<u8>, RenderError>;

    fn destroy_buffer(&mut self, id: BufferId);

    /// Resizes the presentation surface.
    fn configure_surface(&mut self, size: Extent);

    fn build_pipeline(&mut self, request: PipelineRequest) -> PipelineFuture<Self::Pipeline>;

    /// Encodes the compute dispatch followed by the draw and submits both.
    fn submit_frame(
        &mut self,
        pipeline: &Self::Pipeline,
        frame: &FrameSubmission,
    ) -> Result<(), RenderError>;
}
