//! GPU resource lifecycle and the per-frame driver.
//!
//! - `backend` defines the device operations the rest of the module relies
//!   on ([`GpuBackend`]) along with buffer handles and pipeline futures.
//! - `resources` owns buffer identity: the uniform block, the accumulation
//!   buffer sized for the maximum resolution, and ping-pong pairs.
//! - `state` drives frames, temporal accumulation and hot recompiles on top
//!   of any backend.
//! - `context` is the wgpu implementation presenting to a window surface.

mod backend;
mod context;
mod resources;
mod state;
#[cfg(test)]
pub(crate) mod testing;

pub use backend::{
    BufferDesc, BufferId, BufferUsage, DeviceLimits, Extent, FrameSubmission, GpuBackend,
    PipelineFuture, PipelineRequest,
};
pub use context::{WgpuBackend, WgpuPipeline};
pub use resources::{PingPongSpec, ResourceSet, PIXEL_STRIDE};
pub use state::{
    GpuState, RecompileOutcome, RenderSettings, DEFAULT_MAX_RESOLUTION, MAX_RENDER_SCALE,
    MIN_RENDER_SCALE,
};
