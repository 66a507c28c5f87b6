//! Renderer crate for marchbox, a progressive raymarching playground.
//!
//! The crate packs named uniform values into GPU-ready blocks, owns the
//! buffers a compute-then-present raymarcher needs, and hot-swaps shader
//! pipelines while frames keep flowing. The overall flow is:
//!
//! ```text
//!   Schema + UniformState ──▶ pack() ──▶ uniform buffer ─┐
//!                                                         ▼
//!   user SDF ──▶ compose() ──▶ naga ──▶ GpuBackend ──▶ compute ─▶ color buffer ─▶ present
//!                                          ▲
//!   preview window ──▶ GpuState::render_frame / recompile / sync_resolution
//! ```
//!
//! [`gpu::GpuState`] is generic over [`gpu::GpuBackend`]; the wgpu
//! implementation lives in [`gpu::WgpuBackend`], and the crate's tests drive
//! the same state machine through an in-memory backend.

pub mod camera;
pub mod compile;
pub mod error;
pub mod gpu;
pub mod persist;
pub mod presets;
pub mod readback;
pub mod schema;
pub mod value;
mod window;

pub use camera::FlyCamera;
pub use compile::{
    compose, ComposedShader, DiagnosticOrigin, Severity, ShaderConstants, ShaderDiagnostic,
    ShaderDiagnostics, ShaderSources, SourceLocation,
};
pub use error::RenderError;
pub use gpu::{Extent, GpuState, PingPongSpec, RenderSettings, WgpuBackend};
pub use persist::{CameraState, PersistedState, DEFAULT_CAMERA_SPEED};
pub use presets::{sdf_preset, Preset, PRESET_NAMES, SDF_PRESETS};
pub use schema::{pack, BlockAlignment, FieldLayout, PackedBlock, Schema, UniformState};
pub use value::{UniformValue, ValueKind};
pub use window::{run_preview, save_png, screenshot_path, PreviewConfig, StateSink};
