use std::time::{Duration, Instant};

use image::RgbaImage;
use tracing::{debug, info, warn};

use crate::compile::{
    compose, DiagnosticOrigin, Severity, ShaderConstants, ShaderDiagnostics, ShaderSources,
};
use crate::error::RenderError;
use crate::persist::{CameraState, PersistedState, DEFAULT_CAMERA_SPEED, PERSISTED_PREFIX};
use crate::readback;
use crate::schema::{pack, BlockAlignment, Schema, UniformState};
use crate::value::{UniformValue, ValueKind};

use super::backend::{Extent, FrameSubmission, GpuBackend, PipelineFuture, PipelineRequest};
use super::resources::{PingPongSpec, ResourceSet, PIXEL_STRIDE};

pub const MIN_RENDER_SCALE: u32 = 1;
pub const MAX_RENDER_SCALE: u32 = 16;

/// Largest accumulation buffer the renderer allocates by default.
pub const DEFAULT_MAX_RESOLUTION: Extent = Extent::new(2560, 1440);

/// Construction-time knobs for [`GpuState`].
#[derive(Clone, Debug, PartialEq)]
pub struct RenderSettings {
    pub max_resolution: Extent,
    pub workgroup: [u32; 2],
    pub render_scale: u32,
    pub auto_refresh: bool,
    pub exposure: Option<f32>,
    pub alignment: BlockAlignment,
    pub ping_pong: Vec<PingPongSpec>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            max_resolution: DEFAULT_MAX_RESOLUTION,
            workgroup: [16, 16],
            render_scale: 1,
            auto_refresh: false,
            exposure: None,
            alignment: BlockAlignment::Std140,
            ping_pong: Vec::new(),
        }
    }
}

/// Result of a finished recompile.
#[derive(Clone, Debug, PartialEq)]
pub struct RecompileOutcome {
    pub generation: u64,
    pub result: Result<(), ShaderDiagnostics>,
}

struct PendingPipeline<P> {
    generation: u64,
    future: PipelineFuture<P>,
    schema: Option<Schema>,
    user_source: String,
    warnings: ShaderDiagnostics,
}

struct FrameStats {
    last_report: Instant,
    frames_since_report: u32,
}

/// Per-frame driver: owns the uniform state, the resource set and the active
/// pipeline, and coordinates hot recompiles against them.
///
/// Recompiles follow a cancel-and-replace policy. Each request gets a new
/// generation; issuing another while one is pending drops the older build, so
/// its result is never applied. The active pipeline keeps rendering until a
/// replacement succeeds.
pub struct GpuState<B: GpuBackend> {
    backend: B,
    schema: Schema,
    uniforms: UniformState,
    sources: ShaderSources,
    settings: RenderSettings,
    user_source: String,
    resources: ResourceSet,
    current: B::Pipeline,
    current_generation: u64,
    pending: Option<PendingPipeline<B::Pipeline>>,
    next_generation: u64,
    last_error: Option<ShaderDiagnostics>,
    last_warnings: ShaderDiagnostics,
    temporal_counter: u32,
    render_scale: u32,
    camera_speed: f32,
    torn_down: bool,
    stats: FrameStats,
}

impl<B: GpuBackend> GpuState<B> {
    pub fn new(
        mut backend: B,
        schema: Schema,
        sources: ShaderSources,
        user_source: &str,
        settings: RenderSettings,
        initial_size: Extent,
    ) -> Result<Self, RenderError> {
        let uniforms = UniformState::from_schema(&schema);
        schema.check_state(&uniforms)?;

        let constants = shader_constants(&settings);
        let composed = compose(&schema, &sources, &constants, user_source)
            .map_err(RenderError::CompileFailure)?;
        let warnings = composed.warnings.clone();

        let mut resources = ResourceSet::allocate(
            &mut backend,
            settings.max_resolution,
            PIXEL_STRIDE,
            schema.packed_len(settings.alignment) as u64,
            &settings.ping_pong,
        )?;

        let request = PipelineRequest {
            generation: 0,
            shader: composed,
            pair_count: resources.pair_count(),
        };
        let current = match backend.build_pipeline(request).wait() {
            Ok(pipeline) => pipeline,
            Err(diagnostics) => {
                resources.destroy(&mut backend);
                return Err(RenderError::CompileFailure(diagnostics));
            }
        };

        let render_scale = settings
            .render_scale
            .clamp(MIN_RENDER_SCALE, MAX_RENDER_SCALE);
        let mut state = Self {
            backend,
            schema,
            uniforms,
            sources,
            settings,
            user_source: user_source.to_string(),
            resources,
            current,
            current_generation: 0,
            pending: None,
            next_generation: 1,
            last_error: None,
            last_warnings: warnings,
            temporal_counter: 1,
            render_scale,
            camera_speed: DEFAULT_CAMERA_SPEED,
            torn_down: false,
            stats: FrameStats {
                last_report: Instant::now(),
                frames_since_report: 0,
            },
        };
        state.mirror_static_fields();
        state.sync_resolution(initial_size)?;
        Ok(state)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn uniforms(&self) -> &UniformState {
        &self.uniforms
    }

    pub fn resources(&self) -> &ResourceSet {
        &self.resources
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn user_source(&self) -> &str {
        &self.user_source
    }

    pub fn temporal_counter(&self) -> u32 {
        self.temporal_counter
    }

    pub fn render_scale(&self) -> u32 {
        self.render_scale
    }

    pub fn effective_size(&self) -> Extent {
        self.resources.effective_size()
    }

    pub fn active_generation(&self) -> u64 {
        self.current_generation
    }

    pub fn is_recompiling(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_destroyed(&self) -> bool {
        self.torn_down
    }

    /// Diagnostics of the most recent failed recompile; cleared on success.
    pub fn compilation_error(&self) -> Option<&ShaderDiagnostics> {
        self.last_error.as_ref()
    }

    pub fn compilation_warnings(&self) -> &ShaderDiagnostics {
        &self.last_warnings
    }

    /// Sets one uniform declared by the schema, keeping its kind.
    pub fn set_uniform(
        &mut self,
        name: &str,
        value: impl Into<UniformValue>,
    ) -> Result<(), RenderError> {
        if self.schema.field(name).is_none() {
            return Err(RenderError::MissingField(name.to_string()));
        }
        self.uniforms.set(name, value)
    }

    /// Kept for the persisted record only; never written to the uniform block.
    pub fn set_camera_speed(&mut self, speed: f32) {
        self.camera_speed = speed;
    }

    /// Writes camera fields the schema declares. A changed transform
    /// invalidates accumulated samples unless auto refresh is on.
    pub fn set_camera(&mut self, camera: &CameraState) -> bool {
        self.camera_speed = camera.speed;
        let mut changed = false;
        for (name, value) in [
            ("camera_position", UniformValue::Vec3(camera.position)),
            ("camera_rotation", UniformValue::Mat4(camera.rotation)),
            ("fov", UniformValue::float(camera.fov)),
        ] {
            if self.uniforms.get(name) != Some(&value) && self.uniforms.set_if_declared(name, value)
            {
                changed = true;
            }
        }
        if changed && !self.settings.auto_refresh {
            self.refresh_screen();
        }
        changed
    }

    pub fn auto_refresh(&self) -> bool {
        self.settings.auto_refresh
    }

    pub fn set_auto_refresh(&mut self, enabled: bool) {
        self.settings.auto_refresh = enabled;
    }

    /// Restarts temporal accumulation.
    pub fn refresh_screen(&mut self) {
        if self.temporal_counter != 1 {
            debug!(previous = self.temporal_counter, "temporal accumulation reset");
        }
        self.temporal_counter = 1;
    }

    /// Clamps `requested` to `[1, 16]`; a change resets accumulation.
    pub fn set_render_scale(&mut self, requested: i64) -> u32 {
        let clamped =
            requested.clamp(MIN_RENDER_SCALE as i64, MAX_RENDER_SCALE as i64) as u32;
        if clamped != self.render_scale {
            self.render_scale = clamped;
            self.refresh_screen();
            debug!(render_scale = clamped, "render scale changed");
        }
        self.mirror_scalar("render_scale", clamped as f32);
        clamped
    }

    /// Clamps the visible surface size to the buffer maximum. Buffers are never
    /// reallocated; a changed size resets accumulation.
    pub fn sync_resolution(&mut self, visible: Extent) -> Result<Extent, RenderError> {
        self.ensure_live()?;
        let (effective, changed) = self.resources.sync_resolution(&mut self.backend, visible)?;
        if changed {
            self.uniforms.set_if_declared(
                "canvas_size",
                UniformValue::Vec2([effective.width as f32, effective.height as f32]),
            );
            self.refresh_screen();
        }
        Ok(effective)
    }

    /// Exchanges the halves of a ping-pong pair outside the per-frame cadence.
    pub fn swap(&mut self, pair: &str) -> Result<(), RenderError> {
        self.resources.swap(pair)
    }

    /// Packs and uploads uniforms, dispatches compute over the scaled extent,
    /// draws, then advances the temporal counter and swaps per-frame pairs.
    pub fn render_frame(&mut self) -> Result<(), RenderError> {
        self.ensure_live()?;
        self.poll_recompile();

        if self.settings.auto_refresh {
            self.refresh_screen();
        }
        self.mirror_scalar("temporal_counter", self.temporal_counter as f32);
        self.mirror_scalar("render_scale", self.render_scale as f32);

        let block = pack(&self.schema, &self.uniforms, self.settings.alignment)?;
        self.backend
            .write_buffer(self.resources.uniform_buffer(), 0, block.as_bytes())?;

        let render_extent = self.resources.effective_size().scaled_down(self.render_scale);
        let [group_x, group_y] = self.settings.workgroup;
        let frame = FrameSubmission {
            uniform: self.resources.uniform_buffer(),
            color: self.resources.color_buffer(),
            pairs: self.resources.pair_bindings(),
            workgroups: [
                render_extent.width.div_ceil(group_x.max(1)),
                render_extent.height.div_ceil(group_y.max(1)),
            ],
            render_extent,
        };
        if let Err(err) = self.backend.submit_frame(&self.current, &frame) {
            warn!(error = %err, "frame submission failed");
            return Err(err);
        }

        self.temporal_counter += 1;
        self.resources.swap_automatic();
        self.record_frame();
        Ok(())
    }

    /// Rebuilds the pipeline with new SDF source against the current schema.
    ///
    /// Source rejected by validation fails immediately with
    /// [`RenderError::CompileFailure`]; otherwise the build's generation is
    /// returned and the outcome is reported by [`GpuState::poll_recompile`].
    pub fn recompile(&mut self, user_source: &str) -> Result<u64, RenderError> {
        self.start_recompile(user_source, None)
    }

    /// Like [`GpuState::recompile`] but also swaps the uniform schema on
    /// success, migrating values by name.
    pub fn recompile_with_schema(
        &mut self,
        user_source: &str,
        schema: Schema,
    ) -> Result<u64, RenderError> {
        self.start_recompile(user_source, Some(schema))
    }

    fn start_recompile(
        &mut self,
        user_source: &str,
        schema: Option<Schema>,
    ) -> Result<u64, RenderError> {
        self.ensure_live()?;
        let target_schema = schema.as_ref().unwrap_or(&self.schema);
        let constants = shader_constants(&self.settings);
        let composed = match compose(target_schema, &self.sources, &constants, user_source) {
            Ok(composed) => composed,
            Err(diagnostics) => {
                warn!(
                    errors = diagnostics.count(Severity::Error),
                    "shader source rejected; keeping current pipeline"
                );
                self.last_error = Some(diagnostics.clone());
                return Err(RenderError::CompileFailure(diagnostics));
            }
        };

        if let Some(superseded) = self.pending.take() {
            debug!(
                generation = superseded.generation,
                "superseding pending recompile"
            );
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        let warnings = composed.warnings.clone();
        let future = self.backend.build_pipeline(PipelineRequest {
            generation,
            shader: composed,
            pair_count: self.resources.pair_count(),
        });
        self.pending = Some(PendingPipeline {
            generation,
            future,
            schema,
            user_source: user_source.to_string(),
            warnings,
        });
        info!(generation, "recompiling shader pipeline");

        match self.poll_recompile() {
            Some(RecompileOutcome {
                result: Err(diagnostics),
                ..
            }) => Err(RenderError::CompileFailure(diagnostics)),
            _ => Ok(generation),
        }
    }

    /// Applies a finished build, if any. Called once per frame by
    /// [`GpuState::render_frame`]; hosts may call it to surface diagnostics.
    pub fn poll_recompile(&mut self) -> Option<RecompileOutcome> {
        let mut pending = self.pending.take()?;
        let Some(result) = pending.future.poll() else {
            self.pending = Some(pending);
            return None;
        };
        let generation = pending.generation;

        if self.torn_down {
            debug!(generation, "discarding pipeline finished after teardown");
            return None;
        }

        let pipeline = match result {
            Ok(pipeline) => pipeline,
            Err(diagnostics) => {
                warn!(
                    generation,
                    errors = diagnostics.count(Severity::Error),
                    "pipeline rebuild failed; keeping previous pipeline"
                );
                self.last_error = Some(diagnostics.clone());
                return Some(RecompileOutcome {
                    generation,
                    result: Err(diagnostics),
                });
            }
        };

        if let Some(schema) = pending.schema.take() {
            let packed_len = schema.packed_len(self.settings.alignment) as u64;
            if let Err(err) = self
                .resources
                .reallocate_uniform(&mut self.backend, packed_len)
            {
                let diagnostics = ShaderDiagnostics::single(
                    Severity::Error,
                    DiagnosticOrigin::Layout,
                    err.to_string(),
                );
                self.last_error = Some(diagnostics.clone());
                return Some(RecompileOutcome {
                    generation,
                    result: Err(diagnostics),
                });
            }
            self.uniforms = self.uniforms.migrate(&schema);
            self.schema = schema;
            self.mirror_static_fields();
        }

        self.current = pipeline;
        self.current_generation = generation;
        self.user_source = pending.user_source;
        self.last_error = None;
        self.last_warnings = pending.warnings;
        self.refresh_screen();
        info!(
            generation,
            warnings = self.last_warnings.count(Severity::Warning),
            "shader pipeline swapped"
        );
        Some(RecompileOutcome {
            generation,
            result: Ok(()),
        })
    }

    /// Reads back the accumulation buffer for the current render extent.
    pub fn screenshot(&mut self) -> Result<RgbaImage, RenderError> {
        self.ensure_live()?;
        let extent = self.resources.effective_size().scaled_down(self.render_scale);
        let row_pixels = self.resources.max_resolution().width as u64;
        let stride = self.resources.pixel_stride();
        let rows = (extent.height as u64).saturating_sub(1);
        let len = rows * row_pixels * stride + extent.width as u64 * stride;
        let bytes = self
            .backend
            .read_buffer(self.resources.color_buffer(), 0, len)?;
        readback::rgba_image(&bytes, extent, row_pixels as usize, self.settings.exposure)
    }

    /// Snapshot of the camera, the `custom_*` scalars and the active SDF.
    pub fn persisted_state(&self) -> PersistedState {
        let mut camera = CameraState {
            speed: self.camera_speed,
            ..CameraState::default()
        };
        if let Some(UniformValue::Vec3(position)) = self.uniforms.get("camera_position") {
            camera.position = *position;
        }
        if let Some(UniformValue::Mat4(rotation)) = self.uniforms.get("camera_rotation") {
            camera.rotation = *rotation;
        }
        if let Some(fov) = self.uniforms.get("fov").and_then(UniformValue::as_f32) {
            camera.fov = fov;
        }

        let custom = self
            .schema
            .fields()
            .filter(|field| field.name.starts_with(PERSISTED_PREFIX))
            .filter_map(|field| {
                let value = self.uniforms.get(&field.name)?.as_f32()?;
                Some((field.name.clone(), value))
            })
            .collect();

        PersistedState {
            camera,
            custom,
            sdf_source: Some(self.user_source.clone()),
        }
    }

    /// Applies a stored record. Unknown or reshaped fields are skipped. The
    /// SDF source is left to the caller to recompile.
    pub fn restore(&mut self, state: &PersistedState) -> usize {
        self.set_camera(&state.camera);
        let mut applied = 0;
        for (name, value) in &state.custom {
            let applied_value = match self.schema.kind_of(name) {
                Some(ValueKind::Float) => self.uniforms.set_if_declared(name, *value),
                Some(ValueKind::Int) => self.uniforms.set_if_declared(name, value.round() as i32),
                _ => false,
            };
            if applied_value {
                applied += 1;
            } else {
                warn!(field = %name, "ignoring persisted uniform not declared by the schema");
            }
        }
        self.refresh_screen();
        applied
    }

    /// Releases all GPU resources. Pending builds are discarded when they land.
    pub fn destroy(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.resources.destroy(&mut self.backend);
    }

    fn ensure_live(&self) -> Result<(), RenderError> {
        if self.torn_down {
            Err(RenderError::TornDown)
        } else {
            Ok(())
        }
    }

    fn mirror_scalar(&mut self, name: &str, value: f32) {
        if !self.uniforms.set_if_declared(name, value) {
            self.uniforms.set_if_declared(name, value as i32);
        }
    }

    fn mirror_static_fields(&mut self) {
        let max = self.resources.max_resolution();
        self.uniforms.set_if_declared(
            "buffer_size",
            UniformValue::Vec2([max.width as f32, max.height as f32]),
        );
        let effective = self.resources.effective_size();
        if effective != Extent::default() {
            self.uniforms.set_if_declared(
                "canvas_size",
                UniformValue::Vec2([effective.width as f32, effective.height as f32]),
            );
        }
        self.mirror_scalar("render_scale", self.render_scale as f32);
        self.mirror_scalar("temporal_counter", self.temporal_counter as f32);
    }

    fn record_frame(&mut self) {
        self.stats.frames_since_report += 1;
        let elapsed = self.stats.last_report.elapsed();
        if elapsed >= Duration::from_secs(1) {
            let fps = self.stats.frames_since_report as f32 / elapsed.as_secs_f32();
            debug!(
                fps = fps.round(),
                temporal_counter = self.temporal_counter,
                render_scale = self.render_scale,
                pending = self.pending.is_some(),
                "render stats"
            );
            self.stats.frames_since_report = 0;
            self.stats.last_report = Instant::now();
        }
    }
}

impl<B: GpuBackend> Drop for GpuState<B> {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn shader_constants(settings: &RenderSettings) -> ShaderConstants {
    ShaderConstants {
        workgroup: settings.workgroup,
        exposure: settings.exposure,
    }
}
