use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use glam::Vec3;
use winit::dpi::{PhysicalPosition, PhysicalSize};
use winit::event::{ElementState, Event, KeyEvent, MouseButton, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::WindowBuilder;

use tracing::{debug, error, info, warn};

use crate::camera::FlyCamera;
use crate::compile::ShaderSources;
use crate::error::RenderError;
use crate::gpu::{Extent, GpuBackend, GpuState, RenderSettings, WgpuBackend};
use crate::persist::PersistedState;
use crate::schema::Schema;
use crate::value::UniformValue;

const LOOK_SPEED: f32 = 0.005;

/// Receives the persisted record on the autosave timer and on exit.
pub trait StateSink {
    fn save(&mut self, state: &PersistedState) -> Result<()>;
}

/// Everything the preview needs to open a window and start rendering.
pub struct PreviewConfig {
    pub title: String,
    pub window_size: Extent,
    pub schema: Schema,
    pub sources: ShaderSources,
    pub sdf_source: String,
    /// Re-read and recompiled on F5.
    pub sdf_path: Option<PathBuf>,
    pub settings: RenderSettings,
    /// Applied after any restored state.
    pub uniforms: Vec<(String, UniformValue)>,
    pub restore: Option<PersistedState>,
    /// Fly speed; overrides the restored one when set.
    pub camera_speed: Option<f32>,
    pub screenshot_dir: PathBuf,
    pub autosave: Duration,
}

/// Opens the preview window and runs the frame loop until it is closed.
pub fn run_preview(config: PreviewConfig, mut sink: Box<dyn StateSink>) -> Result<()> {
    let event_loop = EventLoop::new().map_err(|err| anyhow!("failed to create event loop: {err}"))?;
    let window = WindowBuilder::new()
        .with_title(&config.title)
        .with_inner_size(PhysicalSize::new(
            config.window_size.width.max(1),
            config.window_size.height.max(1),
        ))
        .build(&event_loop)
        .map_err(|err| anyhow!("failed to create preview window: {err}"))?;
    let window = Arc::new(window);

    let size = window.inner_size();
    let initial = Extent::new(size.width.max(1), size.height.max(1));
    let backend = WgpuBackend::new(window.clone(), initial)
        .context("failed to initialise GPU backend")?;
    info!(adapter = backend.adapter_name(), "preview backend ready");

    let mut gpu = GpuState::new(
        backend,
        config.schema,
        config.sources,
        &config.sdf_source,
        config.settings,
        initial,
    )
    .map_err(|err| describe_render_error("failed to build renderer", err))?;
    for warning in gpu.compilation_warnings().iter() {
        warn!("{warning}");
    }

    apply_startup_values(
        &mut gpu,
        config.restore.as_ref(),
        &config.uniforms,
        config.camera_speed,
    );
    let mut controls = Controls::new(FlyCamera::from_state(&gpu.persisted_state().camera));
    gpu.set_camera(&controls.camera.state());

    let sdf_path = config.sdf_path;
    let screenshot_dir = config.screenshot_dir;
    let autosave = config.autosave;
    let mut last_save = Instant::now();
    let mut last_frame = Instant::now();

    let run_result = event_loop.run(move |event, elwt| {
        match event {
            Event::WindowEvent { window_id, event } if window_id == window.id() => match event {
                WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                    elwt.exit();
                }
                WindowEvent::Resized(new_size) => {
                    let visible = Extent::new(new_size.width, new_size.height);
                    if visible.area() == 0 {
                        return;
                    }
                    if let Err(err) = gpu.sync_resolution(visible) {
                        error!(error = %err, "failed to resize renderer");
                    }
                }
                WindowEvent::KeyboardInput { event, .. } => {
                    match controls.handle_key(&event) {
                        Some(Action::Exit) => elwt.exit(),
                        Some(Action::Refresh) => gpu.refresh_screen(),
                        Some(Action::ScaleUp) => {
                            let scale = gpu.set_render_scale(gpu.render_scale() as i64 + 1);
                            info!(render_scale = scale, "render scale");
                        }
                        Some(Action::ScaleDown) => {
                            let scale = gpu.set_render_scale(gpu.render_scale() as i64 - 1);
                            info!(render_scale = scale, "render scale");
                        }
                        Some(Action::Reload) => reload_sdf(&mut gpu, sdf_path.as_deref()),
                        Some(Action::Screenshot) => match gpu.screenshot() {
                            Ok(image) => {
                                let path = screenshot_path(&screenshot_dir, Local::now());
                                match save_png(&image, &path) {
                                    Ok(()) => info!(path = %path.display(), "screenshot saved"),
                                    Err(err) => error!("{err:#}"),
                                }
                            }
                            Err(err) => error!(error = %err, "screenshot failed"),
                        },
                        None => {}
                    }
                }
                WindowEvent::CursorMoved { position, .. } => {
                    controls.handle_cursor(position);
                }
                WindowEvent::MouseInput {
                    state: button_state,
                    button: MouseButton::Left,
                    ..
                } => {
                    controls.dragging = button_state == ElementState::Pressed;
                }
                WindowEvent::RedrawRequested => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_frame).as_secs_f32();
                    last_frame = now;
                    if controls.advance(dt) {
                        gpu.set_camera(&controls.camera.state());
                    }

                    if let Some(outcome) = gpu.poll_recompile() {
                        if let Err(diagnostics) = outcome.result {
                            for diagnostic in diagnostics.iter() {
                                error!(generation = outcome.generation, "{diagnostic}");
                            }
                        }
                    }

                    match gpu.render_frame() {
                        Ok(()) => {}
                        Err(err) if err.is_recoverable() => {
                            debug!(error = %err, "skipping frame");
                        }
                        Err(err) => {
                            error!(error = %err, "rendering stopped");
                            elwt.exit();
                        }
                    }

                    if last_save.elapsed() >= autosave {
                        if let Err(err) = sink.save(&gpu.persisted_state()) {
                            warn!("autosave failed: {err:#}");
                        }
                        last_save = Instant::now();
                    }
                }
                _ => {}
            },
            Event::AboutToWait => {
                window.request_redraw();
                elwt.set_control_flow(ControlFlow::Poll);
            }
            Event::LoopExiting => {
                if !gpu.is_destroyed() {
                    if let Err(err) = sink.save(&gpu.persisted_state()) {
                        warn!("failed to save state on exit: {err:#}");
                    }
                }
                gpu.destroy();
            }
            _ => {}
        }
    });

    run_result.map_err(|err| anyhow!("window event loop error: {err}"))
}

/// Restores the saved session, then applies explicit values on top so a
/// named SDF's defaults and config overrides win over the previous session.
fn apply_startup_values<B: GpuBackend>(
    gpu: &mut GpuState<B>,
    restore: Option<&PersistedState>,
    overrides: &[(String, UniformValue)],
    camera_speed: Option<f32>,
) {
    if let Some(state) = restore {
        let applied = gpu.restore(state);
        debug!(applied, "restored persisted uniforms");
    }
    if let Some(speed) = camera_speed {
        gpu.set_camera_speed(speed);
    }
    for (name, value) in overrides {
        if let Err(err) = gpu.set_uniform(name, *value) {
            warn!(field = %name, error = %err, "ignoring uniform override");
        }
    }
}

fn reload_sdf(gpu: &mut GpuState<WgpuBackend>, path: Option<&Path>) {
    let Some(path) = path else {
        warn!("no SDF file to reload; start with --sdf to enable F5");
        return;
    };
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            error!(path = %path.display(), "failed to read SDF: {err}");
            return;
        }
    };
    match gpu.recompile(&source) {
        Ok(generation) => info!(generation, path = %path.display(), "reloading SDF"),
        Err(RenderError::CompileFailure(diagnostics)) => {
            for diagnostic in diagnostics.iter() {
                error!("{diagnostic}");
            }
        }
        Err(err) => error!(error = %err, "recompile failed"),
    }
}

fn describe_render_error(context: &str, err: RenderError) -> anyhow::Error {
    match err {
        RenderError::CompileFailure(diagnostics) => anyhow!("{context}:\n{diagnostics}"),
        other => anyhow::Error::new(other).context(context.to_string()),
    }
}

/// `<dir>/marchbox-YYYYmmdd-HHMMSS.png`
pub fn screenshot_path(dir: &Path, taken: DateTime<Local>) -> PathBuf {
    dir.join(format!("marchbox-{}.png", taken.format("%Y%m%d-%H%M%S")))
}

pub fn save_png(image: &image::RgbaImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    image
        .save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("failed to write screenshot to {}", path.display()))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Action {
    Exit,
    Refresh,
    ScaleUp,
    ScaleDown,
    Reload,
    Screenshot,
}

/// Keyboard and mouse state for the fly camera.
struct Controls {
    camera: FlyCamera,
    held: HashSet<char>,
    dragging: bool,
    cursor: Option<PhysicalPosition<f64>>,
    look: (f32, f32),
}

impl Controls {
    fn new(camera: FlyCamera) -> Self {
        Self {
            camera,
            held: HashSet::new(),
            dragging: false,
            cursor: None,
            look: (0.0, 0.0),
        }
    }

    fn handle_key(&mut self, event: &KeyEvent) -> Option<Action> {
        let pressed = event.state == ElementState::Pressed;
        match &event.logical_key {
            Key::Character(text) => {
                let key = text.chars().next()?.to_ascii_lowercase();
                if "wasdqe".contains(key) {
                    if pressed {
                        self.held.insert(key);
                    } else {
                        self.held.remove(&key);
                    }
                    return None;
                }
                if !pressed || event.repeat {
                    return None;
                }
                match key {
                    'r' => Some(Action::Refresh),
                    '+' | '=' => Some(Action::ScaleUp),
                    '-' => Some(Action::ScaleDown),
                    _ => None,
                }
            }
            Key::Named(named) if pressed && !event.repeat => match named {
                NamedKey::Escape => Some(Action::Exit),
                NamedKey::F5 => Some(Action::Reload),
                NamedKey::F12 => Some(Action::Screenshot),
                _ => None,
            },
            _ => None,
        }
    }

    fn handle_cursor(&mut self, position: PhysicalPosition<f64>) {
        if let (true, Some(previous)) = (self.dragging, self.cursor) {
            self.look.0 += (position.x - previous.x) as f32;
            self.look.1 += (position.y - previous.y) as f32;
        }
        self.cursor = Some(position);
    }

    /// Applies held keys and accumulated drag. Returns whether the camera moved.
    fn advance(&mut self, dt: f32) -> bool {
        let mut local = Vec3::ZERO;
        for key in &self.held {
            local += match key {
                'w' => Vec3::Z,
                's' => Vec3::NEG_Z,
                'd' => Vec3::X,
                'a' => Vec3::NEG_X,
                'e' => Vec3::Y,
                'q' => Vec3::NEG_Y,
                _ => Vec3::ZERO,
            };
        }
        let (dx, dy) = std::mem::take(&mut self.look);
        let looked = dx != 0.0 || dy != 0.0;
        if looked {
            self.camera.rotate(dx * LOOK_SPEED, dy * LOOK_SPEED);
        }
        let moved = local != Vec3::ZERO;
        if moved {
            self.camera
                .translate_local(local.normalize() * self.camera.speed * dt);
        }
        moved || looked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::testing::RecordingBackend;
    use crate::persist::DEFAULT_CAMERA_SPEED;
    use chrono::TimeZone;

    #[test]
    fn screenshot_names_are_timestamped() {
        let taken = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let path = screenshot_path(Path::new("/tmp/shots"), taken);
        assert_eq!(path, PathBuf::from("/tmp/shots/marchbox-20240309-140507.png"));
    }

    #[test]
    fn explicit_uniforms_override_the_saved_session() {
        let schema = Schema::builder()
            .field("custom_a", -2.0)
            .field("custom_b", 1.0)
            .pad(2)
            .build()
            .unwrap();
        let sources = ShaderSources {
            compute: "@group(0) @binding(0) var<uniform> uniforms: Uniforms;\n\
                      @compute @workgroup_size(WORKGROUP_X, WORKGROUP_Y)\n\
                      fn computeMain() { let d = sdf(vec3<f32>(uniforms.custom_a)); }\n"
                .to_string(),
            render: "@vertex fn vertexMain() -> @builtin(position) vec4<f32> { return vec4<f32>(0.0); }\n"
                .to_string(),
        };
        let mut gpu = GpuState::new(
            RecordingBackend::default(),
            schema,
            sources,
            "fn sdf(p: vec3<f32>) -> f32 { return length(p) - 1.0; }\n",
            RenderSettings::default(),
            Extent::new(64, 64),
        )
        .unwrap();

        let mut saved = PersistedState::default();
        saved.custom.insert("custom_a".to_string(), -2.0);
        saved.custom.insert("custom_b".to_string(), 3.0);
        let overrides = vec![("custom_a".to_string(), UniformValue::float(8.0))];
        saved.camera.speed = 4.0;
        apply_startup_values(&mut gpu, Some(&saved), &overrides, Some(9.0));

        assert_eq!(
            gpu.uniforms().get("custom_a"),
            Some(&UniformValue::float(8.0))
        );
        // Values nothing overrides still come back from the session.
        assert_eq!(
            gpu.uniforms().get("custom_b"),
            Some(&UniformValue::float(3.0))
        );
        assert_eq!(gpu.persisted_state().camera.speed, 9.0);
    }

    #[test]
    fn held_keys_move_the_camera_forward() {
        let mut controls = Controls::new(FlyCamera::default());
        let start = controls.camera.position;
        controls.held.insert('w');
        assert!(controls.advance(1.0));
        let travelled = controls.camera.position - start;
        assert!((travelled - Vec3::Z * DEFAULT_CAMERA_SPEED).length() < 1e-4);
        controls.held.clear();
        assert!(!controls.advance(1.0));
    }

    #[test]
    fn movement_follows_the_camera_speed() {
        let mut controls = Controls::new(FlyCamera {
            speed: 10.0,
            ..FlyCamera::default()
        });
        let start = controls.camera.position;
        controls.held.insert('d');
        assert!(controls.advance(0.5));
        assert!((controls.camera.position - start - Vec3::X * 5.0).length() < 1e-4);
    }

    #[test]
    fn drag_rotates_only_while_pressed() {
        let mut controls = Controls::new(FlyCamera::default());
        controls.handle_cursor(PhysicalPosition::new(10.0, 10.0));
        controls.handle_cursor(PhysicalPosition::new(30.0, 10.0));
        assert!(!controls.advance(0.0));

        controls.dragging = true;
        controls.handle_cursor(PhysicalPosition::new(50.0, 10.0));
        assert!(controls.advance(0.0));
        assert!((controls.camera.yaw - 20.0 * LOOK_SPEED).abs() < 1e-6);
    }
}
