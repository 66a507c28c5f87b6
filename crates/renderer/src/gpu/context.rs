use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::mpsc;
use std::thread;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, warn};

use crate::compile::{
    ComposedShader, DiagnosticOrigin, Severity, ShaderDiagnostic, ShaderDiagnostics,
    SourceLocation, COMPUTE_ENTRY, FRAGMENT_ENTRY, VERTEX_ENTRY,
};
use crate::error::RenderError;

use super::backend::{
    BufferDesc, BufferId, BufferUsage, DeviceLimits, Extent, FrameSubmission, GpuBackend,
    PipelineFuture, PipelineRequest,
};

/// Compute and render pipelines for one generation, with the layouts their
/// bind groups are created against.
pub struct WgpuPipeline {
    generation: u64,
    compute: wgpu::ComputePipeline,
    render: wgpu::RenderPipeline,
    compute_layout: wgpu::BindGroupLayout,
    render_layout: wgpu::BindGroupLayout,
}

impl WgpuPipeline {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct BindingKey {
    generation: u64,
    uniform: BufferId,
    color: BufferId,
    pairs: Vec<(BufferId, BufferId)>,
}

impl BindingKey {
    fn references(&self, id: BufferId) -> bool {
        self.uniform == id
            || self.color == id
            || self.pairs.iter().any(|(read, write)| *read == id || *write == id)
    }
}

struct FrameBindGroups {
    compute: wgpu::BindGroup,
    render: wgpu::BindGroup,
}

/// [`GpuBackend`] over a wgpu device presenting to a window surface.
pub struct WgpuBackend {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    limits: DeviceLimits,
    adapter_name: String,
    buffers: HashMap<BufferId, wgpu::Buffer>,
    next_id: u64,
    bind_groups: HashMap<BindingKey, FrameBindGroups>,
}

impl WgpuBackend {
    pub fn new<T>(target: T, initial_size: Extent) -> Result<Self, RenderError>
    where
        T: HasDisplayHandle + HasWindowHandle + Send + Sync + 'static,
    {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
            backend_options: wgpu::BackendOptions::default(),
        });

        let surface = instance.create_surface(target).map_err(|err| {
            RenderError::UnsupportedBackend(format!("failed to create rendering surface: {err}"))
        })?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .map_err(|err| RenderError::UnsupportedBackend(format!("no suitable GPU adapter: {err}")))?;

        let info = adapter.get_info();
        let adapter_limits = adapter.limits();
        debug!(
            name = %info.name,
            backend = ?info.backend,
            device_type = ?info.device_type,
            "selected GPU adapter"
        );

        let max_dimension = adapter_limits.max_texture_dimension_2d;
        let width = initial_size.width.max(1);
        let height = initial_size.height.max(1);
        if width > max_dimension || height > max_dimension {
            return Err(RenderError::UnsupportedBackend(format!(
                "GPU max texture dimension is {max_dimension}, requested surface is {width}x{height}"
            )));
        }

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("marchbox device"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter_limits.clone(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .map_err(|err| RenderError::UnsupportedBackend(format!("failed to create GPU device: {err}")))?;

        let caps = surface.get_capabilities(&adapter);
        let Some(&first_format) = caps.formats.first() else {
            return Err(RenderError::UnsupportedBackend(
                "surface reports no supported formats".to_string(),
            ));
        };
        // The accumulation buffer already holds display values; an sRGB target
        // would encode them twice and disagree with screenshots.
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|format| !format.is_srgb())
            .unwrap_or_else(|| {
                warn!(
                    fallback = ?first_format,
                    "no linear (non-sRGB) surface format available"
                );
                first_format
            });
        let present_mode = caps
            .present_modes
            .iter()
            .copied()
            .find(|mode| *mode == wgpu::PresentMode::Fifo)
            .or_else(|| caps.present_modes.first().copied())
            .unwrap_or(wgpu::PresentMode::Fifo);
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let limits = DeviceLimits {
            max_buffer_size: adapter_limits.max_buffer_size,
            max_storage_binding: adapter_limits.max_storage_buffer_binding_size as u64,
            max_uniform_binding: adapter_limits.max_uniform_buffer_binding_size as u64,
            max_surface_dimension: max_dimension,
        };

        Ok(Self {
            surface,
            device,
            queue,
            config,
            limits,
            adapter_name: info.name,
            buffers: HashMap::new(),
            next_id: 1,
            bind_groups: HashMap::new(),
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn buffer(&self, id: BufferId) -> Result<&wgpu::Buffer, RenderError> {
        self.buffers
            .get(&id)
            .ok_or_else(|| RenderError::UnknownResource(format!("buffer {}", id.0)))
    }

    fn ensure_bind_groups(
        &mut self,
        pipeline: &WgpuPipeline,
        frame: &FrameSubmission,
    ) -> Result<BindingKey, RenderError> {
        let key = BindingKey {
            generation: pipeline.generation,
            uniform: frame.uniform,
            color: frame.color,
            pairs: frame.pairs.clone(),
        };
        if !self.bind_groups.contains_key(&key) {
            // Groups built for an older generation are never used again.
            self.bind_groups
                .retain(|cached, _| cached.generation == pipeline.generation);

            let uniform = self.buffer(frame.uniform)?;
            let color = self.buffer(frame.color)?;
            let mut compute_entries = vec![
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: color.as_entire_binding(),
                },
            ];
            for (index, (read, write)) in frame.pairs.iter().enumerate() {
                let binding = 2 + 2 * index as u32;
                compute_entries.push(wgpu::BindGroupEntry {
                    binding,
                    resource: self.buffer(*read)?.as_entire_binding(),
                });
                compute_entries.push(wgpu::BindGroupEntry {
                    binding: binding + 1,
                    resource: self.buffer(*write)?.as_entire_binding(),
                });
            }
            let compute = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("compute bind group"),
                layout: &pipeline.compute_layout,
                entries: &compute_entries,
            });
            let render = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("render bind group"),
                layout: &pipeline.render_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: uniform.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: color.as_entire_binding(),
                    },
                ],
            });
            self.bind_groups
                .insert(key.clone(), FrameBindGroups { compute, render });
        }
        Ok(key)
    }
}

impl GpuBackend for WgpuBackend {
    type Pipeline = WgpuPipeline;

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferId, RenderError> {
        let usage = match desc.usage {
            BufferUsage::Uniform => wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            BufferUsage::Storage => {
                wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST
            }
        };
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&desc.label),
            size: desc.size,
            usage,
            mapped_at_creation: false,
        });
        let id = BufferId(self.next_id);
        self.next_id += 1;
        self.buffers.insert(id, buffer);
        Ok(id)
    }

    fn write_buffer(&mut self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), RenderError> {
        let buffer = self.buffer(id)?;
        self.queue.write_buffer(buffer, offset, data);
        Ok(())
    }

    fn read_buffer(&mut self, id: BufferId, offset: u64, len: u64) -> Result<Vec<u8>, RenderError> {
        let source = self.buffer(id)?;
        let aligned = len.div_ceil(wgpu::COPY_BUFFER_ALIGNMENT) * wgpu::COPY_BUFFER_ALIGNMENT;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback staging buffer"),
            size: aligned,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback encoder"),
            });
        encoder.copy_buffer_to_buffer(source, offset, &staging, 0, aligned);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| RenderError::Readback(format!("device poll failed: {err}")))?;
        receiver
            .recv()
            .map_err(|_| RenderError::Readback("map callback never ran".to_string()))?
            .map_err(|err| RenderError::Readback(err.to_string()))?;

        let mapped = slice.get_mapped_range();
        let bytes = mapped[..len as usize].to_vec();
        drop(mapped);
        staging.unmap();
        Ok(bytes)
    }

    fn destroy_buffer(&mut self, id: BufferId) {
        self.bind_groups.retain(|key, _| !key.references(id));
        if let Some(buffer) = self.buffers.remove(&id) {
            buffer.destroy();
        }
    }

    fn configure_surface(&mut self, size: Extent) {
        let max = self.limits.max_surface_dimension;
        self.config.width = size.width.clamp(1, max);
        self.config.height = size.height.clamp(1, max);
        self.surface.configure(&self.device, &self.config);
    }

    fn build_pipeline(&mut self, request: PipelineRequest) -> PipelineFuture<WgpuPipeline> {
        let device = self.device.clone();
        let format = self.config.format;
        let generation = request.generation;
        let (sender, receiver) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name(format!("pipeline-{generation}"))
            .spawn(move || {
                let result = build_pipeline(&device, format, request);
                let _ = sender.send(result);
            });
        match spawned {
            Ok(_) => PipelineFuture::Threaded { receiver },
            Err(err) => PipelineFuture::Ready(Err(ShaderDiagnostics::single(
                Severity::Error,
                DiagnosticOrigin::BaseShader,
                format!("failed to spawn pipeline build thread: {err}"),
            ))),
        }
    }

    fn submit_frame(
        &mut self,
        pipeline: &WgpuPipeline,
        frame: &FrameSubmission,
    ) -> Result<(), RenderError> {
        let target = match self.surface.get_current_texture() {
            Ok(target) => target,
            Err(err @ (wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
                self.surface.configure(&self.device, &self.config);
                return Err(RenderError::Surface {
                    reason: err.to_string(),
                    recoverable: true,
                });
            }
            Err(err @ wgpu::SurfaceError::Timeout) => {
                return Err(RenderError::Surface {
                    reason: err.to_string(),
                    recoverable: true,
                });
            }
            Err(err) => {
                return Err(RenderError::Surface {
                    reason: err.to_string(),
                    recoverable: false,
                });
            }
        };

        let key = self.ensure_bind_groups(pipeline, frame)?;
        let groups = self
            .bind_groups
            .get(&key)
            .ok_or_else(|| RenderError::UnknownResource("frame bind groups".to_string()))?;
        let view = target
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("raymarch pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipeline.compute);
            pass.set_bind_group(0, &groups.compute, &[]);
            pass.dispatch_workgroups(frame.workgroups[0], frame.workgroups[1], 1);
        }
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("present pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&pipeline.render);
            pass.set_bind_group(0, &groups.render, &[]);
            pass.draw(0..3, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
        target.present();
        Ok(())
    }
}

fn storage_entry(
    binding: u32,
    visibility: wgpu::ShaderStages,
    read_only: bool,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding: 0,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Runs on the build thread. Error scopes are per thread, so the whole build
/// is bracketed here.
fn build_pipeline(
    device: &wgpu::Device,
    format: wgpu::TextureFormat,
    request: PipelineRequest,
) -> Result<WgpuPipeline, ShaderDiagnostics> {
    let PipelineRequest {
        generation,
        shader,
        pair_count,
    } = request;
    device.push_error_scope(wgpu::ErrorFilter::Validation);

    let compute_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("compute shader"),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(&shader.compute)),
    });
    let render_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("render shader"),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(&shader.render)),
    });

    let mut compute_entries = vec![
        uniform_entry(wgpu::ShaderStages::COMPUTE),
        storage_entry(1, wgpu::ShaderStages::COMPUTE, false),
    ];
    for index in 0..pair_count as u32 {
        compute_entries.push(storage_entry(2 + 2 * index, wgpu::ShaderStages::COMPUTE, true));
        compute_entries.push(storage_entry(3 + 2 * index, wgpu::ShaderStages::COMPUTE, false));
    }
    let compute_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("compute layout"),
        entries: &compute_entries,
    });
    let render_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("render layout"),
        entries: &[
            uniform_entry(wgpu::ShaderStages::VERTEX_FRAGMENT),
            storage_entry(1, wgpu::ShaderStages::FRAGMENT, true),
        ],
    });

    let compute_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("compute pipeline layout"),
        bind_group_layouts: &[&compute_layout],
        push_constant_ranges: &[],
    });
    let render_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("render pipeline layout"),
        bind_group_layouts: &[&render_layout],
        push_constant_ranges: &[],
    });

    let compute = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some("compute pipeline"),
        layout: Some(&compute_pipeline_layout),
        module: &compute_module,
        entry_point: Some(COMPUTE_ENTRY),
        compilation_options: wgpu::PipelineCompilationOptions::default(),
        cache: None,
    });
    let render = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("render pipeline"),
        layout: Some(&render_pipeline_layout),
        vertex: wgpu::VertexState {
            module: &render_module,
            entry_point: Some(VERTEX_ENTRY),
            buffers: &[],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: &render_module,
            entry_point: Some(FRAGMENT_ENTRY),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        multiview: None,
        cache: None,
    });

    let mut diagnostics = ShaderDiagnostics::new();
    let compute_info = pollster::block_on(compute_module.get_compilation_info());
    for message in compute_info.messages {
        let (origin, location) = match message.location {
            Some(location) => {
                let (origin, mapped) =
                    shader.locate_compute(location.line_number, location.line_position);
                (origin, Some(mapped))
            }
            None => (DiagnosticOrigin::BaseShader, None),
        };
        diagnostics.push(device_diagnostic(
            message.message_type,
            message.message,
            origin,
            location,
        ));
    }
    let render_info = pollster::block_on(render_module.get_compilation_info());
    for message in render_info.messages {
        let location = message.location.map(|location| SourceLocation {
            line: location.line_number,
            column: location.line_position,
        });
        diagnostics.push(device_diagnostic(
            message.message_type,
            message.message,
            DiagnosticOrigin::RenderShader,
            location,
        ));
    }
    if let Some(error) = pollster::block_on(device.pop_error_scope()) {
        diagnostics.push(ShaderDiagnostic {
            severity: Severity::Error,
            message: error.to_string(),
            origin: DiagnosticOrigin::BaseShader,
            location: None,
        });
    }

    if diagnostics.has_errors() {
        return Err(diagnostics);
    }
    log_warnings(generation, &shader, &diagnostics);
    Ok(WgpuPipeline {
        generation,
        compute,
        render,
        compute_layout,
        render_layout,
    })
}

fn device_diagnostic(
    kind: wgpu::CompilationMessageType,
    message: String,
    origin: DiagnosticOrigin,
    location: Option<SourceLocation>,
) -> ShaderDiagnostic {
    let severity = match kind {
        wgpu::CompilationMessageType::Error => Severity::Error,
        wgpu::CompilationMessageType::Warning => Severity::Warning,
        wgpu::CompilationMessageType::Info => Severity::Info,
    };
    ShaderDiagnostic {
        severity,
        message,
        origin,
        location,
    }
}

fn log_warnings(generation: u64, shader: &ComposedShader, diagnostics: &ShaderDiagnostics) {
    for diagnostic in diagnostics.iter().chain(shader.warnings.iter()) {
        if diagnostic.severity == Severity::Warning {
            warn!(generation, "{diagnostic}");
        }
    }
}
