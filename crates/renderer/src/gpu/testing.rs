//! In-memory backend that records every call, for lifecycle tests.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{self, Sender};

use crate::compile::ShaderDiagnostics;
use crate::error::RenderError;

use super::backend::{
    BufferDesc, BufferId, DeviceLimits, Extent, FrameSubmission, GpuBackend, PipelineFuture,
    PipelineRequest,
};

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Call {
    CreateBuffer(BufferId, BufferDesc),
    WriteBuffer(BufferId, Vec<u8>),
    ReadBuffer(BufferId),
    DestroyBuffer(BufferId),
    ConfigureSurface(Extent),
    BuildPipeline(u64),
    Submit(u64, FrameSubmission),
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct MockPipeline {
    pub generation: u64,
    pub compute: String,
}

type BuildSender = Sender<Result<MockPipeline, ShaderDiagnostics>>;

pub(crate) struct RecordingBackend {
    pub calls: Vec<Call>,
    pub limits: DeviceLimits,
    /// Hold pipeline builds until `complete`/`fail` is called.
    pub defer_builds: bool,
    /// Device-side failure injected into the next build.
    pub fail_next_build: Option<ShaderDiagnostics>,
    pub fail_next_submit: bool,
    next_id: u64,
    buffers: HashMap<BufferId, Vec<u8>>,
    destroyed: HashSet<BufferId>,
    deferred: Vec<(u64, BuildSender, MockPipeline)>,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            limits: DeviceLimits {
                max_buffer_size: 256 << 20,
                max_storage_binding: 128 << 20,
                max_uniform_binding: 64 << 10,
                max_surface_dimension: 8192,
            },
            defer_builds: false,
            fail_next_build: None,
            fail_next_submit: false,
            next_id: 1,
            buffers: HashMap::new(),
            destroyed: HashSet::new(),
            deferred: Vec::new(),
        }
    }
}

impl RecordingBackend {
    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|call| predicate(call)).count()
    }

    pub fn created_count(&self) -> usize {
        self.count(|call| matches!(call, Call::CreateBuffer(..)))
    }

    pub fn buffer_size(&self, id: BufferId) -> Option<u64> {
        self.buffers.get(&id).map(|data| data.len() as u64)
    }

    pub fn is_live(&self, id: BufferId) -> bool {
        self.buffers.contains_key(&id) && !self.destroyed.contains(&id)
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers
            .keys()
            .filter(|id| !self.destroyed.contains(id))
            .count()
    }

    pub fn writes_to(&self, id: BufferId) -> Vec<Vec<u8>> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::WriteBuffer(target, bytes) if *target == id => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn submissions(&self) -> Vec<(u64, FrameSubmission)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Submit(generation, frame) => Some((*generation, frame.clone())),
                _ => None,
            })
            .collect()
    }

    /// Overwrites buffer contents without recording a call.
    pub fn fill(&mut self, id: BufferId, data: &[u8]) {
        if let Some(buffer) = self.buffers.get_mut(&id) {
            buffer[..data.len()].copy_from_slice(data);
        }
    }

    pub fn complete(&mut self, generation: u64) {
        if let Some(index) = self.deferred.iter().position(|(pending, ..)| *pending == generation) {
            let (_, sender, pipeline) = self.deferred.remove(index);
            let _ = sender.send(Ok(pipeline));
        }
    }

    pub fn fail(&mut self, generation: u64, diagnostics: ShaderDiagnostics) {
        if let Some(index) = self.deferred.iter().position(|(pending, ..)| *pending == generation) {
            let (_, sender, _) = self.deferred.remove(index);
            let _ = sender.send(Err(diagnostics));
        }
    }
}

impl GpuBackend for RecordingBackend {
    type Pipeline = MockPipeline;

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferId, RenderError> {
        let id = BufferId(self.next_id);
        self.next_id += 1;
        self.buffers.insert(id, vec![0; desc.size as usize]);
        self.calls.push(Call::CreateBuffer(id, desc.clone()));
        Ok(id)
    }

    fn write_buffer(&mut self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), RenderError> {
        if !self.is_live(id) {
            return Err(RenderError::UnknownResource(format!("{id:?}")));
        }
        self.calls.push(Call::WriteBuffer(id, data.to_vec()));
        let start = offset as usize;
        if let Some(buffer) = self.buffers.get_mut(&id) {
            buffer[start..start + data.len()].copy_from_slice(data);
        }
        Ok(())
    }

    fn read_buffer(&mut self, id: BufferId, offset: u64, len: u64) -> Result<Vec<u8>, RenderError> {
        self.calls.push(Call::ReadBuffer(id));
        let buffer = self
            .buffers
            .get(&id)
            .ok_or_else(|| RenderError::UnknownResource(format!("{id:?}")))?;
        let start = offset as usize;
        Ok(buffer[start..start + len as usize].to_vec())
    }

    fn destroy_buffer(&mut self, id: BufferId) {
        self.destroyed.insert(id);
        self.calls.push(Call::DestroyBuffer(id));
    }

    fn configure_surface(&mut self, size: Extent) {
        self.calls.push(Call::ConfigureSurface(size));
    }

    fn build_pipeline(&mut self, request: PipelineRequest) -> PipelineFuture<MockPipeline> {
        self.calls.push(Call::BuildPipeline(request.generation));
        let pipeline = MockPipeline {
            generation: request.generation,
            compute: request.shader.compute,
        };
        if let Some(diagnostics) = self.fail_next_build.take() {
            return PipelineFuture::Ready(Err(diagnostics));
        }
        if self.defer_builds {
            let (sender, receiver) = mpsc::channel();
            self.deferred.push((request.generation, sender, pipeline));
            return PipelineFuture::Threaded { receiver };
        }
        PipelineFuture::ready(pipeline)
    }

    fn submit_frame(
        &mut self,
        pipeline: &MockPipeline,
        frame: &FrameSubmission,
    ) -> Result<(), RenderError> {
        if std::mem::take(&mut self.fail_next_submit) {
            return Err(RenderError::Surface {
                reason: "surface lost".to_string(),
                recoverable: true,
            });
        }
        self.calls
            .push(Call::Submit(pipeline.generation, frame.clone()));
        Ok(())
    }
}
