use tracing::{debug, info};

use crate::error::RenderError;

use super::backend::{BufferDesc, BufferId, BufferUsage, Extent, GpuBackend};

/// Bytes per accumulation pixel (RGBA32F).
pub const PIXEL_STRIDE: u64 = 16;

/// Declaration of a ping-pong buffer pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PingPongSpec {
    pub name: String,
    /// Size of each half.
    pub bytes: u64,
    /// Swap automatically at the end of every rendered frame.
    pub auto_swap: bool,
}

impl PingPongSpec {
    pub fn new(name: &str, bytes: u64) -> Self {
        Self {
            name: name.to_string(),
            bytes,
            auto_swap: true,
        }
    }

    /// A pair the host swaps itself through [`ResourceSet::swap`].
    pub fn manual(name: &str, bytes: u64) -> Self {
        Self {
            auto_swap: false,
            ..Self::new(name, bytes)
        }
    }
}

#[derive(Debug)]
struct PingPongPair {
    spec: PingPongSpec,
    buffers: [BufferId; 2],
    /// Index of the half written this step; the other half is read.
    write: usize,
    swaps: u64,
}

/// Buffers backing one renderer instance.
///
/// The color buffer is sized for the maximum resolution once, so resizing
/// the visible surface never reallocates it. Only [`ResourceSet::allocate`],
/// [`ResourceSet::reallocate_uniform`] and [`ResourceSet::destroy`] change
/// buffer identity.
#[derive(Debug)]
pub struct ResourceSet {
    max_resolution: Extent,
    pixel_stride: u64,
    uniform: BufferId,
    uniform_len: u64,
    color: BufferId,
    pairs: Vec<PingPongPair>,
    effective: Extent,
    destroyed: bool,
}

impl ResourceSet {
    pub fn allocate<B: GpuBackend>(
        backend: &mut B,
        max_resolution: Extent,
        pixel_stride: u64,
        uniform_len: u64,
        pairs: &[PingPongSpec],
    ) -> Result<Self, RenderError> {
        let limits = backend.limits();
        let color_len = max_resolution.area() * pixel_stride;
        check_size("color buffer", color_len, limits.max_storage_binding.min(limits.max_buffer_size))?;
        check_size("uniform buffer", uniform_len, limits.max_uniform_binding)?;
        for pair in pairs {
            check_size(
                &format!("ping-pong pair '{}'", pair.name),
                pair.bytes,
                limits.max_storage_binding.min(limits.max_buffer_size),
            )?;
        }

        let uniform = backend.create_buffer(&BufferDesc {
            label: "uniform buffer".to_string(),
            size: uniform_len,
            usage: BufferUsage::Uniform,
        })?;
        let color = backend.create_buffer(&BufferDesc {
            label: "color buffer".to_string(),
            size: color_len,
            usage: BufferUsage::Storage,
        })?;

        let mut allocated = Vec::with_capacity(pairs.len());
        for spec in pairs {
            let half = |index: usize| BufferDesc {
                label: format!("{} {index}", spec.name),
                size: spec.bytes,
                usage: BufferUsage::Storage,
            };
            let first = backend.create_buffer(&half(0))?;
            let second = backend.create_buffer(&half(1))?;
            allocated.push(PingPongPair {
                spec: spec.clone(),
                buffers: [first, second],
                write: 0,
                swaps: 0,
            });
        }

        info!(
            max = %max_resolution,
            color_bytes = color_len,
            uniform_bytes = uniform_len,
            pairs = allocated.len(),
            "allocated GPU resources"
        );

        Ok(Self {
            max_resolution,
            pixel_stride,
            uniform,
            uniform_len,
            color,
            pairs: allocated,
            effective: Extent::default(),
            destroyed: false,
        })
    }

    /// Replaces the uniform buffer when the packed length changes.
    pub fn reallocate_uniform<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        uniform_len: u64,
    ) -> Result<bool, RenderError> {
        self.ensure_live()?;
        if uniform_len == self.uniform_len {
            return Ok(false);
        }
        check_size("uniform buffer", uniform_len, backend.limits().max_uniform_binding)?;
        let replacement = backend.create_buffer(&BufferDesc {
            label: "uniform buffer".to_string(),
            size: uniform_len,
            usage: BufferUsage::Uniform,
        })?;
        backend.destroy_buffer(self.uniform);
        debug!(
            from = self.uniform_len,
            to = uniform_len,
            "reallocated uniform buffer"
        );
        self.uniform = replacement;
        self.uniform_len = uniform_len;
        Ok(true)
    }

    /// Clamps `visible` to `[1, max_resolution]` per axis and reconfigures the
    /// surface if the result changed. Returns the effective size and whether
    /// it changed; buffers are never touched.
    pub fn sync_resolution<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        visible: Extent,
    ) -> Result<(Extent, bool), RenderError> {
        self.ensure_live()?;
        let effective = Extent::new(
            visible.width.clamp(1, self.max_resolution.width.max(1)),
            visible.height.clamp(1, self.max_resolution.height.max(1)),
        );
        if effective == self.effective {
            return Ok((effective, false));
        }
        backend.configure_surface(effective);
        debug!(
            requested = %visible,
            effective = %effective,
            "resolution changed"
        );
        self.effective = effective;
        Ok((effective, true))
    }

    /// Exchanges the read and write halves of `name`.
    pub fn swap(&mut self, name: &str) -> Result<(), RenderError> {
        self.ensure_live()?;
        let pair = self
            .pairs
            .iter_mut()
            .find(|pair| pair.spec.name == name)
            .ok_or_else(|| RenderError::UnknownResource(format!("ping-pong pair '{name}'")))?;
        pair.write = 1 - pair.write;
        pair.swaps += 1;
        Ok(())
    }

    pub(crate) fn swap_automatic(&mut self) {
        for pair in self.pairs.iter_mut().filter(|pair| pair.spec.auto_swap) {
            pair.write = 1 - pair.write;
            pair.swaps += 1;
        }
    }

    pub fn read_target(&self, name: &str) -> Option<BufferId> {
        self.pair(name).map(|pair| pair.buffers[1 - pair.write])
    }

    pub fn write_target(&self, name: &str) -> Option<BufferId> {
        self.pair(name).map(|pair| pair.buffers[pair.write])
    }

    /// Both halves in their original `0`/`1` labelling.
    pub fn pair_buffers(&self, name: &str) -> Option<[BufferId; 2]> {
        self.pair(name).map(|pair| pair.buffers)
    }

    pub fn swap_count(&self, name: &str) -> Option<u64> {
        self.pair(name).map(|pair| pair.swaps)
    }

    fn pair(&self, name: &str) -> Option<&PingPongPair> {
        self.pairs.iter().find(|pair| pair.spec.name == name)
    }

    /// `(read, write)` per pair, in declaration order.
    pub(crate) fn pair_bindings(&self) -> Vec<(BufferId, BufferId)> {
        self.pairs
            .iter()
            .map(|pair| (pair.buffers[1 - pair.write], pair.buffers[pair.write]))
            .collect()
    }

    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }

    pub fn uniform_buffer(&self) -> BufferId {
        self.uniform
    }

    pub fn uniform_len(&self) -> u64 {
        self.uniform_len
    }

    pub fn color_buffer(&self) -> BufferId {
        self.color
    }

    pub fn max_resolution(&self) -> Extent {
        self.max_resolution
    }

    pub fn pixel_stride(&self) -> u64 {
        self.pixel_stride
    }

    pub fn effective_size(&self) -> Extent {
        self.effective
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Releases every buffer. Calling it again is a no-op.
    pub fn destroy<B: GpuBackend>(&mut self, backend: &mut B) {
        if self.destroyed {
            return;
        }
        backend.destroy_buffer(self.uniform);
        backend.destroy_buffer(self.color);
        for pair in &self.pairs {
            for buffer in pair.buffers {
                backend.destroy_buffer(buffer);
            }
        }
        self.destroyed = true;
        info!("released GPU resources");
    }

    fn ensure_live(&self) -> Result<(), RenderError> {
        if self.destroyed {
            Err(RenderError::TornDown)
        } else {
            Ok(())
        }
    }
}

fn check_size(label: &str, requested: u64, limit: u64) -> Result<(), RenderError> {
    if requested == 0 || requested > limit {
        return Err(RenderError::ResourceExhausted {
            label: label.to_string(),
            requested,
            limit,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::testing::{Call, RecordingBackend};

    fn allocate(backend: &mut RecordingBackend, pairs: &[PingPongSpec]) -> ResourceSet {
        ResourceSet::allocate(backend, Extent::new(64, 32), PIXEL_STRIDE, 48, pairs).unwrap()
    }

    #[test]
    fn color_buffer_is_sized_for_maximum_resolution() {
        let mut backend = RecordingBackend::default();
        let resources = allocate(&mut backend, &[]);
        assert_eq!(
            backend.buffer_size(resources.color_buffer()),
            Some(64 * 32 * 16)
        );
        assert_eq!(backend.buffer_size(resources.uniform_buffer()), Some(48));
    }

    #[test]
    fn sync_resolution_clamps_and_is_idempotent() {
        let mut backend = RecordingBackend::default();
        let mut resources = allocate(&mut backend, &[]);
        let before = (resources.uniform_buffer(), resources.color_buffer());

        let (first, changed) = resources
            .sync_resolution(&mut backend, Extent::new(100, 10))
            .unwrap();
        assert_eq!(first, Extent::new(64, 10));
        assert!(changed);

        let created = backend.created_count();
        let configured = backend.count(|call| matches!(call, Call::ConfigureSurface(_)));
        let (second, changed) = resources
            .sync_resolution(&mut backend, Extent::new(100, 10))
            .unwrap();
        assert_eq!(second, first);
        assert!(!changed);
        assert_eq!(backend.created_count(), created);
        assert_eq!(
            backend.count(|call| matches!(call, Call::ConfigureSurface(_))),
            configured
        );
        assert_eq!(before, (resources.uniform_buffer(), resources.color_buffer()));
    }

    #[test]
    fn zero_sized_surfaces_clamp_to_one_pixel() {
        let mut backend = RecordingBackend::default();
        let mut resources = allocate(&mut backend, &[]);
        let (effective, _) = resources
            .sync_resolution(&mut backend, Extent::new(0, 0))
            .unwrap();
        assert_eq!(effective, Extent::new(1, 1));
    }

    #[test]
    fn swap_toggles_read_target() {
        let mut backend = RecordingBackend::default();
        let mut resources = allocate(&mut backend, &[PingPongSpec::new("particles", 256)]);
        let [zero, one] = resources.pair_buffers("particles").unwrap();

        for n in 0..7u64 {
            let read = resources.read_target("particles").unwrap();
            assert_eq!(read == zero, n % 2 == 1, "after {n} swaps");
            assert_eq!(resources.write_target("particles").unwrap() == one, n % 2 == 1);
            resources.swap("particles").unwrap();
        }
        assert_eq!(resources.swap_count("particles"), Some(7));
    }

    #[test]
    fn swapping_unknown_pairs_fails() {
        let mut backend = RecordingBackend::default();
        let mut resources = allocate(&mut backend, &[]);
        assert!(matches!(
            resources.swap("missing"),
            Err(RenderError::UnknownResource(_))
        ));
    }

    #[test]
    fn oversized_allocations_are_fatal() {
        let mut backend = RecordingBackend::default();
        let err = ResourceSet::allocate(
            &mut backend,
            Extent::new(100_000, 100_000),
            PIXEL_STRIDE,
            48,
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, RenderError::ResourceExhausted { .. }));
        assert_eq!(backend.created_count(), 0);
    }

    #[test]
    fn uniform_reallocation_only_on_size_change() {
        let mut backend = RecordingBackend::default();
        let mut resources = allocate(&mut backend, &[]);
        let original = resources.uniform_buffer();
        assert!(!resources.reallocate_uniform(&mut backend, 48).unwrap());
        assert_eq!(resources.uniform_buffer(), original);

        assert!(resources.reallocate_uniform(&mut backend, 64).unwrap());
        assert_ne!(resources.uniform_buffer(), original);
        assert!(!backend.is_live(original));
    }

    #[test]
    fn destroy_is_idempotent() {
        let mut backend = RecordingBackend::default();
        let mut resources = allocate(&mut backend, &[PingPongSpec::new("state", 64)]);
        resources.destroy(&mut backend);
        let destroyed = backend.count(|call| matches!(call, Call::DestroyBuffer(_)));
        assert_eq!(destroyed, 4);
        assert_eq!(backend.live_buffers(), 0);

        resources.destroy(&mut backend);
        assert_eq!(
            backend.count(|call| matches!(call, Call::DestroyBuffer(_))),
            destroyed
        );
        assert!(matches!(
            resources.sync_resolution(&mut backend, Extent::new(8, 8)),
            Err(RenderError::TornDown)
        ));
    }
}
