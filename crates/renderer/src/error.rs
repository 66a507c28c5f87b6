use crate::compile::ShaderDiagnostics;

/// Failure modes of the uniform packing and GPU lifecycle layer.
///
/// Only [`RenderError::CompileFailure`] has an in-product recovery path: the
/// previously active pipeline keeps rendering. Everything raised during
/// construction should be reported to the host and not retried.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("uniform '{field}' expected {expected}, found {found}")]
    SchemaMismatch {
        field: String,
        expected: String,
        found: String,
    },
    #[error("uniform state has no value for '{0}'")]
    MissingField(String),
    #[error("cannot allocate {label} ({requested} bytes, device limit {limit} bytes)")]
    ResourceExhausted {
        label: String,
        requested: u64,
        limit: u64,
    },
    #[error("shader compilation failed: {0}")]
    CompileFailure(ShaderDiagnostics),
    #[error("no usable GPU backend: {0}")]
    UnsupportedBackend(String),
    #[error("unknown GPU resource '{0}'")]
    UnknownResource(String),
    #[error("frame submission failed: {reason}")]
    Surface { reason: String, recoverable: bool },
    #[error("failed to read back GPU buffer: {0}")]
    Readback(String),
    #[error("renderer has been destroyed")]
    TornDown,
}

impl RenderError {
    /// Whether the caller may keep driving frames after this error.
    pub fn is_recoverable(&self) -> bool {
        match self {
            RenderError::CompileFailure(_) => true,
            RenderError::Surface { recoverable, .. } => *recoverable,
            _ => false,
        }
    }
}
