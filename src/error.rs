use std::path::PathBuf;

use serde::Serialize;
use serde_json::{json, Value};

/// Failure reported by a [`crate::driver::RenderDriver`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    #[error("out of device memory allocating {bytes} bytes")]
    OutOfMemory { bytes: u64 },
    #[error("device error: {0}")]
    Device(String),
    #[error("unsupported by driver: {0}")]
    Unsupported(String),
}

/// Everything the engine can report to its host.
///
/// Descriptor-level variants (`MalformedDescriptor`, `UnknownReference` raised while loading)
/// are produced once at load time. Frame-level variants abort the current frame only; buffers
/// and counters stay consistent for the next frame.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("malformed descriptor: {reason}")]
    MalformedDescriptor { reason: String },

    #[error("unknown reference '{name}' in {context}")]
    UnknownReference { name: String, context: String },

    #[error("pass {pass_index}: failed to allocate buffer '{buffer}' ({width}x{height}): {source}")]
    AllocationFailure {
        pass_index: usize,
        buffer: String,
        width: u32,
        height: u32,
        #[source]
        source: DriverError,
    },

    #[error("pass {pass_index} failed: {source}")]
    PassExecutionFailure {
        pass_index: usize,
        #[source]
        source: DriverError,
    },

    #[error("failed to upload image '{name}': {source}")]
    UploadFailure {
        name: String,
        #[source]
        source: DriverError,
    },

    #[error("pass {pass_index} reads buffer '{buffer}' before it was written this frame")]
    UnwrittenBuffer { pass_index: usize, buffer: String },

    #[error("input '{name}': {reason}")]
    InvalidInput { name: String, reason: String },

    #[error("pass {pass_index}: {axis} expression '{expression}' evaluated to {value}")]
    InvalidDimension {
        pass_index: usize,
        axis: &'static str,
        expression: String,
        value: f64,
    },

    #[error("imported image '{name}' ({}): {reason}", path.display())]
    ImportedImage {
        name: String,
        path: PathBuf,
        reason: String,
    },

    #[error("engine has been shut down")]
    Shutdown,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedDescriptor {
            reason: reason.into(),
        }
    }

    pub fn unknown_reference(name: impl Into<String>, context: impl Into<String>) -> Self {
        Self::UnknownReference {
            name: name.into(),
            context: context.into(),
        }
    }

    pub fn invalid_input(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code, used by the CLI envelope and by hosts that log errors.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedDescriptor { .. } => "malformed_descriptor",
            Self::UnknownReference { .. } => "unknown_reference",
            Self::AllocationFailure { .. } => "allocation_failure",
            Self::PassExecutionFailure { .. } => "pass_execution_failure",
            Self::UploadFailure { .. } => "upload_failure",
            Self::UnwrittenBuffer { .. } => "unwritten_buffer",
            Self::InvalidInput { .. } => "invalid_input",
            Self::InvalidDimension { .. } => "invalid_dimension",
            Self::ImportedImage { .. } => "imported_image",
            Self::Shutdown => "shutdown",
            Self::Io(_) => "io",
        }
    }

    /// Index of the pass that failed, when the failure happened inside a frame.
    pub fn pass_index(&self) -> Option<usize> {
        match self {
            Self::AllocationFailure { pass_index, .. }
            | Self::PassExecutionFailure { pass_index, .. }
            | Self::UnwrittenBuffer { pass_index, .. }
            | Self::InvalidDimension { pass_index, .. } => Some(*pass_index),
            _ => None,
        }
    }

    /// True for failures that make the whole shader unusable rather than a single frame.
    pub fn is_descriptor_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedDescriptor { .. } | Self::UnknownReference { .. }
        )
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        let details = self.pass_index().map(|pass_index| json!({ "pass_index": pass_index }));
        ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: self.code().to_owned(),
                message: self.to_string(),
                details,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: ErrorEnvelopeBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelopeBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Finds an [`EngineError`] anywhere in an `anyhow` chain.
pub fn find_engine_error(error: &anyhow::Error) -> Option<&EngineError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<EngineError>())
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
