//! Error types for the ingestion backbone
//!
//! The taxonomy mirrors the error categories carried by production
//! supervisors: validation at the boundary, resource presence errors for
//! registries, a timestamp-range error specific to the capture buffer, and a
//! subprocess-failure category that is always absorbed locally by the
//! supervisor rather than propagated to callers.

use thiserror::Error;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Bad arguments: non-positive sizes, empty source id, unsupported
    /// sample format, invalid timeout string, and similar.
    #[error("validation error: {0}")]
    Validation(String),

    /// Duplicate registration of a buffer, pool, or stream.
    #[error("{kind} already exists for source '{source_id}'")]
    ResourceAlreadyExists { kind: &'static str, source_id: String },

    /// Operation referenced a source/buffer/stream that is not registered.
    #[error("{kind} not found for source '{source_id}'")]
    ResourceMissing { kind: &'static str, source_id: String },

    /// A capture-buffer read requested a time range outside the buffer's
    /// current rolling window.
    #[error("requested times outside current timeframe: {0}")]
    TimestampOutOfRange(String),

    /// A decoder subprocess failed. This variant is produced by the
    /// supervisor's internal bookkeeping; per the propagation policy, it is
    /// never returned from `StreamManager` public methods, only recorded in
    /// health snapshots.
    #[error("subprocess failure: {0}")]
    SubprocessFailure(String),

    /// Transient I/O, e.g. a stdout read error on the decoder pipe.
    #[error("transient I/O error: {0}")]
    TransientIo(#[from] std::io::Error),

    /// Process-spawn or other OS-level failure.
    #[error("system error: {0}")]
    System(String),
}

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, IngestError>;

impl IngestError {
    pub fn resource_missing(kind: &'static str, source_id: impl Into<String>) -> Self {
        IngestError::ResourceMissing { kind, source_id: source_id.into() }
    }

    pub fn resource_already_exists(kind: &'static str, source_id: impl Into<String>) -> Self {
        IngestError::ResourceAlreadyExists { kind, source_id: source_id.into() }
    }

    /// Error category name, used for structured logging/metrics.
    pub fn category(&self) -> &'static str {
        match self {
            IngestError::Validation(_) => "validation",
            IngestError::ResourceAlreadyExists { .. } => "resource_already_exists",
            IngestError::ResourceMissing { .. } => "resource_missing",
            IngestError::TimestampOutOfRange(_) => "timestamp_out_of_range",
            IngestError::SubprocessFailure(_) => "subprocess_failure",
            IngestError::TransientIo(_) => "transient_io",
            IngestError::System(_) => "system",
        }
    }
}
