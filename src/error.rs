//! # Errors
//!
//! Error types for pipeline creation and the disk cache.

use thiserror::Error;

use crate::renderer::shaders::ShaderStage;

/// Failure reported by a [`GraphicsBackend`](crate::renderer::GraphicsBackend) call.
///
/// Carries the driver's info log (or a description of what was rejected).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Problems with the on-disk cache file.
///
/// These never escape pipeline creation; they cause the cache file to be
/// discarded and recreated.
#[derive(Debug, Error)]
pub enum DiskCacheError {
    #[error("disk cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("disk cache is corrupt: {0}")]
    Corrupt(String),

    #[error("disk cache does not match expected driver/version")]
    DriverMismatch,

    #[error("disk cache exceeds the 32-bit offset range")]
    TooLarge,

    #[error("failed to decompress program from disk cache: {0}")]
    Decompress(String),

    #[error("driver rejected cached program binary: {0}")]
    Rejected(#[source] BackendError),

    #[error("disk cache is not open")]
    NotOpen,
}

/// Errors returned by pipeline device operations
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{stage:?} shader failed to compile: {log}")]
    ShaderCompile { stage: ShaderStage, log: String },

    #[error("program failed to link: {0}")]
    ProgramLink(#[source] BackendError),

    #[error("failed to create vertex layout object: {0}")]
    LayoutCreation(#[source] BackendError),

    #[error(transparent)]
    DiskCache(#[from] DiskCacheError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Config(String),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
