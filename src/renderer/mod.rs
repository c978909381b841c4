//! # Renderer Module
//!
//! Pipeline object management: cache keys, program and vertex-layout caches,
//! the persistent program binary cache and the device tying them together.

pub mod backend;
pub mod cache;
pub mod device;
pub mod headless;
pub mod pipeline;
pub mod shaders;
#[cfg(feature = "vulkan")]
pub mod vulkan;

pub use backend::{
    DriverInfo, GraphicsBackend, LayoutHandle, LinkRequest, ProgramBinary, ProgramHandle, ShaderHandle,
};
pub use cache::{CacheCounters, DiskCacheState, ProgramEntryState};
pub use device::{PipelineCacheStats, PipelineDevice};
pub use headless::HeadlessBackend;
pub use pipeline::{GraphicsConfig, Pipeline, PipelineKey, VertexAttribute, VertexLayout};
pub use shaders::{Shader, ShaderStage};
