//! # LIBS Pipeline - GPU Pipeline Object Cache
//!
//! Lifecycle and persistent caching of compiled GPU pipeline objects for the
//! LIBS renderer.
//!
//! ## Modules
//!
//! - **Cache Keys**: fixed-size, byte-comparable keys for layouts and pipelines
//! - **Object Caches**: reference-counted program and vertex-layout objects
//! - **Disk Cache**: zstd-compressed program binaries reused across runs
//! - **Pipeline Device**: pipeline creation, binding and disk cache control
//!
//! ## Example
//!
//! ```no_run
//! use libs_pipeline::config::PipelineCacheConfig;
//! use libs_pipeline::renderer::{GraphicsConfig, HeadlessBackend, PipelineDevice, Shader, ShaderStage, VertexLayout};
//!
//! let config = PipelineCacheConfig::default().with_disk_cache("pipelines.bin");
//! let device = PipelineDevice::new(HeadlessBackend::new(), config);
//!
//! let vs = Shader::with_main(ShaderStage::Vertex, "void main() {}");
//! let fs = Shader::with_main(ShaderStage::Fragment, "void main() {}");
//! let pipeline = device.create_pipeline(&GraphicsConfig::new(VertexLayout::empty(), &vs, &fs))?;
//! device.bind_pipeline(&pipeline);
//! # Ok::<(), libs_pipeline::error::PipelineError>(())
//! ```
//!
//! ## Author
//!
//! Aiblox (Alexsandro Alves de Oliveira)

pub mod config;
pub mod error;
pub mod renderer;
pub mod util;

pub use config::PipelineCacheConfig;
pub use error::{BackendError, DiskCacheError, PipelineError, Result};
pub use renderer::{GraphicsBackend, GraphicsConfig, Pipeline, PipelineDevice};

/// Library version
pub const VERSION: &str = "1.0.0";

/// Library name
pub const NAME: &str = "libs_pipeline";

/// Initialize logging.
///
/// Installs a `tracing` fmt subscriber; `log` records are forwarded to it.
/// Calling this more than once is harmless.
pub fn init_logging() {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .try_init();
}
