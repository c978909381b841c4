//! # Graphics Backend
//!
//! The seam between the pipeline caches and the graphics API. The caches only
//! ever see opaque handles; compiling, linking and creating layout objects is
//! delegated to an implementation of [`GraphicsBackend`].

use std::num::NonZeroU32;

use crate::error::BackendError;
use crate::renderer::pipeline::VertexAttribute;
use crate::renderer::shaders::ShaderStage;

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(NonZeroU32);

        impl $name {
            /// Wrap a raw API name; zero is the null object
            pub fn new(raw: u32) -> Option<Self> {
                NonZeroU32::new(raw).map(Self)
            }

            pub fn raw(&self) -> u32 {
                self.0.get()
            }
        }
    };
}

define_handle!(
    /// Compiled shader stage object
    ShaderHandle
);
define_handle!(
    /// Linked program object
    ProgramHandle
);
define_handle!(
    /// Vertex-layout object
    LayoutHandle
);

/// Driver identity; a disk cache written under another identity is discarded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverInfo {
    pub vendor: String,
    pub renderer: String,
    pub version: String,
}

impl DriverInfo {
    pub fn new(vendor: impl Into<String>, renderer: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            vendor: vendor.into(),
            renderer: renderer.into(),
            version: version.into(),
        }
    }
}

/// Driver-specific program binary as retrieved from a linked program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramBinary {
    /// Driver binary format tag
    pub format: u32,
    pub data: Vec<u8>,
}

/// Everything needed to link a program from compiled stages
#[derive(Debug, Clone, Copy)]
pub struct LinkRequest<'a> {
    pub shaders: &'a [(ShaderStage, ShaderHandle)],
    /// Attributes whose binding names get input locations 0..n
    pub attributes: &'a [VertexAttribute],
    /// Ask the driver to keep the binary retrievable for the disk cache
    pub binary_retrievable: bool,
}

/// Graphics API operations used by the pipeline caches.
///
/// All calls happen on the thread owning the graphics context.
pub trait GraphicsBackend {
    /// Identity of the running driver
    fn driver_info(&self) -> DriverInfo;

    /// Compile one shader stage
    fn compile_shader(
        &mut self,
        stage: ShaderStage,
        source: &str,
        entry_point: &str,
    ) -> Result<ShaderHandle, BackendError>;

    fn destroy_shader(&mut self, shader: ShaderHandle);

    /// Link compiled stages into a program
    fn link_program(&mut self, request: &LinkRequest<'_>) -> Result<ProgramHandle, BackendError>;

    /// Recreate a program from a binary previously returned by [`Self::program_binary`]
    fn link_program_binary(&mut self, binary: &ProgramBinary) -> Result<ProgramHandle, BackendError>;

    /// Retrieve a program's binary; not every program is retrievable
    fn program_binary(&mut self, program: ProgramHandle) -> Result<ProgramBinary, BackendError>;

    fn destroy_program(&mut self, program: ProgramHandle);

    /// Create a vertex-layout object for the attribute list and stride
    fn create_vertex_layout(
        &mut self,
        attributes: &[VertexAttribute],
        stride: u32,
    ) -> Result<LayoutHandle, BackendError>;

    fn destroy_vertex_layout(&mut self, layout: LayoutHandle);

    /// Make a program current (`None` unbinds)
    fn bind_program(&mut self, _program: Option<ProgramHandle>) {}

    /// Make a layout object current (`None` unbinds)
    fn bind_vertex_layout(&mut self, _layout: Option<LayoutHandle>) {}
}
