//! # Pipelines
//!
//! A pipeline bundles a program, a vertex-layout object and fixed-function
//! state. Programs and layouts are shared through the device's caches; each
//! live [`Pipeline`] holds one reference to both and gives them back when
//! dropped.

pub mod key;
pub mod state;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

pub use key::{
    AttributeType, LayoutKey, PipelineKey, Semantic, VertexAttribute, VertexLayout, MAX_VERTEX_ATTRIBUTES,
};
pub use state::{
    BlendFunc, BlendOp, BlendState, ColorWriteMask, CullMode, DepthFunc, DepthState, Primitive,
    RasterizationState,
};

use crate::renderer::backend::{GraphicsBackend, LayoutHandle, ProgramHandle};
use crate::renderer::device::DeviceState;
use crate::renderer::shaders::Shader;

/// Everything needed to create a pipeline
#[derive(Debug, Clone)]
pub struct GraphicsConfig<'a> {
    pub input_layout: VertexLayout,
    pub vertex_shader: &'a Shader,
    pub fragment_shader: &'a Shader,
    pub geometry_shader: Option<&'a Shader>,
    pub rasterization: RasterizationState,
    pub depth: DepthState,
    pub blend: BlendState,
    pub primitive: Primitive,
}

impl<'a> GraphicsConfig<'a> {
    /// Vertex + fragment pipeline with default fixed-function state
    pub fn new(input_layout: VertexLayout, vertex_shader: &'a Shader, fragment_shader: &'a Shader) -> Self {
        Self {
            input_layout,
            vertex_shader,
            fragment_shader,
            geometry_shader: None,
            rasterization: RasterizationState::default(),
            depth: DepthState::default(),
            blend: BlendState::default(),
            primitive: Primitive::default(),
        }
    }

    pub fn with_geometry_shader(mut self, shader: &'a Shader) -> Self {
        self.geometry_shader = Some(shader);
        self
    }

    pub fn with_rasterization(mut self, rasterization: RasterizationState) -> Self {
        self.rasterization = rasterization;
        self
    }

    pub fn with_depth(mut self, depth: DepthState) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_blend(mut self, blend: BlendState) -> Self {
        self.blend = blend;
        self
    }

    pub fn with_primitive(mut self, primitive: Primitive) -> Self {
        self.primitive = primitive;
        self
    }

    /// Stages present in this pipeline, in key slot order
    pub fn shaders(&self) -> impl Iterator<Item = &'a Shader> {
        [Some(self.vertex_shader), Some(self.fragment_shader), self.geometry_shader]
            .into_iter()
            .flatten()
    }
}

/// A live pipeline.
///
/// Dropping it releases its program and layout references; the underlying
/// objects are destroyed once no pipeline uses them.
pub struct Pipeline<B: GraphicsBackend> {
    key: PipelineKey,
    program: ProgramHandle,
    layout: LayoutHandle,
    rasterization: RasterizationState,
    depth: DepthState,
    blend: BlendState,
    primitive: Primitive,
    device: Rc<RefCell<DeviceState<B>>>,
}

impl<B: GraphicsBackend> Pipeline<B> {
    pub(crate) fn new(
        key: PipelineKey,
        program: ProgramHandle,
        layout: LayoutHandle,
        config: &GraphicsConfig<'_>,
        device: Rc<RefCell<DeviceState<B>>>,
    ) -> Self {
        Self {
            key,
            program,
            layout,
            rasterization: config.rasterization,
            depth: config.depth,
            blend: config.blend,
            primitive: config.primitive,
            device,
        }
    }

    pub fn key(&self) -> &PipelineKey {
        &self.key
    }

    pub fn program(&self) -> ProgramHandle {
        self.program
    }

    pub fn layout(&self) -> LayoutHandle {
        self.layout
    }

    pub fn rasterization(&self) -> &RasterizationState {
        &self.rasterization
    }

    pub fn depth(&self) -> &DepthState {
        &self.depth
    }

    pub fn blend(&self) -> &BlendState {
        &self.blend
    }

    pub fn primitive(&self) -> Primitive {
        self.primitive
    }

    /// Whether this pipeline was created by `device`
    pub(crate) fn is_owned_by(&self, device: &Rc<RefCell<DeviceState<B>>>) -> bool {
        Rc::ptr_eq(&self.device, device)
    }
}

impl<B: GraphicsBackend> fmt::Debug for Pipeline<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("program", &self.program)
            .field("layout", &self.layout)
            .field("primitive", &self.primitive)
            .finish_non_exhaustive()
    }
}

impl<B: GraphicsBackend> Drop for Pipeline<B> {
    fn drop(&mut self) {
        match self.device.try_borrow_mut() {
            Ok(mut state) => state.release_pipeline(&self.key),
            // panicking again here would abort
            Err(_) if std::thread::panicking() => {
                log::error!("Pipeline dropped while its device is borrowed, leaking its references")
            }
            Err(_) => panic!("Pipeline dropped inside PipelineDevice::with_backend; drop it after the closure returns"),
        }
    }
}
