//! # Headless Backend
//!
//! In-memory [`GraphicsBackend`] for tooling and tests on machines without a
//! GPU. Program "binaries" are bincode images of the linked stages, so they
//! survive a trip through the disk cache like a real driver binary would.
//!
//! Call counters and failure switches make every cache recovery path
//! reachable on demand.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::renderer::backend::{
    DriverInfo, GraphicsBackend, LayoutHandle, LinkRequest, ProgramBinary, ProgramHandle, ShaderHandle,
};
use crate::renderer::pipeline::VertexAttribute;
use crate::renderer::shaders::ShaderStage;

/// Binary format tag of headless program images
pub const HEADLESS_BINARY_FORMAT: u32 = 0x4C42_5331;

/// Backend call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendCounters {
    pub shaders_compiled: u64,
    pub programs_linked: u64,
    pub binary_links: u64,
    pub binaries_retrieved: u64,
    pub programs_destroyed: u64,
    pub layouts_created: u64,
    pub layouts_destroyed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StageImage {
    stage: ShaderStage,
    entry_point: String,
    source: String,
}

/// Serialized form of a linked program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ProgramImage {
    stages: Vec<StageImage>,
    /// Attribute binding names and their input locations
    attribute_locations: Vec<(String, u32)>,
}

#[derive(Debug)]
struct LiveProgram {
    image: ProgramImage,
    retrievable: bool,
}

#[derive(Debug)]
struct LiveLayout {
    attributes: Vec<VertexAttribute>,
    stride: u32,
}

/// In-memory graphics backend
#[derive(Debug)]
pub struct HeadlessBackend {
    driver: DriverInfo,
    next_name: u32,
    shaders: HashMap<ShaderHandle, StageImage>,
    programs: HashMap<ProgramHandle, LiveProgram>,
    layouts: HashMap<LayoutHandle, LiveLayout>,
    bound_program: Option<ProgramHandle>,
    bound_layout: Option<LayoutHandle>,
    counters: BackendCounters,
    compile_failure_marker: Option<String>,
    reject_binaries: bool,
    binaries_retrievable: bool,
    fail_layouts: bool,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::with_driver(DriverInfo::new("LIBS", "Headless", crate::VERSION))
    }

    /// Backend reporting a specific driver identity
    pub fn with_driver(driver: DriverInfo) -> Self {
        Self {
            driver,
            next_name: 1,
            shaders: HashMap::new(),
            programs: HashMap::new(),
            layouts: HashMap::new(),
            bound_program: None,
            bound_layout: None,
            counters: BackendCounters::default(),
            compile_failure_marker: None,
            reject_binaries: false,
            binaries_retrievable: true,
            fail_layouts: false,
        }
    }

    /// Change the reported driver identity (a driver upgrade)
    pub fn set_driver(&mut self, driver: DriverInfo) {
        self.driver = driver;
    }

    /// Shaders whose source contains `marker` fail to compile
    pub fn set_compile_failure_marker(&mut self, marker: Option<&str>) {
        self.compile_failure_marker = marker.map(str::to_string);
    }

    /// Refuse every program binary
    pub fn set_reject_binaries(&mut self, reject: bool) {
        self.reject_binaries = reject;
    }

    /// Whether program binaries can be retrieved at all
    pub fn set_binaries_retrievable(&mut self, retrievable: bool) {
        self.binaries_retrievable = retrievable;
    }

    /// Fail every layout object creation
    pub fn set_fail_layouts(&mut self, fail: bool) {
        self.fail_layouts = fail;
    }

    pub fn counters(&self) -> &BackendCounters {
        &self.counters
    }

    pub fn live_shader_count(&self) -> usize {
        self.shaders.len()
    }

    pub fn live_program_count(&self) -> usize {
        self.programs.len()
    }

    pub fn live_layout_count(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_program_live(&self, program: ProgramHandle) -> bool {
        self.programs.contains_key(&program)
    }

    pub fn is_layout_live(&self, layout: LayoutHandle) -> bool {
        self.layouts.contains_key(&layout)
    }

    pub fn bound_program(&self) -> Option<ProgramHandle> {
        self.bound_program
    }

    pub fn bound_layout(&self) -> Option<LayoutHandle> {
        self.bound_layout
    }

    /// Input location bound to an attribute name in a linked program
    pub fn attribute_location(&self, program: ProgramHandle, name: &str) -> Option<u32> {
        self.programs
            .get(&program)?
            .image
            .attribute_locations
            .iter()
            .find(|(binding, _)| binding == name)
            .map(|(_, location)| *location)
    }

    /// Attributes and stride a live layout object was created with
    pub fn layout_description(&self, layout: LayoutHandle) -> Option<(&[VertexAttribute], u32)> {
        self.layouts.get(&layout).map(|l| (l.attributes.as_slice(), l.stride))
    }

    fn allocate_name(&mut self) -> u32 {
        let name = self.next_name;
        self.next_name += 1;
        name
    }

    fn insert_program(&mut self, image: ProgramImage, retrievable: bool) -> Result<ProgramHandle, BackendError> {
        let handle = ProgramHandle::new(self.allocate_name())
            .ok_or_else(|| BackendError::new("program name space exhausted"))?;
        self.programs.insert(handle, LiveProgram { image, retrievable });
        Ok(handle)
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn driver_info(&self) -> DriverInfo {
        self.driver.clone()
    }

    fn compile_shader(
        &mut self,
        stage: ShaderStage,
        source: &str,
        entry_point: &str,
    ) -> Result<ShaderHandle, BackendError> {
        if let Some(marker) = &self.compile_failure_marker {
            if let Some(line) = source.lines().position(|l| l.contains(marker.as_str())) {
                return Err(BackendError::new(format!(
                    "0:{}(1): error: {} shader rejected",
                    line + 1,
                    stage.name()
                )));
            }
        }
        if entry_point.is_empty() {
            return Err(BackendError::new("missing entry point"));
        }

        let handle = ShaderHandle::new(self.allocate_name())
            .ok_or_else(|| BackendError::new("shader name space exhausted"))?;
        self.shaders.insert(
            handle,
            StageImage {
                stage,
                entry_point: entry_point.to_string(),
                source: source.to_string(),
            },
        );
        self.counters.shaders_compiled += 1;
        Ok(handle)
    }

    fn destroy_shader(&mut self, shader: ShaderHandle) {
        self.shaders.remove(&shader);
    }

    fn link_program(&mut self, request: &LinkRequest<'_>) -> Result<ProgramHandle, BackendError> {
        let mut stages = Vec::with_capacity(request.shaders.len());
        for (stage, shader) in request.shaders {
            let image = self
                .shaders
                .get(shader)
                .ok_or_else(|| BackendError::new(format!("shader {} is not a shader object", shader.raw())))?;
            if image.stage != *stage {
                return Err(BackendError::new(format!("shader {} is not a {} shader", shader.raw(), stage.name())));
            }
            stages.push(image.clone());
        }

        if !stages.iter().any(|s| s.stage == ShaderStage::Vertex) {
            return Err(BackendError::new("program has no vertex shader"));
        }

        let attribute_locations = request
            .attributes
            .iter()
            .enumerate()
            .filter_map(|(location, va)| va.binding_name().map(|name| (name, location as u32)))
            .collect();

        let handle = self.insert_program(ProgramImage { stages, attribute_locations }, request.binary_retrievable)?;
        self.counters.programs_linked += 1;
        Ok(handle)
    }

    fn link_program_binary(&mut self, binary: &ProgramBinary) -> Result<ProgramHandle, BackendError> {
        if self.reject_binaries {
            return Err(BackendError::new("program binary rejected by driver"));
        }
        if binary.format != HEADLESS_BINARY_FORMAT {
            return Err(BackendError::new(format!("unknown binary format {:#x}", binary.format)));
        }

        let image: ProgramImage = bincode::deserialize(&binary.data)
            .map_err(|e| BackendError::new(format!("malformed program binary: {}", e)))?;

        let handle = self.insert_program(image, true)?;
        self.counters.binary_links += 1;
        Ok(handle)
    }

    fn program_binary(&mut self, program: ProgramHandle) -> Result<ProgramBinary, BackendError> {
        let live = self
            .programs
            .get(&program)
            .ok_or_else(|| BackendError::new(format!("program {} does not exist", program.raw())))?;
        if !self.binaries_retrievable || !live.retrievable {
            return Err(BackendError::new("program binary is not retrievable"));
        }

        let data = bincode::serialize(&live.image).map_err(|e| BackendError::new(e.to_string()))?;
        self.counters.binaries_retrieved += 1;
        Ok(ProgramBinary {
            format: HEADLESS_BINARY_FORMAT,
            data,
        })
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        if self.programs.remove(&program).is_some() {
            self.counters.programs_destroyed += 1;
        }
        if self.bound_program == Some(program) {
            log::warn!("Destroyed program {} while it was bound", program.raw());
            self.bound_program = None;
        }
    }

    fn create_vertex_layout(
        &mut self,
        attributes: &[VertexAttribute],
        stride: u32,
    ) -> Result<LayoutHandle, BackendError> {
        if self.fail_layouts {
            return Err(BackendError::new("out of layout objects"));
        }

        let handle = LayoutHandle::new(self.allocate_name())
            .ok_or_else(|| BackendError::new("layout name space exhausted"))?;
        self.layouts.insert(
            handle,
            LiveLayout {
                attributes: attributes.to_vec(),
                stride,
            },
        );
        self.counters.layouts_created += 1;
        Ok(handle)
    }

    fn destroy_vertex_layout(&mut self, layout: LayoutHandle) {
        if self.layouts.remove(&layout).is_some() {
            self.counters.layouts_destroyed += 1;
        }
        if self.bound_layout == Some(layout) {
            log::warn!("Destroyed layout {} while it was bound", layout.raw());
            self.bound_layout = None;
        }
    }

    fn bind_program(&mut self, program: Option<ProgramHandle>) {
        self.bound_program = program;
    }

    fn bind_vertex_layout(&mut self, layout: Option<LayoutHandle>) {
        self.bound_layout = layout;
    }
}
