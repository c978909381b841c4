//! # Shaders
//!
//! Shader stages and shader sources identified by their content.
//! Compilation itself is done by the [`GraphicsBackend`](super::GraphicsBackend)
//! when a program is first needed.

use serde::{Deserialize, Serialize};

use crate::util::ContentHash;

/// Number of stage slots in a pipeline key
pub const MAX_SHADER_STAGES: usize = 3;

/// Shader stage types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Geometry,
}

impl ShaderStage {
    /// All stages, in pipeline key slot order
    pub const ALL: [ShaderStage; MAX_SHADER_STAGES] =
        [ShaderStage::Vertex, ShaderStage::Fragment, ShaderStage::Geometry];

    /// Slot of this stage inside a pipeline key
    pub fn slot(&self) -> usize {
        match self {
            ShaderStage::Vertex => 0,
            ShaderStage::Fragment => 1,
            ShaderStage::Geometry => 2,
        }
    }

    /// Human readable stage name
    pub fn name(&self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Geometry => "geometry",
        }
    }
}

/// Content key of a shader: hash of entry point + source, and source length
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ShaderKey {
    pub hash: ContentHash,
    pub length: u32,
}

impl ShaderKey {
    pub fn new(source: &str, entry_point: &str) -> Self {
        Self {
            hash: ContentHash::of_shader(source, entry_point),
            length: u32::try_from(source.len()).unwrap_or(u32::MAX),
        }
    }
}

/// Shader source for one stage
#[derive(Debug, Clone)]
pub struct Shader {
    stage: ShaderStage,
    source: String,
    entry_point: String,
    key: ShaderKey,
}

impl Shader {
    /// Create a shader from source text and entry point
    pub fn new(stage: ShaderStage, source: impl Into<String>, entry_point: impl Into<String>) -> Self {
        let source = source.into();
        let entry_point = entry_point.into();
        let key = ShaderKey::new(&source, &entry_point);

        Self {
            stage,
            source,
            entry_point,
            key,
        }
    }

    /// Create a shader with the conventional `main` entry point
    pub fn with_main(stage: ShaderStage, source: impl Into<String>) -> Self {
        Self::new(stage, source, "main")
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn key(&self) -> &ShaderKey {
        &self.key
    }
}
