//! # Pipeline Cache Keys
//!
//! Fixed-size, byte-comparable keys identifying equivalent vertex layouts and
//! pipelines. Keys contain no pointers or variable-length data: attribute
//! lists are padded to [`MAX_VERTEX_ATTRIBUTES`] with zeroed slots and carry an
//! explicit count, so equal inputs always produce identical bytes.

use std::hash::{Hash, Hasher};

use bytemuck::{Pod, Zeroable};

use super::GraphicsConfig;
use crate::renderer::shaders::{ShaderKey, ShaderStage, MAX_SHADER_STAGES};
use crate::util::{hash_combine, hash_combine_all, ContentHash};

/// Maximum number of vertex attributes in one layout
pub const MAX_VERTEX_ATTRIBUTES: usize = 6;

/// Vertex attribute semantic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Semantic {
    Position = 0,
    TexCoord = 1,
    Color = 2,
}

impl Semantic {
    fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0 => Some(Semantic::Position),
            1 => Some(Semantic::TexCoord),
            2 => Some(Semantic::Color),
            _ => None,
        }
    }

    /// Shader input variable prefix for this semantic
    pub fn variable_prefix(&self) -> &'static str {
        match self {
            Semantic::Position => "a_pos",
            Semantic::TexCoord => "a_tex",
            Semantic::Color => "a_col",
        }
    }
}

/// Vertex attribute component type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AttributeType {
    Float = 0,
    UInt8 = 1,
    SInt8 = 2,
    UNorm8 = 3,
    UInt16 = 4,
    SInt16 = 5,
    UNorm16 = 6,
    UInt32 = 7,
    SInt32 = 8,
}

impl AttributeType {
    fn from_bits(bits: u32) -> Option<Self> {
        Some(match bits {
            0 => AttributeType::Float,
            1 => AttributeType::UInt8,
            2 => AttributeType::SInt8,
            3 => AttributeType::UNorm8,
            4 => AttributeType::UInt16,
            5 => AttributeType::SInt16,
            6 => AttributeType::UNorm16,
            7 => AttributeType::UInt32,
            8 => AttributeType::SInt32,
            _ => return None,
        })
    }

    /// Size of one component in bytes
    pub fn component_size(&self) -> u32 {
        match self {
            AttributeType::UInt8 | AttributeType::SInt8 | AttributeType::UNorm8 => 1,
            AttributeType::UInt16 | AttributeType::SInt16 | AttributeType::UNorm16 => 2,
            AttributeType::Float | AttributeType::UInt32 | AttributeType::SInt32 => 4,
        }
    }

    /// Integer attributes are fed to the shader unconverted
    pub fn is_integer(&self) -> bool {
        !matches!(self, AttributeType::Float | AttributeType::UNorm8 | AttributeType::UNorm16)
    }

    /// Normalized fixed-point attributes
    pub fn is_normalized(&self) -> bool {
        matches!(self, AttributeType::UNorm8 | AttributeType::UNorm16)
    }
}

const INDEX_SHIFT: u32 = 0;
const SEMANTIC_SHIFT: u32 = 4;
const SEMANTIC_INDEX_SHIFT: u32 = 6;
const TYPE_SHIFT: u32 = 8;
const COMPONENTS_SHIFT: u32 = 12;
const OFFSET_SHIFT: u32 = 16;

/// One vertex attribute, packed into 32 bits:
/// index:4, semantic:2, semantic_index:2, type:4, components:3, offset:16.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct VertexAttribute {
    bits: u32,
}

impl VertexAttribute {
    pub fn new(
        index: u8,
        semantic: Semantic,
        semantic_index: u8,
        attribute_type: AttributeType,
        components: u8,
        offset: u16,
    ) -> Self {
        assert!(index < 16, "vertex attribute index {} out of range", index);
        assert!(semantic_index < 4, "semantic index {} out of range", semantic_index);
        assert!((1..=4).contains(&components), "component count {} out of range", components);

        Self {
            bits: (u32::from(index) << INDEX_SHIFT)
                | ((semantic as u32) << SEMANTIC_SHIFT)
                | (u32::from(semantic_index) << SEMANTIC_INDEX_SHIFT)
                | ((attribute_type as u32) << TYPE_SHIFT)
                | (u32::from(components) << COMPONENTS_SHIFT)
                | (u32::from(offset) << OFFSET_SHIFT),
        }
    }

    /// Raw packed value
    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn index(&self) -> u32 {
        (self.bits >> INDEX_SHIFT) & 0xF
    }

    pub fn semantic(&self) -> Option<Semantic> {
        Semantic::from_bits((self.bits >> SEMANTIC_SHIFT) & 0x3)
    }

    pub fn semantic_index(&self) -> u32 {
        (self.bits >> SEMANTIC_INDEX_SHIFT) & 0x3
    }

    pub fn attribute_type(&self) -> Option<AttributeType> {
        AttributeType::from_bits((self.bits >> TYPE_SHIFT) & 0xF)
    }

    pub fn components(&self) -> u32 {
        (self.bits >> COMPONENTS_SHIFT) & 0x7
    }

    pub fn offset(&self) -> u32 {
        self.bits >> OFFSET_SHIFT
    }

    /// Bit 15 is unused and must stay clear
    pub fn is_valid(&self) -> bool {
        self.semantic().is_some()
            && self.attribute_type().is_some()
            && (1..=4).contains(&self.components())
            && (self.bits & (1 << 15)) == 0
    }

    /// Name of the shader input this attribute binds to
    pub fn binding_name(&self) -> Option<String> {
        let semantic = self.semantic()?;
        if semantic == Semantic::Position && self.semantic_index() == 0 {
            return Some(semantic.variable_prefix().to_string());
        }
        Some(format!("{}{}", semantic.variable_prefix(), self.semantic_index()))
    }
}

/// Vertex input description supplied by the caller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VertexLayout {
    pub attributes: Vec<VertexAttribute>,
    pub stride: u32,
}

impl VertexLayout {
    pub fn new(attributes: Vec<VertexAttribute>, stride: u32) -> Self {
        Self { attributes, stride }
    }

    /// Layout without vertex inputs (e.g. full-screen passes)
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Key of a vertex-layout object
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LayoutKey {
    attributes: [VertexAttribute; MAX_VERTEX_ATTRIBUTES],
    stride: u32,
    attribute_count: u32,
}

impl LayoutKey {
    /// Build the key for a layout.
    ///
    /// # Panics
    /// If the layout has more than [`MAX_VERTEX_ATTRIBUTES`] attributes.
    pub fn new(layout: &VertexLayout) -> Self {
        assert!(
            layout.attributes.len() <= MAX_VERTEX_ATTRIBUTES,
            "vertex layout has {} attributes, maximum is {}",
            layout.attributes.len(),
            MAX_VERTEX_ATTRIBUTES
        );

        let mut key = Self::zeroed();
        key.attribute_count = layout.attributes.len() as u32;
        if key.attribute_count > 0 {
            key.attributes[..layout.attributes.len()].copy_from_slice(&layout.attributes);
            key.stride = layout.stride;
        }
        key
    }

    /// Attributes in use
    pub fn attributes(&self) -> &[VertexAttribute] {
        let count = (self.attribute_count as usize).min(MAX_VERTEX_ATTRIBUTES);
        &self.attributes[..count]
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn attribute_count(&self) -> u32 {
        self.attribute_count
    }

    /// Whether this key could have been produced by [`LayoutKey::new`].
    /// Keys read back from disk are checked with this.
    pub fn is_valid(&self) -> bool {
        let count = self.attribute_count as usize;
        if count > MAX_VERTEX_ATTRIBUTES || (count == 0 && self.stride != 0) {
            return false;
        }

        self.attributes[..count].iter().all(VertexAttribute::is_valid)
            && self.attributes[count..].iter().all(|va| va.bits() == 0)
    }

    fn hash_value(&self) -> u64 {
        let seed = hash_combine(u64::from(self.attribute_count), u64::from(self.stride));
        hash_combine_all(seed, self.attributes.iter().map(|va| u64::from(va.bits())))
    }
}

impl PartialEq for LayoutKey {
    fn eq(&self, other: &Self) -> bool {
        bytemuck::bytes_of(self) == bytemuck::bytes_of(other)
    }
}

impl Eq for LayoutKey {}

impl Hash for LayoutKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash_value());
    }
}

/// Key of a linked program: layout key plus content keys of each stage.
/// Absent stages are all-zero.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PipelineKey {
    layout: LayoutKey,
    stage_hashes: [ContentHash; MAX_SHADER_STAGES],
    stage_lengths: [u32; MAX_SHADER_STAGES],
    reserved: u32,
}

const _: () = assert!(std::mem::size_of::<LayoutKey>() == 32);
const _: () = assert!(std::mem::size_of::<PipelineKey>() == 96);

impl PipelineKey {
    /// Derive the key for a pipeline configuration.
    ///
    /// # Panics
    /// If the layout exceeds [`MAX_VERTEX_ATTRIBUTES`] or a shader sits in the
    /// wrong stage slot.
    pub fn derive(config: &GraphicsConfig<'_>) -> Self {
        assert_eq!(config.vertex_shader.stage(), ShaderStage::Vertex, "vertex slot holds a non-vertex shader");
        assert_eq!(config.fragment_shader.stage(), ShaderStage::Fragment, "fragment slot holds a non-fragment shader");

        let mut key = Self::zeroed();
        key.layout = LayoutKey::new(&config.input_layout);
        key.set_stage(ShaderStage::Vertex, config.vertex_shader.key());
        key.set_stage(ShaderStage::Fragment, config.fragment_shader.key());

        if let Some(geometry_shader) = config.geometry_shader {
            assert_eq!(geometry_shader.stage(), ShaderStage::Geometry, "geometry slot holds a non-geometry shader");
            key.set_stage(ShaderStage::Geometry, geometry_shader.key());
        }

        key
    }

    fn set_stage(&mut self, stage: ShaderStage, shader_key: &ShaderKey) {
        self.stage_hashes[stage.slot()] = shader_key.hash;
        self.stage_lengths[stage.slot()] = shader_key.length;
    }

    pub fn layout(&self) -> &LayoutKey {
        &self.layout
    }

    /// Content key of a stage (all-zero if the stage is absent)
    pub fn stage(&self, stage: ShaderStage) -> ShaderKey {
        ShaderKey {
            hash: self.stage_hashes[stage.slot()],
            length: self.stage_lengths[stage.slot()],
        }
    }

    pub fn has_geometry_stage(&self) -> bool {
        let gs = self.stage(ShaderStage::Geometry);
        !gs.hash.is_zero() || gs.length != 0
    }

    pub fn is_valid(&self) -> bool {
        self.layout.is_valid() && self.reserved == 0
    }

    fn hash_value(&self) -> u64 {
        let mut h = self.layout.hash_value();
        for (hash, length) in self.stage_hashes.iter().zip(self.stage_lengths.iter()) {
            h = hash_combine_all(h, [hash.low, hash.high, u64::from(*length)]);
        }
        h
    }
}

impl PartialEq for PipelineKey {
    fn eq(&self, other: &Self) -> bool {
        bytemuck::bytes_of(self) == bytemuck::bytes_of(other)
    }
}

impl Eq for PipelineKey {}

impl Hash for PipelineKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash_value());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::shaders::Shader;

    fn position_uv_layout() -> VertexLayout {
        VertexLayout::new(
            vec![
                VertexAttribute::new(0, Semantic::Position, 0, AttributeType::Float, 3, 0),
                VertexAttribute::new(1, Semantic::TexCoord, 0, AttributeType::Float, 2, 12),
            ],
            20,
        )
    }

    #[test]
    fn test_attribute_packing() {
        let va = VertexAttribute::new(3, Semantic::Color, 1, AttributeType::UNorm8, 4, 24);

        assert_eq!(va.index(), 3);
        assert_eq!(va.semantic(), Some(Semantic::Color));
        assert_eq!(va.semantic_index(), 1);
        assert_eq!(va.attribute_type(), Some(AttributeType::UNorm8));
        assert_eq!(va.components(), 4);
        assert_eq!(va.offset(), 24);
        assert!(va.is_valid());
    }

    #[test]
    fn test_binding_names() {
        let pos = VertexAttribute::new(0, Semantic::Position, 0, AttributeType::Float, 2, 0);
        let pos1 = VertexAttribute::new(1, Semantic::Position, 1, AttributeType::Float, 2, 8);
        let tex = VertexAttribute::new(2, Semantic::TexCoord, 0, AttributeType::Float, 2, 16);
        let col = VertexAttribute::new(3, Semantic::Color, 2, AttributeType::UNorm8, 4, 24);

        assert_eq!(pos.binding_name().as_deref(), Some("a_pos"));
        assert_eq!(pos1.binding_name().as_deref(), Some("a_pos1"));
        assert_eq!(tex.binding_name().as_deref(), Some("a_tex0"));
        assert_eq!(col.binding_name().as_deref(), Some("a_col2"));
    }

    #[test]
    fn test_layout_key_zero_fills_unused_slots() {
        let key = LayoutKey::new(&position_uv_layout());

        assert_eq!(key.attribute_count(), 2);
        assert_eq!(key.attributes().len(), 2);
        assert!(key.is_valid());

        let bytes = bytemuck::bytes_of(&key);
        // slots 2..6 are zero
        assert!(bytes[8..24].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_empty_layout_ignores_stride() {
        let a = LayoutKey::new(&VertexLayout::new(Vec::new(), 0));
        let b = LayoutKey::new(&VertexLayout::new(Vec::new(), 32));

        assert_eq!(a, b);
        assert_eq!(b.stride(), 0);
    }

    #[test]
    fn test_attribute_order_matters() {
        let layout = position_uv_layout();
        let mut reversed = layout.clone();
        reversed.attributes.reverse();

        assert_ne!(LayoutKey::new(&layout), LayoutKey::new(&reversed));
    }

    #[test]
    fn test_stride_matters() {
        let layout = position_uv_layout();
        let mut wider = layout.clone();
        wider.stride = 24;

        assert_ne!(LayoutKey::new(&layout), LayoutKey::new(&wider));
    }

    #[test]
    #[should_panic(expected = "maximum is 6")]
    fn test_too_many_attributes_panics() {
        let attributes = (0..7)
            .map(|i| VertexAttribute::new(i, Semantic::TexCoord, 0, AttributeType::Float, 1, u16::from(i) * 4))
            .collect();
        LayoutKey::new(&VertexLayout::new(attributes, 28));
    }

    #[test]
    fn test_pipeline_key_absent_geometry_is_zero() {
        let vs = Shader::with_main(ShaderStage::Vertex, "void main() {}");
        let fs = Shader::with_main(ShaderStage::Fragment, "void main() { o_col0 = vec4(1.0); }");
        let config = GraphicsConfig::new(position_uv_layout(), &vs, &fs);

        let key = PipelineKey::derive(&config);
        assert!(!key.has_geometry_stage());
        assert_eq!(key.stage(ShaderStage::Geometry), ShaderKey::default());
        assert_eq!(key.stage(ShaderStage::Vertex), *vs.key());
        assert!(key.is_valid());
    }

    #[test]
    fn test_invalid_layout_key_detected() {
        let mut key = LayoutKey::new(&position_uv_layout());
        key.attribute_count = 9;
        assert!(!key.is_valid());

        let mut key = LayoutKey::new(&position_uv_layout());
        key.attributes[4] = VertexAttribute { bits: 1 << 12 };
        assert!(!key.is_valid());
    }
}
