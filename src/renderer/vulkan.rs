//! # Vulkan Conversions
//!
//! Maps layout keys, shader stages and fixed-function state onto `ash`
//! create-info types, for backends that build `vk::Pipeline`s from cached
//! descriptions.
//!
//! This is an adapter surface for downstream Vulkan backends. Nothing in the
//! cache itself calls it: the device stores fixed-function state on each
//! [`Pipeline`](crate::renderer::Pipeline) and leaves applying it to the
//! backend.

use ash::vk;

use crate::renderer::pipeline::{
    AttributeType, BlendFunc, BlendOp, BlendState, ColorWriteMask, CullMode, DepthFunc, DepthState, LayoutKey,
    Primitive, RasterizationState, VertexAttribute,
};
use crate::renderer::shaders::ShaderStage;

impl ShaderStage {
    /// Convert to Vulkan shader stage flags
    pub fn to_vk_flags(&self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
        }
    }
}

/// Vertex format of an attribute, `None` if the attribute is malformed
pub fn vertex_format(attribute: &VertexAttribute) -> Option<vk::Format> {
    use AttributeType::*;

    let formats = match attribute.attribute_type()? {
        Float => [
            vk::Format::R32_SFLOAT,
            vk::Format::R32G32_SFLOAT,
            vk::Format::R32G32B32_SFLOAT,
            vk::Format::R32G32B32A32_SFLOAT,
        ],
        UInt8 => [
            vk::Format::R8_UINT,
            vk::Format::R8G8_UINT,
            vk::Format::R8G8B8_UINT,
            vk::Format::R8G8B8A8_UINT,
        ],
        SInt8 => [
            vk::Format::R8_SINT,
            vk::Format::R8G8_SINT,
            vk::Format::R8G8B8_SINT,
            vk::Format::R8G8B8A8_SINT,
        ],
        UNorm8 => [
            vk::Format::R8_UNORM,
            vk::Format::R8G8_UNORM,
            vk::Format::R8G8B8_UNORM,
            vk::Format::R8G8B8A8_UNORM,
        ],
        UInt16 => [
            vk::Format::R16_UINT,
            vk::Format::R16G16_UINT,
            vk::Format::R16G16B16_UINT,
            vk::Format::R16G16B16A16_UINT,
        ],
        SInt16 => [
            vk::Format::R16_SINT,
            vk::Format::R16G16_SINT,
            vk::Format::R16G16B16_SINT,
            vk::Format::R16G16B16A16_SINT,
        ],
        UNorm16 => [
            vk::Format::R16_UNORM,
            vk::Format::R16G16_UNORM,
            vk::Format::R16G16B16_UNORM,
            vk::Format::R16G16B16A16_UNORM,
        ],
        UInt32 => [
            vk::Format::R32_UINT,
            vk::Format::R32G32_UINT,
            vk::Format::R32G32B32_UINT,
            vk::Format::R32G32B32A32_UINT,
        ],
        SInt32 => [
            vk::Format::R32_SINT,
            vk::Format::R32G32_SINT,
            vk::Format::R32G32B32_SINT,
            vk::Format::R32G32B32A32_SINT,
        ],
    };

    let components = attribute.components() as usize;
    (1..=4).contains(&components).then(|| formats[components - 1])
}

/// Vertex input state for a layout: one interleaved binding at slot 0.
/// Layouts without attributes have no binding.
pub fn vertex_input_descriptions(
    key: &LayoutKey,
) -> (Vec<vk::VertexInputBindingDescription>, Vec<vk::VertexInputAttributeDescription>) {
    if key.attribute_count() == 0 {
        return (Vec::new(), Vec::new());
    }

    let binding = vk::VertexInputBindingDescription::default()
        .binding(0)
        .stride(key.stride())
        .input_rate(vk::VertexInputRate::VERTEX);

    let attributes = key
        .attributes()
        .iter()
        .filter_map(|va| {
            let format = vertex_format(va)?;
            Some(
                vk::VertexInputAttributeDescription::default()
                    .binding(0)
                    .location(va.index())
                    .format(format)
                    .offset(va.offset()),
            )
        })
        .collect();

    (vec![binding], attributes)
}

pub fn primitive_topology(primitive: Primitive) -> vk::PrimitiveTopology {
    match primitive {
        Primitive::Points => vk::PrimitiveTopology::POINT_LIST,
        Primitive::Lines => vk::PrimitiveTopology::LINE_LIST,
        Primitive::Triangles => vk::PrimitiveTopology::TRIANGLE_LIST,
        Primitive::TriangleStrips => vk::PrimitiveTopology::TRIANGLE_STRIP,
    }
}

pub fn cull_mode_flags(rasterization: &RasterizationState) -> vk::CullModeFlags {
    match rasterization.cull_mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
    }
}

pub fn compare_op(func: DepthFunc) -> vk::CompareOp {
    match func {
        DepthFunc::Never => vk::CompareOp::NEVER,
        DepthFunc::Always => vk::CompareOp::ALWAYS,
        DepthFunc::Less => vk::CompareOp::LESS,
        DepthFunc::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
        DepthFunc::Greater => vk::CompareOp::GREATER,
        DepthFunc::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
        DepthFunc::Equal => vk::CompareOp::EQUAL,
    }
}

pub fn depth_stencil_state(depth: &DepthState) -> vk::PipelineDepthStencilStateCreateInfo<'static> {
    vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(depth.needs_depth_test())
        .depth_write_enable(depth.depth_write)
        .depth_compare_op(compare_op(depth.depth_test))
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false)
}

pub fn blend_factor(func: BlendFunc) -> vk::BlendFactor {
    match func {
        BlendFunc::Zero => vk::BlendFactor::ZERO,
        BlendFunc::One => vk::BlendFactor::ONE,
        BlendFunc::SrcColor => vk::BlendFactor::SRC_COLOR,
        BlendFunc::InvSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
        BlendFunc::DstColor => vk::BlendFactor::DST_COLOR,
        BlendFunc::InvDstColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
        BlendFunc::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        BlendFunc::InvSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        BlendFunc::SrcAlpha1 => vk::BlendFactor::SRC1_ALPHA,
        BlendFunc::InvSrcAlpha1 => vk::BlendFactor::ONE_MINUS_SRC1_ALPHA,
        BlendFunc::DstAlpha => vk::BlendFactor::DST_ALPHA,
        BlendFunc::InvDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
        BlendFunc::ConstantColor => vk::BlendFactor::CONSTANT_COLOR,
        BlendFunc::InvConstantColor => vk::BlendFactor::ONE_MINUS_CONSTANT_COLOR,
    }
}

pub fn blend_op(op: BlendOp) -> vk::BlendOp {
    match op {
        BlendOp::Add => vk::BlendOp::ADD,
        BlendOp::Subtract => vk::BlendOp::SUBTRACT,
        BlendOp::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
        BlendOp::Min => vk::BlendOp::MIN,
        BlendOp::Max => vk::BlendOp::MAX,
    }
}

/// Same bit order as `VkColorComponentFlagBits`
pub fn color_write_mask(mask: ColorWriteMask) -> vk::ColorComponentFlags {
    vk::ColorComponentFlags::from_raw(u32::from(mask.bits()))
}

pub fn color_blend_attachment(blend: &BlendState) -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState::default()
        .blend_enable(blend.enable)
        .src_color_blend_factor(blend_factor(blend.src_blend))
        .dst_color_blend_factor(blend_factor(blend.dst_blend))
        .color_blend_op(blend_op(blend.blend_op))
        .src_alpha_blend_factor(blend_factor(blend.src_alpha_blend))
        .dst_alpha_blend_factor(blend_factor(blend.dst_alpha_blend))
        .alpha_blend_op(blend_op(blend.alpha_blend_op))
        .color_write_mask(color_write_mask(blend.write_mask))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::pipeline::{Semantic, VertexLayout};

    #[test]
    fn test_vertex_formats() {
        let pos = VertexAttribute::new(0, Semantic::Position, 0, AttributeType::Float, 3, 0);
        let col = VertexAttribute::new(1, Semantic::Color, 0, AttributeType::UNorm8, 4, 12);

        assert_eq!(vertex_format(&pos), Some(vk::Format::R32G32B32_SFLOAT));
        assert_eq!(vertex_format(&col), Some(vk::Format::R8G8B8A8_UNORM));
    }

    #[test]
    fn test_vertex_input_descriptions() {
        let key = LayoutKey::new(&VertexLayout::new(
            vec![
                VertexAttribute::new(0, Semantic::Position, 0, AttributeType::Float, 2, 0),
                VertexAttribute::new(2, Semantic::TexCoord, 0, AttributeType::UNorm16, 2, 8),
            ],
            12,
        ));

        let (bindings, attributes) = vertex_input_descriptions(&key);
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].stride, 12);
        assert_eq!(attributes.len(), 2);
        assert_eq!(attributes[1].location, 2);
        assert_eq!(attributes[1].offset, 8);
        assert_eq!(attributes[1].format, vk::Format::R16G16_UNORM);

        let (bindings, attributes) = vertex_input_descriptions(&LayoutKey::new(&VertexLayout::empty()));
        assert!(bindings.is_empty() && attributes.is_empty());
    }

    #[test]
    fn test_write_mask_bits_match() {
        assert_eq!(color_write_mask(ColorWriteMask::ALL), vk::ColorComponentFlags::RGBA);
        assert_eq!(
            color_write_mask(ColorWriteMask::RED | ColorWriteMask::ALPHA),
            vk::ColorComponentFlags::R | vk::ColorComponentFlags::A
        );
    }

    #[test]
    fn test_depth_write_enables_test() {
        let info = depth_stencil_state(&DepthState::test_and_write(DepthFunc::Always));
        assert_eq!(info.depth_test_enable, vk::TRUE);
        assert_eq!(info.depth_compare_op, vk::CompareOp::ALWAYS);
    }

    #[test]
    fn test_dual_source_factors() {
        let mut blend = BlendState::alpha_blend();
        blend.dst_blend = BlendFunc::InvSrcAlpha1;

        let attachment = color_blend_attachment(&blend);
        assert_eq!(attachment.dst_color_blend_factor, vk::BlendFactor::ONE_MINUS_SRC1_ALPHA);
        assert_eq!(attachment.blend_enable, vk::TRUE);
    }
}
