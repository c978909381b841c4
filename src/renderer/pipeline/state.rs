//! # Fixed-Function State
//!
//! Rasterization, depth and blend state stored by value in each pipeline.
//! These are not cached or shared; applying them is the backend's job.

use bitflags::bitflags;

/// Primitive topology
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Primitive {
    Points,
    Lines,
    #[default]
    Triangles,
    TriangleStrips,
}

/// Face culling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
}

/// Rasterization state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RasterizationState {
    pub cull_mode: CullMode,
}

impl RasterizationState {
    pub fn no_cull() -> Self {
        Self { cull_mode: CullMode::None }
    }
}

/// Depth comparison function
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DepthFunc {
    Never,
    #[default]
    Always,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
}

/// Depth state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DepthState {
    pub depth_test: DepthFunc,
    pub depth_write: bool,
}

impl DepthState {
    /// No depth testing or writes
    pub fn disabled() -> Self {
        Self {
            depth_test: DepthFunc::Always,
            depth_write: false,
        }
    }

    /// Depth test with the given function, writes enabled
    pub fn test_and_write(depth_test: DepthFunc) -> Self {
        Self {
            depth_test,
            depth_write: true,
        }
    }

    /// Writes need the depth test enabled even when it always passes
    pub fn needs_depth_test(&self) -> bool {
        self.depth_test != DepthFunc::Always || self.depth_write
    }
}

/// Blend factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFunc {
    Zero,
    One,
    SrcColor,
    InvSrcColor,
    DstColor,
    InvDstColor,
    SrcAlpha,
    InvSrcAlpha,
    SrcAlpha1,
    InvSrcAlpha1,
    DstAlpha,
    InvDstAlpha,
    ConstantColor,
    InvConstantColor,
}

/// Blend equation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

bitflags! {
    /// Color channels written by a pipeline
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColorWriteMask: u8 {
        const RED = 1 << 0;
        const GREEN = 1 << 1;
        const BLUE = 1 << 2;
        const ALPHA = 1 << 3;
        const ALL = Self::RED.bits() | Self::GREEN.bits() | Self::BLUE.bits() | Self::ALPHA.bits();
    }
}

impl Default for ColorWriteMask {
    fn default() -> Self {
        ColorWriteMask::ALL
    }
}

/// Blend state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub enable: bool,
    pub src_blend: BlendFunc,
    pub dst_blend: BlendFunc,
    pub src_alpha_blend: BlendFunc,
    pub dst_alpha_blend: BlendFunc,
    pub blend_op: BlendOp,
    pub alpha_blend_op: BlendOp,
    /// Constant color, RGBA8 packed with red in the low byte
    pub constant: u32,
    pub write_mask: ColorWriteMask,
}

impl Default for BlendState {
    fn default() -> Self {
        Self::disabled()
    }
}

impl BlendState {
    /// Blending off, all channels written
    pub fn disabled() -> Self {
        Self {
            enable: false,
            src_blend: BlendFunc::One,
            dst_blend: BlendFunc::Zero,
            src_alpha_blend: BlendFunc::One,
            dst_alpha_blend: BlendFunc::Zero,
            blend_op: BlendOp::Add,
            alpha_blend_op: BlendOp::Add,
            constant: 0,
            write_mask: ColorWriteMask::ALL,
        }
    }

    /// Standard non-premultiplied alpha blending
    pub fn alpha_blend() -> Self {
        Self {
            enable: true,
            src_blend: BlendFunc::SrcAlpha,
            dst_blend: BlendFunc::InvSrcAlpha,
            src_alpha_blend: BlendFunc::One,
            dst_alpha_blend: BlendFunc::Zero,
            ..Self::disabled()
        }
    }

    /// Constant color as normalized floats
    pub fn constant_rgba(&self) -> [f32; 4] {
        let channel = |shift: u32| ((self.constant >> shift) & 0xFF) as f32 / 255.0;
        [channel(0), channel(8), channel(16), channel(24)]
    }

    /// Whether either side of the equation reads the second source color
    pub fn uses_dual_source(&self) -> bool {
        [self.src_blend, self.dst_blend, self.src_alpha_blend, self.dst_alpha_blend]
            .iter()
            .any(|f| matches!(f, BlendFunc::SrcAlpha1 | BlendFunc::InvSrcAlpha1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_write_needs_test() {
        assert!(!DepthState::disabled().needs_depth_test());
        assert!(DepthState::test_and_write(DepthFunc::Always).needs_depth_test());
        assert!(DepthState { depth_test: DepthFunc::Less, depth_write: false }.needs_depth_test());
    }

    #[test]
    fn test_blend_constant() {
        let bs = BlendState {
            constant: 0xFF00_80FF,
            ..BlendState::disabled()
        };
        let rgba = bs.constant_rgba();

        assert_eq!(rgba[0], 1.0);
        assert!((rgba[1] - 128.0 / 255.0).abs() < 1e-6);
        assert_eq!(rgba[2], 0.0);
        assert_eq!(rgba[3], 1.0);
    }

    #[test]
    fn test_dual_source_detection() {
        assert!(!BlendState::alpha_blend().uses_dual_source());

        let bs = BlendState {
            dst_blend: BlendFunc::InvSrcAlpha1,
            ..BlendState::alpha_blend()
        };
        assert!(bs.uses_dual_source());
    }
}
