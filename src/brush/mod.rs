// ============================================================================
// BRUSH MODULE — turning sparse pointer samples into evenly spaced stamps
// ============================================================================
//
// Architecture:
//   mod.rs        — tip settings and the per-texture presets
//   tip_mover.rs  — BrushTipMover: Bezier smoothing, spacing, flow alpha
// ============================================================================

pub mod tip_mover;

pub use tip_mover::{BrushTipMover, LINE_SEGMENT_LENGTH, SHORT_SEGMENT_GUARD};

/// Spacing of textured tips, as a fraction of the current radius.
pub const TEXTURED_TIP_SPACING: f64 = 0.15;

/// How each stamp's rotation is chosen.  Only textured tips look rotated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RotationMode {
    #[default]
    Off,
    Random,
    /// Rotate along the current stroke direction.
    FollowStroke,
}

/// Placement parameters for one stroke, in event units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TipSettings {
    pub radius: f64,
    pub flow: f64,
    /// Maximum random offset of each stamp, as a fraction of its radius.
    pub scatter_offset: f64,
    /// Distance between stamps: output pixels, or a fraction of the current
    /// radius when `relative_spacing` is set.
    pub spacing: f64,
    pub relative_spacing: bool,
    pub rotation_mode: RotationMode,
}

impl TipSettings {
    /// One stamp per output pixel, no scatter, no rotation.
    pub fn continuous(radius: f64, flow: f64) -> Self {
        Self {
            radius,
            flow,
            scatter_offset: 0.0,
            spacing: 1.0,
            relative_spacing: false,
            rotation_mode: RotationMode::Off,
        }
    }

    /// Preset for a brush tip: circles are continuous, textures are spaced
    /// relative to the radius and randomly rotated.
    pub fn for_texture(texture_id: u32, radius: f64, flow: f64) -> Self {
        if texture_id == 0 {
            Self::continuous(radius, flow)
        } else {
            Self {
                radius,
                flow,
                scatter_offset: 0.0,
                spacing: TEXTURED_TIP_SPACING,
                relative_spacing: true,
                rotation_mode: RotationMode::Random,
            }
        }
    }

    /// Whether these settings allow the deterministic one-pixel fast path.
    pub fn is_continuous(&self) -> bool {
        !self.relative_spacing
            && self.spacing == 1.0
            && self.scatter_offset == 0.0
            && self.rotation_mode != RotationMode::Random
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texture_presets() {
        assert!(TipSettings::for_texture(0, 5.0, 0.5).is_continuous());
        let textured = TipSettings::for_texture(3, 5.0, 0.5);
        assert!(!textured.is_continuous());
        assert!(textured.relative_spacing);
        assert_eq!(textured.rotation_mode, RotationMode::Random);
    }

    #[test]
    fn follow_stroke_keeps_continuous_mode() {
        let mut s = TipSettings::continuous(4.0, 1.0);
        s.rotation_mode = RotationMode::FollowStroke;
        assert!(s.is_continuous());
        s.scatter_offset = 0.5;
        assert!(!s.is_continuous());
    }
}
