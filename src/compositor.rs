// ============================================================================
// COMPOSITOR — coverage × colour × blend mode into layers, layers into images
// ============================================================================
//
// All pixel buffers are straight-alpha RGBA8.  Blending is done in f32 on
// 0.0–1.0 channels.  Non-normal modes use the advanced blend equation
//
//   Co = (f(Cs, Cd)·as·ad + Cs·as·(1 − ad) + Cd·ad·(1 − as)) / ao
//   ao = as + ad·(1 − as)
//
// so a software merge matches what a GPU with advanced blending would do.
// ============================================================================

use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::color::{channel, unit};
use crate::geometry::Rect;
use crate::raster::CoverageBuffer;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    /// Reduces destination alpha, leaves colour alone.
    Erase,
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
    HardLight,
    SoftLight,
    Darken,
    Lighten,
    Difference,
    Exclusion,
    ColorBurn,
    LinearBurn,
    VividLight,
    LinearLight,
    PinLight,
    ColorDodge,
    LinearDodge,
}

impl BlendMode {
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Erase,
            BlendMode::Normal,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Overlay,
            BlendMode::HardLight,
            BlendMode::SoftLight,
            BlendMode::Darken,
            BlendMode::Lighten,
            BlendMode::Difference,
            BlendMode::Exclusion,
            BlendMode::ColorBurn,
            BlendMode::LinearBurn,
            BlendMode::VividLight,
            BlendMode::LinearLight,
            BlendMode::PinLight,
            BlendMode::ColorDodge,
            BlendMode::LinearDodge,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Erase => "Erase",
            BlendMode::Normal => "Normal",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Overlay => "Overlay",
            BlendMode::HardLight => "Hard Light",
            BlendMode::SoftLight => "Soft Light",
            BlendMode::Darken => "Darken",
            BlendMode::Lighten => "Lighten",
            BlendMode::Difference => "Difference",
            BlendMode::Exclusion => "Exclusion",
            BlendMode::ColorBurn => "Color Burn",
            BlendMode::LinearBurn => "Linear Burn",
            BlendMode::VividLight => "Vivid Light",
            BlendMode::LinearLight => "Linear Light",
            BlendMode::PinLight => "Pin Light",
            BlendMode::ColorDodge => "Color Dodge",
            BlendMode::LinearDodge => "Linear Dodge",
        }
    }

    /// Stable number used in the event text format.
    pub fn to_u8(&self) -> u8 {
        match self {
            BlendMode::Erase => 0,
            BlendMode::Normal => 1,
            BlendMode::Multiply => 2,
            BlendMode::Screen => 3,
            BlendMode::Overlay => 4,
            BlendMode::HardLight => 5,
            BlendMode::SoftLight => 6,
            BlendMode::Darken => 7,
            BlendMode::Lighten => 8,
            BlendMode::Difference => 9,
            BlendMode::Exclusion => 10,
            BlendMode::ColorBurn => 11,
            BlendMode::LinearBurn => 12,
            BlendMode::VividLight => 13,
            BlendMode::LinearLight => 14,
            BlendMode::PinLight => 15,
            BlendMode::ColorDodge => 16,
            BlendMode::LinearDodge => 17,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        BlendMode::all().get(v as usize).copied()
    }
}

// ============================================================================
// LAYERS
// ============================================================================

/// One bitmap in the stack.
#[derive(Clone, Debug)]
pub struct Layer {
    pub id: u32,
    pub visible: bool,
    pub has_alpha: bool,
    pub blend_mode: BlendMode,
    opacity: f32,
    clear_color: [u8; 4],
    pub pixels: RgbaImage,
}

impl Layer {
    /// A layer filled with `clear_color`.  Layers without alpha are always
    /// fully opaque.
    pub fn new(id: u32, width: u32, height: u32, has_alpha: bool, clear_color: [u8; 4], opacity: f32) -> Self {
        let mut fill = clear_color;
        if !has_alpha {
            fill[3] = 255;
        }
        Self {
            id,
            visible: true,
            has_alpha,
            blend_mode: BlendMode::Normal,
            opacity: opacity.clamp(0.0, 1.0),
            clear_color: fill,
            pixels: RgbaImage::from_pixel(width, height, Rgba(fill)),
        }
    }

    /// Refill with the colour the layer was created with.
    pub fn clear(&mut self) {
        let fill = Rgba(self.clear_color);
        for px in self.pixels.pixels_mut() {
            *px = fill;
        }
    }

    pub fn clear_color(&self) -> [u8; 4] {
        self.clear_color
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = opacity.clamp(0.0, 1.0);
    }

    /// Whether nothing below this layer can show through.
    pub fn is_opaque(&self) -> bool {
        self.visible && !self.has_alpha && self.opacity >= 1.0 && self.blend_mode == BlendMode::Normal
    }
}

/// Coverage of an event that has not been merged into its layer yet.
#[derive(Clone, Copy, Debug)]
pub struct Overlay<'a> {
    pub target_layer_id: u32,
    pub coverage: &'a CoverageBuffer,
    pub rect: Rect,
    pub color: [u8; 3],
    pub opacity: f32,
    pub mode: BlendMode,
}

// ============================================================================
// PIXEL BLENDING
// ============================================================================

/// Blend `top` over `base` with layer opacity.
pub fn blend_pixel(base: Rgba<u8>, top: Rgba<u8>, mode: BlendMode, opacity: f32) -> Rgba<u8> {
    if top[3] == 0 {
        return base;
    }
    // Fast path: opaque normal paint replaces the pixel.
    if mode == BlendMode::Normal && opacity >= 1.0 && top[3] == 255 {
        return top;
    }
    let alpha = unit(top[3]) * opacity.clamp(0.0, 1.0);
    blend_color(base, [unit(top[0]), unit(top[1]), unit(top[2])], alpha, mode)
}

/// Blend a colour with alpha `src_a` over `base`.
pub fn blend_color(base: Rgba<u8>, src: [f32; 3], src_a: f32, mode: BlendMode) -> Rgba<u8> {
    if src_a <= 0.0 {
        return base;
    }
    let dst = [unit(base[0]), unit(base[1]), unit(base[2])];
    let dst_a = unit(base[3]);

    if mode == BlendMode::Erase {
        let mut out = base;
        out[3] = channel(dst_a * (1.0 - src_a));
        return out;
    }

    let out_a = src_a + dst_a * (1.0 - src_a);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let mut out = [0u8; 4];
    for c in 0..3 {
        let (s, d) = (src[c], dst[c]);
        let v = if mode == BlendMode::Normal {
            (s * src_a + d * dst_a * (1.0 - src_a)) / out_a
        } else {
            let f = blend_channel(mode, d, s);
            (f * src_a * dst_a + s * src_a * (1.0 - dst_a) + d * dst_a * (1.0 - src_a)) / out_a
        };
        out[c] = channel(v);
    }
    out[3] = channel(out_a);
    Rgba(out)
}

/// Per-channel blend function `f(dst, src)`.
fn blend_channel(mode: BlendMode, base: f32, top: f32) -> f32 {
    match mode {
        BlendMode::Erase | BlendMode::Normal => top,
        BlendMode::Multiply => base * top,
        BlendMode::Screen => 1.0 - (1.0 - base) * (1.0 - top),
        BlendMode::Overlay => overlay_channel(base, top),
        BlendMode::HardLight => overlay_channel(top, base),
        BlendMode::SoftLight => soft_light_channel(base, top),
        BlendMode::Darken => base.min(top),
        BlendMode::Lighten => base.max(top),
        BlendMode::Difference => (base - top).abs(),
        BlendMode::Exclusion => base + top - 2.0 * base * top,
        BlendMode::ColorBurn => color_burn_channel(base, top),
        BlendMode::LinearBurn => (base + top - 1.0).max(0.0),
        BlendMode::VividLight => vivid_light_channel(base, top),
        BlendMode::LinearLight => (base + 2.0 * top - 1.0).clamp(0.0, 1.0),
        BlendMode::PinLight => pin_light_channel(base, top),
        BlendMode::ColorDodge => color_dodge_channel(base, top),
        BlendMode::LinearDodge => (base + top).min(1.0),
    }
}

fn overlay_channel(base: f32, top: f32) -> f32 {
    if base < 0.5 {
        2.0 * base * top
    } else {
        1.0 - 2.0 * (1.0 - base) * (1.0 - top)
    }
}

fn color_burn_channel(base: f32, top: f32) -> f32 {
    if base >= 1.0 {
        1.0
    } else if top <= 0.0 {
        0.0
    } else {
        (1.0 - (1.0 - base) / top).max(0.0)
    }
}

fn color_dodge_channel(base: f32, top: f32) -> f32 {
    if base <= 0.0 {
        0.0
    } else if top >= 1.0 {
        1.0
    } else {
        (base / (1.0 - top)).min(1.0)
    }
}

/// W3C Soft Light formula.
fn soft_light_channel(base: f32, top: f32) -> f32 {
    if top <= 0.5 {
        base - (1.0 - 2.0 * top) * base * (1.0 - base)
    } else {
        let d = if base <= 0.25 {
            ((16.0 * base - 12.0) * base + 4.0) * base
        } else {
            base.sqrt()
        };
        base + (2.0 * top - 1.0) * (d - base)
    }
}

fn vivid_light_channel(base: f32, top: f32) -> f32 {
    if top <= 0.5 {
        color_burn_channel(base, 2.0 * top)
    } else {
        color_dodge_channel(base, 2.0 * (top - 0.5))
    }
}

fn pin_light_channel(base: f32, top: f32) -> f32 {
    if top <= 0.5 {
        base.min(2.0 * top)
    } else {
        base.max(2.0 * (top - 0.5))
    }
}

// ============================================================================
// MERGING
// ============================================================================

/// Merge `coverage` inside `rect`, painted with `color` at `opacity`, into
/// `target`.  Zero opacity or an empty rect does nothing.
pub fn merge_coverage(
    target: &mut RgbaImage,
    coverage: &CoverageBuffer,
    rect: &Rect,
    color: [u8; 3],
    opacity: f32,
    mode: BlendMode,
) {
    if opacity <= 0.0 || rect.is_empty() {
        return;
    }
    let width = target.width().min(coverage.width());
    let height = target.height().min(coverage.height());
    let Some((x0, x1, y0, y1)) = rect.pixel_span(width, height) else { return };
    let opacity = opacity.min(1.0);
    let src = [unit(color[0]), unit(color[1]), unit(color[2])];
    let row_len = target.width() as usize * 4;

    target
        .par_chunks_mut(row_len)
        .enumerate()
        .skip(y0 as usize)
        .take((y1 - y0) as usize)
        .for_each(|(y, row)| {
            let cov_row = coverage.row(y as u32);
            for x in x0 as usize..x1 as usize {
                let cov = cov_row[x];
                if cov <= 0.0 {
                    continue;
                }
                let px = &mut row[x * 4..x * 4 + 4];
                let base = Rgba([px[0], px[1], px[2], px[3]]);
                let out = blend_color(base, src, cov * opacity, mode);
                px.copy_from_slice(&out.0);
            }
        });
}

/// Flatten a layer stack, bottom to top, into one image.
///
/// Rendering starts at the topmost opaque layer since nothing beneath it
/// can show.  `overlay` is merged into its target layer (on a copy) before
/// that layer is blended.
pub fn composite_layers(layers: &[Layer], width: u32, height: u32, overlay: Option<&Overlay<'_>>) -> RgbaImage {
    let start = layers
        .iter()
        .rposition(|layer| {
            let erased = overlay
                .is_some_and(|o| o.target_layer_id == layer.id && o.mode == BlendMode::Erase);
            layer.is_opaque() && !erased
        })
        .unwrap_or(0);
    composite_from(layers, width, height, overlay, start)
}

fn composite_from(
    layers: &[Layer],
    width: u32,
    height: u32,
    overlay: Option<&Overlay<'_>>,
    start: usize,
) -> RgbaImage {
    let mut patched: Option<(usize, RgbaImage)> = None;
    if let Some(o) = overlay {
        if let Some(index) = layers.iter().position(|l| l.id == o.target_layer_id) {
            let mut pixels = layers[index].pixels.clone();
            merge_coverage(&mut pixels, o.coverage, &o.rect, o.color, o.opacity, o.mode);
            patched = Some((index, pixels));
        }
    }

    let visible: Vec<(&RgbaImage, BlendMode, f32)> = layers
        .iter()
        .enumerate()
        .skip(start)
        .filter(|(_, layer)| layer.visible)
        .map(|(i, layer)| {
            let pixels = match &patched {
                Some((index, pixels)) if *index == i => pixels,
                _ => &layer.pixels,
            };
            debug_assert_eq!(pixels.dimensions(), (width, height));
            (pixels, layer.blend_mode, layer.opacity)
        })
        .collect();

    let mut result = RgbaImage::new(width, height);
    let row_len = width as usize * 4;
    result
        .par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(y, row)| {
            for x in 0..width as usize {
                let mut px = Rgba([0u8, 0, 0, 0]);
                for (pixels, mode, opacity) in &visible {
                    let top = *pixels.get_pixel(x as u32, y as u32);
                    px = blend_pixel(px, top, *mode, *opacity);
                }
                row[x * 4..x * 4 + 4].copy_from_slice(&px.0);
            }
        });
    result
}
