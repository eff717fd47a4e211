// ============================================================================
// RASTER MODULE — coverage accumulation for brush stamps and gradients
// ============================================================================
//
// Architecture:
//   mod.rs       — StrokeTarget / Rasterizer traits, coverage buffer, stamp
//                  falloff, draw-state cache
//   software.rs  — direct per-stamp writes into one coverage buffer
//   batched.rs   — fixed-size stamp batches rendered between two buffer
//                  slots (the hardware-style backend)
//   bbox.rs      — capability-only target that just grows a bounding box
//
// Every backend produces the same coverage for the same calls; events only
// ever talk to the traits.
// ============================================================================

pub mod bbox;
pub mod batched;
pub mod software;

pub use bbox::BoundingBoxRasterizer;
pub use batched::{BatchedRasterizer, BufferSlot};
pub use software::SoftwareRasterizer;

use crate::brush::BrushTipMover;
use crate::events::EventId;
use crate::geometry::{AffineTransform, Rect, Vec2};

/// Soft stamps smaller than this are drawn at this radius with reduced alpha.
pub const MIN_SOFT_RADIUS: f64 = 1.0;
/// Hard stamps smaller than this are drawn at this radius with reduced alpha.
pub const MIN_HARD_RADIUS: f64 = 0.5;

/// Default number of stamps per batch for [`BatchedRasterizer`].
pub const DEFAULT_CIRCLE_BATCH_SIZE: usize = 16;

// ============================================================================
// TRAITS
// ============================================================================

/// Anything an event can draw into: real coverage buffers and the
/// bounding-box role alike.
pub trait StrokeTarget {
    /// Start a run of stamps with the given edge style and tip texture.
    fn begin_circles(&mut self, soft: bool, texture_id: u32);

    /// Place one stamp.  `rotation` only matters for textured tips.
    fn fill_circle(&mut self, x: f64, y: f64, radius: f64, flow_alpha: f64, rotation: f64);

    /// Make every queued stamp visible in the target.
    fn flush_circles(&mut self);

    /// Reset the region touched since the last clear and drop the cached
    /// draw state.
    fn clear_dirty(&mut self);

    /// Check out the cached draw state for `key`.
    ///
    /// Returns `None` when nothing is cached or the cached key differs; in
    /// that case the dirty region has already been cleared and the caller
    /// must redraw from the start.  The state is removed from the cache
    /// either way and should be handed back with
    /// [`StrokeTarget::store_draw_event_state`].
    fn take_draw_event_state(&mut self, key: &DrawStateKey) -> Option<DrawEventState>;

    fn store_draw_event_state(&mut self, key: DrawStateKey, state: DrawEventState);

    /// Overwrite coverage inside the clip with a linear ramp: 1 at `p0`,
    /// 0 at `p1` and beyond.
    fn linear_gradient(&mut self, p0: Vec2, p1: Vec2);

    /// Restrict writes (and bounding boxes) to `clip`.
    fn set_clip(&mut self, clip: Rect);

    fn clip(&self) -> Rect;
}

/// A target that owns a coverage buffer that can be read back.
pub trait Rasterizer: StrokeTarget {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Zero the whole buffer and drop the cached draw state.
    fn clear(&mut self);

    /// Coverage of the pixel containing `coords` (0.0 outside the buffer).
    fn get_pixel(&mut self, coords: Vec2) -> f32;

    /// Flush pending stamps and expose the coverage buffer.
    fn coverage(&mut self) -> &CoverageBuffer;

    /// Pixel-aligned region touched since the last clear.
    fn dirty_rect(&self) -> Rect;
}

/// Which rasterizer implementation backs a picture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RasterizerBackend {
    #[default]
    Software,
    Batched,
}

impl RasterizerBackend {
    pub fn name(&self) -> &'static str {
        match self {
            RasterizerBackend::Software => "software",
            RasterizerBackend::Batched => "batched",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "software" => Some(RasterizerBackend::Software),
            "batched" | "hardware" => Some(RasterizerBackend::Batched),
            _ => None,
        }
    }
}

/// Build a rasterizer for `backend`.  Never fails: both backends are plain
/// memory buffers.
pub fn create_rasterizer(
    backend: RasterizerBackend,
    width: u32,
    height: u32,
    batch_size: usize,
) -> Box<dyn Rasterizer> {
    match backend {
        RasterizerBackend::Software => Box::new(SoftwareRasterizer::new(width, height)),
        RasterizerBackend::Batched => Box::new(BatchedRasterizer::new(width, height, batch_size)),
    }
}

// ============================================================================
// DRAW-STATE CACHE
// ============================================================================

/// Identity of a cached draw state.  Valid only while every field matches.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawStateKey {
    pub event: EventId,
    pub event_generation: u64,
    pub transform: AffineTransform,
}

impl DrawStateKey {
    pub fn new(event: EventId, event_generation: u64, transform: &AffineTransform) -> Self {
        Self { event, event_generation, transform: *transform }
    }

    /// Whether a state cached under `cached` may be resumed under `self`.
    pub fn matches(&self, cached: &DrawStateKey) -> bool {
        self == cached
    }
}

/// How far an event has been drawn into a target.
#[derive(Clone, Debug)]
pub enum DrawEventState {
    Stroke { coords_ind: usize, mover: BrushTipMover },
    Scatter { coords_ind: usize },
    Gradient { coords0: Vec2, coords1: Vec2 },
}

/// Single-entry cache shared by all targets.  A target only ever holds the
/// state of the event it drew last.
#[derive(Clone, Debug, Default)]
pub struct DrawStateCache {
    entry: Option<(DrawStateKey, DrawEventState)>,
}

impl DrawStateCache {
    pub fn take(&mut self, key: &DrawStateKey) -> Option<DrawEventState> {
        match self.entry.take() {
            Some((cached, state)) if key.matches(&cached) => Some(state),
            _ => None,
        }
    }

    pub fn store(&mut self, key: DrawStateKey, state: DrawEventState) {
        self.entry = Some((key, state));
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }

    pub fn is_empty(&self) -> bool {
        self.entry.is_none()
    }
}

// ============================================================================
// COVERAGE BUFFER
// ============================================================================

/// Scalar 0.0–1.0 coverage per pixel, row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct CoverageBuffer {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl CoverageBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        assert!(width > 0 && height > 0, "coverage buffer must not be empty");
        Self {
            width,
            height,
            data: vec![0.0; (width as usize) * (height as usize)],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.data[self.index(x, y)]
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    pub fn row(&self, y: u32) -> &[f32] {
        let start = y as usize * self.width as usize;
        &self.data[start..start + self.width as usize]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn clear(&mut self) {
        self.data.fill(0.0);
    }

    /// Zero every pixel inside `rect` (rounded out, clamped to the buffer).
    pub fn clear_rect(&mut self, rect: &Rect) {
        let Some((x0, x1, y0, y1)) = rect.pixel_span(self.width, self.height) else { return };
        for y in y0..y1 {
            let start = self.index(x0, y);
            let end = self.index(x1 - 1, y) + 1;
            self.data[start..end].fill(0.0);
        }
    }

    /// Copy `rect` from `src`, which must have the same dimensions.
    pub fn copy_rect_from(&mut self, src: &CoverageBuffer, rect: &Rect) {
        debug_assert_eq!((self.width, self.height), (src.width, src.height));
        let Some((x0, x1, y0, y1)) = rect.pixel_span(self.width, self.height) else { return };
        for y in y0..y1 {
            let start = self.index(x0, y);
            let end = self.index(x1 - 1, y) + 1;
            self.data[start..end].copy_from_slice(&src.data[start..end]);
        }
    }

    /// Overwrite a run of pixels starting at flat index `start`.
    pub(crate) fn write_row_span(&mut self, start: usize, values: &[f32]) {
        self.data[start..start + values.len()].copy_from_slice(values);
    }

    /// Accumulate one stamp inside `clip`.  Returns the touched pixel rect.
    pub fn stamp(&mut self, stamp: &Stamp, soft: bool, clip: &Rect) -> Option<Rect> {
        let region = stamp.bounds().intersection(clip);
        let (x0, x1, y0, y1) = region.pixel_span(self.width, self.height)?;
        for y in y0..y1 {
            for x in x0..x1 {
                let idx = self.index(x, y);
                self.data[idx] = accumulate(self.data[idx], stamp.coverage_at(x, y, soft));
            }
        }
        Some(Rect::new(x0 as f64, x1 as f64, y0 as f64, y1 as f64))
    }

    /// Write a linear ramp inside `clip`.  Returns the written pixel rect.
    pub fn gradient(&mut self, p0: Vec2, p1: Vec2, clip: &Rect) -> Option<Rect> {
        let (x0, x1, y0, y1) = clip.pixel_span(self.width, self.height)?;
        let axis = p1 - p0;
        let len_sq = axis.dot(axis);
        for y in y0..y1 {
            for x in x0..x1 {
                let idx = self.index(x, y);
                self.data[idx] = if len_sq == 0.0 {
                    0.0
                } else {
                    let p = Vec2::new(x as f64 + 0.5, y as f64 + 0.5);
                    let t = (p - p0).dot(axis) / len_sq;
                    (1.0 - t.clamp(0.0, 1.0)) as f32
                };
            }
        }
        Some(Rect::new(x0 as f64, x1 as f64, y0 as f64, y1 as f64))
    }
}

// ============================================================================
// STAMPS
// ============================================================================

/// One circle with its minimum-radius adjustment already applied.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Stamp {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    pub alpha: f64,
}

impl Stamp {
    /// Stamps below the minimum radius are drawn at the minimum, with alpha
    /// scaled by the area ratio `(radius / min)^2`.
    pub fn new(x: f64, y: f64, radius: f64, alpha: f64, soft: bool) -> Self {
        let min = if soft { MIN_SOFT_RADIUS } else { MIN_HARD_RADIUS };
        if radius < min {
            let ratio = radius.max(0.0) / min;
            Self { x, y, radius: min, alpha: alpha * ratio * ratio }
        } else {
            Self { x, y, radius, alpha }
        }
    }

    /// Region that can receive non-zero coverage (1 px antialiasing ring).
    pub fn bounds(&self) -> Rect {
        let r = self.radius + 1.0;
        Rect::new(self.x - r, self.x + r, self.y - r, self.y + r)
    }

    /// Coverage contribution at the centre of pixel `(px, py)`.
    #[inline]
    pub fn coverage_at(&self, px: u32, py: u32, soft: bool) -> f32 {
        let dx = px as f64 + 0.5 - self.x;
        let dy = py as f64 + 0.5 - self.y;
        let dist = (dx * dx + dy * dy).sqrt();
        let falloff = if soft {
            (1.0 - dist / self.radius).max(0.0)
        } else {
            ((self.radius + 1.0 - dist) * 0.5).clamp(0.0, 1.0)
        };
        (falloff * self.alpha) as f32
    }
}

/// "Over" accumulation of a monochrome coverage value.
#[inline]
pub fn accumulate(dst: f32, src: f32) -> f32 {
    dst + src * (1.0 - dst)
}
