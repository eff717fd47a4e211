// ============================================================================
// GEOMETRY — 2D vectors, scale+translate transforms, rectangles
// ============================================================================

use std::ops::{Add, Mul, Sub};
use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// VEC2
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn length(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn distance(&self, other: Vec2) -> f64 {
        (other - *self).length()
    }

    pub fn dot(&self, other: Vec2) -> f64 {
        self.x * other.x + self.y * other.y
    }

    /// Unit vector in the same direction.  The zero vector stays zero.
    pub fn normalized(&self) -> Vec2 {
        let len = self.length();
        if len == 0.0 {
            return Vec2::ZERO;
        }
        Vec2::new(self.x / len, self.y / len)
    }

    /// Angle in radians measured from the positive x axis.
    pub fn angle(&self) -> f64 {
        self.y.atan2(self.x)
    }

    /// dy/dx.  Infinite for vertical vectors.
    pub fn slope(&self) -> f64 {
        self.y / self.x
    }

    pub fn lerp(&self, other: Vec2, t: f64) -> Vec2 {
        Vec2::new(
            self.x + (other.x - self.x) * t,
            self.y + (other.y - self.y) * t,
        )
    }

    /// Closest point to `self` on the infinite line through `a` and `b`.
    pub fn project_to_line(&self, a: Vec2, b: Vec2) -> Vec2 {
        let ab = b - a;
        let len_sq = ab.dot(ab);
        if len_sq == 0.0 {
            return a;
        }
        let t = (*self - a).dot(ab) / len_sq;
        a + ab * t
    }

    /// Closest point to `self` on the circle around `center`.
    pub fn project_to_circle(&self, center: Vec2, radius: f64) -> Vec2 {
        let dir = (*self - center).normalized();
        if dir == Vec2::ZERO {
            return Vec2::new(center.x + radius, center.y);
        }
        center + dir * radius
    }
}

impl Add for Vec2 {
    type Output = Vec2;
    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2 {
    type Output = Vec2;
    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Vec2 {
    type Output = Vec2;
    fn mul(self, rhs: f64) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

// ============================================================================
// AFFINE TRANSFORM (uniform scale + translate)
// ============================================================================

/// Source of transform generations.  Shared by every transform in the
/// process so two transforms never carry the same tag.
static NEXT_TRANSFORM_GENERATION: AtomicU64 = AtomicU64::new(1);

fn next_generation() -> u64 {
    NEXT_TRANSFORM_GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// Maps event coordinates to rasterizer pixels: `p * scale + translate`.
///
/// `generation` is an identity tag.  Every constructor and every mutation
/// hands out a fresh value, so a draw-state cache keyed to a transform is
/// invalidated even if the numbers happen to repeat.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AffineTransform {
    scale: f64,
    translate: Vec2,
    generation: u64,
}

impl AffineTransform {
    pub fn new(scale: f64, translate: Vec2) -> Self {
        assert!(scale > 0.0, "AffineTransform scale must be positive, got {}", scale);
        Self {
            scale,
            translate,
            generation: next_generation(),
        }
    }

    pub fn identity() -> Self {
        Self::new(1.0, Vec2::ZERO)
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn translate(&self) -> Vec2 {
        self.translate
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn set_scale(&mut self, scale: f64) {
        assert!(scale > 0.0, "AffineTransform scale must be positive, got {}", scale);
        self.scale = scale;
        self.generation = next_generation();
    }

    pub fn set_translate(&mut self, translate: Vec2) {
        self.translate = translate;
        self.generation = next_generation();
    }

    pub fn transform_x(&self, x: f64) -> f64 {
        x * self.scale + self.translate.x
    }

    pub fn transform_y(&self, y: f64) -> f64 {
        y * self.scale + self.translate.y
    }

    pub fn apply(&self, p: Vec2) -> Vec2 {
        Vec2::new(self.transform_x(p.x), self.transform_y(p.y))
    }

    /// Inverse mapping from pixels back to event coordinates.
    pub fn inverse_apply(&self, p: Vec2) -> Vec2 {
        Vec2::new(
            (p.x - self.translate.x) / self.scale,
            (p.y - self.translate.y) / self.scale,
        )
    }

    /// Map an event-space rectangle to pixel space.
    pub fn apply_rect(&self, rect: &Rect) -> Rect {
        Rect::new(
            self.transform_x(rect.left),
            self.transform_x(rect.right),
            self.transform_y(rect.top),
            self.transform_y(rect.bottom),
        )
    }
}

// ============================================================================
// RECT
// ============================================================================

/// Axis-aligned rectangle.  Empty when `left >= right` or `top >= bottom`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,
}

impl Default for Rect {
    fn default() -> Self {
        Self::empty()
    }
}

impl Rect {
    pub fn new(left: f64, right: f64, top: f64, bottom: f64) -> Self {
        Self { left, right, top, bottom }
    }

    pub fn empty() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }

    /// Rectangle covering a `width`×`height` pixel buffer.
    pub fn from_size(width: u32, height: u32) -> Self {
        Self::new(0.0, width as f64, 0.0, height as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.left >= self.right || self.top >= self.bottom
    }

    pub fn width(&self) -> f64 {
        (self.right - self.left).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.bottom - self.top).max(0.0)
    }

    pub fn area(&self) -> f64 {
        if self.is_empty() { 0.0 } else { self.width() * self.height() }
    }

    pub fn set(&mut self, left: f64, right: f64, top: f64, bottom: f64) {
        *self = Self::new(left, right, top, bottom);
    }

    /// Grow to contain `other`.  Empty rectangles contribute nothing.
    pub fn union_rect(&mut self, other: &Rect) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            *self = *other;
            return;
        }
        self.left = self.left.min(other.left);
        self.right = self.right.max(other.right);
        self.top = self.top.min(other.top);
        self.bottom = self.bottom.max(other.bottom);
    }

    /// Grow to contain the bounding square of a circle.
    pub fn union_circle(&mut self, x: f64, y: f64, radius: f64) {
        self.union_rect(&Rect::new(x - radius, x + radius, y - radius, y + radius));
    }

    /// Shrink to the overlap with `other`.  Becomes empty if they don't meet.
    pub fn intersect_rect(&mut self, other: &Rect) {
        let left = self.left.max(other.left);
        let right = self.right.min(other.right);
        let top = self.top.max(other.top);
        let bottom = self.bottom.min(other.bottom);
        if left >= right || top >= bottom {
            *self = Rect::empty();
        } else {
            self.set(left, right, top, bottom);
        }
    }

    pub fn intersection(&self, other: &Rect) -> Rect {
        let mut r = *self;
        r.intersect_rect(other);
        r
    }

    pub fn intersects_rect(&self, other: &Rect) -> bool {
        !self.intersection(other).is_empty()
    }

    /// Snap outwards to the enclosing integer pixel boundaries.
    pub fn round_out(&self) -> Rect {
        if self.is_empty() {
            return Rect::empty();
        }
        Rect::new(
            self.left.floor(),
            self.right.ceil(),
            self.top.floor(),
            self.bottom.ceil(),
        )
    }

    /// Whether the rounded-out versions of both rectangles overlap.
    pub fn intersects_rounded_out(&self, other: &Rect) -> bool {
        self.round_out().intersects_rect(&other.round_out())
    }

    pub fn contains_point(&self, p: Vec2) -> bool {
        p.x >= self.left && p.x <= self.right && p.y >= self.top && p.y <= self.bottom
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        if other.is_empty() {
            return true;
        }
        other.left >= self.left
            && other.right <= self.right
            && other.top >= self.top
            && other.bottom <= self.bottom
    }

    /// Containment test on whole pixels.
    pub fn contains_rounded_out(&self, other: &Rect) -> bool {
        self.round_out().contains_rect(&other.round_out())
    }

    /// Integer pixel span `(x0, x1, y0, y1)` (exclusive ends) clamped to a
    /// `width`×`height` buffer.  `None` if nothing remains.
    pub fn pixel_span(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let r = self.round_out().intersection(&Rect::from_size(width, height));
        if r.is_empty() {
            return None;
        }
        Some((r.left as u32, r.right as u32, r.top as u32, r.bottom as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_ignores_empty_rects() {
        let mut r = Rect::new(0.0, 10.0, 0.0, 10.0);
        r.union_rect(&Rect::empty());
        assert_eq!(r, Rect::new(0.0, 10.0, 0.0, 10.0));

        let mut e = Rect::empty();
        e.union_circle(5.0, 5.0, 2.0);
        assert_eq!(e, Rect::new(3.0, 7.0, 3.0, 7.0));
    }

    #[test]
    fn intersection_of_disjoint_rects_is_empty() {
        let a = Rect::new(0.0, 10.0, 0.0, 10.0);
        let b = Rect::new(20.0, 30.0, 0.0, 10.0);
        assert!(a.intersection(&b).is_empty());
        assert!(!a.intersects_rect(&b));
        // Touching edges only
        let c = Rect::new(10.0, 20.0, 0.0, 10.0);
        assert!(!a.intersects_rect(&c));
    }

    #[test]
    fn round_out_snaps_to_enclosing_pixels() {
        let r = Rect::new(0.2, 5.5, -1.5, 3.0).round_out();
        assert_eq!(r, Rect::new(0.0, 6.0, -2.0, 3.0));
        assert!(Rect::new(0.5, 1.5, 0.5, 1.5).intersects_rounded_out(&Rect::new(1.8, 3.0, 1.8, 3.0)));
    }

    #[test]
    fn pixel_span_clamps_to_buffer() {
        let r = Rect::new(-5.0, 12.3, 2.5, 100.0);
        assert_eq!(r.pixel_span(10, 10), Some((0, 10, 2, 10)));
        assert_eq!(Rect::new(20.0, 30.0, 0.0, 5.0).pixel_span(10, 10), None);
    }

    #[test]
    fn transform_generation_changes_on_mutation() {
        let mut t = AffineTransform::new(2.0, Vec2::new(1.0, 1.0));
        let g = t.generation();
        t.set_scale(2.0);
        assert_ne!(t.generation(), g);
        let other = AffineTransform::new(2.0, Vec2::new(1.0, 1.0));
        assert_ne!(other, AffineTransform::new(2.0, Vec2::new(1.0, 1.0)));
        assert_eq!(t.apply(Vec2::new(3.0, 4.0)), Vec2::new(7.0, 9.0));
        assert_eq!(t.inverse_apply(Vec2::new(7.0, 9.0)), Vec2::new(3.0, 4.0));
    }

    #[test]
    #[should_panic]
    fn transform_rejects_zero_scale() {
        let _ = AffineTransform::new(0.0, Vec2::ZERO);
    }

    #[test]
    fn projections() {
        let p = Vec2::new(3.0, 4.0);
        assert_eq!(p.project_to_line(Vec2::ZERO, Vec2::new(10.0, 0.0)), Vec2::new(3.0, 0.0));
        let c = p.project_to_circle(Vec2::ZERO, 10.0);
        assert!((c.x - 6.0).abs() < 1e-12 && (c.y - 8.0).abs() < 1e-12);
        assert_eq!(Vec2::new(2.0, 1.0).slope(), 0.5);
    }
}
