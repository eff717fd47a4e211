use super::{DrawEventState, DrawStateCache, DrawStateKey, StrokeTarget};
use crate::geometry::{Rect, Vec2};

/// Target that records where an event would draw without drawing it.
///
/// Flow and rotation are ignored; every stamp grows the box by a circle of
/// `max(radius, 1) + 1` so antialiasing and minimum-radius stamps are
/// included.  Everything is limited to the clip.
#[derive(Clone, Debug)]
pub struct BoundingBoxRasterizer {
    bounding_box: Rect,
    clip: Rect,
    draw_state: DrawStateCache,
}

impl BoundingBoxRasterizer {
    pub fn new(clip: Rect) -> Self {
        Self {
            bounding_box: Rect::empty(),
            clip,
            draw_state: DrawStateCache::default(),
        }
    }

    pub fn bounding_box(&self) -> Rect {
        self.bounding_box
    }
}

impl StrokeTarget for BoundingBoxRasterizer {
    fn begin_circles(&mut self, _soft: bool, _texture_id: u32) {}

    fn fill_circle(&mut self, x: f64, y: f64, radius: f64, _flow_alpha: f64, _rotation: f64) {
        let mut circle = Rect::empty();
        circle.union_circle(x, y, radius.max(1.0) + 1.0);
        circle.intersect_rect(&self.clip);
        if !circle.is_empty() {
            self.bounding_box.union_rect(&circle);
        }
    }

    fn flush_circles(&mut self) {}

    fn clear_dirty(&mut self) {
        self.bounding_box = Rect::empty();
        self.draw_state.invalidate();
    }

    fn take_draw_event_state(&mut self, key: &DrawStateKey) -> Option<DrawEventState> {
        let state = self.draw_state.take(key);
        if state.is_none() {
            self.clear_dirty();
        }
        state
    }

    fn store_draw_event_state(&mut self, key: DrawStateKey, state: DrawEventState) {
        self.draw_state.store(key, state);
    }

    fn linear_gradient(&mut self, _p0: Vec2, _p1: Vec2) {
        let clip = self.clip;
        self.bounding_box.union_rect(&clip);
    }

    fn set_clip(&mut self, clip: Rect) {
        if clip != self.clip {
            self.bounding_box = Rect::empty();
            self.draw_state.invalidate();
        }
        self.clip = clip;
    }

    fn clip(&self) -> Rect {
        self.clip
    }
}
