use super::{
    CoverageBuffer, DrawEventState, DrawStateCache, DrawStateKey, Rasterizer, Stamp, StrokeTarget,
};
use crate::geometry::{Rect, Vec2};

/// Rasterizer that writes every stamp straight into one coverage buffer.
pub struct SoftwareRasterizer {
    buffer: CoverageBuffer,
    clip: Rect,
    dirty: Rect,
    soft: bool,
    texture_id: u32,
    draw_state: DrawStateCache,
}

impl SoftwareRasterizer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            buffer: CoverageBuffer::new(width, height),
            clip: Rect::from_size(width, height),
            dirty: Rect::empty(),
            soft: true,
            texture_id: 0,
            draw_state: DrawStateCache::default(),
        }
    }
}

impl StrokeTarget for SoftwareRasterizer {
    fn begin_circles(&mut self, soft: bool, texture_id: u32) {
        self.soft = soft;
        if texture_id != 0 && texture_id != self.texture_id {
            crate::log_warn!(
                "SoftwareRasterizer: tip texture {} is not loaded, drawing circles",
                texture_id
            );
        }
        self.texture_id = texture_id;
    }

    fn fill_circle(&mut self, x: f64, y: f64, radius: f64, flow_alpha: f64, _rotation: f64) {
        let stamp = Stamp::new(x, y, radius, flow_alpha, self.soft);
        if let Some(touched) = self.buffer.stamp(&stamp, self.soft, &self.clip) {
            self.dirty.union_rect(&touched);
        }
    }

    fn flush_circles(&mut self) {}

    fn clear_dirty(&mut self) {
        self.buffer.clear_rect(&self.dirty);
        self.dirty = Rect::empty();
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

    fn linear_gradient(&mut self, p0: Vec2, p1: Vec2) {
        if let Some(written) = self.buffer.gradient(p0, p1, &self.clip) {
            self.dirty.union_rect(&written);
        }
    }

    fn set_clip(&mut self, clip: Rect) {
        if clip != self.clip {
            self.draw_state.invalidate();
        }
        self.clip = clip;
    }

    fn clip(&self) -> Rect {
        self.clip
    }
}

impl Rasterizer for SoftwareRasterizer {
    fn width(&self) -> u32 {
        self.buffer.width()
    }

    fn height(&self) -> u32 {
        self.buffer.height()
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.dirty = Rect::empty();
        self.draw_state.invalidate();
    }

    fn get_pixel(&mut self, coords: Vec2) -> f32 {
        if coords.x < 0.0 || coords.y < 0.0 {
            return 0.0;
        }
        let (x, y) = (coords.x.floor() as u32, coords.y.floor() as u32);
        if x >= self.buffer.width() || y >= self.buffer.height() {
            return 0.0;
        }
        self.buffer.get(x, y)
    }

    fn coverage(&mut self) -> &CoverageBuffer {
        &self.buffer
    }

    fn dirty_rect(&self) -> Rect {
        self.dirty
    }
}
