// ============================================================================
// BATCHED RASTERIZER — hardware-style stamp batching with ping-pong buffers
// ============================================================================
//
// Mirrors how a shader backend draws strokes: stamps are queued into a
// fixed-size batch (the uniform block), and each flush renders the whole
// batch in one pass that READS the source slot and WRITES the destination
// slot, so new stamps blend against already-rasterized coverage without
// read-after-write hazards.  After the pass the slots swap and the changed
// rectangle is copied back so both slots agree again.
//
// Stamps inside a batch are applied per pixel in queue order, which makes
// the result bit-identical to SoftwareRasterizer.
// ============================================================================

use super::{
    CoverageBuffer, DrawEventState, DrawStateCache, DrawStateKey, Rasterizer, Stamp, StrokeTarget,
    accumulate,
};
use crate::geometry::{Rect, Vec2};

/// One of the two coverage buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferSlot {
    A,
    B,
}

impl BufferSlot {
    pub fn other(self) -> BufferSlot {
        match self {
            BufferSlot::A => BufferSlot::B,
            BufferSlot::B => BufferSlot::A,
        }
    }
}

pub struct BatchedRasterizer {
    slot_a: CoverageBuffer,
    slot_b: CoverageBuffer,
    /// Slot holding the latest coverage.
    current: BufferSlot,
    pending: Vec<Stamp>,
    batch_size: usize,
    clip: Rect,
    dirty: Rect,
    soft: bool,
    texture_id: u32,
    draw_state: DrawStateCache,
    /// Number of render passes issued so far.
    passes: u64,
}

impl BatchedRasterizer {
    pub fn new(width: u32, height: u32, batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch size must be at least 1");
        Self {
            slot_a: CoverageBuffer::new(width, height),
            slot_b: CoverageBuffer::new(width, height),
            current: BufferSlot::A,
            pending: Vec::with_capacity(batch_size),
            batch_size,
            clip: Rect::from_size(width, height),
            dirty: Rect::empty(),
            soft: true,
            texture_id: 0,
            draw_state: DrawStateCache::default(),
            passes: 0,
        }
    }

    pub fn current_slot(&self) -> BufferSlot {
        self.current
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn pending_stamps(&self) -> usize {
        self.pending.len()
    }

    pub fn passes(&self) -> u64 {
        self.passes
    }

    fn slot(&self, slot: BufferSlot) -> &CoverageBuffer {
        match slot {
            BufferSlot::A => &self.slot_a,
            BufferSlot::B => &self.slot_b,
        }
    }

    /// (source, destination) for the next pass.
    fn pass_buffers(&mut self) -> (&CoverageBuffer, &mut CoverageBuffer) {
        match self.current {
            BufferSlot::A => (&self.slot_a, &mut self.slot_b),
            BufferSlot::B => (&self.slot_b, &mut self.slot_a),
        }
    }

    /// Render the queued batch in one pass and swap slots.
    fn render_batch(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let mut region = Rect::empty();
        for stamp in &self.pending {
            region.union_rect(&stamp.bounds());
        }
        region.intersect_rect(&self.clip);

        let stamps = std::mem::take(&mut self.pending);
        let soft = self.soft;
        let (src, dst) = self.pass_buffers();
        let Some((x0, x1, y0, y1)) = region.pixel_span(src.width(), src.height()) else {
            self.pending = stamps;
            self.pending.clear();
            return;
        };
        let written = Rect::new(x0 as f64, x1 as f64, y0 as f64, y1 as f64);

        // Gather per pixel from the source slot, write to the destination.
        let width = src.width() as usize;
        let mut rows: Vec<f32> = Vec::with_capacity((x1 - x0) as usize);
        for y in y0..y1 {
            rows.clear();
            for x in x0..x1 {
                let mut value = src.get(x, y);
                for stamp in &stamps {
                    value = accumulate(value, stamp.coverage_at(x, y, soft));
                }
                rows.push(value);
            }
            dst.write_row_span(y as usize * width + x0 as usize, &rows);
        }

        self.current = self.current.other();
        self.passes += 1;
        // Bring the now-stale slot up to date for the next pass.
        let (fresh, stale) = match self.current {
            BufferSlot::A => (&self.slot_a, &mut self.slot_b),
            BufferSlot::B => (&self.slot_b, &mut self.slot_a),
        };
        stale.copy_rect_from(fresh, &written);

        self.dirty.union_rect(&written);
        self.pending = stamps;
        self.pending.clear();
    }
}

impl StrokeTarget for BatchedRasterizer {
    fn begin_circles(&mut self, soft: bool, texture_id: u32) {
        // Edge style is a per-pass uniform.
        if soft != self.soft {
            self.render_batch();
        }
        self.soft = soft;
        if texture_id != 0 && texture_id != self.texture_id {
            crate::log_warn!(
                "BatchedRasterizer: tip texture {} is not loaded, drawing circles",
                texture_id
            );
        }
        self.texture_id = texture_id;
    }

    fn fill_circle(&mut self, x: f64, y: f64, radius: f64, flow_alpha: f64, _rotation: f64) {
        let stamp = Stamp::new(x, y, radius, flow_alpha, self.soft);
        if !stamp.bounds().intersects_rect(&self.clip) {
            return;
        }
        self.pending.push(stamp);
        if self.pending.len() >= self.batch_size {
            self.render_batch();
        }
    }

    fn flush_circles(&mut self) {
        self.render_batch();
    }

    fn clear_dirty(&mut self) {
        self.pending.clear();
        let dirty = self.dirty;
        self.slot_a.clear_rect(&dirty);
        self.slot_b.clear_rect(&dirty);
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
        self.render_batch();
        let clip = self.clip;
        if let Some(written) = self.slot_a.gradient(p0, p1, &clip) {
            self.slot_b.copy_rect_from(&self.slot_a, &written);
            self.dirty.union_rect(&written);
        }
    }

    fn set_clip(&mut self, clip: Rect) {
        if clip != self.clip {
            self.render_batch();
            self.draw_state.invalidate();
        }
        self.clip = clip;
    }

    fn clip(&self) -> Rect {
        self.clip
    }
}

impl Rasterizer for BatchedRasterizer {
    fn width(&self) -> u32 {
        self.slot_a.width()
    }

    fn height(&self) -> u32 {
        self.slot_a.height()
    }

    fn clear(&mut self) {
        self.pending.clear();
        self.slot_a.clear();
        self.slot_b.clear();
        self.dirty = Rect::empty();
        self.draw_state.invalidate();
    }

    fn get_pixel(&mut self, coords: Vec2) -> f32 {
        self.render_batch();
        if coords.x < 0.0 || coords.y < 0.0 {
            return 0.0;
        }
        let (x, y) = (coords.x.floor() as u32, coords.y.floor() as u32);
        let buffer = self.slot(self.current);
        if x >= buffer.width() || y >= buffer.height() {
            return 0.0;
        }
        buffer.get(x, y)
    }

    fn coverage(&mut self) -> &CoverageBuffer {
        self.render_batch();
        self.slot(self.current)
    }

    fn dirty_rect(&self) -> Rect {
        self.dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::SoftwareRasterizer;

    fn scribble<T: StrokeTarget + ?Sized>(target: &mut T) {
        target.begin_circles(true, 0);
        for i in 0..40 {
            let f = i as f64;
            target.fill_circle(5.0 + f * 1.3, 20.0 + (f * 0.4).sin() * 8.0, 3.0 + f * 0.1, 0.2, 0.0);
        }
        target.begin_circles(false, 0);
        for i in 0..7 {
            target.fill_circle(10.0 + i as f64 * 6.0, 10.0, 0.3 + i as f64, 0.7, 0.0);
        }
        target.flush_circles();
    }

    #[test]
    fn matches_software_output_exactly() {
        let mut software = SoftwareRasterizer::new(64, 40);
        let mut batched = BatchedRasterizer::new(64, 40, 6);
        scribble(&mut software);
        scribble(&mut batched);
        assert_eq!(software.coverage(), batched.coverage());
        // Batches dirty whole pass rectangles, so the region can only grow.
        assert!(batched.dirty_rect().contains_rect(&software.dirty_rect()));
    }

    #[test]
    fn full_batches_flush_automatically() {
        let mut r = BatchedRasterizer::new(32, 32, 4);
        r.begin_circles(true, 0);
        for i in 0..9 {
            r.fill_circle(4.0 + i as f64 * 2.0, 8.0, 2.0, 0.5, 0.0);
        }
        assert_eq!(r.passes(), 2);
        assert_eq!(r.pending_stamps(), 1);
        assert_eq!(r.current_slot(), BufferSlot::A);
        r.flush_circles();
        assert_eq!(r.passes(), 3);
        assert_eq!(r.current_slot(), BufferSlot::B);
    }

    #[test]
    fn reading_coverage_flushes_pending_stamps() {
        let mut r = BatchedRasterizer::new(16, 16, 32);
        r.begin_circles(true, 0);
        r.fill_circle(8.0, 8.0, 4.0, 1.0, 0.0);
        assert_eq!(r.pending_stamps(), 1);
        assert!(r.get_pixel(Vec2::new(8.0, 8.0)) > 0.0);
        assert_eq!(r.pending_stamps(), 0);
    }

    #[test]
    fn clear_dirty_resets_both_slots() {
        let mut r = BatchedRasterizer::new(16, 16, 2);
        r.begin_circles(true, 0);
        r.fill_circle(8.0, 8.0, 4.0, 1.0, 0.0);
        r.fill_circle(9.0, 8.0, 4.0, 1.0, 0.0);
        r.fill_circle(10.0, 8.0, 4.0, 1.0, 0.0);
        r.flush_circles();
        r.clear_dirty();
        assert!(r.slot(BufferSlot::A).as_slice().iter().all(|&c| c == 0.0));
        assert!(r.slot(BufferSlot::B).as_slice().iter().all(|&c| c == 0.0));
    }
}
