use super::{EventHeader, EventParseError, Fields};
use crate::compositor::BlendMode;
use crate::geometry::{AffineTransform, Rect, Vec2};
use crate::raster::{BoundingBoxRasterizer, DrawEventState, DrawStateKey, StrokeTarget};

/// Linear gradient between two points, full opacity at `coords0`.
#[derive(Clone, Debug)]
pub struct GradientEvent {
    pub header: EventHeader,
    pub color: [u8; 3],
    pub opacity: f64,
    pub mode: BlendMode,
    pub target_layer_id: u32,
    pub coords0: Vec2,
    pub coords1: Vec2,
    generation: u64,
    bbox: Option<BoundingBoxRasterizer>,
}

impl GradientEvent {
    pub fn new(
        header: EventHeader,
        color: [u8; 3],
        opacity: f64,
        mode: BlendMode,
        target_layer_id: u32,
        coords0: Vec2,
        coords1: Vec2,
    ) -> Self {
        Self {
            header,
            color,
            opacity,
            mode,
            target_layer_id,
            coords0,
            coords1,
            generation: 0,
            bbox: None,
        }
    }

    pub(super) fn parse(header: EventHeader, mut fields: Fields<'_>) -> Result<Self, EventParseError> {
        let color = fields.rgb()?;
        let opacity = fields.f64("opacity")?;
        let mode = fields.blend_mode()?;
        let target_layer_id = fields.u32("layer")?;
        let coords0 = Vec2::new(fields.f64("x0")?, fields.f64("y0")?);
        let coords1 = Vec2::new(fields.f64("x1")?, fields.f64("y1")?);
        fields.finish()?;
        Ok(Self::new(header, color, opacity, mode, target_layer_id, coords0, coords1))
    }

    pub fn serialize(&self, scale: f64) -> String {
        format!(
            "{} {} {} {} {} {} {} {} {} {} {}",
            self.header.serialize("gradient"),
            self.color[0],
            self.color[1],
            self.color[2],
            self.opacity,
            self.mode.to_u8(),
            self.target_layer_id,
            self.coords0.x * scale,
            self.coords0.y * scale,
            self.coords1.x * scale,
            self.coords1.y * scale
        )
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Move the end point while the gradient is being dragged.
    pub fn set_end(&mut self, coords1: Vec2) {
        self.coords1 = coords1;
    }

    pub fn scale(&mut self, factor: f64) {
        assert!(factor > 0.0, "scale factor must be positive");
        self.coords0 = self.coords0 * factor;
        self.coords1 = self.coords1 * factor;
        self.generation += 1;
    }

    pub fn translate(&mut self, offset: Vec2) {
        self.coords0 = self.coords0 + offset;
        self.coords1 = self.coords1 + offset;
        self.generation += 1;
    }

    /// Fill the target's clip with the gradient unless the same endpoints
    /// are already drawn there.
    pub fn draw_to<T: StrokeTarget + ?Sized>(&self, target: &mut T, transform: &AffineTransform) {
        let key = DrawStateKey::new(self.header.id, self.generation, transform);
        let coords0 = transform.apply(self.coords0);
        let coords1 = transform.apply(self.coords1);
        match target.take_draw_event_state(&key) {
            Some(DrawEventState::Gradient { coords0: c0, coords1: c1 }) if c0 == coords0 && c1 == coords1 => {}
            Some(_) => {
                target.clear_dirty();
                target.linear_gradient(coords0, coords1);
            }
            None => target.linear_gradient(coords0, coords1),
        }
        target.store_draw_event_state(key, DrawEventState::Gradient { coords0, coords1 });
    }

    /// A gradient fills its whole clip.
    pub fn bounding_box(&mut self, clip: &Rect, transform: &AffineTransform) -> Rect {
        let mut bbox = self.bbox.take().unwrap_or_else(|| BoundingBoxRasterizer::new(*clip));
        bbox.set_clip(*clip);
        self.draw_to(&mut bbox, transform);
        let rect = bbox.bounding_box();
        self.bbox = Some(bbox);
        rect
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{Rasterizer, SoftwareRasterizer};

    /// Counts gradient fills and remembers the cached state.
    #[derive(Default)]
    struct CountingTarget {
        fills: usize,
        state: Option<(DrawStateKey, DrawEventState)>,
    }

    impl StrokeTarget for CountingTarget {
        fn begin_circles(&mut self, _soft: bool, _texture_id: u32) {}
        fn fill_circle(&mut self, _x: f64, _y: f64, _r: f64, _a: f64, _rot: f64) {}
        fn flush_circles(&mut self) {}
        fn clear_dirty(&mut self) {
            self.state = None;
        }
        fn take_draw_event_state(&mut self, key: &DrawStateKey) -> Option<DrawEventState> {
            match self.state.take() {
                Some((k, s)) if key.matches(&k) => Some(s),
                _ => None,
            }
        }
        fn store_draw_event_state(&mut self, key: DrawStateKey, state: DrawEventState) {
            self.state = Some((key, state));
        }
        fn linear_gradient(&mut self, _p0: Vec2, _p1: Vec2) {
            self.fills += 1;
        }
        fn set_clip(&mut self, _clip: Rect) {}
        fn clip(&self) -> Rect {
            Rect::empty()
        }
    }

    fn gradient() -> GradientEvent {
        GradientEvent::new(
            EventHeader::new(2, 1),
            [255, 0, 0],
            1.0,
            BlendMode::Normal,
            0,
            Vec2::new(0.0, 0.0),
            Vec2::new(10.0, 0.0),
        )
    }

    #[test]
    fn unchanged_gradient_is_drawn_once() {
        let mut e = gradient();
        let t = AffineTransform::identity();
        let mut target = CountingTarget::default();
        e.draw_to(&mut target, &t);
        e.draw_to(&mut target, &t);
        assert_eq!(target.fills, 1);

        e.set_end(Vec2::new(20.0, 0.0));
        e.draw_to(&mut target, &t);
        assert_eq!(target.fills, 2);

        e.translate(Vec2::new(1.0, 1.0));
        e.draw_to(&mut target, &t);
        assert_eq!(target.fills, 3);
    }

    #[test]
    fn redrawing_gives_identical_coverage() {
        let e = gradient();
        let t = AffineTransform::identity();
        let mut r = SoftwareRasterizer::new(16, 4);
        e.draw_to(&mut r, &t);
        let first = r.coverage().clone();
        e.draw_to(&mut r, &t);
        assert_eq!(&first, r.coverage());
        assert!(first.get(0, 0) > first.get(8, 0));
        assert_eq!(first.get(12, 0), 0.0);
    }

    #[test]
    fn degenerate_gradient_clears_region() {
        let mut e = gradient();
        e.set_end(e.coords0);
        let mut r = SoftwareRasterizer::new(8, 8);
        e.draw_to(&mut r, &AffineTransform::identity());
        assert!(r.coverage().as_slice().iter().all(|&c| c == 0.0));
    }

    #[test]
    fn bounding_box_is_the_clip() {
        let mut e = gradient();
        let clip = Rect::new(0.0, 64.0, 0.0, 32.0);
        assert_eq!(e.bounding_box(&clip, &AffineTransform::identity()), clip);
    }
}
