use super::{EventHeader, EventParseError, Fields, round_pressure};
use crate::brush::{BrushTipMover, TipSettings};
use crate::compositor::BlendMode;
use crate::geometry::{AffineTransform, Rect, Vec2};
use crate::raster::{BoundingBoxRasterizer, DrawEventState, DrawStateKey, StrokeTarget};

/// Coordinates per sample of a brush stroke: x, y, pressure.
pub const BRUSH_STRIDE: usize = 3;
/// Coordinates per scatter sample: x, y, radius, flow, rotation.
pub const SCATTER_STRIDE: usize = 5;

// ============================================================================
// BRUSH EVENT
// ============================================================================

/// A stroke drawn through the tip mover.
#[derive(Clone, Debug)]
pub struct BrushEvent {
    pub header: EventHeader,
    pub color: [u8; 3],
    pub flow: f64,
    pub opacity: f64,
    pub radius: f64,
    pub texture_id: u32,
    pub soft: bool,
    pub mode: BlendMode,
    pub target_layer_id: u32,
    coords: Vec<f64>,
    generation: u64,
    bbox: Option<BoundingBoxRasterizer>,
}

impl BrushEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        header: EventHeader,
        color: [u8; 3],
        flow: f64,
        opacity: f64,
        radius: f64,
        texture_id: u32,
        soft: bool,
        mode: BlendMode,
        target_layer_id: u32,
    ) -> Self {
        assert!(radius > 0.0, "brush radius must be positive");
        Self {
            header,
            color,
            flow,
            opacity,
            radius,
            texture_id,
            soft,
            mode,
            target_layer_id,
            coords: Vec::new(),
            generation: 0,
            bbox: None,
        }
    }

    pub(super) fn parse(header: EventHeader, mut fields: Fields<'_>) -> Result<Self, EventParseError> {
        let color = fields.rgb()?;
        let flow = fields.f64("flow")?;
        let opacity = fields.f64("opacity")?;
        let radius = fields.f64("radius")?;
        if radius <= 0.0 {
            return Err(EventParseError::InvalidNumber { field: "radius", value: radius.to_string() });
        }
        let texture_id = fields.u32("texture")?;
        let soft = fields.bool("soft")?;
        let mode = fields.blend_mode()?;
        let target_layer_id = fields.u32("layer")?;
        let coords = fields.coords(BRUSH_STRIDE)?;
        fields.finish()?;
        let mut event = BrushEvent::new(
            header, color, flow, opacity, radius, texture_id, soft, mode, target_layer_id,
        );
        event.coords = coords;
        Ok(event)
    }

    pub fn serialize(&self, scale: f64) -> String {
        let mut out = self.header.serialize("brush");
        out.push_str(&format!(
            " {} {} {} {} {} {} {} {} {} {}",
            self.color[0],
            self.color[1],
            self.color[2],
            self.flow,
            self.opacity,
            self.radius * scale,
            self.texture_id,
            self.soft as u8,
            self.mode.to_u8(),
            self.target_layer_id
        ));
        for sample in self.coords.chunks_exact(BRUSH_STRIDE) {
            out.push_str(&format!(
                " {} {} {}",
                sample[0] * scale,
                sample[1] * scale,
                round_pressure(sample[2])
            ));
        }
        out
    }

    pub fn coords(&self) -> &[f64] {
        &self.coords
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Append one sample while the stroke is being drawn.
    pub fn push_coord_triplet(&mut self, x: f64, y: f64, pressure: f64) {
        self.coords.extend_from_slice(&[x, y, pressure]);
    }

    pub fn tip_settings(&self) -> TipSettings {
        TipSettings::for_texture(self.texture_id, self.radius, self.flow)
    }

    pub fn scale(&mut self, factor: f64) {
        assert!(factor > 0.0, "scale factor must be positive");
        for sample in self.coords.chunks_exact_mut(BRUSH_STRIDE) {
            sample[0] *= factor;
            sample[1] *= factor;
        }
        self.radius *= factor;
        self.generation += 1;
    }

    pub fn translate(&mut self, offset: Vec2) {
        for sample in self.coords.chunks_exact_mut(BRUSH_STRIDE) {
            sample[0] += offset.x;
            sample[1] += offset.y;
        }
        self.generation += 1;
    }

    /// Draw samples `[cached position, until)` into `target`.
    pub fn draw_to<T: StrokeTarget + ?Sized>(
        &self,
        target: &mut T,
        transform: &AffineTransform,
        until: Option<usize>,
    ) {
        let until = until.unwrap_or(self.coords.len());
        assert!(
            until <= self.coords.len() && until % BRUSH_STRIDE == 0,
            "draw limit {} is not a sample boundary",
            until
        );
        let key = DrawStateKey::new(self.header.id, self.generation, transform);
        let (mut coords_ind, mut mover) = match target.take_draw_event_state(&key) {
            Some(DrawEventState::Stroke { coords_ind, mover }) if coords_ind <= until => (coords_ind, mover),
            Some(_) => {
                target.clear_dirty();
                (0, BrushTipMover::default())
            }
            None => (0, BrushTipMover::default()),
        };

        if coords_ind == 0 && until > 0 {
            let c = &self.coords;
            mover.reset(transform, c[0], c[1], c[2], &self.tip_settings(), self.header.id.seed());
        }
        if coords_ind < until {
            target.begin_circles(self.soft, self.texture_id);
            while coords_ind < until {
                let c = &self.coords[coords_ind..coords_ind + BRUSH_STRIDE];
                mover.move_to(target, c[0], c[1], c[2]);
                coords_ind += BRUSH_STRIDE;
            }
            target.flush_circles();
        }
        target.store_draw_event_state(key, DrawEventState::Stroke { coords_ind, mover });
    }

    /// Region the stroke covers, grown incrementally as samples are added.
    pub fn bounding_box(&mut self, clip: &Rect, transform: &AffineTransform) -> Rect {
        let mut bbox = self.bbox.take().unwrap_or_else(|| BoundingBoxRasterizer::new(*clip));
        bbox.set_clip(*clip);
        self.draw_to(&mut bbox, transform, None);
        let rect = bbox.bounding_box();
        self.bbox = Some(bbox);
        rect
    }
}

// ============================================================================
// SCATTER EVENT
// ============================================================================

/// Independently parameterized stamps, placed as given.
#[derive(Clone, Debug)]
pub struct ScatterEvent {
    pub header: EventHeader,
    pub color: [u8; 3],
    pub opacity: f64,
    /// Nominal tip radius; every sample carries its own.
    pub radius: f64,
    pub texture_id: u32,
    pub soft: bool,
    pub mode: BlendMode,
    pub target_layer_id: u32,
    coords: Vec<f64>,
    generation: u64,
    bbox: Option<BoundingBoxRasterizer>,
}

impl ScatterEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        header: EventHeader,
        color: [u8; 3],
        opacity: f64,
        radius: f64,
        texture_id: u32,
        soft: bool,
        mode: BlendMode,
        target_layer_id: u32,
    ) -> Self {
        Self {
            header,
            color,
            opacity,
            radius,
            texture_id,
            soft,
            mode,
            target_layer_id,
            coords: Vec::new(),
            generation: 0,
            bbox: None,
        }
    }

    pub(super) fn parse(header: EventHeader, mut fields: Fields<'_>) -> Result<Self, EventParseError> {
        let color = fields.rgb()?;
        let opacity = fields.f64("opacity")?;
        let radius = fields.f64("radius")?;
        let texture_id = fields.u32("texture")?;
        let soft = fields.bool("soft")?;
        let mode = fields.blend_mode()?;
        let target_layer_id = fields.u32("layer")?;
        let coords = fields.coords(SCATTER_STRIDE)?;
        fields.finish()?;
        let mut event =
            ScatterEvent::new(header, color, opacity, radius, texture_id, soft, mode, target_layer_id);
        event.coords = coords;
        Ok(event)
    }

    pub fn serialize(&self, scale: f64) -> String {
        let mut out = self.header.serialize("scatter");
        out.push_str(&format!(
            " {} {} {} {} {} {} {} {} {}",
            self.color[0],
            self.color[1],
            self.color[2],
            self.opacity,
            self.radius * scale,
            self.texture_id,
            self.soft as u8,
            self.mode.to_u8(),
            self.target_layer_id
        ));
        for s in self.coords.chunks_exact(SCATTER_STRIDE) {
            out.push_str(&format!(
                " {} {} {} {} {}",
                s[0] * scale,
                s[1] * scale,
                s[2] * scale,
                s[3],
                s[4]
            ));
        }
        out
    }

    pub fn coords(&self) -> &[f64] {
        &self.coords
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn push_stamp(&mut self, x: f64, y: f64, radius: f64, flow: f64, rotation: f64) {
        assert!(radius >= 0.0, "stamp radius must not be negative");
        self.coords.extend_from_slice(&[x, y, radius, flow, rotation]);
    }

    pub fn scale(&mut self, factor: f64) {
        assert!(factor > 0.0, "scale factor must be positive");
        for s in self.coords.chunks_exact_mut(SCATTER_STRIDE) {
            s[0] *= factor;
            s[1] *= factor;
            s[2] *= factor;
        }
        self.radius *= factor;
        self.generation += 1;
    }

    pub fn translate(&mut self, offset: Vec2) {
        for s in self.coords.chunks_exact_mut(SCATTER_STRIDE) {
            s[0] += offset.x;
            s[1] += offset.y;
        }
        self.generation += 1;
    }

    pub fn draw_to<T: StrokeTarget + ?Sized>(
        &self,
        target: &mut T,
        transform: &AffineTransform,
        until: Option<usize>,
    ) {
        let until = until.unwrap_or(self.coords.len());
        assert!(
            until <= self.coords.len() && until % SCATTER_STRIDE == 0,
            "draw limit {} is not a sample boundary",
            until
        );
        let key = DrawStateKey::new(self.header.id, self.generation, transform);
        let mut coords_ind = match target.take_draw_event_state(&key) {
            Some(DrawEventState::Scatter { coords_ind }) if coords_ind <= until => coords_ind,
            Some(_) => {
                target.clear_dirty();
                0
            }
            None => 0,
        };

        if coords_ind < until {
            target.begin_circles(self.soft, self.texture_id);
            while coords_ind < until {
                let s = &self.coords[coords_ind..coords_ind + SCATTER_STRIDE];
                let center = transform.apply(Vec2::new(s[0], s[1]));
                target.fill_circle(center.x, center.y, s[2] * transform.scale(), s[3], s[4]);
                coords_ind += SCATTER_STRIDE;
            }
            target.flush_circles();
        }
        target.store_draw_event_state(key, DrawEventState::Scatter { coords_ind });
    }

    pub fn bounding_box(&mut self, clip: &Rect, transform: &AffineTransform) -> Rect {
        let mut bbox = self.bbox.take().unwrap_or_else(|| BoundingBoxRasterizer::new(*clip));
        bbox.set_clip(*clip);
        self.draw_to(&mut bbox, transform, None);
        let rect = bbox.bounding_box();
        self.bbox = Some(bbox);
        rect
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::alpha_for_n_blends;
    use crate::raster::{BatchedRasterizer, Rasterizer, SoftwareRasterizer};

    fn stroke(points: &[(f64, f64, f64)]) -> BrushEvent {
        let mut e = BrushEvent::new(
            EventHeader::new(0, 1),
            [0, 0, 0],
            0.78,
            0.9,
            25.0,
            0,
            true,
            BlendMode::Normal,
            0,
        );
        for &(x, y, p) in points {
            e.push_coord_triplet(x, y, p);
        }
        e
    }

    #[test]
    fn straight_stroke_reaches_its_flow() {
        let e = stroke(&[(0.0, 0.0, 1.0), (100.0, 0.0, 1.0)]);
        let mut r = SoftwareRasterizer::new(200, 50);
        e.draw_to(&mut r, &AffineTransform::identity(), None);

        // Pixel (50, 0) sees every stamp whose centre is within 25 px.
        let alpha = alpha_for_n_blends(0.78, 50.0);
        let mut clear = 1.0f64;
        for k in 0..=100 {
            let dist = ((50.5 - k as f64).powi(2) + 0.25).sqrt();
            clear *= 1.0 - alpha * (1.0 - dist / 25.0).max(0.0);
        }
        let expected = 1.0 - clear;
        let got = r.get_pixel(Vec2::new(50.0, 0.0)) as f64;
        assert!((got - expected).abs() < 0.05, "got {}, expected {}", got, expected);

        for y in 0..50 {
            for x in 126..200 {
                assert_eq!(r.get_pixel(Vec2::new(x as f64, y as f64)), 0.0);
            }
        }
        for y in 26..50 {
            for x in 0..126 {
                assert_eq!(r.get_pixel(Vec2::new(x as f64, y as f64)), 0.0, "({}, {})", x, y);
            }
        }
    }

    #[test]
    fn incremental_drawing_matches_full_drawing() {
        let points: Vec<(f64, f64, f64)> = (0..12)
            .map(|i| {
                let f = i as f64;
                (10.0 + f * 9.0, 40.0 + (f * 0.7).sin() * 20.0, 0.4 + f * 0.05)
            })
            .collect();
        let mut full_event = stroke(&points);
        full_event.radius = 6.0;
        let t = AffineTransform::identity();

        let mut full = SoftwareRasterizer::new(140, 80);
        full_event.draw_to(&mut full, &t, None);

        let mut live = stroke(&points[..1]);
        live.radius = 6.0;
        let mut partial = SoftwareRasterizer::new(140, 80);
        live.draw_to(&mut partial, &t, None);
        for &(x, y, p) in &points[1..] {
            live.push_coord_triplet(x, y, p);
            live.draw_to(&mut partial, &t, None);
        }
        assert_eq!(full.coverage(), partial.coverage());
    }

    #[test]
    fn drawing_twice_is_idempotent() {
        let e = stroke(&[(10.0, 10.0, 1.0), (60.0, 30.0, 0.5), (90.0, 10.0, 1.0)]);
        let t = AffineTransform::identity();
        let mut r = SoftwareRasterizer::new(128, 64);
        e.draw_to(&mut r, &t, None);
        let first = r.coverage().clone();
        e.draw_to(&mut r, &t, None);
        assert_eq!(&first, r.coverage());

        r.clear();
        e.draw_to(&mut r, &t, None);
        assert_eq!(&first, r.coverage());
    }

    #[test]
    fn new_transform_restarts_drawing() {
        let e = stroke(&[(10.0, 10.0, 1.0), (60.0, 30.0, 1.0)]);
        let mut r = SoftwareRasterizer::new(128, 64);
        e.draw_to(&mut r, &AffineTransform::identity(), None);
        let first = r.coverage().clone();
        // Same numbers, new generation: everything is redrawn, not doubled.
        e.draw_to(&mut r, &AffineTransform::identity(), None);
        assert_eq!(&first, r.coverage());
    }

    #[test]
    fn rewinding_clears_and_redraws() {
        let e = stroke(&[(10.0, 10.0, 1.0), (60.0, 30.0, 1.0), (100.0, 30.0, 1.0)]);
        let t = AffineTransform::identity();
        let mut r = SoftwareRasterizer::new(128, 64);
        e.draw_to(&mut r, &t, None);
        e.draw_to(&mut r, &t, Some(6));

        let mut fresh = SoftwareRasterizer::new(128, 64);
        e.draw_to(&mut fresh, &t, Some(6));
        assert_eq!(fresh.coverage(), r.coverage());
    }

    #[test]
    fn batched_backend_matches_software() {
        let e = stroke(&[(10.0, 10.0, 1.0), (60.0, 30.0, 0.3), (100.0, 20.0, 1.0)]);
        let t = AffineTransform::new(0.5, Vec2::new(3.0, 4.0));
        let mut software = SoftwareRasterizer::new(80, 40);
        let mut batched = BatchedRasterizer::new(80, 40, 7);
        e.draw_to(&mut software, &t, None);
        e.draw_to(&mut batched, &t, None);
        assert_eq!(software.coverage(), batched.coverage());
    }

    #[test]
    fn bounding_box_contains_every_stamp() {
        let mut e = stroke(&[(10.0, 10.0, 1.0), (60.0, 30.0, 0.2), (100.0, 20.0, 1.0)]);
        e.radius = 8.0;
        let t = AffineTransform::identity();
        let clip = Rect::new(-1000.0, 1000.0, -1000.0, 1000.0);
        let bbox = e.bounding_box(&clip, &t);

        let mut r = SoftwareRasterizer::new(128, 64);
        e.draw_to(&mut r, &t, None);
        assert!(bbox.contains_rounded_out(&r.dirty_rect()));
        assert!(bbox.contains_rect(&Rect::new(1.0, 19.0, 1.0, 19.0)));
    }

    #[test]
    fn bounding_box_follows_translation() {
        let mut e = stroke(&[(10.0, 10.0, 1.0), (20.0, 10.0, 1.0)]);
        e.radius = 2.0;
        let clip = Rect::new(-1000.0, 1000.0, -1000.0, 1000.0);
        let t = AffineTransform::identity();
        let before = e.bounding_box(&clip, &t);
        e.translate(Vec2::new(100.0, 0.0));
        let after = e.bounding_box(&clip, &t);
        assert!((after.left - before.left - 100.0).abs() < 1e-9);
        assert_eq!(e.generation(), 1);
    }

    #[test]
    fn serialize_scales_coordinates_and_rounds_pressure() {
        let mut e = stroke(&[(1.0, 2.0, 0.123456789)]);
        e.radius = 4.0;
        assert_eq!(e.serialize(2.0), "brush 0 1 0 0 0 0 0.78 0.9 8 0 1 1 0 2 4 0.12346");
    }

    #[test]
    fn scatter_places_samples_directly() {
        let mut e = ScatterEvent::new(EventHeader::new(0, 2), [0, 0, 0], 1.0, 4.0, 0, false, BlendMode::Normal, 0);
        e.push_stamp(10.0, 10.0, 3.0, 1.0, 0.0);
        e.push_stamp(30.0, 10.0, 3.0, 0.5, 0.0);
        let mut r = SoftwareRasterizer::new(40, 20);
        e.draw_to(&mut r, &AffineTransform::new(1.0, Vec2::ZERO), None);
        assert_eq!(r.get_pixel(Vec2::new(10.0, 10.0)), 1.0);
        assert!((r.get_pixel(Vec2::new(30.0, 10.0)) - 0.5).abs() < 1e-6);
        assert_eq!(r.get_pixel(Vec2::new(20.0, 10.0)), 0.0);
    }
}
