use std::f64::consts::TAU;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{RotationMode, TipSettings};
use crate::color::{alpha_for_n_blends, n_blends};
use crate::geometry::{AffineTransform, Vec2};
use crate::raster::StrokeTarget;

/// Length of one flattening step of the smoothing curve, in output pixels.
pub const LINE_SEGMENT_LENGTH: f64 = 5.0;

/// Short segments only get a stamp when `SHORT_SEGMENT_GUARD * d` exceeds
/// the stamp diameter, which filters out zero-length noise.
pub const SHORT_SEGMENT_GUARD: f64 = 100_000.0;

/// Relative spacing never shrinks below what this pressure would give.
const SPACING_PRESSURE_FLOOR: f64 = 0.1;

/// Resamples a polyline of `(x, y, pressure)` samples into evenly spaced
/// stamps.
///
/// Call [`reset`](Self::reset) with the first sample and then
/// [`move_to`](Self::move_to) with every sample, the first one included.
/// Positions are transformed on the way in, so `t` and all spacing are
/// measured in output pixels.
#[derive(Clone, Debug)]
pub struct BrushTipMover {
    fill_short_segments: bool,
    transform: AffineTransform,
    settings: TipSettings,
    continuous: bool,
    /// Full-pressure radius in output pixels.
    radius: f64,
    draw_flow_alpha: f64,

    position: Vec2,
    pressure: f64,
    /// Unit direction of the end of the last curve, zero before the first.
    direction: Vec2,
    /// Distance left until the next stamp.
    t: f64,
    rng: StdRng,
}

impl Default for BrushTipMover {
    fn default() -> Self {
        Self::new(true)
    }
}

impl BrushTipMover {
    pub fn new(fill_short_segments: bool) -> Self {
        Self {
            fill_short_segments,
            transform: AffineTransform::identity(),
            settings: TipSettings::continuous(1.0, 1.0),
            continuous: true,
            radius: 1.0,
            draw_flow_alpha: 1.0,
            position: Vec2::ZERO,
            pressure: 1.0,
            direction: Vec2::ZERO,
            t: 0.0,
            rng: StdRng::seed_from_u64(0),
        }
    }

    /// Start a new stroke at `(x, y)` in event coordinates.
    ///
    /// `seed` fixes the scatter and rotation sequence so a replay places
    /// exactly the same stamps.
    pub fn reset(
        &mut self,
        transform: &AffineTransform,
        x: f64,
        y: f64,
        pressure: f64,
        settings: &TipSettings,
        seed: u64,
    ) {
        assert!(settings.radius > 0.0, "brush radius must be positive");
        assert!(settings.spacing > 0.0, "brush spacing must be positive");

        self.transform = *transform;
        self.settings = *settings;
        self.continuous = settings.is_continuous();
        self.radius = settings.radius * transform.scale();
        self.position = transform.apply(Vec2::new(x, y));
        self.pressure = pressure;
        self.direction = Vec2::ZERO;
        self.t = 0.0;
        self.rng = StdRng::seed_from_u64(seed);

        let blends = if self.continuous {
            (self.radius * 2.0).ceil()
        } else {
            self.radius * 2.0 / self.step(1.0)
        };
        self.draw_flow_alpha = alpha_for_n_blends(settings.flow, blends);
    }

    pub fn draw_flow_alpha(&self) -> f64 {
        self.draw_flow_alpha
    }

    /// Current position in output pixels.
    pub fn position(&self) -> Vec2 {
        self.position
    }

    /// Continue the stroke to `(x, y)` in event coordinates.
    pub fn move_to<T: StrokeTarget + ?Sized>(&mut self, target: &mut T, x: f64, y: f64, pressure: f64) {
        let p0 = self.position;
        let p1 = self.transform.apply(Vec2::new(x, y));
        let delta = p1 - p0;
        let d = delta.length();

        if d == 0.0 {
            // Only the very first sample of a stroke lands here with t == 0.
            if self.t <= 0.0 {
                let alpha = self.draw_flow_alpha;
                self.stamp(target, p0, pressure, alpha);
                self.t += self.step(pressure);
            }
            self.pressure = pressure;
            return;
        }

        if d < self.t && self.continuous && self.fill_short_segments {
            if SHORT_SEGMENT_GUARD * d > self.radius * 2.0 {
                let alpha = n_blends(self.draw_flow_alpha, d / self.step(pressure));
                let mid = p0.lerp(p1, 0.5);
                self.stamp(target, mid, (self.pressure + pressure) * 0.5, alpha);
            }
            self.t -= d;
            self.position = p1;
            self.pressure = pressure;
            return;
        }

        let control = if self.direction.dot(delta) > d * 0.5 {
            let along = p0 + self.direction * (d * 0.5);
            let mid = p0.lerp(p1, 0.5);
            along.lerp(mid, 0.5)
        } else {
            p0.lerp(p1, 0.5)
        };

        let segments = ((d / LINE_SEGMENT_LENGTH).ceil() as usize).max(1);
        let points: Vec<Vec2> = (0..=segments)
            .map(|i| quadratic_bezier(p0, control, p1, i as f64 / segments as f64))
            .collect();
        let bezier_length: f64 = points.windows(2).map(|w| w[0].distance(w[1])).sum();
        let spacing_multiplier = if bezier_length > 0.0 { d / bezier_length } else { 1.0 };
        let alpha = if spacing_multiplier < 1.0 {
            n_blends(self.draw_flow_alpha, 1.0 / spacing_multiplier)
        } else {
            self.draw_flow_alpha
        };

        let start_pressure = self.pressure;
        for i in 0..segments {
            let (a, b) = (points[i], points[i + 1]);
            let pa = start_pressure + (pressure - start_pressure) * (i as f64 / segments as f64);
            let pb = start_pressure + (pressure - start_pressure) * ((i + 1) as f64 / segments as f64);
            let seg_len = a.distance(b) * spacing_multiplier;
            if self.settings.rotation_mode == RotationMode::FollowStroke && seg_len > 0.0 {
                self.direction = (b - a).normalized();
            }
            while self.t <= seg_len {
                let f = if seg_len > 0.0 { self.t / seg_len } else { 0.0 };
                let stamp_pressure = pa + (pb - pa) * f;
                self.stamp(target, a.lerp(b, f), stamp_pressure, alpha);
                self.t += self.step(stamp_pressure);
            }
            self.t -= seg_len;
        }

        let exit = (p1 - control).normalized();
        self.direction = if exit == Vec2::ZERO { delta.normalized() } else { exit };
        self.position = p1;
        self.pressure = pressure;
    }

    /// Distance to the next stamp after one placed at `pressure`.
    fn step(&self, pressure: f64) -> f64 {
        if self.continuous {
            1.0
        } else if self.settings.relative_spacing {
            self.settings.spacing * self.radius * pressure.max(SPACING_PRESSURE_FLOOR)
        } else {
            self.settings.spacing * self.transform.scale()
        }
    }

    fn stamp<T: StrokeTarget + ?Sized>(&mut self, target: &mut T, at: Vec2, pressure: f64, alpha: f64) {
        let radius = self.radius * pressure;
        let mut center = at;
        if self.settings.scatter_offset > 0.0 {
            let distance = self.rng.r#gen::<f64>() * self.settings.scatter_offset * radius;
            let angle = self.rng.r#gen::<f64>() * TAU;
            center = center + Vec2::new(angle.cos(), angle.sin()) * distance;
        }
        let rotation = match self.settings.rotation_mode {
            RotationMode::Off => 0.0,
            RotationMode::Random => self.rng.r#gen::<f64>() * TAU,
            RotationMode::FollowStroke => self.direction.angle(),
        };
        target.fill_circle(center.x, center.y, radius, alpha, rotation);
    }
}

fn quadratic_bezier(p0: Vec2, control: Vec2, p1: Vec2, s: f64) -> Vec2 {
    let inv = 1.0 - s;
    p0 * (inv * inv) + control * (2.0 * inv * s) + p1 * (s * s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;
    use crate::raster::{DrawEventState, DrawStateKey};

    /// Records every stamp instead of drawing it.
    #[derive(Default)]
    struct StampLog {
        stamps: Vec<(f64, f64, f64, f64, f64)>,
    }

    impl StrokeTarget for StampLog {
        fn begin_circles(&mut self, _soft: bool, _texture_id: u32) {}
        fn fill_circle(&mut self, x: f64, y: f64, radius: f64, flow_alpha: f64, rotation: f64) {
            self.stamps.push((x, y, radius, flow_alpha, rotation));
        }
        fn flush_circles(&mut self) {}
        fn clear_dirty(&mut self) {}
        fn take_draw_event_state(&mut self, _key: &DrawStateKey) -> Option<DrawEventState> {
            None
        }
        fn store_draw_event_state(&mut self, _key: DrawStateKey, _state: DrawEventState) {}
        fn linear_gradient(&mut self, _p0: Vec2, _p1: Vec2) {}
        fn set_clip(&mut self, _clip: Rect) {}
        fn clip(&self) -> Rect {
            Rect::empty()
        }
    }

    fn run(points: &[(f64, f64, f64)], settings: &TipSettings, scale: f64) -> StampLog {
        let transform = AffineTransform::new(scale, Vec2::ZERO);
        let mut mover = BrushTipMover::new(true);
        let mut log = StampLog::default();
        let (x, y, p) = points[0];
        mover.reset(&transform, x, y, p, settings, 7);
        for &(x, y, p) in points {
            mover.move_to(&mut log, x, y, p);
        }
        log
    }

    const PATH: [(f64, f64, f64); 4] =
        [(0.0, 0.0, 1.0), (100.0, 0.0, 1.0), (100.0, 70.0, 1.0), (30.0, 120.0, 1.0)];

    #[test]
    fn scattered_stamp_count_is_scale_invariant() {
        let settings = TipSettings {
            radius: 10.0,
            flow: 0.5,
            scatter_offset: 0.5,
            spacing: 0.3,
            relative_spacing: true,
            rotation_mode: RotationMode::Off,
        };
        let big = run(&PATH, &settings, 1.0);
        let tiny = run(&PATH, &settings, 0.000001);
        assert!(big.stamps.len() > 50);
        assert_eq!(big.stamps.len(), tiny.stamps.len());
    }

    #[test]
    fn random_rotation_stamp_count_is_scale_invariant() {
        let settings = TipSettings::for_texture(2, 10.0, 0.5);
        let big = run(&PATH, &settings, 1.0);
        let tiny = run(&PATH, &settings, 0.000001);
        assert_eq!(big.stamps.len(), tiny.stamps.len());
        assert!(big.stamps.iter().any(|s| s.4 != 0.0));
    }

    #[test]
    fn continuous_stamp_count_scales_with_size() {
        let settings = TipSettings::continuous(5.0, 0.5);
        let path = [(0.0, 0.0, 1.0), (200.0, 0.0, 1.0)];
        let big = run(&path, &settings, 1.0).stamps.len() as f64;
        let small = run(&path, &settings, 0.1).stamps.len() as f64;
        assert!((small - big / 10.0).abs() <= 1.0, "big = {}, small = {}", big, small);
    }

    #[test]
    fn sample_density_does_not_change_stamp_count() {
        let settings = TipSettings::continuous(3.0, 0.5);
        let single = run(&[(0.0, 0.0, 1.0), (100.5, 0.0, 1.0)], &settings, 1.0);
        let dense: Vec<(f64, f64, f64)> = (0..=67).map(|i| (i as f64 * 1.5, 0.0, 1.0)).collect();
        let dense = run(&dense, &settings, 1.0);
        assert_eq!(single.stamps.len(), 101);
        assert_eq!(dense.stamps.len(), single.stamps.len());
    }

    #[test]
    fn first_sample_is_stamped() {
        let settings = TipSettings::continuous(4.0, 0.5);
        let log = run(&[(3.0, 4.0, 0.5)], &settings, 2.0);
        assert_eq!(log.stamps.len(), 1);
        let (x, y, r, _, _) = log.stamps[0];
        assert_eq!((x, y, r), (6.0, 8.0, 4.0));
    }

    #[test]
    fn short_segments_get_reduced_flow_stamps() {
        let settings = TipSettings::continuous(4.0, 0.5);
        let mut points = vec![(0.0, 0.0, 1.0), (10.5, 0.0, 1.0)];
        points.extend((1..=4).map(|i| (10.5 + i as f64 * 0.1, 0.0, 1.0)));

        let filled = run(&points, &settings, 1.0);
        let base = filled.stamps[0].3;
        let short: Vec<_> = filled.stamps.iter().filter(|s| s.3 < base).collect();
        assert!(!short.is_empty());

        let transform = AffineTransform::identity();
        let mut mover = BrushTipMover::new(false);
        let mut log = StampLog::default();
        mover.reset(&transform, 0.0, 0.0, 1.0, &settings, 0);
        for &(x, y, p) in &points {
            mover.move_to(&mut log, x, y, p);
        }
        assert_eq!(log.stamps.len() + short.len(), filled.stamps.len());
    }

    #[test]
    fn same_seed_replays_identically() {
        let settings = TipSettings {
            radius: 6.0,
            flow: 0.8,
            scatter_offset: 1.0,
            spacing: 0.5,
            relative_spacing: true,
            rotation_mode: RotationMode::Random,
        };
        let a = run(&PATH, &settings, 1.0);
        let b = run(&PATH, &settings, 1.0);
        assert_eq!(a.stamps, b.stamps);
    }

    #[test]
    fn pressure_scales_radius() {
        let settings = TipSettings::continuous(10.0, 0.5);
        let log = run(&[(0.0, 0.0, 0.0), (50.5, 0.0, 1.0)], &settings, 1.0);
        let first = log.stamps.first().unwrap().2;
        let last = log.stamps.last().unwrap().2;
        assert!(first < 0.5);
        assert!(last > 9.5);
    }
}
