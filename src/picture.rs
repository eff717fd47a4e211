// ============================================================================
// PICTURE — layer buffers rebuilt from an event history
// ============================================================================
//
// Every committed event lives in `events`.  Layers are a cache of that
// history: buffer events add and remove them, rasterized events are drawn
// into the working rasterizer and merged into their target layer.  Undo and
// redo only flip the `undone` flag and rebuild from history.
//
// One event may be "in flight" (the stroke being drawn right now).  It is
// drawn incrementally into the rasterizer and only shown as an overlay on
// its target layer until it is committed.
// ============================================================================

use image::{Rgba, RgbaImage};

use crate::compositor::{BlendMode, Layer, Overlay, blend_pixel, composite_layers, merge_coverage};
use crate::events::{EventId, PictureEvent, replay_order};
use crate::geometry::{AffineTransform, Rect, Vec2};
use crate::raster::{Rasterizer, create_rasterizer};
use crate::settings::RenderSettings;

pub struct Picture {
    width: u32,
    height: u32,
    transform: AffineTransform,
    background: [u8; 4],
    layers: Vec<Layer>,
    events: Vec<PictureEvent>,
    rasterizer: Box<dyn Rasterizer>,
    current: Option<PictureEvent>,
}

impl Picture {
    /// A picture of `width`×`height` event units, rendered at the settings'
    /// bitmap scale.
    pub fn new(width: u32, height: u32, settings: &RenderSettings) -> Self {
        assert!(width > 0 && height > 0, "picture must not be empty");
        let scale = settings.bitmap_scale;
        let bitmap_width = ((width as f64 * scale).ceil() as u32).max(1);
        let bitmap_height = ((height as f64 * scale).ceil() as u32).max(1);
        let rasterizer = create_rasterizer(
            settings.backend,
            bitmap_width,
            bitmap_height,
            settings.circle_batch_size.max(1),
        );
        crate::log_info!(
            "Picture: {}x{} bitmap, scale {}, {} rasterizer",
            bitmap_width,
            bitmap_height,
            scale,
            settings.backend.name()
        );
        Self {
            width: bitmap_width,
            height: bitmap_height,
            transform: AffineTransform::new(scale, Vec2::ZERO),
            background: settings.background,
            layers: Vec::new(),
            events: Vec::new(),
            rasterizer,
            current: None,
        }
    }

    /// A picture rebuilt from a loaded history, replayed in history order.
    pub fn from_history(width: u32, height: u32, settings: &RenderSettings, events: Vec<PictureEvent>) -> Self {
        let mut picture = Self::new(width, height, settings);
        picture.events = events;
        picture.replay();
        picture
    }

    pub fn bitmap_width(&self) -> u32 {
        self.width
    }

    pub fn bitmap_height(&self) -> u32 {
        self.height
    }

    pub fn transform(&self) -> &AffineTransform {
        &self.transform
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, id: u32) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn events(&self) -> &[PictureEvent] {
        &self.events
    }

    fn bitmap_rect(&self) -> Rect {
        Rect::from_size(self.width, self.height)
    }

    // ========================================================================
    // HISTORY
    // ========================================================================

    /// Append an event to the history and apply it.
    pub fn push_event(&mut self, event: PictureEvent) {
        self.events.push(event);
        let index = self.events.len() - 1;
        self.apply(index);
    }

    /// Mark an event undone and rebuild what it touched.  Returns false if
    /// no such event exists or it was already undone.
    pub fn undo(&mut self, id: EventId) -> bool {
        self.set_undone(id, true)
    }

    pub fn redo(&mut self, id: EventId) -> bool {
        self.set_undone(id, false)
    }

    fn set_undone(&mut self, id: EventId, undone: bool) -> bool {
        let Some(index) = self.events.iter().position(|e| e.id() == id) else {
            crate::log_warn!("Picture: no event {} to {}", id, if undone { "undo" } else { "redo" });
            return false;
        };
        if self.events[index].is_undone() == undone {
            return false;
        }
        self.events[index].set_undone(undone);
        if self.events[index].is_buffer_stack_change() {
            self.replay();
        } else {
            let layer_id = self.events[index].target_layer_id();
            self.rebuild_layer(layer_id);
        }
        true
    }

    /// Rebuild every layer from scratch by replaying the whole history.
    pub fn replay(&mut self) {
        self.layers.clear();
        self.rasterizer.clear();
        for index in replay_order(&self.events) {
            self.apply(index);
        }
    }

    /// Clear one layer and redraw the events that target it after its
    /// creation.
    fn rebuild_layer(&mut self, layer_id: u32) {
        let Some(layer) = self.layers.iter_mut().find(|l| l.id == layer_id) else { return };
        layer.clear();
        let order = replay_order(&self.events);
        let start = order
            .iter()
            .rposition(|&i| {
                let e = &self.events[i];
                matches!(e, PictureEvent::BufferAdd(_)) && !e.is_undone() && e.target_layer_id() == layer_id
            })
            .map_or(0, |p| p + 1);
        for &index in &order[start..] {
            let event = &self.events[index];
            if event.is_rasterized() && event.target_layer_id() == layer_id {
                self.apply(index);
            }
        }
    }

    fn apply(&mut self, index: usize) {
        if self.events[index].is_undone() {
            return;
        }
        if self.events[index].is_rasterized() {
            self.bake(index);
            return;
        }
        match &self.events[index] {
            PictureEvent::BufferAdd(add) => {
                if self.layers.iter().any(|l| l.id == add.buffer_id) {
                    crate::log_warn!("Picture: buffer {} already exists, event {} skipped", add.buffer_id, add.header.id);
                    return;
                }
                let layer = Layer::new(
                    add.buffer_id,
                    self.width,
                    self.height,
                    add.has_alpha,
                    add.clear_color,
                    add.opacity as f32,
                );
                let at = add.insertion_index.min(self.layers.len());
                self.layers.insert(at, layer);
            }
            PictureEvent::BufferRemove(remove) => {
                match self.layers.iter().position(|l| l.id == remove.buffer_id) {
                    Some(at) => {
                        self.layers.remove(at);
                    }
                    None => {
                        crate::log_warn!(
                            "Picture: buffer {} does not exist, event {} skipped",
                            remove.buffer_id,
                            remove.header.id
                        );
                    }
                }
            }
            _ => {}
        }
    }

    /// Draw a rasterized history event and merge it into its layer.
    fn bake(&mut self, index: usize) {
        let clip = self.bitmap_rect();
        let transform = self.transform;
        let event = &mut self.events[index];
        let Some((color, opacity, mode)) = event.paint() else { return };
        let layer_id = event.target_layer_id();
        let Some(layer) = self.layers.iter_mut().find(|l| l.id == layer_id) else {
            crate::log_warn!("Picture: event {} targets missing buffer {}", event.id(), layer_id);
            return;
        };
        let bbox = event.bounding_box(&clip, &transform);
        if opacity <= 0.0 || bbox.is_empty() {
            return;
        }

        self.rasterizer.set_clip(clip);
        event.draw_to(self.rasterizer.as_mut(), &transform, None);
        let rect = self.rasterizer.dirty_rect();
        let (color, mode) = paint_for_layer(layer, color, mode);
        let coverage = self.rasterizer.coverage();
        merge_coverage(&mut layer.pixels, coverage, &rect, color, opacity as f32, mode);
    }

    // ========================================================================
    // IN-FLIGHT EVENT
    // ========================================================================

    /// Start showing `event` on top of its layer without committing it.
    pub fn set_current_event(&mut self, event: PictureEvent) {
        self.current = Some(event);
    }

    pub fn current_event(&self) -> Option<&PictureEvent> {
        self.current.as_ref()
    }

    /// Edit the in-flight event in place (usually appending samples).  The
    /// next composite only draws what was added.  Returns false when there is
    /// no in-flight event.
    pub fn update_current_event(&mut self, update: impl FnOnce(&mut PictureEvent)) -> bool {
        match self.current.as_mut() {
            Some(event) => {
                update(event);
                true
            }
            None => false,
        }
    }

    pub fn cancel_current_event(&mut self) -> Option<PictureEvent> {
        self.current.take()
    }

    /// Move the in-flight event into the history.
    pub fn commit_current_event(&mut self) -> bool {
        match self.current.take() {
            Some(event) => {
                self.push_event(event);
                true
            }
            None => false,
        }
    }

    // ========================================================================
    // OUTPUT
    // ========================================================================

    /// Flatten the layer stack and the in-flight event, without background.
    pub fn composite(&mut self) -> RgbaImage {
        let clip = self.bitmap_rect();
        let transform = self.transform;
        let live = match &self.current {
            Some(event) if event.is_rasterized() && !event.is_undone() => {
                let layer_id = event.target_layer_id();
                let layer = self.layers.iter().find(|l| l.id == layer_id);
                match (event.paint(), layer) {
                    (Some((color, opacity, mode)), Some(layer)) if opacity > 0.0 => {
                        self.rasterizer.set_clip(clip);
                        event.draw_to(self.rasterizer.as_mut(), &transform, None);
                        let (color, mode) = paint_for_layer(layer, color, mode);
                        Some((layer_id, color, opacity as f32, mode))
                    }
                    _ => None,
                }
            }
            _ => None,
        };

        match live {
            Some((target_layer_id, color, opacity, mode)) => {
                let rect = self.rasterizer.dirty_rect();
                let coverage = self.rasterizer.coverage();
                let overlay = Overlay { target_layer_id, coverage, rect, color, opacity, mode };
                composite_layers(&self.layers, self.width, self.height, Some(&overlay))
            }
            None => composite_layers(&self.layers, self.width, self.height, None),
        }
    }

    /// Final image over the configured background colour.
    pub fn render(&mut self) -> RgbaImage {
        let mut image = self.composite();
        if self.background[3] > 0 {
            let background = Rgba(self.background);
            for px in image.pixels_mut() {
                *px = blend_pixel(background, *px, BlendMode::Normal, 1.0);
            }
        }
        image
    }
}

/// Erasing a buffer without alpha paints its clear colour instead.
fn paint_for_layer(layer: &Layer, color: [u8; 3], mode: BlendMode) -> ([u8; 3], BlendMode) {
    if mode == BlendMode::Erase && !layer.has_alpha {
        let c = layer.clear_color();
        ([c[0], c[1], c[2]], BlendMode::Normal)
    } else {
        (color, mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{BrushEvent, EventHeader};

    fn settings() -> RenderSettings {
        RenderSettings { background: [0, 0, 0, 0], ..RenderSettings::default() }
    }

    fn parse(line: &str) -> PictureEvent {
        PictureEvent::parse(line).unwrap()
    }

    fn picture() -> Picture {
        let mut p = Picture::new(64, 32, &settings());
        p.push_event(parse("bufferAdd 0 1 0 0 0 255 255 255 255 1 0"));
        p.push_event(parse("bufferAdd 0 2 0 1 1 0 0 0 0 1 1"));
        p
    }

    #[test]
    fn buffer_events_build_the_stack() {
        let mut p = picture();
        assert_eq!(p.layers().len(), 2);
        assert_eq!(p.layers()[1].id, 1);
        p.push_event(parse("bufferRemove 0 3 0 1"));
        assert_eq!(p.layers().len(), 1);
        p.push_event(parse("bufferRemove 0 4 0 9"));
        assert_eq!(p.layers().len(), 1);
    }

    #[test]
    fn strokes_land_in_their_layer() {
        let mut p = picture();
        p.push_event(parse("brush 0 3 0 255 0 0 1 1 4 0 0 1 1 10 16 1 50 16 1"));
        let layer = p.layer(1).unwrap();
        assert_eq!(*layer.pixels.get_pixel(30, 16), Rgba([255, 0, 0, 255]));
        assert_eq!(layer.pixels.get_pixel(30, 2)[3], 0);
        assert_eq!(*p.layer(0).unwrap().pixels.get_pixel(30, 16), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn undo_and_redo_rebuild_the_layer() {
        let mut p = picture();
        p.push_event(parse("brush 0 3 0 255 0 0 1 1 4 0 0 1 1 10 16 1 50 16 1"));
        let drawn = p.layer(1).unwrap().pixels.clone();
        let id = EventId::new(0, 3);

        assert!(p.undo(id));
        assert!(!p.undo(id));
        assert!(p.layer(1).unwrap().pixels.pixels().all(|px| px[3] == 0));

        assert!(p.redo(id));
        assert_eq!(p.layer(1).unwrap().pixels, drawn);
    }

    #[test]
    fn replay_reproduces_incremental_result() {
        let mut p = picture();
        p.push_event(parse("brush 0 3 0 255 0 0 0.6 0.8 5 0 1 1 1 5 5 1 40 20 0.5 60 5 1"));
        p.push_event(parse("gradient 0 4 0 0 0 255 0.5 2 0 0 0 64 0"));
        p.push_event(parse("brush 0 5 0 0 0 0 1 1 3 0 0 0 1 0 16 1 64 16 1"));
        let before = p.composite();
        p.replay();
        assert_eq!(p.composite(), before);
    }

    #[test]
    fn in_flight_stroke_is_only_an_overlay() {
        let mut p = picture();
        let mut stroke = BrushEvent::new(
            EventHeader::new(0, 3),
            [0, 0, 255],
            1.0,
            1.0,
            4.0,
            0,
            false,
            BlendMode::Normal,
            1,
        );
        stroke.push_coord_triplet(10.0, 16.0, 1.0);
        p.set_current_event(PictureEvent::Brush(stroke));
        let live = p.composite();
        assert_eq!(*live.get_pixel(10, 16), Rgba([0, 0, 255, 255]));
        assert!(p.update_current_event(|event| {
            if let PictureEvent::Brush(b) = event {
                b.push_coord_triplet(40.0, 16.0, 1.0);
            }
        }));

        let live = p.composite();
        assert_eq!(*live.get_pixel(25, 16), Rgba([0, 0, 255, 255]));
        assert_eq!(p.layer(1).unwrap().pixels.get_pixel(25, 16)[3], 0);

        assert!(p.commit_current_event());
        assert_eq!(p.composite(), live);
        assert_eq!(p.events().len(), 3);
    }

    #[test]
    fn erasing_reveals_lower_layers() {
        let mut p = picture();
        p.push_event(parse("gradient 0 3 0 255 0 0 1 1 1 0 0 0 0"));
        assert!(p.layer(1).unwrap().pixels.pixels().all(|px| px[3] == 0));
        p.push_event(parse("brush 0 4 0 255 0 0 1 1 6 0 0 1 1 10 16 1 50 16 1"));
        p.push_event(parse("brush 0 5 0 0 0 0 1 1 3 0 0 0 1 30 0 1 30 32 1"));
        let out = p.composite();
        assert_eq!(*out.get_pixel(30, 16), Rgba([255, 255, 255, 255]));
        assert_eq!(*out.get_pixel(15, 16), Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn render_adds_background() {
        let mut s = settings();
        s.background = [10, 20, 30, 255];
        let mut p = Picture::new(8, 8, &s);
        p.push_event(parse("bufferAdd 0 1 0 0 1 0 0 0 0 1 0"));
        assert_eq!(*p.render().get_pixel(3, 3), Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn bitmap_scale_sizes_the_buffers() {
        let mut s = settings();
        s.bitmap_scale = 0.5;
        let p = Picture::new(65, 32, &s);
        assert_eq!((p.bitmap_width(), p.bitmap_height()), (33, 16));
    }
}
