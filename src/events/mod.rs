// ============================================================================
// EVENTS — the picture history and its incremental draw protocol
// ============================================================================
//
// Architecture:
//   mod.rs       — EventId / EventHeader, the PictureEvent enum, text
//                  format dispatch, parse errors, replay ordering
//   brush.rs     — BrushEvent (tip-mover strokes) and ScatterEvent
//   gradient.rs  — GradientEvent
//   buffer.rs    — BufferAddEvent / BufferRemoveEvent (layer stack changes)
//
// Every rasterized event draws through `StrokeTarget`, keyed by
// (EventId, event generation, transform).  A target that already holds the
// state for that key resumes where it stopped; anything else restarts.
// ============================================================================

pub mod brush;
pub mod buffer;
pub mod gradient;

pub use brush::{BrushEvent, ScatterEvent};
pub use buffer::{BufferAddEvent, BufferRemoveEvent};
pub use gradient::GradientEvent;

use std::collections::HashMap;
use std::fmt;
use std::str::SplitWhitespace;

use crate::compositor::BlendMode;
use crate::geometry::{AffineTransform, Rect, Vec2};
use crate::raster::StrokeTarget;

/// Globally unique event identity.  Orders by session, then by the
/// per-session counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId {
    pub sid: u32,
    pub session_event_id: u32,
}

impl EventId {
    pub fn new(sid: u32, session_event_id: u32) -> Self {
        Self { sid, session_event_id }
    }

    /// Seed for the random parts of stamp placement.
    pub fn seed(&self) -> u64 {
        ((self.sid as u64) << 32) | self.session_event_id as u64
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.sid, self.session_event_id)
    }
}

/// Fields every event carries.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EventHeader {
    pub id: EventId,
    pub undone: bool,
}

impl EventHeader {
    pub fn new(sid: u32, session_event_id: u32) -> Self {
        Self { id: EventId::new(sid, session_event_id), undone: false }
    }

    fn serialize(&self, type_name: &str) -> String {
        format!(
            "{} {} {} {}",
            type_name,
            self.id.sid,
            self.id.session_event_id,
            self.undone as u8
        )
    }

    fn parse(fields: &mut Fields<'_>) -> Result<Self, EventParseError> {
        let sid = fields.u32("sid")?;
        let seid = fields.u32("session_event_id")?;
        let undone = fields.bool("undone")?;
        Ok(Self { id: EventId::new(sid, seid), undone })
    }
}

// ============================================================================
// PARSE ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum EventParseError {
    Empty,
    UnknownType(String),
    MissingField(&'static str),
    InvalidNumber { field: &'static str, value: String },
    UnknownBlendMode(u8),
    CoordinateCount { stride: usize, count: usize },
    TrailingFields(usize),
}

impl fmt::Display for EventParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventParseError::Empty => write!(f, "empty event line"),
            EventParseError::UnknownType(t) => write!(f, "unknown event type '{}'", t),
            EventParseError::MissingField(name) => write!(f, "missing field '{}'", name),
            EventParseError::InvalidNumber { field, value } => {
                write!(f, "invalid value '{}' for field '{}'", value, field)
            }
            EventParseError::UnknownBlendMode(m) => write!(f, "unknown blend mode {}", m),
            EventParseError::CoordinateCount { stride, count } => {
                write!(f, "{} coordinates is not a multiple of {}", count, stride)
            }
            EventParseError::TrailingFields(n) => write!(f, "{} unexpected trailing fields", n),
        }
    }
}

impl std::error::Error for EventParseError {}

/// Cursor over the whitespace-separated fields of one event line.
pub(crate) struct Fields<'a> {
    inner: SplitWhitespace<'a>,
}

impl<'a> Fields<'a> {
    fn new(line: &'a str) -> Self {
        Self { inner: line.split_whitespace() }
    }

    fn next(&mut self, field: &'static str) -> Result<&'a str, EventParseError> {
        self.inner.next().ok_or(EventParseError::MissingField(field))
    }

    fn number<T: std::str::FromStr>(&mut self, field: &'static str) -> Result<T, EventParseError> {
        let raw = self.next(field)?;
        raw.parse().map_err(|_| EventParseError::InvalidNumber {
            field,
            value: raw.to_string(),
        })
    }

    pub(crate) fn u32(&mut self, field: &'static str) -> Result<u32, EventParseError> {
        self.number(field)
    }

    pub(crate) fn u8(&mut self, field: &'static str) -> Result<u8, EventParseError> {
        self.number(field)
    }

    pub(crate) fn f64(&mut self, field: &'static str) -> Result<f64, EventParseError> {
        let v: f64 = self.number(field)?;
        if v.is_finite() {
            Ok(v)
        } else {
            Err(EventParseError::InvalidNumber { field, value: v.to_string() })
        }
    }

    pub(crate) fn bool(&mut self, field: &'static str) -> Result<bool, EventParseError> {
        match self.next(field)? {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(EventParseError::InvalidNumber { field, value: other.to_string() }),
        }
    }

    pub(crate) fn rgb(&mut self) -> Result<[u8; 3], EventParseError> {
        Ok([self.u8("r")?, self.u8("g")?, self.u8("b")?])
    }

    pub(crate) fn blend_mode(&mut self) -> Result<BlendMode, EventParseError> {
        let raw = self.u8("mode")?;
        BlendMode::from_u8(raw).ok_or(EventParseError::UnknownBlendMode(raw))
    }

    /// All remaining fields as numbers, checked against `stride`.
    pub(crate) fn coords(&mut self, stride: usize) -> Result<Vec<f64>, EventParseError> {
        let mut coords = Vec::new();
        while let Some(raw) = self.inner.next() {
            let v: f64 = raw.parse().map_err(|_| EventParseError::InvalidNumber {
                field: "coords",
                value: raw.to_string(),
            })?;
            coords.push(v);
        }
        if coords.len() % stride != 0 {
            return Err(EventParseError::CoordinateCount { stride, count: coords.len() });
        }
        Ok(coords)
    }

    pub(crate) fn finish(mut self) -> Result<(), EventParseError> {
        let rest = self.inner.by_ref().count();
        if rest == 0 { Ok(()) } else { Err(EventParseError::TrailingFields(rest)) }
    }
}

/// `p` rounded to 5 decimals, the precision kept for pressure.
pub fn round_pressure(p: f64) -> f64 {
    (p * 100_000.0).round() / 100_000.0
}

// ============================================================================
// PICTURE EVENT
// ============================================================================

#[derive(Clone, Debug)]
pub enum PictureEvent {
    Brush(BrushEvent),
    Scatter(ScatterEvent),
    Gradient(GradientEvent),
    BufferAdd(BufferAddEvent),
    BufferRemove(BufferRemoveEvent),
}

impl PictureEvent {
    /// Parse one line of the event text format.
    pub fn parse(line: &str) -> Result<PictureEvent, EventParseError> {
        let mut fields = Fields::new(line);
        let kind = fields.inner.next().ok_or(EventParseError::Empty)?;
        let header = EventHeader::parse(&mut fields)?;
        match kind {
            "brush" => BrushEvent::parse(header, fields).map(PictureEvent::Brush),
            "scatter" => ScatterEvent::parse(header, fields).map(PictureEvent::Scatter),
            "gradient" => GradientEvent::parse(header, fields).map(PictureEvent::Gradient),
            "bufferAdd" => BufferAddEvent::parse(header, fields).map(PictureEvent::BufferAdd),
            "bufferRemove" => BufferRemoveEvent::parse(header, fields).map(PictureEvent::BufferRemove),
            other => Err(EventParseError::UnknownType(other.to_string())),
        }
    }

    /// One line of the text format with coordinates and radii multiplied by
    /// `scale`.
    pub fn serialize(&self, scale: f64) -> String {
        match self {
            PictureEvent::Brush(e) => e.serialize(scale),
            PictureEvent::Scatter(e) => e.serialize(scale),
            PictureEvent::Gradient(e) => e.serialize(scale),
            PictureEvent::BufferAdd(e) => e.serialize(),
            PictureEvent::BufferRemove(e) => e.serialize(),
        }
    }

    pub fn header(&self) -> &EventHeader {
        match self {
            PictureEvent::Brush(e) => &e.header,
            PictureEvent::Scatter(e) => &e.header,
            PictureEvent::Gradient(e) => &e.header,
            PictureEvent::BufferAdd(e) => &e.header,
            PictureEvent::BufferRemove(e) => &e.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut EventHeader {
        match self {
            PictureEvent::Brush(e) => &mut e.header,
            PictureEvent::Scatter(e) => &mut e.header,
            PictureEvent::Gradient(e) => &mut e.header,
            PictureEvent::BufferAdd(e) => &mut e.header,
            PictureEvent::BufferRemove(e) => &mut e.header,
        }
    }

    pub fn id(&self) -> EventId {
        self.header().id
    }

    pub fn is_undone(&self) -> bool {
        self.header().undone
    }

    pub fn set_undone(&mut self, undone: bool) {
        self.header_mut().undone = undone;
    }

    /// Scale coordinates (and radii) about the origin.
    pub fn scale(&mut self, factor: f64) {
        match self {
            PictureEvent::Brush(e) => e.scale(factor),
            PictureEvent::Scatter(e) => e.scale(factor),
            PictureEvent::Gradient(e) => e.scale(factor),
            PictureEvent::BufferAdd(_) | PictureEvent::BufferRemove(_) => {}
        }
    }

    pub fn translate(&mut self, offset: Vec2) {
        match self {
            PictureEvent::Brush(e) => e.translate(offset),
            PictureEvent::Scatter(e) => e.translate(offset),
            PictureEvent::Gradient(e) => e.translate(offset),
            PictureEvent::BufferAdd(_) | PictureEvent::BufferRemove(_) => {}
        }
    }

    pub fn is_rasterized(&self) -> bool {
        matches!(self, PictureEvent::Brush(_) | PictureEvent::Scatter(_) | PictureEvent::Gradient(_))
    }

    pub fn is_buffer_stack_change(&self) -> bool {
        matches!(self, PictureEvent::BufferAdd(_) | PictureEvent::BufferRemove(_))
    }

    /// Layer a rasterized event paints into.  Buffer events name the
    /// buffer they add or remove.
    pub fn target_layer_id(&self) -> u32 {
        match self {
            PictureEvent::Brush(e) => e.target_layer_id,
            PictureEvent::Scatter(e) => e.target_layer_id,
            PictureEvent::Gradient(e) => e.target_layer_id,
            PictureEvent::BufferAdd(e) => e.buffer_id,
            PictureEvent::BufferRemove(e) => e.buffer_id,
        }
    }

    /// Colour, opacity and mode used to merge this event's coverage.
    pub fn paint(&self) -> Option<([u8; 3], f64, BlendMode)> {
        match self {
            PictureEvent::Brush(e) => Some((e.color, e.opacity, e.mode)),
            PictureEvent::Scatter(e) => Some((e.color, e.opacity, e.mode)),
            PictureEvent::Gradient(e) => Some((e.color, e.opacity, e.mode)),
            PictureEvent::BufferAdd(_) | PictureEvent::BufferRemove(_) => None,
        }
    }

    /// Draw into `target` up to the flat coordinate index `until` (all of
    /// them when `None`).  Buffer stack changes draw nothing.
    pub fn draw_to<T: StrokeTarget + ?Sized>(
        &self,
        target: &mut T,
        transform: &AffineTransform,
        until: Option<usize>,
    ) {
        match self {
            PictureEvent::Brush(e) => e.draw_to(target, transform, until),
            PictureEvent::Scatter(e) => e.draw_to(target, transform, until),
            PictureEvent::Gradient(e) => e.draw_to(target, transform),
            PictureEvent::BufferAdd(_) | PictureEvent::BufferRemove(_) => {}
        }
    }

    /// Region this event can touch under `transform`, limited to `clip`.
    pub fn bounding_box(&mut self, clip: &Rect, transform: &AffineTransform) -> Rect {
        match self {
            PictureEvent::Brush(e) => e.bounding_box(clip, transform),
            PictureEvent::Scatter(e) => e.bounding_box(clip, transform),
            PictureEvent::Gradient(e) => e.bounding_box(clip, transform),
            PictureEvent::BufferAdd(_) | PictureEvent::BufferRemove(_) => Rect::empty(),
        }
    }
}

// ============================================================================
// REPLAY ORDER
// ============================================================================

/// Indices of `events` in replay order: sessions in order of first
/// appearance, events inside a session by ascending `session_event_id`.
/// Stable for equal ids.
pub fn replay_order(events: &[PictureEvent]) -> Vec<usize> {
    let mut session_rank: HashMap<u32, usize> = HashMap::new();
    for event in events {
        let next = session_rank.len();
        session_rank.entry(event.id().sid).or_insert(next);
    }
    let mut order: Vec<usize> = (0..events.len()).collect();
    order.sort_by_key(|&i| {
        let id = events[i].id();
        (session_rank[&id.sid], id.session_event_id)
    });
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_errors_are_typed() {
        assert_eq!(PictureEvent::parse("   ").unwrap_err(), EventParseError::Empty);
        assert_eq!(
            PictureEvent::parse("smudge 1 2 0").unwrap_err(),
            EventParseError::UnknownType("smudge".into())
        );
        assert_eq!(
            PictureEvent::parse("brush 1").unwrap_err(),
            EventParseError::MissingField("session_event_id")
        );
        assert!(matches!(
            PictureEvent::parse("brush 1 2 0 0 0 0 0.5 1 4 0 1 99 0 0 0 1").unwrap_err(),
            EventParseError::UnknownBlendMode(99)
        ));
        assert_eq!(
            PictureEvent::parse("brush 1 2 0 0 0 0 0.5 1 4 0 1 1 0 0 0").unwrap_err(),
            EventParseError::CoordinateCount { stride: 3, count: 2 }
        );
        assert!(matches!(
            PictureEvent::parse("bufferRemove 1 2 x 3").unwrap_err(),
            EventParseError::InvalidNumber { field: "undone", .. }
        ));
    }

    #[test]
    fn every_type_survives_a_text_round_trip() {
        let lines = [
            "brush 0 1 0 255 128 0 0.78 0.9 25 0 1 1 0 0 0 1 100 0 0.5",
            "scatter 0 2 1 10 20 30 1 8 3 0 2 0 5 5 4 0.5 1.25",
            "gradient 1 1 0 0 0 255 0.5 3 2 0 0 10 20",
            "bufferAdd 0 3 0 7 1 255 255 255 0 1 2",
            "bufferRemove 0 4 0 7",
        ];
        for line in lines {
            let event = PictureEvent::parse(line).unwrap();
            assert_eq!(event.serialize(1.0), line);
        }
    }

    #[test]
    fn replay_order_groups_sessions_by_first_appearance() {
        let lines = [
            "bufferRemove 5 2 0 1",
            "bufferRemove 3 1 0 1",
            "bufferRemove 5 1 0 1",
            "bufferRemove 3 0 0 1",
        ];
        let events: Vec<PictureEvent> =
            lines.iter().map(|l| PictureEvent::parse(l).unwrap()).collect();
        assert_eq!(replay_order(&events), vec![2, 0, 3, 1]);
    }

    #[test]
    fn seed_packs_both_ids() {
        assert_eq!(EventId::new(1, 2).seed(), (1u64 << 32) | 2);
        assert!(EventId::new(1, 9) < EventId::new(2, 0));
    }
}
