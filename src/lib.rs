// ============================================================================
// brushstack — event-sourced painting core
// ============================================================================
//
// Architecture:
//   geometry    — Vec2, Rect, AffineTransform
//   color       — flow/alpha normalization, u8 <-> unit channel helpers
//   brush       — tip settings and the stamp-placing tip mover
//   raster      — coverage rasterizers (software, batched, bounding box)
//   events      — picture history events, text format, replay order
//   compositor  — blend modes, layers, coverage merge, layer flattening
//   picture     — layers + history + in-flight event
//   io          — history files and PNG export
//   settings    — persisted render settings
//   cli         — headless replay front end
//   logger      — per-session log file
// ============================================================================

pub mod logger;

pub mod brush;
pub mod cli;
pub mod color;
pub mod compositor;
pub mod events;
pub mod geometry;
pub mod io;
pub mod picture;
pub mod raster;
pub mod settings;

pub use compositor::{BlendMode, Layer};
pub use events::{EventId, PictureEvent};
pub use picture::Picture;
pub use settings::RenderSettings;
