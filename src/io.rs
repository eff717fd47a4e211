// ============================================================================
// HISTORY FILES & EXPORT
// ============================================================================
//
// A history file is UTF-8 text with one event per line in the event text
// format.  `#` starts a comment line; blank lines are ignored.  Lines that do
// not parse are logged and skipped so one bad line never loses a picture.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use image::RgbaImage;

use crate::events::{EventParseError, PictureEvent};

#[derive(Debug)]
pub enum HistoryError {
    Io(std::io::Error),
    Parse { line: usize, error: EventParseError },
    Image(String),
}

impl std::fmt::Display for HistoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistoryError::Io(e) => write!(f, "I/O error: {}", e),
            HistoryError::Parse { line, error } => write!(f, "line {}: {}", line, error),
            HistoryError::Image(e) => write!(f, "Image error: {}", e),
        }
    }
}

impl std::error::Error for HistoryError {}

impl From<std::io::Error> for HistoryError {
    fn from(e: std::io::Error) -> Self {
        HistoryError::Io(e)
    }
}

impl From<image::ImageError> for HistoryError {
    fn from(e: image::ImageError) -> Self {
        HistoryError::Image(e.to_string())
    }
}

// ============================================================================
// LOADING
// ============================================================================

/// Parse history text, failing on the first bad line.
pub fn parse_history_strict(text: &str) -> Result<Vec<PictureEvent>, HistoryError> {
    let mut events = Vec::new();
    for (n, line) in history_lines(text) {
        let event = PictureEvent::parse(line).map_err(|error| HistoryError::Parse { line: n, error })?;
        events.push(event);
    }
    Ok(events)
}

/// Parse history text, logging and skipping lines that do not parse.
pub fn parse_history(text: &str) -> Vec<PictureEvent> {
    let mut events = Vec::new();
    let mut skipped = 0usize;
    for (n, line) in history_lines(text) {
        match PictureEvent::parse(line) {
            Ok(event) => events.push(event),
            Err(e) => {
                crate::log_warn!("history: line {} skipped: {}", n, e);
                skipped += 1;
            }
        }
    }
    if skipped > 0 {
        crate::log_warn!("history: {} of {} lines skipped", skipped, skipped + events.len());
    }
    events
}

pub fn load_history(path: &Path) -> Result<Vec<PictureEvent>, HistoryError> {
    let text = std::fs::read_to_string(path)?;
    let events = parse_history(&text);
    crate::log_info!("history: loaded {} events from {}", events.len(), path.display());
    Ok(events)
}

/// Numbered (1-based) event lines, without comments and blanks.
fn history_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
}

// ============================================================================
// SAVING
// ============================================================================

/// History text for `events`, coordinates multiplied by `scale`.
pub fn history_to_string(events: &[PictureEvent], scale: f64) -> String {
    let mut out = String::new();
    for event in events {
        out.push_str(&event.serialize(scale));
        out.push('\n');
    }
    out
}

pub fn save_history(events: &[PictureEvent], scale: f64, path: &Path) -> Result<(), HistoryError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "# brushstack history, {} events", events.len())?;
    writer.write_all(history_to_string(events, scale).as_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Write a flattened picture as PNG.
pub fn export_png(image: &RgbaImage, path: &Path) -> Result<(), HistoryError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    image.save_with_format(path, image::ImageFormat::Png)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HISTORY: &str = "\
# two layers and a stroke
bufferAdd 0 1 0 0 0 255 255 255 255 1 0

bufferAdd 0 2 0 1 1 0 0 0 0 1 1
brush 0 3 0 255 0 0 0.5 1 4 0 1 1 1 0 0 1 10 10 0.25
smudge 0 4 0 1 2 3
";

    #[test]
    fn lenient_parse_skips_bad_lines() {
        let events = parse_history(HISTORY);
        assert_eq!(events.len(), 3);
        assert!(matches!(events[2], PictureEvent::Brush(_)));
    }

    #[test]
    fn strict_parse_reports_the_line() {
        match parse_history_strict(HISTORY) {
            Err(HistoryError::Parse { line, error }) => {
                assert_eq!(line, 6);
                assert_eq!(error, EventParseError::UnknownType("smudge".into()));
            }
            other => panic!("expected a parse error, got {:?}", other),
        }
    }

    #[test]
    fn saved_history_loads_back() {
        let events = parse_history(HISTORY);
        let path = std::env::temp_dir().join(format!("brushstack-io-{}.txt", std::process::id()));
        save_history(&events, 1.0, &path).unwrap();
        let loaded = load_history(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(history_to_string(&loaded, 1.0), history_to_string(&events, 1.0));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let path = std::env::temp_dir().join("brushstack-no-such-history.txt");
        assert!(matches!(load_history(&path), Err(HistoryError::Io(_))));
    }
}
