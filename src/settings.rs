use std::path::Path;

use crate::raster::{DEFAULT_CIRCLE_BATCH_SIZE, RasterizerBackend};

/// Rendering settings that persist across runs, stored as `key=value` lines.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderSettings {
    pub backend: RasterizerBackend,
    /// Stamps per pass of the batched backend.
    pub circle_batch_size: usize,
    /// Output pixels per event unit.
    pub bitmap_scale: f64,
    /// Colour drawn under the layer stack on export.  Alpha 0 keeps the
    /// image transparent.
    pub background: [u8; 4],
    pub log_to_file: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            backend: RasterizerBackend::Software,
            circle_batch_size: DEFAULT_CIRCLE_BATCH_SIZE,
            bitmap_scale: 1.0,
            background: [255, 255, 255, 255],
            log_to_file: true,
        }
    }
}

impl RenderSettings {
    /// Load settings (returns defaults if the file is missing; bad values
    /// fall back one key at a time).
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else { return Self::default() };
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            match key {
                "backend" => match RasterizerBackend::from_name(val) {
                    Some(b) => s.backend = b,
                    None => {
                        crate::log_warn!("settings: unknown backend '{}', using {}", val, s.backend.name());
                    }
                },
                "circle_batch_size" => {
                    s.circle_batch_size = val
                        .parse()
                        .ok()
                        .filter(|&n: &usize| n > 0)
                        .unwrap_or(DEFAULT_CIRCLE_BATCH_SIZE);
                }
                "bitmap_scale" => {
                    s.bitmap_scale = val
                        .parse()
                        .ok()
                        .filter(|&v: &f64| v > 0.0 && v.is_finite())
                        .unwrap_or(1.0);
                }
                "background" => {
                    if let Some(c) = str_to_color(val) {
                        s.background = c;
                    }
                }
                "log_to_file" => {
                    s.log_to_file = val == "true";
                }
                _ => {
                    crate::log_warn!("settings: ignoring unknown key '{}'", key);
                }
            }
        }
        s
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "backend={}\n\
             circle_batch_size={}\n\
             bitmap_scale={}\n\
             background={}\n\
             log_to_file={}\n",
            self.backend.name(),
            self.circle_batch_size,
            self.bitmap_scale,
            color_to_str(self.background),
            self.log_to_file,
        )
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_config_string())
    }
}

/// "r,g,b,a"
fn color_to_str(c: [u8; 4]) -> String {
    format!("{},{},{},{}", c[0], c[1], c[2], c[3])
}

fn str_to_color(s: &str) -> Option<[u8; 4]> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 4 {
        return None;
    }
    let mut c = [0u8; 4];
    for (slot, part) in c.iter_mut().zip(&parts) {
        *slot = part.trim().parse().ok()?;
    }
    Some(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_text_round_trips() {
        let s = RenderSettings {
            backend: RasterizerBackend::Batched,
            circle_batch_size: 6,
            bitmap_scale: 0.5,
            background: [1, 2, 3, 0],
            log_to_file: false,
        };
        assert_eq!(RenderSettings::parse(&s.to_config_string()), s);
    }

    #[test]
    fn bad_values_fall_back_per_key() {
        let s = RenderSettings::parse(
            "backend=vulkan\ncircle_batch_size=0\nbitmap_scale=-2\nbackground=1,2\n# comment\nnonsense\n",
        );
        assert_eq!(s, RenderSettings::default());

        let s = RenderSettings::parse("backend = hardware\nbitmap_scale=2");
        assert_eq!(s.backend, RasterizerBackend::Batched);
        assert_eq!(s.bitmap_scale, 2.0);
    }

    #[test]
    fn saved_file_loads_back() {
        let dir = std::env::temp_dir().join(format!("brushstack-settings-{}", std::process::id()));
        let path = dir.join("render.cfg");
        let s = RenderSettings { circle_batch_size: 3, log_to_file: false, ..RenderSettings::default() };
        s.save_to(&path).unwrap();
        let loaded = RenderSettings::load_from(&path);
        let _ = std::fs::remove_dir_all(&dir);
        assert_eq!(loaded, s);
    }

    #[test]
    fn unknown_keys_and_backends_are_skipped() {
        let s = RenderSettings::parse("colour=red\nbackend=metal\ncircle_batch_size=8\n");
        assert_eq!(s.backend, RasterizerBackend::Software);
        assert_eq!(s.circle_batch_size, 8);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("brushstack-no-such-settings.cfg");
        assert_eq!(RenderSettings::load_from(&path), RenderSettings::default());
    }
}
