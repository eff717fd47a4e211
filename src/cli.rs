// ============================================================================
// brushstack CLI — headless history replay via command-line arguments
// ============================================================================
//
// Usage examples:
//   brushstack -i session.txt -o session.png --width 800 --height 600
//   brushstack -i "histories/*.txt" --output-dir renders/ --width 1024 --height 768
//   brushstack -i a.txt b.txt --output-dir out/ --backend batched --scale 0.5
//
// Every input is loaded, replayed in history order into a fresh picture and
// flattened over the background colour into a PNG.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use crate::io::{HistoryError, export_png, load_history};
use crate::picture::Picture;
use crate::raster::RasterizerBackend;
use crate::settings::RenderSettings;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// brushstack headless history renderer.
#[derive(Parser, Debug)]
#[command(
    name = "brushstack",
    about = "Replay paint event histories into PNG images",
    long_about = "Load event history files, replay every brush, scatter and gradient\n\
                  event into a layered picture and write the flattened result as PNG.\n\n\
                  Example:\n  \
                  brushstack -i session.txt -o session.png --width 800 --height 600\n  \
                  brushstack -i \"*.txt\" --output-dir renders/ --width 800 --height 600"
)]
pub struct CliArgs {
    /// History file(s). Glob patterns accepted (e.g. "*.txt", "sessions/*.txt").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Output PNG path. Only valid for single-file input.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output directory for batch rendering.
    /// Files are written here with the history file's stem and a .png extension.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Picture width in event units.
    #[arg(long, value_name = "W")]
    pub width: u32,

    /// Picture height in event units.
    #[arg(long, value_name = "H")]
    pub height: u32,

    /// Settings file (key=value). Defaults are used when omitted.
    #[arg(long, value_name = "FILE")]
    pub settings: Option<PathBuf>,

    /// Rasterizer backend: software or batched. Overrides the settings file.
    #[arg(long, value_name = "NAME")]
    pub backend: Option<String>,

    /// Output pixels per event unit. Overrides the settings file.
    #[arg(long, value_name = "S")]
    pub scale: Option<f64>,

    /// Print per-file timing and mirror log lines to stderr.
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    /// Settings file (or defaults) with the command-line overrides applied.
    pub fn render_settings(&self) -> Result<RenderSettings, String> {
        let mut settings = match &self.settings {
            Some(path) => {
                if !path.exists() {
                    return Err(format!("settings file '{}' does not exist", path.display()));
                }
                RenderSettings::load_from(path)
            }
            None => RenderSettings::default(),
        };
        if let Some(name) = &self.backend {
            settings.backend = RasterizerBackend::from_name(name)
                .ok_or_else(|| format!("unknown backend '{}' (expected software or batched)", name))?;
        }
        if let Some(scale) = self.scale {
            if !(scale > 0.0 && scale.is_finite()) {
                return Err(format!("scale must be positive, got {}", scale));
            }
            settings.bitmap_scale = scale;
        }
        Ok(settings)
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Render every input and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs) -> ExitCode {
    if args.width == 0 || args.height == 0 {
        eprintln!("error: --width and --height must be greater than zero.");
        return ExitCode::FAILURE;
    }

    let settings = match args.render_settings() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    if inputs.len() > 1 && args.output.is_some() && args.output_dir.is_none() {
        eprintln!(
            "error: {} input files given but --output only accepts a single file path.\n\
             Use --output-dir to specify a destination directory for batch rendering.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    if let Some(dir) = &args.output_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!("error: could not create output directory '{}': {}", dir.display(), e);
        return ExitCode::FAILURE;
    }

    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }
        let file_start = Instant::now();

        let Some(output_path) = build_output_path(input_path, args.output.as_deref(), args.output_dir.as_deref())
        else {
            eprintln!("  error: cannot determine output path for '{}'.", input_path.display());
            any_failure = true;
            continue;
        };

        match render_one(input_path, &output_path, args.width, args.height, &settings) {
            Ok(event_count) => {
                crate::log_info!("cli: {} -> {} ({} events)", input_path.display(), output_path.display(), event_count);
                if args.verbose || multi {
                    println!(
                        "  → {} ({} events, {:.0}ms)",
                        output_path.display(),
                        event_count,
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => {
                crate::log_err!("cli: {} failed: {}", input_path.display(), e);
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

// ============================================================================
// Per-file pipeline
// ============================================================================

fn render_one(
    input: &Path,
    output: &Path,
    width: u32,
    height: u32,
    settings: &RenderSettings,
) -> Result<usize, HistoryError> {
    let events = load_history(input)?;
    let count = events.len();
    let mut picture = Picture::from_history(width, height, settings, events);
    export_png(&picture.render(), output)?;
    Ok(count)
}

// ============================================================================
// Helpers
// ============================================================================

/// Literal paths and glob matches, in argument order, without duplicates.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut inputs: Vec<PathBuf> = Vec::new();
    for pattern in patterns {
        let literal = PathBuf::from(pattern);
        let found = if literal.is_file() { vec![literal] } else { expand_glob(pattern) };
        for path in found {
            if !inputs.contains(&path) {
                inputs.push(path);
            }
        }
    }
    inputs
}

/// Files matching `pattern`, sorted.  Bad or empty patterns only warn.
fn expand_glob(pattern: &str) -> Vec<PathBuf> {
    let entries = match glob::glob(pattern) {
        Ok(entries) => entries,
        Err(e) => {
            eprintln!("warning: invalid glob '{}': {}", pattern, e);
            crate::log_warn!("cli: invalid glob '{}': {}", pattern, e);
            return Vec::new();
        }
    };
    let mut found: Vec<PathBuf> = entries.flatten().filter(|p| p.is_file()).collect();
    found.sort();
    if found.is_empty() {
        eprintln!("warning: '{}' matched no history files.", pattern);
    }
    found
}

/// Output path for one history file.
///
/// Priority:
/// 1. `--output` (explicit path, single-file input)
/// 2. `--output-dir` (input stem + `.png`)
/// 3. Next to the input, same stem, `.png`
fn build_output_path(input: &Path, output: Option<&Path>, output_dir: Option<&Path>) -> Option<PathBuf> {
    if let Some(out) = output {
        return Some(out.to_path_buf());
    }
    let stem = input.file_stem()?.to_string_lossy().into_owned();
    if let Some(dir) = output_dir {
        return Some(dir.join(format!("{}.png", stem)));
    }
    let parent = input.parent().unwrap_or(Path::new("."));
    let candidate = parent.join(format!("{}.png", stem));
    if candidate == input {
        Some(parent.join(format!("{}_out.png", stem)))
    } else {
        Some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["brushstack", "-i", "a.txt", "--width", "10", "--height", "20"];
        argv.extend_from_slice(extra);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn overrides_apply_over_defaults() {
        let s = args(&["--backend", "batched", "--scale", "2"]).render_settings().unwrap();
        assert_eq!(s.backend, RasterizerBackend::Batched);
        assert_eq!(s.bitmap_scale, 2.0);
        assert!(args(&["--backend", "opengl"]).render_settings().is_err());
        assert!(args(&["--scale", "0"]).render_settings().is_err());
    }

    #[test]
    fn size_is_required() {
        assert!(CliArgs::try_parse_from(["brushstack", "-i", "a.txt"]).is_err());
    }

    #[test]
    fn inputs_expand_and_deduplicate() {
        let dir = std::env::temp_dir().join(format!("brushstack-cli-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        for name in ["b.txt", "a.txt", "c.png"] {
            std::fs::write(dir.join(name), "").unwrap();
        }
        let pattern = dir.join("*.txt").to_string_lossy().into_owned();
        let literal = dir.join("b.txt").to_string_lossy().into_owned();
        let inputs = resolve_inputs(&[literal, pattern]);
        let _ = std::fs::remove_dir_all(&dir);
        assert_eq!(inputs, vec![dir.join("b.txt"), dir.join("a.txt")]);
    }

    #[test]
    fn output_path_priority() {
        let input = Path::new("dir/session.txt");
        assert_eq!(build_output_path(input, Some(Path::new("x.png")), None), Some(PathBuf::from("x.png")));
        assert_eq!(
            build_output_path(input, None, Some(Path::new("out"))),
            Some(PathBuf::from("out/session.png"))
        );
        assert_eq!(build_output_path(input, None, None), Some(PathBuf::from("dir/session.png")));
        assert_eq!(
            build_output_path(Path::new("dir/session.png"), None, None),
            Some(PathBuf::from("dir/session_out.png"))
        );
    }
}
