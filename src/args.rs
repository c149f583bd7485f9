use clap::Parser;
use std::path::PathBuf;

use rusty_gestures::config::{AppConfig, FaceBackend};
use rusty_gestures::types::{Rect, ScreenSize};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Directory of recorded frames (png/jpg/bmp), replayed in name order
    #[arg(short, long)]
    pub frames: Option<PathBuf>,

    /// Configuration file (created with defaults if missing)
    #[arg(short, long, default_value = AppConfig::DEFAULT_PATH)]
    pub config: PathBuf,

    /// Replay rate in frames per second
    #[arg(long, default_value_t = 30.0)]
    pub fps: f32,

    /// Fraction trimmed from each side of every frame (0.2 keeps the middle 60%)
    #[arg(long, default_value_t = 0.0)]
    pub crop: f32,

    /// Target screen size, e.g. 1920x1080 (overrides the config)
    #[arg(long, value_parser = parse_screen)]
    pub screen: Option<ScreenSize>,

    /// Region of interest as x,y,w,h in screen pixels; repeat for more
    #[arg(long = "roi", value_parser = parse_rect)]
    pub rois: Vec<Rect>,

    /// Fixation threshold in seconds, 0.0 to 1.0
    #[arg(long)]
    pub threshold: Option<f32>,

    /// Hit-test tolerance radius in pixels, 1 to 500
    #[arg(long)]
    pub radius: Option<u32>,

    /// Grace period in milliseconds
    #[arg(long)]
    pub grace_ms: Option<u64>,

    /// Face locator backend
    #[arg(long, value_enum)]
    pub backend: Option<FaceBackend>,

    /// Skip the models and sweep a synthetic gaze path
    #[arg(long)]
    pub simulate: bool,

    /// Length of the simulated session in seconds (without --frames)
    #[arg(long, default_value_t = 10.0)]
    pub duration: f32,

    /// Also print dwell progress events
    #[arg(long)]
    pub progress: bool,
}

fn parse_screen(s: &str) -> Result<ScreenSize, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
    let w = w.trim().parse::<u32>().map_err(|e| e.to_string())?;
    let h = h.trim().parse::<u32>().map_err(|e| e.to_string())?;
    ScreenSize::new(w, h).map_err(|e| e.to_string())
}

fn parse_rect(s: &str) -> Result<Rect, String> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<f32>().map_err(|e| format!("'{v}': {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    match values.as_slice() {
        [x, y, w, h] => Ok(Rect::new(*x, *y, *w, *h)),
        _ => Err(format!("expected x,y,w,h, got '{s}'")),
    }
}
