use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

mod args;

use args::Args;
use rusty_gestures::config::{AppConfig, FaceBackend};
use rusty_gestures::detector::{FaceLocator, FaceSelector, RustfaceLocator};
use rusty_gestures::eyes::EyeRegionResolver;
use rusty_gestures::gaze::PupilGazeEstimator;
use rusty_gestures::landmarks::LandmarkExtractor;
use rusty_gestures::logging::init_tracing;
use rusty_gestures::{
    FixationEvent, Frame, FrameSource, FrameSourceError, GazePipeline, GestureEngine, ImageSequenceSource,
    Pipeline, RoiEvent, RoiManager, SimulatedPipeline,
};

fn create_pipeline(config: &AppConfig, simulate: bool) -> Result<Box<dyn Pipeline + Send>> {
    if simulate {
        return Ok(Box::new(SimulatedPipeline::default()));
    }

    let detection = &config.detection;
    let locator: Box<dyn FaceLocator + Send> = match detection.backend {
        FaceBackend::Rustface => Box::new(RustfaceLocator::new(&detection.face_model, detection.cascade_params())?),
        FaceBackend::Onnx => onnx_face_locator(config)?,
    };

    Ok(Box::new(GazePipeline::new(
        locator,
        FaceSelector::new(detection.selection),
        landmark_extractor(config)?,
        EyeRegionResolver::new(detection.eye_padding),
        Box::new(PupilGazeEstimator::new(config.estimator.clone())),
    )))
}

#[cfg(feature = "onnx")]
fn onnx_face_locator(config: &AppConfig) -> Result<Box<dyn FaceLocator + Send>> {
    use rusty_gestures::detector::OnnxFaceLocator;
    let d = &config.detection;
    Ok(Box::new(OnnxFaceLocator::new(&d.onnx_face_model, d.onnx_score_threshold)?))
}

#[cfg(not(feature = "onnx"))]
fn onnx_face_locator(_config: &AppConfig) -> Result<Box<dyn FaceLocator + Send>> {
    bail!("the onnx face backend needs a build with `--features onnx`")
}

#[cfg(feature = "onnx")]
fn landmark_extractor(config: &AppConfig) -> Result<Box<dyn LandmarkExtractor + Send>> {
    use rusty_gestures::landmarks::OnnxLandmarkExtractor;
    let d = &config.detection;
    Ok(Box::new(OnnxLandmarkExtractor::new(&d.landmark_model, d.landmark_input_size)?))
}

#[cfg(not(feature = "onnx"))]
fn landmark_extractor(_config: &AppConfig) -> Result<Box<dyn LandmarkExtractor + Send>> {
    bail!("landmark extraction needs a build with `--features onnx`; use --simulate to run without models")
}

/// Blank frames at a fixed rate, for `--simulate` without recorded input.
struct BlankFrames {
    next: u32,
    count: u32,
    interval: Duration,
}

impl FrameSource for BlankFrames {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError> {
        if self.next >= self.count {
            return Ok(None);
        }
        let timestamp = self.interval * self.next;
        self.next += 1;
        Ok(Some(Frame::new(image::RgbImage::new(4, 4), timestamp)))
    }
}

fn print_event(event: &FixationEvent, show_progress: bool) {
    match event {
        FixationEvent::Activated(id) => println!("{} {}", "ACTIVATED  ".green().bold(), id),
        FixationEvent::Deactivated(id) => println!("{} {}", "DEACTIVATED".yellow(), id),
        FixationEvent::Progress { roi, fraction } if show_progress => {
            println!("{} {} {:>3.0}%", "progress   ".dimmed(), roi, fraction * 100.0)
        }
        FixationEvent::Progress { .. } => {}
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // 0. Config + logging
    let mut config = AppConfig::load(&args.config)?;
    init_tracing(&config.logging)?;

    if let Some(t) = args.threshold {
        config.tracker.fixation_threshold = t;
    }
    if let Some(r) = args.radius {
        config.tracker.tolerance_radius = r;
    }
    if let Some(g) = args.grace_ms {
        config.tracker.grace_period_ms = g;
    }
    if let Some(b) = args.backend {
        config.detection.backend = b;
    }
    let settings = config.tracker_settings().context("Invalid tracker settings")?;
    let screen = match args.screen {
        Some(s) => s,
        None => config.screen_size()?,
    };

    // 1. Pipeline
    let pipeline = create_pipeline(&config, args.simulate)?;
    println!("Active Pipeline: {}", pipeline.name().cyan());

    // 2. Engine + ROIs
    let mut engine = GestureEngine::new(pipeline, RoiManager::new(screen), settings);
    engine.roi_events_mut().subscribe(|event| {
        if let RoiEvent::Created(roi) = event {
            println!("{} {} {:?}", "ROI        ".blue(), roi.id, roi.rect);
        }
    });
    let show_progress = args.progress;
    engine.events_mut().subscribe(move |event| print_event(event, show_progress));

    for rect in &args.rois {
        engine.add_roi(*rect).with_context(|| format!("Cannot add ROI {:?}", rect))?;
    }
    if engine.rois().is_empty() {
        println!("{}", "No ROIs given (--roi x,y,w,h); gaze will never activate anything.".yellow());
    }

    // 3. Frames
    let mut source: Box<dyn FrameSource> = match (&args.frames, args.simulate) {
        (Some(dir), _) => Box::new(ImageSequenceSource::open(dir, args.fps)?.with_center_crop(args.crop)),
        (None, true) => {
            let fps = args.fps.max(1.0);
            Box::new(BlankFrames {
                next: 0,
                count: (args.duration.max(0.0) * fps) as u32,
                interval: Duration::from_nanos((1e9 / fps as f64).round() as u64),
            })
        }
        (None, false) => bail!("no input: pass --frames DIR, or --simulate"),
    };

    // 4. Loop, until the frames run out or Ctrl-C
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed)).context("Cannot install Ctrl-C handler")?;
    let stats = engine.run(source.as_mut(), &stop)?;

    println!(
        "{} {} frames, {} gaze points, {} activations",
        "Done:".bold(),
        stats.frames,
        stats.gaze_points,
        stats.activations.to_string().green()
    );
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
