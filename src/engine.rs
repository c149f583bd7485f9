//! The pipeline owner.
//!
//! [`GestureEngine`] holds the frame pipeline, the ROI set, the fixation
//! state and the listeners. Everything that mutates ROIs or settings from
//! another thread goes through an [`EngineHandle`], whose commands are
//! applied at the start of the next pump so a hit test never sees a
//! half-applied change.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::GestureError;
use crate::events::EventDispatcher;
use crate::fixation::{FixationEvent, FixationTracker};
use crate::pipeline::{FrameOutcome, Pipeline};
use crate::roi::{Roi, RoiEvent, RoiId, RoiManager};
use crate::settings::{FixationThreshold, GracePeriod, ToleranceRadius, TrackerSettings};
use crate::source::{FrameSource, FrameSourceError};
use crate::types::{Frame, GazePoint, Rect};

type Reply<T> = Sender<Result<T, GestureError>>;

/// Queued mutation, applied between frames.
#[derive(Debug)]
pub enum Command {
    AddRoi { rect: Rect, reply: Option<Reply<RoiId>> },
    RemoveRoi { id: RoiId, reply: Option<Reply<()>> },
    ClearRois,
    SetFixationThreshold(FixationThreshold),
    SetToleranceRadius(ToleranceRadius),
    SetGracePeriod(GracePeriod),
}

/// Cloneable, `Send` front door for UI threads.
///
/// Setting values are validated here, so an out-of-range value is rejected
/// before it is queued and the engine keeps its previous setting.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: Sender<Command>,
}

impl EngineHandle {
    pub fn send(&self, command: Command) -> Result<(), GestureError> {
        self.tx.send(command).map_err(|_| GestureError::Disconnected)
    }

    /// Queue an ROI; the id arrives on the returned receiver once the engine
    /// has applied the command.
    pub fn add_roi(&self, rect: Rect) -> Result<Receiver<Result<RoiId, GestureError>>, GestureError> {
        let (reply, rx) = channel();
        self.send(Command::AddRoi { rect, reply: Some(reply) })?;
        Ok(rx)
    }

    pub fn remove_roi(&self, id: RoiId) -> Result<Receiver<Result<(), GestureError>>, GestureError> {
        let (reply, rx) = channel();
        self.send(Command::RemoveRoi { id, reply: Some(reply) })?;
        Ok(rx)
    }

    pub fn clear_rois(&self) -> Result<(), GestureError> {
        self.send(Command::ClearRois)
    }

    pub fn set_fixation_threshold(&self, seconds: f32) -> Result<(), GestureError> {
        self.send(Command::SetFixationThreshold(FixationThreshold::new(seconds)?))
    }

    pub fn set_tolerance_radius(&self, pixels: u32) -> Result<(), GestureError> {
        self.send(Command::SetToleranceRadius(ToleranceRadius::new(pixels)?))
    }

    pub fn set_grace_period_ms(&self, ms: u64) -> Result<(), GestureError> {
        self.send(Command::SetGracePeriod(GracePeriod::from_millis(ms)?))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub frames: u64,
    pub gaze_points: u64,
    pub detection_misses: u64,
    pub estimation_failures: u64,
    /// Pipeline errors downgraded to dropped samples.
    pub backend_errors: u64,
    /// Frame source timeouts.
    pub timeouts: u64,
    pub activations: u64,
    pub deactivations: u64,
}

/// Stream position at the last sample, used to place frames that never
/// arrived.
#[derive(Debug, Clone, Copy)]
struct StreamClock {
    timestamp: Duration,
    /// Last positive gap between consecutive samples.
    interval: Duration,
    seen_at: Instant,
}

impl StreamClock {
    fn advance(previous: Option<StreamClock>, timestamp: Duration) -> StreamClock {
        let interval = previous
            .and_then(|p| timestamp.checked_sub(p.timestamp).filter(|d| !d.is_zero()).or(Some(p.interval)))
            .unwrap_or_default();
        StreamClock { timestamp, interval, seen_at: Instant::now() }
    }

    /// Where a missing frame sits: one interval on, or the wall time since
    /// the last sample if the stall has been longer than that.
    fn next_missing(&self) -> Duration {
        self.timestamp + self.interval.max(self.seen_at.elapsed())
    }
}

/// What one pump produced.
#[derive(Debug, Clone, PartialEq)]
pub struct PumpReport {
    /// `None` when the pipeline backend failed on this frame.
    pub outcome: Option<FrameOutcome>,
    pub hits: Vec<RoiId>,
    pub events: Vec<FixationEvent>,
}

pub struct GestureEngine {
    pipeline: Box<dyn Pipeline + Send>,
    rois: RoiManager,
    tracker: FixationTracker,
    settings: TrackerSettings,
    events: EventDispatcher<FixationEvent>,
    commands: Receiver<Command>,
    handle: EngineHandle,
    stats: EngineStats,
    clock: Option<StreamClock>,
}

impl GestureEngine {
    pub fn new(pipeline: Box<dyn Pipeline + Send>, rois: RoiManager, settings: TrackerSettings) -> Self {
        let (tx, commands) = channel();
        info!(
            pipeline = %pipeline.name(),
            threshold_s = settings.fixation_threshold.seconds(),
            radius_px = settings.tolerance_radius.pixels(),
            grace_ms = settings.grace_period.as_duration().as_millis() as u64,
            "engine ready"
        );
        Self {
            pipeline,
            rois,
            tracker: FixationTracker::new(settings.fixation_threshold, settings.grace_period),
            settings,
            events: EventDispatcher::new(),
            commands,
            handle: EngineHandle { tx },
            stats: EngineStats::default(),
            clock: None,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    pub fn pipeline_name(&self) -> String {
        self.pipeline.name()
    }

    pub fn settings(&self) -> TrackerSettings {
        self.settings
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn rois(&self) -> &RoiManager {
        &self.rois
    }

    pub fn tracker(&self) -> &FixationTracker {
        &self.tracker
    }

    /// Listeners for `Progress`/`Activated`/`Deactivated`.
    pub fn events_mut(&mut self) -> &mut EventDispatcher<FixationEvent> {
        &mut self.events
    }

    /// Listeners for ROI `Created`/`Removed`.
    pub fn roi_events_mut(&mut self) -> &mut EventDispatcher<RoiEvent> {
        self.rois.events_mut()
    }

    pub fn list_rois(&self) -> Vec<Roi> {
        self.rois.list_all()
    }

    pub fn add_roi(&mut self, rect: Rect) -> Result<RoiId, GestureError> {
        self.rois.add(rect)
    }

    /// Removes the ROI and its fixation state; an active ROI reports
    /// `Deactivated` on the way out.
    pub fn remove_roi(&mut self, id: RoiId) -> Result<(), GestureError> {
        self.rois.remove(id)?;
        if let Some(event) = self.tracker.forget(id) {
            self.emit(vec![event]);
        }
        Ok(())
    }

    /// Session reset: drops every ROI and all fixation state.
    pub fn clear_rois(&mut self) {
        self.rois.clear();
        let events = self.tracker.reset();
        self.emit(events);
    }

    pub fn set_fixation_threshold(&mut self, threshold: FixationThreshold) {
        info!(seconds = threshold.seconds(), "fixation threshold set");
        self.settings.fixation_threshold = threshold;
        self.tracker.set_threshold(threshold);
    }

    pub fn set_tolerance_radius(&mut self, radius: ToleranceRadius) {
        info!(pixels = radius.pixels(), "tolerance radius set");
        self.settings.tolerance_radius = radius;
    }

    pub fn set_grace_period(&mut self, grace: GracePeriod) {
        info!(ms = grace.as_duration().as_millis() as u64, "grace period set");
        self.settings.grace_period = grace;
        self.tracker.set_grace_period(grace);
    }

    /// Drain the command queue. Returns how many commands were applied.
    pub fn apply_commands(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(command) = self.commands.try_recv() {
            self.apply(command);
            applied += 1;
        }
        applied
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::AddRoi { rect, reply } => {
                let result = self.add_roi(rect);
                if let Err(e) = &result {
                    warn!(error = %e, "queued ROI rejected");
                }
                respond(reply, result);
            }
            Command::RemoveRoi { id, reply } => {
                let result = self.remove_roi(id);
                if let Err(e) = &result {
                    debug!(error = %e, "queued remove ignored");
                }
                respond(reply, result);
            }
            Command::ClearRois => self.clear_rois(),
            Command::SetFixationThreshold(t) => self.set_fixation_threshold(t),
            Command::SetToleranceRadius(r) => self.set_tolerance_radius(r),
            Command::SetGracePeriod(g) => self.set_grace_period(g),
        }
    }

    /// One frame through the whole chain: pending commands, pipeline, hit
    /// test, one tracker update, listener dispatch.
    pub fn pump(&mut self, frame: &Frame) -> PumpReport {
        self.apply_commands();
        self.stats.frames += 1;

        let outcome = match self.pipeline.process(frame) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(error = %e, t_ms = frame.timestamp.as_millis() as u64, "pipeline error, frame dropped");
                self.stats.backend_errors += 1;
                None
            }
        };

        match &outcome {
            Some(FrameOutcome::Gaze(_)) => self.stats.gaze_points += 1,
            Some(FrameOutcome::DetectionMiss) => self.stats.detection_misses += 1,
            Some(FrameOutcome::EstimationFailure(_)) => self.stats.estimation_failures += 1,
            None => {}
        }

        let gaze = outcome.as_ref().and_then(FrameOutcome::gaze);
        let (hits, events) = self.track(gaze, frame.timestamp);
        PumpReport { outcome, hits, events }
    }

    /// Feed a gaze sample produced elsewhere (`None` is a dropped sample).
    /// Pending commands are applied first, as in [`pump`](Self::pump).
    pub fn submit_sample(
        &mut self,
        gaze: Option<GazePoint>,
        timestamp: Duration,
    ) -> (Vec<RoiId>, Vec<FixationEvent>) {
        self.apply_commands();
        self.track(gaze, timestamp)
    }

    /// A frame the source failed to deliver in time. It is a dropped sample
    /// at the estimated stream time, so grace keeps running on every tracked
    /// ROI while the source stalls. Before the first sample there is no
    /// stream time and only the counter moves.
    pub fn skip_frame(&mut self) -> Vec<FixationEvent> {
        self.stats.timeouts += 1;
        let Some(clock) = self.clock else {
            return Vec::new();
        };
        self.apply_commands();
        let timestamp = clock.next_missing();
        let (_, events) = self.track(None, timestamp);
        events
    }

    fn track(&mut self, gaze: Option<GazePoint>, timestamp: Duration) -> (Vec<RoiId>, Vec<FixationEvent>) {
        self.clock = Some(StreamClock::advance(self.clock, timestamp));
        let radius = self.settings.tolerance_radius.pixels() as f32;
        let hits = gaze
            .map(|g| self.rois.hit_test(&g, radius))
            .unwrap_or_default();
        if !hits.is_empty() {
            debug!(?hits, t_ms = timestamp.as_millis() as u64, "gaze hit");
        }

        let events = self.tracker.update(timestamp, &hits);
        self.emit(events.clone());
        (hits, events)
    }

    fn emit(&mut self, events: Vec<FixationEvent>) {
        for event in &events {
            match event {
                FixationEvent::Activated(_) => self.stats.activations += 1,
                FixationEvent::Deactivated(_) => self.stats.deactivations += 1,
                FixationEvent::Progress { .. } => {}
            }
        }
        self.events.dispatch_all(&events);
    }

    /// Pump frames until the source is exhausted, disconnects or `stop` is
    /// raised. Timeouts are dropped frames (see [`skip_frame`](Self::skip_frame)). Stopping happens between
    /// frames, never inside a tracker update.
    pub fn run(&mut self, source: &mut dyn FrameSource, stop: &AtomicBool) -> Result<EngineStats, FrameSourceError> {
        info!(pipeline = %self.pipeline.name(), "starting");
        while !stop.load(Ordering::Relaxed) {
            match source.next_frame() {
                Ok(Some(frame)) => {
                    self.pump(&frame);
                }
                Ok(None) => {
                    debug!("frame source exhausted");
                    break;
                }
                Err(FrameSourceError::Timeout) => {
                    debug!("frame timeout");
                    self.skip_frame();
                }
                Err(e) => {
                    warn!(error = %e, "frame source failed");
                    return Err(e);
                }
            }
        }
        info!(frames = self.stats.frames, activations = self.stats.activations, "stopped");
        Ok(self.stats)
    }
}

fn respond<T>(reply: Option<Reply<T>>, result: Result<T, GestureError>) {
    if let Some(reply) = reply {
        // The requester may have stopped waiting.
        let _ = reply.send(result);
    }
}
