//! Per-ROI dwell accumulation.
//!
//! Each ROI the gaze has touched gets a [`FixationState`]. While the gaze
//! stays on it, dwell grows by the time between samples; once the dwell
//! reaches the threshold the ROI goes active and `Activated` fires once.
//! When the gaze leaves, the state is held for the grace period so that a
//! blink or a one-frame jitter does not throw the dwell away; after that the
//! ROI drops back to idle (firing `Deactivated` if it was active).

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use tracing::{debug, info};

use crate::roi::RoiId;
use crate::settings::{FixationThreshold, GracePeriod};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixationStatus {
    Idle,
    Accumulating,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixationState {
    pub accumulated_dwell: Duration,
    /// Time of the last sample that landed on the ROI.
    pub last_sample_time: Duration,
    pub status: FixationStatus,
    /// First off-ROI sample since `last_sample_time`, if any.
    pub left_at: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FixationEvent {
    /// Advisory: `fraction` of the threshold reached, in `[0, 1]`.
    Progress { roi: RoiId, fraction: f32 },
    Activated(RoiId),
    Deactivated(RoiId),
}

impl FixationEvent {
    pub fn roi(&self) -> RoiId {
        match self {
            FixationEvent::Progress { roi, .. } => *roi,
            FixationEvent::Activated(roi) | FixationEvent::Deactivated(roi) => *roi,
        }
    }
}

pub struct FixationTracker {
    threshold: Duration,
    grace: Duration,
    states: BTreeMap<RoiId, FixationState>,
}

impl FixationTracker {
    pub fn new(threshold: FixationThreshold, grace: GracePeriod) -> Self {
        Self {
            threshold: threshold.as_duration(),
            grace: grace.as_duration(),
            states: BTreeMap::new(),
        }
    }

    pub fn set_threshold(&mut self, threshold: FixationThreshold) {
        self.threshold = threshold.as_duration();
    }

    pub fn set_grace_period(&mut self, grace: GracePeriod) {
        self.grace = grace.as_duration();
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn grace_period(&self) -> Duration {
        self.grace
    }

    pub fn state(&self, id: RoiId) -> Option<&FixationState> {
        self.states.get(&id)
    }

    pub fn status(&self, id: RoiId) -> FixationStatus {
        self.states.get(&id).map(|s| s.status).unwrap_or(FixationStatus::Idle)
    }

    pub fn tracked(&self) -> impl Iterator<Item = RoiId> + '_ {
        self.states.keys().copied()
    }

    /// Feed one sample. `matched` holds every ROI the gaze point hit; pass an
    /// empty slice for a dropped sample. All transitions for the sample are
    /// computed first and swapped in together.
    pub fn update(&mut self, timestamp: Duration, matched: &[RoiId]) -> Vec<FixationEvent> {
        let ids: BTreeSet<RoiId> = matched
            .iter()
            .copied()
            .chain(self.states.keys().copied())
            .collect();

        let mut events = Vec::new();
        let mut next = BTreeMap::new();

        for id in ids {
            let prior = self.states.get(&id).copied();
            let inside = matched.contains(&id);
            if let Some(state) = self.step(id, prior, inside, timestamp, &mut events) {
                next.insert(id, state);
            }
        }

        self.states = next;
        events
    }

    /// Drop the state for a removed ROI.
    pub fn forget(&mut self, id: RoiId) -> Option<FixationEvent> {
        match self.states.remove(&id) {
            Some(s) if s.status == FixationStatus::Active => Some(FixationEvent::Deactivated(id)),
            _ => None,
        }
    }

    /// Back to idle everywhere; returns `Deactivated` for every active ROI.
    pub fn reset(&mut self) -> Vec<FixationEvent> {
        std::mem::take(&mut self.states)
            .into_iter()
            .filter(|(_, s)| s.status == FixationStatus::Active)
            .map(|(id, _)| FixationEvent::Deactivated(id))
            .collect()
    }

    fn step(
        &self,
        id: RoiId,
        prior: Option<FixationState>,
        inside: bool,
        now: Duration,
        events: &mut Vec<FixationEvent>,
    ) -> Option<FixationState> {
        let mut prior = prior;

        if let Some(state) = prior.as_mut() {
            if !inside && state.left_at.is_none() {
                state.left_at = Some(now);
            }
            let away = now.saturating_sub(state.last_sample_time);
            if state.left_at.is_some() && away > self.grace {
                debug!(%id, away_ms = away.as_millis() as u64, "grace expired");
                if state.status == FixationStatus::Active {
                    info!(%id, "deactivated");
                    events.push(FixationEvent::Deactivated(id));
                }
                prior = None;
            }
        }

        if !inside {
            return prior;
        }

        let mut state = match prior {
            Some(mut s) => {
                s.accumulated_dwell += now.saturating_sub(s.last_sample_time);
                s.last_sample_time = now;
                s.left_at = None;
                s
            }
            None => FixationState {
                accumulated_dwell: Duration::ZERO,
                last_sample_time: now,
                status: FixationStatus::Accumulating,
                left_at: None,
            },
        };

        if state.status == FixationStatus::Accumulating {
            let fraction = self.fraction(state.accumulated_dwell);
            events.push(FixationEvent::Progress { roi: id, fraction });

            if state.accumulated_dwell >= self.threshold {
                state.status = FixationStatus::Active;
                info!(%id, dwell_ms = state.accumulated_dwell.as_millis() as u64, "activated");
                events.push(FixationEvent::Activated(id));
            }
        }

        Some(state)
    }

    fn fraction(&self, dwell: Duration) -> f32 {
        if self.threshold.is_zero() {
            return 1.0;
        }
        (dwell.as_secs_f32() / self.threshold.as_secs_f32()).min(1.0)
    }
}
