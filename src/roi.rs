use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::error::GestureError;
use crate::events::EventDispatcher;
use crate::types::{GazePoint, Rect, ScreenSize};

/// Opaque ROI identifier. Allocated by [`RoiManager::add`], never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoiId(u64);

impl RoiId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RoiId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "roi-{}", self.0)
    }
}

/// A screen region plus the screen size it was authored against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Roi {
    pub id: RoiId,
    pub rect: Rect,
    pub reference: ScreenSize,
}

impl Roi {
    /// The stored rectangle projected onto `screen`. Never written back.
    pub fn projected(&self, screen: ScreenSize) -> Rect {
        let sx = screen.width as f32 / self.reference.width as f32;
        let sy = screen.height as f32 / self.reference.height as f32;
        self.rect.scale(sx, sy)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoiEvent {
    Created(Roi),
    Removed(Roi),
}

/// Supplies the current primary display size.
pub trait ScreenProvider {
    fn screen_size(&self) -> ScreenSize;
}

impl ScreenProvider for ScreenSize {
    fn screen_size(&self) -> ScreenSize {
        *self
    }
}

/// Screen size that a display watcher can update while the engine runs.
#[derive(Debug, Clone)]
pub struct SharedScreen(Arc<RwLock<ScreenSize>>);

impl SharedScreen {
    pub fn new(size: ScreenSize) -> Self {
        Self(Arc::new(RwLock::new(size)))
    }

    pub fn set(&self, size: ScreenSize) {
        match self.0.write() {
            Ok(mut guard) => *guard = size,
            Err(poisoned) => *poisoned.into_inner() = size,
        }
    }
}

impl ScreenProvider for SharedScreen {
    fn screen_size(&self) -> ScreenSize {
        match self.0.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

pub struct RoiManager {
    rois: BTreeMap<RoiId, Roi>,
    next_id: u64,
    screen: Box<dyn ScreenProvider + Send>,
    events: EventDispatcher<RoiEvent>,
}

impl RoiManager {
    pub fn new(screen: impl ScreenProvider + Send + 'static) -> Self {
        Self {
            rois: BTreeMap::new(),
            next_id: 1,
            screen: Box::new(screen),
            events: EventDispatcher::new(),
        }
    }

    pub fn screen_size(&self) -> ScreenSize {
        self.screen.screen_size()
    }

    /// Listeners for `Created`/`Removed` notifications.
    pub fn events_mut(&mut self) -> &mut EventDispatcher<RoiEvent> {
        &mut self.events
    }

    /// Stores `rect` against the current screen size and returns its id.
    pub fn add(&mut self, rect: Rect) -> Result<RoiId, GestureError> {
        if !rect.is_valid() {
            return Err(GestureError::InvalidRoi(rect));
        }

        let id = RoiId(self.next_id);
        self.next_id += 1;

        let roi = Roi { id, rect, reference: self.screen.screen_size() };
        self.rois.insert(id, roi);
        info!(%id, ?rect, reference = ?roi.reference, "ROI added");

        self.events.dispatch(&RoiEvent::Created(roi));
        Ok(id)
    }

    pub fn remove(&mut self, id: RoiId) -> Result<Roi, GestureError> {
        let roi = self.rois.remove(&id).ok_or(GestureError::UnknownRoi(id))?;
        info!(%id, "ROI removed");
        self.events.dispatch(&RoiEvent::Removed(roi));
        Ok(roi)
    }

    /// Removes every ROI, notifying listeners for each in id order.
    pub fn clear(&mut self) -> Vec<RoiId> {
        let removed = std::mem::take(&mut self.rois);
        for roi in removed.values() {
            self.events.dispatch(&RoiEvent::Removed(*roi));
        }
        if !removed.is_empty() {
            info!(count = removed.len(), "ROIs cleared");
        }
        removed.into_keys().collect()
    }

    /// The ROI as authored (not rescaled).
    pub fn get(&self, id: RoiId) -> Option<&Roi> {
        self.rois.get(&id)
    }

    /// Rectangle of `id` projected onto the current screen.
    pub fn projected(&self, id: RoiId) -> Result<Rect, GestureError> {
        let screen = self.screen.screen_size();
        self.rois
            .get(&id)
            .map(|roi| roi.projected(screen))
            .ok_or(GestureError::UnknownRoi(id))
    }

    /// Every ROI whose projected rectangle, grown by `radius` pixels, holds
    /// the gaze point. Ordered by id.
    pub fn hit_test(&self, point: &GazePoint, radius: f32) -> Vec<RoiId> {
        let screen = self.screen.screen_size();
        let px = point.to_pixels(screen);

        let hits: Vec<RoiId> = self
            .rois
            .values()
            .filter(|roi| roi.projected(screen).expand(radius).contains(&px))
            .map(|roi| roi.id)
            .collect();

        debug!(x = px.x, y = px.y, ?hits, "hit test");
        hits
    }

    pub fn hit_test_one(&self, id: RoiId, point: &GazePoint, radius: f32) -> Result<bool, GestureError> {
        let screen = self.screen.screen_size();
        let rect = self.projected(id)?;
        Ok(rect.expand(radius).contains(&point.to_pixels(screen)))
    }

    /// Snapshot of every ROI in id order, as seen on the current screen.
    ///
    /// Each entry's `rect` is the projected rectangle and its `reference`
    /// is the current screen size, so the snapshot is consistent on its own
    /// but is not the authored ROI after a resize. Use [`get`](Self::get)
    /// for the stored rectangle and reference.
    pub fn list_all(&self) -> Vec<Roi> {
        let screen = self.screen.screen_size();
        self.rois
            .values()
            .map(|roi| Roi { rect: roi.projected(screen), reference: screen, ..*roi })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rois.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rois.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    fn screen(w: u32, h: u32) -> ScreenSize {
        ScreenSize::new(w, h).unwrap()
    }

    fn gaze_at_px(x: f32, y: f32, s: ScreenSize) -> GazePoint {
        GazePoint::new(x / s.width as f32, y / s.height as f32, Duration::ZERO).unwrap()
    }

    #[test]
    fn ids_are_unique_and_never_reused() {
        let mut mgr = RoiManager::new(screen(800, 600));
        let a = mgr.add(Rect::new(0.0, 0.0, 10.0, 10.0)).unwrap();
        mgr.remove(a).unwrap();
        let b = mgr.add(Rect::new(0.0, 0.0, 10.0, 10.0)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rescales_on_read_without_mutating() {
        let shared = SharedScreen::new(screen(800, 600));
        let mut mgr = RoiManager::new(shared.clone());
        let id = mgr.add(Rect::new(100.0, 100.0, 50.0, 50.0)).unwrap();

        shared.set(screen(1600, 1200));
        assert_eq!(mgr.projected(id).unwrap(), Rect::new(200.0, 200.0, 100.0, 100.0));
        assert_eq!(mgr.list_all()[0].rect, Rect::new(200.0, 200.0, 100.0, 100.0));

        // stored rectangle still the authored one
        assert_eq!(mgr.get(id).unwrap().rect, Rect::new(100.0, 100.0, 50.0, 50.0));
        assert_eq!(mgr.get(id).unwrap().reference, screen(800, 600));
    }

    #[test]
    fn listing_is_a_snapshot_on_the_current_screen() {
        let shared = SharedScreen::new(screen(800, 600));
        let mut mgr = RoiManager::new(shared.clone());
        let id = mgr.add(Rect::new(100.0, 100.0, 50.0, 50.0)).unwrap();

        shared.set(screen(1600, 1200));
        let listed = mgr.list_all()[0];
        assert_eq!(listed.id, id);
        assert_eq!(listed.reference, screen(1600, 1200));
        assert_eq!(listed.projected(screen(1600, 1200)), listed.rect);
        assert_eq!(listed.projected(screen(800, 600)), mgr.get(id).unwrap().rect);

        let authored = *mgr.get(id).unwrap();
        assert_eq!(authored.reference, screen(800, 600));
        assert_ne!(listed, authored);
    }

    #[test]
    fn hit_test_honours_tolerance() {
        let s = screen(800, 600);
        let mut mgr = RoiManager::new(s);
        let id = mgr.add(Rect::new(100.0, 100.0, 50.0, 50.0)).unwrap();

        assert_eq!(mgr.hit_test(&gaze_at_px(125.0, 125.0, s), 1.0), vec![id]);
        assert!(mgr.hit_test(&gaze_at_px(160.0, 125.0, s), 5.0).is_empty());
        assert_eq!(mgr.hit_test(&gaze_at_px(158.0, 125.0, s), 10.0), vec![id]);
    }

    #[test]
    fn overlapping_rois_all_match() {
        let s = screen(800, 600);
        let mut mgr = RoiManager::new(s);
        let a = mgr.add(Rect::new(0.0, 0.0, 200.0, 200.0)).unwrap();
        let b = mgr.add(Rect::new(100.0, 100.0, 200.0, 200.0)).unwrap();
        mgr.add(Rect::new(500.0, 500.0, 10.0, 10.0)).unwrap();

        assert_eq!(mgr.hit_test(&gaze_at_px(150.0, 150.0, s), 1.0), vec![a, b]);
    }

    #[test]
    fn remove_twice_reports_unknown() {
        let mut mgr = RoiManager::new(screen(800, 600));
        let id = mgr.add(Rect::new(0.0, 0.0, 10.0, 10.0)).unwrap();
        mgr.add(Rect::new(20.0, 0.0, 10.0, 10.0)).unwrap();

        assert!(mgr.remove(id).is_ok());
        assert_eq!(mgr.remove(id).unwrap_err(), GestureError::UnknownRoi(id));
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn hit_test_one_reports_unknown_roi() {
        let s = screen(800, 600);
        let mgr = RoiManager::new(s);
        let stale = RoiId(42);
        assert_eq!(
            mgr.hit_test_one(stale, &gaze_at_px(0.0, 0.0, s), 1.0),
            Err(GestureError::UnknownRoi(stale))
        );
    }

    #[test]
    fn invalid_rect_is_rejected() {
        let mut mgr = RoiManager::new(screen(800, 600));
        assert!(mgr.add(Rect::new(0.0, 0.0, -5.0, 10.0)).is_err());
        assert!(mgr.add(Rect::new(f32::NAN, 0.0, 5.0, 10.0)).is_err());
        assert!(mgr.is_empty());
    }

    #[test]
    fn listeners_see_create_and_remove() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut mgr = RoiManager::new(screen(800, 600));
        let log = seen.clone();
        mgr.events_mut().subscribe(move |e: &RoiEvent| {
            let tag = match e {
                RoiEvent::Created(r) => format!("+{}", r.id),
                RoiEvent::Removed(r) => format!("-{}", r.id),
            };
            log.lock().unwrap().push(tag);
        });

        let a = mgr.add(Rect::new(0.0, 0.0, 10.0, 10.0)).unwrap();
        mgr.add(Rect::new(0.0, 0.0, 10.0, 10.0)).unwrap();
        mgr.remove(a).unwrap();
        mgr.clear();

        assert_eq!(*seen.lock().unwrap(), vec!["+roi-1", "+roi-2", "-roi-1", "-roi-2"]);
        assert!(mgr.is_empty());
    }
}
