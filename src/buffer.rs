//! Buffer manager.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Notify;

use crate::events::{BusEvent, EventBus};

/// Tracks seconds of ready media ahead of the playhead.
pub struct BufferManager {
    buffer_level: f64,
    position: f64,
    /// Durations of completed segments not yet consumed by the playhead,
    /// oldest first — the completed-segment horizon from The sum
    /// of this queue always equals `buffer_level`.
    completed_segment_durations: VecDeque<f64>,
    bus: EventBus,
    changed: Arc<Notify>,
}

impl BufferManager {
    pub fn new(bus: EventBus) -> Self {
        Self {
            buffer_level: 0.0,
            position: 0.0,
            completed_segment_durations: VecDeque::new(),
            bus,
            changed: Arc::new(Notify::new()),
        }
    }

    pub fn buffer_level(&self) -> f64 {
        self.buffer_level
    }

    /// A handle the scheduler can await to wake as soon as the level next
    /// changes, instead of polling for the scheduler's back-pressure wait.
    pub fn level_changed(&self) -> Arc<Notify> {
        self.changed.clone()
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    /// Advance the playhead to `new_position`, draining buffer by the
    /// elapsed amount. `new_position` must be monotonically non-decreasing.
    pub fn update(&mut self, new_position: f64) {
        let elapsed = (new_position - self.position).max(0.0);
        self.position = new_position;
        if elapsed > 0.0 {
            self.drain(elapsed);
        }
    }

    fn drain(&mut self, mut elapsed: f64) {
        let mut consumed = 0.0_f64;
        while elapsed > 0.0 {
            match self.completed_segment_durations.front_mut() {
                Some(front) if *front > elapsed => {
                    *front -= elapsed;
                    consumed += elapsed;
                    elapsed = 0.0;
                }
                Some(_) => {
                    let front = self.completed_segment_durations.pop_front().unwrap();
                    consumed += front;
                    elapsed -= front;
                }
                None => break,
            }
        }
        self.set_level(self.buffer_level - consumed);
    }

    /// Account for a newly completed segment of `duration` seconds.
    pub fn enqueue(&mut self, duration: f64) {
        self.completed_segment_durations.push_back(duration);
        self.set_level(self.buffer_level + duration);
    }

    fn set_level(&mut self, level: f64) {
        let level = level.max(0.0);
        if (level - self.buffer_level).abs() > f64::EPSILON {
            self.buffer_level = level;
            self.bus.publish(BusEvent::BufferLevelChange {
                level: self.buffer_level,
            });
            self.changed.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_increases_level_and_update_drains_it() {
        let mut mgr = BufferManager::new(EventBus::new());
        mgr.enqueue(2.0);
        assert_eq!(mgr.buffer_level(), 2.0);
        mgr.update(1.0);
        assert!((mgr.buffer_level() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn buffer_level_never_negative() {
        let mut mgr = BufferManager::new(EventBus::new());
        mgr.enqueue(1.0);
        mgr.update(5.0); // playhead outruns buffer
        assert_eq!(mgr.buffer_level(), 0.0);
    }

    #[test]
    fn multiple_segments_drain_in_order() {
        let mut mgr = BufferManager::new(EventBus::new());
        mgr.enqueue(2.0);
        mgr.enqueue(2.0);
        assert_eq!(mgr.buffer_level(), 4.0);
        mgr.update(3.0);
        assert!((mgr.buffer_level() - 1.0).abs() < 1e-9);
    }
}
