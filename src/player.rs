//! Player: top-level state machine and main loop.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::{Duration, Instant};
use tracing::{info, instrument};

use crate::buffer::BufferManager;
use crate::config::Config;
use crate::events::{BusEvent, EventBus};
use crate::scheduler::EndFlag;
use crate::state::PlayerState;

/// Drives the IDLE → BUFFERING → READY → END transition table, ticking every
/// `update_interval`. Owns the position/buffer-advancement side of playback;
/// segment fetching is the scheduler's job, run as a separate cooperative
/// task sharing the same `BufferManager`.
pub struct Player {
    config: Arc<Config>,
    bus: EventBus,
    buffer: Arc<Mutex<BufferManager>>,
    end_flag: EndFlag,
    state: PlayerState,
    started: bool,
}

impl Player {
    pub fn new(
        config: Arc<Config>,
        bus: EventBus,
        buffer: Arc<Mutex<BufferManager>>,
        end_flag: EndFlag,
    ) -> Self {
        Self {
            config,
            bus,
            buffer,
            end_flag,
            state: PlayerState::Idle,
            started: false,
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    /// Run the main loop until `PlayerState::End` is reached.
    #[instrument(skip(self))]
    pub async fn run(&mut self) {
        self.transition(PlayerState::Buffering, 0.0);

        let mut last_tick = Instant::now();
        loop {
            let buffer_level = self.buffer.lock().buffer_level();
            let sleep_for = if buffer_level > 0.0 {
                buffer_level.min(self.config.update_interval)
            } else {
                self.config.update_interval
            };
            tokio::time::sleep(Duration::from_secs_f64(sleep_for.max(0.0))).await;

            let now = Instant::now();
            let delta = (now - last_tick).as_secs_f64();
            last_tick = now;

            let position = if self.state == PlayerState::Ready {
                let mut buffer = self.buffer.lock();
                let position = buffer.position() + delta;
                buffer.update(position);
                position
            } else {
                self.buffer.lock().position()
            };
            self.bus.publish(BusEvent::PositionChange { position });

            let buffer_level = self.buffer.lock().buffer_level();
            self.step(buffer_level, position);

            if self.state == PlayerState::End {
                info!("playback ended");
                return;
            }
        }
    }

    fn step(&mut self, buffer_level: f64, position: f64) {
        match self.state {
            PlayerState::Idle => {
                self.transition(PlayerState::Buffering, position);
            }
            PlayerState::Buffering => {
                let threshold = if self.started {
                    self.config.min_rebuffer_duration
                } else {
                    self.config.min_start_duration
                };
                if buffer_level > threshold {
                    self.started = true;
                    self.transition(PlayerState::Ready, position);
                }
            }
            PlayerState::Ready => {
                if buffer_level <= 0.0 {
                    if self.end_flag.is_end() {
                        self.transition(PlayerState::End, position);
                    } else {
                        self.transition(PlayerState::Buffering, position);
                    }
                }
            }
            PlayerState::End => {}
        }

        if self.state != PlayerState::End && self.end_flag.is_end() && buffer_level <= 0.0 {
            self.transition(PlayerState::End, position);
        }
    }

    fn transition(&mut self, new: PlayerState, position: f64) {
        if new == self.state {
            return;
        }
        let old = self.state;
        self.state = new;
        self.bus.publish(BusEvent::StateChange { position, old, new });
    }
}
