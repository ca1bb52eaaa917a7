//! Bandwidth estimator.
//!
//! Two independent estimates are maintained, mirroring
//! `original_source/dash_emulator/bandwidth.py::BandwidthMeterImpl`:
//!
//! - a smoothed per-transfer EMA, updated on `TransferEnd`/`TransferCancel`;
//! - a continuous short-window estimate, updated on every chunk after the
//!   first in a transfer.
//!
//! Timestamps are passed in as `f64` seconds rather than captured internally
//! via `Instant::now()`, so the formulas above can be driven
//! deterministically from tests without sleeping real wall-clock time.
//!
//! [`run`] subscribes the estimator to the bus and feeds it
//! `TransferStart`/`BytesTransferred`/`TransferEnd`/`TransferCancel` for the
//! life of a playback run — this is the only thing that ever publishes
//! `BandwidthUpdate`/`ContinuousBandwidthUpdate`.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::events::{BandwidthExtras, BusEvent, EventBus};

#[derive(Debug, Clone, Copy)]
struct Sample {
    start: f64,
    end: f64,
    bytes: u64,
}

pub struct BandwidthEstimator {
    bw: f64,
    smooth_factor: f64,
    bus: EventBus,

    bytes_transferred: u64,
    transmission_start: Option<f64>,

    first_byte_in_segment: bool,
    last_byte_at: Option<f64>,
    cont_bw: VecDeque<Sample>,
    last_cont_bw: Option<f64>,

    cont_bw_window: f64,
    min_samples: usize,
    max_packet_delay: f64,
    reject_outliers: bool,
}

impl BandwidthEstimator {
    pub fn new(
        init_bandwidth: f64,
        smooth_factor: f64,
        bus: EventBus,
        cont_bw_window: f64,
        min_samples: usize,
        max_packet_delay: f64,
        reject_outliers: bool,
    ) -> Self {
        Self {
            bw: init_bandwidth,
            smooth_factor,
            bus,
            bytes_transferred: 0,
            transmission_start: None,
            first_byte_in_segment: true,
            last_byte_at: None,
            cont_bw: VecDeque::new(),
            last_cont_bw: None,
            cont_bw_window,
            min_samples,
            max_packet_delay,
            reject_outliers,
        }
    }

    pub fn bandwidth(&self) -> f64 {
        self.bw
    }

    pub fn continuous_bandwidth(&self) -> Option<f64> {
        self.last_cont_bw
    }

    pub fn on_transfer_start(&mut self, now: f64) {
        self.transmission_start = Some(now);
        self.bytes_transferred = 0;
        self.first_byte_in_segment = true;
    }

    /// A chunk of `length` bytes arrived at `now`. Updates the continuous
    /// estimate and publishes `ContinuousBandwidthUpdate` (the first chunk
    /// of a transfer only initializes the prev-time reference).
    pub fn on_bytes_transferred(&mut self, length: usize, now: f64) {
        self.bytes_transferred += length as u64;
        self.update_continuous(length as u64, now);
    }

    fn update_continuous(&mut self, bytes: u64, now: f64) {
        if self.first_byte_in_segment {
            self.first_byte_in_segment = false;
            self.last_byte_at = Some(now);
            return;
        }

        let last = self.last_byte_at.unwrap_or(now);
        let dt = now - last;
        self.last_byte_at = Some(now);

        if dt <= 0.0 {
            return;
        }
        if !self.reject_outliers || dt <= self.max_packet_delay {
            self.cont_bw.push_back(Sample {
                start: last,
                end: now,
                bytes,
            });

            if self.cont_bw.len() >= self.min_samples {
                let window_start = now - self.cont_bw_window;
                let mut total_bytes: u64 = 0;
                let mut total_duration = 0.0_f64;
                let mut collected = 0usize;
                for sample in self.cont_bw.iter().rev() {
                    if sample.end < window_start && collected >= self.min_samples {
                        break;
                    }
                    total_bytes += sample.bytes;
                    total_duration += sample.end - sample.start;
                    collected += 1;
                }
                if total_duration > 0.0 {
                    self.last_cont_bw = Some(8.0 * total_bytes as f64 / total_duration);
                }
            }
        }

        self.bus.publish(BusEvent::ContinuousBandwidthUpdate {
            bw: self.last_cont_bw,
        });
    }

    /// `TransferEnd` (or a `TransferCancel`, treated as an end at whatever
    /// position the transfer reached).
    pub fn on_transfer_end(&mut self, now: f64) {
        let Some(start) = self.transmission_start else {
            return;
        };
        let dt = now - start;
        if dt > 0.0 {
            let instantaneous = 8.0 * self.bytes_transferred as f64 / dt;
            self.bw = self.bw * self.smooth_factor + instantaneous * (1.0 - self.smooth_factor);
            self.bus.publish(BusEvent::BandwidthUpdate {
                bw: self.bw,
                extras: Arc::new(BandwidthExtras {
                    bytes_transferred: self.bytes_transferred,
                    transmission_start: start,
                    transmission_end: now,
                }),
            });
        }
        self.bytes_transferred = 0;
        self.transmission_start = None;
    }
}

/// Drives `estimator` from the bus's transfer-lifecycle events, run as its
/// own cooperative task for the life of the player. Shared via
/// `Arc<parking_lot::Mutex<_>>` with the scheduler, which reads
/// `bandwidth()` for each ABR pick.
pub async fn run(bus: EventBus, estimator: Arc<parking_lot::Mutex<BandwidthEstimator>>) {
    let mut listener = bus.subscribe();
    while let Some(event) = listener.recv().await {
        match event {
            BusEvent::TransferStart { .. } => {
                estimator.lock().on_transfer_start(crate::now_seconds());
            }
            BusEvent::BytesTransferred { length, .. } => {
                estimator.lock().on_bytes_transferred(length, crate::now_seconds());
            }
            BusEvent::TransferEnd { .. } | BusEvent::TransferCancel { .. } => {
                estimator.lock().on_transfer_end(crate::now_seconds());
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator(init_bw: f64) -> BandwidthEstimator {
        BandwidthEstimator::new(init_bw, 0.5, EventBus::new(), 1.0, 2, 10.0, false)
    }

    #[test]
    fn smoothed_bandwidth_updates_on_transfer_end() {
        let mut est = estimator(1_000_000.0);
        est.on_transfer_start(0.0);
        est.on_bytes_transferred(125_000, 0.1); // first chunk: no cont update emitted yet
        est.on_transfer_end(1.0); // 1MB over 1s -> 8Mbps instantaneous
        let expected = 1_000_000.0 * 0.5 + 8_000_000.0 * 0.5;
        assert!((est.bandwidth() - expected).abs() < 1.0);
    }

    #[test]
    fn non_positive_dt_is_discarded() {
        let mut est = estimator(1_000_000.0);
        est.on_transfer_start(5.0);
        est.on_bytes_transferred(1_000, 5.0);
        est.on_transfer_end(5.0); // dt == 0, discard
        assert_eq!(est.bandwidth(), 1_000_000.0);
    }

    #[test]
    fn continuous_bandwidth_needs_min_samples_before_emitting() {
        let mut est = estimator(0.0);
        est.on_transfer_start(0.0);
        est.on_bytes_transferred(1_000, 0.0); // first chunk: only sets reference
        assert!(est.continuous_bandwidth().is_none());
        est.on_bytes_transferred(1_000, 0.5); // second chunk: 1 sample, still < min_samples(2)
        assert!(est.continuous_bandwidth().is_none());
        est.on_bytes_transferred(1_000, 1.0); // third chunk: 2 samples now
        assert!(est.continuous_bandwidth().is_some());
    }

    #[test]
    fn continuous_bandwidth_matches_window_formula() {
        let mut est = estimator(0.0);
        est.on_transfer_start(0.0);
        est.on_bytes_transferred(1_000, 0.0);
        est.on_bytes_transferred(1_000, 0.5);
        est.on_bytes_transferred(1_000, 1.0);
        // two samples of 1000 bytes over 0.5s each -> 8*2000/1.0 = 16000 bps
        assert!((est.continuous_bandwidth().unwrap() - 16_000.0).abs() < 1e-6);
    }

    #[test]
    fn smoothed_bandwidth_is_never_negative_after_a_transfer() {
        let mut est = estimator(0.0);
        est.on_transfer_start(0.0);
        est.on_bytes_transferred(2_000_000, 0.1);
        est.on_transfer_end(2.0);
        assert!(est.bandwidth() >= 0.0);
        assert!(est.bandwidth().is_finite());
    }
}
