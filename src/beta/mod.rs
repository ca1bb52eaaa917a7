//! BETA controller: Buffer-based Early Termination of Adaptation.
//!
//! Subscribes to the event bus and, on each `BytesTransferred`, decides
//! whether the in-flight segment has accumulated enough bytes that the
//! remainder is no longer worth waiting for — stopping it early so the
//! scheduler can move on (or, with drop-and-replace enabled, re-fetch the
//! same index at the lowest bitrate).

mod vq;

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, instrument};

pub use vq::{ConstantVqThreshold, VqThresholdTable};

use crate::config::Config;
use crate::download::DownloadManager;
use crate::events::{BusEvent, EventBus};
use crate::scheduler::ReplacementSignal;
use crate::state::PlayerState;

#[derive(Default)]
struct CurrentSegment {
    index: usize,
    url: Option<Arc<str>>,
    ratio: f64,
    first_bytes_received: bool,
    timeout: f64,
    max_timeout: f64,
}

struct PendingSegment {
    url: Arc<str>,
}

struct BetaState {
    bandwidth: f64,
    buffer_level: f64,
    player_state: PlayerState,
    current: CurrentSegment,
    pending: Option<PendingSegment>,
    dropped_urls: std::collections::HashSet<Arc<str>>,
    dropped_indices: std::collections::HashSet<usize>,
}

impl Default for BetaState {
    fn default() -> Self {
        Self {
            bandwidth: 0.0,
            buffer_level: 0.0,
            player_state: PlayerState::Idle,
            current: CurrentSegment::default(),
            pending: None,
            dropped_urls: std::collections::HashSet::new(),
            dropped_indices: std::collections::HashSet::new(),
        }
    }
}

/// Drives the BETA policy from bus events. Construct with
/// [`BetaController::new`] and run [`BetaController::run`] as its own
/// cooperative task; it terminates when the bus has no more publishers.
pub struct BetaController {
    bus: EventBus,
    config: Arc<Config>,
    downloads: Arc<dyn DownloadManager>,
    replacement: Arc<ReplacementSignal>,
    vq_threshold: Arc<dyn VqThresholdTable>,
    state: Mutex<BetaState>,
}

impl BetaController {
    pub fn new(
        bus: EventBus,
        config: Arc<Config>,
        downloads: Arc<dyn DownloadManager>,
        replacement: Arc<ReplacementSignal>,
        vq_threshold: Arc<dyn VqThresholdTable>,
    ) -> Self {
        Self {
            bus,
            config,
            downloads,
            replacement,
            vq_threshold,
            state: Mutex::new(BetaState::default()),
        }
    }

    /// Consume events from the bus until it is dropped. Intended to run as
    /// its own task for the life of the player.
    #[instrument(skip(self))]
    pub async fn run(&self) {
        let mut listener = self.bus.subscribe();
        while let Some(event) = listener.recv().await {
            self.on_event(event).await;
        }
    }

    async fn on_event(&self, event: BusEvent) {
        match event {
            BusEvent::SegmentDownloadStart { index, .. } => {
                let mut state = self.state.lock();
                state.current = CurrentSegment {
                    index,
                    ..Default::default()
                };
            }
            BusEvent::TransferStart { url } => {
                self.state.lock().current.url = Some(url);
            }
            BusEvent::StateChange { new, .. } => {
                self.state.lock().player_state = new;
            }
            BusEvent::BufferLevelChange { level } => {
                self.state.lock().buffer_level = level;
            }
            BusEvent::BandwidthUpdate { bw, .. } => {
                self.state.lock().bandwidth = bw;
            }
            BusEvent::BytesTransferred {
                url,
                length,
                position,
                size,
                ..
            } => {
                self.on_bytes_transferred(url, length, position, size).await;
            }
            _ => {}
        }
    }

    #[instrument(skip(self), fields(%url, length, position, size))]
    async fn on_bytes_transferred(&self, url: Arc<str>, length: usize, position: usize, size: usize) {
        let now = crate::now_seconds();

        // Step 1: a pending (previously stopped) segment, still draining.
        let pending_mismatch = {
            let mut state = self.state.lock();
            match &state.pending {
                Some(pending) if pending.url != url => true,
                Some(_) => return, // matches: continuing drain, ignore
                None => false,
            }
        };
        if pending_mismatch {
            let pending_url = self.state.lock().pending.take().map(|p| p.url);
            if let Some(pending_url) = pending_url {
                self.downloads.cancel_read_url(&pending_url).await;
            }
        }

        // Step 2: init segments don't participate.
        if is_init_segment(&url) {
            return;
        }

        let mut stop = false;
        {
            let mut state = self.state.lock();

            // Step 3: buffer already comfortable, no need to intervene.
            if state.buffer_level > self.config.safe_buffer_level {
                return;
            }
            // Step 4: this URL or index has already been dropped.
            if state.dropped_urls.contains(&url) || state.dropped_indices.contains(&state.current.index)
            {
                return;
            }

            // Step 5: establish the deadline on the first observed chunk.
            if !state.current.first_bytes_received {
                if size == length {
                    return; // whole segment arrived in one chunk
                }
                state.current.first_bytes_received = true;
                let bandwidth = state.bandwidth.max(1.0);
                let delta = (size.saturating_sub(length)) as f64 * 8.0
                    / (bandwidth * self.config.beta_timeout_headroom);
                state.current.timeout = now + delta;
                state.current.max_timeout = now + 2.0 * delta;
                return;
            }

            // Step 6.
            let ratio = position as f64 / size.max(1) as f64;
            state.current.ratio = ratio;
            if ratio > 0.99 {
                return;
            }

            // Step 7: stall avoidance.
            if state.current.index != 0
                && state.player_state == PlayerState::Buffering
                && ratio > self.config.beta_min_ref_ratio
            {
                stop = true;
            }

            // Step 8.
            if !stop && now < state.current.timeout {
                return;
            }

            // Step 9: VQ threshold.
            if !stop && ratio > self.vq_threshold.threshold(state.current.index) {
                stop = true;
            }

            // Step 10: panic buffer.
            if !stop && state.buffer_level < self.config.panic_buffer_level && ratio > self.config.beta_min_ref_ratio {
                stop = true;
            }

            // Step 11: max timeout.
            if !stop && now > state.current.max_timeout && ratio > self.config.beta_min_ref_ratio {
                stop = true;
            }
        }

        if stop {
            self.stop_download().await;
        }
    }

    #[instrument(skip(self))]
    async fn stop_download(&self) {
        let (should_stop, current_url, index) = {
            let state = self.state.lock();
            let Some(current_url) = state.current.url.clone() else {
                return;
            };
            let should_stop = match &state.pending {
                Some(pending) => pending.url != current_url,
                None => true,
            };
            (should_stop, current_url, state.current.index)
        };
        if should_stop {
            debug!(url = %current_url, index, "BETA stopping in-flight segment");
            self.downloads.stop(&current_url).await;
        }
        self.state.lock().pending = Some(PendingSegment { url: current_url });
    }

    /// Drop-and-replace: guarded off unless
    /// [`Config::enable_drop_and_replace`] is set.
    #[instrument(skip(self))]
    pub async fn drop_and_replace(&self) {
        if !self.config.enable_drop_and_replace {
            return;
        }
        let (url, index) = {
            let state = self.state.lock();
            let Some(url) = state.current.url.clone() else {
                return;
            };
            (url, state.current.index)
        };
        {
            let mut state = self.state.lock();
            state.dropped_urls.insert(url.clone());
            state.dropped_indices.insert(index);
        }
        self.downloads.drop_url(&url).await;
        self.downloads.cancel_read_url(&url).await;
        self.replacement.request(index);
    }
}

fn is_init_segment(url: &str) -> bool {
    url.contains("init")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::MockDownloadManager;

    fn controller() -> (BetaController, EventBus, Arc<MockDownloadManager>) {
        let bus = EventBus::new();
        let config = Arc::new(Config::default());
        let downloads = Arc::new(MockDownloadManager::new(bus.clone()));
        let replacement = ReplacementSignal::new();
        let vq = Arc::new(ConstantVqThreshold::new(0.9));
        let ctrl = BetaController::new(bus.clone(), config, downloads.clone(), replacement, vq);
        (ctrl, bus, downloads)
    }

    #[tokio::test]
    async fn init_segments_never_trigger_a_stop() {
        let (ctrl, _bus, downloads) = controller();
        ctrl.on_event(BusEvent::SegmentDownloadStart {
            index: 1,
            selections: vec![0],
        })
        .await;
        let url: Arc<str> = Arc::from("https://example.test/init.mp4");
        ctrl.on_event(BusEvent::TransferStart { url: url.clone() }).await;
        ctrl.on_event(BusEvent::BytesTransferred {
            url: url.clone(),
            length: 10,
            position: 10,
            size: 1000,
            content: bytes::Bytes::new(),
        })
        .await;
        assert!(downloads.requested_urls().is_empty());
    }

    #[tokio::test]
    async fn panic_buffer_triggers_stop_once_deadline_established() {
        let (ctrl, _bus, downloads) = controller();
        downloads.download(Arc::from("https://example.test/1.m4s")).await;
        ctrl.on_event(BusEvent::SegmentDownloadStart {
            index: 1,
            selections: vec![0],
        })
        .await;
        let url: Arc<str> = Arc::from("https://example.test/1.m4s");
        ctrl.on_event(BusEvent::TransferStart { url: url.clone() }).await;
        ctrl.on_event(BusEvent::BandwidthUpdate {
            bw: 1_000_000.0,
            extras: Arc::new(crate::events::BandwidthExtras::default()),
        })
        .await;
        ctrl.on_event(BusEvent::BufferLevelChange { level: 0.5 }).await;

        // First chunk establishes the deadline (partial chunk, not the whole segment).
        ctrl.on_event(BusEvent::BytesTransferred {
            url: url.clone(),
            length: 100,
            position: 100,
            size: 1000,
            content: bytes::Bytes::new(),
        })
        .await;
        // Second chunk: ratio 0.7 > MIN_REF_RATIO and buffer is in panic territory.
        ctrl.on_event(BusEvent::BytesTransferred {
            url: url.clone(),
            length: 600,
            position: 700,
            size: 1000,
            content: bytes::Bytes::new(),
        })
        .await;

        assert_eq!(downloads.stopped_urls(), vec![url]);
    }
}
