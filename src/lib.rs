//! Core runtime for an experimental MPEG-DASH-over-HTTP/3 client evaluating
//! the BETA (Buffer-based Early Termination of Adaptation) policy.
//!
//! This crate implements only the playback core described by its component
//! table: manifest model, event bus, bandwidth estimator, H3 event parser,
//! download manager, ABR selector, buffer manager, scheduler, BETA
//! controller, and player. MPD parsing and a CLI/analyzer front-end are
//! out of scope; callers hand in an already-built [`Manifest`].

pub mod abr;
pub mod bandwidth;
pub mod beta;
pub mod buffer;
pub mod config;
pub mod download;
pub mod error;
pub mod events;
pub mod manifest;
pub mod player;
pub mod quic;
pub mod scheduler;
pub mod state;

pub use config::Config;
pub use error::{DashBetaError, Result};
pub use events::{BusEvent, EventBus};
pub use manifest::Manifest;
pub use state::PlayerState;

use std::sync::Arc;

use parking_lot::Mutex;

use bandwidth::BandwidthEstimator;
use beta::{BetaController, ConstantVqThreshold, VqThresholdTable};
use buffer::BufferManager;
use download::DownloadManager;
use player::Player;
use quic::ConnectionPool;
use scheduler::{ReplacementSignal, Scheduler};

/// Seconds since the Unix epoch, as an `f64`. The one wall-clock read shared
/// by the bandwidth estimator task and the BETA controller's deadline math.
pub(crate) fn now_seconds() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Wires the full component graph together for one playback run, the way a
/// CLI front-end or test harness would. Each of `scheduler`, `beta`, and
/// `player` is its own cooperative task — `run` awaits all three.
pub struct Runtime {
    pub bus: EventBus,
    pub buffer: Arc<Mutex<BufferManager>>,
    pub bandwidth: Arc<Mutex<BandwidthEstimator>>,
    pub scheduler: Arc<Scheduler>,
    pub beta: Arc<BetaController>,
    pub player: Player,
}

impl Runtime {
    /// Build a runtime against a real QUIC/H3 download manager, with the
    /// default constant VQ threshold and drop-and-replace left disabled
    /// unless set on `config`.
    pub fn new(manifest: Arc<Manifest>, config: Arc<Config>) -> Result<Self> {
        let pool = Arc::new(ConnectionPool::new(config.connect_timeout)?);
        let bus = EventBus::new();
        let downloads: Arc<dyn DownloadManager> = Arc::new(download::QuicDownloadManager::new(
            pool,
            bus.clone(),
            config.stream_read_timeout,
        ));
        Ok(Self::with_download_manager(manifest, config, bus, downloads))
    }

    /// Build a runtime against a caller-supplied [`DownloadManager`] — the
    /// seam used by integration tests to drive scenarios with
    /// [`download::MockDownloadManager`] instead of real QUIC.
    pub fn with_download_manager(
        manifest: Arc<Manifest>,
        config: Arc<Config>,
        bus: EventBus,
        downloads: Arc<dyn DownloadManager>,
    ) -> Self {
        let buffer = Arc::new(Mutex::new(BufferManager::new(bus.clone())));
        let bandwidth = Arc::new(Mutex::new(BandwidthEstimator::new(
            config.init_bandwidth,
            config.smoothing_factor,
            bus.clone(),
            config.cont_bw_window,
            config.cont_bw_min_samples,
            config.max_packet_delay,
            config.reject_packet_delay_outliers,
        )));
        let replacement = ReplacementSignal::new();
        let vq_threshold: Arc<dyn VqThresholdTable> =
            Arc::new(ConstantVqThreshold::new(config.vq_threshold_default));

        let scheduler = Arc::new(Scheduler::new(
            manifest,
            config.clone(),
            bus.clone(),
            buffer.clone(),
            downloads.clone(),
            replacement.clone(),
            bandwidth.clone(),
        ));
        let beta = Arc::new(BetaController::new(
            bus.clone(),
            config.clone(),
            downloads,
            replacement,
            vq_threshold,
        ));
        let player = Player::new(config, bus.clone(), buffer.clone(), scheduler.end_flag());

        Self {
            bus,
            buffer,
            bandwidth,
            scheduler,
            beta,
            player,
        }
    }

    /// Run the bandwidth estimator, scheduler, BETA controller, and player
    /// concurrently until playback reaches [`PlayerState::End`].
    pub async fn run(mut self) -> Result<()> {
        let scheduler = self.scheduler.clone();
        let beta = self.beta.clone();
        let bandwidth_bus = self.bus.clone();
        let bandwidth = self.bandwidth.clone();

        let bandwidth_task = tokio::spawn(bandwidth::run(bandwidth_bus, bandwidth));
        let scheduler_task = tokio::spawn(async move { scheduler.run().await });
        let beta_task = tokio::spawn(async move { beta.run().await });

        self.player.run().await;

        beta_task.abort();
        bandwidth_task.abort();
        scheduler_task.await.map_err(|error| error::DashBetaError::Internal {
            reason: error.to_string(),
        })??;
        Ok(())
    }
}
