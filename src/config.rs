//! Single typed configuration record for the player core.
//!
//! No file I/O lives here — loading a `Config` from disk is the job of the
//! (out-of-scope) CLI wrapper. This mirrors `mesio_engine::DownloaderConfig`:
//! a flat `Default`-derived struct with documented constants.

use std::time::Duration;

/// Environment/configuration record threaded through every component.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum in-flight buffer horizon the scheduler will fill ahead of the
    /// playhead, in seconds.
    pub buffer_duration: f64,

    /// `safe_buffer` threshold (seconds) used by ABR and BETA.
    pub safe_buffer_level: f64,

    /// `panic_buffer` threshold (seconds) used by ABR and BETA. Must be
    /// strictly less than `safe_buffer_level`.
    pub panic_buffer_level: f64,

    /// Buffer level (seconds) required to leave BUFFERING after a rebuffer.
    pub min_rebuffer_duration: f64,

    /// Buffer level (seconds) required to leave BUFFERING on first start.
    pub min_start_duration: f64,

    /// Smoothing factor `alpha` for the per-transfer bandwidth EMA.
    pub smoothing_factor: f64,

    /// Initial bandwidth estimate (bits per second) before any transfer
    /// completes.
    pub init_bandwidth: f64,

    /// Player main-loop tick interval, in seconds.
    pub update_interval: f64,

    /// Window (seconds) for the continuous short-window bandwidth estimate.
    pub cont_bw_window: f64,

    /// Outlier-gap threshold (seconds) for the continuous bandwidth sampler.
    /// Only consulted when `reject_packet_delay_outliers` is `true`.
    pub max_packet_delay: f64,

    /// Enables the continuous-bandwidth outlier filter based on
    /// `max_packet_delay`. The observed source has this condition
    /// permanently disabled (`if True:`); default here is `false` (accept
    /// all samples), matching that observed default, but the filter is
    /// selectable.
    pub reject_packet_delay_outliers: bool,

    /// Enables the `drop_and_replace` panic-branch path in the BETA
    /// controller. Default `false`: the observed source guards this off in
    /// favor of stop-only. See `DESIGN.md` open question.
    pub enable_drop_and_replace: bool,

    /// Constant fallback VQ threshold used by `ConstantVqThreshold`.
    pub vq_threshold_default: f64,

    /// Headroom factor `k` applied to the BETA timeout formula.
    pub beta_timeout_headroom: f64,

    /// Minimum bytes-received/content-length ratio consulted by the
    /// stall-avoidance, panic-buffer, and max-timeout BETA rules.
    pub beta_min_ref_ratio: f64,

    /// Minimum number of continuous-bandwidth samples before a window
    /// estimate is emitted.
    pub cont_bw_min_samples: usize,

    /// QUIC/H3 connect timeout.
    pub connect_timeout: Duration,

    /// Timeout applied while awaiting bytes on an already-open stream.
    pub stream_read_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_duration: 10.0,
            safe_buffer_level: 6.0,
            panic_buffer_level: 2.0,
            min_rebuffer_duration: 1.0,
            min_start_duration: 2.0,
            smoothing_factor: 0.5,
            init_bandwidth: 0.0,
            update_interval: 0.05,
            cont_bw_window: 1.0,
            max_packet_delay: 10.0,
            reject_packet_delay_outliers: false,
            enable_drop_and_replace: false,
            vq_threshold_default: 0.9,
            beta_timeout_headroom: 0.7,
            beta_min_ref_ratio: 0.6,
            cont_bw_min_samples: 2,
            connect_timeout: Duration::from_secs(10),
            stream_read_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_buffer_below_safe_buffer_by_default() {
        let cfg = Config::default();
        assert!(cfg.panic_buffer_level < cfg.safe_buffer_level);
    }
}
