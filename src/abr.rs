//! Adaptive bitrate selector.

use crate::manifest::{ContentType, Manifest};

/// A chosen representation index per adaptation set, in `Manifest::adaptation_sets`
/// order.
pub type Selections = Vec<usize>;

/// Picks a representation index per adaptation set from current bandwidth
/// and buffer level, following the DASH-like hybrid policy in:
///
/// - `buffer < panic_buffer`: lowest representation.
/// - `buffer > safe_buffer`: highest representation within `bandwidth`.
/// - otherwise: highest representation within a linearly-interpolated
///   ceiling between the two thresholds.
///
/// Non-video sets always pick the lowest representation. BETA's one-segment
/// upshift hysteresis is applied by the caller (the scheduler passes
/// `suppress_upshift` through after an early termination) rather than here,
/// keeping this selector a pure function of its inputs.
pub struct AbrSelector {
    pub safe_buffer: f64,
    pub panic_buffer: f64,
}

impl AbrSelector {
    pub fn new(panic_buffer: f64, safe_buffer: f64) -> Self {
        assert!(
            panic_buffer < safe_buffer,
            "panic_buffer must be strictly below safe_buffer"
        );
        Self {
            safe_buffer,
            panic_buffer,
        }
    }

    /// Select a representation index per adaptation set for the upcoming
    /// segment. `suppress_upshift` caps the video pick at `previous_index`
    /// even when bandwidth/buffer would otherwise justify a higher one —
    /// the BETA one-segment hysteresis.
    pub fn select(
        &self,
        manifest: &Manifest,
        bandwidth_bps: f64,
        buffer_level: f64,
        previous_video_index: Option<usize>,
        suppress_upshift: bool,
    ) -> Selections {
        manifest
            .adaptation_sets
            .iter()
            .map(|set| {
                if set.content_type != ContentType::Video {
                    return 0;
                }
                let mut index = self.select_video_index(set.representations.len(), bandwidth_bps, buffer_level, set);
                if suppress_upshift
                    && let Some(prev) = previous_video_index
                    && index > prev
                {
                    index = prev;
                }
                index
            })
            .collect()
    }

    fn select_video_index(
        &self,
        _count: usize,
        bandwidth_bps: f64,
        buffer_level: f64,
        set: &crate::manifest::AdaptationSet,
    ) -> usize {
        let chosen = if buffer_level < self.panic_buffer {
            set.lowest()
        } else if buffer_level > self.safe_buffer {
            set.highest_within(bandwidth_bps)
        } else {
            let span = self.safe_buffer - self.panic_buffer;
            let fraction = (buffer_level - self.panic_buffer) / span;
            set.highest_within(bandwidth_bps * fraction)
        };
        let chosen = chosen.or_else(|| set.lowest());
        chosen
            .and_then(|rep| {
                set.representations
                    .iter()
                    .position(|candidate| candidate.id == rep.id)
            })
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{AdaptationSet, Representation};
    use std::sync::Arc;

    fn manifest_with(reps_bps: &[u64]) -> Manifest {
        let representations = reps_bps
            .iter()
            .map(|bps| Representation {
                id: Arc::from(format!("r{bps}")),
                bandwidth_bps: *bps,
                content_type: ContentType::Video,
                initialization_url: Arc::from("https://example.test/init.mp4"),
                segment_urls: Arc::from(vec![Arc::from("https://example.test/0.m4s")]),
            })
            .collect();
        Manifest {
            adaptation_sets: vec![AdaptationSet {
                content_type: ContentType::Video,
                representations,
            }],
            max_segment_duration: 2.0,
            total_segment_count: 10,
        }
    }

    #[test]
    fn panics_below_panic_buffer_pick_lowest() {
        let abr = AbrSelector::new(2.0, 6.0);
        let manifest = manifest_with(&[500_000, 1_000_000, 2_000_000, 4_000_000]);
        let selections = abr.select(&manifest, 3_000_000.0, 1.0, None, false);
        assert_eq!(selections, vec![0]);
    }

    #[test]
    fn above_safe_buffer_pick_highest_within_bandwidth() {
        let abr = AbrSelector::new(2.0, 6.0);
        let manifest = manifest_with(&[500_000, 1_000_000, 2_000_000, 4_000_000]);
        let selections = abr.select(&manifest, 3_000_000.0, 7.0, None, false);
        assert_eq!(selections, vec![2]); // 2Mbps is the highest <= 3Mbps
    }

    #[test]
    fn interpolation_region_scales_ceiling() {
        let abr = AbrSelector::new(2.0, 6.0);
        let manifest = manifest_with(&[500_000, 1_000_000, 2_000_000, 4_000_000]);
        // buffer = 4s -> fraction = (4-2)/(6-2) = 0.5, ceiling = 1.5Mbps
        let selections = abr.select(&manifest, 3_000_000.0, 4.0, None, false);
        assert_eq!(selections, vec![1]);
    }

    #[test]
    fn hysteresis_suppresses_upshift_after_early_termination() {
        let abr = AbrSelector::new(2.0, 6.0);
        let manifest = manifest_with(&[500_000, 1_000_000, 2_000_000, 4_000_000]);
        let selections = abr.select(&manifest, 3_000_000.0, 7.0, Some(0), true);
        assert_eq!(selections, vec![0]);
    }

    #[test]
    fn non_video_sets_always_pick_lowest() {
        let abr = AbrSelector::new(2.0, 6.0);
        let mut manifest = manifest_with(&[500_000, 1_000_000]);
        manifest.adaptation_sets.push(AdaptationSet {
            content_type: ContentType::Audio,
            representations: vec![
                Representation {
                    id: Arc::from("a-low"),
                    bandwidth_bps: 64_000,
                    content_type: ContentType::Audio,
                    initialization_url: Arc::from("https://example.test/a-init.mp4"),
                    segment_urls: Arc::from(vec![Arc::from("https://example.test/a0.m4s")]),
                },
                Representation {
                    id: Arc::from("a-high"),
                    bandwidth_bps: 128_000,
                    content_type: ContentType::Audio,
                    initialization_url: Arc::from("https://example.test/a-init.mp4"),
                    segment_urls: Arc::from(vec![Arc::from("https://example.test/a0.m4s")]),
                },
            ],
        });
        let selections = abr.select(&manifest, 10_000_000.0, 7.0, None, false);
        assert_eq!(selections[1], 0);
    }
}
