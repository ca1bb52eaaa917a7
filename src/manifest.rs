//! Immutable manifest data model.
//!
//! MPD XML parsing is out of scope; the parser is assumed to hand us a
//! `Manifest` already built. These types are plain, `Clone`-able value
//! records — no behavior lives here beyond a few convenience accessors.

use std::sync::Arc;

/// Content type of an [`AdaptationSet`]. Only `Video` participates in ABR
/// adaptation; other sets always pick the lowest-bitrate representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Video,
    Audio,
    Other,
}

/// One encoding of the content at a specific bitrate.
#[derive(Debug, Clone)]
pub struct Representation {
    pub id: Arc<str>,
    pub bandwidth_bps: u64,
    pub content_type: ContentType,
    pub initialization_url: Arc<str>,
    pub segment_urls: Arc<[Arc<str>]>,
}

impl Representation {
    pub fn segment_url(&self, index: usize) -> Option<&str> {
        self.segment_urls.get(index).map(|s| s.as_ref())
    }

    pub fn segment_count(&self) -> usize {
        self.segment_urls.len()
    }
}

/// Ordered collection of representations for one content type.
#[derive(Debug, Clone)]
pub struct AdaptationSet {
    pub content_type: ContentType,
    /// Ordered ascending by `bandwidth_bps`.
    pub representations: Vec<Representation>,
}

impl AdaptationSet {
    pub fn lowest(&self) -> Option<&Representation> {
        self.representations.first()
    }

    pub fn highest(&self) -> Option<&Representation> {
        self.representations.last()
    }

    /// Highest representation whose bitrate does not exceed `ceiling_bps`.
    /// Falls back to the lowest representation if none qualify.
    pub fn highest_within(&self, ceiling_bps: f64) -> Option<&Representation> {
        self.representations
            .iter()
            .rev()
            .find(|r| (r.bandwidth_bps as f64) <= ceiling_bps)
            .or_else(|| self.lowest())
    }
}

/// Immutable description of a run's content, fixed for the lifetime of the
/// player.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub adaptation_sets: Vec<AdaptationSet>,
    pub max_segment_duration: f64,
    pub total_segment_count: usize,
}

impl Manifest {
    pub fn video_set(&self) -> Option<&AdaptationSet> {
        self.adaptation_sets
            .iter()
            .find(|set| set.content_type == ContentType::Video)
    }

    pub fn total_duration(&self) -> f64 {
        self.max_segment_duration * self.total_segment_count as f64
    }
}
