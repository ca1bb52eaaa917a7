//! Scheduler: the cooperative loop that walks segment indices in
//! order, drives the ABR selector and download manager, and applies
//! back-pressure against the buffer manager.

mod request;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info, instrument};

pub use request::{Completion, SegmentRequest};

use crate::abr::AbrSelector;
use crate::bandwidth::BandwidthEstimator;
use crate::buffer::BufferManager;
use crate::config::Config;
use crate::download::DownloadManager;
use crate::events::{BusEvent, EventBus};
use crate::manifest::Manifest;

/// A request from the BETA controller to re-fetch `index` at the lowest
/// bitrate, discarding the in-flight attempt (drop-and-replace).
/// Guarded off by default via [`Config::enable_drop_and_replace`].
#[derive(Default)]
pub struct ReplacementSignal {
    index: Mutex<Option<usize>>,
    notify: Notify,
}

impl ReplacementSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn request(&self, index: usize) {
        *self.index.lock() = Some(index);
        self.notify.notify_one();
    }

    fn take(&self) -> Option<usize> {
        self.index.lock().take()
    }
}

/// Tracks, for tests and the player loop, whether the scheduler has worked
/// through every segment index in the manifest.
#[derive(Clone, Default)]
pub struct EndFlag(Arc<AtomicBool>);

impl EndFlag {
    pub fn is_end(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Mark the run as finished — normally only the scheduler calls this,
    /// but it's exposed so callers driving the player against a manifest
    /// they know is exhausted by other means can do so directly.
    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }
}

pub struct Scheduler {
    manifest: Arc<Manifest>,
    config: Arc<Config>,
    abr: AbrSelector,
    bus: EventBus,
    buffer: Arc<Mutex<BufferManager>>,
    downloads: Arc<dyn DownloadManager>,
    replacement: Arc<ReplacementSignal>,
    bandwidth: Arc<Mutex<BandwidthEstimator>>,
    end_flag: EndFlag,
    previous_video_index: AtomicUsize,
    has_previous: AtomicBool,
    /// Last representation id fetched per adaptation set, so the init
    /// segment is only re-issued on an actual representation switch.
    last_representation: Mutex<Vec<Option<Arc<str>>>>,
}

impl Scheduler {
    pub fn new(
        manifest: Arc<Manifest>,
        config: Arc<Config>,
        bus: EventBus,
        buffer: Arc<Mutex<BufferManager>>,
        downloads: Arc<dyn DownloadManager>,
        replacement: Arc<ReplacementSignal>,
        bandwidth: Arc<Mutex<BandwidthEstimator>>,
    ) -> Self {
        let abr = AbrSelector::new(config.panic_buffer_level, config.safe_buffer_level);
        let set_count = manifest.adaptation_sets.len();
        Self {
            manifest,
            config,
            abr,
            bus,
            buffer,
            downloads,
            replacement,
            bandwidth,
            end_flag: EndFlag::default(),
            previous_video_index: AtomicUsize::new(0),
            has_previous: AtomicBool::new(false),
            last_representation: Mutex::new(vec![None; set_count]),
        }
    }

    pub fn end_flag(&self) -> EndFlag {
        self.end_flag.clone()
    }

    fn total_segments(&self) -> usize {
        self.manifest.total_segment_count
    }

    fn previous_index(&self) -> Option<usize> {
        self.has_previous
            .load(Ordering::Acquire)
            .then(|| self.previous_video_index.load(Ordering::Acquire))
    }

    fn record_previous(&self, index: usize) {
        self.previous_video_index.store(index, Ordering::Release);
        self.has_previous.store(true, Ordering::Release);
    }

    /// Run the full segment loop until every index has been consumed, or a
    /// non-policy error aborts it.
    #[instrument(skip(self))]
    pub async fn run(&self) -> crate::error::Result<()> {
        let mut index = 0usize;
        while index < self.total_segments() {
            self.wait_for_capacity().await;

            let mut suppress_upshift = false;
            loop {
                match self.run_one_index(index, suppress_upshift).await? {
                    IndexOutcome::Done => break,
                    IndexOutcome::Replace { forced_lowest } => {
                        suppress_upshift = forced_lowest;
                        continue;
                    }
                }
            }
            index += 1;
        }
        self.end_flag.set();
        info!("all segments scheduled");
        Ok(())
    }

    async fn wait_for_capacity(&self) {
        loop {
            let (level, notify) = {
                let buffer = self.buffer.lock();
                (buffer.buffer_level(), buffer.level_changed())
            };
            if level + self.manifest.max_segment_duration <= self.config.buffer_duration {
                return;
            }
            notify.notified().await;
        }
    }

    #[instrument(skip(self), fields(index))]
    async fn run_one_index(
        &self,
        index: usize,
        force_lowest: bool,
    ) -> crate::error::Result<IndexOutcome> {
        let buffer_level = self.buffer.lock().buffer_level();
        let selections = if force_lowest {
            vec![0; self.manifest.adaptation_sets.len()]
        } else {
            let bandwidth_bps = self.bandwidth.lock().bandwidth();
            self.abr.select(
                &self.manifest,
                bandwidth_bps,
                buffer_level,
                self.previous_index(),
                false,
            )
        };

        self.bus.publish(BusEvent::SegmentDownloadStart {
            index,
            selections: selections.clone(),
        });

        let mut duration = self.manifest.max_segment_duration;
        let mut request = SegmentRequest::new(index);
        for (set_index, adaptation_set) in self.manifest.adaptation_sets.iter().enumerate() {
            let rep_index = selections[set_index];
            let Some(representation) = adaptation_set.representations.get(rep_index) else {
                continue;
            };
            let is_video = adaptation_set.content_type == crate::manifest::ContentType::Video;
            if is_video {
                self.record_previous(rep_index);
            }

            let Some(segment_url) = representation.segment_url(index) else {
                continue;
            };

            let switched = {
                let mut last = self.last_representation.lock();
                let changed = last[set_index].as_deref() != Some(representation.id.as_ref());
                last[set_index] = Some(representation.id.clone());
                changed
            };
            if switched {
                let init_url = representation.initialization_url.clone();
                self.downloads.download(init_url.clone()).await;
                let _ = self.downloads.wait_complete(&init_url).await;
            }

            let url: Arc<str> = Arc::from(segment_url);
            if is_video {
                request.url = Some(url.clone());
            }

            self.downloads.download(url.clone()).await;
            let (bytes, declared_size) =
                tokio::select! {
                    result = self.downloads.wait_complete(&url) => result,
                    _ = self.wait_for_replacement(index) => {
                        self.downloads.drop_url(&url).await;
                        if is_video {
                            request.cancelled = true;
                        }
                        return Ok(IndexOutcome::Replace { forced_lowest: true });
                    }
                };

            let completion = Completion::from_sizes(bytes.len(), declared_size);
            if is_video {
                request.first_bytes_received = true;
                request.partial = completion == Completion::Partial;
            }
            debug!(?completion, received = bytes.len(), declared_size, url = %request.url.as_deref().unwrap_or(""), "segment delivered");
            duration = self.manifest.max_segment_duration;
        }

        self.buffer.lock().enqueue(duration);
        self.bus.publish(BusEvent::SegmentDownloadComplete { index });
        Ok(IndexOutcome::Done)
    }

    async fn wait_for_replacement(&self, index: usize) {
        loop {
            if self.replacement.take() == Some(index) {
                return;
            }
            self.replacement.notify.notified().await;
        }
    }
}

enum IndexOutcome {
    Done,
    Replace { forced_lowest: bool },
}
