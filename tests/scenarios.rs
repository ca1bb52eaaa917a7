//! End-to-end scenarios driven against [`dash_beta_core::download::MockDownloadManager`]
//! rather than real QUIC, covering the seed scenarios described by the core's
//! testable properties: full-manifest completion, end-of-stream, and the
//! idempotence of `stop`/`drop_url` on already-settled or unknown URLs.

use std::sync::Arc;
use std::time::Duration;

use dash_beta_core::bandwidth::BandwidthEstimator;
use dash_beta_core::buffer::BufferManager;
use dash_beta_core::config::Config;
use dash_beta_core::download::{DownloadManager, MockDownloadManager};
use dash_beta_core::manifest::{AdaptationSet, ContentType, Manifest, Representation};
use dash_beta_core::player::Player;
use dash_beta_core::scheduler::{EndFlag, ReplacementSignal, Scheduler};
use dash_beta_core::{BusEvent, EventBus, PlayerState};

fn representation(id: &str, bps: u64, segment_count: usize) -> Representation {
    let segment_urls = (0..segment_count)
        .map(|i| Arc::from(format!("https://example.test/{id}/{i}.m4s")))
        .collect::<Vec<_>>();
    Representation {
        id: Arc::from(id),
        bandwidth_bps: bps,
        content_type: ContentType::Video,
        initialization_url: Arc::from(format!("https://example.test/{id}/init.mp4")),
        segment_urls: Arc::from(segment_urls),
    }
}

fn flat_manifest(segment_count: usize) -> Manifest {
    Manifest {
        adaptation_sets: vec![AdaptationSet {
            content_type: ContentType::Video,
            representations: vec![
                representation("500k", 500_000, segment_count),
                representation("1m", 1_000_000, segment_count),
                representation("2m", 2_000_000, segment_count),
                representation("4m", 4_000_000, segment_count),
            ],
        }],
        max_segment_duration: 2.0,
        total_segment_count: segment_count,
    }
}

/// Spawns a task that watches `downloads.requested_urls()` and immediately
/// completes every newly-seen URL in full — the mock stands in for a
/// network that never stalls.
fn spawn_instant_responder(downloads: Arc<MockDownloadManager>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut served = std::collections::HashSet::new();
        loop {
            for url in downloads.requested_urls() {
                if served.insert(url.clone()) {
                    downloads.feed_headers(&url, 4);
                    downloads.feed_data(&url, b"data");
                    downloads.feed_end(&url);
                }
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
}

#[tokio::test]
async fn scheduler_completes_every_segment_in_order() {
    let manifest = Arc::new(flat_manifest(5));
    let config = Arc::new(Config::default());
    let bus = EventBus::new();
    let downloads = Arc::new(MockDownloadManager::new(bus.clone()));

    let completions = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let collector_completions = completions.clone();
    let mut listener = bus.subscribe();
    let collector = tokio::spawn(async move {
        while let Some(event) = listener.recv().await {
            if let BusEvent::SegmentDownloadComplete { index } = event {
                collector_completions.lock().push(index);
            }
        }
    });

    let responder = spawn_instant_responder(downloads.clone());
    let buffer = Arc::new(parking_lot::Mutex::new(BufferManager::new(bus.clone())));
    let bandwidth = Arc::new(parking_lot::Mutex::new(BandwidthEstimator::new(
        3_000_000.0,
        0.5,
        bus.clone(),
        1.0,
        2,
        10.0,
        false,
    )));
    let scheduler = Scheduler::new(
        manifest,
        config,
        bus.clone(),
        buffer,
        downloads,
        ReplacementSignal::new(),
        bandwidth,
    );
    let end_flag = scheduler.end_flag();

    tokio::time::timeout(Duration::from_secs(5), scheduler.run())
        .await
        .expect("scheduler should finish within the timeout")
        .expect("scheduler run should not fail");
    assert!(end_flag.is_end());

    responder.abort();
    drop(bus);
    let _ = tokio::time::timeout(Duration::from_millis(50), collector).await;
    assert_eq!(completions.lock().clone(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn stop_is_idempotent_and_drop_on_unknown_url_is_a_noop() {
    let bus = EventBus::new();
    let downloads = MockDownloadManager::new(bus);
    let url: Arc<str> = Arc::from("https://example.test/0.m4s");
    downloads.download(url.clone()).await;
    downloads.feed_headers(&url, 100);
    downloads.feed_data(&url, b"0123456789");

    downloads.stop(&url).await;
    let (first, first_size) = downloads.wait_complete(&url).await;
    downloads.stop(&url).await; // idempotent: calling twice changes nothing observable
    let (second, second_size) = downloads.wait_complete(&url).await;
    assert_eq!(first, second);
    assert_eq!(first_size, second_size);
    assert_eq!(first.len(), 10);
    assert!(first.len() < first_size);

    let unknown: Arc<str> = Arc::from("https://example.test/never-requested.m4s");
    downloads.drop_url(&unknown).await;
    downloads.cancel_read_url(&unknown).await;
}

#[tokio::test]
async fn player_reaches_end_once_the_scheduler_is_done_and_buffer_drains() {
    let bus = EventBus::new();
    let buffer = Arc::new(parking_lot::Mutex::new(BufferManager::new(bus.clone())));
    let config = Arc::new(Config {
        update_interval: 0.01,
        min_start_duration: 0.02,
        ..Config::default()
    });
    let end_flag = EndFlag::default();
    buffer.lock().enqueue(0.05);
    end_flag.set();

    let mut player = Player::new(config, bus, buffer, end_flag);
    tokio::time::timeout(Duration::from_secs(5), player.run())
        .await
        .expect("player should reach END without hanging");
    assert_eq!(player.state(), PlayerState::End);
}
