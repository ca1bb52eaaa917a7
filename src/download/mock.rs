//! In-memory [`DownloadManager`] for scheduler/BETA unit tests: no network,
//! bytes are delivered by the test driving `feed`/`end`/`close` directly.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::h3_event_parser::H3EventParser;
use super::manager::DownloadManager;
use crate::events::EventBus;

#[derive(Default)]
struct Requested {
    urls: Vec<Arc<str>>,
    stopped: Vec<Arc<str>>,
    dropped: Vec<Arc<str>>,
    cancelled: Vec<Arc<str>>,
}

pub struct MockDownloadManager {
    parser: Mutex<H3EventParser>,
    requested: Mutex<Requested>,
}

impl MockDownloadManager {
    pub fn new(bus: EventBus) -> Self {
        Self {
            parser: Mutex::new(H3EventParser::new(bus)),
            requested: Mutex::new(Requested::default()),
        }
    }

    /// URLs passed to `download` so far, in order.
    pub fn requested_urls(&self) -> Vec<Arc<str>> {
        self.requested.lock().urls.clone()
    }

    /// URLs passed to `stop` so far, in order.
    pub fn stopped_urls(&self) -> Vec<Arc<str>> {
        self.requested.lock().stopped.clone()
    }

    /// URLs passed to `drop_url` so far, in order.
    pub fn dropped_urls(&self) -> Vec<Arc<str>> {
        self.requested.lock().dropped.clone()
    }

    /// URLs passed to `cancel_read_url` so far, in order.
    pub fn cancelled_urls(&self) -> Vec<Arc<str>> {
        self.requested.lock().cancelled.clone()
    }

    pub fn feed_headers(&self, url: &Arc<str>, content_length: usize) {
        self.parser.lock().on_headers(url, content_length);
    }

    pub fn feed_data(&self, url: &Arc<str>, chunk: &[u8]) {
        self.parser.lock().on_data(url, chunk);
    }

    pub fn feed_end(&self, url: &Arc<str>) {
        self.parser.lock().on_stream_end(url);
    }
}

#[async_trait]
impl DownloadManager for MockDownloadManager {
    async fn download(&self, url: Arc<str>) {
        self.requested.lock().urls.push(url.clone());
        self.parser.lock().on_transfer_start(&url);
    }

    async fn wait_complete(&self, url: &Arc<str>) -> (Vec<u8>, usize) {
        loop {
            let notify = {
                let mut parser = self.parser.lock();
                if let Some(result) = parser.poll_complete(url) {
                    return result;
                }
                parser.notify_handle(url)
            };
            notify.notified().await;
        }
    }

    async fn stop(&self, url: &Arc<str>) {
        self.requested.lock().stopped.push(url.clone());
        self.parser.lock().close_stream(url);
    }

    async fn drop_url(&self, url: &Arc<str>) {
        self.requested.lock().dropped.push(url.clone());
        self.parser.lock().drop_stream(url);
    }

    async fn cancel_read_url(&self, url: &Arc<str>) {
        self.requested.lock().cancelled.push(url.clone());
        self.parser.lock().drop_stream(url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;

    #[tokio::test]
    async fn full_download_round_trips_through_the_manager() {
        let mgr = MockDownloadManager::new(EventBus::new());
        let url: Arc<str> = Arc::from("https://example.test/0.m4s");
        mgr.download(url.clone()).await;
        mgr.feed_headers(&url, 5);
        mgr.feed_data(&url, b"hello");
        mgr.feed_end(&url);

        let (bytes, size) = mgr.wait_complete(&url).await;
        assert_eq!(bytes, b"hello");
        assert_eq!(size, 5);
        assert_eq!(mgr.requested_urls(), vec![url]);
    }

    #[tokio::test]
    async fn stop_yields_partial_bytes() {
        let mgr = MockDownloadManager::new(EventBus::new());
        let url: Arc<str> = Arc::from("https://example.test/0.m4s");
        mgr.download(url.clone()).await;
        mgr.feed_headers(&url, 100);
        mgr.feed_data(&url, b"partial-da");
        mgr.stop(&url).await;

        let (bytes, size) = mgr.wait_complete(&url).await;
        assert_eq!(bytes.len(), 10);
        assert_eq!(size, 100);
    }

    #[tokio::test]
    async fn stop_and_drop_are_noops_for_unknown_urls() {
        let mgr = MockDownloadManager::new(EventBus::new());
        let url: Arc<str> = Arc::from("https://example.test/missing.m4s");
        mgr.stop(&url).await;
        mgr.drop_url(&url).await;
        mgr.cancel_read_url(&url).await;
    }
}
