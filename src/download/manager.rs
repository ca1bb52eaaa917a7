//! Download manager: fetches segments over the shared QUIC/H3
//! connection pool and demultiplexes their bytes through [`H3EventParser`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Buf;
use http::Request;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::error::{DashBetaError, Result};
use crate::events::{BusEvent, EventBus};
use crate::quic::{ConnectionPool, Origin};

use super::h3_event_parser::H3EventParser;

/// The download manager contract. All methods are idempotent
/// no-ops for URLs the manager doesn't currently know about.
#[async_trait]
pub trait DownloadManager: Send + Sync {
    /// Enqueue a GET for `url`. Returns immediately; completion is observed
    /// on the bus or via [`DownloadManager::wait_complete`].
    async fn download(&self, url: Arc<str>);

    /// Await a full or partial delivery for `url`.
    async fn wait_complete(&self, url: &Arc<str>) -> (Vec<u8>, usize);

    /// Close the stream for `url`; the bytes already received are kept and
    /// returned to waiters as a partial-accept. After this returns, no
    /// further `BytesTransferred` for `url` will be published.
    async fn stop(&self, url: &Arc<str>);

    /// Close the stream and discard its buffered bytes (replacement).
    async fn drop_url(&self, url: &Arc<str>);

    /// Close the stream without propagating acceptance — a pending request
    /// superseded before it ever produced usable bytes.
    async fn cancel_read_url(&self, url: &Arc<str>);
}

struct ActiveStream {
    cancel: CancellationToken,
}

/// Real transport: one [`ConnectionPool`] connection per origin, multiple
/// concurrent streams multiplexed on it.
pub struct QuicDownloadManager {
    pool: Arc<ConnectionPool>,
    parser: Arc<Mutex<H3EventParser>>,
    active: Mutex<HashMap<Arc<str>, ActiveStream>>,
    read_timeout: Duration,
}

impl QuicDownloadManager {
    pub fn new(pool: Arc<ConnectionPool>, bus: EventBus, read_timeout: Duration) -> Self {
        Self {
            pool,
            parser: Arc::new(Mutex::new(H3EventParser::new(bus))),
            active: Mutex::new(HashMap::new()),
            read_timeout,
        }
    }

    #[instrument(skip(self), fields(%url))]
    async fn run_stream(
        pool: Arc<ConnectionPool>,
        parser: Arc<Mutex<H3EventParser>>,
        url: Arc<str>,
        cancel: CancellationToken,
        read_timeout: Duration,
    ) -> Result<()> {
        let parsed = Url::parse(&url).map_err(|error| DashBetaError::protocol(error.to_string()))?;
        let origin = Origin::from_url(&parsed)?;
        let mut send_request = pool.send_request_for(&origin).await?;

        let request = Request::get(parsed.as_str())
            .body(())
            .map_err(|error| DashBetaError::protocol(error.to_string()))?;

        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            result = send_request.send_request(request) => {
                result.map_err(|error| DashBetaError::protocol(format!("send_request: {error}")))?
            }
        };
        stream
            .finish()
            .await
            .map_err(|error| DashBetaError::protocol(format!("finish: {error}")))?;

        let response = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            result = stream.recv_response() => {
                result.map_err(|error| DashBetaError::protocol(format!("recv_response: {error}")))?
            }
        };
        let content_length = response
            .headers()
            .get(http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);

        parser.lock().on_headers(&url, content_length);
        parser.lock().on_transfer_start(&url);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    parser.lock().close_stream(&url);
                    return Ok(());
                }
                _ = tokio::time::sleep(read_timeout) => {
                    return Err(DashBetaError::Timeout {
                        reason: format!("no data on stream for {url} within {read_timeout:?}"),
                    });
                }
                chunk = stream.recv_data() => {
                    match chunk.map_err(|error| DashBetaError::protocol(format!("recv_data: {error}")))? {
                        Some(mut buf) => {
                            let bytes = buf.copy_to_bytes(buf.remaining());
                            parser.lock().on_data(&url, &bytes);
                        }
                        None => {
                            parser.lock().on_stream_end(&url);
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl DownloadManager for QuicDownloadManager {
    async fn download(&self, url: Arc<str>) {
        let cancel = CancellationToken::new();
        self.active.lock().insert(
            url.clone(),
            ActiveStream {
                cancel: cancel.clone(),
            },
        );

        let pool = self.pool.clone();
        let parser = self.parser.clone();
        let task_url = url.clone();
        let read_timeout = self.read_timeout;
        tokio::spawn(async move {
            let fail_parser = parser.clone();
            if let Err(error) =
                Self::run_stream(pool, parser, task_url.clone(), cancel, read_timeout).await
            {
                warn!(url = %task_url, %error, "segment download failed");
                fail_parser.lock().close_stream(&task_url);
            }
        });
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
        if let Some(active) = self.active.lock().remove(url) {
            active.cancel.cancel();
        }
        self.parser.lock().close_stream(url);
        debug!(%url, "stopped stream, partial-accept");
    }

    async fn drop_url(&self, url: &Arc<str>) {
        if let Some(active) = self.active.lock().remove(url) {
            active.cancel.cancel();
        }
        self.parser.lock().drop_stream(url);
        debug!(%url, "dropped stream, bytes discarded");
    }

    async fn cancel_read_url(&self, url: &Arc<str>) {
        if let Some(active) = self.active.lock().remove(url) {
            active.cancel.cancel();
        }
        self.parser.lock().drop_stream(url);
        debug!(%url, "cancelled pending read");
    }
}
