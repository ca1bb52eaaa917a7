//! HTTP/3 event demultiplexer.
//!
//! Translates raw per-URL HTTP/3 events (`HEADERS`, `DATA`, stream end) into
//! the bus protocol, and implements the partial-accept / drop bookkeeping
//! the download manager relies on. State is kept per-URL in a plain
//! `HashMap` — this type is only ever driven from the single cooperative
//! task that owns the QUIC connection, so no internal locking is needed.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::Notify;

use crate::events::{BusEvent, EventBus};

#[derive(Default)]
struct UrlState {
    content_length: Option<usize>,
    buffer: BytesMut,
    ended: bool,
    partial_accept: bool,
    notify: Arc<Notify>,
}

/// Demultiplexes H3 frames per URL. Owns no transport state — the download
/// manager feeds it `on_headers`/`on_data`/`on_stream_end` calls as H3
/// events arrive on a given stream.
pub struct H3EventParser {
    urls: HashMap<Arc<str>, UrlState>,
    bus: EventBus,
}

impl H3EventParser {
    pub fn new(bus: EventBus) -> Self {
        Self {
            urls: HashMap::new(),
            bus,
        }
    }

    fn state_mut(&mut self, url: &Arc<str>) -> &mut UrlState {
        self.urls.entry(url.clone()).or_default()
    }

    /// Record the declared `content-length` from a `HEADERS` frame.
    pub fn on_headers(&mut self, url: &Arc<str>, content_length: usize) {
        self.state_mut(url).content_length = Some(content_length);
    }

    /// Publish `TransferStart` for `url`.
    pub fn on_transfer_start(&mut self, url: &Arc<str>) {
        self.bus.publish(BusEvent::TransferStart { url: url.clone() });
    }

    /// Non-blocking check: if `url`'s transfer has ended or been marked
    /// partial-accept, take and return its bytes; otherwise `None`. Used by
    /// callers that cannot hold a lock across an `.await`.
    pub fn poll_complete(&mut self, url: &Arc<str>) -> Option<(Vec<u8>, usize)> {
        let state = self.state_mut(url);
        if state.partial_accept || state.ended {
            let size = state.content_length.unwrap_or(state.buffer.len());
            let bytes = state.buffer.split().to_vec();
            state.ended = false;
            Some((bytes, size))
        } else {
            None
        }
    }

    /// A cheap clone of the per-URL wake handle, for callers driving their
    /// own poll loop via [`H3EventParser::poll_complete`].
    pub fn notify_handle(&mut self, url: &Arc<str>) -> Arc<Notify> {
        self.state_mut(url).notify.clone()
    }

    /// Append a `DATA` chunk and publish `BytesTransferred`.
    pub fn on_data(&mut self, url: &Arc<str>, chunk: &[u8]) {
        let content_length = self.state_mut(url).content_length.unwrap_or(0);
        let state = self.state_mut(url);
        state.buffer.extend_from_slice(chunk);
        let position = state.buffer.len();

        self.bus.publish(BusEvent::BytesTransferred {
            url: url.clone(),
            length: chunk.len(),
            position,
            size: content_length,
            content: Bytes::copy_from_slice(chunk),
        });
    }

    /// Natural FIN or local close on the stream.
    pub fn on_stream_end(&mut self, url: &Arc<str>) {
        let state = self.state_mut(url);
        state.ended = true;
        let notify = state.notify.clone();
        let partial = state.partial_accept;
        let size = state.buffer.len();

        if !partial {
            self.bus.publish(BusEvent::TransferEnd {
                url: url.clone(),
                size,
            });
        }
        notify.notify_waiters();
    }

    /// Mark `url` partial-accept: the stream is closing but bytes already
    /// received are retained. Wakes any waiter in `wait_complete`.
    pub fn close_stream(&mut self, url: &Arc<str>) {
        let state = self.state_mut(url);
        state.partial_accept = true;
        state.notify.notify_waiters();
    }

    /// Discard accumulated state for `url` entirely (used for replacement).
    pub fn drop_stream(&mut self, url: &Arc<str>) {
        if let Some(state) = self.urls.remove(url) {
            state.notify.notify_waiters();
        }
    }

    /// Await (or immediately return, if partial-accept was already set or
    /// the transfer already ended) the accumulated bytes and declared
    /// content-length.
    pub async fn wait_complete(&mut self, url: &Arc<str>) -> (Vec<u8>, usize) {
        loop {
            {
                let state = self.state_mut(url);
                if state.partial_accept || state.ended {
                    let size = state.content_length.unwrap_or(state.buffer.len());
                    let bytes = state.buffer.split().to_vec();
                    state.ended = false;
                    return (bytes, size);
                }
            }
            let notify = self.state_mut(url).notify.clone();
            notify.notified().await;
        }
    }
}
