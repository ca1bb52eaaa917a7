//! Download manager and its HTTP/3 event demultiplexer.

mod h3_event_parser;
mod manager;
mod mock;

pub use h3_event_parser::H3EventParser;
pub use manager::{DownloadManager, QuicDownloadManager};
pub use mock::MockDownloadManager;
