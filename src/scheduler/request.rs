//! `SegmentRequest`: the scheduler's mutable per-segment bookkeeping.

use std::sync::Arc;

/// One in-flight (or just-completed) segment request. Created when the
/// scheduler issues a fetch, destroyed once the scheduler accepts its
/// completion or its replacement.
#[derive(Debug, Clone)]
pub struct SegmentRequest {
    pub index: usize,
    pub url: Option<Arc<str>>,
    pub first_bytes_received: bool,
    pub cancelled: bool,
    pub partial: bool,
}

impl SegmentRequest {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            url: None,
            first_bytes_received: false,
            cancelled: false,
            partial: false,
        }
    }
}

/// The scheduler's completion verdict for an accepted segment (
/// step 5): whether the returned byte count matched the declared size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Full,
    Partial,
}

impl Completion {
    pub fn from_sizes(received: usize, declared: usize) -> Self {
        if received >= declared {
            Completion::Full
        } else {
            Completion::Partial
        }
    }
}
