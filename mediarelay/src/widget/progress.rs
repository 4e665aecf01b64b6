//! Upload progress reporting.
//!
//! Progress is a percentage in `0..=100` published on a [`tokio::sync::watch`] channel. Within
//! one attempt readings never decrease; [`ProgressTracker::reset`] starts the next attempt at 0.

use bytes::Bytes;
use futures::{Stream, StreamExt, stream};
use std::sync::Arc;
use tokio::sync::watch;

/// Size of the body chunks handed to the HTTP client, and so the progress granularity.
pub const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct ProgressTracker {
    sender: Arc<watch::Sender<u8>>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(0);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<u8> {
        self.sender.subscribe()
    }

    pub fn current(&self) -> u8 {
        *self.sender.borrow()
    }

    /// Start a new attempt at 0.
    pub fn reset(&self) {
        self.sender.send_replace(0);
    }

    /// Record that `sent` of `total` bytes have been handed to the transport.
    pub fn record(&self, sent: u64, total: u64) {
        self.advance_to(percent(sent, total));
    }

    pub fn complete(&self) {
        self.advance_to(100);
    }

    fn advance_to(&self, reading: u8) {
        self.sender.send_if_modified(|current| {
            if reading > *current {
                *current = reading;
                true
            } else {
                false
            }
        });
    }
}

/// Percentage of `sent` over `total`, clamped to `0..=100`. An empty body counts as done.
pub fn percent(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (sent.min(total) as u128 * 100) / total as u128;
    pct as u8
}

/// Split `bytes` into a body stream that records progress as each chunk is pulled.
pub fn tracked_body(bytes: Bytes, tracker: ProgressTracker) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    let total = bytes.len() as u64;
    let chunks: Vec<Bytes> = (0..bytes.len())
        .step_by(CHUNK_SIZE)
        .map(|start| bytes.slice(start..(start + CHUNK_SIZE).min(bytes.len())))
        .collect();

    let mut sent = 0u64;
    stream::iter(chunks).map(move |chunk| {
        sent += chunk.len() as u64;
        tracker.record(sent, total);
        Ok::<_, std::io::Error>(chunk)
    })
}
