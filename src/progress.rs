//! Progress normalization for backend transfer ticks.
//!
//! The backend reports low-level events; the tracker turns them into the
//! percentage/rate/ETA snapshot the status surface exposes. Byte accounting
//! differs by mode: single-item transfers report the backend's latest
//! absolute sample, playlists accumulate deltas across entries because each
//! entry restarts its own byte counter from zero.
//!
//! Cancellation is checked at the start of every callback. Once observed, no
//! further bytes are accepted and the abort is signalled back to the backend
//! through the `Err` return.

use std::sync::Mutex;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// A single low-level progress tick from the backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressEvent {
    /// Transfer of an item started.
    Started,
    /// Bytes are flowing.
    Downloading {
        /// Bytes downloaded so far for the current item (absolute).
        bytes_downloaded: u64,
        /// Declared total for the current item, when the backend knows it.
        total_bytes: Option<u64>,
        /// Instantaneous rate in bytes/second.
        rate: f64,
        /// Estimated seconds remaining, when known.
        eta_seconds: Option<u64>,
    },
    /// The current item finished.
    Finished,
}

/// Signalled to the backend when the request was cancelled; the backend must
/// stop the transfer.
#[derive(Debug, thiserror::Error)]
#[error("transfer cancelled")]
pub struct ProgressAborted;

/// Snapshot of one request's transfer state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransferState {
    /// Bytes transferred so far (cumulative across entries for playlists).
    pub bytes_transferred: u64,
    /// Declared total size in bytes; 0 when unknown.
    pub declared_size: u64,
    /// Instantaneous rate in bytes/second.
    pub rate: f64,
    /// Estimated seconds remaining, when known.
    pub eta_seconds: Option<u64>,
    /// Completion percentage in [0, 100]. Left unchanged while the declared
    /// size is unknown.
    pub percentage: f64,
    /// Whether cancellation has been observed.
    pub cancelled: bool,
}

#[derive(Debug, Default)]
struct Inner {
    state: TransferState,
    /// Last absolute sample seen for the current playlist entry.
    last_seen_entry: u64,
}

/// Per-request progress tracker; the only mutator of [`TransferState`].
#[derive(Debug)]
pub struct ProgressTracker {
    playlist: bool,
    cancel: CancellationToken,
    inner: Mutex<Inner>,
}

impl ProgressTracker {
    /// Creates a tracker for one request.
    #[must_use]
    pub fn new(playlist: bool, cancel: CancellationToken) -> Self {
        Self {
            playlist,
            cancel,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Seeds the declared size from resolved metadata (per-entry sums for
    /// playlists).
    pub fn set_declared_size(&self, size: u64) {
        let mut inner = self.lock();
        inner.state.declared_size = size;
    }

    /// Declared size currently known; 0 when unknown.
    #[must_use]
    pub fn declared_size(&self) -> u64 {
        self.lock().state.declared_size
    }

    /// Returns a snapshot of the current transfer state.
    #[must_use]
    pub fn snapshot(&self) -> TransferState {
        self.lock().state.clone()
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Handles one backend progress tick.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressAborted`] when the request has been cancelled; the
    /// backend must abort the transfer on seeing it.
    pub fn observe(&self, event: ProgressEvent) -> Result<(), ProgressAborted> {
        // Cancellation is read on every invocation, not just once.
        if self.cancel.is_cancelled() {
            let mut inner = self.lock();
            inner.state.cancelled = true;
            return Err(ProgressAborted);
        }

        let mut inner = self.lock();
        match event {
            ProgressEvent::Started => {}
            ProgressEvent::Downloading {
                bytes_downloaded,
                total_bytes,
                rate,
                eta_seconds,
            } => {
                inner.state.rate = rate;
                if self.playlist {
                    // Entries restart their own counters from zero; track the
                    // delta against the last sample to avoid double-counting.
                    let delta = bytes_downloaded.saturating_sub(inner.last_seen_entry);
                    inner.last_seen_entry = bytes_downloaded;
                    inner.state.bytes_transferred =
                        inner.state.bytes_transferred.saturating_add(delta);
                } else {
                    if let Some(total) = total_bytes {
                        inner.state.declared_size = total;
                    }
                    inner.state.bytes_transferred = bytes_downloaded;
                    inner.state.eta_seconds = eta_seconds;
                }
                if inner.state.declared_size > 0 {
                    let pct = (inner.state.bytes_transferred as f64
                        / inner.state.declared_size as f64)
                        * 100.0;
                    inner.state.percentage = pct.clamp(0.0, 100.0);
                }
            }
            ProgressEvent::Finished => {
                if self.playlist {
                    inner.last_seen_entry = 0;
                }
            }
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
