//! Seam to the external extraction/transfer backend.
//!
//! The engine never talks to the network itself; metadata probes and the
//! transfer run through [`ExtractionBackend`]. Backend failures cross this
//! seam as raw text inside [`BackendError::Failure`] and are classified by
//! the phrase table at the first layer that sees them — backend error objects
//! themselves never travel further up.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::progress::ProgressTracker;
use crate::resolver::rename::RenameWatcher;

/// Parameters for one metadata probe attempt.
#[derive(Debug, Clone)]
pub struct ProbeSpec {
    /// Source URL.
    pub url: Url,
    /// Client profile to present.
    pub profile: String,
    /// Materialized credential file, when one is selected.
    pub credential_file: Option<PathBuf>,
    /// Format selector.
    pub format: String,
    /// Whether playlist extraction is expected.
    pub playlist: bool,
    /// Backend-specific passthrough keys.
    pub passthrough: BTreeMap<String, Value>,
}

/// Metadata for one playlist entry.
#[derive(Debug, Clone, Default)]
pub struct EntryMeta {
    /// Entry title, when present and usable.
    pub title: Option<String>,
    /// Alternate title.
    pub alt_title: Option<String>,
    /// Uploader / channel name.
    pub uploader: Option<String>,
    /// Backend-unique entry id.
    pub id: Option<String>,
    /// Declared size in bytes, when known.
    pub size: Option<u64>,
}

/// Resolved descriptive metadata for a source URL prior to transfer.
///
/// Rebuilt from scratch on every probe attempt; `incomplete_metadata` is the
/// per-attempt warning flag raised by the backend when title fields were
/// missing or placeholders.
#[derive(Debug, Clone, Default)]
pub struct ExtractionResult {
    /// Primary title.
    pub title: Option<String>,
    /// Alternate title.
    pub alt_title: Option<String>,
    /// Uploader / channel name.
    pub uploader: Option<String>,
    /// Backend-unique media id.
    pub id: Option<String>,
    /// Name of the extractor that handled the URL.
    pub extractor: Option<String>,
    /// Container extension reported by the backend (with leading dot).
    pub ext: Option<String>,
    /// Declared total size in bytes, when known (single item).
    pub total_size: Option<u64>,
    /// The source is a live stream.
    pub is_live: bool,
    /// The backend flagged the title metadata as missing or placeholder.
    pub incomplete_metadata: bool,
    /// Playlist entries; empty for single items.
    pub entries: Vec<EntryMeta>,
}

impl ExtractionResult {
    /// Whether the result describes a multi-entry playlist.
    #[must_use]
    pub fn is_playlist(&self) -> bool {
        !self.entries.is_empty()
    }
}

/// Where the transfer writes its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLayout {
    /// Single file directly under the download directory.
    Flat {
        /// Download directory.
        dir: PathBuf,
        /// Final file name including extension.
        file_name: String,
    },
    /// Media file plus side files inside a per-item directory.
    ItemDirectory {
        /// Download directory.
        dir: PathBuf,
        /// Per-item directory name (the name stem).
        stem: String,
        /// Final file name including extension.
        file_name: String,
    },
    /// Playlist entries inside a per-playlist directory.
    Playlist {
        /// Download directory.
        dir: PathBuf,
        /// Playlist directory name.
        folder: String,
    },
}

impl OutputLayout {
    /// The path reported as the request's final output.
    #[must_use]
    pub fn final_path(&self) -> PathBuf {
        match self {
            Self::Flat { dir, file_name } => dir.join(file_name),
            Self::ItemDirectory {
                dir,
                stem,
                file_name,
            } => dir.join(stem).join(file_name),
            Self::Playlist { dir, folder } => dir.join(folder),
        }
    }
}

/// Parameters for one transfer attempt.
#[derive(Debug, Clone)]
pub struct TransferSpec {
    /// Source URL.
    pub url: Url,
    /// Client profile to present.
    pub profile: String,
    /// Materialized credential file, when one is selected.
    pub credential_file: Option<PathBuf>,
    /// Format selector.
    pub format: String,
    /// Output layout for the transfer.
    pub layout: OutputLayout,
    /// Backend-specific passthrough keys.
    pub passthrough: BTreeMap<String, Value>,
}

/// Callbacks the backend drives during a transfer.
#[derive(Debug)]
pub struct TransferContext {
    /// Progress sink; an `Err` from `observe` means "stop the transfer".
    pub progress: Arc<ProgressTracker>,
    /// Sink for backend debug lines; picks up post-processed renames.
    pub rename: RenameWatcher,
}

/// Failure reported by the backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The transfer stopped because the progress sink signalled cancellation.
    #[error("cancelled")]
    Cancelled,
    /// Raw backend failure text, classified by the caller.
    #[error("{0}")]
    Failure(String),
}

/// External extraction/transfer backend.
///
/// `probe` resolves metadata without downloading; `fetch` performs the
/// transfer, feeding progress ticks and debug lines through the context.
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    /// Resolves metadata for the source URL under the given session
    /// parameters.
    async fn probe(&self, spec: &ProbeSpec) -> Result<ExtractionResult, BackendError>;

    /// Transfers the source into the output layout.
    async fn fetch(&self, spec: &TransferSpec, ctx: &TransferContext) -> Result<(), BackendError>;
}
