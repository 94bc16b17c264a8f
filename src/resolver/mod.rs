//! Metadata resolution: one probe attempt, failure classification, and
//! application of the naming cascade.
//!
//! The resolver performs exactly one backend probe per call and never loops;
//! the executor owns the bounded multi-attempt rotation. Raw backend error
//! text is classified here — the last layer that holds it — and only typed
//! results cross outward.

pub mod naming;
pub mod rename;

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, instrument, warn};

use crate::backend::{BackendError, ExtractionBackend, ExtractionResult, ProbeSpec};
use crate::failure::{Classification, PhraseTable, RotationAxis};
use crate::request::Request;
use naming::{NameSource, resolve_display_name, split_extension, truncate_name};

/// Outcome of a single metadata-resolution attempt.
#[derive(Debug, Clone)]
pub struct ResolvedMetadata {
    /// Final output name: file name (extension included) for single items,
    /// directory name for playlists. Truncated to the encoded-byte budget.
    pub name: String,
    /// Name stem without extension.
    pub stem: String,
    /// Extension with leading dot; empty for playlists or when unknown.
    pub extension: String,
    /// Declared total size in bytes (per-entry sum for playlists).
    pub total_size: Option<u64>,
    /// The source is a live stream.
    pub is_live: bool,
    /// Whether the result is a multi-entry playlist.
    pub playlist: bool,
    /// Resolved per-entry display names (playlists only).
    pub entry_names: Vec<String>,
}

/// Failure of a single resolution attempt.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// Retryable under rotation of the tagged axis.
    #[error("retryable extraction failure ({axis:?}): {message}")]
    Retryable {
        /// Axis the executor should rotate.
        axis: RotationAxis,
        /// Classified failure text.
        message: String,
    },
    /// Not retryable; ends the request.
    #[error("extraction failed: {message}")]
    Fatal {
        /// Classified failure text.
        message: String,
    },
    /// The request was cancelled mid-probe.
    #[error("cancelled")]
    Cancelled,
}

/// Invokes the extraction backend and shapes its output.
pub struct MetadataResolver {
    backend: Arc<dyn ExtractionBackend>,
    phrases: Arc<PhraseTable>,
}

impl MetadataResolver {
    /// Creates a resolver over the given backend and phrase table.
    #[must_use]
    pub fn new(backend: Arc<dyn ExtractionBackend>, phrases: Arc<PhraseTable>) -> Self {
        Self { backend, phrases }
    }

    /// Resolves metadata for the request under one profile/credential pair.
    ///
    /// # Errors
    ///
    /// [`ResolveError::Retryable`] for failures the phrase table maps to a
    /// rotation axis, [`ResolveError::Fatal`] for everything else.
    #[instrument(skip(self, request, credential_file), fields(request_id = %request.id, profile))]
    pub async fn resolve(
        &self,
        request: &Request,
        profile: &str,
        credential_file: Option<&Path>,
    ) -> Result<ResolvedMetadata, ResolveError> {
        let spec = ProbeSpec {
            url: request.url.clone(),
            profile: profile.to_string(),
            credential_file: credential_file.map(Path::to_path_buf),
            format: request.quality.selector().to_string(),
            playlist: request.playlist,
            passthrough: request.options.passthrough.clone(),
        };

        let result = match self.backend.probe(&spec).await {
            Ok(result) => result,
            Err(BackendError::Cancelled) => return Err(ResolveError::Cancelled),
            Err(BackendError::Failure(text)) => {
                return Err(self.classify_probe_failure(request, profile, text));
            }
        };

        Ok(self.shape(request, result))
    }

    fn classify_probe_failure(
        &self,
        request: &Request,
        profile: &str,
        text: String,
    ) -> ResolveError {
        match self.phrases.classify(&text).axis() {
            Some(axis) => {
                debug!(
                    requester = %request.requester,
                    profile,
                    ?axis,
                    message = %text,
                    "retryable extraction failure"
                );
                ResolveError::Retryable {
                    axis,
                    message: text,
                }
            }
            None => {
                warn!(
                    requester = %request.requester,
                    profile,
                    message = %text,
                    "fatal extraction failure"
                );
                ResolveError::Fatal { message: text }
            }
        }
    }

    /// Applies the naming cascade and size summation to a probe result.
    fn shape(&self, request: &Request, result: ExtractionResult) -> ResolvedMetadata {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        if result.is_playlist() {
            return self.shape_playlist(request, &result, timestamp);
        }

        // A raised warning flag means the title fields are placeholders even
        // when textually present; skip straight past them in the cascade.
        let source = NameSource {
            title: filtered(&result.title, result.incomplete_metadata),
            alt_title: filtered(&result.alt_title, result.incomplete_metadata),
            uploader: result.uploader.as_deref(),
            id: result.id.as_deref(),
            index: None,
            host: result.extractor.as_deref().or_else(|| request.host()),
            timestamp,
        };
        let stem = resolve_display_name(&source);

        let extension = request
            .quality
            .pinned_extension()
            .map(ToString::to_string)
            .or_else(|| result.ext.clone().map(|e| with_dot(&e)))
            .unwrap_or_default();

        let name = truncate_name(&format!("{stem}{extension}"));
        let (stem, extension) = split_extension(&name);

        ResolvedMetadata {
            name: name.clone(),
            stem: stem.to_string(),
            extension: extension.to_string(),
            total_size: result.total_size,
            is_live: result.is_live,
            playlist: false,
            entry_names: Vec::new(),
        }
    }

    fn shape_playlist(
        &self,
        request: &Request,
        result: &ExtractionResult,
        timestamp: u64,
    ) -> ResolvedMetadata {
        let mut total: u64 = 0;
        let mut any_size = false;
        let mut entry_names = Vec::with_capacity(result.entries.len());

        for (position, entry) in result.entries.iter().enumerate() {
            if let Some(size) = entry.size {
                total = total.saturating_add(size);
                any_size = true;
            }
            // The cascade runs independently per entry.
            let source = NameSource {
                title: entry.title.as_deref(),
                alt_title: entry.alt_title.as_deref(),
                uploader: entry.uploader.as_deref(),
                id: entry.id.as_deref(),
                index: Some(position + 1),
                host: request.host(),
                timestamp,
            };
            entry_names.push(truncate_name(&resolve_display_name(&source)));
        }

        let source = NameSource {
            title: filtered(&result.title, result.incomplete_metadata),
            alt_title: filtered(&result.alt_title, result.incomplete_metadata),
            uploader: result.uploader.as_deref(),
            id: result.id.as_deref(),
            index: None,
            host: result.extractor.as_deref().or_else(|| request.host()),
            timestamp,
        };
        let name = truncate_name(&resolve_display_name(&source));

        ResolvedMetadata {
            stem: name.clone(),
            name,
            extension: String::new(),
            total_size: any_size.then_some(total),
            is_live: result.is_live,
            playlist: true,
            entry_names,
        }
    }
}

/// Drops a title field when the per-attempt warning flag is raised.
fn filtered(value: &Option<String>, incomplete: bool) -> Option<&str> {
    if incomplete {
        None
    } else {
        value.as_deref()
    }
}

/// Normalizes a backend extension to carry a leading dot.
fn with_dot(ext: &str) -> String {
    if ext.starts_with('.') {
        ext.to_string()
    } else {
        format!(".{ext}")
    }
}
