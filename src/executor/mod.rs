//! Top-level control flow: credential/profile rotation, admission gating,
//! transfer invocation, and terminal outcome production.
//!
//! One logical unit of work runs per request. The executor owns the bounded
//! rotation loop around the metadata resolver, the quota and admission
//! checks, the transfer call, and the guarantee that the resource reclaimer
//! fires exactly once on every exit path. Cancellation is observed at every
//! suspension point; once seen, the outcome is `Cancelled`, never `Failed`.

pub mod collaborators;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::auth::CredentialRegistry;
use crate::backend::{
    BackendError, ExtractionBackend, OutputLayout, TransferContext, TransferSpec,
};
use crate::failure::{Classification, ErrorKind, PhraseTable, RotationAxis};
use crate::profile::{ProfileList, ProfileRotator, Rotation};
use crate::progress::{ProgressTracker, TransferState};
use crate::request::{Request, RequestId};
use crate::resolver::rename::RenameWatcher;
use crate::resolver::{MetadataResolver, ResolveError, ResolvedMetadata};
use collaborators::{Admission, AdmissionGate, LimitChecker, LimitVerdict, ResourceReclaimer};

/// Default base delay between rotation attempts.
const DEFAULT_ROTATION_DELAY: Duration = Duration::from_secs(3);

/// Maximum jitter added to the rotation delay (500ms).
const MAX_JITTER_MS: u64 = 500;

/// Budget for user-visible failure messages.
const MAX_MESSAGE_CHARS: usize = 200;

/// Terminal result of one request. Produced exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// The transfer completed; the payload is the final local path.
    Success {
        /// Final path of the stored file (or playlist directory).
        path: PathBuf,
    },
    /// The request was cancelled. Not an error.
    Cancelled,
    /// The request failed.
    Failed {
        /// Classified failure kind.
        kind: ErrorKind,
        /// One short user-visible sentence.
        message: String,
    },
}

impl Outcome {
    fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            message: short_message(&message.into()),
        }
    }
}

/// Tunables for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Directory transfers write into.
    pub download_dir: PathBuf,
    /// Fixed profile rotation order.
    pub profiles: ProfileList,
    /// Phrase table used for failure classification.
    pub phrases: PhraseTable,
    /// Base delay between rotation attempts (jitter is added on top).
    pub rotation_delay: Duration,
}

impl ExecutorConfig {
    /// Creates a config with default profiles, phrase table, and delays.
    #[must_use]
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            profiles: ProfileList::default(),
            phrases: PhraseTable::default(),
            rotation_delay: DEFAULT_ROTATION_DELAY,
        }
    }
}

/// Handle to a submitted request.
///
/// Cancellation is cooperative: `cancel()` flips the token, and the engine
/// observes it within one progress tick or one retry-loop iteration.
#[derive(Debug)]
pub struct RequestHandle {
    id: RequestId,
    cancel: CancellationToken,
    tracker: Arc<ProgressTracker>,
    join: JoinHandle<Outcome>,
}

impl RequestHandle {
    /// Id of the underlying request.
    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Requests cooperative cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Snapshot of the current transfer state.
    #[must_use]
    pub fn status(&self) -> TransferState {
        self.tracker.snapshot()
    }

    /// Waits for the request's terminal outcome.
    pub async fn wait(self) -> Outcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "request task failed");
                Outcome::failed(ErrorKind::TransferError, "request task failed unexpectedly")
            }
        }
    }
}

/// Multi-axis retry state for one request.
///
/// Indices only move forward; the attempt budget guarantees termination at
/// `max(1, |credentials|) × |profiles|` resolution attempts.
#[derive(Debug)]
struct AttemptState {
    credential_index: usize,
    credential_count: usize,
    attempts_left: usize,
}

impl AttemptState {
    fn new(credential_count: usize, profile_count: usize) -> Self {
        Self {
            credential_index: 0,
            credential_count,
            attempts_left: credential_count.max(1) * profile_count,
        }
    }
}

enum Rotated {
    Advanced,
    Exhausted,
}

/// Drives a request from submission to terminal outcome.
pub struct DownloadExecutor {
    backend: Arc<dyn ExtractionBackend>,
    registry: Arc<CredentialRegistry>,
    gate: Arc<dyn AdmissionGate>,
    limits: Arc<dyn LimitChecker>,
    reclaimer: Arc<dyn ResourceReclaimer>,
    resolver: MetadataResolver,
    profiles: Arc<ProfileList>,
    phrases: Arc<PhraseTable>,
    download_dir: PathBuf,
    rotation_delay: Duration,
}

impl DownloadExecutor {
    /// Wires up an executor over the backend and external collaborators.
    #[must_use]
    pub fn new(
        backend: Arc<dyn ExtractionBackend>,
        registry: Arc<CredentialRegistry>,
        gate: Arc<dyn AdmissionGate>,
        limits: Arc<dyn LimitChecker>,
        reclaimer: Arc<dyn ResourceReclaimer>,
        config: ExecutorConfig,
    ) -> Self {
        let phrases = Arc::new(config.phrases);
        let resolver = MetadataResolver::new(Arc::clone(&backend), Arc::clone(&phrases));
        Self {
            backend,
            registry,
            gate,
            limits,
            reclaimer,
            resolver,
            profiles: Arc::new(config.profiles),
            phrases,
            download_dir: config.download_dir,
            rotation_delay: config.rotation_delay,
        }
    }

    /// Submits a request, spawning its unit of work.
    #[must_use]
    pub fn submit(self: &Arc<Self>, request: Request) -> RequestHandle {
        let cancel = CancellationToken::new();
        let tracker = Arc::new(ProgressTracker::new(request.playlist, cancel.clone()));
        let id = request.id.clone();
        let executor = Arc::clone(self);
        let task_cancel = cancel.clone();
        let task_tracker = Arc::clone(&tracker);
        let join =
            tokio::spawn(async move { executor.execute(request, task_cancel, task_tracker).await });
        RequestHandle {
            id,
            cancel,
            tracker,
            join,
        }
    }

    /// Runs a request to completion.
    ///
    /// The resource reclaimer is invoked exactly once before returning, on
    /// every outcome variant.
    #[instrument(skip_all, fields(request_id = %request.id, requester = %request.requester))]
    pub async fn execute(
        &self,
        request: Request,
        cancel: CancellationToken,
        tracker: Arc<ProgressTracker>,
    ) -> Outcome {
        info!(url = %request.url, playlist = request.playlist, "starting request");
        let outcome = self.run_request(&request, &cancel, &tracker).await;

        match &outcome {
            Outcome::Success { path } => {
                info!(path = %path.display(), "request completed");
            }
            Outcome::Cancelled => {
                info!("request cancelled");
            }
            Outcome::Failed { kind, message } => {
                warn!(
                    error_kind = %kind,
                    message = %message,
                    requester = %request.requester,
                    "request failed"
                );
            }
        }

        let aggressive = request.playlist || matches!(outcome, Outcome::Failed { .. });
        self.reclaimer.reclaim(aggressive);
        outcome
    }

    async fn run_request(
        &self,
        request: &Request,
        cancel: &CancellationToken,
        tracker: &Arc<ProgressTracker>,
    ) -> Outcome {
        let credentials = self.registry.resolve(&request.requester).await;
        let mut state = AttemptState::new(credentials.len(), self.profiles.len());
        let mut rotator = ProfileRotator::new(Arc::clone(&self.profiles));
        let mut admitted = false;

        loop {
            // Step 2: metadata resolution under bounded rotation.
            let meta = loop {
                if cancel.is_cancelled() {
                    return Outcome::Cancelled;
                }
                if state.attempts_left == 0 {
                    return Outcome::failed(
                        ErrorKind::TransferError,
                        "rotation attempt budget exhausted",
                    );
                }

                let credential_file = match credentials.get(state.credential_index) {
                    Some(handle) => {
                        match self.registry.materialize(&request.requester, handle).await {
                            Ok(path) => Some(path),
                            Err(e) => {
                                return Outcome::failed(ErrorKind::StorageError, e.to_string());
                            }
                        }
                    }
                    None => None,
                };

                match self
                    .resolver
                    .resolve(request, rotator.current_name(), credential_file.as_deref())
                    .await
                {
                    Ok(meta) => break meta,
                    Err(ResolveError::Cancelled) => return Outcome::Cancelled,
                    Err(ResolveError::Fatal { message }) => {
                        return Outcome::failed(ErrorKind::TransferError, message);
                    }
                    Err(ResolveError::Retryable { axis, message }) => {
                        state.attempts_left -= 1;
                        debug!(?axis, message = %message, "rotating after retryable failure");
                        match self.rotate(axis, &mut state, &mut rotator) {
                            Rotated::Advanced => {
                                if self.rotation_backoff(cancel).await {
                                    return Outcome::Cancelled;
                                }
                            }
                            Rotated::Exhausted => return exhausted_outcome(&rotator),
                        }
                    }
                }
            };

            if meta.is_live {
                return Outcome::failed(
                    ErrorKind::TransferError,
                    "live streams are not supported",
                );
            }

            if let Some(size) = meta.total_size {
                tracker.set_declared_size(size);
            }

            // Step 3: quota check, before any transfer bytes are requested.
            if let Some(size) = meta.total_size.filter(|s| *s > 0) {
                if let LimitVerdict::Denied(reason) = self
                    .limits
                    .check_allowed(size, &request.requester, request.playlist)
                    .await
                {
                    return Outcome::failed(ErrorKind::QuotaExceeded, reason);
                }
            }

            // Step 4: admission gate; wait observes cancellation. Rotation
            // restarts skip this — the slot is already held.
            if !admitted {
                match self.gate.try_admit(&request.id).await {
                    Admission::Admitted => {}
                    Admission::Queued(wait) => {
                        info!(name = %meta.name, "queued by admission gate");
                        tokio::select! {
                            () = cancel.cancelled() => return Outcome::Cancelled,
                            _ = wait => {}
                        }
                        if cancel.is_cancelled() {
                            return Outcome::Cancelled;
                        }
                    }
                }
                admitted = true;
            }

            // Steps 5-7: configure output and transfer.
            let layout = self.layout(request, &meta);
            let credential_file = match credentials.get(state.credential_index) {
                Some(handle) => {
                    match self.registry.materialize(&request.requester, handle).await {
                        Ok(path) => Some(path),
                        Err(e) => return Outcome::failed(ErrorKind::StorageError, e.to_string()),
                    }
                }
                None => None,
            };
            let spec = TransferSpec {
                url: request.url.clone(),
                profile: rotator.current_name().to_string(),
                credential_file,
                format: request.quality.selector().to_string(),
                layout: layout.clone(),
                passthrough: request.options.passthrough.clone(),
            };
            let ctx = TransferContext {
                progress: Arc::clone(tracker),
                rename: RenameWatcher::new(request.playlist),
            };

            info!(name = %meta.name, profile = %spec.profile, "starting transfer");
            match self.backend.fetch(&spec, &ctx).await {
                Ok(()) => return self.finish(request, &meta, &layout, &ctx.rename).await,
                Err(BackendError::Cancelled) => return Outcome::Cancelled,
                Err(BackendError::Failure(text)) => {
                    if cancel.is_cancelled() {
                        return Outcome::Cancelled;
                    }
                    let classified = self.phrases.classify(&text);
                    if classified == Classification::ToolMissing {
                        // Optional auxiliary tool missing: best-effort
                        // completion, not a failure.
                        warn!(message = %text, "auxiliary tool missing; keeping transfer output");
                        return Outcome::Success {
                            path: adjusted_final_path(&layout, &ctx.rename),
                        };
                    }
                    let Some(axis) = classified.axis() else {
                        return Outcome::failed(ErrorKind::TransferError, text);
                    };
                    if state.attempts_left == 0 {
                        return Outcome::failed(
                            ErrorKind::TransferError,
                            "rotation attempt budget exhausted",
                        );
                    }
                    state.attempts_left -= 1;
                    warn!(
                        error_kind = %classified.error_kind(),
                        message = %text,
                        requester = %request.requester,
                        "transfer failed; rotating"
                    );
                    match self.rotate(axis, &mut state, &mut rotator) {
                        Rotated::Advanced => {
                            if self.rotation_backoff(cancel).await {
                                return Outcome::Cancelled;
                            }
                            // Restart from metadata resolution.
                        }
                        Rotated::Exhausted => return exhausted_outcome(&rotator),
                    }
                }
            }
        }
    }

    /// Advances the requested axis. Credential rotation falls back to
    /// profile rotation once the credential set is exhausted.
    fn rotate(
        &self,
        axis: RotationAxis,
        state: &mut AttemptState,
        rotator: &mut ProfileRotator,
    ) -> Rotated {
        if axis == RotationAxis::Credential && state.credential_index + 1 < state.credential_count {
            state.credential_index += 1;
            debug!(
                credential_index = state.credential_index,
                "rotated to next credential"
            );
            return Rotated::Advanced;
        }
        match rotator.advance() {
            Rotation::Advanced(index) => {
                debug!(profile = rotator.current_name(), index, "rotated to next profile");
                Rotated::Advanced
            }
            Rotation::Exhausted => Rotated::Exhausted,
        }
    }

    /// Sleeps the inter-rotation delay with jitter, returning `true` when
    /// cancelled while waiting.
    async fn rotation_backoff(&self, cancel: &CancellationToken) -> bool {
        let jitter = {
            let mut rng = rand::thread_rng();
            rng.gen_range(0..=MAX_JITTER_MS)
        };
        let delay = self.rotation_delay + Duration::from_millis(jitter);
        tokio::select! {
            () = cancel.cancelled() => true,
            () = tokio::time::sleep(delay) => false,
        }
    }

    /// Output layout from resolved metadata and request options.
    fn layout(&self, request: &Request, meta: &ResolvedMetadata) -> OutputLayout {
        if meta.playlist {
            OutputLayout::Playlist {
                dir: self.download_dir.clone(),
                folder: meta.name.clone(),
            }
        } else if request.options.download_sections || request.options.wants_item_directory() {
            OutputLayout::ItemDirectory {
                dir: self.download_dir.clone(),
                stem: meta.stem.clone(),
                file_name: meta.name.clone(),
            }
        } else {
            OutputLayout::Flat {
                dir: self.download_dir.clone(),
                file_name: meta.name.clone(),
            }
        }
    }

    /// Success path: playlist sanity check and post-processing rename pickup.
    async fn finish(
        &self,
        request: &Request,
        meta: &ResolvedMetadata,
        layout: &OutputLayout,
        rename: &RenameWatcher,
    ) -> Outcome {
        if meta.playlist {
            let dir = layout.final_path();
            if playlist_dir_is_empty(&dir).await {
                return Outcome::failed(
                    ErrorKind::TransferError,
                    "no items were downloaded from this playlist",
                );
            }
        }
        let path = adjusted_final_path(layout, rename);
        debug!(requester = %request.requester, path = %path.display(), "transfer finished");
        Outcome::Success { path }
    }
}

/// Terminal outcome for an exhausted profile rotation, listing the attempted
/// profiles so the user can act (retry later, supply credentials, change
/// quality).
fn exhausted_outcome(rotator: &ProfileRotator) -> Outcome {
    Outcome::failed(
        ErrorKind::PlatformRestricted,
        format!(
            "the platform rejected every client profile (attempted: {}); retry later or supply your own credentials",
            rotator.attempted().join(", ")
        ),
    )
}

/// Applies a post-processing rename to the layout's final path.
fn adjusted_final_path(layout: &OutputLayout, rename: &RenameWatcher) -> PathBuf {
    let base = layout.final_path();
    match rename.final_name() {
        Some(new_name) if !matches!(layout, OutputLayout::Playlist { .. }) => base
            .parent()
            .map_or(base.clone(), |parent| parent.join(new_name)),
        _ => base,
    }
}

/// True when the playlist output directory is missing or has no entries.
async fn playlist_dir_is_empty(dir: &std::path::Path) -> bool {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None) | Err(_)),
        Err(_) => true,
    }
}

/// Trims a raw failure to one short user-visible sentence.
fn short_message(raw: &str) -> String {
    let first_line = raw.lines().next().unwrap_or("").trim();
    if first_line.chars().count() <= MAX_MESSAGE_CHARS {
        return first_line.to_string();
    }
    let mut out: String = first_line.chars().take(MAX_MESSAGE_CHARS).collect();
    out.push('…');
    out
}
