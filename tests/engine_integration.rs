//! Integration tests for the download executor.
//!
//! These tests drive DownloadExecutor end to end with a scripted extraction
//! backend and mock collaborators, covering credential/profile rotation,
//! quota denial, admission queueing, cancellation, and outcome production.

#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mediagrab_core::{
    Admission, AdmissionGate, BackendError, CredentialRegistry, CredentialStore, EntryMeta,
    ErrorKind, ExecutorConfig, ExtractionBackend, ExtractionResult, DownloadExecutor,
    FetchOptions, LimitChecker, LimitVerdict, NoLimits, ProbeSpec, ProfileList, ProgressEvent,
    Request, RequestId, ResourceReclaimer, Outcome, StoreError, StoredCredential, TransferContext,
    TransferSpec, UnboundedGate,
};
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

// ==================== Scripted Backend ====================

/// Side effect the backend performs during `fetch`, before consulting the
/// scripted result.
enum FetchSideEffect {
    None,
    /// Feed one debug line through the rename watcher.
    EmitLine(String),
    /// Create the layout's final path as a directory holding these files.
    CreateEntries(Vec<String>),
    /// Emit progress ticks until the tracker signals cancellation.
    TickUntilCancelled,
}

struct ScriptedBackend {
    probes: Mutex<VecDeque<Result<ExtractionResult, BackendError>>>,
    fetches: Mutex<VecDeque<Result<(), BackendError>>>,
    probe_specs: Mutex<Vec<ProbeSpec>>,
    on_fetch: FetchSideEffect,
}

impl ScriptedBackend {
    fn new(probes: Vec<Result<ExtractionResult, BackendError>>) -> Self {
        Self {
            probes: Mutex::new(probes.into_iter().collect()),
            fetches: Mutex::new(VecDeque::new()),
            probe_specs: Mutex::new(Vec::new()),
            on_fetch: FetchSideEffect::None,
        }
    }

    fn with_fetches(mut self, fetches: Vec<Result<(), BackendError>>) -> Self {
        self.fetches = Mutex::new(fetches.into_iter().collect());
        self
    }

    fn with_side_effect(mut self, effect: FetchSideEffect) -> Self {
        self.on_fetch = effect;
        self
    }

    fn probe_count(&self) -> usize {
        self.probe_specs.lock().unwrap().len()
    }

    fn probe_specs(&self) -> Vec<ProbeSpec> {
        self.probe_specs.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExtractionBackend for ScriptedBackend {
    async fn probe(&self, spec: &ProbeSpec) -> Result<ExtractionResult, BackendError> {
        self.probe_specs.lock().unwrap().push(spec.clone());
        self.probes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::Failure("probe script exhausted".to_string())))
    }

    async fn fetch(&self, spec: &TransferSpec, ctx: &TransferContext) -> Result<(), BackendError> {
        match &self.on_fetch {
            FetchSideEffect::None => {}
            FetchSideEffect::EmitLine(line) => ctx.rename.observe_line(line),
            FetchSideEffect::CreateEntries(files) => {
                let dir = spec.layout.final_path();
                tokio::fs::create_dir_all(&dir).await.unwrap();
                for file in files {
                    tokio::fs::write(dir.join(file), b"data").await.unwrap();
                }
            }
            FetchSideEffect::TickUntilCancelled => loop {
                let tick = ctx.progress.observe(ProgressEvent::Downloading {
                    bytes_downloaded: 64,
                    total_bytes: Some(1024),
                    rate: 100.0,
                    eta_seconds: Some(9),
                });
                if tick.is_err() {
                    return Err(BackendError::Cancelled);
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            },
        }
        self.fetches.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

// ==================== Mock Collaborators ====================

struct FixedStore(Vec<StoredCredential>);

#[async_trait]
impl CredentialStore for FixedStore {
    async fn list_credentials(&self, _: &str) -> Result<Vec<StoredCredential>, StoreError> {
        Ok(self.0.clone())
    }
}

/// Gate that queues the first caller behind a oneshot and counts admissions.
struct QueueingGate {
    release: Mutex<Option<oneshot::Receiver<()>>>,
    admissions: AtomicUsize,
}

impl QueueingGate {
    fn new(release: oneshot::Receiver<()>) -> Self {
        Self {
            release: Mutex::new(Some(release)),
            admissions: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AdmissionGate for QueueingGate {
    async fn try_admit(&self, _: &RequestId) -> Admission {
        self.admissions.fetch_add(1, Ordering::SeqCst);
        match self.release.lock().unwrap().take() {
            Some(rx) => Admission::Queued(rx),
            None => Admission::Admitted,
        }
    }
}

/// Gate that counts calls and always admits.
#[derive(Default)]
struct CountingGate {
    admissions: AtomicUsize,
}

#[async_trait]
impl AdmissionGate for CountingGate {
    async fn try_admit(&self, _: &RequestId) -> Admission {
        self.admissions.fetch_add(1, Ordering::SeqCst);
        Admission::Admitted
    }
}

struct DenyLimits(String);

#[async_trait]
impl LimitChecker for DenyLimits {
    async fn check_allowed(&self, _: u64, _: &str, _: bool) -> LimitVerdict {
        LimitVerdict::Denied(self.0.clone())
    }
}

/// Records every reclaim call with its aggressiveness flag.
#[derive(Default)]
struct RecordingReclaimer {
    calls: Mutex<Vec<bool>>,
}

impl RecordingReclaimer {
    fn calls(&self) -> Vec<bool> {
        self.calls.lock().unwrap().clone()
    }
}

impl ResourceReclaimer for RecordingReclaimer {
    fn reclaim(&self, aggressive: bool) {
        self.calls.lock().unwrap().push(aggressive);
    }
}

// ==================== Helper Functions ====================

fn single_item(title: &str, ext: &str, size: Option<u64>) -> ExtractionResult {
    ExtractionResult {
        title: Some(title.to_string()),
        ext: Some(ext.to_string()),
        total_size: size,
        ..ExtractionResult::default()
    }
}

fn stored(rank: u32, data: &str) -> StoredCredential {
    StoredCredential {
        rank,
        blob: data.as_bytes().to_vec(),
    }
}

fn request(url: &str, playlist: bool) -> Request {
    Request::new(url, "user-1", "best", playlist, FetchOptions::default()).unwrap()
}

struct Harness {
    executor: Arc<DownloadExecutor>,
    backend: Arc<ScriptedBackend>,
    reclaimer: Arc<RecordingReclaimer>,
    _download_dir: TempDir,
    _cred_dir: TempDir,
}

/// Wires an executor over the scripted backend with fast rotation delays.
fn harness(
    backend: ScriptedBackend,
    credentials: Vec<StoredCredential>,
    gate: Arc<dyn AdmissionGate>,
    limits: Arc<dyn LimitChecker>,
) -> Harness {
    let download_dir = TempDir::new().unwrap();
    let cred_dir = TempDir::new().unwrap();
    let store: Option<Arc<dyn CredentialStore>> = if credentials.is_empty() {
        None
    } else {
        Some(Arc::new(FixedStore(credentials)))
    };
    let registry = Arc::new(CredentialRegistry::new(cred_dir.path(), store));
    let reclaimer = Arc::new(RecordingReclaimer::default());
    let backend = Arc::new(backend);

    let mut config = ExecutorConfig::new(download_dir.path());
    config.rotation_delay = Duration::from_millis(1);
    let executor = Arc::new(DownloadExecutor::new(
        Arc::clone(&backend) as Arc<dyn ExtractionBackend>,
        registry,
        gate,
        limits,
        Arc::clone(&reclaimer) as Arc<dyn ResourceReclaimer>,
        config,
    ));

    Harness {
        executor,
        backend,
        reclaimer,
        _download_dir: download_dir,
        _cred_dir: cred_dir,
    }
}

fn default_harness(backend: ScriptedBackend, credentials: Vec<StoredCredential>) -> Harness {
    harness(
        backend,
        credentials,
        Arc::new(UnboundedGate),
        Arc::new(NoLimits),
    )
}

async fn execute(h: &Harness, request: Request) -> Outcome {
    let cancel = CancellationToken::new();
    let tracker = Arc::new(mediagrab_core::ProgressTracker::new(
        request.playlist,
        cancel.clone(),
    ));
    h.executor.execute(request, cancel, tracker).await
}

fn expect_failed(outcome: Outcome) -> (ErrorKind, String) {
    match outcome {
        Outcome::Failed { kind, message } => (kind, message),
        other => panic!("expected Failed, got {other:?}"),
    }
}

// ==================== Credential Rotation Tests ====================

#[tokio::test]
async fn test_credential_rejection_rotates_to_next_credential() {
    let backend = ScriptedBackend::new(vec![
        Err(BackendError::Failure(
            "ERROR: Sign in to confirm you're not a bot".to_string(),
        )),
        Ok(single_item("Nice Clip", "mp4", Some(4096))),
    ]);
    let h = default_harness(backend, vec![stored(1, "first"), stored(2, "second")]);

    let outcome = execute(&h, request("https://media.example.com/watch?v=a", false)).await;

    match outcome {
        Outcome::Success { path } => {
            assert!(path.ends_with("Nice_Clip.mp4"), "unexpected path {path:?}");
        }
        other => panic!("expected Success, got {other:?}"),
    }

    // Attempt one used rank 1, attempt two rank 2, same profile both times.
    let specs = h.backend.probe_specs();
    assert_eq!(specs.len(), 2);
    assert!(
        specs[0]
            .credential_file
            .as_ref()
            .unwrap()
            .ends_with("user-1_1.txt")
    );
    assert!(
        specs[1]
            .credential_file
            .as_ref()
            .unwrap()
            .ends_with("user-1_2.txt")
    );
    assert_eq!(specs[0].profile, specs[1].profile);

    assert_eq!(h.reclaimer.calls(), vec![false]);
}

#[tokio::test]
async fn test_credential_error_without_credentials_rotates_profiles() {
    // Five profiles, no credentials: every attempt probes without a
    // credential file and the credential-axis failure falls back to profile
    // rotation until all profiles were presented.
    let probes = (0..5)
        .map(|_| {
            Err(BackendError::Failure(
                "ERROR: login required to view this video".to_string(),
            ))
        })
        .collect();
    let h = default_harness(ScriptedBackend::new(probes), Vec::new());

    let outcome = execute(&h, request("https://media.example.com/watch?v=b", false)).await;

    let (kind, message) = expect_failed(outcome);
    assert_eq!(kind, ErrorKind::PlatformRestricted);
    for profile in ["web", "android", "ios", "mweb", "tv_embedded"] {
        assert!(message.contains(profile), "message {message:?} missing {profile}");
    }

    let specs = h.backend.probe_specs();
    assert_eq!(specs.len(), 5);
    assert!(specs.iter().all(|s| s.credential_file.is_none()));
    assert_eq!(h.reclaimer.calls(), vec![true]);
}

#[tokio::test]
async fn test_rotation_attempts_are_bounded() {
    // Two credentials and three profiles: the rotation converges well inside
    // the max(1, 2) * 3 attempt bound.
    let probes = (0..20)
        .map(|_| Err(BackendError::Failure("login required".to_string())))
        .collect();
    let download_dir = TempDir::new().unwrap();
    let cred_dir = TempDir::new().unwrap();
    let registry = Arc::new(CredentialRegistry::new(
        cred_dir.path(),
        Some(Arc::new(FixedStore(vec![stored(1, "a"), stored(2, "b")])) as Arc<dyn CredentialStore>),
    ));
    let reclaimer = Arc::new(RecordingReclaimer::default());
    let backend = Arc::new(ScriptedBackend::new(probes));

    let mut config = ExecutorConfig::new(download_dir.path());
    config.rotation_delay = Duration::from_millis(1);
    config.profiles = ProfileList::new(["p0", "p1", "p2"].iter().map(ToString::to_string));
    let executor = DownloadExecutor::new(
        Arc::clone(&backend) as Arc<dyn ExtractionBackend>,
        registry,
        Arc::new(UnboundedGate),
        Arc::new(NoLimits),
        Arc::clone(&reclaimer) as Arc<dyn ResourceReclaimer>,
        config,
    );

    let req = request("https://media.example.com/watch?v=c", false);
    let cancel = CancellationToken::new();
    let tracker = Arc::new(mediagrab_core::ProgressTracker::new(false, cancel.clone()));
    let outcome = executor.execute(req, cancel, tracker).await;

    let (kind, _) = expect_failed(outcome);
    assert_eq!(kind, ErrorKind::PlatformRestricted);
    assert!(
        backend.probe_count() <= 6,
        "probed {} times, bound is 6",
        backend.probe_count()
    );
    assert_eq!(reclaimer.calls(), vec![true]);
}

// ==================== Fatal and Unrecognized Failures ====================

#[tokio::test]
async fn test_unmatched_probe_error_fails_without_rotation() {
    let backend = ScriptedBackend::new(vec![Err(BackendError::Failure(
        "Unsupported URL: gopher://example.org".to_string(),
    ))]);
    let h = default_harness(backend, vec![stored(1, "a")]);

    let outcome = execute(&h, request("https://media.example.com/watch?v=d", false)).await;

    let (kind, message) = expect_failed(outcome);
    assert_eq!(kind, ErrorKind::TransferError);
    assert!(message.contains("Unsupported URL"));
    assert_eq!(h.backend.probe_count(), 1);
}

#[tokio::test]
async fn test_unrecognized_transfer_error_is_fatal() {
    let backend = ScriptedBackend::new(vec![Ok(single_item("Clip", "mp4", None))])
        .with_fetches(vec![Err(BackendError::Failure(
            "read error: connection reset by peer".to_string(),
        ))]);
    let h = default_harness(backend, Vec::new());

    let outcome = execute(&h, request("https://media.example.com/watch?v=e", false)).await;

    let (kind, message) = expect_failed(outcome);
    assert_eq!(kind, ErrorKind::TransferError);
    assert!(message.contains("connection reset"));
    assert_eq!(h.reclaimer.calls(), vec![true]);
}

#[tokio::test]
async fn test_transfer_credential_error_reprobes_with_next_credential() {
    let backend = ScriptedBackend::new(vec![
        Ok(single_item("Clip", "mp4", None)),
        Ok(single_item("Clip", "mp4", None)),
    ])
    .with_fetches(vec![
        Err(BackendError::Failure(
            "ERROR: Sign in to confirm you're not a bot".to_string(),
        )),
        Ok(()),
    ]);
    let h = default_harness(backend, vec![stored(1, "a"), stored(2, "b")]);

    let outcome = execute(&h, request("https://media.example.com/watch?v=f", false)).await;

    assert!(matches!(outcome, Outcome::Success { .. }));
    let specs = h.backend.probe_specs();
    assert_eq!(specs.len(), 2);
    assert!(
        specs[1]
            .credential_file
            .as_ref()
            .unwrap()
            .ends_with("user-1_2.txt")
    );
}

#[tokio::test]
async fn test_missing_tool_is_best_effort_success() {
    let backend = ScriptedBackend::new(vec![Ok(single_item("Song", "webm", None))])
        .with_fetches(vec![Err(BackendError::Failure(
            "ERROR: ffmpeg not found. Please install".to_string(),
        ))]);
    let h = default_harness(backend, Vec::new());

    let outcome = execute(&h, request("https://media.example.com/watch?v=g", false)).await;

    match outcome {
        Outcome::Success { path } => assert!(path.ends_with("Song.webm")),
        other => panic!("expected best-effort Success, got {other:?}"),
    }
    assert_eq!(h.reclaimer.calls(), vec![false]);
}

#[tokio::test]
async fn test_live_stream_is_refused() {
    let result = ExtractionResult {
        title: Some("Live Now".to_string()),
        is_live: true,
        ..ExtractionResult::default()
    };
    let h = default_harness(ScriptedBackend::new(vec![Ok(result)]), Vec::new());

    let outcome = execute(&h, request("https://media.example.com/live", false)).await;

    let (kind, message) = expect_failed(outcome);
    assert_eq!(kind, ErrorKind::TransferError);
    assert!(message.contains("live"));
}

// ==================== Quota and Admission Tests ====================

#[tokio::test]
async fn test_quota_denial_precedes_admission() {
    let gate = Arc::new(CountingGate::default());
    let h = harness(
        ScriptedBackend::new(vec![Ok(single_item("Big", "mp4", Some(10_000)))]),
        Vec::new(),
        Arc::clone(&gate) as Arc<dyn AdmissionGate>,
        Arc::new(DenyLimits("daily quota of 2 GiB exceeded".to_string())),
    );

    let outcome = execute(&h, request("https://media.example.com/watch?v=h", false)).await;

    let (kind, message) = expect_failed(outcome);
    assert_eq!(kind, ErrorKind::QuotaExceeded);
    assert_eq!(message, "daily quota of 2 GiB exceeded");
    // Denied before the gate was ever consulted.
    assert_eq!(gate.admissions.load(Ordering::SeqCst), 0);
    assert_eq!(h.reclaimer.calls(), vec![true]);
}

#[tokio::test]
async fn test_unknown_size_skips_quota_check() {
    let h = harness(
        ScriptedBackend::new(vec![Ok(single_item("NoSize", "mp4", None))]),
        Vec::new(),
        Arc::new(UnboundedGate),
        Arc::new(DenyLimits("would deny if asked".to_string())),
    );

    let outcome = execute(&h, request("https://media.example.com/watch?v=i", false)).await;

    assert!(matches!(outcome, Outcome::Success { .. }));
}

#[tokio::test]
async fn test_queued_request_proceeds_after_release() {
    let (tx, rx) = oneshot::channel();
    let gate = Arc::new(QueueingGate::new(rx));
    let h = harness(
        ScriptedBackend::new(vec![Ok(single_item("Queued", "mp4", None))]),
        Vec::new(),
        Arc::clone(&gate) as Arc<dyn AdmissionGate>,
        Arc::new(NoLimits),
    );

    let handle = h
        .executor
        .submit(request("https://media.example.com/watch?v=j", false));
    tokio::time::sleep(Duration::from_millis(20)).await;
    tx.send(()).unwrap();

    let outcome = handle.wait().await;
    assert!(matches!(outcome, Outcome::Success { .. }));
    assert_eq!(gate.admissions.load(Ordering::SeqCst), 1);
}

// ==================== Cancellation Tests ====================

#[tokio::test]
async fn test_cancel_while_queued_yields_cancelled() {
    let (_tx, rx) = oneshot::channel::<()>();
    let h = harness(
        ScriptedBackend::new(vec![Ok(single_item("Stuck", "mp4", None))]),
        Vec::new(),
        Arc::new(QueueingGate::new(rx)),
        Arc::new(NoLimits),
    );

    let handle = h
        .executor
        .submit(request("https://media.example.com/watch?v=k", false));
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.cancel();

    assert_eq!(handle.wait().await, Outcome::Cancelled);
    assert_eq!(h.reclaimer.calls(), vec![false]);
}

#[tokio::test]
async fn test_cancel_mid_transfer_stops_within_one_tick() {
    let backend = ScriptedBackend::new(vec![Ok(single_item("Rolling", "mp4", Some(1024)))])
        .with_side_effect(FetchSideEffect::TickUntilCancelled);
    let h = default_harness(backend, Vec::new());

    let handle = h
        .executor
        .submit(request("https://media.example.com/watch?v=l", false));
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(handle.status().bytes_transferred > 0);
    handle.cancel();

    assert_eq!(handle.wait().await, Outcome::Cancelled);
    assert_eq!(h.reclaimer.calls(), vec![false]);
}

// ==================== Naming and Output Tests ====================

#[tokio::test]
async fn test_post_processing_rename_adjusts_final_path() {
    let backend = ScriptedBackend::new(vec![Ok(single_item("My Clip", "webm", None))])
        .with_side_effect(FetchSideEffect::EmitLine(
            r#"[Merger] Merging formats into "My_Clip.mkv""#.to_string(),
        ));
    let h = default_harness(backend, Vec::new());

    let outcome = execute(&h, request("https://media.example.com/watch?v=m", false)).await;

    match outcome {
        Outcome::Success { path } => assert!(path.ends_with("My_Clip.mkv")),
        other => panic!("expected Success, got {other:?}"),
    }
}

#[tokio::test]
async fn test_incomplete_metadata_names_from_uploader_and_id() {
    let result = ExtractionResult {
        title: Some("Placeholder".to_string()),
        uploader: Some("SomeChannel".to_string()),
        id: Some("xyz9".to_string()),
        ext: Some("mp4".to_string()),
        incomplete_metadata: true,
        ..ExtractionResult::default()
    };
    let h = default_harness(ScriptedBackend::new(vec![Ok(result)]), Vec::new());

    let outcome = execute(&h, request("https://media.example.com/watch?v=n", false)).await;

    match outcome {
        Outcome::Success { path } => assert!(path.ends_with("SomeChannel_xyz9.mp4")),
        other => panic!("expected Success, got {other:?}"),
    }
}

// ==================== Playlist Tests ====================

fn playlist_result(title: &str, sizes: &[Option<u64>]) -> ExtractionResult {
    ExtractionResult {
        title: Some(title.to_string()),
        entries: sizes
            .iter()
            .enumerate()
            .map(|(i, size)| EntryMeta {
                title: Some(format!("Entry {i}")),
                size: *size,
                ..EntryMeta::default()
            })
            .collect(),
        ..ExtractionResult::default()
    }
}

#[tokio::test]
async fn test_playlist_success_returns_directory() {
    let backend = ScriptedBackend::new(vec![Ok(playlist_result(
        "My Playlist",
        &[Some(100), Some(200)],
    ))])
    .with_side_effect(FetchSideEffect::CreateEntries(vec![
        "Entry_0.mp4".to_string(),
        "Entry_1.mp4".to_string(),
    ]));
    let h = default_harness(backend, Vec::new());

    let req = request("https://media.example.com/playlist?list=p", true);
    let cancel = CancellationToken::new();
    let tracker = Arc::new(mediagrab_core::ProgressTracker::new(true, cancel.clone()));
    let outcome = h
        .executor
        .execute(req, cancel, Arc::clone(&tracker))
        .await;

    match outcome {
        Outcome::Success { path } => {
            assert!(path.ends_with("My_Playlist"));
            assert!(path.is_dir());
        }
        other => panic!("expected Success, got {other:?}"),
    }
    // Declared size seeded from the per-entry sum.
    assert_eq!(tracker.snapshot().declared_size, 300);
    // Playlists reclaim aggressively even on success.
    assert_eq!(h.reclaimer.calls(), vec![true]);
}

#[tokio::test]
async fn test_playlist_with_no_downloaded_items_fails() {
    let backend = ScriptedBackend::new(vec![Ok(playlist_result("Empty", &[None]))]);
    let h = default_harness(backend, Vec::new());

    let outcome = execute(&h, request("https://media.example.com/playlist?list=q", true)).await;

    let (kind, message) = expect_failed(outcome);
    assert_eq!(kind, ErrorKind::TransferError);
    assert!(message.contains("no items"));
}

// ==================== Reclaim Contract ====================

#[tokio::test]
async fn test_reclaim_fires_exactly_once_per_request() {
    let backend = ScriptedBackend::new(vec![
        Err(BackendError::Failure("403 forbidden".to_string())),
        Ok(single_item("Eventually", "mp4", None)),
    ]);
    let h = default_harness(backend, Vec::new());

    let outcome = execute(&h, request("https://media.example.com/watch?v=r", false)).await;

    assert!(matches!(outcome, Outcome::Success { .. }));
    // The 403 advanced the profile before the successful attempt.
    let specs = h.backend.probe_specs();
    assert_eq!(specs[0].profile, "web");
    assert_eq!(specs[1].profile, "android");
    // One reclaim despite the internal rotation retry.
    assert_eq!(h.reclaimer.calls(), vec![false]);
}
