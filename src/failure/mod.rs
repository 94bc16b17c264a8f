//! Error taxonomy and phrase-table classification for backend failures.
//!
//! The extraction backend surfaces failures as raw text. This module owns the
//! policy that turns that text into an [`ErrorKind`] and, for retryable kinds,
//! the [`RotationAxis`] the executor should advance. Classification is a
//! case-insensitive substring match against a [`PhraseTable`], which is a
//! standalone, constructible unit so deployments can extend it without
//! touching the engine. Localized backend text that matches no phrase falls
//! through to [`Classification::Unrecognized`] — a known limitation.

use serde::Serialize;

/// Which retry axis a retryable failure should advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationAxis {
    /// Advance to the next credential in the requester's ordered set.
    Credential,
    /// Advance to the next client profile not yet visited.
    Profile,
}

/// Terminal classification of an engine failure.
///
/// Only `{ErrorKind, message}` pairs cross component boundaries; raw backend
/// error objects never leak upward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The current credential was rejected; retried by rotating credentials.
    CredentialRejected,
    /// The platform refused the presented client profile; retried by rotating
    /// profiles.
    PlatformRestricted,
    /// The external limit checker denied the request. Fatal, surfaced verbatim.
    QuotaExceeded,
    /// An optional auxiliary tool is missing. Non-fatal; the transfer is
    /// treated as best-effort complete.
    ToolUnavailable,
    /// A naming template failed to render. Always swallowed internally and
    /// logged; never reaches an outcome.
    TemplatingFailure,
    /// Any other transfer-level failure. Fatal.
    TransferError,
    /// Credential materialization failed on local storage. Fatal.
    StorageError,
}

impl ErrorKind {
    /// Short human-readable label used in structured log events.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::CredentialRejected => "credential rejected",
            Self::PlatformRestricted => "platform restricted",
            Self::QuotaExceeded => "quota exceeded",
            Self::ToolUnavailable => "tool unavailable",
            Self::TemplatingFailure => "templating failure",
            Self::TransferError => "transfer error",
            Self::StorageError => "storage error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of classifying a raw backend error string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Matched a credential-axis phrase; retryable by credential rotation.
    Credential,
    /// Matched a profile-axis phrase; retryable by profile rotation.
    Profile,
    /// Matched an auxiliary-tool phrase; best-effort completion.
    ToolMissing,
    /// Matched nothing; treated as fatal by the caller.
    Unrecognized,
}

impl Classification {
    /// Maps the classification to the taxonomy kind it produces when it ends
    /// a request.
    #[must_use]
    pub fn error_kind(self) -> ErrorKind {
        match self {
            Self::Credential => ErrorKind::CredentialRejected,
            Self::Profile => ErrorKind::PlatformRestricted,
            Self::ToolMissing => ErrorKind::ToolUnavailable,
            Self::Unrecognized => ErrorKind::TransferError,
        }
    }

    /// The axis to rotate, if this classification is retryable.
    #[must_use]
    pub fn axis(self) -> Option<RotationAxis> {
        match self {
            Self::Credential => Some(RotationAxis::Credential),
            Self::Profile => Some(RotationAxis::Profile),
            Self::ToolMissing | Self::Unrecognized => None,
        }
    }
}

/// Phrases indicating the current credential is the problem.
const CREDENTIAL_PHRASES: &[&str] = &[
    "sign in to confirm",
    "private video",
    "members-only content",
    "requires authentication",
    "login required",
    "premium content",
    "subscription required",
    "age-restricted",
    "unauthorized",
    "cookies",
    "authentication",
    "401",
];

/// Phrases indicating the presented client profile is the problem.
const PROFILE_PHRASES: &[&str] = &[
    "forbidden",
    "access denied",
    "geo-blocked",
    "region blocked",
    "not available in your country",
    "unable to extract video data",
    "this video is unavailable",
    "video unavailable",
    "player response",
    "failed to extract",
    "403",
];

/// Phrases indicating an optional auxiliary tool is missing.
const TOOL_PHRASES: &[&str] = &[
    "ffmpeg not found",
    "ffprobe and ffmpeg not found",
    "ffmpeg is not installed",
    "postprocessing: file not found",
];

/// Ordered substring table mapping raw backend error text to a retry axis.
///
/// Matching is lowercase substring containment. Credential phrases are
/// consulted before profile phrases, so text matching both axes rotates the
/// credential first (the cheaper axis; the executor falls back to profile
/// rotation when credentials are exhausted).
#[derive(Debug, Clone)]
pub struct PhraseTable {
    credential: Vec<String>,
    profile: Vec<String>,
    tool: Vec<String>,
}

impl Default for PhraseTable {
    fn default() -> Self {
        Self::new(
            CREDENTIAL_PHRASES.iter().map(ToString::to_string),
            PROFILE_PHRASES.iter().map(ToString::to_string),
            TOOL_PHRASES.iter().map(ToString::to_string),
        )
    }
}

impl PhraseTable {
    /// Builds a table from custom phrase lists. Phrases are lowercased once
    /// here so per-error matching stays allocation-free on the table side.
    pub fn new<C, P, T>(credential: C, profile: P, tool: T) -> Self
    where
        C: IntoIterator<Item = String>,
        P: IntoIterator<Item = String>,
        T: IntoIterator<Item = String>,
    {
        Self {
            credential: credential.into_iter().map(|p| p.to_lowercase()).collect(),
            profile: profile.into_iter().map(|p| p.to_lowercase()).collect(),
            tool: tool.into_iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    /// Classifies a raw backend error string.
    ///
    /// Tool phrases are checked first (most specific), then credential, then
    /// profile.
    #[must_use]
    pub fn classify(&self, error_text: &str) -> Classification {
        let lowered = error_text.to_lowercase();
        if self.tool.iter().any(|p| lowered.contains(p.as_str())) {
            return Classification::ToolMissing;
        }
        if self.credential.iter().any(|p| lowered.contains(p.as_str())) {
            return Classification::Credential;
        }
        if self.profile.iter().any(|p| lowered.contains(p.as_str())) {
            return Classification::Profile;
        }
        Classification::Unrecognized
    }

    /// Number of phrases in the table, across all axes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.credential.len() + self.profile.len() + self.tool.len()
    }

    /// Returns `true` if the table holds no phrases at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
