//! Request construction: source URL validation, quality parsing, and the
//! typed options surface handed to the extraction backend.
//!
//! A [`Request`] is immutable once built and owned by the caller for its
//! lifetime. Options the engine itself consumes are typed fields on
//! [`FetchOptions`]; anything else rides in the `passthrough` map and is
//! forwarded to the backend verbatim.

use std::collections::BTreeMap;

use rand::Rng;
use serde_json::Value;
use thiserror::Error;
use url::Url;

/// Passthrough keys that force the per-item directory output layout because
/// they make the backend emit side files next to the media file.
const SIDE_FILE_KEYS: &[&str] = &[
    "writedescription",
    "writeinfojson",
    "writeannotations",
    "writedesktoplink",
    "writewebloclink",
    "writeurllink",
    "writesubtitles",
    "writeautomaticsub",
];

/// Errors raised while constructing a [`Request`].
#[derive(Debug, Error)]
pub enum RequestError {
    /// The source URL could not be parsed.
    #[error("invalid source URL {url}: {source}")]
    InvalidUrl {
        /// The offending input.
        url: String,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },

    /// The requester id was empty or whitespace.
    #[error("requester id must not be empty")]
    EmptyRequester,
}

/// Opaque per-request identifier, used for admission-gate keying and logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    /// Generates a fresh random 8-hex-char id.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let raw: u32 = rng.r#gen();
        Self(format!("{raw:08x}"))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parsed quality selector.
///
/// Audio-extract forms pin the container extension up front so naming can be
/// settled before the transfer runs:
/// - `ba/b-<codec>-<bitrate>` extracts audio with the given codec/bitrate
/// - `bestaudio` is normalized to an audio-only selector and defaults to mp3
/// - anything else is passed to the backend as a raw format selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Quality {
    /// Raw format selector forwarded unchanged.
    Format(String),
    /// Audio extraction with a pinned output container.
    AudioExtract {
        /// Format selector sent to the backend.
        selector: String,
        /// Target audio codec.
        codec: String,
        /// Target bitrate, as the backend expects it.
        bitrate: String,
        /// Container extension implied by the codec (with leading dot).
        extension: &'static str,
    },
}

impl Quality {
    /// Parses a user-supplied quality string.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        if let Some(rest) = raw.strip_prefix("ba/b-") {
            let mut parts = rest.splitn(2, '-');
            let codec = parts.next().unwrap_or_default().to_string();
            let bitrate = parts.next().unwrap_or("192").to_string();
            if !codec.is_empty() {
                let extension = audio_extension(&codec);
                return Self::AudioExtract {
                    selector: "ba/b".to_string(),
                    codec,
                    bitrate,
                    extension,
                };
            }
        }
        if raw == "bestaudio" {
            return Self::AudioExtract {
                selector: "bestaudio[vcodec=none]".to_string(),
                codec: "mp3".to_string(),
                bitrate: "192".to_string(),
                extension: ".mp3",
            };
        }
        Self::Format(raw.to_string())
    }

    /// The format selector to configure on the backend.
    #[must_use]
    pub fn selector(&self) -> &str {
        match self {
            Self::Format(s) => s,
            Self::AudioExtract { selector, .. } => selector,
        }
    }

    /// The container extension forced by this quality, if any.
    #[must_use]
    pub fn pinned_extension(&self) -> Option<&'static str> {
        match self {
            Self::Format(_) => None,
            Self::AudioExtract { extension, .. } => Some(extension),
        }
    }
}

/// Maps an audio codec name to its container extension.
fn audio_extension(codec: &str) -> &'static str {
    match codec {
        "vorbis" => ".ogg",
        "alac" => ".m4a",
        "opus" => ".opus",
        "flac" => ".flac",
        "aac" | "m4a" => ".m4a",
        "wav" => ".wav",
        _ => ".mp3",
    }
}

/// Typed option set for a request, with a backend passthrough escape hatch.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Ask the backend to write subtitle side files.
    pub write_subtitles: bool,
    /// Ask the backend to write the info-json side file.
    pub write_info_json: bool,
    /// The request downloads selected sections rather than the whole item.
    pub download_sections: bool,
    /// Backend-specific keys forwarded verbatim.
    pub passthrough: BTreeMap<String, Value>,
}

impl FetchOptions {
    /// Whether the output layout needs a per-item directory because side
    /// files will be written next to the media file.
    #[must_use]
    pub fn wants_item_directory(&self) -> bool {
        self.write_subtitles
            || self.write_info_json
            || SIDE_FILE_KEYS
                .iter()
                .any(|key| self.passthrough.contains_key(*key))
    }
}

/// A single user-originated instruction to fetch one source URL into local
/// storage. Immutable once created.
#[derive(Debug, Clone)]
pub struct Request {
    /// Unique id for this request.
    pub id: RequestId,
    /// Validated source URL.
    pub url: Url,
    /// Id of the user who issued the request.
    pub requester: String,
    /// Parsed quality selector.
    pub quality: Quality,
    /// Whether the source is treated as a multi-entry playlist.
    pub playlist: bool,
    /// Typed options plus backend passthrough.
    pub options: FetchOptions,
}

impl Request {
    /// Builds a validated request.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::InvalidUrl`] if the source URL does not parse
    /// and [`RequestError::EmptyRequester`] on a blank requester id.
    pub fn new(
        url: &str,
        requester: impl Into<String>,
        quality: &str,
        playlist: bool,
        options: FetchOptions,
    ) -> Result<Self, RequestError> {
        let requester = requester.into();
        if requester.trim().is_empty() {
            return Err(RequestError::EmptyRequester);
        }
        let url = Url::parse(url).map_err(|source| RequestError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        Ok(Self {
            id: RequestId::generate(),
            url,
            requester,
            quality: Quality::parse(quality),
            playlist,
            options,
        })
    }

    /// Host of the source URL, when present. Used for last-resort naming.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }
}
