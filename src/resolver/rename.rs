//! Post-processing rename detection from backend debug lines.
//!
//! When the backend merges formats or extracts audio it writes the real
//! output name only to its debug log. The watcher scans those lines and
//! remembers the last destination seen so the executor can report the
//! post-processed file instead of the pre-merge name. Playlist requests skip
//! this entirely — entries rename independently and the request-level name is
//! the playlist directory.

use std::sync::{Arc, Mutex, OnceLock};

use regex::Regex;
use tracing::debug;

fn merger_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"\[Merger\] Merging formats into "(?P<dest>.+?)""#)
            .unwrap_or_else(|_| unreachable!("merger pattern is valid"))
    })
}

fn extract_audio_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\[ExtractAudio\] Destination: (?P<dest>.+)$")
            .unwrap_or_else(|_| unreachable!("extract-audio pattern is valid"))
    })
}

/// Watches backend debug lines for post-processed output destinations.
///
/// Cheap to clone; clones share the captured name.
#[derive(Debug, Clone)]
pub struct RenameWatcher {
    enabled: bool,
    captured: Arc<Mutex<Option<String>>>,
}

impl RenameWatcher {
    /// Creates a watcher. Disabled for playlist requests.
    #[must_use]
    pub fn new(playlist: bool) -> Self {
        Self {
            enabled: !playlist,
            captured: Arc::new(Mutex::new(None)),
        }
    }

    /// Feeds one backend debug line through the watcher.
    pub fn observe_line(&self, line: &str) {
        if !self.enabled {
            return;
        }
        let destination = merger_pattern()
            .captures(line)
            .or_else(|| extract_audio_pattern().captures(line))
            .and_then(|caps| caps.name("dest"))
            .map(|m| m.as_str());
        if let Some(destination) = destination {
            // Keep only the file name; the destination may carry a path.
            let name = destination
                .rsplit(['/', '\\'])
                .next()
                .unwrap_or(destination)
                .to_string();
            debug!(name, "post-processing rename detected");
            let mut captured = self
                .captured
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *captured = Some(name);
        }
    }

    /// The last post-processed file name seen, if any.
    #[must_use]
    pub fn final_name(&self) -> Option<String> {
        self.captured
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}
