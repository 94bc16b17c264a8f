//! Client profile rotation for platform-restricted failures.
//!
//! The engine presents one of a fixed, deployment-constant list of client
//! profiles to the extraction backend. When a failure classifies as
//! platform-restricted, the rotator advances to the next profile not yet
//! visited for this request, wrapping modulo the list length; once all
//! profiles have been visited it is exhausted. Rotation is deterministic:
//! the same starting profile and failure sequence always produce the same
//! visit order.

use std::sync::Arc;

/// Default profile identifiers, in rotation order.
const DEFAULT_PROFILES: &[&str] = &["web", "android", "ios", "mweb", "tv_embedded"];

/// Fixed ordered list of client profile identifiers.
///
/// Constant per deployment; shared across requests via `Arc`.
#[derive(Debug, Clone)]
pub struct ProfileList {
    names: Vec<String>,
}

impl Default for ProfileList {
    fn default() -> Self {
        Self::new(DEFAULT_PROFILES.iter().map(ToString::to_string))
    }
}

impl ProfileList {
    /// Builds a profile list from an ordered set of identifiers.
    ///
    /// An empty input falls back to the built-in default list so the rotation
    /// loop bound `max(1, |credentials|) × |profiles|` is never zero.
    pub fn new(names: impl IntoIterator<Item = String>) -> Self {
        let names: Vec<String> = names.into_iter().filter(|n| !n.is_empty()).collect();
        if names.is_empty() {
            return Self {
                names: DEFAULT_PROFILES.iter().map(ToString::to_string).collect(),
            };
        }
        Self { names }
    }

    /// Number of profiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always false: construction guarantees at least one profile.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// The profile name at `index`.
    #[must_use]
    pub fn name(&self, index: usize) -> &str {
        &self.names[index % self.names.len()]
    }
}

/// Result of asking the rotator to advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    /// Moved to the profile at this index.
    Advanced(usize),
    /// Every profile has been visited; terminal.
    Exhausted,
}

/// Per-request rotation state over a [`ProfileList`].
///
/// Tracks the current index and visit order. Indices never backtrack: a
/// visited profile is never selected again within one request.
#[derive(Debug, Clone)]
pub struct ProfileRotator {
    profiles: Arc<ProfileList>,
    current: usize,
    visited: Vec<usize>,
}

impl ProfileRotator {
    /// Creates a rotator starting at index 0, which counts as visited.
    #[must_use]
    pub fn new(profiles: Arc<ProfileList>) -> Self {
        Self {
            profiles,
            current: 0,
            visited: vec![0],
        }
    }

    /// Index of the profile currently presented.
    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Name of the profile currently presented.
    #[must_use]
    pub fn current_name(&self) -> &str {
        self.profiles.name(self.current)
    }

    /// Advances to the next profile not yet visited, wrapping modulo the
    /// list length. Returns [`Rotation::Exhausted`] once all profiles have
    /// been visited.
    pub fn advance(&mut self) -> Rotation {
        let n = self.profiles.len();
        if self.visited.len() >= n {
            return Rotation::Exhausted;
        }
        let mut candidate = (self.current + 1) % n;
        while self.visited.contains(&candidate) {
            candidate = (candidate + 1) % n;
        }
        self.current = candidate;
        self.visited.push(candidate);
        Rotation::Advanced(candidate)
    }

    /// Whether every profile has been visited.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.visited.len() >= self.profiles.len()
    }

    /// Profile names in the order they were attempted. Used for the
    /// exhausted-rotation failure message.
    #[must_use]
    pub fn attempted(&self) -> Vec<String> {
        self.visited
            .iter()
            .map(|&i| self.profiles.name(i).to_string())
            .collect()
    }
}
