//! Credential resolution and materialization.
//!
//! Requesters may have an ordered set of opaque credential blobs (exported
//! session state) persisted in an external store. The registry merges those
//! with credential files already materialized on disk, dedups by rank, and
//! lazily writes blobs to transient files the extraction backend can consume.
//! Store failures are swallowed and logged — a broken credential store must
//! never fail a request, it only degrades to the shared/default credential.
//!
//! Credential blobs are sensitive: the handle's `Debug` output redacts them.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, instrument, warn};

/// A credential blob as returned by the external store.
#[derive(Clone)]
pub struct StoredCredential {
    /// Position in the requester's ordered credential set.
    pub rank: u32,
    /// Opaque credential material.
    pub blob: Vec<u8>,
}

/// External persistence for per-requester credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Lists the requester's persisted credentials, unordered.
    async fn list_credentials(&self, requester: &str) -> Result<Vec<StoredCredential>, StoreError>;
}

/// Opaque failure from the external credential store.
#[derive(Debug, thiserror::Error)]
#[error("credential store error: {0}")]
pub struct StoreError(pub String);

/// Errors raised while materializing a credential to disk.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// Writing the transient credential file failed. Aborts the request.
    #[error("failed to write credential file {path}: {source}")]
    Storage {
        /// Target path of the transient file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// One entry of a requester's ordered credential set.
///
/// The blob may be empty for credentials discovered already materialized on
/// disk; [`CredentialRegistry::materialize`] then just returns the existing
/// file.
#[derive(Clone)]
pub struct CredentialHandle {
    /// Position in the ordered set; rotation follows ascending rank.
    pub rank: u32,
    blob: Vec<u8>,
}

impl CredentialHandle {
    /// Creates a handle carrying blob material from the store.
    #[must_use]
    pub fn new(rank: u32, blob: Vec<u8>) -> Self {
        Self { rank, blob }
    }

    /// Creates a handle for a credential already present on disk.
    #[must_use]
    pub fn on_disk(rank: u32) -> Self {
        Self { rank, blob: Vec::new() }
    }
}

// Redacts the blob, mirroring how cookie values are kept out of logs.
impl fmt::Debug for CredentialHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialHandle")
            .field("rank", &self.rank)
            .field("blob", &"[REDACTED]")
            .finish()
    }
}

/// Resolves and materializes per-requester credential sets.
///
/// The materialized-file cache is keyed by requester+rank and is safe for
/// concurrent reads and write-once-if-absent writes across requests.
pub struct CredentialRegistry {
    dir: PathBuf,
    store: Option<Arc<dyn CredentialStore>>,
    materialized: DashMap<(String, u32), PathBuf>,
}

impl fmt::Debug for CredentialRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRegistry")
            .field("dir", &self.dir)
            .field("has_store", &self.store.is_some())
            .field("materialized", &self.materialized.len())
            .finish()
    }
}

impl CredentialRegistry {
    /// Creates a registry writing transient files under `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, store: Option<Arc<dyn CredentialStore>>) -> Self {
        Self {
            dir: dir.into(),
            store,
            materialized: DashMap::new(),
        }
    }

    /// Resolves the requester's ordered credential set.
    ///
    /// Merges persisted store credentials with files already on disk, dedups
    /// by rank (store blobs win), and sorts ascending by rank. An empty
    /// result means "use the shared/default credential". Store and
    /// filesystem errors are swallowed and logged, never raised.
    #[instrument(skip(self))]
    pub async fn resolve(&self, requester: &str) -> Vec<CredentialHandle> {
        let mut by_rank: std::collections::BTreeMap<u32, CredentialHandle> =
            std::collections::BTreeMap::new();

        if let Some(store) = &self.store {
            match store.list_credentials(requester).await {
                Ok(stored) => {
                    for credential in stored {
                        by_rank.insert(
                            credential.rank,
                            CredentialHandle::new(credential.rank, credential.blob),
                        );
                    }
                }
                Err(e) => {
                    warn!(requester, error = %e, "credential store lookup failed; continuing without");
                }
            }
        }

        for rank in self.scan_disk(requester).await {
            by_rank
                .entry(rank)
                .or_insert_with(|| CredentialHandle::on_disk(rank));
        }

        let handles: Vec<CredentialHandle> = by_rank.into_values().collect();
        debug!(requester, count = handles.len(), "resolved credential set");
        handles
    }

    /// Returns ranks of credential files already materialized for the
    /// requester. Errors are logged and treated as "none found".
    async fn scan_disk(&self, requester: &str) -> Vec<u32> {
        let mut ranks = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return ranks,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "credential directory scan failed");
                return ranks;
            }
        };
        let prefix = format!("{requester}_");
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(rank) = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".txt"))
                .and_then(|digits| digits.parse::<u32>().ok())
            {
                ranks.push(rank);
            }
        }
        ranks
    }

    /// Materializes a credential to its transient file, idempotently.
    ///
    /// Returns the existing file when one has already been written for this
    /// requester+rank; otherwise writes the blob.
    ///
    /// # Errors
    ///
    /// [`CredentialError::Storage`] when the file cannot be written; the
    /// executor surfaces this as a fatal storage failure.
    #[instrument(skip(self, handle), fields(rank = handle.rank))]
    pub async fn materialize(
        &self,
        requester: &str,
        handle: &CredentialHandle,
    ) -> Result<PathBuf, CredentialError> {
        let key = (requester.to_string(), handle.rank);
        if let Some(path) = self.materialized.get(&key) {
            return Ok(path.clone());
        }

        let path = self.file_path(requester, handle.rank);
        let exists = tokio::fs::try_exists(&path).await.unwrap_or(false);
        if !exists {
            tokio::fs::create_dir_all(&self.dir)
                .await
                .map_err(|source| CredentialError::Storage {
                    path: self.dir.clone(),
                    source,
                })?;
            tokio::fs::write(&path, &handle.blob)
                .await
                .map_err(|source| CredentialError::Storage {
                    path: path.clone(),
                    source,
                })?;
            debug!(requester, rank = handle.rank, path = %path.display(), "materialized credential file");
        }

        self.materialized.insert(key, path.clone());
        Ok(path)
    }

    /// Transient file path for a requester+rank pair.
    #[must_use]
    pub fn file_path(&self, requester: &str, rank: u32) -> PathBuf {
        self.dir.join(format!("{requester}_{rank}.txt"))
    }

    /// Base directory for transient credential files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
