//! Resilient metadata-resolution and transfer engine.
//!
//! `mediagrab_core` sits between a request-producing front end (a chat bot,
//! a queue consumer) and an external extraction backend. It owns the policy
//! around the backend: credential rotation, client-profile rotation, failure
//! classification, output naming, progress normalization, and cooperative
//! cancellation. It deliberately does not talk to the network itself — the
//! backend, the credential store, the admission gate, and the limit checker
//! are all traits implemented by the embedder.
//!
//! The typical flow:
//!
//! 1. Build a [`Request`] from user input.
//! 2. Submit it to a [`DownloadExecutor`]; hold the returned
//!    [`RequestHandle`] for status polling and cancellation.
//! 3. Await the handle for the terminal [`Outcome`].

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod backend;
pub mod executor;
pub mod failure;
pub mod profile;
pub mod progress;
pub mod request;
pub mod resolver;

pub use auth::{CredentialHandle, CredentialRegistry, CredentialStore, StoreError, StoredCredential};
pub use backend::{
    BackendError, EntryMeta, ExtractionBackend, ExtractionResult, OutputLayout, ProbeSpec,
    TransferContext, TransferSpec,
};
pub use executor::collaborators::{
    Admission, AdmissionGate, LimitChecker, LimitVerdict, NoLimits, NoopReclaimer,
    ResourceReclaimer, UnboundedGate,
};
pub use executor::{DownloadExecutor, ExecutorConfig, Outcome, RequestHandle};
pub use failure::{Classification, ErrorKind, PhraseTable, RotationAxis};
pub use profile::{ProfileList, ProfileRotator, Rotation};
pub use progress::{ProgressAborted, ProgressEvent, ProgressTracker, TransferState};
pub use request::{FetchOptions, Quality, Request, RequestError, RequestId};
pub use resolver::{MetadataResolver, ResolveError, ResolvedMetadata};
