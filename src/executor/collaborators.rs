//! External collaborators consulted by the executor.
//!
//! Admission control, quota policy, and resource reclamation are owned
//! outside this crate; the executor only drives them through these seams.
//! No-op implementations are provided for embedders that do not need a given
//! policy (and for tests).

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::request::RequestId;

/// Verdict from the admission gate.
#[derive(Debug)]
pub enum Admission {
    /// The transfer may start immediately.
    Admitted,
    /// The transfer must wait; the receiver fires when a slot frees up.
    Queued(oneshot::Receiver<()>),
}

/// Concurrency cap / duplicate-task collapsing, owned externally.
#[async_trait]
pub trait AdmissionGate: Send + Sync {
    /// Asks to start a transfer for the given request.
    async fn try_admit(&self, request_id: &RequestId) -> Admission;
}

/// Gate that admits everything immediately.
#[derive(Debug, Default)]
pub struct UnboundedGate;

#[async_trait]
impl AdmissionGate for UnboundedGate {
    async fn try_admit(&self, _: &RequestId) -> Admission {
        Admission::Admitted
    }
}

/// Verdict from the external limit checker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitVerdict {
    /// The transfer may proceed.
    Allowed,
    /// The transfer is denied; the reason is surfaced verbatim.
    Denied(String),
}

/// Quota/limit policy, owned externally.
#[async_trait]
pub trait LimitChecker: Send + Sync {
    /// Checks whether a transfer of `declared_size` bytes is allowed for the
    /// requester.
    async fn check_allowed(
        &self,
        declared_size: u64,
        requester: &str,
        playlist: bool,
    ) -> LimitVerdict;
}

/// Limit checker that allows everything.
#[derive(Debug, Default)]
pub struct NoLimits;

#[async_trait]
impl LimitChecker for NoLimits {
    async fn check_allowed(&self, _: u64, _: &str, _: bool) -> LimitVerdict {
        LimitVerdict::Allowed
    }
}

/// Post-operation memory cleanup hook, fire-and-forget.
pub trait ResourceReclaimer: Send + Sync {
    /// Requests a cleanup pass; `aggressive` marks heavy requests.
    fn reclaim(&self, aggressive: bool);
}

/// Reclaimer that does nothing.
#[derive(Debug, Default)]
pub struct NoopReclaimer;

impl ResourceReclaimer for NoopReclaimer {
    fn reclaim(&self, _: bool) {}
}
