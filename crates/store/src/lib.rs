//! Vitrine store: the per-screen resource state machine.
//!
//! A [`ResourceStateMachine`] owns three [`UiState`](vitrine_core::UiState)
//! containers (list, current entity, last submission). Repository calls run on
//! tokio tasks; their completions travel back over a channel and are applied by
//! the owner through [`ResourceStateMachine::poll`] or
//! [`ResourceStateMachine::next_event`].

#![forbid(unsafe_code)]

use std::fmt;

use tokio::sync::oneshot;
use vitrine_api::ApiResult;
use vitrine_core::draft::ValidationErrors;
use vitrine_core::gate::AccessDenied;
use vitrine_core::ResourceId;

mod machine;

pub use machine::ResourceStateMachine;

/// Monotonically increasing tag assigned to every started operation.
pub type RequestId = u64;

/// How concurrent completions for the same container are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionOrder {
    /// Only the most recently issued request may settle its container.
    #[default]
    LatestRequest,
    /// Whichever completion arrives last wins.
    LastCompletion,
}

/// One of the machine's state containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    List,
    Current,
    Submission,
}

impl Slot {
    pub(crate) fn idx(self) -> usize {
        match self {
            Slot::List => 0,
            Slot::Current => 1,
            Slot::Submission => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Slot::List => "list",
            Slot::Current => "current",
            Slot::Submission => "submission",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

/// What happened when a completion was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The completion settled its container.
    Applied { slot: Slot, req: RequestId },
    /// A newer request for the same container was issued; the result was dropped.
    Discarded { slot: Slot, req: RequestId },
}

impl Event {
    pub fn slot(&self) -> Slot {
        match self {
            Event::Applied { slot, .. } | Event::Discarded { slot, .. } => *slot,
        }
    }

    pub fn req(&self) -> RequestId {
        match self {
            Event::Applied { req, .. } | Event::Discarded { req, .. } => *req,
        }
    }

    pub fn is_applied(&self) -> bool { matches!(self, Event::Applied { .. }) }
}

/// Result of a successful mutation, as held by the submission container.
#[derive(Debug, Clone, PartialEq)]
pub enum Submitted<R> {
    Created(R),
    Updated(R),
    Deleted(ResourceId),
}

impl<R> Submitted<R> {
    pub fn resource(&self) -> Option<&R> {
        match self {
            Submitted::Created(r) | Submitted::Updated(r) => Some(r),
            Submitted::Deleted(_) => None,
        }
    }
}

/// Completion signal handed to the caller of a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub ok: bool,
    pub message: Option<String>,
}

impl SubmitOutcome {
    pub fn success() -> Self { Self { ok: true, message: None } }

    pub fn failure(message: impl Into<String>) -> Self { Self { ok: false, message: Some(message.into()) } }

    pub fn from_result<T>(result: &ApiResult<T>) -> Self {
        match result {
            Ok(_) => Self::success(),
            Err(e) => Self::failure(e.to_string()),
        }
    }
}

/// Awaitable handle for one mutation.
#[derive(Debug)]
pub struct Ticket {
    req: RequestId,
    rx: oneshot::Receiver<SubmitOutcome>,
}

impl Ticket {
    pub(crate) fn new(req: RequestId, rx: oneshot::Receiver<SubmitOutcome>) -> Self { Self { req, rx } }

    pub fn request_id(&self) -> RequestId { self.req }

    /// Resolves once the repository answered, or with a failure if the owning
    /// screen was torn down first.
    pub async fn outcome(self) -> SubmitOutcome {
        self.rx.await.unwrap_or_else(|_| SubmitOutcome::failure("operation cancelled"))
    }
}

/// A mutation refused locally, before any repository call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejected {
    #[error(transparent)]
    Restricted(#[from] AccessDenied),
    #[error(transparent)]
    Invalid(#[from] ValidationErrors),
    #[error("missing resource id")]
    MissingId,
}

impl Rejected {
    pub fn is_restricted(&self) -> bool { matches!(self, Rejected::Restricted(_)) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vitrine_api::ApiError;

    #[test]
    fn submit_outcome_from_result() {
        assert_eq!(SubmitOutcome::from_result(&Ok::<_, ApiError>(())), SubmitOutcome::success());
        let failed = SubmitOutcome::from_result::<()>(&Err(ApiError::Validation("titre requis".into())));
        assert!(!failed.ok);
        assert_eq!(failed.message.as_deref(), Some("validation: titre requis"));
    }

    #[tokio::test]
    async fn dropped_sender_reads_as_cancelled() {
        let (tx, rx) = oneshot::channel();
        let ticket = Ticket::new(7, rx);
        drop(tx);
        assert_eq!(ticket.request_id(), 7);
        let out = ticket.outcome().await;
        assert!(!out.ok);
        assert_eq!(out.message.as_deref(), Some("operation cancelled"));
    }

    #[test]
    fn event_accessors() {
        let e = Event::Discarded { slot: Slot::List, req: 3 };
        assert_eq!(e.slot(), Slot::List);
        assert_eq!(e.req(), 3);
        assert!(!e.is_applied());
        assert_eq!(Slot::Submission.to_string(), "submission");
    }
}
