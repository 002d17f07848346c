//! Vitrine core types.
//!
//! Everything a screen needs to reason about a remote resource without doing I/O:
//! the [`UiState`] lifecycle, sessions and the [`gate::RoleGate`], the resource
//! model, drafts, and the ownership filter.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod draft;
pub mod gate;
pub mod ownership;
pub mod resource;
pub mod session;

pub mod prelude {
    pub use super::draft::{to_draft, Draft, DraftMode, FieldError, Payload, ValidationErrors};
    pub use super::gate::{AccessDenied, DenyReason, RoleGate};
    pub use super::ownership::filter_owned;
    pub use super::resource::{Advertisement, Resource, Review, Validity};
    pub use super::session::{Role, Session, SessionContext};
    pub use super::{OwnerId, ResourceId, UiState};
}

/// Identifier assigned by the remote service on first successful create.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for ResourceId {
    fn from(v: &str) -> Self { Self(v.to_string()) }
}

impl From<String> for ResourceId {
    fn from(v: String) -> Self { Self(v) }
}

/// Normalized owner identity. Comparable directly with [`session::Session::user_id`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for OwnerId {
    fn from(v: &str) -> Self { Self(v.to_string()) }
}

impl From<String> for OwnerId {
    fn from(v: String) -> Self { Self(v) }
}

/// Lifecycle of one asynchronous operation's outcome.
///
/// Exactly one variant is held at a time. Starting an operation always replaces
/// the current value with `Loading`, including any previous `Success` data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum UiState<T> {
    Idle,
    Loading,
    Success(T),
    Error(String),
}

impl<T> Default for UiState<T> {
    fn default() -> Self { Self::Idle }
}

impl<T> UiState<T> {
    pub fn is_idle(&self) -> bool { matches!(self, Self::Idle) }
    pub fn is_loading(&self) -> bool { matches!(self, Self::Loading) }
    pub fn is_success(&self) -> bool { matches!(self, Self::Success(_)) }

    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Success(v) => Some(v),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Error(m) => Some(m.as_str()),
            _ => None,
        }
    }

    pub fn as_ref(&self) -> UiState<&T> {
        match self {
            Self::Idle => UiState::Idle,
            Self::Loading => UiState::Loading,
            Self::Success(v) => UiState::Success(v),
            Self::Error(m) => UiState::Error(m.clone()),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> UiState<U> {
        match self {
            Self::Idle => UiState::Idle,
            Self::Loading => UiState::Loading,
            Self::Success(v) => UiState::Success(f(v)),
            Self::Error(m) => UiState::Error(m),
        }
    }

    /// Settle from a repository result. `Ok` maps to `Success`, `Err` to `Error(message)`.
    pub fn settle<E: fmt::Display>(result: Result<T, E>) -> Self {
        match result {
            Ok(v) => Self::Success(v),
            Err(e) => Self::Error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_idle() {
        let s: UiState<Vec<u8>> = UiState::default();
        assert!(s.is_idle());
        assert!(s.data().is_none());
    }

    #[test]
    fn settle_maps_both_arms() {
        let ok: UiState<u8> = UiState::settle::<String>(Ok(3));
        assert_eq!(ok.data(), Some(&3));
        let err: UiState<u8> = UiState::settle(Err("network: unreachable"));
        assert_eq!(err.error(), Some("network: unreachable"));
    }

    #[test]
    fn map_keeps_variant() {
        let s = UiState::Success(vec![1, 2, 3]).map(|v| v.len());
        assert_eq!(s, UiState::Success(3));
        let e: UiState<usize> = UiState::<Vec<u8>>::Error("x".into()).map(|v| v.len());
        assert_eq!(e, UiState::Error("x".into()));
    }
}
