//! Capability check consulted before any mutating call leaves the client.
//!
//! Reads (list/get) are never gated. A denial is not an operation failure: callers
//! surface it as a restricted-access view and must not touch the repository.

#![forbid(unsafe_code)]

use std::fmt;

use crate::session::{Role, SessionContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    SignedOut,
    InsufficientRole { role: Role, required: Role },
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::SignedOut => f.write_str("sign in required"),
            DenyReason::InsufficientRole { role, required } => {
                write!(f, "role {} cannot manage resources (requires {})", role, required)
            }
        }
    }
}

/// Authorization failure produced by [`RoleGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("restricted: {reason}")]
pub struct AccessDenied {
    pub reason: DenyReason,
}

impl AccessDenied {
    /// Text for the restricted-access view.
    pub fn user_message(&self) -> &'static str {
        match self.reason {
            DenyReason::SignedOut => "Restricted access: please sign in to manage listings.",
            DenyReason::InsufficientRole { .. } => {
                "Restricted access: only partner accounts can manage listings."
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleGate {
    required: Role,
}

impl Default for RoleGate {
    fn default() -> Self { Self { required: Role::Privileged } }
}

impl RoleGate {
    pub fn requiring(required: Role) -> Self { Self { required } }

    pub fn required(&self) -> Role { self.required }

    pub fn authorize_mutation(&self, session: &SessionContext) -> Result<(), AccessDenied> {
        let Some(current) = session.snapshot() else {
            return Err(AccessDenied { reason: DenyReason::SignedOut });
        };
        if current.role >= self.required {
            Ok(())
        } else {
            Err(AccessDenied {
                reason: DenyReason::InsufficientRole { role: current.role, required: self.required },
            })
        }
    }

    /// Same check, applied when a screen opens a creation or edit form.
    pub fn authorize_form(&self, session: &SessionContext) -> Result<(), AccessDenied> {
        self.authorize_mutation(session)
    }
}
