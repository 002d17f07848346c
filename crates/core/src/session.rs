//! Current identity and role.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};

use crate::OwnerId;

/// Session role. Ordered by privilege.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Guest,
    Member,
    Privileged,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self { Role::Guest => "guest", Role::Member => "member", Role::Privileged => "privileged" };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("unknown role: {0} (expected guest, member or privileged)")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "guest" => Ok(Role::Guest),
            "member" | "user" => Ok(Role::Member),
            "privileged" | "admin" | "partner" => Ok(Role::Privileged),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// A signed-in identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: OwnerId,
    pub role: Role,
}

impl Session {
    pub fn new(user_id: impl Into<OwnerId>, role: Role) -> Self {
        Self { user_id: user_id.into(), role }
    }
}

/// Shared, read-mostly handle on the current session.
///
/// Clones observe the same session: `sign_in`/`sign_out` on one clone is seen by all.
/// Reads never block. An absent session behaves as [`Role::Guest`].
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    current: Arc<ArcSwapOption<Session>>,
}

impl SessionContext {
    pub fn new() -> Self { Self::default() }

    pub fn signed_in(session: Session) -> Self {
        let ctx = Self::new();
        ctx.sign_in(session);
        ctx
    }

    pub fn sign_in(&self, session: Session) { self.current.store(Some(Arc::new(session))); }

    pub fn sign_out(&self) { self.current.store(None); }

    pub fn snapshot(&self) -> Option<Arc<Session>> { self.current.load_full() }

    pub fn user_id(&self) -> Option<OwnerId> {
        self.snapshot().map(|s| s.user_id.clone())
    }

    pub fn role(&self) -> Role {
        self.snapshot().map(|s| s.role).unwrap_or(Role::Guest)
    }

    pub fn can_manage_resources(&self) -> bool { self.role() == Role::Privileged }
}
