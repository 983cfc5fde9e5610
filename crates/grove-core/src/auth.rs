//! Authorization seam.
//!
//! Accounts and collaborator management live outside grove; the store only
//! asks an [`Authorizer`] whether a principal holds a role on a project.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// Project roles, ordered `Viewer < Editor < Admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Editor,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Viewer => "viewer",
            Role::Editor => "editor",
            Role::Admin => "admin",
        };
        f.write_str(s)
    }
}

/// Who is calling: a known user or nobody in particular.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Principal {
    User(String),
    Anonymous,
}

impl Principal {
    pub fn user(id: impl Into<String>) -> Self {
        Principal::User(id.into())
    }

    /// The user id, if any. Authors of commits must have one.
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Principal::User(id) => Some(id),
            Principal::Anonymous => None,
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::User(id) => f.write_str(id),
            Principal::Anonymous => f.write_str("anonymous"),
        }
    }
}

pub trait Authorizer: Send + Sync {
    /// True if `principal` holds `role` (or a higher one) on `project`.
    fn has_permission(&self, principal: &Principal, project: &str, role: Role) -> bool;
}

/// Grants everything to every principal. Used by the CLI and local tooling.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unrestricted;

impl Authorizer for Unrestricted {
    fn has_permission(&self, _principal: &Principal, _project: &str, _role: Role) -> bool {
        true
    }
}

/// Explicit per-project grants held in memory.
#[derive(Debug, Default)]
pub struct StaticAcl {
    grants: RwLock<HashMap<(String, String), Role>>,
    public_read: RwLock<Vec<String>>,
}

impl StaticAcl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, user: &str, project: &str, role: Role) {
        if let Ok(mut grants) = self.grants.write() {
            grants.insert((user.to_string(), project.to_string()), role);
        }
    }

    pub fn revoke(&self, user: &str, project: &str) {
        if let Ok(mut grants) = self.grants.write() {
            grants.remove(&(user.to_string(), project.to_string()));
        }
    }

    /// Let anyone, including anonymous callers, read `project`.
    pub fn make_public(&self, project: &str) {
        if let Ok(mut public) = self.public_read.write() {
            public.push(project.to_string());
        }
    }

    fn is_public(&self, project: &str) -> bool {
        self.public_read
            .read()
            .map(|p| p.iter().any(|id| id == project))
            .unwrap_or(false)
    }
}

impl Authorizer for StaticAcl {
    fn has_permission(&self, principal: &Principal, project: &str, role: Role) -> bool {
        if role == Role::Viewer && self.is_public(project) {
            return true;
        }
        let Some(user) = principal.user_id() else {
            return false;
        };
        self.grants
            .read()
            .ok()
            .and_then(|g| g.get(&(user.to_string(), project.to_string())).copied())
            .is_some_and(|held| held >= role)
    }
}
