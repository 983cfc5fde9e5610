//! Identity generation: commit hashes and per-project sequence numbers.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::hash::{hash_fields, FULL_HASH_LEN};

/// Number of characters shown for a commit in listings.
pub const SHORT_HASH_LEN: usize = 7;

/// A commit identifier. The full digest is kept; the short form is for display.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitHash(String);

impl CommitHash {
    /// Derive a hash from the commit's inputs plus a nonce.
    ///
    /// The creation time and nonce make two commits with identical
    /// message and author distinct; callers retry with a fresh nonce if
    /// the result is already taken in the project.
    pub fn derive(
        project: &str,
        message: &str,
        author: &str,
        at: DateTime<Utc>,
        nonce: u64,
    ) -> Self {
        let at = at.timestamp_nanos_opt().unwrap_or_default().to_le_bytes();
        let nonce = nonce.to_le_bytes();
        let digest = hash_fields(&[
            project.as_bytes(),
            message.as_bytes(),
            author.as_bytes(),
            &at,
            &nonce,
        ]);
        debug_assert_eq!(digest.len(), FULL_HASH_LEN);
        CommitHash(digest)
    }

    /// Fresh random nonce for [`derive`](Self::derive).
    pub fn nonce() -> u64 {
        rand::thread_rng().next_u64()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..SHORT_HASH_LEN.min(self.0.len())]
    }
}

impl fmt::Display for CommitHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CommitHash {
    fn from(s: String) -> Self {
        CommitHash(s)
    }
}

/// Numbering schemes that share the monotonic per-project counter pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SequenceKind {
    Issue,
    PullRequest,
}

impl std::str::FromStr for SequenceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "issue" | "issues" => Ok(SequenceKind::Issue),
            "pr" | "pull" | "pull-request" | "pullrequest" => Ok(SequenceKind::PullRequest),
            other => Err(format!("unknown sequence kind: '{other}'")),
        }
    }
}

/// Highest number handed out per kind. Persisted inside the project record
/// and only advanced while the project lock is held.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sequences(BTreeMap<SequenceKind, u64>);

impl Sequences {
    /// `1 + max(existing)`, or 1 when nothing was allocated for `kind` yet.
    pub fn peek_next(&self, kind: SequenceKind) -> u64 {
        self.0.get(&kind).copied().unwrap_or(0) + 1
    }

    /// Allocate the next number and remember it as the new maximum.
    pub fn allocate(&mut self, kind: SequenceKind) -> u64 {
        let next = self.peek_next(kind);
        self.0.insert(kind, next);
        next
    }
}
