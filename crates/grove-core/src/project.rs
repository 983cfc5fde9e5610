//! Projects: the ownership root for branches, files and commits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GroveError, GroveResult};
use crate::identity::Sequences;

/// Name of the branch every project starts with.
pub const MAIN_BRANCH: &str = "main";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Project {
    pub id: String,
    pub owner: String,
    /// The single default branch. Kept here rather than as a flag on every
    /// branch so that moving it is one write.
    pub default_branch: String,
    /// Position of the newest commit in the project ledger (0 = none yet).
    pub ledger_head: u64,
    #[serde(default)]
    pub sequences: Sequences,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn new(id: String, owner: String) -> Self {
        Self {
            id,
            owner,
            default_branch: MAIN_BRANCH.to_string(),
            ledger_head: 0,
            sequences: Sequences::default(),
            created_at: Utc::now(),
        }
    }

    /// Reserve the next ledger position for a commit.
    pub(crate) fn advance_ledger(&mut self) -> u64 {
        self.ledger_head += 1;
        self.ledger_head
    }
}

/// Options for the initial-commit flow run by `create_project`.
#[derive(Debug, Clone, Default)]
pub struct ProjectInit {
    /// Seed `/README.md` with the project title and record one commit.
    pub readme: bool,
}

/// Validate a project ID (alphanumeric, hyphens, underscores, dots).
pub fn validate_project_id(id: &str) -> GroveResult<()> {
    if id.is_empty() || id.len() > 128 {
        return Err(GroveError::InvalidInput(format!(
            "project ID must be 1-128 chars, got {}",
            id.len()
        )));
    }
    if id.starts_with('.') {
        return Err(GroveError::InvalidInput(format!(
            "project ID may not start with '.': {id}"
        )));
    }
    if !id
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.')
    {
        return Err(GroveError::InvalidInput(format!(
            "project ID contains invalid characters: {id}"
        )));
    }
    Ok(())
}
