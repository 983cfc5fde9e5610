//! Store configuration, persisted at `.grove/config.json`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GroveResult;
use crate::fsutil::{read_json, write_json};

/// What happens to a branch's file records when the branch is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnBranchDelete {
    /// Keep the records. They are unreachable until a branch of the same
    /// name is forked again, which replaces them.
    #[default]
    Retain,
    /// Remove the records together with the branch.
    Purge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// How long a mutation waits for the project lock.
    pub lock_timeout_ms: u64,
    /// Attempts at a fresh commit hash before giving up with `Conflict`.
    pub hash_retry_budget: u32,
    /// Maximum number of results returned by file search.
    pub search_limit: usize,
    /// Commits per history page when the caller does not say.
    pub page_size: usize,
    /// Upper bound on a caller-requested page size.
    pub max_page_size: usize,
    /// Unchanged lines shown around each diff hunk.
    pub diff_context_lines: usize,
    /// Bodies longer than this (in lines) get line-count stats instead of a real diff.
    pub max_diff_lines: usize,
    /// Refresh a branch's stats inside every write that commits to it.
    pub auto_refresh_stats: bool,
    pub on_branch_delete: OnBranchDelete,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5_000,
            hash_retry_budget: 3,
            search_limit: 50,
            page_size: 20,
            max_page_size: 100,
            diff_context_lines: 3,
            max_diff_lines: 2_000,
            auto_refresh_stats: true,
            on_branch_delete: OnBranchDelete::Retain,
        }
    }
}

impl Config {
    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> GroveResult<Self> {
        Ok(read_json(path)?.unwrap_or_default())
    }

    pub fn save(&self, path: &Path) -> GroveResult<()> {
        write_json(path, self)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Clamp a requested page size into `1..=max_page_size`.
    pub fn page_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.page_size)
            .clamp(1, self.max_page_size.max(1))
    }
}
