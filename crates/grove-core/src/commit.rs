//! Commits: immutable records in the per-project ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::CommitHash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Added,
    Modified,
    Deleted,
    Renamed,
}

/// One file touched by a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Change {
    pub action: ChangeAction,
    pub file_path: String,
    /// Previous path, for renames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    pub lines_added: u64,
    pub lines_deleted: u64,
    /// Line counts are a line-count delta, not a real diff.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub approximate: bool,
    /// Body before the commit (None for additions).
    pub old_blob: Option<String>,
    /// Body after the commit (None for deletions).
    pub new_blob: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitStats {
    pub files_changed: u64,
    pub total_lines_added: u64,
    pub total_lines_deleted: u64,
}

impl CommitStats {
    /// Sum the per-change line counts.
    pub fn from_changes(changes: &[Change]) -> Self {
        changes.iter().fold(
            CommitStats {
                files_changed: changes.len() as u64,
                ..Default::default()
            },
            |mut acc, c| {
                acc.total_lines_added += c.lines_added;
                acc.total_lines_deleted += c.lines_deleted;
                acc
            },
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Commit {
    pub hash: CommitHash,
    /// Position in the project ledger; strictly increasing per project.
    pub seq: u64,
    pub message: String,
    pub author: String,
    /// Branch the commit was made on.
    pub branch: String,
    /// Previous tip of `branch`'s history. At most one entry today.
    pub parent_commits: Vec<CommitHash>,
    pub changes: Vec<Change>,
    pub stats: CommitStats,
    pub created_at: DateTime<Utc>,
}

impl Commit {
    pub fn short_hash(&self) -> &str {
        self.hash.short()
    }

    /// First line of the message.
    pub fn title(&self) -> &str {
        self.message.lines().next().unwrap_or_default()
    }
}

/// Optional constraints on a history listing. Bounds are inclusive.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub author: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl HistoryFilter {
    pub fn matches(&self, commit: &Commit) -> bool {
        self.author.as_deref().map_or(true, |a| commit.author == a)
            && self.since.map_or(true, |t| commit.created_at >= t)
            && self.until.map_or(true, |t| commit.created_at <= t)
    }
}

/// One page of a history listing, newest first.
///
/// Offset-based: a commit recorded between two page fetches shifts later
/// pages by one.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitPage {
    pub commits: Vec<Commit>,
    /// 1-based page number.
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub total_pages: usize,
    pub has_next: bool,
}

impl CommitPage {
    /// Cut page `page` (1-based, 0 treated as 1) out of an already ordered list.
    pub fn paginate(commits: Vec<Commit>, page: usize, limit: usize) -> Self {
        let page = page.max(1);
        let limit = limit.max(1);
        let total = commits.len();
        let total_pages = total.div_ceil(limit);
        let commits: Vec<Commit> = commits
            .into_iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .collect();
        CommitPage {
            commits,
            page,
            limit,
            total,
            total_pages,
            has_next: page < total_pages,
        }
    }
}

/// Commits between two endpoints plus their aggregate stats.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparison {
    pub base: CommitHash,
    pub head: CommitHash,
    /// Oldest first.
    pub commits: Vec<Commit>,
    pub stats: CompareStats,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareStats {
    pub total_commits: usize,
    /// Distinct paths touched across the range.
    pub files_changed: usize,
    pub total_lines_added: u64,
    pub total_lines_deleted: u64,
}

impl CompareStats {
    pub fn from_commits(commits: &[Commit]) -> Self {
        let mut paths = std::collections::BTreeSet::new();
        let mut stats = CompareStats {
            total_commits: commits.len(),
            ..Default::default()
        };
        for commit in commits {
            stats.total_lines_added += commit.stats.total_lines_added;
            stats.total_lines_deleted += commit.stats.total_lines_deleted;
            paths.extend(commit.changes.iter().map(|c| c.file_path.as_str()));
        }
        stats.files_changed = paths.len();
        stats
    }
}
