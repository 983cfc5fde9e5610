//! Branches: named, independently writable partitions of a project.
//!
//! A fork copies the source's live files and remembers its lineage: which
//! ancestor branches' commits, up to which ledger position, it inherited.
//! A branch's history is its own commits plus that inherited prefix, and
//! divergence is the set difference between two such histories. There is
//! no commit graph walk; two branches with disjoint histories of equal
//! length report each other as fully ahead and behind.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::commit::Commit;
use crate::error::{GroveError, GroveResult};
use crate::identity::CommitHash;

/// A slice of an ancestor's history inherited by a fork:
/// commits on `branch` with `after < seq <= upto`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkPoint {
    pub branch: String,
    pub after: u64,
    pub upto: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchStats {
    pub total_commits: u64,
    /// Relative to the project's default branch.
    pub commits_ahead: u64,
    pub commits_behind: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MergeSettings {
    pub require_pull_request: bool,
    pub required_approvals: u32,
    pub allow_force_push: bool,
    pub delete_after_merge: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Derived from the project's default-branch pointer on every read.
    #[serde(default, skip_deserializing)]
    pub is_default: bool,
    pub is_protected: bool,
    pub creator: String,
    /// Branch this one was forked from.
    pub parent_branch: Option<String>,
    #[serde(default)]
    pub lineage: Vec<ForkPoint>,
    /// Ledger position when the branch was created. Commits with the same
    /// branch name at or below it belong to an earlier, deleted branch.
    pub born_at: u64,
    /// Newest commit in this branch's history; parent of the next commit.
    #[serde(default)]
    pub head: Option<CommitHash>,
    #[serde(default)]
    pub stats: BranchStats,
    #[serde(default)]
    pub merge_settings: MergeSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Branch {
    /// A root branch with no ancestry.
    pub fn new(name: &str, creator: &str, born_at: u64) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            description: None,
            is_default: false,
            is_protected: false,
            creator: creator.to_string(),
            parent_branch: None,
            lineage: Vec::new(),
            born_at,
            head: None,
            stats: BranchStats::default(),
            merge_settings: MergeSettings::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// A branch forked from `source` at ledger position `at`.
    pub fn fork(name: &str, source: &Branch, creator: &str, at: u64) -> Self {
        let mut lineage = source.lineage.clone();
        lineage.push(ForkPoint {
            branch: source.name.clone(),
            after: source.born_at,
            upto: at,
        });
        Self {
            parent_branch: Some(source.name.clone()),
            lineage,
            head: source.head.clone(),
            ..Branch::new(name, creator, at)
        }
    }

    /// True if `commit` is part of this branch's history.
    pub fn contains(&self, commit: &Commit) -> bool {
        if commit.branch == self.name && commit.seq > self.born_at {
            return true;
        }
        self.lineage
            .iter()
            .any(|fp| commit.branch == fp.branch && commit.seq > fp.after && commit.seq <= fp.upto)
    }

    /// This branch's history out of the whole ledger, in ledger order.
    pub fn history<'a>(&self, ledger: &'a [Commit]) -> Vec<&'a Commit> {
        ledger.iter().filter(|c| self.contains(c)).collect()
    }
}

/// Fields that can be changed on an existing branch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchUpdate {
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
    pub merge_settings: Option<MergeSettings>,
}

/// Ahead/behind counts of one branch relative to another.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Divergence {
    pub ahead: u64,
    pub behind: u64,
}

/// Commits in `branch`'s history missing from `target`'s, and vice versa.
pub fn divergence(branch: &Branch, target: &Branch, ledger: &[Commit]) -> Divergence {
    let ours: HashSet<&CommitHash> = branch.history(ledger).into_iter().map(|c| &c.hash).collect();
    let theirs: HashSet<&CommitHash> = target.history(ledger).into_iter().map(|c| &c.hash).collect();
    Divergence {
        ahead: ours.difference(&theirs).count() as u64,
        behind: theirs.difference(&ours).count() as u64,
    }
}

/// Recompute a branch's stats from the ledger.
pub fn compute_stats(branch: &Branch, default: &Branch, ledger: &[Commit]) -> BranchStats {
    let history = branch.history(ledger);
    let d = if branch.name == default.name {
        Divergence::default()
    } else {
        divergence(branch, default, ledger)
    };
    BranchStats {
        total_commits: history.len() as u64,
        commits_ahead: d.ahead,
        commits_behind: d.behind,
        last_activity: history.iter().map(|c| c.created_at).max(),
    }
}

/// All branches of a project by name.
pub type BranchTable = BTreeMap<String, Branch>;

/// Validate a branch name against basic safety rules.
pub fn validate_branch_name(name: &str) -> GroveResult<()> {
    if name.is_empty() || name.len() > 256 {
        return Err(GroveError::InvalidInput(format!(
            "branch name must be 1-256 chars, got {}",
            name.len()
        )));
    }
    if name.contains("..")
        || name.contains("//")
        || name.starts_with('/')
        || name.ends_with('/')
        || name.starts_with('-')
        || name.ends_with(".lock")
    {
        return Err(GroveError::InvalidInput(format!(
            "branch name contains forbidden pattern: {name}"
        )));
    }
    if name.bytes().any(|b| {
        b < 0x20 || b == 0x7f || b == b' ' || b == b'~' || b == b'^' || b == b':' || b == b'\\'
    }) {
        return Err(GroveError::InvalidInput(format!(
            "branch name contains control or forbidden characters: {name}"
        )));
    }
    Ok(())
}
