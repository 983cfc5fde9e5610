//! Commit ledger operations: recording, history, lookup, diff and compare.

use chrono::{DateTime, Utc};

use super::Store;
use crate::auth::{Principal, Role};
use crate::branch::BranchTable;
use crate::commit::{
    Change, ChangeAction, Commit, CommitPage, CommitStats, CompareStats, Comparison, HistoryFilter,
};
use crate::diff::{compute_line_diff, count_lines, hunk_totals, FileDiff};
use crate::error::{GroveError, GroveResult};
use crate::identity::CommitHash;
use crate::project::Project;

/// Identity reserved for a commit before the file mutation it describes.
///
/// The file record must point at the commit hash, so the hash and ledger
/// position are fixed first; the commit document is written only after
/// the file table has been saved.
pub(super) struct PendingCommit {
    pub hash: CommitHash,
    seq: u64,
    author: String,
    message: String,
    created_at: DateTime<Utc>,
}

impl Store {
    /// Mint a unique hash and reserve the next ledger position. Caller holds the lock.
    pub(super) fn begin_commit(
        &self,
        project: &mut Project,
        message: &str,
        author: &str,
    ) -> GroveResult<PendingCommit> {
        if message.trim().is_empty() {
            return Err(GroveError::InvalidInput("commit message is empty".into()));
        }

        let attempts = self.config.hash_retry_budget.max(1);
        let mut minted = None;
        for attempt in 1..=attempts {
            let created_at = Utc::now();
            let hash = CommitHash::derive(&project.id, message, author, created_at, CommitHash::nonce());
            if self.commit_path(&project.id, &hash).exists() {
                tracing::warn!(project = %project.id, %hash, attempt, "commit hash collision, retrying");
                continue;
            }
            minted = Some((hash, created_at));
            break;
        }
        let Some((hash, created_at)) = minted else {
            return Err(GroveError::Conflict(format!(
                "no unique commit hash after {attempts} attempts"
            )));
        };

        let seq = project.advance_ledger();
        self.save_project(project)?;
        Ok(PendingCommit {
            hash,
            seq,
            author: author.to_string(),
            message: message.to_string(),
            created_at,
        })
    }

    /// Append the commit for a mutation that has already been saved, then
    /// advance the branch head (and stats, if configured).
    ///
    /// A failure to write the commit is surfaced as `CommitNotRecorded`; the
    /// file change is not rolled back.
    pub(super) fn record(
        &self,
        project: &Project,
        branches: &mut BranchTable,
        pending: PendingCommit,
        branch: &str,
        changes: Vec<Change>,
    ) -> GroveResult<Commit> {
        let parent = Self::branch(branches, branch)?.head.clone();
        let commit = Commit {
            hash: pending.hash,
            seq: pending.seq,
            message: pending.message,
            author: pending.author,
            branch: branch.to_string(),
            parent_commits: parent.into_iter().collect(),
            stats: CommitStats::from_changes(&changes),
            changes,
            created_at: pending.created_at,
        };

        if let Err(e) = self.save_commit(&project.id, &commit) {
            tracing::warn!(project = %project.id, hash = %commit.hash, error = %e, "file change applied but commit not recorded");
            return Err(GroveError::CommitNotRecorded {
                hash: commit.hash.to_string(),
                source: Box::new(e),
            });
        }

        if let Some(b) = branches.get_mut(branch) {
            b.head = Some(commit.hash.clone());
            b.updated_at = commit.created_at;
        }
        if self.config.auto_refresh_stats {
            let ledger = self.load_ledger(&project.id)?;
            Self::refresh_in(project, branches, branch, &ledger)?;
        }
        self.save_branches(&project.id, branches)?;

        tracing::info!(
            project = %project.id,
            branch,
            hash = commit.short_hash(),
            files = commit.stats.files_changed,
            "recorded commit"
        );
        Ok(commit)
    }

    /// A page of `branch`'s history, newest first.
    pub fn history(
        &self,
        who: &Principal,
        project_id: &str,
        branch: &str,
        filter: &HistoryFilter,
        page: usize,
        limit: Option<usize>,
    ) -> GroveResult<CommitPage> {
        self.authorize(who, project_id, Role::Viewer)?;
        let project = self.load_project(project_id)?;
        let branches = self.load_branches(&project)?;
        let branch = Self::branch(&branches, branch)?;
        let ledger = self.load_ledger(project_id)?;

        let commits: Vec<Commit> = branch
            .history(&ledger)
            .into_iter()
            .rev()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        Ok(CommitPage::paginate(commits, page, self.config.page_limit(limit)))
    }

    /// Resolve a commit by a case-insensitive hash prefix.
    ///
    /// Exactly one commit must match: none is `NotFound`, several is `Ambiguous`.
    pub fn find_commit(&self, who: &Principal, project_id: &str, prefix: &str) -> GroveResult<Commit> {
        self.authorize(who, project_id, Role::Viewer)?;
        self.load_project(project_id)?;
        self.resolve_prefix(project_id, prefix)
    }

    fn resolve_prefix(&self, project_id: &str, prefix: &str) -> GroveResult<Commit> {
        let needle = prefix.trim().to_ascii_lowercase();
        if needle.is_empty() {
            return Err(GroveError::InvalidInput("commit prefix is empty".into()));
        }

        let matches: Vec<CommitHash> = self
            .commit_hashes(project_id)?
            .into_iter()
            .filter(|h| h.as_str().starts_with(&needle))
            .collect();

        match matches.as_slice() {
            [] => Err(GroveError::not_found("commit", prefix)),
            [hash] => self.load_commit(project_id, hash),
            _ => Err(GroveError::Ambiguous {
                prefix: prefix.to_string(),
                count: matches.len(),
            }),
        }
    }

    /// Before/after bodies and hunks for every change in a commit.
    ///
    /// Bodies come from the blobs recorded on the change, so the result does
    /// not depend on later writes to the same files. Bodies over
    /// `max_diff_lines` get no hunks, only the recorded line counts.
    pub fn diff_commit(&self, who: &Principal, project_id: &str, prefix: &str) -> GroveResult<Vec<FileDiff>> {
        let commit = self.find_commit(who, project_id, prefix)?;
        let blobs = self.blobs(project_id);
        let fetch = |hash: &Option<String>| -> GroveResult<Option<String>> {
            match hash {
                None => Ok(None),
                Some(h) => match blobs.get(h) {
                    Ok(body) => Ok(Some(body)),
                    Err(GroveError::NotFound { .. }) => {
                        tracing::warn!(project = project_id, blob = %h, "blob missing, diff side left empty");
                        Ok(None)
                    }
                    Err(e) => Err(e),
                },
            }
        };

        commit
            .changes
            .iter()
            .map(|change| {
                let before = fetch(&change.old_blob)?;
                let after = fetch(&change.new_blob)?;
                let old_body = before.as_deref().unwrap_or_default();
                let new_body = after.as_deref().unwrap_or_default();
                let max = self.config.max_diff_lines;
                let too_large = count_lines(old_body) > max || count_lines(new_body) > max;
                // A pure rename has the same body on both sides.
                let unchanged = change.action == ChangeAction::Renamed && change.old_blob == change.new_blob;

                let (hunks, additions, deletions) = if too_large {
                    (Vec::new(), change.lines_added as usize, change.lines_deleted as usize)
                } else if unchanged {
                    (Vec::new(), 0, 0)
                } else {
                    let hunks = compute_line_diff(old_body, new_body, self.config.diff_context_lines);
                    let (additions, deletions) = hunk_totals(&hunks);
                    (hunks, additions, deletions)
                };
                Ok(FileDiff {
                    path: change.file_path.clone(),
                    old_path: change.old_path.clone(),
                    action: change.action,
                    before_content: before,
                    after_content: after,
                    hunks,
                    additions,
                    deletions,
                })
            })
            .collect()
    }

    /// Commits recorded strictly between two commits' timestamps, oldest first.
    ///
    /// The range is by time across the whole project, not by ancestry, and
    /// is taken in the order given: a head older than the base yields nothing.
    pub fn compare(
        &self,
        who: &Principal,
        project_id: &str,
        base: &str,
        head: &str,
    ) -> GroveResult<Comparison> {
        let base = self.find_commit(who, project_id, base)?;
        let head = self.find_commit(who, project_id, head)?;

        let commits: Vec<Commit> = self
            .load_ledger(project_id)?
            .into_iter()
            .filter(|c| c.created_at > base.created_at && c.created_at < head.created_at)
            .collect();

        Ok(Comparison {
            base: base.hash,
            head: head.hash,
            stats: CompareStats::from_commits(&commits),
            commits,
        })
    }
}
