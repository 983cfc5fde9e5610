//! File store operations. Every write produces exactly one commit.

use super::{author_of, Store};
use crate::auth::{Principal, Role};
use crate::commit::{Change, ChangeAction, Commit};
use crate::diff::{line_stats, LineStats};
use crate::error::{GroveError, GroveResult};
use crate::file::{File, FileEntry, FileRecord};
use crate::path::{parse_dir, FilePath};

impl Store {
    /// Immediate children of `dir` on `branch`, directories first.
    pub fn get_tree(
        &self,
        who: &Principal,
        project_id: &str,
        branch: &str,
        dir: &str,
    ) -> GroveResult<Vec<FileEntry>> {
        self.authorize(who, project_id, Role::Viewer)?;
        let dir = parse_dir(dir)?;
        let project = self.load_project(project_id)?;
        Self::branch(&self.load_branches(&project)?, branch)?;
        self.load_files(project_id)?
            .tree(branch, &dir)
            .ok_or_else(|| GroveError::not_found("directory", dir))
    }

    pub fn get_content(
        &self,
        who: &Principal,
        project_id: &str,
        branch: &str,
        path: &str,
    ) -> GroveResult<File> {
        self.authorize(who, project_id, Role::Viewer)?;
        let path = FilePath::parse(path)?;
        let project = self.load_project(project_id)?;
        Self::branch(&self.load_branches(&project)?, branch)?;
        let files = self.load_files(project_id)?;
        let record = files
            .live(branch, &path)
            .ok_or_else(|| GroveError::not_found("file", path.full()))?;
        let content = self.blobs(project_id).get(&record.blob)?;
        Ok(File {
            record: record.clone(),
            content,
        })
    }

    /// Create or overwrite a file and record the change.
    ///
    /// The file table is saved before the commit is written. If the commit
    /// cannot be written the error is `CommitNotRecorded` and the file keeps
    /// its new body.
    #[tracing::instrument(skip(self, content, message), fields(bytes = content.len()))]
    pub fn put_file(
        &self,
        who: &Principal,
        project_id: &str,
        branch: &str,
        path: &str,
        content: &str,
        message: &str,
    ) -> GroveResult<(File, Commit)> {
        self.authorize(who, project_id, Role::Editor)?;
        let author = author_of(who)?;
        let path = FilePath::parse(path)?;

        let _lock = self.lock(project_id)?;
        let mut project = self.load_project(project_id)?;
        let mut branches = self.load_branches(&project)?;
        Self::branch(&branches, branch)?;
        let mut files = self.load_files(project_id)?;

        let blobs = self.blobs(project_id);
        let old_blob = files.live(branch, &path).map(|r| r.blob.clone());
        let old_body = match &old_blob {
            Some(hash) => blobs.get(hash)?,
            None => String::new(),
        };
        let new_blob = blobs.put(content.as_bytes())?;
        let stats = line_stats(&old_body, content, self.config.max_diff_lines);
        let action = if old_blob.is_some() {
            ChangeAction::Modified
        } else {
            ChangeAction::Added
        };

        let pending = self.begin_commit(&mut project, message, author)?;
        let size = content.len() as u64;
        match files.get_mut(branch, &path) {
            Some(record) => record.overwrite(new_blob.clone(), size, author),
            None => files.insert(FileRecord::new(branch, &path, new_blob.clone(), size, author)),
        }
        let record = match files.get_mut(branch, &path) {
            Some(record) => {
                record.last_commit = Some(pending.hash.clone());
                record.clone()
            }
            None => return Err(GroveError::not_found("file", path.full())),
        };
        self.save_files(project_id, &files)?;

        let change = change(action, &path, None, stats, old_blob, Some(new_blob));
        let commit = self.record(&project, &mut branches, pending, branch, vec![change])?;
        Ok((
            File {
                record,
                content: content.to_string(),
            },
            commit,
        ))
    }

    /// Tombstone a live file. Its body and the deleting commit remain.
    #[tracing::instrument(skip(self, message))]
    pub fn remove_file(
        &self,
        who: &Principal,
        project_id: &str,
        branch: &str,
        path: &str,
        message: &str,
    ) -> GroveResult<Commit> {
        self.authorize(who, project_id, Role::Editor)?;
        let author = author_of(who)?;
        let path = FilePath::parse(path)?;

        let _lock = self.lock(project_id)?;
        let mut project = self.load_project(project_id)?;
        let mut branches = self.load_branches(&project)?;
        Self::branch(&branches, branch)?;
        let mut files = self.load_files(project_id)?;

        let Some(old_blob) = files.live(branch, &path).map(|r| r.blob.clone()) else {
            return Err(GroveError::InvalidOperation(format!(
                "no live file to delete at {path} on {branch}"
            )));
        };
        let old_body = self.blobs(project_id).get(&old_blob)?;
        let stats = line_stats(&old_body, "", self.config.max_diff_lines);

        let pending = self.begin_commit(&mut project, message, author)?;
        if let Some(record) = files.get_mut(branch, &path) {
            record.tombstone(author);
            record.last_commit = Some(pending.hash.clone());
        }
        self.save_files(project_id, &files)?;

        let change = change(ChangeAction::Deleted, &path, None, stats, Some(old_blob), None);
        self.record(&project, &mut branches, pending, branch, vec![change])
    }

    /// Move a live file to a new path in one commit. The body is unchanged.
    #[tracing::instrument(skip(self, message))]
    pub fn move_file(
        &self,
        who: &Principal,
        project_id: &str,
        branch: &str,
        from: &str,
        to: &str,
        message: &str,
    ) -> GroveResult<(File, Commit)> {
        self.authorize(who, project_id, Role::Editor)?;
        let author = author_of(who)?;
        let from = FilePath::parse(from)?;
        let to = FilePath::parse(to)?;
        if from == to {
            return Err(GroveError::InvalidInput(format!("source and destination are both {from}")));
        }

        let _lock = self.lock(project_id)?;
        let mut project = self.load_project(project_id)?;
        let mut branches = self.load_branches(&project)?;
        Self::branch(&branches, branch)?;
        let mut files = self.load_files(project_id)?;

        let blob = files
            .live(branch, &from)
            .map(|r| r.blob.clone())
            .ok_or_else(|| GroveError::not_found("file", from.full()))?;
        if files.live(branch, &to).is_some() {
            return Err(GroveError::Conflict(format!("{to} already exists on {branch}")));
        }

        let pending = self.begin_commit(&mut project, message, author)?;
        files.rename(branch, &from, &to, author);
        let record = match files.get_mut(branch, &to) {
            Some(record) => {
                record.last_commit = Some(pending.hash.clone());
                record.clone()
            }
            None => return Err(GroveError::not_found("file", from.full())),
        };
        self.save_files(project_id, &files)?;

        let content = self.blobs(project_id).get(&blob)?;
        let change = change(
            ChangeAction::Renamed,
            &to,
            Some(from.full()),
            LineStats::default(),
            Some(blob.clone()),
            Some(blob),
        );
        let commit = self.record(&project, &mut branches, pending, branch, vec![change])?;
        Ok((File { record, content }, commit))
    }

    /// Live files whose name or body contains `query`, ignoring case.
    /// At most `search_limit` results, in path order.
    pub fn search_files(
        &self,
        who: &Principal,
        project_id: &str,
        branch: &str,
        query: &str,
    ) -> GroveResult<Vec<File>> {
        self.authorize(who, project_id, Role::Viewer)?;
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Err(GroveError::InvalidInput("search query is empty".into()));
        }
        let project = self.load_project(project_id)?;
        Self::branch(&self.load_branches(&project)?, branch)?;

        let files = self.load_files(project_id)?;
        let blobs = self.blobs(project_id);
        let mut hits = Vec::new();
        for record in files.live_files(branch) {
            if hits.len() >= self.config.search_limit {
                break;
            }
            let content = blobs.get(&record.blob)?;
            if record.name.to_lowercase().contains(&needle) || content.to_lowercase().contains(&needle) {
                hits.push(File {
                    record: record.clone(),
                    content,
                });
            }
        }
        tracing::debug!(project = project_id, branch, query, hits = hits.len(), "searched files");
        Ok(hits)
    }
}

fn change(
    action: ChangeAction,
    path: &FilePath,
    old_path: Option<String>,
    stats: LineStats,
    old_blob: Option<String>,
    new_blob: Option<String>,
) -> Change {
    Change {
        action,
        file_path: path.full(),
        old_path,
        lines_added: stats.added,
        lines_deleted: stats.deleted,
        approximate: stats.approximate,
        old_blob,
        new_blob,
    }
}
