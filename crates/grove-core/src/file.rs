//! The file store's records: one live snapshot per (branch, path).
//!
//! A record is mutated in place on every write and tombstoned on delete;
//! the bodies themselves are immutable blobs in the [`BlobStore`](crate::object::BlobStore).

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::CommitHash;
use crate::path::{child_component, detect_language, is_within, FilePath};

/// Persisted state of one file on one branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileRecord {
    /// Record identity. Forks mint a new one for every copied file.
    pub id: String,
    pub branch: String,
    /// Parent directory, `/` for the root.
    pub path: String,
    pub name: String,
    /// Hash of the current body.
    pub blob: String,
    /// Body size in bytes.
    pub size: u64,
    pub language: Option<String>,
    pub is_deleted: bool,
    /// The commit that most recently touched this record.
    pub last_commit: Option<CommitHash>,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn new(branch: &str, path: &FilePath, blob: String, size: u64, author: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            branch: branch.to_string(),
            path: path.dir.clone(),
            name: path.name.clone(),
            blob,
            size,
            language: detect_language(path).map(String::from),
            is_deleted: false,
            last_commit: None,
            created_by: author.to_string(),
            updated_by: author.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn file_path(&self) -> FilePath {
        FilePath {
            dir: self.path.clone(),
            name: self.name.clone(),
        }
    }

    pub fn full_path(&self) -> String {
        self.file_path().full()
    }

    /// Point the record at a new body, reviving it if it was tombstoned.
    pub(crate) fn overwrite(&mut self, blob: String, size: u64, author: &str) {
        self.blob = blob;
        self.size = size;
        self.language = detect_language(&self.file_path()).map(String::from);
        self.is_deleted = false;
        self.updated_by = author.to_string();
        self.updated_at = Utc::now();
    }

    pub(crate) fn tombstone(&mut self, author: &str) {
        self.is_deleted = true;
        self.updated_by = author.to_string();
        self.updated_at = Utc::now();
    }

    /// Copy for a forked branch: fresh identity, no commit pointer.
    fn fork_into(&self, branch: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            branch: branch.to_string(),
            last_commit: None,
            created_at: now,
            updated_at: now,
            ..self.clone()
        }
    }
}

/// A live file together with its body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct File {
    #[serde(flatten)]
    pub record: FileRecord,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    // Declared first so that directories sort ahead of files.
    Directory,
    File,
}

/// One row of a tree listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    /// Full path of the entry.
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_commit: Option<CommitHash>,
}

/// Every file record of a project: branch -> full path -> record.
///
/// Keying on the full path enforces the (branch, path, name) uniqueness
/// constraint: re-creating a deleted file revives its tombstone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileTable {
    branches: BTreeMap<String, BTreeMap<String, FileRecord>>,
}

impl FileTable {
    /// Any record, live or tombstoned.
    pub fn get(&self, branch: &str, path: &FilePath) -> Option<&FileRecord> {
        self.branches.get(branch)?.get(&path.full())
    }

    pub fn get_mut(&mut self, branch: &str, path: &FilePath) -> Option<&mut FileRecord> {
        self.branches.get_mut(branch)?.get_mut(&path.full())
    }

    pub fn live(&self, branch: &str, path: &FilePath) -> Option<&FileRecord> {
        self.get(branch, path).filter(|r| !r.is_deleted)
    }

    pub fn insert(&mut self, record: FileRecord) {
        self.branches
            .entry(record.branch.clone())
            .or_default()
            .insert(record.full_path(), record);
    }

    /// Live records of a branch in path order.
    pub fn live_files<'a>(&'a self, branch: &str) -> impl Iterator<Item = &'a FileRecord> + 'a {
        self.branches
            .get(branch)
            .into_iter()
            .flat_map(|files| files.values())
            .filter(|r| !r.is_deleted)
    }

    /// Immediate children of `dir`: directories first, then files, each by name.
    ///
    /// Directories are derived from live descendants. Returns `None` for a
    /// non-root directory with nothing live beneath it.
    pub fn tree(&self, branch: &str, dir: &str) -> Option<Vec<FileEntry>> {
        let mut dirs = BTreeSet::new();
        let mut files = Vec::new();

        for record in self.live_files(branch).filter(|r| is_within(&r.path, dir)) {
            if record.path == dir {
                files.push(FileEntry {
                    name: record.name.clone(),
                    path: record.full_path(),
                    kind: EntryKind::File,
                    size: Some(record.size),
                    language: record.language.clone(),
                    last_commit: record.last_commit.clone(),
                });
            } else if let Some(child) = child_component(&record.path, dir) {
                dirs.insert(child.to_string());
            }
        }

        if dir != "/" && dirs.is_empty() && files.is_empty() {
            return None;
        }

        let mut entries: Vec<FileEntry> = dirs
            .into_iter()
            .map(|name| FileEntry {
                path: FilePath {
                    dir: dir.to_string(),
                    name: name.clone(),
                }
                .full(),
                name,
                kind: EntryKind::Directory,
                size: None,
                language: None,
                last_commit: None,
            })
            .collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        entries.extend(files);
        Some(entries)
    }

    /// Re-key a live record under a new path, keeping its identity.
    /// A tombstone at the destination is discarded.
    pub(crate) fn rename(
        &mut self,
        branch: &str,
        from: &FilePath,
        to: &FilePath,
        author: &str,
    ) -> Option<&FileRecord> {
        let files = self.branches.get_mut(branch)?;
        let mut record = files.remove(&from.full())?;
        record.path = to.dir.clone();
        record.name = to.name.clone();
        record.language = detect_language(to).map(String::from);
        record.updated_by = author.to_string();
        record.updated_at = Utc::now();
        let key = to.full();
        files.insert(key.clone(), record);
        files.get(&key)
    }

    /// Copy every live record of `from` into `to`, replacing whatever `to`
    /// held before. Returns the number of files copied.
    pub fn fork_branch(&mut self, from: &str, to: &str) -> usize {
        let copied: BTreeMap<String, FileRecord> = self
            .live_files(from)
            .map(|r| (r.full_path(), r.fork_into(to)))
            .collect();
        let count = copied.len();
        self.branches.insert(to.to_string(), copied);
        count
    }

    /// Drop every record of a branch. Returns how many were removed.
    pub fn purge_branch(&mut self, branch: &str) -> usize {
        self.branches.remove(branch).map(|f| f.len()).unwrap_or(0)
    }

    /// Number of records (live or not) held for a branch.
    pub fn record_count(&self, branch: &str) -> usize {
        self.branches.get(branch).map(|f| f.len()).unwrap_or(0)
    }
}
