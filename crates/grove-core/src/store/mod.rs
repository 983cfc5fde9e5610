//! Store: the main entry point for grove operations.
//!
//! A Store ties together the per-project documents (project record,
//! branches, file table, commit ledger, blobs) under a `.grove/` directory.
//! Mutations hold the project lock for their whole read-modify-write;
//! reads take no lock and see the last document renamed into place.
//!
//! ```text
//! .grove/
//!   config.json
//!   projects/<id>/
//!     project.json  branches.json  files.json  project.lock
//!     commits/<hash>.json
//!     objects/<2>/<62>
//! ```

mod branches;
mod files;
mod ledger;
mod reactions;

#[cfg(test)]
mod tests;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::auth::{Authorizer, Principal, Role, Unrestricted};
use crate::branch::{Branch, BranchTable};
use crate::commit::Commit;
use crate::config::Config;
use crate::error::{GroveError, GroveResult};
use crate::file::FileTable;
use crate::fsutil::{read_json, write_json};
use crate::hash::is_full_hash;
use crate::identity::{CommitHash, SequenceKind};
use crate::lock::ProjectLock;
use crate::object::BlobStore;
use crate::project::{validate_project_id, Project, ProjectInit};

/// The `.grove` directory name.
const GROVE_DIR: &str = ".grove";

pub struct Store {
    grove_dir: PathBuf,
    config: Config,
    auth: Arc<dyn Authorizer>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("grove_dir", &self.grove_dir)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Initialize a new store in `root`, writing the default config.
    pub fn init(root: &Path) -> GroveResult<Self> {
        let grove_dir = root.join(GROVE_DIR);
        if grove_dir.exists() {
            return Err(GroveError::Conflict(format!(
                "{} already exists",
                grove_dir.display()
            )));
        }
        fs::create_dir_all(grove_dir.join("projects"))?;
        Config::default().save(&grove_dir.join("config.json"))?;
        tracing::info!(root = %root.display(), "initialized grove store");
        Self::open(root)
    }

    /// Open an existing store, reading `.grove/config.json`.
    pub fn open(root: &Path) -> GroveResult<Self> {
        let grove_dir = root.join(GROVE_DIR);
        if !grove_dir.exists() {
            return Err(GroveError::not_found("store", root.display().to_string()));
        }
        let config = Config::load(&grove_dir.join("config.json"))?;
        Ok(Self::with_parts(grove_dir, config))
    }

    /// Open an existing store with an explicit config, ignoring the persisted one.
    pub fn open_with_config(root: &Path, config: Config) -> GroveResult<Self> {
        let grove_dir = root.join(GROVE_DIR);
        if !grove_dir.exists() {
            return Err(GroveError::not_found("store", root.display().to_string()));
        }
        Ok(Self::with_parts(grove_dir, config))
    }

    fn with_parts(grove_dir: PathBuf, config: Config) -> Self {
        Self {
            grove_dir,
            config,
            auth: Arc::new(Unrestricted),
        }
    }

    /// Replace the authorization collaborator (everything is allowed by default).
    pub fn with_authorizer(mut self, auth: Arc<dyn Authorizer>) -> Self {
        self.auth = auth;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // -------------------------------------------------------------------
    // Projects
    // -------------------------------------------------------------------

    /// Create a project with its `main` branch, optionally seeding a README.
    #[tracing::instrument(skip(self, init))]
    pub fn create_project(
        &self,
        who: &Principal,
        id: &str,
        init: ProjectInit,
    ) -> GroveResult<Project> {
        validate_project_id(id)?;
        let owner = author_of(who)?.to_string();
        let dir = self.project_dir(id);

        let project = {
            let _lock = self.lock_new(id)?;
            if dir.join("project.json").exists() {
                return Err(GroveError::Conflict(format!("project already exists: {id}")));
            }
            let project = Project::new(id.to_string(), owner.clone());
            self.save_project(&project)?;
            self.create_main(&project, &owner)?;
            project
        };
        tracing::info!(project = id, owner = %owner, "created project");

        if init.readme {
            self.put_file(
                who,
                id,
                &project.default_branch,
                "/README.md",
                &format!("# {id}\n"),
                "Initial commit",
            )?;
        }
        self.load_project(id)
    }

    /// Every project in the store, by ID.
    pub fn list_projects(&self) -> GroveResult<Vec<Project>> {
        let mut projects = Vec::new();
        let dir = self.grove_dir.join("projects");
        if !dir.exists() {
            return Ok(projects);
        }
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let id = entry.file_name().to_string_lossy().to_string();
            if let Some(project) = read_json::<Project>(&entry.path().join("project.json"))? {
                projects.push(project);
            } else {
                tracing::debug!(dir = %id, "skipping directory without project.json");
            }
        }
        projects.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(projects)
    }

    pub fn get_project(&self, who: &Principal, id: &str) -> GroveResult<Project> {
        self.authorize(who, id, Role::Viewer)?;
        self.load_project(id)
    }

    /// Delete a project and everything it owns.
    #[tracing::instrument(skip(self))]
    pub fn delete_project(&self, who: &Principal, id: &str) -> GroveResult<()> {
        self.authorize(who, id, Role::Admin)?;
        let _lock = self.lock(id)?;
        self.load_project(id)?;
        // Waiters on this lock see it unlinked and give up with NotFound.
        fs::remove_dir_all(self.project_dir(id))?;
        tracing::info!(project = id, "deleted project");
        Ok(())
    }

    /// Allocate the next issue or pull-request number for a project.
    ///
    /// Returns `1 + max(allocated)`, persisted before returning, so two
    /// callers never receive the same number.
    #[tracing::instrument(skip(self))]
    pub fn next_sequence_number(
        &self,
        who: &Principal,
        project_id: &str,
        kind: SequenceKind,
    ) -> GroveResult<u64> {
        self.authorize(who, project_id, Role::Editor)?;
        let _lock = self.lock(project_id)?;
        let mut project = self.load_project(project_id)?;
        let n = project.sequences.allocate(kind);
        self.save_project(&project)?;
        tracing::debug!(project = project_id, ?kind, n, "allocated sequence number");
        Ok(n)
    }

    // -------------------------------------------------------------------
    // Access checks
    // -------------------------------------------------------------------

    /// The authorizer decides; a project's owner is always admin of it.
    fn authorize(&self, who: &Principal, project_id: &str, role: Role) -> GroveResult<()> {
        if self.auth.has_permission(who, project_id, role) {
            return Ok(());
        }
        let is_owner = match (who.user_id(), self.load_project(project_id)) {
            (Some(user), Ok(project)) => project.owner == user,
            _ => false,
        };
        if is_owner {
            Ok(())
        } else {
            Err(GroveError::PermissionDenied(format!(
                "{who} needs {role} on {project_id}"
            )))
        }
    }

    // -------------------------------------------------------------------
    // Persistence helpers
    // -------------------------------------------------------------------

    fn project_dir(&self, id: &str) -> PathBuf {
        self.grove_dir.join("projects").join(id)
    }

    fn lock(&self, project_id: &str) -> GroveResult<ProjectLock> {
        let dir = self.project_dir(project_id);
        if !dir.exists() {
            return Err(GroveError::not_found("project", project_id));
        }
        ProjectLock::acquire(&dir, self.config.lock_timeout())
    }

    /// Lock a project directory, creating it first. Retries when a
    /// concurrent delete removes the directory out from under the wait.
    fn lock_new(&self, project_id: &str) -> GroveResult<ProjectLock> {
        let dir = self.project_dir(project_id);
        let mut attempts = 0;
        loop {
            fs::create_dir_all(dir.join("commits"))?;
            match ProjectLock::acquire(&dir, self.config.lock_timeout()) {
                Err(GroveError::NotFound { .. }) if attempts < 3 => attempts += 1,
                result => return result,
            }
        }
    }

    fn load_project(&self, id: &str) -> GroveResult<Project> {
        validate_project_id(id)?;
        read_json(&self.project_dir(id).join("project.json"))?
            .ok_or_else(|| GroveError::not_found("project", id))
    }

    fn save_project(&self, project: &Project) -> GroveResult<()> {
        write_json(&self.project_dir(&project.id).join("project.json"), project)
    }

    /// All branches, with `is_default` filled in from the project pointer.
    fn load_branches(&self, project: &Project) -> GroveResult<BranchTable> {
        let mut branches: BranchTable =
            read_json(&self.project_dir(&project.id).join("branches.json"))?.unwrap_or_default();
        for branch in branches.values_mut() {
            branch.is_default = branch.name == project.default_branch;
        }
        Ok(branches)
    }

    fn save_branches(&self, project_id: &str, branches: &BranchTable) -> GroveResult<()> {
        write_json(&self.project_dir(project_id).join("branches.json"), branches)
    }

    fn branch<'a>(branches: &'a BranchTable, name: &str) -> GroveResult<&'a Branch> {
        branches
            .get(name)
            .ok_or_else(|| GroveError::not_found("branch", name))
    }

    fn load_files(&self, project_id: &str) -> GroveResult<FileTable> {
        Ok(read_json(&self.project_dir(project_id).join("files.json"))?.unwrap_or_default())
    }

    fn save_files(&self, project_id: &str, files: &FileTable) -> GroveResult<()> {
        write_json(&self.project_dir(project_id).join("files.json"), files)
    }

    fn blobs(&self, project_id: &str) -> BlobStore {
        BlobStore::new(&self.project_dir(project_id).join("objects"))
    }

    fn commit_path(&self, project_id: &str, hash: &CommitHash) -> PathBuf {
        self.project_dir(project_id)
            .join("commits")
            .join(format!("{hash}.json"))
    }

    fn load_commit(&self, project_id: &str, hash: &CommitHash) -> GroveResult<Commit> {
        read_json(&self.commit_path(project_id, hash))?
            .ok_or_else(|| GroveError::not_found("commit", hash.as_str()))
    }

    fn save_commit(&self, project_id: &str, commit: &Commit) -> GroveResult<()> {
        write_json(&self.commit_path(project_id, &commit.hash), commit)
    }

    /// Hashes of every recorded commit, unordered.
    fn commit_hashes(&self, project_id: &str) -> GroveResult<Vec<CommitHash>> {
        let dir = self.project_dir(project_id).join("commits");
        let mut hashes = Vec::new();
        if !dir.exists() {
            return Ok(hashes);
        }
        for entry in fs::read_dir(&dir)? {
            let name = entry?.file_name().to_string_lossy().to_string();
            if let Some(hash) = name.strip_suffix(".json").filter(|h| is_full_hash(h)) {
                hashes.push(CommitHash::from(hash.to_string()));
            }
        }
        Ok(hashes)
    }

    /// The whole ledger in recording order.
    fn load_ledger(&self, project_id: &str) -> GroveResult<Vec<Commit>> {
        let mut ledger = self
            .commit_hashes(project_id)?
            .iter()
            .map(|h| self.load_commit(project_id, h))
            .collect::<GroveResult<Vec<_>>>()?;
        ledger.sort_by_key(|c| c.seq);
        Ok(ledger)
    }
}

/// The user ID to record as author. Anonymous callers cannot write.
fn author_of(who: &Principal) -> GroveResult<&str> {
    who.user_id()
        .ok_or_else(|| GroveError::PermissionDenied("anonymous callers cannot write".into()))
}
