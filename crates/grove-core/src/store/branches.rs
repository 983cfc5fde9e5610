//! Branch manager operations.

use chrono::Utc;

use super::{author_of, Store};
use crate::auth::{Principal, Role};
use crate::branch::{compute_stats, divergence, validate_branch_name, Branch, BranchTable, BranchUpdate, Divergence};
use crate::commit::Commit;
use crate::config::OnBranchDelete;
use crate::error::{GroveError, GroveResult};
use crate::project::{Project, MAIN_BRANCH};

impl Store {
    /// Bootstrap `main` for a freshly created project. Caller holds the lock.
    pub(super) fn create_main(&self, project: &Project, creator: &str) -> GroveResult<Branch> {
        let mut branches = self.load_branches(project)?;
        if branches.contains_key(MAIN_BRANCH) {
            return Err(GroveError::Conflict(format!(
                "{} already has a {MAIN_BRANCH} branch",
                project.id
            )));
        }
        let mut main = Branch::new(MAIN_BRANCH, creator, project.ledger_head);
        main.is_protected = true;
        main.is_default = project.default_branch == MAIN_BRANCH;
        branches.insert(main.name.clone(), main.clone());
        self.save_branches(&project.id, &branches)?;
        Ok(main)
    }

    /// All branches, default first, then by name.
    pub fn list_branches(&self, who: &Principal, project_id: &str) -> GroveResult<Vec<Branch>> {
        self.authorize(who, project_id, Role::Viewer)?;
        let project = self.load_project(project_id)?;
        let mut branches: Vec<Branch> = self.load_branches(&project)?.into_values().collect();
        branches.sort_by(|a, b| b.is_default.cmp(&a.is_default).then_with(|| a.name.cmp(&b.name)));
        Ok(branches)
    }

    pub fn get_branch(&self, who: &Principal, project_id: &str, name: &str) -> GroveResult<Branch> {
        self.authorize(who, project_id, Role::Viewer)?;
        let project = self.load_project(project_id)?;
        let branches = self.load_branches(&project)?;
        Self::branch(&branches, name).cloned()
    }

    /// Create `new_name` as a point-in-time copy of `source`'s live files.
    ///
    /// The copy shares nothing with the source afterwards: writes to either
    /// branch stay on that branch.
    #[tracing::instrument(skip(self))]
    pub fn fork_branch(
        &self,
        who: &Principal,
        project_id: &str,
        new_name: &str,
        source: &str,
    ) -> GroveResult<Branch> {
        self.authorize(who, project_id, Role::Editor)?;
        let creator = author_of(who)?;
        validate_branch_name(new_name)?;

        let _lock = self.lock(project_id)?;
        let project = self.load_project(project_id)?;
        let mut branches = self.load_branches(&project)?;
        if branches.contains_key(new_name) {
            return Err(GroveError::Conflict(format!("branch already exists: {new_name}")));
        }
        let source_branch = Self::branch(&branches, source)?;
        let branch = Branch::fork(new_name, source_branch, creator, project.ledger_head);

        let mut files = self.load_files(project_id)?;
        let copied = files.fork_branch(source, new_name);
        self.save_files(project_id, &files)?;

        branches.insert(branch.name.clone(), branch);
        let ledger = self.load_ledger(project_id)?;
        Self::refresh_in(&project, &mut branches, new_name, &ledger)?;
        self.save_branches(project_id, &branches)?;

        tracing::info!(project = project_id, branch = new_name, source, copied, "forked branch");
        Self::branch(&branches, new_name).cloned()
    }

    #[tracing::instrument(skip(self))]
    pub fn protect_branch(
        &self,
        who: &Principal,
        project_id: &str,
        name: &str,
        protected: bool,
    ) -> GroveResult<Branch> {
        self.authorize(who, project_id, Role::Admin)?;
        self.modify_branch(project_id, name, |b| b.is_protected = protected)
    }

    /// Change a branch's description or merge settings. Names are fixed:
    /// commits refer to the branch they were made on by name.
    #[tracing::instrument(skip(self))]
    pub fn update_branch(
        &self,
        who: &Principal,
        project_id: &str,
        name: &str,
        update: BranchUpdate,
    ) -> GroveResult<Branch> {
        self.authorize(who, project_id, Role::Editor)?;
        self.modify_branch(project_id, name, |b| {
            if let Some(description) = update.description {
                b.description = description;
            }
            if let Some(settings) = update.merge_settings {
                b.merge_settings = settings;
            }
        })
    }

    /// Make `name` the project's default branch.
    ///
    /// Every branch's ahead/behind counts are relative to the default, so
    /// all stats are recomputed in the same write.
    #[tracing::instrument(skip(self))]
    pub fn set_default_branch(
        &self,
        who: &Principal,
        project_id: &str,
        name: &str,
    ) -> GroveResult<Branch> {
        self.authorize(who, project_id, Role::Admin)?;
        let _lock = self.lock(project_id)?;
        let mut project = self.load_project(project_id)?;
        let mut branches = self.load_branches(&project)?;
        Self::branch(&branches, name)?;

        project.default_branch = name.to_string();
        self.save_project(&project)?;

        let ledger = self.load_ledger(project_id)?;
        let names: Vec<String> = branches.keys().cloned().collect();
        for branch in branches.values_mut() {
            branch.is_default = branch.name == project.default_branch;
        }
        for n in &names {
            Self::refresh_in(&project, &mut branches, n, &ledger)?;
        }
        self.save_branches(project_id, &branches)?;
        tracing::info!(project = project_id, branch = name, "default branch changed");
        Self::branch(&branches, name).cloned()
    }

    /// Delete a branch that is neither the default, protected, nor the
    /// caller's checked-out branch. Its files are kept or purged per
    /// [`OnBranchDelete`]; its commits stay in the ledger.
    #[tracing::instrument(skip(self))]
    pub fn delete_branch(
        &self,
        who: &Principal,
        project_id: &str,
        name: &str,
        checked_out: Option<&str>,
    ) -> GroveResult<()> {
        self.authorize(who, project_id, Role::Admin)?;
        let _lock = self.lock(project_id)?;
        let project = self.load_project(project_id)?;
        let mut branches = self.load_branches(&project)?;
        let branch = Self::branch(&branches, name)?;

        if branch.is_default {
            return Err(GroveError::InvalidOperation(format!(
                "cannot delete the default branch: {name}"
            )));
        }
        if branch.is_protected {
            return Err(GroveError::InvalidOperation(format!(
                "cannot delete protected branch: {name}"
            )));
        }
        if checked_out == Some(name) {
            return Err(GroveError::InvalidOperation(format!(
                "cannot delete the checked-out branch: {name}"
            )));
        }

        branches.remove(name);
        self.save_branches(project_id, &branches)?;

        let purged = match self.config.on_branch_delete {
            OnBranchDelete::Retain => 0,
            OnBranchDelete::Purge => {
                let mut files = self.load_files(project_id)?;
                let n = files.purge_branch(name);
                self.save_files(project_id, &files)?;
                n
            }
        };
        tracing::info!(project = project_id, branch = name, purged, "deleted branch");
        Ok(())
    }

    /// Recompute a branch's commit count, last activity and divergence from
    /// the default branch. The read and write happen under the project lock.
    #[tracing::instrument(skip(self))]
    pub fn refresh_stats(&self, who: &Principal, project_id: &str, name: &str) -> GroveResult<Branch> {
        self.authorize(who, project_id, Role::Viewer)?;
        let _lock = self.lock(project_id)?;
        let project = self.load_project(project_id)?;
        let mut branches = self.load_branches(&project)?;
        let ledger = self.load_ledger(project_id)?;
        Self::refresh_in(&project, &mut branches, name, &ledger)?;
        self.save_branches(project_id, &branches)?;
        Self::branch(&branches, name).cloned()
    }

    /// Commits in `name`'s history that `target` lacks (`ahead`) and the reverse (`behind`).
    pub fn divergence(
        &self,
        who: &Principal,
        project_id: &str,
        name: &str,
        target: &str,
    ) -> GroveResult<Divergence> {
        self.authorize(who, project_id, Role::Viewer)?;
        let project = self.load_project(project_id)?;
        let branches = self.load_branches(&project)?;
        let ours = Self::branch(&branches, name)?;
        let theirs = Self::branch(&branches, target)?;
        let ledger = self.load_ledger(project_id)?;
        Ok(divergence(ours, theirs, &ledger))
    }

    pub(super) fn refresh_in(
        project: &Project,
        branches: &mut BranchTable,
        name: &str,
        ledger: &[Commit],
    ) -> GroveResult<()> {
        let default = Self::branch(branches, &project.default_branch)?.clone();
        let branch = branches
            .get_mut(name)
            .ok_or_else(|| GroveError::not_found("branch", name))?;
        branch.stats = compute_stats(branch, &default, ledger);
        tracing::debug!(project = %project.id, branch = name, stats = ?branch.stats, "refreshed stats");
        Ok(())
    }

    fn modify_branch(
        &self,
        project_id: &str,
        name: &str,
        apply: impl FnOnce(&mut Branch),
    ) -> GroveResult<Branch> {
        let _lock = self.lock(project_id)?;
        let project = self.load_project(project_id)?;
        let mut branches = self.load_branches(&project)?;
        let branch = branches
            .get_mut(name)
            .ok_or_else(|| GroveError::not_found("branch", name))?;
        apply(branch);
        branch.updated_at = Utc::now();
        let updated = branch.clone();
        self.save_branches(project_id, &branches)?;
        Ok(updated)
    }
}
