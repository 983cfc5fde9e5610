//! Commit reactions, kept beside the ledger so commit documents never change.

use super::{author_of, Store};
use crate::auth::Principal;
use crate::error::GroveResult;
use crate::fsutil::{read_json, write_json};
use crate::reaction::{Reaction, ReactionTable, Reactions};

impl Store {
    /// Toggle the caller's reaction on a commit. Any viewer may react.
    #[tracing::instrument(skip(self))]
    pub fn toggle_reaction(
        &self,
        who: &Principal,
        project_id: &str,
        prefix: &str,
        reaction: Reaction,
    ) -> GroveResult<Reactions> {
        let user = author_of(who)?;
        let commit = self.find_commit(who, project_id, prefix)?;

        let _lock = self.lock(project_id)?;
        let mut table = self.load_reactions(project_id)?;
        let reactions = table.entry(commit.hash.clone()).or_default();
        let added = reactions.toggle(reaction, user);
        let result = reactions.clone();
        if result.is_empty() {
            table.remove(&commit.hash);
        }
        self.save_reactions(project_id, &table)?;

        tracing::debug!(project = project_id, hash = commit.short_hash(), %reaction, added, "toggled reaction");
        Ok(result)
    }

    pub fn reactions(&self, who: &Principal, project_id: &str, prefix: &str) -> GroveResult<Reactions> {
        let commit = self.find_commit(who, project_id, prefix)?;
        Ok(self
            .load_reactions(project_id)?
            .remove(&commit.hash)
            .unwrap_or_default())
    }

    fn load_reactions(&self, project_id: &str) -> GroveResult<ReactionTable> {
        Ok(read_json(&self.project_dir(project_id).join("reactions.json"))?.unwrap_or_default())
    }

    fn save_reactions(&self, project_id: &str, table: &ReactionTable) -> GroveResult<()> {
        write_json(&self.project_dir(project_id).join("reactions.json"), table)
    }
}
