//! Reactions on commits: a fixed set of kinds, each holding the users who reacted.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GroveError;
use crate::identity::CommitHash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Reaction {
    ThumbsUp,
    ThumbsDown,
    Laugh,
    Hooray,
    Confused,
    Heart,
    Rocket,
    Eyes,
}

impl Reaction {
    pub const ALL: [Reaction; 8] = [
        Reaction::ThumbsUp,
        Reaction::ThumbsDown,
        Reaction::Laugh,
        Reaction::Hooray,
        Reaction::Confused,
        Reaction::Heart,
        Reaction::Rocket,
        Reaction::Eyes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Reaction::ThumbsUp => "thumbsUp",
            Reaction::ThumbsDown => "thumbsDown",
            Reaction::Laugh => "laugh",
            Reaction::Hooray => "hooray",
            Reaction::Confused => "confused",
            Reaction::Heart => "heart",
            Reaction::Rocket => "rocket",
            Reaction::Eyes => "eyes",
        }
    }
}

impl fmt::Display for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Reaction {
    type Err = GroveError;

    /// Accepts the wire name (`thumbsUp`) or the `+1`/`-1` shorthands.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "+1" => return Ok(Reaction::ThumbsUp),
            "-1" => return Ok(Reaction::ThumbsDown),
            _ => {}
        }
        Reaction::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| GroveError::InvalidInput(format!("unknown reaction: {s}")))
    }
}

/// Users per reaction kind. Kinds with no users are not stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reactions(BTreeMap<Reaction, BTreeSet<String>>);

impl Reactions {
    /// Add `user`'s reaction, or remove it if already present.
    /// Returns whether the user now holds the reaction.
    pub fn toggle(&mut self, reaction: Reaction, user: &str) -> bool {
        let users = self.0.entry(reaction).or_default();
        let added = if users.remove(user) {
            false
        } else {
            users.insert(user.to_string())
        };
        if users.is_empty() {
            self.0.remove(&reaction);
        }
        added
    }

    pub fn count(&self, reaction: Reaction) -> usize {
        self.0.get(&reaction).map_or(0, |u| u.len())
    }

    pub fn users(&self, reaction: Reaction) -> impl Iterator<Item = &str> {
        self.0.get(&reaction).into_iter().flatten().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Non-empty kinds with their counts, in declaration order.
    pub fn summary(&self) -> Vec<(Reaction, usize)> {
        self.0.iter().map(|(r, u)| (*r, u.len())).collect()
    }
}

/// Every commit's reactions in a project. Commits themselves stay immutable.
pub type ReactionTable = BTreeMap<CommitHash, Reactions>;
