//! grove-core: the source-control core of a hosted code collaboration service.
//!
//! A project holds named **branches**, each an independently writable
//! partition of the file namespace. Every file write produces one
//! immutable **commit** in the project ledger; bodies are kept as
//! content-addressed blobs so any commit's diff can be rebuilt.

pub mod auth;
pub mod branch;
pub mod commit;
pub mod config;
pub mod diff;
pub mod error;
pub mod file;
mod fsutil;
pub mod hash;
pub mod identity;
mod lock;
pub mod object;
pub mod path;
pub mod project;
pub mod reaction;
pub mod store;

pub use auth::{Authorizer, Principal, Role, StaticAcl, Unrestricted};
pub use config::{Config, OnBranchDelete};
pub use error::{ErrorKind, GroveError, GroveResult};
pub use identity::{CommitHash, SequenceKind};
pub use project::{Project, ProjectInit};
pub use store::Store;
