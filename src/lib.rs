//! orgmirror - keep a local backup clone of every repository in an organization
//!
//! One run walks the organization's paginated repository listing, applies the
//! fork and ignore-list policy, and for each remaining repository either pulls
//! the existing clone or makes a fresh one. A clone that can no longer be
//! pulled is replaced by a complete re-clone, never deleted first.
//!
//! ## Modules
//!
//! - [`github`]: repository listing and pagination
//! - [`filter`]: fork and ignore-list policy
//! - [`sync`]: per-repository state machine and run orchestration
//! - [`command`] / [`git`]: external command execution
//! - [`redact`]: secret scrubbing for logs and error text
//! - [`state`]: backup counters

pub mod command;
pub mod config;
pub mod credentials;
pub mod filter;
pub mod git;
pub mod github;
pub mod health;
pub mod redact;
pub mod state;
pub mod sync;

pub use command::{CommandError, CommandRunner, CommandSpec};
pub use config::{Config, MirrorSettings};
pub use credentials::Credentials;
pub use filter::{FilterDecision, RepoFilter, SkipReason};
pub use git::{GitVcs, Vcs};
pub use github::{PageWalker, RepoDescriptor, RepoType};
pub use health::HealthCheck;
pub use redact::Redactor;
pub use state::{BackupCounter, MemoryCounter, StateDb};
pub use sync::{MirrorEngine, PlannedAction, SyncOutcome, SyncPlanner, SyncSummary};
