//! Organizational policy applied to listed repositories before syncing

use std::collections::HashSet;
use std::fmt;
use tracing::info;

use crate::github::RepoDescriptor;

/// Why a repository was left out of the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Named in the ignore-list
    Ignored,
    /// A fork, and forks were not requested
    Fork,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Ignored => f.write_str("ignored"),
            SkipReason::Fork => f.write_str("fork"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Admit,
    Skip(SkipReason),
}

/// Skip-ignored and skip-forks policy
#[derive(Debug, Clone, Default)]
pub struct RepoFilter {
    ignore_list: HashSet<String>,
    include_forks: bool,
}

impl RepoFilter {
    pub fn new(ignore_list: HashSet<String>, include_forks: bool) -> Self {
        Self {
            ignore_list,
            include_forks,
        }
    }

    /// Decide whether `repo` takes part in the run. The ignore-list is
    /// checked first, so an ignored fork is reported as ignored.
    pub fn check(&self, repo: &RepoDescriptor) -> FilterDecision {
        let decision = if self.ignore_list.contains(&repo.full_name) {
            FilterDecision::Skip(SkipReason::Ignored)
        } else if repo.is_fork && !self.include_forks {
            FilterDecision::Skip(SkipReason::Fork)
        } else {
            FilterDecision::Admit
        };

        if let FilterDecision::Skip(reason) = decision {
            info!("Skipping {} repository {}", reason, repo.full_name);
        }

        decision
    }
}

/// Parse a comma-separated ignore-list such as `org1/a, org2/b,org3/c `
pub fn parse_ignore_list(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}
