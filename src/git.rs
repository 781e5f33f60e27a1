//! Version-control operations behind a mockable trait

use async_trait::async_trait;
use std::path::Path;

use crate::command::{CommandError, CommandRunner, CommandSpec};

/// The version-control operations the sync planner relies on.
///
/// Implementations treat the underlying tool as a black box: success or a
/// [`CommandError`] carrying redacted output.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Clone `remote_url` into `target`, which must not exist yet
    async fn clone_repo(&self, remote_url: &str, target: &Path) -> Result<(), CommandError>;

    /// Pull `branch` from `origin` into the clone at `workdir`
    async fn pull(&self, workdir: &Path, branch: &str) -> Result<(), CommandError>;
}

/// Git operations backed by the `git` executable
#[derive(Debug, Clone)]
pub struct GitVcs {
    runner: CommandRunner,
    binary: String,
}

impl GitVcs {
    /// Create a new Git client running commands through `runner`
    pub fn new(runner: CommandRunner, binary: impl Into<String>) -> Self {
        Self {
            runner,
            binary: binary.into(),
        }
    }

    fn git(&self) -> CommandSpec {
        // Never block on an interactive credential prompt
        CommandSpec::new(&self.binary).env("GIT_TERMINAL_PROMPT", "0")
    }

    pub fn clone_command(&self, remote_url: &str, target: &Path) -> CommandSpec {
        self.git()
            .arg("clone")
            .arg("--")
            .arg(remote_url)
            .path_arg(target)
    }

    pub fn pull_command(&self, workdir: &Path, branch: &str) -> CommandSpec {
        self.git()
            .arg("pull")
            .arg("origin")
            .arg(branch)
            .current_dir(workdir)
    }
}

#[async_trait]
impl Vcs for GitVcs {
    async fn clone_repo(&self, remote_url: &str, target: &Path) -> Result<(), CommandError> {
        self.runner.run(&self.clone_command(remote_url, target)).await?;
        Ok(())
    }

    async fn pull(&self, workdir: &Path, branch: &str) -> Result<(), CommandError> {
        self.runner.run(&self.pull_command(workdir, branch)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redact::Redactor;
    use std::path::PathBuf;

    fn git_vcs() -> GitVcs {
        GitVcs::new(CommandRunner::new(Redactor::none()), "git")
    }

    #[test]
    fn test_clone_command_shape() {
        let spec = git_vcs().clone_command("git@github.com:acme/a.git", Path::new("/backups/a"));
        assert_eq!(spec.program(), "git");
        assert_eq!(spec.args(), ["clone", "--", "git@github.com:acme/a.git", "/backups/a"]);
        assert!(spec.working_dir().is_none());
    }

    #[test]
    fn test_pull_command_runs_inside_clone() {
        let spec = git_vcs().pull_command(Path::new("/backups/a"), "main");
        assert_eq!(spec.args(), ["pull", "origin", "main"]);
        assert_eq!(spec.working_dir(), Some(PathBuf::from("/backups/a").as_path()));
    }

    #[test]
    fn test_custom_binary() {
        let vcs = GitVcs::new(CommandRunner::new(Redactor::none()), "/usr/local/bin/git");
        assert_eq!(vcs.pull_command(Path::new("/x"), "main").program(), "/usr/local/bin/git");
    }
}
