//! Common test utilities and helpers for orgmirror tests
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

use orgmirror::command::{CommandError, ExitStatusKind};
use orgmirror::config::{ApiConfig, MirrorSettings};
use orgmirror::{RepoDescriptor, RepoType, Vcs};

/// Temporary destination root plus a place for config files
pub struct TestEnvironment {
    pub temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn destination(&self) -> PathBuf {
        self.temp_dir.path().join("backups")
    }

    pub fn create_test_config(&self, content: &str) -> PathBuf {
        let config_path = self.temp_dir.path().join("config.yml");
        std::fs::write(&config_path, content).expect("Failed to write test config");
        config_path
    }

    /// Settings pointed at a mock listing API
    pub fn settings(&self, api_base: &str, include_forks: bool, ignore: &[&str]) -> MirrorSettings {
        MirrorSettings {
            organization: "org".to_string(),
            repo_type: RepoType::All,
            destination: self.destination(),
            include_forks,
            ignore_list: ignore.iter().map(|s| s.to_string()).collect(),
            api: ApiConfig {
                base_url: api_base.to_string(),
                per_page: 25,
            },
            max_parallel: 1,
            command_timeout: None,
            git_binary: "git".to_string(),
        }
    }
}

/// One repository object as the listing API returns it
pub fn repo_json(org: &str, name: &str, fork: bool, archived: bool) -> Value {
    json!({
        "id": 1,
        "name": name,
        "full_name": format!("{}/{}", org, name),
        "ssh_url": format!("git@github.com:{}/{}.git", org, name),
        "clone_url": format!("https://github.com/{}/{}.git", org, name),
        "default_branch": "main",
        "fork": fork,
        "archived": archived,
        "private": false
    })
}

pub fn descriptor(name: &str) -> RepoDescriptor {
    RepoDescriptor {
        full_name: format!("org/{}", name),
        name: name.to_string(),
        ssh_url: format!("git@github.com:org/{}.git", name),
        clone_url: format!("https://github.com/org/{}.git", name),
        default_branch: "main".to_string(),
        is_fork: false,
        is_archived: false,
    }
}

/// Whether a usable `git` binary is on the PATH
pub fn git_available() -> bool {
    std::process::Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Filesystem-only stand-in for git with per-repository fault injection.
///
/// A successful clone creates the target with an `origin` file holding the
/// remote URL. A failing clone leaves a half-written target behind so that
/// cleanup can be asserted.
#[derive(Default)]
pub struct FakeVcs {
    failing_pulls: HashSet<String>,
    failing_clones: HashSet<String>,
    calls: Mutex<Vec<String>>,
    pulls: Mutex<HashMap<String, usize>>,
}

impl FakeVcs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_pull(mut self, name: &str) -> Self {
        self.failing_pulls.insert(name.to_string());
        self
    }

    pub fn failing_clone(mut self, name: &str) -> Self {
        self.failing_clones.insert(name.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn repo_name(path: &Path) -> String {
        let name = path.file_name().unwrap().to_string_lossy();
        name.trim_end_matches(".tmp~").to_string()
    }

    fn failure(command: String) -> CommandError {
        CommandError::Failed {
            command,
            output: "fatal: injected failure".to_string(),
            status: ExitStatusKind::Code(128),
        }
    }
}

#[async_trait]
impl Vcs for FakeVcs {
    async fn clone_repo(&self, remote_url: &str, target: &Path) -> Result<(), CommandError> {
        let command = format!("clone {}", target.file_name().unwrap().to_string_lossy());
        self.calls.lock().unwrap().push(command.clone());

        assert!(!target.exists(), "clone target {} already exists", target.display());
        std::fs::create_dir_all(target).unwrap();

        if self.failing_clones.contains(&Self::repo_name(target)) {
            std::fs::write(target.join("partial"), "half-written").unwrap();
            return Err(Self::failure(command));
        }

        std::fs::write(target.join("origin"), remote_url).unwrap();
        Ok(())
    }

    async fn pull(&self, workdir: &Path, branch: &str) -> Result<(), CommandError> {
        let name = Self::repo_name(workdir);
        let command = format!("pull {} {}", name, branch);
        self.calls.lock().unwrap().push(command.clone());

        if self.failing_pulls.contains(&name) {
            return Err(Self::failure(command));
        }

        *self.pulls.lock().unwrap().entry(name).or_default() += 1;
        Ok(())
    }
}

/// Sorted relative paths and contents of every file under `root`
pub fn snapshot(root: &Path) -> Vec<(PathBuf, String)> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<(PathBuf, String)>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let content = std::fs::read_to_string(&path).unwrap_or_default();
                out.push((path.strip_prefix(root).unwrap().to_path_buf(), content));
            }
        }
    }

    let mut out = Vec::new();
    walk(root, root, &mut out);
    out.sort();
    out
}
