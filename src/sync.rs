//! Sync Engine - per-repository planning and run orchestration
//!
//! [`SyncPlanner`] owns the per-repository state machine:
//!
//! ```text
//! NotPresent --clone--> Cloned
//! Present --pull ok--> Updated
//! Present --pull fails--> clone into <dest>.tmp~ --swap--> Cloned (replaced)
//!                                      \--fails--> Failed (old backup untouched)
//! ```
//!
//! Staging paths end in `~`, which never appears in a repository name, so
//! they cannot collide with another repository's clone.
//!
//! [`MirrorEngine`] feeds it the filtered descriptor stream, keeping at most
//! one action per repository name in flight.

use anyhow::{anyhow, bail, Context, Result};
use futures::future::{FutureExt, LocalBoxFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use reqwest::{Client, Url};
use std::collections::HashSet;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::command::CommandRunner;
use crate::config::MirrorSettings;
use crate::credentials::Credentials;
use crate::filter::{FilterDecision, RepoFilter};
use crate::git::{GitVcs, Vcs};
use crate::github::{PageWalker, RepoDescriptor};
use crate::redact::Redactor;
use crate::state::BackupCounter;

/// Result of synchronizing one repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Existing clone was pulled
    Updated { repo: RepoDescriptor },
    /// Fresh clone; `replaced` when it swapped out an existing directory
    Cloned { repo: RepoDescriptor, replaced: bool },
    /// Nothing changed on disk; `cause` is redacted
    Failed { repo: RepoDescriptor, cause: String },
}

impl SyncOutcome {
    pub fn repo(&self) -> &RepoDescriptor {
        match self {
            SyncOutcome::Updated { repo }
            | SyncOutcome::Cloned { repo, .. }
            | SyncOutcome::Failed { repo, .. } => repo,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, SyncOutcome::Failed { .. })
    }
}

/// What is on disk for a repository before it is synchronized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalState {
    NotPresent,
    Present,
}

enum Transition {
    Updated,
    Cloned { replaced: bool },
}

/// Decides and executes the synchronization of single repositories
pub struct SyncPlanner {
    vcs: Arc<dyn Vcs>,
    destination: PathBuf,
    credentials: Credentials,
    redactor: Redactor,
}

impl SyncPlanner {
    pub fn new(
        vcs: Arc<dyn Vcs>,
        destination: impl Into<PathBuf>,
        credentials: Credentials,
        redactor: Redactor,
    ) -> Self {
        Self {
            vcs,
            destination: destination.into(),
            credentials,
            redactor,
        }
    }

    /// Directory that holds the clone of `repo`.
    ///
    /// Names come from the remote, so anything that could escape the
    /// destination root is rejected.
    pub fn destination_for(&self, repo: &RepoDescriptor) -> Result<PathBuf> {
        let name = repo.name.as_str();
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\', STAGING_MARKER])
        {
            bail!("Refusing unsafe repository name {:?}", name);
        }
        Ok(self.destination.join(name))
    }

    /// Clone/pull transport for `repo` under the active credentials
    pub fn remote_url(&self, repo: &RepoDescriptor) -> Result<String> {
        match &self.credentials {
            Credentials::AccessToken { .. } => Ok(repo.ssh_url.clone()),
            Credentials::Basic { username, password } => {
                https_url_with_auth(&repo.clone_url, username, password)
            }
        }
    }

    pub async fn local_state(&self, dest: &Path) -> LocalState {
        match tokio::fs::symlink_metadata(dest).await {
            Ok(_) => LocalState::Present,
            Err(_) => LocalState::NotPresent,
        }
    }

    /// Synchronize one repository. Never fails: errors become [`SyncOutcome::Failed`].
    pub async fn sync(&self, repo: RepoDescriptor) -> SyncOutcome {
        match self.transition(&repo).await {
            Ok(Transition::Updated) => SyncOutcome::Updated { repo },
            Ok(Transition::Cloned { replaced }) => SyncOutcome::Cloned { repo, replaced },
            Err(cause) => {
                let cause = self.redactor.redact(&format!("{:#}", cause));
                SyncOutcome::Failed { repo, cause }
            }
        }
    }

    async fn transition(&self, repo: &RepoDescriptor) -> Result<Transition> {
        let dest = self.destination_for(repo)?;
        let remote = self.remote_url(repo)?;
        let tmp = staging_path(&dest, "tmp");

        self.recover_interrupted_swap(&dest).await?;
        remove_if_exists(&tmp)
            .await
            .with_context(|| format!("Failed to remove stale {}", tmp.display()))?;

        match self.local_state(&dest).await {
            LocalState::NotPresent => {
                info!("*** backing up {}... ***", self.redactor.redact(&remote));
                self.first_clone(&remote, &dest).await?;
                Ok(Transition::Cloned { replaced: false })
            }
            LocalState::Present => {
                info!("*** updating {}... ***", self.redactor.redact(&remote));
                match self.vcs.pull(&dest, &repo.default_branch).await {
                    Ok(()) => Ok(Transition::Updated),
                    Err(pull_error) => {
                        warn!("error: {} (repo={}); will re-clone!", pull_error, repo.name);
                        info!("*** backing up {}... ***", self.redactor.redact(&remote));
                        self.reclone(&remote, &dest, &tmp).await?;
                        Ok(Transition::Cloned { replaced: true })
                    }
                }
            }
        }
    }

    async fn first_clone(&self, remote: &str, dest: &Path) -> Result<()> {
        if let Err(clone_error) = self.vcs.clone_repo(remote, dest).await {
            if let Err(e) = remove_if_exists(dest).await {
                warn!("Failed to clean up partial clone {}: {}", dest.display(), e);
            }
            return Err(anyhow!(clone_error).context("Initial clone failed"));
        }
        Ok(())
    }

    /// Build a fresh clone beside the existing one and swap it in only once complete
    async fn reclone(&self, remote: &str, dest: &Path, tmp: &Path) -> Result<()> {
        if let Err(clone_error) = self.vcs.clone_repo(remote, tmp).await {
            discard_staging(tmp).await;
            return Err(anyhow!(clone_error)
                .context("Re-clone failed; existing backup left untouched"));
        }

        swap_into_place(tmp, dest).await
    }

    /// A crash between the two renames of a swap leaves only `<dest>.old~`;
    /// put it back so the previous backup is the starting point again.
    async fn recover_interrupted_swap(&self, dest: &Path) -> Result<()> {
        let old = staging_path(dest, "old");
        let old_exists = tokio::fs::symlink_metadata(&old).await.is_ok();
        if !old_exists {
            return Ok(());
        }

        if self.local_state(dest).await == LocalState::NotPresent {
            warn!("Restoring {} from interrupted swap", dest.display());
            tokio::fs::rename(&old, dest)
                .await
                .with_context(|| format!("Failed to restore {}", dest.display()))?;
        } else {
            remove_if_exists(&old)
                .await
                .with_context(|| format!("Failed to remove stale {}", old.display()))?;
        }
        Ok(())
    }
}

const STAGING_MARKER: char = '~';

/// `<path>.<kind>~` next to `path`
fn staging_path(path: &Path, kind: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(kind);
    name.push(STAGING_MARKER.to_string());
    PathBuf::from(name)
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

async fn discard_staging(tmp: &Path) {
    if let Err(e) = remove_if_exists(tmp).await {
        warn!("Failed to clean up {}: {}", tmp.display(), e);
    }
}

/// Replace `dest` with the completed clone at `tmp`.
///
/// The old directory is moved aside rather than deleted first, so a failed
/// second rename can put it back.
async fn swap_into_place(tmp: &Path, dest: &Path) -> Result<()> {
    let old = staging_path(dest, "old");
    remove_if_exists(&old)
        .await
        .with_context(|| format!("Failed to remove stale {}", old.display()))?;

    if let Err(e) = tokio::fs::rename(dest, &old).await {
        discard_staging(tmp).await;
        return Err(anyhow!(e).context(format!("Failed to move {} aside", dest.display())));
    }

    if let Err(e) = tokio::fs::rename(tmp, dest).await {
        if let Err(restore) = tokio::fs::rename(&old, dest).await {
            error!(
                "Failed to restore {} from {}: {}",
                dest.display(),
                old.display(),
                restore
            );
        }
        discard_staging(tmp).await;
        return Err(anyhow!(e).context(format!("Failed to move new clone into {}", dest.display())));
    }

    if let Err(e) = remove_if_exists(&old).await {
        warn!("Failed to remove previous clone {}: {}", old.display(), e);
    }
    Ok(())
}

/// `clone_url` with URL-encoded `username:password@` userinfo
pub fn https_url_with_auth(clone_url: &str, username: &str, password: &str) -> Result<String> {
    let mut url =
        Url::parse(clone_url).with_context(|| format!("Invalid clone URL: {}", clone_url))?;
    if url.scheme() != "https" {
        bail!("Clone URL is not HTTPS: {}", clone_url);
    }
    url.set_username(username)
        .map_err(|_| anyhow!("Cannot add credentials to {}", clone_url))?;
    url.set_password(Some(password))
        .map_err(|_| anyhow!("Cannot add credentials to {}", clone_url))?;
    Ok(url.to_string())
}

/// Results from a complete sync operation
#[derive(Debug, Clone)]
pub struct SyncSummary {
    pub total_repositories: usize,
    pub updated: usize,
    pub cloned: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration: Duration,
    pub outcomes: Vec<SyncOutcome>,
}

impl SyncSummary {
    fn new() -> Self {
        Self {
            total_repositories: 0,
            updated: 0,
            cloned: 0,
            failed: 0,
            skipped: 0,
            duration: Duration::ZERO,
            outcomes: Vec::new(),
        }
    }

    fn push(&mut self, outcome: SyncOutcome) {
        self.total_repositories += 1;
        match &outcome {
            SyncOutcome::Updated { .. } => self.updated += 1,
            SyncOutcome::Cloned { .. } => self.cloned += 1,
            SyncOutcome::Failed { .. } => self.failed += 1,
        }
        self.outcomes.push(outcome);
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// What a run would do for one repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedAction {
    Clone,
    Update,
    Reject(String),
}

#[derive(Debug, Clone)]
pub struct PlannedSync {
    pub repo: RepoDescriptor,
    pub destination: Option<PathBuf>,
    pub action: PlannedAction,
}

/// Walks, filters and synchronizes an organization
pub struct MirrorEngine {
    settings: MirrorSettings,
    walker: PageWalker,
    filter: RepoFilter,
    planner: SyncPlanner,
    counter: Arc<dyn BackupCounter>,
}

impl MirrorEngine {
    pub fn new(
        settings: MirrorSettings,
        credentials: Credentials,
        http: Client,
        vcs: Arc<dyn Vcs>,
        counter: Arc<dyn BackupCounter>,
    ) -> Self {
        let redactor = Redactor::new(&credentials);
        let walker = PageWalker::new(
            http,
            settings.api.clone(),
            settings.organization.clone(),
            settings.repo_type,
            credentials.clone(),
            redactor.clone(),
        );
        let filter = RepoFilter::new(settings.ignore_list.clone(), settings.include_forks);
        let planner = SyncPlanner::new(vcs, settings.destination.clone(), credentials, redactor);

        Self {
            settings,
            walker,
            filter,
            planner,
            counter,
        }
    }

    /// Engine backed by the `git` executable and a real HTTP client
    pub fn with_git(
        settings: MirrorSettings,
        credentials: Credentials,
        counter: Arc<dyn BackupCounter>,
    ) -> Result<Self> {
        let runner = CommandRunner::new(Redactor::new(&credentials))
            .with_timeout(settings.command_timeout);
        let vcs: Arc<dyn Vcs> = Arc::new(GitVcs::new(runner, settings.git_binary.clone()));
        let http = PageWalker::build_http_client()?;
        Ok(Self::new(settings, credentials, http, vcs, counter))
    }

    pub fn settings(&self) -> &MirrorSettings {
        &self.settings
    }

    /// Run a complete mirroring pass.
    ///
    /// A listing failure is fatal, but only after the repositories already
    /// in flight have finished.
    pub async fn run(&self) -> Result<SyncSummary> {
        let start_time = Instant::now();
        let max_parallel = self.settings.max_parallel.max(1);

        tokio::fs::create_dir_all(&self.settings.destination)
            .await
            .with_context(|| {
                format!(
                    "Failed to create destination directory {}",
                    self.settings.destination.display()
                )
            })?;

        info!(
            "Mirroring {} into {} (parallel={})",
            self.settings.organization,
            self.settings.destination.display(),
            max_parallel
        );

        let descriptors = self.walker.walk();
        futures::pin_mut!(descriptors);

        let mut in_flight: FuturesUnordered<LocalBoxFuture<'_, SyncOutcome>> =
            FuturesUnordered::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut summary = SyncSummary::new();
        let mut listing_done = false;
        let mut walk_error = None;

        loop {
            let can_pull = !listing_done && in_flight.len() < max_parallel;
            if !can_pull && in_flight.is_empty() {
                break;
            }

            tokio::select! {
                Some(outcome) = in_flight.next(), if !in_flight.is_empty() => {
                    self.record(outcome, &mut summary);
                }
                item = descriptors.next(), if can_pull => match item {
                    Some(Ok(repo)) => {
                        if let FilterDecision::Skip(_) = self.filter.check(&repo) {
                            summary.skipped += 1;
                            continue;
                        }
                        if !seen.insert(repo.name.clone()) {
                            warn!("Skipping {}: another repository already uses the name {}", repo.full_name, repo.name);
                            summary.skipped += 1;
                            continue;
                        }
                        in_flight.push(self.planner.sync(repo).boxed_local());
                    }
                    Some(Err(e)) => {
                        error!("Repository listing failed: {:#}", e);
                        walk_error = Some(e);
                        listing_done = true;
                    }
                    None => listing_done = true,
                },
            }
        }

        summary.duration = start_time.elapsed();

        if let Some(e) = walk_error {
            return Err(e.context(format!(
                "Aborted after {} repositories",
                summary.total_repositories
            )));
        }

        info!(
            "Sync completed in {:.2}s: {} updated, {} cloned, {} failed, {} skipped",
            summary.duration.as_secs_f64(),
            summary.updated,
            summary.cloned,
            summary.failed,
            summary.skipped
        );

        Ok(summary)
    }

    fn record(&self, outcome: SyncOutcome, summary: &mut SyncSummary) {
        match &outcome {
            SyncOutcome::Updated { repo } => {
                info!("Updated {}", repo.full_name);
            }
            SyncOutcome::Cloned { repo, replaced } => {
                if *replaced {
                    info!("Re-cloned {}", repo.full_name);
                } else {
                    info!("Cloned {}", repo.full_name);
                }
            }
            SyncOutcome::Failed { repo, cause } => {
                error!("Failed to back up {}: {}", repo.full_name, cause);
            }
        }

        if outcome.is_success() {
            let repo = outcome.repo();
            if let Err(e) = self.counter.record_backup(&repo.name, &repo.default_branch) {
                warn!("Failed to record backup of {}: {:#}", repo.full_name, e);
            }
        }

        summary.push(outcome);
    }

    /// Dry run: list what a run would do without touching any clone
    pub async fn plan(&self) -> Result<Vec<PlannedSync>> {
        let descriptors = self.walker.walk();
        futures::pin_mut!(descriptors);

        let mut seen: HashSet<String> = HashSet::new();
        let mut planned = Vec::new();

        while let Some(repo) = descriptors.next().await {
            let repo = repo?;
            if self.filter.check(&repo) != FilterDecision::Admit || !seen.insert(repo.name.clone()) {
                continue;
            }

            let entry = match self.planner.destination_for(&repo) {
                Ok(dest) => {
                    let action = match self.planner.local_state(&dest).await {
                        LocalState::NotPresent => PlannedAction::Clone,
                        LocalState::Present => PlannedAction::Update,
                    };
                    PlannedSync {
                        repo,
                        destination: Some(dest),
                        action,
                    }
                }
                Err(e) => PlannedSync {
                    repo,
                    destination: None,
                    action: PlannedAction::Reject(e.to_string()),
                },
            };
            debug!("Planned {:?} for {}", entry.action, entry.repo.full_name);
            planned.push(entry);
        }

        Ok(planned)
    }
}
