//! Organization repository listing over the paginated REST API
//!
//! [`PageWalker`] turns the `GET /orgs/{org}/repos` listing into a lazy,
//! single-pass stream of [`RepoDescriptor`]s. Pages are fetched only as the
//! consumer drains the previous one, following the `Link` header's `next`
//! relation until it disappears.

use anyhow::{anyhow, bail, Context, Result};
use futures::stream::{self, Stream, TryStreamExt};
use reqwest::header::{ACCEPT, LINK};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::ApiConfig;
use crate::credentials::Credentials;
use crate::redact::Redactor;

/// Repository type filter understood by the listing endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RepoType {
    #[default]
    All,
    Public,
    Private,
    Forks,
    Sources,
    Member,
}

impl RepoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoType::All => "all",
            RepoType::Public => "public",
            RepoType::Private => "private",
            RepoType::Forks => "forks",
            RepoType::Sources => "sources",
            RepoType::Member => "member",
        }
    }
}

impl fmt::Display for RepoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata for one remote repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoDescriptor {
    pub full_name: String,
    pub name: String,
    pub ssh_url: String,
    pub clone_url: String,
    pub default_branch: String,
    pub is_fork: bool,
    pub is_archived: bool,
}

/// Wire shape of a repository object; optional fields tolerate sparse payloads
#[derive(Debug, Deserialize)]
struct ApiRepository {
    full_name: String,
    name: String,
    ssh_url: String,
    clone_url: String,
    default_branch: Option<String>,
    fork: Option<bool>,
    archived: Option<bool>,
}

impl From<ApiRepository> for RepoDescriptor {
    fn from(repo: ApiRepository) -> Self {
        Self {
            full_name: repo.full_name,
            name: repo.name,
            ssh_url: repo.ssh_url,
            clone_url: repo.clone_url,
            // `git pull origin HEAD` follows the remote's default branch
            default_branch: repo.default_branch.unwrap_or_else(|| "HEAD".to_string()),
            is_fork: repo.fork.unwrap_or(false),
            is_archived: repo.archived.unwrap_or(false),
        }
    }
}

/// Related-page URLs from a `Link` header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pagination {
    pub first: Option<String>,
    pub prev: Option<String>,
    pub next: Option<String>,
    pub last: Option<String>,
}

/// Parse a `Link` header.
///
/// Headers look like:
/// `<https://api.github.com/organizations/1/repos?page=2>; rel="next", <...?page=5>; rel="last"`
///
/// Any subset and order of `first`, `prev`, `next`, `last` is accepted;
/// unknown relations and malformed segments are ignored.
pub fn parse_link_header(raw: &str) -> Pagination {
    let mut pagination = Pagination::default();

    for part in raw.split(',') {
        let mut url = None;
        let mut rel = None;

        for segment in part.split(';') {
            let segment = segment.trim();
            if segment.starts_with('<') && segment.ends_with('>') && segment.len() >= 2 {
                url = Some(&segment[1..segment.len() - 1]);
            } else if let Some(value) = segment.strip_prefix("rel=") {
                rel = Some(value.trim_matches('"'));
            }
        }

        if let (Some(url), Some(rel)) = (url, rel) {
            let slot = match rel {
                "first" => &mut pagination.first,
                "prev" => &mut pagination.prev,
                "next" => &mut pagination.next,
                "last" => &mut pagination.last,
                _ => continue,
            };
            *slot = Some(url.to_string());
        }
    }

    pagination
}

enum Cursor {
    Start,
    Next(String),
    Done,
}

/// Walks every page of an organization's repository listing
pub struct PageWalker {
    client: Client,
    api: ApiConfig,
    organization: String,
    repo_type: RepoType,
    credentials: Credentials,
    redactor: Redactor,
}

impl PageWalker {
    pub fn new(
        client: Client,
        api: ApiConfig,
        organization: impl Into<String>,
        repo_type: RepoType,
        credentials: Credentials,
        redactor: Redactor,
    ) -> Self {
        Self {
            client,
            api,
            organization: organization.into(),
            repo_type,
            credentials,
            redactor,
        }
    }

    /// HTTP client with the headers every listing request carries
    pub fn build_http_client() -> Result<Client> {
        Client::builder()
            .user_agent(concat!("orgmirror/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")
    }

    /// URL of the first listing page, with token authentication applied
    pub fn first_page_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.api.base_url)
            .with_context(|| format!("Invalid API base URL: {}", self.api.base_url))?;

        url.path_segments_mut()
            .map_err(|_| anyhow!("API base URL cannot carry a path: {}", self.api.base_url))?
            .pop_if_empty()
            .extend(["orgs", self.organization.as_str(), "repos"]);

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("type", self.repo_type.as_str())
                .append_pair("per_page", &self.api.per_page.to_string());
            match &self.credentials {
                Credentials::AccessToken { token } => {
                    query.append_pair("access_token", token);
                }
                Credentials::Basic { .. } => {}
            }
        }

        Ok(url)
    }

    /// Lazily yield every non-archived repository of the organization.
    ///
    /// The first error (transport, HTTP status, or decoding) ends the stream;
    /// a partial listing is never presented as complete.
    pub fn walk(&self) -> impl Stream<Item = Result<RepoDescriptor>> + '_ {
        info!(
            "Listing {} repositories of organization {} ({} auth)",
            self.repo_type,
            self.organization,
            self.credentials.kind()
        );

        let pages = stream::try_unfold((Cursor::Start, 1u32), move |(cursor, page)| async move {
            let url = match cursor {
                Cursor::Start => self.first_page_url()?,
                Cursor::Next(next) => self.follow_url(&next)?,
                Cursor::Done => return Ok::<_, anyhow::Error>(None),
            };

            let (repos, pagination) = self
                .fetch_page(url)
                .await
                .with_context(|| format!("Failed to list repositories of {} (page {})", self.organization, page))?;

            let cursor = match pagination.next {
                Some(next) => Cursor::Next(next),
                None => Cursor::Done,
            };
            Ok::<_, anyhow::Error>(Some((repos, (cursor, page + 1))))
        });

        pages
            .map_ok(|repos| stream::iter(repos.into_iter().map(Ok::<_, anyhow::Error>)))
            .try_flatten()
    }

    /// Validate a `next` link before sending credentials to it
    fn follow_url(&self, next: &str) -> Result<Url> {
        let base = Url::parse(&self.api.base_url)
            .with_context(|| format!("Invalid API base URL: {}", self.api.base_url))?;
        let url = Url::parse(next)
            .map_err(|e| anyhow!("Invalid next page link {}: {}", self.redactor.redact(next), e))?;

        if url.origin() != base.origin() {
            bail!(
                "Refusing to follow next page link to a different host: {}",
                self.redactor.redact(next)
            );
        }

        Ok(url)
    }

    async fn fetch_page(&self, url: Url) -> Result<(Vec<RepoDescriptor>, Pagination)> {
        debug!("Fetching {}", self.redactor.redact(url.as_str()));

        let request = self
            .client
            .get(url)
            .header(ACCEPT, "application/vnd.github+json");
        // A token is already part of the URL (first page) or echoed in the link
        let request = match &self.credentials {
            Credentials::AccessToken { .. } => request,
            Credentials::Basic { username, password } => request.basic_auth(username, Some(password)),
        };

        let response = request
            .send()
            .await
            .map_err(|e| anyhow!("Request failed: {}", self.redactor.redact(&e.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "Listing API returned HTTP {}: {}",
                status,
                self.redactor.redact(body.trim())
            );
        }

        let pagination = match response.headers().get(LINK).and_then(|v| v.to_str().ok()) {
            Some(raw) => parse_link_header(raw),
            None => {
                debug!("No Link header, nothing to paginate through");
                Pagination::default()
            }
        };

        let repos: Vec<ApiRepository> = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to decode repository list: {}", self.redactor.redact(&e.to_string())))?;

        let total = repos.len();
        let repos: Vec<RepoDescriptor> = repos
            .into_iter()
            .map(RepoDescriptor::from)
            .filter(|repo| {
                if repo.is_archived {
                    debug!("Skipping archived repository {}", repo.full_name);
                }
                !repo.is_archived
            })
            .collect();

        debug!("Page yielded {} of {} repositories", repos.len(), total);
        Ok((repos, pagination))
    }
}
