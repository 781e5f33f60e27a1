//! Authentication inputs for a mirroring run
//!
//! A run authenticates in exactly one way. The variant decides both how the
//! listing API is called and which transport is used for cloning:
//!
//! - [`Credentials::AccessToken`]: token as an API query parameter, SSH for
//!   clone/pull (key material is expected to be available out-of-band)
//! - [`Credentials::Basic`]: HTTP Basic for the API, HTTPS with embedded
//!   credentials for clone/pull

use anyhow::{bail, Result};
use reqwest::Url;
use std::fmt;

/// The active credential variant for a run
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Personal or OAuth access token
    AccessToken { token: String },
    /// Username and password (or a token used as the password)
    Basic { username: String, password: String },
}

impl Credentials {
    pub fn access_token(token: impl Into<String>) -> Self {
        Credentials::AccessToken {
            token: token.into(),
        }
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Build credentials from loosely supplied inputs.
    ///
    /// A non-empty token wins; otherwise both username and password must be
    /// present. Anything else is rejected before any network activity.
    pub fn from_parts(
        access_token: Option<String>,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self> {
        let non_empty = |value: Option<String>| value.filter(|v| !v.is_empty());

        match (non_empty(access_token), non_empty(username), non_empty(password)) {
            (Some(token), _, _) => Ok(Credentials::AccessToken { token }),
            (None, Some(username), Some(password)) => Ok(Credentials::Basic { username, password }),
            (None, Some(_), None) => bail!("unworkable combination of authentication inputs: username without password"),
            (None, None, Some(_)) => bail!("unworkable combination of authentication inputs: password without username"),
            (None, None, None) => bail!(
                "unworkable combination of authentication inputs: supply an access token or a username and password"
            ),
        }
    }

    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Credentials::AccessToken { .. } => "access-token",
            Credentials::Basic { .. } => "basic",
        }
    }

    /// Secret values that must never reach a log sink, in their raw form
    pub(crate) fn secret_values(&self) -> Vec<&str> {
        match self {
            Credentials::AccessToken { token } => vec![token.as_str()],
            Credentials::Basic { username, password } => vec![password.as_str(), username.as_str()],
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::AccessToken { .. } => f
                .debug_struct("AccessToken")
                .field("token", &"REDACTED")
                .finish(),
            Credentials::Basic { .. } => f
                .debug_struct("Basic")
                .field("username", &"REDACTED")
                .field("password", &"REDACTED")
                .finish(),
        }
    }
}

/// Percent-encode a value the way it appears in the userinfo part of a URL.
///
/// Shared by clone-URL construction and redaction so both agree on the
/// encoded form.
pub(crate) fn encode_userinfo(value: &str) -> Option<String> {
    let mut url = Url::parse("https://userinfo.invalid/").ok()?;
    url.set_username(value).ok()?;
    Some(url.username().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_wins_over_basic() {
        let creds = Credentials::from_parts(
            Some("tok".to_string()),
            Some("user".to_string()),
            Some("pass".to_string()),
        )
        .unwrap();
        assert_eq!(creds, Credentials::access_token("tok"));
    }

    #[test]
    fn test_basic_requires_both_parts() {
        let creds =
            Credentials::from_parts(None, Some("user".to_string()), Some("pass".to_string())).unwrap();
        assert_eq!(creds.kind(), "basic");

        let err = Credentials::from_parts(None, Some("user".to_string()), None).unwrap_err();
        assert!(err.to_string().contains("without password"));
    }

    #[test]
    fn test_empty_inputs_are_rejected() {
        let err = Credentials::from_parts(Some(String::new()), None, Some(String::new())).unwrap_err();
        assert!(err.to_string().contains("unworkable combination"));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let creds = Credentials::basic("octocat", "hunter2");
        let rendered = format!("{:?}", creds);
        assert!(!rendered.contains("octocat"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_encode_userinfo() {
        assert_eq!(encode_userinfo("plain").as_deref(), Some("plain"));
        assert_eq!(encode_userinfo("p@ss:word").as_deref(), Some("p%40ss%3Aword"));
    }
}
