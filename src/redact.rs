//! Credential redaction for anything headed to a log or error message

use std::fmt;
use std::sync::Arc;

use crate::credentials::{encode_userinfo, Credentials};

/// Replacement text for secret values
pub const PLACEHOLDER: &str = "REDACTED";

/// Scrubs secret values out of text.
///
/// Closed over the credential values of one run; cloning is cheap so every
/// layer that emits text can hold its own copy.
#[derive(Clone, Default)]
pub struct Redactor {
    // Longest first, so a secret that contains another is replaced whole
    secrets: Arc<[String]>,
}

impl Redactor {
    pub fn new(credentials: &Credentials) -> Self {
        let mut secrets: Vec<String> = Vec::new();

        for raw in credentials.secret_values() {
            if raw.is_empty() {
                continue;
            }
            secrets.push(raw.to_string());
            // Clone URLs carry the percent-encoded form
            if let Some(encoded) = encode_userinfo(raw) {
                if !encoded.is_empty() {
                    secrets.push(encoded);
                }
            }
        }

        secrets.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        secrets.dedup();

        Self {
            secrets: secrets.into(),
        }
    }

    /// A redactor with nothing to hide
    pub fn none() -> Self {
        Self::default()
    }

    pub fn redact(&self, text: &str) -> String {
        let mut redacted = text.to_string();
        for secret in self.secrets.iter() {
            if redacted.contains(secret.as_str()) {
                redacted = redacted.replace(secret.as_str(), PLACEHOLDER);
            }
        }
        redacted
    }
}

impl fmt::Debug for Redactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Redactor")
            .field("secrets", &self.secrets.len())
            .finish()
    }
}
