use crate::error::{BqChainError, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct CredentialFile {
    #[serde(default)]
    data: Vec<CredentialEntry>,
}

#[derive(Debug, Deserialize)]
struct CredentialEntry {
    key: CredentialKey,
    credential: StoredCredential,
}

#[derive(Debug, Deserialize)]
struct CredentialKey {
    account: String,
}

#[derive(Debug, Deserialize)]
struct StoredCredential {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    token_expiry: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub account: String,
    pub access_token: String,
    pub refresh_token: String,
    pub token_expiry: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.token_expiry.is_some_and(|expiry| expiry <= now)
    }
}

/// Read-only view of gcloud's legacy `credentials` file.
///
/// The file is read on every lookup so that a refresh performed by another
/// process is visible to the next request.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn credential_for(&self, account: &str) -> Result<Credential> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(BqChainError::CredentialNotFound {
                    account: account.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let file: CredentialFile = serde_json::from_str(&content)?;

        // First match wins when gcloud has stored the same account twice.
        file.data
            .into_iter()
            .find(|entry| entry.key.account == account)
            .map(|entry| Credential {
                account: entry.key.account,
                access_token: entry.credential.access_token,
                refresh_token: entry.credential.refresh_token,
                token_expiry: entry.credential.token_expiry,
            })
            .ok_or_else(|| BqChainError::CredentialNotFound {
                account: account.to_string(),
            })
    }

    pub fn access_token(&self, account: &str) -> Result<String> {
        Ok(self.credential_for(account)?.access_token)
    }

    pub fn refresh_token(&self, account: &str) -> Result<String> {
        Ok(self.credential_for(account)?.refresh_token)
    }
}
