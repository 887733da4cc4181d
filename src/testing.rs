//! Helpers shared by unit tests.

use crate::auth::TokenRefresher;
use crate::error::Result;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::NamedTempFile;

pub(crate) fn credentials_json(entries: &[(&str, &str, &str)]) -> String {
    let data: Vec<serde_json::Value> = entries
        .iter()
        .map(|(account, access, refresh)| {
            serde_json::json!({
                "key": {"account": account, "type": "google-cloud-sdk"},
                "credential": {
                    "_class": "OAuth2Credentials",
                    "access_token": access,
                    "refresh_token": refresh,
                    "client_id": "32555940559.apps.googleusercontent.com"
                }
            })
        })
        .collect();
    serde_json::json!({"data": data, "file_version": 1}).to_string()
}

pub(crate) fn write_credentials(entries: &[(&str, &str, &str)]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(credentials_json(entries).as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

/// Stands in for `gcloud`: rewrites the credential file with a new access token.
pub(crate) struct RewritingRefresher {
    path: PathBuf,
    new_token: String,
    calls: AtomicUsize,
}

impl RewritingRefresher {
    pub(crate) fn new(path: &Path, new_token: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            new_token: new_token.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenRefresher for RewritingRefresher {
    async fn refresh(&self, account: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let content = credentials_json(&[(account, &self.new_token, "refresh")]);
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}
