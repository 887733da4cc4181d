use super::credentials::CredentialStore;
use crate::error::Result;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

/// Mints a new access token for `account` and writes it back to the shared
/// credential store. Callers re-read the store afterwards; nothing is returned.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, account: &str) -> Result<()>;
}

/// Runs `gcloud auth activate-refresh-token <account> <refresh_token>`.
pub struct GcloudRefresher {
    store: CredentialStore,
    program: String,
}

impl GcloudRefresher {
    pub fn new(store: CredentialStore) -> Self {
        Self {
            store,
            program: "gcloud".to_string(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

#[async_trait]
impl TokenRefresher for GcloudRefresher {
    async fn refresh(&self, account: &str) -> Result<()> {
        let refresh_token = self.store.refresh_token(account)?;
        info!(account, "Refreshing access token");

        let status = Command::new(&self.program)
            .args(["auth", "activate-refresh-token", account, &refresh_token])
            .status()
            .await;

        // A failed refresh shows up as a second 401 on the retried request.
        match status {
            Ok(status) if status.success() => {}
            Ok(status) => warn!(account, %status, "Token refresh command exited unsuccessfully"),
            Err(e) => warn!(account, program = %self.program, error = %e, "Could not run token refresh command"),
        }
        Ok(())
    }
}
