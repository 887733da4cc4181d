use crate::error::{BqChainError, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "https://www.googleapis.com/bigquery/v2";
const GCLOUD_CREDENTIALS: &str = ".config/gcloud/credentials";

/// Wait schedule between job status polls: starts at `initial`, doubles, never exceeds `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
}

impl BackoffConfig {
    /// `initial` of one `unit` and `max` of fifteen, so waits run 1, 2, 4, 8, 15, 15, ... units.
    pub fn with_unit(unit: Duration) -> Self {
        Self {
            initial: unit,
            max: unit * 15,
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::with_unit(Duration::from_secs(1))
    }
}

/// Settings for one run. Built once, then shared read-only (usually as `Arc<Config>`).
#[derive(Debug, Clone)]
pub struct Config {
    pub account: String,
    pub project: String,
    pub dry_run: bool,
    pub params: BTreeMap<String, String>,
    pub credentials_path: PathBuf,
    pub api_base_url: String,
    pub backoff: BackoffConfig,
}

impl Config {
    pub fn new(account: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            project: project.into(),
            dry_run: false,
            params: BTreeMap::new(),
            credentials_path: default_credentials_path(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            backoff: BackoffConfig::default(),
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params.extend(params);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_path = path.into();
        self
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Dry runs never touch the network, so only real runs need an account and project.
    pub fn validate(&self) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        if self.account.trim().is_empty() {
            return Err(BqChainError::Config(
                "account is required (set --account or BQCHAIN_ACCOUNT)".to_string(),
            ));
        }
        if self.project.trim().is_empty() {
            return Err(BqChainError::Config(
                "project is required (set --project or BQCHAIN_PROJECT)".to_string(),
            ));
        }
        if self.backoff.initial.is_zero() || self.backoff.max < self.backoff.initial {
            return Err(BqChainError::Config(format!(
                "invalid backoff: initial {:?}, max {:?}",
                self.backoff.initial, self.backoff.max
            )));
        }
        Ok(())
    }
}

pub fn default_credentials_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(GCLOUD_CREDENTIALS)
}

/// Parses a `key=value` pair as given on the command line.
pub fn parse_param(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(BqChainError::Config(format!(
            "parameter '{}' must look like key=value",
            raw
        ))),
    }
}
