use crate::client::ErrorProto;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BqChainError {
    #[error("No credentials found for {account}. Run `gcloud auth login {account}`.")]
    CredentialNotFound { account: String },

    #[error("Request to {url} rejected as unauthorized for {account} after refreshing the access token")]
    Authorization { account: String, url: String },

    #[error("Request to {url} failed with status {status}: {body}")]
    RequestFailed {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Job {job_id} failed: {error}")]
    JobFailed { job_id: String, error: ErrorProto },

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Polling for job {job_id} was cancelled")]
    Cancelled { job_id: String },

    #[error("Template error: {0}")]
    Template(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, BqChainError>;
