pub mod auth;
pub mod client;
pub mod config;
pub mod dsl;
pub mod error;
pub mod executor;

#[cfg(test)]
mod testing;

pub use auth::{Credential, CredentialStore, GcloudRefresher, TokenRefresher};
pub use client::{
    ApiRequest, ApiResponse, BqClient, ErrorProto, HttpTransport, JobReference, JobState,
    JobStatus, Method, MockTransport, Transport,
};
pub use config::{BackoffConfig, Config};
pub use dsl::{render, Pipeline, QueryDef, QueryLoader, RenderedQuery};
pub use error::{BqChainError, Result};
pub use executor::{
    build_job_request, collect_in_order, decode_results, run_in_order, Backoff,
    CancellationToken, CompletionPoller, Destination, JobSubmitter, QueryRunner, ResultFetcher,
    ResultRow, ResultSet,
};
