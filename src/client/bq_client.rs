use super::models::{
    JobInsertRequest, JobReference, JobResponse, JobStatus, QueryResultsResponse,
};
use super::transport::{ApiRequest, ApiResponse, HttpTransport, Method, Transport};
use crate::auth::{CredentialStore, GcloudRefresher, TokenRefresher};
use crate::config::Config;
use crate::error::{BqChainError, Result};
use chrono::Utc;
use reqwest::Url;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const UNAUTHORIZED: u16 = 401;

/// Authenticated access to the BigQuery jobs API.
///
/// Every request reads the current access token from the credential store.
/// A 401 triggers one token refresh and one retry; a second 401 is final.
pub struct BqClient {
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
    credentials: CredentialStore,
    refresher: Arc<dyn TokenRefresher>,
    refresh_lock: Mutex<()>,
}

impl BqClient {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let credentials = CredentialStore::new(&config.credentials_path);
        let refresher = Arc::new(GcloudRefresher::new(credentials));
        let transport = Arc::new(HttpTransport::new()?);
        Ok(Self::with_parts(config, transport, refresher))
    }

    pub fn with_parts(
        config: Arc<Config>,
        transport: Arc<dyn Transport>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Self {
        let credentials = CredentialStore::new(&config.credentials_path);
        Self {
            config,
            transport,
            credentials,
            refresher,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn insert_job(&self, request: &JobInsertRequest) -> Result<JobReference> {
        let url = self.url(&["jobs"], &[])?;
        let body = serde_json::to_value(request)?;
        let response = self.send_authorized(Method::Post, url, Some(body)).await?;

        let job: JobResponse = response.json()?;
        job.job_reference
            .filter(|r| !r.job_id.is_empty())
            .ok_or_else(|| {
                BqChainError::ProtocolViolation(format!(
                    "job creation response has no jobReference.jobId: {}",
                    response.body
                ))
            })
    }

    pub async fn get_job_status(&self, job: &JobReference) -> Result<JobStatus> {
        let url = self.url(&["jobs", job.job_id.as_str()], &Self::location_query(job))?;
        let response = self.send_authorized(Method::Get, url, None).await?;

        let job_response: JobResponse = response.json()?;
        job_response.status.ok_or_else(|| {
            BqChainError::ProtocolViolation(format!(
                "job {} status response has no status: {}",
                job.job_id, response.body
            ))
        })
    }

    pub async fn get_query_results(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> Result<QueryResultsResponse> {
        let mut query = Self::location_query(job);
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }
        let url = self.url(&["queries", job.job_id.as_str()], &query)?;
        let response = self.send_authorized(Method::Get, url, None).await?;
        response.json()
    }

    fn location_query(job: &JobReference) -> Vec<(&'static str, String)> {
        job.location
            .iter()
            .map(|location| ("location", location.clone()))
            .collect()
    }

    fn url(&self, segments: &[&str], query: &[(&str, String)]) -> Result<String> {
        let base = format!(
            "{}/projects/{}/{}",
            self.config.api_base_url,
            self.config.project,
            segments.join("/")
        );
        let mut url = Url::parse(&base)
            .map_err(|e| BqChainError::Config(format!("invalid API URL '{}': {}", base, e)))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url.into())
    }

    async fn send_authorized(
        &self,
        method: Method,
        url: String,
        body: Option<serde_json::Value>,
    ) -> Result<ApiResponse> {
        let account = self.config.account.as_str();
        let mut refreshed = false;

        loop {
            let credential = self.credentials.credential_for(account)?;
            if credential.is_expired(Utc::now()) {
                debug!(account, "Stored access token is past its expiry");
            }
            let token = credential.access_token;

            let response = self
                .transport
                .send(ApiRequest {
                    method,
                    url: url.clone(),
                    bearer_token: token.clone(),
                    body: body.clone(),
                })
                .await?;

            if response.status == UNAUTHORIZED {
                if refreshed {
                    return Err(BqChainError::Authorization {
                        account: account.to_string(),
                        url,
                    });
                }
                warn!(account, url = %url, "Request unauthorized, refreshing access token");
                self.refresh_rejected_token(&token).await?;
                refreshed = true;
                continue;
            }

            if response.status > 299 {
                return Err(BqChainError::RequestFailed {
                    url,
                    status: response.status,
                    body: response.body,
                });
            }

            return Ok(response);
        }
    }

    /// Serializes refreshes so the retried request always reads the token the
    /// refresh produced. Skips the refresh if another task already replaced
    /// the rejected token while this one waited.
    async fn refresh_rejected_token(&self, rejected: &str) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;
        let current = self.credentials.access_token(&self.config.account)?;
        if current != rejected {
            debug!(account = %self.config.account, "Access token already refreshed");
            return Ok(());
        }
        self.refresher.refresh(&self.config.account).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::models::{JobConfiguration, JobConfigurationQuery, WRITE_TRUNCATE};
    use crate::client::transport::MockTransport;
    use crate::testing::{write_credentials, RewritingRefresher};
    use serde_json::json;
    use tempfile::NamedTempFile;

    fn setup(token: &str) -> (NamedTempFile, Arc<MockTransport>, Arc<RewritingRefresher>, BqClient) {
        let file = write_credentials(&[("me@example.com", token, "refresh-me")]);
        let config = Arc::new(
            Config::new("me@example.com", "proj")
                .with_credentials_path(file.path())
                .with_api_base_url("http://bq.test/bigquery/v2"),
        );
        let transport = Arc::new(MockTransport::new());
        let refresher = Arc::new(RewritingRefresher::new(file.path(), "fresh-token"));
        let client = BqClient::with_parts(config, transport.clone(), refresher.clone());
        (file, transport, refresher, client)
    }

    fn insert_request() -> JobInsertRequest {
        JobInsertRequest {
            configuration: JobConfiguration {
                query: JobConfigurationQuery {
                    query: "SELECT 1".to_string(),
                    allow_large_results: false,
                    write_disposition: WRITE_TRUNCATE.to_string(),
                    destination_table: None,
                },
            },
        }
    }

    #[tokio::test]
    async fn test_insert_job_returns_job_reference() {
        let (_file, transport, refresher, client) = setup("stale");
        transport.push_response(200, json!({"jobReference": {"jobId": "job_1", "projectId": "proj", "location": "US"}}));

        let job = client.insert_job(&insert_request()).await.unwrap();

        assert_eq!(job.job_id, "job_1");
        assert_eq!(job.location.as_deref(), Some("US"));
        assert_eq!(refresher.calls(), 0);
        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::Post);
        assert_eq!(requests[0].url, "http://bq.test/bigquery/v2/projects/proj/jobs");
        assert_eq!(requests[0].bearer_token, "stale");
    }

    #[tokio::test]
    async fn test_unauthorized_refreshes_once_and_retries_with_new_token() {
        let (_file, transport, refresher, client) = setup("stale");
        transport.push_response(401, json!({"error": {"code": 401}}));
        transport.push_response(200, json!({"jobReference": {"jobId": "job_2"}}));

        let job = client.insert_job(&insert_request()).await.unwrap();

        assert_eq!(job.job_id, "job_2");
        assert_eq!(refresher.calls(), 1);
        let tokens: Vec<_> = transport.requests().into_iter().map(|r| r.bearer_token).collect();
        assert_eq!(tokens, vec!["stale", "fresh-token"]);
    }

    #[tokio::test]
    async fn test_second_unauthorized_is_fatal_without_third_request() {
        let (_file, transport, refresher, client) = setup("stale");
        transport.push_response(401, json!({}));
        transport.push_response(401, json!({}));
        transport.push_response(200, json!({"jobReference": {"jobId": "never"}}));

        let err = client.insert_job(&insert_request()).await.unwrap_err();

        assert!(matches!(err, BqChainError::Authorization { ref account, .. } if account == "me@example.com"));
        assert_eq!(transport.request_count(), 2);
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn test_server_error_carries_status_and_body() {
        let (_file, transport, _refresher, client) = setup("tok");
        transport.push_response(500, json!({"error": {"message": "backendError"}}));

        let err = client.insert_job(&insert_request()).await.unwrap_err();

        match err {
            BqChainError::RequestFailed { status, body, url } => {
                assert_eq!(status, 500);
                assert!(body.contains("backendError"));
                assert!(url.ends_with("/projects/proj/jobs"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_job_id_is_protocol_violation() {
        let (_file, transport, _refresher, client) = setup("tok");
        transport.push_response(200, json!({"kind": "bigquery#job"}));

        let err = client.insert_job(&insert_request()).await.unwrap_err();
        assert!(matches!(err, BqChainError::ProtocolViolation(_)));
    }

    #[tokio::test]
    async fn test_status_url_includes_location() {
        let (_file, transport, _refresher, client) = setup("tok");
        transport.push_response(200, json!({"status": {"state": "RUNNING"}}));

        let job = JobReference {
            job_id: "job_eu".to_string(),
            project_id: Some("proj".to_string()),
            location: Some("EU".to_string()),
        };
        let status = client.get_job_status(&job).await.unwrap();

        assert!(!status.state.is_terminal());
        assert_eq!(
            transport.requests()[0].url,
            "http://bq.test/bigquery/v2/projects/proj/jobs/job_eu?location=EU"
        );
    }

    #[tokio::test]
    async fn test_results_url_encodes_page_token() {
        let (_file, transport, _refresher, client) = setup("tok");
        transport.push_response(200, json!({"schema": {"fields": []}}));

        client
            .get_query_results(&JobReference::new("job_1"), Some("a+b/c="))
            .await
            .unwrap();

        assert_eq!(
            transport.requests()[0].url,
            "http://bq.test/bigquery/v2/projects/proj/queries/job_1?pageToken=a%2Bb%2Fc%3D"
        );
    }

    struct YieldingTransport(MockTransport);

    #[async_trait::async_trait]
    impl Transport for YieldingTransport {
        async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
            tokio::task::yield_now().await;
            self.0.send(request).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_unauthorized_requests_refresh_once() {
        let file = write_credentials(&[("me@example.com", "stale", "refresh-me")]);
        let config = Arc::new(
            Config::new("me@example.com", "proj")
                .with_credentials_path(file.path())
                .with_api_base_url("http://bq.test/bigquery/v2"),
        );
        let transport = Arc::new(YieldingTransport(MockTransport::new()));
        transport.0.push_response(401, json!({}));
        transport.0.push_response(401, json!({}));
        transport.0.push_response(200, json!({"jobReference": {"jobId": "j"}}));
        transport.0.push_response(200, json!({"jobReference": {"jobId": "j"}}));
        let refresher = Arc::new(RewritingRefresher::new(file.path(), "fresh-token"));
        let client = BqClient::with_parts(config, transport.clone(), refresher.clone());

        let request = insert_request();
        let (a, b) = tokio::join!(client.insert_job(&request), client.insert_job(&request));

        assert_eq!(a.unwrap().job_id, "j");
        assert_eq!(b.unwrap().job_id, "j");
        assert_eq!(refresher.calls(), 1);
        let tokens: Vec<_> = transport.0.requests().into_iter().map(|r| r.bearer_token).collect();
        assert_eq!(tokens, vec!["stale", "stale", "fresh-token", "fresh-token"]);
    }

    #[tokio::test]
    async fn test_no_credential_fails_before_any_request() {
        let (file, transport, refresher, _client) = setup("tok");
        let config =
            Arc::new(Config::new("stranger@example.com", "proj").with_credentials_path(file.path()));
        let client = BqClient::with_parts(config, transport.clone(), refresher);

        let err = client.insert_job(&insert_request()).await.unwrap_err();
        assert!(matches!(err, BqChainError::CredentialNotFound { .. }));
        assert_eq!(transport.request_count(), 0);
    }
}
