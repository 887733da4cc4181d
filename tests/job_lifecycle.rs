use async_trait::async_trait;
use bqchain::{
    collect_in_order, BackoffConfig, BqChainError, BqClient, Config, Method, MockTransport,
    QueryLoader, QueryRunner, TokenRefresher,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const ACCOUNT: &str = "analyst@example.com";

fn write_store(path: &Path, access_token: &str) {
    let content = json!({
        "data": [{
            "key": {"account": ACCOUNT, "type": "google-cloud-sdk"},
            "credential": {"access_token": access_token, "refresh_token": "1//refresh"}
        }],
        "file_version": 1
    });
    std::fs::write(path, content.to_string()).unwrap();
}

struct FileRefresher {
    path: PathBuf,
    calls: AtomicUsize,
}

#[async_trait]
impl TokenRefresher for FileRefresher {
    async fn refresh(&self, _account: &str) -> bqchain::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        write_store(&self.path, "refreshed");
        Ok(())
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    transport: Arc<MockTransport>,
    refresher: Arc<FileRefresher>,
    runner: QueryRunner,
}

fn harness(dry_run: bool, with_store: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("credentials");
    if with_store {
        write_store(&store, "expired");
    }
    let config = Config::new(ACCOUNT, "warehouse")
        .with_credentials_path(&store)
        .with_api_base_url("http://bq.test/bigquery/v2")
        .with_dry_run(dry_run)
        .with_backoff(BackoffConfig::with_unit(Duration::from_millis(1)));
    let transport = Arc::new(MockTransport::new());
    let refresher = Arc::new(FileRefresher {
        path: store,
        calls: AtomicUsize::new(0),
    });
    let client = Arc::new(BqClient::with_parts(
        Arc::new(config),
        transport.clone(),
        refresher.clone(),
    ));
    Harness {
        _dir: dir,
        transport,
        refresher,
        runner: QueryRunner::new(client),
    }
}

#[tokio::test]
async fn test_expired_token_refreshed_then_job_completes() {
    let h = harness(false, true);
    h.transport.push_response(401, json!({"error": {"code": 401, "status": "UNAUTHENTICATED"}}));
    h.transport.push_response(200, json!({"jobReference": {"jobId": "job_7", "location": "US"}}));
    h.transport.push_response(200, json!({"status": {"state": "PENDING"}}));
    h.transport.push_response(200, json!({"status": {"state": "DONE"}}));
    h.transport.push_response(
        200,
        json!({
            "schema": {"fields": [{"name": "country"}, {"name": "users"}]},
            "rows": [
                {"f": [{"v": "NZ"}, {"v": "12"}]},
                {"f": [{"v": "AU"}, {"v": "40"}]}
            ],
            "totalRows": "2",
            "jobComplete": true
        }),
    );

    let results = h
        .runner
        .run_query("SELECT country, COUNT(*) AS users FROM t GROUP BY 1", None, None)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(h.refresher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(results.fields, vec!["country", "users"]);
    assert_eq!(results.rows[1]["country"], json!("AU"));

    let requests = h.transport.requests();
    assert_eq!(requests.len(), 5);
    assert_eq!(requests[0].bearer_token, "expired");
    assert!(requests[1..].iter().all(|r| r.bearer_token == "refreshed"));
    assert_eq!(requests[0].method, Method::Post);
    assert_eq!(
        requests[2].url,
        "http://bq.test/bigquery/v2/projects/warehouse/jobs/job_7?location=US"
    );
    assert_eq!(
        requests[4].url,
        "http://bq.test/bigquery/v2/projects/warehouse/queries/job_7?location=US"
    );
}

#[tokio::test]
async fn test_results_unauthorized_twice_is_authorization_error() {
    let h = harness(false, true);
    h.transport.push_response(200, json!({"jobReference": {"jobId": "job_8"}}));
    h.transport.push_response(200, json!({"status": {"state": "DONE"}}));
    h.transport.push_response(401, json!({}));
    h.transport.push_response(401, json!({}));

    let err = h.runner.run_query("SELECT 1", None, None).await.unwrap_err();

    assert!(matches!(err, BqChainError::Authorization { .. }));
    assert_eq!(h.transport.request_count(), 4);
    assert_eq!(h.refresher.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_pipeline_runs_queries_in_declared_order() {
    let h = harness(false, true);
    for job in ["job_stage", "job_report"] {
        h.transport.push_response(200, json!({"jobReference": {"jobId": job}}));
        h.transport.push_response(200, json!({"status": {"state": "RUNNING"}}));
        h.transport.push_response(200, json!({"status": {"state": "DONE"}}));
    }
    h.transport.push_response(
        200,
        json!({"schema": {"fields": [{"name": "n"}]}, "rows": [{"f": [{"v": "3"}]}]}),
    );

    let manifest = r#"
params:
  output_dataset: staging
  day: "20240301"
queries:
  - name: stage
    destination_table: events_{day}
    sql: SELECT * FROM raw.events WHERE day = '{day}'
  - name: report
    sql: SELECT COUNT(*) AS n FROM staging.events_{day}
"#;
    let pipeline = QueryLoader::new().load_str(manifest, Path::new(".")).unwrap();
    let queries = pipeline.render(&BTreeMap::new()).unwrap();

    let runner = &h.runner;
    let outcomes = collect_in_order(queries.iter().map(|q| move || runner.run_rendered(q)))
        .await
        .unwrap();

    assert!(outcomes[0].is_none());
    assert_eq!(outcomes[1].as_ref().unwrap().rows[0]["n"], json!("3"));

    let requests = h.transport.requests();
    let posts: Vec<_> = requests.iter().filter(|r| r.method == Method::Post).collect();
    assert_eq!(posts.len(), 2);
    let first = &posts[0].body.as_ref().unwrap()["configuration"]["query"];
    assert_eq!(first["allowLargeResults"], json!(true));
    assert_eq!(
        first["destinationTable"],
        json!({"projectId": "warehouse", "datasetId": "staging", "tableId": "events_20240301"})
    );
    let second = &posts[1].body.as_ref().unwrap()["configuration"]["query"];
    assert_eq!(second["allowLargeResults"], json!(false));
    assert!(second.get("destinationTable").is_none());

    // The report job is only created after the staging job reported DONE.
    let report_post = requests
        .iter()
        .position(|r| r.method == Method::Post && r.body.as_ref().unwrap().to_string().contains("COUNT"))
        .unwrap();
    assert_eq!(report_post, 3);
}

#[tokio::test]
async fn test_dry_run_needs_no_credentials() {
    let h = harness(true, false);

    let outcome = h
        .runner
        .run_query("SELECT 1", Some("d"), Some("t"))
        .await
        .unwrap();

    assert!(outcome.is_none());
    assert_eq!(h.transport.request_count(), 0);
    assert_eq!(h.refresher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_credential_is_reported_before_submitting() {
    let h = harness(false, false);

    let err = h.runner.run_query("SELECT 1", None, None).await.unwrap_err();

    assert!(err.to_string().contains(ACCOUNT));
    assert_eq!(h.transport.request_count(), 0);
}
