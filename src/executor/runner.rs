use super::poller::{CancellationToken, CompletionPoller};
use super::results::{ResultFetcher, ResultSet};
use super::submitter::{Destination, JobSubmitter};
use crate::client::BqClient;
use crate::config::Config;
use crate::dsl::RenderedQuery;
use crate::error::Result;
use futures::stream::{self, Stream, TryStreamExt};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

/// Submits a query, waits for it, and fetches inline results.
pub struct QueryRunner {
    client: Arc<BqClient>,
    cancel: CancellationToken,
}

impl QueryRunner {
    /// Construction never reads credentials, so dry runs work without any.
    pub fn new(client: Arc<BqClient>) -> Self {
        Self {
            client,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &Config {
        self.client.config()
    }

    /// Returns `Some` only for inline queries; results written to a table
    /// are not read back.
    pub async fn run_query(
        &self,
        sql: &str,
        dataset: Option<&str>,
        table: Option<&str>,
    ) -> Result<Option<ResultSet>> {
        let destination = Destination::from_parts(dataset, table);
        self.run(sql, destination.as_ref()).await
    }

    pub async fn run_rendered(&self, query: &RenderedQuery) -> Result<Option<ResultSet>> {
        info!(query = %query.name, "Starting query");
        self.run(&query.sql, query.destination.as_ref()).await
    }

    pub async fn run(&self, sql: &str, destination: Option<&Destination>) -> Result<Option<ResultSet>> {
        let target = destination.map(|d| d.to_string());

        if self.config().dry_run {
            info!(destination = target.as_deref().unwrap_or("<inline>"), "Query dry run:\n{}", sql);
            return Ok(None);
        }

        info!(destination = target.as_deref().unwrap_or("<inline>"), "Running:\n{}", sql);
        let job = JobSubmitter::new(self.client.clone())
            .submit(sql, destination)
            .await?;

        CompletionPoller::new(self.client.clone())
            .with_cancellation(self.cancel.clone())
            .await_completion(&job)
            .await?;

        if destination.is_some() {
            info!(job_id = %job.job_id, destination = target.as_deref().unwrap_or_default(), "Query written to destination");
            return Ok(None);
        }

        let results = ResultFetcher::new(self.client.clone()).fetch(&job).await?;
        info!(job_id = %job.job_id, rows = results.len(), "Fetched query results");
        debug!(job_id = %job.job_id, "Results:\n{}", results.to_json_pretty()?);
        Ok(Some(results))
    }
}

/// Runs `ops` one after another, lazily.
///
/// Nothing starts until the stream is polled; the Nth item is produced only
/// after the first N operations have finished. The stream ends after the
/// first error.
pub fn run_in_order<I, F, Fut, T>(ops: I) -> impl Stream<Item = Result<T>>
where
    I: IntoIterator<Item = F>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    stream::unfold(Some(ops.into_iter()), |state| async move {
        let Some(mut ops) = state else {
            return None;
        };
        let Some(op) = ops.next() else {
            return None;
        };
        match op().await {
            Ok(value) => Some((Ok(value), Some(ops))),
            Err(e) => Some((Err(e), None)),
        }
    })
}

/// Drives [`run_in_order`] to the end, stopping at the first error.
pub async fn collect_in_order<I, F, Fut, T>(ops: I) -> Result<Vec<T>>
where
    I: IntoIterator<Item = F>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    run_in_order(ops).try_collect().await
}
