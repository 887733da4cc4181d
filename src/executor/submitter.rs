use crate::client::{
    BqClient, JobConfiguration, JobConfigurationQuery, JobInsertRequest, JobReference,
    TableReference, WRITE_TRUNCATE,
};
use crate::error::Result;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Destination {
    pub dataset: String,
    pub table: String,
}

impl Destination {
    pub fn new(dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    /// A destination exists only when both parts are present and non-empty.
    pub fn from_parts(dataset: Option<&str>, table: Option<&str>) -> Option<Self> {
        match (dataset, table) {
            (Some(dataset), Some(table)) if !dataset.is_empty() && !table.is_empty() => {
                Some(Self::new(dataset, table))
            }
            _ => None,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

pub fn build_job_request(
    sql: &str,
    destination: Option<&Destination>,
    project: &str,
) -> JobInsertRequest {
    let destination_table = destination.map(|d| TableReference {
        project_id: project.to_string(),
        dataset_id: d.dataset.clone(),
        table_id: d.table.clone(),
    });

    JobInsertRequest {
        configuration: JobConfiguration {
            query: JobConfigurationQuery {
                query: sql.to_string(),
                allow_large_results: destination_table.is_some(),
                write_disposition: WRITE_TRUNCATE.to_string(),
                destination_table,
            },
        },
    }
}

pub struct JobSubmitter {
    client: Arc<BqClient>,
}

impl JobSubmitter {
    pub fn new(client: Arc<BqClient>) -> Self {
        Self { client }
    }

    pub async fn submit(&self, sql: &str, destination: Option<&Destination>) -> Result<JobReference> {
        let request = build_job_request(sql, destination, &self.client.config().project);
        let job = self.client.insert_job(&request).await?;

        match destination {
            Some(dest) => info!(job_id = %job.job_id, destination = %dest, "Submitted query job"),
            None => info!(job_id = %job.job_id, "Submitted query job"),
        }
        Ok(job)
    }
}
