use crate::client::{BqClient, JobReference, QueryResultsResponse, TableRow, TableSchema};
use crate::error::{BqChainError, Result};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Column name to raw cell value, in schema order.
pub type ResultRow = IndexMap<String, serde_json::Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    pub fields: Vec<String>,
    pub rows: Vec<ResultRow>,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows as a JSON array of objects, keeping column order.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.rows)?)
    }
}

pub fn field_names(schema: &TableSchema) -> Vec<String> {
    schema.fields.iter().map(|f| f.name.clone()).collect()
}

pub fn decode_row(fields: &[String], row: TableRow) -> Result<ResultRow> {
    if row.cells.len() != fields.len() {
        return Err(BqChainError::ProtocolViolation(format!(
            "row has {} values but schema has {} fields",
            row.cells.len(),
            fields.len()
        )));
    }
    Ok(fields
        .iter()
        .cloned()
        .zip(row.cells.into_iter().map(|cell| cell.value))
        .collect())
}

/// Decodes one results page. A page without rows is an empty result set.
pub fn decode_results(response: QueryResultsResponse) -> Result<ResultSet> {
    let rows = response.rows.unwrap_or_default();
    let fields = match &response.schema {
        Some(schema) => field_names(schema),
        None if rows.is_empty() => Vec::new(),
        None => {
            return Err(BqChainError::ProtocolViolation(
                "query results contain rows but no schema".to_string(),
            ))
        }
    };

    let rows = rows
        .into_iter()
        .map(|row| decode_row(&fields, row))
        .collect::<Result<Vec<_>>>()?;

    Ok(ResultSet { fields, rows })
}

pub struct ResultFetcher {
    client: Arc<BqClient>,
}

impl ResultFetcher {
    pub fn new(client: Arc<BqClient>) -> Self {
        Self { client }
    }

    /// Fetches every page of a finished job's results.
    pub async fn fetch(&self, job: &JobReference) -> Result<ResultSet> {
        let first = self.client.get_query_results(job, None).await?;
        let mut page_token = first.page_token.clone();
        let mut result = decode_results(first)?;

        let mut seen = HashSet::new();
        while let Some(token) = page_token.take() {
            if !seen.insert(token.clone()) {
                return Err(BqChainError::ProtocolViolation(format!(
                    "results for job {} repeated page token {}",
                    job.job_id, token
                )));
            }
            debug!(job_id = %job.job_id, rows = result.len(), "Fetching next results page");
            let page = self.client.get_query_results(job, Some(&token)).await?;
            page_token = page.page_token.clone();
            let decoded = decode_results(page)?;

            if decoded.is_empty() {
                continue;
            }
            if decoded.fields != result.fields {
                return Err(BqChainError::ProtocolViolation(format!(
                    "results page for job {} has fields {:?}, expected {:?}",
                    job.job_id, decoded.fields, result.fields
                )));
            }
            result.rows.extend(decoded.rows);
        }

        Ok(result)
    }
}
