use super::template::render;
use crate::error::{BqChainError, Result};
use crate::executor::Destination;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const OUTPUT_DATASET_PARAM: &str = "output_dataset";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawPipeline {
    #[serde(default)]
    pub params: BTreeMap<String, serde_yaml::Value>,
    pub queries: Vec<RawQueryDef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawQueryDef {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub source: Option<PathBuf>,
    #[serde(default)]
    pub destination_dataset: Option<String>,
    #[serde(default)]
    pub destination_table: Option<String>,
}

/// A query as declared, with its SQL and destination still templated.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDef {
    pub name: String,
    pub description: Option<String>,
    pub sql: String,
    pub destination_dataset: Option<String>,
    pub destination_table: Option<String>,
}

/// A query ready to submit.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedQuery {
    pub name: String,
    pub sql: String,
    pub destination: Option<Destination>,
}

impl QueryDef {
    /// Renders SQL and destination, applying the both-or-neither destination rule.
    ///
    /// A table without an explicit dataset falls back to the `output_dataset`
    /// parameter. An explicit dataset without a table is rejected.
    pub fn render(&self, params: &BTreeMap<String, String>) -> Result<RenderedQuery> {
        let sql = render(&self.sql, params).map_err(|e| self.context(e))?;
        let table = self.render_part(self.destination_table.as_deref(), params)?;
        let dataset = self.render_part(self.destination_dataset.as_deref(), params)?;

        let destination = match (dataset, table) {
            (Some(dataset), Some(table)) => Some(Destination::new(dataset, table)),
            (None, Some(table)) => {
                let dataset = self.render_part(
                    params.get(OUTPUT_DATASET_PARAM).map(String::as_str),
                    params,
                )?;
                match dataset {
                    Some(dataset) => Some(Destination::new(dataset, table)),
                    None => {
                        return Err(BqChainError::Validation(format!(
                            "query '{}' writes to table '{}' but has no destination_dataset and no '{}' param",
                            self.name, table, OUTPUT_DATASET_PARAM
                        )))
                    }
                }
            }
            (Some(dataset), None) => {
                return Err(BqChainError::Validation(format!(
                    "query '{}' sets destination_dataset '{}' without destination_table",
                    self.name, dataset
                )))
            }
            (None, None) => None,
        };

        Ok(RenderedQuery {
            name: self.name.clone(),
            sql,
            destination,
        })
    }

    fn render_part(
        &self,
        template: Option<&str>,
        params: &BTreeMap<String, String>,
    ) -> Result<Option<String>> {
        let Some(template) = template else {
            return Ok(None);
        };
        let value = render(template, params).map_err(|e| self.context(e))?;
        let value = value.trim();
        Ok((!value.is_empty()).then(|| value.to_string()))
    }

    fn context(&self, err: BqChainError) -> BqChainError {
        match err {
            BqChainError::Template(msg) => {
                BqChainError::Template(format!("query '{}': {}", self.name, msg))
            }
            other => other,
        }
    }
}

/// Ordered queries plus the parameters declared alongside them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    pub params: BTreeMap<String, String>,
    pub queries: Vec<QueryDef>,
}

impl Pipeline {
    /// Pipeline params overlaid with `overrides`, which win on conflict.
    pub fn effective_params(&self, overrides: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut params = self.params.clone();
        params.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        params
    }

    pub fn render(&self, overrides: &BTreeMap<String, String>) -> Result<Vec<RenderedQuery>> {
        let params = self.effective_params(overrides);
        self.queries.iter().map(|q| q.render(&params)).collect()
    }

    /// Keeps only the named queries, in pipeline order.
    pub fn select(&self, names: &[String]) -> Result<Pipeline> {
        if let Some(unknown) = names
            .iter()
            .find(|name| !self.queries.iter().any(|q| &q.name == *name))
        {
            return Err(BqChainError::Validation(format!(
                "pipeline has no query named '{}'",
                unknown
            )));
        }
        Ok(Pipeline {
            params: self.params.clone(),
            queries: self
                .queries
                .iter()
                .filter(|q| names.contains(&q.name))
                .cloned()
                .collect(),
        })
    }
}

pub(crate) fn param_to_string(key: &str, value: &serde_yaml::Value) -> Result<String> {
    match value {
        serde_yaml::Value::String(s) => Ok(s.clone()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        _ => Err(BqChainError::Validation(format!(
            "param '{}' must be a string, number or boolean",
            key
        ))),
    }
}
