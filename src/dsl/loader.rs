use super::parser::{param_to_string, Pipeline, QueryDef, RawPipeline, RawQueryDef};
use crate::error::{BqChainError, Result};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::debug;

pub struct QueryLoader;

impl QueryLoader {
    pub fn new() -> Self {
        Self
    }

    pub fn load_pipeline(&self, path: impl AsRef<Path>) -> Result<Pipeline> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BqChainError::Validation(format!("cannot read pipeline {}: {}", path.display(), e))
        })?;
        let base_dir = path.parent().unwrap_or(Path::new("."));
        let pipeline = self.load_str(&content, base_dir)?;
        debug!(
            path = %path.display(),
            queries = pipeline.queries.len(),
            "Loaded pipeline"
        );
        Ok(pipeline)
    }

    /// Parses a manifest; `source:` paths resolve against `base_dir`.
    pub fn load_str(&self, content: &str, base_dir: &Path) -> Result<Pipeline> {
        let raw: RawPipeline = serde_yaml::from_str(content)?;

        let mut params = BTreeMap::new();
        for (key, value) in &raw.params {
            params.insert(key.clone(), param_to_string(key, value)?);
        }

        let mut seen = HashSet::new();
        let mut queries = Vec::with_capacity(raw.queries.len());
        for raw_query in raw.queries {
            if !seen.insert(raw_query.name.clone()) {
                return Err(BqChainError::Validation(format!(
                    "duplicate query name '{}'",
                    raw_query.name
                )));
            }
            queries.push(self.resolve_query(raw_query, base_dir)?);
        }

        Ok(Pipeline { params, queries })
    }

    fn resolve_query(&self, raw: RawQueryDef, base_dir: &Path) -> Result<QueryDef> {
        if raw.name.trim().is_empty() {
            return Err(BqChainError::Validation(
                "query name must not be empty".to_string(),
            ));
        }

        let sql = match (raw.sql, raw.source) {
            (Some(sql), None) => sql,
            (None, Some(source)) => {
                let path = base_dir.join(&source);
                std::fs::read_to_string(&path).map_err(|e| {
                    BqChainError::Validation(format!(
                        "query '{}': cannot read source {}: {}",
                        raw.name,
                        path.display(),
                        e
                    ))
                })?
            }
            (Some(_), Some(_)) => {
                return Err(BqChainError::Validation(format!(
                    "query '{}' sets both sql and source",
                    raw.name
                )))
            }
            (None, None) => {
                return Err(BqChainError::Validation(format!(
                    "query '{}' needs sql or source",
                    raw.name
                )))
            }
        };

        Ok(QueryDef {
            name: raw.name,
            description: raw.description,
            sql,
            destination_dataset: raw.destination_dataset,
            destination_table: raw.destination_table,
        })
    }
}

impl Default for QueryLoader {
    fn default() -> Self {
        Self::new()
    }
}
