// Query endpoint executor

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::ApiError;
use crate::http_client::QboHttpClient;

/// Entity name after the FROM keyword
static FROM_ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)\bFROM\s+([A-Za-z][A-Za-z0-9_]*)").unwrap());

/// One matched entity, field name to value
pub type QueryRecord = Map<String, Value>;

/// Runs query statements against the company query endpoint
///
/// Shares the single refresh-and-retry policy of report fetches.
pub struct QueryExecutor {
    http_client: Arc<QboHttpClient>,
}

impl QueryExecutor {
    pub fn new(http_client: Arc<QboHttpClient>) -> Self {
        Self { http_client }
    }

    /// Run `statement`, reading the collection named by its FROM clause
    pub async fn query(&self, statement: &str) -> Result<Vec<QueryRecord>, ApiError> {
        match entity_name(statement) {
            Some(entity) => self.query_entity(statement, &entity).await,
            None => {
                tracing::warn!("No FROM entity in query, result collection unknown");
                let envelope = self.send(statement).await?;
                Ok(records_from(&envelope, None))
            }
        }
    }

    /// Run `statement`, reading the `entity` collection from the envelope
    pub async fn query_entity(
        &self,
        statement: &str,
        entity: &str,
    ) -> Result<Vec<QueryRecord>, ApiError> {
        let envelope = self.send(statement).await?;
        let records = records_from(&envelope, Some(entity));
        tracing::info!(entity = %entity, records = records.len(), "Query returned");
        Ok(records)
    }

    async fn send(&self, statement: &str) -> Result<Value, ApiError> {
        let statement = statement.trim();
        tracing::debug!(query = %statement, "Running QBO query");
        let params = vec![("query".to_string(), statement.to_string())];
        self.http_client.get_json(&["query"], &params, "query").await
    }
}

/// Entity named in the statement's FROM clause
pub fn entity_name(statement: &str) -> Option<String> {
    FROM_ENTITY
        .captures(statement)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Records under `QueryResponse.<entity>`, empty when absent
///
/// Entity lookup is case-insensitive. Without an entity nothing can be selected.
pub fn records_from(envelope: &Value, entity: Option<&str>) -> Vec<QueryRecord> {
    let (Some(response), Some(entity)) = (
        envelope.get("QueryResponse").and_then(|r| r.as_object()),
        entity,
    ) else {
        return Vec::new();
    };

    response
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(entity))
        .and_then(|(_, value)| value.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_object().cloned())
                .collect()
        })
        .unwrap_or_default()
}
