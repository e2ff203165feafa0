use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::error::RetrievalError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct QueryBody<'a> {
    query: &'a str,
    return_metadata: bool,
    parameters: &'a Value,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
    #[serde(default)]
    entity_type: Option<String>,
    #[serde(default)]
    explanation: Option<Value>,
}

/// Client for the hosted search engine's query endpoint. No retries: a
/// failure is returned to the caller as is.
#[derive(Clone)]
pub struct RetrievalClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl RetrievalClient {
    pub fn new(base_url: &str, api_key: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http,
        }
    }

    pub async fn query(
        &self,
        engine: &str,
        query: &str,
        parameters: &Value,
    ) -> Result<Vec<SearchResult>, RetrievalError> {
        let url = format!("{}/v2/engines/{}/query", self.base_url, engine);
        let body = QueryBody { query, return_metadata: true, parameters };
        let resp = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .inspect_err(|e| error!(%url, engine, error = %e, "search request failed"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            error!(%url, engine, status = status.as_u16(), %body, query, "search engine returned an error");
            return Err(RetrievalError::Status { status: status.as_u16(), body });
        }

        let parsed: QueryResponse = resp.json().await?;
        debug!(
            engine,
            results = parsed.results.len(),
            entity_type = parsed.entity_type.as_deref().unwrap_or(""),
            explained = parsed.explanation.is_some(),
            "search engine responded"
        );
        Ok(parsed.results)
    }
}
