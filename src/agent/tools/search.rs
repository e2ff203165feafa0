use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::error;

use super::{str_arg, Tool, ToolContext, ToolFuture, ToolOutput};
use crate::retrieval::SearchResult;

const MAX_RESULTS: usize = 15;

const MODE_DESCRIPTION: &str = "The search mode. \
Choose \"vector\" for semantic search: to return docs containing similar semantic meaning or phrase content to the input. \
Choose \"lexical\" for BM25 lexical search: to return docs with specific keywords or IDs. \
Choose \"hybrid\" for a mix of strategies: 50% vector and 50% lexical.";

static EXTENSION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.[^/.]+$").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static NON_ANCHOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9-]").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Vector,
    Lexical,
    Hybrid,
}

impl FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vector" => Ok(SearchMode::Vector),
            "lexical" => Ok(SearchMode::Lexical),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(format!("unknown search mode: {other}")),
        }
    }
}

/// ShapedQL for one search. `$query` is bound from the parameters map by the
/// engine; the hybrid form runs both retrievers in a single query.
pub fn build_query(mode: SearchMode, embedding_ref: &str) -> String {
    match mode {
        SearchMode::Vector => format!(
            "SELECT * FROM text_search(query='$query', mode='vector', text_embedding_ref='{embedding_ref}') LIMIT 20"
        ),
        SearchMode::Lexical => {
            "SELECT * FROM text_search(query='$query', mode='lexical', fuzziness=0) LIMIT 20".to_string()
        }
        SearchMode::Hybrid => format!(
            "SELECT * FROM text_search(query='$query', mode='lexical', limit=10), \
             text_search(query='$query', mode='vector', text_embedding_ref='{embedding_ref}', limit=10) LIMIT 20"
        ),
    }
}

/// How a result's link is produced.
#[derive(Debug, Clone)]
pub enum UrlStyle {
    /// `<site>/<file_path without extension>#<heading anchor>`
    DocsSite(String),
    /// `metadata.file_path` as stored.
    FilePath,
}

impl UrlStyle {
    fn url_for(&self, metadata: &Map<String, Value>) -> Value {
        match self {
            UrlStyle::DocsSite(site) => Value::String(docs_url(site, metadata)),
            UrlStyle::FilePath => metadata.get("file_path").cloned().unwrap_or(Value::Null),
        }
    }
}

pub fn docs_url(site: &str, metadata: &Map<String, Value>) -> String {
    let file_path = metadata.get("file_path").and_then(Value::as_str).unwrap_or_default();
    let base_path = EXTENSION.replace(file_path.trim_start_matches('/'), "");
    let heading = ["h4", "h3", "h2", "h1"]
        .iter()
        .filter_map(|h| metadata.get(*h).and_then(Value::as_str))
        .find(|text| !text.is_empty());
    let anchor = heading.map(|h| format!("#{}", heading_anchor(h))).unwrap_or_default();
    format!("{}/{}{}", site.trim_end_matches('/'), base_path, anchor)
}

fn heading_anchor(heading: &str) -> String {
    let lower = heading.to_lowercase();
    let hyphenated = WHITESPACE.replace_all(&lower, "-");
    NON_ANCHOR.replace_all(&hyphenated, "").into_owned()
}

/// Search over one indexed corpus: the documentation site or the API reference.
pub struct SearchTool {
    name: &'static str,
    description: &'static str,
    query_hint: &'static str,
    corpus: &'static str,
    engine: &'static str,
    embedding_ref: &'static str,
    urls: UrlStyle,
}

impl SearchTool {
    pub fn documents(docs_site_url: &str) -> Self {
        Self {
            name: "search_documents",
            description: "Search the Shaped documentation for relevant content about a given topic",
            query_hint: "The search query to find relevant documents",
            corpus: "documentation",
            engine: "agent_rag_search_engine",
            embedding_ref: "text_content_embedding",
            urls: UrlStyle::DocsSite(docs_site_url.to_string()),
        }
    }

    pub fn api_reference() -> Self {
        Self {
            name: "search_api_reference",
            description: "Search the Shaped API reference for relevant content about a given topic",
            query_hint: "The search query to find relevant API content",
            corpus: "API reference",
            engine: "api_docs_search_engine",
            embedding_ref: "api_content_embedding",
            urls: UrlStyle::FilePath,
        }
    }

    pub fn format_results(&self, results: &[SearchResult]) -> String {
        let entries: Vec<Value> = results
            .iter()
            .take(MAX_RESULTS)
            .map(|r| {
                json!({
                    "title": r.metadata.get("name").cloned().unwrap_or(Value::Null),
                    "content": r.metadata.get("content").cloned().unwrap_or(Value::Null),
                    "url": self.urls.url_for(&r.metadata),
                })
            })
            .collect();
        Value::Array(entries).to_string()
    }
}

impl Tool for SearchTool {
    fn name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        self.description
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": self.query_hint },
                "mode": {
                    "type": "string",
                    "enum": ["vector", "lexical", "hybrid"],
                    "description": MODE_DESCRIPTION,
                }
            },
            "required": ["query", "mode"]
        })
    }

    fn run<'a>(&'a self, ctx: ToolContext<'a>, args: Value) -> ToolFuture<'a> {
        Box::pin(async move {
            let Some(query) = str_arg(&args, "query") else {
                return ToolOutput::error(json!({ "error": "Missing required field: query" }).to_string());
            };
            let Some(mode) = str_arg(&args, "mode").and_then(|m| m.parse::<SearchMode>().ok()) else {
                return ToolOutput::error(json!({ "error": "Invalid search mode" }).to_string());
            };

            let ql = build_query(mode, self.embedding_ref);
            match ctx.retrieval.query(self.engine, &ql, &json!({ "query": query })).await {
                Ok(results) => ToolOutput::ok(self.format_results(&results)),
                Err(e) => {
                    error!(tool = self.name, query, ?mode, error = %e, "search failed");
                    ToolOutput::error(
                        json!({
                            "error": "Search failed",
                            "details": e.to_string(),
                            "message": format!(
                                "I encountered an error while searching the {}. The search service may be temporarily unavailable.",
                                self.corpus
                            ),
                        })
                        .to_string(),
                    )
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::tests::fake_engine;
    use crate::retrieval::RetrievalClient;
    use axum::http::StatusCode;

    fn meta(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn hybrid_query_combines_both_retrievers() {
        let ql = build_query(SearchMode::Hybrid, "text_content_embedding");
        assert_eq!(ql.matches("text_search(").count(), 2);
        assert!(ql.contains("mode='lexical', limit=10"));
        assert!(ql.contains("text_embedding_ref='text_content_embedding', limit=10"));
        assert!(ql.ends_with("LIMIT 20"));

        assert!(build_query(SearchMode::Lexical, "x").contains("fuzziness=0"));
        assert!(build_query(SearchMode::Vector, "api_content_embedding")
            .contains("text_embedding_ref='api_content_embedding'"));
    }

    #[test]
    fn docs_url_uses_most_specific_heading() {
        let m = meta(json!({
            "file_path": "guides/feature-views.md",
            "h1": "Feature Views",
            "h2": "Creating a View!",
            "h3": "",
        }));
        assert_eq!(
            docs_url("https://docs.shaped.ai/docs/v2/", &m),
            "https://docs.shaped.ai/docs/v2/guides/feature-views#creating-a-view"
        );

        let no_heading = meta(json!({ "file_path": "overview/intro.mdx" }));
        assert_eq!(
            docs_url("https://docs.shaped.ai/docs/v2", &no_heading),
            "https://docs.shaped.ai/docs/v2/overview/intro"
        );
    }

    #[test]
    fn heading_anchor_collapses_whitespace_and_strips_symbols() {
        assert_eq!(heading_anchor("Two  Tower\tModel (v2)"), "two-tower-model-v2");
    }

    #[test]
    fn api_reference_urls_are_the_file_path() {
        let tool = SearchTool::api_reference();
        let results = vec![SearchResult {
            id: "1".into(),
            score: 1.0,
            metadata: meta(json!({
                "name": "Query",
                "content": "POST /v2/engines/{name}/query",
                "file_path": "https://docs.shaped.ai/api#query"
            })),
        }];
        let out: Value = serde_json::from_str(&tool.format_results(&results)).unwrap();
        assert_eq!(out[0]["url"], "https://docs.shaped.ai/api#query");
        assert_eq!(out[0]["title"], "Query");
    }

    #[tokio::test]
    async fn hybrid_search_issues_one_query_and_returns_at_most_fifteen() {
        let results: Vec<Value> = (0..20)
            .map(|i| {
                json!({
                    "id": format!("doc-{i}"),
                    "score": 1.0 - i as f64 / 100.0,
                    "metadata": {
                        "name": format!("Doc {i}"),
                        "content": "Two-tower models learn user and item embeddings.",
                        "file_path": "models/two-tower.md",
                        "h1": "Two-Tower Model"
                    }
                })
            })
            .collect();
        let (base, seen) = fake_engine(StatusCode::OK, Value::Array(results)).await;
        let http = reqwest::Client::new();
        let retrieval = RetrievalClient::new(&base, "k", http.clone());
        let tool = SearchTool::documents("https://docs.shaped.ai/docs/v2");

        let out = tool
            .run(
                ToolContext { retrieval: &retrieval, http: &http },
                json!({ "query": "two-tower model", "mode": "hybrid" }),
            )
            .await;

        assert!(!out.is_error);
        let entries: Vec<Value> = serde_json::from_str(&out.content).unwrap();
        assert_eq!(entries.len(), 15);
        for e in &entries {
            let keys: Vec<&String> = e.as_object().unwrap().keys().collect();
            assert_eq!(keys.len(), 3);
            assert!(e["title"].is_string() && e["content"].is_string() && e["url"].is_string());
        }
        assert_eq!(entries[0]["url"], "https://docs.shaped.ai/docs/v2/models/two-tower#two-tower-model");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let (engine, _, body) = &seen[0];
        assert_eq!(engine, "agent_rag_search_engine");
        assert_eq!(body["parameters"]["query"], "two-tower model");
        let ql = body["query"].as_str().unwrap();
        assert!(ql.contains("mode='lexical'") && ql.contains("mode='vector'"));
    }

    #[tokio::test]
    async fn invalid_mode_is_reported_without_querying() {
        let (base, seen) = fake_engine(StatusCode::OK, json!([])).await;
        let http = reqwest::Client::new();
        let retrieval = RetrievalClient::new(&base, "k", http.clone());
        let tool = SearchTool::documents("https://docs.shaped.ai/docs/v2");
        let out = tool
            .run(ToolContext { retrieval: &retrieval, http: &http }, json!({ "query": "x", "mode": "fuzzy" }))
            .await;
        assert_eq!(out.content, r#"{"error":"Invalid search mode"}"#);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn retrieval_failure_becomes_search_failed_output() {
        let (base, _seen) = fake_engine(StatusCode::INTERNAL_SERVER_ERROR, json!([])).await;
        let http = reqwest::Client::new();
        let retrieval = RetrievalClient::new(&base, "k", http.clone());
        let tool = SearchTool::api_reference();
        let out = tool
            .run(ToolContext { retrieval: &retrieval, http: &http }, json!({ "query": "x", "mode": "vector" }))
            .await;
        assert!(out.is_error);
        let v: Value = serde_json::from_str(&out.content).unwrap();
        assert_eq!(v["error"], "Search failed");
        assert!(v["details"].as_str().unwrap().contains("500"));
        assert!(v["message"].as_str().unwrap().contains("API reference"));
    }
}
