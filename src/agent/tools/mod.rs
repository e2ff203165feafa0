use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::retrieval::RetrievalClient;
use crate::settings::SearchSettings;

pub mod read_webpage;
pub mod search;

pub struct ToolContext<'a> {
    pub retrieval: &'a RetrievalClient,
    pub http: &'a reqwest::Client,
}

/// Failures are outputs too, flagged with `is_error`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self { content: content.into(), is_error: false }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self { content: content.into(), is_error: true }
    }
}

pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = ToolOutput> + Send + 'a>>;

pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn input_schema(&self) -> Value;
    fn run<'a>(&'a self, ctx: ToolContext<'a>, args: Value) -> ToolFuture<'a>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_tools(search: &SearchSettings) -> Self {
        let mut r = Self::new();
        r.register(Box::new(search::SearchTool::documents(&search.docs_site_url)));
        r.register(Box::new(search::SearchTool::api_reference()));
        r.register(Box::new(read_webpage::ReadWebpageTool));
        r
    }

    pub fn register(&mut self, t: Box<dyn Tool>) {
        self.tools.push(t);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().map(|b| b.as_ref()).find(|t| t.name() == name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn definitions(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name(),
                    "description": t.description(),
                    "input_schema": t.input_schema(),
                })
            })
            .collect()
    }

    /// Runs one tool call and reports how long it took. An unknown name is
    /// answered with an error output rather than failing the run.
    pub async fn dispatch(
        &self,
        ctx: ToolContext<'_>,
        name: &str,
        args: Value,
    ) -> (ToolOutput, Duration) {
        let started = Instant::now();
        let Some(tool) = self.get(name) else {
            warn!(tool = name, "model requested an unknown tool");
            metrics::counter!("tool_calls_total", "tool" => "unknown", "status" => "error").increment(1);
            return (ToolOutput::error(format!("Error: unknown tool '{name}'")), started.elapsed());
        };

        let output = tool.run(ctx, args).await;
        let elapsed = started.elapsed();
        let status = if output.is_error { "error" } else { "success" };
        metrics::counter!("tool_calls_total", "tool" => tool.name(), "status" => status).increment(1);
        metrics::histogram!("tool_duration_seconds", "tool" => tool.name()).record(elapsed.as_secs_f64());
        info!(tool = tool.name(), status, elapsed_ms = elapsed.as_millis() as u64, "tool call finished");
        (output, elapsed)
    }
}

/// Reads a required string argument.
pub(crate) fn str_arg<'v>(args: &'v Value, key: &str) -> Option<&'v str> {
    args.get(key).and_then(|v| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl Tool for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }
        fn description(&self) -> &'static str {
            "Echoes its input"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }
        fn run<'a>(&'a self, _ctx: ToolContext<'a>, args: Value) -> ToolFuture<'a> {
            Box::pin(async move {
                match str_arg(&args, "text") {
                    Some(text) => ToolOutput::ok(text),
                    None => ToolOutput::error("missing text"),
                }
            })
        }
    }

    fn ctx_parts() -> (RetrievalClient, reqwest::Client) {
        let http = reqwest::Client::new();
        (RetrievalClient::new("http://127.0.0.1:9", "k", http.clone()), http)
    }

    #[test]
    fn default_tools_declare_name_description_and_schema() {
        let registry = ToolRegistry::with_default_tools(&crate::settings::Settings::default().search);
        assert_eq!(registry.names(), vec!["search_documents", "search_api_reference", "read_webpage"]);
        for def in registry.definitions() {
            assert!(def["description"].as_str().is_some_and(|d| !d.is_empty()));
            assert_eq!(def["input_schema"]["type"], "object");
        }
    }

    #[tokio::test]
    async fn dispatch_runs_the_named_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(Echo));
        let (retrieval, http) = ctx_parts();
        let ctx = ToolContext { retrieval: &retrieval, http: &http };
        let (out, _) = registry.dispatch(ctx, "echo", json!({"text": "hi"})).await;
        assert_eq!(out, ToolOutput::ok("hi"));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_output() {
        let registry = ToolRegistry::new();
        let (retrieval, http) = ctx_parts();
        let ctx = ToolContext { retrieval: &retrieval, http: &http };
        let (out, _) = registry.dispatch(ctx, "delete_everything", json!({})).await;
        assert!(out.is_error);
        assert!(out.content.contains("delete_everything"));
    }
}
