use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::agent::ToolStatus;
use crate::reconstruct::{Outcome, Reconstructor};
use crate::session::ConversationMessage;
use crate::timeline::{display_arguments, DisplayRecord, Timeline};

pub const APOLOGY: &str = "Sorry, I encountered an error. Please try again.";

/// Consumes `POST /api/chat` the way the web widget does, for the terminal.
#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    endpoint: String,
}

impl ChatClient {
    pub fn new(server: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: format!("{}/api/chat", server.trim_end_matches('/')),
        }
    }

    /// Sends the history and folds the streamed answer into `timeline`.
    /// `on_update` sees the timeline after every chunk that changed it.
    pub async fn ask(
        &self,
        history: &[ConversationMessage],
        timeline: Timeline,
        mut on_update: impl FnMut(&Timeline),
    ) -> anyhow::Result<(Timeline, Outcome)> {
        let resp = self
            .http
            .post(&self.endpoint)
            .json(&json!({ "messages": history }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("chat request failed: {status}: {body}");
        }

        let mut reconstructor = Reconstructor::new(timeline);
        let mut interrupted = None;
        let mut bytes = resp.bytes_stream();
        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!(error = %e, "chat stream interrupted");
                    interrupted = Some(format!("stream interrupted: {e}"));
                    break;
                }
            };
            if reconstructor.feed(&chunk) > 0 {
                on_update(reconstructor.timeline());
            }
            if reconstructor.is_finished() {
                break;
            }
        }

        let (timeline, outcome) = reconstructor.finish();
        let outcome = match interrupted {
            Some(reason) => Outcome::Failed(reason),
            None => outcome,
        };
        debug!(records = timeline.len(), ?outcome, "chat stream finished");
        Ok((timeline, outcome))
    }
}

/// Adds the user-facing apology when the run failed.
pub fn conclude(mut timeline: Timeline, outcome: &Outcome) -> Timeline {
    match outcome {
        Outcome::Completed => {}
        Outcome::Failed(reason) => {
            warn!(reason = reason.as_str(), "server reported an error");
            timeline.push(DisplayRecord::Assistant { content: APOLOGY.into() });
        }
        Outcome::Truncated => warn!("chat stream ended without a final record"),
    }
    timeline
}

fn tool_label(tool_name: &str, result: bool) -> String {
    match (tool_name, result) {
        ("search_documents" | "search_api_reference", false) => "Searching documents".into(),
        ("search_documents" | "search_api_reference", true) => "Search results".into(),
        ("read_webpage", false) => "Reading webpage".into(),
        ("read_webpage", true) => "Webpage content".into(),
        (name, false) => format!("Calling {name}"),
        (name, true) => format!("{name} result"),
    }
}

fn summarize_result(content: &str) -> String {
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Array(entries)) => {
            let mut out = format!("{} results", entries.len());
            for e in &entries {
                let title = e["title"].as_str().unwrap_or("(untitled)");
                match e["url"].as_str() {
                    Some(url) => out.push_str(&format!("\n  - {title} <{url}>")),
                    None => out.push_str(&format!("\n  - {title}")),
                }
            }
            out
        }
        _ => {
            let mut preview: String = content.chars().take(200).collect();
            if preview.len() < content.len() {
                preview.push_str("...");
            }
            preview
        }
    }
}

/// Plain-text rendering of the visible timeline.
pub fn render(timeline: &Timeline) -> String {
    timeline
        .visible()
        .into_iter()
        .map(|record| match record {
            DisplayRecord::User { content } => format!("> {content}"),
            DisplayRecord::Assistant { content } => content.trim().to_string(),
            DisplayRecord::ToolCall { tool_name, arguments } => {
                format!("[{}]\n{}", tool_label(tool_name, false), display_arguments(arguments))
            }
            DisplayRecord::ToolResult { tool_name, content, status } => {
                let label = tool_label(tool_name, true);
                match status {
                    ToolStatus::Success => format!("[{label}] {}", summarize_result(content)),
                    ToolStatus::Error => format!("[{label} failed] {}", summarize_result(content)),
                }
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
