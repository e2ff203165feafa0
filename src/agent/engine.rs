use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::agent::event::{AgentEvent, MessageContent, ToolStatus};
use crate::agent::prompt::build_system_prompt;
use crate::agent::tools::{ToolContext, ToolRegistry};
use crate::error::AgentError;
use crate::models::{AnthropicMessages, BlockStart, LanguageModel, ModelChunk, ModelRequest};
use crate::retrieval::RetrievalClient;
use crate::session::ConversationMessage;
use crate::settings::{ModelSettings, Settings};

const EVENT_BUFFER: usize = 256;

/// Wall-clock time one run spent in tools, summed per tool name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunTimings {
    pub tools: BTreeMap<String, Duration>,
}

impl RunTimings {
    pub fn record(&mut self, tool: &str, elapsed: Duration) {
        *self.tools.entry(tool.to_string()).or_default() += elapsed;
    }

    pub fn tool_total(&self) -> Duration {
        self.tools.values().sum()
    }

    fn log_summary(&self, run_id: Uuid, total: Duration) {
        let tools = self.tool_total();
        info!(
            %run_id,
            total_ms = total.as_millis() as u64,
            model_ms_estimate = total.saturating_sub(tools).as_millis() as u64,
            tools_ms = tools.as_millis() as u64,
            "run summary"
        );
        for (tool, elapsed) in &self.tools {
            info!(%run_id, tool = tool.as_str(), elapsed_ms = elapsed.as_millis() as u64, "run summary: tool");
        }
    }
}

/// Handle to one in-flight run. Events arrive on `events` in order and the
/// channel closes after `Done` or `Error`, or silently on cancellation.
pub struct AgentRun {
    pub run_id: Uuid,
    pub events: mpsc::Receiver<AgentEvent>,
    pub cancel: CancellationToken,
    pub finished: JoinHandle<RunTimings>,
}

pub struct Agent {
    model: Arc<dyn LanguageModel>,
    tools: ToolRegistry,
    system_prompt: String,
    model_settings: ModelSettings,
    max_steps: usize,
    retrieval: RetrievalClient,
    http: reqwest::Client,
}

impl Agent {
    pub fn new(model: Arc<dyn LanguageModel>, tools: ToolRegistry, settings: &Settings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.fetch_timeout_secs))
            .build()?;
        let retrieval = RetrievalClient::new(
            &settings.search.base_url,
            settings.search.api_key.clone().unwrap_or_default(),
            http.clone(),
        );
        Ok(Self {
            model,
            tools,
            system_prompt: build_system_prompt(&settings.search.docs_site_url),
            model_settings: settings.model.clone(),
            max_steps: settings.max_steps,
            retrieval,
            http,
        })
    }

    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        if settings.search.api_key.is_none() {
            anyhow::bail!("SEARCH_API_KEY is not set");
        }
        let model = AnthropicMessages::from_settings(&settings.model)?;
        let tools = ToolRegistry::with_default_tools(&settings.search);
        info!(model = %settings.model.model, tools = ?tools.names(), "agent built");
        Self::new(Arc::new(model), tools, settings)
    }

    pub fn run(self: &Arc<Self>, history: Vec<ConversationMessage>) -> AgentRun {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let run_id = Uuid::new_v4();

        let agent = Arc::clone(self);
        let cancel_clone = cancel.clone();
        let finished = tokio::spawn(async move {
            let started = Instant::now();
            let mut timings = RunTimings::default();
            info!(%run_id, turns = history.len(), "run started");

            let result = tokio::select! {
                _ = cancel_clone.cancelled() => Err(AgentError::Cancelled),
                res = agent.drive(run_id, history, &tx, &mut timings) => res,
            };

            let outcome = match result {
                Ok(()) => {
                    let _ = tx.send(AgentEvent::Done).await;
                    "done"
                }
                Err(AgentError::Cancelled) => {
                    info!(%run_id, "run cancelled by client");
                    "cancelled"
                }
                Err(e) => {
                    error!(%run_id, error = %e, "run failed");
                    let _ = tx.send(AgentEvent::Error { message: e.to_string() }).await;
                    "error"
                }
            };
            metrics::counter!("agent_runs_total", "outcome" => outcome).increment(1);
            timings.log_summary(run_id, started.elapsed());
            timings
        });

        AgentRun { run_id, events: rx, cancel, finished }
    }

    async fn drive(
        &self,
        run_id: Uuid,
        history: Vec<ConversationMessage>,
        tx: &mpsc::Sender<AgentEvent>,
        timings: &mut RunTimings,
    ) -> Result<(), AgentError> {
        let mut messages: Vec<Value> = history
            .iter()
            .filter(|m| !m.content.trim().is_empty())
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect();
        let tool_defs = self.tools.definitions();

        for step in 0..self.max_steps {
            let req = ModelRequest {
                model: self.model_settings.model.clone(),
                system: self.system_prompt.clone(),
                messages: messages.clone(),
                tools: tool_defs.clone(),
                max_tokens: self.model_settings.max_tokens,
                thinking_budget: self.model_settings.thinking_budget,
            };

            let mut stream = self.model.stream(&req).await?;
            let mut turn = Turn::default();
            while let Some(chunk) = stream.next().await {
                if let Some(event) = turn.apply(chunk?) {
                    emit(tx, event).await?;
                }
            }
            info!(%run_id, step, stop_reason = turn.stop_reason.as_deref().unwrap_or(""), "model turn finished");

            let (content, calls) = turn.finish();
            if calls.is_empty() {
                return Ok(());
            }
            messages.push(json!({ "role": "assistant", "content": content }));

            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                let ctx = ToolContext { retrieval: &self.retrieval, http: &self.http };
                let (output, elapsed) = self.tools.dispatch(ctx, &call.name, call.input).await;
                timings.record(&call.name, elapsed);
                emit(
                    tx,
                    AgentEvent::ToolResult {
                        tool_name: call.name,
                        content: output.content.clone(),
                        status: if output.is_error { ToolStatus::Error } else { ToolStatus::Success },
                    },
                )
                .await?;
                results.push(json!({
                    "type": "tool_result",
                    "tool_use_id": call.id,
                    "content": output.content,
                    "is_error": output.is_error,
                }));
            }
            messages.push(json!({ "role": "user", "content": results }));
        }
        Err(AgentError::StepLimit(self.max_steps))
    }
}

async fn emit(tx: &mpsc::Sender<AgentEvent>, event: AgentEvent) -> Result<(), AgentError> {
    tx.send(event).await.map_err(|_| AgentError::Cancelled)
}

struct ToolCall {
    id: String,
    name: String,
    input: Value,
}

enum Block {
    Text(String),
    Thinking { thinking: String, signature: String },
    ToolUse { id: String, name: String, input_json: String },
}

/// Accumulates one streamed model turn so it can be replayed as the
/// assistant message of the next request.
#[derive(Default)]
struct Turn {
    blocks: Vec<Block>,
    stop_reason: Option<String>,
}

impl Turn {
    fn apply(&mut self, chunk: ModelChunk) -> Option<AgentEvent> {
        match chunk {
            ModelChunk::BlockStart(BlockStart::Text) => {
                self.blocks.push(Block::Text(String::new()));
                None
            }
            ModelChunk::BlockStart(BlockStart::Thinking) => {
                self.blocks.push(Block::Thinking { thinking: String::new(), signature: String::new() });
                None
            }
            ModelChunk::BlockStart(BlockStart::ToolUse { id, name }) => {
                self.blocks.push(Block::ToolUse { id, name: name.clone(), input_json: String::new() });
                Some(AgentEvent::ToolCallStart { tool_name: name, arguments: String::new() })
            }
            ModelChunk::TextDelta(text) => {
                match self.blocks.last_mut() {
                    Some(Block::Text(buf)) => buf.push_str(&text),
                    _ => self.blocks.push(Block::Text(text.clone())),
                }
                (!text.is_empty()).then(|| AgentEvent::TextDelta { content: MessageContent::text(text) })
            }
            ModelChunk::ThinkingDelta(delta) => {
                if let Some(Block::Thinking { thinking, .. }) = self.blocks.last_mut() {
                    thinking.push_str(&delta);
                }
                (!delta.is_empty()).then(|| AgentEvent::TextDelta { content: MessageContent::thinking(delta) })
            }
            ModelChunk::SignatureDelta(sig) => {
                if let Some(Block::Thinking { signature, .. }) = self.blocks.last_mut() {
                    signature.push_str(&sig);
                }
                None
            }
            ModelChunk::InputJsonDelta(fragment) => {
                if let Some(Block::ToolUse { input_json, .. }) = self.blocks.last_mut() {
                    input_json.push_str(&fragment);
                }
                (!fragment.is_empty()).then_some(AgentEvent::ToolCallArgumentDelta { fragment })
            }
            ModelChunk::Stop { reason } => {
                self.stop_reason = Some(reason);
                None
            }
        }
    }

    fn finish(self) -> (Vec<Value>, Vec<ToolCall>) {
        let mut content = Vec::new();
        let mut calls = Vec::new();
        for block in self.blocks {
            match block {
                Block::Text(text) if text.is_empty() => {}
                Block::Text(text) => content.push(json!({ "type": "text", "text": text })),
                Block::Thinking { thinking, signature } => content.push(json!({
                    "type": "thinking",
                    "thinking": thinking,
                    "signature": signature,
                })),
                Block::ToolUse { id, name, input_json } => {
                    let input: Value = if input_json.trim().is_empty() {
                        json!({})
                    } else {
                        serde_json::from_str(&input_json).unwrap_or_else(|e| {
                            warn!(error = %e, tool = name.as_str(), input_json = input_json.as_str(), "unparseable tool input, running with no arguments");
                            json!({})
                        })
                    };
                    content.push(json!({ "type": "tool_use", "id": id, "name": name, "input": input }));
                    calls.push(ToolCall { id, name, input });
                }
            }
        }
        (content, calls)
    }
}
