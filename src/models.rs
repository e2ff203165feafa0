use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use crate::settings::ModelSettings;
use crate::sse::{sse_frames, SseFrame};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelRequest {
    pub model: String,
    pub system: String,
    /// Provider-shaped messages (`{role, content}` with content blocks).
    pub messages: Vec<Value>,
    /// `{name, description, input_schema}` per tool.
    pub tools: Vec<Value>,
    pub max_tokens: u32,
    pub thinking_budget: Option<u32>,
}

/// Kind of content block the model opened.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockStart {
    Text,
    Thinking,
    ToolUse { id: String, name: String },
}

/// One decoded piece of a streamed model response.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelChunk {
    BlockStart(BlockStart),
    TextDelta(String),
    ThinkingDelta(String),
    SignatureDelta(String),
    InputJsonDelta(String),
    Stop { reason: String },
}

pub type ModelStream = Pin<Box<dyn Stream<Item = anyhow::Result<ModelChunk>> + Send>>;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn stream(&self, req: &ModelRequest) -> anyhow::Result<ModelStream>;
}

/// Anthropic Messages API, streaming.
#[derive(Clone)]
pub struct AnthropicMessages {
    pub base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicMessages {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_settings(settings: &ModelSettings) -> anyhow::Result<Self> {
        let key = settings
            .api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("ANTHROPIC_API_KEY is not set"))?;
        Ok(Self::new(&settings.base_url, key))
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: &'a [Value],
    #[serde(skip_serializing_if = "<[Value]>::is_empty")]
    tools: &'a [Value],
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart,
    ContentBlockStart { content_block: StartBlock },
    ContentBlockDelta { delta: Delta },
    ContentBlockStop,
    MessageDelta { delta: MessageDeltaBody },
    MessageStop,
    Ping,
    Error { error: ApiErrorBody },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StartBlock {
    Text,
    Thinking,
    RedactedThinking,
    ToolUse { id: String, name: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaBody {
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

/// Maps one provider SSE frame to a chunk. `Ok(None)` for frames that carry
/// nothing the agent loop needs.
fn decode_frame(frame: &SseFrame) -> anyhow::Result<Option<ModelChunk>> {
    let Some(data) = frame.data.as_deref() else {
        return Ok(None);
    };
    let event: StreamEvent = match serde_json::from_str(data) {
        Ok(ev) => ev,
        Err(e) => {
            trace!(%e, data, "ignoring unrecognized model event");
            return Ok(None);
        }
    };
    Ok(match event {
        StreamEvent::ContentBlockStart { content_block } => match content_block {
            StartBlock::Text => Some(ModelChunk::BlockStart(BlockStart::Text)),
            StartBlock::Thinking => Some(ModelChunk::BlockStart(BlockStart::Thinking)),
            StartBlock::ToolUse { id, name } => {
                Some(ModelChunk::BlockStart(BlockStart::ToolUse { id, name }))
            }
            StartBlock::RedactedThinking | StartBlock::Other => None,
        },
        StreamEvent::ContentBlockDelta { delta } => match delta {
            Delta::TextDelta { text } => Some(ModelChunk::TextDelta(text)),
            Delta::InputJsonDelta { partial_json } => Some(ModelChunk::InputJsonDelta(partial_json)),
            Delta::ThinkingDelta { thinking } => Some(ModelChunk::ThinkingDelta(thinking)),
            Delta::SignatureDelta { signature } => Some(ModelChunk::SignatureDelta(signature)),
            Delta::Other => None,
        },
        StreamEvent::MessageDelta { delta } => {
            delta.stop_reason.map(|reason| ModelChunk::Stop { reason })
        }
        StreamEvent::Error { error } => {
            anyhow::bail!("model stream error ({}): {}", error.kind, error.message)
        }
        StreamEvent::MessageStart
        | StreamEvent::ContentBlockStop
        | StreamEvent::MessageStop
        | StreamEvent::Ping => None,
    })
}

#[async_trait]
impl LanguageModel for AnthropicMessages {
    async fn stream(&self, req: &ModelRequest) -> anyhow::Result<ModelStream> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = MessagesRequest {
            model: &req.model,
            max_tokens: req.max_tokens,
            system: &req.system,
            messages: &req.messages,
            tools: &req.tools,
            // at most one open tool call per run
            tool_choice: (!req.tools.is_empty())
                .then(|| serde_json::json!({ "type": "auto", "disable_parallel_tool_use": true })),
            stream: true,
            thinking: req
                .thinking_budget
                .map(|budget| serde_json::json!({ "type": "enabled", "budget_tokens": budget })),
        };
        debug!(model = %req.model, messages = req.messages.len(), "streaming model turn");

        let resp = self
            .client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("model call failed: {status}: {text}");
        }

        let chunks = sse_frames(resp.bytes_stream()).filter_map(|frame| async move {
            match frame {
                Ok(frame) => decode_frame(&frame).transpose(),
                Err(e) => Some(Err(e)),
            }
        });
        Ok(Box::pin(chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(data: &str) -> SseFrame {
        SseFrame { event: None, data: Some(data.into()) }
    }

    #[test]
    fn decodes_tool_use_start_and_argument_deltas() {
        let start = decode_frame(&frame(
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"search_documents","input":{}}}"#,
        ))
        .unwrap();
        assert_eq!(
            start,
            Some(ModelChunk::BlockStart(BlockStart::ToolUse {
                id: "toolu_1".into(),
                name: "search_documents".into()
            }))
        );

        let delta = decode_frame(&frame(
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"query\": \"two"}}"#,
        ))
        .unwrap();
        assert_eq!(delta, Some(ModelChunk::InputJsonDelta("{\"query\": \"two".into())));
    }

    #[test]
    fn decodes_text_thinking_and_stop_reason() {
        let text = decode_frame(&frame(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#,
        ))
        .unwrap();
        assert_eq!(text, Some(ModelChunk::TextDelta("Hello".into())));

        let thinking = decode_frame(&frame(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"Let me"}}"#,
        ))
        .unwrap();
        assert_eq!(thinking, Some(ModelChunk::ThinkingDelta("Let me".into())));

        let stop = decode_frame(&frame(
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use","stop_sequence":null},"usage":{"output_tokens":15}}"#,
        ))
        .unwrap();
        assert_eq!(stop, Some(ModelChunk::Stop { reason: "tool_use".into() }));
    }

    #[test]
    fn bookkeeping_and_unknown_frames_are_skipped() {
        for data in [
            r#"{"type":"ping"}"#,
            r#"{"type":"message_start","message":{"id":"msg_1"}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
            r#"{"type":"message_stop"}"#,
            r#"{"type":"brand_new_event"}"#,
            "not json",
        ] {
            assert_eq!(decode_frame(&frame(data)).unwrap(), None, "{data}");
        }
        assert_eq!(decode_frame(&SseFrame::default()).unwrap(), None);
    }

    #[test]
    fn provider_error_event_fails_the_stream() {
        let err = decode_frame(&frame(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        ))
        .unwrap_err();
        assert!(err.to_string().contains("Overloaded"));
    }

    #[test]
    fn request_body_carries_thinking_only_when_enabled() {
        let messages = vec![serde_json::json!({"role": "user", "content": "hi"})];
        let body = MessagesRequest {
            model: "m",
            max_tokens: 10,
            system: "s",
            messages: &messages,
            tools: &[],
            tool_choice: None,
            stream: true,
            thinking: None,
        };
        let v = serde_json::to_value(&body).unwrap();
        assert!(v.get("thinking").is_none());
        assert!(v.get("tools").is_none());
        assert_eq!(v["stream"], true);
    }

    #[test]
    fn missing_api_key_is_reported() {
        let settings = crate::settings::Settings::default().model;
        let err = AnthropicMessages::from_settings(&settings).err().unwrap();
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
    }
}
