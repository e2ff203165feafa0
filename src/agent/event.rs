use serde::{Deserialize, Serialize};

/// Content of a text delta: either a bare string or a list of typed blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Plain(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        MessageContent::Blocks(vec![ContentBlock::Text { text: text.into() }])
    }

    pub fn thinking(thinking: impl Into<String>) -> Self {
        MessageContent::Blocks(vec![ContentBlock::Thinking { thinking: thinking.into() }])
    }

    /// Visible text: the plain string, or every `text` block in order.
    pub fn extract_text(&self) -> String {
        match self {
            MessageContent::Plain(s) => s.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Thinking { thinking: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Error,
}

/// Everything one agent run emits, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    TextDelta { content: MessageContent },
    ToolCallStart { tool_name: String, arguments: String },
    ToolCallArgumentDelta { fragment: String },
    ToolResult { tool_name: String, content: String, status: ToolStatus },
    Done,
    Error { message: String },
}
