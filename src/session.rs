use serde::{Deserialize, Serialize};

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of the conversation as the client resends it on every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    #[cfg(test)]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Body of `POST /api/chat`. `message` is the legacy single-question form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    pub messages: Option<Vec<ConversationMessage>>,
    pub message: Option<String>,
}

pub const MISSING_MESSAGES: &str = "Messages array is required";

impl ChatRequest {
    pub fn into_history(self) -> Result<Vec<ConversationMessage>, ApiError> {
        match (self.messages, self.message) {
            (Some(messages), _) if !messages.is_empty() => Ok(messages),
            (None, Some(message)) if !message.trim().is_empty() => {
                Ok(vec![ConversationMessage::user(message)])
            }
            _ => Err(ApiError::Validation(MISSING_MESSAGES.into())),
        }
    }
}
