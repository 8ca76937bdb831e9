use serde::{Deserialize, Serialize};

/// Streaming chat endpoint. Replies with `text/plain` chunks.
pub const CHAT_PATH: &str = "/api/chat";
/// Buffered chat endpoint. Replies with a [`ChatResponse`].
pub const CHAT_COMPLETE_PATH: &str = "/api/chat/complete";
pub const HEALTH_PATH: &str = "/health";

/// First assistant message shown to every new session.
pub const GREETING: &str = "Hi! I'm the Headstarter support assistant. How can I help you today?";

/// Shown in place of the reply when a request fails before any text arrived.
pub const FALLBACK_ERROR_MESSAGE: &str =
    "I'm sorry, but I encountered an error. Please try again later.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// Body of a successful `POST /api/chat/complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub text: String,
}

/// Body of every JSON error reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
