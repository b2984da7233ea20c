
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Developer,
    User,
    Assistant,
    Tool,
    Function,
}

/// One turn of a conversation, in the chat-completions wire shape.
///
/// `content` may be `null` (assistant turns that only call tools). Fields this
/// crate does not interpret, such as `tool_calls`, `tool_call_id` or `name`,
/// are kept in `extra` and relayed upstream unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<MessageContent>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Plain text, or a list of typed parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

impl ChatMessage {
    fn text_message(role: Role, content: String) -> Self {
        Self {
            role,
            content: Some(MessageContent::Text(content)),
            extra: Map::new(),
        }
    }

    #[inline]
    pub fn system(content: impl Into<String>) -> Self {
        Self::text_message(Role::System, content.into())
    }

    #[inline]
    pub fn user(content: impl Into<String>) -> Self {
        Self::text_message(Role::User, content.into())
    }

    #[inline]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text_message(Role::Assistant, content.into())
    }

    /// Text of this turn; `""` when the content is `null`
    #[inline]
    pub fn text(&self) -> &str {
        self.content.as_ref().map_or("", MessageContent::text)
    }
}

impl MessageContent {
    /// The string content, or the first text part, or `""`
    #[inline]
    pub fn text(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::Parts(parts) => parts
                .iter()
                .find_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .unwrap_or(""),
        }
    }
}

/// Text of the last message, used as the retrieval query
#[inline]
pub fn query_text(messages: &[ChatMessage]) -> Option<&str> {
    messages.last().map(ChatMessage::text)
}
