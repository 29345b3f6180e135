use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by a completion engine.
///
/// None of these are retried by the loop: the next attempt would fail the same way.
#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("{0}")]
    Config(String),

    #[error("Request to {endpoint} failed: {source}")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Completion API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Failed to read completion stream: {0}")]
    Stream(String),

    #[error("{0}")]
    Recording(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Called with each incremental piece of generated text
pub type ChunkCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// One part of a multimodal message, in chat-completions wire shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    /// A user message with images attached ahead of the text
    pub fn user_with_images(text: impl Into<String>, image_urls: &[String]) -> Self {
        let mut parts: Vec<ContentPart> = image_urls
            .iter()
            .map(|url| ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: url.clone(),
                    detail: Some("high".to_string()),
                },
            })
            .collect();
        parts.push(ContentPart::Text { text: text.into() });

        Self {
            role: Role::User,
            content: MessageContent::Parts(parts),
        }
    }

    /// The textual content, with image parts skipped
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// A request to the completion engine
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    /// Conversation to continue, when the engine supports threads
    pub thread_id: Option<String>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            thread_id: None,
        }
    }

    pub fn with_thread(mut self, thread_id: Option<String>) -> Self {
        self.thread_id = thread_id;
        self
    }
}

/// The boundary to an external text/code completion engine
#[async_trait]
pub trait Generator: Send + Sync {
    /// Human-readable name (e.g., "openai:gpt-4o")
    fn name(&self) -> &str;

    /// Complete a request, returning the full generated text
    async fn complete(&self, request: &CompletionRequest) -> Result<String, GeneratorError> {
        self.complete_with_callback(request, None).await
    }

    /// Complete a request, streaming incremental text to `on_chunk`
    async fn complete_with_callback(
        &self,
        request: &CompletionRequest,
        on_chunk: Option<ChunkCallback>,
    ) -> Result<String, GeneratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_message_wire_shape() {
        let json = serde_json::to_value(Message::system("be terse")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"role": "system", "content": "be terse"})
        );
    }

    #[test]
    fn test_image_message_wire_shape() {
        let msg = Message::user_with_images("compare", &["data:image/png;base64,AA".to_string()]);
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["content"][0]["type"], "image_url");
        assert_eq!(json["content"][0]["image_url"]["url"], "data:image/png;base64,AA");
        assert_eq!(json["content"][1], serde_json::json!({"type": "text", "text": "compare"}));

        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
        assert_eq!(back.text(), "compare");
    }
}
