use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::{
    ChunkCallback, CompletionRequest, Generator, GeneratorError, Message, Role, ThreadStore,
};

pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const OLLAMA_ENDPOINT: &str = "http://localhost:11434/v1";

const MAX_ERROR_BODY_LEN: usize = 300;

/// Local models are served by Ollama's OpenAI-compatible endpoint
pub fn uses_local_model(model: &str) -> bool {
    model.contains("llama") || model.contains("phi")
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Default, Deserialize)]
struct Delta {
    content: Option<String>,
}

/// What one server-sent event carried
#[derive(Debug, PartialEq)]
enum SsePayload {
    Content(String),
    Done,
    Empty,
}

fn parse_payload(payload: &str) -> Result<SsePayload, GeneratorError> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Ok(SsePayload::Empty);
    }
    if payload == "[DONE]" {
        return Ok(SsePayload::Done);
    }

    let chunk: StreamChunk = serde_json::from_str(payload)
        .map_err(|e| GeneratorError::Stream(format!("bad chunk: {}", e)))?;
    let text: String = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .collect();

    if text.is_empty() {
        Ok(SsePayload::Empty)
    } else {
        Ok(SsePayload::Content(text))
    }
}

/// Splits a byte stream into `data:` event payloads.
///
/// Bytes are held until a full line arrives, so a character cut by a chunk
/// boundary is decoded whole.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    event_data: String,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.event_data.is_empty() {
                    events.push(std::mem::take(&mut self.event_data));
                }
                continue;
            }
            self.add_data_line(line);
        }

        events
    }

    fn add_data_line(&mut self, line: &str) {
        if let Some(data) = line.strip_prefix("data:") {
            if !self.event_data.is_empty() {
                self.event_data.push('\n');
            }
            self.event_data.push_str(data.trim_start());
        }
    }

    fn finish(mut self) -> Option<String> {
        let rest = String::from_utf8_lossy(&self.buffer).trim().to_string();
        self.add_data_line(&rest);
        (!self.event_data.trim().is_empty()).then_some(self.event_data)
    }
}

/// Connection settings for an OpenAI-compatible chat completions endpoint
#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub model: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub connect_timeout: Duration,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            connect_timeout: Duration::from_secs(15),
        }
    }
}

/// Streaming client for OpenAI-compatible chat completions (OpenAI, Ollama)
pub struct OpenAiGenerator {
    client: reqwest::Client,
    name: String,
    model: String,
    endpoint: String,
    api_key: Option<String>,
    threads: Option<ThreadStore>,
}

impl OpenAiGenerator {
    pub fn new(settings: OpenAiSettings) -> Result<Self, GeneratorError> {
        let local = uses_local_model(&settings.model);
        let endpoint = if local {
            OLLAMA_ENDPOINT.to_string()
        } else {
            settings.endpoint
        };

        let api_key = settings.api_key.filter(|k| !k.trim().is_empty());
        if !local && api_key.is_none() {
            return Err(GeneratorError::Config(
                "Missing OpenAI key. Use `synthloop config set OPENAI_KEY=<your key>` to set it."
                    .to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|source| GeneratorError::Http {
                endpoint: endpoint.clone(),
                source,
            })?;

        let backend = if local { "ollama" } else { "openai" };
        Ok(Self {
            client,
            name: format!("{}:{}", backend, settings.model),
            model: settings.model,
            endpoint,
            api_key,
            threads: None,
        })
    }

    pub fn with_thread_store(mut self, store: ThreadStore) -> Self {
        self.threads = Some(store);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.trim_end_matches('/'))
    }

    /// System messages first, then the thread history, then the new turn
    fn assemble_messages(&self, request: &CompletionRequest) -> Result<Vec<Message>, GeneratorError> {
        let history = match (&self.threads, &request.thread_id) {
            (Some(store), Some(id)) => store.load(id)?,
            _ => Vec::new(),
        };

        let (system, turn): (Vec<&Message>, Vec<&Message>) = request
            .messages
            .iter()
            .partition(|m| m.role == Role::System);

        Ok(system
            .into_iter()
            .cloned()
            .chain(history)
            .chain(turn.into_iter().cloned())
            .collect())
    }

    async fn stream_completion(
        &self,
        messages: &[Message],
        on_chunk: Option<&ChunkCallback>,
    ) -> Result<String, GeneratorError> {
        let url = self.chat_url();
        let body = ChatRequest {
            model: &self.model,
            messages,
            stream: true,
        };

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|source| GeneratorError::Http {
            endpoint: url.clone(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let body: String = text.chars().take(MAX_ERROR_BODY_LEN).collect();
            return Err(GeneratorError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::default();
        let mut output = String::new();

        'read: while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| GeneratorError::Stream(e.to_string()))?;
            for event in decoder.push(&bytes) {
                match parse_payload(&event)? {
                    SsePayload::Content(text) => {
                        if let Some(callback) = on_chunk {
                            callback(&text);
                        }
                        output.push_str(&text);
                    }
                    SsePayload::Done => break 'read,
                    SsePayload::Empty => {}
                }
            }
        }

        if let Some(event) = decoder.finish() {
            if let SsePayload::Content(text) = parse_payload(&event)? {
                if let Some(callback) = on_chunk {
                    callback(&text);
                }
                output.push_str(&text);
            }
        }

        Ok(output)
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete_with_callback(
        &self,
        request: &CompletionRequest,
        on_chunk: Option<ChunkCallback>,
    ) -> Result<String, GeneratorError> {
        let messages = self.assemble_messages(request)?;

        debug!(
            model = %self.model,
            messages = messages.len(),
            thread_id = ?request.thread_id,
            "Requesting completion"
        );

        let output = self.stream_completion(&messages, on_chunk.as_ref()).await?;

        info!(
            model = %self.model,
            output_len = output.len(),
            "Completion finished"
        );

        if let (Some(store), Some(id)) = (&self.threads, &request.thread_id) {
            let mut turn: Vec<Message> = request
                .messages
                .iter()
                .filter(|m| m.role != Role::System)
                .cloned()
                .collect();
            turn.push(Message::assistant(output.clone()));
            if let Err(e) = store.append(id, &turn) {
                warn!(thread_id = %id, error = %e, "Failed to persist thread");
            }
        }

        Ok(output)
    }
}
