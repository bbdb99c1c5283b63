pub mod ollama;
pub mod openai;
pub mod scripted;

use async_trait::async_trait;
use futures::{ Stream, StreamExt, Future };
use log::debug;
use reqwest::StatusCode;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use super::{ LlmConfig, LlmType };
use self::ollama::OllamaClient;
use self::openai::OpenAIChatClient;
use self::scripted::ScriptedChatClient;
use crate::models::chat::{ ChatMessage, PromptMessage, Role };
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

/// Transport or provider failure. `status` is set for non-2xx responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionError {
    pub status: Option<u16>,
    pub message: String,
}

impl fmt::Display for CompletionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => write!(f, "HTTP {}: {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for CompletionError {}

impl CompletionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { status: None, message: message.into() }
    }

    pub fn http(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status: Some(status.as_u16()), message: message.into() }
    }
}

impl From<reqwest::Error> for CompletionError {
    fn from(err: reqwest::Error) -> Self {
        Self {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

/// One item of a completion stream. Every stream ends with exactly one
/// `Done` or `Error`.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionEvent {
    Token(String),
    Done,
    Error(CompletionError),
}

pub type CompletionStream = Pin<Box<dyn Stream<Item = CompletionEvent> + Send>>;

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    /// Overrides the client's configured model when set.
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn stream_chat(
        &self,
        messages: &[PromptMessage],
        params: &GenerationParams
    ) -> Result<CompletionStream, CompletionError>;

    fn get_model(&self) -> String;
    fn get_base_url(&self) -> Option<String>;
}

/// System prompt first, then only the user and assistant turns.
pub fn prepare_messages(system_prompt: &str, transcript: &[ChatMessage]) -> Vec<PromptMessage> {
    let mut messages = Vec::with_capacity(transcript.len() + 1);
    if !system_prompt.trim().is_empty() {
        messages.push(PromptMessage {
            role: Role::System,
            content: system_prompt.to_string(),
        });
    }
    messages.extend(
        transcript
            .iter()
            .filter(|m| matches!(m.role, Role::User | Role::Assistant))
            .map(PromptMessage::from)
    );
    messages
}

/// Runs `response_fn` on its own task. It sends tokens; its result becomes
/// the terminal event.
pub fn create_streaming_response<F, Fut>(response_fn: F) -> CompletionStream
where
    F: FnOnce(mpsc::Sender<CompletionEvent>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), CompletionError>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        let terminal = match response_fn(tx.clone()).await {
            Ok(()) => CompletionEvent::Done,
            Err(e) => CompletionEvent::Error(e),
        };
        let _ = tx.send(terminal).await;
    });

    Box::pin(ReceiverStream::new(rx))
}

pub fn new_client(config: &LlmConfig) -> Result<Arc<dyn ChatClient>, CompletionError> {
    let client: Arc<dyn ChatClient> = match config.llm_type {
        LlmType::Ollama => {
            let specific_client = OllamaClient::from_config(config)?;
            Arc::new(specific_client)
        }
        LlmType::OpenAI => {
            let specific_client = OpenAIChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
        LlmType::Offline => Arc::new(ScriptedChatClient::echo()),
    };
    Ok(client)
}

/// What a provider line parser found in one line of a streamed body.
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    Token(String),
    Done,
    Skip,
}

/// Splits a chunked body into complete lines, holding back a trailing partial line.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            let text = text.trim_end_matches(['\n', '\r']);
            if !text.is_empty() {
                lines.push(text.to_string());
            }
        }
        lines
    }

    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let text = String::from_utf8_lossy(&rest).trim().to_string();
        if text.is_empty() { None } else { Some(text) }
    }
}

pub fn http_stream_generate(
    request: reqwest::RequestBuilder,
    line_parser: fn(&str) -> LineOutcome
) -> CompletionStream {
    create_streaming_response(move |tx| forward_lines(request, line_parser, tx))
}

async fn forward_lines(
    request: reqwest::RequestBuilder,
    line_parser: fn(&str) -> LineOutcome,
    tx: mpsc::Sender<CompletionEvent>
) -> Result<(), CompletionError> {
    let resp = request.send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        let message = if body.trim().is_empty() {
            status.canonical_reason().unwrap_or("request failed").to_string()
        } else {
            body
        };
        return Err(CompletionError::http(status, message));
    }

    let mut buffer = LineBuffer::default();
    let mut bytes = Box::pin(resp.bytes_stream());
    while let Some(chunk) = bytes.next().await {
        let chunk = chunk?;
        for line in buffer.push(&chunk) {
            match line_parser(&line) {
                LineOutcome::Token(tok) => {
                    if tx.send(CompletionEvent::Token(tok)).await.is_err() {
                        return Ok(());
                    }
                }
                LineOutcome::Done => {
                    return Ok(());
                }
                LineOutcome::Skip => debug!("Skipping stream line: {}", line),
            }
        }
    }
    if let Some(line) = buffer.finish() {
        if let LineOutcome::Token(tok) = line_parser(&line) {
            let _ = tx.send(CompletionEvent::Token(tok)).await;
        }
    }
    Ok(())
}
