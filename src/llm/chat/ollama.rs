use reqwest::Client as HttpClient;
use serde::{ Deserialize, Serialize };
use async_trait::async_trait;
use super::{
    http_stream_generate,
    ChatClient,
    CompletionError,
    CompletionStream,
    GenerationParams,
    LineOutcome,
};
use crate::llm::{ LlmConfig, LlmType };
use crate::models::chat::PromptMessage;
use log::info;

#[derive(Debug)]
pub struct OllamaClient {
    http: HttpClient,
    base_url: String,
    completion_model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct StreamResponse {
    message: Option<StreamMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Deserialize)]
struct StreamMessage {
    content: String,
}

impl OllamaClient {
    pub fn new(base_url: Option<String>, completion_model: Option<String>) -> Self {
        let model = completion_model.unwrap_or_else(|| "llama3".to_string());
        let url = base_url.unwrap_or_else(|| "http://localhost:11434".into());

        Self {
            http: HttpClient::new(),
            base_url: url,
            completion_model: model,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, CompletionError> {
        if config.llm_type != LlmType::Ollama {
            return Err(CompletionError::new("Invalid config type for OllamaClient"));
        }

        Ok(Self::new(config.base_url.clone(), config.completion_model.clone()))
    }
}

/// Ollama streams one JSON object per line.
pub fn parse_ndjson_line(line: &str) -> LineOutcome {
    match serde_json::from_str::<StreamResponse>(line) {
        Ok(stream_resp) => {
            let content = stream_resp.message.map(|m| m.content).unwrap_or_default();
            if !content.is_empty() {
                LineOutcome::Token(content)
            } else if stream_resp.done {
                LineOutcome::Done
            } else {
                LineOutcome::Skip
            }
        }
        Err(e) => {
            info!("JSON parse error: {} for line: {}", e, line);
            LineOutcome::Skip
        }
    }
}

#[async_trait]
impl ChatClient for OllamaClient {
    async fn stream_chat(
        &self,
        messages: &[PromptMessage],
        params: &GenerationParams
    ) -> Result<CompletionStream, CompletionError> {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let req = ChatRequest {
            model: params.model.as_deref().unwrap_or(&self.completion_model),
            messages,
            stream: true,
            options: ChatOptions {
                temperature: params.temperature,
                num_predict: params.max_tokens,
            },
        };
        Ok(http_stream_generate(self.http.post(&url).json(&req), parse_ndjson_line))
    }

    fn get_model(&self) -> String {
        self.completion_model.clone()
    }

    fn get_base_url(&self) -> Option<String> {
        Some(self.base_url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ndjson_chunks() {
        let line = r#"{"model":"llama3","message":{"role":"assistant","content":"Hi"},"done":false}"#;
        assert_eq!(parse_ndjson_line(line), LineOutcome::Token("Hi".to_string()));
        let last = r#"{"model":"llama3","message":{"role":"assistant","content":""},"done":true}"#;
        assert_eq!(parse_ndjson_line(last), LineOutcome::Done);
        assert_eq!(parse_ndjson_line("garbage"), LineOutcome::Skip);
    }
}
