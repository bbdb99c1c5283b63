use async_trait::async_trait;
use log::info;
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION } };
use serde::{ Deserialize, Serialize };

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

const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
const DEFAULT_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAIChatClient {
    http: HttpClient,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct OpenAIChatRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAIStreamResponse {
    choices: Vec<OpenAIStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAIStreamChoice {
    delta: OpenAIDelta,
}

#[derive(Deserialize)]
struct OpenAIDelta {
    content: Option<String>,
}

impl OpenAIChatClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>
    ) -> Result<Self, CompletionError> {
        let chat_model = model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let api_url = base_url.unwrap_or_else(|| DEFAULT_URL.to_string());
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| CompletionError::new(format!("Invalid API key format: {}", e)))?
        );

        let http = HttpClient::builder().default_headers(headers).build()?;

        Ok(Self {
            http,
            model: chat_model,
            base_url: api_url,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, CompletionError> {
        if config.llm_type != LlmType::OpenAI {
            return Err(CompletionError::new("Invalid config type for OpenAIChatClient"));
        }
        let api_key = config.api_key
            .clone()
            .ok_or_else(|| CompletionError::new("OpenAI API key is required"))?;

        Self::new(api_key, config.completion_model.clone(), config.base_url.clone())
    }
}

/// Parses one server-sent-events line of a chat completion stream.
pub fn parse_sse_line(line: &str) -> LineOutcome {
    let Some(data) = line.strip_prefix("data:") else {
        return LineOutcome::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return LineOutcome::Done;
    }
    match serde_json::from_str::<OpenAIStreamResponse>(data) {
        Ok(stream_resp) => {
            let content: String = stream_resp.choices
                .into_iter()
                .filter_map(|choice| choice.delta.content)
                .collect();
            if content.is_empty() { LineOutcome::Skip } else { LineOutcome::Token(content) }
        }
        Err(e) => {
            info!("JSON parse error: {} for data: {}", e, data);
            LineOutcome::Skip
        }
    }
}

#[async_trait]
impl ChatClient for OpenAIChatClient {
    async fn stream_chat(
        &self,
        messages: &[PromptMessage],
        params: &GenerationParams
    ) -> Result<CompletionStream, CompletionError> {
        let req = OpenAIChatRequest {
            model: params.model.as_deref().unwrap_or(&self.model),
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            stream: true,
        };
        let request = self.http.post(self.base_url.trim_end_matches('/')).json(&req);
        Ok(http_stream_generate(request, parse_sse_line))
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }

    fn get_base_url(&self) -> Option<String> {
        Some(self.base_url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sse_deltas() {
        let line = r#"data: {"choices":[{"delta":{"content":"Kyo"},"finish_reason":null}]}"#;
        assert_eq!(parse_sse_line(line), LineOutcome::Token("Kyo".to_string()));
        assert_eq!(parse_sse_line("data: [DONE]"), LineOutcome::Done);
        assert_eq!(parse_sse_line(r#"data: {"choices":[{"delta":{}}]}"#), LineOutcome::Skip);
        assert_eq!(parse_sse_line(": keep-alive"), LineOutcome::Skip);
    }

    #[test]
    fn requires_api_key() {
        let config = LlmConfig { llm_type: LlmType::OpenAI, ..LlmConfig::default() };
        assert!(OpenAIChatClient::from_config(&config).is_err());

        let config = LlmConfig { api_key: Some("sk-test".into()), ..config };
        let client = OpenAIChatClient::from_config(&config).unwrap();
        assert_eq!(client.get_model(), "gpt-3.5-turbo");
    }
}
