use async_trait::async_trait;
use futures::stream;
use std::sync::Mutex;
use super::{ ChatClient, CompletionError, CompletionEvent, CompletionStream, GenerationParams };
use crate::models::chat::{ PromptMessage, Role };

#[derive(Debug, Clone)]
enum Script {
    Tokens(Vec<String>),
    Fail {
        tokens: Vec<String>,
        error: CompletionError,
    },
    Echo,
}

/// Replays a fixed reply without touching the network. Backs `--chat-llm-type offline`.
#[derive(Debug)]
pub struct ScriptedChatClient {
    script: Script,
    requests: Mutex<Vec<Vec<PromptMessage>>>,
}

impl ScriptedChatClient {
    fn with_script(script: Script) -> Self {
        Self { script, requests: Mutex::new(Vec::new()) }
    }

    pub fn tokens<I, S>(tokens: I) -> Self where I: IntoIterator<Item = S>, S: Into<String> {
        Self::with_script(Script::Tokens(tokens.into_iter().map(Into::into).collect()))
    }

    /// Emits `tokens` and then fails with `error`.
    pub fn failing<I, S>(tokens: I, error: CompletionError) -> Self
        where I: IntoIterator<Item = S>, S: Into<String>
    {
        Self::with_script(Script::Fail {
            tokens: tokens.into_iter().map(Into::into).collect(),
            error,
        })
    }

    /// Repeats the last user message back, word by word.
    pub fn echo() -> Self {
        Self::with_script(Script::Echo)
    }

    pub fn requests(&self) -> Vec<Vec<PromptMessage>> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

fn echo_tokens(messages: &[PromptMessage]) -> Vec<String> {
    let last_user = messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or("");
    let reply = format!("(offline) You said: {}", last_user);
    reply
        .split_inclusive(' ')
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl ChatClient for ScriptedChatClient {
    async fn stream_chat(
        &self,
        messages: &[PromptMessage],
        _params: &GenerationParams
    ) -> Result<CompletionStream, CompletionError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(messages.to_vec());
        }

        let (tokens, terminal) = match &self.script {
            Script::Tokens(tokens) => (tokens.clone(), CompletionEvent::Done),
            Script::Fail { tokens, error } => (tokens.clone(), CompletionEvent::Error(error.clone())),
            Script::Echo => (echo_tokens(messages), CompletionEvent::Done),
        };
        let events: Vec<CompletionEvent> = tokens
            .into_iter()
            .map(CompletionEvent::Token)
            .chain(std::iter::once(terminal))
            .collect();

        Ok(Box::pin(stream::iter(events)))
    }

    fn get_model(&self) -> String {
        "scripted".to_string()
    }

    fn get_base_url(&self) -> Option<String> {
        None
    }
}
