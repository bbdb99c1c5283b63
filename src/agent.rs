use crate::cli::Args;
use crate::config::prompt::{ self, PromptConfig };
use crate::controller::TurnController;
use crate::history::session::ChatSession;
use crate::history::{ initialize_snapshot_store, SnapshotStore };
use crate::llm::chat::{ new_client as new_chat_client, ChatClient, CompletionError, GenerationParams };
use crate::llm::{ LlmConfig, LlmType };
use crate::models::chat::ChatMessage;

use log::info;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

/// Everything one interactive chat needs, built from the command line.
pub struct ChatAgent {
    pub session: ChatSession,
    pub controller: TurnController,
    pub prompt_config: PromptConfig,
    chat_client: Arc<dyn ChatClient>,
}

impl ChatAgent {
    fn initialize_llm_client(args: &Args) -> Result<Arc<dyn ChatClient>, Box<dyn Error + Send + Sync>> {
        let chat_llm_type: LlmType = args.chat_llm_type.parse()?;
        let chat_api_key = if !args.chat_api_key.is_empty() {
            Some(args.chat_api_key.clone())
        } else {
            None
        };
        let chat_config = LlmConfig {
            llm_type: chat_llm_type,
            base_url: args.chat_base_url.clone(),
            api_key: chat_api_key,
            completion_model: args.chat_model.clone(),
        };
        let chat_client = new_chat_client(&chat_config)?;
        info!(
            "Chat client configured: Type={}, Model={}, BaseURL={:?}",
            args.chat_llm_type,
            chat_client.get_model(),
            chat_client.get_base_url().as_deref().unwrap_or("none")
        );
        Ok(chat_client)
    }

    pub fn new(args: &Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let store = initialize_snapshot_store(args)?;
        let chat_client = Self::initialize_llm_client(args)?;
        let prompt_config = prompt::load_or_default(args.prompts_path.as_deref())?;
        Ok(Self::with_parts(args, store, chat_client, prompt_config))
    }

    pub fn with_parts(
        args: &Args,
        store: Arc<dyn SnapshotStore>,
        chat_client: Arc<dyn ChatClient>,
        prompt_config: PromptConfig
    ) -> Self {
        let session = ChatSession::new(
            store,
            args.store_key.clone(),
            Duration::from_millis(args.save_debounce_ms)
        );
        let params = GenerationParams {
            model: None,
            temperature: args.chat_temperature,
            max_tokens: args.chat_max_tokens,
        };
        let controller = TurnController::new(prompt_config.system_prompt.clone(), params);

        Self {
            session,
            controller,
            prompt_config,
            chat_client,
        }
    }

    pub fn chat_client(&self) -> &dyn ChatClient {
        self.chat_client.as_ref()
    }

    /// Loads saved history and shows the current chat.
    pub async fn start(&mut self) {
        self.session.activate().await;
        self.controller.sync_from_session(&self.session);
    }

    pub async fn send(
        &mut self,
        input: &str,
        on_token: impl FnMut(&str)
    ) -> Result<Option<ChatMessage>, CompletionError> {
        // Retries the initial load if the store was unreachable at startup.
        self.session.activate().await;
        self.controller.sync_from_session(&self.session);
        let client = Arc::clone(&self.chat_client);
        self.controller.run_turn(&mut self.session, client.as_ref(), input, on_token).await
    }

    pub async fn shutdown(&mut self) {
        self.session.activate().await;
        self.session.flush().await;
    }
}
