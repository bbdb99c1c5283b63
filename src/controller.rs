use crate::history::reducer::HistoryWarning;
use crate::history::session::ChatSession;
use crate::llm::chat::{
    prepare_messages,
    ChatClient,
    CompletionError,
    CompletionEvent,
    GenerationParams,
};
use crate::models::chat::{ ChatMessage, PromptMessage, Role };
use chrono::Utc;
use futures::StreamExt;
use log::{ debug, info, warn };

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    AwaitingResponse,
}

/// Reconciles the live transcript of a streamed reply with the chat session.
///
/// Tokens only ever touch the transcript. The finished assistant reply is
/// committed to the session once, when the stream completes.
pub struct TurnController {
    state: TurnState,
    transcript: Vec<ChatMessage>,
    streaming_id: Option<String>,
    turn_chat_id: Option<String>,
    last_committed_id: Option<String>,
    last_hydrated_chat_id: Option<String>,
    last_error: Option<CompletionError>,
    system_prompt: String,
    params: GenerationParams,
}

impl TurnController {
    pub fn new(system_prompt: impl Into<String>, params: GenerationParams) -> Self {
        Self {
            state: TurnState::Idle,
            transcript: Vec::new(),
            streaming_id: None,
            turn_chat_id: None,
            last_committed_id: None,
            last_hydrated_chat_id: None,
            last_error: None,
            system_prompt: system_prompt.into(),
            params,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn is_awaiting(&self) -> bool {
        self.state == TurnState::AwaitingResponse
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    pub fn last_error(&self) -> Option<&CompletionError> {
        self.last_error.as_ref()
    }

    /// Records the user's message and returns the request context, or `None`
    /// if nothing should be sent.
    pub fn submit(&mut self, session: &mut ChatSession, input: &str) -> Option<Vec<PromptMessage>> {
        if self.is_awaiting() {
            warn!("Ignoring submission while a response is still streaming");
            return None;
        }
        let content = input.trim();
        if content.is_empty() {
            return None;
        }

        let message = ChatMessage::user(content);
        if session.current_chat_id().is_none() {
            self.transcript.clear();
            session.start_new_chat(message.clone());
        } else {
            session.add_message_to_chat(message.clone());
        }
        let chat_id = session.current_chat_id().map(str::to_string);
        self.last_hydrated_chat_id = chat_id.clone();
        self.turn_chat_id = chat_id;

        self.transcript.push(message);
        self.last_error = None;
        self.streaming_id = None;
        self.state = TurnState::AwaitingResponse;

        Some(prepare_messages(&self.system_prompt, &self.transcript))
    }

    pub fn on_token(&mut self, token: &str) {
        if !self.is_awaiting() {
            return;
        }
        if let Some(id) = self.streaming_id.as_deref() {
            if let Some(draft) = self.transcript.iter_mut().rev().find(|m| m.id == id) {
                draft.content.push_str(token);
            }
        } else {
            let draft = ChatMessage::assistant(token);
            self.streaming_id = Some(draft.id.clone());
            self.transcript.push(draft);
        }
    }

    /// Settles the turn. Returns the committed reply, at most once per reply id.
    pub fn on_complete(&mut self, session: &mut ChatSession) -> Option<ChatMessage> {
        if !self.is_awaiting() {
            return None;
        }
        self.state = TurnState::Idle;
        self.streaming_id = None;

        let last = self.transcript.last()?;
        if last.role != Role::Assistant {
            warn!("Response finished without any assistant content");
            return None;
        }
        if self.last_committed_id.as_deref() == Some(last.id.as_str()) {
            debug!("Reply {} already committed", last.id);
            return None;
        }

        let reply = ChatMessage {
            id: last.id.clone(),
            role: Role::Assistant,
            content: last.content.clone(),
            created_at: Utc::now(),
        };
        self.commit(session, reply.clone());
        self.last_committed_id = Some(reply.id.clone());
        Some(reply)
    }

    fn commit(&mut self, session: &mut ChatSession, reply: ChatMessage) {
        let selected = session.current_chat_id().map(str::to_string);
        let target = self.turn_chat_id.take();
        let switched = target.is_some() && target != selected;

        if switched {
            if let Some(id) = target.as_deref() {
                if session.load_chat(id).is_some() {
                    warn!("Chat for this reply no longer exists, dropping it");
                    return;
                }
            }
        }
        session.add_message_to_chat(reply);
        if switched {
            if let Some(id) = selected.as_deref() {
                session.load_chat(id);
            } else {
                session.clear_current();
            }
        }
    }

    /// Drops the partial reply and returns to idle. Nothing is committed.
    pub fn on_error(&mut self, err: CompletionError) {
        if let Some(id) = self.streaming_id.take() {
            self.transcript.retain(|m| m.id != id);
        }
        warn!("Chat completion failed: {}", err);
        self.last_error = Some(err);
        self.turn_chat_id = None;
        self.state = TurnState::Idle;
    }

    /// Reloads the transcript when the selected chat changed. Suppressed while
    /// a reply is streaming. Returns whether the transcript was replaced.
    pub fn sync_from_session(&mut self, session: &ChatSession) -> bool {
        if self.is_awaiting() {
            return false;
        }
        match session.current_chat_id() {
            None => {
                let changed = self.last_hydrated_chat_id.is_some() || !self.transcript.is_empty();
                self.transcript.clear();
                self.last_hydrated_chat_id = None;
                changed
            }
            Some(id) => {
                if self.last_hydrated_chat_id.as_deref() == Some(id) {
                    return false;
                }
                self.transcript = session.current_messages().to_vec();
                self.last_hydrated_chat_id = Some(id.to_string());
                true
            }
        }
    }

    pub fn select_chat(&mut self, session: &mut ChatSession, id: &str) -> Option<HistoryWarning> {
        let warning = session.load_chat(id);
        self.sync_from_session(session);
        warning
    }

    pub fn new_chat(&mut self, session: &mut ChatSession) {
        session.clear_current();
        self.sync_from_session(session);
    }

    /// Runs one full turn: submit, stream, settle. `on_token` sees every token
    /// as it arrives.
    pub async fn run_turn<F>(
        &mut self,
        session: &mut ChatSession,
        client: &dyn ChatClient,
        input: &str,
        mut on_token: F
    ) -> Result<Option<ChatMessage>, CompletionError>
        where F: FnMut(&str)
    {
        let Some(messages) = self.submit(session, input) else {
            return Ok(None);
        };
        info!("Sending {} message(s) to {}", messages.len(), client.get_model());

        let mut stream = match client.stream_chat(&messages, &self.params).await {
            Ok(stream) => stream,
            Err(e) => {
                self.on_error(e.clone());
                return Err(e);
            }
        };

        while let Some(event) = stream.next().await {
            match event {
                CompletionEvent::Token(token) => {
                    self.on_token(&token);
                    on_token(&token);
                }
                CompletionEvent::Done => {
                    break;
                }
                CompletionEvent::Error(e) => {
                    self.on_error(e.clone());
                    return Err(e);
                }
            }
        }

        Ok(self.on_complete(session))
    }
}
