use crate::models::chat::{ Chat, ChatMessage, History };
use chrono::Utc;
use log::warn;
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

const TITLE_MAX_CHARS: usize = 35;
const UNTITLED_CHAT: &str = "Untitled Chat";

#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    StartChat(ChatMessage),
    ClearCurrent,
    AppendMessage(ChatMessage),
    SelectChat(String),
    DeleteChat(String),
    ClearAll,
    ReplaceAll {
        chats: Vec<Chat>,
        current_chat_id: Option<String>,
    },
}

/// Reasons an action was rejected. A rejected action leaves the history untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryWarning {
    #[error("message is missing an id")]
    InvalidMessage,
    #[error("no chat is currently selected")]
    NoCurrentChat,
    #[error("chat '{0}' not found")]
    ChatNotFound(String),
    #[error("message '{message_id}' already exists in chat '{chat_id}'")]
    DuplicateMessage {
        chat_id: String,
        message_id: String,
    },
}

pub fn generate_chat_title(content: &str) -> String {
    let first_line = content.trim().lines().next().unwrap_or("").trim();
    if first_line.is_empty() {
        return UNTITLED_CHAT.to_string();
    }
    if first_line.chars().count() > TITLE_MAX_CHARS {
        let truncated: String = first_line.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}...", truncated)
    } else {
        first_line.to_string()
    }
}

/// Keeps `requested` if it names a chat in `chats`, else falls back to the first chat.
pub fn resolve_current_chat_id(chats: &[Chat], requested: Option<&str>) -> Option<String> {
    match requested {
        Some(id) if chats.iter().any(|chat| chat.id == id) => Some(id.to_string()),
        _ => chats.first().map(|chat| chat.id.clone()),
    }
}

pub fn reduce(history: &History, action: Action) -> Result<History, HistoryWarning> {
    match action {
        Action::StartChat(seed) => {
            if !seed.has_id() {
                return Err(HistoryWarning::InvalidMessage);
            }
            let chat = Chat {
                id: Uuid::new_v4().to_string(),
                title: generate_chat_title(&seed.content),
                messages: vec![seed],
                created_at: Utc::now(),
            };
            let mut next = history.clone();
            next.current_chat_id = Some(chat.id.clone());
            next.chats.insert(0, chat);
            Ok(next)
        }
        Action::ClearCurrent => {
            Ok(History {
                chats: history.chats.clone(),
                current_chat_id: None,
            })
        }
        Action::AppendMessage(message) => {
            if !message.has_id() {
                return Err(HistoryWarning::InvalidMessage);
            }
            let current_id = history.current_chat_id
                .as_deref()
                .ok_or(HistoryWarning::NoCurrentChat)?;
            let mut next = history.clone();
            let chat = next.chats
                .iter_mut()
                .find(|chat| chat.id == current_id)
                .ok_or_else(|| HistoryWarning::ChatNotFound(current_id.to_string()))?;
            if chat.contains_message(&message.id) {
                return Err(HistoryWarning::DuplicateMessage {
                    chat_id: chat.id.clone(),
                    message_id: message.id,
                });
            }
            chat.messages.push(message);
            Ok(next)
        }
        Action::SelectChat(id) => {
            if !history.contains_chat(&id) {
                return Err(HistoryWarning::ChatNotFound(id));
            }
            Ok(History {
                chats: history.chats.clone(),
                current_chat_id: Some(id),
            })
        }
        Action::DeleteChat(id) => {
            if !history.contains_chat(&id) {
                return Err(HistoryWarning::ChatNotFound(id));
            }
            let chats: Vec<Chat> = history.chats
                .iter()
                .filter(|chat| chat.id != id)
                .cloned()
                .collect();
            let current_chat_id = if history.current_chat_id.as_deref() == Some(id.as_str()) {
                chats.first().map(|chat| chat.id.clone())
            } else {
                history.current_chat_id.clone()
            };
            Ok(History { chats, current_chat_id })
        }
        Action::ClearAll => Ok(History::default()),
        Action::ReplaceAll { chats, current_chat_id } => {
            let chats = sanitize_chats(chats);
            let current_chat_id = resolve_current_chat_id(&chats, current_chat_id.as_deref());
            Ok(History { chats, current_chat_id })
        }
    }
}

/// Drops invalid entries one by one instead of rejecting the whole batch.
fn sanitize_chats(chats: Vec<Chat>) -> Vec<Chat> {
    let mut seen_chats = HashSet::new();
    let mut kept = Vec::with_capacity(chats.len());

    for mut chat in chats {
        if chat.id.trim().is_empty() {
            warn!("Dropping chat without an id");
            continue;
        }
        if !seen_chats.insert(chat.id.clone()) {
            warn!("Dropping duplicate chat '{}'", chat.id);
            continue;
        }

        let mut seen_messages = HashSet::new();
        let total = chat.messages.len();
        chat.messages.retain(|message| message.has_id() && seen_messages.insert(message.id.clone()));
        if chat.messages.len() != total {
            warn!(
                "Dropped {} invalid message(s) from chat '{}'",
                total - chat.messages.len(),
                chat.id
            );
        }
        if chat.messages.is_empty() {
            warn!("Dropping chat '{}' with no valid messages", chat.id);
            continue;
        }
        kept.push(chat);
    }

    kept
}

impl History {
    /// Applies `action` in place. Rejected actions are logged and returned.
    pub fn dispatch(&mut self, action: Action) -> Option<HistoryWarning> {
        match reduce(self, action) {
            Ok(next) => {
                *self = next;
                None
            }
            Err(warning) => {
                warn!("Ignoring history action: {}", warning);
                Some(warning)
            }
        }
    }
}
