//! Offline repair of a persisted history snapshot.
//!
//! Unlike [`codec::decode`](super::codec::decode), repair works on raw JSON
//! and salvages whatever entries still carry the minimal set of fields.
//! It is only ever run on request.

use crate::history::reducer::resolve_current_chat_id;
use crate::history::{ codec, SnapshotStore, StoreError };
use crate::models::chat::{ Chat, ChatMessage, History, Role };
use chrono::{ DateTime, Utc };
use log::{ info, warn };
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct RepairReport {
    pub history: History,
    pub chats_before: usize,
    pub messages_before: usize,
}

impl RepairReport {
    pub fn chats_removed(&self) -> usize {
        self.chats_before.saturating_sub(self.history.chats.len())
    }

    pub fn messages_removed(&self) -> usize {
        let after: usize = self.history.chats
            .iter()
            .map(|c| c.messages.len())
            .sum();
        self.messages_before.saturating_sub(after)
    }
}

fn non_empty_str<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
    non_empty_str(value, "createdAt")
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_message(value: &Value) -> Option<ChatMessage> {
    Some(ChatMessage {
        id: non_empty_str(value, "id")?.to_string(),
        role: non_empty_str(value, "role")?.parse::<Role>().ok()?,
        content: non_empty_str(value, "content")?.to_string(),
        created_at: timestamp(value)?,
    })
}

/// Keeps one message per `(id, role, content)`, the latest `createdAt` winning.
fn dedupe_messages(raw: &[Value]) -> Vec<ChatMessage> {
    let mut index: HashMap<(String, Role, String), usize> = HashMap::new();
    let mut kept: Vec<ChatMessage> = Vec::new();

    for message in raw.iter().filter_map(parse_message) {
        let key = (message.id.clone(), message.role, message.content.clone());
        match index.get(&key) {
            Some(&slot) => {
                if message.created_at > kept[slot].created_at {
                    kept[slot] = message;
                }
            }
            None => {
                index.insert(key, kept.len());
                kept.push(message);
            }
        }
    }

    kept
}

/// Chats left without a single valid message are dropped, as they would be at load.
fn parse_chat(value: &Value) -> Option<Chat> {
    let messages = dedupe_messages(value.get("messages")?.as_array()?);
    if messages.is_empty() {
        return None;
    }
    Some(Chat {
        id: non_empty_str(value, "id")?.to_string(),
        title: non_empty_str(value, "title")?.to_string(),
        messages,
        created_at: timestamp(value)?,
    })
}

/// Repairs a raw snapshot. Returns `None` when it cannot be parsed at all.
pub fn repair_snapshot(raw: &str) -> Option<RepairReport> {
    let parsed: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!("Snapshot is not valid JSON, nothing to repair: {}", e);
            return None;
        }
    };
    let Some(entries) = parsed.get("history").and_then(Value::as_array) else {
        warn!("Snapshot has no history array, nothing to repair");
        return None;
    };

    let mut messages_before = 0;
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut chats: Vec<Chat> = Vec::new();

    for entry in entries {
        if let Some(count) = entry.get("messages").and_then(Value::as_array).map(Vec::len) {
            messages_before += count;
        }
        let Some(chat) = parse_chat(entry) else {
            continue;
        };
        match index.get(&chat.id) {
            Some(&slot) => {
                if chat.created_at > chats[slot].created_at {
                    chats[slot] = chat;
                }
            }
            None => {
                index.insert(chat.id.clone(), chats.len());
                chats.push(chat);
            }
        }
    }

    chats.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let requested = parsed.get("currentChatId").and_then(Value::as_str);
    let current_chat_id = resolve_current_chat_id(&chats, requested);

    Some(RepairReport {
        history: History { chats, current_chat_id },
        chats_before: entries.len(),
        messages_before,
    })
}

/// Reads the snapshot under `key`, repairs it and writes the result back.
/// Returns `Ok(None)` when there was nothing to repair.
pub async fn apply_repair(
    store: &dyn SnapshotStore,
    key: &str
) -> Result<Option<RepairReport>, StoreError> {
    let Some(raw) = store.load(key).await? else {
        info!("No chat history stored under '{}'", key);
        return Ok(None);
    };
    let Some(report) = repair_snapshot(&raw) else {
        return Ok(None);
    };
    store.save(key, &codec::encode(&report.history)?).await?;
    info!(
        "Repaired chat history: {} chat(s), removed {} chat(s) and {} message(s)",
        report.history.chats.len(),
        report.chats_removed(),
        report.messages_removed()
    );
    Ok(Some(report))
}
