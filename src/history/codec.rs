use crate::models::chat::History;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{entity} has an empty '{field}'")]
    EmptyField {
        entity: &'static str,
        field: &'static str,
    },
}

pub fn encode(history: &History) -> Result<String, serde_json::Error> {
    serde_json::to_string(history)
}

/// Strict decode. Any structural problem rejects the whole snapshot.
pub fn decode(raw: &str) -> Result<History, DecodeError> {
    let history: History = serde_json::from_str(raw)?;

    for chat in &history.chats {
        if chat.id.trim().is_empty() {
            return Err(DecodeError::EmptyField { entity: "chat", field: "id" });
        }
        for message in &chat.messages {
            if !message.has_id() {
                return Err(DecodeError::EmptyField { entity: "message", field: "id" });
            }
        }
    }

    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::{ Chat, ChatMessage, Role };
    use chrono::{ TimeZone, Utc };

    fn sample() -> History {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 12, 30, 5).unwrap();
        History {
            chats: vec![Chat {
                id: "c1".to_string(),
                title: "Plan a trip to Kyoto".to_string(),
                messages: vec![
                    ChatMessage {
                        id: "m1".to_string(),
                        role: Role::User,
                        content: "Plan a trip to Kyoto".to_string(),
                        created_at: at,
                    },
                    ChatMessage {
                        id: "m2".to_string(),
                        role: Role::Assistant,
                        content: "Sure!\nWhen are you going?".to_string(),
                        created_at: at,
                    }
                ],
                created_at: at,
            }],
            current_chat_id: Some("c1".to_string()),
        }
    }

    #[test]
    fn round_trip_is_lossless() {
        let history = sample();
        let raw = encode(&history).unwrap();
        assert_eq!(decode(&raw).unwrap(), history);

        let empty = History::default();
        assert_eq!(decode(&encode(&empty).unwrap()).unwrap(), empty);
    }

    #[test]
    fn encodes_persisted_layout() {
        let value: serde_json::Value = serde_json::from_str(&encode(&sample()).unwrap()).unwrap();
        assert!(value["history"].is_array());
        assert_eq!(value["currentChatId"], "c1");
        assert_eq!(value["history"][0]["messages"][0]["role"], "user");
        assert!(value["history"][0]["createdAt"].is_string());
    }

    #[test]
    fn accepts_browser_style_snapshot() {
        let raw = r#"{
            "history": [{
                "id": "1714",
                "title": "Gift ideas",
                "createdAt": "2024-01-01T00:00:00.000Z",
                "messages": [
                    {"id": "m1", "role": "user", "content": "Gift ideas", "createdAt": "2024-01-01T00:00:00Z"}
                ]
            }],
            "currentChatId": null
        }"#;
        let history = decode(raw).unwrap();
        assert_eq!(history.chats.len(), 1);
        assert_eq!(history.current_chat_id, None);
    }

    #[test]
    fn missing_messages_rejects_whole_snapshot() {
        let raw = r#"{
            "history": [
                {"id": "c1", "title": "ok", "createdAt": "2024-01-01T00:00:00Z",
                 "messages": [{"id": "m1", "role": "user", "content": "x", "createdAt": "2024-01-01T00:00:00Z"}]},
                {"id": "c2", "title": "broken", "createdAt": "2024-01-01T00:00:00Z"}
            ],
            "currentChatId": "c1"
        }"#;
        assert!(matches!(decode(raw), Err(DecodeError::Json(_))));
    }

    #[test]
    fn rejects_unknown_role_and_empty_ids() {
        let bad_role = r#"{"history": [{"id": "c1", "title": "t", "createdAt": "2024-01-01T00:00:00Z",
            "messages": [{"id": "m1", "role": "tool", "content": "x", "createdAt": "2024-01-01T00:00:00Z"}]}],
            "currentChatId": null}"#;
        assert!(decode(bad_role).is_err());

        let empty_id = r#"{"history": [{"id": "", "title": "t", "createdAt": "2024-01-01T00:00:00Z",
            "messages": []}], "currentChatId": null}"#;
        assert!(matches!(
            decode(empty_id),
            Err(DecodeError::EmptyField { entity: "chat", field: "id" })
        ));

        assert!(decode("{\"currentChatId\": null}").is_err());
        assert!(decode("not json").is_err());
    }
}
