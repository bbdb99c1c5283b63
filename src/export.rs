use crate::config::prompt::ITINERARY_MARKER;
use crate::models::chat::{ Chat, Role };
use lazy_static::lazy_static;
use log::info;
use regex::Regex;
use std::fmt::Write as _;
use std::path::Path;
use thiserror::Error;

const ITINERARY_INDICATORS: &[&str] = &[
    "day 1", "day 2", "day 3", "day 4", "day 5",
    "day one", "day two", "day three", "day four", "day five",
    "itinerary", "travel plan", "schedule", "travel dates",
    "destination", "trip to", "vacation in",
    "accommodation", "hotel", "lodging", "stay at", "resort", "airbnb", "ryokan", "hostel",
    "flight", "train", "transportation", "transit", "jr pass", "rail pass", "subway",
    "sightseeing", "attraction", "museum", "temple", "shrine",
];

lazy_static! {
    static ref NUMBERED_LIST: Regex = Regex::new(r"(?m)^\s*\d+\.\s").unwrap();
    static ref BULLET_LIST: Regex = Regex::new(r"(?m)^\s*[*\-•]\s").unwrap();
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("chat '{0}' has no itinerary to export")]
    NoItinerary(String),
    #[error("failed to write export: {0}")]
    Io(#[from] std::io::Error),
}

pub fn contains_itinerary(content: &str) -> bool {
    if content.contains(ITINERARY_MARKER) {
        return true;
    }
    let lower = content.to_lowercase();
    if ITINERARY_INDICATORS.iter().any(|indicator| lower.contains(indicator)) {
        return true;
    }
    NUMBERED_LIST.is_match(content) &&
        BULLET_LIST.is_match(content) &&
        (lower.contains("travel") || lower.contains("visit"))
}

fn strip_marker(content: &str) -> &str {
    content.trim_start().strip_prefix(ITINERARY_MARKER).unwrap_or(content).trim()
}

/// Full conversation as Markdown.
pub fn render_chat_markdown(chat: &Chat) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}\n", chat.title);
    let _ = writeln!(out, "_Started {}_\n", chat.created_at.format("%Y-%m-%d %H:%M UTC"));
    for message in &chat.messages {
        let speaker = match message.role {
            Role::User => "You",
            Role::Assistant => "Assistant",
            Role::System => "System",
        };
        let _ = writeln!(out, "**{}:**\n\n{}\n", speaker, strip_marker(&message.content));
    }
    out
}

/// Latest assistant reply that reads like an itinerary, as a Markdown document.
pub fn render_itinerary(chat: &Chat) -> Result<String, ExportError> {
    let reply = chat.messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant && contains_itinerary(&m.content))
        .ok_or_else(|| ExportError::NoItinerary(chat.id.clone()))?;

    let mut out = String::new();
    let _ = writeln!(out, "# Travel Itinerary: {}\n", chat.title);
    let _ = writeln!(out, "{}\n", strip_marker(&reply.content));
    let _ = writeln!(out, "---\n_Generated {}_", reply.created_at.format("%Y-%m-%d"));
    Ok(out)
}

pub async fn export_itinerary(chat: &Chat, path: &Path) -> Result<(), ExportError> {
    let document = render_itinerary(chat)?;
    tokio::fs::write(path, document).await?;
    info!("Exported itinerary for chat '{}' to {}", chat.id, path.display());
    Ok(())
}

pub async fn export_chat_markdown(chat: &Chat, path: &Path) -> Result<(), ExportError> {
    tokio::fs::write(path, render_chat_markdown(chat)).await?;
    info!("Exported chat '{}' to {}", chat.id, path.display());
    Ok(())
}
