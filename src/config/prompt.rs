use serde::Deserialize;
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::Path;
use log::info;

pub const ITINERARY_MARKER: &str = "[TRAVEL_ITINERARY]";

const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a specialized personal assistant focused ONLY on travel planning and gift recommendations.
Do not answer questions outside these two categories. Politely decline requests unrelated to travel or gifts.

**Travel Planning:**
- When asked about travel, first gather key information: destination, travel dates (or duration/season), budget (low, mid, high, or specific amount), traveler preferences (e.g., relaxation, adventure, culture, family-friendly), and number of travelers.
- Ask clarifying follow-up questions one or two at a time until you have enough information.
- Once you have sufficient details, suggest itineraries, accommodation options (hotels, rentals), activities, and potential transportation methods.
- When providing a complete travel itinerary, ALWAYS include the text "[TRAVEL_ITINERARY]" at the beginning of your response.
- Provide estimated costs where possible (mentioning they are estimates).
- Offer relevant travel tips (e.g., visa requirements, best time to visit, packing suggestions).
- Avoid getting stuck asking the same questions if the user provides the information. Acknowledge the information received.

**Gift Recommendations:**
- When asked for gift ideas, first gather information about the recipient: age range, relationship to the user (e.g., friend, partner, parent, colleague), interests/hobbies.
- Inquire about the occasion (e.g., birthday, anniversary, holiday, thank you), the budget (low, mid, high, or specific amount), and any specific preferences or dislikes.
- Ask clarifying follow-up questions one or two at a time.
- Once you have enough details, suggest 3-5 specific gift ideas.
- For each suggestion, provide a brief reasoning explaining why it fits the recipient and occasion.
- If possible, suggest where such gifts might be found (e.g., online retailers, specific types of stores).

**General Behavior:**
- Maintain context throughout the conversation. Refer back to previously mentioned details.
- Be conversational and friendly, but stay focused on the task.
- If the user's request is unclear within the travel/gift context, ask for clarification.
- Structure longer responses with bullet points or numbered lists for readability.
- Do not invent web links or specific store inventory. You can suggest *types* of stores or online platforms.
- After providing initial suggestions for either travel or gifts, you can offer a concise summary. Only provide a summary if requested or after explicitly offering one.
- Remember to include "[TRAVEL_ITINERARY]" at the beginning of any response that contains a travel plan with destinations, activities, or accommodation details.
"#;

#[derive(Debug)]
pub enum PromptError {
    StarterNotFound(String),
    Invalid(String),
    IoError(std::io::Error),
    JsonError(serde_json::Error),
}

impl fmt::Display for PromptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptError::StarterNotFound(key) => write!(f, "Starter prompt '{}' not found", key),
            PromptError::Invalid(msg) => write!(f, "Invalid prompt configuration: {}", msg),
            PromptError::IoError(e) => write!(f, "Prompt file IO error: {}", e),
            PromptError::JsonError(e) => write!(f, "Prompt JSON parsing error: {}", e),
        }
    }
}

impl Error for PromptError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PromptError::IoError(e) => Some(e),
            PromptError::JsonError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PromptError {
    fn from(err: std::io::Error) -> Self {
        PromptError::IoError(err)
    }
}

impl From<serde_json::Error> for PromptError {
    fn from(err: serde_json::Error) -> Self {
        PromptError::JsonError(err)
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct StarterPrompt {
    /// Shortcut name, used as `/<key>` in the REPL.
    pub key: String,
    pub label: String,
    pub prompt: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct PromptConfig {
    pub system_prompt: String,
    #[serde(default)]
    pub starter_prompts: Vec<StarterPrompt>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            starter_prompts: vec![
                StarterPrompt {
                    key: "travel".to_string(),
                    label: "Travel Planning".to_string(),
                    prompt: "I need help planning a vacation. Can you suggest some destinations and travel tips?".to_string(),
                },
                StarterPrompt {
                    key: "gift".to_string(),
                    label: "Gift Ideas".to_string(),
                    prompt: "I'm looking for gift ideas for a special occasion. Can you help me?".to_string(),
                }
            ],
        }
    }
}

impl PromptConfig {
    fn validate(&self) -> Result<(), PromptError> {
        if self.system_prompt.trim().is_empty() {
            return Err(PromptError::Invalid("system_prompt is empty".to_string()));
        }
        for starter in &self.starter_prompts {
            if starter.key.trim().is_empty() || starter.prompt.trim().is_empty() {
                return Err(PromptError::Invalid(format!("starter prompt '{}' is incomplete", starter.label)));
            }
        }
        Ok(())
    }

    pub fn starter(&self, key: &str) -> Result<&StarterPrompt, PromptError> {
        self.starter_prompts
            .iter()
            .find(|s| s.key.eq_ignore_ascii_case(key))
            .ok_or_else(|| PromptError::StarterNotFound(key.to_string()))
    }
}

pub fn load_prompts<P: AsRef<Path>>(path: P) -> Result<PromptConfig, PromptError> {
    let file_content = fs::read_to_string(path.as_ref())?;
    let config: PromptConfig = serde_json::from_str(&file_content)?;
    config.validate()?;
    info!("Loaded {} starter prompt(s) from {}", config.starter_prompts.len(), path.as_ref().display());
    Ok(config)
}

/// Uses the built-in prompts when no path is configured.
pub fn load_or_default(path: Option<&str>) -> Result<PromptConfig, PromptError> {
    match path {
        Some(p) if !p.trim().is_empty() => load_prompts(p),
        _ => Ok(PromptConfig::default()),
    }
}
