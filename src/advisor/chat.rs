//! Stateless multi-turn chat used by the app's chat panel.

use serde::{Deserialize, Serialize};

use crate::payload::Validate;

const CHAT_SYSTEM_PROMPT: &str = "You are MoneyTalks, a helpful personal finance AI that gives \
concise, actionable advice. Answer using clear paragraphs, cite figures in USD, and reference \
spending trends only if mentioned.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    /// Gemini calls the assistant side "model".
    pub fn gemini_role(self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "model",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatContext {
    #[serde(default)]
    pub account_summary: Option<String>,
    #[serde(default)]
    pub goals: Option<String>,
}

/// Body of `POST /api/chat/completions`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub context: Option<ChatContext>,
}

impl Validate for ChatRequest {
    const KIND: &'static str = "chat";

    fn validate(&self) -> Result<(), String> {
        match self.messages.iter().position(|m| m.content.is_empty()) {
            Some(i) => Err(format!("messages[{i}].content must not be empty")),
            None => Ok(()),
        }
    }
}

impl ChatRequest {
    /// Instruction first, then the chat as sent, then whatever context the
    /// client attached.
    pub fn conversation(&self) -> Vec<ChatMessage> {
        let mut turns = Vec::with_capacity(self.messages.len() + 3);
        turns.push(ChatMessage::user(CHAT_SYSTEM_PROMPT));
        turns.extend(self.messages.iter().cloned());

        if let Some(context) = &self.context {
            if let Some(summary) = context.account_summary.as_deref().filter(|s| !s.is_empty()) {
                turns.push(ChatMessage::user(format!("Account summary: {summary}")));
            }
            if let Some(goals) = context.goals.as_deref().filter(|s| !s.is_empty()) {
                turns.push(ChatMessage::user(format!("Goals: {goals}")));
            }
        }
        turns
    }
}
