//! Conversational finance advisor: chat sessions, spending insights and
//! speech, each a thin wrapper around one external service call.

pub mod banking;
pub mod chat;
pub mod store;
pub mod voice;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::brain::GeminiClient;
use crate::error::{AdvisorError, ProxyError};
use banking::{NessieClient, SpendingSummary};
use chat::{ChatMessage, ChatRequest};
use store::{HistoryEntry, SessionRecord, SessionStore, Speaker};
use voice::ElevenLabs;

const HISTORY_WINDOW: usize = 5;

const SYSTEM_PROMPT: &str = r#"You are a professional financial advisor for MoneyTalks, a personal CFO platform.

Your role:
- Provide clear, actionable financial advice
- Be conversational but professional
- Keep responses concise (2-3 sentences for voice)
- Use specific numbers from the user's data
- Be encouraging but honest about financial situations

Response style:
- Natural, conversational tone suitable for voice
- Avoid jargon unless necessary
- Use "you" and "your" to personalize
- Give specific recommendations, not generic advice

DO NOT:
- Use emojis or playful language
- Make promises about returns or outcomes
- Give investment advice beyond general guidance
- Be overly formal or robotic"#;

const APOLOGY: &str = "I apologize, but I'm having trouble processing that right now. Could you try rephrasing your question?";
const WELCOME: &str = "Hello. I'm your MoneyTalks advisor. I've reviewed your recent financial activity. How can I help you today?";
const GREETING_PROMPT: &str = "Generate a brief, professional greeting for a user starting a financial advisor session. Include a quick overview of their current financial status.";
const SUMMARY_PROMPT: &str = "Provide a brief 2-sentence summary of our conversation and next steps.";

/// Text generation over a list of chat turns.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn converse(&self, messages: &[ChatMessage]) -> Result<String>;

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.converse(&[ChatMessage::user(prompt)]).await
    }
}

/// Gemini chat model behind [`TextModel`].
pub struct GeminiText {
    gemini: GeminiClient,
    model: String,
}

impl GeminiText {
    pub fn new(gemini: GeminiClient, model: impl Into<String>) -> Self {
        Self {
            gemini,
            model: model.into(),
        }
    }
}

#[async_trait]
impl TextModel for GeminiText {
    async fn converse(&self, messages: &[ChatMessage]) -> Result<String> {
        let contents: Vec<Value> = messages
            .iter()
            .map(|m| json!({ "role": m.role.gemini_role(), "parts": [{ "text": m.content }] }))
            .collect();
        self.gemini
            .generate_text(&self.model, Value::Array(contents))
            .await
    }
}

/// Render the spending summary plus the user's standing goals and
/// subscriptions.
pub fn financial_context(spending: &SpendingSummary) -> String {
    let categories = spending
        .top_categories
        .iter()
        .map(|c| format!("{} (${})", c.category, c.amount))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "User Financial Context:
- Total Spending This Month: ${}
- Budget Limit: ${}
- Budget Adherence: {}%
- Top Spending Categories: {}

Active Goals:
- Trip to Paris: $3,400 of $5,000 (68% complete)
- Emergency Fund: $4,500 of $10,000 (45% complete)
- New Laptop: $1,800 of $2,000 (90% complete)

Subscriptions:
- Netflix Premium: $19.99/month (renews Oct 28)
- Spotify Family: $16.99/month (renews Oct 30)
- Adobe Creative Cloud: $54.99/month (renews Nov 1)",
        spending.total_spending,
        spending.budget_limit,
        spending.budget_adherence,
        categories
    )
}

fn build_prompt(context: &str, message: &str, history: &[HistoryEntry]) -> String {
    let mut prompt = format!("{SYSTEM_PROMPT}\n\n{context}\n\n");
    if !history.is_empty() {
        let recent = &history[history.len().saturating_sub(HISTORY_WINDOW)..];
        let lines: Vec<String> = recent
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect();
        prompt.push_str(&format!("Recent Conversation:\n{}\n\n", lines.join("\n")));
    }
    prompt.push_str(&format!("User: {message}\n\nAdvisor:"));
    prompt
}

#[derive(Debug, Serialize)]
pub struct StartedSession {
    pub session_id: String,
    pub welcome_message: String,
    pub financial_summary: SpendingSummary,
}

#[derive(Debug, Serialize)]
pub struct ChatReply {
    pub response: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SpendingAnalysis {
    pub spending_summary: SpendingSummary,
    pub ai_insights: String,
}

#[derive(Debug, Serialize)]
pub struct GoalSuggestions {
    pub goals: String,
    pub based_on: SpendingSummary,
}

#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub summary: String,
    pub ended_at: DateTime<Utc>,
}

pub struct Advisor {
    model: Arc<dyn TextModel>,
    banking: NessieClient,
    voice: ElevenLabs,
    store: Arc<dyn SessionStore>,
}

impl Advisor {
    pub fn new(
        model: Arc<dyn TextModel>,
        banking: NessieClient,
        voice: ElevenLabs,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            model,
            banking,
            voice,
            store,
        }
    }

    async fn try_ask(
        &self,
        context: &str,
        message: &str,
        history: &[HistoryEntry],
    ) -> Result<String> {
        self.model
            .complete(&build_prompt(context, message, history))
            .await
    }

    /// Model failures degrade to a fixed apology.
    async fn ask(&self, context: &str, message: &str, history: &[HistoryEntry]) -> String {
        self.try_ask(context, message, history)
            .await
            .unwrap_or_else(|e| {
                warn!("[advisor] Gemini error: {:#}", e);
                APOLOGY.to_string()
            })
    }

    pub async fn spending_summary(&self) -> SpendingSummary {
        self.banking.spending_summary().await
    }

    pub async fn start_session(&self, user_id: Option<String>) -> StartedSession {
        let user_id = user_id.unwrap_or_else(|| "default".to_string());
        let summary = self.spending_summary().await;
        let context = financial_context(&summary);

        let welcome_message = match self.try_ask(&context, GREETING_PROMPT, &[]).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => WELCOME.to_string(),
            Err(e) => {
                warn!("[advisor] Greeting failed: {:#}", e);
                WELCOME.to_string()
            }
        };

        let session_id = format!("session_{}", Uuid::new_v4());
        self.store
            .insert(
                session_id.clone(),
                SessionRecord {
                    user_id,
                    started_at: Utc::now(),
                    history: vec![HistoryEntry::now(Speaker::Advisor, welcome_message.clone())],
                    context,
                },
            )
            .await;
        info!("[advisor] Started {}", session_id);

        StartedSession {
            session_id,
            welcome_message,
            financial_summary: summary,
        }
    }

    pub async fn chat(&self, session_id: &str, message: &str) -> Result<ChatReply, AdvisorError> {
        if self.store.get(session_id).await.is_none() {
            return Err(AdvisorError::InvalidSession);
        }
        if message.trim().is_empty() {
            return Err(AdvisorError::NoMessage);
        }

        if !self
            .store
            .append(session_id, HistoryEntry::now(Speaker::User, message))
            .await
        {
            return Err(AdvisorError::InvalidSession);
        }
        let session = self
            .store
            .get(session_id)
            .await
            .ok_or(AdvisorError::InvalidSession)?;

        let response = self.ask(&session.context, message, &session.history).await;
        let entry = HistoryEntry::now(Speaker::Advisor, response.clone());
        let timestamp = entry.timestamp;
        self.store.append(session_id, entry).await;

        Ok(ChatReply {
            response,
            timestamp,
        })
    }

    pub async fn analyze_spending(&self) -> SpendingAnalysis {
        let summary = self.spending_summary().await;
        let context = financial_context(&summary);
        let prompt = format!(
            "Analyze this spending data and provide 2-3 key insights: {}",
            serde_json::to_string(&summary).unwrap_or_default()
        );
        let ai_insights = self.ask(&context, &prompt, &[]).await;
        SpendingAnalysis {
            spending_summary: summary,
            ai_insights,
        }
    }

    pub async fn generate_goals(&self) -> GoalSuggestions {
        let summary = self.spending_summary().await;
        let context = financial_context(&summary);
        let prompt = format!(
            "Based on this financial data {}, suggest 3 realistic savings goals \
             with specific amounts and timeframes.",
            serde_json::to_string(&summary).unwrap_or_default()
        );
        let goals = self.ask(&context, &prompt, &[]).await;
        GoalSuggestions {
            goals,
            based_on: summary,
        }
    }

    pub async fn end_session(&self, session_id: &str) -> Result<SessionSummary, AdvisorError> {
        let session = self
            .store
            .remove(session_id)
            .await
            .ok_or(AdvisorError::SessionNotFound)?;
        let summary = self
            .ask(&session.context, SUMMARY_PROMPT, &session.history)
            .await;
        info!("[advisor] Ended {}", session_id);
        Ok(SessionSummary {
            summary,
            ended_at: Utc::now(),
        })
    }

    /// One stateless chat completion; nothing is stored.
    pub async fn chat_completion(&self, request: &ChatRequest) -> Result<String, ProxyError> {
        self.model
            .converse(&request.conversation())
            .await
            .map_err(|e| {
                warn!("[advisor] Chat completion failed: {:#}", e);
                ProxyError::Chat(e)
            })
    }

    pub async fn synthesize_speech(
        &self,
        text: &str,
        voice_id: Option<&str>,
    ) -> Result<Vec<u8>, AdvisorError> {
        if text.trim().is_empty() {
            return Err(AdvisorError::NoText);
        }
        self.voice
            .synthesize(text, voice_id.unwrap_or(voice::DEFAULT_VOICE_ID))
            .await
            .map_err(|e| {
                warn!("[advisor] ElevenLabs error: {:#}", e);
                AdvisorError::Speech(e)
            })
    }
}
