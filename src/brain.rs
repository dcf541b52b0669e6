use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{info, warn};

use crate::types::{ActionCall, Part, Role, Turn, Viewport};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const COMPUTER_USE_MODEL: &str = "gemini-2.5-computer-use-preview-10-2025";
pub const CHAT_MODEL: &str = "gemini-2.5-flash";
pub const FALLBACK_CHAT_MODEL: &str = "gemini-2.0-flash";
/// Upper bound on one `generateContent` round trip.
pub const PLANNER_TIMEOUT: Duration = Duration::from_secs(180);

/// Decides the next browser actions from the conversation so far.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Fail fast if the planner cannot be reached at all (e.g. no API key).
    fn check(&self) -> Result<()>;

    /// Returns the planner's reply turn: text, action calls, or both.
    async fn plan(&self, conversation: &[Turn], viewport: Viewport) -> Result<Turn>;
}

/// The opening instruction for a car search.
pub fn goal_prompt(budget: f64) -> String {
    format!(
        "Find Toyota cars for sale that cost at most ${budget:.0}. \
         Use a public car listing site (for example toyota.com inventory, cars.com or autotrader.com), \
         search for listings within the budget and read the results. \
         When you have found up to 5 good options, stop using the browser and reply with plain text only: \
         one line per car with year, make, model, price, whether it is new or used, and a short description."
    )
}

/// Thin REST client for the Gemini `generateContent` endpoint.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(PLANNER_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: GEMINI_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, model: &str, body: &Value) -> Result<GenerateResponse> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("GEMINI_API_KEY not set in environment"))?;
        let model = model.strip_prefix("models/").unwrap_or(model);

        let response = self
            .client
            .post(format!("{}/models/{}:generateContent", self.base_url, model))
            .header("x-goog-api-key", api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let err_msg = api_error_message(&body);
            warn!("[brain] API error ({}): {}", status, err_msg);
            bail!("Gemini API error ({}): {}", status, err_msg);
        }

        serde_json::from_str(&body)
            .map_err(|e| anyhow!("Malformed Gemini response ({}): {}", status, e))
    }

    /// Plain text generation with one retry on the fallback model.
    pub async fn generate_text(&self, model: &str, contents: Value) -> Result<String> {
        let body = json!({ "contents": contents });
        let response = match self.generate(model, &body).await {
            Ok(r) => r,
            Err(e) if model != FALLBACK_CHAT_MODEL => {
                warn!("[brain] Model {} failed ({:#}), trying {}", model, e, FALLBACK_CHAT_MODEL);
                self.generate(FALLBACK_CHAT_MODEL, &body).await?
            }
            Err(e) => return Err(e),
        };

        let text = decode_reply(response)?.text();
        if text.is_empty() {
            bail!("Empty response from Gemini");
        }
        Ok(text)
    }
}

/// `error.message` of a Gemini error body, or the raw body when it is not
/// the usual JSON envelope (proxies answer with HTML).
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                "Unknown API error".to_string()
            } else {
                trimmed.chars().take(200).collect()
            }
        })
}

/// Computer-use planner backed by Gemini.
pub struct Brain {
    gemini: GeminiClient,
    model: String,
}

impl Brain {
    pub fn new(gemini: GeminiClient, model: impl Into<String>) -> Self {
        Self {
            gemini,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Planner for Brain {
    fn check(&self) -> Result<()> {
        if self.gemini.is_configured() {
            Ok(())
        } else {
            bail!("GEMINI_API_KEY not set in environment")
        }
    }

    async fn plan(&self, conversation: &[Turn], viewport: Viewport) -> Result<Turn> {
        let contents: Vec<Value> = conversation.iter().map(encode_turn).collect();

        let body = json!({
            "systemInstruction": {
                "parts": [{
                    "text": format!(
                        "You are operating a web browser with a {}x{} pixel viewport. \
                         Coordinates you emit are on a 0-1000 grid in both axes.",
                        viewport.width, viewport.height
                    )
                }]
            },
            "contents": contents,
            "tools": [{ "computerUse": { "environment": "ENVIRONMENT_BROWSER" } }],
        });

        let reply = decode_reply(self.gemini.generate(&self.model, &body).await?)?;
        let calls = reply.calls();
        if calls.is_empty() {
            info!("[brain] Planner answered without actions");
        } else {
            let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
            info!("[brain] Planner wants: {}", names.join(", "));
        }
        Ok(reply)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: bool,
    #[serde(default)]
    function_call: Option<WireCall>,
    #[serde(default)]
    thought_signature: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireCall {
    name: String,
    #[serde(default)]
    args: Value,
}

fn decode_reply(response: GenerateResponse) -> Result<Turn> {
    let GenerateResponse {
        candidates,
        prompt_feedback,
    } = response;
    let candidate = candidates.into_iter().next().ok_or_else(|| {
        anyhow!(
            "No candidates in Gemini response (feedback: {})",
            prompt_feedback.unwrap_or(Value::Null)
        )
    })?;
    let content = candidate.content.ok_or_else(|| {
        anyhow!(
            "Gemini returned no content (finish reason: {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        )
    })?;

    let parts = content
        .parts
        .into_iter()
        .filter_map(|p| match (p.function_call, p.text) {
            (Some(call), _) => Some(Part::Call(ActionCall {
                name: call.name,
                args: call.args,
                signature: p.thought_signature,
            })),
            (None, Some(text)) if !p.thought => Some(Part::Text(text)),
            _ => None,
        })
        .collect();

    Ok(Turn::model(parts))
}

fn encode_turn(turn: &Turn) -> Value {
    let role = match turn.role {
        Role::User => "user",
        Role::Model => "model",
    };
    let parts: Vec<Value> = turn.parts.iter().map(encode_part).collect();
    json!({ "role": role, "parts": parts })
}

fn encode_part(part: &Part) -> Value {
    match part {
        Part::Text(text) => json!({ "text": text }),
        Part::Image { mime_type, data } => json!({
            "inlineData": { "mimeType": mime_type, "data": BASE64.encode(data) }
        }),
        Part::Call(call) => {
            let mut v = json!({ "functionCall": { "name": call.name, "args": call.args } });
            if let Some(sig) = &call.signature {
                v["thoughtSignature"] = json!(sig);
            }
            v
        }
        Part::Observation(obs) => {
            let mut response = json!({ "url": obs.url });
            if let Some(message) = obs.result.error_message() {
                response["error"] = json!(message);
            }
            let mut v = json!({
                "functionResponse": { "name": obs.action, "response": response }
            });
            if !obs.screenshot.is_empty() {
                v["functionResponse"]["parts"] = json!([{
                    "inlineData": {
                        "mimeType": "image/png",
                        "data": BASE64.encode(&obs.screenshot)
                    }
                }]);
            }
            v
        }
    }
}
