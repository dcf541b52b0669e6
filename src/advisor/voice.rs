use anyhow::{Result, anyhow, bail};
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::warn;

pub const ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io/v1";
/// "Rachel".
pub const DEFAULT_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM";
const TTS_MODEL: &str = "eleven_monolingual_v1";

/// Text-to-speech through ElevenLabs.
#[derive(Clone)]
pub struct ElevenLabs {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl ElevenLabs {
    pub fn new(api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: ELEVENLABS_BASE_URL.to_string(),
        }
    }

    /// Returns MP3 bytes.
    pub async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<u8>> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("ELEVENLABS_API_KEY not set in environment"))?;

        let response = self
            .client
            .post(format!("{}/text-to-speech/{}", self.base_url, voice_id))
            .header("xi-api-key", api_key)
            .json(&json!({
                "text": text,
                "model_id": TTS_MODEL,
                "voice_settings": {
                    "stability": 0.5,
                    "similarity_boost": 0.75,
                },
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("[voice] ElevenLabs error ({}): {}", status, body);
            bail!("ElevenLabs error ({}): {}", status, body);
        }

        Ok(response.bytes().await?.to_vec())
    }
}
