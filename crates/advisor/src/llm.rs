use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};
use trading_core::{Regime, Signal, SignalFeatures};

use crate::error::{AdvisorError, AdvisorResult};
use crate::parse::parse_json_from_text;
use crate::rules::compose_default_notes;
use crate::{Advisor, AdvisorNote};

const SYSTEM_PROMPT: &str = "You are a concise crypto swing-trading analyst. Given numeric features and a \
preliminary signal, write a short rationale and a small confidence adjustment in JSON. \
Keep the adjustment conservative within [-0.15, 0.15].";

const INSTRUCTION: &str = "Analyze the following and return JSON with keys: confidence_delta ([-0.15,0.15]), \
notes (<=280 chars), risk_flags (list).";

const MAX_RISK_FLAGS: usize = 3;

/// Connection settings for an OpenAI-compatible chat completions endpoint
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout: Duration::from_secs(10),
            max_tokens: 300,
            temperature: 0.2,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Advisor backed by a hosted language model
#[derive(Clone)]
pub struct LlmAdvisor {
    client: reqwest::Client,
    config: LlmConfig,
}

impl LlmAdvisor {
    pub fn new(config: LlmConfig) -> AdvisorResult<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn has_credentials(&self) -> bool {
        self.config.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    fn user_payload(signal: &Signal, features: &SignalFeatures, regime: &Regime) -> Value {
        json!({
            "instruction": INSTRUCTION,
            "signal": {
                "symbol": signal.symbol,
                "market": signal.market,
                "timeframe": signal.timeframe,
                "confidence": signal.confidence,
                "expected_return_pct": signal.expected_return_pct,
                "entry": signal.entry,
                "tp": signal.tp,
                "sl": signal.sl,
                "side": signal.side,
            },
            "features": features,
            "regime": regime,
        })
    }

    async fn complete(&self, api_key: &str, user: String) -> AdvisorResult<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT.to_string() },
                ChatMessage { role: "user", content: user },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url.trim_end_matches('/')))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(map_transport)?;

        if !response.status().is_success() {
            return Err(AdvisorError::Unavailable(format!("Status: {}", response.status())));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| AdvisorError::MalformedResponse(e.to_string()))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|text| text.trim().to_string())
            .ok_or_else(|| AdvisorError::MalformedResponse("empty completion".to_string()))
    }
}

fn map_transport(e: reqwest::Error) -> AdvisorError {
    if e.is_timeout() {
        AdvisorError::Timeout
    } else {
        AdvisorError::RequestFailed(e)
    }
}

/// Turn completion text into a note. Structure problems are errors so the
/// caller falls back exactly as it would for an unreachable service.
pub(crate) fn note_from_completion(
    text: &str,
    features: &SignalFeatures,
    regime: &Regime,
) -> AdvisorResult<AdvisorNote> {
    let data = parse_json_from_text(text)
        .ok_or_else(|| AdvisorError::MalformedResponse("no JSON object in completion".to_string()))?;

    let delta = match data.get("confidence_delta") {
        None | Some(Value::Null) => 0.0,
        Some(v) => v.as_f64().ok_or_else(|| {
            AdvisorError::MalformedResponse(format!("confidence_delta is not a number: {}", v))
        })?,
    };

    let mut notes = data
        .get("notes")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| compose_default_notes(features, regime));

    let flags: Vec<&str> = data
        .get("risk_flags")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).take(MAX_RISK_FLAGS).collect())
        .unwrap_or_default();
    if !flags.is_empty() {
        notes = format!("{} [Flags: {}]", notes, flags.join(", "));
    }

    Ok(AdvisorNote::new(notes, delta))
}

#[async_trait]
impl Advisor for LlmAdvisor {
    async fn analyze(
        &self,
        signal: &Signal,
        features: &SignalFeatures,
        regime: &Regime,
    ) -> AdvisorResult<AdvisorNote> {
        let api_key = match self.config.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => key,
            _ => return Err(AdvisorError::Unavailable("no API key configured".to_string())),
        };

        info!(symbol = %signal.symbol, model = %self.config.model, "querying LLM advisor");
        let user = Self::user_payload(signal, features, regime).to_string();
        let text = self.complete(api_key, user).await?;
        debug!(symbol = %signal.symbol, response = %text, "LLM advisor replied");

        note_from_completion(&text, features, regime)
    }

    fn name(&self) -> &'static str {
        "llm"
    }
}
