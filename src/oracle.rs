//! Second-opinion confirmation for trade signals
//!
//! The oracle is advisory and fail-open: any error or timeout counts as a
//! confirmation so an unreachable service never blocks trading on its own.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    BadResponse(String),
}

#[async_trait]
pub trait ConfirmationOracle: Send + Sync {
    /// Whether the conditions in `summary` favour the proposed trade
    async fn confirm(&self, summary: &str) -> Result<bool, OracleError>;
}

/// Ask the oracle with a deadline; errors and timeouts confirm
pub async fn confirm_or_open(oracle: &dyn ConfirmationOracle, summary: &str, limit: Duration) -> bool {
    match timeout(limit, oracle.confirm(summary)).await {
        Ok(Ok(confirmed)) => confirmed,
        Ok(Err(e)) => {
            warn!("Oracle unavailable, proceeding on technicals: {}", e);
            true
        }
        Err(_) => {
            warn!("Oracle timed out after {:?}, proceeding on technicals", limit);
            true
        }
    }
}

/// Accepts every signal
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysConfirm;

#[async_trait]
impl ConfirmationOracle for AlwaysConfirm {
    async fn confirm(&self, _summary: &str) -> Result<bool, OracleError> {
        Ok(true)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub enabled: bool,
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            model: "gemini-1.5-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1".to_string(),
            timeout_ms: 3_000,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Verdict {
    confirmed: bool,
    #[serde(default)]
    reason: String,
}

/// Gemini `generateContent` backed oracle
pub struct GeminiOracle {
    client: Client,
    url: String,
}

impl GeminiOracle {
    pub fn new(config: &OracleConfig) -> Result<Self, OracleError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .build()?;
        Ok(Self {
            client,
            url: format!(
                "{}/models/{}:generateContent?key={}",
                config.base_url, config.model, config.api_key
            ),
        })
    }

    fn prompt(summary: &str) -> String {
        format!(
            "Act as a professional quant trader. Analyze the following stock data and confirm \
             if a mean reversion counter-trend trade is advisable.\nData: {}\n\
             Return ONLY a JSON object with 'confirmed' (bool) and 'reason' (string).",
            summary
        )
    }
}

/// Pull the verdict out of the model's text, tolerating a fenced code block
fn parse_verdict(text: &str) -> Result<Verdict, OracleError> {
    let cleaned = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    serde_json::from_str(cleaned).map_err(|e| OracleError::BadResponse(e.to_string()))
}

#[async_trait]
impl ConfirmationOracle for GeminiOracle {
    async fn confirm(&self, summary: &str) -> Result<bool, OracleError> {
        let payload = json!({
            "contents": [{ "parts": [{ "text": Self::prompt(summary) }] }]
        });
        let body: serde_json::Value = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await?
            .json()
            .await?;

        let text = body["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or_else(|| {
                let message = body["error"]["message"].as_str().unwrap_or("no candidates");
                OracleError::BadResponse(message.to_string())
            })?;
        let verdict = parse_verdict(text)?;
        debug!("Oracle reasoning: {}", verdict.reason);
        if !verdict.confirmed {
            info!("Oracle rejected: {}", verdict.reason);
        }
        Ok(verdict.confirmed)
    }
}
