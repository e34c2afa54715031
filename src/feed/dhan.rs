//! Dhan market feed quote source
//!
//! `POST /v2/marketfeed/quote` takes security ids grouped by exchange
//! segment, so every traded symbol needs a configured NSE_EQ id. Symbols
//! without one are left out of the batch.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

use super::{FeedError, QuoteApi, QuoteBatch};
use crate::{Bar, Symbol};

pub const API_BASE_URL: &str = "https://api.dhan.co";

const SEGMENT: &str = "NSE_EQ";

#[derive(Debug, Deserialize)]
struct DhanOhlc {
    open: f64,
    high: f64,
    low: f64,
}

#[derive(Debug, Deserialize)]
struct DhanQuote {
    last_price: f64,
    #[serde(default)]
    volume: f64,
    ohlc: DhanOhlc,
}

#[derive(Debug, Deserialize)]
struct DhanResponse {
    #[serde(default)]
    data: HashMap<String, HashMap<String, DhanQuote>>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, rename = "errorCode")]
    error_code: Option<String>,
    #[serde(default, rename = "errorMessage")]
    error_message: Option<String>,
}

pub struct DhanQuotes {
    client: Client,
    base_url: String,
    client_id: String,
    access_token: String,
    security_ids: HashMap<String, u64>,
}

impl DhanQuotes {
    pub fn new(
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        access_token: impl Into<String>,
        security_ids: HashMap<String, u64>,
        timeout: Duration,
    ) -> Result<Self, FeedError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            client_id: client_id.into(),
            access_token: access_token.into(),
            security_ids,
        })
    }

    fn decode(&self, status: u16, body: &str, symbols: &[Symbol]) -> Result<QuoteBatch, FeedError> {
        let response: Option<DhanResponse> = serde_json::from_str(body).ok();
        let error_code = response.as_ref().and_then(|r| r.error_code.clone());
        let message = response
            .as_ref()
            .and_then(|r| r.error_message.clone())
            .unwrap_or_else(|| body.chars().take(200).collect());

        if status == 401 || error_code.as_deref() == Some("DH-901") {
            return Err(FeedError::AuthRejected(message));
        }
        if !(200..300).contains(&status) {
            return Err(FeedError::Api { status, message });
        }
        let response = response.ok_or(FeedError::Parse(message))?;
        if response.status.as_deref().is_some_and(|s| s != "success") {
            return Err(FeedError::Api {
                status,
                message: format!("status {:?}", response.status),
            });
        }

        let mut batch = QuoteBatch::new();
        let Some(segment) = response.data.get(SEGMENT) else {
            return Ok(batch);
        };
        for symbol in symbols {
            let Some(id) = self.security_ids.get(symbol.as_str()) else {
                continue;
            };
            if let Some(q) = segment.get(&id.to_string()) {
                let high = q.ohlc.high.max(q.last_price);
                let low = q.ohlc.low.min(q.last_price);
                batch.insert(
                    symbol.clone(),
                    Bar::new(q.ohlc.open, high, low, q.last_price, q.volume),
                );
            }
        }
        Ok(batch)
    }
}

#[async_trait]
impl QuoteApi for DhanQuotes {
    fn name(&self) -> &str {
        "dhan"
    }

    async fn fetch(&self, symbols: &[Symbol]) -> Result<QuoteBatch, FeedError> {
        let ids: Vec<u64> = symbols
            .iter()
            .filter_map(|s| self.security_ids.get(s.as_str()).copied())
            .collect();
        if ids.is_empty() {
            return Ok(QuoteBatch::new());
        }

        let response = self
            .client
            .post(format!("{}/v2/marketfeed/quote", self.base_url))
            .header("access-token", &self.access_token)
            .header("client-id", &self.client_id)
            .json(&json!({ "NSE_EQ": ids }))
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        self.decode(status, &body, symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> DhanQuotes {
        let mut ids = HashMap::new();
        ids.insert("RELIANCE".to_string(), 2885);
        DhanQuotes::new(API_BASE_URL, "cid", "tok", ids, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_decode_quote() {
        let body = r#"{
            "status": "success",
            "data": {"NSE_EQ": {"2885": {
                "last_price": 2950.5, "volume": 5000,
                "ohlc": {"open": 2940.0, "close": 2930.0, "high": 2955.0, "low": 2935.0}
            }}}
        }"#;
        let syms = vec![Symbol::new("RELIANCE"), Symbol::new("UNMAPPED")];
        let batch = source().decode(200, body, &syms).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[&Symbol::new("RELIANCE")].close, 2950.5);
    }

    #[test]
    fn test_auth_rejection_codes() {
        let body = r#"{"errorType": "Invalid_Authentication", "errorCode": "DH-901", "errorMessage": "Client ID or user generated access token is invalid or expired."}"#;
        assert!(matches!(
            source().decode(400, body, &[]),
            Err(FeedError::AuthRejected(_))
        ));
        assert!(matches!(
            source().decode(401, "", &[]),
            Err(FeedError::AuthRejected(_))
        ));
        assert!(matches!(
            source().decode(500, "oops", &[]),
            Err(FeedError::Api { status: 500, .. })
        ));
    }
}
