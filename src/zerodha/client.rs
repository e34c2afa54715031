//! Zerodha Kite API Client
//!
//! Thin HTTP client for the Kite Connect v3 REST API. Every response is
//! decoded through the common envelope so token rejections surface as
//! `ZerodhaError::TokenRejected` regardless of the endpoint.

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::auth::{generate_checksum, Credentials};
use super::error::{ZerodhaError, ZerodhaResult};
use super::types::*;
use super::{nse_instrument, API_BASE_URL};

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: API_BASE_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Zerodha Kite API Client
#[derive(Debug, Clone)]
pub struct ZerodhaClient {
    client: Client,
    credentials: Credentials,
    config: ClientConfig,
}

impl ZerodhaClient {
    pub fn new(credentials: Credentials) -> ZerodhaResult<Self> {
        Self::with_config(credentials, ClientConfig::default())
    }

    pub fn with_config(credentials: Credentials, config: ClientConfig) -> ZerodhaResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            credentials,
            config,
        })
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("X-Kite-Version", "3")
            .header("Authorization", self.credentials.authorization())
    }

    /// Send and decode, classifying token failures
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> ZerodhaResult<T> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        let envelope: Option<Envelope<T>> = serde_json::from_str(&body).ok();
        let error_type = envelope.as_ref().and_then(|e| e.error_type.clone());
        let message = envelope
            .as_ref()
            .and_then(|e| e.message.clone())
            .unwrap_or_else(|| body.chars().take(200).collect());

        if status.as_u16() == 403 || error_type.as_deref() == Some("TokenException") {
            return Err(ZerodhaError::TokenRejected(message));
        }
        if !status.is_success() {
            return Err(ZerodhaError::Api {
                status: status.as_u16(),
                message,
            });
        }

        match envelope {
            Some(Envelope {
                data: Some(data), ..
            }) => Ok(data),
            Some(_) => Err(ZerodhaError::Api {
                status: status.as_u16(),
                message,
            }),
            None => Err(ZerodhaError::Parse(message)),
        }
    }

    /// Full quotes for NSE equities, keyed by `NSE:SYMBOL`
    pub async fn get_quotes(&self, symbols: &[&str]) -> ZerodhaResult<QuoteMap> {
        if !self.credentials.is_configured() {
            return Err(ZerodhaError::NotConfigured);
        }
        let params: Vec<(&str, String)> = symbols.iter().map(|s| ("i", nse_instrument(s))).collect();
        let request = self.authorized(self.client.get(self.url("/quote")).query(&params));
        self.send(request).await
    }

    /// Place a regular intraday (MIS) order on NSE, returning the order id
    pub async fn place_order(
        &self,
        tradingsymbol: &str,
        transaction_type: &str,
        quantity: u64,
        price: Option<f64>,
    ) -> ZerodhaResult<String> {
        let mut params = vec![
            ("exchange", "NSE".to_string()),
            ("tradingsymbol", tradingsymbol.to_string()),
            ("transaction_type", transaction_type.to_string()),
            ("quantity", quantity.to_string()),
            (
                "order_type",
                if price.is_some() { "LIMIT" } else { "MARKET" }.to_string(),
            ),
            ("product", "MIS".to_string()),
            ("validity", "DAY".to_string()),
        ];
        if let Some(p) = price {
            params.push(("price", format!("{:.2}", p)));
        }

        let request = self.authorized(self.client.post(self.url("/orders/regular")).form(&params));
        let ack: OrderAck = self.send(request).await?;
        Ok(ack.order_id)
    }

    /// Net positions for the day
    pub async fn get_positions(&self) -> ZerodhaResult<Vec<Position>> {
        let request = self.authorized(self.client.get(self.url("/portfolio/positions")));
        let positions: Positions = self.send(request).await?;
        Ok(positions.net)
    }

    /// Net equity segment margin
    pub async fn get_margins(&self) -> ZerodhaResult<f64> {
        let request = self.authorized(self.client.get(self.url("/user/margins")));
        let margins: Margins = self.send(request).await?;
        Ok(margins.equity.net)
    }

    /// Cheapest authenticated call; used to validate the access token
    pub async fn get_profile(&self) -> ZerodhaResult<Profile> {
        if !self.credentials.is_configured() {
            return Err(ZerodhaError::NotConfigured);
        }
        let request = self.authorized(self.client.get(self.url("/user/profile")));
        self.send(request).await
    }

    /// Exchange a login `request_token` for an access token
    pub async fn generate_session(&self, request_token: &str) -> ZerodhaResult<Session> {
        let checksum = generate_checksum(
            &self.credentials.api_key,
            request_token,
            &self.credentials.api_secret,
        );
        let params = [
            ("api_key", self.credentials.api_key.as_str()),
            ("request_token", request_token),
            ("checksum", checksum.as_str()),
        ];
        let request = self
            .client
            .post(self.url("/session/token"))
            .header("X-Kite-Version", "3")
            .form(&params);
        self.send(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = ZerodhaClient::new(Credentials::new("test_key", "test_secret")).unwrap();
        assert_eq!(client.credentials().api_key, "test_key");
        assert_eq!(client.url("/quote"), "https://api.kite.trade/quote");
    }

    #[test]
    fn test_config_builder() {
        let config = ClientConfig::default()
            .with_base_url("http://localhost:9000")
            .with_timeout(Duration::from_secs(3));
        assert_eq!(config.base_url, "http://localhost:9000");
        assert_eq!(config.timeout, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_unconfigured_quotes_are_rejected_locally() {
        let client = ZerodhaClient::new(Credentials::new("your_api_key", "s")).unwrap();
        let err = client.get_quotes(&["INFY"]).await.unwrap_err();
        assert!(err.is_auth_rejection());
    }
}
