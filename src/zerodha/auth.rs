//! Authentication utilities for Zerodha Kite API

use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
    pub access_token: Option<String>,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            access_token: None,
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Placeholder values from a template `.env` count as missing
    pub fn is_configured(&self) -> bool {
        is_real_credential(&self.api_key)
            && self
                .access_token
                .as_deref()
                .map(is_real_credential)
                .unwrap_or(false)
    }

    /// `Authorization` header value for authenticated endpoints
    pub fn authorization(&self) -> String {
        format!(
            "token {}:{}",
            self.api_key,
            self.access_token.as_deref().unwrap_or_default()
        )
    }
}

/// False for empty values and template placeholders such as `your_api_key`
pub fn is_real_credential(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && !value.contains("your_")
}

/// Checksum for `POST /session/token`: SHA-256 of key, request token and secret
pub fn generate_checksum(api_key: &str, request_token: &str, api_secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hasher.update(request_token.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}
