//! Zerodha-specific error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ZerodhaError {
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    /// Token expired, revoked or never valid
    #[error("token rejected: {0}")]
    TokenRejected(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("credentials not configured")]
    NotConfigured,
}

impl ZerodhaError {
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::TokenRejected(_) | Self::NotConfigured)
    }
}

pub type ZerodhaResult<T> = Result<T, ZerodhaError>;
