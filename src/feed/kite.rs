//! Zerodha Kite quote source

use async_trait::async_trait;

use super::{FeedError, QuoteApi, QuoteBatch};
use crate::zerodha::{nse_instrument, ZerodhaClient, ZerodhaError, MAX_QUOTE_INSTRUMENTS};
use crate::Symbol;

impl From<ZerodhaError> for FeedError {
    fn from(err: ZerodhaError) -> Self {
        match err {
            ZerodhaError::TokenRejected(msg) => FeedError::AuthRejected(msg),
            ZerodhaError::NotConfigured => FeedError::AuthRejected("credentials not configured".into()),
            ZerodhaError::Network(e) => FeedError::from(e),
            ZerodhaError::Api { status, message } => FeedError::Api { status, message },
            ZerodhaError::Parse(msg) => FeedError::Parse(msg),
        }
    }
}

pub struct KiteQuotes {
    client: ZerodhaClient,
}

impl KiteQuotes {
    pub fn new(client: ZerodhaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl QuoteApi for KiteQuotes {
    fn name(&self) -> &str {
        "kite"
    }

    async fn verify(&self) -> Result<(), FeedError> {
        let profile = self.client.get_profile().await?;
        tracing::info!("[kite] Authenticated as {}", profile.user_id);
        Ok(())
    }

    async fn fetch(&self, symbols: &[Symbol]) -> Result<QuoteBatch, FeedError> {
        let mut batch = QuoteBatch::new();
        for chunk in symbols.chunks(MAX_QUOTE_INSTRUMENTS) {
            let names: Vec<&str> = chunk.iter().map(Symbol::as_str).collect();
            let quotes = self.client.get_quotes(&names).await?;
            for symbol in chunk {
                if let Some(quote) = quotes.get(&nse_instrument(symbol.as_str())) {
                    batch.insert(symbol.clone(), quote.to_bar());
                }
            }
        }
        Ok(batch)
    }
}
