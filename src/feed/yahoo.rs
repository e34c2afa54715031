//! Yahoo Finance chart source (free tier, lowest priority)
//!
//! One request per symbol against the v8 chart endpoint with 1-minute
//! candles for the current day. The last complete row becomes the bar and
//! the row before it the prior. Rows with missing fields (the endpoint pads
//! with nulls) are skipped.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{FeedError, QuoteApi, QuoteBatch};
use crate::common::RateLimiter;
use crate::{Bar, Symbol};

pub const API_BASE_URL: &str = "https://query1.finance.yahoo.com";

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteSeries>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteSeries {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

impl QuoteSeries {
    fn row(&self, i: usize) -> Option<Bar> {
        Some(Bar::new(
            (*self.open.get(i)?)?,
            (*self.high.get(i)?)?,
            (*self.low.get(i)?)?,
            (*self.close.get(i)?)?,
            self.volume.get(i).copied().flatten().unwrap_or(0.0),
        ))
    }

    /// Last complete row with the one before it attached as prior
    fn latest(&self) -> Option<Bar> {
        let mut rows = (0..self.close.len()).rev().filter_map(|i| self.row(i));
        let bar = rows.next()?;
        Some(match rows.next() {
            Some(prior) => bar.with_prior(prior),
            None => bar,
        })
    }
}

/// Yahoo ticker for an NSE symbol
pub fn yahoo_ticker(symbol: &str) -> String {
    if symbol.contains('.') {
        symbol.to_string()
    } else {
        format!("{}.NS", symbol)
    }
}

fn parse_chart(body: &str) -> Result<Option<Bar>, FeedError> {
    let response: ChartResponse =
        serde_json::from_str(body).map_err(|e| FeedError::Parse(e.to_string()))?;
    if let Some(err) = response.chart.error {
        return Err(FeedError::Api {
            status: 200,
            message: format!("{}: {}", err.code, err.description),
        });
    }
    Ok(response
        .chart
        .result
        .and_then(|mut r| if r.is_empty() { None } else { Some(r.swap_remove(0)) })
        .and_then(|r| r.indicators.quote.into_iter().next())
        .and_then(|q| q.latest()))
}

pub struct YahooQuotes {
    client: Client,
    base_url: String,
    rate_limiter: Option<RateLimiter>,
}

impl YahooQuotes {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, FeedError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0")
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            rate_limiter: None,
        })
    }

    /// Take one token per chart request
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    async fn fetch_one(&self, symbol: &Symbol) -> Result<Option<Bar>, FeedError> {
        let url = format!(
            "{}/v8/finance/chart/{}",
            self.base_url,
            yahoo_ticker(symbol.as_str())
        );
        if let Some(limiter) = &self.rate_limiter {
            limiter.acquire().await;
        }
        let response = self
            .client
            .get(&url)
            .query(&[("interval", "1m"), ("range", "1d")])
            .send()
            .await?;
        let status = response.status().as_u16();
        if status == 401 {
            return Err(FeedError::AuthRejected("Yahoo chart endpoint returned 401".into()));
        }
        let body = response.text().await?;
        if status == 404 {
            // Unknown ticker
            return Ok(None);
        }
        if !(200..300).contains(&status) {
            return Err(FeedError::Api {
                status,
                message: body.chars().take(200).collect(),
            });
        }
        parse_chart(&body)
    }
}

#[async_trait]
impl QuoteApi for YahooQuotes {
    fn name(&self) -> &str {
        "yahoo"
    }

    fn paces_requests(&self) -> bool {
        self.rate_limiter.is_some()
    }

    async fn fetch(&self, symbols: &[Symbol]) -> Result<QuoteBatch, FeedError> {
        let mut batch = QuoteBatch::new();
        let mut last_error = None;
        for symbol in symbols {
            match self.fetch_one(symbol).await {
                Ok(Some(bar)) => {
                    batch.insert(symbol.clone(), bar);
                }
                Ok(None) => debug!("[yahoo] No rows for {}", symbol),
                Err(e @ FeedError::AuthRejected(_)) => return Err(e),
                Err(e) => {
                    debug!("[yahoo] {} failed: {}", symbol, e);
                    last_error = Some(e);
                }
            }
        }
        // Only a batch where nothing was priced counts as a failure
        match last_error {
            Some(e) if batch.is_empty() => Err(e),
            _ => Ok(batch),
        }
    }
}
