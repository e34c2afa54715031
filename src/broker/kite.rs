//! Live execution through Zerodha Kite (intraday MIS orders on NSE)

use async_trait::async_trait;
use std::sync::Mutex;
use tracing::{error, info, warn};

use super::{ExecutionAdapter, ExecutionError, ExecutionResult};
use crate::common::{CircuitBreaker, CircuitBreakerConfig};
use crate::types::{OrderType, PositionRecord, Side};
use crate::zerodha::{ZerodhaClient, ZerodhaError};
use crate::Symbol;

impl From<ZerodhaError> for ExecutionError {
    fn from(err: ZerodhaError) -> Self {
        match err {
            ZerodhaError::TokenRejected(msg) => ExecutionError::NotAuthenticated(msg),
            ZerodhaError::NotConfigured => {
                ExecutionError::NotAuthenticated("credentials not configured".into())
            }
            ZerodhaError::Network(e) => ExecutionError::Network(e.to_string()),
            ZerodhaError::Api { status, message } => {
                ExecutionError::Rejected(format!("{} ({})", message, status))
            }
            ZerodhaError::Parse(msg) => ExecutionError::Rejected(msg),
        }
    }
}

pub struct KiteBroker {
    client: ZerodhaClient,
    breaker: Mutex<CircuitBreaker>,
}

impl KiteBroker {
    pub fn new(client: ZerodhaClient) -> Self {
        Self::with_breaker(client, CircuitBreakerConfig::default())
    }

    pub fn with_breaker(client: ZerodhaClient, config: CircuitBreakerConfig) -> Self {
        Self {
            client,
            breaker: Mutex::new(CircuitBreaker::new(config)),
        }
    }

    fn with_breaker_state<R>(&self, f: impl FnOnce(&mut CircuitBreaker) -> R) -> R {
        let mut guard = self.breaker.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    fn check_breaker(&self) -> ExecutionResult<()> {
        if self.with_breaker_state(|cb| cb.is_locked()) {
            return Err(ExecutionError::NotAuthenticated("access token rejected earlier".into()));
        }
        if !self.with_breaker_state(|cb| cb.can_attempt()) {
            return Err(ExecutionError::CircuitOpen);
        }
        Ok(())
    }

    fn record<T>(&self, result: Result<T, ZerodhaError>) -> ExecutionResult<T> {
        match result {
            Ok(value) => {
                self.with_breaker_state(|cb| cb.record_success());
                Ok(value)
            }
            Err(e) if e.is_auth_rejection() => {
                error!("[kite] Access token rejected: {}", e);
                self.with_breaker_state(|cb| cb.lock_out(e.to_string()));
                Err(e.into())
            }
            Err(e @ ZerodhaError::Network(_)) => {
                self.with_breaker_state(|cb| cb.record_failure());
                Err(e.into())
            }
            // Business rejections (margin, freeze qty) say nothing about API health
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ExecutionAdapter for KiteBroker {
    fn name(&self) -> &str {
        "kite"
    }

    async fn authenticate(&self) -> bool {
        match self.client.get_profile().await {
            Ok(profile) => {
                info!(
                    "[kite] Trading as {} ({})",
                    profile.user_name, profile.user_id
                );
                true
            }
            Err(e) => {
                warn!("[kite] Authentication failed: {}", e);
                if e.is_auth_rejection() {
                    self.with_breaker_state(|cb| cb.lock_out(e.to_string()));
                }
                false
            }
        }
    }

    async fn place_order(
        &self,
        symbol: &Symbol,
        side: Side,
        order_type: OrderType,
        quantity: u64,
        price: Option<f64>,
    ) -> ExecutionResult<String> {
        if quantity == 0 {
            return Err(ExecutionError::InvalidOrder("quantity must be positive".into()));
        }
        let limit_price = match order_type {
            OrderType::Market => None,
            OrderType::Limit => Some(price.ok_or_else(|| {
                ExecutionError::InvalidOrder("limit order without price".into())
            })?),
        };
        self.check_breaker()?;

        let transaction_type = match side {
            Side::Long => "BUY",
            Side::Short => "SELL",
        };
        let result = self
            .client
            .place_order(symbol.as_str(), transaction_type, quantity, limit_price)
            .await;
        let order_id = self.record(result)?;
        info!(
            "[kite] {} {} x{} placed ({})",
            transaction_type, symbol, quantity, order_id
        );
        Ok(order_id)
    }

    async fn get_positions(&self) -> ExecutionResult<Vec<PositionRecord>> {
        self.check_breaker()?;
        let positions = self.record(self.client.get_positions().await)?;
        Ok(positions
            .into_iter()
            .filter(|p| p.exchange == "NSE" && p.quantity != 0)
            .map(|p| PositionRecord {
                symbol: Symbol::new(p.tradingsymbol),
                quantity: p.quantity,
                average_price: p.average_price,
            })
            .collect())
    }

    async fn get_balance(&self) -> ExecutionResult<f64> {
        self.check_breaker()?;
        self.record(self.client.get_margins().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zerodha::Credentials;

    #[tokio::test]
    async fn test_unconfigured_token_locks_broker() {
        let client = ZerodhaClient::new(Credentials::new("your_api_key", "secret")).unwrap();
        let broker = KiteBroker::new(client);
        assert!(!broker.authenticate().await);
        let err = broker
            .place_order(&Symbol::new("INFY"), Side::Long, OrderType::Market, 1, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::NotAuthenticated(_)));
    }

    #[tokio::test]
    async fn test_limit_order_requires_price() {
        let client = ZerodhaClient::new(Credentials::new("k", "s").with_access_token("t")).unwrap();
        let broker = KiteBroker::new(client);
        let err = broker
            .place_order(&Symbol::new("INFY"), Side::Long, OrderType::Limit, 1, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidOrder(_)));
    }
}
