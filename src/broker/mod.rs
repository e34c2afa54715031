//! Order execution
//!
//! `ExecutionAdapter` is the engine's only route to a broker. `PaperBroker`
//! fills in memory; `KiteBroker` places intraday orders through Zerodha.

pub mod kite;
pub mod paper;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{OrderType, PositionRecord, Side};
use crate::Symbol;

pub use kite::KiteBroker;
pub use paper::PaperBroker;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("order rejected: {0}")]
    Rejected(String),
    #[error("invalid order: {0}")]
    InvalidOrder(String),
    #[error("not authenticated: {0}")]
    NotAuthenticated(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("circuit breaker open")]
    CircuitOpen,
}

pub type ExecutionResult<T> = Result<T, ExecutionError>;

#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn authenticate(&self) -> bool;

    /// Submit an order and return the broker's order id.
    ///
    /// `price` is the limit price for `OrderType::Limit` and the reference
    /// price for `OrderType::Market`.
    async fn place_order(
        &self,
        symbol: &Symbol,
        side: Side,
        order_type: OrderType,
        quantity: u64,
        price: Option<f64>,
    ) -> ExecutionResult<String>;

    async fn get_positions(&self) -> ExecutionResult<Vec<PositionRecord>>;

    async fn get_balance(&self) -> ExecutionResult<f64>;
}
