//! In-memory paper broker
//!
//! Every valid order fills immediately at its price. Cash moves with each
//! fill (shorts credit cash, covering debits it), so the balance always
//! reflects realized and open exposure without any charges.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use super::{ExecutionAdapter, ExecutionError, ExecutionResult};
use crate::types::{OrderType, PositionRecord, Side};
use crate::Symbol;

#[derive(Debug, Clone, Copy, Default)]
struct Holding {
    quantity: i64,
    average_price: f64,
}

#[derive(Debug)]
struct Book {
    cash: f64,
    holdings: HashMap<Symbol, Holding>,
    fills: usize,
}

#[derive(Debug)]
pub struct PaperBroker {
    book: Mutex<Book>,
}

impl PaperBroker {
    pub fn new(starting_cash: f64) -> Self {
        Self {
            book: Mutex::new(Book {
                cash: starting_cash,
                holdings: HashMap::new(),
                fills: 0,
            }),
        }
    }

    pub fn fill_count(&self) -> usize {
        self.book.lock().unwrap_or_else(|e| e.into_inner()).fills
    }
}

fn apply_fill(holding: &mut Holding, signed_qty: i64, price: f64) {
    let new_qty = holding.quantity + signed_qty;
    let same_direction = holding.quantity == 0 || holding.quantity.signum() == signed_qty.signum();
    if same_direction {
        let cost = holding.average_price * holding.quantity.abs() as f64 + price * signed_qty.abs() as f64;
        holding.average_price = cost / new_qty.abs() as f64;
    } else if new_qty.signum() != holding.quantity.signum() && new_qty != 0 {
        // Flipped through flat
        holding.average_price = price;
    }
    holding.quantity = new_qty;
    if new_qty == 0 {
        holding.average_price = 0.0;
    }
}

#[async_trait]
impl ExecutionAdapter for PaperBroker {
    fn name(&self) -> &str {
        "paper"
    }

    async fn authenticate(&self) -> bool {
        true
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
        let price = match price {
            Some(p) if p.is_finite() && p > 0.0 => p,
            _ => {
                return Err(ExecutionError::InvalidOrder(format!(
                    "{:?} order for {} needs a positive price",
                    order_type, symbol
                )))
            }
        };

        let signed_qty = match side {
            Side::Long => quantity as i64,
            Side::Short => -(quantity as i64),
        };

        let order_id = Uuid::new_v4().to_string();
        {
            let mut book = self.book.lock().unwrap_or_else(|e| e.into_inner());
            book.cash -= signed_qty as f64 * price;
            let holding = book.holdings.entry(symbol.clone()).or_default();
            apply_fill(holding, signed_qty, price);
            if holding.quantity == 0 {
                book.holdings.remove(symbol);
            }
            book.fills += 1;
        }

        info!(
            "[PAPER] {} {} x{} @ {:.2} ({})",
            side, symbol, quantity, price, order_id
        );
        Ok(order_id)
    }

    async fn get_positions(&self) -> ExecutionResult<Vec<PositionRecord>> {
        let book = self.book.lock().unwrap_or_else(|e| e.into_inner());
        let mut positions: Vec<PositionRecord> = book
            .holdings
            .iter()
            .map(|(symbol, h)| PositionRecord {
                symbol: symbol.clone(),
                quantity: h.quantity,
                average_price: h.average_price,
            })
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(positions)
    }

    async fn get_balance(&self) -> ExecutionResult<f64> {
        Ok(self.book.lock().unwrap_or_else(|e| e.into_inner()).cash)
    }
}
