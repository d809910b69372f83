use std::time::SystemTime;

use crate::{orders::OrderId, symbol::Symbol};

pub type TradeId = u64;

/// A trade represents a matched transaction between two orders.
///
/// # Terminology
/// - **Maker**: The order that was already resting in the order book (providing liquidity).
/// - **Taker**: The incoming order that triggered the trade (taking liquidity).
///
/// # Behavior
/// - The trade always executes at the **maker's price** (book price).
/// - Partial fills may occur: multiple trades can be generated from one order.
///
/// Example:
/// - A market buy order (taker) matches a limit sell at 102 (maker).
/// - A trade is created at price 102.
#[derive(
    Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize, bincode::Encode, bincode::Decode,
)]
pub struct Trade {
    pub id: TradeId,
    pub symbol: Symbol,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub maker_id: OrderId,
    pub taker_id: OrderId,
    pub price: u64,
    pub quantity: u64,
    pub timestamp: SystemTime,
}
