use tokio::sync::broadcast;

use crate::{orderbook::BookSnapshot, orders::Order, trade::Trade};

/// Buffered events per symbol before slow subscribers start lagging.
pub const EVENT_BUFFER: usize = 1024;

/// Published by a matching engine after each committed operation.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum EngineEvent {
    Trade(Trade),
    /// An order whose remaining quantity or status changed.
    Order(Order),
    /// Top levels of both sides once the operation is applied.
    Book(BookSnapshot),
}

pub fn channel() -> broadcast::Sender<EngineEvent> {
    let (tx, _rx) = broadcast::channel(EVENT_BUFFER);
    tx
}
