use crate::{symbol::Symbol, trade::Trade};
use tracing::warn;

/// Append-only, in-memory record of one symbol's executed trades, in the
/// order the engine decided them.
///
/// Durability is not handled here: the engine commits trades to storage
/// before appending them, and recovery reloads the ledger from there.
#[derive(Debug)]
pub struct TradeLedger {
    symbol: Symbol,
    trades: Vec<Trade>,
}

impl TradeLedger {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            trades: Vec::new(),
        }
    }

    /// Rebuilds a ledger from persisted trades, given in ascending id order.
    pub fn restore(symbol: Symbol, trades: Vec<Trade>) -> Self {
        let mut ledger = Self::new(symbol);
        for trade in trades {
            ledger.append(trade);
        }
        ledger
    }

    /// Appends a trade. Trades for another symbol, or with an id not past
    /// the last one, are dropped with a warning.
    pub fn append(&mut self, trade: Trade) -> bool {
        if trade.symbol != self.symbol {
            warn!(trade_id = trade.id, symbol = %trade.symbol, ledger = %self.symbol, "trade for wrong ledger");
            return false;
        }
        if let Some(last) = self.trades.last() {
            if trade.id <= last.id {
                warn!(trade_id = trade.id, last_id = last.id, "out-of-order trade append");
                return false;
            }
        }
        self.trades.push(trade);
        true
    }

    /// Up to `n` most recent trades, newest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &Trade> + '_ {
        self.trades.iter().rev().take(n)
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }
}
