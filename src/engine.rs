//! Price-time priority matching for a single symbol.
//!
//! Every operation is write-ahead: the engine works out the full outcome
//! against the current book without mutating it, commits the affected
//! order rows and trades as one [`Batch`], and only then applies the
//! outcome to the book and ledger. A failed commit leaves memory untouched.

use std::{iter, sync::Arc, time::SystemTime};

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    errors::EngineError,
    events::{self, EngineEvent},
    ledger::TradeLedger,
    orderbook::OrderBook,
    orders::{NewOrder, Order, OrderId, OrderStatus, OrderType, Side},
    store::{Batch, Persistence},
    symbol::Symbol,
    trade::Trade,
    utils::IdGen,
};

/// Levels per side included in the book event after each operation.
pub const BOOK_EVENT_DEPTH: usize = 10;

/// Outcome of one submission.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Execution {
    /// Final state of the submitted order.
    pub order: Order,
    /// Trades in the order they were decided.
    pub trades: Vec<Trade>,
    /// Resting orders touched by this submission, after their fills.
    pub makers: Vec<Order>,
}

/// Checks a request before it reaches any book and returns its symbol.
pub fn validate(request: &NewOrder) -> Result<Symbol, EngineError> {
    let symbol: Symbol = request
        .symbol
        .parse()
        .map_err(EngineError::InvalidOrder)?;
    if request.quantity == 0 {
        return Err(EngineError::InvalidOrder("quantity must be > 0".into()));
    }
    if request.order_type == OrderType::Limit && request.price.unwrap_or(0) == 0 {
        return Err(EngineError::InvalidOrder(
            "limit orders need a price > 0".into(),
        ));
    }
    Ok(symbol)
}

pub struct MatchingEngine {
    symbol: Symbol,
    book: OrderBook,
    ledger: TradeLedger,
    store: Arc<dyn Persistence>,
    ids: Arc<IdGen>,
    events: broadcast::Sender<EngineEvent>,
}

impl MatchingEngine {
    pub fn new(symbol: Symbol, store: Arc<dyn Persistence>, ids: Arc<IdGen>) -> Self {
        Self {
            book: OrderBook::new(),
            ledger: TradeLedger::new(symbol.clone()),
            symbol,
            store,
            ids,
            events: events::channel(),
        }
    }

    /// Rebuilds an engine from persisted rows: `resting` are the symbol's
    /// open or partially-filled orders, `trades` its ledger in id order.
    pub fn restore(
        symbol: Symbol,
        mut resting: Vec<Order>,
        trades: Vec<Trade>,
        store: Arc<dyn Persistence>,
        ids: Arc<IdGen>,
    ) -> Self {
        let mut engine = Self::new(symbol.clone(), store, ids);
        resting.sort_by_key(|o| o.sequence);
        for order in resting {
            if order.symbol != symbol {
                warn!(order_id = order.id, "skipping order for another symbol");
                continue;
            }
            let order_id = order.id;
            if let Err(e) = engine.book.insert(order) {
                error!(order_id, "stored order cannot rest: {e}");
            }
        }
        engine.ledger = TradeLedger::restore(symbol, trades);
        engine
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    pub fn ledger(&self) -> &TradeLedger {
        &self.ledger
    }

    pub fn events(&self) -> broadcast::Sender<EngineEvent> {
        self.events.clone()
    }

    pub fn recent_trades(&self, n: usize) -> Vec<Trade> {
        self.ledger.recent(n).cloned().collect()
    }

    /// Accepts, matches, and (for limit remainders) rests one order.
    ///
    /// # Errors
    /// - [`EngineError::InvalidOrder`] for malformed requests or a request
    ///   for another symbol; nothing is allocated or written.
    /// - [`EngineError::StorageUnavailable`] when the commit fails; the book
    ///   and ledger are unchanged.
    pub fn submit(&mut self, request: &NewOrder) -> Result<Execution, EngineError> {
        let symbol = validate(request)?;
        if symbol != self.symbol {
            return Err(EngineError::InvalidOrder(format!(
                "order for {} sent to the {} engine",
                symbol, self.symbol
            )));
        }
        if let (OrderType::Limit, Some(price)) = (request.order_type, request.price) {
            let room = self.book.level_room(request.side, price);
            if request.quantity > room {
                warn!(side = %request.side, price, qty = request.quantity, room, "level would overflow");
                return Err(EngineError::InvalidOrder(format!(
                    "quantity {} exceeds the {} that can still rest at price {}",
                    request.quantity, room, price
                )));
            }
        }

        let mut taker = Order::accept(
            request,
            symbol,
            self.ids.next_order_id(),
            self.ids.next_sequence(),
        );
        info!(order_id = taker.id, side = %taker.side, order_type = %taker.order_type, price = ?taker.price, qty = taker.initial_quantity, "accepted order");

        let (makers, trades) = self.plan(&mut taker);

        let batch = Batch {
            orders: makers.iter().cloned().chain(iter::once(taker.clone())).collect(),
            trades: trades.clone(),
        };
        if let Err(e) = self.store.commit(&batch) {
            error!(order_id = taker.id, "commit failed, discarding match: {e}");
            return Err(e.into());
        }

        for maker in &makers {
            if let Err(e) = self.book.reduce_or_remove(maker.id, maker.remaining_quantity) {
                error!(order_id = maker.id, "book drifted from committed plan: {e}");
            }
        }
        for trade in &trades {
            info!(trade_id = trade.id, maker_id = trade.maker_id, taker_id = trade.taker_id, price = trade.price, qty = trade.quantity, "trade");
            self.ledger.append(trade.clone());
        }
        if taker.order_type == OrderType::Limit && taker.is_resting() {
            if let Err(e) = self.book.insert(taker.clone()) {
                error!(order_id = taker.id, "book drifted from committed plan: {e}");
            }
        }
        debug!(order_id = taker.id, status = %taker.status, remaining = taker.remaining_quantity, "submission applied");

        self.publish(&trades, makers.iter().chain(iter::once(&taker)));
        Ok(Execution {
            order: taker,
            trades,
            makers,
        })
    }

    /// Walks the resting counter-orders best first and decides every fill
    /// for `taker`, updating the taker in place. The book is not touched;
    /// the returned makers carry their post-fill quantities and status.
    fn plan(&self, taker: &mut Order) -> (Vec<Order>, Vec<Trade>) {
        let mut makers = Vec::new();
        let mut trades = Vec::new();

        for resting in self.book.counters(taker.side) {
            if taker.remaining_quantity == 0 {
                break;
            }
            // Resting orders are always limit orders, so the price is present.
            let Some(price) = resting.price else {
                continue;
            };
            if !taker.accepts_price(price) {
                break;
            }

            let qty = taker.remaining_quantity.min(resting.remaining_quantity);
            let mut maker = resting.clone();
            maker.fill(qty);
            taker.fill(qty);

            let (buy_order_id, sell_order_id) = match taker.side {
                Side::Buy => (taker.id, maker.id),
                Side::Sell => (maker.id, taker.id),
            };
            trades.push(Trade {
                id: self.ids.next_trade_id(),
                symbol: self.symbol.clone(),
                buy_order_id,
                sell_order_id,
                maker_id: maker.id,
                taker_id: taker.id,
                price,
                quantity: qty,
                timestamp: SystemTime::now(),
            });
            makers.push(maker);
        }

        // market orders never rest: whatever is left is dropped
        if taker.order_type == OrderType::Market && taker.remaining_quantity > 0 {
            taker.status = OrderStatus::Canceled;
        }
        (makers, trades)
    }

    /// Cancels a resting order.
    ///
    /// # Errors
    /// - [`EngineError::AlreadyTerminal`] if the order exists but is filled or canceled.
    /// - [`EngineError::NotFound`] if no such order was ever recorded.
    /// - [`EngineError::StorageUnavailable`] if the commit fails; the order keeps resting.
    pub fn cancel(&mut self, order_id: OrderId) -> Result<Order, EngineError> {
        let Some(resting) = self.book.get(order_id) else {
            return Err(match self.store.order(order_id)? {
                Some(order) if order.status.is_terminal() => {
                    warn!(order_id, status = %order.status, "cancel of terminal order");
                    EngineError::AlreadyTerminal {
                        id: order_id,
                        status: order.status,
                    }
                }
                _ => EngineError::NotFound(order_id),
            });
        };

        let mut canceled = resting.clone();
        canceled.status = OrderStatus::Canceled;
        if let Err(e) = self.store.commit(&Batch {
            orders: vec![canceled.clone()],
            trades: Vec::new(),
        }) {
            error!(order_id, "commit failed, order stays resting: {e}");
            return Err(e.into());
        }
        self.book.remove(order_id);
        info!(order_id, remaining = canceled.remaining_quantity, "canceled order");

        self.publish(&[], iter::once(&canceled));
        Ok(canceled)
    }

    fn publish<'a>(&self, trades: &[Trade], orders: impl Iterator<Item = &'a Order>) {
        // no subscribers is fine
        for trade in trades {
            let _ = self.events.send(EngineEvent::Trade(trade.clone()));
        }
        for order in orders {
            let _ = self.events.send(EngineEvent::Order(order.clone()));
        }
        let _ = self
            .events
            .send(EngineEvent::Book(self.book.snapshot(BOOK_EVENT_DEPTH)));
    }
}
