use std::{collections::BTreeMap, sync::Arc};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::info;

use crate::{
    config::EngineConfig,
    engine::{self, Execution, MatchingEngine},
    errors::EngineError,
    events::EngineEvent,
    orderbook::BookSnapshot,
    orders::{NewOrder, Order, OrderId, Side},
    sequencer::{Directory, Sequencer},
    store::Persistence,
    symbol::Symbol,
    trade::Trade,
    utils::IdGen,
};

/// Front door to every symbol's engine.
///
/// Routes each request to its symbol's [`Sequencer`], keeps track of which
/// symbol a live order belongs to, and rebuilds all books from storage on
/// start-up.
pub struct Exchange {
    store: Arc<dyn Persistence>,
    ids: Arc<IdGen>,
    sequencers: DashMap<Symbol, Arc<Sequencer>>,
    /// Resting order id -> symbol, for cancel routing. Seeded by recovery, then
    /// written only by the sequencers.
    directory: Arc<Directory>,
    queue_depth: usize,
}

impl Exchange {
    /// Recovers every symbol found in `store`, then opens any configured
    /// symbols that are still missing.
    pub fn open(store: Arc<dyn Persistence>, config: &EngineConfig) -> Result<Self, EngineError> {
        let orders = store.orders()?;
        let last_order = orders.iter().map(|o| o.id).max().unwrap_or(0);
        let last_sequence = orders.iter().map(|o| o.sequence).max().unwrap_or(0);

        let mut resting: BTreeMap<Symbol, Vec<Order>> = BTreeMap::new();
        for order in orders {
            let book = resting.entry(order.symbol.clone()).or_default();
            if order.is_resting() {
                book.push(order);
            }
        }
        for symbol in &config.symbols {
            resting.entry(symbol.clone()).or_default();
        }

        let mut recovered = Vec::with_capacity(resting.len());
        let mut last_trade = 0;
        for (symbol, orders) in resting {
            let trades = store.trades(&symbol)?;
            if let Some(t) = trades.last() {
                last_trade = last_trade.max(t.id);
            }
            recovered.push((symbol, orders, trades));
        }

        let exchange = Self {
            ids: Arc::new(IdGen::resume(last_order, last_trade, last_sequence)),
            store,
            sequencers: DashMap::new(),
            directory: Arc::new(Directory::new()),
            queue_depth: config.queue_depth,
        };
        for (symbol, orders, trades) in recovered {
            info!(%symbol, resting = orders.len(), trades = trades.len(), "recovering book");
            for order in &orders {
                exchange.directory.insert(order.id, symbol.clone());
            }
            let engine = MatchingEngine::restore(
                symbol.clone(),
                orders,
                trades,
                Arc::clone(&exchange.store),
                Arc::clone(&exchange.ids),
            );
            let sequencer = Sequencer::spawn(
                engine,
                exchange.queue_depth,
                Arc::clone(&exchange.directory),
            )?;
            exchange.sequencers.insert(symbol, Arc::new(sequencer));
        }
        Ok(exchange)
    }

    /// Starts an empty engine for `symbol` unless one is already running.
    pub fn open_symbol(&self, symbol: Symbol) -> Result<(), EngineError> {
        if let dashmap::mapref::entry::Entry::Vacant(slot) = self.sequencers.entry(symbol.clone()) {
            let engine =
                MatchingEngine::new(symbol, Arc::clone(&self.store), Arc::clone(&self.ids));
            slot.insert(Arc::new(Sequencer::spawn(
                engine,
                self.queue_depth,
                Arc::clone(&self.directory),
            )?));
        }
        Ok(())
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.sequencers.iter().map(|e| e.key().clone()).collect();
        symbols.sort();
        symbols
    }

    fn sequencer(&self, symbol: &Symbol) -> Result<Arc<Sequencer>, EngineError> {
        self.sequencers
            .get(symbol)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| EngineError::EngineUnavailable(format!("no engine for {symbol}")))
    }

    fn sequencer_for(&self, symbol: &str) -> Result<Arc<Sequencer>, EngineError> {
        let symbol: Symbol = symbol.parse().map_err(EngineError::InvalidOrder)?;
        self.sequencer(&symbol)
    }

    pub async fn submit(&self, request: NewOrder) -> Result<Execution, EngineError> {
        let symbol = engine::validate(&request)?;
        self.sequencer(&symbol)?.submit(request).await
    }

    pub async fn cancel(&self, order_id: OrderId) -> Result<Order, EngineError> {
        let symbol = match self.directory.get(&order_id).map(|e| e.value().clone()) {
            Some(symbol) => symbol,
            None => match self.store.order(order_id)? {
                Some(order) => order.symbol,
                None => return Err(EngineError::NotFound(order_id)),
            },
        };
        self.sequencer(&symbol)?.cancel(order_id).await
    }

    /// Latest committed state of any order, live or terminal.
    pub fn order(&self, order_id: OrderId) -> Result<Order, EngineError> {
        self.store
            .order(order_id)?
            .ok_or(EngineError::NotFound(order_id))
    }

    pub fn book_depth(
        &self,
        symbol: &str,
        side: Side,
        n: usize,
    ) -> Result<Vec<(u64, u64)>, EngineError> {
        self.sequencer_for(symbol)?.top_levels(side, n)
    }

    pub fn book_snapshot(&self, symbol: &str, depth: usize) -> Result<BookSnapshot, EngineError> {
        self.sequencer_for(symbol)?.snapshot(depth)
    }

    /// Up to `n` trades for `symbol`, newest first.
    pub fn recent_trades(&self, symbol: &str, n: usize) -> Result<Vec<Trade>, EngineError> {
        self.sequencer_for(symbol)?.recent_trades(n)
    }

    pub fn subscribe(&self, symbol: &str) -> Result<broadcast::Receiver<EngineEvent>, EngineError> {
        Ok(self.sequencer_for(symbol)?.subscribe())
    }
}
