use bincode::{
    config::standard,
    error::{DecodeError, EncodeError},
};
use parity_db::{ColId, Db, Options};
use std::{collections::BTreeMap, path::Path, sync::Mutex};
use thiserror::Error;

use crate::{
    orders::{Order, OrderId},
    symbol::Symbol,
    trade::{Trade, TradeId},
};

const ORDERS: ColId = 0;
const TRADES: ColId = 1;

/// Errors from the key/value store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ParityDB error: {0}")]
    Parity(#[from] parity_db::Error),

    #[error("Bincode encode error: {0}")]
    BincodeEncode(#[from] EncodeError),

    #[error("Bincode decode error: {0}")]
    BincodeDecode(#[from] DecodeError),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One logical write: order rows to upsert and trade rows to append.
/// Implementations apply a batch entirely or not at all.
#[derive(Debug, Default, Clone)]
pub struct Batch {
    pub orders: Vec<Order>,
    pub trades: Vec<Trade>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty() && self.trades.is_empty()
    }
}

/// Durable record of orders and trades behind the matching engines.
pub trait Persistence: Send + Sync {
    /// Atomically upserts `batch.orders` by id and appends `batch.trades`.
    fn commit(&self, batch: &Batch) -> StoreResult<()>;

    /// Latest committed row for one order.
    fn order(&self, id: OrderId) -> StoreResult<Option<Order>>;

    /// Every order row, ascending id.
    fn orders(&self) -> StoreResult<Vec<Order>>;

    /// Every trade row for `symbol`, ascending trade id.
    fn trades(&self, symbol: &Symbol) -> StoreResult<Vec<Trade>>;
}

/// A ParityDB-backed store with one column of orders keyed by id and one
/// column of trades keyed by `"{symbol}:{trade_id}"`.
pub struct Store {
    db: Db,
}

impl Store {
    /// Open (or create) a ParityDB at `path`, with B-tree indexes on both
    /// columns so they can be scanned in key order.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let mut opts = Options::with_columns(path.as_ref(), 2);
        opts.columns[ORDERS as usize].btree_index = true;
        opts.columns[TRADES as usize].btree_index = true;
        let db = Db::open_or_create(&opts)?;
        Ok(Store { db })
    }

    #[inline]
    fn order_key(id: OrderId) -> [u8; 8] {
        id.to_be_bytes()
    }

    #[inline]
    fn prefix(symbol: &Symbol) -> Vec<u8> {
        let mut k = Vec::with_capacity(symbol.as_str().len() + 1);
        k.extend_from_slice(symbol.as_str().as_bytes());
        k.push(b':');
        k
    }

    #[inline]
    fn trade_key(symbol: &Symbol, id: TradeId) -> Vec<u8> {
        let mut key = Self::prefix(symbol);
        key.extend_from_slice(&id.to_be_bytes());
        key
    }
}

impl Persistence for Store {
    fn commit(&self, batch: &Batch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let config = standard();
        let mut tx = Vec::with_capacity(batch.orders.len() + batch.trades.len());
        for order in &batch.orders {
            let value = bincode::encode_to_vec(order, config)?;
            tx.push((ORDERS, Self::order_key(order.id).to_vec(), Some(value)));
        }
        for trade in &batch.trades {
            let value = bincode::encode_to_vec(trade, config)?;
            tx.push((TRADES, Self::trade_key(&trade.symbol, trade.id), Some(value)));
        }
        self.db.commit(tx)?;
        Ok(())
    }

    fn order(&self, id: OrderId) -> StoreResult<Option<Order>> {
        match self.db.get(ORDERS, &Self::order_key(id))? {
            Some(raw) => {
                let (order, _): (Order, usize) = bincode::decode_from_slice(&raw, standard())?;
                Ok(Some(order))
            }
            None => Ok(None),
        }
    }

    fn orders(&self) -> StoreResult<Vec<Order>> {
        let mut iter = self.db.iter(ORDERS)?;
        iter.seek_to_first()?;
        let mut orders = Vec::new();
        while let Some((_key, raw)) = iter.next()? {
            let (order, _): (Order, usize) = bincode::decode_from_slice(&raw, standard())?;
            orders.push(order);
        }
        Ok(orders)
    }

    fn trades(&self, symbol: &Symbol) -> StoreResult<Vec<Trade>> {
        let prefix = Self::prefix(symbol);
        let mut iter = self.db.iter(TRADES)?;
        iter.seek(&prefix)?;
        let mut trades = Vec::new();
        while let Some((key, raw)) = iter.next()? {
            if !key.starts_with(&prefix) {
                break;
            }
            let (trade, _): (Trade, usize) = bincode::decode_from_slice(&raw, standard())?;
            trades.push(trade);
        }
        Ok(trades)
    }
}

#[derive(Default)]
struct MemoryRows {
    orders: BTreeMap<OrderId, Order>,
    trades: BTreeMap<(Symbol, TradeId), Trade>,
}

/// Non-durable [`Persistence`] for `--in-memory` runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<MemoryRows>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> StoreResult<std::sync::MutexGuard<'_, MemoryRows>> {
        self.rows
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

impl Persistence for MemoryStore {
    fn commit(&self, batch: &Batch) -> StoreResult<()> {
        let mut rows = self.rows()?;
        for order in &batch.orders {
            rows.orders.insert(order.id, order.clone());
        }
        for trade in &batch.trades {
            rows.trades
                .insert((trade.symbol.clone(), trade.id), trade.clone());
        }
        Ok(())
    }

    fn order(&self, id: OrderId) -> StoreResult<Option<Order>> {
        Ok(self.rows()?.orders.get(&id).cloned())
    }

    fn orders(&self) -> StoreResult<Vec<Order>> {
        Ok(self.rows()?.orders.values().cloned().collect())
    }

    fn trades(&self, symbol: &Symbol) -> StoreResult<Vec<Trade>> {
        Ok(self
            .rows()?
            .trades
            .iter()
            .filter(|((s, _), _)| s == symbol)
            .map(|(_, t)| t.clone())
            .collect())
    }
}
