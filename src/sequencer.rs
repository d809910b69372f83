//! Single-writer admission for one symbol.
//!
//! Submissions and cancellations are queued on a bounded channel and
//! drained in FIFO order by one dedicated thread, which holds the engine's
//! write lock for the whole of each operation. Readers take the read lock,
//! so they see the book either before or after an operation, never during.
//! Symbols each get their own sequencer and never contend with each other.
//!
//! Reads block while the writer holds the lock, which is at most one
//! operation including its store commit. The writer never waits on a
//! reader or on the async runtime, so that wait is bounded.

use std::{
    sync::{Arc, RwLock, RwLockReadGuard},
    thread::{self, JoinHandle},
};

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info};

use crate::{
    engine::{Execution, MatchingEngine},
    errors::EngineError,
    events::EngineEvent,
    orderbook::BookSnapshot,
    orders::{NewOrder, Order, OrderId, Side},
    symbol::Symbol,
    trade::Trade,
};

/// Resting order id -> symbol, shared by every sequencer of an exchange.
pub type Directory = DashMap<OrderId, Symbol>;

enum Command {
    Submit {
        request: NewOrder,
        reply: oneshot::Sender<Result<Execution, EngineError>>,
    },
    Cancel {
        order_id: OrderId,
        reply: oneshot::Sender<Result<Order, EngineError>>,
    },
}

pub struct Sequencer {
    symbol: Symbol,
    tx: mpsc::Sender<Command>,
    engine: Arc<RwLock<MatchingEngine>>,
    events: broadcast::Sender<EngineEvent>,
    worker: Option<JoinHandle<()>>,
}

impl Sequencer {
    /// Starts the writer thread for `engine`. At most `queue_depth`
    /// operations wait for admission; further callers wait to enqueue.
    ///
    /// The writer keeps `directory` in step with the book, inside the same
    /// critical section as the operation that changed it.
    pub fn spawn(
        engine: MatchingEngine,
        queue_depth: usize,
        directory: Arc<Directory>,
    ) -> Result<Self, EngineError> {
        let symbol = engine.symbol().clone();
        let events = engine.events();
        let engine = Arc::new(RwLock::new(engine));
        let (tx, rx) = mpsc::channel(queue_depth.max(1));

        let worker = Arc::clone(&engine);
        let name = format!("seq-{}", symbol);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || run(worker, rx, directory))
            .map_err(|e| {
                EngineError::EngineUnavailable(format!("cannot start sequencer for {symbol}: {e}"))
            })?;
        info!(%symbol, queue_depth, "sequencer started");

        Ok(Self {
            symbol,
            tx,
            engine,
            events,
            worker: Some(handle),
        })
    }

    pub async fn submit(&self, request: NewOrder) -> Result<Execution, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.enqueue(Command::Submit { request, reply }).await?;
        rx.await.map_err(|_| self.stopped())?
    }

    pub async fn cancel(&self, order_id: OrderId) -> Result<Order, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.enqueue(Command::Cancel { order_id, reply }).await?;
        rx.await.map_err(|_| self.stopped())?
    }

    async fn enqueue(&self, command: Command) -> Result<(), EngineError> {
        self.tx.send(command).await.map_err(|_| self.stopped())
    }

    fn stopped(&self) -> EngineError {
        EngineError::EngineUnavailable(format!("sequencer for {} has stopped", self.symbol))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MatchingEngine>, EngineError> {
        self.engine.read().map_err(|_| {
            EngineError::EngineUnavailable(format!("engine for {} is poisoned", self.symbol))
        })
    }

    pub fn top_levels(&self, side: Side, n: usize) -> Result<Vec<(u64, u64)>, EngineError> {
        Ok(self.read()?.book().top_levels(side, n).collect())
    }

    pub fn snapshot(&self, depth: usize) -> Result<BookSnapshot, EngineError> {
        Ok(self.read()?.book().snapshot(depth))
    }

    pub fn recent_trades(&self, n: usize) -> Result<Vec<Trade>, EngineError> {
        Ok(self.read()?.recent_trades(n))
    }

    pub fn resting_orders(&self) -> Result<Vec<OrderId>, EngineError> {
        let engine = self.read()?;
        let book = engine.book();
        Ok(book
            .counters(Side::Sell)
            .chain(book.counters(Side::Buy))
            .map(|o| o.id)
            .collect())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

impl Drop for Sequencer {
    /// Closes the queue and waits for the writer to drain it, so the
    /// engine and its store are released once the sequencer is gone. The
    /// wait covers only commands already queued.
    fn drop(&mut self) {
        let (closed, _) = mpsc::channel(1);
        drop(std::mem::replace(&mut self.tx, closed));
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!(symbol = %self.symbol, "sequencer thread panicked");
            }
        }
    }
}

fn run(
    engine: Arc<RwLock<MatchingEngine>>,
    mut rx: mpsc::Receiver<Command>,
    directory: Arc<Directory>,
) {
    while let Some(command) = rx.blocking_recv() {
        let mut guard = match engine.write() {
            Ok(guard) => guard,
            Err(_) => {
                error!("engine lock poisoned, sequencer exiting");
                return;
            }
        };
        match command {
            Command::Submit { request, reply } => {
                let result = guard.submit(&request);
                if let Ok(execution) = &result {
                    for maker in &execution.makers {
                        if !maker.is_resting() {
                            directory.remove(&maker.id);
                        }
                    }
                    if execution.order.is_resting() {
                        directory.insert(execution.order.id, guard.symbol().clone());
                    }
                }
                drop(guard);
                let _ = reply.send(result);
            }
            Command::Cancel { order_id, reply } => {
                let result = guard.cancel(order_id);
                if matches!(result, Ok(_) | Err(EngineError::AlreadyTerminal { .. })) {
                    directory.remove(&order_id);
                }
                drop(guard);
                let _ = reply.send(result);
            }
        }
    }
    debug!("all senders dropped, sequencer exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{orders::OrderStatus, store::{MemoryStore, Persistence}, utils::IdGen};

    fn sequencer() -> Sequencer {
        let engine = MatchingEngine::new(
            "BTC-USD".parse().unwrap(),
            Arc::new(MemoryStore::new()),
            Arc::new(IdGen::new()),
        );
        Sequencer::spawn(engine, 16, Arc::new(Directory::new())).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_submissions_are_linearised() {
        let seq = Arc::new(sequencer());
        seq.submit(NewOrder::limit("BTC-USD", Side::Sell, 100, 50))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let seq = Arc::clone(&seq);
            handles.push(tokio::spawn(async move {
                seq.submit(NewOrder::market("BTC-USD", Side::Buy, 1)).await
            }));
        }
        let mut filled = 0;
        for h in handles {
            let exec = h.await.unwrap().unwrap();
            assert_eq!(exec.trades.len(), 1);
            if exec.order.status == OrderStatus::Filled {
                filled += 1;
            }
        }
        assert_eq!(filled, 50);
        assert!(seq.top_levels(Side::Sell, 5).unwrap().is_empty());

        let trades = seq.recent_trades(100).unwrap();
        assert_eq!(trades.len(), 50);
        assert!(trades.windows(2).all(|w| w[0].id > w[1].id));
    }

    #[tokio::test]
    async fn cancel_goes_through_the_queue() {
        let seq = sequencer();
        let order = seq
            .submit(NewOrder::limit("BTC-USD", Side::Buy, 10, 3))
            .await
            .unwrap()
            .order;
        assert_eq!(seq.resting_orders().unwrap(), vec![order.id]);

        let canceled = seq.cancel(order.id).await.unwrap();
        assert_eq!(canceled.status, OrderStatus::Canceled);
        assert!(seq.snapshot(5).unwrap().bids.is_empty());
        assert!(matches!(
            seq.cancel(order.id).await,
            Err(EngineError::AlreadyTerminal { .. })
        ));
    }

    #[tokio::test]
    async fn directory_tracks_resting_orders() {
        let directory = Arc::new(Directory::new());
        let engine = MatchingEngine::new(
            "BTC-USD".parse().unwrap(),
            Arc::new(MemoryStore::new()),
            Arc::new(IdGen::new()),
        );
        let seq = Sequencer::spawn(engine, 16, Arc::clone(&directory)).unwrap();

        let maker = seq
            .submit(NewOrder::limit("BTC-USD", Side::Sell, 10, 2))
            .await
            .unwrap()
            .order;
        let resting = seq
            .submit(NewOrder::limit("BTC-USD", Side::Sell, 11, 2))
            .await
            .unwrap()
            .order;
        assert_eq!(directory.len(), 2);
        assert_eq!(
            directory.get(&maker.id).map(|e| e.value().clone()),
            Some("BTC-USD".parse().unwrap())
        );

        seq.submit(NewOrder::market("BTC-USD", Side::Buy, 2))
            .await
            .unwrap();
        assert!(!directory.contains_key(&maker.id));

        seq.cancel(resting.id).await.unwrap();
        assert!(directory.is_empty());
    }

    #[tokio::test]
    async fn level_overflow_leaves_the_symbol_usable() {
        let store = Arc::new(MemoryStore::new());
        let engine = MatchingEngine::new(
            "BTC-USD".parse().unwrap(),
            store.clone(),
            Arc::new(IdGen::new()),
        );
        let seq = Sequencer::spawn(engine, 16, Arc::new(Directory::new())).unwrap();

        seq.submit(NewOrder::limit("BTC-USD", Side::Sell, 100, u64::MAX))
            .await
            .unwrap();
        let err = seq
            .submit(NewOrder::limit("BTC-USD", Side::Sell, 100, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidOrder(_)));

        let exec = seq
            .submit(NewOrder::limit("BTC-USD", Side::Buy, 100, 1))
            .await
            .unwrap();
        assert_eq!(exec.trades.len(), 1);
        assert_eq!(seq.top_levels(Side::Sell, 1).unwrap(), vec![(100, u64::MAX - 1)]);
        assert_eq!(store.orders().unwrap().len(), 2);
    }
}
