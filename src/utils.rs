//utils for ids and graceful shutdown that can be used on
//any module in the project
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Process-wide monotonic counters for order ids, trade ids, and the
/// time-priority sequence. Ids start at 1.
#[derive(Debug)]
pub struct IdGen {
    order: AtomicU64,
    trade: AtomicU64,
    sequence: AtomicU64,
}

impl IdGen {
    pub fn new() -> Self {
        Self::resume(0, 0, 0)
    }

    /// Continues after the highest ids already handed out.
    pub fn resume(last_order: u64, last_trade: u64, last_sequence: u64) -> Self {
        Self {
            order: AtomicU64::new(last_order + 1),
            trade: AtomicU64::new(last_trade + 1),
            sequence: AtomicU64::new(last_sequence + 1),
        }
    }

    pub fn next_order_id(&self) -> u64 {
        self.order.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_trade_id(&self) -> u64 {
        self.trade.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdGen {
    fn default() -> Self {
        Self::new()
    }
}

pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let tc = token.clone();
    //spawn once to listen for ctrl-c
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install ctrl+C handler: {e}");
            return;
        }
        tc.cancel();
    });
    token
}
