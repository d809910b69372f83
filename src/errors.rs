use thiserror::Error;

use crate::{
    orders::{OrderId, OrderStatus},
    store::StoreError,
};

/// Errors surfaced by the matching engine and the exchange in front of it.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed input, rejected before the book is touched.
    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("order {0} not found")]
    NotFound(OrderId),

    #[error("order {id} is already {status}")]
    AlreadyTerminal { id: OrderId, status: OrderStatus },

    /// The durable write failed; the in-memory book was left as it was.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] StoreError),

    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),
}

/// Errors from direct order-book mutation.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum BookError {
    #[error("order {0} is not resting in the book")]
    NotFound(OrderId),

    #[error("order {0} is not a live limit order")]
    NotRestable(OrderId),

    #[error("order {0} is already resting")]
    Duplicate(OrderId),

    #[error("level {price} has room for {room}, order needs {requested}")]
    LevelFull {
        price: u64,
        room: u64,
        requested: u64,
    },

    #[error("order {id}: remaining quantity must decrease (current {current}, requested {requested})")]
    NotDecreasing {
        id: OrderId,
        current: u64,
        requested: u64,
    },
}
