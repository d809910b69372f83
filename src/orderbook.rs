use crate::{
    errors::BookError,
    orders::{Order, OrderId, OrderStatus, OrderType, Side},
};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// All resting orders at one price, keyed by their priority sequence.
///
/// Iterating `orders` yields the oldest order first, which is the FIFO
/// half of price-time priority. A partial fill mutates the entry in place,
/// so the order keeps its slot.
/// `total_quantity` is the sum of the orders' remaining quantities and
/// never exceeds `u64::MAX`; [`OrderBook::insert`] refuses orders that would
/// push it past that.
#[derive(Debug, Default)]
struct PriceLevel {
    orders: BTreeMap<u64, Order>,
    total_quantity: u64,
}

impl PriceLevel {
    fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

/// Where a resting order lives, so lookups by id don't scan the book.
#[derive(Debug, Clone, Copy)]
struct Slot {
    side: Side,
    price: u64,
    sequence: u64,
}

/// Aggregated top-of-book view, `(price, total remaining)` per level, best first.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BookSnapshot {
    pub bids: Vec<(u64, u64)>,
    pub asks: Vec<(u64, u64)>,
}

/// An [`OrderBook`] stores **resting** buy and sell limit orders for one
/// symbol in two separate [`BTreeMap`]s:
/// - `bids` (buy orders)
/// - `asks` (sell orders)
///
/// Each price level (key) holds a [`PriceLevel`] ordered by insertion
/// sequence to maintain **price-time** priority. Best-price lookup,
/// insertion, and removal cost `O(log levels)`, plus `O(log n)` within the
/// level for removal by id.
#[derive(Debug, Default)]
pub struct OrderBook {
    /// Buy orders, keyed by price in ascending order.
    ///
    /// For matching, we iterate **in reverse** to find the highest bid first.
    bids: BTreeMap<u64, PriceLevel>,

    /// Sell orders, keyed by price in ascending order.
    ///
    /// For matching, we iterate **forwards** to find the lowest ask first.
    asks: BTreeMap<u64, PriceLevel>,

    index: HashMap<OrderId, Slot>,
}

/// Internal enum to unify forward (`Iter`) and reverse (`Rev<Iter>`) BTreeMap iteration.
///
/// - [`EitherIter::Fwd`] walks asks from the lowest price.
/// - [`EitherIter::Rev`] walks bids from the highest price.
#[derive(Clone)]
enum EitherIter<'a> {
    /// Forward (ascending) iteration over the price levels.
    Fwd(std::collections::btree_map::Iter<'a, u64, PriceLevel>),
    /// Reverse (descending) iteration over the price levels.
    Rev(std::iter::Rev<std::collections::btree_map::Iter<'a, u64, PriceLevel>>),
}

impl<'a> Iterator for EitherIter<'a> {
    type Item = (&'a u64, &'a PriceLevel);

    /// Retrieves the **next** `(price, PriceLevel)` pair in priority order.
    fn next(&mut self) -> Option<Self::Item> {
        match self {
            EitherIter::Fwd(iter) => iter.next(),
            EitherIter::Rev(iter) => iter.next(),
        }
    }
}

impl OrderBook {
    /// Creates a new, empty [`OrderBook`], with no resting bids or asks.
    pub fn new() -> Self {
        Self::default()
    }

    fn side(&self, side: Side) -> &BTreeMap<u64, PriceLevel> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut BTreeMap<u64, PriceLevel> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    /// Price levels of one side, best price first.
    fn levels(&self, side: Side) -> EitherIter<'_> {
        match side {
            Side::Buy => EitherIter::Rev(self.bids.iter().rev()),
            Side::Sell => EitherIter::Fwd(self.asks.iter()),
        }
    }

    /// Resting orders an incoming order on `incoming` side would meet, in execution order.
    pub fn counters(&self, incoming: Side) -> impl Iterator<Item = &Order> + '_ {
        self.levels(incoming.opposite())
            .flat_map(|(_, level)| level.orders.values())
    }

    /// The single resting order that executes first against an incoming
    /// order on `incoming` side, or `None` when the opposite side is empty.
    pub fn best_counter(&self, incoming: Side) -> Option<&Order> {
        self.counters(incoming).next()
    }

    /// Best resting price on `side`.
    pub fn best_price(&self, side: Side) -> Option<u64> {
        self.levels(side).next().map(|(price, _)| *price)
    }

    /// Quantity that can still rest at `price` on `side` before the level
    /// aggregate would overflow.
    pub fn level_room(&self, side: Side, price: u64) -> u64 {
        let total = self
            .side(side)
            .get(&price)
            .map_or(0, |level| level.total_quantity);
        u64::MAX - total
    }

    /// Adds a resting **limit** order behind existing orders at its price.
    ///
    /// Only live limit orders with a non-zero remainder may rest. Duplicate
    /// ids and orders that would overflow the level aggregate are refused and
    /// leave the book untouched.
    pub fn insert(&mut self, order: Order) -> Result<(), BookError> {
        let price = match (order.order_type, order.price) {
            (OrderType::Limit, Some(price)) if order.is_resting() && order.remaining_quantity > 0 => {
                price
            }
            _ => {
                warn!(order_id = order.id, "refusing to rest non-limit or inactive order");
                return Err(BookError::NotRestable(order.id));
            }
        };
        if self.index.contains_key(&order.id) {
            warn!(order_id = order.id, "order already resting");
            return Err(BookError::Duplicate(order.id));
        }
        let room = self.level_room(order.side, price);
        if order.remaining_quantity > room {
            warn!(order_id = order.id, price, "level aggregate would overflow");
            return Err(BookError::LevelFull {
                price,
                room,
                requested: order.remaining_quantity,
            });
        }
        let slot = Slot {
            side: order.side,
            price,
            sequence: order.sequence,
        };
        debug!(order_id = order.id, side = %order.side, price, qty = order.remaining_quantity, "resting order");
        self.index.insert(order.id, slot);
        let level = self.side_mut(order.side).entry(price).or_default();
        level.total_quantity += order.remaining_quantity;
        level.orders.insert(order.sequence, order);
        Ok(())
    }

    /// Lowers a resting order's remaining quantity to `new_remaining`.
    ///
    /// At zero the order leaves the book and is returned with status
    /// `Filled`; otherwise it stays in its priority slot as `PartiallyFilled`.
    pub fn reduce_or_remove(
        &mut self,
        order_id: OrderId,
        new_remaining: u64,
    ) -> Result<Order, BookError> {
        let slot = *self
            .index
            .get(&order_id)
            .ok_or(BookError::NotFound(order_id))?;
        let book_side = self.side_mut(slot.side);
        let level = book_side
            .get_mut(&slot.price)
            .ok_or(BookError::NotFound(order_id))?;
        let order = level
            .orders
            .get_mut(&slot.sequence)
            .ok_or(BookError::NotFound(order_id))?;
        if new_remaining >= order.remaining_quantity {
            return Err(BookError::NotDecreasing {
                id: order_id,
                current: order.remaining_quantity,
                requested: new_remaining,
            });
        }
        level.total_quantity -= order.remaining_quantity - new_remaining;
        order.remaining_quantity = new_remaining;

        if new_remaining > 0 {
            order.status = OrderStatus::PartiallyFilled;
            return Ok(order.clone());
        }

        let mut filled = level
            .orders
            .remove(&slot.sequence)
            .ok_or(BookError::NotFound(order_id))?;
        filled.status = OrderStatus::Filled;
        if level.is_empty() {
            book_side.remove(&slot.price);
        }
        self.index.remove(&order_id);
        debug!(order_id, "resting order filled");
        Ok(filled)
    }

    /// Removes a resting order whatever its remaining quantity. Returns it
    /// unchanged, or `None` when it is not in the book.
    pub fn remove(&mut self, order_id: OrderId) -> Option<Order> {
        let slot = self.index.remove(&order_id)?;
        let book_side = self.side_mut(slot.side);
        let level = book_side.get_mut(&slot.price)?;
        let order = level.orders.remove(&slot.sequence)?;
        level.total_quantity -= order.remaining_quantity;
        //prune the price level if needed
        if level.is_empty() {
            book_side.remove(&slot.price);
        }
        debug!(order_id, "removed resting order");
        Some(order)
    }

    /// Up to `n` `(price, aggregate remaining)` pairs for `side`, best first.
    ///
    /// The iterator borrows the book, is lazy, and can be cloned to restart.
    pub fn top_levels(
        &self,
        side: Side,
        n: usize,
    ) -> impl Iterator<Item = (u64, u64)> + Clone + '_ {
        self.levels(side)
            .map(|(price, level)| (*price, level.total_quantity))
            .take(n)
    }

    pub fn snapshot(&self, depth: usize) -> BookSnapshot {
        BookSnapshot {
            bids: self.top_levels(Side::Buy, depth).collect(),
            asks: self.top_levels(Side::Sell, depth).collect(),
        }
    }

    pub fn get(&self, order_id: OrderId) -> Option<&Order> {
        let slot = self.index.get(&order_id)?;
        self.side(slot.side)
            .get(&slot.price)?
            .orders
            .get(&slot.sequence)
    }

    pub fn contains(&self, order_id: OrderId) -> bool {
        self.index.contains_key(&order_id)
    }

    /// Number of resting orders on both sides.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of distinct price levels on `side`.
    pub fn depth(&self, side: Side) -> usize {
        self.side(side).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::Symbol;
    use std::time::SystemTime;

    fn sample_limit_order(id: u64, side: Side, price: u64, quantity: u64) -> Order {
        Order {
            id,
            symbol: "BTC-USD".parse::<Symbol>().unwrap(),
            side,
            order_type: OrderType::Limit,
            price: Some(price),
            initial_quantity: quantity,
            remaining_quantity: quantity,
            status: OrderStatus::Open,
            sequence: id,
            created_at: SystemTime::now(),
        }
    }

    #[test]
    fn test_best_counter_picks_lowest_ask_for_buy() {
        let mut ob = OrderBook::new();
        ob.insert(sample_limit_order(1, Side::Sell, 102, 3)).unwrap();
        ob.insert(sample_limit_order(2, Side::Sell, 101, 5)).unwrap();
        ob.insert(sample_limit_order(3, Side::Buy, 99, 5)).unwrap();

        let best = ob.best_counter(Side::Buy).unwrap();
        assert_eq!(best.id, 2);
        assert_eq!(ob.best_counter(Side::Sell).unwrap().id, 3);
    }

    #[test]
    fn test_best_counter_picks_highest_bid_for_sell() {
        let mut ob = OrderBook::new();
        ob.insert(sample_limit_order(1, Side::Buy, 98, 3)).unwrap();
        ob.insert(sample_limit_order(2, Side::Buy, 100, 3)).unwrap();

        assert_eq!(ob.best_counter(Side::Sell).unwrap().id, 2);
        assert!(ob.best_counter(Side::Buy).is_none());
    }

    /// Tests that FIFO order is respected for multiple orders at the same price.
    #[test]
    fn test_queue_fairness_fifo_within_level() {
        let mut ob = OrderBook::new();
        ob.insert(sample_limit_order(1, Side::Sell, 100, 4)).unwrap();
        ob.insert(sample_limit_order(2, Side::Sell, 100, 6)).unwrap();

        let ids: Vec<u64> = ob.counters(Side::Buy).map(|o| o.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_partial_reduce_keeps_priority_slot() {
        let mut ob = OrderBook::new();
        ob.insert(sample_limit_order(1, Side::Sell, 100, 4)).unwrap();
        ob.insert(sample_limit_order(2, Side::Sell, 100, 6)).unwrap();

        let reduced = ob.reduce_or_remove(1, 1).unwrap();
        assert_eq!(reduced.remaining_quantity, 1);
        assert_eq!(reduced.status, OrderStatus::PartiallyFilled);
        assert_eq!(ob.best_counter(Side::Buy).unwrap().id, 1);
        assert_eq!(ob.top_levels(Side::Sell, 1).next(), Some((100, 7)));
    }

    #[test]
    fn test_reduce_to_zero_removes_and_prunes_level() {
        let mut ob = OrderBook::new();
        ob.insert(sample_limit_order(1, Side::Buy, 100, 4)).unwrap();

        let filled = ob.reduce_or_remove(1, 0).unwrap();
        assert_eq!(filled.status, OrderStatus::Filled);
        assert!(ob.is_empty());
        assert_eq!(ob.depth(Side::Buy), 0);
        assert_eq!(ob.reduce_or_remove(1, 0), Err(BookError::NotFound(1)));
    }

    #[test]
    fn test_reduce_rejects_growth() {
        let mut ob = OrderBook::new();
        ob.insert(sample_limit_order(1, Side::Buy, 100, 4)).unwrap();

        let err = ob.reduce_or_remove(1, 4).unwrap_err();
        assert!(matches!(err, BookError::NotDecreasing { current: 4, .. }));
        assert_eq!(ob.get(1).unwrap().remaining_quantity, 4);
    }

    #[test]
    fn test_cancel_existing_order() {
        let mut ob = OrderBook::new();
        let order = sample_limit_order(42, Side::Buy, 101, 10);
        ob.insert(order.clone()).unwrap();

        let removed = ob.remove(order.id).unwrap();

        assert_eq!(removed.id, 42);
        assert!(ob.top_levels(Side::Buy, 10).next().is_none());
        assert!(!ob.contains(42));
    }

    #[test]
    fn test_cancel_nonexistent_order() {
        let mut ob = OrderBook::new();
        ob.insert(sample_limit_order(1, Side::Sell, 99, 5)).unwrap();

        assert!(ob.remove(999).is_none());
        assert_eq!(ob.len(), 1);
    }

    #[test]
    fn test_market_order_never_rests() {
        let mut ob = OrderBook::new();
        let mut market = sample_limit_order(7, Side::Buy, 100, 5);
        market.order_type = OrderType::Market;
        market.price = None;

        assert_eq!(ob.insert(market), Err(BookError::NotRestable(7)));
        assert!(ob.is_empty());
    }

    #[test]
    fn test_duplicate_id_is_refused() {
        let mut ob = OrderBook::new();
        ob.insert(sample_limit_order(1, Side::Buy, 100, 2)).unwrap();

        let again = sample_limit_order(1, Side::Buy, 100, 2);
        assert_eq!(ob.insert(again), Err(BookError::Duplicate(1)));
        assert_eq!(ob.top_levels(Side::Buy, 1).next(), Some((100, 2)));
    }

    #[test]
    fn test_level_aggregate_cannot_overflow() {
        let mut ob = OrderBook::new();
        ob.insert(sample_limit_order(1, Side::Sell, 100, u64::MAX - 1))
            .unwrap();
        assert_eq!(ob.level_room(Side::Sell, 100), 1);
        assert_eq!(ob.level_room(Side::Sell, 101), u64::MAX);
        assert_eq!(ob.level_room(Side::Buy, 100), u64::MAX);

        let err = ob.insert(sample_limit_order(2, Side::Sell, 100, 2)).unwrap_err();
        assert_eq!(
            err,
            BookError::LevelFull {
                price: 100,
                room: 1,
                requested: 2
            }
        );
        assert!(!ob.contains(2));
        assert_eq!(ob.len(), 1);
        assert_eq!(ob.top_levels(Side::Sell, 1).next(), Some((100, u64::MAX - 1)));

        // exactly filling the level is fine, and fills drain it again
        ob.insert(sample_limit_order(3, Side::Sell, 100, 1)).unwrap();
        assert_eq!(ob.level_room(Side::Sell, 100), 0);
        ob.reduce_or_remove(1, 0).unwrap();
        assert_eq!(ob.top_levels(Side::Sell, 1).next(), Some((100, 1)));
        ob.remove(3).unwrap();
        assert!(ob.is_empty());
    }

    #[test]
    fn test_top_levels_aggregates_and_restarts() {
        let mut ob = OrderBook::new();
        ob.insert(sample_limit_order(1, Side::Buy, 100, 2)).unwrap();
        ob.insert(sample_limit_order(2, Side::Buy, 100, 3)).unwrap();
        ob.insert(sample_limit_order(3, Side::Buy, 101, 1)).unwrap();
        ob.insert(sample_limit_order(4, Side::Buy, 97, 9)).unwrap();

        let levels = ob.top_levels(Side::Buy, 2);
        let first: Vec<_> = levels.clone().collect();
        let again: Vec<_> = levels.collect();
        assert_eq!(first, vec![(101, 1), (100, 5)]);
        assert_eq!(first, again);

        let snap = ob.snapshot(5);
        assert_eq!(snap.bids.len(), 3);
        assert!(snap.asks.is_empty());
    }
}
