//! Order Book - the per-instrument price-time-priority book.
//!
//! Two circular doubly-linked chains of price levels (bids descending, asks
//! ascending) with explicit best pointers; each level a circular FIFO of
//! resting orders. All objects live in fixed-capacity pools and only the
//! engine thread ever touches them, so none of this needs synchronization.
//!
//! Business failures (cancel of an unknown order) are reported as events.
//! Capacity exhaustion and linked-state corruption are fatal: the book logs
//! its full state and panics, since continuing would corrupt matching
//! fairness with no safe recovery path.

use std::fmt;

use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::error;

use crate::arena::{Pool, PoolIdx, NULL_IDX};
use crate::config::EngineConfig;
use crate::engine::Outbound;
use crate::messages::{
    ClientId, ClientResponse, InstrumentId, MarketUpdate, OrderId, Price, Qty, ResponseKind, Side,
    UpdateKind,
};
use crate::price_level::{Order, PriceLevel};

/// Returns true if `a` is a more aggressive price than `b` on `side`.
#[inline]
const fn more_aggressive(side: Side, a: Price, b: Price) -> bool {
    match side {
        Side::Buy => a > b,
        Side::Sell => a < b,
    }
}

/// Returns true if an incoming order at `price` crosses the opposite best.
#[inline]
const fn crosses(side: Side, price: Price, opposite_best: Price) -> bool {
    match side {
        Side::Buy => price >= opposite_best,
        Side::Sell => price <= opposite_best,
    }
}

/// A consistency violation found by [`OrderBook::check_consistency`].
#[derive(Debug, Error)]
pub enum BookError {
    #[error("{side:?} levels out of order: {prev} then {next}")]
    UnsortedLevels { side: Side, prev: Price, next: Price },
    #[error("empty price level linked into the {side:?} chain at {price}")]
    EmptyLevel { side: Side, price: Price },
    #[error("broken level chain link at price {price}")]
    BrokenLevelChain { price: Price },
    #[error("broken order FIFO at price {price}")]
    BrokenOrderChain { price: Price },
    #[error("aggregates disagree at price {price}: qty {total_qty}, count {count}")]
    BadAggregates {
        price: Price,
        total_qty: u64,
        count: u32,
    },
    #[error("price index entry missing or wrong for price {price}")]
    BadPriceIndex { price: Price },
    #[error("client order index entry for client {client_id} order {order_id} is stale")]
    StaleIndexEntry {
        client_id: ClientId,
        order_id: OrderId,
    },
    #[error("resting order (client {client_id}, order {order_id}) missing from client index")]
    MissingIndexEntry {
        client_id: ClientId,
        order_id: OrderId,
    },
}

/// The limit order book for one instrument.
///
/// Exclusively owns every `Order` and `PriceLevel` it creates. The matching
/// engine owns one book per instrument for its lifetime; the book emits
/// private responses and public market updates through the engine's
/// [`Outbound`] channels as side effects of `add` and `cancel`.
pub struct OrderBook {
    instrument_id: InstrumentId,

    orders: Pool<Order>,
    levels: Pool<PriceLevel>,

    /// Head of the bid chain: highest price, `None` when no bids rest
    best_bid: Option<PoolIdx>,
    /// Head of the ask chain: lowest price, `None` when no asks rest
    best_ask: Option<PoolIdx>,

    /// Exact-price lookup of live levels. A bid and an ask can never rest at
    /// the same price (the book is never crossed), so one map serves both
    /// sides.
    price_to_level: FxHashMap<Price, PoolIdx>,

    /// Dense (client id x client order id) -> order handle; `NULL_IDX` means
    /// no live order for that key
    client_order_index: Vec<PoolIdx>,
    max_clients: u32,
    max_order_ids: u32,

    next_market_order_id: OrderId,
}

impl OrderBook {
    pub fn new(instrument_id: InstrumentId, config: &EngineConfig) -> Self {
        let index_len = config.max_clients as usize * config.max_order_ids as usize;
        Self {
            instrument_id,
            orders: Pool::new(config.max_order_ids),
            levels: Pool::new(config.max_price_levels),
            best_bid: None,
            best_ask: None,
            price_to_level: FxHashMap::with_capacity_and_hasher(
                config.max_price_levels as usize,
                Default::default(),
            ),
            client_order_index: vec![NULL_IDX; index_len],
            max_clients: config.max_clients,
            max_order_ids: config.max_order_ids,
            next_market_order_id: 1,
        }
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Place a new limit order.
    ///
    /// Emits ACCEPTED, then one FILLED per counterparty per fill plus the
    /// public TRADE/MODIFY/CANCEL updates while the order crosses, then a
    /// public ADD if any quantity rests.
    pub fn add(
        &mut self,
        client_id: ClientId,
        client_order_id: OrderId,
        side: Side,
        price: Price,
        qty: Qty,
        out: &mut Outbound,
    ) {
        let market_order_id = self.next_market_order_id;
        self.next_market_order_id += 1;

        out.respond(ClientResponse {
            kind: ResponseKind::Accepted,
            client_id,
            instrument_id: self.instrument_id,
            client_order_id,
            market_order_id: Some(market_order_id),
            side: Some(side),
            price: Some(price),
            exec_qty: 0,
            leaves_qty: qty,
        });

        let leaves_qty =
            self.execute_match(client_id, client_order_id, side, price, qty, market_order_id, out);

        if leaves_qty > 0 {
            self.rest_order(
                client_id,
                client_order_id,
                market_order_id,
                side,
                price,
                leaves_qty,
                out,
            );
        }
    }

    /// Cancel a resting order.
    ///
    /// An unknown (client id, order id) pair is a business outcome, not an
    /// error: the client gets CANCEL_REJECTED and the book is untouched.
    pub fn cancel(&mut self, client_id: ClientId, order_id: OrderId, out: &mut Outbound) {
        let order_idx = self.lookup(client_id, order_id);
        if order_idx == NULL_IDX {
            out.respond(ClientResponse {
                kind: ResponseKind::CancelRejected,
                client_id,
                instrument_id: self.instrument_id,
                client_order_id: order_id,
                market_order_id: None,
                side: None,
                price: None,
                exec_qty: 0,
                leaves_qty: 0,
            });
            return;
        }

        let order = *self.orders.get(order_idx);

        out.respond(ClientResponse {
            kind: ResponseKind::Canceled,
            client_id,
            instrument_id: self.instrument_id,
            client_order_id: order_id,
            market_order_id: Some(order.market_order_id),
            side: Some(order.side),
            price: Some(order.price),
            exec_qty: 0,
            leaves_qty: order.qty,
        });
        out.publish(MarketUpdate {
            kind: UpdateKind::Cancel,
            market_order_id: Some(order.market_order_id),
            instrument_id: self.instrument_id,
            side: order.side,
            price: order.price,
            qty: 0,
            priority: Some(order.priority),
        });

        self.remove_order(order_idx);
    }

    // ========================================================================
    // Matching
    // ========================================================================

    /// Match the incoming order against the opposite side while it crosses.
    ///
    /// # Returns
    /// Remaining (unmatched) quantity.
    fn execute_match(
        &mut self,
        client_id: ClientId,
        client_order_id: OrderId,
        side: Side,
        price: Price,
        qty: Qty,
        market_order_id: OrderId,
        out: &mut Outbound,
    ) -> Qty {
        let opposite = side.opposite();
        let mut leaves_qty = qty;

        while leaves_qty > 0 {
            let Some(best_idx) = self.best(opposite) else {
                break;
            };
            let best = self.levels.get(best_idx);
            if !crosses(side, price, best.price) {
                break;
            }
            let resting_idx = best.head;
            if resting_idx == NULL_IDX {
                self.fatal("empty price level linked as best");
            }

            self.fill(
                resting_idx,
                client_id,
                client_order_id,
                side,
                market_order_id,
                &mut leaves_qty,
                out,
            );
        }

        leaves_qty
    }

    /// Execute one fill between the incoming order and the resting order at
    /// the head of the opposite best level.
    ///
    /// Fills always execute at the resting order's price: the aggressor gets
    /// the price improvement.
    fn fill(
        &mut self,
        resting_idx: PoolIdx,
        taker_client_id: ClientId,
        taker_client_order_id: OrderId,
        taker_side: Side,
        taker_market_order_id: OrderId,
        leaves_qty: &mut Qty,
        out: &mut Outbound,
    ) {
        let resting = *self.orders.get(resting_idx);
        let fill_qty = (*leaves_qty).min(resting.qty);
        let resting_leaves = resting.qty - fill_qty;
        *leaves_qty -= fill_qty;

        self.orders.get_mut(resting_idx).qty = resting_leaves;
        self.levels.get_mut(resting.level).subtract_qty(fill_qty);

        // Aggressor's fill report
        out.respond(ClientResponse {
            kind: ResponseKind::Filled,
            client_id: taker_client_id,
            instrument_id: self.instrument_id,
            client_order_id: taker_client_order_id,
            market_order_id: Some(taker_market_order_id),
            side: Some(taker_side),
            price: Some(resting.price),
            exec_qty: fill_qty,
            leaves_qty: *leaves_qty,
        });
        // Resting party's fill report
        out.respond(ClientResponse {
            kind: ResponseKind::Filled,
            client_id: resting.client_id,
            instrument_id: self.instrument_id,
            client_order_id: resting.client_order_id,
            market_order_id: Some(resting.market_order_id),
            side: Some(resting.side),
            price: Some(resting.price),
            exec_qty: fill_qty,
            leaves_qty: resting_leaves,
        });
        // Anonymous trade print
        out.publish(MarketUpdate {
            kind: UpdateKind::Trade,
            market_order_id: None,
            instrument_id: self.instrument_id,
            side: taker_side,
            price: resting.price,
            qty: fill_qty,
            priority: None,
        });

        if resting_leaves == 0 {
            // Fully consumed: leaves the book, reported with its pre-fill
            // remaining quantity
            out.publish(MarketUpdate {
                kind: UpdateKind::Cancel,
                market_order_id: Some(resting.market_order_id),
                instrument_id: self.instrument_id,
                side: resting.side,
                price: resting.price,
                qty: resting.qty,
                priority: None,
            });
            self.remove_order(resting_idx);
        } else {
            out.publish(MarketUpdate {
                kind: UpdateKind::Modify,
                market_order_id: Some(resting.market_order_id),
                instrument_id: self.instrument_id,
                side: resting.side,
                price: resting.price,
                qty: resting_leaves,
                priority: Some(resting.priority),
            });
        }
    }

    /// Rest the unmatched remainder of an incoming order.
    fn rest_order(
        &mut self,
        client_id: ClientId,
        client_order_id: OrderId,
        market_order_id: OrderId,
        side: Side,
        price: Price,
        leaves_qty: Qty,
        out: &mut Outbound,
    ) {
        // Priority continues the level's FIFO, or starts at 1 for a new level
        let priority = match self.price_to_level.get(&price) {
            Some(&level_idx) => self.levels.get(level_idx).next_priority(&self.orders),
            None => 1,
        };

        let order_idx = match self.orders.alloc() {
            Some(idx) => idx,
            None => self.fatal("order pool exhausted"),
        };
        {
            let order = self.orders.get_mut(order_idx);
            order.instrument_id = self.instrument_id;
            order.client_id = client_id;
            order.client_order_id = client_order_id;
            order.market_order_id = market_order_id;
            order.side = side;
            order.price = price;
            order.qty = leaves_qty;
            order.priority = priority;
        }

        let level_idx = self.get_or_insert_level(side, price);
        self.orders.get_mut(order_idx).level = level_idx;
        self.levels
            .get_mut(level_idx)
            .append(&mut self.orders, order_idx);

        let slot = self.index_slot(client_id, client_order_id);
        self.client_order_index[slot] = order_idx;

        out.publish(MarketUpdate {
            kind: UpdateKind::Add,
            market_order_id: Some(market_order_id),
            instrument_id: self.instrument_id,
            side,
            price,
            qty: leaves_qty,
            priority: Some(priority),
        });
    }

    // ========================================================================
    // Order removal
    // ========================================================================

    /// Unlink an order from its level, dropping the level if it empties,
    /// clear the client index entry and return the order to its pool.
    fn remove_order(&mut self, order_idx: PoolIdx) {
        let order = *self.orders.get(order_idx);
        if order.level == NULL_IDX {
            self.fatal("resting order has no owning price level");
        }

        let now_empty = self
            .levels
            .get_mut(order.level)
            .unlink(&mut self.orders, order_idx);
        if now_empty {
            self.remove_level(order.level);
        }

        let slot = self.index_slot(order.client_id, order.client_order_id);
        self.client_order_index[slot] = NULL_IDX;
        self.orders.free(order_idx);
    }

    /// Unlink an empty level from its side chain and free it.
    fn remove_level(&mut self, level_idx: PoolIdx) {
        let level = *self.levels.get(level_idx);

        if level.next == level_idx {
            // Last level on this side
            *self.best_mut(level.side) = None;
        } else {
            self.levels.get_mut(level.prev).next = level.next;
            self.levels.get_mut(level.next).prev = level.prev;
            if self.best(level.side) == Some(level_idx) {
                *self.best_mut(level.side) = Some(level.next);
            }
        }

        self.price_to_level.remove(&level.price);
        self.levels.free(level_idx);
    }

    // ========================================================================
    // Level chain management
    // ========================================================================

    fn get_or_insert_level(&mut self, side: Side, price: Price) -> PoolIdx {
        if let Some(&level_idx) = self.price_to_level.get(&price) {
            debug_assert_eq!(self.levels.get(level_idx).side, side);
            return level_idx;
        }

        let level_idx = match self.levels.alloc() {
            Some(idx) => idx,
            None => self.fatal("price level pool exhausted"),
        };
        {
            let level = self.levels.get_mut(level_idx);
            level.side = side;
            level.price = price;
        }
        self.price_to_level.insert(price, level_idx);
        self.insert_level(level_idx);
        level_idx
    }

    /// Link a fresh level into its side's price-sorted circular chain.
    ///
    /// Walks from the current best looking for the first level less
    /// aggressive than the new price and inserts immediately before it;
    /// wrapping back to the best means the new level becomes the tail. A
    /// linear scan, bounded by the configured maximum level count.
    fn insert_level(&mut self, new_idx: PoolIdx) {
        let new = *self.levels.get(new_idx);

        let Some(best_idx) = self.best(new.side) else {
            let level = self.levels.get_mut(new_idx);
            level.prev = new_idx;
            level.next = new_idx;
            *self.best_mut(new.side) = Some(new_idx);
            return;
        };

        let mut target = best_idx;
        loop {
            let candidate = self.levels.get(target);
            if more_aggressive(new.side, new.price, candidate.price) {
                break;
            }
            target = candidate.next;
            if target == best_idx {
                break;
            }
        }

        // Insert before target (prices are unique, so strictly-before is
        // unambiguous)
        let target_prev = self.levels.get(target).prev;
        {
            let level = self.levels.get_mut(new_idx);
            level.prev = target_prev;
            level.next = target;
        }
        self.levels.get_mut(target_prev).next = new_idx;
        self.levels.get_mut(target).prev = new_idx;

        let best_price = self.levels.get(best_idx).price;
        if more_aggressive(new.side, new.price, best_price) {
            *self.best_mut(new.side) = Some(new_idx);
        }
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    #[inline]
    fn best(&self, side: Side) -> Option<PoolIdx> {
        match side {
            Side::Buy => self.best_bid,
            Side::Sell => self.best_ask,
        }
    }

    #[inline]
    fn best_mut(&mut self, side: Side) -> &mut Option<PoolIdx> {
        match side {
            Side::Buy => &mut self.best_bid,
            Side::Sell => &mut self.best_ask,
        }
    }

    #[inline]
    fn index_slot(&self, client_id: ClientId, client_order_id: OrderId) -> usize {
        debug_assert!(client_id < self.max_clients);
        debug_assert!(client_order_id < u64::from(self.max_order_ids));
        client_id as usize * self.max_order_ids as usize + client_order_id as usize
    }

    /// Handle of the live order for (client id, client order id), or
    /// `NULL_IDX`. Out-of-range keys map to "no such order".
    #[inline]
    fn lookup(&self, client_id: ClientId, client_order_id: OrderId) -> PoolIdx {
        if client_id >= self.max_clients || client_order_id >= u64::from(self.max_order_ids) {
            return NULL_IDX;
        }
        self.client_order_index[self.index_slot(client_id, client_order_id)]
    }

    /// Best bid price (highest resting buy)
    #[inline]
    pub fn best_bid(&self) -> Option<Price> {
        self.best_bid.map(|idx| self.levels.get(idx).price)
    }

    /// Best ask price (lowest resting sell)
    #[inline]
    pub fn best_ask(&self) -> Option<Price> {
        self.best_ask.map(|idx| self.levels.get(idx).price)
    }

    /// Aggregate (quantity, order count) resting at a price, or zeros
    pub fn depth_at(&self, price: Price) -> (u64, u32) {
        self.price_to_level
            .get(&price)
            .map(|&idx| {
                let level = self.levels.get(idx);
                (level.total_qty, level.count)
            })
            .unwrap_or((0, 0))
    }

    /// Number of orders resting in the book
    #[inline]
    pub fn order_count(&self) -> u32 {
        self.orders.allocated()
    }

    #[inline]
    pub fn instrument_id(&self) -> InstrumentId {
        self.instrument_id
    }

    /// Pre-fault the pools (warm-up before the first request).
    pub fn warm_up(&self) {
        self.orders.warm_up();
        self.levels.warm_up();
    }

    /// Log the full book state and abort; continuing on a corrupted book
    /// would silently break matching fairness.
    fn fatal(&self, msg: &str) -> ! {
        error!(
            instrument_id = self.instrument_id,
            book_state = %self,
            "{msg}"
        );
        panic!("order book invariant violated: {msg}");
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Walk the whole book verifying its invariants.
    ///
    /// Linear in book size; used by tests and before fatal termination,
    /// never on the hot path.
    pub fn check_consistency(&self) -> Result<(), BookError> {
        for side in [Side::Buy, Side::Sell] {
            let Some(best_idx) = self.best(side) else {
                continue;
            };

            let mut level_idx = best_idx;
            let mut prev_price: Option<Price> = None;
            loop {
                let level = self.levels.get(level_idx);

                if level.is_empty() || level.head == NULL_IDX {
                    return Err(BookError::EmptyLevel {
                        side,
                        price: level.price,
                    });
                }
                if self.levels.get(level.next).prev != level_idx
                    || self.levels.get(level.prev).next != level_idx
                {
                    return Err(BookError::BrokenLevelChain { price: level.price });
                }
                if self.price_to_level.get(&level.price) != Some(&level_idx) {
                    return Err(BookError::BadPriceIndex { price: level.price });
                }
                if let Some(prev) = prev_price {
                    if !more_aggressive(side, prev, level.price) {
                        return Err(BookError::UnsortedLevels {
                            side,
                            prev,
                            next: level.price,
                        });
                    }
                }
                prev_price = Some(level.price);

                self.check_level_orders(side, level_idx)?;

                level_idx = level.next;
                if level_idx == best_idx {
                    break;
                }
            }
        }

        // Every index entry must point at a live order with the same key
        for client_id in 0..self.max_clients {
            for order_id in 0..u64::from(self.max_order_ids) {
                let idx = self.client_order_index[self.index_slot(client_id, order_id)];
                if idx == NULL_IDX {
                    continue;
                }
                let order = self.orders.get(idx);
                if order.client_id != client_id
                    || order.client_order_id != order_id
                    || order.level == NULL_IDX
                {
                    return Err(BookError::StaleIndexEntry {
                        client_id,
                        order_id,
                    });
                }
            }
        }

        Ok(())
    }

    fn check_level_orders(&self, side: Side, level_idx: PoolIdx) -> Result<(), BookError> {
        let level = self.levels.get(level_idx);
        let mut qty_sum = 0u64;
        let mut count = 0u32;

        let mut order_idx = level.head;
        loop {
            let order = self.orders.get(order_idx);
            if order.side != side || order.price != level.price || order.level != level_idx {
                return Err(BookError::BrokenOrderChain { price: level.price });
            }
            if self.orders.get(order.next).prev != order_idx {
                return Err(BookError::BrokenOrderChain { price: level.price });
            }
            if self.lookup(order.client_id, order.client_order_id) != order_idx {
                return Err(BookError::MissingIndexEntry {
                    client_id: order.client_id,
                    order_id: order.client_order_id,
                });
            }
            qty_sum += u64::from(order.qty);
            count += 1;
            if count > level.count {
                // Cycle longer than the recorded count
                return Err(BookError::BrokenOrderChain { price: level.price });
            }

            order_idx = order.next;
            if order_idx == level.head {
                break;
            }
        }

        if qty_sum != level.total_qty || count != level.count {
            return Err(BookError::BadAggregates {
                price: level.price,
                total_qty: level.total_qty,
                count: level.count,
            });
        }
        Ok(())
    }
}

impl fmt::Display for OrderBook {
    /// Render both side chains from best outward, one level per line.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Instrument:{}", self.instrument_id)?;

        for (label, best) in [("ASKS", self.best_ask), ("BIDS", self.best_bid)] {
            match best {
                None => writeln!(f, "{label}: <empty>")?,
                Some(best_idx) => {
                    let mut level_idx = best_idx;
                    let mut depth = 0;
                    loop {
                        let level = self.levels.get(level_idx);
                        write!(
                            f,
                            "{label} L:{depth} => px:{} qty:{} n:{} [",
                            level.price, level.total_qty, level.count
                        )?;
                        let mut order_idx = level.head;
                        loop {
                            let order = self.orders.get(order_idx);
                            write!(f, "oid:{} q:{} ", order.market_order_id, order.qty)?;
                            order_idx = order.next;
                            if order_idx == level.head {
                                break;
                            }
                        }
                        writeln!(f, "]")?;

                        depth += 1;
                        level_idx = level.next;
                        if level_idx == best_idx {
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for OrderBook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderBook")
            .field("instrument_id", &self.instrument_id)
            .field("best_bid", &self.best_bid())
            .field("best_ask", &self.best_ask())
            .field("orders", &self.orders.allocated())
            .field("levels", &self.levels.allocated())
            .finish()
    }
}
