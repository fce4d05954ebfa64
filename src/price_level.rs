//! Price Level - the FIFO queue of resting orders sharing one price.
//!
//! Orders at a level form a circular doubly-linked chain threaded through
//! pool handles; `head` is the oldest order and matches first, and the
//! element before `head` is the tail. Levels themselves are chained
//! circularly per side (links live here, chain management in the book).

use crate::arena::{Pool, PoolIdx, NULL_IDX};
use crate::messages::{ClientId, InstrumentId, OrderId, Price, Priority, Qty, Side};

/// A resting order, owned by the book's order pool.
#[derive(Clone, Copy, Debug)]
pub struct Order {
    pub instrument_id: InstrumentId,
    pub client_id: ClientId,
    /// Id the client assigned on the request
    pub client_order_id: OrderId,
    /// Id the engine assigned on accept, unique per instrument
    pub market_order_id: OrderId,
    pub side: Side,
    pub price: Price,
    /// Remaining quantity to fill
    pub qty: Qty,
    /// Queue position at this price, set once at rest time
    pub priority: Priority,
    /// Previous order at the same price (circular)
    pub prev: PoolIdx,
    /// Next order at the same price (circular)
    pub next: PoolIdx,
    /// Back-reference to the owning price level
    pub level: PoolIdx,
}

impl Default for Order {
    fn default() -> Self {
        Self {
            instrument_id: 0,
            client_id: 0,
            client_order_id: 0,
            market_order_id: 0,
            side: Side::Buy,
            price: 0,
            qty: 0,
            priority: 0,
            prev: NULL_IDX,
            next: NULL_IDX,
            level: NULL_IDX,
        }
    }
}

/// All resting orders of one instrument/side sharing one price, served FIFO.
///
/// Created on the first order at a new price, destroyed when the last order
/// leaves. An existing level therefore always has at least one order; an
/// empty-but-linked level is a corrupted book.
#[derive(Clone, Copy, Debug)]
pub struct PriceLevel {
    pub side: Side,
    pub price: Price,
    /// Oldest order at this price (first to match)
    pub head: PoolIdx,
    /// More aggressive neighbor in the side chain (circular)
    pub prev: PoolIdx,
    /// Less aggressive neighbor in the side chain (circular)
    pub next: PoolIdx,
    /// Total resting quantity at this price
    pub total_qty: u64,
    /// Number of resting orders at this price
    pub count: u32,
}

impl Default for PriceLevel {
    fn default() -> Self {
        Self {
            side: Side::Buy,
            price: 0,
            head: NULL_IDX,
            prev: NULL_IDX,
            next: NULL_IDX,
            total_qty: 0,
            count: 0,
        }
    }
}

impl PriceLevel {
    /// Returns true if there are no orders at this level
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Append an order at the tail of the FIFO (lowest priority).
    ///
    /// In the circular chain the tail is `head.prev`, so appending inserts
    /// immediately before the head.
    ///
    /// # Complexity
    /// O(1)
    #[inline]
    pub fn append(&mut self, orders: &mut Pool<Order>, idx: PoolIdx) {
        let qty = orders.get(idx).qty;

        if self.head == NULL_IDX {
            self.head = idx;
            let order = orders.get_mut(idx);
            order.prev = idx;
            order.next = idx;
        } else {
            let head = self.head;
            let tail = orders.get(head).prev;
            orders.get_mut(tail).next = idx;
            orders.get_mut(head).prev = idx;
            let order = orders.get_mut(idx);
            order.prev = tail;
            order.next = head;
        }

        self.count += 1;
        self.total_qty += qty as u64;
    }

    /// Unlink an order from anywhere in the FIFO (fill removal or cancel).
    ///
    /// If the order was the head, the next-oldest becomes the head. The
    /// order is NOT freed from the pool; the caller does that.
    ///
    /// # Returns
    /// `true` if the level is now empty and must leave the side chain.
    ///
    /// # Complexity
    /// O(1)
    #[inline]
    pub fn unlink(&mut self, orders: &mut Pool<Order>, idx: PoolIdx) -> bool {
        let order = *orders.get(idx);

        if order.next == idx {
            // Only order at this price
            debug_assert!(self.head == idx && order.prev == idx);
            self.head = NULL_IDX;
        } else {
            orders.get_mut(order.prev).next = order.next;
            orders.get_mut(order.next).prev = order.prev;
            if self.head == idx {
                self.head = order.next;
            }
        }

        self.count -= 1;
        self.total_qty -= order.qty as u64;

        let removed = orders.get_mut(idx);
        removed.prev = NULL_IDX;
        removed.next = NULL_IDX;

        self.count == 0
    }

    /// Priority the next order resting at this level will receive.
    #[inline]
    pub fn next_priority(&self, orders: &Pool<Order>) -> Priority {
        debug_assert!(self.head != NULL_IDX);
        // Tail is head.prev in the circular chain
        orders.get(orders.get(self.head).prev).priority + 1
    }

    /// Reduce the aggregate quantity after a partial fill of one order.
    #[inline]
    pub fn subtract_qty(&mut self, qty: Qty) {
        debug_assert!(self.total_qty >= qty as u64);
        self.total_qty -= qty as u64;
    }
}
