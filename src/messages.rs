//! Request, response and market-update records for the matching engine.
//!
//! Requests are inputs from the order-gateway threads. Responses go back to
//! the requesting client; market updates go to every market-data consumer.
//! All three are small `Copy` records so they can live in ring channels.

use serde::{Deserialize, Serialize};

/// Nanosecond timestamp assigned by the transport layer on receive.
pub type Nanos = u64;

/// Identifies a client connection. Bounded by `EngineConfig::max_clients`.
pub type ClientId = u32;

/// Identifies a traded instrument. Bounded by `EngineConfig::max_instruments`.
pub type InstrumentId = u32;

/// A client-assigned or engine-assigned order id.
pub type OrderId = u64;

/// Fixed-point price (e.g., $100.50 -> 10050000 with 5 decimal places).
pub type Price = i64;

/// Order quantity.
pub type Qty = u32;

/// An order's position within its price level's FIFO, set at rest time.
pub type Priority = u64;

/// Order side (buy = bid, sell = ask)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Side {
    /// Buy side (bids)
    Buy = 0,
    /// Sell side (asks)
    Sell = 1,
}

impl Side {
    /// Returns the opposite side
    #[inline]
    pub const fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

// ============================================================================
// Inbound Requests
// ============================================================================

/// What the client is asking the engine to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum RequestKind {
    /// Place a new limit order
    #[default]
    New = 0,
    /// Cancel a resting order
    Cancel = 1,
}

/// A decoded, validated client request.
///
/// The transport layer has already checked per-client sequence numbers;
/// the engine trusts `client_id` and `instrument_id` to be in range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub kind: RequestKind,
    pub client_id: ClientId,
    pub instrument_id: InstrumentId,
    /// Client-assigned order id. Bounded by `EngineConfig::max_order_ids`.
    pub order_id: OrderId,
    pub side: Side,
    pub price: Price,
    pub qty: Qty,
}

impl Default for OrderRequest {
    fn default() -> Self {
        Self {
            kind: RequestKind::New,
            client_id: 0,
            instrument_id: 0,
            order_id: 0,
            side: Side::Buy,
            price: 0,
            qty: 0,
        }
    }
}

/// A request tagged with its receive timestamp, as handed to the sequencer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RequestEnvelope {
    /// Transport receive time; the sequencer orders by this.
    pub recv_time: Nanos,
    pub request: OrderRequest,
}

// ============================================================================
// Private Responses
// ============================================================================

/// Outcome kinds reported privately to the requesting client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResponseKind {
    /// Order received and assigned an engine order id
    #[default]
    Accepted = 0,
    /// A fill occurred (one response per counterparty per fill)
    Filled = 1,
    /// Resting order removed at the client's request
    Canceled = 2,
    /// Cancel referenced an unknown or already-removed order
    CancelRejected = 3,
}

/// One record on the private response stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClientResponse {
    pub kind: ResponseKind,
    pub client_id: ClientId,
    pub instrument_id: InstrumentId,
    /// The id the client supplied on the original request
    pub client_order_id: OrderId,
    /// Engine-assigned id; `None` only on `CancelRejected`
    pub market_order_id: Option<OrderId>,
    /// `None` only on `CancelRejected`
    pub side: Option<Side>,
    /// Execution price for fills, limit price otherwise; `None` on `CancelRejected`
    pub price: Option<Price>,
    /// Quantity executed by this event (zero except on `Filled`)
    pub exec_qty: Qty,
    /// Quantity still live after this event
    pub leaves_qty: Qty,
}

// ============================================================================
// Public Market Updates
// ============================================================================

/// Anonymous book-change kinds on the public market-data stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum UpdateKind {
    /// A new order is resting in the book
    #[default]
    Add = 0,
    /// A resting order's quantity was reduced (priority unchanged)
    Modify = 1,
    /// A resting order left the book (cancel or full fill)
    Cancel = 2,
    /// A trade executed
    Trade = 3,
}

/// One record on the public market-update stream. Carries no client identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MarketUpdate {
    pub kind: UpdateKind,
    /// Engine order id; `None` on `Trade`
    pub market_order_id: Option<OrderId>,
    pub instrument_id: InstrumentId,
    /// For `Trade` this is the aggressor's side
    pub side: Side,
    pub price: Price,
    pub qty: Qty,
    /// Queue position at the price level; `None` on `Trade` and fill-driven `Cancel`
    pub priority: Option<Priority>,
}

impl Default for MarketUpdate {
    fn default() -> Self {
        Self {
            kind: UpdateKind::Add,
            market_order_id: None,
            instrument_id: 0,
            side: Side::Buy,
            price: 0,
            qty: 0,
            priority: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }

    #[test]
    fn test_request_fields() {
        let req = OrderRequest {
            kind: RequestKind::New,
            client_id: 7,
            instrument_id: 2,
            order_id: 41,
            side: Side::Sell,
            price: 10050000,
            qty: 100,
        };
        assert_eq!(req.order_id, 41);
        assert_eq!(req.side, Side::Sell);
    }

    #[test]
    fn test_envelope_default_is_zeroed() {
        let env = RequestEnvelope::default();
        assert_eq!(env.recv_time, 0);
        assert_eq!(env.request.qty, 0);
        assert_eq!(env.request.kind, RequestKind::New);
    }

    #[test]
    fn test_response_default_carries_no_identity() {
        let resp = ClientResponse::default();
        assert_eq!(resp.market_order_id, None);
        assert_eq!(resp.side, None);
        assert_eq!(resp.price, None);
    }
}
