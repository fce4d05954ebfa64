//! # Matchbook
//!
//! The transaction core of an electronic trading venue: a deterministic
//! price-time-priority matching engine with per-instrument limit order
//! books, a FIFO request sequencer and lock-free SPSC ring channels for
//! every inter-thread handoff.
//!
//! ## Design Principles
//!
//! - **Single-Writer**: one thread owns all book state exclusively (no locks)
//! - **Bounded Everything**: pools, indices and rings are sized at startup;
//!   exhausting them is a deployment error, not a runtime condition
//! - **Pool Allocation**: no heap allocation on the hot path; intrusive
//!   chains use `u32` handles into fixed arenas
//! - **Deterministic**: the sequencer imposes one total order on requests,
//!   so identical inputs always produce identical event streams
//!
//! ## Architecture
//!
//! ```text
//! [Gateway Threads] --> [Request Ring] --> [Sequencer + Engine Thread (Pinned)]
//!                                               |                |
//!                                       [Response Ring]   [Market Update Ring]
//!                                               |                |
//!                                       [Publisher Thread] [Publisher Thread]
//! ```

pub mod arena;
pub mod config;
pub mod engine;
pub mod messages;
pub mod order_book;
pub mod price_level;
pub mod ring;
pub mod sequencer;

// Re-exports for convenience
pub use arena::{Pool, PoolIdx, NULL_IDX};
pub use config::EngineConfig;
pub use engine::{Gateway, MatchingEngine, Outbound};
pub use messages::{
    ClientId, ClientResponse, InstrumentId, MarketUpdate, Nanos, OrderId, OrderRequest, Price,
    Priority, Qty, RequestEnvelope, RequestKind, ResponseKind, Side, UpdateKind,
};
pub use order_book::OrderBook;
pub use price_level::{Order, PriceLevel};
pub use ring::{ring_channel, Consumer, Producer};
pub use sequencer::FifoSequencer;
