//! Matching Engine - routes sequenced requests to per-instrument books.
//!
//! Exactly one thread runs the sequencer and the engine together; book
//! mutation is single-threaded by design, which is what makes the intrusive
//! chain algorithms safe without locks. Gateway and publisher threads talk
//! to this thread only through ring channels. The engine is the sole writer
//! of both outbound rings and holds no state of its own beyond the books.

use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::messages::{
    ClientResponse, MarketUpdate, OrderRequest, RequestEnvelope, RequestKind,
};
use crate::order_book::OrderBook;
use crate::ring::{ring_channel, Consumer, Producer};
use crate::sequencer::{FifoSequencer, MAX_PENDING_REQUESTS};

/// The engine's write ends of the private response and public market-update
/// streams.
pub struct Outbound {
    responses: Producer<ClientResponse>,
    updates: Producer<MarketUpdate>,
}

impl Outbound {
    pub fn new(responses: Producer<ClientResponse>, updates: Producer<MarketUpdate>) -> Self {
        Self { responses, updates }
    }

    /// Queue a private response for the publisher thread.
    #[inline]
    pub fn respond(&mut self, response: ClientResponse) {
        self.responses.push(response);
    }

    /// Queue a public market update for the publisher thread.
    #[inline]
    pub fn publish(&mut self, update: MarketUpdate) {
        self.updates.push(update);
    }
}

/// The other ends of the engine's rings, handed to the transport and
/// publication layers at construction.
pub struct Gateway {
    /// Push timestamped requests here (one writer thread)
    pub requests: Producer<RequestEnvelope>,
    /// Private response stream; also the sole input to position accounting
    pub responses: Consumer<ClientResponse>,
    /// Public market update stream
    pub updates: Consumer<MarketUpdate>,
}

/// Owns one order book per configured instrument and dispatches each
/// sequenced request to the book for its instrument id.
pub struct MatchingEngine {
    books: Vec<OrderBook>,
    sequencer: FifoSequencer,
    requests: Consumer<RequestEnvelope>,
    outbound: Outbound,
}

impl MatchingEngine {
    /// Build an engine and the gateway ends of its rings.
    ///
    /// # Panics
    /// Panics on an invalid configuration; capacities are deployment
    /// decisions and a bad one cannot be corrected at runtime.
    pub fn with_config(config: &EngineConfig) -> (Self, Gateway) {
        if let Err(err) = config.validate() {
            panic!("invalid engine configuration: {err}");
        }

        let (request_tx, request_rx) = ring_channel(config.request_ring_capacity);
        let (response_tx, response_rx) = ring_channel(config.response_ring_capacity);
        let (update_tx, update_rx) = ring_channel(config.update_ring_capacity);

        let books = (0..config.max_instruments)
            .map(|instrument_id| OrderBook::new(instrument_id, config))
            .collect();

        (
            Self {
                books,
                sequencer: FifoSequencer::new(),
                requests: request_rx,
                outbound: Outbound::new(response_tx, update_tx),
            },
            Gateway {
                requests: request_tx,
                responses: response_rx,
                updates: update_rx,
            },
        )
    }

    /// Run the engine event loop. Never returns.
    ///
    /// Busy-waits on the request ring; no operation in here ever blocks or
    /// sleeps.
    pub fn run(&mut self, pin_to_core: bool) -> ! {
        if pin_to_core {
            Self::pin_to_core();
        }
        self.warm_up();
        info!(instruments = self.books.len(), "matching engine started");

        loop {
            if self.poll() == 0 {
                std::hint::spin_loop();
            }
        }
    }

    /// One processing pass: drain up to one holding-area's worth of requests
    /// from the request ring into the sequencer, then sequence and dispatch
    /// them. Anything still on the ring stays queued for the next pass, so a
    /// burst deeper than the holding area spreads across passes instead of
    /// overflowing it.
    ///
    /// # Returns
    /// Number of requests processed this pass.
    pub fn poll(&mut self) -> usize {
        let mut drained = 0usize;
        while self.sequencer.pending() < MAX_PENDING_REQUESTS {
            let Some(envelope) = self.requests.pop() else {
                break;
            };
            self.sequencer
                .add_request(envelope.recv_time, envelope.request);
            drained += 1;
        }

        if drained > 0 {
            let books = &mut self.books;
            let outbound = &mut self.outbound;
            self.sequencer
                .sequence_and_publish(|request| Self::dispatch(books, outbound, request));
        }
        drained
    }

    /// Process one already-sequenced request synchronously. Entry point for
    /// tests, benchmarks and replay tooling.
    #[inline]
    pub fn process(&mut self, request: &OrderRequest) {
        Self::dispatch(&mut self.books, &mut self.outbound, request);
    }

    fn dispatch(books: &mut [OrderBook], outbound: &mut Outbound, request: &OrderRequest) {
        let Some(book) = books.get_mut(request.instrument_id as usize) else {
            // The transport layer validates instrument ids before the
            // sequencer; an unknown id here means upstream corruption.
            panic!(
                "request for unconfigured instrument {}",
                request.instrument_id
            );
        };

        match request.kind {
            RequestKind::New => book.add(
                request.client_id,
                request.order_id,
                request.side,
                request.price,
                request.qty,
                outbound,
            ),
            RequestKind::Cancel => book.cancel(request.client_id, request.order_id, outbound),
        }
    }

    /// Borrow the book for one instrument (inspection only).
    pub fn book(&self, instrument_id: u32) -> Option<&OrderBook> {
        self.books.get(instrument_id as usize)
    }

    /// Pre-fault all book memory before the first request arrives.
    pub fn warm_up(&self) {
        for book in &self.books {
            book.warm_up();
        }
    }

    /// Pin the current thread to the last available CPU core, which is
    /// typically the one isolated from OS interrupts.
    pub fn pin_to_core() {
        match core_affinity::get_core_ids().and_then(|ids| ids.last().copied()) {
            Some(core) => {
                core_affinity::set_for_current(core);
                info!(core = core.id, "engine thread pinned");
            }
            None => warn!("no CPU cores reported; engine thread not pinned"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ResponseKind, Side, UpdateKind};

    fn small_config() -> EngineConfig {
        EngineConfig {
            max_instruments: 2,
            max_clients: 8,
            max_order_ids: 128,
            max_price_levels: 16,
            request_ring_capacity: 256,
            response_ring_capacity: 256,
            update_ring_capacity: 256,
        }
    }

    fn new_order(
        client_id: u32,
        instrument_id: u32,
        order_id: u64,
        side: Side,
        price: i64,
        qty: u32,
    ) -> OrderRequest {
        OrderRequest {
            kind: RequestKind::New,
            client_id,
            instrument_id,
            order_id,
            side,
            price,
            qty,
        }
    }

    #[test]
    fn test_poll_empty_ring_is_idle() {
        let (mut engine, _gateway) = MatchingEngine::with_config(&small_config());
        assert_eq!(engine.poll(), 0);
    }

    #[test]
    fn test_requests_flow_through_rings() {
        let (mut engine, mut gateway) = MatchingEngine::with_config(&small_config());

        gateway.requests.push(RequestEnvelope {
            recv_time: 100,
            request: new_order(1, 0, 1, Side::Buy, 10000, 50),
        });
        assert_eq!(engine.poll(), 1);

        let response = gateway.responses.pop().unwrap();
        assert_eq!(response.kind, ResponseKind::Accepted);
        assert_eq!(response.market_order_id, Some(1));

        let update = gateway.updates.pop().unwrap();
        assert_eq!(update.kind, UpdateKind::Add);
        assert_eq!(engine.book(0).unwrap().best_bid(), Some(10000));
    }

    #[test]
    fn test_pass_is_sequenced_by_timestamp() {
        let (mut engine, mut gateway) = MatchingEngine::with_config(&small_config());

        // Arrives second in the ring but carries the earlier receive time,
        // so it must rest first and win time priority at the level
        gateway.requests.push(RequestEnvelope {
            recv_time: 200,
            request: new_order(2, 0, 1, Side::Sell, 100, 10),
        });
        gateway.requests.push(RequestEnvelope {
            recv_time: 100,
            request: new_order(1, 0, 1, Side::Sell, 100, 10),
        });
        engine.poll();

        gateway.requests.push(RequestEnvelope {
            recv_time: 300,
            request: new_order(3, 0, 1, Side::Buy, 100, 10),
        });
        engine.poll();

        let fills: Vec<_> = std::iter::from_fn(|| gateway.responses.pop())
            .filter(|r| r.kind == ResponseKind::Filled)
            .collect();
        // The earlier-timestamped sell (client 1) fills, client 2 still rests
        assert_eq!(fills.len(), 2);
        assert!(fills.iter().any(|r| r.client_id == 1));
        assert!(fills.iter().all(|r| r.client_id != 2 || r.kind != ResponseKind::Filled));
        assert_eq!(engine.book(0).unwrap().order_count(), 1);
    }

    #[test]
    fn test_requests_route_by_instrument() {
        let (mut engine, mut gateway) = MatchingEngine::with_config(&small_config());

        gateway.requests.push(RequestEnvelope {
            recv_time: 1,
            request: new_order(1, 0, 1, Side::Buy, 100, 10),
        });
        gateway.requests.push(RequestEnvelope {
            recv_time: 2,
            request: new_order(1, 1, 2, Side::Buy, 200, 10),
        });
        engine.poll();

        assert_eq!(engine.book(0).unwrap().best_bid(), Some(100));
        assert_eq!(engine.book(1).unwrap().best_bid(), Some(200));
    }

    #[test]
    fn test_engine_order_ids_are_per_instrument() {
        let (mut engine, mut gateway) = MatchingEngine::with_config(&small_config());

        engine.process(&new_order(1, 0, 1, Side::Buy, 100, 10));
        engine.process(&new_order(1, 1, 1, Side::Buy, 100, 10));

        let ids: Vec<_> = std::iter::from_fn(|| gateway.responses.pop())
            .map(|r| r.market_order_id.unwrap())
            .collect();
        // Each book starts its counter at 1
        assert_eq!(ids, vec![1, 1]);
    }

    #[test]
    #[should_panic(expected = "unconfigured instrument")]
    fn test_unknown_instrument_is_fatal() {
        let (mut engine, _gateway) = MatchingEngine::with_config(&small_config());
        engine.process(&new_order(1, 99, 1, Side::Buy, 100, 10));
    }

    #[test]
    #[should_panic(expected = "invalid engine configuration")]
    fn test_invalid_config_is_fatal() {
        let config = EngineConfig {
            max_price_levels: 0,
            ..small_config()
        };
        let _ = MatchingEngine::with_config(&config);
    }

    #[test]
    fn test_warm_up() {
        let (engine, _gateway) = MatchingEngine::with_config(&small_config());
        engine.warm_up(); // Should not panic
    }
}
