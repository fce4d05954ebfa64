//! Fuzz Test - Compares the engine against a reference implementation.
//!
//! Uses a naive but correct reference book to verify that the pool-and-chain
//! engine produces identical top-of-book, order counts and traded volume.

use matchbook::{
    EngineConfig, MatchingEngine, OrderRequest, RequestKind, ResponseKind, Side, UpdateKind,
};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashMap};

fn test_config() -> EngineConfig {
    EngineConfig {
        max_instruments: 1,
        max_clients: 128,
        max_order_ids: 32 * 1024,
        max_price_levels: 1024,
        request_ring_capacity: 4096,
        response_ring_capacity: 4096,
        update_ring_capacity: 4096,
        ..EngineConfig::default()
    }
}

/// Simple reference implementation for verification
struct ReferenceBook {
    bids: BTreeMap<i64, Vec<((u32, u64), u32)>>, // price -> [((client, order_id), qty)]
    asks: BTreeMap<i64, Vec<((u32, u64), u32)>>,
    orders: HashMap<(u32, u64), (Side, i64)>, // (client, order_id) -> (side, price)
}

impl ReferenceBook {
    fn new() -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            orders: HashMap::new(),
        }
    }

    fn best_bid(&self) -> Option<i64> {
        self.bids.iter().rev().find(|(_, v)| !v.is_empty()).map(|(k, _)| *k)
    }

    fn best_ask(&self) -> Option<i64> {
        self.asks.iter().find(|(_, v)| !v.is_empty()).map(|(k, _)| *k)
    }

    /// Place with price-time priority; returns the total quantity traded
    fn place(&mut self, key: (u32, u64), side: Side, price: i64, mut qty: u32) -> u32 {
        let mut traded = 0u32;

        match side {
            Side::Buy => {
                let mut prices_to_remove = Vec::new();
                for (&ask_price, orders) in self.asks.iter_mut() {
                    if ask_price > price || qty == 0 {
                        break;
                    }
                    while !orders.is_empty() && qty > 0 {
                        let trade_qty = orders[0].1.min(qty);
                        orders[0].1 -= trade_qty;
                        qty -= trade_qty;
                        traded += trade_qty;

                        if orders[0].1 == 0 {
                            let (maker_key, _) = orders.remove(0);
                            self.orders.remove(&maker_key);
                        }
                    }
                    if orders.is_empty() {
                        prices_to_remove.push(ask_price);
                    }
                }
                for p in prices_to_remove {
                    self.asks.remove(&p);
                }

                if qty > 0 {
                    self.bids.entry(price).or_default().push((key, qty));
                    self.orders.insert(key, (Side::Buy, price));
                }
            }
            Side::Sell => {
                let mut prices_to_remove = Vec::new();
                let prices: Vec<_> = self.bids.keys().rev().copied().collect();
                for bid_price in prices {
                    if bid_price < price || qty == 0 {
                        break;
                    }
                    let orders = self.bids.get_mut(&bid_price).unwrap();
                    while !orders.is_empty() && qty > 0 {
                        let trade_qty = orders[0].1.min(qty);
                        orders[0].1 -= trade_qty;
                        qty -= trade_qty;
                        traded += trade_qty;

                        if orders[0].1 == 0 {
                            let (maker_key, _) = orders.remove(0);
                            self.orders.remove(&maker_key);
                        }
                    }
                    if orders.is_empty() {
                        prices_to_remove.push(bid_price);
                    }
                }
                for p in prices_to_remove {
                    self.bids.remove(&p);
                }

                if qty > 0 {
                    self.asks.entry(price).or_default().push((key, qty));
                    self.orders.insert(key, (Side::Sell, price));
                }
            }
        }

        traded
    }

    fn cancel(&mut self, key: (u32, u64)) -> bool {
        if let Some((side, price)) = self.orders.remove(&key) {
            let book = match side {
                Side::Buy => &mut self.bids,
                Side::Sell => &mut self.asks,
            };
            if let Some(orders) = book.get_mut(&price) {
                orders.retain(|(k, _)| *k != key);
                if orders.is_empty() {
                    book.remove(&price);
                }
            }
            true
        } else {
            false
        }
    }

    fn order_count(&self) -> usize {
        self.orders.len()
    }
}

fn random_place(rng: &mut ChaCha8Rng, order_id: u64) -> OrderRequest {
    OrderRequest {
        kind: RequestKind::New,
        client_id: rng.gen_range(1..100),
        instrument_id: 0,
        order_id,
        side: if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell },
        price: rng.gen_range(9800..10200) * 100,
        qty: rng.gen_range(1..200),
    }
}

fn cancel_request(client_id: u32, order_id: u64) -> OrderRequest {
    OrderRequest {
        kind: RequestKind::Cancel,
        client_id,
        instrument_id: 0,
        order_id,
        side: Side::Buy,
        price: 0,
        qty: 0,
    }
}

#[test]
fn test_fuzz_best_prices() {
    const SEED: u64 = 0xFEEDFACE;
    const OPS: usize = 10_000;

    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    let (mut engine, mut gateway) = MatchingEngine::with_config(&test_config());
    let mut reference = ReferenceBook::new();

    let mut next_order_id = 1u64;
    let mut active_orders: Vec<(u32, u64)> = Vec::new();

    for i in 0..OPS {
        // 70% place, 30% cancel
        if active_orders.is_empty() || rng.gen_bool(0.7) {
            let order = random_place(&mut rng, next_order_id);
            next_order_id += 1;

            // Run both
            engine.process(&order);
            reference.place((order.client_id, order.order_id), order.side, order.price, order.qty);

            // Track even if it fully matched; cancel then no-ops in both
            active_orders.push((order.client_id, order.order_id));
        } else {
            let idx = rng.gen_range(0..active_orders.len());
            let (client_id, order_id) = active_orders.swap_remove(idx);

            engine.process(&cancel_request(client_id, order_id));
            reference.cancel((client_id, order_id));
        }

        // Keep the event rings from filling up
        while gateway.responses.pop().is_some() {}
        while gateway.updates.pop().is_some() {}

        let book = engine.book(0).unwrap();
        assert_eq!(
            book.best_bid(),
            reference.best_bid(),
            "Best bid mismatch at op {}", i
        );
        assert_eq!(
            book.best_ask(),
            reference.best_ask(),
            "Best ask mismatch at op {}", i
        );

        if i % 500 == 0 {
            book.check_consistency().unwrap();
        }
    }

    println!("Fuzz test passed!");
    println!("  Operations: {}", OPS);
    println!(
        "  Final order count - Engine: {}, Reference: {}",
        engine.book(0).unwrap().order_count(),
        reference.order_count()
    );
}

#[test]
fn test_fuzz_order_count_and_depth() {
    const SEED: u64 = 0xBADC0DE;
    const OPS: usize = 5_000;

    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    let (mut engine, mut gateway) = MatchingEngine::with_config(&test_config());
    let mut reference = ReferenceBook::new();

    let mut next_order_id = 1u64;
    let mut active_orders: Vec<(u32, u64)> = Vec::new();

    for i in 0..OPS {
        if active_orders.is_empty() || rng.gen_bool(0.6) {
            let order = random_place(&mut rng, next_order_id);
            next_order_id += 1;

            engine.process(&order);
            reference.place((order.client_id, order.order_id), order.side, order.price, order.qty);

            // Only track the order if some of it rested
            let mut rested = false;
            while let Some(response) = gateway.responses.pop() {
                if response.client_order_id == order.order_id {
                    rested = response.leaves_qty > 0;
                }
            }
            if rested {
                active_orders.push((order.client_id, order.order_id));
            }
        } else {
            let idx = rng.gen_range(0..active_orders.len());
            let (client_id, order_id) = active_orders.swap_remove(idx);

            engine.process(&cancel_request(client_id, order_id));
            reference.cancel((client_id, order_id));
            while gateway.responses.pop().is_some() {}
        }
        while gateway.updates.pop().is_some() {}

        if i % 100 == 0 {
            let book = engine.book(0).unwrap();
            assert_eq!(
                book.order_count() as usize,
                reference.order_count(),
                "Order count mismatch at op {}", i
            );

            // Resting quantity at the best bid must also agree
            if let Some(price) = reference.best_bid() {
                let ref_qty: u64 = reference.bids[&price].iter().map(|(_, q)| *q as u64).sum();
                assert_eq!(book.depth_at(price).0, ref_qty, "Depth mismatch at op {}", i);
            }
        }
    }

    let book = engine.book(0).unwrap();
    book.check_consistency().unwrap();
    assert_eq!(book.order_count() as usize, reference.order_count());
    println!("Order count fuzz test passed!");
}

#[test]
fn test_fuzz_trade_volume() {
    const SEED: u64 = 0x12345678;
    const OPS: u64 = 5_000;

    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    let (mut engine, mut gateway) = MatchingEngine::with_config(&test_config());
    let mut reference = ReferenceBook::new();

    let mut engine_traded = 0u64;
    let mut reference_traded = 0u64;
    let mut fill_exec = 0u64;

    for order_id in 1..=OPS {
        let order = random_place(&mut rng, order_id);

        engine.process(&order);
        let ref_qty =
            reference.place((order.client_id, order.order_id), order.side, order.price, order.qty);
        reference_traded += ref_qty as u64;

        while let Some(update) = gateway.updates.pop() {
            if update.kind == UpdateKind::Trade {
                engine_traded += update.qty as u64;
            }
        }
        while let Some(response) = gateway.responses.pop() {
            if response.kind == ResponseKind::Filled {
                fill_exec += response.exec_qty as u64;
            }
        }
    }

    assert_eq!(
        engine_traded, reference_traded,
        "Total traded volume mismatch: engine={}, reference={}",
        engine_traded, reference_traded
    );
    // Every trade fills both counterparties for the same quantity
    assert_eq!(fill_exec, 2 * engine_traded);

    println!("Trade volume fuzz test passed!");
    println!("  Total traded: {}", engine_traded);
}
