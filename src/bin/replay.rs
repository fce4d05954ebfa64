//! Replay a captured request log through the engine and report latency.
//!
//! Input is a CSV of timestamped requests, one row per request:
//!
//! ```csv
//! recv_time,kind,client_id,instrument_id,order_id,side,price,qty
//! 1000,New,1,0,1,Buy,1005000,100
//! 2000,Cancel,1,0,1,Buy,0,0
//! ```
//!
//! Rows are fed through the sequencer in passes of up to
//! `MAX_PENDING_REQUESTS`, exactly as the live event loop would, and each
//! request's processing time is recorded into an HDR histogram.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use hdrhistogram::Histogram;
use serde::Deserialize;
use tracing::info;

use matchbook::sequencer::MAX_PENDING_REQUESTS;
use matchbook::{
    EngineConfig, FifoSequencer, MatchingEngine, Nanos, OrderRequest, RequestKind, Side,
};

#[derive(Parser)]
#[command(name = "replay", about = "Replay a request log through the matching engine")]
struct Args {
    /// CSV request log to replay
    input: PathBuf,

    /// Number of instruments to configure
    #[arg(long, default_value_t = 8)]
    instruments: u32,

    /// Client id space
    #[arg(long, default_value_t = 256)]
    clients: u32,

    /// Client order id space per instrument
    #[arg(long, default_value_t = 64 * 1024)]
    order_ids: u32,

    /// Maximum simultaneous price levels per instrument
    #[arg(long, default_value_t = 1024)]
    price_levels: u32,
}

#[derive(Deserialize)]
struct RequestRow {
    recv_time: Nanos,
    kind: RequestKind,
    client_id: u32,
    instrument_id: u32,
    order_id: u64,
    side: Side,
    price: i64,
    qty: u32,
}

impl RequestRow {
    fn into_parts(self) -> (Nanos, OrderRequest) {
        (
            self.recv_time,
            OrderRequest {
                kind: self.kind,
                client_id: self.client_id,
                instrument_id: self.instrument_id,
                order_id: self.order_id,
                side: self.side,
                price: self.price,
                qty: self.qty,
            },
        )
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = EngineConfig {
        max_instruments: args.instruments,
        max_clients: args.clients,
        max_order_ids: args.order_ids,
        max_price_levels: args.price_levels,
        ..EngineConfig::default()
    };
    config.validate().context("invalid engine configuration")?;

    let mut reader = csv::Reader::from_path(&args.input)
        .with_context(|| format!("opening {}", args.input.display()))?;
    let mut rows: Vec<(Nanos, OrderRequest)> = Vec::new();
    for (line, record) in reader.deserialize::<RequestRow>().enumerate() {
        let row = record.with_context(|| format!("parsing request row {}", line + 1))?;
        rows.push(row.into_parts());
    }
    info!(requests = rows.len(), "request log loaded");

    let (mut engine, mut gateway) = MatchingEngine::with_config(&config);
    engine.warm_up();
    let mut sequencer = FifoSequencer::new();

    // Auto-resizing, so outlier stalls are kept instead of dropped
    let mut histogram = Histogram::<u64>::new(3)?;
    let mut dropped = 0u64;
    let mut responses = 0u64;
    let mut updates = 0u64;
    let mut total_duration = std::time::Duration::ZERO;

    for pass in rows.chunks(MAX_PENDING_REQUESTS) {
        for &(recv_time, request) in pass {
            sequencer.add_request(recv_time, request);
        }
        sequencer.sequence_and_publish(|request| {
            let start = Instant::now();
            std::hint::black_box(engine.process(request));
            let elapsed = start.elapsed();
            if histogram.record(elapsed.as_nanos() as u64).is_err() {
                dropped += 1;
            }
            total_duration += elapsed;
        });

        while gateway.responses.pop().is_some() {
            responses += 1;
        }
        while gateway.updates.pop().is_some() {
            updates += 1;
        }
    }

    println!("\n=== Replay Report ===");
    println!("Requests:   {}", rows.len());
    println!("Responses:  {responses}");
    println!("Updates:    {updates}");
    println!(
        "Throughput: {:.2} ops/sec",
        rows.len() as f64 / total_duration.as_secs_f64()
    );
    println!("---------------------");
    println!("Min:    {:6} ns", histogram.min());
    println!("P50:    {:6} ns", histogram.value_at_quantile(0.50));
    println!("P90:    {:6} ns", histogram.value_at_quantile(0.90));
    println!("P99:    {:6} ns", histogram.value_at_quantile(0.99));
    println!("P99.9:  {:6} ns", histogram.value_at_quantile(0.999));
    println!("Max:    {:6} ns", histogram.max());
    if dropped > 0 {
        println!("Dropped samples: {dropped}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_keeps_outlier_samples() {
        let mut histogram = Histogram::<u64>::new(3).unwrap();
        histogram.record(1).unwrap();
        // A ten-second stall still lands in the histogram
        histogram.record(10_000_000_000).unwrap();
        assert_eq!(histogram.len(), 2);
        assert!(histogram.max() >= 9_900_000_000);
    }
}
