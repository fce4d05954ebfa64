//! Engine configuration - the capacity bounds everything else is sized by.
//!
//! Supplied once at construction, never hot-reloaded. Every bound is a hard
//! limit: the pools, dense indices and ring channels are allocated up front
//! and exhausting any of them at runtime is a deployment sizing error, not a
//! recoverable condition.

use serde::Deserialize;
use thiserror::Error;

/// Capacity bounds for one matching engine instance.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Number of instruments; books are indexed 0..max_instruments
    pub max_instruments: u32,
    /// Client id space; also sizes the dense cancel-lookup index
    pub max_clients: u32,
    /// Client order id space per instrument; also the order pool capacity
    pub max_order_ids: u32,
    /// Maximum simultaneous price levels per instrument
    pub max_price_levels: u32,
    /// Capacity of the gateway -> engine request ring
    pub request_ring_capacity: usize,
    /// Capacity of the engine -> publisher private response ring
    pub response_ring_capacity: usize,
    /// Capacity of the engine -> publisher market update ring
    pub update_ring_capacity: usize,
}

impl Default for EngineConfig {
    /// Production-shaped defaults. The cancel index is allocated eagerly at
    /// max_clients x max_order_ids entries per instrument, so the order id
    /// space is kept moderate here; deployments needing the full range set
    /// it explicitly.
    fn default() -> Self {
        Self {
            max_instruments: 8,
            max_clients: 64,
            max_order_ids: 16 * 1024,
            max_price_levels: 256,
            request_ring_capacity: 256 * 1024,
            response_ring_capacity: 256 * 1024,
            update_ring_capacity: 256 * 1024,
        }
    }
}

/// A structurally invalid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be non-zero")]
    ZeroBound(&'static str),
}

impl EngineConfig {
    /// Check that every bound is usable. Engine construction treats a
    /// failure here as fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (value, name) in [
            (self.max_instruments as usize, "max_instruments"),
            (self.max_clients as usize, "max_clients"),
            (self.max_order_ids as usize, "max_order_ids"),
            (self.max_price_levels as usize, "max_price_levels"),
            (self.request_ring_capacity, "request_ring_capacity"),
            (self.response_ring_capacity, "response_ring_capacity"),
            (self.update_ring_capacity, "update_ring_capacity"),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroBound(name));
            }
        }
        Ok(())
    }
}
