//! Request Sequencer - restores a deterministic total order over requests.
//!
//! The transport layer polls client connections in arbitrary order within a
//! processing pass, so requests that arrived earlier in real time can be
//! read later. The sequencer buffers one pass worth of (receive-timestamp,
//! request) pairs and replays them in non-decreasing timestamp order, ties
//! broken by arrival, before anything touches book state. Required for
//! price-time-priority fairness and for reproducible replay.
//!
//! This stage only reorders; it validates nothing (per-client sequence
//! numbers are checked upstream in the transport layer).

use arrayvec::ArrayVec;

use crate::messages::{Nanos, OrderRequest, RequestEnvelope};

/// Upper bound on requests buffered within a single processing pass.
pub const MAX_PENDING_REQUESTS: usize = 1024;

/// Buffers one pass of timestamped requests and drains them in order.
#[derive(Default)]
pub struct FifoSequencer {
    pending: ArrayVec<RequestEnvelope, MAX_PENDING_REQUESTS>,
}

impl FifoSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer one request for this pass. No immediate side effect.
    ///
    /// # Panics
    /// Panics if the holding area overflows; its size bounds one transport
    /// pass and overflowing it is a capacity sizing error.
    #[inline]
    pub fn add_request(&mut self, recv_time: Nanos, request: OrderRequest) {
        if self
            .pending
            .try_push(RequestEnvelope { recv_time, request })
            .is_err()
        {
            panic!(
                "sequencer holding area full ({MAX_PENDING_REQUESTS} requests in one pass)"
            );
        }
    }

    /// Number of requests buffered for the current pass.
    #[inline]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Drain the holding area in ascending timestamp order, forwarding each
    /// request to `dispatch`, then clear it for the next pass.
    pub fn sequence_and_publish(&mut self, mut dispatch: impl FnMut(&OrderRequest)) {
        // Stable sort: equal timestamps keep their arrival order
        self.pending.sort_by_key(|env| env.recv_time);
        for env in &self.pending {
            dispatch(&env.request);
        }
        self.pending.clear();
    }
}
