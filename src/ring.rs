//! Ring Channel - bounded lock-free SPSC queue of fixed-size records.
//!
//! Every inter-thread handoff in the system goes through one of these:
//! gateway -> engine requests, engine -> publisher responses and market
//! updates. One producer thread and one consumer thread per instance,
//! enforced by handing out separate owned `Producer`/`Consumer` ends.
//!
//! The visible element count is the sole synchronization point: the producer
//! increments it with release ordering after fully writing a slot, so a
//! consumer that observes the incremented count (acquire) also observes the
//! written record. Read/write cursors are private to their own end and need
//! no synchronization at all.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Shared<T> {
    slots: Box<[UnsafeCell<T>]>,
    len: AtomicUsize,
}

// Safety: at most one thread touches a given slot at a time. A slot is
// writable only while it is outside the visible window [read, read+len) and
// readable only while inside it; the atomic `len` hands slots across.
unsafe impl<T: Send> Sync for Shared<T> {}
unsafe impl<T: Send> Send for Shared<T> {}

/// Create a ring channel with room for `capacity` records.
///
/// # Panics
/// Panics if `capacity` is zero.
pub fn ring_channel<T: Default>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    assert!(capacity > 0, "ring channel capacity must be non-zero");

    let slots: Box<[UnsafeCell<T>]> = (0..capacity).map(|_| UnsafeCell::new(T::default())).collect();
    let shared = Arc::new(Shared {
        slots,
        len: AtomicUsize::new(0),
    });

    (
        Producer {
            shared: Arc::clone(&shared),
            write: 0,
        },
        Consumer { shared, read: 0 },
    )
}

/// Write end of a ring channel. Owned by exactly one thread.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
    /// Next slot to write. Only this end ever reads or advances it.
    write: usize,
}

impl<T> Producer<T> {
    /// Reserve the next write slot for in-place construction.
    ///
    /// The slot stays invisible to the consumer until [`commit_write`] runs.
    /// A full ring means the consumer is not draining every pass, which the
    /// deployer's capacity sizing is supposed to rule out.
    ///
    /// # Panics
    /// Panics if the ring is full.
    ///
    /// [`commit_write`]: Producer::commit_write
    #[inline]
    pub fn write_slot(&mut self) -> &mut T {
        assert!(
            self.shared.len.load(Ordering::Acquire) < self.shared.slots.len(),
            "ring channel full: consumer not keeping up or capacity misconfigured"
        );
        // Safety: this slot is outside the consumer's visible window and the
        // producer end is unique, so we hold the only reference to it.
        unsafe { &mut *self.shared.slots[self.write].get() }
    }

    /// Publish the slot written via [`write_slot`] and advance the cursor.
    ///
    /// [`write_slot`]: Producer::write_slot
    #[inline]
    pub fn commit_write(&mut self) {
        self.write = (self.write + 1) % self.shared.slots.len();
        self.shared.len.fetch_add(1, Ordering::Release);
    }

    /// Reserve, write and publish in one call.
    #[inline]
    pub fn push(&mut self, value: T) {
        *self.write_slot() = value;
        self.commit_write();
    }

    /// Number of unread records, with acquire semantics.
    #[inline]
    pub fn len(&self) -> usize {
        self.shared.len.load(Ordering::Acquire)
    }

    /// Total slot count.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.slots.len()
    }
}

/// Read end of a ring channel. Owned by exactly one thread.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
    /// Next slot to read. Only this end ever reads or advances it.
    read: usize,
}

impl<T> Consumer<T> {
    /// Borrow the oldest unread record, or `None` if the ring is empty.
    #[inline]
    pub fn peek(&self) -> Option<&T> {
        if self.shared.len.load(Ordering::Acquire) == 0 {
            return None;
        }
        // Safety: the acquire load above proves the producer committed this
        // slot, and the producer cannot reuse it until commit_read runs.
        Some(unsafe { &*self.shared.slots[self.read].get() })
    }

    /// Consume the record last returned by [`peek`].
    ///
    /// # Panics
    /// Panics if the ring is empty; reading past the committed window is a
    /// programming error, not a recoverable condition.
    ///
    /// [`peek`]: Consumer::peek
    #[inline]
    pub fn commit_read(&mut self) {
        let prev = self.shared.len.fetch_sub(1, Ordering::AcqRel);
        assert!(prev != 0, "commit_read on empty ring channel");
        self.read = (self.read + 1) % self.shared.slots.len();
    }

    /// Copy out the oldest unread record and consume it.
    #[inline]
    pub fn pop(&mut self) -> Option<T>
    where
        T: Copy,
    {
        let value = *self.peek()?;
        self.commit_read();
        Some(value)
    }

    /// Number of unread records, with acquire semantics.
    #[inline]
    pub fn len(&self) -> usize {
        self.shared.len.load(Ordering::Acquire)
    }

    /// Returns true if there is nothing to read right now.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total slot count.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.slots.len()
    }
}
