//! Linear tickets and the live-reference counter behind each slot.
//!
//! A `Ticket` is a zero-sized proof that one live reference was registered
//! on a particular `RefCount`. Dropping a ticket panics; the only way to
//! dispose of one is to hand it back through `RefCount::unsubscribe`.
//! This turns a forgotten release (which would leak a slot forever) into
//! an immediate failure.
//!
//! `RefCount` is deliberately not atomic. Every subscribe and unsubscribe
//! happens while the owning shard's map lock is held, and that lock is what
//! makes "decrement to zero, then remove" a single step.

use core::cell::Cell;
use core::marker::PhantomData;

/// Proof of one registered live reference. Must be consumed by
/// [`RefCount::unsubscribe`].
#[must_use = "a ticket must be returned with RefCount::unsubscribe"]
pub struct Ticket {
    // Tickets stay on the thread that registered them.
    _not_send: PhantomData<*const ()>,
}

impl Ticket {
    #[inline]
    fn mint() -> Self {
        Self {
            _not_send: PhantomData,
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        panic!("Ticket dropped without RefCount::unsubscribe");
    }
}

impl core::fmt::Debug for Ticket {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("Ticket")
    }
}

/// Number of callers currently holding or waiting for a slot.
#[derive(Debug)]
pub struct RefCount {
    live: Cell<usize>,
}

impl RefCount {
    pub fn new() -> Self {
        Self { live: Cell::new(0) }
    }

    #[inline]
    pub fn get(&self) -> usize {
        self.live.get()
    }

    /// Register one live reference.
    #[inline]
    pub fn subscribe(&self) -> Ticket {
        let n = self.live.get().wrapping_add(1);
        if n == 0 {
            // Same policy as `Rc`: overflowing the count is not recoverable.
            std::process::abort();
        }
        self.live.set(n);
        Ticket::mint()
    }

    /// Return a ticket. Returns true when this was the last live reference.
    #[inline]
    pub fn unsubscribe(&self, t: Ticket) -> bool {
        let c = self.live.get();
        assert!(c > 0, "RefCount underflow");
        self.live.set(c - 1);
        core::mem::forget(t);
        c == 1
    }
}

impl Default for RefCount {
    fn default() -> Self {
        Self::new()
    }
}
