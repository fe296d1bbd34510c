//! Reentrancy guard for shard locks.
//!
//! `K: Eq` runs while a shard lock is held. A key whose `Eq` reaches back
//! into the same registry would block on a shard lock its own thread
//! already owns. Each thread records which registries it is currently
//! inside, and a second entry into the same registry panics before any
//! lock is taken.
//!
//! Different registries may nest freely.

use std::cell::RefCell;

thread_local! {
    static ENTERED: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Marks this thread as inside the registry identified by `owner` until
/// dropped.
#[derive(Debug)]
pub(crate) struct ReentrancyGuard {
    owner: usize,
}

impl ReentrancyGuard {
    /// Panics if this thread is already inside `owner`.
    pub(crate) fn enter(owner: usize) -> Self {
        ENTERED.with(|entered| {
            let mut entered = entered.borrow_mut();
            assert!(
                !entered.contains(&owner),
                "registry re-entered while this thread holds one of its shard locks"
            );
            entered.push(owner);
        });
        Self { owner }
    }
}

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        // Thread-local storage may already be gone during thread teardown.
        let _ = ENTERED.try_with(|entered| {
            let mut entered = entered.borrow_mut();
            if let Some(pos) = entered.iter().rposition(|&o| o == self.owner) {
                entered.swap_remove(pos);
            }
        });
    }
}
