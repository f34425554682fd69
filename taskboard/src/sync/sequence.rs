//! Monotonic ticket guard for pull requests.
//!
//! Each pull takes a [`Ticket`] before it is dispatched and may only commit
//! its result while that ticket is still the newest one issued. Overlapping
//! pulls therefore resolve to the most recently initiated one, whatever order
//! their responses arrive in.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Token identifying one pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u64);

impl Ticket {
    /// Raw sequence number, for logging.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Issues tickets and answers whether a ticket is still current.
#[derive(Debug, Default)]
pub struct SequenceGuard {
    latest: AtomicU64,
    torn_down: AtomicBool,
}

impl SequenceGuard {
    /// Creates a guard that has issued no tickets.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            latest: AtomicU64::new(0),
            torn_down: AtomicBool::new(false),
        }
    }

    /// Issues a new ticket, superseding every earlier one.
    pub fn begin(&self) -> Ticket {
        Ticket(self.latest.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Whether `ticket` is the newest issued and the guard is still live.
    #[must_use]
    pub fn is_current(&self, ticket: Ticket) -> bool {
        !self.is_torn_down() && self.latest.load(Ordering::Acquire) == ticket.0
    }

    /// Makes every outstanding and future ticket non-current.
    pub fn tear_down(&self) {
        self.torn_down.store(true, Ordering::Release);
    }

    /// Whether [`tear_down`](Self::tear_down) has been called.
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }
}
