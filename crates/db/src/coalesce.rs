//! Write coalescing.
//!
//! Rapid successive mutations (presence pings, advertisement churn) would otherwise each rewrite
//! the full snapshot. A [`WriteCoalescer`] records that the working copy is dirty and reports
//! when the coalescing window has elapsed. Because every flush writes the whole snapshot, the
//! pending queue never needs more than one slot: later mutations are folded into the write that
//! is already scheduled.

use concord_primitives::UnixMillis;

/// Default coalescing window.
pub const DEFAULT_WINDOW_MS: u64 = 500;

/// Tracks a pending snapshot write and its deadline.
#[derive(Debug, Clone)]
pub struct WriteCoalescer {
    window_ms: u64,
    pending_since: Option<UnixMillis>,
    coalesced: u64,
}

impl WriteCoalescer {
    /// Creates a coalescer with the given window.
    pub const fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            pending_since: None,
            coalesced: 0,
        }
    }

    /// Records a mutation at `now`.
    ///
    /// The deadline is fixed by the first mutation after a flush, so a steady stream of
    /// mutations cannot postpone the write forever.
    pub fn mark_dirty(&mut self, now: UnixMillis) {
        match self.pending_since {
            Some(_) => self.coalesced += 1,
            None => self.pending_since = Some(now),
        }
    }

    /// Whether a write is pending.
    pub const fn is_dirty(&self) -> bool {
        self.pending_since.is_some()
    }

    /// When the pending write becomes due, if any.
    pub fn deadline(&self) -> Option<UnixMillis> {
        self.pending_since
            .map(|since| since.saturating_add(self.window_ms))
    }

    /// Whether the pending write is due at `now`.
    pub fn is_due(&self, now: UnixMillis) -> bool {
        self.deadline().is_some_and(|deadline| deadline <= now)
    }

    /// Consumes the pending write if it is due. Returns `true` if the caller must flush.
    pub fn take_if_due(&mut self, now: UnixMillis) -> bool {
        if self.is_due(now) {
            self.clear();
            return true;
        }
        false
    }

    /// Forgets the pending write, typically after a synchronous flush.
    pub fn clear(&mut self) {
        self.pending_since = None;
        self.coalesced = 0;
    }

    /// How many mutations were folded into the pending write.
    pub const fn coalesced(&self) -> u64 {
        self.coalesced
    }
}

impl Default for WriteCoalescer {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_MS)
    }
}
