//! Supersession tickets for in-flight resyncs
//!
//! A resync holds a ticket while it waits on persistence. Starting a mutation
//! supersedes it; the resync checks its ticket before applying and drops its
//! data if it was superseded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Handle to one resync attempt. Clones share the superseded flag.
#[derive(Debug, Clone, Default)]
pub struct ResyncTicket {
    superseded: Arc<AtomicBool>,
}

impl ResyncTicket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_superseded(&self) -> bool {
        self.superseded.load(Ordering::SeqCst)
    }

    /// Superseding after the data was applied has no effect
    pub fn supersede(&self) {
        self.superseded.store(true, Ordering::SeqCst);
    }

    /// True when both handles belong to the same resync
    pub fn same_as(&self, other: &ResyncTicket) -> bool {
        Arc::ptr_eq(&self.superseded, &other.superseded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let ticket = ResyncTicket::new();
        let held = ticket.clone();
        assert!(!held.is_superseded());
        ticket.supersede();
        assert!(held.is_superseded());
        assert!(held.same_as(&ticket));
        assert!(!held.same_as(&ResyncTicket::new()));
    }
}
