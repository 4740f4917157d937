//! Per-transport counters.
//!
//! Each transport increments its own [`LinkStats`] handle; the `*-info`
//! commands snapshot them. Counters are monotonically increasing and only
//! reset on boot.

use std::sync::{Arc, Mutex};

/// Counter block shared by all transports; not every field is meaningful
/// for every transport (e.g. `accepts` is TCP-only).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkCounters {
    /// Payload bytes received.
    pub received_bytes: u32,
    /// Transport fragments/segments received.
    pub received_fragments: u32,
    /// Whole frames delivered to the intake queue.
    pub received_packets: u32,
    /// Payload bytes sent.
    pub sent_bytes: u32,
    /// Transport fragments/segments sent.
    pub sent_fragments: u32,
    /// Whole replies sent.
    pub sent_packets: u32,
    /// I/O or framing errors.
    pub errors: u32,
    /// Reassembly timeouts.
    pub timeouts: u32,
    /// Accepted connections (TCP).
    pub accepts: u32,
    /// Writes dropped before authorization (BLE).
    pub unauthorised: u32,
}

/// Cloneable counter handle.
#[derive(Debug, Clone, Default)]
pub struct LinkStats {
    inner: Arc<Mutex<LinkCounters>>,
}

impl LinkStats {
    /// Fresh zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a mutation to the counters.
    pub fn update(&self, f: impl FnOnce(&mut LinkCounters)) {
        if let Ok(mut counters) = self.inner.lock() {
            f(&mut counters);
        }
    }

    /// Copy of the current counters.
    #[must_use]
    pub fn snapshot(&self) -> LinkCounters {
        self.inner.lock().map(|c| *c).unwrap_or_default()
    }
}

/// The counter handles for every transport, shared between the runtime
/// tasks and the dispatcher.
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    /// BLE link.
    pub ble: LinkStats,
    /// TCP link.
    pub tcp: LinkStats,
    /// UDP link (reserved; the listener is an external collaborator).
    pub udp: LinkStats,
    /// Console.
    pub console: LinkStats,
}

impl TransportStats {
    /// Fresh zeroed counter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updates_are_visible_across_clones() {
        let stats = LinkStats::new();
        let clone = stats.clone();

        stats.update(|c| {
            c.received_bytes += 100;
            c.received_packets += 1;
        });

        let snap = clone.snapshot();
        assert_eq!(snap.received_bytes, 100);
        assert_eq!(snap.received_packets, 1);
    }
}
