//! Per-transport reassembly of fragmented frames.
//!
//! BLE indications and TCP segments both slice frames at a transport-specific
//! maximum segment size. One [`Reassembler`] instance sits in front of each
//! stateful transport and accumulates chunks until a whole frame can be
//! handed to [`crate::decapsulate`].
//!
//! Classification of the *first* chunk decides how the end of the frame is
//! detected: packetised frames declare their length in the header; raw
//! streams are assumed complete once a chunk arrives shorter than the MSS; a
//! first chunk that is neither is already a whole frame.

use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};

use crate::frame::{declared_length, looks_like_packet};

/// Transport-specific reassembly parameters.
#[derive(Debug, Clone, Copy)]
pub struct ReassemblyConfig {
    /// Maximum segment size: a full-sized chunk means "more follows".
    pub mss: usize,
    /// Inactivity window after which a partial frame is dropped.
    pub timeout: Duration,
    /// Hard cap on the accumulated frame.
    pub max_frame: usize,
}

impl ReassemblyConfig {
    /// TCP transport: 1440-byte segments, 1 s window.
    #[must_use]
    pub fn tcp() -> Self {
        Self { mss: 1440, timeout: Duration::from_millis(1000), max_frame: Self::MAX_FRAME }
    }

    /// BLE transport: 512-byte fragments, 2 s window.
    #[must_use]
    pub fn ble() -> Self {
        Self { mss: 512, timeout: Duration::from_millis(2000), max_frame: Self::MAX_FRAME }
    }

    /// Command + header + checksum slack, matching the largest OOB write.
    const MAX_FRAME: usize = 4096 + crate::PacketHeader::SIZE + 32;
}

/// Why a partial frame was thrown away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The inactivity window expired; the incoming chunk is discarded too.
    Timeout,
    /// More bytes arrived than the declared or maximum length allows.
    Overrun,
}

/// Result of feeding one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyOutcome {
    /// Frame incomplete, keep feeding.
    Pending,
    /// A whole frame; hand it to decapsulation.
    Delivered(Bytes),
    /// Partial state was reset.
    Dropped(DropReason),
}

/// Counters exposed through the transport info commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    /// Whole frames delivered upstream.
    pub delivered: u32,
    /// Partial frames dropped by the inactivity window.
    pub timeouts: u32,
    /// Partial frames dropped for exceeding a length bound.
    pub overruns: u32,
}

/// How the end of the current frame will be recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expected {
    /// Header-declared byte count.
    Known(usize),
    /// Raw stream: ends at the first short chunk.
    Unknown,
}

/// Accumulates transport chunks into whole frames.
#[derive(Debug)]
pub struct Reassembler {
    config: ReassemblyConfig,
    buffer: BytesMut,
    expected: Option<Expected>,
    started_at: Option<Instant>,
    stats: ReassemblyStats,
}

impl Reassembler {
    /// Create an empty reassembler for one transport.
    #[must_use]
    pub fn new(config: ReassemblyConfig) -> Self {
        Self {
            config,
            buffer: BytesMut::new(),
            expected: None,
            started_at: None,
            stats: ReassemblyStats::default(),
        }
    }

    /// Drop any partial state. Called on disconnect.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.expected = None;
        self.started_at = None;
    }

    /// Counters for the info commands.
    #[must_use]
    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }

    /// Feed one transport chunk, stamped with the caller's clock.
    pub fn feed(&mut self, chunk: &[u8], now: Instant) -> ReassemblyOutcome {
        if let Some(started_at) = self.started_at {
            if now.duration_since(started_at) > self.config.timeout {
                self.reset();
                self.stats.timeouts += 1;
                return ReassemblyOutcome::Dropped(DropReason::Timeout);
            }
        }

        if self.buffer.is_empty() { self.first_chunk(chunk, now) } else { self.next_chunk(chunk) }
    }

    fn first_chunk(&mut self, chunk: &[u8], now: Instant) -> ReassemblyOutcome {
        if looks_like_packet(chunk) {
            let declared = declared_length(chunk) as usize;

            if declared > self.config.max_frame || chunk.len() > declared {
                self.stats.overruns += 1;
                return ReassemblyOutcome::Dropped(DropReason::Overrun);
            }

            if chunk.len() == declared {
                return self.deliver(chunk);
            }

            self.buffer.extend_from_slice(chunk);
            self.expected = Some(Expected::Known(declared));
            self.started_at = Some(now);
            return ReassemblyOutcome::Pending;
        }

        if chunk.len() == self.config.mss {
            self.buffer.extend_from_slice(chunk);
            self.expected = Some(Expected::Unknown);
            self.started_at = Some(now);
            return ReassemblyOutcome::Pending;
        }

        self.deliver(chunk)
    }

    fn next_chunk(&mut self, chunk: &[u8]) -> ReassemblyOutcome {
        if self.buffer.len() + chunk.len() > self.config.max_frame {
            self.reset();
            self.stats.overruns += 1;
            return ReassemblyOutcome::Dropped(DropReason::Overrun);
        }

        self.buffer.extend_from_slice(chunk);

        match self.expected {
            Some(Expected::Known(declared)) => {
                if self.buffer.len() > declared {
                    self.reset();
                    self.stats.overruns += 1;
                    ReassemblyOutcome::Dropped(DropReason::Overrun)
                } else if self.buffer.len() == declared {
                    self.take_buffer()
                } else {
                    ReassemblyOutcome::Pending
                }
            },
            Some(Expected::Unknown) => {
                if chunk.len() < self.config.mss {
                    self.take_buffer()
                } else {
                    ReassemblyOutcome::Pending
                }
            },
            // INVARIANT: a non-empty buffer always has a classification.
            None => {
                self.reset();
                ReassemblyOutcome::Dropped(DropReason::Overrun)
            },
        }
    }

    fn deliver(&mut self, chunk: &[u8]) -> ReassemblyOutcome {
        self.stats.delivered += 1;
        ReassemblyOutcome::Delivered(Bytes::copy_from_slice(chunk))
    }

    fn take_buffer(&mut self) -> ReassemblyOutcome {
        let frame = self.buffer.split().freeze();
        self.reset();
        self.stats.delivered += 1;
        ReassemblyOutcome::Delivered(frame)
    }
}
