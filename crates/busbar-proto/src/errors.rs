//! Wire-layer error types.

use thiserror::Error;

/// Errors produced while decapsulating a packetised frame.
///
/// All of these are answered on the wire with the fixed `<error>` token; the
/// variants exist so transports can count *why* a frame was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The header's `total_length` does not match the delivered buffer.
    #[error("incomplete packet: {actual} / {declared}")]
    LengthMismatch {
        /// Length declared in the header.
        declared: u32,
        /// Bytes actually delivered.
        actual: u32,
    },

    /// One of `data_offset`, `data_pad_offset`, `oob_offset` violates
    /// `header_size == data_offset <= data_pad_offset <= oob_offset <= total_length`.
    #[error("invalid offset in packet header")]
    InvalidOffsets,

    /// The stored MD5-32 does not match the frame contents.
    #[error("invalid checksum: {got:#010x} / {expected:#010x}")]
    ChecksumMismatch {
        /// Checksum computed over the delivered frame.
        got: u32,
        /// Checksum stored in the header.
        expected: u32,
    },
}
