//! Encapsulation and decapsulation of command frames.
//!
//! The dispatcher never sees raw transport bytes; it sees the
//! [`Decapsulated`] tuple produced here, and hands its reply back to
//! [`encapsulate`] with the same shape flags so the answer goes out in the
//! form the command arrived in.

use bytes::Bytes;
use md5::{Digest, Md5};

use crate::{FrameError, PacketFlags, PacketHeader};

/// A decapsulated command: the tuple every transport reduces to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decapsulated {
    /// Whether the buffer carried a packet header (replies mirror this).
    pub packetised: bool,
    /// UTF-8 command line, trailing newline stripped.
    pub command: Bytes,
    /// Out-of-band binary payload, possibly empty.
    pub oob: Bytes,
    /// Transaction id to echo in the reply, when the host supplied one.
    pub tx_id: Option<u32>,
    /// Broadcast group mask from the header (0 for raw frames).
    pub groups: u32,
    /// The host asked for the reply to carry a checksum.
    pub checksum_requested: bool,
}

/// MD5-32: the first four bytes of the MD5 digest, composed big-endian.
#[must_use]
pub fn md5_32(bytes: &[u8]) -> u32 {
    let digest = Md5::digest(bytes);
    u32::from(digest[0]) << 24
        | u32::from(digest[1]) << 16
        | u32::from(digest[2]) << 8
        | u32::from(digest[3])
}

/// True iff the buffer starts with a complete, marker-matching packet header.
#[must_use]
pub fn looks_like_packet(bytes: &[u8]) -> bool {
    PacketHeader::from_prefix(bytes).is_some()
}

/// Total length declared by the packet header, or 0 for raw buffers.
#[must_use]
pub fn declared_length(bytes: &[u8]) -> u32 {
    PacketHeader::from_prefix(bytes).map_or(0, PacketHeader::total_length)
}

/// Strip at most one trailing newline (the one [`encapsulate`] appends).
fn strip_newline(bytes: &[u8]) -> &[u8] {
    bytes.strip_suffix(b"\n").unwrap_or(bytes)
}

/// Split a reassembled buffer into the canonical command tuple.
///
/// Packetised buffers are validated (declared length, offset ordering,
/// checksum when present); raw buffers cannot fail. The caller answers a
/// [`FrameError`] with the fixed `<error>` token and a transport counter
/// bump.
///
/// # Errors
///
/// See [`FrameError`] for the three rejection cases.
pub fn decapsulate(bytes: &[u8]) -> Result<Decapsulated, FrameError> {
    let Some(header) = PacketHeader::from_prefix(bytes) else {
        return Ok(decapsulate_raw(bytes));
    };

    if header.total_length() as usize != bytes.len() {
        return Err(FrameError::LengthMismatch {
            declared: header.total_length(),
            actual: bytes.len() as u32,
        });
    }

    let data = header.data_offset() as usize;
    let pad = header.data_pad_offset() as usize;
    let oob = header.oob_offset() as usize;

    if data != PacketHeader::SIZE || pad < data || pad > bytes.len() || oob < pad || oob > bytes.len()
    {
        return Err(FrameError::InvalidOffsets);
    }

    let flags = header.flags();

    if flags.checksum_present {
        let expected = header.checksum();

        let mut zeroed = bytes.to_vec();
        zeroed[PacketHeader::CHECKSUM_OFFSET..PacketHeader::CHECKSUM_OFFSET + 4].fill(0);
        let got = md5_32(&zeroed);

        if got != expected {
            return Err(FrameError::ChecksumMismatch { got, expected });
        }
    }

    Ok(Decapsulated {
        packetised: true,
        command: Bytes::copy_from_slice(strip_newline(&bytes[data..pad])),
        oob: Bytes::copy_from_slice(&bytes[oob..]),
        tx_id: flags.tx_id_present.then(|| header.transaction_id()),
        groups: header.broadcast_groups(),
        checksum_requested: flags.checksum_requested,
    })
}

/// Raw form: NUL-terminated command, OOB at the next 4-byte boundary.
fn decapsulate_raw(bytes: &[u8]) -> Decapsulated {
    let (command, oob) = match bytes.iter().position(|&b| b == 0) {
        Some(nul) => {
            // One guaranteed padding byte after the command, then align to 4.
            let oob_offset = (nul + 4) & !0x03;
            let oob = bytes.get(oob_offset..).unwrap_or(&[]);
            (&bytes[..nul], oob)
        },
        None => (bytes, &[][..]),
    };

    Decapsulated {
        packetised: false,
        command: Bytes::copy_from_slice(strip_newline(command)),
        oob: Bytes::copy_from_slice(oob),
        tx_id: None,
        groups: 0,
        checksum_requested: false,
    }
}

/// Build the reply bytes for a handled command.
///
/// Both forms append a single `\n` after `result`, pad with zeros to a 4-byte
/// boundary when an OOB payload follows, then append the payload. Packetised
/// replies echo `tx_id` and, when `checksum` is set, store the MD5-32 of the
/// whole frame (checksum field zeroed while hashing) and advertise it in the
/// flags word.
#[must_use]
pub fn encapsulate(
    result: &[u8],
    oob: &[u8],
    packetised: bool,
    tx_id: Option<u32>,
    checksum: bool,
) -> Bytes {
    if packetised {
        encapsulate_packet(result, oob, tx_id, checksum)
    } else {
        encapsulate_raw(result, oob)
    }
}

fn encapsulate_packet(result: &[u8], oob: &[u8], tx_id: Option<u32>, checksum: bool) -> Bytes {
    let data_offset = PacketHeader::SIZE;
    let data_pad_offset = data_offset + result.len() + 1;
    let oob_offset =
        if oob.is_empty() { data_pad_offset } else { (data_pad_offset + 3) & !0x03 };
    let total = oob_offset + oob.len();

    let mut header = PacketHeader::new();
    header.set_total_length(total as u32);
    header.set_data_offset(data_offset as u32);
    header.set_data_pad_offset(data_pad_offset as u32);
    header.set_oob_offset(oob_offset as u32);

    let mut flags = PacketFlags {
        checksum_present: false,
        checksum_requested: checksum,
        tx_id_present: tx_id.is_some(),
    };
    header.set_transaction_id(tx_id.unwrap_or(0));

    let mut buffer = Vec::with_capacity(total);
    buffer.extend_from_slice(&header.to_bytes());
    buffer.extend_from_slice(result);
    buffer.push(b'\n');
    buffer.resize(oob_offset, 0);
    buffer.extend_from_slice(oob);

    if checksum {
        flags.checksum_present = true;
        header.set_flags(flags);
        buffer[..PacketHeader::SIZE].copy_from_slice(&header.to_bytes());
        let value = md5_32(&buffer);
        header.set_checksum(value);
        buffer[..PacketHeader::SIZE].copy_from_slice(&header.to_bytes());
    } else {
        header.set_flags(flags);
        buffer[..PacketHeader::SIZE].copy_from_slice(&header.to_bytes());
    }

    Bytes::from(buffer)
}

fn encapsulate_raw(result: &[u8], oob: &[u8]) -> Bytes {
    let data_pad_offset = result.len() + 1;
    // Extra byte keeps a NUL between the newline and the payload.
    let oob_offset =
        if oob.is_empty() { data_pad_offset } else { (data_pad_offset + 4) & !0x03 };

    let mut buffer = Vec::with_capacity(oob_offset + oob.len());
    buffer.extend_from_slice(result);
    buffer.push(b'\n');
    buffer.resize(oob_offset, 0);
    buffer.extend_from_slice(oob);

    Bytes::from(buffer)
}
