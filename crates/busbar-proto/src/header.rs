//! Packet header with zero-copy parsing.
//!
//! The header is a fixed 36-byte structure serialized as raw binary (little
//! endian, matching the device's native byte order). Fields are stored as raw
//! byte arrays to avoid alignment issues; all multi-byte access goes through
//! typed accessors.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Fixed 36-byte packet header (little endian).
///
/// A buffer is recognized as packetised when it is at least [`Self::SIZE`]
/// bytes long and the marker triple (`soh`, `version`, `id`) matches the
/// constants below; anything else is treated as a raw command line.
///
/// # Invariants
///
/// - `data_offset == SIZE` (the command text starts right after the header).
/// - `data_offset <= data_pad_offset <= oob_offset <= total_length`.
/// - When `checksum_present` is set, the MD5-32 of the whole frame with the
///   checksum field zeroed equals the stored `checksum`.
///
/// All 36-byte patterns are valid bit patterns, so casting untrusted bytes
/// cannot cause undefined behavior; semantic validation happens separately in
/// [`crate::decapsulate`].
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct PacketHeader {
    soh: u8,
    version: u8,
    id: [u8; 2],
    total_length: [u8; 4],
    flags: [u8; 4],
    transaction_id: [u8; 4],
    broadcast_groups: [u8; 4],
    checksum: [u8; 4],
    data_offset: [u8; 4],
    data_pad_offset: [u8; 4],
    oob_offset: [u8; 4],
}

impl PacketHeader {
    /// Size of the serialized header.
    pub const SIZE: usize = 36;

    /// Start-of-header marker byte.
    pub const SOH: u8 = 0x01;

    /// Protocol version byte.
    pub const VERSION: u8 = 0x02;

    /// Protocol identification word.
    pub const ID: u16 = 0xabf0;

    /// Byte offset of the checksum field (zeroed while hashing).
    pub const CHECKSUM_OFFSET: usize = 20;

    /// Create an all-zero header carrying the marker triple.
    #[must_use]
    pub fn new() -> Self {
        Self {
            soh: Self::SOH,
            version: Self::VERSION,
            id: Self::ID.to_le_bytes(),
            total_length: [0; 4],
            flags: [0; 4],
            transaction_id: [0; 4],
            broadcast_groups: [0; 4],
            checksum: [0; 4],
            data_offset: [0; 4],
            data_pad_offset: [0; 4],
            oob_offset: [0; 4],
        }
    }

    /// Borrow a header from the front of a buffer (zero-copy).
    ///
    /// Returns `None` when the buffer is shorter than [`Self::SIZE`] or the
    /// marker triple does not match. Offset and checksum validation is the
    /// caller's job.
    #[must_use]
    pub fn from_prefix(bytes: &[u8]) -> Option<&Self> {
        let header = Self::ref_from_prefix(bytes).ok()?.0;

        if header.soh != Self::SOH
            || header.version != Self::VERSION
            || u16::from_le_bytes(header.id) != Self::ID
        {
            return None;
        }

        Some(header)
    }

    /// Serialize the header to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(IntoBytes::as_bytes(self));
        arr
    }

    /// Total frame length declared by the sender.
    #[must_use]
    pub fn total_length(&self) -> u32 {
        u32::from_le_bytes(self.total_length)
    }

    /// Frame flags bitfield.
    #[must_use]
    pub fn flags(&self) -> PacketFlags {
        PacketFlags::from_word(u32::from_le_bytes(self.flags))
    }

    /// Host-correlated transaction id (meaningful when the flag is set).
    #[must_use]
    pub fn transaction_id(&self) -> u32 {
        u32::from_le_bytes(self.transaction_id)
    }

    /// Broadcast group mask.
    #[must_use]
    pub fn broadcast_groups(&self) -> u32 {
        u32::from_le_bytes(self.broadcast_groups)
    }

    /// Stored MD5-32 checksum.
    #[must_use]
    pub fn checksum(&self) -> u32 {
        u32::from_le_bytes(self.checksum)
    }

    /// Offset of the command text (always [`Self::SIZE`] in valid frames).
    #[must_use]
    pub fn data_offset(&self) -> u32 {
        u32::from_le_bytes(self.data_offset)
    }

    /// Offset of the zero padding after the command text.
    #[must_use]
    pub fn data_pad_offset(&self) -> u32 {
        u32::from_le_bytes(self.data_pad_offset)
    }

    /// Offset of the out-of-band payload.
    #[must_use]
    pub fn oob_offset(&self) -> u32 {
        u32::from_le_bytes(self.oob_offset)
    }

    /// Set the total frame length.
    pub fn set_total_length(&mut self, length: u32) {
        self.total_length = length.to_le_bytes();
    }

    /// Set the flags bitfield.
    pub fn set_flags(&mut self, flags: PacketFlags) {
        self.flags = flags.to_word().to_le_bytes();
    }

    /// Set the transaction id (remember to also set the flag).
    pub fn set_transaction_id(&mut self, tx_id: u32) {
        self.transaction_id = tx_id.to_le_bytes();
    }

    /// Set the broadcast group mask.
    pub fn set_broadcast_groups(&mut self, groups: u32) {
        self.broadcast_groups = groups.to_le_bytes();
    }

    /// Set the stored checksum.
    pub fn set_checksum(&mut self, checksum: u32) {
        self.checksum = checksum.to_le_bytes();
    }

    /// Set the command text offset.
    pub fn set_data_offset(&mut self, offset: u32) {
        self.data_offset = offset.to_le_bytes();
    }

    /// Set the padding offset.
    pub fn set_data_pad_offset(&mut self, offset: u32) {
        self.data_pad_offset = offset.to_le_bytes();
    }

    /// Set the OOB payload offset.
    pub fn set_oob_offset(&mut self, offset: u32) {
        self.oob_offset = offset.to_le_bytes();
    }
}

impl Default for PacketHeader {
    fn default() -> Self {
        Self::new()
    }
}

// Manual Debug implementation (can't derive due to packed repr)
impl std::fmt::Debug for PacketHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketHeader")
            .field("total_length", &self.total_length())
            .field("flags", &self.flags())
            .field("transaction_id", &self.transaction_id())
            .field("broadcast_groups", &self.broadcast_groups())
            .field("checksum", &format!("{:#010x}", self.checksum()))
            .field("data_offset", &self.data_offset())
            .field("data_pad_offset", &self.data_pad_offset())
            .field("oob_offset", &self.oob_offset())
            .finish()
    }
}

/// Decoded view of the header flags word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketFlags {
    /// Bit 0: the checksum field carries a valid MD5-32.
    pub checksum_present: bool,
    /// Bit 1: the sender wants the reply checksummed.
    pub checksum_requested: bool,
    /// Bit 2: the transaction id field is meaningful.
    pub tx_id_present: bool,
}

impl PacketFlags {
    /// Decode from the raw flags word. Unknown bits are ignored.
    #[must_use]
    pub fn from_word(word: u32) -> Self {
        Self {
            checksum_present: word & 0x01 != 0,
            checksum_requested: word & 0x02 != 0,
            tx_id_present: word & 0x04 != 0,
        }
    }

    /// Encode to the raw flags word.
    #[must_use]
    pub fn to_word(self) -> u32 {
        u32::from(self.checksum_present)
            | u32::from(self.checksum_requested) << 1
            | u32::from(self.tx_id_present) << 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_size() {
        assert_eq!(std::mem::size_of::<PacketHeader>(), PacketHeader::SIZE);
        assert_eq!(PacketHeader::SIZE, 36);
    }

    #[test]
    fn field_offsets() {
        let mut header = PacketHeader::new();
        header.set_total_length(0x0403_0201);
        header.set_flags(PacketFlags { checksum_present: true, ..Default::default() });
        header.set_transaction_id(0xdead_beef);
        header.set_checksum(0x1122_3344);
        header.set_data_offset(36);
        header.set_data_pad_offset(40);
        header.set_oob_offset(44);

        let bytes = header.to_bytes();
        assert_eq!(bytes[0], PacketHeader::SOH);
        assert_eq!(bytes[1], PacketHeader::VERSION);
        assert_eq!(u16::from_le_bytes([bytes[2], bytes[3]]), PacketHeader::ID);
        assert_eq!(&bytes[4..8], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[8..12], &[0x01, 0x00, 0x00, 0x00]);
        assert_eq!(&bytes[12..16], &0xdead_beef_u32.to_le_bytes());
        assert_eq!(&bytes[20..24], &0x1122_3344_u32.to_le_bytes());
        assert_eq!(&bytes[24..28], &36u32.to_le_bytes());
    }

    #[test]
    fn round_trip() {
        let mut header = PacketHeader::new();
        header.set_total_length(100);
        header.set_flags(PacketFlags {
            checksum_present: false,
            checksum_requested: true,
            tx_id_present: true,
        });
        header.set_transaction_id(7);
        header.set_broadcast_groups(3);

        let bytes = header.to_bytes();
        let parsed = PacketHeader::from_prefix(&bytes).expect("marker should match");

        assert_eq!(parsed.total_length(), 100);
        assert!(parsed.flags().checksum_requested);
        assert!(parsed.flags().tx_id_present);
        assert!(!parsed.flags().checksum_present);
        assert_eq!(parsed.transaction_id(), 7);
        assert_eq!(parsed.broadcast_groups(), 3);
    }

    #[test]
    fn reject_short_buffer() {
        assert!(PacketHeader::from_prefix(&[PacketHeader::SOH; 20]).is_none());
    }

    #[test]
    fn reject_wrong_marker() {
        let mut bytes = PacketHeader::new().to_bytes();
        bytes[1] = 0xff;
        assert!(PacketHeader::from_prefix(&bytes).is_none());
    }

    #[test]
    fn flags_word_round_trip() {
        for word in 0..8u32 {
            assert_eq!(PacketFlags::from_word(word).to_word(), word);
        }
    }
}
