//! Property-based tests for frame encapsulation/decapsulation.
//!
//! These verify the wire codec for ALL inputs in the supported envelope, not
//! just specific examples: round-trip identity in both wire forms, and the
//! checksum gate sitting exactly at the checksum flag.

use busbar_proto::{PacketHeader, decapsulate, encapsulate, looks_like_packet};
use proptest::prelude::*;

/// Command lines: printable, no NUL/newline (those terminate the raw form).
fn arbitrary_command() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(0x20u8..0x7f, 0..512)
}

fn arbitrary_oob() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..2048)
}

proptest! {
    #[test]
    fn packetised_round_trip(
        command in arbitrary_command(),
        oob in arbitrary_oob(),
        tx_id in prop::option::of(any::<u32>()),
        checksum in any::<bool>(),
    ) {
        let wire = encapsulate(&command, &oob, true, tx_id, checksum);
        let parsed = decapsulate(&wire).expect("own frames decode");

        prop_assert!(parsed.packetised);
        prop_assert_eq!(parsed.command.as_ref(), &command[..]);
        prop_assert_eq!(parsed.oob.as_ref(), &oob[..]);
        prop_assert_eq!(parsed.tx_id, tx_id);
        prop_assert_eq!(parsed.checksum_requested, checksum);
    }

    #[test]
    fn raw_round_trip(command in arbitrary_command(), oob in arbitrary_oob()) {
        let wire = encapsulate(&command, &oob, false, None, false);
        let parsed = decapsulate(&wire).expect("raw never fails");

        prop_assert!(!parsed.packetised);
        prop_assert_eq!(parsed.command.as_ref(), &command[..]);
        prop_assert_eq!(parsed.oob.as_ref(), &oob[..]);
        prop_assert_eq!(parsed.tx_id, None);
    }

    /// Flipping any single bit past the marker triple must trip the gate.
    #[test]
    fn checksum_gate_catches_single_bit_flips(
        command in arbitrary_command(),
        oob in prop::collection::vec(any::<u8>(), 1..256),
        bit in 0usize..8,
        offset_seed in any::<prop::sample::Index>(),
    ) {
        let wire = encapsulate(&command, &oob, true, Some(42), true);

        // Keep the marker triple intact so the buffer still classifies as a
        // packet, and skip the flags byte (clearing checksum_present turns
        // the gate off); the gate under test is the checksum itself.
        let mut offset = 4 + offset_seed.index(wire.len() - 5);
        if offset >= 8 {
            offset += 1;
        }

        let mut corrupted = wire.to_vec();
        corrupted[offset] ^= 1 << bit;

        prop_assert!(decapsulate(&corrupted).is_err());
    }

    /// Without the checksum the same flip sails through (payload region).
    #[test]
    fn no_checksum_no_gate(
        command in arbitrary_command(),
        oob in prop::collection::vec(any::<u8>(), 1..256),
        bit in 0usize..8,
        offset_seed in any::<prop::sample::Index>(),
    ) {
        let wire = encapsulate(&command, &oob, true, Some(42), false);

        // Flip inside the OOB region only; header flips change the framing.
        let oob_start = wire.len() - oob.len();
        let offset = oob_start + offset_seed.index(oob.len());

        let mut corrupted = wire.to_vec();
        corrupted[offset] ^= 1 << bit;

        let parsed = decapsulate(&corrupted).expect("no gate without checksum");
        prop_assert_eq!(parsed.command.as_ref(), &command[..]);
        prop_assert_ne!(parsed.oob.as_ref(), &oob[..]);
    }
}

#[test]
fn header_prefix_classification() {
    let wire = encapsulate(b"help", &[], true, None, false);
    assert!(looks_like_packet(&wire));
    assert!(!looks_like_packet(&wire[..PacketHeader::SIZE - 1]));
    assert!(!looks_like_packet(b"help\n"));
}
