//! Fuzz target for frame decapsulation
//!
//! # Strategy
//!
//! - Completely arbitrary bytes (general malformation)
//! - Valid frames with corrupted header fields (offset confusion)
//!
//! # Invariants
//!
//! - Decapsulation NEVER panics, whatever the buffer contains
//! - A frame the codec produced itself always decodes back
//! - Rejections are typed errors, not aborts

#![no_main]

use arbitrary::Arbitrary;
use busbar_proto::{decapsulate, declared_length, encapsulate, looks_like_packet};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
enum FrameAttack {
    RandomBytes { bytes: Vec<u8> },
    CorruptedValid { command: Vec<u8>, oob: Vec<u8>, tx_id: Option<u32>, checksum: bool, offset: usize, flip: u8 },
}

fuzz_target!(|attack: FrameAttack| {
    match attack {
        FrameAttack::RandomBytes { bytes } => {
            let _ = looks_like_packet(&bytes);
            let _ = declared_length(&bytes);
            let _ = decapsulate(&bytes);
        }

        FrameAttack::CorruptedValid { command, oob, tx_id, checksum, offset, flip } => {
            let command: Vec<u8> = command.into_iter().take(1024).collect();
            let oob: Vec<u8> = oob.into_iter().take(4096).collect();

            let wire = encapsulate(&command, &oob, true, tx_id, checksum);
            let mut corrupted = wire.to_vec();

            if !corrupted.is_empty() {
                let at = offset % corrupted.len();
                corrupted[at] ^= flip | 1;
            }

            let _ = decapsulate(&corrupted);

            // The untouched frame must still round-trip.
            let clean = decapsulate(&wire).expect("own frame decodes");
            assert!(clean.packetised);
        }
    }
});
