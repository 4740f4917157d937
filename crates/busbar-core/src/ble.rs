//! BLE session logic.
//!
//! The radio stack is an external collaborator; what lives here is the
//! session state machine around one GATT service with two characteristics:
//!
//! - the **key characteristic** (write-only) carries the authorization
//!   handshake: 16 bytes of AES-256-CBC ciphertext which must decrypt to the
//!   device MAC XOR-masked into 12 bytes plus four `0x04` pad bytes;
//! - the **data characteristic** (write/notify) carries command frames.
//!   Writes before authorization are counted and discarded; after it they
//!   feed the reassembler.
//!
//! The fixed key/IV make this an authorization gate, not confidentiality;
//! replies still fragment into link-sized chunks with bounded retry when
//! the stack runs out of buffers.

use std::time::{Duration, Instant};

use aes::cipher::{BlockDecryptMut, KeyIvInit, block_padding::NoPadding};
use bytes::Bytes;

use busbar_proto::{Reassembler, ReassemblyConfig, ReassemblyOutcome};

use crate::stats::LinkStats;

/// Largest outbound fragment: 512 payload + 32 header + 8 HCI margin.
pub const BLE_MAX_CHUNK: usize = 552;

/// Indication retries while the stack reports out-of-memory.
pub const INDICATE_ATTEMPTS: u32 = 16;

/// Delay between indication retries.
pub const INDICATE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Authorization handshake length: 12 masked MAC bytes + 4 pad bytes.
pub const KEY_CIPHERTEXT_LEN: usize = 16;

// Fixed session key/IV shared with the host tooling.
const SESSION_KEY: [u8; 32] = [
    0x3a, 0x91, 0x5c, 0x07, 0xd2, 0x6e, 0xb8, 0x44, 0x1f, 0xa3, 0x70, 0xcd, 0x29, 0x86, 0xe5,
    0x52, 0x0b, 0x9d, 0x63, 0xf8, 0x17, 0xc4, 0x2e, 0xba, 0x85, 0x31, 0x6a, 0xd9, 0x4c, 0xf0,
    0x7b, 0x98,
];
const SESSION_IV: [u8; 16] = [
    0x6f, 0x1a, 0xc8, 0x35, 0x92, 0xe7, 0x50, 0xbd, 0x04, 0xd3, 0x7e, 0x29, 0xab, 0x66, 0x10,
    0xfc,
];

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Failure modes of one outbound indication, as reported by the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicateError {
    /// Transient buffer exhaustion; retry after a short delay.
    NoMemory,
    /// Anything else; the reply is abandoned.
    Failed,
}

/// The link surface the session fragments replies into. The real build
/// wraps the GATT server's indicate call.
pub trait GattLink {
    /// Indicate one chunk on a connection/attribute pair.
    fn indicate(&mut self, connection: u16, attribute: u16, chunk: &[u8])
    -> Result<(), IndicateError>;
}

/// Per-connection session state.
#[derive(Debug)]
pub struct BleSession {
    mac: [u8; 6],
    authorised: bool,
    reassembler: Reassembler,
    stats: LinkStats,
}

impl BleSession {
    /// Session for a device with the given MAC.
    #[must_use]
    pub fn new(mac: [u8; 6], stats: LinkStats) -> Self {
        Self { mac, authorised: false, reassembler: Reassembler::new(ReassemblyConfig::ble()), stats }
    }

    /// A central connected: every connection starts unauthorised.
    pub fn on_connect(&mut self) {
        self.authorised = false;
        self.reassembler.reset();
    }

    /// The central disconnected.
    pub fn on_disconnect(&mut self) {
        self.authorised = false;
        self.reassembler.reset();
    }

    /// Whether the key handshake has succeeded on this connection.
    #[must_use]
    pub fn authorised(&self) -> bool {
        self.authorised
    }

    /// The 12-byte key the handshake must present: MAC XOR 0x55 forward,
    /// then MAC XOR 0xaa reversed.
    #[must_use]
    pub fn expected_key(&self) -> [u8; 12] {
        let mac = self.mac;
        [
            mac[0] ^ 0x55,
            mac[1] ^ 0x55,
            mac[2] ^ 0x55,
            mac[3] ^ 0x55,
            mac[4] ^ 0x55,
            mac[5] ^ 0x55,
            mac[5] ^ 0xaa,
            mac[4] ^ 0xaa,
            mac[3] ^ 0xaa,
            mac[2] ^ 0xaa,
            mac[1] ^ 0xaa,
            mac[0] ^ 0xaa,
        ]
    }

    /// Handle a write on the key characteristic. Returns the new
    /// authorization state.
    pub fn key_write(&mut self, ciphertext: &[u8]) -> bool {
        self.authorised = false;

        if ciphertext.len() != KEY_CIPHERTEXT_LEN {
            return false;
        }

        let mut block = [0u8; KEY_CIPHERTEXT_LEN];
        block.copy_from_slice(ciphertext);

        let decryptor = Aes256CbcDec::new(&SESSION_KEY.into(), &SESSION_IV.into());
        let Ok(plain) = decryptor.decrypt_padded_mut::<NoPadding>(&mut block) else {
            return false;
        };

        if plain.len() != KEY_CIPHERTEXT_LEN || plain[12..16] != [0x04; 4] {
            return false;
        }

        if plain[..12] != self.expected_key() {
            return false;
        }

        self.authorised = true;
        true
    }

    /// Handle a write on the data characteristic. Returns a whole frame
    /// once reassembly completes.
    pub fn data_write(&mut self, chunk: &[u8], now: Instant) -> Option<Bytes> {
        if !self.authorised {
            self.stats.update(|c| c.unauthorised += 1);
            return None;
        }

        self.stats.update(|c| {
            c.received_bytes += chunk.len() as u32;
            c.received_fragments += 1;
        });

        match self.reassembler.feed(chunk, now) {
            ReassemblyOutcome::Delivered(frame) => {
                self.stats.update(|c| c.received_packets += 1);
                Some(frame)
            },
            ReassemblyOutcome::Pending => None,
            ReassemblyOutcome::Dropped(_) => {
                self.stats.update(|c| c.timeouts += 1);
                None
            },
        }
    }

    /// Fragment a reply and indicate it chunk by chunk, retrying on buffer
    /// exhaustion with a bounded backoff.
    pub async fn send_reply(
        &mut self,
        link: &mut impl GattLink,
        connection: u16,
        attribute: u16,
        frame: &[u8],
    ) {
        for chunk in frame.chunks(BLE_MAX_CHUNK) {
            let mut sent = false;

            for _ in 0..INDICATE_ATTEMPTS {
                match link.indicate(connection, attribute, chunk) {
                    Ok(()) => {
                        sent = true;
                        break;
                    },
                    Err(IndicateError::NoMemory) => {
                        tokio::time::sleep(INDICATE_RETRY_DELAY).await;
                    },
                    Err(IndicateError::Failed) => {
                        self.stats.update(|c| c.errors += 1);
                        return;
                    },
                }
            }

            if !sent {
                self.stats.update(|c| c.errors += 1);
                return;
            }

            self.stats.update(|c| {
                c.sent_bytes += chunk.len() as u32;
                c.sent_fragments += 1;
            });
        }

        self.stats.update(|c| c.sent_packets += 1);
    }
}

/// Encrypt the handshake for a MAC with the session key; host-side helper
/// used by tests and tooling.
#[must_use]
pub fn encrypt_key_handshake(mac: [u8; 6]) -> [u8; KEY_CIPHERTEXT_LEN] {
    use aes::cipher::BlockEncryptMut;

    type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

    let mut block = [0u8; KEY_CIPHERTEXT_LEN];
    let session = BleSession::new(mac, LinkStats::new());
    block[..12].copy_from_slice(&session.expected_key());
    block[12..].copy_from_slice(&[0x04; 4]);

    let encryptor = Aes256CbcEnc::new(&SESSION_KEY.into(), &SESSION_IV.into());
    let mut out = [0u8; KEY_CIPHERTEXT_LEN];
    if encryptor.encrypt_padded_b2b_mut::<NoPadding>(&block, &mut out).is_err() {
        return [0; KEY_CIPHERTEXT_LEN];
    }
    out
}
