//! OTA firmware update engine.
//!
//! The single most safety-critical subsystem: a staged image only becomes the
//! boot image after its checksum is confirmed byte-for-byte, and a booted
//! image only stays the boot image after the running firmware confirms
//! itself. The commit/confirm split is what gives the bootloader its
//! rollback window.
//!
//! State machine: `Idle -> Staging -> Staged -> Committed`, then a reset and
//! `confirm` from the new image. Any error during staging frees the
//! partition and hash resources immediately; a new `start` aborts whatever
//! session was in flight.

use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};
use thiserror::Error;

/// One of the two mutually exclusive application slots.
pub type SlotId = u8;

/// Partition descriptor reported by `info-partitions` and the OTA replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    /// Slot index (0 or 1).
    pub slot: SlotId,
    /// Partition label, e.g. `ota_0`.
    pub label: String,
    /// Capacity in bytes.
    pub size: usize,
    /// Bytes of staged image content.
    pub used: usize,
    /// This slot is what the bootloader will load next.
    pub boot: bool,
    /// This slot is currently executing.
    pub running: bool,
    /// Committed but not yet confirmed; rolls back on the next reset.
    pub pending_verify: bool,
}

/// Errors surfaced on the wire as `ERROR: <text>`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OtaError {
    /// No slot is available for an update.
    #[error("no valid OTA partition")]
    NoPartition,

    /// Image larger than the target slot.
    #[error("ota partition too small for image: {length} vs. {size}")]
    TooLarge {
        /// Announced image length.
        length: usize,
        /// Slot capacity.
        size: usize,
    },

    /// `write`/`finish` outside a staging session.
    #[error("ota write context not active")]
    NotActive,

    /// Declared chunk length differs from the delivered OOB payload.
    #[error("lengths do not match ({declared} vs. {delivered})")]
    LengthMismatch {
        /// Length parameter of `ota-write`.
        declared: usize,
        /// Bytes in the OOB payload.
        delivered: usize,
    },

    /// Checksum-flagged chunks must be exactly one digest long.
    #[error("invalid checksum chunk length ({length} vs. 32)")]
    BadChecksumChunk {
        /// Delivered chunk length.
        length: usize,
    },

    /// `commit` without a staged image.
    #[error("commit: no active OTA partition")]
    NothingStaged,

    /// The host's digest does not match the staged image.
    #[error("checksum mismatch: {theirs} vs. {ours}")]
    ChecksumMismatch {
        /// Digest supplied by the host.
        theirs: String,
        /// Digest of the staged image.
        ours: String,
    },

    /// `confirm` from the wrong running slot.
    #[error(
        "address of running slot ({running}) not equal to updated slot ({expected}), boot failed"
    )]
    WrongRunningSlot {
        /// Slot currently executing.
        running: SlotId,
        /// Slot named in the confirm.
        expected: SlotId,
    },

    /// Boot slot drifted between commit and confirm.
    #[error(
        "address of boot slot ({boot}) not equal to updated slot ({expected}), confirm failed"
    )]
    WrongBootSlot {
        /// Slot the bootloader would load.
        boot: SlotId,
        /// Slot named in the confirm.
        expected: SlotId,
    },

    /// The flash driver rejected an operation.
    #[error("ota {phase} failed: {reason}")]
    Flash {
        /// Which engine phase was running.
        phase: &'static str,
        /// Driver-supplied reason.
        reason: String,
    },

    /// Cryptographic image verification failed after commit.
    #[error("image verify failed: {0}")]
    VerifyFailed(String),
}

/// The flash/bootloader surface the engine drives. The real device backs
/// this with the partition driver; the host build and tests use
/// [`SharedFlash`] over [`MemFlash`].
pub trait FlashBank: Send {
    /// Slot the next update should target (the one not running).
    fn next_update_slot(&self) -> Option<SlotId>;

    /// Descriptor for one slot.
    fn slot_info(&self, slot: SlotId) -> SlotInfo;

    /// Descriptors for every slot, for `info-partitions`.
    fn partitions(&self) -> Vec<SlotInfo>;

    /// Erase the slot and open it for sequential writes.
    fn begin(&mut self, slot: SlotId, length: usize) -> Result<(), String>;

    /// Append image bytes.
    fn write(&mut self, slot: SlotId, data: &[u8]) -> Result<(), String>;

    /// Close the write session.
    fn end(&mut self, slot: SlotId) -> Result<(), String>;

    /// Drop an unfinished write session.
    fn abort(&mut self, slot: SlotId);

    /// Mark the slot as the boot target, entering the rollback window.
    fn set_boot_slot(&mut self, slot: SlotId) -> Result<(), String>;

    /// Cryptographic verification of the staged image (delegated to the
    /// loader's image format checks).
    fn verify_image(&self, slot: SlotId) -> Result<(), String>;

    /// Slot the bootloader will load next.
    fn boot_slot(&self) -> SlotId;

    /// Slot currently executing.
    fn running_slot(&self) -> SlotId;

    /// Mark the running image valid, cancelling the rollback window.
    fn mark_valid(&mut self) -> Result<(), String>;
}

/// Session state; resources are owned by the active variant.
enum OtaState {
    Idle,
    Staging { slot: SlotId, expected: usize, written: usize, hasher: Box<Sha256> },
    Staged { slot: SlotId, digest: String },
    Committed { slot: SlotId },
}

impl std::fmt::Debug for OtaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Staging { .. } => "Staging",
            Self::Staged { .. } => "Staged",
            Self::Committed { .. } => "Committed",
        };
        f.write_str(name)
    }
}

/// The update engine; single-holder, enforced by the intake worker.
pub struct OtaEngine {
    flash: Box<dyn FlashBank>,
    state: OtaState,
}

impl OtaEngine {
    /// Wrap a flash driver.
    #[must_use]
    pub fn new(flash: Box<dyn FlashBank>) -> Self {
        Self { flash, state: OtaState::Idle }
    }

    /// Access the flash surface (for `info-partitions`).
    #[must_use]
    pub fn flash(&self) -> &dyn FlashBank {
        self.flash.as_ref()
    }

    /// Human-readable state for `info`.
    #[must_use]
    pub fn state_name(&self) -> &'static str {
        match self.state {
            OtaState::Idle => "idle",
            OtaState::Staging { .. } => "staging",
            OtaState::Staged { .. } => "staged",
            OtaState::Committed { .. } => "committed",
        }
    }

    /// Bytes accepted so far, against the announced image length.
    #[must_use]
    pub fn progress(&self) -> Option<(usize, usize)> {
        match self.state {
            OtaState::Staging { written, expected, .. } => Some((written, expected)),
            _ => None,
        }
    }

    fn drop_session(&mut self) {
        if let OtaState::Staging { slot, .. } = self.state {
            self.flash.abort(slot);
        }
        self.state = OtaState::Idle;
    }

    /// `ota-start <length>`: open the next update slot and begin hashing.
    pub fn start(&mut self, length: usize) -> Result<String, OtaError> {
        let slot = self.flash.next_update_slot().ok_or(OtaError::NoPartition)?;
        let info = self.flash.slot_info(slot);

        if length > info.size {
            return Err(OtaError::TooLarge { length, size: info.size });
        }

        if !matches!(self.state, OtaState::Idle) {
            self.drop_session();
        }

        self.flash
            .begin(slot, length)
            .map_err(|reason| OtaError::Flash { phase: "start", reason })?;

        self.state = OtaState::Staging {
            slot,
            expected: length,
            written: 0,
            hasher: Box::new(Sha256::new()),
        };

        Ok(format!("OK start write ota partition {} {}", info.label, slot))
    }

    /// `ota-write <length> <checksum-flag>` with the chunk in the OOB
    /// payload. Checksum-flagged chunks guard the transfer and stay out of
    /// the image digest.
    pub fn write(
        &mut self,
        declared: usize,
        checksum_chunk: bool,
        data: &[u8],
    ) -> Result<String, OtaError> {
        // Only a staging session accepts writes; a staged or committed
        // image is left intact so the host can still commit/confirm it.
        let slot = match &self.state {
            OtaState::Staging { slot, .. } => *slot,
            _ => return Err(OtaError::NotActive),
        };

        if data.len() != declared {
            self.drop_session();
            return Err(OtaError::LengthMismatch { declared, delivered: data.len() });
        }

        if checksum_chunk && declared != 32 {
            self.drop_session();
            return Err(OtaError::BadChecksumChunk { length: declared });
        }

        if let Err(reason) = self.flash.write(slot, data) {
            self.drop_session();
            return Err(OtaError::Flash { phase: "write", reason });
        }

        if let OtaState::Staging { written, hasher, .. } = &mut self.state {
            if !checksum_chunk {
                hasher.update(data);
            }
            *written += data.len();
        }

        Ok("OK write ota".to_string())
    }

    /// `ota-finish`: close the slot and report the image digest.
    pub fn finish(&mut self) -> Result<String, OtaError> {
        if !matches!(self.state, OtaState::Staging { .. }) {
            return Err(OtaError::NotActive);
        }

        let OtaState::Staging { slot, hasher, .. } =
            std::mem::replace(&mut self.state, OtaState::Idle)
        else {
            return Err(OtaError::NotActive);
        };

        let digest = hex::encode(hasher.finalize());

        if let Err(reason) = self.flash.end(slot) {
            self.flash.abort(slot);
            return Err(OtaError::Flash { phase: "finish", reason });
        }

        self.state = OtaState::Staged { slot, digest: digest.clone() };

        Ok(format!("OK finish ota, checksum: {digest}"))
    }

    /// `ota-commit <checksum>`: verify the digest byte-for-byte, mark the
    /// slot bootable, run the loader's image verification.
    ///
    /// A mismatch leaves the old partition as the boot partition and the
    /// session staged, so the host can retry with the right digest.
    pub fn commit(&mut self, checksum: &str) -> Result<String, OtaError> {
        let (slot, digest) = match &self.state {
            OtaState::Staged { slot, digest } => (*slot, digest.clone()),
            _ => return Err(OtaError::NothingStaged),
        };

        if checksum != digest {
            return Err(OtaError::ChecksumMismatch { theirs: checksum.to_string(), ours: digest });
        }

        self.flash
            .set_boot_slot(slot)
            .map_err(|reason| OtaError::Flash { phase: "commit", reason })?;

        self.flash.verify_image(slot).map_err(OtaError::VerifyFailed)?;

        self.state = OtaState::Committed { slot };

        Ok("OK commit ota".to_string())
    }

    /// `ota-confirm <slot>`: called from the newly booted image; marks it
    /// valid so the bootloader cancels the rollback.
    pub fn confirm(&mut self, slot: SlotId) -> Result<String, OtaError> {
        let running = self.flash.running_slot();
        if running != slot {
            return Err(OtaError::WrongRunningSlot { running, expected: slot });
        }

        self.flash.mark_valid().map_err(|reason| OtaError::Flash { phase: "confirm", reason })?;

        let boot = self.flash.boot_slot();
        if boot != slot {
            return Err(OtaError::WrongBootSlot { boot, expected: slot });
        }

        self.state = OtaState::Idle;

        Ok("OK confirm ota".to_string())
    }
}

impl std::fmt::Debug for OtaEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtaEngine").field("state", &self.state).finish_non_exhaustive()
    }
}

/// In-memory two-slot flash with a simulated bootloader rollback window.
#[derive(Debug)]
pub struct MemFlash {
    slots: [MemSlot; 2],
    boot: SlotId,
    running: SlotId,
    previous_boot: SlotId,
    pending_verify: bool,
}

#[derive(Debug)]
struct MemSlot {
    label: String,
    size: usize,
    data: Vec<u8>,
    open: bool,
}

impl MemFlash {
    /// Two slots of the given capacity; slot 0 boots and runs.
    #[must_use]
    pub fn new(slot_size: usize) -> Self {
        Self {
            slots: [
                MemSlot {
                    label: "ota_0".to_string(),
                    size: slot_size,
                    data: Vec::new(),
                    open: false,
                },
                MemSlot {
                    label: "ota_1".to_string(),
                    size: slot_size,
                    data: Vec::new(),
                    open: false,
                },
            ],
            boot: 0,
            running: 0,
            previous_boot: 0,
            pending_verify: false,
        }
    }

    /// Simulate a reset: the bootloader loads the boot slot, or rolls back
    /// when a pending-verify image already ran without being confirmed.
    pub fn reboot(&mut self) {
        if self.pending_verify && self.running == self.boot {
            // The unconfirmed image already had its chance.
            self.boot = self.previous_boot;
            self.pending_verify = false;
        }
        self.running = self.boot;
    }
}

impl FlashBank for MemFlash {
    fn next_update_slot(&self) -> Option<SlotId> {
        Some(if self.running == 0 { 1 } else { 0 })
    }

    fn slot_info(&self, slot: SlotId) -> SlotInfo {
        let entry = &self.slots[slot as usize];
        SlotInfo {
            slot,
            label: entry.label.clone(),
            size: entry.size,
            used: entry.data.len(),
            boot: self.boot == slot,
            running: self.running == slot,
            pending_verify: self.pending_verify && self.boot == slot,
        }
    }

    fn partitions(&self) -> Vec<SlotInfo> {
        (0..self.slots.len() as u8).map(|slot| self.slot_info(slot)).collect()
    }

    fn begin(&mut self, slot: SlotId, length: usize) -> Result<(), String> {
        let entry = &mut self.slots[slot as usize];
        if length > entry.size {
            return Err(format!("image length {length} exceeds slot size {}", entry.size));
        }
        entry.data.clear();
        entry.open = true;
        Ok(())
    }

    fn write(&mut self, slot: SlotId, data: &[u8]) -> Result<(), String> {
        let entry = &mut self.slots[slot as usize];
        if !entry.open {
            return Err("slot not open".to_string());
        }
        if entry.data.len() + data.len() > entry.size {
            return Err("write beyond slot size".to_string());
        }
        entry.data.extend_from_slice(data);
        Ok(())
    }

    fn end(&mut self, slot: SlotId) -> Result<(), String> {
        let entry = &mut self.slots[slot as usize];
        if !entry.open {
            return Err("slot not open".to_string());
        }
        entry.open = false;
        Ok(())
    }

    fn abort(&mut self, slot: SlotId) {
        let entry = &mut self.slots[slot as usize];
        entry.open = false;
        entry.data.clear();
    }

    fn set_boot_slot(&mut self, slot: SlotId) -> Result<(), String> {
        self.previous_boot = self.boot;
        self.boot = slot;
        self.pending_verify = true;
        Ok(())
    }

    fn verify_image(&self, slot: SlotId) -> Result<(), String> {
        if self.slots[slot as usize].data.is_empty() {
            return Err("empty image".to_string());
        }
        Ok(())
    }

    fn boot_slot(&self) -> SlotId {
        self.boot
    }

    fn running_slot(&self) -> SlotId {
        self.running
    }

    fn mark_valid(&mut self) -> Result<(), String> {
        self.pending_verify = false;
        Ok(())
    }
}

/// Cloneable [`FlashBank`] over a shared [`MemFlash`].
///
/// The engine drives one clone; the runtime keeps another to simulate resets
/// and to read partition state.
#[derive(Debug, Clone)]
pub struct SharedFlash {
    inner: Arc<Mutex<MemFlash>>,
}

impl SharedFlash {
    /// Shared flash with two slots of the given capacity.
    #[must_use]
    pub fn new(slot_size: usize) -> Self {
        Self { inner: Arc::new(Mutex::new(MemFlash::new(slot_size))) }
    }

    /// Simulate a device reset.
    pub fn reboot(&self) {
        if let Ok(mut flash) = self.inner.lock() {
            flash.reboot();
        }
    }

    /// Copy of one slot's staged bytes.
    #[must_use]
    pub fn slot_data(&self, slot: SlotId) -> Vec<u8> {
        self.inner.lock().map_or_else(|_| Vec::new(), |flash| flash.slots[slot as usize].data.clone())
    }

    fn with<R>(&self, fallback: R, f: impl FnOnce(&mut MemFlash) -> R) -> R {
        self.inner.lock().map_or(fallback, |mut flash| f(&mut flash))
    }
}

impl FlashBank for SharedFlash {
    fn next_update_slot(&self) -> Option<SlotId> {
        self.with(None, |flash| flash.next_update_slot())
    }

    fn slot_info(&self, slot: SlotId) -> SlotInfo {
        self.with(
            SlotInfo {
                slot,
                label: String::new(),
                size: 0,
                used: 0,
                boot: false,
                running: false,
                pending_verify: false,
            },
            |flash| flash.slot_info(slot),
        )
    }

    fn partitions(&self) -> Vec<SlotInfo> {
        self.with(Vec::new(), |flash| flash.partitions())
    }

    fn begin(&mut self, slot: SlotId, length: usize) -> Result<(), String> {
        self.with(Err("flash lock poisoned".to_string()), |flash| flash.begin(slot, length))
    }

    fn write(&mut self, slot: SlotId, data: &[u8]) -> Result<(), String> {
        self.with(Err("flash lock poisoned".to_string()), |flash| flash.write(slot, data))
    }

    fn end(&mut self, slot: SlotId) -> Result<(), String> {
        self.with(Err("flash lock poisoned".to_string()), |flash| flash.end(slot))
    }

    fn abort(&mut self, slot: SlotId) {
        self.with((), |flash| flash.abort(slot));
    }

    fn set_boot_slot(&mut self, slot: SlotId) -> Result<(), String> {
        self.with(Err("flash lock poisoned".to_string()), |flash| flash.set_boot_slot(slot))
    }

    fn verify_image(&self, slot: SlotId) -> Result<(), String> {
        self.with(Err("flash lock poisoned".to_string()), |flash| flash.verify_image(slot))
    }

    fn boot_slot(&self) -> SlotId {
        self.with(0, |flash| flash.boot_slot())
    }

    fn running_slot(&self) -> SlotId {
        self.with(0, |flash| flash.running_slot())
    }

    fn mark_valid(&mut self) -> Result<(), String> {
        self.with(Err("flash lock poisoned".to_string()), MemFlash::mark_valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> (OtaEngine, SharedFlash) {
        let flash = SharedFlash::new(1 << 20);
        (OtaEngine::new(Box::new(flash.clone())), flash)
    }

    fn image_digest(image: &[u8]) -> String {
        hex::encode(Sha256::digest(image))
    }

    #[test]
    fn happy_path_start_to_confirm() {
        let (mut ota, flash) = engine();
        let image = vec![0x5a; 1024];

        let reply = ota.start(image.len()).expect("start");
        assert_eq!(reply, "OK start write ota partition ota_1 1");

        assert_eq!(ota.write(1024, false, &image).expect("write"), "OK write ota");

        let digest = image_digest(&image);
        let reply = ota.finish().expect("finish");
        assert_eq!(reply, format!("OK finish ota, checksum: {digest}"));

        assert_eq!(ota.commit(&digest).expect("commit"), "OK commit ota");
        assert_eq!(flash.slot_data(1), image);

        // Reset into the new image, then confirm from it.
        flash.reboot();
        assert_eq!(ota.confirm(1).expect("confirm"), "OK confirm ota");

        // Confirmed image survives further resets.
        flash.reboot();
        assert_eq!(flash.running_slot(), 1);
    }

    #[test]
    fn write_without_start_fails() {
        let (mut ota, _) = engine();
        assert_eq!(ota.write(4, false, b"abcd"), Err(OtaError::NotActive));
    }

    #[test]
    fn finish_without_start_fails() {
        let (mut ota, _) = engine();
        assert_eq!(ota.finish(), Err(OtaError::NotActive));
    }

    #[test]
    fn length_mismatch_aborts_session() {
        let (mut ota, _) = engine();
        ota.start(1024).expect("start");

        assert_eq!(
            ota.write(100, false, b"short"),
            Err(OtaError::LengthMismatch { declared: 100, delivered: 5 })
        );

        // Session is gone.
        assert_eq!(ota.finish(), Err(OtaError::NotActive));
    }

    #[test]
    fn checksum_chunk_must_be_32_bytes() {
        let (mut ota, _) = engine();
        ota.start(1024).expect("start");
        assert_eq!(ota.write(16, true, &[0u8; 16]), Err(OtaError::BadChecksumChunk { length: 16 }));
    }

    #[test]
    fn checksum_chunks_stay_out_of_digest() {
        let (mut ota, _) = engine();
        let image = vec![1u8; 512];

        ota.start(2048).expect("start");
        ota.write(512, false, &image).expect("image chunk");
        ota.write(32, true, &[0xEE; 32]).expect("guard chunk");

        let reply = ota.finish().expect("finish");
        assert_eq!(reply, format!("OK finish ota, checksum: {}", image_digest(&image)));
    }

    #[test]
    fn commit_with_wrong_checksum_keeps_old_boot_slot() {
        let (mut ota, flash) = engine();
        let image = vec![7u8; 256];

        ota.start(256).expect("start");
        ota.write(256, false, &image).expect("write");
        ota.finish().expect("finish");

        let mut wrong = image_digest(&image);
        // Alter one nibble.
        let flipped = if wrong.starts_with('0') { "1" } else { "0" };
        wrong.replace_range(0..1, flipped);

        let err = ota.commit(&wrong).expect_err("mismatch");
        assert!(matches!(err, OtaError::ChecksumMismatch { .. }));
        assert_eq!(flash.boot_slot(), 0);

        // The staged session survives a failed commit.
        assert_eq!(ota.commit(&image_digest(&image)).expect("retry"), "OK commit ota");
        assert_eq!(flash.boot_slot(), 1);
    }

    #[test]
    fn commit_digest_comparison_is_case_sensitive() {
        let (mut ota, flash) = engine();
        let image = vec![0x42u8; 128];

        ota.start(128).expect("start");
        ota.write(128, false, &image).expect("write");
        ota.finish().expect("finish");

        let digest = image_digest(&image);
        let upper = digest.to_uppercase();
        assert_ne!(upper, digest);

        let err = ota.commit(&upper).expect_err("case mismatch must reject");
        assert!(matches!(err, OtaError::ChecksumMismatch { .. }));
        assert_eq!(flash.boot_slot(), 0);

        assert_eq!(ota.commit(&digest).expect("exact digest"), "OK commit ota");
    }

    #[test]
    fn start_aborts_previous_session() {
        let (mut ota, _) = engine();
        ota.start(1024).expect("start");
        ota.write(8, false, &[0u8; 8]).expect("write");

        // A new start drops the half-written session.
        ota.start(2048).expect("restart");
        let reply = ota.finish().expect("finish");
        assert_eq!(reply, format!("OK finish ota, checksum: {}", image_digest(&[])));
    }

    #[test]
    fn confirm_from_wrong_slot_fails() {
        let (mut ota, _) = engine();
        assert_eq!(ota.confirm(1), Err(OtaError::WrongRunningSlot { running: 0, expected: 1 }));
    }

    #[test]
    fn oversized_image_rejected() {
        let flash = SharedFlash::new(128);
        let mut ota = OtaEngine::new(Box::new(flash));
        assert_eq!(ota.start(4096), Err(OtaError::TooLarge { length: 4096, size: 128 }));
    }

    #[test]
    fn unconfirmed_image_rolls_back_on_second_reset() {
        let mut flash = MemFlash::new(4096);
        flash.begin(1, 64).expect("begin");
        flash.write(1, &[1; 64]).expect("write");
        flash.end(1).expect("end");
        flash.set_boot_slot(1).expect("boot");

        flash.reboot();
        assert_eq!(flash.running_slot(), 1);

        // No confirm: the next reset reverts to the previous slot.
        flash.reboot();
        assert_eq!(flash.running_slot(), 0);
        assert_eq!(flash.boot_slot(), 0);
    }

    #[test]
    fn confirmed_image_stays() {
        let mut flash = MemFlash::new(4096);
        flash.begin(1, 4).expect("begin");
        flash.write(1, &[1; 4]).expect("write");
        flash.end(1).expect("end");
        flash.set_boot_slot(1).expect("boot");

        flash.reboot();
        flash.mark_valid().expect("confirm");
        flash.reboot();
        assert_eq!(flash.running_slot(), 1);
    }
}
