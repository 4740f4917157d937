//! Persistent diagnostic log ring.
//!
//! The ring lives in retention RAM for the whole process lifetime and is the
//! only post-mortem record after a soft reset. Because the region is not
//! cleared by the loader, the structure validates itself on boot with a
//! salted magic word; a failed check means the RAM content is garbage (cold
//! boot, image change) and the ring is silently reinitialized.

use std::sync::{Arc, Mutex};

use rand::RngCore;

/// Entries kept in the ring.
pub const LOG_ENTRIES: usize = 55;

/// Maximum text bytes per entry; longer lines are truncated.
pub const LOG_ENTRY_TEXT: usize = 120;

/// Entries returned per `drain_view` call (the `log` command's page size).
pub const LOG_VIEW_CHUNK: usize = 24;

const MAGIC_WORD: u32 = 0x4afb_cafe;

/// Wall clock in unix seconds, the timestamp domain of the ring.
#[must_use]
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// One timestamped log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Unix seconds at append time.
    pub timestamp: u64,
    /// Truncated to [`LOG_ENTRY_TEXT`] bytes.
    pub text: String,
}

/// Append-only ring buffer with salted-magic self-validation.
///
/// `append` never blocks on anything but the ring's own lock and never
/// allocates beyond the truncated line; it is safe from any task that can
/// read the clock.
#[derive(Debug)]
pub struct LogRing {
    magic_word: u32,
    random_salt: u32,
    magic_word_salted: u32,
    head_in: usize,
    head_out: usize,
    entries: Vec<Option<LogEntry>>,
}

impl LogRing {
    /// Create a freshly initialized ring (cold boot path).
    #[must_use]
    pub fn new() -> Self {
        let mut ring = Self {
            magic_word: 0,
            random_salt: 0,
            magic_word_salted: 0,
            head_in: 0,
            head_out: 0,
            entries: vec![None; LOG_ENTRIES],
        };
        ring.clear();
        ring
    }

    /// Reinitialize: fresh salt, rewritten magics, empty ring.
    pub fn clear(&mut self) {
        let salt = rand::thread_rng().next_u32();
        self.magic_word = MAGIC_WORD;
        self.random_salt = salt;
        self.magic_word_salted = MAGIC_WORD ^ salt;
        self.head_in = 0;
        self.head_out = 0;
        self.entries.fill(None);
    }

    /// The structure's self-check: `magic ^ salt == magic_xor_salt`.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.magic_word == MAGIC_WORD
            && self.magic_word_salted == (MAGIC_WORD ^ self.random_salt)
            && self.head_in < LOG_ENTRIES
            && self.head_out < LOG_ENTRIES
    }

    /// Boot path: keep a valid ring, otherwise reinitialize and record that.
    ///
    /// Returns `true` when the retained content survived.
    pub fn revalidate(&mut self, now: u64) -> bool {
        if self.is_valid() {
            return true;
        }

        self.clear();
        self.append(now, "log: log buffer corrupt, reinit");
        false
    }

    /// Append one line, truncated to [`LOG_ENTRY_TEXT`] bytes.
    pub fn append(&mut self, now: u64, text: &str) {
        let mut text = text;
        if text.len() > LOG_ENTRY_TEXT {
            // Truncate on a char boundary.
            let mut cut = LOG_ENTRY_TEXT;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text = &text[..cut];
        }

        self.entries[self.head_in] = Some(LogEntry { timestamp: now, text: text.to_string() });
        self.head_in = (self.head_in + 1) % LOG_ENTRIES;
    }

    /// Unread entries between the read cursor and the write head.
    #[must_use]
    pub fn unread(&self) -> usize {
        let pending = if self.head_in >= self.head_out {
            self.head_in - self.head_out
        } else {
            self.head_in + LOG_ENTRIES - self.head_out
        };

        if pending == LOG_ENTRIES { 0 } else { pending }
    }

    /// Read up to `max` entries from `start` (default: the read cursor),
    /// advancing the cursor. Returns the entries and the unread remainder.
    pub fn drain_view(&mut self, start: Option<usize>, max: usize) -> (Vec<(usize, LogEntry)>, usize) {
        if let Some(start) = start {
            self.head_out = start % LOG_ENTRIES;
        }

        let mut out = Vec::new();

        while out.len() < max && self.unread() > 0 {
            if let Some(entry) = &self.entries[self.head_out] {
                out.push((self.head_out, entry.clone()));
            }
            self.head_out = (self.head_out + 1) % LOG_ENTRIES;
        }

        (out, self.unread())
    }

    /// Write cursor (next slot to be overwritten).
    #[must_use]
    pub fn head_in(&self) -> usize {
        self.head_in
    }

    /// Read cursor.
    #[must_use]
    pub fn head_out(&self) -> usize {
        self.head_out
    }

    /// Current salt (reported by `log-info`).
    #[must_use]
    pub fn salt(&self) -> u32 {
        self.random_salt
    }

    /// Corrupt the magics. Test hook for the boot-validation path.
    #[cfg(test)]
    pub(crate) fn scramble(&mut self) {
        self.magic_word_salted ^= 0xffff;
    }
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable handle to the process-wide log ring.
///
/// Appends stamp the entry with the caller-supplied clock so the ring itself
/// never talks to the OS. Also mirrors lines to `tracing` for host-side
/// debugging and, when monitoring is enabled, to the console transport.
#[derive(Debug, Clone)]
pub struct SharedLog {
    ring: Arc<Mutex<LogRing>>,
}

impl SharedLog {
    /// Wrap a ring for shared use.
    #[must_use]
    pub fn new(ring: LogRing) -> Self {
        Self { ring: Arc::new(Mutex::new(ring)) }
    }

    /// Append a line stamped with `now` (unix seconds).
    pub fn append(&self, now: u64, text: &str) {
        tracing::debug!(target: "busbar::log", "{text}");
        if let Ok(mut ring) = self.ring.lock() {
            ring.append(now, text);
        }
    }

    /// Run `f` against the locked ring.
    pub fn with<R>(&self, f: impl FnOnce(&mut LogRing) -> R) -> Option<R> {
        self.ring.lock().ok().map(|mut ring| f(&mut ring))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_drain_in_order() {
        let mut ring = LogRing::new();
        for i in 0..5 {
            ring.append(1000 + i, &format!("line {i}"));
        }

        let (entries, remaining) = ring.drain_view(None, LOG_VIEW_CHUNK);
        assert_eq!(entries.len(), 5);
        assert_eq!(remaining, 0);
        assert_eq!(entries[0].1.text, "line 0");
        assert_eq!(entries[4].1.text, "line 4");
        assert_eq!(entries[4].1.timestamp, 1004);
    }

    #[test]
    fn view_chunks_leave_a_tail() {
        let mut ring = LogRing::new();
        for i in 0..30 {
            ring.append(0, &format!("{i}"));
        }

        let (entries, remaining) = ring.drain_view(None, LOG_VIEW_CHUNK);
        assert_eq!(entries.len(), LOG_VIEW_CHUNK);
        assert_eq!(remaining, 6);

        let (entries, remaining) = ring.drain_view(None, LOG_VIEW_CHUNK);
        assert_eq!(entries.len(), 6);
        assert_eq!(remaining, 0);
        assert_eq!(entries[5].1.text, "29");
    }

    #[test]
    fn drain_from_explicit_start() {
        let mut ring = LogRing::new();
        for i in 0..10 {
            ring.append(0, &format!("{i}"));
        }

        let (entries, _) = ring.drain_view(Some(7), LOG_VIEW_CHUNK);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].1.text, "7");
        assert_eq!(entries[0].0, 7);
    }

    #[test]
    fn long_lines_truncate() {
        let mut ring = LogRing::new();
        ring.append(0, &"x".repeat(500));

        let (entries, _) = ring.drain_view(None, 1);
        assert_eq!(entries[0].1.text.len(), LOG_ENTRY_TEXT);
    }

    #[test]
    fn survives_revalidation_when_intact() {
        let mut ring = LogRing::new();
        for i in 0..8 {
            ring.append(i, &format!("entry {i}"));
        }

        // Soft reset: the region is retained, boot revalidates it.
        assert!(ring.revalidate(99));

        let (entries, _) = ring.drain_view(None, LOG_VIEW_CHUNK);
        assert_eq!(entries.len(), 8);
        assert_eq!(entries[0].1.text, "entry 0");
    }

    #[test]
    fn corrupt_magics_trigger_reinit() {
        let mut ring = LogRing::new();
        ring.append(0, "before corruption");
        ring.scramble();

        assert!(!ring.revalidate(42));

        let (entries, remaining) = ring.drain_view(None, LOG_VIEW_CHUNK);
        assert_eq!(entries.len(), 1);
        assert_eq!(remaining, 0);
        assert_eq!(entries[0].1.text, "log: log buffer corrupt, reinit");
        assert_eq!(entries[0].1.timestamp, 42);
    }

    #[test]
    fn wraparound_overwrites_oldest() {
        let mut ring = LogRing::new();
        for i in 0..LOG_ENTRIES + 3 {
            ring.append(0, &format!("{i}"));
        }

        // in == 3; a full ring reads as empty pending count by convention
        assert_eq!(ring.head_in(), 3);
    }
}
