//! Console line editor.
//!
//! A sans-IO state machine over the terminal byte stream: feed it input
//! bytes, collect echo bytes to write back and completed lines to submit as
//! raw frames. Editing follows the classic control keys (backspace, ^W word
//! erase, ^U line kill, ^R reprint, ^C interrupt, ^@ history dump) plus
//! arrow-key history recall over an eight-line scrollback. A two-character
//! `!n` line selects history slot `n`; `!!` steps one slot back.

/// Bytes per line buffer.
pub const LINE_SIZE: usize = 64;

/// Scrollback depth.
pub const LINE_COUNT: usize = 8;

const BACKSPACE_ECHO: &[u8] = &[0x08, 0x20, 0x08];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EscapeState {
    Inactive,
    EscSeen,
    BracketSeen,
}

/// Echo bytes and completed lines produced by one `feed` call.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ConsoleOutput {
    /// Bytes to write back to the terminal.
    pub echo: Vec<u8>,
    /// Completed command lines, ready for the intake queue.
    pub lines: Vec<String>,
}

/// Counters for `console-info`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsoleStats {
    /// Completed lines submitted.
    pub lines_received: u32,
    /// Input bytes consumed.
    pub bytes_received: u32,
    /// Reply lines written.
    pub lines_sent: u32,
    /// Reply bytes written.
    pub bytes_sent: u32,
}

/// The line editor itself.
#[derive(Debug)]
pub struct LineEditor {
    lines: Vec<String>,
    current: usize,
    hostname: String,
    state: EscapeState,
    stats: ConsoleStats,
}

impl LineEditor {
    /// Editor with an empty scrollback.
    #[must_use]
    pub fn new(hostname: &str) -> Self {
        Self {
            lines: vec![String::new(); LINE_COUNT],
            current: 0,
            hostname: hostname.to_string(),
            state: EscapeState::Inactive,
            stats: ConsoleStats::default(),
        }
    }

    /// The prompt, `hostname [n]> `.
    #[must_use]
    pub fn prompt(&self) -> String {
        format!("{} [{}]> ", self.hostname, self.current)
    }

    /// Update the prompt hostname (set by the `hostname` command).
    pub fn set_hostname(&mut self, hostname: &str) {
        self.hostname = hostname.to_string();
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> ConsoleStats {
        self.stats
    }

    /// Record a reply written to the terminal.
    pub fn note_reply(&mut self, bytes: usize) {
        self.stats.lines_sent += 1;
        self.stats.bytes_sent += bytes as u32;
    }

    /// Feed terminal input; returns echo bytes and any completed lines.
    pub fn feed(&mut self, input: &[u8]) -> ConsoleOutput {
        let mut out = ConsoleOutput::default();

        for &byte in input {
            self.stats.bytes_received += 1;
            self.feed_byte(byte, &mut out);
        }

        out
    }

    fn feed_byte(&mut self, byte: u8, out: &mut ConsoleOutput) {
        match self.state {
            EscapeState::Inactive => {
                if byte == 0x1b {
                    self.state = EscapeState::EscSeen;
                    return;
                }
            },
            EscapeState::EscSeen => {
                if byte == b'[' {
                    self.state = EscapeState::BracketSeen;
                    return;
                }
                // Not a CSI sequence; handle the byte normally.
                self.state = EscapeState::Inactive;
            },
            EscapeState::BracketSeen => {
                self.state = EscapeState::Inactive;
                match byte {
                    b'A' => {
                        self.recall(out, true);
                        return;
                    },
                    b'B' => {
                        self.recall(out, false);
                        return;
                    },
                    _ => {},
                }
            },
        }

        match byte {
            b'\r' | b'\n' => self.finish_line(out),

            // Backspace / DEL
            0x08 | 0x7f => {
                if !self.lines[self.current].is_empty() {
                    self.lines[self.current].pop();
                    out.echo.extend_from_slice(BACKSPACE_ECHO);
                }
            },

            // ^W: erase trailing spaces, then the last word
            0x17 => {
                let line = &mut self.lines[self.current];
                let mut seen_space = false;
                while let Some(last) = line.chars().last() {
                    if seen_space && last != ' ' {
                        break;
                    }
                    if last == ' ' {
                        seen_space = true;
                    }
                    line.pop();
                    out.echo.extend_from_slice(BACKSPACE_ECHO);
                }
            },

            // ^U: kill the whole line
            0x15 => {
                for _ in 0..self.lines[self.current].len() {
                    out.echo.extend_from_slice(BACKSPACE_ECHO);
                }
                self.lines[self.current].clear();
            },

            // ^R: reprint
            0x12 => {
                out.echo.extend_from_slice(b"^R\n");
                out.echo.extend_from_slice(self.prompt().as_bytes());
                out.echo.extend_from_slice(self.lines[self.current].as_bytes());
            },

            // ^C: drop the line
            0x03 => {
                out.echo.extend_from_slice(b"^C\n");
                self.lines[self.current].clear();
                out.echo.extend_from_slice(self.prompt().as_bytes());
            },

            // ^@: dump the scrollback
            0x00 => {
                out.echo.extend_from_slice(b"^@\n");
                for ix in (self.current + 1..LINE_COUNT).chain(0..self.current) {
                    out.echo.extend_from_slice(format!("[{ix}] ").as_bytes());
                    out.echo.extend_from_slice(self.lines[ix].as_bytes());
                    out.echo.push(b'\n');
                }
                out.echo.extend_from_slice(self.prompt().as_bytes());
                out.echo.extend_from_slice(self.lines[self.current].as_bytes());
            },

            // Printable
            0x20..=0x7e => {
                if self.lines[self.current].len() < LINE_SIZE {
                    self.lines[self.current].push(byte as char);
                    out.echo.push(byte);
                }
                if self.lines[self.current].len() >= LINE_SIZE {
                    self.finish_line(out);
                }
            },

            _ => {},
        }
    }

    /// Arrow-key recall: wipe the echo of the current line and show the
    /// previous (`up`) or next stored line.
    fn recall(&mut self, out: &mut ConsoleOutput, up: bool) {
        for _ in 0..self.lines[self.current].len() {
            out.echo.extend_from_slice(BACKSPACE_ECHO);
        }

        self.current = if up {
            self.current.checked_sub(1).unwrap_or(LINE_COUNT - 1)
        } else {
            (self.current + 1) % LINE_COUNT
        };

        out.echo.extend_from_slice(self.lines[self.current].as_bytes());
    }

    fn finish_line(&mut self, out: &mut ConsoleOutput) {
        // `!n` selects a history slot, `!!` steps back one; the recalled
        // line is then submitted as-is.
        let line = &self.lines[self.current];
        if line.len() == 2 && line.starts_with('!') {
            let selector = line.as_bytes()[1];
            if selector.is_ascii_digit() && (selector - b'0') < LINE_COUNT as u8 {
                self.current = (selector - b'0') as usize;
            } else if selector == b'!' {
                self.current = self.current.checked_sub(1).unwrap_or(LINE_COUNT - 1);
            }
        }

        let line = self.lines[self.current].clone();

        if line.is_empty() {
            out.echo.push(b'\n');
            out.echo.extend_from_slice(self.prompt().as_bytes());
            return;
        }

        out.lines.push(line);
        out.echo.push(b'\n');
        self.stats.lines_received += 1;

        self.current = (self.current + 1) % LINE_COUNT;
        self.lines[self.current].clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_line_submits_on_newline() {
        let mut editor = LineEditor::new("node");
        let out = editor.feed(b"help\n");

        assert_eq!(out.lines, vec!["help".to_string()]);
        assert_eq!(&out.echo[..4], b"help");
        assert_eq!(editor.stats().lines_received, 1);
    }

    #[test]
    fn backspace_edits_the_line() {
        let mut editor = LineEditor::new("node");
        let out = editor.feed(b"hellp\x08o\n");
        assert_eq!(out.lines, vec!["hello".to_string()]);
    }

    #[test]
    fn word_erase_drops_last_word() {
        let mut editor = LineEditor::new("node");
        let out = editor.feed(b"config-show extra\x17\n");
        assert_eq!(out.lines, vec!["config-show".to_string()]);
    }

    #[test]
    fn word_erase_stops_after_trailing_spaces() {
        let mut editor = LineEditor::new("node");
        let out = editor.feed(b"config-show extra  \x17\n");
        assert_eq!(out.lines, vec!["config-show extra".to_string()]);
    }

    #[test]
    fn line_kill_starts_over() {
        let mut editor = LineEditor::new("node");
        let out = editor.feed(b"garbage\x15help\n");
        assert_eq!(out.lines, vec!["help".to_string()]);
    }

    #[test]
    fn interrupt_discards_line() {
        let mut editor = LineEditor::new("node");
        let out = editor.feed(b"oops\x03help\n");
        assert_eq!(out.lines, vec!["help".to_string()]);
    }

    #[test]
    fn empty_line_reprompts() {
        let mut editor = LineEditor::new("node");
        let out = editor.feed(b"\n");
        assert!(out.lines.is_empty());
        assert!(out.echo.ends_with(b"node [0]> "));
    }

    #[test]
    fn arrow_up_recalls_previous_line() {
        let mut editor = LineEditor::new("node");
        editor.feed(b"first\n");

        // Up arrow jumps back to slot 0 which still holds "first".
        let out = editor.feed(b"\x1b[A\n");
        assert_eq!(out.lines, vec!["first".to_string()]);
    }

    #[test]
    fn bang_selector_reexecutes_history() {
        let mut editor = LineEditor::new("node");
        editor.feed(b"info\n");
        editor.feed(b"help\n");

        let out = editor.feed(b"!0\n");
        assert_eq!(out.lines, vec!["info".to_string()]);
    }

    #[test]
    fn overlong_line_submits_at_capacity() {
        let mut editor = LineEditor::new("node");
        let long = vec![b'a'; LINE_SIZE + 10];
        let out = editor.feed(&long);

        assert_eq!(out.lines.len(), 1);
        assert_eq!(out.lines[0].len(), LINE_SIZE);
    }

    #[test]
    fn control_bytes_are_ignored() {
        let mut editor = LineEditor::new("node");
        let out = editor.feed(b"he\x07lp\n");
        assert_eq!(out.lines, vec!["help".to_string()]);
    }
}
