//! Rolling-window scanner for terminal control sequences in child output.
//!
//! Reads from the PTY can split an escape sequence anywhere, so the detector
//! keeps the most recent bytes across calls and scans the window as a whole.

use regex::bytes::Regex;
use std::sync::OnceLock;

/// Maximum bytes kept between calls. Long enough for an OSC title.
pub const MAX_WINDOW_BYTES: usize = 512;

/// Bytes after a cursor-position command in which a line erase still counts
/// as a redraw of that line.
const ERASE_LOOKAHEAD: usize = 20;

const SCREEN_CLEAR_SEQUENCES: &[&[u8]] = &[
    b"\x1b[2J", // erase whole screen
    b"\x1b[3J", // erase screen and scrollback
    b"\x1b[H",  // cursor home
    b"\x1b[0J", // erase to end of screen
    b"\x1b[1J", // erase to start of screen
    b"\x1bc",   // full reset
];

const STATUS_INTERFERING_SEQUENCES: &[&[u8]] = &[
    b"\x1b[r",
    b"\x1b[?47h",
    b"\x1b[?1047h",
    b"\x1b[?1049h",
    b"\x1b[?47l",
    b"\x1b[?1047l",
    b"\x1b[?1049l",
    b"\x1bD",
    b"\x1bM",
    b"\x1b[S",
    b"\x1b[T",
];

const FOCUS_IN_SEQUENCE: &[u8] = b"\x1b[I";
const FOCUS_OUT_SEQUENCE: &[u8] = b"\x1b[O";

fn title_pattern() -> &'static Regex {
    static TITLE: OnceLock<Regex> = OnceLock::new();
    TITLE.get_or_init(|| {
        Regex::new(r"(?-u)\x1b\](?:0|1|2);([^\x07\x1b]*?)(?:\x07|\x1b\\)")
            .expect("static title pattern should compile")
    })
}

/// Receives events found by [`TerminalSequenceDetector::detect`].
pub trait ScreenEventHandler {
    /// A clear, reset, alternate-screen switch or line redraw was seen.
    fn on_screen_clear(&self);
    fn on_title_change(&self, title: &str);
    fn on_focus_in(&self);
    fn on_focus_out(&self);
}

/// Stateful detector for screen-clear, focus and title sequences.
#[derive(Debug, Default)]
pub struct TerminalSequenceDetector {
    window: Vec<u8>,
}

impl TerminalSequenceDetector {
    pub fn new() -> Self {
        Self {
            window: Vec::with_capacity(MAX_WINDOW_BYTES * 2),
        }
    }

    /// Append `chunk` to the rolling window and report what it completes.
    ///
    /// Screen clear fires at most once per call no matter how many sequences
    /// matched. Focus in and out are checked independently. Only the most
    /// recent title in the window is reported. With no handler the call is a
    /// no-op and the chunk is not buffered.
    pub fn detect(&mut self, chunk: &[u8], handler: Option<&dyn ScreenEventHandler>) {
        let Some(handler) = handler else {
            return;
        };
        self.window.extend_from_slice(chunk);

        let mut consumed = 0usize;

        if let Some(end) = find_screen_clear(&self.window) {
            consumed = consumed.max(end);
            handler.on_screen_clear();
        }
        if let Some(end) = find_end(&self.window, FOCUS_IN_SEQUENCE) {
            consumed = consumed.max(end);
            handler.on_focus_in();
        }
        if let Some(end) = find_end(&self.window, FOCUS_OUT_SEQUENCE) {
            consumed = consumed.max(end);
            handler.on_focus_out();
        }
        if let Some(caps) = title_pattern().captures_iter(&self.window).last() {
            if let (Some(whole), Some(title)) = (caps.get(0), caps.get(1)) {
                consumed = consumed.max(whole.end());
                handler.on_title_change(&String::from_utf8_lossy(title.as_bytes()));
            }
        }

        // Reported bytes are dropped so a match fires once, not once per chunk
        // for as long as it stays inside the window.
        if consumed > 0 {
            self.window.drain(..consumed);
        }
        if self.window.len() > MAX_WINDOW_BYTES {
            let excess = self.window.len() - MAX_WINDOW_BYTES;
            self.window.drain(..excess);
        }
    }

    /// Bytes currently held for the next call.
    pub fn pending(&self) -> &[u8] {
        &self.window
    }
}

/// End offset of the furthest occurrence of `needle`, if any.
fn find_end(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .rposition(|window| window == needle)
        .map(|start| start + needle.len())
}

/// End offset of the furthest screen-clear style match in `window`.
fn find_screen_clear(window: &[u8]) -> Option<usize> {
    let fixed = SCREEN_CLEAR_SEQUENCES
        .iter()
        .chain(STATUS_INTERFERING_SEQUENCES)
        .filter_map(|seq| find_end(window, seq))
        .max();
    let redraw = find_line_redraw(window);
    match (fixed, redraw) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// Best-effort match for "cursor positioned, then the line erased" redraws,
/// plus the bare erase-below forms (`ESC [ J`, `ESC [ 0 J`).
///
/// The cursor scan accepts any bytes up to the next `H` or `f`, so it can
/// fire on ordinary redraws too. Returns the end of the erase sequence.
fn find_line_redraw(data: &[u8]) -> Option<usize> {
    let mut last_end = None;
    let mut idx = 0;
    while idx + 5 < data.len() {
        if data[idx] == 0x1B && data[idx + 1] == b'[' {
            let mut j = idx + 2;
            while j < data.len() && data[j] != b'H' && data[j] != b'f' {
                j += 1;
            }
            if j < data.len() {
                let limit = (j + ERASE_LOOKAHEAD).min(data.len().saturating_sub(2));
                let mut k = j + 1;
                while k < limit {
                    if data[k] == 0x1B && data[k + 1] == b'[' {
                        if data[k + 2] == b'K' {
                            last_end = Some(k + 3);
                            break;
                        }
                        if data[k + 2] == b'2' && data.get(k + 3) == Some(&b'K') {
                            last_end = Some(k + 4);
                            break;
                        }
                    }
                    k += 1;
                }
            }
        }
        idx += 1;
    }
    let erase_below = [b"\x1b[J".as_slice(), b"\x1b[0J".as_slice()]
        .iter()
        .filter_map(|seq| find_end(data, seq))
        .max();
    match (last_end, erase_below) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        clears: RefCell<usize>,
        focus_in: RefCell<usize>,
        focus_out: RefCell<usize>,
        titles: RefCell<Vec<String>>,
    }

    impl ScreenEventHandler for Recorder {
        fn on_screen_clear(&self) {
            *self.clears.borrow_mut() += 1;
        }
        fn on_title_change(&self, title: &str) {
            self.titles.borrow_mut().push(title.to_string());
        }
        fn on_focus_in(&self) {
            *self.focus_in.borrow_mut() += 1;
        }
        fn on_focus_out(&self) {
            *self.focus_out.borrow_mut() += 1;
        }
    }

    fn clears_for(chunks: &[&[u8]]) -> usize {
        let mut detector = TerminalSequenceDetector::new();
        let recorder = Recorder::default();
        for chunk in chunks {
            detector.detect(chunk, Some(&recorder));
        }
        let count = *recorder.clears.borrow();
        count
    }

    #[test]
    fn detects_each_fixed_clear_sequence() {
        for seq in SCREEN_CLEAR_SEQUENCES.iter().chain(STATUS_INTERFERING_SEQUENCES) {
            assert_eq!(clears_for(&[*seq]), 1, "sequence {seq:?}");
        }
    }

    #[test]
    fn multiple_clears_in_one_chunk_fire_once() {
        assert_eq!(clears_for(&[b"\x1b[2J\x1b[H\x1b[3J"]), 1);
    }

    #[test]
    fn clear_split_across_chunks_fires_once() {
        assert_eq!(clears_for(&[b"\x1b[2", b"J"]), 1);
        assert_eq!(clears_for(&[b"\x1b", b"[", b"2", b"J"]), 1);
        assert_eq!(clears_for(&[b"\x1b[2J"]), 1);
    }

    #[test]
    fn reported_clear_is_not_repeated_by_later_chunks() {
        assert_eq!(clears_for(&[b"\x1b[2J", b"hello", b" world"]), 1);
        assert_eq!(clears_for(&[b"\x1b[2J", b"text", b"\x1b[2J"]), 2);
    }

    #[test]
    fn plain_output_and_styling_do_not_clear() {
        assert_eq!(clears_for(&[b"hello\r\n", b"\x1b[1;32mok\x1b[0m\n"]), 0);
    }

    #[test]
    fn cursor_position_followed_by_line_erase_counts_as_clear() {
        assert_eq!(clears_for(&[b"\x1b[24;1H\x1b[K"]), 1);
        assert_eq!(clears_for(&[b"\x1b[24;1f  \x1b[2K"]), 1);
        assert_eq!(clears_for(&[b"\x1b[J"]), 1);
    }

    #[test]
    fn line_erase_far_from_cursor_position_is_ignored() {
        let mut chunk = b"\x1b[24;1H".to_vec();
        chunk.extend_from_slice(&[b'x'; 40]);
        chunk.extend_from_slice(b"\x1b[K");
        assert_eq!(clears_for(&[&chunk]), 0);
    }

    #[test]
    fn focus_events_fire_independently() {
        let mut detector = TerminalSequenceDetector::new();
        let recorder = Recorder::default();
        detector.detect(b"\x1b[I..\x1b[O", Some(&recorder));
        assert_eq!(*recorder.focus_in.borrow(), 1);
        assert_eq!(*recorder.focus_out.borrow(), 1);
        assert_eq!(*recorder.clears.borrow(), 0);
    }

    #[test]
    fn focus_split_across_chunks_fires_once() {
        let mut detector = TerminalSequenceDetector::new();
        let recorder = Recorder::default();
        detector.detect(b"\x1b[", Some(&recorder));
        assert_eq!(*recorder.focus_in.borrow(), 0);
        detector.detect(b"I", Some(&recorder));
        detector.detect(b"more output", Some(&recorder));
        assert_eq!(*recorder.focus_in.borrow(), 1);
        assert_eq!(*recorder.focus_out.borrow(), 0);

        detector.detect(b"\x1b", Some(&recorder));
        detector.detect(b"[O", Some(&recorder));
        assert_eq!(*recorder.focus_out.borrow(), 1);
    }

    #[test]
    fn reports_latest_title_once() {
        let mut detector = TerminalSequenceDetector::new();
        let recorder = Recorder::default();
        detector.detect(b"\x1b]0;first\x07\x1b]2;second\x1b\\", Some(&recorder));
        assert_eq!(*recorder.titles.borrow(), vec!["second".to_string()]);
    }

    #[test]
    fn title_split_across_chunks_is_reported() {
        let mut detector = TerminalSequenceDetector::new();
        let recorder = Recorder::default();
        detector.detect(b"\x1b]1;my pro", Some(&recorder));
        assert!(recorder.titles.borrow().is_empty());
        detector.detect(b"ject\x07", Some(&recorder));
        assert_eq!(*recorder.titles.borrow(), vec!["my project".to_string()]);
    }

    #[test]
    fn window_is_capped_to_most_recent_bytes() {
        let mut detector = TerminalSequenceDetector::new();
        let recorder = Recorder::default();
        let mut big = vec![b'a'; MAX_WINDOW_BYTES * 3];
        big.extend_from_slice(b"\x1b[2");
        detector.detect(&big, Some(&recorder));
        assert_eq!(detector.pending().len(), MAX_WINDOW_BYTES);
        assert!(detector.pending().ends_with(b"\x1b[2"));
        detector.detect(b"J", Some(&recorder));
        assert_eq!(*recorder.clears.borrow(), 1);
    }

    #[test]
    fn missing_handler_is_a_noop() {
        let mut detector = TerminalSequenceDetector::new();
        detector.detect(b"\x1b[2J", None);
        assert!(detector.pending().is_empty());
    }
}
