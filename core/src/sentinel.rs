use std::sync::LazyLock;

use regex_lite::Regex;

pub const DEFAULT_SENTINEL_BUFFER_BYTES: usize = 64_000;
/// Bytes kept when the rolling buffer is trimmed. Longer than any sentinel.
const TRIM_KEEP_BYTES: usize = 64;

#[allow(clippy::expect_used)]
static SENTINEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"__RC:(-?\d+)__").expect("valid sentinel regex"));

/// Streaming matcher for the `__RC:<n>__` marker a wrapper shell echoes
/// after the user's program returns.
///
/// Only the first occurrence counts. Once it has been seen (or has been seen
/// but did not fit in an `i32`) the scanner stops buffering entirely.
#[derive(Debug)]
pub struct ExitSentinelScanner {
    window: Vec<u8>,
    cap: usize,
    done: bool,
}

impl ExitSentinelScanner {
    pub fn new(cap: usize) -> Self {
        Self {
            window: Vec::with_capacity(4096),
            cap: cap.max(TRIM_KEEP_BYTES * 2),
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feeds a chunk of terminal output. Returns the exit code on the first
    /// sentinel match and `None` on every other call.
    pub fn feed(&mut self, chunk: &[u8]) -> Option<i32> {
        if self.done {
            return None;
        }

        self.window.extend_from_slice(chunk);
        if self.window.len() > self.cap {
            let cut = self.window.len() - TRIM_KEEP_BYTES;
            self.window.drain(..cut);
        }

        let text = String::from_utf8_lossy(&self.window);
        let captures = SENTINEL_RE.captures(&text)?;
        let parsed = captures.get(1).and_then(|m| m.as_str().parse::<i32>().ok());

        self.done = true;
        self.window = Vec::new();
        parsed
    }
}

impl Default for ExitSentinelScanner {
    fn default() -> Self {
        Self::new(DEFAULT_SENTINEL_BUFFER_BYTES)
    }
}
