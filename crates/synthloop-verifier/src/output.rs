use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which pipe a chunk of output came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Called synchronously for every chunk the check command writes
pub type OutputCallback = Arc<dyn Fn(&str, OutputStream) + Send + Sync>;

/// Raw bytes of one pipe, plus the bytes not yet handed to the callback.
///
/// The full text is decoded once at the end so a character split across
/// reads survives intact. Streamed chunks stop short of an incomplete
/// trailing sequence and pick it up on the next read.
#[derive(Debug, Default)]
pub(crate) struct CapturedStream {
    raw: Vec<u8>,
    pending: Vec<u8>,
}

impl CapturedStream {
    /// Record `bytes` and return the text that is now complete
    pub(crate) fn push(&mut self, bytes: &[u8]) -> String {
        self.raw.extend_from_slice(bytes);
        self.pending.extend_from_slice(bytes);

        let mut text = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.pending.clear();
                    return text;
                }
                Err(e) => {
                    let end = match e.error_len() {
                        // Truncated sequence at the end: wait for more bytes
                        None => e.valid_up_to(),
                        Some(bad) => e.valid_up_to() + bad,
                    };
                    text.push_str(&String::from_utf8_lossy(&self.pending[..end]));
                    self.pending.drain(..end);
                    if e.error_len().is_none() {
                        return text;
                    }
                }
            }
        }
    }

    /// Bytes still held back when the pipe closed
    pub(crate) fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(rest)
    }

    pub(crate) fn into_text(self) -> String {
        match String::from_utf8(self.raw) {
            Ok(text) => text,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }
    }
}
