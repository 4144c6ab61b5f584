//! Splitting a byte stream into `<Message>` documents.
//!
//! The protocol has no length prefix. The simulator itself reads until it sees
//! a closing `</Message>`, and the framer does the same for the receive side.

/// How received bytes are turned into documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// Every read is decoded as exactly one document.
    #[default]
    PerRead,
    /// Reads are buffered and split after each `</Message>`.
    MessageBoundary,
}

const CLOSING_TAG: &[u8] = b"</Message>";

/// Accumulates reads and yields complete `<Message>` documents.
#[derive(Debug, Default)]
pub struct MessageFramer {
    buf: Vec<u8>,
    max_len: Option<usize>,
}

impl MessageFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard buffered bytes once they exceed `max_len` without a boundary.
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_len: Some(max_len),
        }
    }

    /// Append received bytes.
    ///
    /// Returns `false` if the buffer overflowed and was reset.
    pub fn push(&mut self, bytes: &[u8]) -> bool {
        self.buf.extend_from_slice(bytes);
        match self.max_len {
            Some(max) if self.buf.len() > max && find(&self.buf, CLOSING_TAG).is_none() => {
                tracing::warn!(
                    buffered = self.buf.len(),
                    max,
                    "no message boundary within size limit, dropping buffer"
                );
                self.buf.clear();
                false
            }
            _ => true,
        }
    }

    /// Next complete document, including its closing tag.
    ///
    /// Leading whitespace between documents is dropped.
    pub fn next_message(&mut self) -> Option<Vec<u8>> {
        let end = find(&self.buf, CLOSING_TAG)? + CLOSING_TAG.len();
        let message: Vec<u8> = self.buf.drain(..end).collect();
        let start = message
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(message.len());
        Some(message[start..].to_vec())
    }

    /// Bytes received but not yet part of a complete document.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
