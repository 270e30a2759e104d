//! Incremental newline-delimited JSON decoding for send responses.
//!
//! Network chunks arrive at arbitrary boundaries. [`RecordDecoder`] buffers
//! bytes and only yields a record once its terminating newline has arrived;
//! [`records`] lifts that into a lazily-produced stream over a byte stream.

use futures::stream::{self, Stream, StreamExt};

use super::error::{ConversationError, ConversationResult};
use super::types::StreamRecord;

/// Pull-based decoder that keeps a partial trailing line between reads.
#[derive(Debug, Default)]
pub struct RecordDecoder {
    buffer: Vec<u8>,
    /// Start of the first byte not yet consumed.
    cursor: usize,
}

impl RecordDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            cursor: 0,
        }
    }

    /// Append a chunk of bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        if self.cursor > 0 {
            self.buffer.drain(..self.cursor);
            self.cursor = 0;
        }
        self.buffer.extend_from_slice(chunk);
    }

    /// Decode the next complete line, if one is buffered.
    ///
    /// Blank lines are skipped. Returns `None` when no complete line remains.
    pub fn next_record(&mut self) -> Option<ConversationResult<StreamRecord>> {
        loop {
            let pending = &self.buffer[self.cursor..];
            let newline = pending.iter().position(|b| *b == b'\n')?;
            let line = trim_line(&pending[..newline]);
            let result = if line.is_empty() {
                None
            } else {
                Some(StreamRecord::from_json(line))
            };
            self.cursor += newline + 1;
            if result.is_some() {
                return result;
            }
        }
    }

    /// Bytes buffered after the last complete line.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len() - self.cursor
    }

    /// Close the decoder, dropping any unterminated trailing fragment.
    ///
    /// Returns the number of bytes discarded.
    pub fn finish(self) -> usize {
        let dropped = trim_line(&self.buffer[self.cursor..]).len();
        if dropped > 0 {
            tracing::warn!("Discarding {dropped} bytes of unterminated stream record");
        }
        dropped
    }
}

/// Strip a trailing carriage return and surrounding ASCII whitespace.
fn trim_line(line: &[u8]) -> &[u8] {
    line.trim_ascii()
}

struct DecodeState<S> {
    bytes: S,
    decoder: RecordDecoder,
    done: bool,
}

/// Decode a stream of byte chunks into stream records, in arrival order.
///
/// The resulting stream ends when the byte stream ends. A transport error is
/// yielded once and then the stream ends; a malformed line is yielded as an
/// error and decoding continues with the next line.
pub fn records<S, B>(bytes: S) -> impl Stream<Item = ConversationResult<StreamRecord>>
where
    S: Stream<Item = ConversationResult<B>> + Unpin,
    B: AsRef<[u8]>,
{
    let state = DecodeState {
        bytes,
        decoder: RecordDecoder::new(),
        done: false,
    };

    stream::unfold(Some(state), |state| async move {
        let mut state = state?;
        loop {
            if let Some(record) = state.decoder.next_record() {
                return Some((record, Some(state)));
            }
            if state.done {
                state.decoder.finish();
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => state.decoder.push(chunk.as_ref()),
                Some(Err(err)) => {
                    state.decoder.finish();
                    return Some((Err(err), None));
                }
                None => state.done = true,
            }
        }
    })
}

/// Map a transport error from a byte stream into a connectivity error.
pub fn transport_error(err: impl std::fmt::Display) -> ConversationError {
    ConversationError::Transport(err.to_string())
}
