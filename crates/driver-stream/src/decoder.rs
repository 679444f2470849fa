//! Incremental decoder for the line-delimited chat event stream.

use std::ops::ControlFlow;

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::FrameError;
use crate::protocol::{frame_payload, parse_frame, StreamEvent};

/// How a [`decode_stream`] run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// The body ended and every frame was dispatched.
    Finished,
    /// The handler asked to stop.
    Stopped,
    /// The token fired; nothing was dispatched after that.
    Cancelled,
}

/// Splits incoming bytes into lines and parses complete lines into events.
///
/// Bytes are buffered until a `\n` arrives, so neither a frame nor a
/// multi-byte character can be torn by a chunk boundary. A terminated line
/// that fails to parse is dropped; an unterminated tail is only parsed by
/// [`FrameDecoder::finish`].
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    scanned: usize,
    discarded: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns the events completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(offset) = self.buffer[self.scanned..]
            .iter()
            .position(|byte| *byte == b'\n')
        {
            let end = self.scanned + offset;
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            self.scanned = 0;
            if let Some(event) = self.decode_line(&line[..end], true) {
                events.push(event);
            }
        }
        self.scanned = self.buffer.len();

        events
    }

    /// Parses whatever is left once the body has ended, best-effort.
    pub fn finish(&mut self) -> Option<StreamEvent> {
        self.scanned = 0;
        if self.buffer.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buffer);
        self.decode_line(&line, false)
    }

    /// Bytes held back waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Complete frames dropped because they could not be parsed.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    fn decode_line(&mut self, raw: &[u8], terminated: bool) -> Option<StreamEvent> {
        let result = std::str::from_utf8(raw)
            .map_err(|_| FrameError::InvalidUtf8)
            .and_then(|line| match frame_payload(line) {
                Some(payload) => parse_frame(payload).map(Some).map_err(|err| {
                    log::debug!("Frame with error: '{}'", payload);
                    err
                }),
                None => Ok(None),
            });

        match result {
            Ok(event) => event,
            Err(err) => {
                self.discarded += 1;
                if terminated {
                    log::error!("Discarding malformed frame: {}", err);
                } else {
                    log::error!("Discarding malformed trailing frame at end of stream: {}", err);
                }
                None
            }
        }
    }
}

/// Drives `body` through a [`FrameDecoder`], handing each event to `handler`
/// synchronously and in stream order before the next read.
///
/// `cancel` is raced against every read and checked before every dispatch.
pub async fn decode_stream<S, B, E, H>(
    mut body: S,
    cancel: &CancellationToken,
    mut handler: H,
) -> Result<DecodeOutcome, E>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    H: FnMut(StreamEvent) -> ControlFlow<()>,
{
    let mut decoder = FrameDecoder::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(DecodeOutcome::Cancelled),
            next = body.next() => next,
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk?;

        for event in decoder.push(chunk.as_ref()) {
            if cancel.is_cancelled() {
                return Ok(DecodeOutcome::Cancelled);
            }
            if handler(event).is_break() {
                return Ok(DecodeOutcome::Stopped);
            }
        }
    }

    if let Some(event) = decoder.finish() {
        if cancel.is_cancelled() {
            return Ok(DecodeOutcome::Cancelled);
        }
        if handler(event).is_break() {
            return Ok(DecodeOutcome::Stopped);
        }
    }

    if decoder.discarded() > 0 {
        log::warn!("Stream finished with {} discarded frame(s)", decoder.discarded());
    }
    Ok(DecodeOutcome::Finished)
}
