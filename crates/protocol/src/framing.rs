//! Record-separator framing for the JSON hub protocol.
//!
//! Every JSON payload on the wire is terminated by `0x1E`. A single transport
//! message may carry several frames, and a frame may be split across
//! transport messages on streaming transports.

use serde::Serialize;

use crate::constants::MAX_MESSAGE_SIZE;
use crate::error::ProtocolError;

/// ASCII record separator terminating every frame.
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Serializes a value and appends the record separator.
pub fn write_frame<T: Serialize>(value: &T) -> Result<String, ProtocolError> {
    let mut json = serde_json::to_string(value)?;
    json.push(RECORD_SEPARATOR);
    Ok(json)
}

/// Splits a complete payload into its frames.
///
/// The payload must end with a record separator.
pub fn split_frames(payload: &str) -> Result<Vec<&str>, ProtocolError> {
    if !payload.ends_with(RECORD_SEPARATOR) {
        return Err(ProtocolError::MissingSeparator);
    }
    Ok(payload
        .split(RECORD_SEPARATOR)
        .filter(|frame| !frame.is_empty())
        .collect())
}

/// Accumulates partial payloads and yields complete frames.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: String,
}

impl FrameBuffer {
    /// Appends a chunk and returns every frame completed by it.
    ///
    /// Trailing bytes without a separator are kept for the next call. A
    /// partial frame larger than [`MAX_MESSAGE_SIZE`] is discarded.
    pub fn push(&mut self, chunk: &str) -> Result<Vec<String>, ProtocolError> {
        self.pending.push_str(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.pending.find(RECORD_SEPARATOR) {
            let frame: String = self.pending.drain(..=pos).collect();
            let frame = &frame[..frame.len() - RECORD_SEPARATOR.len_utf8()];
            if !frame.is_empty() {
                frames.push(frame.to_string());
            }
        }

        if self.pending.len() > MAX_MESSAGE_SIZE {
            let len = self.pending.len();
            self.pending.clear();
            return Err(ProtocolError::TooLarge(len));
        }

        Ok(frames)
    }

    /// Returns `true` if a partial frame is buffered.
    pub fn has_partial(&self) -> bool {
        !self.pending.is_empty()
    }
}
