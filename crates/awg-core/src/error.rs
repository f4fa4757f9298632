//! Error types for waveform transfer.
//!
//! `AwgError` is the single error type returned by the codec and by the
//! driver. It is built with `thiserror` so every variant carries a readable
//! message and, where a lower layer failed, the original error as `source()`.
//!
//! ## Error Categories
//!
//! 1. **Data errors** - `LengthMismatch`, `MalformedFrame`, `BlockTooLarge`
//!    - Raised by the frame codec before any byte reaches the wire
//!    - Permanent for the given input; fix the buffer or the frame
//!
//! 2. **Instrument errors** - `Transport`, `UnexpectedReply`
//!    - Raised while talking to the instrument
//!    - The driver never retries; the caller decides whether to
//!
//! 3. **Usage errors** - `InvalidChannel`, `Configuration`
//!    - Raised before any I/O is attempted

use thiserror::Error;

/// Convenience alias for results carrying an [`AwgError`].
pub type AwgResult<T> = std::result::Result<T, AwgError>;

/// Primary error type for waveform caching, framing and upload.
#[derive(Error, Debug)]
pub enum AwgError {
    /// Sample and marker arrays handed to the encoder differ in length.
    ///
    /// Detected before the first byte of a frame is produced, so a frame is
    /// either complete or absent.
    #[error(
        "Length mismatch: {samples} samples, {marker1} marker1 bits, {marker2} marker2 bits"
    )]
    LengthMismatch {
        /// Analog sample count
        samples: usize,
        /// Marker 1 bit count
        marker1: usize,
        /// Marker 2 bit count
        marker2: usize,
    },

    /// A write or query to the instrument failed.
    ///
    /// **Recovery Strategy**: The content cache still describes the last
    /// successful upload, so retrying the same operation repeats the same
    /// transfer.
    ///
    /// **Source**: the transport's own error, unchanged.
    #[error("Transport failure during '{operation}': {source}")]
    Transport {
        /// What was being sent when the link failed
        operation: String,
        /// Underlying transport error
        #[source]
        source: anyhow::Error,
    },

    /// Channel number outside `1..=count`.
    #[error("Invalid channel {channel}: instrument has channels 1..={count}")]
    InvalidChannel {
        /// Requested channel
        channel: u8,
        /// Channels the instrument has
        count: u8,
    },

    /// Bytes received for decoding are not a well-formed waveform frame.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Block payload whose length does not fit a single-digit length-of-length.
    #[error("Block payload of {0} bytes exceeds the 9-digit length field")]
    BlockTooLarge(usize),

    /// The instrument answered a query with something other than expected.
    #[error("Unexpected reply to '{command}': {reply:?}")]
    UnexpectedReply {
        /// Query that was sent
        command: String,
        /// Reply line as received
        reply: String,
    },

    /// Configuration values parsed but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl AwgError {
    /// Wrap a transport error, naming the operation that was in flight.
    pub fn transport(operation: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Transport {
            operation: operation.into(),
            source,
        }
    }

    /// True for failures reported by the instrument link rather than by
    /// input validation.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::UnexpectedReply { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_transport_error_keeps_source() {
        let err = AwgError::transport("MMEM:DATA", anyhow::anyhow!("connection reset"));
        assert!(err.is_transport());
        assert!(err.to_string().contains("MMEM:DATA"));
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("connection reset"));
    }

    #[test]
    fn test_length_mismatch_message() {
        let err = AwgError::LengthMismatch {
            samples: 10,
            marker1: 9,
            marker2: 10,
        };
        assert!(!err.is_transport());
        assert_eq!(
            err.to_string(),
            "Length mismatch: 10 samples, 9 marker1 bits, 10 marker2 bits"
        );
    }
}
