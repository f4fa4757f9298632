//! Core types for AWG waveform transfer.
//!
//! - [`buffer`] - fixed-length sample/marker buffers and the padding rules
//! - [`frame`] - IEEE-488.2 block framing of bulk uploads
//! - [`transport`] - the instrument link the driver talks through
//! - [`config`] - connection and channel-group settings
//! - [`error`] - the shared error type

pub mod buffer;
pub mod config;
pub mod error;
pub mod frame;
pub mod transport;

pub use buffer::{fit_to_length, MarkerTrack, SampleBuffer, MARKER_TOLERANCE, WAVEFORM_TOLERANCE};
pub use config::{AwgConfig, GroupConfig};
pub use error::{AwgError, AwgResult};
pub use frame::WireFrame;
pub use transport::InstrumentTransport;
