//! Instrument link abstraction.
//!
//! The driver only needs three primitives from whatever carries bytes to the
//! instrument: a raw write (bulk frames), a terminated command write, and a
//! query that waits for one reply line. Implementations report failure with
//! `anyhow`; the driver wraps those into [`crate::AwgError::Transport`].

use anyhow::Result;
use async_trait::async_trait;

/// Line terminator appended to textual commands.
pub const TERMINATOR: &str = "\n";

/// Blocking round-trip access to one instrument connection.
///
/// Every call completes only after the transport has handed the bytes to the
/// device (and, for queries, received the reply). Callers that need several
/// calls to reach the device without interleaving must serialise access
/// themselves.
#[async_trait]
pub trait InstrumentTransport: Send + Sync {
    /// Write raw bytes exactly as given.
    async fn write_raw(&self, bytes: &[u8]) -> Result<()>;

    /// Send a query and return the trimmed reply line.
    async fn query(&self, command: &str) -> Result<String>;

    /// Write one textual command followed by [`TERMINATOR`].
    async fn write(&self, command: &str) -> Result<()> {
        let mut line = String::with_capacity(command.len() + TERMINATOR.len());
        line.push_str(command);
        line.push_str(TERMINATOR);
        self.write_raw(line.as_bytes()).await
    }
}
