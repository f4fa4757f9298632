//! AWG upload engine.
//!
//! - [`cache`] - last committed content per channel
//! - [`slots`] - active/staging slot pairs and the commit planner
//! - [`sync`] - trigger and marker queue configuration
//! - [`commands`] - the SCPI lines the engine sends
//! - [`driver`] - [`AwgDriver`], the public API
//! - [`scpi`] - TCP transport
//! - [`mock`] - in-process instrument for tests and dry runs

pub mod cache;
pub mod commands;
pub mod driver;
pub mod mock;
pub mod scpi;
pub mod slots;
pub mod sync;

pub use cache::{ContentCache, ContentCacheEntry};
pub use commands::ScpiCommand;
pub use driver::{AwgDriver, CommitOutcome};
pub use mock::{MockAwg, MockEvent};
pub use scpi::ScpiClient;
pub use slots::{ChannelSlot, ChannelState, SlotBank, SlotHandle};
pub use sync::{MarkerConfig, SyncController, TriggerBehavior, TriggerConfig, TriggerSource};
