//! AWG connection and channel-group configuration.
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `AWG_` (e.g. `AWG_NOP=2000`)
//!
//! # Example
//! ```no_run
//! use awg_core::config::AwgConfig;
//!
//! let config = AwgConfig::load_from("config/awg.toml")?;
//! config.validate()?;
//! println!("{} points at {} Hz", config.nop, config.clock);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::error::{AwgError, AwgResult};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Raw-socket SCPI port used when none is configured.
pub const DEFAULT_PORT: u16 = 5025;

/// Largest supported channel count.
pub const MAX_CHANNELS: u8 = 8;

/// Connection and group settings for one instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwgConfig {
    /// Hostname or IP address of the instrument
    #[serde(default)]
    pub host: String,

    /// SCPI raw-socket port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Use the in-process mock instrument instead of a connection
    #[serde(default)]
    pub mock: bool,

    /// Number of analog channels, numbered `1..=channels`
    #[serde(default = "default_channels")]
    pub channels: u8,

    /// Samples per waveform for the whole channel group
    #[serde(default = "default_nop")]
    pub nop: usize,

    /// Sample rate in Hz
    #[serde(default = "default_clock")]
    pub clock: f64,

    /// Query timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Channels whose marker 1 track is inverted before upload
    #[serde(default)]
    pub invert_marker1: Vec<u8>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_channels() -> u8 {
    4
}

fn default_nop() -> usize {
    1000
}

fn default_clock() -> f64 {
    1e9
}

fn default_timeout_ms() -> u64 {
    5000
}

impl Default for AwgConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            mock: false,
            channels: default_channels(),
            nop: default_nop(),
            clock: default_clock(),
            timeout_ms: default_timeout_ms(),
            invert_marker1: Vec::new(),
        }
    }
}

/// The part of the configuration that shapes uploaded content.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Samples per waveform
    pub nop: usize,
    /// Sample rate in Hz
    pub clock: f64,
}

impl AwgConfig {
    /// Load configuration from a TOML file, with `AWG_` environment overrides.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("AWG_").split("__"))
            .extract()?;
        tracing::debug!(
            "Loaded AWG config from {} (mock = {}, nop = {})",
            path.as_ref().display(),
            config.mock,
            config.nop
        );
        Ok(config)
    }

    /// Parse configuration from a TOML string (no environment overrides).
    pub fn from_toml_str(source: &str) -> Result<Self, figment::Error> {
        Figment::new().merge(Toml::string(source)).extract()
    }

    /// Config for an in-process mock instrument.
    pub fn mock(channels: u8, nop: usize, clock: f64) -> Self {
        Self {
            mock: true,
            channels,
            nop,
            clock,
            ..Self::default()
        }
    }

    /// Point count and clock as one value.
    pub fn group(&self) -> GroupConfig {
        GroupConfig {
            nop: self.nop,
            clock: self.clock,
        }
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> AwgResult<()> {
        if !self.mock && self.host.trim().is_empty() {
            return Err(AwgError::Configuration(
                "'host' cannot be empty unless mock = true".into(),
            ));
        }
        if self.port == 0 {
            return Err(AwgError::Configuration("'port' cannot be 0".into()));
        }
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(AwgError::Configuration(format!(
                "'channels' must be between 1 and {}, got {}",
                MAX_CHANNELS, self.channels
            )));
        }
        self.group().validate()?;
        if let Some(ch) = self
            .invert_marker1
            .iter()
            .find(|&&ch| ch == 0 || ch > self.channels)
        {
            return Err(AwgError::Configuration(format!(
                "'invert_marker1' names channel {} outside 1..={}",
                ch, self.channels
            )));
        }
        Ok(())
    }
}

impl GroupConfig {
    /// Reject a zero point count and a non-positive or non-finite clock.
    pub fn validate(&self) -> AwgResult<()> {
        if self.nop == 0 {
            return Err(AwgError::Configuration("'nop' must be at least 1".into()));
        }
        if !(self.clock.is_finite() && self.clock > 0.0) {
            return Err(AwgError::Configuration(format!(
                "'clock' must be a positive frequency, got {}",
                self.clock
            )));
        }
        Ok(())
    }
}
