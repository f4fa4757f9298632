//! Trigger and marker synchronisation.
//!
//! The playback queue has no partial-update primitive, so every change of
//! the active slot (and every trigger or marker change on a playing channel)
//! re-issues the whole sequence:
//!
//! 1. flush the channel queue
//! 2. external trigger routing
//! 3. cyclic (infinite) replay
//! 4. queue the active slot with trigger mode and delay
//! 5. marker emission, when a marker is configured
//! 6. group synchronisation flag

use crate::commands::ScpiCommand;
use crate::slots::SlotHandle;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Marker fires once per queue cycle.
pub const MARKER_MODE_EACH_CYCLE: u8 = 2;
/// Marker level while active.
pub const MARKER_VALUE_HIGH: u8 = 1;
/// Marker is not aligned to the 10 MHz sync clock.
pub const MARKER_SYNC_IMMEDIATE: u8 = 0;

/// How a queued waveform waits for its trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// Start immediately.
    #[default]
    Auto,
    /// Software trigger, once.
    Software,
    /// External trigger, once.
    External,
    /// Software trigger on every cycle.
    SoftwareCycle,
    /// External trigger on every cycle.
    ExternalCycle,
}

impl TriggerSource {
    /// Trigger mode code used by the queue command.
    pub fn code(self) -> u8 {
        match self {
            Self::Auto => 0,
            Self::Software => 1,
            Self::External => 2,
            Self::SoftwareCycle => 5,
            Self::ExternalCycle => 6,
        }
    }
}

/// Edge or level sensitivity of the external trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerBehavior {
    /// Level, high
    ActiveHigh,
    /// Level, low
    ActiveLow,
    /// Rising edge
    #[default]
    RisingEdge,
    /// Falling edge
    FallingEdge,
}

impl TriggerBehavior {
    /// Behavior code used by the trigger routing command.
    pub fn code(self) -> u8 {
        match self {
            Self::ActiveHigh => 1,
            Self::ActiveLow => 2,
            Self::RisingEdge => 3,
            Self::FallingEdge => 4,
        }
    }
}

/// Trigger settings of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// What starts the queued waveform
    pub source: TriggerSource,
    /// External trigger line the channel listens to
    pub source_channel: u32,
    /// Delay after the trigger, in clock ticks
    pub delay: u32,
    /// Edge or level of the external line
    pub behavior: TriggerBehavior,
}

/// Marker timing of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerConfig {
    /// Delay from waveform start, in clock ticks
    pub delay: u32,
    /// Pulse length, in clock ticks
    pub length: u32,
    /// Backplane trigger lines driven together with the marker
    pub pxi_mask: u32,
    /// Also drive the front-panel trigger output
    pub external: bool,
}

impl MarkerConfig {
    /// A zero delay and zero length means no marker is emitted.
    pub fn is_set(&self) -> bool {
        self.delay != 0 || self.length != 0
    }
}

/// Trigger/marker state for all channels of one instrument.
#[derive(Debug, Default)]
pub struct SyncController {
    triggers: HashMap<u8, TriggerConfig>,
    markers: HashMap<u8, MarkerConfig>,
}

impl SyncController {
    /// No settings stored; every channel uses the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger settings of a channel, defaults if never set.
    pub fn trigger(&self, channel: u8) -> TriggerConfig {
        self.triggers.get(&channel).copied().unwrap_or_default()
    }

    /// Store trigger settings for a channel.
    pub fn set_trigger(&mut self, channel: u8, config: TriggerConfig) {
        self.triggers.insert(channel, config);
    }

    /// Marker settings of a channel, if any.
    pub fn marker(&self, channel: u8) -> Option<MarkerConfig> {
        self.markers.get(&channel).copied()
    }

    /// Store marker settings for a channel.
    pub fn set_marker(&mut self, channel: u8, config: MarkerConfig) {
        self.markers.insert(channel, config);
    }

    /// Full flush/requeue sequence making `slot` the playing content of
    /// `channel`.
    pub fn requeue_sequence(&self, channel: u8, slot: &SlotHandle) -> Vec<ScpiCommand> {
        let trigger = self.trigger(channel);
        let mut sequence = vec![
            ScpiCommand::QueueFlush { channel },
            ScpiCommand::TriggerExternal {
                channel,
                source_channel: trigger.source_channel,
                behavior: trigger.behavior.code(),
            },
            ScpiCommand::QueueCyclic { channel },
            ScpiCommand::QueueWaveform {
                channel,
                slot: slot.name(),
                trigger_mode: trigger.source.code(),
                delay: trigger.delay,
                cycles: 1,
                prescaler: 0,
            },
        ];
        if let Some(marker) = self.marker(channel).filter(MarkerConfig::is_set) {
            sequence.push(ScpiCommand::QueueMarker {
                channel,
                mode: MARKER_MODE_EACH_CYCLE,
                pxi_mask: marker.pxi_mask,
                io_mask: u8::from(marker.external),
                value: MARKER_VALUE_HIGH,
                sync_mode: MARKER_SYNC_IMMEDIATE,
                length: marker.length,
                delay: marker.delay,
            });
        }
        sequence.push(ScpiCommand::QueueSync {
            channel,
            enabled: true,
        });
        sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::SlotBank;

    #[test]
    fn test_sequence_without_marker() {
        let sync = SyncController::new();
        let slot = SlotHandle::new(1, SlotBank::A);
        let sequence = sync.requeue_sequence(1, &slot);

        let lines: Vec<String> = sequence.iter().map(ToString::to_string).collect();
        assert_eq!(
            lines,
            vec![
                "SOUR1:QUE:FLUS",
                "SOUR1:TRIG:EXT 0,3",
                "SOUR1:QUE:MODE CYCL",
                "SOUR1:QUE:WAV \"awg_ch1_a.wfm\",0,0,1,0",
                "SOUR1:QUE:SYNC 1",
            ]
        );
    }

    #[test]
    fn test_sequence_with_trigger_and_marker() {
        let mut sync = SyncController::new();
        sync.set_trigger(
            2,
            TriggerConfig {
                source: TriggerSource::ExternalCycle,
                source_channel: 4001,
                delay: 10,
                behavior: TriggerBehavior::FallingEdge,
            },
        );
        sync.set_marker(
            2,
            MarkerConfig {
                delay: 5,
                length: 2,
                pxi_mask: 0b0100,
                external: true,
            },
        );

        let sequence = sync.requeue_sequence(2, &SlotHandle::new(2, SlotBank::B));
        assert_eq!(sequence.len(), 6);
        assert_eq!(
            sequence[1],
            ScpiCommand::TriggerExternal {
                channel: 2,
                source_channel: 4001,
                behavior: 4
            }
        );
        assert_eq!(sequence[3].to_string(), "SOUR2:QUE:WAV \"awg_ch2_b.wfm\",6,10,1,0");
        assert_eq!(sequence[4].to_string(), "SOUR2:QUE:MARK 2,4,1,1,0,2,5");
        assert!(sequence.iter().all(|c| c.channel() == Some(2)));
    }

    #[test]
    fn test_zero_marker_is_not_queued() {
        let mut sync = SyncController::new();
        sync.set_marker(
            1,
            MarkerConfig {
                delay: 0,
                length: 0,
                pxi_mask: 0b0001,
                external: true,
            },
        );
        let sequence = sync.requeue_sequence(1, &SlotHandle::new(1, SlotBank::A));
        assert_eq!(sequence.len(), 5);
        assert!(!sequence
            .iter()
            .any(|c| matches!(c, ScpiCommand::QueueMarker { .. })));
    }

    #[test]
    fn test_configs_are_per_channel() {
        let mut sync = SyncController::new();
        sync.set_marker(
            1,
            MarkerConfig {
                delay: 1,
                length: 1,
                pxi_mask: 0,
                external: false,
            },
        );
        assert!(sync.marker(1).is_some());
        assert!(sync.marker(2).is_none());
        assert_eq!(sync.trigger(3), TriggerConfig::default());
    }
}
