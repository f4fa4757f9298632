//! Typed command vocabulary.
//!
//! Only the commands the cache/swap engine needs are modelled. Each variant
//! renders to one SCPI line via `Display`, and [`ScpiCommand::parse`] reads
//! the same line back (used by the mock instrument).

use std::fmt;

/// One command line sent to the instrument. Fields are the command arguments
/// in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ScpiCommand {
    /// Start playback on all channels.
    Run,
    /// Stop playback on all channels.
    Stop,
    /// Enable or disable one channel's output.
    Output { channel: u8, enabled: bool },
    /// Drop everything queued on a channel.
    QueueFlush { channel: u8 },
    /// External trigger routing for a channel.
    TriggerExternal {
        channel: u8,
        source_channel: u32,
        behavior: u8,
    },
    /// Replay the queue forever.
    QueueCyclic { channel: u8 },
    /// Queue one slot for playback.
    QueueWaveform {
        channel: u8,
        slot: String,
        trigger_mode: u8,
        delay: u32,
        cycles: u32,
        prescaler: u32,
    },
    /// Marker emission attached to the queue.
    QueueMarker {
        channel: u8,
        mode: u8,
        pxi_mask: u32,
        io_mask: u8,
        value: u8,
        sync_mode: u8,
        length: u32,
        delay: u32,
    },
    /// Tie the channel's queue start to the group start.
    QueueSync { channel: u8, enabled: bool },
    /// Detach any waveform from a channel.
    AssignEmpty { channel: u8 },
    /// Delete one slot from instrument memory.
    DeleteSlot { name: String },
    /// Delete every user slot.
    DeleteAll,
    /// `*RST`
    Reset,
    /// `*IDN?`
    Identify,
    /// `*OPC?`
    OperationComplete,
}

impl ScpiCommand {
    /// Queries expect exactly one reply line.
    pub fn is_query(&self) -> bool {
        matches!(self, Self::Identify | Self::OperationComplete)
    }

    /// Channel the command addresses, if it addresses one.
    pub fn channel(&self) -> Option<u8> {
        match self {
            Self::Output { channel, .. }
            | Self::QueueFlush { channel }
            | Self::TriggerExternal { channel, .. }
            | Self::QueueCyclic { channel }
            | Self::QueueWaveform { channel, .. }
            | Self::QueueMarker { channel, .. }
            | Self::QueueSync { channel, .. }
            | Self::AssignEmpty { channel } => Some(*channel),
            _ => None,
        }
    }

    /// Parse one rendered command line.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        match line {
            "AWGC:RUN:IMM" => return Some(Self::Run),
            "AWGC:STOP:IMM" => return Some(Self::Stop),
            "WLIS:WAV:DEL ALL" => return Some(Self::DeleteAll),
            "*RST" => return Some(Self::Reset),
            "*IDN?" => return Some(Self::Identify),
            "*OPC?" => return Some(Self::OperationComplete),
            _ => {}
        }

        if let Some(name) = line.strip_prefix("WLIS:WAV:DEL ") {
            return Some(Self::DeleteSlot {
                name: unquote(name)?.to_string(),
            });
        }

        if let Some(rest) = line.strip_prefix("OUTP") {
            let (channel, state) = rest.split_once(":STAT ")?;
            let enabled = match state {
                "ON" => true,
                "OFF" => false,
                _ => return None,
            };
            return Some(Self::Output {
                channel: channel.parse().ok()?,
                enabled,
            });
        }

        let rest = line.strip_prefix("SOUR")?;
        let (channel, tail) = rest.split_once(':')?;
        let channel: u8 = channel.parse().ok()?;
        match tail {
            "QUE:FLUS" => return Some(Self::QueueFlush { channel }),
            "QUE:MODE CYCL" => return Some(Self::QueueCyclic { channel }),
            "WAV \"\"" => return Some(Self::AssignEmpty { channel }),
            _ => {}
        }

        if let Some(args) = tail.strip_prefix("QUE:SYNC ") {
            return Some(Self::QueueSync {
                channel,
                enabled: args == "1",
            });
        }
        if let Some(args) = tail.strip_prefix("TRIG:EXT ") {
            let (source, behavior) = args.split_once(',')?;
            return Some(Self::TriggerExternal {
                channel,
                source_channel: source.parse().ok()?,
                behavior: behavior.parse().ok()?,
            });
        }
        if let Some(args) = tail.strip_prefix("QUE:WAV ") {
            let fields: Vec<&str> = args.split(',').collect();
            if let [slot, mode, delay, cycles, prescaler] = fields.as_slice() {
                return Some(Self::QueueWaveform {
                    channel,
                    slot: unquote(slot)?.to_string(),
                    trigger_mode: mode.parse().ok()?,
                    delay: delay.parse().ok()?,
                    cycles: cycles.parse().ok()?,
                    prescaler: prescaler.parse().ok()?,
                });
            }
            return None;
        }
        if let Some(args) = tail.strip_prefix("QUE:MARK ") {
            let fields: Vec<&str> = args.split(',').collect();
            if let [mode, pxi, io, value, sync, length, delay] = fields.as_slice() {
                return Some(Self::QueueMarker {
                    channel,
                    mode: mode.parse().ok()?,
                    pxi_mask: pxi.parse().ok()?,
                    io_mask: io.parse().ok()?,
                    value: value.parse().ok()?,
                    sync_mode: sync.parse().ok()?,
                    length: length.parse().ok()?,
                    delay: delay.parse().ok()?,
                });
            }
        }
        None
    }
}

fn unquote(s: &str) -> Option<&str> {
    s.strip_prefix('"')?.strip_suffix('"')
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "ON"
    } else {
        "OFF"
    }
}

impl fmt::Display for ScpiCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run => write!(f, "AWGC:RUN:IMM"),
            Self::Stop => write!(f, "AWGC:STOP:IMM"),
            Self::Output { channel, enabled } => {
                write!(f, "OUTP{}:STAT {}", channel, on_off(*enabled))
            }
            Self::QueueFlush { channel } => write!(f, "SOUR{}:QUE:FLUS", channel),
            Self::TriggerExternal {
                channel,
                source_channel,
                behavior,
            } => write!(f, "SOUR{}:TRIG:EXT {},{}", channel, source_channel, behavior),
            Self::QueueCyclic { channel } => write!(f, "SOUR{}:QUE:MODE CYCL", channel),
            Self::QueueWaveform {
                channel,
                slot,
                trigger_mode,
                delay,
                cycles,
                prescaler,
            } => write!(
                f,
                "SOUR{}:QUE:WAV \"{}\",{},{},{},{}",
                channel, slot, trigger_mode, delay, cycles, prescaler
            ),
            Self::QueueMarker {
                channel,
                mode,
                pxi_mask,
                io_mask,
                value,
                sync_mode,
                length,
                delay,
            } => write!(
                f,
                "SOUR{}:QUE:MARK {},{},{},{},{},{},{}",
                channel, mode, pxi_mask, io_mask, value, sync_mode, length, delay
            ),
            Self::QueueSync { channel, enabled } => {
                write!(f, "SOUR{}:QUE:SYNC {}", channel, u8::from(*enabled))
            }
            Self::AssignEmpty { channel } => write!(f, "SOUR{}:WAV \"\"", channel),
            Self::DeleteSlot { name } => write!(f, "WLIS:WAV:DEL \"{}\"", name),
            Self::DeleteAll => write!(f, "WLIS:WAV:DEL ALL"),
            Self::Reset => write!(f, "*RST"),
            Self::Identify => write!(f, "*IDN?"),
            Self::OperationComplete => write!(f, "*OPC?"),
        }
    }
}
