//! In-process mock instrument.
//!
//! `MockAwg` interprets the same command lines a real instrument receives:
//! uploads are decoded and kept per slot name, queue commands build a
//! per-channel playback queue, and every write is logged so tests can count
//! transfers. Failures can be injected per command prefix.

use crate::commands::ScpiCommand;
use anyhow::{bail, Result};
use async_trait::async_trait;
use awg_core::frame::UPLOAD_COMMAND;
use awg_core::{InstrumentTransport, WireFrame};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Identification string returned for `*IDN?`.
pub const MOCK_IDN: &str = "MOCK,AWG-SIM,00000,0.1.0";

/// One write or query as seen by the mock.
#[derive(Debug, Clone, PartialEq)]
pub enum MockEvent {
    /// A parsed command line.
    Command(ScpiCommand),
    /// A waveform frame written to the named slot.
    Upload(String),
    /// A query and the reply sent back.
    Query(String, String),
    /// A line the mock does not understand.
    Unknown(String),
}

/// Playback queue of one channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MockQueue {
    /// Queued slot name
    pub slot: Option<String>,
    /// Replays forever
    pub cyclic: bool,
    /// External trigger line and behavior code
    pub trigger: Option<(u32, u8)>,
    /// Trigger mode code of the queued waveform
    pub trigger_mode: u8,
    /// Trigger delay of the queued waveform
    pub trigger_delay: u32,
    /// Marker command attached to the queue
    pub marker: Option<ScpiCommand>,
    /// Starts with the group
    pub synced: bool,
}

#[derive(Debug, Default)]
struct MockState {
    events: Vec<MockEvent>,
    files: HashMap<String, WireFrame>,
    outputs: HashMap<u8, bool>,
    queues: HashMap<u8, MockQueue>,
    running: bool,
    fail_prefixes: Vec<String>,
    offline: bool,
}

/// Mock AWG for testing without hardware.
#[derive(Debug, Default)]
pub struct MockAwg {
    state: Mutex<MockState>,
}

impl MockAwg {
    /// Idle instrument with empty memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next write or query starting with `prefix` fail once.
    pub fn fail_next(&self, prefix: impl Into<String>) {
        self.state.lock().fail_prefixes.push(prefix.into());
    }

    /// Make every operation fail until set back to `false`.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Everything received, in order.
    pub fn events(&self) -> Vec<MockEvent> {
        self.state.lock().events.clone()
    }

    /// Parsed commands in order, uploads and queries excluded.
    pub fn commands(&self) -> Vec<ScpiCommand> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                MockEvent::Command(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    /// Slot names of all uploads, in order.
    pub fn uploads(&self) -> Vec<String> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                MockEvent::Upload(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of successful uploads.
    pub fn upload_count(&self) -> usize {
        self.uploads().len()
    }

    /// Number of `OUTP<ch>:STAT ON` commands received for `channel`.
    pub fn output_enable_count(&self, channel: u8) -> usize {
        self.commands()
            .iter()
            .filter(|c| {
                matches!(c, ScpiCommand::Output { channel: ch, enabled: true } if *ch == channel)
            })
            .count()
    }

    /// Forget the event log, keeping instrument state.
    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    /// Content stored under a slot name.
    pub fn file(&self, name: &str) -> Option<WireFrame> {
        self.state.lock().files.get(name).cloned()
    }

    /// Sorted names of all slots in memory.
    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().files.keys().cloned().collect();
        names.sort();
        names
    }

    /// Playback queue of a channel, empty if never configured.
    pub fn queue(&self, channel: u8) -> MockQueue {
        self.state
            .lock()
            .queues
            .get(&channel)
            .cloned()
            .unwrap_or_default()
    }

    /// Content the channel would currently play.
    pub fn playing(&self, channel: u8) -> Option<WireFrame> {
        let state = self.state.lock();
        let slot = state.queues.get(&channel)?.slot.as_ref()?;
        state.files.get(slot).cloned()
    }

    /// Whether the channel output is switched on.
    pub fn output_enabled(&self, channel: u8) -> bool {
        self.state
            .lock()
            .outputs
            .get(&channel)
            .copied()
            .unwrap_or(false)
    }

    /// Whether the group is playing.
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    fn check_failure(state: &mut MockState, text: &str) -> Result<()> {
        if state.offline {
            bail!("Mock instrument offline");
        }
        if let Some(pos) = state
            .fail_prefixes
            .iter()
            .position(|prefix| text.starts_with(prefix.as_str()))
        {
            let prefix = state.fail_prefixes.remove(pos);
            bail!("Injected failure for '{}'", prefix);
        }
        Ok(())
    }

    fn apply(state: &mut MockState, command: &ScpiCommand) -> Result<()> {
        match command {
            ScpiCommand::Run => state.running = true,
            ScpiCommand::Stop => state.running = false,
            ScpiCommand::Output { channel, enabled } => {
                state.outputs.insert(*channel, *enabled);
            }
            ScpiCommand::QueueFlush { channel } | ScpiCommand::AssignEmpty { channel } => {
                state.queues.insert(*channel, MockQueue::default());
            }
            ScpiCommand::TriggerExternal {
                channel,
                source_channel,
                behavior,
            } => {
                state.queues.entry(*channel).or_default().trigger =
                    Some((*source_channel, *behavior));
            }
            ScpiCommand::QueueCyclic { channel } => {
                state.queues.entry(*channel).or_default().cyclic = true;
            }
            ScpiCommand::QueueWaveform {
                channel,
                slot,
                trigger_mode,
                delay,
                ..
            } => {
                if !state.files.contains_key(slot) {
                    bail!("Waveform '{}' not in instrument memory", slot);
                }
                let queue = state.queues.entry(*channel).or_default();
                queue.slot = Some(slot.clone());
                queue.trigger_mode = *trigger_mode;
                queue.trigger_delay = *delay;
            }
            ScpiCommand::QueueMarker { channel, .. } => {
                state.queues.entry(*channel).or_default().marker = Some(command.clone());
            }
            ScpiCommand::QueueSync { channel, enabled } => {
                state.queues.entry(*channel).or_default().synced = *enabled;
            }
            ScpiCommand::DeleteSlot { name } => {
                state.files.remove(name);
            }
            ScpiCommand::DeleteAll => state.files.clear(),
            ScpiCommand::Reset => {
                state.files.clear();
                state.queues.clear();
                state.outputs.clear();
                state.running = false;
            }
            ScpiCommand::Identify | ScpiCommand::OperationComplete => {
                bail!("'{}' is a query", command)
            }
        }
        Ok(())
    }
}

#[async_trait]
impl InstrumentTransport for MockAwg {
    async fn write_raw(&self, bytes: &[u8]) -> Result<()> {
        let mut state = self.state.lock();

        if bytes.starts_with(UPLOAD_COMMAND.as_bytes()) {
            Self::check_failure(&mut state, UPLOAD_COMMAND)?;
            let frame = WireFrame::decode(bytes)?;
            tracing::debug!(
                "Mock upload: {} ({} points)",
                frame.name,
                frame.buffer.len()
            );
            state.events.push(MockEvent::Upload(frame.name.clone()));
            state.files.insert(frame.name.clone(), frame);
            return Ok(());
        }

        let text = String::from_utf8_lossy(bytes);
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            Self::check_failure(&mut state, line)?;
            match ScpiCommand::parse(line) {
                Some(command) => {
                    tracing::debug!("Mock SCPI write: {}", line);
                    Self::apply(&mut state, &command)?;
                    state.events.push(MockEvent::Command(command));
                }
                None => {
                    tracing::warn!("Unknown mock command: {}", line);
                    state.events.push(MockEvent::Unknown(line.to_string()));
                }
            }
        }
        Ok(())
    }

    async fn query(&self, command: &str) -> Result<String> {
        let mut state = self.state.lock();
        Self::check_failure(&mut state, command)?;
        let reply = match ScpiCommand::parse(command) {
            Some(ScpiCommand::Identify) => MOCK_IDN.to_string(),
            Some(ScpiCommand::OperationComplete) => "1".to_string(),
            _ => bail!("Unknown mock query: {}", command),
        };
        tracing::debug!("Mock SCPI query: {} -> {}", command, reply);
        state
            .events
            .push(MockEvent::Query(command.to_string(), reply.clone()));
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use awg_core::SampleBuffer;

    #[tokio::test]
    async fn test_upload_is_decoded_and_stored() {
        let mock = MockAwg::new();
        let frame = WireFrame::new("awg_ch1_a.wfm", SampleBuffer::fit(4, &[0.5], &[true], &[]), 1e9);
        mock.write_raw(&frame.encode().unwrap()).await.unwrap();

        assert_eq!(mock.upload_count(), 1);
        assert_eq!(mock.file("awg_ch1_a.wfm"), Some(frame));
    }

    #[tokio::test]
    async fn test_queue_requires_uploaded_slot() {
        let mock = MockAwg::new();
        let err = mock
            .write("SOUR1:QUE:WAV \"missing.wfm\",0,0,1,0")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing.wfm"));
    }

    #[tokio::test]
    async fn test_queue_and_output_state() {
        let mock = MockAwg::new();
        let frame = WireFrame::new("s.wfm", SampleBuffer::zeros(2), 1e9);
        mock.write_raw(&frame.encode().unwrap()).await.unwrap();
        mock.write("SOUR2:QUE:FLUS").await.unwrap();
        mock.write("SOUR2:QUE:MODE CYCL").await.unwrap();
        mock.write("SOUR2:QUE:WAV \"s.wfm\",0,0,1,0").await.unwrap();
        mock.write("AWGC:RUN:IMM").await.unwrap();
        mock.write("OUTP2:STAT ON").await.unwrap();

        assert_eq!(mock.queue(2).slot.as_deref(), Some("s.wfm"));
        assert!(mock.queue(2).cyclic);
        assert_eq!(mock.playing(2), Some(frame));
        assert!(mock.is_running());
        assert!(mock.output_enabled(2));
        assert_eq!(mock.output_enable_count(2), 1);
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let mock = MockAwg::new();
        mock.fail_next("AWGC:STOP");
        assert!(mock.write("AWGC:STOP:IMM").await.is_err());
        assert!(mock.write("AWGC:STOP:IMM").await.is_ok());

        mock.fail_next(UPLOAD_COMMAND);
        let frame = WireFrame::new("x.wfm", SampleBuffer::zeros(2), 1e9);
        assert!(mock.write_raw(&frame.encode().unwrap()).await.is_err());
        assert_eq!(mock.upload_count(), 0);
    }

    #[tokio::test]
    async fn test_queries() {
        let mock = MockAwg::new();
        assert_eq!(mock.query("*IDN?").await.unwrap(), MOCK_IDN);
        assert_eq!(mock.query("*OPC?").await.unwrap(), "1");
        assert!(mock.query("SOUR1:VOLT?").await.is_err());

        mock.set_offline(true);
        assert!(mock.query("*OPC?").await.is_err());
    }
}
