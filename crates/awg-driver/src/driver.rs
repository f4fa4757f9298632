//! `AwgDriver`: the public face of the cache/swap engine.
//!
//! One driver owns one instrument connection. Its state (slot table, content
//! cache, trigger and marker settings) sits behind a single async mutex that
//! is held for the whole of every operation, so no two command sequences can
//! interleave on the wire.
//!
//! # Commit
//!
//! [`AwgDriver::commit`] applies a buffer to a channel and ends with the
//! channel either running the new content or stopped:
//!
//! - content already playing: re-enable output, nothing else
//! - content already in the active slot but not playing: requeue and run
//! - content already prepared in the staging slot: swap slot roles, requeue
//! - otherwise: upload into the active slot, requeue
//!
//! The content cache is written only after the hardware accepted the data.

use crate::cache::ContentCache;
use crate::commands::ScpiCommand;
use crate::mock::MockAwg;
use crate::scpi::ScpiClient;
use crate::slots::{ChannelSlot, ChannelState, CommitPlan, SlotHandle, StagedOrigin};
use crate::sync::{MarkerConfig, SyncController, TriggerConfig};
use awg_core::transport::TERMINATOR;
use awg_core::{
    fit_to_length, AwgConfig, AwgError, AwgResult, GroupConfig, InstrumentTransport, MarkerTrack,
    SampleBuffer, WireFrame,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// How a commit was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitOutcome {
    /// Content matched the cache; output re-enabled only.
    Skipped,
    /// Content was still in the active slot; queue rebuilt and restarted.
    Restored,
    /// Prepared staging content promoted without a transfer.
    Swapped,
    /// Content uploaded into the active slot.
    Uploaded,
    /// Uploaded while a prepared staging buffer with different content was
    /// waiting. The staging slot is left as it was.
    UploadedOverStaleStaging,
}

impl CommitOutcome {
    /// True if sample data crossed the wire.
    pub fn transferred(self) -> bool {
        matches!(self, Self::Uploaded | Self::UploadedOverStaleStaging)
    }
}

struct DriverState {
    group: GroupConfig,
    slots: Vec<ChannelSlot>,
    cache: ContentCache,
    sync: SyncController,
}

impl DriverState {
    fn new(channels: u8, group: GroupConfig) -> Self {
        Self {
            group,
            slots: (1..=channels).map(ChannelSlot::new).collect(),
            cache: ContentCache::new(),
            sync: SyncController::new(),
        }
    }

    /// Forget every slot handle and cached buffer. Trigger and marker
    /// settings are kept.
    fn reset_content(&mut self) {
        for slot in &mut self.slots {
            *slot = ChannelSlot::new(slot.channel());
        }
        self.cache.clear();
    }

    fn slot_mut(&mut self, channel: u8) -> &mut ChannelSlot {
        &mut self.slots[usize::from(channel - 1)]
    }

    fn slot(&self, channel: u8) -> &ChannelSlot {
        &self.slots[usize::from(channel - 1)]
    }

    /// Committed content, or zeros if the channel has none.
    fn base_buffer(&self, channel: u8) -> SampleBuffer {
        self.cache
            .get(channel)
            .map(|entry| entry.buffer.clone())
            .unwrap_or_else(|| SampleBuffer::zeros(self.group.nop))
    }
}

/// Waveform cache and double-buffered upload engine for one AWG.
pub struct AwgDriver {
    transport: Arc<dyn InstrumentTransport>,
    channels: u8,
    invert_marker1: Vec<u8>,
    state: Mutex<DriverState>,
}

impl AwgDriver {
    /// Build a driver on top of an existing transport.
    pub fn new(transport: Arc<dyn InstrumentTransport>, config: &AwgConfig) -> AwgResult<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            channels: config.channels,
            invert_marker1: config.invert_marker1.clone(),
            state: Mutex::new(DriverState::new(config.channels, config.group())),
        })
    }

    /// Connect as configured: the mock instrument when `mock` is set,
    /// otherwise a TCP SCPI session to `host:port`.
    pub async fn from_config(config: &AwgConfig) -> AwgResult<Self> {
        config.validate()?;
        let transport: Arc<dyn InstrumentTransport> = if config.mock {
            info!("Using mock AWG ({} channels)", config.channels);
            Arc::new(MockAwg::new())
        } else {
            let mut client = ScpiClient::connect(&config.host, config.port)
                .await
                .map_err(|e| AwgError::transport("connect", e))?;
            client.set_timeout(Duration::from_millis(config.timeout_ms));
            Arc::new(client)
        };
        Self::new(transport, config)
    }

    /// Number of channels, numbered from 1.
    pub fn channel_count(&self) -> u8 {
        self.channels
    }

    /// Current point count and clock.
    pub async fn group(&self) -> GroupConfig {
        self.state.lock().await.group
    }

    fn check_channel(&self, channel: u8) -> AwgResult<()> {
        if channel == 0 || channel > self.channels {
            return Err(AwgError::InvalidChannel {
                channel,
                count: self.channels,
            });
        }
        Ok(())
    }

    async fn send(&self, command: &ScpiCommand) -> AwgResult<()> {
        let line = command.to_string();
        debug!("AWG write: {}", line);
        self.transport
            .write(&line)
            .await
            .map_err(|e| AwgError::transport(line, e))
    }

    async fn send_all(&self, commands: &[ScpiCommand]) -> AwgResult<()> {
        for command in commands {
            self.send(command).await?;
        }
        Ok(())
    }

    /// Write `buffer` into `slot` and wait for the instrument to finish.
    async fn upload(&self, slot: &SlotHandle, buffer: &SampleBuffer, clock: f64) -> AwgResult<()> {
        let frame = WireFrame::new(slot.name(), buffer.clone(), clock);
        let mut bytes = frame.encode()?;
        bytes.extend_from_slice(TERMINATOR.as_bytes());
        info!("Uploading {} ({} points, {} bytes)", slot, buffer.len(), bytes.len());

        let operation = format!("upload {}", slot);
        self.transport
            .write_raw(&bytes)
            .await
            .map_err(|e| AwgError::transport(operation.clone(), e))?;

        let command = ScpiCommand::OperationComplete.to_string();
        let reply = self
            .transport
            .query(&command)
            .await
            .map_err(|e| AwgError::transport(operation, e))?;
        if reply.trim() != "1" {
            return Err(AwgError::UnexpectedReply { command, reply });
        }
        Ok(())
    }

    async fn start_output(&self, channel: u8) -> AwgResult<()> {
        self.send_all(&[
            ScpiCommand::Run,
            ScpiCommand::Output {
                channel,
                enabled: true,
            },
        ])
        .await
    }

    /// Apply `buffer` to `channel`. Inputs are padded or truncated to the
    /// group's `nop` after the track lengths are checked.
    pub async fn commit(&self, channel: u8, buffer: SampleBuffer) -> AwgResult<CommitOutcome> {
        self.check_channel(channel)?;
        buffer.validate()?;
        let mut state = self.state.lock().await;
        let nop = state.group.nop;
        let candidate = SampleBuffer::fit(nop, buffer.samples(), buffer.marker1(), buffer.marker2());
        self.commit_locked(&mut state, channel, candidate, false)
            .await
    }

    async fn commit_locked(
        &self,
        state: &mut DriverState,
        channel: u8,
        candidate: SampleBuffer,
        force_upload: bool,
    ) -> AwgResult<CommitOutcome> {
        let plan = if force_upload {
            CommitPlan::Upload {
                stale_staging: false,
            }
        } else {
            let cache_hit = state.cache.should_skip(channel, &candidate);
            state.slot(channel).plan(cache_hit, &candidate)
        };
        debug!("Channel {} commit plan: {:?}", channel, plan);

        let mut paused = Vec::new();
        let outcome = match plan {
            CommitPlan::Skip => {
                self.send(&ScpiCommand::Output {
                    channel,
                    enabled: true,
                })
                .await?;
                return Ok(CommitOutcome::Skipped);
            }
            CommitPlan::Restore => {
                paused = self.halt(state).await?;
                match state.slot(channel).active().cloned() {
                    Some(active) => {
                        let sequence = state.sync.requeue_sequence(channel, &active);
                        self.send_all(&sequence).await?;
                        CommitOutcome::Restored
                    }
                    None => self.upload_active(state, channel, &candidate, false).await?,
                }
            }
            CommitPlan::Swap => {
                paused = self.halt(state).await?;
                match state.slot(channel).staging().cloned() {
                    Some(staging) => {
                        self.swap_in(state, channel, &staging, candidate).await?;
                        CommitOutcome::Swapped
                    }
                    None => self.upload_active(state, channel, &candidate, false).await?,
                }
            }
            CommitPlan::Upload { stale_staging } => {
                paused = self.halt(state).await?;
                self.upload_active(state, channel, &candidate, stale_staging)
                    .await?
            }
        };

        self.start_output(channel).await?;
        state.slot_mut(channel).set_state(ChannelState::Armed);
        // the group run restarts the untouched queues of the other channels
        for other in paused {
            let slot = state.slot_mut(other);
            if slot.state() == ChannelState::Stopped {
                slot.set_state(ChannelState::Armed);
            }
        }
        Ok(outcome)
    }

    /// Stop the group before any slot state changes. The stop is group-wide,
    /// so every armed channel becomes stopped; their numbers are returned.
    async fn halt(&self, state: &mut DriverState) -> AwgResult<Vec<u8>> {
        let paused: Vec<u8> = state
            .slots
            .iter()
            .filter(|slot| slot.state() == ChannelState::Armed)
            .map(ChannelSlot::channel)
            .collect();
        state.slots.iter_mut().for_each(ChannelSlot::mark_stopped);
        self.send(&ScpiCommand::Stop).await?;
        Ok(paused)
    }

    /// Queue the staging slot, then exchange slot roles.
    async fn swap_in(
        &self,
        state: &mut DriverState,
        channel: u8,
        staging: &SlotHandle,
        candidate: SampleBuffer,
    ) -> AwgResult<()> {
        let sequence = state.sync.requeue_sequence(channel, staging);
        self.send_all(&sequence).await?;

        let slot = state.slot(channel);
        let retired = state
            .cache
            .get(channel)
            .filter(|entry| Some(&entry.slot) == slot.active())
            .map(|entry| entry.buffer.clone());
        let slot = state.slot_mut(channel);
        let promoted = slot.swap(retired);
        slot.set_state(ChannelState::Stopped);
        if let Some(active) = promoted {
            state.cache.store(channel, active, candidate);
        }
        info!("Channel {} swapped to {}", channel, staging);
        Ok(())
    }

    /// Upload into the active slot, then requeue it.
    async fn upload_active(
        &self,
        state: &mut DriverState,
        channel: u8,
        candidate: &SampleBuffer,
        stale_staging: bool,
    ) -> AwgResult<CommitOutcome> {
        if stale_staging {
            warn!(
                "Channel {}: prepared staging content does not match commit, uploading directly",
                channel
            );
        }

        let clock = state.group.clock;
        let active = state.slot_mut(channel).active_or_allocate();
        if let Err(e) = self.upload(&active, candidate, clock).await {
            warn!("Channel {}: upload to {} failed, channel faulted", channel, active);
            state.slot_mut(channel).set_state(ChannelState::Faulted);
            return Err(e);
        }
        state.cache.store(channel, active.clone(), candidate.clone());
        state.slot_mut(channel).set_state(ChannelState::Stopped);

        let sequence = state.sync.requeue_sequence(channel, &active);
        self.send_all(&sequence).await?;

        Ok(if stale_staging {
            CommitOutcome::UploadedOverStaleStaging
        } else {
            CommitOutcome::Uploaded
        })
    }

    /// Load `buffer` into the channel's staging slot without touching
    /// playback. The first call on a channel reserves the slot with zeros.
    pub async fn prepare_async(&self, channel: u8, buffer: SampleBuffer) -> AwgResult<()> {
        self.check_channel(channel)?;
        buffer.validate()?;
        let mut state = self.state.lock().await;
        let group = state.group;
        let buffer = SampleBuffer::fit(
            group.nop,
            buffer.samples(),
            buffer.marker1(),
            buffer.marker2(),
        );

        let (staging, allocated) = state.slot_mut(channel).staging_or_allocate();
        if allocated {
            let placeholder = SampleBuffer::zeros(group.nop);
            if let Err(e) = self.upload(&staging, &placeholder, group.clock).await {
                state.slot_mut(channel).release_staging();
                return Err(e);
            }
            state
                .slot_mut(channel)
                .set_staged(Some((placeholder, StagedOrigin::Placeholder)));
        }

        state.slot_mut(channel).set_staged(None);
        self.upload(&staging, &buffer, group.clock).await?;
        state
            .slot_mut(channel)
            .set_staged(Some((buffer, StagedOrigin::Prepared)));
        info!("Channel {} staged content in {}", channel, staging);
        Ok(())
    }

    /// Replace the analog track, keeping the committed markers.
    pub async fn set_waveform(&self, channel: u8, samples: &[f32]) -> AwgResult<CommitOutcome> {
        self.check_channel(channel)?;
        let mut state = self.state.lock().await;
        let candidate = state.base_buffer(channel).with_samples(samples);
        self.commit_locked(&mut state, channel, candidate, false)
            .await
    }

    /// Replace marker 1, keeping the committed samples and marker 2.
    pub async fn set_digital(&self, channel: u8, bits: &[bool]) -> AwgResult<CommitOutcome> {
        self.set_digital_track(channel, MarkerTrack::Marker1, bits)
            .await
    }

    /// Replace one marker track. Marker 1 of channels listed in
    /// `invert_marker1` is inverted before upload.
    pub async fn set_digital_track(
        &self,
        channel: u8,
        track: MarkerTrack,
        bits: &[bool],
    ) -> AwgResult<CommitOutcome> {
        self.check_channel(channel)?;
        let mut state = self.state.lock().await;
        let mut fitted = fit_to_length(bits, state.group.nop);
        if self.inverts(channel, track) {
            fitted.iter_mut().for_each(|bit| *bit = !*bit);
        }
        let candidate = state.base_buffer(channel).with_marker(track, &fitted);
        self.commit_locked(&mut state, channel, candidate, false)
            .await
    }

    fn inverts(&self, channel: u8, track: MarkerTrack) -> bool {
        track == MarkerTrack::Marker1 && self.invert_marker1.contains(&channel)
    }

    /// Store the marker timing and, if the channel has a queue, rebuild it.
    pub async fn set_marker_config(&self, channel: u8, config: MarkerConfig) -> AwgResult<()> {
        self.check_channel(channel)?;
        let mut state = self.state.lock().await;
        state.sync.set_marker(channel, config);
        self.requeue_in_place(&mut state, channel).await
    }

    /// Store the trigger settings and, if the channel has a queue, rebuild it.
    pub async fn set_trigger_config(&self, channel: u8, config: TriggerConfig) -> AwgResult<()> {
        self.check_channel(channel)?;
        let mut state = self.state.lock().await;
        state.sync.set_trigger(channel, config);
        self.requeue_in_place(&mut state, channel).await
    }

    /// Flush and requeue the active slot without stopping the group.
    async fn requeue_in_place(&self, state: &mut DriverState, channel: u8) -> AwgResult<()> {
        let slot = state.slot(channel);
        let active = match (slot.state(), slot.active()) {
            (ChannelState::Armed | ChannelState::Stopped, Some(active)) => active.clone(),
            _ => return Ok(()),
        };
        let sequence = state.sync.requeue_sequence(channel, &active);
        if let Err(e) = self.send_all(&sequence).await {
            state.slot_mut(channel).mark_stopped();
            return Err(e);
        }
        Ok(())
    }

    /// Stored marker settings of a channel.
    pub async fn marker_config(&self, channel: u8) -> AwgResult<Option<MarkerConfig>> {
        self.check_channel(channel)?;
        Ok(self.state.lock().await.sync.marker(channel))
    }

    /// Stored trigger settings of a channel.
    pub async fn trigger_config(&self, channel: u8) -> AwgResult<TriggerConfig> {
        self.check_channel(channel)?;
        Ok(self.state.lock().await.sync.trigger(channel))
    }

    /// Silence the channel and drop its slots and cached content.
    pub async fn clear(&self, channel: u8) -> AwgResult<()> {
        self.check_channel(channel)?;
        let mut state = self.state.lock().await;
        self.clear_locked(&mut state, channel).await
    }

    async fn clear_locked(&self, state: &mut DriverState, channel: u8) -> AwgResult<()> {
        let handles = state.slot(channel).handles();
        *state.slot_mut(channel) = ChannelSlot::new(channel);
        state.cache.invalidate(channel);

        let mut commands = vec![
            ScpiCommand::Output {
                channel,
                enabled: false,
            },
            ScpiCommand::QueueFlush { channel },
            ScpiCommand::AssignEmpty { channel },
        ];
        commands.extend(
            handles
                .iter()
                .map(|handle| ScpiCommand::DeleteSlot { name: handle.name() }),
        );
        self.send_all(&commands).await?;
        info!("Channel {} cleared", channel);
        Ok(())
    }

    /// `clear` every channel, stopping at the first failure.
    pub async fn clear_all(&self) -> AwgResult<()> {
        let mut state = self.state.lock().await;
        for channel in 1..=self.channels {
            self.clear_locked(&mut state, channel).await?;
        }
        Ok(())
    }

    /// Upload the cached content of `channel` again, even if it looks
    /// current. Returns `false` when nothing is cached.
    pub async fn resend(&self, channel: u8) -> AwgResult<bool> {
        self.check_channel(channel)?;
        let mut state = self.state.lock().await;
        let buffer = match state.cache.get(channel) {
            Some(entry) => entry.buffer.clone(),
            None => return Ok(false),
        };
        self.commit_locked(&mut state, channel, buffer, true).await?;
        Ok(true)
    }

    /// Apply new group settings. A different `nop` invalidates every slot
    /// and cached buffer and deletes all waveforms on the instrument.
    pub async fn reconfigure(&self, group: GroupConfig) -> AwgResult<()> {
        group.validate()?;
        let mut state = self.state.lock().await;
        let previous = state.group;
        state.group = group;
        if previous.nop != group.nop {
            info!("nop changed {} -> {}, resetting all channels", previous.nop, group.nop);
            state.reset_content();
            self.send_all(&[ScpiCommand::Stop, ScpiCommand::DeleteAll])
                .await?;
        }
        Ok(())
    }

    /// `*RST` the instrument and forget all uploaded content.
    pub async fn reset(&self) -> AwgResult<()> {
        let mut state = self.state.lock().await;
        state.reset_content();
        self.send(&ScpiCommand::Reset).await?;
        info!("AWG reset");
        Ok(())
    }

    /// Instrument identification string.
    pub async fn identify(&self) -> AwgResult<String> {
        let _state = self.state.lock().await;
        let command = ScpiCommand::Identify.to_string();
        self.transport
            .query(&command)
            .await
            .map_err(|e| AwgError::transport(command, e))
    }

    /// Start the group without touching any queue.
    pub async fn run(&self) -> AwgResult<()> {
        let _state = self.state.lock().await;
        self.send(&ScpiCommand::Run).await
    }

    /// Stop the group. Armed channels become stopped.
    pub async fn stop(&self) -> AwgResult<()> {
        let mut state = self.state.lock().await;
        state.slots.iter_mut().for_each(ChannelSlot::mark_stopped);
        self.send(&ScpiCommand::Stop).await
    }

    /// Committed analog samples.
    pub async fn waveform(&self, channel: u8) -> AwgResult<Option<Vec<f32>>> {
        self.check_channel(channel)?;
        let state = self.state.lock().await;
        Ok(state
            .cache
            .get(channel)
            .map(|entry| entry.buffer.samples().to_vec()))
    }

    /// Committed marker bits as the caller set them (before inversion).
    pub async fn digital(&self, channel: u8, track: MarkerTrack) -> AwgResult<Option<Vec<bool>>> {
        self.check_channel(channel)?;
        let state = self.state.lock().await;
        let invert = self.inverts(channel, track);
        Ok(state.cache.get(channel).map(|entry| {
            entry
                .buffer
                .marker(track)
                .iter()
                .map(|bit| *bit != invert)
                .collect()
        }))
    }

    /// Committed buffer exactly as uploaded.
    pub async fn committed(&self, channel: u8) -> AwgResult<Option<SampleBuffer>> {
        self.check_channel(channel)?;
        let state = self.state.lock().await;
        Ok(state.cache.get(channel).map(|entry| entry.buffer.clone()))
    }

    /// Playback state of a channel.
    pub async fn channel_state(&self, channel: u8) -> AwgResult<ChannelState> {
        self.check_channel(channel)?;
        Ok(self.state.lock().await.slot(channel).state())
    }

    /// Content known to be in the staging slot, if any.
    pub async fn staged(&self, channel: u8) -> AwgResult<Option<SampleBuffer>> {
        self.check_channel(channel)?;
        Ok(self.state.lock().await.slot(channel).staged().cloned())
    }

    /// Slot currently queued for playback.
    pub async fn active_slot(&self, channel: u8) -> AwgResult<Option<SlotHandle>> {
        self.check_channel(channel)?;
        Ok(self.state.lock().await.slot(channel).active().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(channels: u8, nop: usize) -> (AwgDriver, Arc<MockAwg>) {
        let mock = Arc::new(MockAwg::new());
        let config = AwgConfig::mock(channels, nop, 1e9);
        let driver = AwgDriver::new(mock.clone(), &config).unwrap();
        (driver, mock)
    }

    #[tokio::test]
    async fn test_invalid_channel_rejected() {
        let (driver, mock) = driver(2, 4);
        for channel in [0, 3] {
            let err = driver
                .commit(channel, SampleBuffer::zeros(4))
                .await
                .unwrap_err();
            assert!(matches!(err, AwgError::InvalidChannel { count: 2, .. }));
        }
        assert!(mock.events().is_empty());
    }

    #[tokio::test]
    async fn test_length_mismatch_sends_nothing() {
        let (driver, mock) = driver(1, 4);
        let bad = SampleBuffer::from_parts(vec![0.0; 4], vec![false; 3], vec![false; 4]);
        let err = driver.commit(1, bad).await.unwrap_err();
        assert!(matches!(err, AwgError::LengthMismatch { .. }));
        assert!(mock.events().is_empty());
    }

    #[tokio::test]
    async fn test_first_commit_uploads_and_arms() {
        let (driver, mock) = driver(1, 4);
        let outcome = driver
            .commit(1, SampleBuffer::fit(4, &[0.5; 4], &[], &[]))
            .await
            .unwrap();

        assert_eq!(outcome, CommitOutcome::Uploaded);
        assert_eq!(driver.channel_state(1).await.unwrap(), ChannelState::Armed);
        assert_eq!(mock.uploads(), vec!["awg_ch1_a.wfm"]);
        assert!(mock.is_running());
        assert!(mock.output_enabled(1));
        assert_eq!(mock.playing(1).unwrap().buffer.samples(), &[0.5; 4]);
    }

    #[tokio::test]
    async fn test_stopped_channel_restores_without_upload() {
        let (driver, mock) = driver(1, 4);
        let buffer = SampleBuffer::fit(4, &[0.1, 0.2], &[], &[]);
        driver.commit(1, buffer.clone()).await.unwrap();
        driver.stop().await.unwrap();
        assert_eq!(driver.channel_state(1).await.unwrap(), ChannelState::Stopped);

        let outcome = driver.commit(1, buffer).await.unwrap();
        assert_eq!(outcome, CommitOutcome::Restored);
        assert_eq!(mock.upload_count(), 1);
        assert!(mock.is_running());
    }

    #[tokio::test]
    async fn test_marker1_inversion() {
        let mock = Arc::new(MockAwg::new());
        let mut config = AwgConfig::mock(2, 4, 1e9);
        config.invert_marker1 = vec![1];
        let driver = AwgDriver::new(mock.clone(), &config).unwrap();

        driver.set_digital(1, &[true, false]).await.unwrap();
        let uploaded = mock.file("awg_ch1_a.wfm").unwrap();
        assert_eq!(uploaded.buffer.marker1(), &[false, true, true, true]);
        assert_eq!(
            driver.digital(1, MarkerTrack::Marker1).await.unwrap().unwrap(),
            vec![true, false, false, false]
        );

        driver.set_digital(2, &[true, false]).await.unwrap();
        let uploaded = mock.file("awg_ch2_a.wfm").unwrap();
        assert_eq!(uploaded.buffer.marker1(), &[true, false, false, false]);
    }

    #[tokio::test]
    async fn test_waveform_and_markers_combine() {
        let (driver, mock) = driver(1, 3);
        driver.set_waveform(1, &[0.3, 0.2, 0.1]).await.unwrap();
        driver
            .set_digital_track(1, MarkerTrack::Marker2, &[false, true])
            .await
            .unwrap();

        let frame = mock.playing(1).unwrap();
        assert_eq!(frame.buffer.samples(), &[0.3, 0.2, 0.1]);
        assert_eq!(frame.buffer.marker2(), &[false, true, false]);
        assert_eq!(
            driver.waveform(1).await.unwrap(),
            Some(vec![0.3, 0.2, 0.1])
        );
    }

    #[tokio::test]
    async fn test_resend_forces_upload() {
        let (driver, mock) = driver(1, 2);
        assert!(!driver.resend(1).await.unwrap());

        driver.set_waveform(1, &[1.0, -1.0]).await.unwrap();
        assert!(driver.resend(1).await.unwrap());
        assert_eq!(mock.upload_count(), 2);
    }

    #[tokio::test]
    async fn test_unexpected_completion_reply_faults_channel() {
        struct Busy;

        #[async_trait::async_trait]
        impl InstrumentTransport for Busy {
            async fn write_raw(&self, _bytes: &[u8]) -> anyhow::Result<()> {
                Ok(())
            }

            async fn query(&self, _command: &str) -> anyhow::Result<String> {
                Ok("0".to_string())
            }
        }

        let config = AwgConfig::mock(1, 2, 1e9);
        let driver = AwgDriver::new(Arc::new(Busy), &config).unwrap();
        let err = driver
            .set_waveform(1, &[0.5, 0.5])
            .await
            .unwrap_err();
        assert!(matches!(err, AwgError::UnexpectedReply { .. }));
        assert_eq!(driver.channel_state(1).await.unwrap(), ChannelState::Faulted);
        assert!(driver.waveform(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_identify_and_reset() {
        let (driver, mock) = driver(1, 2);
        assert_eq!(driver.identify().await.unwrap(), crate::mock::MOCK_IDN);

        driver.set_waveform(1, &[0.5]).await.unwrap();
        driver.reset().await.unwrap();
        assert_eq!(driver.channel_state(1).await.unwrap(), ChannelState::Idle);
        assert!(mock.file_names().is_empty());
        assert!(driver.active_slot(1).await.unwrap().is_none());
    }
}
