//! Per-channel double buffering.
//!
//! Each channel owns up to two instrument memory slots. The *active* slot is
//! what the playback queue points at; the *staging* slot can be filled in the
//! background by `prepare_async`. Promoting staged content is a handle swap
//! followed by a requeue: no sample data moves.
//!
//! [`ChannelSlot::plan`] decides what a commit has to do. It is pure so the
//! decision table can be tested without an instrument.

use awg_core::SampleBuffer;
use serde::Serialize;
use std::fmt;

/// One of the two memory regions a channel can own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SlotBank {
    /// Slot name suffix `_a`
    A,
    /// Slot name suffix `_b`
    B,
}

impl SlotBank {
    fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

/// Opaque handle of a slot in instrument memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SlotHandle {
    channel: u8,
    bank: SlotBank,
}

impl SlotHandle {
    /// Handle of a channel's slot in the given bank.
    pub fn new(channel: u8, bank: SlotBank) -> Self {
        Self { channel, bank }
    }

    /// Owning channel.
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Bank the slot lives in.
    pub fn bank(&self) -> SlotBank {
        self.bank
    }

    /// Name of the slot on the instrument.
    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SlotHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bank = match self.bank {
            SlotBank::A => 'a',
            SlotBank::B => 'b',
        };
        write!(f, "awg_ch{}_{}.wfm", self.channel, bank)
    }
}

/// Playback state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChannelState {
    /// Nothing uploaded yet.
    Idle,
    /// Active slot holds the cached content, queue configured, running.
    Armed,
    /// Active slot holds the cached content but the queue is not known to be
    /// configured (a stop or requeue intervened).
    Stopped,
    /// An upload to the active slot failed; its content is unknown.
    Faulted,
}

/// Where the staging slot's content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StagedOrigin {
    /// Zero content written when the slot was reserved.
    Placeholder,
    /// Loaded by `prepare_async`.
    Prepared,
    /// Former active content after a swap.
    Retired,
}

/// What a commit has to do, decided before any I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPlan {
    /// Content already playing; only re-assert output enable.
    Skip,
    /// Content already in the active slot; requeue and restart.
    Restore,
    /// Staging slot holds exactly this content; swap handles and requeue.
    Swap,
    /// Upload into the active slot. `stale_staging` is set when a prepared
    /// staging buffer exists but no longer matches.
    Upload { stale_staging: bool },
}

/// Slot bookkeeping of one channel.
#[derive(Debug, Clone)]
pub struct ChannelSlot {
    channel: u8,
    active: Option<SlotHandle>,
    staging: Option<SlotHandle>,
    staged: Option<(SampleBuffer, StagedOrigin)>,
    state: ChannelState,
}

impl ChannelSlot {
    /// Idle channel owning no slots.
    pub fn new(channel: u8) -> Self {
        Self {
            channel,
            active: None,
            staging: None,
            staged: None,
            state: ChannelState::Idle,
        }
    }

    /// Owning channel.
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Slot the channel plays from.
    pub fn active(&self) -> Option<&SlotHandle> {
        self.active.as_ref()
    }

    /// Slot holding the next content, if allocated.
    pub fn staging(&self) -> Option<&SlotHandle> {
        self.staging.as_ref()
    }

    /// Known content of the staging slot.
    pub fn staged(&self) -> Option<&SampleBuffer> {
        self.staged.as_ref().map(|(buffer, _)| buffer)
    }

    /// How the staging content got there.
    pub fn staged_origin(&self) -> Option<StagedOrigin> {
        self.staged.as_ref().map(|(_, origin)| *origin)
    }

    /// Current playback state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Record a playback state change.
    pub fn set_state(&mut self, state: ChannelState) {
        self.state = state;
    }

    /// Downgrade `Armed` to `Stopped`; other states are kept.
    pub fn mark_stopped(&mut self) {
        if self.state == ChannelState::Armed {
            self.state = ChannelState::Stopped;
        }
    }

    /// Handles currently allocated, active first.
    pub fn handles(&self) -> Vec<SlotHandle> {
        self.active.iter().chain(self.staging.iter()).cloned().collect()
    }

    /// Decide how to apply `candidate`.
    ///
    /// `cache_hit` is the tolerance comparison against the content cache. The
    /// staging comparison here is exact.
    pub fn plan(&self, cache_hit: bool, candidate: &SampleBuffer) -> CommitPlan {
        if cache_hit {
            match self.state {
                ChannelState::Armed => return CommitPlan::Skip,
                ChannelState::Stopped => return CommitPlan::Restore,
                ChannelState::Idle | ChannelState::Faulted => {}
            }
        }
        match (&self.staging, &self.staged) {
            (Some(_), Some((staged, _))) if staged == candidate => CommitPlan::Swap,
            (Some(_), Some((_, StagedOrigin::Prepared))) => CommitPlan::Upload {
                stale_staging: true,
            },
            _ => CommitPlan::Upload {
                stale_staging: false,
            },
        }
    }

    /// Active handle, allocating one on first use.
    pub fn active_or_allocate(&mut self) -> SlotHandle {
        if let Some(handle) = &self.active {
            return handle.clone();
        }
        let bank = self
            .staging
            .as_ref()
            .map_or(SlotBank::A, |staging| staging.bank.other());
        let handle = SlotHandle::new(self.channel, bank);
        self.active = Some(handle.clone());
        handle
    }

    /// Staging handle, allocating one if needed. The flag is `true` when the
    /// handle is new and the slot does not exist on the instrument yet.
    pub fn staging_or_allocate(&mut self) -> (SlotHandle, bool) {
        if let Some(handle) = &self.staging {
            return (handle.clone(), false);
        }
        let bank = self
            .active
            .as_ref()
            .map_or(SlotBank::B, |active| active.bank.other());
        let handle = SlotHandle::new(self.channel, bank);
        self.staging = Some(handle.clone());
        (handle, true)
    }

    /// Drop the staging handle and whatever it was known to hold.
    pub fn release_staging(&mut self) -> Option<SlotHandle> {
        self.staged = None;
        self.staging.take()
    }

    /// Allocate the staging handle. Returns `None` if one already exists.
    pub fn allocate_staging(&mut self) -> Option<SlotHandle> {
        match self.staging_or_allocate() {
            (handle, true) => Some(handle),
            (_, false) => None,
        }
    }

    /// Record what the staging slot now holds (`None` = unknown).
    pub fn set_staged(&mut self, staged: Option<(SampleBuffer, StagedOrigin)>) {
        self.staged = staged;
    }

    /// Exchange active and staging roles.
    ///
    /// `retired` is the content of the slot leaving the active role, or
    /// `None` if it is not known. Returns the newly active handle.
    pub fn swap(&mut self, retired: Option<SampleBuffer>) -> Option<SlotHandle> {
        std::mem::swap(&mut self.active, &mut self.staging);
        self.staged = match (&self.staging, retired, self.state) {
            (Some(_), Some(buffer), state) if state != ChannelState::Faulted => {
                Some((buffer, StagedOrigin::Retired))
            }
            _ => None,
        };
        self.active.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(v: f32) -> SampleBuffer {
        SampleBuffer::fit(4, &[v; 4], &[], &[])
    }

    #[test]
    fn test_handle_names() {
        assert_eq!(SlotHandle::new(1, SlotBank::A).name(), "awg_ch1_a.wfm");
        assert_eq!(SlotHandle::new(3, SlotBank::B).to_string(), "awg_ch3_b.wfm");
    }

    #[test]
    fn test_idle_channel_plans_upload() {
        let slot = ChannelSlot::new(1);
        assert_eq!(
            slot.plan(false, &buf(1.0)),
            CommitPlan::Upload {
                stale_staging: false
            }
        );
    }

    #[test]
    fn test_cache_hit_depends_on_state() {
        let mut slot = ChannelSlot::new(1);
        slot.active_or_allocate();
        slot.set_state(ChannelState::Armed);
        assert_eq!(slot.plan(true, &buf(1.0)), CommitPlan::Skip);

        slot.mark_stopped();
        assert_eq!(slot.plan(true, &buf(1.0)), CommitPlan::Restore);

        slot.set_state(ChannelState::Faulted);
        assert!(matches!(
            slot.plan(true, &buf(1.0)),
            CommitPlan::Upload { .. }
        ));
    }

    #[test]
    fn test_prepared_content_swaps_exactly() {
        let mut slot = ChannelSlot::new(2);
        slot.allocate_staging();
        slot.set_staged(Some((buf(0.25), StagedOrigin::Prepared)));
        assert_eq!(slot.plan(false, &buf(0.25)), CommitPlan::Swap);

        // exact comparison: a difference far below the cache tolerance still
        // does not match
        let nearly = SampleBuffer::fit(4, &[0.25, 0.25, 0.25, 0.25 + 1e-7], &[], &[]);
        assert_eq!(
            slot.plan(false, &nearly),
            CommitPlan::Upload {
                stale_staging: true
            }
        );
    }

    #[test]
    fn test_retired_content_is_not_stale() {
        let mut slot = ChannelSlot::new(1);
        slot.allocate_staging();
        slot.set_staged(Some((buf(0.5), StagedOrigin::Retired)));
        assert_eq!(slot.plan(false, &buf(0.5)), CommitPlan::Swap);
        assert_eq!(
            slot.plan(false, &buf(0.7)),
            CommitPlan::Upload {
                stale_staging: false
            }
        );
    }

    #[test]
    fn test_banks_never_collide() {
        let mut slot = ChannelSlot::new(1);
        let staging = slot.allocate_staging().unwrap();
        let active = slot.active_or_allocate();
        assert_ne!(staging.bank(), active.bank());
        assert!(slot.allocate_staging().is_none());

        let mut slot = ChannelSlot::new(1);
        let active = slot.active_or_allocate();
        let staging = slot.allocate_staging().unwrap();
        assert_eq!(active.bank(), SlotBank::A);
        assert_eq!(staging.bank(), SlotBank::B);
    }

    #[test]
    fn test_released_staging_is_allocated_again() {
        let mut slot = ChannelSlot::new(1);
        let (first, allocated) = slot.staging_or_allocate();
        assert!(allocated);
        assert_eq!(slot.release_staging(), Some(first.clone()));
        assert!(slot.staging().is_none());

        let (again, allocated) = slot.staging_or_allocate();
        assert!(allocated);
        assert_eq!(again, first);
    }

    #[test]
    fn test_swap_exchanges_roles() {
        let mut slot = ChannelSlot::new(1);
        let a = slot.active_or_allocate();
        let b = slot.allocate_staging().unwrap();
        slot.set_staged(Some((buf(2.0), StagedOrigin::Prepared)));
        slot.set_state(ChannelState::Stopped);

        let promoted = slot.swap(Some(buf(1.0)));
        assert_eq!(promoted.as_ref(), Some(&b));
        assert_eq!(slot.active(), Some(&b));
        assert_eq!(slot.staging(), Some(&a));
        assert_eq!(slot.staged(), Some(&buf(1.0)));
        assert_eq!(slot.staged_origin(), Some(StagedOrigin::Retired));
    }

    #[test]
    fn test_swap_from_idle_leaves_no_staging() {
        let mut slot = ChannelSlot::new(1);
        let b = slot.allocate_staging().unwrap();
        slot.set_staged(Some((buf(2.0), StagedOrigin::Prepared)));

        slot.swap(None);
        assert_eq!(slot.active(), Some(&b));
        assert!(slot.staging().is_none());
        assert!(slot.staged().is_none());
    }

    #[test]
    fn test_swap_from_faulted_forgets_retired_content() {
        let mut slot = ChannelSlot::new(1);
        slot.active_or_allocate();
        slot.allocate_staging();
        slot.set_staged(Some((buf(2.0), StagedOrigin::Prepared)));
        slot.set_state(ChannelState::Faulted);

        slot.swap(Some(buf(1.0)));
        assert!(slot.staging().is_some());
        assert!(slot.staged().is_none());
    }
}
