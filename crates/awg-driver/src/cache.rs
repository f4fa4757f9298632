//! Content cache: what each channel last committed to hardware.
//!
//! An entry is written only after the upload that produced it succeeded, so
//! the cache never runs ahead of the instrument.

use crate::slots::SlotHandle;
use awg_core::SampleBuffer;
use std::collections::HashMap;

/// Last successfully committed content of one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentCacheEntry {
    /// Slot the content was uploaded to
    pub slot: SlotHandle,
    /// Content as uploaded
    pub buffer: SampleBuffer,
}

/// Per-channel record of committed content, keyed by channel number.
#[derive(Debug, Default)]
pub struct ContentCache {
    entries: HashMap<u8, ContentCacheEntry>,
}

impl ContentCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed entry of a channel.
    pub fn get(&self, channel: u8) -> Option<&ContentCacheEntry> {
        self.entries.get(&channel)
    }

    /// True when `candidate` matches the committed content within the
    /// waveform and marker tolerances, making a re-upload redundant.
    pub fn should_skip(&self, channel: u8, candidate: &SampleBuffer) -> bool {
        self.entries
            .get(&channel)
            .is_some_and(|entry| entry.buffer.approx_eq(candidate))
    }

    /// Record a successful commit.
    pub fn store(&mut self, channel: u8, slot: SlotHandle, buffer: SampleBuffer) {
        self.entries
            .insert(channel, ContentCacheEntry { slot, buffer });
    }

    /// Forget a channel, forcing its next commit to upload.
    pub fn invalidate(&mut self, channel: u8) -> Option<ContentCacheEntry> {
        self.entries.remove(&channel)
    }

    /// Forget every channel.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of channels with committed content.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no channel has committed content.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::SlotBank;
    use awg_core::MarkerTrack;

    fn slot() -> SlotHandle {
        SlotHandle::new(1, SlotBank::A)
    }

    #[test]
    fn test_empty_cache_never_skips() {
        let cache = ContentCache::new();
        assert!(!cache.should_skip(1, &SampleBuffer::zeros(10)));
    }

    #[test]
    fn test_skip_within_tolerance() {
        let mut cache = ContentCache::new();
        let base = SampleBuffer::fit(3, &[0.1, 0.2, 0.3], &[], &[]);
        cache.store(1, slot(), base.clone());

        assert!(cache.should_skip(1, &base));
        assert!(cache.should_skip(1, &base.with_samples(&[0.1, 0.2, 0.3 + 5e-7])));
        assert!(!cache.should_skip(1, &base.with_samples(&[0.1, 0.2, 0.31])));
        assert!(!cache.should_skip(2, &base));
    }

    #[test]
    fn test_marker_change_forces_upload() {
        let mut cache = ContentCache::new();
        let base = SampleBuffer::zeros(8);
        cache.store(1, slot(), base.clone());
        assert!(!cache.should_skip(1, &base.with_marker(MarkerTrack::Marker2, &[true])));
    }

    #[test]
    fn test_invalidate_and_clear() {
        let mut cache = ContentCache::new();
        cache.store(1, slot(), SampleBuffer::zeros(2));
        cache.store(2, SlotHandle::new(2, SlotBank::A), SampleBuffer::zeros(2));
        assert_eq!(cache.len(), 2);

        let removed = cache.invalidate(1).unwrap();
        assert_eq!(removed.slot, slot());
        assert!(cache.get(1).is_none());

        cache.clear();
        assert!(cache.is_empty());
    }
}
