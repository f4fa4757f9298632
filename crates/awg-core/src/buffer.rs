//! Fixed-length sample buffers.
//!
//! A [`SampleBuffer`] holds one analog track and two digital marker tracks
//! for a single output channel. Buffers built through [`SampleBuffer::fit`]
//! or the `with_*` helpers always have all three tracks at the group's
//! `nop`: short input is zero-padded at the tail, long input is truncated.

use crate::error::{AwgError, AwgResult};
use serde::{Deserialize, Serialize};

/// Absolute-difference budget under which two analog tracks are "the same".
pub const WAVEFORM_TOLERANCE: f64 = 1e-6;

/// Absolute-difference budget under which two marker tracks are "the same".
///
/// Markers are binary, so any single flipped bit exceeds this.
// Not the same as WAVEFORM_TOLERANCE. Keep both values as they are.
pub const MARKER_TOLERANCE: f64 = 0.5;

/// Selects one of the two digital tracks of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerTrack {
    /// First marker output, the one that can be inverted per channel.
    Marker1,
    /// Second marker output.
    Marker2,
}

impl MarkerTrack {
    /// Bit position of this track in the packed wire byte.
    pub fn bit(self) -> u8 {
        match self {
            Self::Marker1 => 0,
            Self::Marker2 => 1,
        }
    }
}

/// Analog samples plus two marker tracks of identical length.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SampleBuffer {
    samples: Vec<f32>,
    marker1: Vec<bool>,
    marker2: Vec<bool>,
}

impl SampleBuffer {
    /// All-zero buffer of `nop` points, markers low.
    pub fn zeros(nop: usize) -> Self {
        Self {
            samples: vec![0.0; nop],
            marker1: vec![false; nop],
            marker2: vec![false; nop],
        }
    }

    /// Pad or truncate each track to `nop` points.
    pub fn fit(nop: usize, samples: &[f32], marker1: &[bool], marker2: &[bool]) -> Self {
        Self {
            samples: fit_to_length(samples, nop),
            marker1: fit_to_length(marker1, nop),
            marker2: fit_to_length(marker2, nop),
        }
    }

    /// Take the tracks as given, without padding.
    ///
    /// Lengths are checked by [`SampleBuffer::validate`], which the frame
    /// encoder calls before producing any bytes.
    pub fn from_parts(samples: Vec<f32>, marker1: Vec<bool>, marker2: Vec<bool>) -> Self {
        Self {
            samples,
            marker1,
            marker2,
        }
    }

    /// Copy of `self` with the analog track replaced by `samples` fitted to
    /// this buffer's length.
    pub fn with_samples(&self, samples: &[f32]) -> Self {
        Self {
            samples: fit_to_length(samples, self.len()),
            marker1: self.marker1.clone(),
            marker2: self.marker2.clone(),
        }
    }

    /// Copy of `self` with one marker track replaced by `bits` fitted to
    /// this buffer's length.
    pub fn with_marker(&self, track: MarkerTrack, bits: &[bool]) -> Self {
        let mut next = self.clone();
        let fitted = fit_to_length(bits, self.len());
        match track {
            MarkerTrack::Marker1 => next.marker1 = fitted,
            MarkerTrack::Marker2 => next.marker2 = fitted,
        }
        next
    }

    /// Number of points, taken from the analog track.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True for a zero-length buffer.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Analog track.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Marker 1 bits, one per sample.
    pub fn marker1(&self) -> &[bool] {
        &self.marker1
    }

    /// Marker 2 bits, one per sample.
    pub fn marker2(&self) -> &[bool] {
        &self.marker2
    }

    /// Bits of the selected marker track.
    pub fn marker(&self, track: MarkerTrack) -> &[bool] {
        match track {
            MarkerTrack::Marker1 => &self.marker1,
            MarkerTrack::Marker2 => &self.marker2,
        }
    }

    /// Check that the three tracks have the same length.
    pub fn validate(&self) -> AwgResult<()> {
        if self.marker1.len() != self.samples.len() || self.marker2.len() != self.samples.len() {
            return Err(AwgError::LengthMismatch {
                samples: self.samples.len(),
                marker1: self.marker1.len(),
                marker2: self.marker2.len(),
            });
        }
        Ok(())
    }

    /// Packed marker byte for point `index`: bit 0 = marker 1, bit 1 = marker 2.
    pub fn marker_byte(&self, index: usize) -> u8 {
        u8::from(self.marker1[index]) | (u8::from(self.marker2[index]) << 1)
    }

    /// Tolerance comparison used to decide whether a re-upload is needed.
    ///
    /// The analog tracks match when the summed absolute difference is below
    /// [`WAVEFORM_TOLERANCE`]; each marker track matches when its summed
    /// difference is below [`MARKER_TOLERANCE`]. Buffers of different length
    /// never match.
    pub fn approx_eq(&self, other: &SampleBuffer) -> bool {
        if self.len() != other.len()
            || self.marker1.len() != other.marker1.len()
            || self.marker2.len() != other.marker2.len()
        {
            return false;
        }
        let analog: f64 = self
            .samples
            .iter()
            .zip(&other.samples)
            .map(|(a, b)| (f64::from(*a) - f64::from(*b)).abs())
            .sum();
        analog < WAVEFORM_TOLERANCE
            && marker_distance(&self.marker1, &other.marker1) < MARKER_TOLERANCE
            && marker_distance(&self.marker2, &other.marker2) < MARKER_TOLERANCE
    }
}

fn marker_distance(a: &[bool], b: &[bool]) -> f64 {
    a.iter().zip(b).filter(|(x, y)| x != y).count() as f64
}

/// Copy `input` into a vector of exactly `len` elements.
///
/// Elements are placed from index 0; a short input is padded with
/// `T::default()` at the tail, a long one is cut after `len` elements.
pub fn fit_to_length<T: Copy + Default>(input: &[T], len: usize) -> Vec<T> {
    let mut out = vec![T::default(); len];
    let n = input.len().min(len);
    out[..n].copy_from_slice(&input[..n]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_input_is_zero_padded_at_tail() {
        let buf = SampleBuffer::fit(5, &[0.5, -0.5], &[true], &[]);
        assert_eq!(buf.samples(), &[0.5, -0.5, 0.0, 0.0, 0.0]);
        assert_eq!(buf.marker1(), &[true, false, false, false, false]);
        assert_eq!(buf.marker2(), &[false; 5]);
        assert!(buf.validate().is_ok());
    }

    #[test]
    fn test_long_input_is_truncated() {
        let samples: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let buf = SampleBuffer::fit(4, &samples, &[true; 10], &[false; 10]);
        assert_eq!(buf.samples(), &[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(buf.marker1().len(), 4);
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_with_samples_keeps_markers() {
        let base = SampleBuffer::fit(3, &[], &[true, false, true], &[false, true, false]);
        let next = base.with_samples(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(next.samples(), &[1.0, 2.0, 3.0]);
        assert_eq!(next.marker1(), base.marker1());
        assert_eq!(next.marker2(), base.marker2());
    }

    #[test]
    fn test_with_marker_replaces_one_track() {
        let base = SampleBuffer::zeros(4);
        let next = base.with_marker(MarkerTrack::Marker2, &[true, true]);
        assert_eq!(next.marker2(), &[true, true, false, false]);
        assert_eq!(next.marker1(), &[false; 4]);
    }

    #[test]
    fn test_validate_reports_mismatch() {
        let buf = SampleBuffer::from_parts(vec![0.0; 3], vec![false; 2], vec![false; 3]);
        match buf.validate() {
            Err(AwgError::LengthMismatch {
                samples,
                marker1,
                marker2,
            }) => assert_eq!((samples, marker1, marker2), (3, 2, 3)),
            other => panic!("expected LengthMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_marker_byte_packing() {
        let buf = SampleBuffer::fit(4, &[], &[false, true, false, true], &[false, false, true, true]);
        let bytes: Vec<u8> = (0..4).map(|i| buf.marker_byte(i)).collect();
        assert_eq!(bytes, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_approx_eq_waveform_tolerance() {
        let a = SampleBuffer::fit(4, &[0.1, 0.2, 0.3, 0.4], &[], &[]);
        let nearly = SampleBuffer::fit(4, &[0.1, 0.2, 0.3, 0.4 + 1e-7], &[], &[]);
        let different = SampleBuffer::fit(4, &[0.1, 0.2, 0.3, 0.4 + 1e-4], &[], &[]);
        assert!(a.approx_eq(&nearly));
        assert!(!a.approx_eq(&different));
    }

    #[test]
    fn test_approx_eq_single_marker_flip_differs() {
        let a = SampleBuffer::zeros(100);
        let b = a.with_marker(MarkerTrack::Marker1, &[true]);
        assert!(!a.approx_eq(&b));
        assert!(a.approx_eq(&a.clone()));
    }

    #[test]
    fn test_approx_eq_length_differs() {
        assert!(!SampleBuffer::zeros(3).approx_eq(&SampleBuffer::zeros(4)));
    }
}
