/*
    fluxvault
    https://github.com/dbalsom/fluxvault

    Copyright 2024 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    src/flux/buffer.rs

    A buffer of flux transition times at a fixed sample clock.
*/

//! A [FluxBuffer] is the unit of exchange between capture hardware, flux containers and the
//! [crate::track_reader::TrackReader]. Transitions are stored as absolute sample counts from the
//! start of the capture; the gaps between them are recovered with [FluxBuffer::deltas].
//!
//! A single buffer may hold several revolutions of a track. Revolutions are delimited by the list
//! of index pulse positions, each of which is an offset into the transition list.

use crate::{format_us, DiskImageError};
use std::ops::Range;

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FluxBuffer {
    sample_clock: f64,
    transitions: Vec<u32>,
    index: Vec<usize>,
}

impl FluxBuffer {
    /// Create an empty buffer with room for `capacity` transitions at the given sample clock (Hz).
    pub fn new(capacity: usize, sample_clock: f64) -> Result<Self, DiskImageError> {
        if !sample_clock.is_finite() || sample_clock < 1.0 {
            return Err(DiskImageError::parameter(format!(
                "FluxBuffer::new(): invalid sample clock {}",
                sample_clock
            )));
        }
        let mut transitions = Vec::new();
        transitions
            .try_reserve_exact(capacity)
            .map_err(|e| DiskImageError::ResourceExhausted(e.to_string()))?;
        Ok(FluxBuffer {
            sample_clock,
            transitions,
            index: Vec::new(),
        })
    }

    /// Build a buffer from absolute sample times. Times must be strictly increasing.
    pub fn from_samples(sample_clock: f64, samples: Vec<u32>, index: Vec<usize>) -> Result<Self, DiskImageError> {
        let mut buffer = FluxBuffer::new(0, sample_clock)?;
        if samples.windows(2).any(|w| w[1] <= w[0]) {
            return Err(DiskImageError::parameter("Flux sample times are not strictly increasing"));
        }
        if index.iter().any(|&i| i > samples.len()) {
            return Err(DiskImageError::parameter("Index pulse position out of range"));
        }
        buffer.transitions = samples;
        buffer.index = index;
        Ok(buffer)
    }

    /// Build a buffer from gaps between transitions, in sample units. Zero-length gaps cannot be
    /// represented and are merged into the following gap.
    pub fn from_deltas(sample_clock: f64, deltas: &[u32], index: Vec<usize>) -> Result<Self, DiskImageError> {
        let mut buffer = FluxBuffer::new(deltas.len(), sample_clock)?;
        let mut now: u32 = 0;
        let mut carry: u32 = 0;
        let mut remapped_index = Vec::with_capacity(index.len());
        let mut index_iter = index.iter().peekable();

        for (i, &delta) in deltas.iter().enumerate() {
            while let Some(&&idx) = index_iter.peek() {
                if idx <= i {
                    remapped_index.push(buffer.transitions.len());
                    index_iter.next();
                }
                else {
                    break;
                }
            }
            let gap = delta.saturating_add(carry);
            if gap == 0 {
                continue;
            }
            carry = 0;
            now = now
                .checked_add(gap)
                .ok_or_else(|| DiskImageError::ResourceExhausted("Flux sample counter overflowed".to_string()))?;
            buffer.transitions.push(now);
        }
        for _ in index_iter {
            remapped_index.push(buffer.transitions.len());
        }
        buffer.index = remapped_index;
        Ok(buffer)
    }

    /// The sample clock in Hz. Fixed for the lifetime of the buffer.
    pub fn sample_clock(&self) -> f64 {
        self.sample_clock
    }

    /// Append a transition `time_us` microseconds after the previous one.
    pub fn append(&mut self, time_us: f64) -> Result<(), DiskImageError> {
        let gap = (time_us * self.sample_clock / 1_000_000.0).round();
        if !gap.is_finite() || gap < 1.0 || gap > u32::MAX as f64 {
            return Err(DiskImageError::parameter(format!(
                "FluxBuffer::append(): gap of {} cannot be represented at {:.0}Hz",
                format_us!(time_us / 1_000_000.0),
                self.sample_clock
            )));
        }
        self.append_samples(gap as u32)
    }

    /// Append a transition `samples` sample units after the previous one.
    pub fn append_samples(&mut self, samples: u32) -> Result<(), DiskImageError> {
        if samples == 0 {
            return Err(DiskImageError::parameter("Flux transition gap of zero samples"));
        }
        let last = self.transitions.last().copied().unwrap_or(0);
        let next = last
            .checked_add(samples)
            .ok_or_else(|| DiskImageError::ResourceExhausted("Flux sample counter overflowed".to_string()))?;

        if self.transitions.len() == self.transitions.capacity() {
            let grow = self.transitions.capacity().max(16);
            self.transitions
                .try_reserve_exact(grow)
                .map_err(|e| DiskImageError::ResourceExhausted(e.to_string()))?;
        }
        self.transitions.push(next);
        Ok(())
    }

    /// Mark an index pulse at the current end of the buffer.
    pub fn mark_index(&mut self) {
        self.index.push(self.transitions.len());
    }

    /// Produce an owned copy of the absolute sample times.
    pub fn export(&self) -> Vec<u32> {
        self.transitions.clone()
    }

    pub fn samples(&self) -> &[u32] {
        &self.transitions
    }

    pub fn index_positions(&self) -> &[usize] {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    /// Iterate over the gaps between transitions in sample units. The first gap is measured from
    /// the start of the capture.
    pub fn deltas(&self) -> impl Iterator<Item = u32> + '_ {
        let mut last = 0u32;
        self.transitions.iter().map(move |&t| {
            let d = t - last;
            last = t;
            d
        })
    }

    /// Return the gaps within `range` of the transition list, in sample units.
    pub fn deltas_in(&self, range: Range<usize>) -> Vec<u32> {
        let start = range.start.min(self.transitions.len());
        let end = range.end.min(self.transitions.len());
        let mut last = if start == 0 { 0 } else { self.transitions[start - 1] };
        self.transitions[start..end]
            .iter()
            .map(|&t| {
                let d = t - last;
                last = t;
                d
            })
            .collect()
    }

    /// Return the transition ranges of each complete revolution. A buffer without at least two
    /// index pulses is treated as a single revolution.
    pub fn revolution_ranges(&self) -> Vec<Range<usize>> {
        if self.index.len() < 2 {
            return vec![0..self.transitions.len()];
        }
        self.index.windows(2).map(|w| w[0]..w[1]).collect()
    }

    pub fn revolution_ct(&self) -> usize {
        self.revolution_ranges().len()
    }

    /// Return the gaps of the specified revolution, in sample units.
    pub fn revolution(&self, rev: usize) -> Option<Vec<u32>> {
        self.revolution_ranges().get(rev).map(|r| self.deltas_in(r.clone()))
    }

    /// Return the gaps of the specified revolution in nanoseconds.
    pub fn revolution_ns(&self, rev: usize) -> Option<Vec<f64>> {
        self.revolution(rev)
            .map(|deltas| deltas.iter().map(|&d| self.samples_to_ns(d)).collect())
    }

    pub fn samples_to_ns(&self, samples: u32) -> f64 {
        samples as f64 * 1_000_000_000.0 / self.sample_clock
    }

    pub fn ns_to_samples(&self, ns: f64) -> u32 {
        (ns * self.sample_clock / 1_000_000_000.0).round() as u32
    }

    /// Total duration of the buffer in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.transitions.last().copied().unwrap_or(0) as f64 / self.sample_clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_accumulates_converted_gaps() {
        let mut buf = FluxBuffer::new(2, 24_000_000.0).unwrap();
        let gaps = [2.0, 3.0, 4.0, 2.0, 2.5];
        let mut sum = 0u32;
        for g in gaps {
            buf.append(g).unwrap();
            sum += (g * 24.0f64).round() as u32;
            assert_eq!(*buf.samples().last().unwrap(), sum);
        }
        assert_eq!(buf.len(), 5);
        assert!(buf.samples().windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_zero_gap_rejected() {
        let mut buf = FluxBuffer::new(0, 1_000_000.0).unwrap();
        assert!(buf.append(0.1).is_err());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_revolution_slicing() {
        let buf = FluxBuffer::from_deltas(1_000_000.0, &[5, 5, 5, 5, 5, 5], vec![1, 3, 5]).unwrap();
        let revs = buf.revolution_ranges();
        assert_eq!(revs, vec![1..3, 3..5]);
        assert_eq!(buf.revolution(0).unwrap(), vec![5, 5]);
    }
}
