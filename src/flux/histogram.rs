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

    src/flux/histogram.rs

    A histogram of flux gap times.
*/

//! This module defines a [FluxHistogram] structure which is used to determine the base cell
//! period of a flux track so that the PLL may be properly initialized for decoding.
//!
//! The first significant peak in the histogram corresponds to the shortest legal gap for the
//! track's encoding: two cells for MFM, one cell for FM and GCR.

use histogram::{Bucket, Histogram};

pub struct FluxHistogram {
    histogram: Histogram,
    maxima: Vec<(u64, std::ops::RangeInclusive<u64>)>,
    total_time: f64,
}

impl FluxHistogram {
    /// Produce a [FluxHistogram] over a fraction of the flux deltas in a revolution.
    /// # Arguments
    /// * `deltas_ns` - A slice of flux gap times in nanoseconds
    /// * `fraction` - The fraction of the deltas to use in the histogram
    pub fn new(deltas_ns: &[f64], fraction: f64) -> Option<Self> {
        // Max value power of 2^15 = 32768ns. Grouping power of 3 produces sharp spikes without
        // false maxima.
        let mut histogram = Histogram::new(3, 15).ok()?;

        let take_count = (deltas_ns.len() as f64 * fraction).round() as usize;
        log::trace!("FluxHistogram::new(): Taking {} flux deltas", take_count);
        let mut total_time = 0.0;
        for delta in deltas_ns.iter().take(take_count) {
            total_time += delta;
            if *delta > 0.0 {
                _ = histogram.increment(*delta as u64);
            }
        }

        Some(FluxHistogram {
            histogram,
            maxima: Vec::new(),
            total_time,
        })
    }

    pub fn total_time(&self) -> f64 {
        self.total_time
    }

    /// Locate local maxima in a histogram by bucket.
    fn find_local_maxima(&mut self, threshold: Option<f64>) -> &Vec<(u64, std::ops::RangeInclusive<u64>)> {
        let mut peaks = vec![];
        let mut previous_bucket: Option<Bucket> = None;
        let mut current_bucket: Option<Bucket> = None;

        let total_count: u64 = self.histogram.into_iter().map(|bucket| bucket.count()).sum();
        let threshold = (total_count as f64 * threshold.unwrap_or(0.005)).round() as u64;

        for bucket in self.histogram.into_iter() {
            if let Some(curr) = current_bucket.as_ref() {
                let prev_count = previous_bucket.as_ref().map(|b| b.count()).unwrap_or(0);
                if curr.count() >= prev_count && curr.count() > bucket.count() && curr.count() >= threshold.max(1) {
                    peaks.push((curr.count(), curr.start()..=curr.end()));
                }
            }
            previous_bucket = current_bucket.take();
            current_bucket = Some(bucket.clone());
        }
        if let Some(curr) = current_bucket.as_ref() {
            let prev_count = previous_bucket.as_ref().map(|b| b.count()).unwrap_or(0);
            if curr.count() >= prev_count && curr.count() >= threshold.max(1) {
                peaks.push((curr.count(), curr.start()..=curr.end()));
            }
        }

        self.maxima = peaks;
        &self.maxima
    }

    /// Return the median of the first significant peak, in nanoseconds.
    pub fn base_transition_ns(&mut self) -> Option<f64> {
        if self.maxima.is_empty() {
            self.find_local_maxima(None);
        }

        let first_peak = &self.maxima.first()?.1;
        Some((*first_peak.start() as f64 + *first_peak.end() as f64) / 2.0)
    }

    /// Return the median of the most populated peak (the mode), in nanoseconds.
    pub fn mode_ns(&mut self) -> Option<f64> {
        if self.maxima.is_empty() {
            self.find_local_maxima(None);
        }
        let peak = self.maxima.iter().max_by_key(|(count, _)| *count)?;
        Some((*peak.1.start() as f64 + *peak.1.end() as f64) / 2.0)
    }

    pub fn peak_ct(&mut self) -> usize {
        if self.maxima.is_empty() {
            self.find_local_maxima(None);
        }
        self.maxima.len()
    }

    #[allow(dead_code)]
    pub(crate) fn print_debug(&self) {
        for peak in self.maxima.iter() {
            log::debug!("FluxHistogram: Peak at range: {:?} ct: {}", peak.1, peak.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_transition() {
        let mut deltas = vec![2000.0; 600];
        deltas.extend(vec![3000.0; 300]);
        deltas.extend(vec![4000.0; 100]);
        let mut hist = FluxHistogram::new(&deltas, 1.0).unwrap();
        let base = hist.base_transition_ns().unwrap();
        assert!((base - 2000.0).abs() < 100.0, "base was {}", base);
        let mode = hist.mode_ns().unwrap();
        assert!((mode - 2000.0).abs() < 100.0);
    }
}
