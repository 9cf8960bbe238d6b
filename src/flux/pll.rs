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

    src/flux/pll.rs

    A proportional-integral PLL for decoding flux gaps into bits.
*/

//! The [Pll] converts a sequence of flux gaps into a bit string. Each gap is divided by the
//! current cell period to find how many cells it spans; that many bits are emitted, the last of
//! which is a `1`. The difference between the gap and the nearest whole number of cells is fed
//! back to the period with proportional and integral gains, so the decoder follows slow drift in
//! drive speed.

use crate::{flux::FluxStats, format_us, DiskImageError};
use bit_vec::BitVec;

/// Gain and range settings for the [Pll].
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PllConfig {
    /// Proportional gain applied to the per-cell phase error.
    pub kp: f64,
    /// Integral gain. The effective gain is divided by the number of cells in the current gap.
    pub ki: f64,
    /// Maximum deviation of the working period from the nominal period, as a fraction.
    pub clamp: f64,
    /// Fraction of the phase error corrected at each transition.
    pub phase_gain: f64,
    /// Minimum number of cells a single gap may represent.
    pub min_cells: usize,
    /// Maximum number of cells a single gap may represent.
    pub max_cells: usize,
}

impl Default for PllConfig {
    fn default() -> Self {
        PllConfig {
            kp: 0.1,
            ki: 0.01,
            clamp: 0.10,
            phase_gain: 0.65,
            min_cells: 1,
            max_cells: 3,
        }
    }
}

#[allow(dead_code)]
#[derive(Copy, Clone, Debug)]
pub enum PllPreset {
    /// Standard gains, gaps of 1-3 cells (FM, CBM GCR).
    Standard,
    /// Standard gains, gaps of 2-4 cells (MFM).
    Mfm,
    /// No feedback at all. Useful for synthetic or already-normalized flux.
    Fixed,
}

pub struct PllDecodeResult {
    pub bits: BitVec,
    pub flux_stats: FluxStats,
    /// Bit offset in `bits` at which each input gap ended.
    pub markers: Vec<usize>,
    /// The working period at the end of decoding, in nanoseconds.
    pub final_period_ns: f64,
}

pub struct Pll {
    config: PllConfig,
    nominal_period: f64,
    working_period: f64,
    phase: f64,
    integral: f64,
}

impl Pll {
    pub fn new(nominal_period_ns: f64, config: PllConfig) -> Result<Self, DiskImageError> {
        if !nominal_period_ns.is_finite() || nominal_period_ns <= 0.0 {
            return Err(DiskImageError::parameter(format!(
                "Pll::new(): invalid cell period {}",
                nominal_period_ns
            )));
        }
        if config.min_cells == 0 || config.max_cells < config.min_cells {
            return Err(DiskImageError::parameter("Pll::new(): invalid cell range"));
        }
        log::debug!(
            "Pll::new(): nominal period: {} kp: {} ki: {} clamp: {:.1}%",
            format_us!(nominal_period_ns / 1e9),
            config.kp,
            config.ki,
            config.clamp * 100.0
        );
        Ok(Pll {
            config,
            nominal_period: nominal_period_ns,
            working_period: nominal_period_ns,
            phase: 0.0,
            integral: 0.0,
        })
    }

    pub fn from_preset(nominal_period_ns: f64, preset: PllPreset) -> Result<Self, DiskImageError> {
        let config = match preset {
            PllPreset::Standard => PllConfig::default(),
            PllPreset::Mfm => PllConfig {
                min_cells: 2,
                max_cells: 4,
                ..PllConfig::default()
            },
            PllPreset::Fixed => PllConfig {
                kp: 0.0,
                ki: 0.0,
                phase_gain: 1.0,
                ..PllConfig::default()
            },
        };
        Pll::new(nominal_period_ns, config)
    }

    pub fn config(&self) -> &PllConfig {
        &self.config
    }

    pub fn period(&self) -> f64 {
        self.working_period
    }

    pub fn reset(&mut self) {
        self.working_period = self.nominal_period;
        self.phase = 0.0;
        self.integral = 0.0;
    }

    /// Classify a single gap, returning the number of cells it spans, and update the loop.
    pub fn step(&mut self, gap_ns: f64, stats: &mut FluxStats) -> usize {
        let raw_cells = (gap_ns - self.phase) / self.working_period;
        let cells = (raw_cells.round() as isize).clamp(self.config.min_cells as isize, self.config.max_cells as isize)
            as usize;
        stats.record(cells, raw_cells, gap_ns);

        // Phase error over the gap, normalized to a single cell.
        let error = (gap_ns - self.phase) - cells as f64 * self.working_period;
        let cell_error = error / cells as f64;

        self.integral += cell_error;
        let ki = self.config.ki / cells as f64;
        let adjust = self.config.kp * cell_error + ki * self.integral;

        let min = self.nominal_period * (1.0 - self.config.clamp);
        let max = self.nominal_period * (1.0 + self.config.clamp);
        self.working_period = (self.working_period + adjust).clamp(min, max);

        // Carry the part of the error the period did not absorb into the next gap.
        self.phase = -(error * (1.0 - self.config.phase_gain)).clamp(-self.working_period / 2.0, self.working_period / 2.0);
        cells
    }

    /// Decode a sequence of flux gaps into bits.
    pub fn decode(&mut self, gaps_ns: &[f64]) -> PllDecodeResult {
        let mut bits = BitVec::with_capacity(gaps_ns.len() * 3);
        let mut markers = Vec::with_capacity(gaps_ns.len());
        let mut flux_stats = FluxStats::default();

        for &gap in gaps_ns {
            let cells = self.step(gap, &mut flux_stats);
            for _ in 1..cells {
                bits.push(false);
            }
            bits.push(true);
            markers.push(bits.len());
        }

        log::trace!(
            "Pll::decode(): {} gaps -> {} bits, final period {}",
            gaps_ns.len(),
            bits.len(),
            format_us!(self.working_period / 1e9)
        );

        PllDecodeResult {
            bits,
            flux_stats,
            markers,
            final_period_ns: self.working_period,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_gaps() {
        let mut pll = Pll::from_preset(1000.0, PllPreset::Mfm).unwrap();
        let result = pll.decode(&[2000.0, 3000.0, 4000.0, 2000.0]);
        let bits: String = result.bits.iter().map(|b| if b { '1' } else { '0' }).collect();
        assert_eq!(bits, "01001000101");
        assert_eq!(result.final_period_ns, 1000.0);
    }

    #[test]
    fn test_period_clamped() {
        let mut pll = Pll::new(1000.0, PllConfig::default()).unwrap();
        let gaps = vec![1400.0; 500];
        pll.decode(&gaps);
        assert!(pll.period() <= 1100.0 + f64::EPSILON);
    }

    #[test]
    fn test_follows_slow_drift() {
        let mut pll = Pll::from_preset(1000.0, PllPreset::Mfm).unwrap();
        // A drive running 5% slow.
        let gaps: Vec<f64> = [2.0, 3.0, 4.0, 2.0, 2.0, 3.0].iter().cycle().take(600).map(|c| c * 1050.0).collect();
        let result = pll.decode(&gaps);
        assert!(result.final_period_ns > 1030.0);
        assert_eq!(result.flux_stats.too_long, 0);
    }
}
