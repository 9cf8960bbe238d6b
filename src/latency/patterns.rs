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

    src/latency/patterns.rs

    Timing patterns of known copy protection schemes.
*/

//! Each [ProtectionPattern] describes the regions of abnormal bit density a protection scheme
//! leaves on a track. The constants are heuristic; the catalog is plain data and may be replaced
//! through [crate::latency::LatencyConfig::patterns].

use crate::copy_protection::ProtectionKind;

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProtectionPattern {
    pub kind: ProtectionKind,
    /// Inclusive range of region density ratios (average latency / expected latency).
    pub density: (f64, f64),
    /// Inclusive range of region lengths in bits.
    pub region_bits: (u32, u32),
    /// Minimum score for the pattern to be reported.
    pub min_confidence: u8,
}

impl ProtectionPattern {
    pub const fn new(kind: ProtectionKind, density: (f64, f64), region_bits: (u32, u32), min_confidence: u8) -> Self {
        ProtectionPattern {
            kind,
            density,
            region_bits,
            min_confidence,
        }
    }

    pub fn matches(&self, density_ratio: f64, bits: u32) -> bool {
        density_ratio >= self.density.0
            && density_ratio <= self.density.1
            && bits >= self.region_bits.0
            && bits <= self.region_bits.1
    }
}

#[rustfmt::skip]
pub const DEFAULT_PATTERNS: [ProtectionPattern; 7] = [
    ProtectionPattern::new(ProtectionKind::Speedlock, (0.85, 1.25), (500,  5000),  70),
    ProtectionPattern::new(ProtectionKind::Copylock,  (1.02, 1.15), (1000, 50000), 60),
    ProtectionPattern::new(ProtectionKind::VMax,      (0.90, 1.10), (100,  2000),  65),
    ProtectionPattern::new(ProtectionKind::RapidLok,  (0.80, 1.20), (50,   500),   60),
    ProtectionPattern::new(ProtectionKind::Spiral,    (0.95, 1.05), (5000, 50000), 55),
    ProtectionPattern::new(ProtectionKind::Macrodos,  (1.00, 1.10), (2000, 10000), 50),
    ProtectionPattern::new(ProtectionKind::Flaschel,  (0.70, 0.95), (100,  1000),  60),
];

pub fn default_patterns() -> Vec<ProtectionPattern> {
    DEFAULT_PATTERNS.to_vec()
}
