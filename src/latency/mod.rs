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

    src/latency/mod.rs

    Per-track flux timing profiles and protection classification.
*/

//! A [LatencyProfile] accumulates the timing of every bit (or flux transition) on a track,
//! then analyzes the result. Analysis computes summary statistics from a fixed histogram, groups
//! timing anomalies into regions, and scores the regions against a catalog of known copy
//! protection patterns.
//!
//! Recording and analysis are separate phases. [LatencyProfile::analyze] may be called again
//! with a different [LatencyConfig]; it always recomputes from the recorded data, so identical
//! input always yields identical results.

pub mod patterns;

use crate::{
    copy_protection::ProtectionKind,
    flux::FluxBuffer,
    types::{TrackDataEncoding, TrackDensity},
    DiskImageError,
};
pub use patterns::{default_patterns, ProtectionPattern, DEFAULT_PATTERNS};
use std::{
    fmt::{self, Display, Formatter},
    ops::Range,
};

pub const HISTOGRAM_BUCKETS: usize = 1024;
pub const HISTOGRAM_BUCKET_NS: u32 = 10;
pub const HISTOGRAM_MAX_NS: u32 = HISTOGRAM_BUCKETS as u32 * HISTOGRAM_BUCKET_NS;

/// Classification of a single bit timing or a region of bits.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LatencyType {
    #[default]
    Normal,
    Long,
    Short,
    /// Both long and short timings, averaging close to nominal.
    Variable,
    /// Timing that differs between revolutions.
    Weak,
    /// A gap so long that a transition was likely lost.
    Missing,
}

impl Display for LatencyType {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            LatencyType::Normal => write!(f, "normal"),
            LatencyType::Long => write!(f, "long"),
            LatencyType::Short => write!(f, "short"),
            LatencyType::Variable => write!(f, "variable"),
            LatencyType::Weak => write!(f, "weak"),
            LatencyType::Missing => write!(f, "missing"),
        }
    }
}

/// A recorded timing anomaly.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BitLatency {
    pub bit_index: u32,
    pub latency_ns: u32,
    pub expected_ns: u32,
    pub deviation_pct: i8,
    pub kind: LatencyType,
    pub confidence: u8,
}

/// A run of anomalies sharing a type.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LatencyRegion {
    pub start_bit: u32,
    /// Exclusive end.
    pub end_bit: u32,
    pub kind: LatencyType,
    pub avg_latency_ns: u32,
    pub expected_ns: u32,
    pub deviation_pct: i16,
    pub density_ratio: f64,
    pub anomaly_ct: u32,
}

impl LatencyRegion {
    pub fn bits(&self) -> u32 {
        self.end_bit - self.start_bit
    }

    pub fn contains(&self, bit: u32) -> bool {
        bit >= self.start_bit && bit < self.end_bit
    }
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LatencyConfig {
    /// Expected latency in nanoseconds. If `None`, the histogram peak is used.
    pub nominal_ns: Option<u32>,
    /// Deviation, in percent, above which a bit is recorded as an anomaly.
    pub anomaly_threshold_pct: u8,
    /// Anomalies further apart than this many bits start a new region.
    pub min_region_bits: u32,
    /// Minimum number of anomalies that form a region.
    pub min_region_anomalies: usize,
    pub detect_protection: bool,
    /// Score added to a pattern in proportion to the fraction of all anomalies its matching
    /// regions account for. This lets a single region holding every anomaly on the track score
    /// 20 + 60 rather than 20. Zero scores by region count and length alone.
    pub coverage_weight: f64,
    /// Minimum anomaly count before a track may be classified as generic protection.
    pub generic_min_anomalies: u32,
    pub patterns: Vec<ProtectionPattern>,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        LatencyConfig {
            nominal_ns: None,
            anomaly_threshold_pct: 10,
            min_region_bits: 100,
            min_region_anomalies: 2,
            detect_protection: true,
            coverage_weight: 60.0,
            generic_min_anomalies: 100,
            patterns: default_patterns(),
        }
    }
}

/// Statistics over a range of anomalies.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RangeStats {
    pub avg_ns: u32,
    pub std_ns: u32,
    pub min_ns: u32,
    pub max_ns: u32,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LatencyProfile {
    pub cylinder: u16,
    pub head: u8,
    pub revolution: u32,
    pub nominal_ns: u32,
    pub anomaly_threshold_pct: u8,
    pub total_bits: u32,
    pub avg_latency_ns: u32,
    pub min_latency_ns: u32,
    pub max_latency_ns: u32,
    pub std_deviation_ns: u32,
    pub histogram: Vec<u32>,
    pub anomalies: Vec<BitLatency>,
    pub long_count: u32,
    pub short_count: u32,
    pub regions: Vec<LatencyRegion>,
    pub protection: ProtectionKind,
    pub protection_confidence: u8,
}

impl Default for LatencyProfile {
    fn default() -> Self {
        LatencyProfile::new(0)
    }
}

/// Return the nominal per-bit timing in nanoseconds for an encoding and density.
pub fn nominal_timing_ns(encoding: TrackDataEncoding, density: TrackDensity) -> u32 {
    match (encoding, density) {
        (TrackDataEncoding::Mfm, TrackDensity::Single) => 4000,
        (TrackDataEncoding::Mfm, TrackDensity::Double) => 2000,
        (TrackDataEncoding::Mfm, TrackDensity::High) => 1000,
        (TrackDataEncoding::Mfm, TrackDensity::Extended) => 500,
        (TrackDataEncoding::Fm, _) => 4000,
        (TrackDataEncoding::GcrCbm, _) => 3250,
        (TrackDataEncoding::GcrApple, _) => 4000,
        (TrackDataEncoding::Custom, _) => 2000,
    }
}

impl LatencyProfile {
    pub fn new(nominal_ns: u32) -> Self {
        LatencyProfile {
            cylinder: 0,
            head: 0,
            revolution: 0,
            nominal_ns,
            anomaly_threshold_pct: 10,
            total_bits: 0,
            avg_latency_ns: 0,
            min_latency_ns: u32::MAX,
            max_latency_ns: 0,
            std_deviation_ns: 0,
            histogram: vec![0; HISTOGRAM_BUCKETS],
            anomalies: Vec::new(),
            long_count: 0,
            short_count: 0,
            regions: Vec::new(),
            protection: ProtectionKind::None,
            protection_confidence: 0,
        }
    }

    pub fn with_config(config: &LatencyConfig) -> Self {
        let mut profile = LatencyProfile::new(config.nominal_ns.unwrap_or(0));
        profile.anomaly_threshold_pct = config.anomaly_threshold_pct;
        profile
    }

    /// Build a profile from the flux gaps of one revolution of a [FluxBuffer], or the whole
    /// buffer if `revolution` is `None`.
    pub fn from_flux(
        flux: &FluxBuffer,
        revolution: Option<usize>,
        config: &LatencyConfig,
    ) -> Result<Self, DiskImageError> {
        let deltas = match revolution {
            Some(rev) => flux
                .revolution(rev)
                .ok_or_else(|| DiskImageError::parameter(format!("No revolution {} in flux buffer", rev)))?,
            None => flux.deltas().collect(),
        };
        let mut profile = LatencyProfile::with_config(config);
        profile.revolution = revolution.unwrap_or(0) as u32;
        for (i, samples) in deltas.iter().enumerate() {
            profile.record_flux(i as u32, *samples, flux.sample_clock());
        }
        Ok(profile)
    }

    /// Total anomalies recorded. Always equal to the sum of the long and short counters.
    pub fn anomaly_count(&self) -> u32 {
        self.long_count + self.short_count
    }

    /// Record the timing of one bit.
    pub fn record_bit(&mut self, bit_index: u32, latency_ns: u32, expected_ns: u32) {
        let deviation_pct = if expected_ns > 0 {
            let pct = ((latency_ns as f64 - expected_ns as f64) * 100.0 / expected_ns as f64).round();
            pct.clamp(i8::MIN as f64, i8::MAX as f64) as i8
        }
        else {
            0
        };

        if latency_ns < HISTOGRAM_MAX_NS {
            self.histogram[(latency_ns / HISTOGRAM_BUCKET_NS) as usize] += 1;
        }

        self.total_bits += 1;
        self.min_latency_ns = self.min_latency_ns.min(latency_ns);
        self.max_latency_ns = self.max_latency_ns.max(latency_ns);

        if deviation_pct.unsigned_abs() > self.anomaly_threshold_pct {
            let kind = if deviation_pct > 0 {
                self.long_count += 1;
                LatencyType::Long
            }
            else {
                self.short_count += 1;
                LatencyType::Short
            };
            self.anomalies.push(BitLatency {
                bit_index,
                latency_ns,
                expected_ns,
                deviation_pct,
                kind,
                confidence: 255,
            });
        }
    }

    /// Record a flux gap measured in sample units.
    pub fn record_flux(&mut self, index: u32, samples: u32, sample_clock: f64) {
        if sample_clock <= 0.0 {
            return;
        }
        let ns = (samples as f64 * 1_000_000_000.0 / sample_clock) as u64;
        let expected = self.nominal_ns;
        self.record_bit(index, ns.min(u32::MAX as u64) as u32, expected);
    }

    fn histogram_mean(&self) -> Option<(f64, u64)> {
        let mut sum = 0u64;
        let mut total = 0u64;
        for (i, &count) in self.histogram.iter().enumerate() {
            let mid = i as u64 * HISTOGRAM_BUCKET_NS as u64 + HISTOGRAM_BUCKET_NS as u64 / 2;
            sum += count as u64 * mid;
            total += count as u64;
        }
        if total == 0 {
            return None;
        }
        Some((sum as f64 / total as f64, total))
    }

    /// Return the midpoint of the most populated histogram bucket.
    pub fn histogram_peak_ns(&self) -> u32 {
        let mut peak = 0;
        let mut max = 0;
        for (i, &count) in self.histogram.iter().enumerate() {
            if count > max {
                max = count;
                peak = i;
            }
        }
        peak as u32 * HISTOGRAM_BUCKET_NS + HISTOGRAM_BUCKET_NS / 2
    }

    fn compute_statistics(&mut self) {
        let Some((mean, total)) = self.histogram_mean()
        else {
            self.avg_latency_ns = 0;
            self.std_deviation_ns = 0;
            return;
        };
        self.avg_latency_ns = mean.round() as u32;

        if total > 1 {
            let mut variance_sum = 0.0;
            for (i, &count) in self.histogram.iter().enumerate() {
                if count == 0 {
                    continue;
                }
                let mid = (i as u32 * HISTOGRAM_BUCKET_NS + HISTOGRAM_BUCKET_NS / 2) as f64;
                let diff = mid - mean;
                variance_sum += count as f64 * diff * diff;
            }
            self.std_deviation_ns = (variance_sum / total as f64).sqrt().round() as u32;
        }
        else {
            self.std_deviation_ns = 0;
        }
    }

    fn close_region(&self, range: Range<usize>, expected_ns: u32, threshold: i16) -> LatencyRegion {
        let slice = &self.anomalies[range];
        let n = slice.len() as u64;
        let latency_sum: u64 = slice.iter().map(|a| a.latency_ns as u64).sum();
        let deviation_sum: i64 = slice.iter().map(|a| a.deviation_pct as i64).sum();
        let avg_latency_ns = (latency_sum / n) as u32;
        let deviation_pct = (deviation_sum / n as i64) as i16;
        let kind = if deviation_pct > threshold {
            LatencyType::Long
        }
        else if deviation_pct < -threshold {
            LatencyType::Short
        }
        else {
            LatencyType::Variable
        };
        LatencyRegion {
            start_bit: slice[0].bit_index,
            end_bit: slice[slice.len() - 1].bit_index + 1,
            kind,
            avg_latency_ns,
            expected_ns,
            deviation_pct,
            density_ratio: if expected_ns > 0 { avg_latency_ns as f64 / expected_ns as f64 } else { 1.0 },
            anomaly_ct: n as u32,
        }
    }

    fn find_regions(&mut self, config: &LatencyConfig) {
        self.regions.clear();
        if self.anomalies.is_empty() {
            return;
        }
        self.anomalies.sort_by_key(|a| a.bit_index);

        let expected = if self.nominal_ns > 0 { self.nominal_ns } else { self.histogram_peak_ns() };
        let threshold = config.anomaly_threshold_pct as i16;
        let min_anomalies = config.min_region_anomalies.max(1);

        let mut regions = Vec::new();
        let mut start = 0;
        let mut last_bit = self.anomalies[0].bit_index;
        for i in 1..self.anomalies.len() {
            let bit = self.anomalies[i].bit_index;
            if bit - last_bit > config.min_region_bits {
                if i - start >= min_anomalies {
                    regions.push(self.close_region(start..i, expected, threshold));
                }
                start = i;
            }
            last_bit = bit;
        }
        if self.anomalies.len() - start >= min_anomalies {
            regions.push(self.close_region(start..self.anomalies.len(), expected, threshold));
        }
        self.regions = regions;
    }

    /// Compute statistics, regions and the protection classification from the recorded data.
    pub fn analyze(&mut self, config: &LatencyConfig) {
        if let Some(nominal) = config.nominal_ns {
            self.nominal_ns = nominal;
        }
        self.compute_statistics();
        self.find_regions(config);

        if config.detect_protection {
            let (kind, confidence) = self.classify(config);
            self.protection = kind;
            self.protection_confidence = confidence;
        }
        log::debug!(
            "LatencyProfile::analyze(): [c:{} h:{}] {} bits avg {}ns std {}ns, {} anomalies in {} regions: {} ({}%)",
            self.cylinder,
            self.head,
            self.total_bits,
            self.avg_latency_ns,
            self.std_deviation_ns,
            self.anomaly_count(),
            self.regions.len(),
            self.protection,
            self.protection_confidence
        );
    }

    /// Score the region list against the pattern catalog.
    ///
    /// Each region within a pattern's density and length bounds adds 20 points; if the matching
    /// regions total more than 1000 bits the score is raised by 20%. The fraction of all anomalies
    /// the matching regions contain, times `coverage_weight`, is added last. Scores are capped at
    /// 100. The best score that meets its pattern's minimum wins; ties go to the earlier pattern.
    pub fn classify(&self, config: &LatencyConfig) -> (ProtectionKind, u8) {
        let total_anomalies = self.anomaly_count().max(self.anomalies.len() as u32);
        let mut best = (ProtectionKind::None, 0u8);

        for pattern in &config.patterns {
            let mut matches = 0u32;
            let mut matched_bits = 0u32;
            let mut matched_anomalies = 0u32;
            for region in &self.regions {
                if pattern.matches(region.density_ratio, region.bits()) {
                    matches += 1;
                    matched_bits += region.bits();
                    matched_anomalies += region.anomaly_ct;
                }
            }
            if matches == 0 {
                continue;
            }

            let mut score = (matches * 20).min(100) as f64;
            if matched_bits > 1000 {
                score = score * 120.0 / 100.0;
            }
            if total_anomalies > 0 {
                score += config.coverage_weight * matched_anomalies as f64 / total_anomalies as f64;
            }
            let score = score.min(100.0).round() as u8;

            log::trace!(
                "LatencyProfile::classify(): {} matched {} region(s), {} bits, score {}",
                pattern.kind,
                matches,
                matched_bits,
                score
            );
            if score > best.1 && score >= pattern.min_confidence {
                best = (pattern.kind, score);
            }
        }

        if best.0.is_none() && self.anomaly_count() > config.generic_min_anomalies && self.total_bits > 0 {
            let pct = self.anomaly_count() as f64 * 100.0 / self.total_bits as f64;
            if pct > 1.0 {
                best = (ProtectionKind::Generic, (pct * 10.0).min(80.0) as u8);
            }
        }
        best
    }

    /// Regions whose timing departs from nominal.
    pub fn variable_regions(&self) -> impl Iterator<Item = &LatencyRegion> {
        self.regions.iter().filter(|r| {
            matches!(
                r.kind,
                LatencyType::Variable | LatencyType::Long | LatencyType::Short
            )
        })
    }

    /// Return the density ratio at a bit: that of the containing region, of the anomaly at that
    /// bit, or 1.0.
    pub fn density_ratio_at(&self, bit_index: u32) -> f64 {
        if let Some(region) = self.regions.iter().find(|r| r.contains(bit_index)) {
            return region.density_ratio;
        }
        self.anomalies
            .iter()
            .find(|a| a.bit_index == bit_index && a.expected_ns > 0)
            .map(|a| a.latency_ns as f64 / a.expected_ns as f64)
            .unwrap_or(1.0)
    }

    /// Return the average density ratio over consecutive windows of `window` bits covering the
    /// whole track. Bits outside any region count as 1.0.
    pub fn density_map(&self, window: usize) -> Vec<f64> {
        let window = window.max(1) as u64;
        let total = self.total_bits as u64;
        let windows = total.div_ceil(window) as usize;
        let mut map = Vec::with_capacity(windows);
        for w in 0..windows as u64 {
            let start = w * window;
            let end = (start + window).min(total);
            let len = (end - start) as f64;
            let mut sum = len;
            for region in &self.regions {
                let overlap_start = start.max(region.start_bit as u64);
                let overlap_end = end.min(region.end_bit as u64);
                if overlap_end > overlap_start {
                    sum += (overlap_end - overlap_start) as f64 * (region.density_ratio - 1.0);
                }
            }
            map.push(sum / len);
        }
        map
    }

    /// Statistics over the anomalies recorded within a bit range.
    pub fn stats_in(&self, bits: Range<u32>) -> Option<RangeStats> {
        let values: Vec<u32> = self
            .anomalies
            .iter()
            .filter(|a| bits.contains(&a.bit_index))
            .map(|a| a.latency_ns)
            .collect();
        if values.is_empty() {
            return None;
        }
        let n = values.len() as u64;
        let avg = values.iter().map(|&v| v as u64).sum::<u64>() / n;
        let var = values
            .iter()
            .map(|&v| {
                let d = v as f64 - avg as f64;
                d * d
            })
            .sum::<f64>()
            / n as f64;
        Some(RangeStats {
            avg_ns: avg as u32,
            std_ns: var.sqrt() as u32,
            min_ns: values.iter().copied().min().unwrap_or(0),
            max_ns: values.iter().copied().max().unwrap_or(0),
        })
    }

    /// Merge profiles of several revolutions of the same track. The histograms are summed, the
    /// extremes are kept and the average is the mean of the per-revolution averages.
    pub fn merge(profiles: &[LatencyProfile]) -> Option<LatencyProfile> {
        let first = profiles.first()?;
        let mut merged = LatencyProfile::new(first.nominal_ns);
        merged.cylinder = first.cylinder;
        merged.head = first.head;
        merged.anomaly_threshold_pct = first.anomaly_threshold_pct;

        let mut avg_sum = 0u64;
        for profile in profiles {
            for (dst, src) in merged.histogram.iter_mut().zip(profile.histogram.iter()) {
                *dst += src;
            }
            merged.total_bits += profile.total_bits;
            merged.long_count += profile.long_count;
            merged.short_count += profile.short_count;
            merged.min_latency_ns = merged.min_latency_ns.min(profile.min_latency_ns);
            merged.max_latency_ns = merged.max_latency_ns.max(profile.max_latency_ns);
            avg_sum += profile.avg_latency_ns as u64;
        }
        merged.avg_latency_ns = (avg_sum / profiles.len() as u64) as u32;
        if let Some((_, total)) = merged.histogram_mean() {
            if total > 1 {
                let mean = merged.avg_latency_ns as f64;
                let variance_sum: f64 = merged
                    .histogram
                    .iter()
                    .enumerate()
                    .filter(|(_, &c)| c > 0)
                    .map(|(i, &c)| {
                        let d = (i as u32 * HISTOGRAM_BUCKET_NS + HISTOGRAM_BUCKET_NS / 2) as f64 - mean;
                        c as f64 * d * d
                    })
                    .sum();
                merged.std_deviation_ns = (variance_sum / total as f64).sqrt().round() as u32;
            }
        }
        Some(merged)
    }

    /// Return the variance of the latency recorded at `bit_index` across revolutions. Only
    /// anomalous bits are recorded individually; revolutions without an anomaly at the bit are
    /// skipped. Returns 0.0 if fewer than two revolutions recorded the bit.
    pub fn revolution_variance(profiles: &[&LatencyProfile], bit_index: u32) -> f64 {
        let values: Vec<f64> = profiles
            .iter()
            .filter_map(|p| p.anomalies.iter().find(|a| a.bit_index == bit_index))
            .map(|a| a.latency_ns as f64)
            .collect();
        if values.len() < 2 {
            return 0.0;
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64
    }

    /// Mark anomalies whose latency varies across revolutions by more than `min_variance` as weak.
    /// Returns the number of anomalies marked in `self`.
    pub fn mark_weak(&mut self, others: &[&LatencyProfile], min_variance: f64) -> usize {
        let mut marked = 0;
        let indices: Vec<u32> = self.anomalies.iter().map(|a| a.bit_index).collect();
        for (i, bit) in indices.into_iter().enumerate() {
            let mut all: Vec<&LatencyProfile> = others.to_vec();
            all.push(&*self);
            let variance = LatencyProfile::revolution_variance(&all, bit);
            if variance > min_variance {
                self.anomalies[i].kind = LatencyType::Weak;
                marked += 1;
            }
        }
        marked
    }

    /// Return the index of the revolution with the lowest timing deviation.
    pub fn best_revolution(profiles: &[LatencyProfile]) -> Option<usize> {
        profiles
            .iter()
            .enumerate()
            .min_by_key(|(_, p)| (p.std_deviation_ns, p.anomaly_count()))
            .map(|(i, _)| i)
    }
}

/// Combine the classifications of several passes over the same track. A pass votes for its
/// protection kind only if its confidence reaches `floor`. The kind with a strict majority of
/// all passes wins, with the mean confidence of its voters; otherwise no protection is reported.
pub fn classify_passes(profiles: &[LatencyProfile], floor: u8) -> (ProtectionKind, u8) {
    use strum::IntoEnumIterator;

    let mut best = (ProtectionKind::None, 0u8);
    for kind in ProtectionKind::iter().filter(|k| !k.is_none()) {
        let voters: Vec<u8> = profiles
            .iter()
            .filter(|p| p.protection == kind && p.protection_confidence >= floor)
            .map(|p| p.protection_confidence)
            .collect();
        if voters.len() * 2 > profiles.len() {
            let mean = voters.iter().map(|&c| c as u32).sum::<u32>() / voters.len() as u32;
            best = (kind, mean as u8);
        }
    }
    best
}

impl Display for LatencyProfile {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let pct = if self.total_bits > 0 {
            self.anomaly_count() as f64 * 100.0 / self.total_bits as f64
        }
        else {
            0.0
        };
        writeln!(f, "Track Latency Report")?;
        writeln!(f, "====================")?;
        writeln!(
            f,
            "Location: Cylinder {}, Head {}, Rev {}",
            self.cylinder, self.head, self.revolution
        )?;
        writeln!(f, "Total bits: {}", self.total_bits)?;
        writeln!(f, "Nominal timing: {} ns", self.nominal_ns)?;
        writeln!(f)?;
        writeln!(f, "Timing Statistics:")?;
        writeln!(f, "  Average: {} ns", self.avg_latency_ns)?;
        writeln!(
            f,
            "  Minimum: {} ns",
            if self.total_bits > 0 { self.min_latency_ns } else { 0 }
        )?;
        writeln!(f, "  Maximum: {} ns", self.max_latency_ns)?;
        writeln!(f, "  Std Dev: {} ns", self.std_deviation_ns)?;
        writeln!(f)?;
        writeln!(f, "Anomalies:")?;
        writeln!(f, "  Total: {} ({:.2}%)", self.anomaly_count(), pct)?;
        writeln!(f, "  Long:  {}", self.long_count)?;
        writeln!(f, "  Short: {}", self.short_count)?;
        writeln!(f)?;
        writeln!(f, "Protection Detection:")?;
        writeln!(f, "  Type: {}", self.protection)?;
        writeln!(f, "  Confidence: {}%", self.protection_confidence)?;
        write!(f, "  Regions: {}", self.regions.len())?;
        for region in &self.regions {
            write!(
                f,
                "\n    [{}..{}) {} avg {} ns density {:.3}",
                region.start_bit, region.end_bit, region.kind, region.avg_latency_ns, region.density_ratio
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic(regions: &[(Range<u32>, u32)]) -> LatencyProfile {
        let mut profile = LatencyProfile::new(2000);
        for i in 0..50_000 {
            let latency = regions
                .iter()
                .find(|(r, _)| r.contains(&i))
                .map(|(_, l)| *l)
                .unwrap_or(2000);
            profile.record_bit(i, latency, 2000);
        }
        profile
    }

    #[test]
    fn test_statistics() {
        let mut profile = synthetic(&[]);
        profile.analyze(&LatencyConfig::default());
        assert_eq!(profile.total_bits, 50_000);
        // All bits land in the 2000-2009 bucket, whose midpoint is 2005.
        assert_eq!(profile.avg_latency_ns, 2005);
        assert_eq!(profile.std_deviation_ns, 0);
        assert_eq!(profile.histogram_peak_ns(), 2005);
        assert_eq!(profile.protection, ProtectionKind::None);
    }

    #[test]
    fn test_regions_sorted_and_closed() {
        let mut profile = synthetic(&[(10_000..10_500, 2400), (25_000..25_100, 1600), (49_900..50_000, 2600)]);
        profile.analyze(&LatencyConfig::default());
        assert_eq!(profile.anomaly_count(), 700);
        assert_eq!(profile.anomaly_count(), profile.long_count + profile.short_count);
        assert_eq!(profile.regions.len(), 3);
        assert!(profile.regions.windows(2).all(|w| w[0].end_bit <= w[1].start_bit));
        assert_eq!(profile.regions[0].start_bit, 10_000);
        assert_eq!(profile.regions[0].end_bit, 10_500);
        assert_eq!(profile.regions[1].kind, LatencyType::Short);
        assert_eq!(profile.regions[2].end_bit, 50_000);
        assert_eq!(profile.histogram.iter().sum::<u32>(), profile.total_bits);
    }

    #[test]
    fn test_speedlock_region() {
        let mut profile = synthetic(&[(10_000..10_500, 2400)]);
        profile.analyze(&LatencyConfig::default());
        assert_eq!(profile.regions.len(), 1);
        assert_eq!(profile.regions[0].bits(), 500);
        assert_eq!(profile.protection, ProtectionKind::Speedlock);
        assert!(profile.protection_confidence >= 70);
    }

    #[test]
    fn test_coverage_weight_in_score() {
        let mut profile = synthetic(&[(10_000..10_500, 2400)]);
        profile.analyze(&LatencyConfig::default());

        let speedlock = |coverage_weight: f64| LatencyConfig {
            coverage_weight,
            patterns: vec![ProtectionPattern::new(ProtectionKind::Speedlock, (0.85, 1.25), (500, 5000), 0)],
            ..LatencyConfig::default()
        };
        // One region holding every anomaly: 20 for the region, plus the full coverage weight.
        assert_eq!(profile.classify(&speedlock(0.0)), (ProtectionKind::Speedlock, 20));
        assert_eq!(profile.classify(&speedlock(60.0)), (ProtectionKind::Speedlock, 80));
    }

    #[test]
    fn test_analyze_deterministic() {
        let mut a = synthetic(&[(10_000..10_500, 2400)]);
        let mut b = a.clone();
        a.analyze(&LatencyConfig::default());
        b.analyze(&LatencyConfig::default());
        assert_eq!(a, b);
    }

    #[test]
    fn test_merge() {
        let mut a = synthetic(&[]);
        let mut b = synthetic(&[(100..200, 2400)]);
        a.analyze(&LatencyConfig::default());
        b.analyze(&LatencyConfig::default());
        let merged = LatencyProfile::merge(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(merged.total_bits, 100_000);
        assert_eq!(merged.max_latency_ns, 2400);
        assert_eq!(merged.min_latency_ns, 2000);
        assert_eq!(merged.avg_latency_ns, (a.avg_latency_ns + b.avg_latency_ns) / 2);
        assert_eq!(merged.histogram[200], a.histogram[200] + b.histogram[200]);
    }

    #[test]
    fn test_density_map() {
        let mut profile = synthetic(&[(0..1000, 2400)]);
        profile.analyze(&LatencyConfig::default());
        let map = profile.density_map(1000);
        assert_eq!(map.len(), 50);
        assert!((map[0] - 1.2).abs() < 1e-9);
        assert!((map[1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_classify_passes() {
        let mut passes = vec![LatencyProfile::new(2000); 3];
        passes[0].protection = ProtectionKind::Copylock;
        passes[0].protection_confidence = 70;
        passes[1].protection = ProtectionKind::Copylock;
        passes[1].protection_confidence = 90;
        assert_eq!(classify_passes(&passes, 60), (ProtectionKind::Copylock, 80));
        assert_eq!(classify_passes(&passes, 80).0, ProtectionKind::None);
    }

    #[test]
    fn test_nominal_table() {
        assert_eq!(nominal_timing_ns(TrackDataEncoding::Mfm, TrackDensity::High), 1000);
        assert_eq!(nominal_timing_ns(TrackDataEncoding::GcrCbm, TrackDensity::Double), 3250);
    }
}
