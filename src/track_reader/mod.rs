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

    src/track_reader/mod.rs

    Decodes flux captures of a single physical track into a TrackRecord.
*/

//! The [TrackReader] turns one [FluxBuffer] into a [TrackRecord].
//!
//! Each revolution in the buffer is decoded independently: the cell time is taken from the
//! explicit options or derived from a histogram of the flux gaps, a [Pll] converts the gaps to a
//! cell bitstream, and a [TrackCodec] finds the sync marks and sectors in the bitstream. The
//! first revolution becomes the track record; later revolutions are used only to replace sectors
//! that failed to verify.
//!
//! When no encoding is specified, every supported codec is tried and the one producing the most
//! verified sectors is kept.

mod record;
mod writer;

pub use record::*;
pub use writer::*;

use crate::{
    bitstream_codec::{codec_for, gcr, TrackCodec, TrackDecode},
    flux::{FluxBuffer, FluxHistogram, Pll, PllConfig, PllDecodeResult},
    format_us,
    latency::{classify_passes, LatencyConfig, LatencyProfile},
    types::{DiskCh, TrackDataEncoding, TrackKey},
    DiskImageError,
};
use bit_vec::BitVec;

/// Fraction of a revolution's flux gaps used to build the cell time histogram.
const HISTOGRAM_FRACTION: f64 = 1.0;
/// Minimum confidence for a revolution to vote on the protection of a track.
const PASS_CONFIDENCE_FLOOR: u8 = 50;
/// Encodings tried, in order, when the encoding is not specified.
const AUTO_ENCODINGS: [TrackDataEncoding; 3] =
    [TrackDataEncoding::Mfm, TrackDataEncoding::Fm, TrackDataEncoding::GcrCbm];

#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackReaderOptions {
    /// Track encoding. If `None`, the encoding is detected.
    pub encoding: Option<TrackDataEncoding>,
    /// Cell time in nanoseconds. If `None`, it is derived from the flux.
    pub cell_ns: Option<f64>,
    /// If set, sectors whose header names a different cylinder or head are reported.
    pub expected_ch: Option<DiskCh>,
    /// Overrides the sample clock recorded in the flux buffer.
    pub sample_clock: Option<f64>,
    /// PLL gains. If `None`, the preset for the encoding is used.
    pub pll: Option<PllConfig>,
    pub latency: LatencyConfig,
    /// Retain the flux buffer in the produced track record.
    pub keep_flux: bool,
}

/// One decoded revolution.
struct RevolutionDecode {
    encoding: TrackDataEncoding,
    cell_ns: f64,
    decode: TrackDecode,
    bit_len: usize,
    latency: LatencyProfile,
}

impl RevolutionDecode {
    fn good_sectors(&self) -> usize {
        self.decode.sectors.iter().filter(|s| s.is_good()).count()
    }

    /// Ordering used to pick between candidate encodings.
    fn score(&self) -> (usize, usize, usize) {
        (self.good_sectors(), self.decode.sectors.len(), self.decode.sync_ct)
    }
}

#[derive(Clone, Debug, Default)]
pub struct TrackReader {
    options: TrackReaderOptions,
}

impl TrackReader {
    pub fn new(options: TrackReaderOptions) -> Self {
        TrackReader { options }
    }

    pub fn options(&self) -> &TrackReaderOptions {
        &self.options
    }

    /// Decode all revolutions of a flux buffer into a track record for `key`.
    pub fn read(&self, key: TrackKey, flux: &FluxBuffer) -> Result<TrackRecord, DiskImageError> {
        let sample_clock = self.options.sample_clock.unwrap_or(flux.sample_clock());
        if !sample_clock.is_finite() || sample_clock < 1.0 {
            return Err(DiskImageError::parameter(format!("Invalid sample clock {}", sample_clock)));
        }

        let ranges = flux.revolution_ranges();
        let mut revolutions = Vec::with_capacity(ranges.len());
        let mut encoding = self.options.encoding;

        for (rev, range) in ranges.into_iter().enumerate() {
            let gaps_ns: Vec<f64> = flux
                .deltas_in(range)
                .iter()
                .map(|&d| d as f64 * 1_000_000_000.0 / sample_clock)
                .collect();
            if gaps_ns.is_empty() {
                continue;
            }
            let mut decoded = self.decode_revolution(&gaps_ns, encoding)?;
            // Later revolutions use the encoding detected on the first.
            encoding = Some(decoded.encoding);
            decoded.latency.cylinder = key.ch.c();
            decoded.latency.head = key.ch.h();
            decoded.latency.revolution = rev as u32;
            decoded.latency.analyze(&self.options.latency);
            revolutions.push(decoded);
        }

        let mut revolutions = revolutions.into_iter();
        let Some(first) = revolutions.next()
        else {
            return Err(DiskImageError::SyncNotFound);
        };
        let mut profiles = vec![first.latency.clone()];
        let mut track = self.build_record(key, first);

        for retry in revolutions {
            profiles.push(retry.latency.clone());
            if track.needs_retry() {
                let retry_track = self.build_record(key, retry);
                track.merge_retry(&retry_track);
            }
        }

        if profiles.len() > 1 {
            let (kind, confidence) = classify_passes(&profiles, PASS_CONFIDENCE_FLOOR);
            if let Some(latency) = track.latency.as_mut() {
                let others: Vec<&LatencyProfile> = profiles[1..].iter().collect();
                latency.mark_weak(&others, 0.0);
                latency.protection = kind;
                latency.protection_confidence = confidence;
            }
        }

        if self.options.keep_flux {
            track.resolution = TrackDataResolution::FluxStream;
            track.flux = Some(flux.clone());
        }

        log::debug!(
            "TrackReader::read(): {} {} cell {} {} sectors ({} good) over {} revolution(s)",
            key,
            track.encoding,
            format_us!(track.cell_ns / 1e9),
            track.sectors.len(),
            track.sectors.iter().filter(|s| s.is_good()).count(),
            profiles.len()
        );
        Ok(track)
    }

    /// Decode a single revolution, trying every codec if `encoding` is `None`.
    fn decode_revolution(
        &self,
        gaps_ns: &[f64],
        encoding: Option<TrackDataEncoding>,
    ) -> Result<RevolutionDecode, DiskImageError> {
        match encoding {
            Some(encoding) => {
                let codec = codec_for(encoding)
                    .ok_or_else(|| DiskImageError::not_implemented(format!("Decoding of {} tracks", encoding)))?;
                self.decode_with(codec.as_ref(), gaps_ns)
            }
            None => {
                let mut best: Option<RevolutionDecode> = None;
                for encoding in AUTO_ENCODINGS {
                    let Some(codec) = codec_for(encoding)
                    else {
                        continue;
                    };
                    let candidate = self.decode_with(codec.as_ref(), gaps_ns)?;
                    log::trace!(
                        "TrackReader::decode_revolution(): {} scored {:?}",
                        encoding,
                        candidate.score()
                    );
                    if best.as_ref().map(|b| candidate.score() > b.score()).unwrap_or(true) {
                        best = Some(candidate);
                    }
                }
                best.ok_or(DiskImageError::SyncNotFound)
            }
        }
    }

    /// Derive the cell time for a codec from a histogram of the gaps.
    fn detect_cell_ns(&self, codec: &dyn TrackCodec, gaps_ns: &[f64]) -> Result<f64, DiskImageError> {
        if let Some(cell) = self.options.cell_ns {
            return Ok(cell);
        }
        let mut histogram = FluxHistogram::new(gaps_ns, HISTOGRAM_FRACTION)
            .ok_or_else(|| DiskImageError::parameter("Unable to build flux histogram"))?;
        let base = histogram.base_transition_ns().ok_or(DiskImageError::SyncNotFound)?;
        Ok(base / codec.min_gap_cells() as f64)
    }

    fn decode_with(&self, codec: &dyn TrackCodec, gaps_ns: &[f64]) -> Result<RevolutionDecode, DiskImageError> {
        let cell_ns = self.detect_cell_ns(codec, gaps_ns)?;
        let mut pll = match self.options.pll {
            Some(config) => Pll::new(cell_ns, config)?,
            None => Pll::from_preset(cell_ns, codec.pll_preset())?,
        };
        let result = pll.decode(gaps_ns);
        let latency = self.record_latency(codec.encoding(), cell_ns, gaps_ns, &result);
        let decode = codec.decode_bits(&result.bits);

        Ok(RevolutionDecode {
            encoding: codec.encoding(),
            cell_ns,
            bit_len: result.bits.len(),
            decode,
            latency,
        })
    }

    /// Record the per-bit timing of each gap. An MFM data bit spans two cells.
    fn record_latency(
        &self,
        encoding: TrackDataEncoding,
        cell_ns: f64,
        gaps_ns: &[f64],
        result: &PllDecodeResult,
    ) -> LatencyProfile {
        let cells_per_bit = if encoding == TrackDataEncoding::Mfm { 2 } else { 1 };
        let expected = (cell_ns * cells_per_bit as f64).round() as u32;
        let mut profile = LatencyProfile::with_config(&self.options.latency);
        profile.nominal_ns = self.options.latency.nominal_ns.unwrap_or(expected);

        let mut last_marker = 0;
        for (gap, &marker) in gaps_ns.iter().zip(result.markers.iter()) {
            let cells = (marker - last_marker).max(1);
            last_marker = marker;
            let latency = gap / cells as f64 * cells_per_bit as f64;
            profile.record_bit((marker / cells_per_bit) as u32, latency.round() as u32, profile.nominal_ns);
        }
        profile
    }

    fn build_record(&self, key: TrackKey, decoded: RevolutionDecode) -> TrackRecord {
        let RevolutionDecode {
            encoding,
            cell_ns,
            decode,
            bit_len,
            latency,
        } = decoded;

        let mut track = TrackRecord::new(key, encoding, TrackDataResolution::BitStream);
        track.cell_ns = cell_ns;
        track.raw = decode.bytes;
        track.sectors = decode.sectors;
        track.idams = decode.idams;
        track.bit_len = (bit_len % 8 != 0).then_some(bit_len);
        track.latency = Some(latency);
        if encoding == TrackDataEncoding::GcrCbm {
            track.density = Some(nearest_zone(cell_ns));
        }
        track.dedupe_sectors();
        self.check_expected(&track);
        track
    }

    fn check_expected(&self, track: &TrackRecord) {
        let Some(expected) = self.options.expected_ch
        else {
            return;
        };
        // CBM headers carry a 1-based track number and no head.
        let expected_c = match track.encoding {
            TrackDataEncoding::GcrCbm => expected.c() + 1,
            _ => expected.c(),
        };
        for sector in &track.sectors {
            if sector.cylinder != expected_c
                || (track.encoding != TrackDataEncoding::GcrCbm && sector.head != expected.h())
            {
                log::warn!(
                    "TrackReader::check_expected(): sector {} on {} has header c:{} h:{}, expected {}",
                    sector.sector_id,
                    track.key,
                    sector.cylinder,
                    sector.head,
                    expected
                );
            }
        }
    }

    /// Decode an already-recovered bitstream, as stored by bitstream containers.
    pub fn decode_bitstream(key: TrackKey, encoding: TrackDataEncoding, bits: &BitVec) -> Result<TrackRecord, DiskImageError> {
        let codec =
            codec_for(encoding).ok_or_else(|| DiskImageError::not_implemented(format!("Decoding of {} tracks", encoding)))?;
        let decode = codec.decode_bits(bits);
        let mut track = TrackRecord::new(key, encoding, TrackDataResolution::BitStream);
        track.raw = decode.bytes;
        track.sectors = decode.sectors;
        track.idams = decode.idams;
        track.bit_len = (bits.len() % 8 != 0).then_some(bits.len());
        track.dedupe_sectors();
        Ok(track)
    }
}

/// Return the CBM speed zone whose nominal cell time is closest to `cell_ns`.
fn nearest_zone(cell_ns: f64) -> u8 {
    (0..4u8)
        .min_by_key(|&zone| (gcr::zone_cell_ns(zone) - cell_ns).abs() as u64)
        .unwrap_or(3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bitstream_codec::{cells_to_gaps, TrackEncodeParams},
        flux::FluxBuffer,
        random::WeakBitRng,
        types::SectorBytes,
    };

    const CLOCK: f64 = 24_000_000.0;

    fn flux_from_bits(bits: &BitVec, cell_ns: f64, revolutions: usize) -> FluxBuffer {
        let gaps = cells_to_gaps(bits, cell_ns, 0);
        let deltas: Vec<u32> = gaps.iter().map(|g| (g * CLOCK / 1e9).round() as u32).collect();
        let mut all = Vec::new();
        let mut index = Vec::new();
        for _ in 0..revolutions {
            index.push(all.len());
            all.extend_from_slice(&deltas);
        }
        index.push(all.len());
        FluxBuffer::from_deltas(CLOCK, &all, index).unwrap()
    }

    fn mfm_bits() -> BitVec {
        let sectors: Vec<_> = (1..=9)
            .map(|id| SectorRecord::new(3, 0, id, SectorBytes::filled(512, id)))
            .collect();
        let codec = codec_for(TrackDataEncoding::Mfm).unwrap();
        codec
            .encode_sectors(&sectors, &TrackEncodeParams::default(), &mut WeakBitRng::default())
            .unwrap()
    }

    #[test]
    fn test_read_mfm_auto() {
        let flux = flux_from_bits(&mfm_bits(), 1000.0, 1);
        let reader = TrackReader::default();
        let track = reader.read(TrackKey::from((3, 0)), &flux).unwrap();
        assert_eq!(track.encoding, TrackDataEncoding::Mfm);
        assert_eq!(track.sectors.len(), 9);
        assert!(track.sectors.iter().all(|s| s.is_good()));
        assert_eq!(track.sector(5).unwrap().data.as_slice(), &[5u8; 512][..]);
        assert!(track.check_invariants().is_ok());
        let latency = track.latency.as_ref().unwrap();
        assert!(latency.nominal_ns.abs_diff(2000) < 100);
    }

    #[test]
    fn test_read_gcr_auto() {
        let sectors: Vec<_> = (0..19)
            .map(|id| SectorRecord::new(20, 0, id, SectorBytes::filled(256, id)))
            .collect();
        let params = TrackEncodeParams {
            track: 20,
            ..TrackEncodeParams::default()
        };
        let codec = codec_for(TrackDataEncoding::GcrCbm).unwrap();
        let bits = codec.encode_sectors(&sectors, &params, &mut WeakBitRng::default()).unwrap();
        let flux = flux_from_bits(&bits, 3500.0, 1);

        let track = TrackReader::default().read(TrackKey::from((19, 0)), &flux).unwrap();
        assert_eq!(track.encoding, TrackDataEncoding::GcrCbm);
        assert_eq!(track.sectors.len(), 19);
        assert!(track.sectors.iter().all(|s| s.is_good()));
        assert_eq!(track.density, Some(2));
    }

    #[test]
    fn test_explicit_encoding_and_cell() {
        let flux = flux_from_bits(&mfm_bits(), 1000.0, 2);
        let reader = TrackReader::new(TrackReaderOptions {
            encoding: Some(TrackDataEncoding::Mfm),
            cell_ns: Some(1000.0),
            keep_flux: true,
            ..TrackReaderOptions::default()
        });
        let track = reader.read(TrackKey::from((3, 0)), &flux).unwrap();
        assert_eq!(track.cell_ns, 1000.0);
        assert_eq!(track.resolution, TrackDataResolution::FluxStream);
        assert_eq!(track.sectors.len(), 9);
        assert!(track.flux.is_some());
    }

    #[test]
    fn test_unsupported_encoding() {
        let flux = flux_from_bits(&mfm_bits(), 1000.0, 1);
        let reader = TrackReader::new(TrackReaderOptions {
            encoding: Some(TrackDataEncoding::GcrApple),
            ..TrackReaderOptions::default()
        });
        let err = reader.read(TrackKey::from((0, 0)), &flux).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotImplemented);
    }
}
