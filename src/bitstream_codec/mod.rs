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

    src/bitstream_codec/mod.rs

    Track encodings and the TrackCodec trait.
*/

//! A [TrackCodec] turns the bit string recovered by the PLL into track bytes and sector
//! records, and turns a list of sector records back into a bit string for writing. One
//! implementation exists per supported [TrackDataEncoding].

pub mod crc;
pub mod fm;
pub mod gcr;
pub mod mfm;
pub mod system34;

use crate::{
    flux::PllPreset,
    random::WeakBitRng,
    track_reader::{IdamEntry, SectorRecord},
    types::{TrackBytes, TrackDataEncoding},
    DiskImageError,
};
use bit_vec::BitVec;
use dyn_clone::{clone_trait_object, DynClone};

/// The result of decoding a track bitstream.
#[derive(Clone, Debug, Default)]
pub struct TrackDecode {
    pub bytes: TrackBytes,
    pub sectors: Vec<SectorRecord>,
    pub idams: Vec<IdamEntry>,
    /// Number of sync marks found in the bitstream.
    pub sync_ct: usize,
}

/// Layout parameters used when encoding a track from sector records.
#[derive(Clone, Debug)]
pub struct TrackEncodeParams {
    /// Physical track number. CBM tracks are numbered from 1.
    pub track: u8,
    /// Gap between sectors, in bytes. A default for the encoding is used if `None`.
    pub gap3: Option<usize>,
    /// Total track length in encoded bytes. The track is padded with gap bytes up to this length.
    pub track_len: Option<usize>,
    /// Two-character CBM disk ID written into GCR sector headers.
    pub disk_id: [u8; 2],
}

impl Default for TrackEncodeParams {
    fn default() -> Self {
        TrackEncodeParams {
            track: 0,
            gap3: None,
            track_len: None,
            disk_id: [0x30, 0x30],
        }
    }
}

pub trait TrackCodec: DynClone + Send + Sync {
    fn encoding(&self) -> TrackDataEncoding;
    /// PLL preset suited to the legal gap lengths of the encoding.
    fn pll_preset(&self) -> PllPreset;
    /// The shortest legal flux gap, in cells. Used to derive the cell time from a histogram.
    fn min_gap_cells(&self) -> usize;
    /// Decode a bitstream into track bytes and sector records.
    fn decode_bits(&self, bits: &BitVec) -> TrackDecode;
    /// Encode sectors into a bitstream. Weak bits in sector data are filled from `rng`.
    fn encode_sectors(
        &self,
        sectors: &[SectorRecord],
        params: &TrackEncodeParams,
        rng: &mut WeakBitRng,
    ) -> Result<BitVec, DiskImageError>;
}

clone_trait_object!(TrackCodec);

/// Return a codec for the specified encoding, if it is supported.
pub fn codec_for(encoding: TrackDataEncoding) -> Option<Box<dyn TrackCodec>> {
    match encoding {
        TrackDataEncoding::Mfm => Some(Box::new(mfm::MfmCodec)),
        TrackDataEncoding::Fm => Some(Box::new(fm::FmCodec)),
        TrackDataEncoding::GcrCbm => Some(Box::new(gcr::GcrCodec)),
        TrackDataEncoding::GcrApple | TrackDataEncoding::Custom => None,
    }
}

/// Convert a cell bitstream to flux gaps in nanoseconds. `lead_cells` is the distance from the
/// reference transition to the first cell. Cells after the final `1` produce no gap.
pub fn cells_to_gaps(bits: &BitVec, cell_ns: f64, lead_cells: usize) -> Vec<f64> {
    let mut gaps = Vec::with_capacity(bits.len() / 2);
    let mut run = lead_cells;
    for bit in bits.iter() {
        run += 1;
        if bit {
            gaps.push(run as f64 * cell_ns);
            run = 0;
        }
    }
    gaps
}

/// Push the low `ct` bits of `value` onto a bitstream, MSB first.
pub(crate) fn push_bits(bits: &mut BitVec, value: u64, ct: usize) {
    for i in (0..ct).rev() {
        bits.push((value >> i) & 1 != 0);
    }
}

/// Find every offset at which the 16-bit `pattern` occurs in the bitstream.
pub(crate) fn find_patterns(bits: &BitVec, patterns: &[u16]) -> Vec<usize> {
    let mut found = Vec::new();
    let mut shift_reg: u16 = 0;
    for (i, bit) in bits.iter().enumerate() {
        shift_reg = (shift_reg << 1) | bit as u16;
        if i >= 15 && patterns.contains(&shift_reg) {
            found.push(i - 15);
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Read `ct` bits starting at `offset`, MSB first. Bits beyond the end read as zero.
    fn read_bits(bits: &BitVec, offset: usize, ct: usize) -> u64 {
        let mut value = 0u64;
        for i in 0..ct {
            value = (value << 1) | bits.get(offset + i).unwrap_or(false) as u64;
        }
        value
    }

    #[test]
    fn test_cells_to_gaps() {
        let bits = BitVec::from_bytes(&[0b0100_1000]);
        assert_eq!(cells_to_gaps(&bits, 1000.0, 0), vec![2000.0, 3000.0]);
        assert_eq!(cells_to_gaps(&bits, 1000.0, 2), vec![4000.0, 3000.0]);
    }

    #[test]
    fn test_find_patterns() {
        let mut bits = BitVec::new();
        push_bits(&mut bits, 0b101, 3);
        push_bits(&mut bits, 0x4489, 16);
        push_bits(&mut bits, 0x4489, 16);
        assert_eq!(find_patterns(&bits, &[0x4489]), vec![3, 19]);
        assert_eq!(read_bits(&bits, 3, 16), 0x4489);
    }
}
