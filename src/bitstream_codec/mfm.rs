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

    src/bitstream_codec/mfm.rs

    MFM encoding and decoding.
*/

//! MFM writes each data bit as a pair of cells: a clock cell and a data cell. The clock cell
//! carries a transition only between two zero data bits. Address marks are preceded by A1 bytes
//! written with one clock transition suppressed (0x4489), which can never occur in normal data.

use crate::{
    bitstream_codec::{
        cells_to_gaps,
        find_patterns,
        push_bits,
        system34::{self, AssembledTrack, MFM_IAM_SYNC_BYTE, MFM_SYNC_BYTE},
        TrackCodec,
        TrackDecode,
        TrackEncodeParams,
    },
    flux::{Pll, PllPreset},
    random::WeakBitRng,
    track_reader::SectorRecord,
    types::{IntegrityCheck, TrackBytes, TrackDataEncoding},
    DiskImageError,
};
use bit_vec::BitVec;

pub const MFM_BYTE_LEN: usize = 16;
/// A1 with the clock between bits 4 and 5 suppressed.
pub const MFM_SYNC_A1: u16 = 0x4489;
/// C2 with the clock between bits 3 and 4 suppressed. Precedes the index address mark.
pub const MFM_SYNC_C2: u16 = 0x5224;

/// Encode a byte as 16 MFM cells, given the previous data bit.
pub fn encode_byte(byte: u8, prev_bit: bool) -> u16 {
    let mut cells = 0u16;
    let mut prev = prev_bit;
    for i in (0..8).rev() {
        let bit = (byte >> i) & 1 != 0;
        let clock = !prev && !bit;
        cells = (cells << 2) | ((clock as u16) << 1) | bit as u16;
        prev = bit;
    }
    cells
}

/// Encode a run of bytes into MFM cells.
pub fn encode_bytes(data: &[u8], prev_bit: bool) -> BitVec {
    let mut bits = BitVec::with_capacity(data.len() * MFM_BYTE_LEN);
    let mut prev = prev_bit;
    for &byte in data {
        push_bits(&mut bits, encode_byte(byte, prev) as u64, MFM_BYTE_LEN);
        prev = byte & 1 != 0;
    }
    bits
}

/// Encode assembled track bytes, writing flagged A1 and C2 bytes as sync marks.
pub fn encode_track_bytes(track: &AssembledTrack, prev_bit: bool) -> BitVec {
    let mut bits = BitVec::with_capacity(track.bytes.len() * MFM_BYTE_LEN);
    let mut prev = prev_bit;
    for (&byte, &mark) in track.bytes.iter().zip(track.marks.iter()) {
        let cells = match (mark, byte) {
            (true, MFM_SYNC_BYTE) => MFM_SYNC_A1,
            (true, MFM_IAM_SYNC_BYTE) => MFM_SYNC_C2,
            _ => encode_byte(byte, prev),
        };
        push_bits(&mut bits, cells as u64, MFM_BYTE_LEN);
        prev = byte & 1 != 0;
    }
    bits
}

/// Number of cells between the reference transition and the first cell of a stream. After a one
/// the reference is the previous data cell; after a zero the stream is treated as following the
/// data cells `1 0`, so the reference lies three cells back.
fn lead_cells(prev_bit: bool) -> usize {
    if prev_bit {
        0
    }
    else {
        2
    }
}

/// Encode bytes directly to flux gaps in nanoseconds.
pub fn encode_flux(data: &[u8], prev_bit: bool, cell_ns: f64) -> Vec<f64> {
    cells_to_gaps(&encode_bytes(data, prev_bit), cell_ns, lead_cells(prev_bit))
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MfmDecoded {
    pub bytes: Vec<u8>,
    /// CRC status of the first sector header found, or `NotApplicable` if none was found.
    pub header_crc: IntegrityCheck,
    pub data_crc: IntegrityCheck,
}

/// Decode flux gaps produced by [encode_flux] (or read from a disk) back into bytes.
/// Trailing cells after the last transition are assumed to be zero.
pub fn decode_flux(gaps_ns: &[f64], cell_ns: f64, prev_bit: bool) -> Result<MfmDecoded, DiskImageError> {
    let mut pll = Pll::from_preset(cell_ns, PllPreset::Mfm)?;
    let bits = pll.decode(gaps_ns).bits;

    let lead = lead_cells(prev_bit).min(bits.len());
    let mut cells: BitVec = bits.iter().skip(lead).collect();
    while cells.len() % MFM_BYTE_LEN != 0 {
        cells.push(false);
    }

    let bytes = (0..cells.len() / MFM_BYTE_LEN)
        .map(|i| system34::data_byte_at(&cells, i * MFM_BYTE_LEN))
        .collect();

    let mut decoded = MfmDecoded {
        bytes,
        ..MfmDecoded::default()
    };

    let decode = MfmCodec.decode_bits(&cells);
    if let Some(sector) = decode.sectors.first() {
        decoded.header_crc = sector.header_crc;
        decoded.data_crc = sector.data_crc;
    }
    Ok(decoded)
}

#[derive(Copy, Clone, Debug, Default)]
pub struct MfmCodec;

impl TrackCodec for MfmCodec {
    fn encoding(&self) -> TrackDataEncoding {
        TrackDataEncoding::Mfm
    }

    fn pll_preset(&self) -> PllPreset {
        PllPreset::Mfm
    }

    fn min_gap_cells(&self) -> usize {
        2
    }

    fn decode_bits(&self, bits: &BitVec) -> TrackDecode {
        // C2 is not searched for: 0x5224 is a legal cell pattern at odd alignment.
        let syncs = find_patterns(bits, &[MFM_SYNC_A1]);
        let track = system34::assemble_bytes(bits, &syncs);
        let (sectors, idams) = system34::parse_track(&track.bytes, Some(&track.marks), true);
        TrackDecode {
            bytes: TrackBytes::from(track.bytes),
            sectors,
            idams,
            sync_ct: syncs.len(),
        }
    }

    fn encode_sectors(
        &self,
        sectors: &[SectorRecord],
        params: &TrackEncodeParams,
        rng: &mut WeakBitRng,
    ) -> Result<BitVec, DiskImageError> {
        let track = system34::build_track(sectors, params.gap3, params.track_len, true, rng);
        Ok(encode_track_bytes(&track, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SectorBytes;

    #[test]
    fn test_encode_sync_bytes() {
        assert_eq!(encode_byte(0xA1, false), 0x44A9);
        assert_eq!(encode_byte(0x4E, false), 0x9254);
        assert_eq!(encode_byte(0x00, true), 0x2AAA);
    }

    #[test]
    fn test_single_zero_byte() {
        let gaps = encode_flux(&[0x00], false, 1000.0);
        let us: Vec<f64> = gaps.iter().map(|g| g / 1000.0).collect();
        assert_eq!(us, vec![3.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0]);

        let decoded = decode_flux(&gaps, 1000.0, false).unwrap();
        assert_eq!(decoded.bytes[0], 0x00);
        assert!(decoded.header_crc.is_not_applicable());
        assert!(decoded.data_crc.is_not_applicable());
    }

    #[test]
    fn test_flux_round_trip() {
        let data: Vec<u8> = (0..=255u8).chain([0x00, 0xFF, 0x80, 0x01]).collect();
        for prev in [false, true] {
            let gaps = encode_flux(&data, prev, 1000.0);
            let decoded = decode_flux(&gaps, 1000.0, prev).unwrap();
            assert_eq!(decoded.bytes, data, "prev_bit {}", prev);
            assert!(decoded.header_crc.is_not_applicable());
            assert!(decoded.data_crc.is_not_applicable());
        }
    }

    #[test]
    fn test_codec_track_round_trip() {
        let sectors: Vec<_> = (1..=9)
            .map(|id| SectorRecord::new(0, 1, id, SectorBytes::filled(512, 0xE5)))
            .collect();
        let mut rng = WeakBitRng::default();
        let bits = MfmCodec
            .encode_sectors(&sectors, &TrackEncodeParams::default(), &mut rng)
            .unwrap();
        assert_eq!(bits.len(), 6250 * 16);
        let decode = MfmCodec.decode_bits(&bits);
        assert_eq!(decode.sectors.len(), 9);
        assert!(decode.sectors.iter().all(|s| s.is_good() && s.head == 1));
        assert_eq!(decode.idams.len(), 9);
    }
}
