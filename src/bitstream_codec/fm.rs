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

    src/bitstream_codec/fm.rs

    FM encoding and decoding.
*/

//! FM writes a clock transition in every bit cell pair. Address marks are written with a
//! clock pattern other than 0xFF: 0xC7 for ID and data address marks, 0xD7 for the index
//! address mark.

use crate::{
    bitstream_codec::{
        find_patterns,
        push_bits,
        system34::{self, AssembledTrack, IAM_MARK},
        TrackCodec,
        TrackDecode,
        TrackEncodeParams,
    },
    flux::PllPreset,
    random::WeakBitRng,
    track_reader::SectorRecord,
    types::{TrackBytes, TrackDataEncoding},
    DiskImageError,
};
use bit_vec::BitVec;

pub const FM_BYTE_LEN: usize = 16;
pub const FM_CLOCK: u8 = 0xFF;
pub const FM_MARK_CLOCK: u8 = 0xC7;
pub const FM_IAM_CLOCK: u8 = 0xD7;

/// Cell patterns of the address marks: IDAM (FE), DAMs (FB, FA, F9, F8) and the IAM (FC).
pub const FM_MARK_PATTERNS: [u16; 6] = [0xF57E, 0xF56F, 0xF56E, 0xF56B, 0xF56A, 0xF77A];

/// Interleave clock and data bits into 16 FM cells.
pub fn encode_byte(byte: u8, clock: u8) -> u16 {
    let mut cells = 0u16;
    for i in (0..8).rev() {
        cells = (cells << 2) | ((((clock >> i) & 1) as u16) << 1) | ((byte >> i) & 1) as u16;
    }
    cells
}

pub fn encode_bytes(data: &[u8]) -> BitVec {
    let mut bits = BitVec::with_capacity(data.len() * FM_BYTE_LEN);
    for &byte in data {
        push_bits(&mut bits, encode_byte(byte, FM_CLOCK) as u64, FM_BYTE_LEN);
    }
    bits
}

/// Encode assembled track bytes, writing flagged bytes with the address mark clock.
pub fn encode_track_bytes(track: &AssembledTrack) -> BitVec {
    let mut bits = BitVec::with_capacity(track.bytes.len() * FM_BYTE_LEN);
    for (&byte, &mark) in track.bytes.iter().zip(track.marks.iter()) {
        let clock = match (mark, byte) {
            (true, IAM_MARK) => FM_IAM_CLOCK,
            (true, _) => FM_MARK_CLOCK,
            _ => FM_CLOCK,
        };
        push_bits(&mut bits, encode_byte(byte, clock) as u64, FM_BYTE_LEN);
    }
    bits
}

#[derive(Copy, Clone, Debug, Default)]
pub struct FmCodec;

impl TrackCodec for FmCodec {
    fn encoding(&self) -> TrackDataEncoding {
        TrackDataEncoding::Fm
    }

    fn pll_preset(&self) -> PllPreset {
        PllPreset::Standard
    }

    fn min_gap_cells(&self) -> usize {
        1
    }

    fn decode_bits(&self, bits: &BitVec) -> TrackDecode {
        let syncs = find_patterns(bits, &FM_MARK_PATTERNS);
        let track = system34::assemble_bytes(bits, &syncs);
        let (sectors, idams) = system34::parse_track(&track.bytes, Some(&track.marks), false);
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
        let track = system34::build_track(sectors, params.gap3, params.track_len, false, rng);
        Ok(encode_track_bytes(&track))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataAddressMark, SectorBytes};

    #[test]
    fn test_mark_patterns() {
        assert_eq!(encode_byte(0xFE, FM_MARK_CLOCK), 0xF57E);
        assert_eq!(encode_byte(0xFB, FM_MARK_CLOCK), 0xF56F);
        assert_eq!(encode_byte(0xF8, FM_MARK_CLOCK), 0xF56A);
        assert_eq!(encode_byte(0xFC, FM_IAM_CLOCK), 0xF77A);
        assert_eq!(encode_byte(0x00, FM_CLOCK), 0xAAAA);
    }

    #[test]
    fn test_codec_track_round_trip() {
        let mut sectors: Vec<_> = (0..10)
            .map(|id| SectorRecord::new(17, 0, id, SectorBytes::filled(256, id)))
            .collect();
        sectors[3].address_mark = DataAddressMark::TrsdosDir;
        let mut rng = WeakBitRng::default();
        let bits = FmCodec
            .encode_sectors(&sectors, &TrackEncodeParams::default(), &mut rng)
            .unwrap();
        let decode = FmCodec.decode_bits(&bits);
        assert_eq!(decode.sectors.len(), 10);
        assert!(decode.sectors.iter().all(|s| s.is_good() && s.cylinder == 17));
        assert_eq!(decode.sectors[3].address_mark, DataAddressMark::TrsdosDir);
        assert!(decode.idams.iter().all(|i| !i.double_density));
    }
}
