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

    src/bitstream_codec/system34.rs

    IBM System/34 track layout, shared by the MFM and FM codecs.
*/

//! An IBM track is a run of gaps, sync fields and address marks. In MFM each address mark is
//! preceded by three A1 bytes written with a missing clock; in FM the address mark byte itself
//! is written with a special clock pattern. Both codecs first convert cells to bytes with
//! [assemble_bytes], flagging the bytes that were written with a clock violation, then parse the
//! byte stream with [parse_track].

use crate::{
    bitstream_codec::crc::{crc_ccitt, crc_ibm_3740},
    random::WeakBitRng,
    track_reader::{code_to_size, IdamEntry, SectorRecord},
    types::{DataAddressMark, IntegrityCheck, IntegrityField, SectorBytes, SectorFault},
};
use bit_vec::BitVec;

pub const IAM_MARK: u8 = 0xFC;
pub const IDAM_MARK: u8 = 0xFE;
pub const MFM_SYNC_BYTE: u8 = 0xA1;
pub const MFM_IAM_SYNC_BYTE: u8 = 0xC2;
pub const MFM_GAP_BYTE: u8 = 0x4E;
pub const FM_GAP_BYTE: u8 = 0xFF;

/// Default track lengths in bytes for 250Kbps MFM and 125Kbps FM at 300RPM.
pub const MFM_TRACK_LEN: usize = 6250;
pub const FM_TRACK_LEN: usize = 3125;
pub const MFM_DEFAULT_GAP3: usize = 84;
pub const FM_DEFAULT_GAP3: usize = 27;

/// Maximum distance, in bytes, between the end of a sector header and its data address mark.
const MFM_DAM_WINDOW: usize = 43;
const FM_DAM_WINDOW: usize = 30;

const MFM_CRC_PRESET: [u8; 3] = [MFM_SYNC_BYTE; 3];

/// Track bytes with a parallel flag per byte marking clock-violation (sync) bytes.
#[derive(Clone, Debug, Default)]
pub struct AssembledTrack {
    pub bytes: Vec<u8>,
    pub marks: Vec<bool>,
}

/// Return the data byte encoded by the 16 clock/data cells starting at `offset`.
pub fn data_byte_at(bits: &BitVec, offset: usize) -> u8 {
    let mut byte = 0u8;
    for i in 0..8 {
        byte = (byte << 1) | bits.get(offset + i * 2 + 1).unwrap_or(false) as u8;
    }
    byte
}

/// Convert a clock/data cell stream into bytes. Byte alignment is taken from the first sync
/// position and re-established at every subsequent sync, as a disk controller would.
pub fn assemble_bytes(bits: &BitVec, syncs: &[usize]) -> AssembledTrack {
    let mut track = AssembledTrack {
        bytes: Vec::with_capacity(bits.len() / 16),
        marks: Vec::with_capacity(bits.len() / 16),
    };
    let mut sync_iter = syncs.iter().copied().peekable();
    let mut cursor = syncs.first().map(|&s| s % 16).unwrap_or(0);

    while cursor + 16 <= bits.len() {
        while sync_iter.next_if(|&s| s < cursor).is_some() {}

        let mut is_mark = false;
        if let Some(s) = sync_iter.next_if(|&s| s < cursor + 16) {
            cursor = s;
            is_mark = true;
        }
        if cursor + 16 > bits.len() {
            break;
        }
        track.bytes.push(data_byte_at(bits, cursor));
        track.marks.push(is_mark);
        cursor += 16;
    }
    track
}

fn is_mark(marks: Option<&[bool]>, i: usize) -> bool {
    marks.map(|m| m.get(i).copied().unwrap_or(false)).unwrap_or(true)
}

fn is_address_mark(bytes: &[u8], marks: Option<&[bool]>, i: usize, double_density: bool, range: (u8, u8)) -> bool {
    let Some(&byte) = bytes.get(i)
    else {
        return false;
    };
    if byte < range.0 || byte > range.1 {
        return false;
    }
    if double_density {
        i >= 2
            && bytes[i - 1] == MFM_SYNC_BYTE
            && bytes[i - 2] == MFM_SYNC_BYTE
            && is_mark(marks, i - 1)
            && is_mark(marks, i - 2)
    }
    else {
        match marks {
            Some(m) => m.get(i).copied().unwrap_or(false),
            None => i >= 1 && bytes[i - 1] == 0x00,
        }
    }
}

fn is_idam(bytes: &[u8], marks: Option<&[bool]>, i: usize, double_density: bool) -> bool {
    is_address_mark(bytes, marks, i, double_density, (IDAM_MARK, IDAM_MARK))
}

fn is_dam(bytes: &[u8], marks: Option<&[bool]>, i: usize, double_density: bool) -> bool {
    is_address_mark(bytes, marks, i, double_density, (0xF8, 0xFB))
}

fn field_crc(field: &[u8], double_density: bool) -> u16 {
    if double_density {
        crc_ccitt(field, crc_ibm_3740(&MFM_CRC_PRESET))
    }
    else {
        crc_ibm_3740(field)
    }
}

/// Scan track bytes for sector headers and parse each one. If `marks` is `None`, address marks
/// are recognized by their surrounding bytes alone.
pub fn parse_track(bytes: &[u8], marks: Option<&[bool]>, double_density: bool) -> (Vec<SectorRecord>, Vec<IdamEntry>) {
    let mut sectors = Vec::new();
    let mut idams = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if is_idam(bytes, marks, i, double_density) {
            idams.push(IdamEntry {
                offset: i,
                double_density,
            });
            if let Some(sector) = parse_sector_at(bytes, marks, i, double_density) {
                sectors.push(sector);
            }
            i += 7;
            continue;
        }
        i += 1;
    }
    log::trace!(
        "parse_track(): found {} IDAMs and {} sectors in {} bytes",
        idams.len(),
        sectors.len(),
        bytes.len()
    );
    (sectors, idams)
}

/// Parse the sector whose IDAM byte is at `offset`, then search for its data field.
pub fn parse_sector_at(
    bytes: &[u8],
    marks: Option<&[bool]>,
    offset: usize,
    double_density: bool,
) -> Option<SectorRecord> {
    if offset + 7 > bytes.len() || bytes[offset] != IDAM_MARK {
        return None;
    }
    let header = &bytes[offset..offset + 5];
    let stored = u16::from_be_bytes([bytes[offset + 5], bytes[offset + 6]]);
    let header_crc = IntegrityCheck::Crc16(IntegrityField::new(stored, field_crc(header, double_density)));
    let size_code = header[4];
    let size = code_to_size(size_code);

    let mut sector = SectorRecord {
        cylinder: header[1] as u16,
        head: header[2],
        sector_id: header[3],
        size_code,
        data_offset: offset,
        data_size: 0,
        header_crc,
        data_crc: IntegrityCheck::NotApplicable,
        address_mark: DataAddressMark::Normal,
        weak_bit_mask: None,
        fault: if header_crc.is_valid() { None } else { Some(SectorFault::HeaderChecksum) },
        data: SectorBytes::new(),
    };

    let search_start = offset + 7;
    let window = if double_density { MFM_DAM_WINDOW } else { FM_DAM_WINDOW };
    let search_end = (search_start + window).min(bytes.len());

    let mut dam = None;
    for k in search_start..search_end {
        if is_idam(bytes, marks, k, double_density) {
            break;
        }
        if is_dam(bytes, marks, k, double_density) {
            dam = Some(k);
            break;
        }
    }

    let Some(dam) = dam.filter(|&k| k + 1 + size + 2 <= bytes.len())
    else {
        sector.fault = Some(SectorFault::DataNotFound);
        return Some(sector);
    };

    let mark = bytes[dam];
    let data = &bytes[dam + 1..dam + 1 + size];
    let stored = u16::from_be_bytes([bytes[dam + 1 + size], bytes[dam + 2 + size]]);
    let calculated = field_crc(&bytes[dam..dam + 1 + size], double_density);

    sector.address_mark = DataAddressMark::from_mark(mark, !double_density);
    sector.data_offset = dam + 1;
    sector.data_size = size;
    sector.data = SectorBytes::from(data);
    sector.data_crc = IntegrityCheck::Crc16(IntegrityField::new(stored, calculated));
    if stored != calculated {
        sector.fault = Some(SectorFault::DataChecksum);
    }
    Some(sector)
}

/// Choose the CRC to write for a field: a recorded bad CRC is reproduced, a fault without a
/// recorded value is written as an inverted CRC, otherwise the calculated CRC is used.
fn crc_to_write(check: &IntegrityCheck, calculated: u16, faulted: bool) -> u16 {
    match check {
        IntegrityCheck::Crc16(field) if !field.is_valid() => field.expected,
        _ if faulted => !calculated,
        _ => calculated,
    }
}

struct ByteWriter {
    track: AssembledTrack,
}

impl ByteWriter {
    fn fill(&mut self, byte: u8, ct: usize) {
        self.track.bytes.extend(std::iter::repeat(byte).take(ct));
        self.track.marks.extend(std::iter::repeat(false).take(ct));
    }

    fn mark(&mut self, byte: u8, ct: usize) {
        self.track.bytes.extend(std::iter::repeat(byte).take(ct));
        self.track.marks.extend(std::iter::repeat(true).take(ct));
    }

    fn bytes(&mut self, data: &[u8]) {
        self.track.bytes.extend_from_slice(data);
        self.track.marks.extend(std::iter::repeat(false).take(data.len()));
    }

    fn len(&self) -> usize {
        self.track.bytes.len()
    }
}

/// Lay out a System/34 track for the given sectors. The returned marks flag the bytes that must
/// be written with a clock violation.
pub fn build_track(
    sectors: &[SectorRecord],
    gap3: Option<usize>,
    track_len: Option<usize>,
    double_density: bool,
    rng: &mut WeakBitRng,
) -> AssembledTrack {
    let (gap_byte, sync_len) = if double_density { (MFM_GAP_BYTE, 12) } else { (FM_GAP_BYTE, 6) };
    let gap3 = gap3.unwrap_or(if double_density { MFM_DEFAULT_GAP3 } else { FM_DEFAULT_GAP3 });
    let mut w = ByteWriter {
        track: AssembledTrack::default(),
    };

    // Index field
    if double_density {
        w.fill(gap_byte, 80);
        w.fill(0x00, sync_len);
        w.mark(MFM_IAM_SYNC_BYTE, 3);
        w.fill(IAM_MARK, 1);
        w.fill(gap_byte, 50);
    }
    else {
        w.fill(gap_byte, 40);
        w.fill(0x00, sync_len);
        w.mark(IAM_MARK, 1);
        w.fill(gap_byte, 26);
    }

    for sector in sectors {
        w.fill(0x00, sync_len);
        let header = [
            IDAM_MARK,
            sector.cylinder as u8,
            sector.head,
            sector.sector_id,
            sector.size_code,
        ];
        if double_density {
            w.mark(MFM_SYNC_BYTE, 3);
            w.bytes(&header);
        }
        else {
            w.mark(IDAM_MARK, 1);
            w.bytes(&header[1..]);
        }
        let header_faulted = matches!(sector.fault, Some(SectorFault::HeaderChecksum));
        let crc = crc_to_write(&sector.header_crc, field_crc(&header, double_density), header_faulted);
        w.bytes(&crc.to_be_bytes());
        w.fill(gap_byte, if double_density { 22 } else { 11 });

        if matches!(sector.fault, Some(SectorFault::DataNotFound)) {
            w.fill(gap_byte, gap3);
            continue;
        }

        let size = code_to_size(sector.size_code);
        let mut field = Vec::with_capacity(size + 1);
        field.push(sector.address_mark.to_mark());
        for i in 0..size {
            let byte = sector.data.as_slice().get(i).copied().unwrap_or(0);
            let mask = sector
                .weak_bit_mask
                .as_ref()
                .and_then(|m| m.get(i).copied())
                .unwrap_or(0);
            field.push(rng.scramble(byte, mask));
        }

        w.fill(0x00, sync_len);
        if double_density {
            w.mark(MFM_SYNC_BYTE, 3);
            w.bytes(&field);
        }
        else {
            w.mark(field[0], 1);
            w.bytes(&field[1..]);
        }
        let data_faulted = matches!(sector.fault, Some(SectorFault::DataChecksum));
        let crc = crc_to_write(&sector.data_crc, field_crc(&field, double_density), data_faulted);
        w.bytes(&crc.to_be_bytes());
        w.fill(gap_byte, gap3);
    }

    let track_len = track_len.unwrap_or(if double_density { MFM_TRACK_LEN } else { FM_TRACK_LEN });
    if w.len() < track_len {
        let pad = track_len - w.len();
        w.fill(gap_byte, pad);
    }
    else if w.len() > track_len {
        log::warn!(
            "build_track(): {} sectors need {} bytes, more than the track length of {}",
            sectors.len(),
            w.len(),
            track_len
        );
    }
    w.track
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sector(id: u8) -> SectorRecord {
        SectorRecord::new(3, 0, id, SectorBytes::filled(512, id))
    }

    #[test]
    fn test_build_then_parse_bytes() {
        let sectors: Vec<_> = (1..=9).map(sector).collect();
        let mut rng = WeakBitRng::default();
        let track = build_track(&sectors, None, None, true, &mut rng);
        assert_eq!(track.bytes.len(), MFM_TRACK_LEN);

        let (parsed, idams) = parse_track(&track.bytes, Some(&track.marks), true);
        assert_eq!(parsed.len(), 9);
        assert_eq!(idams.len(), 9);
        for (i, s) in parsed.iter().enumerate() {
            assert_eq!(s.sector_id, i as u8 + 1);
            assert_eq!(s.cylinder, 3);
            assert!(s.is_good(), "sector {} not good: {}", s.sector_id, s);
            assert_eq!(&track.bytes[s.data_offset..s.data_offset + 512], s.data.as_slice());
        }
    }

    #[test]
    fn test_missing_data_field() {
        let mut s = sector(1);
        s.fault = Some(SectorFault::DataNotFound);
        let mut rng = WeakBitRng::default();
        let track = build_track(&[s], None, None, false, &mut rng);
        let (parsed, _) = parse_track(&track.bytes, Some(&track.marks), false);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].fault, Some(SectorFault::DataNotFound));
        assert!(parsed[0].header_crc_ok());
        assert!(!parsed[0].data_crc_ok());
    }

    #[test]
    fn test_bad_data_crc_kept_separate() {
        let mut s = sector(2);
        s.fault = Some(SectorFault::DataChecksum);
        let mut rng = WeakBitRng::default();
        let track = build_track(&[s], None, None, true, &mut rng);
        let (parsed, _) = parse_track(&track.bytes, Some(&track.marks), true);
        assert!(parsed[0].header_crc_ok());
        assert!(!parsed[0].data_crc_ok());
    }
}
