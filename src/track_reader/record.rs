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

    src/track_reader/record.rs

    Track and sector records produced by the track reader and container codecs.
*/

use crate::{
    bitstream_codec::gcr,
    flux::FluxBuffer,
    latency::LatencyProfile,
    types::{DataAddressMark, IntegrityCheck, SectorBytes, SectorFault, TrackBytes, TrackDataEncoding, TrackKey},
    DiskImageError,
};
use bit_vec::BitVec;
use std::fmt::{self, Display, Formatter};

/// An entry in a track's IDAM table.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IdamEntry {
    /// Byte offset of the address mark within the raw track bytes.
    pub offset: usize,
    pub double_density: bool,
}

/// The level of detail at which a track's data is held.
///  - MetaSector tracks come from sector images. The raw bytes are the sector data laid end to end.
///  - BitStream tracks hold decoded track bytes: MFM/FM data bytes, or raw GCR bytes for CBM.
///  - FluxStream tracks additionally retain the flux they were decoded from.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TrackDataResolution {
    #[default]
    MetaSector,
    BitStream,
    FluxStream,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SectorRecord {
    /// Cylinder number recorded in the sector header. For CBM sectors this is the track number.
    pub cylinder: u16,
    pub head: u8,
    pub sector_id: u8,
    pub size_code: u8,
    /// Offset of the first data byte within the owning track's raw bytes.
    pub data_offset: usize,
    pub data_size: usize,
    pub header_crc: IntegrityCheck,
    pub data_crc: IntegrityCheck,
    pub address_mark: DataAddressMark,
    /// One mask byte per data byte; set bits read back non-deterministically.
    pub weak_bit_mask: Option<Vec<u8>>,
    pub fault: Option<SectorFault>,
    pub data: SectorBytes,
}

impl SectorRecord {
    /// Create a sector with no integrity information, as read from a sector image.
    pub fn new(cylinder: u16, head: u8, sector_id: u8, data: SectorBytes) -> Self {
        let data_size = data.len();
        SectorRecord {
            cylinder,
            head,
            sector_id,
            size_code: size_to_code(data_size),
            data_offset: 0,
            data_size,
            header_crc: IntegrityCheck::NotApplicable,
            data_crc: IntegrityCheck::NotApplicable,
            address_mark: DataAddressMark::Normal,
            weak_bit_mask: None,
            fault: None,
            data,
        }
    }

    /// Return false only if a header check was performed and failed.
    pub fn header_crc_ok(&self) -> bool {
        !self.header_crc.is_error() && !matches!(self.fault, Some(SectorFault::HeaderChecksum))
    }

    /// Return true if the sector's data was found and did not fail a check.
    pub fn data_crc_ok(&self) -> bool {
        !self.data_crc.is_error() && matches!(self.fault, None | Some(SectorFault::HeaderChecksum))
    }

    pub fn is_good(&self) -> bool {
        self.header_crc_ok() && self.data_crc_ok()
    }

    pub fn has_weak_bits(&self) -> bool {
        self.weak_bit_mask
            .as_ref()
            .map(|mask| mask.iter().any(|&b| b != 0))
            .unwrap_or(false)
    }

    /// Rank used to choose between duplicate reads of one sector.
    fn rank(&self) -> u8 {
        match (self.header_crc_ok(), self.data_crc_ok()) {
            (true, true) => 2,
            (_, true) => 1,
            _ => 0,
        }
    }
}

impl Display for SectorRecord {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "[c:{} h:{} s:{} n:{}] size:{} dam:{} header:{} data:{}",
            self.cylinder, self.head, self.sector_id, self.size_code, self.data_size, self.address_mark, self.header_crc,
            self.data_crc
        )?;
        if let Some(fault) = self.fault {
            write!(f, " fault:{}", fault)?;
        }
        Ok(())
    }
}

/// Convert a sector size in bytes to an IBM size code (128 << n).
pub fn size_to_code(size: usize) -> u8 {
    let mut code = 0u8;
    while (128usize << code) < size && code < 6 {
        code += 1;
    }
    code
}

/// Convert an IBM size code to a sector size in bytes. Codes above 6 are clamped.
pub fn code_to_size(code: u8) -> usize {
    128usize << code.min(6)
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackRecord {
    pub key: TrackKey,
    pub encoding: TrackDataEncoding,
    pub resolution: TrackDataResolution,
    /// Detected or nominal cell time in nanoseconds.
    pub cell_ns: f64,
    /// Container density byte (NIB) or CBM speed zone, if known.
    pub density: Option<u8>,
    pub sectors: Vec<SectorRecord>,
    pub idams: Vec<IdamEntry>,
    pub raw: TrackBytes,
    /// Length of the track bitstream in bits, if it is not a whole number of bytes.
    pub bit_len: Option<usize>,
    pub latency: Option<LatencyProfile>,
    pub flux: Option<FluxBuffer>,
}

impl TrackRecord {
    pub fn new(key: TrackKey, encoding: TrackDataEncoding, resolution: TrackDataResolution) -> Self {
        TrackRecord {
            key,
            encoding,
            resolution,
            cell_ns: encoding.nominal_cell_ns(),
            density: None,
            sectors: Vec::new(),
            idams: Vec::new(),
            raw: TrackBytes::new(),
            bit_len: None,
            latency: None,
            flux: None,
        }
    }

    /// Build a sector-level track by laying out the sectors' data end to end.
    pub fn from_sectors(key: TrackKey, encoding: TrackDataEncoding, sectors: Vec<SectorRecord>) -> Self {
        let mut track = TrackRecord::new(key, encoding, TrackDataResolution::MetaSector);
        let total = sectors.iter().map(|s| s.data.len()).sum();
        let mut raw = TrackBytes::with_capacity(total);
        let mut sectors = sectors;
        for sector in sectors.iter_mut() {
            sector.data_offset = raw.len();
            sector.data_size = sector.data.len();
            raw.extend_from_slice(sector.data.as_slice());
        }
        track.raw = raw;
        track.sectors = sectors;
        track
    }

    pub fn cylinder(&self) -> u16 {
        self.key.ch.c()
    }

    pub fn head(&self) -> u8 {
        self.key.ch.h()
    }

    pub fn sector(&self, sector_id: u8) -> Option<&SectorRecord> {
        self.sectors.iter().find(|s| s.sector_id == sector_id)
    }

    pub fn sector_mut(&mut self, sector_id: u8) -> Option<&mut SectorRecord> {
        self.sectors.iter_mut().find(|s| s.sector_id == sector_id)
    }

    /// Replace the data of a sector, keeping the raw track bytes in step for sector-level tracks.
    pub fn write_sector(&mut self, sector_id: u8, data: &[u8]) -> Result<(), DiskImageError> {
        let resolution = self.resolution;
        let sector = self
            .sectors
            .iter_mut()
            .find(|s| s.sector_id == sector_id)
            .ok_or_else(|| DiskImageError::not_found(format!("sector {} on track {}", sector_id, self.key)))?;
        if data.len() != sector.data.len() {
            return Err(DiskImageError::parameter(format!(
                "TrackRecord::write_sector(): expected {} bytes, got {}",
                sector.data.len(),
                data.len()
            )));
        }
        sector.data.as_mut_slice().copy_from_slice(data);
        sector.fault = None;
        sector.weak_bit_mask = None;
        sector.data_crc = IntegrityCheck::NotApplicable;
        if resolution == TrackDataResolution::MetaSector {
            let range = sector.data_offset..sector.data_offset + data.len();
            if range.end <= self.raw.len() {
                self.raw.as_mut_slice()[range].copy_from_slice(data);
            }
        }
        else {
            // The encoded bitstream no longer matches; the track is re-encoded on write.
            self.resolution = TrackDataResolution::MetaSector;
            self.flux = None;
            self.relayout();
        }
        Ok(())
    }

    /// Rebuild the raw bytes of a track from its sectors, discarding any encoded bitstream.
    fn relayout(&mut self) {
        let sectors = std::mem::take(&mut self.sectors);
        let rebuilt = TrackRecord::from_sectors(self.key, self.encoding, sectors);
        self.raw = rebuilt.raw;
        self.sectors = rebuilt.sectors;
        self.idams.clear();
        self.bit_len = None;
    }

    /// Sectors that carry a fault.
    pub fn failed_sectors(&self) -> impl Iterator<Item = &SectorRecord> {
        self.sectors.iter().filter(|s| !s.is_good())
    }

    /// Return true if any sector failed in a way a re-read might fix.
    pub fn needs_retry(&self) -> bool {
        self.sectors
            .iter()
            .any(|s| !s.data_crc_ok() && s.fault.map(|f| f.is_recoverable()).unwrap_or(true))
    }

    /// SHA1 fingerprint of the raw track bytes.
    pub fn fingerprint(&self) -> String {
        sha1_smol::Sha1::from(self.raw.as_slice()).digest().to_string()
    }

    /// Resolve duplicate reads of the same (head, sector_id) within this track. A read with both
    /// checks valid is preferred, then one with valid data, otherwise the first read is kept.
    pub fn dedupe_sectors(&mut self) {
        let mut kept: Vec<SectorRecord> = Vec::with_capacity(self.sectors.len());
        for sector in self.sectors.drain(..) {
            match kept
                .iter_mut()
                .find(|k| k.head == sector.head && k.sector_id == sector.sector_id)
            {
                Some(existing) => {
                    if sector.rank() > existing.rank() {
                        log::trace!(
                            "TrackRecord::dedupe_sectors(): replacing duplicate sector {} on {}",
                            sector.sector_id,
                            self.key
                        );
                        *existing = sector;
                    }
                }
                None => kept.push(sector),
            }
        }
        self.sectors = kept;
    }

    /// The raw bytes of the track as a bitstream, trimmed to its bit length.
    pub fn bitstream(&self) -> BitVec {
        let mut bits = BitVec::from_bytes(self.raw.as_slice());
        if let Some(len) = self.bit_len {
            bits.truncate(len);
        }
        bits
    }

    /// Merge a re-read of this track. Sectors whose data did not verify are replaced with a
    /// re-read that does; all other sectors are kept. Returns the number of sectors replaced.
    ///
    /// The raw bytes are kept in step with the replaced sectors. GCR tracks hold encoded bytes, so
    /// a re-encoded data block is spliced into the bitstream. If a block cannot be located the
    /// track is rebuilt from its sectors. Flux of a merged track no longer matches its data and is
    /// dropped.
    pub fn merge_retry(&mut self, retry: &TrackRecord) -> usize {
        let encoded = self.encoding == TrackDataEncoding::GcrCbm && self.resolution != TrackDataResolution::MetaSector;
        let mut bits = encoded.then(|| self.bitstream());
        let mut rebuild = false;
        let mut replaced = 0;

        for sector in self.sectors.iter_mut().filter(|s| !s.data_crc_ok()) {
            let Some(candidate) = retry
                .sectors
                .iter()
                .find(|r| r.head == sector.head && r.sector_id == sector.sector_id && r.data_crc_ok())
            else {
                continue;
            };

            let mut merged = candidate.clone();
            match bits.as_mut() {
                Some(bits) => {
                    if !gcr::splice_data_block(bits, sector.sector_id, candidate.data.as_slice()) {
                        rebuild = true;
                    }
                    merged.data_offset = sector.data_offset;
                }
                None => {
                    let offset = sector.data_offset;
                    let end = offset + candidate.data.len();
                    if end <= self.raw.len() {
                        self.raw.as_mut_slice()[offset..end].copy_from_slice(candidate.data.as_slice());
                        // Decoded MFM and FM tracks store the data CRC after the data.
                        let crc_src = candidate.data_offset + candidate.data_size;
                        if self.resolution != TrackDataResolution::MetaSector
                            && retry.resolution != TrackDataResolution::MetaSector
                            && crc_src + 2 <= retry.raw.len()
                            && end + 2 <= self.raw.len()
                        {
                            self.raw.as_mut_slice()[end..end + 2]
                                .copy_from_slice(&retry.raw.as_slice()[crc_src..crc_src + 2]);
                        }
                    }
                    merged.data_offset = if offset + merged.data_size <= self.raw.len() { offset } else { 0 };
                }
            }
            *sector = merged;
            replaced += 1;
        }

        if replaced == 0 {
            return 0;
        }
        log::debug!("TrackRecord::merge_retry(): {} replaced {} sector(s)", self.key, replaced);

        if rebuild {
            log::warn!(
                "TrackRecord::merge_retry(): {} has a data block that could not be located, rebuilding from sectors",
                self.key
            );
            self.resolution = TrackDataResolution::MetaSector;
            self.relayout();
        }
        else if let Some(bits) = bits {
            self.raw = TrackBytes::from(bits.to_bytes());
        }
        if self.flux.take().is_some() && self.resolution == TrackDataResolution::FluxStream {
            self.resolution = TrackDataResolution::BitStream;
        }
        replaced
    }

    /// Check the structural invariants of the record: sector data lies within the raw bytes and
    /// the IDAM table is sorted without overlap.
    pub fn check_invariants(&self) -> Result<(), DiskImageError> {
        // GCR tracks are circular; a data block may wrap past the end of the raw bytes.
        let circular = self.encoding == TrackDataEncoding::GcrCbm && self.resolution != TrackDataResolution::MetaSector;
        for sector in &self.sectors {
            let end = if circular { sector.data_offset + 1 } else { sector.data_offset + sector.data_size };
            if sector.data_size > 0 && end > self.raw.len() {
                return Err(DiskImageError::consistency(format!(
                    "{}: sector {} data at {}+{} exceeds track length {}",
                    self.key,
                    sector.sector_id,
                    sector.data_offset,
                    sector.data_size,
                    self.raw.len()
                )));
            }
        }
        if self.idams.windows(2).any(|w| w[1].offset <= w[0].offset) {
            return Err(DiskImageError::consistency(format!("{}: IDAM table is not sorted", self.key)));
        }
        if self.idams.iter().any(|i| i.offset >= self.raw.len()) {
            return Err(DiskImageError::consistency(format!("{}: IDAM offset out of range", self.key)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IntegrityField;

    fn sector(id: u8, data_ok: bool, header_ok: bool) -> SectorRecord {
        let mut s = SectorRecord::new(0, 0, id, SectorBytes::filled(256, id));
        s.header_crc = IntegrityCheck::Crc16(IntegrityField::new(1, if header_ok { 1 } else { 2 }));
        s.data_crc = IntegrityCheck::Crc16(IntegrityField::new(1, if data_ok { 1 } else { 2 }));
        if !data_ok {
            s.fault = Some(SectorFault::DataChecksum);
        }
        s
    }

    #[test]
    fn test_size_codes() {
        assert_eq!(size_to_code(128), 0);
        assert_eq!(size_to_code(256), 1);
        assert_eq!(size_to_code(512), 2);
        assert_eq!(code_to_size(3), 1024);
        assert_eq!(code_to_size(9), 8192);
    }

    #[test]
    fn test_dedupe_prefers_valid() {
        let mut track = TrackRecord::new(TrackKey::from((0, 0)), TrackDataEncoding::Mfm, TrackDataResolution::BitStream);
        track.sectors = vec![sector(1, false, true), sector(1, true, false), sector(1, true, true)];
        track.dedupe_sectors();
        assert_eq!(track.sectors.len(), 1);
        assert!(track.sectors[0].is_good());

        track.sectors = vec![sector(2, false, false), sector(2, false, true)];
        track.dedupe_sectors();
        assert!(!track.sectors[0].header_crc_ok());
    }

    #[test]
    fn test_merge_retry() {
        let mut first = TrackRecord::from_sectors(
            TrackKey::from((0, 0)),
            TrackDataEncoding::Mfm,
            vec![sector(1, true, true), sector(2, false, true)],
        );
        let retry = TrackRecord::from_sectors(
            TrackKey::from((0, 0)),
            TrackDataEncoding::Mfm,
            vec![sector(1, false, true), sector(2, true, true)],
        );
        assert_eq!(first.merge_retry(&retry), 1);
        assert!(first.sectors.iter().all(|s| s.data_crc_ok()));
        assert!(first.check_invariants().is_ok());
    }

    fn gcr_track(faults: &[(u8, SectorFault)]) -> TrackRecord {
        let sectors: Vec<SectorRecord> = (0..19u8)
            .map(|id| {
                let mut s = SectorRecord::new(20, 0, id, SectorBytes::filled(256, id + 1));
                s.fault = faults.iter().find(|(f_id, _)| *f_id == id).map(|(_, f)| *f);
                s
            })
            .collect();
        let params = crate::bitstream_codec::TrackEncodeParams {
            track: 20,
            ..Default::default()
        };
        let bytes = gcr::encode_track(&sectors, &params, &mut crate::random::WeakBitRng::default());
        crate::track_reader::TrackReader::decode_bitstream(
            TrackKey::from((19, 0)),
            TrackDataEncoding::GcrCbm,
            &BitVec::from_bytes(&bytes),
        )
        .unwrap()
    }

    #[test]
    fn test_merge_retry_reencodes_gcr() {
        let clean = gcr_track(&[]);
        assert_eq!(clean.sectors.len(), 19);
        assert!(clean.sectors.iter().all(|s| s.is_good()));

        let mut damaged = gcr_track(&[(5, SectorFault::DataChecksum), (6, SectorFault::BadGcr)]);
        assert!(!damaged.sector(5).unwrap().data_crc_ok());
        assert!(!damaged.sector(6).unwrap().data_crc_ok());
        assert_ne!(damaged.raw.as_slice(), clean.raw.as_slice());

        assert_eq!(damaged.merge_retry(&clean), 2);
        assert_eq!(damaged.resolution, TrackDataResolution::BitStream);
        // The spliced blocks are identical to a clean encoding.
        assert_eq!(damaged.raw.as_slice(), clean.raw.as_slice());

        let reread = crate::track_reader::TrackReader::decode_bitstream(
            damaged.key,
            TrackDataEncoding::GcrCbm,
            &damaged.bitstream(),
        )
        .unwrap();
        assert_eq!(reread.sectors.len(), 19);
        assert!(reread.sectors.iter().all(|s| s.is_good()));
        assert_eq!(reread.sector(5).unwrap().data.as_slice(), &[6u8; 256][..]);
    }

    #[test]
    fn test_merge_retry_rebuilds_missing_gcr_block() {
        let clean = gcr_track(&[]);
        let mut damaged = gcr_track(&[(3, SectorFault::DataNotFound)]);
        assert_eq!(damaged.sector(3).unwrap().fault, Some(SectorFault::DataNotFound));

        assert_eq!(damaged.merge_retry(&clean), 1);
        assert_eq!(damaged.resolution, TrackDataResolution::MetaSector);
        assert!(damaged.sectors.iter().all(|s| s.is_good()));
        assert_eq!(damaged.sector(3).unwrap().data.as_slice(), &[4u8; 256][..]);
        assert!(damaged.check_invariants().is_ok());
    }
}
