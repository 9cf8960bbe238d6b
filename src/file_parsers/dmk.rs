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

    src/file_parsers/dmk.rs

    DMK track image parser.
*/

//! DMK images store the decoded bytes of every track of an IBM-format disk, along with a table
//! locating each sector header. The format was introduced by the TRS-80 emulators and is used for
//! MFM and FM disks whose sector layout is too irregular for a plain sector image.
//!
//! The 16-byte header is followed by one record per track and side, sides interleaved. Each
//! record is `track_len` bytes: a 128-byte table of 64 IDAM pointers, then the track bytes. A
//! pointer is the offset of an IDAM byte from the start of the record. Bit 15 flags a
//! double-density sector; a zero pointer ends the table.

use crate::{
    bitstream_codec::system34::{self, FM_GAP_BYTE, MFM_GAP_BYTE},
    file_parsers::{bitstream_flags, FormatCaps, ParserWriteCompatibility},
    io::{ReadSeek, ReadWriteSeek, SeekFrom},
    random::WeakBitRng,
    track_reader::{IdamEntry, TrackDataResolution, TrackRecord},
    types::{TrackBytes, TrackDataEncoding, TrackKey},
    util::read_all,
    DiskImage,
    DiskImageError,
};
use binrw::{binrw, BinRead, BinWrite};

pub const DMK_HEADER_LEN: usize = 16;
pub const DMK_IDAM_TABLE_LEN: usize = 128;
pub const DMK_MAX_IDAMS: usize = DMK_IDAM_TABLE_LEN / 2;
const DMK_MAX_TRACKS: u8 = 96;
const DMK_MAX_TRACK_LEN: u16 = 0x4000;
const IDAM_DOUBLE_DENSITY: u16 = 0x8000;
const IDAM_OFFSET_MASK: u16 = 0x3FFF;

const FLAG_SINGLE_SIDED: u8 = 0x10;
const FLAG_SINGLE_DENSITY: u8 = 0x40;
const FLAG_IGNORE_DENSITY: u8 = 0x80;

#[derive(Debug)]
#[binrw]
#[brw(little)]
pub struct DmkHeader {
    pub write_protect: u8,
    pub track_ct: u8,
    pub track_len: u16,
    pub flags: u8,
    pub reserved: [u8; 7],
    /// Nonzero only for images that refer to a real drive.
    pub native: u32,
}

impl DmkHeader {
    fn sides(&self) -> usize {
        if self.flags & FLAG_SINGLE_SIDED != 0 {
            1
        }
        else {
            2
        }
    }

    fn image_len(&self) -> usize {
        DMK_HEADER_LEN + self.track_ct as usize * self.sides() * self.track_len as usize
    }

    fn is_plausible(&self) -> bool {
        matches!(self.write_protect, 0x00 | 0xFF)
            && self.track_ct > 0
            && self.track_ct <= DMK_MAX_TRACKS
            && (self.track_len as usize) > DMK_IDAM_TABLE_LEN
            && self.track_len <= DMK_MAX_TRACK_LEN
            && self.flags & !(FLAG_SINGLE_SIDED | FLAG_SINGLE_DENSITY | FLAG_IGNORE_DENSITY) == 0
            && self.native == 0
    }
}

fn parse_idam_table(table: &[u8]) -> Vec<(usize, bool)> {
    table
        .chunks_exact(2)
        .map(|p| u16::from_le_bytes([p[0], p[1]]))
        .take_while(|&ptr| ptr != 0)
        .filter_map(|ptr| {
            let offset = (ptr & IDAM_OFFSET_MASK) as usize;
            // Pointers into the table itself are invalid.
            (offset >= DMK_IDAM_TABLE_LEN).then(|| (offset - DMK_IDAM_TABLE_LEN, ptr & IDAM_DOUBLE_DENSITY != 0))
        })
        .collect()
}

/// Decode one track record.
fn read_track(key: TrackKey, record: &[u8], single_density: bool) -> TrackRecord {
    let (table, bytes) = record.split_at(DMK_IDAM_TABLE_LEN);
    let pointers = parse_idam_table(table);

    let double_density = match pointers.first() {
        Some(&(_, dd)) => dd,
        None => !single_density,
    };
    let encoding = if double_density { TrackDataEncoding::Mfm } else { TrackDataEncoding::Fm };

    let (sectors, idams) = if pointers.is_empty() {
        system34::parse_track(bytes, None, double_density)
    }
    else {
        let sectors = pointers
            .iter()
            .filter_map(|&(offset, dd)| system34::parse_sector_at(bytes, None, offset, dd))
            .collect();
        let idams = pointers
            .iter()
            .map(|&(offset, double_density)| IdamEntry {
                offset,
                double_density,
            })
            .collect();
        (sectors, idams)
    };

    let mut track = TrackRecord::new(key, encoding, TrackDataResolution::BitStream);
    track.raw = TrackBytes::from(bytes);
    track.sectors = sectors;
    track.idams = idams;
    track.dedupe_sectors();
    track
}

/// Return the track bytes and IDAM list to store for a track.
fn track_bytes(track: &TrackRecord, rng: &mut WeakBitRng) -> (Vec<u8>, Vec<IdamEntry>) {
    let double_density = track.encoding != TrackDataEncoding::Fm;
    if track.resolution == TrackDataResolution::MetaSector {
        let assembled = system34::build_track(&track.sectors, None, None, double_density, rng);
        let (_, idams) = system34::parse_track(&assembled.bytes, Some(&assembled.marks), double_density);
        (assembled.bytes, idams)
    }
    else {
        (track.raw.as_slice().to_vec(), track.idams.clone())
    }
}

pub struct DmkFormat;

impl DmkFormat {
    pub fn extensions() -> Vec<&'static str> {
        vec!["dmk"]
    }

    pub fn capabilities() -> FormatCaps {
        bitstream_flags()
            | FormatCaps::CAP_VARIABLE_SSPT
            | FormatCaps::CAP_DATA_DELETED
            | FormatCaps::CAP_ENCODING_FM
            | FormatCaps::CAP_ENCODING_MFM
    }

    pub fn detect<RWS: ReadSeek>(mut image: RWS) -> bool {
        let Ok(len) = crate::util::get_length(&mut image)
        else {
            return false;
        };
        match DmkHeader::read(&mut image) {
            Ok(header) => header.is_plausible() && header.image_len() == len as usize,
            Err(_) => false,
        }
    }

    pub fn load_image<RWS: ReadSeek>(mut read_buf: RWS, image: &mut DiskImage) -> Result<(), DiskImageError> {
        let data = read_all(&mut read_buf)?;
        let header = DmkHeader::read(&mut crate::io::Cursor::new(&data))?;
        if !header.is_plausible() {
            return Err(DiskImageError::format("invalid DMK header"));
        }
        let sides = header.sides();
        let single_density = header.flags & FLAG_SINGLE_DENSITY != 0;
        log::debug!(
            "DmkFormat::load_image(): {} tracks, {} sides, track length {}, flags {:02X}",
            header.track_ct,
            sides,
            header.track_len,
            header.flags
        );
        if data.len() < header.image_len() {
            log::warn!(
                "DmkFormat::load_image(): image is {} bytes, expected {}",
                data.len(),
                header.image_len()
            );
        }

        let record_len = header.track_len as usize;
        for c in 0..header.track_ct as u16 {
            for h in 0..sides {
                let start = DMK_HEADER_LEN + (c as usize * sides + h) * record_len;
                let Some(record) = data.get(start..start + record_len)
                else {
                    return Err(DiskImageError::format(format!("DMK image ends before track {}.{}", c, h)));
                };
                let track = read_track(TrackKey::from((c, h as u8)), record, single_density);
                log::trace!(
                    "DmkFormat::load_image(): {} {} with {} sectors",
                    track.key,
                    track.encoding,
                    track.sectors.len()
                );
                image.insert_track(track);
            }
        }
        image.set_readonly(header.write_protect == 0xFF);
        Ok(())
    }

    pub fn can_write(image: &DiskImage) -> ParserWriteCompatibility {
        if image.track_ct() == 0
            || !image
                .track_iter()
                .all(|t| matches!(t.encoding, TrackDataEncoding::Mfm | TrackDataEncoding::Fm))
        {
            return ParserWriteCompatibility::Incompatible;
        }
        let lossy = image
            .track_iter()
            .any(|t| t.key.half_step || t.resolution == TrackDataResolution::FluxStream || t.idams.len() > DMK_MAX_IDAMS);
        if lossy {
            ParserWriteCompatibility::DataLoss
        }
        else {
            ParserWriteCompatibility::Ok
        }
    }

    pub fn save_image<RWS: ReadWriteSeek>(image: &DiskImage, output: &mut RWS) -> Result<(), DiskImageError> {
        let cylinders = image.cylinders();
        let heads = image.heads().max(1);
        if cylinders > DMK_MAX_TRACKS as u16 {
            return Err(DiskImageError::parameter(format!(
                "{} cylinders is more than a DMK image can hold",
                cylinders
            )));
        }
        let single_density = image.track_iter().all(|t| t.encoding == TrackDataEncoding::Fm);

        let mut rng = WeakBitRng::default();
        let mut tracks = Vec::with_capacity(cylinders as usize * heads as usize);
        for c in 0..cylinders {
            for h in 0..heads {
                let key = TrackKey::from((c, h));
                let entry = match image.track(key) {
                    Some(track) => track_bytes(track, &mut rng),
                    None => (Vec::new(), Vec::new()),
                };
                tracks.push(entry);
            }
        }

        let data_len = tracks.iter().map(|(bytes, _)| bytes.len()).max().unwrap_or(0);
        let track_len = DMK_IDAM_TABLE_LEN + data_len.max(if single_density {
            system34::FM_TRACK_LEN
        }
        else {
            system34::MFM_TRACK_LEN
        });
        if track_len > DMK_MAX_TRACK_LEN as usize {
            return Err(DiskImageError::format(format!(
                "a {} byte track is too long for a DMK image",
                data_len
            )));
        }

        let header = DmkHeader {
            write_protect: if image.is_readonly() { 0xFF } else { 0x00 },
            track_ct: cylinders as u8,
            track_len: track_len as u16,
            flags: if heads == 1 { FLAG_SINGLE_SIDED } else { 0 }
                | if single_density { FLAG_SINGLE_DENSITY } else { 0 },
            reserved: [0; 7],
            native: 0,
        };
        output.seek(SeekFrom::Start(0))?;
        header.write(output)?;

        for (bytes, idams) in tracks {
            let mut record = vec![0u8; track_len];
            if idams.len() > DMK_MAX_IDAMS {
                log::warn!(
                    "DmkFormat::save_image(): {} IDAMs on a track, only {} can be stored",
                    idams.len(),
                    DMK_MAX_IDAMS
                );
            }
            for (i, idam) in idams.iter().take(DMK_MAX_IDAMS).enumerate() {
                let mut ptr = (idam.offset + DMK_IDAM_TABLE_LEN) as u16 & IDAM_OFFSET_MASK;
                if idam.double_density {
                    ptr |= IDAM_DOUBLE_DENSITY;
                }
                record[i * 2..i * 2 + 2].copy_from_slice(&ptr.to_le_bytes());
            }
            let gap = if single_density { FM_GAP_BYTE } else { MFM_GAP_BYTE };
            record[DMK_IDAM_TABLE_LEN..].fill(gap);
            record[DMK_IDAM_TABLE_LEN..DMK_IDAM_TABLE_LEN + bytes.len()].copy_from_slice(&bytes);
            output.write_all(&record)?;
        }
        log::debug!(
            "DmkFormat::save_image(): wrote {} tracks x {} sides, track length {}",
            cylinders,
            heads,
            track_len
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        file_parsers::{DiskImageFileFormat, ImageParser},
        io::Cursor,
        track_reader::SectorRecord,
        types::{DiskCh, SectorBytes},
    };

    fn sample_image(encoding: TrackDataEncoding, heads: u8) -> DiskImage {
        let mut image = DiskImage::default();
        for c in 0..3u16 {
            for h in 0..heads {
                let sectors = (1..=5)
                    .map(|s| SectorRecord::new(c, h, s, SectorBytes::filled(512, c as u8 * 16 + s)))
                    .collect();
                image.add_sector_track(DiskCh::new(c, h), encoding, sectors);
            }
        }
        image
    }

    #[test]
    fn test_mfm_round_trip() {
        let mut image = sample_image(TrackDataEncoding::Mfm, 2);
        assert_eq!(DiskImageFileFormat::Dmk.can_write(&image), ParserWriteCompatibility::Ok);
        let mut out = Cursor::new(Vec::new());
        image.save(DiskImageFileFormat::Dmk, &mut out).unwrap();
        let bytes = out.into_inner();
        assert_eq!(bytes[1], 3);
        assert_eq!(bytes[4] & FLAG_SINGLE_SIDED, 0);
        let track_len = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
        assert_eq!(bytes.len(), DMK_HEADER_LEN + 3 * 2 * track_len);
        // First IDAM pointer of track 0 is double density.
        assert_ne!(bytes[DMK_HEADER_LEN + 1] & 0x80, 0);

        let loaded = DiskImage::load(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(loaded.source_format, Some(DiskImageFileFormat::Dmk));
        assert_eq!(loaded.track_ct(), 6);
        let track = loaded.track((2, 1)).unwrap();
        assert_eq!(track.encoding, TrackDataEncoding::Mfm);
        assert_eq!(track.sectors.len(), 5);
        assert_eq!(track.idams.len(), 5);
        let sector = loaded.sector(DiskCh::new(2, 1), 3).unwrap();
        assert!(sector.is_good());
        assert_eq!(sector.data.as_slice(), &[35u8; 512][..]);
    }

    #[test]
    fn test_fm_single_sided() {
        let mut image = sample_image(TrackDataEncoding::Fm, 1);
        let mut out = Cursor::new(Vec::new());
        image.save(DiskImageFileFormat::Dmk, &mut out).unwrap();
        let bytes = out.into_inner();
        assert_eq!(bytes[4], FLAG_SINGLE_SIDED | FLAG_SINGLE_DENSITY);

        let loaded = DiskImage::load_as(DiskImageFileFormat::Dmk, &mut Cursor::new(bytes)).unwrap();
        assert_eq!(loaded.heads(), 1);
        let track = loaded.track((1, 0)).unwrap();
        assert_eq!(track.encoding, TrackDataEncoding::Fm);
        assert!(track.sectors.iter().all(|s| s.is_good()));
    }

    #[test]
    fn test_rejects_gcr() {
        let image = crate::file_system::cbm::CbmFileSystem::format(
            crate::file_system::cbm::CbmGeometry::D64_35,
            "GCR",
            "GC",
        )
        .unwrap();
        assert_eq!(
            DiskImageFileFormat::Dmk.can_write(&image),
            ParserWriteCompatibility::Incompatible
        );
    }
}
