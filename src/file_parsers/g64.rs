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

    src/file_parsers/g64.rs

    G64 GCR bitstream image parser.
*/

//! A G64 image holds the raw GCR bytes of up to 84 half-tracks of a 1541 disk.
//!
//! The 12-byte header (`GCR-1541`, version, track count, maximum track size) is followed by a
//! table of 32-bit track offsets and a table of 32-bit speed zones, one entry per half-track.
//! Entry 0 is track 1. A zero offset marks an absent track. Each track is stored as a 16-bit
//! length followed by that many GCR bytes.

use crate::{
    bitstream_codec::gcr,
    file_parsers::{bitstream_flags, gcr_track, FormatCaps, ParserWriteCompatibility},
    file_system::cbm::CbmGeometry,
    io::{ReadBytesExt, ReadSeek, ReadWriteSeek, SeekFrom},
    random::WeakBitRng,
    types::TrackKey,
    DiskImage,
    DiskImageError,
};
use binrw::{binrw, BinRead, BinWrite};

pub const G64_SIGNATURE: &[u8; 8] = b"GCR-1541";
pub const G64_VERSION: u8 = 0;
pub const G64_TRACK_CT: u8 = 84;
pub const G64_MAX_TRACK_SIZE: u16 = 7928;
const G64_HEADER_LEN: usize = 12;

#[derive(Debug)]
#[binrw]
#[brw(little)]
pub struct G64Header {
    pub signature: [u8; 8],
    pub version: u8,
    pub track_ct: u8,
    pub max_track_size: u16,
    #[br(count = track_ct)]
    pub offsets: Vec<u32>,
    #[br(count = track_ct)]
    pub speeds: Vec<u32>,
}

impl G64Header {
    fn table_len(track_ct: u8) -> usize {
        G64_HEADER_LEN + track_ct as usize * 8
    }
}

pub struct G64Format;

impl G64Format {
    pub fn extensions() -> Vec<&'static str> {
        vec!["g64"]
    }

    pub fn capabilities() -> FormatCaps {
        bitstream_flags()
            | FormatCaps::CAP_ENCODING_GCR
            | FormatCaps::CAP_HALF_TRACKS
            | FormatCaps::CAP_TRACK_DENSITY
            | FormatCaps::CAP_WEAK_BITS
    }

    pub fn detect<RWS: ReadSeek>(mut image: RWS) -> bool {
        if image.seek(SeekFrom::Start(0)).is_err() {
            return false;
        }
        let mut signature = [0u8; 8];
        if image.read_exact(&mut signature).is_err() {
            return false;
        }
        &signature == G64_SIGNATURE
    }

    pub fn load_image<RWS: ReadSeek>(mut read_buf: RWS, image: &mut DiskImage) -> Result<(), DiskImageError> {
        read_buf.seek(SeekFrom::Start(0))?;
        let header = G64Header::read(&mut read_buf)?;
        if &header.signature != G64_SIGNATURE {
            return Err(DiskImageError::format("missing G64 signature"));
        }
        if header.version != G64_VERSION {
            log::warn!("G64Format::load_image(): unexpected version {}", header.version);
        }
        log::debug!(
            "G64Format::load_image(): {} track entries, max track size {}",
            header.track_ct,
            header.max_track_size
        );

        for (i, (&offset, &speed)) in header.offsets.iter().zip(header.speeds.iter()).enumerate() {
            if offset == 0 {
                continue;
            }
            let Ok(halftrack) = u8::try_from(i + 2)
            else {
                return Err(DiskImageError::format(format!(
                    "G64 track entry {} is beyond the last addressable half-track",
                    i
                )));
            };
            let key = TrackKey::from_halftrack(halftrack);
            read_buf.seek(SeekFrom::Start(offset as u64))?;
            let len = read_buf.read_u16_le()? as usize;
            if len > header.max_track_size as usize {
                return Err(DiskImageError::format(format!(
                    "{}: track length {} exceeds the maximum of {}",
                    key, len, header.max_track_size
                )));
            }
            let mut bytes = vec![0u8; len];
            read_buf.read_exact(&mut bytes)?;

            // Speeds above 3 are offsets to per-byte speed maps, which are not kept.
            let density = (speed <= gcr_track::DENSITY_MASK as u32).then_some(speed as u8);
            let track = gcr_track::decode_track(key, &bytes, density)?;
            image.insert_track(track);
        }

        gcr_track::read_header_metadata(image, CbmGeometry::D64_35);
        Ok(())
    }

    pub fn can_write(image: &DiskImage) -> ParserWriteCompatibility {
        gcr_track::write_compatibility(image, G64_TRACK_CT + 1)
    }

    pub fn save_image<RWS: ReadWriteSeek>(image: &DiskImage, output: &mut RWS) -> Result<(), DiskImageError> {
        let track_ct = G64_TRACK_CT as usize;
        let mut header = G64Header {
            signature: *G64_SIGNATURE,
            version: G64_VERSION,
            track_ct: G64_TRACK_CT,
            max_track_size: G64_MAX_TRACK_SIZE,
            offsets: vec![0; track_ct],
            speeds: (0..track_ct)
                .map(|i| gcr::speed_zone((i / 2) as u8 + 1) as u32)
                .collect(),
        };

        let disk_id = gcr_track::disk_id(image);
        let mut rng = WeakBitRng::default();
        let data_start = G64Header::table_len(G64_TRACK_CT);
        let mut body = Vec::new();
        for track in image.track_iter().filter(|t| t.head() == 0) {
            let index = track.key.halftrack() as usize - 2;
            if index >= track_ct {
                log::warn!("G64Format::save_image(): {} is beyond the last G64 track, skipping", track.key);
                continue;
            }
            let mut bytes = gcr_track::track_bytes(track, disk_id, &mut rng);
            if bytes.len() > G64_MAX_TRACK_SIZE as usize {
                log::warn!(
                    "G64Format::save_image(): {} holds {} bytes, truncating to {}",
                    track.key,
                    bytes.len(),
                    G64_MAX_TRACK_SIZE
                );
                bytes.truncate(G64_MAX_TRACK_SIZE as usize);
            }
            header.offsets[index] = (data_start + body.len()) as u32;
            header.speeds[index] = gcr_track::track_zone(track) as u32;
            body.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
            body.extend_from_slice(&bytes);
        }

        output.seek(SeekFrom::Start(0))?;
        header.write(output)?;
        output.write_all(&body)?;
        log::debug!(
            "G64Format::save_image(): wrote {} tracks, {} bytes",
            header.offsets.iter().filter(|&&o| o != 0).count(),
            data_start + body.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        file_parsers::{DiskImageFileFormat, ImageParser},
        file_system::{cbm::CbmFileSystem, FileSystem},
        io::Cursor,
        types::DiskImageFlags,
    };

    #[test]
    fn test_round_trip_through_gcr() {
        let mut image = CbmFileSystem::format(CbmGeometry::D64_35, "GCR DISK", "G6").unwrap();
        {
            let mut fs = CbmFileSystem::mount_mut(&mut image).unwrap();
            fs.inject("HELLO", b"HELLO WORLD").unwrap();
        }
        assert_eq!(DiskImageFileFormat::G64.can_write(&image), ParserWriteCompatibility::Ok);

        let mut out = Cursor::new(Vec::new());
        image.save(DiskImageFileFormat::G64, &mut out).unwrap();
        let bytes = out.into_inner();
        assert_eq!(&bytes[..8], b"GCR-1541");
        assert_eq!(bytes[9], 84);
        // Track 1 is zone 3, track 35 is zone 0.
        let speed = |i: usize| u32::from_le_bytes(bytes[12 + 84 * 4 + i * 4..][..4].try_into().unwrap());
        assert_eq!(speed(0), 3);
        assert_eq!(speed(68), 0);

        let mut cursor = Cursor::new(bytes);
        let loaded = DiskImage::load(&mut cursor).unwrap();
        assert_eq!(loaded.source_format, Some(DiskImageFileFormat::G64));
        assert_eq!(loaded.track_ct(), 35);
        assert_eq!(loaded.metadata.name.as_deref(), Some("GCR DISK"));
        assert!(loaded.track_iter().all(|t| t.sectors.iter().all(|s| s.is_good())));

        let fs = CbmFileSystem::mount(&loaded).unwrap();
        assert_eq!(fs.extract("HELLO").unwrap(), b"HELLO WORLD");
    }

    #[test]
    fn test_half_track_keys() {
        let mut image = CbmFileSystem::format(CbmGeometry::D64_35, "HALF", "HT").unwrap();
        let mut half = image.track(TrackKey::from((0, 0))).unwrap().clone();
        half.key = TrackKey::new(0, 0, true);
        image.insert_track(half);
        assert!(image.flags.contains(DiskImageFlags::HALF_TRACKS));

        let mut out = Cursor::new(Vec::new());
        image.save(DiskImageFileFormat::G64, &mut out).unwrap();
        let bytes = out.into_inner();
        let offset = |i: usize| u32::from_le_bytes(bytes[12 + i * 4..][..4].try_into().unwrap());
        assert_ne!(offset(0), 0);
        assert_ne!(offset(1), 0);
        assert_eq!(offset(3), 0);

        let loaded = DiskImage::load(&mut Cursor::new(bytes)).unwrap();
        assert!(loaded.track(TrackKey::new(0, 0, true)).is_some());
        assert!(loaded.flags.contains(DiskImageFlags::HALF_TRACKS));
    }

    #[test]
    fn test_track_table_beyond_halftrack_range() {
        let track_ct = 255u8;
        let table_len = G64Header::table_len(track_ct);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(G64_SIGNATURE);
        bytes.push(G64_VERSION);
        bytes.push(track_ct);
        bytes.extend_from_slice(&G64_MAX_TRACK_SIZE.to_le_bytes());
        for i in 0..track_ct as usize {
            let offset = if i == 254 { table_len as u32 } else { 0 };
            bytes.extend_from_slice(&offset.to_le_bytes());
        }
        bytes.extend_from_slice(&vec![0u8; track_ct as usize * 4]);
        bytes.extend_from_slice(&0u16.to_le_bytes());
        assert_eq!(bytes.len(), table_len + 2);

        let mut image = DiskImage::default();
        let err = G64Format::load_image(Cursor::new(bytes), &mut image).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Format);
    }
}
