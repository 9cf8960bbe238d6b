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

    src/file_parsers/nib.rs

    NIB and NB2 nibbler dump parser.
*/

//! NIB files are raw GCR dumps made by nibbler tools over a parallel cable. Each track is stored
//! as a fixed 7928-byte read, long enough to hold a full revolution in any speed zone.
//!
//! The 256-byte header holds the signature `MNIB-1541-RAW`, a version byte, a reserved byte and
//! a half-track flag, then a table of up to 120 (halftrack, density) pairs terminated by a zero
//! halftrack. Track data follows the header in table order.
//!
//! NB2 files use the same header but store 16 reads of every track: four reads at each of the
//! four densities, in density order. The read made at the track's recorded density with the
//! fewest sector errors is kept.

use crate::{
    bitstream_codec::gcr,
    file_parsers::{bitstream_flags, gcr_track, FormatCaps, ParserWriteCompatibility},
    file_system::cbm::CbmGeometry,
    io::{ReadSeek, ReadWriteSeek, SeekFrom},
    random::WeakBitRng,
    track_reader::TrackRecord,
    types::{DiskImageFlags, TrackKey},
    util::read_all,
    DiskImage,
    DiskImageError,
};

pub const NIB_SIGNATURE: &[u8; 13] = b"MNIB-1541-RAW";
pub const NIB_VERSION: u8 = 3;
pub const NIB_HEADER_LEN: usize = 0x100;
pub const NIB_TRACK_LEN: usize = 7928;
pub const NIB_MAX_ENTRIES: usize = 120;
pub const NB2_PASSES: usize = 16;
const NB2_PASSES_PER_DENSITY: usize = 4;
const ENTRY_TABLE_OFFSET: usize = 0x10;
/// Set by nibbler tools when a track matched a previous read. Not a density bit.
const NIB_FLAG_MATCH: u8 = 0x10;
/// NB2 files within this many reads of the expected length are still treated as NB2.
const NB2_SIZE_TOLERANCE: usize = 4;

/// A parsed NIB header.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NibHeader {
    pub version: u8,
    pub half_tracks: bool,
    /// (halftrack, density) pairs, in storage order.
    pub entries: Vec<(u8, u8)>,
}

impl NibHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, DiskImageError> {
        if bytes.len() < NIB_HEADER_LEN || &bytes[..NIB_SIGNATURE.len()] != NIB_SIGNATURE {
            return Err(DiskImageError::format("missing NIB signature"));
        }
        let entries = bytes[ENTRY_TABLE_OFFSET..NIB_HEADER_LEN]
            .chunks_exact(2)
            .take_while(|pair| pair[0] != 0)
            .map(|pair| (pair[0], pair[1]))
            .collect();
        Ok(NibHeader {
            version: bytes[13],
            half_tracks: bytes[15] != 0,
            entries,
        })
    }

    pub fn to_bytes(&self) -> [u8; NIB_HEADER_LEN] {
        let mut header = [0u8; NIB_HEADER_LEN];
        header[..NIB_SIGNATURE.len()].copy_from_slice(NIB_SIGNATURE);
        header[13] = self.version;
        header[15] = self.half_tracks as u8;
        for (i, (halftrack, density)) in self.entries.iter().take(NIB_MAX_ENTRIES).enumerate() {
            header[ENTRY_TABLE_OFFSET + i * 2] = *halftrack;
            header[ENTRY_TABLE_OFFSET + i * 2 + 1] = *density;
        }
        header
    }
}

/// Decide whether a NIB-signed file of `len` bytes with `entry_ct` table entries holds 16 reads
/// per track.
fn is_nb2(entry_ct: usize, len: usize) -> bool {
    let data_len = len.saturating_sub(NIB_HEADER_LEN);
    let nb2_track = NIB_TRACK_LEN * NB2_PASSES;
    if entry_ct == 0 {
        return data_len > 0 && data_len % nb2_track == 0;
    }
    data_len + NIB_TRACK_LEN * NB2_SIZE_TOLERANCE >= entry_ct * nb2_track
}

/// Number of sector errors in a decoded track, counting sectors missing from the track.
fn track_errors(track: &TrackRecord) -> usize {
    let expected = gcr::sectors_per_track(gcr_track::cbm_track(&track.key)) as usize;
    track.failed_sectors().count() + expected.saturating_sub(track.sectors.len())
}

pub struct NibFormat;

impl NibFormat {
    pub fn capabilities(nb2: bool) -> FormatCaps {
        let caps = bitstream_flags()
            | FormatCaps::CAP_ENCODING_GCR
            | FormatCaps::CAP_HALF_TRACKS
            | FormatCaps::CAP_TRACK_DENSITY
            | FormatCaps::CAP_WEAK_BITS;
        if nb2 {
            caps | FormatCaps::CAP_MULTI_PASS
        }
        else {
            caps
        }
    }

    pub fn detect<RWS: ReadSeek>(mut image: RWS, nb2: bool) -> bool {
        let Ok(len) = crate::util::get_length(&mut image)
        else {
            return false;
        };
        let mut header = [0u8; NIB_HEADER_LEN];
        if image.seek(SeekFrom::Start(0)).is_err() || image.read_exact(&mut header).is_err() {
            return false;
        }
        match NibHeader::parse(&header) {
            Ok(header) => is_nb2(header.entries.len(), len as usize) == nb2,
            Err(_) => false,
        }
    }

    pub fn load_image<RWS: ReadSeek>(mut read_buf: RWS, image: &mut DiskImage) -> Result<(), DiskImageError> {
        let data = read_all(&mut read_buf)?;
        Self::load_bytes(&data, image)
    }

    pub(crate) fn load_bytes(data: &[u8], image: &mut DiskImage) -> Result<(), DiskImageError> {
        let header = NibHeader::parse(data)?;
        let nb2 = is_nb2(header.entries.len(), data.len());
        let entry_len = if nb2 { NIB_TRACK_LEN * NB2_PASSES } else { NIB_TRACK_LEN };

        let entries = if header.entries.is_empty() {
            // Headerless dumps store whole tracks from track 1 at nominal density.
            let ct = ((data.len() - NIB_HEADER_LEN) / entry_len).min(NIB_MAX_ENTRIES);
            log::warn!("NibFormat::load_image(): empty track table, assuming {} whole tracks", ct);
            (0..ct)
                .map(|i| {
                    let halftrack = 2 + i as u8 * 2;
                    (halftrack, gcr_track::nominal_zone(&TrackKey::from_halftrack(halftrack)))
                })
                .collect()
        }
        else {
            header.entries.clone()
        };
        log::debug!(
            "NibFormat::load_image(): {} v{}, {} halftracks",
            if nb2 { "NB2" } else { "NIB" },
            header.version,
            entries.len()
        );

        for (i, &(halftrack, density)) in entries.iter().enumerate() {
            if halftrack < 2 {
                log::warn!("NibFormat::load_image(): ignoring invalid halftrack {}", halftrack);
                continue;
            }
            let start = NIB_HEADER_LEN + i * entry_len;
            let Some(entry) = data.get(start..start + entry_len)
            else {
                log::warn!(
                    "NibFormat::load_image(): file ends before halftrack {}, {} of {} tracks read",
                    halftrack,
                    i,
                    entries.len()
                );
                image.flags.insert(DiskImageFlags::INCOMPLETE);
                break;
            };

            let key = TrackKey::from_halftrack(halftrack);
            let density = density & !NIB_FLAG_MATCH;
            let mut track = if nb2 {
                Self::best_pass(key, entry, density)?
            }
            else {
                gcr_track::decode_track(key, entry, Some(density))?
            };
            track.density = Some(density);
            image.insert_track(track);
        }

        gcr_track::read_header_metadata(image, CbmGeometry::D64_35);
        Ok(())
    }

    /// Decode the reads of an NB2 track made at its recorded density and keep the one with the
    /// fewest errors. The first read wins ties.
    fn best_pass(key: TrackKey, passes: &[u8], density: u8) -> Result<TrackRecord, DiskImageError> {
        let zone = density & gcr_track::DENSITY_MASK;
        let mut best: Option<(usize, usize, TrackRecord)> = None;
        for (pass, bytes) in passes.chunks_exact(NIB_TRACK_LEN).enumerate() {
            if (pass / NB2_PASSES_PER_DENSITY) as u8 != zone {
                continue;
            }
            let track = gcr_track::decode_track(key, bytes, Some(zone))?;
            let errors = track_errors(&track);
            if best.as_ref().map(|(_, e, _)| errors < *e).unwrap_or(true) {
                best = Some((pass, errors, track));
            }
        }
        match best {
            Some((pass, errors, track)) => {
                log::trace!("NibFormat::best_pass(): {} using pass {} with {} errors", key, pass, errors);
                Ok(track)
            }
            None => gcr_track::decode_track(key, &passes[..NIB_TRACK_LEN], Some(zone)),
        }
    }

    pub fn can_write(image: &DiskImage, _nb2: bool) -> ParserWriteCompatibility {
        gcr_track::write_compatibility(image, (NIB_MAX_ENTRIES + 1) as u8)
    }

    pub fn save_image<RWS: ReadWriteSeek>(image: &DiskImage, output: &mut RWS, nb2: bool) -> Result<(), DiskImageError> {
        output.seek(SeekFrom::Start(0))?;
        output.write_all(&Self::to_bytes(image, nb2))?;
        Ok(())
    }

    /// Serialize the GCR tracks of the first side of an image.
    pub(crate) fn to_bytes(image: &DiskImage, nb2: bool) -> Vec<u8> {
        let disk_id = gcr_track::disk_id(image);
        let mut rng = WeakBitRng::default();
        let mut header = NibHeader {
            version: NIB_VERSION,
            half_tracks: image.flags.contains(DiskImageFlags::HALF_TRACKS),
            entries: Vec::new(),
        };
        let mut body = Vec::new();
        for track in image.track_iter().filter(|t| t.head() == 0) {
            if header.entries.len() == NIB_MAX_ENTRIES {
                log::warn!("NibFormat::to_bytes(): track table is full, dropping {}", track.key);
                continue;
            }
            let mut bytes = gcr_track::track_bytes(track, disk_id, &mut rng);
            bytes.resize(NIB_TRACK_LEN, gcr::GAP_BYTE);
            let density = track.density.unwrap_or_else(|| gcr_track::track_zone(track));
            header.entries.push((track.key.halftrack(), density));
            let passes = if nb2 { NB2_PASSES } else { 1 };
            for _ in 0..passes {
                body.extend_from_slice(&bytes);
            }
        }

        let mut out = Vec::with_capacity(NIB_HEADER_LEN + body.len());
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(&body);
        log::debug!(
            "NibFormat::to_bytes(): {} tracks, {} bytes",
            header.entries.len(),
            out.len()
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        file_parsers::{DiskImageFileFormat, ImageParser},
        file_system::{cbm::CbmFileSystem, FileSystem},
        io::Cursor,
    };

    fn signature_only(entries: usize) -> Vec<u8> {
        let mut data = vec![0u8; NIB_HEADER_LEN + NIB_TRACK_LEN * entries];
        data[..13].copy_from_slice(NIB_SIGNATURE);
        data
    }

    #[test]
    fn test_detect_two_entries() {
        let data = signature_only(2);
        assert_eq!(
            &data[..16],
            &[0x4D, 0x4E, 0x49, 0x42, 0x2D, 0x31, 0x35, 0x34, 0x31, 0x2D, 0x52, 0x41, 0x57, 0x00, 0x00, 0x00]
        );
        assert!(DiskImageFileFormat::Nib.detect(Cursor::new(&data)));
        assert!(!DiskImageFileFormat::Nb2.detect(Cursor::new(&data)));

        let header = NibHeader::parse(&data).unwrap();
        assert_eq!(header.version, 0);
        let image = DiskImage::load(&mut Cursor::new(data)).unwrap();
        assert_eq!(image.source_format, Some(DiskImageFileFormat::Nib));
        assert_eq!(image.track_ct(), 2);
        assert!(image.track((0, 0)).is_some());
        assert!(image.track((1, 0)).is_some());
    }

    #[test]
    fn test_nb2_detection_by_size() {
        let data = signature_only(NB2_PASSES);
        assert!(DiskImageFileFormat::Nb2.detect(Cursor::new(&data)));
        assert!(!DiskImageFileFormat::Nib.detect(Cursor::new(&data)));
    }

    #[test]
    fn test_density_preserved() {
        let mut image = CbmFileSystem::format(CbmGeometry::D64_35, "NIBBLE", "NB").unwrap();
        let mut out = Cursor::new(Vec::new());
        image.save(DiskImageFileFormat::Nib, &mut out).unwrap();
        let mut bytes = out.into_inner();
        assert_eq!(bytes.len(), NIB_HEADER_LEN + 35 * NIB_TRACK_LEN);
        // Track 18 is stored at halftrack 36 with density 2.
        assert_eq!(&bytes[0x10 + 17 * 2..0x10 + 17 * 2 + 2], &[36, 2]);
        // Mark track 1 as a matched read.
        bytes[0x11] |= NIB_FLAG_MATCH;

        let loaded = DiskImage::load(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(loaded.track((17, 0)).unwrap().density, Some(2));
        assert_eq!(loaded.track((0, 0)).unwrap().density, Some(3));
        assert_eq!(loaded.metadata.name.as_deref(), Some("NIBBLE"));
        let fs = CbmFileSystem::mount(&loaded).unwrap();
        assert_eq!(fs.list().unwrap().len(), 0);
    }

    #[test]
    fn test_nb2_prefers_clean_pass() {
        let mut image = CbmFileSystem::format(CbmGeometry::D64_35, "PASSES", "PS").unwrap();
        for c in 2..35u16 {
            image.remove_track((c, 0));
        }
        let clean = NibFormat::to_bytes(&image, true);
        assert_eq!(clean.len(), NIB_HEADER_LEN + 2 * NB2_PASSES * NIB_TRACK_LEN);

        // Corrupt the first read at density 3 of track 1; the second read is clean.
        let mut data = clean.clone();
        let first = NIB_HEADER_LEN + 12 * NIB_TRACK_LEN;
        data[first..first + NIB_TRACK_LEN].fill(0x55);

        let loaded = DiskImage::load(&mut Cursor::new(data)).unwrap();
        assert_eq!(loaded.source_format, Some(DiskImageFileFormat::Nb2));
        let track = loaded.track((0, 0)).unwrap();
        assert_eq!(track.sectors.len(), 21);
        assert!(track.sectors.iter().all(|s| s.is_good()));
    }
}
