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

    src/file_parsers/gcr_track.rs

    Conversion between CBM sector tracks and raw GCR track bytes.
*/

//! G64 and the NIB family store each track as raw GCR bytes. This module decodes those bytes
//! into bitstream-level [TrackRecord]s and produces GCR bytes for any CBM track, encoding
//! sector-level tracks (such as those loaded from a D64) through the GCR codec.

use crate::{
    bitstream_codec::{gcr, TrackEncodeParams},
    diskimage::DosFlavor,
    file_parsers::ParserWriteCompatibility,
    file_system::cbm::{petscii::name_to_ascii, CbmGeometry},
    random::WeakBitRng,
    track_reader::{TrackDataResolution, TrackReader, TrackRecord},
    types::{TrackDataEncoding, TrackKey},
    DiskImage,
    DiskImageError,
};
use bit_vec::BitVec;

/// Speed zone bits of a NIB density byte or G64 speed table entry.
pub(crate) const DENSITY_MASK: u8 = 0x03;
const DEFAULT_DISK_ID: [u8; 2] = [0x30, 0x30];

/// The CBM track number (from 1) recorded on a physical track.
pub(crate) fn cbm_track(key: &TrackKey) -> u8 {
    match key.ch.h() {
        0 => key.ch.c() as u8 + 1,
        _ => key.ch.c() as u8 + 36,
    }
}

/// The nominal speed zone of a physical track. Both sides of a 1571 disk use the same zones.
pub(crate) fn nominal_zone(key: &TrackKey) -> u8 {
    gcr::speed_zone(key.ch.c() as u8 + 1)
}

/// Decode raw GCR track bytes. `density` is the speed zone recorded by the container, if any.
pub(crate) fn decode_track(key: TrackKey, bytes: &[u8], density: Option<u8>) -> Result<TrackRecord, DiskImageError> {
    let bits = BitVec::from_bytes(bytes);
    let mut track = TrackReader::decode_bitstream(key, TrackDataEncoding::GcrCbm, &bits)?;
    let zone = density.map(|d| d & DENSITY_MASK).unwrap_or_else(|| nominal_zone(&key));
    track.density = Some(zone);
    track.cell_ns = gcr::zone_cell_ns(zone);
    log::trace!(
        "gcr_track::decode_track(): {} zone {} {} bytes, {} sectors",
        key,
        zone,
        bytes.len(),
        track.sectors.len()
    );
    Ok(track)
}

/// Return the GCR bytes of a track. Bitstream tracks are returned as stored; sector-level tracks
/// are laid out by the GCR codec. Weak bits are filled from `rng`.
pub(crate) fn track_bytes(track: &TrackRecord, disk_id: [u8; 2], rng: &mut WeakBitRng) -> Vec<u8> {
    if track.resolution != TrackDataResolution::MetaSector {
        return track.raw.as_slice().to_vec();
    }
    let zone = track.density.map(|d| d & DENSITY_MASK).unwrap_or_else(|| nominal_zone(&track.key));
    let params = TrackEncodeParams {
        track: cbm_track(&track.key),
        track_len: Some(gcr::zone_track_len(zone)),
        disk_id,
        ..TrackEncodeParams::default()
    };
    gcr::encode_track(&track.sectors, &params, rng)
}

/// The speed zone to record for a track.
pub(crate) fn track_zone(track: &TrackRecord) -> u8 {
    track.density.map(|d| d & DENSITY_MASK).unwrap_or_else(|| nominal_zone(&track.key))
}

/// The disk ID to write into encoded sector headers: the image metadata, or failing that the ID
/// stored in the directory header.
pub(crate) fn disk_id(image: &DiskImage) -> [u8; 2] {
    if let Some(id) = image.metadata.id {
        return id;
    }
    image
        .sector(CbmGeometry::D64_35.ch(18), 0)
        .and_then(|s| s.data.as_slice().get(0xA2..0xA4).map(|id| [id[0], id[1]]))
        .unwrap_or(DEFAULT_DISK_ID)
}

/// Read the volume name and ID from the directory header into the image metadata, if the
/// header sector is present and readable.
pub(crate) fn read_header_metadata(image: &mut DiskImage, geometry: CbmGeometry) {
    let (name_range, id_range) = match geometry {
        CbmGeometry::D81 => (0x04..0x14, 0x16..0x18),
        _ => (0x90..0xA0, 0xA2..0xA4),
    };
    let Some(header) = image.sector(geometry.ch(geometry.dir_track()), 0)
    else {
        log::debug!("gcr_track::read_header_metadata(): no directory header sector");
        return;
    };
    if !header.data_crc_ok() || header.data.len() < 0x100 {
        log::debug!("gcr_track::read_header_metadata(): directory header is unreadable");
        return;
    }
    let data = header.data.as_slice();
    let name = name_to_ascii(&data[name_range]);
    let id = [data[id_range.start], data[id_range.start + 1]];
    image.metadata.name = Some(name);
    image.metadata.id = Some(id);
    if image.metadata.dos_flavor == DosFlavor::Unknown {
        image.metadata.dos_flavor = geometry.dos_flavor();
    }
}

/// Return true if every track of the image can be written as GCR.
pub(crate) fn all_gcr(image: &DiskImage) -> bool {
    image.track_ct() > 0 && image.track_iter().all(|t| t.encoding == TrackDataEncoding::GcrCbm)
}

/// Write compatibility of a single-sided GCR container holding half-tracks up to `max_halftrack`.
/// Flux, second-side tracks and tracks beyond the container's range are lost.
pub(crate) fn write_compatibility(image: &DiskImage, max_halftrack: u8) -> ParserWriteCompatibility {
    if !all_gcr(image) {
        return ParserWriteCompatibility::Incompatible;
    }
    let lossy = image.heads() > 1
        || image.track_iter().any(|t| {
            t.resolution == TrackDataResolution::FluxStream || t.key.halftrack() > max_halftrack
        });
    if lossy {
        ParserWriteCompatibility::DataLoss
    }
    else {
        ParserWriteCompatibility::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{track_reader::SectorRecord, types::SectorBytes};

    #[test]
    fn test_sector_track_round_trip() {
        let key = TrackKey::from((17, 0));
        let sectors = (0..19)
            .map(|s| SectorRecord::new(18, 0, s, SectorBytes::filled(256, s + 1)))
            .collect();
        let track = TrackRecord::from_sectors(key, TrackDataEncoding::GcrCbm, sectors);
        let mut rng = WeakBitRng::default();
        let bytes = track_bytes(&track, *b"XY", &mut rng);
        assert_eq!(bytes.len(), gcr::zone_track_len(2));

        let decoded = decode_track(key, &bytes, None).unwrap();
        assert_eq!(decoded.density, Some(2));
        assert_eq!(decoded.cell_ns, 3500.0);
        assert_eq!(decoded.sectors.len(), 19);
        assert_eq!(decoded.sector(4).unwrap().data.as_slice(), &[5u8; 256][..]);
        // Bitstream tracks are passed through unchanged.
        assert_eq!(track_bytes(&decoded, *b"XY", &mut rng), bytes);
    }

    #[test]
    fn test_second_side_track_numbers() {
        let key = TrackKey::from((0, 1));
        assert_eq!(cbm_track(&key), 36);
        assert_eq!(nominal_zone(&key), 3);
    }
}
