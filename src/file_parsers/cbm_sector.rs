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

    src/file_parsers/cbm_sector.rs

    D64, D71 and D81 sector image parser.
*/

//! A CBM sector image is the volume's 256-byte sectors laid end to end, track by track, with an
//! optional trailer of one status byte per sector. The image format is identified by its size.
//!
//! Trailer status codes follow the drive's error numbering:
//!
//! | Code  | Meaning                  |
//! |-------|--------------------------|
//! | 00/01 | OK                       |
//! | 02    | Header block not found   |
//! | 03    | No sync                  |
//! | 04    | Data block not found     |
//! | 05    | Data block checksum      |
//! | 09    | Header block checksum    |

use crate::{
    file_parsers::{gcr_track, DiskImageFileFormat, FormatCaps, ParserWriteCompatibility},
    file_system::cbm::{detect_geometry, CbmGeometry},
    io::{ReadSeek, ReadWriteSeek},
    track_reader::SectorRecord,
    types::{DiskImageFlags, SectorBytes, SectorFault, TrackDataEncoding},
    util::read_all,
    DiskImage,
    DiskImageError,
    CBM_SECTOR_SIZE,
};

pub const STATUS_OK: u8 = 0x01;

/// Map a trailer status byte to a sector fault.
pub fn status_to_fault(status: u8) -> Option<SectorFault> {
    match status {
        0x00 | 0x01 => None,
        0x02 => Some(SectorFault::HeaderNotFound),
        0x03 => Some(SectorFault::SyncNotFound),
        0x04 => Some(SectorFault::DataNotFound),
        0x05 => Some(SectorFault::DataChecksum),
        0x09 => Some(SectorFault::HeaderChecksum),
        code => Some(SectorFault::ContainerError(code)),
    }
}

/// Map a sector fault to a trailer status byte. Bad GCR is reported as a data checksum error,
/// as the drive would.
pub fn fault_to_status(fault: Option<SectorFault>) -> u8 {
    match fault {
        None => STATUS_OK,
        Some(SectorFault::HeaderNotFound) => 0x02,
        Some(SectorFault::SyncNotFound) => 0x03,
        Some(SectorFault::DataNotFound) => 0x04,
        Some(SectorFault::DataChecksum | SectorFault::BadGcr) => 0x05,
        Some(SectorFault::HeaderChecksum) => 0x09,
        Some(SectorFault::ContainerError(code)) => code,
    }
}

pub struct CbmSectorFormat;

impl CbmSectorFormat {
    fn geometry_matches(format: DiskImageFileFormat, geometry: CbmGeometry) -> bool {
        matches!(
            (format, geometry),
            (DiskImageFileFormat::D64, CbmGeometry::D64 { .. })
                | (DiskImageFileFormat::D71, CbmGeometry::D71)
                | (DiskImageFileFormat::D81, CbmGeometry::D81)
        )
    }

    pub(crate) fn capabilities(format: DiskImageFileFormat) -> FormatCaps {
        let encoding = match format {
            DiskImageFileFormat::D81 => FormatCaps::CAP_ENCODING_MFM,
            _ => FormatCaps::CAP_ENCODING_GCR | FormatCaps::CAP_VARIABLE_SPT,
        };
        FormatCaps::CAP_SECTOR_ERRORS | encoding
    }

    pub(crate) fn detect<RWS: ReadSeek>(format: DiskImageFileFormat, mut image: RWS) -> bool {
        let Ok(len) = crate::util::get_length(&mut image)
        else {
            return false;
        };
        let Some((geometry, _)) = CbmGeometry::from_image_size(len as usize)
        else {
            return false;
        };
        if !Self::geometry_matches(format, geometry) {
            return false;
        }
        if geometry == CbmGeometry::D81 {
            // The 1581 header sector carries the format marker 'D'.
            let offset = geometry.sector_offset(geometry.header_ts()) as u64 + 2;
            let mut marker = [0u8; 1];
            if image.seek(std::io::SeekFrom::Start(offset)).is_err() || image.read_exact(&mut marker).is_err() {
                return false;
            }
            return marker[0] == 0x44;
        }
        true
    }

    pub(crate) fn load_image<RWS: ReadSeek>(
        format: DiskImageFileFormat,
        mut read_buf: RWS,
        image: &mut DiskImage,
    ) -> Result<(), DiskImageError> {
        let data = read_all(&mut read_buf)?;
        let (geometry, has_errors) = CbmGeometry::from_image_size(data.len())
            .ok_or_else(|| DiskImageError::format(format!("{} bytes is not a CBM sector image size", data.len())))?;
        if !Self::geometry_matches(format, geometry) {
            return Err(DiskImageError::format(format!(
                "image size {} is a {} image, not {}",
                data.len(),
                geometry,
                format
            )));
        }

        let encoding = match geometry {
            CbmGeometry::D81 => TrackDataEncoding::Mfm,
            _ => TrackDataEncoding::GcrCbm,
        };
        let trailer = geometry.image_size(false);
        let mut error_ct = 0;
        for track in 1..=geometry.tracks() {
            let ch = geometry.ch(track);
            let mut sectors = Vec::with_capacity(geometry.sectors_per_track(track) as usize);
            for s in 0..geometry.sectors_per_track(track) {
                let index = geometry.sector_index((track, s));
                let offset = index * CBM_SECTOR_SIZE;
                let mut sector = SectorRecord::new(
                    track as u16,
                    ch.h(),
                    s,
                    SectorBytes::from(&data[offset..offset + CBM_SECTOR_SIZE]),
                );
                if has_errors {
                    sector.fault = status_to_fault(data[trailer + index]);
                    if sector.fault.is_some() {
                        error_ct += 1;
                    }
                }
                sectors.push(sector);
            }
            image.add_sector_track(ch, encoding, sectors);
        }

        image.metadata.dos_flavor = geometry.dos_flavor();
        image.metadata.double_sided = geometry == CbmGeometry::D71;
        gcr_track::read_header_metadata(image, geometry);
        log::debug!(
            "CbmSectorFormat::load_image(): {} volume \"{}\", error trailer: {} ({} errors)",
            geometry,
            image.metadata.name.as_deref().unwrap_or(""),
            has_errors,
            error_ct
        );
        Ok(())
    }

    pub(crate) fn can_write(format: DiskImageFileFormat, image: &DiskImage) -> ParserWriteCompatibility {
        match detect_geometry(image) {
            Some(geometry) if Self::geometry_matches(format, geometry) => {
                if image.has_bitstream_tracks() || image.flags.contains(DiskImageFlags::HALF_TRACKS) {
                    ParserWriteCompatibility::DataLoss
                }
                else {
                    ParserWriteCompatibility::Ok
                }
            }
            _ => ParserWriteCompatibility::Incompatible,
        }
    }

    pub(crate) fn save_image<RWS: ReadWriteSeek>(
        format: DiskImageFileFormat,
        image: &DiskImage,
        output: &mut RWS,
    ) -> Result<(), DiskImageError> {
        let geometry = detect_geometry(image)
            .filter(|g| Self::geometry_matches(format, *g))
            .ok_or(DiskImageError::UnsupportedFormat)?;

        let mut data = vec![0u8; geometry.image_size(false)];
        let mut trailer = vec![STATUS_OK; geometry.total_sectors()];
        let mut error_ct = 0;
        for (index, ts) in geometry.iter_sectors().enumerate() {
            let offset = index * CBM_SECTOR_SIZE;
            match image.sector(geometry.ch(ts.0), ts.1) {
                Some(sector) => {
                    let len = sector.data.len().min(CBM_SECTOR_SIZE);
                    data[offset..offset + len].copy_from_slice(&sector.data.as_slice()[..len]);
                    trailer[index] = fault_to_status(sector.fault);
                }
                None => {
                    log::debug!(
                        "CbmSectorFormat::save_image(): track {} sector {} is missing",
                        ts.0,
                        ts.1
                    );
                    trailer[index] = fault_to_status(Some(SectorFault::HeaderNotFound));
                }
            }
            if trailer[index] != STATUS_OK {
                error_ct += 1;
            }
        }

        if error_ct > 0 {
            log::debug!("CbmSectorFormat::save_image(): writing error trailer with {} errors", error_ct);
            data.extend_from_slice(&trailer);
        }
        output.write_all(&data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{file_parsers::ImageParser, file_system::cbm::CbmFileSystem, io::Cursor};

    #[test]
    fn test_status_codes() {
        for code in [0x02, 0x03, 0x04, 0x05, 0x09, 0x0B] {
            assert_eq!(fault_to_status(status_to_fault(code)), code);
        }
        assert_eq!(status_to_fault(0x00), None);
        assert_eq!(fault_to_status(Some(SectorFault::BadGcr)), 0x05);
    }

    #[test]
    fn test_error_trailer_round_trip() {
        let mut image = CbmFileSystem::format(CbmGeometry::D64_35, "ERRORS", "ER").unwrap();
        image.track_mut((0, 0)).unwrap().sector_mut(3).unwrap().fault = Some(SectorFault::DataChecksum);

        let mut out = Cursor::new(Vec::new());
        image.save(DiskImageFileFormat::D64, &mut out).unwrap();
        let bytes = out.into_inner();
        assert_eq!(bytes.len(), 175531);
        assert_eq!(bytes[174848 + 3], 0x05);
        assert_eq!(bytes[174848 + 4], 0x01);

        let mut cursor = Cursor::new(bytes);
        assert!(DiskImageFileFormat::D64.detect(&mut cursor));
        let loaded = DiskImage::load(&mut cursor).unwrap();
        assert_eq!(loaded.source_format, Some(DiskImageFileFormat::D64));
        assert_eq!(loaded.metadata.name.as_deref(), Some("ERRORS"));
        assert_eq!(loaded.metadata.id, Some(*b"ER"));
        let sector = loaded.sector((0, 0).into(), 3).unwrap();
        assert_eq!(sector.fault, Some(SectorFault::DataChecksum));
        assert!(!sector.data_crc_ok());
    }

    #[test]
    fn test_clean_image_has_no_trailer() {
        let mut image = CbmFileSystem::format(CbmGeometry::D71, "TWO SIDES", "71").unwrap();
        let mut out = Cursor::new(Vec::new());
        image.save(DiskImageFileFormat::D71, &mut out).unwrap();
        assert_eq!(out.get_ref().len(), 349696);
        assert_eq!(
            DiskImageFileFormat::D64.can_write(&image),
            ParserWriteCompatibility::Incompatible
        );
    }

    #[test]
    fn test_d81_marker() {
        let mut image = CbmFileSystem::format(CbmGeometry::D81, "MFM", "81").unwrap();
        let mut out = Cursor::new(Vec::new());
        image.save(DiskImageFileFormat::D81, &mut out).unwrap();
        let mut bytes = out.into_inner();
        assert!(DiskImageFileFormat::D81.detect(Cursor::new(&bytes)));
        let header = CbmGeometry::D81.sector_offset((40, 0));
        bytes[header + 2] = 0;
        assert!(!DiskImageFileFormat::D81.detect(Cursor::new(&bytes)));
    }
}
