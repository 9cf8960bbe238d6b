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

    src/file_parsers/mod.rs

    Container format detection and dispatch.
*/

//! Each container format is implemented as a unit struct with associated `detect`, `load_image`,
//! `can_write` and `save_image` functions. [DiskImageFileFormat] dispatches to them through the
//! [ImageParser] trait.

use crate::{
    io::{ReadSeek, ReadWriteSeek},
    DiskImage,
    DiskImageError,
};
use bitflags::bitflags;
use std::fmt::{self, Display, Formatter};

pub mod cbm_sector;
pub mod compression;
pub mod dmk;
pub mod g64;
pub(crate) mod gcr_track;
pub mod kryoflux;
pub mod nbz;
pub mod nib;

bitflags! {
    /// Bit flags representing the capabilities of a specific image format. Used to determine if a
    /// specific image format can represent a particular DiskImage.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    #[rustfmt::skip]
    pub struct FormatCaps: u32 {
        const CAP_VARIABLE_SPT      = 0b0000_0000_0000_0001; // Can support variable sector counts per track
        const CAP_VARIABLE_SSPT     = 0b0000_0000_0000_0010; // Can support variable sector sizes
        const CAP_ADDRESS_CRC       = 0b0000_0000_0000_0100; // Encodes sector address mark CRC status
        const CAP_DATA_CRC          = 0b0000_0000_0000_1000; // Encodes sector data CRC status
        const CAP_DATA_DELETED      = 0b0000_0000_0001_0000; // Encodes 'Deleted address' marks
        const CAP_SECTOR_ERRORS     = 0b0000_0000_0010_0000; // Stores a per-sector error status
        const CAP_TRACK_DENSITY     = 0b0000_0000_0100_0000; // Stores a per-track density or speed zone
        const CAP_HALF_TRACKS       = 0b0000_0000_1000_0000; // Can store half-tracks
        const CAP_WEAK_BITS         = 0b0000_0001_0000_0000; // Can store weak bit information
        const CAP_FLUX              = 0b0000_0010_0000_0000; // Stores flux transitions
        const CAP_ENCODING_FM       = 0b0000_0100_0000_0000; // Can store FM encoding
        const CAP_ENCODING_MFM      = 0b0000_1000_0000_0000; // Can store MFM encoding
        const CAP_ENCODING_GCR      = 0b0001_0000_0000_0000; // Can store GCR encoding
        const CAP_MULTI_PASS        = 0b0010_0000_0000_0000; // Stores several reads of each track
        const CAP_COMPRESSED        = 0b0100_0000_0000_0000; // The container is compressed
    }
}

/// Return a set of FormatCaps flags implicitly supported by the nature of any bitstream format.
pub fn bitstream_flags() -> FormatCaps {
    FormatCaps::CAP_VARIABLE_SPT | FormatCaps::CAP_ADDRESS_CRC | FormatCaps::CAP_DATA_CRC
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParserWriteCompatibility {
    Ok,
    DataLoss,
    Incompatible,
    UnsupportedFormat,
}

/// The container formats that can be read and written.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DiskImageFileFormat {
    D64,
    D71,
    D81,
    G64,
    Nib,
    Nb2,
    Nbz,
    Dmk,
    KryofluxStream,
}

impl Display for DiskImageFileFormat {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            DiskImageFileFormat::D64 => write!(f, "D64 (1541 sector image)"),
            DiskImageFileFormat::D71 => write!(f, "D71 (1571 sector image)"),
            DiskImageFileFormat::D81 => write!(f, "D81 (1581 sector image)"),
            DiskImageFileFormat::G64 => write!(f, "G64 (GCR bitstream)"),
            DiskImageFileFormat::Nib => write!(f, "NIB (nibbler GCR dump)"),
            DiskImageFileFormat::Nb2 => write!(f, "NB2 (multi-pass GCR dump)"),
            DiskImageFileFormat::Nbz => write!(f, "NBZ (compressed NIB)"),
            DiskImageFileFormat::Dmk => write!(f, "DMK (track image)"),
            DiskImageFileFormat::KryofluxStream => write!(f, "KryoFlux stream"),
        }
    }
}

/// Formats in detection order. Self-describing formats come first, then formats detected by size,
/// then NBZ, which can only be detected by decompressing.
pub(crate) const IMAGE_FORMATS: [DiskImageFileFormat; 9] = [
    DiskImageFileFormat::G64,
    DiskImageFileFormat::Nb2,
    DiskImageFileFormat::Nib,
    DiskImageFileFormat::KryofluxStream,
    DiskImageFileFormat::D64,
    DiskImageFileFormat::D71,
    DiskImageFileFormat::D81,
    DiskImageFileFormat::Dmk,
    DiskImageFileFormat::Nbz,
];

/// Returns a list of advertised file extensions supported by available image format parsers.
/// This is a convenience function for use in file dialogs - internal image detection is not based
/// on file extension, but by image file content and size.
pub fn supported_extensions() -> Vec<&'static str> {
    IMAGE_FORMATS.iter().flat_map(|f| f.extensions()).collect()
}

/// Returns a DiskImageFileFormat enum variant based on the file extension provided. If the
/// extension is not recognized, None is returned.
pub fn format_from_ext(ext: &str) -> Option<DiskImageFileFormat> {
    let ext = ext.trim_start_matches('.').to_lowercase();
    IMAGE_FORMATS
        .iter()
        .find(|format| format.extensions().contains(&ext.as_str()))
        .copied()
}

/// Returns a list of image formats and their associated file extensions that support the specified
/// capabilities.
pub fn formats_from_caps(caps: FormatCaps) -> Vec<(DiskImageFileFormat, Vec<String>)> {
    IMAGE_FORMATS
        .iter()
        .filter(|f| caps.is_empty() || f.capabilities().contains(caps))
        .map(|f| (*f, f.extensions().iter().map(|s| s.to_string()).collect()))
        .collect()
}

/// Detect the container format of an image by its content.
pub fn detect_format<RS: ReadSeek>(image_io: &mut RS) -> Result<DiskImageFileFormat, DiskImageError> {
    for format in IMAGE_FORMATS {
        if format.detect(&mut *image_io) {
            log::debug!("detect_format(): detected {}", format);
            return Ok(format);
        }
    }
    Err(DiskImageError::UnknownFormat)
}

pub trait ImageParser {
    /// Return the capability flags for this format.
    fn capabilities(&self) -> FormatCaps;
    /// Detect and return true if the image is of a format that the parser can read.
    fn detect<RWS: ReadSeek>(&self, image_buf: RWS) -> bool;
    /// Return a list of file extensions associated with the parser.
    fn extensions(&self) -> Vec<&'static str>;
    /// Load a disk image file into an empty (default) DiskImage.
    fn load_image<RWS: ReadSeek>(&self, read_buf: RWS, image: &mut DiskImage) -> Result<(), DiskImageError>;
    /// Return whether the parser can write the specified disk image. Not all DiskImages can be
    /// represented in every format.
    fn can_write(&self, image: &DiskImage) -> ParserWriteCompatibility;
    fn save_image<RWS: ReadWriteSeek>(self, image: &mut DiskImage, image_buf: &mut RWS) -> Result<(), DiskImageError>;
}

impl ImageParser for DiskImageFileFormat {
    fn capabilities(&self) -> FormatCaps {
        match self {
            DiskImageFileFormat::D64 | DiskImageFileFormat::D71 | DiskImageFileFormat::D81 => {
                cbm_sector::CbmSectorFormat::capabilities(*self)
            }
            DiskImageFileFormat::G64 => g64::G64Format::capabilities(),
            DiskImageFileFormat::Nib => nib::NibFormat::capabilities(false),
            DiskImageFileFormat::Nb2 => nib::NibFormat::capabilities(true),
            DiskImageFileFormat::Nbz => nbz::NbzFormat::capabilities(),
            DiskImageFileFormat::Dmk => dmk::DmkFormat::capabilities(),
            DiskImageFileFormat::KryofluxStream => kryoflux::KfxFormat::capabilities(),
        }
    }

    fn detect<RWS: ReadSeek>(&self, image_buf: RWS) -> bool {
        match self {
            DiskImageFileFormat::D64 | DiskImageFileFormat::D71 | DiskImageFileFormat::D81 => {
                cbm_sector::CbmSectorFormat::detect(*self, image_buf)
            }
            DiskImageFileFormat::G64 => g64::G64Format::detect(image_buf),
            DiskImageFileFormat::Nib => nib::NibFormat::detect(image_buf, false),
            DiskImageFileFormat::Nb2 => nib::NibFormat::detect(image_buf, true),
            DiskImageFileFormat::Nbz => nbz::NbzFormat::detect(image_buf),
            DiskImageFileFormat::Dmk => dmk::DmkFormat::detect(image_buf),
            DiskImageFileFormat::KryofluxStream => kryoflux::KfxFormat::detect(image_buf),
        }
    }

    fn extensions(&self) -> Vec<&'static str> {
        match self {
            DiskImageFileFormat::D64 => vec!["d64"],
            DiskImageFileFormat::D71 => vec!["d71"],
            DiskImageFileFormat::D81 => vec!["d81"],
            DiskImageFileFormat::G64 => g64::G64Format::extensions(),
            DiskImageFileFormat::Nib => vec!["nib"],
            DiskImageFileFormat::Nb2 => vec!["nb2"],
            DiskImageFileFormat::Nbz => nbz::NbzFormat::extensions(),
            DiskImageFileFormat::Dmk => dmk::DmkFormat::extensions(),
            DiskImageFileFormat::KryofluxStream => kryoflux::KfxFormat::extensions(),
        }
    }

    fn load_image<RWS: ReadSeek>(&self, read_buf: RWS, image: &mut DiskImage) -> Result<(), DiskImageError> {
        match self {
            DiskImageFileFormat::D64 | DiskImageFileFormat::D71 | DiskImageFileFormat::D81 => {
                cbm_sector::CbmSectorFormat::load_image(*self, read_buf, image)
            }
            DiskImageFileFormat::G64 => g64::G64Format::load_image(read_buf, image),
            DiskImageFileFormat::Nib | DiskImageFileFormat::Nb2 => nib::NibFormat::load_image(read_buf, image),
            DiskImageFileFormat::Nbz => nbz::NbzFormat::load_image(read_buf, image),
            DiskImageFileFormat::Dmk => dmk::DmkFormat::load_image(read_buf, image),
            DiskImageFileFormat::KryofluxStream => kryoflux::KfxFormat::load_image(read_buf, image),
        }
    }

    fn can_write(&self, image: &DiskImage) -> ParserWriteCompatibility {
        match self {
            DiskImageFileFormat::D64 | DiskImageFileFormat::D71 | DiskImageFileFormat::D81 => {
                cbm_sector::CbmSectorFormat::can_write(*self, image)
            }
            DiskImageFileFormat::G64 => g64::G64Format::can_write(image),
            DiskImageFileFormat::Nib => nib::NibFormat::can_write(image, false),
            DiskImageFileFormat::Nb2 => nib::NibFormat::can_write(image, true),
            DiskImageFileFormat::Nbz => nbz::NbzFormat::can_write(image),
            DiskImageFileFormat::Dmk => dmk::DmkFormat::can_write(image),
            DiskImageFileFormat::KryofluxStream => kryoflux::KfxFormat::can_write(image),
        }
    }

    fn save_image<RWS: ReadWriteSeek>(self, image: &mut DiskImage, write_buf: &mut RWS) -> Result<(), DiskImageError> {
        match self.can_write(image) {
            ParserWriteCompatibility::Incompatible | ParserWriteCompatibility::UnsupportedFormat => {
                return Err(DiskImageError::UnsupportedFormat);
            }
            ParserWriteCompatibility::DataLoss => {
                log::warn!("ImageParser::save_image(): writing {} will lose data", self);
            }
            ParserWriteCompatibility::Ok => {}
        }
        match self {
            DiskImageFileFormat::D64 | DiskImageFileFormat::D71 | DiskImageFileFormat::D81 => {
                cbm_sector::CbmSectorFormat::save_image(self, image, write_buf)
            }
            DiskImageFileFormat::G64 => g64::G64Format::save_image(image, write_buf),
            DiskImageFileFormat::Nib => nib::NibFormat::save_image(image, write_buf, false),
            DiskImageFileFormat::Nb2 => nib::NibFormat::save_image(image, write_buf, true),
            DiskImageFileFormat::Nbz => nbz::NbzFormat::save_image(image, write_buf),
            DiskImageFileFormat::Dmk => dmk::DmkFormat::save_image(image, write_buf),
            DiskImageFileFormat::KryofluxStream => kryoflux::KfxFormat::save_image(image, write_buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_ext() {
        assert_eq!(format_from_ext("D64"), Some(DiskImageFileFormat::D64));
        assert_eq!(format_from_ext(".nbz"), Some(DiskImageFileFormat::Nbz));
        assert_eq!(format_from_ext("raw"), Some(DiskImageFileFormat::KryofluxStream));
        assert_eq!(format_from_ext("img"), None);
        assert!(supported_extensions().contains(&"g64"));
    }

    #[test]
    fn test_formats_from_caps() {
        let gcr = formats_from_caps(FormatCaps::CAP_ENCODING_GCR | FormatCaps::CAP_HALF_TRACKS);
        let formats: Vec<_> = gcr.iter().map(|(f, _)| *f).collect();
        assert!(formats.contains(&DiskImageFileFormat::G64));
        assert!(formats.contains(&DiskImageFileFormat::Nib));
        assert!(!formats.contains(&DiskImageFileFormat::D64));
    }
}
