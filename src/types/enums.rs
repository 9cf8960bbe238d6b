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

    src/types/enums.rs

    Defines common enum types
*/
use crate::types::structs::IntegrityField;
use std::{
    fmt,
    fmt::{Display, Formatter},
};

/// The type of data encoding used by a track.
/// Note that some disks contain tracks with different encodings.
/// * Fm: Frequency Modulation. Used by older 8" diskettes and some TRS-80 formats.
/// * Mfm: Modified Frequency Modulation. Used by almost all IBM-compatible 5.25" and 3.5" diskettes.
/// * GcrCbm: Commodore 5-and-4 Group Code Recording, as written by the 1541 and 1571.
/// * GcrApple: Apple 6-and-2 Group Code Recording. Detected, but not decoded.
/// * Custom: Anything else; the raw bitstream is preserved without sector decoding.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TrackDataEncoding {
    Fm,
    #[default]
    Mfm,
    GcrCbm,
    GcrApple,
    Custom,
}

impl TrackDataEncoding {
    /// Return the nominal encoded cell time in nanoseconds for double-density media at 300RPM.
    /// An MFM data bit occupies two cells (clock and data), so a 250Kbps MFM track has 1μs cells.
    /// CBM GCR cell times depend on the speed zone, see [crate::bitstream_codec::gcr::zone_cell_ns].
    pub fn nominal_cell_ns(&self) -> f64 {
        match self {
            TrackDataEncoding::Fm => 4000.0,
            TrackDataEncoding::Mfm => 1000.0,
            TrackDataEncoding::GcrCbm => 3250.0,
            TrackDataEncoding::GcrApple => 4000.0,
            TrackDataEncoding::Custom => 1000.0,
        }
    }
}

impl Display for TrackDataEncoding {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            TrackDataEncoding::Fm => write!(f, "FM"),
            TrackDataEncoding::Mfm => write!(f, "MFM"),
            TrackDataEncoding::GcrCbm => write!(f, "GCR (CBM)"),
            TrackDataEncoding::GcrApple => write!(f, "GCR (Apple)"),
            TrackDataEncoding::Custom => write!(f, "Custom"),
        }
    }
}

/// Track density, used to scale nominal cell times.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TrackDensity {
    Single,
    #[default]
    Double,
    High,
    Extended,
}

impl TrackDensity {
    /// Factor to multiply a double-density cell time by.
    pub fn cell_scale(&self) -> f64 {
        match self {
            TrackDensity::Single => 2.0,
            TrackDensity::Double => 1.0,
            TrackDensity::High => 0.5,
            TrackDensity::Extended => 0.25,
        }
    }
}

/// The data address mark that introduced a sector's data field.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataAddressMark {
    #[default]
    Normal,
    Deleted,
    TrsdosDir,
    TrsdosSys,
    Unknown,
}

impl DataAddressMark {
    /// Decode an IBM/TRS-DOS data address mark byte.
    /// The TRS-80 Model I single density controller distinguishes F8-FB; double density TRS-DOS
    /// uses F8 for directory sectors.
    pub fn from_mark(mark: u8, single_density: bool) -> Self {
        match (mark, single_density) {
            (0xFB, _) => DataAddressMark::Normal,
            (0xF8, false) => DataAddressMark::Deleted,
            (0xF8, true) => DataAddressMark::TrsdosDir,
            (0xFA, true) => DataAddressMark::TrsdosSys,
            (0xF9, true) => DataAddressMark::Deleted,
            _ => DataAddressMark::Unknown,
        }
    }

    pub fn to_mark(&self) -> u8 {
        match self {
            DataAddressMark::Normal => 0xFB,
            DataAddressMark::Deleted => 0xF8,
            DataAddressMark::TrsdosDir => 0xF8,
            DataAddressMark::TrsdosSys => 0xFA,
            DataAddressMark::Unknown => 0xFB,
        }
    }
}

impl Display for DataAddressMark {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            DataAddressMark::Normal => write!(f, "normal"),
            DataAddressMark::Deleted => write!(f, "deleted"),
            DataAddressMark::TrsdosDir => write!(f, "trsdos_dir"),
            DataAddressMark::TrsdosSys => write!(f, "trsdos_sys"),
            DataAddressMark::Unknown => write!(f, "unknown"),
        }
    }
}

/// An enum that encompasses data integrity verification strategies.
/// IBM tracks use a CRC; CBM GCR tracks use an 8-bit XOR checksum. A field that carries no
/// check at all, such as a raw decoded byte run, reports `NotApplicable`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IntegrityCheck {
    #[default]
    NotApplicable,
    /// Represents the result of a 16-bit CRC (Cyclic Redundancy Check)
    Crc16(IntegrityField<u16>),
    /// Represents the result of an 8-bit XOR checksum
    Checksum8(IntegrityField<u8>),
}

impl Display for IntegrityCheck {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        use IntegrityCheck::*;
        match self {
            NotApplicable => write!(f, "N/A"),
            Crc16(result) if result.is_valid() => write!(f, "Valid"),
            Crc16(_) => write!(f, "Invalid"),
            Checksum8(result) if result.is_valid() => write!(f, "Valid"),
            Checksum8(_) => write!(f, "Invalid"),
        }
    }
}

impl IntegrityCheck {
    pub fn is_valid(&self) -> bool {
        use IntegrityCheck::*;
        match self {
            NotApplicable => false,
            Crc16(result) => result.is_valid(),
            Checksum8(result) => result.is_valid(),
        }
    }
    pub fn is_error(&self) -> bool {
        !self.is_valid() && !self.is_not_applicable()
    }
    pub fn is_not_applicable(&self) -> bool {
        matches!(self, IntegrityCheck::NotApplicable)
    }
}
