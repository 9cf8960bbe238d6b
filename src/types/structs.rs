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

    src/types/structs.rs

    Defines common structs
*/
use std::fmt::{self, Display, Formatter};

/// A pair of expected and calculated integrity values.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IntegrityField<T: PartialEq + Copy> {
    pub expected: T,
    pub calculated: T,
}

impl<T: PartialEq + Copy> IntegrityField<T> {
    pub fn new(expected: T, calculated: T) -> Self {
        Self { expected, calculated }
    }
    pub fn is_valid(&self) -> bool {
        self.expected == self.calculated
    }
}

/// The reason a sector failed to decode cleanly.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SectorFault {
    BadGcr,
    SyncNotFound,
    HeaderNotFound,
    DataNotFound,
    HeaderChecksum,
    DataChecksum,
    /// A status byte from a container error trailer that does not map to another fault.
    ContainerError(u8),
}

impl SectorFault {
    /// Return true if a re-read of the track may clear the fault.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SectorFault::ContainerError(_))
    }
}

impl Display for SectorFault {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            SectorFault::BadGcr => write!(f, "bad_gcr"),
            SectorFault::SyncNotFound => write!(f, "sync_not_found"),
            SectorFault::HeaderNotFound => write!(f, "header_not_found"),
            SectorFault::DataNotFound => write!(f, "data_not_found"),
            SectorFault::HeaderChecksum => write!(f, "checksum_mismatch (header)"),
            SectorFault::DataChecksum => write!(f, "checksum_mismatch (data)"),
            SectorFault::ContainerError(code) => write!(f, "container error {:02X}", code),
        }
    }
}

impl From<SectorFault> for crate::DiskImageError {
    fn from(fault: SectorFault) -> Self {
        use crate::DiskImageError;
        match fault {
            SectorFault::BadGcr => DiskImageError::BadGcr,
            SectorFault::SyncNotFound => DiskImageError::SyncNotFound,
            SectorFault::HeaderNotFound => DiskImageError::HeaderNotFound,
            SectorFault::DataNotFound => DiskImageError::DataNotFound,
            SectorFault::HeaderChecksum | SectorFault::DataChecksum => DiskImageError::ChecksumMismatch,
            SectorFault::ContainerError(code) => DiskImageError::format(format!("Container error code {:02X}", code)),
        }
    }
}
