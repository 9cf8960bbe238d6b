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
*/
//! # fluxvault
//!
//! fluxvault is a library crate for preserving floppy disks from raw magnetic flux captures.
//!
//! The decode direction of the library runs from a capture device or a flux container, through a
//! [flux::FluxBuffer], into the [track_reader::TrackReader] which produces [track_reader::TrackRecord]s.
//! Track records are collected into a [DiskImage], which may be serialized with any of the container
//! codecs in [file_parsers] or interpreted by the filesystem walkers in [file_system].
//!
//! The reverse direction turns a [DiskImage] back into bitstreams and flux for writing with a
//! capture device, or into any writable container format.
//!
//! The [pipeline::Pipeline] ties all of these stages together and implements the retry policy used
//! when reading damaged disks.

pub mod bitstream_codec;
pub mod copy_protection;
pub mod diskimage;
pub mod file_parsers;
pub mod file_system;
pub mod flux;
pub mod hardware;
pub mod io;
pub mod latency;
pub mod pipeline;
pub mod random;
pub mod track_reader;
pub mod types;
pub mod util;

use std::{
    fmt::{self, Display, Formatter},
    hash::RandomState,
};

use thiserror::Error;

pub const MAXIMUM_SECTOR_SIZE: usize = 8192;
pub const CBM_SECTOR_SIZE: usize = 256;
pub const DEFAULT_SECTOR_SIZE: usize = 512;
/// Minimum buffer length for human-readable detail strings carried by errors and reports.
pub const DETAIL_STRING_LEN: usize = 256;

#[allow(unused)]
type FoxHashMap<K, V, S = RandomState> = std::collections::HashMap<K, V, S>;
#[allow(unused)]
type FoxHashSet<T, S = RandomState> = std::collections::HashSet<T, S>;

/// Truncate a detail string to [DETAIL_STRING_LEN] characters.
pub fn bounded_detail(detail: impl Into<String>) -> String {
    let detail = detail.into();
    if detail.chars().count() <= DETAIL_STRING_LEN {
        detail
    }
    else {
        detail.chars().take(DETAIL_STRING_LEN).collect()
    }
}

/// The kind of an error, independent of the component that raised it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorKind {
    InvalidArgument,
    ResourceExhausted,
    Io,
    Format,
    Consistency,
    NotFound,
    AlreadyExists,
    Permission,
    Cancelled,
    Timeout,
    NotImplemented,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            ErrorKind::InvalidArgument => write!(f, "invalid_argument"),
            ErrorKind::ResourceExhausted => write!(f, "resource_exhausted"),
            ErrorKind::Io => write!(f, "io"),
            ErrorKind::Format => write!(f, "format"),
            ErrorKind::Consistency => write!(f, "consistency"),
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::AlreadyExists => write!(f, "already_exists"),
            ErrorKind::Permission => write!(f, "permission"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::NotImplemented => write!(f, "not_implemented"),
        }
    }
}

impl ErrorKind {
    /// Return the process exit code a front-end should use when an operation fails with this kind.
    /// Validation failures are not an error kind; front-ends report them with exit code 5.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::InvalidArgument
            | ErrorKind::NotFound
            | ErrorKind::AlreadyExists
            | ErrorKind::Permission
            | ErrorKind::NotImplemented => 1,
            ErrorKind::Io | ErrorKind::ResourceExhausted => 2,
            ErrorKind::Format => 3,
            ErrorKind::Timeout => 4,
            ErrorKind::Consistency => 5,
            ErrorKind::Cancelled => 130,
        }
    }
}

/// Exit code reported by front-ends when a validation report contains failures.
pub const EXIT_VALIDATION_FAILURE: i32 = 5;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum DiskImageError {
    #[error("Invalid parameters were specified to a library function: {0}")]
    ParameterError(String),
    #[error("Resources were exhausted: {0}")]
    ResourceExhausted(String),
    #[error("The disk is full")]
    DiskFull,
    #[error("An IO error occurred reading or writing the disk image: {0}")]
    IoError(String),
    #[error("A hardware device error occurred: {0}")]
    DeviceError(String),
    #[error("Unknown disk image format")]
    UnknownFormat,
    #[error("Unsupported disk image format for requested operation")]
    UnsupportedFormat,
    #[error("The disk image format parser encountered an error: {0}")]
    FormatParseError(String),
    #[error("An invalid GCR symbol was encountered")]
    BadGcr,
    #[error("No sync mark was found")]
    SyncNotFound,
    #[error("No sector header was found")]
    HeaderNotFound,
    #[error("No sector data field was found")]
    DataNotFound,
    #[error("A checksum mismatch was detected")]
    ChecksumMismatch,
    #[error("The disk image is inconsistent: {0}")]
    ConsistencyError(String),
    #[error("The requested item could not be found: {0}")]
    NotFound(String),
    #[error("The item already exists: {0}")]
    AlreadyExists(String),
    #[error("The disk image or file is write protected: {0}")]
    WriteProtect(String),
    #[error("The operation was cancelled")]
    Cancelled,
    #[error("The device did not respond in time: {0}")]
    Timeout(String),
    #[error("The requested feature is not implemented: {0}")]
    NotImplemented(String),
}

impl DiskImageError {
    pub fn kind(&self) -> ErrorKind {
        use DiskImageError::*;
        match self {
            ParameterError(_) => ErrorKind::InvalidArgument,
            ResourceExhausted(_) | DiskFull => ErrorKind::ResourceExhausted,
            IoError(_) | DeviceError(_) => ErrorKind::Io,
            UnknownFormat | UnsupportedFormat | FormatParseError(_) | BadGcr | SyncNotFound | HeaderNotFound
            | DataNotFound | ChecksumMismatch => ErrorKind::Format,
            ConsistencyError(_) => ErrorKind::Consistency,
            NotFound(_) => ErrorKind::NotFound,
            AlreadyExists(_) => ErrorKind::AlreadyExists,
            WriteProtect(_) => ErrorKind::Permission,
            Cancelled => ErrorKind::Cancelled,
            Timeout(_) => ErrorKind::Timeout,
            NotImplemented(_) => ErrorKind::NotImplemented,
        }
    }

    /// Return true if the error concerns a single sector and a re-read may clear it.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DiskImageError::BadGcr | DiskImageError::ChecksumMismatch | DiskImageError::DataNotFound
        )
    }

    /// Return the exit code a front-end should report for this error. Device errors are reported
    /// as hardware errors rather than plain I/O.
    pub fn exit_code(&self) -> i32 {
        match self {
            DiskImageError::DeviceError(_) => 4,
            _ => self.kind().exit_code(),
        }
    }

    pub fn parameter(detail: impl Into<String>) -> Self {
        DiskImageError::ParameterError(bounded_detail(detail))
    }

    pub fn format(detail: impl Into<String>) -> Self {
        DiskImageError::FormatParseError(bounded_detail(detail))
    }

    pub fn consistency(detail: impl Into<String>) -> Self {
        DiskImageError::ConsistencyError(bounded_detail(detail))
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        DiskImageError::NotFound(bounded_detail(detail))
    }

    pub fn io(detail: impl Into<String>) -> Self {
        DiskImageError::IoError(bounded_detail(detail))
    }

    pub fn device(detail: impl Into<String>) -> Self {
        DiskImageError::DeviceError(bounded_detail(detail))
    }

    pub fn not_implemented(detail: impl Into<String>) -> Self {
        DiskImageError::NotImplemented(bounded_detail(detail))
    }
}

impl From<std::io::Error> for DiskImageError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => DiskImageError::Timeout(bounded_detail(err.to_string())),
            std::io::ErrorKind::UnexpectedEof => DiskImageError::format(format!("Unexpected end of data: {}", err)),
            _ => DiskImageError::io(err.to_string()),
        }
    }
}

impl From<binrw::Error> for DiskImageError {
    fn from(err: binrw::Error) -> Self {
        match err {
            binrw::Error::Io(e) => DiskImageError::from(e),
            _ => DiskImageError::format(err.to_string()),
        }
    }
}

pub use crate::{
    diskimage::{DiskImage, DiskMetadata, DosFlavor},
    file_parsers::{format_from_ext, supported_extensions, DiskImageFileFormat, ImageParser},
    flux::FluxBuffer,
    types::{ContainerBytes, DiskCh, SectorBytes, TrackBytes, TrackDataEncoding, TrackKey},
};

pub mod prelude {
    pub use crate::{
        diskimage::{DiskImage, DiskMetadata, DosFlavor},
        file_parsers::{DiskImageFileFormat, FormatCaps, ImageParser, ParserWriteCompatibility},
        file_system::{cbm::CbmFileSystem, cpm::CpmFileSystem, FileSystemError},
        flux::FluxBuffer,
        hardware::{AdapterCaps, AdapterRegistry, CancelFlag, HardwareAdapter},
        latency::{LatencyConfig, LatencyProfile},
        pipeline::{Pipeline, PipelineConfig},
        track_reader::{SectorRecord, TrackReader, TrackReaderOptions, TrackRecord},
        types::{ContainerBytes, DataAddressMark, DiskCh, SectorBytes, TrackBytes, TrackDataEncoding, TrackKey},
        DiskImageError,
        ErrorKind,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_detail() {
        let long = "x".repeat(1000);
        assert_eq!(bounded_detail(long).len(), DETAIL_STRING_LEN);
        assert_eq!(bounded_detail("short"), "short");
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(DiskImageError::Cancelled.exit_code(), 130);
        assert_eq!(DiskImageError::BadGcr.exit_code(), 3);
        assert_eq!(DiskImageError::io("x").exit_code(), 2);
        assert_eq!(DiskImageError::device("x").exit_code(), 4);
        assert_eq!(DiskImageError::parameter("x").exit_code(), 1);
    }
}
