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

    src/file_system/mod.rs

    Filesystem walkers over decoded disk images.
*/

//! Filesystem walkers interpret the sectors of a [crate::DiskImage] as a vintage filesystem.
//!
//! [cbm::CbmFileSystem] handles Commodore DOS volumes on 1541, 1571 and 1581 disks.
//! [cpm::CpmFileSystem] handles CP/M volumes described by a disk parameter block.
//!
//! Both walkers implement [FileSystem], so front-ends can list, extract, inject and validate
//! without knowing which filesystem is present.

pub mod cbm;
pub mod cpm;
pub mod date_time;
pub mod entry;

pub use date_time::FsDateTime;
pub use entry::FileEntry;

use crate::{DiskImage, DiskImageError, ErrorKind};
use std::fmt::{self, Display, Formatter};
use thiserror::Error;

/// [FileSystemError] is the error type for FileSystem implementations.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum FileSystemError {
    #[error("An error occurred accessing the disk image: {0}")]
    DiskError(DiskImageError),
    #[error("The requested file was not found: {0}")]
    NotFound(String),
    #[error("A file with that name already exists: {0}")]
    AlreadyExists(String),
    #[error("Invalid file name: {0}")]
    InvalidName(String),
    #[error("The disk is full")]
    DiskFull,
    #[error("The directory is full")]
    DirectoryFull,
    #[error("The file is locked: {0}")]
    FileLocked(String),
    #[error("The disk image is read-only")]
    ReadOnly,
    #[error("No recognizable filesystem was found: {0}")]
    UnsupportedImage(String),
    #[error("A circular chain was found at track {0} sector {1}")]
    CircularChain(u8, u8),
    #[error("A chain references an invalid sector: {0}")]
    BrokenChain(String),
    #[error("A sector belongs to more than one file at track {0} sector {1}")]
    CrossLinked(u8, u8),
    #[error("The allocation map is inconsistent: {0}")]
    BamMismatch(String),
}

impl FileSystemError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FileSystemError::DiskError(e) => e.kind(),
            FileSystemError::NotFound(_) => ErrorKind::NotFound,
            FileSystemError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            FileSystemError::InvalidName(_) => ErrorKind::InvalidArgument,
            FileSystemError::DiskFull | FileSystemError::DirectoryFull => ErrorKind::ResourceExhausted,
            FileSystemError::FileLocked(_) | FileSystemError::ReadOnly => ErrorKind::Permission,
            FileSystemError::UnsupportedImage(_) => ErrorKind::Format,
            FileSystemError::CircularChain(..)
            | FileSystemError::BrokenChain(_)
            | FileSystemError::CrossLinked(..)
            | FileSystemError::BamMismatch(_) => ErrorKind::Consistency,
        }
    }
}

impl From<DiskImageError> for FileSystemError {
    fn from(e: DiskImageError) -> Self {
        match e {
            DiskImageError::WriteProtect(_) => FileSystemError::ReadOnly,
            _ => FileSystemError::DiskError(e),
        }
    }
}

impl From<FileSystemError> for DiskImageError {
    fn from(e: FileSystemError) -> Self {
        use crate::bounded_detail;
        match e {
            FileSystemError::DiskError(inner) => inner,
            FileSystemError::NotFound(name) => DiskImageError::not_found(name),
            FileSystemError::AlreadyExists(name) => DiskImageError::AlreadyExists(bounded_detail(name)),
            FileSystemError::InvalidName(name) => DiskImageError::parameter(format!("Invalid file name: {}", name)),
            FileSystemError::DiskFull | FileSystemError::DirectoryFull => DiskImageError::DiskFull,
            FileSystemError::FileLocked(name) => DiskImageError::WriteProtect(bounded_detail(name)),
            FileSystemError::ReadOnly => DiskImageError::WriteProtect("read-only image".to_string()),
            FileSystemError::UnsupportedImage(detail) => DiskImageError::format(detail),
            other => DiskImageError::consistency(other.to_string()),
        }
    }
}

/// The category of a problem found by filesystem validation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FindingKind {
    BrokenChain,
    CrossLink,
    BlockCountMismatch,
    BamMismatch,
    OrphanSector,
    InvalidEntry,
}

impl Display for FindingKind {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            FindingKind::BrokenChain => write!(f, "broken chain"),
            FindingKind::CrossLink => write!(f, "cross-link"),
            FindingKind::BlockCountMismatch => write!(f, "block count mismatch"),
            FindingKind::BamMismatch => write!(f, "allocation mismatch"),
            FindingKind::OrphanSector => write!(f, "orphan sector"),
            FindingKind::InvalidEntry => write!(f, "invalid entry"),
        }
    }
}

/// A single problem found by filesystem validation.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FsFinding {
    pub kind: FindingKind,
    /// The file concerned, if any.
    pub file: Option<String>,
    pub detail: String,
}

impl Display for FsFinding {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}: \"{}\": {}", self.kind, file, self.detail),
            None => write!(f, "{}: {}", self.kind, self.detail),
        }
    }
}

/// The result of validating a filesystem.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FsValidation {
    pub findings: Vec<FsFinding>,
    pub files_checked: usize,
}

impl FsValidation {
    pub fn is_ok(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn count(&self, kind: FindingKind) -> usize {
        self.findings.iter().filter(|f| f.kind == kind).count()
    }

    pub(crate) fn push(&mut self, kind: FindingKind, file: Option<&str>, detail: impl Into<String>) {
        self.findings.push(FsFinding {
            kind,
            file: file.map(|s| s.to_string()),
            detail: crate::bounded_detail(detail),
        });
    }
}

/// A walker's view of the disk image it was mounted on. Walkers mounted on a shared reference
/// refuse every mutation with [FileSystemError::ReadOnly].
pub(crate) enum ImageRef<'a> {
    Shared(&'a DiskImage),
    Exclusive(&'a mut DiskImage),
}

impl ImageRef<'_> {
    pub(crate) fn get(&self) -> &DiskImage {
        match self {
            ImageRef::Shared(image) => image,
            ImageRef::Exclusive(image) => image,
        }
    }

    pub(crate) fn get_mut(&mut self) -> Result<&mut DiskImage, FileSystemError> {
        match self {
            ImageRef::Shared(_) => Err(FileSystemError::ReadOnly),
            ImageRef::Exclusive(image) if image.is_readonly() => Err(FileSystemError::ReadOnly),
            ImageRef::Exclusive(image) => Ok(&mut **image),
        }
    }
}

/// Operations common to every filesystem walker. A walker borrows the disk image for its
/// lifetime; mutations are written through to the image's sectors.
pub trait FileSystem {
    /// List the files in the root directory.
    fn list(&self) -> Result<Vec<FileEntry>, FileSystemError>;
    /// Read the contents of a file.
    fn extract(&self, name: &str) -> Result<Vec<u8>, FileSystemError>;
    /// Write a new file.
    fn inject(&mut self, name: &str, data: &[u8]) -> Result<(), FileSystemError>;
    /// Delete a file and free its blocks.
    fn delete(&mut self, name: &str) -> Result<(), FileSystemError>;
    /// Check the filesystem structures for consistency.
    fn validate(&self) -> Result<FsValidation, FileSystemError>;
    /// Return the number of free bytes.
    fn free_bytes(&self) -> Result<u64, FileSystemError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(FileSystemError::CircularChain(1, 0).kind(), ErrorKind::Consistency);
        assert_eq!(FileSystemError::DiskFull.kind(), ErrorKind::ResourceExhausted);
        let e: DiskImageError = FileSystemError::CircularChain(1, 0).into();
        assert_eq!(e.kind(), ErrorKind::Consistency);
        let e: DiskImageError = FileSystemError::NotFound("X".into()).into();
        assert_eq!(e.exit_code(), 1);
    }
}
