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

    src/file_system/entry.rs

    A directory entry as reported by any filesystem walker.
*/

use crate::file_system::date_time::FsDateTime;
use std::fmt::{Display, Formatter, Result};

#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FileEntry {
    /// The file name, converted to ASCII. CP/M names include the extension after a period.
    pub(crate) name: String,
    /// A short type string, such as "PRG" for CBM files.
    pub(crate) file_type: String,
    pub(crate) size: u64,
    /// The number of allocation units (CBM blocks or CP/M records) the file occupies.
    pub(crate) blocks: u32,
    /// Attribute flags in display form, such as "<" for a locked CBM file or "R/O SYS" for CP/M.
    pub(crate) attributes: String,
    /// CP/M user area. Always 0 for CBM files.
    pub(crate) user: u8,
    pub(crate) created: Option<FsDateTime>,
    pub(crate) modified: Option<FsDateTime>,
}

impl Display for FileEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(
            f,
            "{:>5}  {:<16} {:<4} {:>8} {}",
            self.blocks, self.name, self.file_type, self.size, self.attributes
        )?;
        if let Some(modified) = &self.modified {
            write!(f, " {}", modified)?;
        }
        Ok(())
    }
}

impl FileEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file_type(&self) -> &str {
        &self.file_type
    }

    /// Returns the size of the file in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn blocks(&self) -> u32 {
        self.blocks
    }

    pub fn attributes(&self) -> &str {
        &self.attributes
    }

    pub fn user(&self) -> u8 {
        self.user
    }

    pub fn created(&self) -> Option<&FsDateTime> {
        self.created.as_ref()
    }

    pub fn modified(&self) -> Option<&FsDateTime> {
        self.modified.as_ref()
    }

    /// Return the extension of the file, if it exists.
    pub fn ext(&self) -> Option<&str> {
        self.name.rsplit_once('.').map(|(_, ext)| ext).filter(|e| !e.is_empty())
    }
}
