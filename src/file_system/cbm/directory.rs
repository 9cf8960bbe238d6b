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

    src/file_system/cbm/directory.rs

    CBM directory entries and the directory chain.
*/

use super::{
    geometry::{CbmGeometry, Ts},
    petscii::{name_to_ascii, NAME_LEN},
    read_block,
};
use crate::{file_system::FileSystemError, DiskImage, CBM_SECTOR_SIZE};
use std::{
    collections::BTreeSet,
    fmt::{self, Display, Formatter},
};

pub const ENTRY_LEN: usize = 32;
pub const ENTRIES_PER_SECTOR: usize = CBM_SECTOR_SIZE / ENTRY_LEN;

const TYPE_CLOSED: u8 = 0x80;
const TYPE_LOCKED: u8 = 0x40;
const TYPE_MASK: u8 = 0x0F;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CbmFileType {
    Del,
    Seq,
    Prg,
    Usr,
    Rel,
}

impl CbmFileType {
    pub fn from_code(code: u8) -> Option<Self> {
        match code & TYPE_MASK {
            0 => Some(CbmFileType::Del),
            1 => Some(CbmFileType::Seq),
            2 => Some(CbmFileType::Prg),
            3 => Some(CbmFileType::Usr),
            4 => Some(CbmFileType::Rel),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            CbmFileType::Del => 0,
            CbmFileType::Seq => 1,
            CbmFileType::Prg => 2,
            CbmFileType::Usr => 3,
            CbmFileType::Rel => 4,
        }
    }
}

impl Display for CbmFileType {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            CbmFileType::Del => write!(f, "DEL"),
            CbmFileType::Seq => write!(f, "SEQ"),
            CbmFileType::Prg => write!(f, "PRG"),
            CbmFileType::Usr => write!(f, "USR"),
            CbmFileType::Rel => write!(f, "REL"),
        }
    }
}

/// The location of an entry within the directory chain.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DirSlot {
    pub ts: Ts,
    pub index: usize,
}

impl DirSlot {
    pub fn offset(&self) -> usize {
        self.index * ENTRY_LEN
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DirEntry {
    pub slot: DirSlot,
    /// The raw type byte, including the closed and locked flags.
    pub type_byte: u8,
    pub first_ts: Ts,
    pub name: [u8; NAME_LEN],
    /// First side sector of a REL file.
    pub side_ts: Ts,
    pub record_len: u8,
    pub blocks: u16,
}

impl DirEntry {
    pub fn new(slot: DirSlot, file_type: CbmFileType, name: [u8; NAME_LEN], first_ts: Ts, blocks: u16) -> Self {
        DirEntry {
            slot,
            type_byte: file_type.code() | TYPE_CLOSED,
            first_ts,
            name,
            side_ts: (0, 0),
            record_len: 0,
            blocks,
        }
    }

    /// Parse the entry in `slot` of a directory sector. Returns `None` for an empty slot.
    pub fn parse(block: &[u8], slot: DirSlot) -> Option<Self> {
        let e = &block[slot.offset()..slot.offset() + ENTRY_LEN];
        if e[2] == 0 {
            return None;
        }
        let mut name = [0u8; NAME_LEN];
        name.copy_from_slice(&e[5..5 + NAME_LEN]);
        Some(DirEntry {
            slot,
            type_byte: e[2],
            first_ts: (e[3], e[4]),
            name,
            side_ts: (e[0x15], e[0x16]),
            record_len: e[0x17],
            blocks: u16::from_le_bytes([e[0x1E], e[0x1F]]),
        })
    }

    /// Write the entry into its slot, leaving the chain link of slot 0 untouched.
    pub fn store(&self, block: &mut [u8]) {
        let e = &mut block[self.slot.offset()..self.slot.offset() + ENTRY_LEN];
        e[2] = self.type_byte;
        e[3] = self.first_ts.0;
        e[4] = self.first_ts.1;
        e[5..5 + NAME_LEN].copy_from_slice(&self.name);
        e[0x15] = self.side_ts.0;
        e[0x16] = self.side_ts.1;
        e[0x17] = self.record_len;
        e[0x18..0x1E].fill(0);
        e[0x1E..0x20].copy_from_slice(&self.blocks.to_le_bytes());
    }

    /// Clear the entry's slot.
    pub fn clear(slot: DirSlot, block: &mut [u8]) {
        block[slot.offset() + 2..slot.offset() + ENTRY_LEN].fill(0);
    }

    pub fn file_type(&self) -> Option<CbmFileType> {
        CbmFileType::from_code(self.type_byte)
    }

    pub fn is_closed(&self) -> bool {
        self.type_byte & TYPE_CLOSED != 0
    }

    pub fn is_locked(&self) -> bool {
        self.type_byte & TYPE_LOCKED != 0
    }

    pub fn set_locked(&mut self, locked: bool) {
        if locked {
            self.type_byte |= TYPE_LOCKED;
        }
        else {
            self.type_byte &= !TYPE_LOCKED;
        }
    }

    pub fn name_ascii(&self) -> String {
        name_to_ascii(&self.name)
    }

    /// The type column of a directory listing, e.g. `PRG<` for a locked program or `*SEQ` for
    /// an unclosed sequential file.
    pub fn type_label(&self) -> String {
        let splat = if self.is_closed() { "" } else { "*" };
        let lock = if self.is_locked() { "<" } else { "" };
        match self.file_type() {
            Some(t) => format!("{}{}{}", splat, t, lock),
            None => format!("{}???{}", splat, lock),
        }
    }
}

/// The directory chain and the entries it holds.
#[derive(Clone, Debug, Default)]
pub struct Directory {
    /// Directory sectors in chain order.
    pub sectors: Vec<Ts>,
    pub entries: Vec<DirEntry>,
    /// Set if the chain ended on an invalid or repeated link.
    pub chain_error: Option<FileSystemError>,
}

impl Directory {
    pub fn read(image: &DiskImage, geometry: &CbmGeometry) -> Result<Self, FileSystemError> {
        let mut dir = Directory::default();
        let mut visited = BTreeSet::new();
        let mut next = geometry.first_dir_ts();

        loop {
            if !geometry.is_valid_ts(next) {
                dir.chain_error = Some(FileSystemError::BrokenChain(format!(
                    "directory links to track {} sector {}",
                    next.0, next.1
                )));
                break;
            }
            if !visited.insert(next) {
                dir.chain_error = Some(FileSystemError::CircularChain(next.0, next.1));
                break;
            }
            let block = read_block(image, geometry, next)?;
            dir.sectors.push(next);
            for index in 0..ENTRIES_PER_SECTOR {
                if let Some(entry) = DirEntry::parse(&block, DirSlot { ts: next, index }) {
                    dir.entries.push(entry);
                }
            }
            if block[0] == 0 {
                break;
            }
            next = (block[0], block[1]);
        }

        if let Some(err) = &dir.chain_error {
            log::warn!("Directory::read(): {}", err);
        }
        Ok(dir)
    }

    /// Find the first unused slot in the existing directory sectors.
    pub fn free_slot(&self, image: &DiskImage, geometry: &CbmGeometry) -> Result<Option<DirSlot>, FileSystemError> {
        for &ts in &self.sectors {
            let block = read_block(image, geometry, ts)?;
            for index in 0..ENTRIES_PER_SECTOR {
                if block[index * ENTRY_LEN + 2] == 0 {
                    return Ok(Some(DirSlot { ts, index }));
                }
            }
        }
        Ok(None)
    }

    /// Return the live entries: closed files plus unclosed ones that hold a valid type.
    pub fn files(&self) -> impl Iterator<Item = &DirEntry> {
        self.entries.iter().filter(|e| e.file_type().is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_system::cbm::petscii::name_to_petscii;

    #[test]
    fn test_entry_layout() {
        let mut block = [0u8; 256];
        block[0] = 18;
        block[1] = 4;
        let slot = DirSlot { ts: (18, 1), index: 0 };
        let mut entry = DirEntry::new(slot, CbmFileType::Prg, name_to_petscii("GAME").unwrap(), (17, 0), 12);
        entry.set_locked(true);
        entry.store(&mut block);
        assert_eq!(&block[..5], &[18, 4, 0xC2, 17, 0]);
        assert_eq!(&block[0x1E..0x20], &[12, 0]);

        let parsed = DirEntry::parse(&block, slot).unwrap();
        assert_eq!(parsed, entry);
        assert_eq!(parsed.type_label(), "PRG<");
        assert_eq!(parsed.name_ascii(), "GAME");

        DirEntry::clear(slot, &mut block);
        assert_eq!(&block[..2], &[18, 4]);
        assert!(DirEntry::parse(&block, slot).is_none());
    }
}
