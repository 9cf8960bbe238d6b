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

    src/file_system/cpm/directory.rs

    CP/M directory entries, file grouping and CP/M 3 date stamps.
*/

use super::dpb::{Dpb, EXTENT_BYTES, RECORD_SIZE};
use crate::file_system::{FileSystemError, FsDateTime};
use bitflags::bitflags;
use std::collections::BTreeMap;

pub const ENTRY_LEN: usize = 32;
/// User byte of an unused or deleted entry.
pub const DELETED: u8 = 0xE5;
/// User byte of a directory label (CP/M 3).
pub const DIR_LABEL: u8 = 0x20;
/// User byte of a date stamp entry (CP/M 3).
pub const DATE_STAMPS: u8 = 0x21;
pub const MAX_USER: u8 = 31;

const NAME_LEN: usize = 8;
const EXT_LEN: usize = 3;
/// Characters the CCP refuses in file names.
const RESERVED: &[char] = &['<', '>', '.', ',', ';', ':', '=', '?', '*', '[', ']', '|', '(', ')', '/', '\\'];

bitflags! {
    /// Attribute bits carried in the high bits of the extension bytes.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct CpmAttributes: u8 {
        const READ_ONLY = 0b0000_0001;
        const SYSTEM    = 0b0000_0010;
        const ARCHIVED  = 0b0000_0100;
    }
}

impl CpmAttributes {
    pub fn label(&self) -> String {
        let mut parts = Vec::new();
        if self.contains(CpmAttributes::READ_ONLY) {
            parts.push("R/O");
        }
        if self.contains(CpmAttributes::SYSTEM) {
            parts.push("SYS");
        }
        if self.contains(CpmAttributes::ARCHIVED) {
            parts.push("ARC");
        }
        parts.join(" ")
    }
}

/// A CP/M file name: 8 name bytes and 3 extension bytes, space padded, attribute bits stripped.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CpmName {
    pub name: [u8; NAME_LEN],
    pub ext: [u8; EXT_LEN],
}

impl CpmName {
    /// Parse `NAME.EXT`. Letters are folded to upper case.
    pub fn parse(s: &str) -> Option<Self> {
        let (name, ext) = s.split_once('.').unwrap_or((s, ""));
        let valid = |part: &str, max: usize| {
            part.len() <= max && part.chars().all(|c| c.is_ascii_graphic()) && !part.contains(RESERVED)
        };
        if name.is_empty() || !valid(name, NAME_LEN) || !valid(ext, EXT_LEN) {
            return None;
        }
        let mut out = CpmName {
            name: [b' '; NAME_LEN],
            ext: [b' '; EXT_LEN],
        };
        for (dst, c) in out.name.iter_mut().zip(name.bytes()) {
            *dst = c.to_ascii_uppercase();
        }
        for (dst, c) in out.ext.iter_mut().zip(ext.bytes()) {
            *dst = c.to_ascii_uppercase();
        }
        Some(out)
    }

    pub fn display_name(&self) -> String {
        let name = String::from_utf8_lossy(&self.name).trim_end().to_string();
        let ext = String::from_utf8_lossy(&self.ext).trim_end().to_string();
        if ext.is_empty() {
            name
        }
        else {
            format!("{}.{}", name, ext)
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CpmDirEntry {
    /// Position of the entry in the directory.
    pub index: usize,
    pub user: u8,
    pub name: CpmName,
    pub attributes: CpmAttributes,
    /// Logical extent number, combining EX and S2.
    pub extent: u16,
    pub records: u8,
    pub blocks: Vec<u16>,
}

impl CpmDirEntry {
    /// Parse a live file entry. Deleted entries, labels and date stamps return `None`.
    pub fn parse(index: usize, e: &[u8], dpb: &Dpb) -> Option<Self> {
        if e[0] > MAX_USER {
            return None;
        }
        let mut name = CpmName {
            name: [0; NAME_LEN],
            ext: [0; EXT_LEN],
        };
        for (dst, src) in name.name.iter_mut().zip(&e[1..9]) {
            *dst = src & 0x7F;
        }
        for (dst, src) in name.ext.iter_mut().zip(&e[9..12]) {
            *dst = src & 0x7F;
        }
        let mut attributes = CpmAttributes::empty();
        attributes.set(CpmAttributes::READ_ONLY, e[9] & 0x80 != 0);
        attributes.set(CpmAttributes::SYSTEM, e[10] & 0x80 != 0);
        attributes.set(CpmAttributes::ARCHIVED, e[11] & 0x80 != 0);

        let blocks = if dpb.wide_pointers() {
            e[16..32]
                .chunks_exact(2)
                .map(|p| u16::from_le_bytes([p[0], p[1]]))
                .collect()
        }
        else {
            e[16..32].iter().map(|&b| b as u16).collect()
        };

        Some(CpmDirEntry {
            index,
            user: e[0],
            name,
            attributes,
            extent: (e[12] & 0x1F) as u16 | ((e[14] as u16) << 5),
            records: e[15],
            blocks,
        })
    }

    pub fn store(&self, e: &mut [u8], dpb: &Dpb) {
        e.fill(0);
        e[0] = self.user;
        e[1..9].copy_from_slice(&self.name.name);
        e[9..12].copy_from_slice(&self.name.ext);
        if self.attributes.contains(CpmAttributes::READ_ONLY) {
            e[9] |= 0x80;
        }
        if self.attributes.contains(CpmAttributes::SYSTEM) {
            e[10] |= 0x80;
        }
        if self.attributes.contains(CpmAttributes::ARCHIVED) {
            e[11] |= 0x80;
        }
        e[12] = (self.extent & 0x1F) as u8;
        e[14] = (self.extent >> 5) as u8;
        e[15] = self.records;
        if dpb.wide_pointers() {
            for (dst, block) in e[16..32].chunks_exact_mut(2).zip(&self.blocks) {
                dst.copy_from_slice(&block.to_le_bytes());
            }
        }
        else {
            for (dst, &block) in e[16..32].iter_mut().zip(&self.blocks) {
                *dst = block as u8;
            }
        }
    }

    /// Non-zero allocation pointers.
    pub fn used_blocks(&self) -> impl Iterator<Item = u16> + '_ {
        self.blocks.iter().copied().filter(|&b| b != 0)
    }

    /// Return true if the raw entry looks like a file entry of a volume described by `dpb`.
    pub fn is_well_formed(e: &[u8], dpb: &Dpb) -> bool {
        if e[0] > MAX_USER || e[13] != 0 || e[15] > 0x80 {
            return false;
        }
        let printable = e[1..12].iter().all(|&b| (0x20..0x7F).contains(&(b & 0x7F)));
        if !printable || e[1] & 0x7F == b' ' {
            return false;
        }
        CpmDirEntry::parse(0, e, dpb)
            .map(|entry| entry.used_blocks().all(|b| b <= dpb.max_block()))
            .unwrap_or(false)
    }
}

/// Creation and modification stamps for one directory entry.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DateStamp {
    pub created: Option<FsDateTime>,
    pub modified: Option<FsDateTime>,
}

impl DateStamp {
    /// Decode the 10-byte stamp slot: create date and time, update date and time, then the
    /// password mode and a reserved byte.
    pub fn parse(slot: &[u8]) -> Self {
        let stamp = |b: &[u8]| FsDateTime::from_cpm(u16::from_le_bytes([b[0], b[1]]), b[2], b[3]);
        DateStamp {
            created: stamp(&slot[0..4]),
            modified: stamp(&slot[4..8]),
        }
    }
}

/// All entries of a file, in extent order.
#[derive(Clone, Debug)]
pub struct CpmFile {
    pub user: u8,
    pub name: CpmName,
    pub entries: Vec<CpmDirEntry>,
    pub stamp: DateStamp,
}

impl CpmFile {
    pub fn display_name(&self) -> String {
        self.name.display_name()
    }

    /// Attributes are taken from the first extent.
    pub fn attributes(&self) -> CpmAttributes {
        self.entries.first().map(|e| e.attributes).unwrap_or_default()
    }

    /// File size in bytes, rounded up to whole records.
    pub fn size(&self) -> u64 {
        match self.entries.last() {
            Some(last) => last.extent as u64 * EXTENT_BYTES as u64 + last.records as u64 * RECORD_SIZE as u64,
            None => 0,
        }
    }

    pub fn blocks(&self) -> impl Iterator<Item = u16> + '_ {
        self.entries.iter().flat_map(|e| e.used_blocks())
    }

    /// Return the first missing entry, if the extent sequence has a gap.
    pub fn missing_extent(&self, dpb: &Dpb) -> Option<u16> {
        let per_entry = dpb.extent_mask() as u16 + 1;
        self.entries
            .iter()
            .enumerate()
            .find(|(i, e)| e.extent / per_entry != *i as u16)
            .map(|(i, _)| i as u16 * per_entry)
    }
}

/// The directory region of a CP/M volume.
#[derive(Clone, Debug)]
pub struct CpmDirectory {
    /// The raw directory bytes, `dir_entries * 32` long.
    pub raw: Vec<u8>,
    pub has_stamps: bool,
}

impl CpmDirectory {
    pub fn new(raw: Vec<u8>) -> Self {
        let has_stamps = raw
            .chunks_exact(ENTRY_LEN)
            .enumerate()
            .any(|(i, e)| i % 4 == 3 && e[0] == DATE_STAMPS);
        CpmDirectory { raw, has_stamps }
    }

    pub fn entry_ct(&self) -> usize {
        self.raw.len() / ENTRY_LEN
    }

    pub fn raw_entry(&self, index: usize) -> &[u8] {
        &self.raw[index * ENTRY_LEN..(index + 1) * ENTRY_LEN]
    }

    pub fn raw_entry_mut(&mut self, index: usize) -> &mut [u8] {
        &mut self.raw[index * ENTRY_LEN..(index + 1) * ENTRY_LEN]
    }

    pub fn entries<'a>(&'a self, dpb: &'a Dpb) -> impl Iterator<Item = CpmDirEntry> + 'a {
        self.raw
            .chunks_exact(ENTRY_LEN)
            .enumerate()
            .filter_map(move |(i, e)| CpmDirEntry::parse(i, e, dpb))
    }

    /// Return the date stamps recorded for the entry at `index`, if the volume carries them.
    pub fn stamp_for(&self, index: usize) -> DateStamp {
        if !self.has_stamps || index % 4 == 3 {
            return DateStamp::default();
        }
        let stamp_index = index | 3;
        if stamp_index >= self.entry_ct() {
            return DateStamp::default();
        }
        let e = self.raw_entry(stamp_index);
        if e[0] != DATE_STAMPS {
            return DateStamp::default();
        }
        let slot = 1 + (index % 4) * 10;
        DateStamp::parse(&e[slot..slot + 10])
    }

    /// Group entries into files by (user, name), each sorted by extent.
    pub fn files(&self, dpb: &Dpb) -> Vec<CpmFile> {
        let mut groups: BTreeMap<(u8, CpmName), Vec<CpmDirEntry>> = BTreeMap::new();
        for entry in self.entries(dpb) {
            groups.entry((entry.user, entry.name)).or_default().push(entry);
        }
        groups
            .into_iter()
            .map(|((user, name), mut entries)| {
                entries.sort_by_key(|e| e.extent);
                let stamp = entries
                    .iter()
                    .find(|e| e.extent <= dpb.extent_mask() as u16)
                    .map(|e| self.stamp_for(e.index))
                    .unwrap_or_default();
                CpmFile {
                    user,
                    name,
                    entries,
                    stamp,
                }
            })
            .collect()
    }

    pub fn find(&self, dpb: &Dpb, user: u8, name: &CpmName) -> Option<CpmFile> {
        self.files(dpb).into_iter().find(|f| f.user == user && f.name == *name)
    }

    /// Return the indices of unused entries, skipping the slots reserved for date stamps.
    pub fn free_entries(&self) -> Vec<usize> {
        self.raw
            .chunks_exact(ENTRY_LEN)
            .enumerate()
            .filter(|(i, e)| e[0] == DELETED && !(self.has_stamps && i % 4 == 3))
            .map(|(i, _)| i)
            .collect()
    }

    /// Count of well-formed and deleted entries, used to judge whether a candidate layout holds
    /// a directory at all.
    pub fn plausibility(&self, dpb: &Dpb) -> (usize, usize) {
        let mut well_formed = 0;
        let mut deleted = 0;
        for e in self.raw.chunks_exact(ENTRY_LEN) {
            if e[0] == DELETED {
                deleted += 1;
            }
            else if CpmDirEntry::is_well_formed(e, dpb) {
                well_formed += 1;
            }
        }
        (well_formed, deleted)
    }

    pub fn is_plausible(&self, dpb: &Dpb) -> bool {
        let (well_formed, deleted) = self.plausibility(dpb);
        well_formed >= 1 || deleted >= 3
    }
}

/// Parse a `[user:]NAME.EXT` file specification.
pub fn parse_file_spec(spec: &str) -> Result<(u8, CpmName), FileSystemError> {
    let (user, name) = match spec.split_once(':') {
        Some((user, name)) => {
            let user = user
                .parse::<u8>()
                .ok()
                .filter(|&u| u <= MAX_USER)
                .ok_or_else(|| FileSystemError::InvalidName(spec.to_string()))?;
            (user, name)
        }
        None => (0, spec),
    };
    let name = CpmName::parse(name).ok_or_else(|| FileSystemError::InvalidName(spec.to_string()))?;
    Ok((user, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_system::cpm::dpb::dpb_by_name;

    #[test]
    fn test_name_parsing() {
        let name = CpmName::parse("stat.com").unwrap();
        assert_eq!(&name.name, b"STAT    ");
        assert_eq!(&name.ext, b"COM");
        assert_eq!(name.display_name(), "STAT.COM");
        assert_eq!(CpmName::parse("README").unwrap().display_name(), "README");
        assert!(CpmName::parse("TOOLONGNAME.COM").is_none());
        assert!(CpmName::parse("A*.COM").is_none());
        assert!(CpmName::parse(".COM").is_none());
        assert_eq!(parse_file_spec("3:PIP.COM").unwrap().0, 3);
        assert!(parse_file_spec("32:PIP.COM").is_err());
    }

    #[test]
    fn test_entry_fields() {
        let dpb = dpb_by_name("ibm-3740").unwrap();
        let mut raw = [0u8; ENTRY_LEN];
        raw[0] = 2;
        raw[1..12].copy_from_slice(b"DUMP    COM");
        raw[9] |= 0x80;
        raw[10] |= 0x80;
        raw[12] = 3;
        raw[14] = 1;
        raw[15] = 0x40;
        raw[16] = 2;
        raw[17] = 3;

        let entry = CpmDirEntry::parse(0, &raw, dpb).unwrap();
        assert_eq!(entry.user, 2);
        assert_eq!(entry.name.display_name(), "DUMP.COM");
        assert_eq!(entry.attributes.label(), "R/O SYS");
        assert_eq!(entry.extent, 35);
        assert_eq!(entry.used_blocks().collect::<Vec<_>>(), vec![2, 3]);
        assert!(CpmDirEntry::is_well_formed(&raw, dpb));

        let mut stored = [0u8; ENTRY_LEN];
        entry.store(&mut stored, dpb);
        assert_eq!(stored, raw);
    }

    #[test]
    fn test_date_stamps() {
        let mut raw = vec![DELETED; 4 * ENTRY_LEN];
        raw[3 * ENTRY_LEN] = DATE_STAMPS;
        // Entry 1: created day 1, modified day 366 at 12:34.
        let slot = 3 * ENTRY_LEN + 1 + 10;
        raw[slot..slot + 8].copy_from_slice(&[1, 0, 0x08, 0x00, 0x6E, 0x01, 0x12, 0x34]);
        let dir = CpmDirectory::new(raw);
        assert!(dir.has_stamps);
        let stamp = dir.stamp_for(1);
        let created = stamp.created.unwrap();
        assert_eq!((created.year, created.month, created.day, created.hour), (1978, 1, 1, 8));
        let modified = stamp.modified.unwrap();
        assert_eq!((modified.year, modified.month, modified.day), (1979, 1, 1));
        assert_eq!((modified.hour, modified.minute), (12, 34));
        assert_eq!(dir.free_entries(), vec![0, 1, 2]);
    }
}
