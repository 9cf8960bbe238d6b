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

    src/file_system/cpm/mod.rs

    A CP/M filesystem walker.
*/

//! [CpmFileSystem] interprets a [DiskImage] as a CP/M 2.2 or CP/M 3 volume described by a [Dpb].
//!
//! CP/M keeps no allocation map on disk. The set of used blocks is the directory blocks plus
//! every block referenced by a live directory entry, so mutations only need to order data
//! writes before directory writes.

pub mod directory;
pub mod dpb;

pub use directory::{CpmAttributes, CpmDirEntry, CpmDirectory, CpmFile, CpmName, DateStamp};
pub use dpb::{dpb_by_name, Dpb, SideOrder, DPB_CATALOG};

use crate::{
    diskimage::{DiskMetadata, DosFlavor},
    file_system::{FileEntry, FileSystem, FileSystemError, FindingKind, FsValidation, ImageRef},
    track_reader::SectorRecord,
    types::{DiskCh, SectorBytes, TrackDataEncoding},
    DiskImage,
    DiskImageError,
};
use directory::{parse_file_spec, DELETED, ENTRY_LEN};
use dpb::RECORD_SIZE;
use std::collections::{BTreeMap, BTreeSet};

/// CP/M marks the end of text files with ^Z; unused record bytes are filled with it.
pub const EOF_BYTE: u8 = 0x1A;

/// Return the total number of sector data bytes in the image.
fn image_bytes(image: &DiskImage) -> usize {
    image
        .track_iter()
        .flat_map(|t| t.sectors.iter())
        .map(|s| s.data.len())
        .sum()
}

/// Return true if the first track of the image carries the sector IDs and sizes the DPB expects.
fn matches_layout(image: &DiskImage, dpb: &Dpb) -> bool {
    let Some(track) = image.track(DiskCh::new(0, 0))
    else {
        return false;
    };
    track.sectors.len() == dpb.sectors_per_track as usize
        && dpb.skew_table().iter().all(|&id| {
            track
                .sector(id)
                .map(|s| s.data.len() == dpb.sector_size as usize)
                .unwrap_or(false)
        })
}

/// Pick the catalog entry that describes `image`. Candidates must match the image size. A single
/// candidate is returned as is; among several, the first whose sector layout and directory both
/// check out wins, then the first whose layout matches.
pub fn detect_dpb(image: &DiskImage) -> Option<&'static Dpb> {
    let size = image_bytes(image);
    let candidates: Vec<&'static Dpb> = dpb::dpbs_for_size(size).collect();
    log::debug!(
        "detect_dpb(): {} candidate formats for {} bytes: {:?}",
        candidates.len(),
        size,
        candidates.iter().map(|d| d.name).collect::<Vec<_>>()
    );
    if let [only] = candidates.as_slice() {
        return Some(*only);
    }

    let layout_ok: Vec<&'static Dpb> = candidates.into_iter().filter(|d| matches_layout(image, d)).collect();
    layout_ok
        .iter()
        .copied()
        .find(|dpb| {
            read_directory(image, dpb)
                .map(|dir| dir.is_plausible(dpb))
                .unwrap_or(false)
        })
        .or_else(|| layout_ok.first().copied())
}

/// Locate the physical sector holding logical sector `lsec`, counted from the start of the disk.
fn sector_address(dpb: &Dpb, skew: &[u8], lsec: usize) -> (DiskCh, u8) {
    let spt = dpb.sectors_per_track as usize;
    let (c, h) = dpb.track_ch((lsec / spt) as u32);
    (DiskCh::new(c, h), skew[lsec % spt])
}

/// Logical sectors making up `block`.
fn block_sectors(dpb: &Dpb, block: u16) -> std::ops::Range<usize> {
    let spt = dpb.sectors_per_track as usize;
    let per_block = dpb.block_size as usize / dpb.sector_size as usize;
    let first = dpb.reserved_tracks as usize * spt + block as usize * per_block;
    first..first + per_block
}

fn read_block(image: &DiskImage, dpb: &Dpb, skew: &[u8], block: u16) -> Result<Vec<u8>, FileSystemError> {
    if block > dpb.max_block() {
        return Err(FileSystemError::BrokenChain(format!("block {} is out of range", block)));
    }
    let mut data = Vec::with_capacity(dpb.block_size as usize);
    for lsec in block_sectors(dpb, block) {
        let (ch, id) = sector_address(dpb, skew, lsec);
        let sector = image.read_sector(ch, id)?;
        if sector.data.len() != dpb.sector_size as usize {
            return Err(DiskImageError::format(format!(
                "sector {} on track {} holds {} bytes",
                id,
                ch,
                sector.data.len()
            ))
            .into());
        }
        data.extend_from_slice(sector.data.as_slice());
    }
    Ok(data)
}

fn write_block(image: &mut DiskImage, dpb: &Dpb, skew: &[u8], block: u16, data: &[u8]) -> Result<(), FileSystemError> {
    let ss = dpb.sector_size as usize;
    for (lsec, chunk) in block_sectors(dpb, block).zip(data.chunks(ss)) {
        let (ch, id) = sector_address(dpb, skew, lsec);
        if chunk.len() == ss {
            image.write_sector(ch, id, chunk)?;
        }
        else {
            let mut padded = chunk.to_vec();
            padded.resize(ss, EOF_BYTE);
            image.write_sector(ch, id, &padded)?;
        }
    }
    Ok(())
}

fn read_directory(image: &DiskImage, dpb: &Dpb) -> Result<CpmDirectory, FileSystemError> {
    let skew = dpb.skew_table();
    let mut raw = Vec::with_capacity(dpb.dir_blocks() as usize * dpb.block_size as usize);
    for block in 0..dpb.dir_blocks() {
        raw.extend(read_block(image, dpb, &skew, block)?);
    }
    raw.truncate(dpb.dir_entries as usize * ENTRY_LEN);
    Ok(CpmDirectory::new(raw))
}

pub struct CpmFileSystem<'a> {
    image: ImageRef<'a>,
    dpb: &'static Dpb,
    skew: Vec<u8>,
}

impl<'a> CpmFileSystem<'a> {
    /// Mount a volume for reading only, detecting its format from the catalog.
    pub fn mount(image: &'a DiskImage) -> Result<Self, FileSystemError> {
        let dpb = Self::probe(image)?;
        Self::mount_with(image, dpb)
    }

    /// Mount a volume for reading and writing, detecting its format from the catalog.
    pub fn mount_mut(image: &'a mut DiskImage) -> Result<Self, FileSystemError> {
        let dpb = Self::probe(image)?;
        Self::mount_mut_with(image, dpb)
    }

    /// Mount a volume for reading only with an explicit format.
    pub fn mount_with(image: &'a DiskImage, dpb: &'static Dpb) -> Result<Self, FileSystemError> {
        read_directory(image, dpb)?;
        log::debug!("CpmFileSystem::mount_with(): mounted {}", dpb);
        Ok(CpmFileSystem {
            image: ImageRef::Shared(image),
            dpb,
            skew: dpb.skew_table(),
        })
    }

    pub fn mount_mut_with(image: &'a mut DiskImage, dpb: &'static Dpb) -> Result<Self, FileSystemError> {
        read_directory(image, dpb)?;
        log::debug!("CpmFileSystem::mount_mut_with(): mounted {}", dpb);
        Ok(CpmFileSystem {
            image: ImageRef::Exclusive(image),
            dpb,
            skew: dpb.skew_table(),
        })
    }

    fn probe(image: &DiskImage) -> Result<&'static Dpb, FileSystemError> {
        detect_dpb(image).ok_or_else(|| {
            FileSystemError::UnsupportedImage(format!(
                "no CP/M format matches an image of {} bytes",
                image_bytes(image)
            ))
        })
    }

    /// Create a blank volume: every sector filled with 0xE5, which CP/M reads as an empty
    /// directory.
    pub fn format(dpb: &Dpb) -> DiskImage {
        let mut image = DiskImage::new(DiskMetadata {
            dos_flavor: DosFlavor::Cpm,
            double_sided: dpb.sides > 1,
            ..DiskMetadata::default()
        });
        let encoding = if dpb.sector_size == 128 {
            TrackDataEncoding::Fm
        }
        else {
            TrackDataEncoding::Mfm
        };
        for c in 0..dpb.cylinders {
            for h in 0..dpb.sides {
                let sectors = (0..dpb.sectors_per_track)
                    .map(|s| {
                        SectorRecord::new(
                            c,
                            h,
                            dpb.first_sector.wrapping_add(s),
                            SectorBytes::filled(dpb.sector_size as usize, DELETED),
                        )
                    })
                    .collect();
                image.add_sector_track(DiskCh::new(c, h), encoding, sectors);
            }
        }
        image
    }

    pub fn dpb(&self) -> &'static Dpb {
        self.dpb
    }

    pub fn directory(&self) -> Result<CpmDirectory, FileSystemError> {
        read_directory(self.image.get(), self.dpb)
    }

    fn write_directory(&mut self, dir: &CpmDirectory) -> Result<(), FileSystemError> {
        let block_size = self.dpb.block_size as usize;
        let mut raw = dir.raw.clone();
        raw.resize(self.dpb.dir_blocks() as usize * block_size, DELETED);
        let image = self.image.get_mut()?;
        for (block, chunk) in raw.chunks(block_size).enumerate() {
            write_block(image, self.dpb, &self.skew, block as u16, chunk)?;
        }
        Ok(())
    }

    pub fn files(&self) -> Result<Vec<CpmFile>, FileSystemError> {
        Ok(self.directory()?.files(self.dpb))
    }

    fn find(&self, spec: &str) -> Result<(CpmDirectory, CpmFile), FileSystemError> {
        let (user, name) = parse_file_spec(spec)?;
        let dir = self.directory()?;
        let file = dir
            .find(self.dpb, user, &name)
            .ok_or_else(|| FileSystemError::NotFound(spec.to_string()))?;
        Ok((dir, file))
    }

    /// Blocks in use: the directory plus every pointer of a live entry that is in range.
    pub fn used_blocks(&self, dir: &CpmDirectory) -> BTreeSet<u16> {
        let mut used: BTreeSet<u16> = (0..self.dpb.dir_blocks()).collect();
        used.extend(
            dir.entries(self.dpb)
                .flat_map(|e| e.used_blocks().collect::<Vec<_>>())
                .filter(|&b| b <= self.dpb.max_block()),
        );
        used
    }

    pub fn free_blocks(&self) -> Result<usize, FileSystemError> {
        let used = self.used_blocks(&self.directory()?);
        Ok(self.dpb.max_block() as usize + 1 - used.len())
    }

    fn read_file(&self, file: &CpmFile) -> Result<Vec<u8>, FileSystemError> {
        let mut data = Vec::new();
        for block in file.blocks() {
            data.extend(read_block(self.image.get(), self.dpb, &self.skew, block)?);
        }
        data.resize(file.size() as usize, EOF_BYTE);
        Ok(data)
    }

    /// Write a file into the given user area.
    pub fn inject_as(&mut self, user: u8, name: CpmName, data: &[u8]) -> Result<(), FileSystemError> {
        self.image.get_mut()?;
        let mut dir = self.directory()?;
        if dir.find(self.dpb, user, &name).is_some() {
            return Err(FileSystemError::AlreadyExists(name.display_name()));
        }

        let block_size = self.dpb.block_size as usize;
        let per_entry = self.dpb.pointers_per_entry();
        let block_ct = data.len().div_ceil(block_size);
        let entry_ct = block_ct.div_ceil(per_entry).max(1);

        let slots = dir.free_entries();
        if slots.len() < entry_ct {
            return Err(FileSystemError::DirectoryFull);
        }
        let used = self.used_blocks(&dir);
        let blocks: Vec<u16> = (self.dpb.dir_blocks()..=self.dpb.max_block())
            .filter(|b| !used.contains(b))
            .take(block_ct)
            .collect();
        if blocks.len() < block_ct {
            return Err(FileSystemError::DiskFull);
        }

        let image = self.image.get_mut()?;
        for (block, chunk) in blocks.iter().zip(data.chunks(block_size)) {
            write_block(image, self.dpb, &self.skew, *block, chunk)?;
        }

        let records = data.len().div_ceil(RECORD_SIZE);
        let records_per_entry = self.dpb.entry_bytes() / RECORD_SIZE;
        let extents_per_entry = self.dpb.extent_mask() as usize + 1;
        for (i, &slot) in slots.iter().take(entry_ct).enumerate() {
            let in_entry = records.saturating_sub(i * records_per_entry).min(records_per_entry);
            let last_extent = in_entry.max(1).saturating_sub(1) / 128;
            let entry = CpmDirEntry {
                index: slot,
                user,
                name,
                attributes: CpmAttributes::empty(),
                extent: (i * extents_per_entry + last_extent) as u16,
                records: (in_entry - last_extent * 128) as u8,
                blocks: blocks.iter().skip(i * per_entry).take(per_entry).copied().collect(),
            };
            entry.store(dir.raw_entry_mut(slot), self.dpb);
        }
        self.write_directory(&dir)?;

        log::debug!(
            "CpmFileSystem::inject_as(): wrote {}:{} ({} bytes, {} blocks, {} entries)",
            user,
            name.display_name(),
            data.len(),
            block_ct,
            entry_ct
        );
        Ok(())
    }

    /// Set or clear attributes on every entry of a file.
    pub fn set_attributes(&mut self, spec: &str, attributes: CpmAttributes) -> Result<(), FileSystemError> {
        self.image.get_mut()?;
        let (mut dir, file) = self.find(spec)?;
        for mut entry in file.entries {
            entry.attributes = attributes;
            let index = entry.index;
            entry.store(dir.raw_entry_mut(index), self.dpb);
        }
        self.write_directory(&dir)
    }
}

impl FileSystem for CpmFileSystem<'_> {
    fn list(&self) -> Result<Vec<FileEntry>, FileSystemError> {
        Ok(self
            .files()?
            .into_iter()
            .map(|file| FileEntry {
                name: file.display_name(),
                file_type: String::from_utf8_lossy(&file.name.ext).trim_end().to_string(),
                size: file.size(),
                blocks: file.blocks().count() as u32,
                attributes: file.attributes().label(),
                user: file.user,
                created: file.stamp.created.clone(),
                modified: file.stamp.modified.clone(),
            })
            .collect())
    }

    /// Extract a file named `[user:]NAME.EXT`. The data is padded to a whole record with ^Z.
    fn extract(&self, name: &str) -> Result<Vec<u8>, FileSystemError> {
        let (_, file) = self.find(name)?;
        if let Some(extent) = file.missing_extent(self.dpb) {
            return Err(FileSystemError::BrokenChain(format!("{}: extent {} is missing", name, extent)));
        }
        self.read_file(&file)
    }

    fn inject(&mut self, name: &str, data: &[u8]) -> Result<(), FileSystemError> {
        let (user, name) = parse_file_spec(name)?;
        self.inject_as(user, name, data)
    }

    fn delete(&mut self, name: &str) -> Result<(), FileSystemError> {
        self.image.get_mut()?;
        let (mut dir, file) = self.find(name)?;
        if file.attributes().contains(CpmAttributes::READ_ONLY) {
            return Err(FileSystemError::FileLocked(name.to_string()));
        }
        for entry in &file.entries {
            dir.raw_entry_mut(entry.index)[0] = DELETED;
        }
        self.write_directory(&dir)?;
        log::debug!("CpmFileSystem::delete(): deleted {} ({} entries)", name, file.entries.len());
        Ok(())
    }

    fn validate(&self) -> Result<FsValidation, FileSystemError> {
        let mut report = FsValidation::default();
        let dir = self.directory()?;
        let dir_blocks = self.dpb.dir_blocks();
        let mut owners: BTreeMap<u16, String> = BTreeMap::new();

        for file in dir.files(self.dpb) {
            let name = format!("{}:{}", file.user, file.display_name());
            report.files_checked += 1;
            if let Some(extent) = file.missing_extent(self.dpb) {
                report.push(FindingKind::BrokenChain, Some(&name), format!("extent {} is missing", extent));
            }
            for block in file.blocks() {
                if block > self.dpb.max_block() {
                    report.push(
                        FindingKind::InvalidEntry,
                        Some(&name),
                        format!("block {} is beyond the last block {}", block, self.dpb.max_block()),
                    );
                    continue;
                }
                if block < dir_blocks {
                    report.push(
                        FindingKind::CrossLink,
                        Some(&name),
                        format!("block {} belongs to the directory", block),
                    );
                    continue;
                }
                match owners.get(&block) {
                    Some(owner) => report.push(
                        FindingKind::CrossLink,
                        Some(&name),
                        format!("block {} is also used by \"{}\"", block, owner),
                    ),
                    None => {
                        owners.insert(block, name.clone());
                    }
                }
            }
        }

        log::debug!(
            "CpmFileSystem::validate(): {} files checked, {} findings",
            report.files_checked,
            report.findings.len()
        );
        Ok(report)
    }

    fn free_bytes(&self) -> Result<u64, FileSystemError> {
        Ok(self.free_blocks()? as u64 * self.dpb.block_size as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_detect_by_size() {
        for name in ["ibm-3740", "osborne1", "apple2", "qx10", "pc98", "xerox820"] {
            let dpb = dpb_by_name(name).unwrap();
            let image = CpmFileSystem::format(dpb);
            assert_eq!(detect_dpb(&image).map(|d| d.name), Some(name));
        }
    }

    #[test]
    fn test_detect_ambiguous_size() {
        // cpcsys, cpcdata and pcw share a size; the sector IDs pick the right one.
        let image = CpmFileSystem::format(dpb_by_name("cpcdata").unwrap());
        assert_eq!(detect_dpb(&image).map(|d| d.name), Some("cpcdata"));
        let image = CpmFileSystem::format(dpb_by_name("cpcsys").unwrap());
        assert_eq!(detect_dpb(&image).map(|d| d.name), Some("cpcsys"));
    }

    #[test]
    fn test_inject_extract() {
        let dpb = dpb_by_name("ibm-3740").unwrap();
        let mut image = CpmFileSystem::format(dpb);
        let mut fs = CpmFileSystem::mount_mut(&mut image).unwrap();
        assert_eq!(fs.free_bytes().unwrap(), 241 * 1024);

        let data: Vec<u8> = (0..20000u32).map(|i| (i % 251) as u8).collect();
        fs.inject("hello.txt", &data).unwrap();
        fs.inject("5:small.com", &[0xC9; 10]).unwrap();

        let listing = fs.list().unwrap();
        assert_eq!(listing.len(), 2);
        let hello = listing.iter().find(|e| e.name() == "HELLO.TXT").unwrap();
        assert_eq!(hello.size(), 20096);
        assert_eq!(hello.blocks(), 20);
        assert_eq!(hello.file_type(), "TXT");

        let out = fs.extract("HELLO.TXT").unwrap();
        assert_eq!(&out[..data.len()], &data[..]);
        assert!(out[data.len()..].iter().all(|&b| b == EOF_BYTE));

        let small = fs.extract("5:SMALL.COM").unwrap();
        assert_eq!(small.len(), 128);
        assert_eq!(&small[..10], &[0xC9; 10]);
        assert_eq!(fs.extract("SMALL.COM").unwrap_err().kind(), ErrorKind::NotFound);

        let err = fs.inject("HELLO.TXT", &[1]).unwrap_err();
        assert_eq!(err, FileSystemError::AlreadyExists("HELLO.TXT".to_string()));
        assert!(fs.validate().unwrap().is_ok());

        fs.delete("HELLO.TXT").unwrap();
        assert_eq!(fs.list().unwrap().len(), 1);
        assert_eq!(fs.free_bytes().unwrap(), 240 * 1024);
    }

    #[test]
    fn test_multi_extent_entries() {
        let dpb = dpb_by_name("kaypro4").unwrap();
        let mut image = CpmFileSystem::format(dpb);
        {
            let mut fs = CpmFileSystem::mount_with(&image, dpb).unwrap();
            assert_eq!(fs.inject("X.COM", &[0]), Err(FileSystemError::ReadOnly));
        }

        let mut fs = CpmFileSystem::mount_mut_with(&mut image, dpb).unwrap();
        let data = vec![0x55u8; 40000];
        fs.inject("BIG.DAT", &data).unwrap();
        let dir = fs.directory().unwrap();
        let file = dir.find(dpb, 0, &CpmName::parse("BIG.DAT").unwrap()).unwrap();
        assert_eq!(file.entries.len(), 2);
        assert_eq!(file.entries[0].extent, 1);
        assert_eq!(file.entries[0].records, 128);
        assert_eq!(file.entries[1].extent, 2);
        assert_eq!(file.entries[1].records, 57);
        assert_eq!(file.size(), 40064);
        assert_eq!(&fs.extract("BIG.DAT").unwrap()[..40000], &data[..]);
    }

    #[test]
    fn test_validate_cross_link() {
        let dpb = dpb_by_name("osborne1").unwrap();
        let mut image = CpmFileSystem::format(dpb);
        let mut fs = CpmFileSystem::mount_mut(&mut image).unwrap();
        fs.inject("A.TXT", &[1; 3000]).unwrap();
        fs.inject("B.TXT", &[2; 100]).unwrap();

        let mut dir = fs.directory().unwrap();
        let a = dir.find(dpb, 0, &CpmName::parse("A.TXT").unwrap()).unwrap();
        let mut b = dir.find(dpb, 0, &CpmName::parse("B.TXT").unwrap()).unwrap().entries[0].clone();
        b.blocks[0] = a.entries[0].blocks[1];
        b.blocks[1] = 500;
        let index = b.index;
        b.store(dir.raw_entry_mut(index), dpb);
        fs.write_directory(&dir).unwrap();

        let report = fs.validate().unwrap();
        assert_eq!(report.count(FindingKind::CrossLink), 1);
        assert_eq!(report.count(FindingKind::InvalidEntry), 1);
    }

    #[test]
    fn test_read_only_attribute() {
        let dpb = dpb_by_name("apple2").unwrap();
        let mut image = CpmFileSystem::format(dpb);
        let mut fs = CpmFileSystem::mount_mut(&mut image).unwrap();
        fs.inject("KEEP.ME", b"data").unwrap();
        fs.set_attributes("KEEP.ME", CpmAttributes::READ_ONLY | CpmAttributes::SYSTEM).unwrap();
        assert_eq!(fs.list().unwrap()[0].attributes(), "R/O SYS");
        assert!(matches!(fs.delete("KEEP.ME"), Err(FileSystemError::FileLocked(_))));
    }
}
