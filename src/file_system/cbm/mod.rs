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

    src/file_system/cbm/mod.rs

    A Commodore DOS filesystem walker.
*/

//! [CbmFileSystem] reads and writes the DOS structures of 1541, 1571 and 1581 volumes held in a
//! [DiskImage]. The image can come from any container: D64/D71/D81 sector images, or GCR images
//! such as G64 and NIB once their tracks have been decoded.
//!
//! Files are stored as chains of 256-byte blocks. The first two bytes of each block link to the
//! next block; in the last block of a chain the link track is 0 and the link sector is the offset
//! of the last byte used.
//!
//! Mutations write data blocks first, then the directory entry, and the BAM last. If a mutation
//! is interrupted between the directory and the BAM, [CbmFileSystem::rebuild_bam] reconstructs
//! the BAM from the live file chains.

pub mod bam;
pub mod directory;
pub mod geometry;
pub mod petscii;
mod validate;

pub use bam::{Bam, BamEntry};
pub use directory::{CbmFileType, DirEntry, DirSlot, Directory};
pub use geometry::{CbmGeometry, Ts};

use crate::{
    diskimage::{DiskMetadata, DosFlavor},
    file_system::{FileEntry, FileSystem, FileSystemError, FsValidation, ImageRef},
    track_reader::SectorRecord,
    types::{SectorBytes, TrackDataEncoding},
    DiskImage,
    DiskImageError,
    CBM_SECTOR_SIZE,
};
use petscii::{name_matches, name_to_petscii, petscii_to_ascii, PAD_BYTE};
use std::collections::BTreeSet;

/// Payload bytes carried by each block of a file chain.
pub const BLOCK_PAYLOAD: usize = CBM_SECTOR_SIZE - 2;

pub(crate) type Block = [u8; CBM_SECTOR_SIZE];

pub(crate) fn read_block(image: &DiskImage, geometry: &CbmGeometry, ts: Ts) -> Result<Block, FileSystemError> {
    if !geometry.is_valid_ts(ts) {
        return Err(FileSystemError::BrokenChain(format!("invalid track {} sector {}", ts.0, ts.1)));
    }
    let sector = image.read_sector(geometry.ch(ts.0), ts.1)?;
    if sector.data.len() != CBM_SECTOR_SIZE {
        return Err(DiskImageError::format(format!(
            "track {} sector {} holds {} bytes",
            ts.0,
            ts.1,
            sector.data.len()
        ))
        .into());
    }
    let mut block = [0u8; CBM_SECTOR_SIZE];
    block.copy_from_slice(sector.data.as_slice());
    Ok(block)
}

pub(crate) fn write_block(
    image: &mut DiskImage,
    geometry: &CbmGeometry,
    ts: Ts,
    block: &Block,
) -> Result<(), FileSystemError> {
    image.write_sector(geometry.ch(ts.0), ts.1, block)?;
    Ok(())
}

/// The blocks of a file chain and the payload they carry.
#[derive(Clone, Debug, Default)]
pub struct Chain {
    pub sectors: Vec<Ts>,
    pub data: Vec<u8>,
    /// Set if the chain links to an invalid or already visited block.
    pub error: Option<FileSystemError>,
}

/// Infer the CBM layout of a disk image from its DOS flavor or, failing that, its tracks.
pub fn detect_geometry(image: &DiskImage) -> Option<CbmGeometry> {
    let sectors_on = |c: u16, h: u8| image.track((c, h)).map(|t| t.sectors.len()).unwrap_or(0);
    let d64 = || {
        if sectors_on(35, 0) >= 17 {
            CbmGeometry::D64_40
        }
        else {
            CbmGeometry::D64_35
        }
    };
    match image.metadata.dos_flavor {
        DosFlavor::Cbm1541 => Some(d64()),
        DosFlavor::Cbm1571 => Some(CbmGeometry::D71),
        DosFlavor::Cbm1581 => Some(CbmGeometry::D81),
        _ if sectors_on(39, 0) == 40 => Some(CbmGeometry::D81),
        _ if sectors_on(17, 0) == 19 && sectors_on(17, 1) == 19 => Some(CbmGeometry::D71),
        _ if sectors_on(17, 0) == 19 => Some(d64()),
        _ => None,
    }
}

pub struct CbmFileSystem<'a> {
    image: ImageRef<'a>,
    geometry: CbmGeometry,
}

impl<'a> CbmFileSystem<'a> {
    /// Mount a volume for reading only.
    pub fn mount(image: &'a DiskImage) -> Result<Self, FileSystemError> {
        let geometry = Self::probe(image)?;
        Ok(CbmFileSystem {
            image: ImageRef::Shared(image),
            geometry,
        })
    }

    /// Mount a volume for reading and writing.
    pub fn mount_mut(image: &'a mut DiskImage) -> Result<Self, FileSystemError> {
        let geometry = Self::probe(image)?;
        Ok(CbmFileSystem {
            image: ImageRef::Exclusive(image),
            geometry,
        })
    }

    fn probe(image: &DiskImage) -> Result<CbmGeometry, FileSystemError> {
        let geometry = detect_geometry(image)
            .ok_or_else(|| FileSystemError::UnsupportedImage("no CBM track layout found".to_string()))?;
        let header = read_block(image, &geometry, geometry.header_ts())?;
        match geometry {
            CbmGeometry::D81 if header[2] != 0x44 => {
                return Err(FileSystemError::UnsupportedImage(format!(
                    "1581 header format byte is {:02X}",
                    header[2]
                )));
            }
            CbmGeometry::D64 { .. } | CbmGeometry::D71 if header[2] != 0x41 => {
                log::warn!(
                    "CbmFileSystem::probe(): unexpected DOS format byte {:02X}, continuing",
                    header[2]
                );
            }
            _ => {}
        }
        log::debug!("CbmFileSystem::probe(): mounted {} volume", geometry);
        Ok(geometry)
    }

    /// Create a blank, formatted volume.
    pub fn format(geometry: CbmGeometry, name: &str, id: &str) -> Result<DiskImage, FileSystemError> {
        let name_bytes = name_to_petscii(name).ok_or_else(|| FileSystemError::InvalidName(name.to_string()))?;
        let id_bytes: [u8; 2] = match id.chars().collect::<Vec<_>>().as_slice() {
            [a, b] => [petscii::ascii_to_petscii(*a), petscii::ascii_to_petscii(*b)],
            _ => return Err(FileSystemError::InvalidName(format!("disk ID \"{}\"", id))),
        };

        let mut image = DiskImage::new(DiskMetadata {
            name: Some(petscii::name_to_ascii(&name_bytes)),
            id: Some(id_bytes),
            dos_flavor: geometry.dos_flavor(),
            double_sided: geometry == CbmGeometry::D71,
            comment: None,
        });
        let encoding = match geometry {
            CbmGeometry::D81 => TrackDataEncoding::Mfm,
            _ => TrackDataEncoding::GcrCbm,
        };
        for track in 1..=geometry.tracks() {
            let ch = geometry.ch(track);
            let sectors = (0..geometry.sectors_per_track(track))
                .map(|s| SectorRecord::new(track as u16, ch.h(), s, SectorBytes::zeroed(CBM_SECTOR_SIZE)))
                .collect();
            image.add_sector_track(ch, encoding, sectors);
        }

        let dos_type = geometry.dos_flavor().dos_type().unwrap_or("2A").as_bytes();
        let mut header = [0u8; CBM_SECTOR_SIZE];
        match geometry {
            CbmGeometry::D81 => {
                header[..4].copy_from_slice(&[40, 3, 0x44, 0]);
                header[0x04..0x14].copy_from_slice(&name_bytes);
                header[0x14..0x1D].fill(PAD_BYTE);
                header[0x16..0x18].copy_from_slice(&id_bytes);
                header[0x19..0x1B].copy_from_slice(dos_type);
                write_block(&mut image, &geometry, (40, 0), &header)?;

                for (ts, link) in [((40, 1), [40, 2]), ((40, 2), [0, 0xFF])] {
                    let mut block = [0u8; CBM_SECTOR_SIZE];
                    block[..8].copy_from_slice(&[link[0], link[1], 0x44, 0xBB, id_bytes[0], id_bytes[1], 0xC0, 0]);
                    write_block(&mut image, &geometry, ts, &block)?;
                }
            }
            _ => {
                header[..4].copy_from_slice(&[18, 1, 0x41, 0]);
                if geometry == CbmGeometry::D71 {
                    header[3] = 0x80;
                }
                header[0x90..0xA0].copy_from_slice(&name_bytes);
                header[0xA0..0xAB].fill(PAD_BYTE);
                header[0xA2..0xA4].copy_from_slice(&id_bytes);
                header[0xA5..0xA7].copy_from_slice(dos_type);
                write_block(&mut image, &geometry, (18, 0), &header)?;
            }
        }

        let mut dir = [0u8; CBM_SECTOR_SIZE];
        dir[1] = 0xFF;
        write_block(&mut image, &geometry, geometry.first_dir_ts(), &dir)?;
        Bam::blank(geometry).write(&mut image)?;

        log::debug!("CbmFileSystem::format(): formatted {} volume \"{}\"", geometry, name);
        Ok(image)
    }

    pub fn geometry(&self) -> CbmGeometry {
        self.geometry
    }

    fn image(&self) -> &DiskImage {
        self.image.get()
    }

    pub fn bam(&self) -> Result<Bam, FileSystemError> {
        Bam::read(self.image(), self.geometry)
    }

    pub fn directory(&self) -> Result<Directory, FileSystemError> {
        Directory::read(self.image(), &self.geometry)
    }

    /// The disk name, ID and DOS type bytes from the header sector.
    fn header_fields(&self) -> Result<(Vec<u8>, [u8; 2], [u8; 2]), FileSystemError> {
        let header = read_block(self.image(), &self.geometry, self.geometry.header_ts())?;
        let (name, id, dos) = match self.geometry {
            CbmGeometry::D81 => (0x04, 0x16, 0x19),
            _ => (0x90, 0xA2, 0xA5),
        };
        Ok((
            header[name..name + petscii::NAME_LEN].to_vec(),
            [header[id], header[id + 1]],
            [header[dos], header[dos + 1]],
        ))
    }

    pub fn disk_name(&self) -> Result<String, FileSystemError> {
        let (name, _, _) = self.header_fields()?;
        Ok(petscii::name_to_ascii(&name))
    }

    /// The first line of a directory listing, as the drive prints it.
    pub fn header_line(&self) -> Result<String, FileSystemError> {
        let (name, id, dos) = self.header_fields()?;
        let name: String = name.iter().map(|&b| petscii_to_ascii(b)).collect();
        let id: String = id.iter().map(|&b| petscii_to_ascii(b)).collect();
        let dos: String = dos.iter().map(|&b| petscii_to_ascii(b)).collect();
        Ok(format!("0 \"{}\" {} {}", name, id, dos))
    }

    pub fn blocks_free(&self) -> Result<u32, FileSystemError> {
        Ok(self.bam()?.blocks_free())
    }

    /// A full directory listing: header line, one line per file, and the blocks free.
    pub fn listing(&self) -> Result<String, FileSystemError> {
        let mut out = self.header_line()?;
        out.push('\n');
        for entry in self.directory()?.files() {
            let quoted = format!("\"{}\"", entry.name_ascii());
            out.push_str(&format!("{:<5}{:<19}{}\n", entry.blocks, quoted, entry.type_label()));
        }
        out.push_str(&format!("{} BLOCKS FREE.", self.blocks_free()?));
        Ok(out)
    }

    /// Follow a file chain from `start`. Invalid and repeated links end the chain and are
    /// recorded in [Chain::error].
    pub fn chain(&self, start: Ts) -> Result<Chain, FileSystemError> {
        let mut chain = Chain::default();
        let mut visited = BTreeSet::new();
        let mut next = start;
        loop {
            if !self.geometry.is_valid_ts(next) {
                chain.error = Some(FileSystemError::BrokenChain(format!(
                    "link to invalid track {} sector {}",
                    next.0, next.1
                )));
                break;
            }
            if !visited.insert(next) {
                chain.error = Some(FileSystemError::CircularChain(next.0, next.1));
                break;
            }
            let block = read_block(self.image(), &self.geometry, next)?;
            chain.sectors.push(next);
            if block[0] == 0 {
                let last = block[1] as usize;
                if last >= 2 {
                    chain.data.extend_from_slice(&block[2..=last]);
                }
                break;
            }
            chain.data.extend_from_slice(&block[2..]);
            next = (block[0], block[1]);
        }
        Ok(chain)
    }

    fn find(&self, dir: &Directory, name: &str) -> Result<DirEntry, FileSystemError> {
        dir.files()
            .find(|e| name_matches(&e.name, name))
            .cloned()
            .ok_or_else(|| FileSystemError::NotFound(name.to_string()))
    }

    pub fn entry(&self, name: &str) -> Result<DirEntry, FileSystemError> {
        self.find(&self.directory()?, name)
    }

    fn store_entry(&mut self, entry: &DirEntry) -> Result<(), FileSystemError> {
        let geometry = self.geometry;
        let mut block = read_block(self.image(), &geometry, entry.slot.ts)?;
        entry.store(&mut block);
        write_block(self.image.get_mut()?, &geometry, entry.slot.ts, &block)
    }

    /// Write a new file of the given type.
    pub fn inject_typed(&mut self, name: &str, file_type: CbmFileType, data: &[u8]) -> Result<(), FileSystemError> {
        let geometry = self.geometry;
        self.image.get_mut()?;
        let name_bytes = name_to_petscii(name).ok_or_else(|| FileSystemError::InvalidName(name.to_string()))?;

        let dir = self.directory()?;
        if let Some(err) = &dir.chain_error {
            return Err(err.clone());
        }
        if dir.files().any(|e| name_matches(&e.name, name)) {
            return Err(FileSystemError::AlreadyExists(name.to_string()));
        }

        let mut bam = self.bam()?;
        let block_ct = data.len().div_ceil(BLOCK_PAYLOAD).max(1);
        if block_ct > u16::MAX as usize {
            return Err(FileSystemError::DiskFull);
        }

        // Find a directory slot, extending the directory chain if every slot is in use.
        let (slot, new_dir_sector) = match dir.free_slot(self.image(), &geometry)? {
            Some(slot) => (slot, None),
            None => {
                let last = dir.sectors.last().copied().unwrap_or(geometry.first_dir_ts());
                let ts = bam.allocate_dir_sector(last).ok_or(FileSystemError::DirectoryFull)?;
                (DirSlot { ts, index: 0 }, Some((last, ts)))
            }
        };
        let chain = bam.allocate_chain(block_ct, geometry.default_interleave())?;

        let image = self.image.get_mut()?;
        for (i, &ts) in chain.iter().enumerate() {
            let start = (i * BLOCK_PAYLOAD).min(data.len());
            let chunk = &data[start..(start + BLOCK_PAYLOAD).min(data.len())];
            let mut block = [0u8; CBM_SECTOR_SIZE];
            match chain.get(i + 1) {
                Some(&(t, s)) => {
                    block[0] = t;
                    block[1] = s;
                }
                None => block[1] = (chunk.len() + 1) as u8,
            }
            block[2..2 + chunk.len()].copy_from_slice(chunk);
            write_block(image, &geometry, ts, &block)?;
        }

        if let Some((last, ts)) = new_dir_sector {
            let mut block = [0u8; CBM_SECTOR_SIZE];
            block[1] = 0xFF;
            write_block(image, &geometry, ts, &block)?;
            let mut prev = read_block(image, &geometry, last)?;
            prev[0] = ts.0;
            prev[1] = ts.1;
            write_block(image, &geometry, last, &prev)?;
        }

        let entry = DirEntry::new(slot, file_type, name_bytes, chain[0], block_ct as u16);
        self.store_entry(&entry)?;
        bam.write(self.image.get_mut()?)?;

        log::debug!(
            "CbmFileSystem::inject_typed(): wrote \"{}\" ({} bytes, {} blocks) starting at {:?}",
            name,
            data.len(),
            block_ct,
            chain[0]
        );
        Ok(())
    }

    pub fn rename(&mut self, old: &str, new: &str) -> Result<(), FileSystemError> {
        let name_bytes = name_to_petscii(new).ok_or_else(|| FileSystemError::InvalidName(new.to_string()))?;
        let dir = self.directory()?;
        let mut entry = self.find(&dir, old)?;
        if dir
            .files()
            .any(|e| e.slot != entry.slot && name_matches(&e.name, new))
        {
            return Err(FileSystemError::AlreadyExists(new.to_string()));
        }
        entry.name = name_bytes;
        self.store_entry(&entry)
    }

    /// Copy a file to a new name on the same volume.
    pub fn copy(&mut self, src: &str, dst: &str) -> Result<(), FileSystemError> {
        let entry = self.entry(src)?;
        let data = self.extract(src)?;
        let file_type = entry.file_type().unwrap_or(CbmFileType::Prg);
        self.inject_typed(dst, file_type, &data)
    }

    pub fn set_locked(&mut self, name: &str, locked: bool) -> Result<(), FileSystemError> {
        let mut entry = self.entry(name)?;
        entry.set_locked(locked);
        self.store_entry(&entry)
    }

    /// Sectors used by the file in `entry`, including REL side sectors. Chain errors are
    /// tolerated; the sectors reached before the error are returned.
    fn entry_sectors(&self, entry: &DirEntry) -> Result<(Chain, Vec<Ts>), FileSystemError> {
        let chain = if self.geometry.is_valid_ts(entry.first_ts) {
            self.chain(entry.first_ts)?
        }
        else {
            Chain::default()
        };
        let mut sectors = chain.sectors.clone();
        if entry.file_type() == Some(CbmFileType::Rel) && self.geometry.is_valid_ts(entry.side_ts) {
            sectors.extend(self.chain(entry.side_ts)?.sectors);
        }
        Ok((chain, sectors))
    }
}

impl FileSystem for CbmFileSystem<'_> {
    fn list(&self) -> Result<Vec<FileEntry>, FileSystemError> {
        let dir = self.directory()?;
        let mut files = Vec::new();
        for entry in dir.files() {
            let size = match self.geometry.is_valid_ts(entry.first_ts) {
                true => match self.chain(entry.first_ts)? {
                    Chain { error: None, data, .. } => data.len() as u64,
                    _ => entry.blocks as u64 * BLOCK_PAYLOAD as u64,
                },
                false => 0,
            };
            let mut attributes = String::new();
            if !entry.is_closed() {
                attributes.push('*');
            }
            if entry.is_locked() {
                attributes.push('<');
            }
            files.push(FileEntry {
                name: entry.name_ascii(),
                file_type: entry.file_type().map(|t| t.to_string()).unwrap_or_default(),
                size,
                blocks: entry.blocks as u32,
                attributes,
                user: 0,
                created: None,
                modified: None,
            });
        }
        Ok(files)
    }

    fn extract(&self, name: &str) -> Result<Vec<u8>, FileSystemError> {
        let entry = self.entry(name)?;
        let chain = self.chain(entry.first_ts)?;
        if let Some(err) = chain.error {
            log::warn!("CbmFileSystem::extract(): \"{}\": {}", name, err);
            return Err(err);
        }
        Ok(chain.data)
    }

    fn inject(&mut self, name: &str, data: &[u8]) -> Result<(), FileSystemError> {
        self.inject_typed(name, CbmFileType::Prg, data)
    }

    fn delete(&mut self, name: &str) -> Result<(), FileSystemError> {
        self.image.get_mut()?;
        let mut entry = self.entry(name)?;
        if entry.is_locked() {
            return Err(FileSystemError::FileLocked(name.to_string()));
        }
        let (chain, sectors) = self.entry_sectors(&entry)?;
        if let Some(err) = &chain.error {
            log::warn!("CbmFileSystem::delete(): \"{}\": {}, freeing {} blocks", name, err, sectors.len());
        }

        let mut bam = self.bam()?;
        for ts in sectors {
            bam.free(ts);
        }
        entry.type_byte = 0;
        self.store_entry(&entry)?;
        bam.write(self.image.get_mut()?)?;
        Ok(())
    }

    fn validate(&self) -> Result<FsValidation, FileSystemError> {
        self.validate_volume()
    }

    fn free_bytes(&self) -> Result<u64, FileSystemError> {
        Ok(self.blocks_free()? as u64 * BLOCK_PAYLOAD as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_blank_listing() {
        let image = CbmFileSystem::format(CbmGeometry::D64_35, "EMPTY DISK", "01").unwrap();
        let fs = CbmFileSystem::mount(&image).unwrap();
        assert!(fs.list().unwrap().is_empty());
        assert_eq!(fs.blocks_free().unwrap(), 664);
        assert_eq!(fs.header_line().unwrap(), "0 \"EMPTY DISK      \" 01 2A");
        assert!(fs.validate().unwrap().is_ok());
    }

    #[test]
    fn test_blank_d71_d81() {
        let image = CbmFileSystem::format(CbmGeometry::D71, "SIDES", "71").unwrap();
        let fs = CbmFileSystem::mount(&image).unwrap();
        assert_eq!(fs.geometry(), CbmGeometry::D71);
        assert_eq!(fs.blocks_free().unwrap(), 1328);
        assert!(fs.validate().unwrap().is_ok());

        let image = CbmFileSystem::format(CbmGeometry::D81, "BIG", "81").unwrap();
        let fs = CbmFileSystem::mount(&image).unwrap();
        assert_eq!(fs.blocks_free().unwrap(), 3160);
        assert_eq!(fs.header_line().unwrap(), "0 \"BIG             \" 81 3D");
        assert!(fs.validate().unwrap().is_ok());
    }

    #[test]
    fn test_inject_extract() {
        let mut image = CbmFileSystem::format(CbmGeometry::D64_35, "TEST", "AB").unwrap();
        let mut fs = CbmFileSystem::mount_mut(&mut image).unwrap();
        let data: Vec<u8> = (0..1000u32).map(|i| (i * 7) as u8).collect();
        fs.inject("hello", &data).unwrap();
        fs.inject("EMPTY", &[]).unwrap();

        assert_eq!(fs.extract("HELLO").unwrap(), data);
        assert!(fs.extract("EMPTY").unwrap().is_empty());
        assert_eq!(fs.blocks_free().unwrap(), 664 - 4 - 1);

        let files = fs.list().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name(), "HELLO");
        assert_eq!(files[0].blocks(), 4);
        assert_eq!(files[0].size(), 1000);
        assert_eq!(files[0].file_type(), "PRG");

        let err = fs.inject("Hello", &data).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert!(fs.validate().unwrap().is_ok());
    }

    #[test]
    fn test_rename_lock_delete() {
        let mut image = CbmFileSystem::format(CbmGeometry::D64_35, "TEST", "AB").unwrap();
        let mut fs = CbmFileSystem::mount_mut(&mut image).unwrap();
        fs.inject("ONE", &[1; 300]).unwrap();
        fs.inject("TWO", &[2; 10]).unwrap();

        assert_eq!(fs.rename("ONE", "TWO").unwrap_err().kind(), ErrorKind::AlreadyExists);
        fs.rename("ONE", "THREE").unwrap();
        fs.copy("THREE", "FOUR").unwrap();
        assert_eq!(fs.extract("FOUR").unwrap(), vec![1; 300]);

        fs.set_locked("THREE", true).unwrap();
        assert_eq!(fs.delete("THREE").unwrap_err().kind(), ErrorKind::Permission);
        assert!(fs.listing().unwrap().contains("PRG<"));
        fs.set_locked("THREE", false).unwrap();
        fs.delete("THREE").unwrap();
        fs.delete("FOUR").unwrap();
        assert_eq!(fs.extract("THREE").unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(fs.blocks_free().unwrap(), 663);
        assert!(fs.validate().unwrap().is_ok());
    }

    #[test]
    fn test_directory_grows() {
        let mut image = CbmFileSystem::format(CbmGeometry::D64_35, "MANY", "MM").unwrap();
        let mut fs = CbmFileSystem::mount_mut(&mut image).unwrap();
        for i in 0..20 {
            fs.inject(&format!("FILE{}", i), &[i as u8; 10]).unwrap();
        }
        let dir = fs.directory().unwrap();
        assert_eq!(dir.sectors, vec![(18, 1), (18, 4), (18, 7)]);
        assert_eq!(fs.list().unwrap().len(), 20);
        assert_eq!(fs.extract("FILE19").unwrap(), vec![19; 10]);
        assert!(fs.validate().unwrap().is_ok());
    }

    #[test]
    fn test_readonly_mount() {
        let mut image = CbmFileSystem::format(CbmGeometry::D64_35, "RO", "00").unwrap();
        {
            let mut fs = CbmFileSystem::mount(&image).unwrap();
            assert_eq!(fs.inject("X", &[0]), Err(FileSystemError::ReadOnly));
        }
        image.set_readonly(true);
        let mut fs = CbmFileSystem::mount_mut(&mut image).unwrap();
        assert_eq!(fs.delete("X"), Err(FileSystemError::ReadOnly));
    }

    #[test]
    fn test_disk_full() {
        let mut image = CbmFileSystem::format(CbmGeometry::D64_35, "FULL", "FF").unwrap();
        let mut fs = CbmFileSystem::mount_mut(&mut image).unwrap();
        let err = fs.inject("BIG", &vec![0; 665 * BLOCK_PAYLOAD]).unwrap_err();
        assert_eq!(err, FileSystemError::DiskFull);
        assert!(fs.list().unwrap().is_empty());
        assert_eq!(fs.blocks_free().unwrap(), 664);
    }
}
