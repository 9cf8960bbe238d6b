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

    src/file_system/cbm/validate.rs

    Consistency checks and BAM repair for CBM volumes.
*/

use super::{CbmFileSystem, CbmGeometry, Directory, Ts};
use crate::file_system::{FileSystemError, FindingKind, FsValidation};
use std::collections::{BTreeMap, BTreeSet};

const DOS_OWNER: &str = "<directory>";

impl CbmFileSystem<'_> {
    /// Sectors in use by the DOS itself: header, BAM and every reachable directory sector.
    fn dos_sectors(&self, dir: &Directory) -> BTreeSet<Ts> {
        self.geometry
            .system_sectors()
            .into_iter()
            .chain(dir.sectors.iter().copied())
            .collect()
    }

    /// Walk every file chain and report broken chains, circular chains, cross-links, block count
    /// mismatches, BAM incoherence, in-use sectors marked free and allocated sectors owned by no
    /// file.
    pub fn validate_volume(&self) -> Result<FsValidation, FileSystemError> {
        let mut report = FsValidation::default();
        let dir = self.directory()?;
        if let Some(err) = &dir.chain_error {
            report.push(FindingKind::BrokenChain, None, format!("directory: {}", err));
        }

        let mut owners: BTreeMap<Ts, String> = self
            .dos_sectors(&dir)
            .into_iter()
            .map(|ts| (ts, DOS_OWNER.to_string()))
            .collect();

        for entry in &dir.entries {
            let name = entry.name_ascii();
            report.files_checked += 1;
            if entry.file_type().is_none() {
                report.push(
                    FindingKind::InvalidEntry,
                    Some(&name),
                    format!("unknown file type {:02X}", entry.type_byte),
                );
                continue;
            }
            if !self.geometry.is_valid_ts(entry.first_ts) {
                if entry.blocks > 0 {
                    report.push(
                        FindingKind::BrokenChain,
                        Some(&name),
                        format!("first block at invalid track {} sector {}", entry.first_ts.0, entry.first_ts.1),
                    );
                }
                continue;
            }

            let (chain, sectors) = self.entry_sectors(entry)?;
            match &chain.error {
                Some(err) => report.push(FindingKind::BrokenChain, Some(&name), err.to_string()),
                None if sectors.len() != entry.blocks as usize => report.push(
                    FindingKind::BlockCountMismatch,
                    Some(&name),
                    format!("directory lists {} blocks, chain has {}", entry.blocks, sectors.len()),
                ),
                None => {}
            }

            for ts in sectors {
                match owners.get(&ts) {
                    Some(owner) => report.push(
                        FindingKind::CrossLink,
                        Some(&name),
                        format!("track {} sector {} is also used by \"{}\"", ts.0, ts.1, owner),
                    ),
                    None => {
                        owners.insert(ts, name.clone());
                    }
                }
            }
        }

        let bam = self.bam()?;
        for track in bam.mismatched_tracks() {
            if let Some(entry) = bam.entry(track) {
                report.push(
                    FindingKind::BamMismatch,
                    None,
                    format!(
                        "track {}: free count {} but {} sectors marked free",
                        track,
                        entry.free,
                        entry.popcount()
                    ),
                );
            }
        }
        for (&ts, owner) in &owners {
            if bam.is_free(ts) {
                report.push(
                    FindingKind::BamMismatch,
                    Some(owner),
                    format!("track {} sector {} is in use but marked free", ts.0, ts.1),
                );
            }
        }
        for ts in self.geometry.iter_sectors() {
            let reserved = self.geometry == CbmGeometry::D71 && ts.0 == 53;
            if !reserved && !owners.contains_key(&ts) && !bam.is_free(ts) {
                report.push(
                    FindingKind::OrphanSector,
                    None,
                    format!("track {} sector {} is allocated but unused", ts.0, ts.1),
                );
            }
        }

        log::debug!(
            "CbmFileSystem::validate_volume(): {} files checked, {} findings",
            report.files_checked,
            report.findings.len()
        );
        Ok(report)
    }

    /// Rebuild the BAM from the DOS sectors and every live file chain. Chains that end in an
    /// error keep the blocks reached before the error. Returns the number of sectors whose state
    /// changed.
    pub fn rebuild_bam(&mut self) -> Result<usize, FileSystemError> {
        self.image.get_mut()?;
        let dir = self.directory()?;
        let mut used = self.dos_sectors(&dir);
        for entry in dir.files() {
            let (_, sectors) = self.entry_sectors(entry)?;
            used.extend(sectors);
        }

        let mut bam = self.bam()?;
        let before = bam.clone();
        bam.rebuild(&used);
        let changed = self
            .geometry
            .iter_sectors()
            .filter(|&ts| before.is_free(ts) != bam.is_free(ts))
            .count();
        let tracks_fixed = before.mismatched_tracks().len();
        bam.write(self.image.get_mut()?)?;

        log::debug!(
            "CbmFileSystem::rebuild_bam(): {} sectors changed, {} track counts corrected",
            changed,
            tracks_fixed
        );
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        file_system::{
            cbm::{read_block, write_block, Bam, CbmFileType, DirEntry, DirSlot},
            FileSystem,
        },
        DiskImage,
        ErrorKind,
    };

    fn circular_disk() -> DiskImage {
        let geometry = CbmGeometry::D64_35;
        let mut image = CbmFileSystem::format(geometry, "LOOP", "LP").unwrap();
        let mut block = [0u8; 256];
        block[0] = 1;
        block[1] = 0;
        write_block(&mut image, &geometry, (1, 0), &block).unwrap();

        let slot = DirSlot { ts: (18, 1), index: 0 };
        let mut dir = read_block(&image, &geometry, slot.ts).unwrap();
        let name = crate::file_system::cbm::petscii::name_to_petscii("LOOPY").unwrap();
        DirEntry::new(slot, CbmFileType::Prg, name, (1, 0), 1).store(&mut dir);
        write_block(&mut image, &geometry, slot.ts, &dir).unwrap();

        let mut bam = Bam::read(&image, geometry).unwrap();
        bam.allocate((1, 0));
        bam.write(&mut image).unwrap();
        image
    }

    #[test]
    fn test_circular_chain() {
        let image = circular_disk();
        let fs = CbmFileSystem::mount(&image).unwrap();
        let err = fs.extract("LOOPY").unwrap_err();
        assert_eq!(err, FileSystemError::CircularChain(1, 0));
        assert_eq!(err.kind(), ErrorKind::Consistency);

        let report = fs.validate().unwrap();
        assert_eq!(report.count(FindingKind::BrokenChain), 1);
        assert_eq!(report.findings.len(), 1);
    }

    #[test]
    fn test_cross_link_and_repair() {
        let geometry = CbmGeometry::D64_35;
        let mut image = CbmFileSystem::format(geometry, "XLINK", "XL").unwrap();
        let mut fs = CbmFileSystem::mount_mut(&mut image).unwrap();
        fs.inject("A", &[0xAA; 600]).unwrap();
        fs.inject("B", &[0xBB; 100]).unwrap();

        // Point B at A's chain and leave B's own block allocated but unowned.
        let mut entry = fs.entry("B").unwrap();
        let a = fs.entry("A").unwrap();
        entry.first_ts = a.first_ts;
        entry.blocks = a.blocks;
        fs.store_entry(&entry).unwrap();

        let report = fs.validate().unwrap();
        assert_eq!(report.count(FindingKind::CrossLink), 3);
        assert_eq!(report.count(FindingKind::OrphanSector), 1);

        // Free a block of A in the BAM without touching the chain.
        let mut bam = fs.bam().unwrap();
        bam.free(a.first_ts);
        bam.write(fs.image.get_mut().unwrap()).unwrap();
        let report = fs.validate().unwrap();
        assert_eq!(report.count(FindingKind::BamMismatch), 1);

        assert_eq!(fs.rebuild_bam().unwrap(), 2);
        let report = fs.validate().unwrap();
        assert_eq!(report.count(FindingKind::BamMismatch), 0);
        assert_eq!(report.count(FindingKind::OrphanSector), 0);
        assert_eq!(report.count(FindingKind::CrossLink), 3);
    }

    #[test]
    fn test_block_count_mismatch() {
        let mut image = CbmFileSystem::format(CbmGeometry::D64_35, "COUNT", "CT").unwrap();
        let mut fs = CbmFileSystem::mount_mut(&mut image).unwrap();
        fs.inject("FILE", &[1; 500]).unwrap();
        let mut entry = fs.entry("FILE").unwrap();
        entry.blocks = 7;
        fs.store_entry(&entry).unwrap();
        let report = fs.validate().unwrap();
        assert_eq!(report.count(FindingKind::BlockCountMismatch), 1);
        assert_eq!(report.findings.len(), 1);
    }
}
