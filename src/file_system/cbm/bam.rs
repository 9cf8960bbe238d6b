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

    src/file_system/cbm/bam.rs

    The CBM block availability map.
*/

//! The BAM records, for every track, a count of free sectors and a bitmap with one bit per
//! sector, set when the sector is free. Where the BAM lives depends on the drive:
//!  - 1541: 4-byte entries at offset 0x04 of (18,0). 40-track disks carry the extra tracks in
//!    the SpeedDOS layout at offset 0xC0.
//!  - 1571: side 0 as the 1541. Free counts for tracks 36-70 at offset 0xDD of (18,0), and their
//!    bitmaps in 3-byte entries at the start of (53,0).
//!  - 1581: 6-byte entries at offset 0x10 of (40,1) for tracks 1-40, and of (40,2) for 41-80.

use super::{
    geometry::{CbmGeometry, Ts},
    read_block,
    write_block,
};
use crate::{file_system::FileSystemError, DiskImage};
use std::collections::BTreeSet;

const D64_BAM_OFFSET: usize = 0x04;
const D64_SPEEDDOS_OFFSET: usize = 0xC0;
const D71_SIDE1_FREE_OFFSET: usize = 0xDD;
const D81_BAM_OFFSET: usize = 0x10;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BamEntry {
    pub free: u8,
    /// Bit `n` is set if sector `n` is free.
    pub bitmap: u64,
}

impl BamEntry {
    pub fn popcount(&self) -> u8 {
        self.bitmap.count_ones() as u8
    }

    fn is_free(&self, sector: u8) -> bool {
        self.bitmap & (1u64 << sector) != 0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Bam {
    geometry: CbmGeometry,
    /// Indexed by track - 1.
    entries: Vec<BamEntry>,
}

impl Bam {
    /// A BAM for a freshly formatted volume: every sector free except the DOS's own.
    pub fn blank(geometry: CbmGeometry) -> Self {
        let entries = (1..=geometry.tracks())
            .map(|t| {
                let spt = geometry.sectors_per_track(t);
                BamEntry {
                    free: spt,
                    bitmap: (1u64 << spt) - 1,
                }
            })
            .collect();
        let mut bam = Bam { geometry, entries };
        for ts in geometry.system_sectors() {
            bam.allocate(ts);
        }
        if geometry == CbmGeometry::D71 {
            bam.entries[52] = BamEntry::default();
        }
        bam
    }

    pub fn read(image: &DiskImage, geometry: CbmGeometry) -> Result<Self, FileSystemError> {
        let mut entries = vec![BamEntry::default(); geometry.tracks() as usize];
        match geometry {
            CbmGeometry::D64 { tracks } => {
                let block = read_block(image, &geometry, (18, 0))?;
                for t in 1..=tracks.min(35) {
                    entries[t as usize - 1] = unpack(&block, D64_BAM_OFFSET + (t as usize - 1) * 4, 3);
                }
                for t in 36..=tracks {
                    entries[t as usize - 1] = unpack(&block, D64_SPEEDDOS_OFFSET + (t as usize - 36) * 4, 3);
                }
            }
            CbmGeometry::D71 => {
                let side0 = read_block(image, &geometry, (18, 0))?;
                let side1 = read_block(image, &geometry, (53, 0))?;
                for t in 1..=35usize {
                    entries[t - 1] = unpack(&side0, D64_BAM_OFFSET + (t - 1) * 4, 3);
                }
                for t in 36..=70usize {
                    let i = t - 36;
                    entries[t - 1] = BamEntry {
                        free: side0[D71_SIDE1_FREE_OFFSET + i],
                        bitmap: bits_from_le(&side1[i * 3..i * 3 + 3]),
                    };
                }
            }
            CbmGeometry::D81 => {
                for (ts, first) in [((40, 1), 1usize), ((40, 2), 41usize)] {
                    let block = read_block(image, &geometry, ts)?;
                    for i in 0..40 {
                        entries[first + i - 1] = unpack(&block, D81_BAM_OFFSET + i * 6, 5);
                    }
                }
            }
        }
        Ok(Bam { geometry, entries })
    }

    /// Write the BAM back into its sectors, leaving the other bytes of those sectors untouched.
    pub fn write(&self, image: &mut DiskImage) -> Result<(), FileSystemError> {
        match self.geometry {
            CbmGeometry::D64 { tracks } => {
                let mut block = read_block(image, &self.geometry, (18, 0))?;
                for t in 1..=tracks.min(35) {
                    pack(&mut block, D64_BAM_OFFSET + (t as usize - 1) * 4, 3, &self.entries[t as usize - 1]);
                }
                for t in 36..=tracks {
                    pack(
                        &mut block,
                        D64_SPEEDDOS_OFFSET + (t as usize - 36) * 4,
                        3,
                        &self.entries[t as usize - 1],
                    );
                }
                write_block(image, &self.geometry, (18, 0), &block)?;
            }
            CbmGeometry::D71 => {
                let mut side0 = read_block(image, &self.geometry, (18, 0))?;
                let mut side1 = read_block(image, &self.geometry, (53, 0))?;
                for t in 1..=35usize {
                    pack(&mut side0, D64_BAM_OFFSET + (t - 1) * 4, 3, &self.entries[t - 1]);
                }
                for t in 36..=70usize {
                    let i = t - 36;
                    let entry = &self.entries[t - 1];
                    side0[D71_SIDE1_FREE_OFFSET + i] = entry.free;
                    side1[i * 3..i * 3 + 3].copy_from_slice(&entry.bitmap.to_le_bytes()[..3]);
                }
                write_block(image, &self.geometry, (53, 0), &side1)?;
                write_block(image, &self.geometry, (18, 0), &side0)?;
            }
            CbmGeometry::D81 => {
                for (ts, first) in [((40, 1), 1usize), ((40, 2), 41usize)] {
                    let mut block = read_block(image, &self.geometry, ts)?;
                    for i in 0..40 {
                        pack(&mut block, D81_BAM_OFFSET + i * 6, 5, &self.entries[first + i - 1]);
                    }
                    write_block(image, &self.geometry, ts, &block)?;
                }
            }
        }
        Ok(())
    }

    pub fn geometry(&self) -> CbmGeometry {
        self.geometry
    }

    pub fn entry(&self, track: u8) -> Option<&BamEntry> {
        self.entries.get((track as usize).wrapping_sub(1))
    }

    pub fn is_free(&self, (track, sector): Ts) -> bool {
        self.entry(track).map(|e| e.is_free(sector)).unwrap_or(false)
    }

    /// Mark a sector used. Returns false if it was already in use.
    pub fn allocate(&mut self, ts: Ts) -> bool {
        if !self.geometry.is_valid_ts(ts) || !self.is_free(ts) {
            return false;
        }
        let entry = &mut self.entries[ts.0 as usize - 1];
        entry.bitmap &= !(1u64 << ts.1);
        entry.free = entry.free.saturating_sub(1);
        true
    }

    /// Mark a sector free. Returns false if it was already free.
    pub fn free(&mut self, ts: Ts) -> bool {
        if !self.geometry.is_valid_ts(ts) || self.is_free(ts) {
            return false;
        }
        let entry = &mut self.entries[ts.0 as usize - 1];
        entry.bitmap |= 1u64 << ts.1;
        entry.free = entry.free.saturating_add(1);
        true
    }

    /// The "blocks free" figure the DOS reports: free counts of every track but the directory
    /// track.
    pub fn blocks_free(&self) -> u32 {
        let dir_track = self.geometry.dir_track();
        (1..=self.geometry.tracks())
            .filter(|&t| t != dir_track)
            .map(|t| self.entries[t as usize - 1].free as u32)
            .sum()
    }

    pub fn total_free(&self) -> u32 {
        self.entries.iter().map(|e| e.free as u32).sum()
    }

    /// Tracks whose free count disagrees with their bitmap.
    pub fn mismatched_tracks(&self) -> Vec<u8> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.free != e.popcount())
            .map(|(i, _)| i as u8 + 1)
            .collect()
    }

    fn first_free_from(&self, track: u8, start: u8) -> Option<Ts> {
        let spt = self.geometry.sectors_per_track(track);
        (0..spt)
            .map(|i| (track, (start % spt + i) % spt))
            .find(|&ts| self.is_free(ts))
    }

    fn is_data_track(&self, track: u8) -> bool {
        track >= 1 && track <= self.geometry.tracks() && !self.geometry.is_reserved_track(track)
    }

    /// Tracks in order of distance from `origin`, nearest first. Ties go to the track further
    /// from the directory.
    fn tracks_by_distance(&self, origin: u8) -> Vec<u8> {
        let dir_track = self.geometry.dir_track() as i16;
        let origin = origin as i16;
        let mut tracks = Vec::new();
        for d in 1..=self.geometry.tracks() as i16 {
            let mut pair = [origin - d, origin + d];
            if (pair[1] - dir_track).abs() > (pair[0] - dir_track).abs() {
                pair.swap(0, 1);
            }
            for t in pair {
                if t >= 1 && t <= self.geometry.tracks() as i16 {
                    tracks.push(t as u8);
                }
            }
        }
        tracks
    }

    fn first_block(&self) -> Option<Ts> {
        self.tracks_by_distance(self.geometry.dir_track())
            .into_iter()
            .filter(|&t| self.is_data_track(t))
            .find_map(|t| self.first_free_from(t, 0))
    }

    fn next_block(&self, (track, sector): Ts, interleave: u8) -> Option<Ts> {
        let spt = self.geometry.sectors_per_track(track);
        let start = ((sector as u16 + interleave as u16) % spt as u16) as u8;
        if let Some(ts) = self.first_free_from(track, start) {
            return Some(ts);
        }
        self.tracks_by_distance(track)
            .into_iter()
            .filter(|&t| self.is_data_track(t))
            .find_map(|t| self.first_free_from(t, start))
    }

    /// Allocate `count` sectors for a new file chain, in chain order.
    pub fn allocate_chain(&mut self, count: usize, interleave: u8) -> Result<Vec<Ts>, FileSystemError> {
        if (self.blocks_free() as usize) < count {
            return Err(FileSystemError::DiskFull);
        }
        let mut chain: Vec<Ts> = Vec::with_capacity(count);
        for _ in 0..count {
            let next = match chain.last() {
                None => self.first_block(),
                Some(&prev) => self.next_block(prev, interleave),
            };
            let Some(ts) = next
            else {
                // The free counts claimed more space than the bitmaps hold.
                for &ts in &chain {
                    self.free(ts);
                }
                return Err(FileSystemError::DiskFull);
            };
            self.allocate(ts);
            chain.push(ts);
        }
        log::trace!("Bam::allocate_chain(): allocated {:?}", chain);
        Ok(chain)
    }

    /// Allocate a new directory sector following `prev` on the directory track.
    pub fn allocate_dir_sector(&mut self, prev: Ts) -> Option<Ts> {
        let dir_track = self.geometry.dir_track();
        let spt = self.geometry.sectors_per_track(dir_track);
        let start = ((prev.1 as u16 + self.geometry.dir_interleave() as u16) % spt as u16) as u8;
        let ts = self.first_free_from(dir_track, start)?;
        self.allocate(ts);
        Some(ts)
    }

    /// Reset the BAM so that exactly the sectors in `used` are allocated.
    pub fn rebuild(&mut self, used: &BTreeSet<Ts>) {
        for t in 1..=self.geometry.tracks() {
            let entry = &mut self.entries[t as usize - 1];
            if self.geometry == CbmGeometry::D71 && t == 53 {
                *entry = BamEntry::default();
                continue;
            }
            let spt = self.geometry.sectors_per_track(t);
            let bitmap = (0..spt)
                .filter(|&s| !used.contains(&(t, s)))
                .fold(0u64, |acc, s| acc | (1u64 << s));
            *entry = BamEntry {
                free: bitmap.count_ones() as u8,
                bitmap,
            };
        }
    }
}

fn bits_from_le(bytes: &[u8]) -> u64 {
    bytes.iter().rev().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

fn unpack(block: &[u8], offset: usize, map_len: usize) -> BamEntry {
    BamEntry {
        free: block[offset],
        bitmap: bits_from_le(&block[offset + 1..offset + 1 + map_len]),
    }
}

fn pack(block: &mut [u8], offset: usize, map_len: usize, entry: &BamEntry) {
    block[offset] = entry.free;
    block[offset + 1..offset + 1 + map_len].copy_from_slice(&entry.bitmap.to_le_bytes()[..map_len]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coherent(bam: &Bam) -> bool {
        let total: u32 = (1..=bam.geometry().tracks())
            .map(|t| bam.entry(t).map(|e| e.popcount() as u32).unwrap_or(0))
            .sum();
        bam.mismatched_tracks().is_empty() && total == bam.total_free()
    }

    #[test]
    fn test_blank_free_counts() {
        assert_eq!(Bam::blank(CbmGeometry::D64_35).blocks_free(), 664);
        assert_eq!(Bam::blank(CbmGeometry::D64_40).blocks_free(), 749);
        assert_eq!(Bam::blank(CbmGeometry::D71).blocks_free(), 1328);
        assert_eq!(Bam::blank(CbmGeometry::D81).blocks_free(), 3160);
    }

    #[test]
    fn test_allocation_coherence() {
        let geometry = CbmGeometry::D64_35;
        let mut bam = Bam::blank(geometry);
        let start = bam.total_free();
        let chain = bam.allocate_chain(30, geometry.default_interleave()).unwrap();
        assert_eq!(chain[0], (17, 0));
        assert_eq!(chain[1], (17, 10));
        assert!(chain.iter().all(|&(t, _)| t != 18));
        assert_eq!(chain.iter().collect::<BTreeSet<_>>().len(), 30);
        assert!(coherent(&bam));
        assert_eq!(bam.total_free(), start - 30);

        for ts in chain.iter().step_by(2) {
            assert!(bam.free(*ts));
        }
        assert!(!bam.free(chain[0]));
        assert!(coherent(&bam));
        assert_eq!(bam.total_free(), start - 15);
    }

    #[test]
    fn test_disk_full() {
        let mut bam = Bam::blank(CbmGeometry::D64_35);
        assert_eq!(bam.allocate_chain(665, 10), Err(FileSystemError::DiskFull));
        assert_eq!(bam.blocks_free(), 664);
        assert_eq!(bam.allocate_chain(664, 10).map(|c| c.len()), Ok(664));
        assert_eq!(bam.blocks_free(), 0);
    }

    #[test]
    fn test_rebuild() {
        let mut bam = Bam::blank(CbmGeometry::D71);
        let used: BTreeSet<Ts> = CbmGeometry::D71.system_sectors().into_iter().collect();
        bam.entries[0].free = 3;
        assert_eq!(bam.mismatched_tracks(), vec![1]);
        bam.rebuild(&used);
        assert_eq!(bam, Bam::blank(CbmGeometry::D71));
    }
}
