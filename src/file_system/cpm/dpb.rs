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

    src/file_system/cpm/dpb.rs

    CP/M disk parameter blocks and the catalog of known formats.
*/

//! A [Dpb] describes the physical layout of a CP/M volume and the allocation parameters derived
//! from it. The BIOS fields a CP/M system would hold in memory (BSH, BLM, EXM, DSM, DRM, OFF) are
//! computed from the physical description rather than stored, so a catalog entry cannot carry an
//! inconsistent combination.

use std::fmt::{self, Display, Formatter};

/// A CP/M record is always 128 bytes regardless of the physical sector size.
pub const RECORD_SIZE: usize = 128;
/// Bytes addressed by a single logical extent.
pub const EXTENT_BYTES: usize = 16384;

/// How logical tracks are laid out across the sides of a double-sided disk.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SideOrder {
    /// Logical tracks alternate between sides: c0h0, c0h1, c1h0...
    Alternate,
    /// All of side 0 precedes side 1, both read outward.
    Sequential,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Dpb {
    /// Short format name in the style of libdsk, e.g. `ibm-3740`.
    pub name: &'static str,
    pub description: &'static str,
    pub cylinders: u16,
    pub sides: u8,
    pub sectors_per_track: u8,
    pub sector_size: u16,
    /// Physical ID of the first sector on each track.
    pub first_sector: u8,
    pub block_size: u16,
    pub dir_entries: u16,
    /// Logical tracks reserved for the system before the directory.
    pub reserved_tracks: u16,
    pub side_order: SideOrder,
    /// Software skew factor. 0 or 1 means sectors are read in physical order.
    pub skew: u8,
}

impl Display for Dpb {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "{} ({}): {}x{}x{}x{}, {} byte blocks, {} dir entries",
            self.name,
            self.description,
            self.cylinders,
            self.sides,
            self.sectors_per_track,
            self.sector_size,
            self.block_size,
            self.dir_entries
        )
    }
}

impl Dpb {
    /// Logical tracks on the volume.
    pub fn logical_tracks(&self) -> u32 {
        self.cylinders as u32 * self.sides as u32
    }

    /// Total bytes of sector data on the volume.
    pub fn total_bytes(&self) -> usize {
        self.logical_tracks() as usize * self.sectors_per_track as usize * self.sector_size as usize
    }

    /// SPT: 128-byte records per logical track.
    pub fn records_per_track(&self) -> u16 {
        (self.sectors_per_track as usize * self.sector_size as usize / RECORD_SIZE) as u16
    }

    /// BSH: log2 of records per block.
    pub fn block_shift(&self) -> u8 {
        (self.block_size as usize / RECORD_SIZE).trailing_zeros() as u8
    }

    /// BLM: records per block, minus one.
    pub fn block_mask(&self) -> u8 {
        (self.block_size as usize / RECORD_SIZE - 1) as u8
    }

    /// Bytes available for the directory and file data.
    pub fn data_bytes(&self) -> usize {
        let tracks = self.logical_tracks().saturating_sub(self.reserved_tracks as u32) as usize;
        tracks * self.sectors_per_track as usize * self.sector_size as usize
    }

    /// DSM: the highest block number.
    pub fn max_block(&self) -> u16 {
        (self.data_bytes() / self.block_size as usize).saturating_sub(1) as u16
    }

    /// Allocation pointers are 16 bits wide once the block count exceeds 256.
    pub fn wide_pointers(&self) -> bool {
        self.max_block() > 255
    }

    /// Allocation pointers held by one directory entry.
    pub fn pointers_per_entry(&self) -> usize {
        if self.wide_pointers() {
            8
        }
        else {
            16
        }
    }

    /// EXM: logical extents per directory entry, minus one.
    pub fn extent_mask(&self) -> u8 {
        (self.pointers_per_entry() * self.block_size as usize / EXTENT_BYTES).saturating_sub(1) as u8
    }

    /// DRM: the highest directory entry number.
    pub fn max_dir_entry(&self) -> u16 {
        self.dir_entries - 1
    }

    /// Blocks occupied by the directory, starting at block 0.
    pub fn dir_blocks(&self) -> u16 {
        (self.dir_entries as usize * 32).div_ceil(self.block_size as usize) as u16
    }

    /// Bytes covered by a single directory entry.
    pub fn entry_bytes(&self) -> usize {
        self.pointers_per_entry() * self.block_size as usize
    }

    /// Map a logical track to a physical (cylinder, head).
    pub fn track_ch(&self, logical_track: u32) -> (u16, u8) {
        let sides = self.sides.max(1) as u32;
        match self.side_order {
            SideOrder::Alternate => ((logical_track / sides) as u16, (logical_track % sides) as u8),
            SideOrder::Sequential => (
                (logical_track % self.cylinders as u32) as u16,
                (logical_track / self.cylinders as u32) as u8,
            ),
        }
    }

    /// Build the logical-to-physical sector translation table. Each logical sector advances the
    /// physical position by the skew factor, stepping forward past positions already taken.
    pub fn skew_table(&self) -> Vec<u8> {
        let spt = self.sectors_per_track as usize;
        if self.skew <= 1 {
            return (0..spt).map(|s| self.first_sector.wrapping_add(s as u8)).collect();
        }
        let mut used = vec![false; spt];
        let mut table = Vec::with_capacity(spt);
        let mut pos = 0;
        for _ in 0..spt {
            while used[pos] {
                pos = (pos + 1) % spt;
            }
            used[pos] = true;
            table.push(self.first_sector.wrapping_add(pos as u8));
            pos = (pos + self.skew as usize) % spt;
        }
        table
    }

    /// Parameters that describe a usable volume.
    pub fn is_sane(&self) -> bool {
        self.block_size.is_power_of_two()
            && self.block_size >= 1024
            && self.sector_size as usize >= RECORD_SIZE
            && self.dir_entries > 0
            && self.dir_entries % 4 == 0
            && self.dir_blocks() <= self.max_block()
            && self.dir_blocks() <= 16
    }
}

macro_rules! dpb {
    ($name:literal, $desc:literal, $cyl:expr, $sides:expr, $spt:expr, $ss:expr, $first:expr, $bs:expr, $dir:expr, $off:expr, $order:ident, $skew:expr) => {
        Dpb {
            name: $name,
            description: $desc,
            cylinders: $cyl,
            sides: $sides,
            sectors_per_track: $spt,
            sector_size: $ss,
            first_sector: $first,
            block_size: $bs,
            dir_entries: $dir,
            reserved_tracks: $off,
            side_order: SideOrder::$order,
            skew: $skew,
        }
    };
}

#[rustfmt::skip]
pub const DPB_CATALOG: &[Dpb] = &[
    dpb!("ibm-3740",   "8\" SSSD IBM 3740",        77, 1, 26,  128, 1,    1024,  64, 2, Alternate,  6),
    dpb!("ibm-8ds",    "8\" DSDD",                 77, 2, 26,  256, 1,    2048, 128, 2, Alternate,  0),
    dpb!("kaypro2",    "Kaypro II SSDD",           40, 1, 10,  512, 0,    1024,  64, 1, Alternate,  0),
    dpb!("kaypro4",    "Kaypro 4 DSDD",            40, 2, 10,  512, 0,    2048,  64, 1, Sequential, 0),
    dpb!("osborne1",   "Osborne 1 SSSD",           40, 1, 10,  256, 1,    1024,  64, 3, Alternate,  2),
    dpb!("osborne-dd", "Osborne 1 SSDD",           40, 1,  5, 1024, 1,    1024,  64, 3, Alternate,  0),
    dpb!("cpcsys",     "Amstrad CPC system",       40, 1,  9,  512, 0x41, 1024,  64, 2, Alternate,  0),
    dpb!("cpcdata",    "Amstrad CPC data",         40, 1,  9,  512, 0xC1, 1024,  64, 0, Alternate,  0),
    dpb!("pcw",        "Amstrad PCW CF2",          40, 1,  9,  512, 1,    1024,  64, 1, Alternate,  0),
    dpb!("pcw-cf2dd",  "Amstrad PCW CF2DD",        80, 2,  9,  512, 1,    2048, 256, 1, Alternate,  0),
    dpb!("qx10",       "Epson QX-10",              40, 2, 16,  256, 1,    2048, 128, 2, Sequential, 0),
    dpb!("apple2",     "Apple II CP/M card",       35, 1, 16,  256, 0,    1024,  64, 3, Alternate,  0),
    dpb!("trs80-m4",   "TRS-80 Model 4",           40, 2, 18,  256, 0,    2048, 128, 1, Alternate,  0),
    dpb!("bbc-512",    "BBC Master 512",           80, 2,  5, 1024, 0,    2048, 128, 0, Sequential, 0),
    dpb!("morrow-md3", "Morrow Micro Decision",    40, 2,  5, 1024, 1,    2048, 128, 2, Alternate,  3),
    dpb!("xerox820",   "Xerox 820 SSSD",           40, 1, 18,  128, 1,    1024,  32, 3, Alternate,  5),
    dpb!("zorba",      "Telcon Zorba",             40, 2, 10,  512, 1,    2048, 128, 2, Alternate,  0),
    dpb!("pc88",       "NEC PC-8801 2D",           80, 2, 16,  256, 1,    2048, 128, 2, Sequential, 0),
    dpb!("pc98",       "NEC PC-9801 2HD",          77, 2,  8, 1024, 1,    2048, 128, 2, Sequential, 0),
    dpb!("dsdd-525",   "Generic 5.25\" DSDD",      40, 2,  9,  512, 1,    2048,  64, 2, Alternate,  0),
    dpb!("dsdd-35",    "Generic 3.5\" DSDD",       80, 2,  9,  512, 1,    2048, 128, 2, Alternate,  0),
];

/// Look up a catalog entry by name, ignoring case.
pub fn dpb_by_name(name: &str) -> Option<&'static Dpb> {
    DPB_CATALOG.iter().find(|d| d.name.eq_ignore_ascii_case(name))
}

/// Return the catalog entries whose total size equals `bytes`.
pub fn dpbs_for_size(bytes: usize) -> impl Iterator<Item = &'static Dpb> {
    DPB_CATALOG.iter().filter(move |d| d.total_bytes() == bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_is_consistent() {
        assert!(DPB_CATALOG.len() >= 15);
        for dpb in DPB_CATALOG {
            assert!(dpb.is_sane(), "{}", dpb);
            assert_eq!(dpb.entry_bytes(), (dpb.extent_mask() as usize + 1) * EXTENT_BYTES, "{}", dpb.name);
            let mut table = dpb.skew_table();
            table.sort();
            table.dedup();
            assert_eq!(table.len(), dpb.sectors_per_track as usize, "{}", dpb.name);
        }
    }

    #[test]
    fn test_ibm_3740_parameters() {
        let dpb = dpb_by_name("IBM-3740").unwrap();
        assert_eq!(dpb.total_bytes(), 256_256);
        assert_eq!(dpb.records_per_track(), 26);
        assert_eq!(dpb.block_shift(), 3);
        assert_eq!(dpb.block_mask(), 7);
        assert_eq!(dpb.extent_mask(), 0);
        assert_eq!(dpb.max_block(), 242);
        assert_eq!(dpb.max_dir_entry(), 63);
        assert_eq!(dpb.dir_blocks(), 2);
        assert_eq!(&dpb.skew_table()[..6], &[1, 7, 13, 19, 25, 5]);
    }

    #[test]
    fn test_wide_pointers() {
        let dpb = dpb_by_name("pc98").unwrap();
        assert!(dpb.wide_pointers());
        assert_eq!(dpb.pointers_per_entry(), 8);
        assert_eq!(dpb.extent_mask(), 0);
        let dpb = dpb_by_name("kaypro4").unwrap();
        assert!(!dpb.wide_pointers());
        assert_eq!(dpb.extent_mask(), 1);
        assert_eq!(dpb.track_ch(45), (5, 1));
        let dpb = dpb_by_name("dsdd-35").unwrap();
        assert_eq!(dpb.track_ch(45), (22, 1));
    }
}
