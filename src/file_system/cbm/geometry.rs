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

    src/file_system/cbm/geometry.rs

    Track and sector layout of 1541, 1571 and 1581 volumes.
*/

use crate::{bitstream_codec::gcr, diskimage::DosFlavor, types::DiskCh, CBM_SECTOR_SIZE};
use std::fmt::{self, Display, Formatter};

/// A CBM track/sector pair. Tracks are numbered from 1.
pub type Ts = (u8, u8);

/// The layout of a CBM DOS volume.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CbmGeometry {
    /// A 1541 disk of 35 or 40 tracks.
    D64 { tracks: u8 },
    /// A double-sided 1571 disk. Tracks 36-70 are on the second side.
    D71,
    /// A 1581 disk, in its logical layout of 80 tracks of 40 sectors.
    D81,
}

impl Display for CbmGeometry {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            CbmGeometry::D64 { tracks } => write!(f, "1541 ({} tracks)", tracks),
            CbmGeometry::D71 => write!(f, "1571"),
            CbmGeometry::D81 => write!(f, "1581"),
        }
    }
}

impl CbmGeometry {
    pub const D64_35: CbmGeometry = CbmGeometry::D64 { tracks: 35 };
    pub const D64_40: CbmGeometry = CbmGeometry::D64 { tracks: 40 };

    pub fn tracks(&self) -> u8 {
        match self {
            CbmGeometry::D64 { tracks } => *tracks,
            CbmGeometry::D71 => 70,
            CbmGeometry::D81 => 80,
        }
    }

    pub fn sectors_per_track(&self, track: u8) -> u8 {
        match self {
            CbmGeometry::D64 { .. } => gcr::sectors_per_track(track),
            CbmGeometry::D71 if track > 35 => gcr::sectors_per_track(track - 35),
            CbmGeometry::D71 => gcr::sectors_per_track(track),
            CbmGeometry::D81 => 40,
        }
    }

    pub fn total_sectors(&self) -> usize {
        (1..=self.tracks()).map(|t| self.sectors_per_track(t) as usize).sum()
    }

    pub fn dir_track(&self) -> u8 {
        match self {
            CbmGeometry::D81 => 40,
            _ => 18,
        }
    }

    /// The sector holding the disk name and ID.
    pub fn header_ts(&self) -> Ts {
        (self.dir_track(), 0)
    }

    /// The first sector of the directory chain.
    pub fn first_dir_ts(&self) -> Ts {
        match self {
            CbmGeometry::D81 => (40, 3),
            _ => (18, 1),
        }
    }

    /// The sectors holding the allocation map.
    pub fn bam_sectors(&self) -> Vec<Ts> {
        match self {
            CbmGeometry::D64 { .. } => vec![(18, 0)],
            CbmGeometry::D71 => vec![(18, 0), (53, 0)],
            CbmGeometry::D81 => vec![(40, 1), (40, 2)],
        }
    }

    /// Sectors that belong to the DOS rather than to any file, excluding directory sectors
    /// beyond the first.
    pub fn system_sectors(&self) -> Vec<Ts> {
        let mut sectors = vec![self.header_ts()];
        sectors.extend(self.bam_sectors());
        sectors.push(self.first_dir_ts());
        sectors.sort();
        sectors.dedup();
        sectors
    }

    /// Return true if the track is never used for file data. The second-side BAM track of a
    /// 1571 is marked fully allocated when formatted.
    pub fn is_reserved_track(&self, track: u8) -> bool {
        track == self.dir_track() || (*self == CbmGeometry::D71 && track == 53)
    }

    pub fn default_interleave(&self) -> u8 {
        match self {
            CbmGeometry::D64 { .. } => 10,
            CbmGeometry::D71 => 6,
            CbmGeometry::D81 => 1,
        }
    }

    pub fn dir_interleave(&self) -> u8 {
        match self {
            CbmGeometry::D81 => 1,
            _ => 3,
        }
    }

    pub fn dos_flavor(&self) -> DosFlavor {
        match self {
            CbmGeometry::D64 { .. } => DosFlavor::Cbm1541,
            CbmGeometry::D71 => DosFlavor::Cbm1571,
            CbmGeometry::D81 => DosFlavor::Cbm1581,
        }
    }

    pub fn is_valid_ts(&self, (track, sector): Ts) -> bool {
        track >= 1 && track <= self.tracks() && sector < self.sectors_per_track(track)
    }

    /// The physical track a CBM track is stored on.
    pub fn ch(&self, track: u8) -> DiskCh {
        match self {
            CbmGeometry::D71 if track > 35 => DiskCh::new((track - 36) as u16, 1),
            _ => DiskCh::new(track.saturating_sub(1) as u16, 0),
        }
    }

    /// The CBM track stored on a physical track, if the geometry has one there.
    pub fn track_of(&self, ch: DiskCh) -> Option<u8> {
        let track = match (self, ch.h()) {
            (CbmGeometry::D71, 1) => ch.c() + 36,
            (_, 0) => ch.c() + 1,
            _ => return None,
        };
        (track <= self.tracks() as u16).then_some(track as u8)
    }

    /// Index of a sector in the linear sector image.
    pub fn sector_index(&self, (track, sector): Ts) -> usize {
        (1..track).map(|t| self.sectors_per_track(t) as usize).sum::<usize>() + sector as usize
    }

    /// Byte offset of a sector in the linear sector image.
    pub fn sector_offset(&self, ts: Ts) -> usize {
        self.sector_index(ts) * CBM_SECTOR_SIZE
    }

    /// Size of a sector image, optionally with a one-byte-per-sector error trailer.
    pub fn image_size(&self, with_errors: bool) -> usize {
        let sectors = self.total_sectors();
        sectors * CBM_SECTOR_SIZE + if with_errors { sectors } else { 0 }
    }

    /// Identify a sector image by its length. Returns the geometry and whether an error trailer
    /// is present.
    pub fn from_image_size(len: usize) -> Option<(CbmGeometry, bool)> {
        [
            CbmGeometry::D64_35,
            CbmGeometry::D64_40,
            CbmGeometry::D71,
            CbmGeometry::D81,
        ]
        .into_iter()
        .find_map(|g| {
            if len == g.image_size(false) {
                Some((g, false))
            }
            else if len == g.image_size(true) {
                Some((g, true))
            }
            else {
                None
            }
        })
    }

    /// Iterate over every sector of the volume in image order.
    pub fn iter_sectors(&self) -> impl Iterator<Item = Ts> + '_ {
        (1..=self.tracks()).flat_map(move |t| (0..self.sectors_per_track(t)).map(move |s| (t, s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        assert_eq!(CbmGeometry::D64_35.image_size(false), 174848);
        assert_eq!(CbmGeometry::D64_35.image_size(true), 175531);
        assert_eq!(CbmGeometry::D64_40.image_size(false), 196608);
        assert_eq!(CbmGeometry::D64_40.image_size(true), 197376);
        assert_eq!(CbmGeometry::D71.image_size(false), 349696);
        assert_eq!(CbmGeometry::D71.image_size(true), 351062);
        assert_eq!(CbmGeometry::D81.image_size(false), 819200);
        assert_eq!(CbmGeometry::D81.image_size(true), 822400);
        assert_eq!(CbmGeometry::from_image_size(175531), Some((CbmGeometry::D64_35, true)));
        assert_eq!(CbmGeometry::from_image_size(1000), None);
    }

    #[test]
    fn test_bam_offset() {
        assert_eq!(CbmGeometry::D64_35.sector_offset((18, 0)), 0x16500);
        assert_eq!(CbmGeometry::D71.ch(36), DiskCh::new(0, 1));
        assert_eq!(CbmGeometry::D71.track_of(DiskCh::new(17, 1)), Some(53));
        assert_eq!(CbmGeometry::D64_35.track_of(DiskCh::new(35, 0)), None);
        assert!(!CbmGeometry::D64_35.is_valid_ts((18, 19)));
        assert!(CbmGeometry::D64_35.is_valid_ts((17, 20)));
    }
}
