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

    src/diskimage.rs

    The in-memory disk image shared by every pipeline stage.
*/

//! A [DiskImage] is a set of [TrackRecord]s addressed by [TrackKey], plus disk-scope metadata.
//! Container codecs produce and consume disk images, filesystem walkers interpret them, and the
//! pipeline passes them by value between stages.

use crate::{
    file_parsers::{detect_format, format_from_ext, kryoflux::KfxFormat, DiskImageFileFormat, ImageParser},
    io::{Cursor, ReadSeek, ReadWriteSeek},
    track_reader::{SectorRecord, TrackRecord},
    types::{DiskCh, DiskImageFlags, TrackDataEncoding, TrackKey},
    DiskImageError,
};
use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
    path::{Path, PathBuf},
};

/// The disk operating system a disk image was formatted for.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DosFlavor {
    #[default]
    Unknown,
    Cbm1541,
    Cbm1571,
    Cbm1581,
    Cpm,
}

impl DosFlavor {
    /// The two-character DOS type written into a CBM directory header.
    pub fn dos_type(&self) -> Option<&'static str> {
        match self {
            DosFlavor::Cbm1541 | DosFlavor::Cbm1571 => Some("2A"),
            DosFlavor::Cbm1581 => Some("3D"),
            _ => None,
        }
    }

    pub fn is_cbm(&self) -> bool {
        matches!(self, DosFlavor::Cbm1541 | DosFlavor::Cbm1571 | DosFlavor::Cbm1581)
    }
}

impl Display for DosFlavor {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            DosFlavor::Unknown => write!(f, "Unknown"),
            DosFlavor::Cbm1541 => write!(f, "CBM DOS (1541)"),
            DosFlavor::Cbm1571 => write!(f, "CBM DOS (1571)"),
            DosFlavor::Cbm1581 => write!(f, "CBM DOS (1581)"),
            DosFlavor::Cpm => write!(f, "CP/M"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiskMetadata {
    /// The volume name, converted to ASCII.
    pub name: Option<String>,
    /// The disk ID, as stored in CBM sector headers.
    pub id: Option<[u8; 2]>,
    pub dos_flavor: DosFlavor,
    pub double_sided: bool,
    pub comment: Option<String>,
}

#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiskImage {
    pub metadata: DiskMetadata,
    /// The container format the image was loaded from, if any.
    pub source_format: Option<DiskImageFileFormat>,
    pub flags: DiskImageFlags,
    tracks: BTreeMap<TrackKey, TrackRecord>,
}

impl DiskImage {
    pub fn new(metadata: DiskMetadata) -> Self {
        DiskImage {
            metadata,
            ..DiskImage::default()
        }
    }

    /// Detect the container format of `image_io` and load it.
    pub fn load<RS: ReadSeek>(image_io: &mut RS) -> Result<Self, DiskImageError> {
        let format = detect_format(image_io)?;
        DiskImage::load_as(format, image_io)
    }

    /// Load `image_io` as the specified container format.
    pub fn load_as<RS: ReadSeek>(format: DiskImageFileFormat, image_io: &mut RS) -> Result<Self, DiskImageError> {
        let mut image = DiskImage::default();
        format.load_image(image_io, &mut image)?;
        image.source_format = Some(format);
        log::debug!(
            "DiskImage::load_as(): loaded {} image with {} tracks",
            format,
            image.track_ct()
        );
        Ok(image)
    }

    /// Serialize the image to `image_io` in the specified container format.
    pub fn save<RWS: ReadWriteSeek>(
        &mut self,
        format: DiskImageFileFormat,
        image_io: &mut RWS,
    ) -> Result<(), DiskImageError> {
        format.save_image(self, image_io)?;
        self.flags.remove(DiskImageFlags::DIRTY);
        Ok(())
    }

    pub fn track_ct(&self) -> usize {
        self.tracks.len()
    }

    /// Iterate over tracks in key order.
    pub fn track_iter(&self) -> impl Iterator<Item = &TrackRecord> {
        self.tracks.values()
    }

    pub fn track_iter_mut(&mut self) -> impl Iterator<Item = &mut TrackRecord> {
        self.tracks.values_mut()
    }

    pub fn track_keys(&self) -> impl Iterator<Item = &TrackKey> {
        self.tracks.keys()
    }

    pub fn track(&self, key: impl Into<TrackKey>) -> Option<&TrackRecord> {
        self.tracks.get(&key.into())
    }

    pub fn track_mut(&mut self, key: impl Into<TrackKey>) -> Option<&mut TrackRecord> {
        self.tracks.get_mut(&key.into())
    }

    /// Add a track, replacing and returning any track with the same key.
    pub fn insert_track(&mut self, track: TrackRecord) -> Option<TrackRecord> {
        if track.key.half_step {
            self.flags.insert(DiskImageFlags::HALF_TRACKS);
        }
        if track.head() > 0 {
            self.metadata.double_sided = true;
        }
        self.tracks.insert(track.key, track)
    }

    pub fn remove_track(&mut self, key: impl Into<TrackKey>) -> Option<TrackRecord> {
        self.tracks.remove(&key.into())
    }

    /// Add a sector-level track built from a list of sectors.
    pub fn add_sector_track(&mut self, ch: DiskCh, encoding: TrackDataEncoding, sectors: Vec<SectorRecord>) {
        self.insert_track(TrackRecord::from_sectors(TrackKey::from(ch), encoding, sectors));
    }

    /// Number of whole-step cylinders, counting from 0 to the highest present.
    pub fn cylinders(&self) -> u16 {
        self.tracks
            .keys()
            .filter(|k| !k.half_step)
            .map(|k| k.ch.c() + 1)
            .max()
            .unwrap_or(0)
    }

    pub fn heads(&self) -> u8 {
        self.tracks.keys().map(|k| k.ch.h() + 1).max().unwrap_or(0)
    }

    pub fn sector_ct(&self) -> usize {
        self.tracks.values().map(|t| t.sectors.len()).sum()
    }

    pub fn is_complete(&self) -> bool {
        !self.flags.contains(DiskImageFlags::INCOMPLETE)
    }

    pub fn is_readonly(&self) -> bool {
        self.flags.contains(DiskImageFlags::READONLY)
    }

    pub fn set_readonly(&mut self, readonly: bool) {
        self.flags.set(DiskImageFlags::READONLY, readonly);
    }

    pub fn sector(&self, ch: DiskCh, sector_id: u8) -> Option<&SectorRecord> {
        self.tracks.get(&TrackKey::from(ch))?.sector(sector_id)
    }

    /// Return the sector with the given ID on the specified track.
    pub fn read_sector(&self, ch: DiskCh, sector_id: u8) -> Result<&SectorRecord, DiskImageError> {
        let track = self
            .tracks
            .get(&TrackKey::from(ch))
            .ok_or_else(|| DiskImageError::not_found(format!("track {}", ch)))?;
        track
            .sector(sector_id)
            .ok_or_else(|| DiskImageError::not_found(format!("sector {} on track {}", sector_id, ch)))
    }

    /// Replace the data of a sector. The data length must match the existing sector.
    pub fn write_sector(&mut self, ch: DiskCh, sector_id: u8, data: &[u8]) -> Result<(), DiskImageError> {
        if self.is_readonly() {
            return Err(DiskImageError::WriteProtect(format!("sector {} on track {}", sector_id, ch)));
        }
        let track = self
            .tracks
            .get_mut(&TrackKey::from(ch))
            .ok_or_else(|| DiskImageError::not_found(format!("track {}", ch)))?;
        track.write_sector(sector_id, data)?;
        self.flags.insert(DiskImageFlags::DIRTY);
        Ok(())
    }

    /// Check the structural invariants of every track.
    pub fn check_invariants(&self) -> Result<(), DiskImageError> {
        self.tracks.values().try_for_each(|t| t.check_invariants())
    }

    /// Return the encoding used by the most tracks.
    pub fn dominant_encoding(&self) -> Option<TrackDataEncoding> {
        let mut counts: BTreeMap<u8, (usize, TrackDataEncoding)> = BTreeMap::new();
        for track in self.tracks.values() {
            let entry = counts.entry(track.encoding as u8).or_insert((0, track.encoding));
            entry.0 += 1;
        }
        counts.values().max_by_key(|(ct, _)| *ct).map(|(_, enc)| *enc)
    }

    /// Return true if any track holds a decoded bitstream or flux.
    pub fn has_bitstream_tracks(&self) -> bool {
        self.tracks
            .values()
            .any(|t| t.resolution != crate::track_reader::TrackDataResolution::MetaSector)
    }

    /// Load an image from a file, or a KryoFlux stream set from a directory.
    pub fn load_path(path: &Path) -> Result<Self, DiskImageError> {
        if path.is_dir() {
            let files = KfxFormat::expand_set(path)?;
            return KfxFormat::load_set(&files);
        }
        let data = std::fs::read(path).map_err(|e| DiskImageError::io(format!("{}: {}", path.display(), e)))?;
        let mut cursor = Cursor::new(data);
        match DiskImage::load(&mut cursor) {
            Err(DiskImageError::UnknownFormat) => {
                // Headerless formats of unusual size are recognized by extension alone.
                let format = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .and_then(format_from_ext)
                    .ok_or(DiskImageError::UnknownFormat)?;
                log::debug!(
                    "DiskImage::load_path(): content not recognized, trying {} by extension",
                    format
                );
                DiskImage::load_as(format, &mut cursor)
            }
            result => result,
        }
    }

    /// Save the image to `path`. The format is taken from the extension if not given. KryoFlux
    /// streams of more than one track are written as a stream set into the directory `path`.
    pub fn save_path(&mut self, path: &Path, format: Option<DiskImageFileFormat>) -> Result<Vec<PathBuf>, DiskImageError> {
        let format = match format {
            Some(format) => format,
            None => path
                .extension()
                .and_then(|e| e.to_str())
                .and_then(format_from_ext)
                .ok_or_else(|| {
                    DiskImageError::parameter(format!("cannot tell the output format of {}", path.display()))
                })?,
        };

        let flux_tracks = self.tracks.values().filter(|t| t.flux.is_some()).count();
        if format == DiskImageFileFormat::KryofluxStream && (path.is_dir() || flux_tracks > 1) {
            std::fs::create_dir_all(path)?;
            return KfxFormat::save_set(self, path);
        }

        let mut cursor = Cursor::new(Vec::new());
        self.save(format, &mut cursor)?;
        std::fs::write(path, cursor.into_inner())
            .map_err(|e| DiskImageError::io(format!("{}: {}", path.display(), e)))?;
        Ok(vec![path.to_path_buf()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SectorBytes;

    fn image() -> DiskImage {
        let mut image = DiskImage::default();
        for c in 0..2 {
            for h in 0..2 {
                let sectors = (1..=9)
                    .map(|s| SectorRecord::new(c, h, s, SectorBytes::filled(512, s)))
                    .collect();
                image.add_sector_track(DiskCh::new(c, h), TrackDataEncoding::Mfm, sectors);
            }
        }
        image
    }

    #[test]
    fn test_geometry() {
        let image = image();
        assert_eq!(image.cylinders(), 2);
        assert_eq!(image.heads(), 2);
        assert!(image.metadata.double_sided);
        assert_eq!(image.sector_ct(), 36);
        assert_eq!(image.dominant_encoding(), Some(TrackDataEncoding::Mfm));
    }

    #[test]
    fn test_sector_write() {
        let mut image = image();
        let ch = DiskCh::new(1, 1);
        image.write_sector(ch, 3, &[0xAA; 512]).unwrap();
        assert_eq!(image.read_sector(ch, 3).unwrap().data.as_slice(), &[0xAA; 512][..]);
        assert!(image.flags.contains(DiskImageFlags::DIRTY));
        assert!(image.check_invariants().is_ok());

        image.set_readonly(true);
        let err = image.write_sector(ch, 3, &[0; 512]).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Permission);
        assert_eq!(image.read_sector(ch, 10).unwrap_err().kind(), crate::ErrorKind::NotFound);
    }
}
