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

    tests/common/mod.rs

    Common support routines for tests
*/
#![allow(dead_code)]

use fluxvault::{
    file_system::cbm::{CbmFileSystem, CbmGeometry},
    track_reader::SectorRecord,
    DiskImage,
    SectorBytes,
};

use hex::encode;
use sha1::{Digest, Sha1};
use std::path::Path;

pub const D64_35_LEN: usize = 174_848;

pub fn compute_file_hash<P: AsRef<Path>>(path: P) -> String {
    let file_buf = std::fs::read(path).unwrap();
    compute_slice_hash(&file_buf)
}

pub fn compute_slice_hash(slice: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(slice);
    let result = hasher.finalize();

    encode(result)
}

/// Sectors on a 1541 track, by track number (1-based).
pub fn cbm_sectors_per_track(track: u8) -> usize {
    match track {
        1..=17 => 21,
        18..=24 => 19,
        25..=30 => 18,
        _ => 17,
    }
}

/// Byte offset of a block within a 35-track D64 file.
pub fn d64_offset(track: u8, sector: u8) -> usize {
    let preceding: usize = (1..track).map(cbm_sectors_per_track).sum();
    (preceding + sector as usize) * 256
}

/// A freshly formatted 1541 disk.
pub fn blank_d64(name: &str, id: &str) -> DiskImage {
    CbmFileSystem::format(CbmGeometry::D64_35, name, id).unwrap()
}

/// Nine 512-byte MFM sectors, each filled with its sector id.
pub fn mfm_sectors(cylinder: u16, head: u8) -> Vec<SectorRecord> {
    (1..=9)
        .map(|id| SectorRecord::new(cylinder, head, id, SectorBytes::filled(512, id)))
        .collect()
}
