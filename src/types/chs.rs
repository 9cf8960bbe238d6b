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

    src/types/chs.rs

    Physical track addressing.
*/

//! The `chs` module defines structures for addressing physical tracks on a disk.

use std::fmt::Display;

/// A structure representing a physical track by Cylinder (c) and Head (h).
///
/// A `DiskCh` can hold the geometry of a disk, or act as a cursor specifying a specific track.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiskCh {
    pub(crate) c: u16,
    pub(crate) h: u8,
}

impl From<(u16, u8)> for DiskCh {
    fn from((c, h): (u16, u8)) -> Self {
        Self { c, h }
    }
}

impl Display for DiskCh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[c:{} h:{}]", self.c, self.h)
    }
}

impl DiskCh {
    /// Create a new DiskCh structure from a Cylinder (c) and Head (h) specifier.
    pub fn new(c: u16, h: u8) -> Self {
        Self { c, h }
    }
    /// Return the cylinder (c) field.
    pub fn c(&self) -> u16 {
        self.c
    }
    /// Return the head (h) field.
    pub fn h(&self) -> u8 {
        self.h
    }

    /// Return a new `DiskCh` that represents the next track on disk, or `None` if this is the
    /// last track of the specified geometry.
    pub fn next_track(&self, geom: impl Into<DiskCh>) -> Option<DiskCh> {
        let geom = geom.into();
        if self.h < geom.h().saturating_sub(1) {
            Some(DiskCh::from((self.c, self.h + 1)))
        }
        else if self.c < geom.c().saturating_sub(1) {
            Some(DiskCh::from((self.c + 1, 0)))
        }
        else {
            None
        }
    }

    /// Return an iterator over every track of a geometry, cylinder-major.
    pub fn iter(&self) -> DiskChIterator {
        DiskChIterator { geom: *self, ch: None }
    }
}

pub struct DiskChIterator {
    geom: DiskCh,
    ch:   Option<DiskCh>,
}

impl Iterator for DiskChIterator {
    type Item = DiskCh;

    fn next(&mut self) -> Option<Self::Item> {
        if self.geom.c == 0 || self.geom.h == 0 {
            return None;
        }
        let next = match self.ch {
            None => Some(DiskCh::new(0, 0)),
            Some(ch) => ch.next_track(self.geom),
        };
        self.ch = next;
        next
    }
}

/// The key used to address a track within a [crate::DiskImage]: a physical track plus an optional
/// half-step position, used by copy protections on CBM disks.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackKey {
    pub ch: DiskCh,
    pub half_step: bool,
}

impl From<DiskCh> for TrackKey {
    fn from(ch: DiskCh) -> Self {
        Self { ch, half_step: false }
    }
}

impl From<(u16, u8)> for TrackKey {
    fn from(ch: (u16, u8)) -> Self {
        Self {
            ch: DiskCh::from(ch),
            half_step: false,
        }
    }
}

impl Display for TrackKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.half_step {
            write!(f, "[c:{}.5 h:{}]", self.ch.c, self.ch.h)
        }
        else {
            write!(f, "{}", self.ch)
        }
    }
}

impl TrackKey {
    pub fn new(c: u16, h: u8, half_step: bool) -> Self {
        Self {
            ch: DiskCh::new(c, h),
            half_step,
        }
    }

    /// Build a key from a CBM 'halftrack' number, where halftrack 2 is track 1 (cylinder 0).
    pub fn from_halftrack(halftrack: u8) -> Self {
        let ht = halftrack.saturating_sub(2);
        Self {
            ch: DiskCh::new((ht / 2) as u16, 0),
            half_step: ht % 2 == 1,
        }
    }

    /// Return the CBM 'halftrack' number for this key, the inverse of [TrackKey::from_halftrack].
    pub fn halftrack(&self) -> u8 {
        (self.ch.c as u8) * 2 + 2 + self.half_step as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ch_iter() {
        let tracks: Vec<DiskCh> = DiskCh::new(2, 2).iter().collect();
        assert_eq!(
            tracks,
            vec![DiskCh::new(0, 0), DiskCh::new(0, 1), DiskCh::new(1, 0), DiskCh::new(1, 1)]
        );
    }

    #[test]
    fn test_halftrack_keys() {
        let key = TrackKey::from_halftrack(2);
        assert_eq!(key, TrackKey::new(0, 0, false));
        let key = TrackKey::from_halftrack(37);
        assert_eq!(key, TrackKey::new(17, 0, true));
        assert_eq!(key.halftrack(), 37);
    }
}
