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

    src/copy_protection.rs

    Copy protection schemes recognized by timing analysis.
*/

use crate::{diskimage::DiskImage, types::TrackKey};
use std::fmt::{Display, Formatter, Result};

/// A copy protection scheme identified from the flux timing of a track.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProtectionKind {
    #[default]
    None,
    Speedlock,
    Copylock,
    VMax,
    RapidLok,
    Spiral,
    Macrodos,
    Flaschel,
    /// Timing anomalies consistent with protection, but no known pattern matched.
    Generic,
}

impl Display for ProtectionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            ProtectionKind::None => write!(f, "None"),
            ProtectionKind::Speedlock => write!(f, "Speedlock"),
            ProtectionKind::Copylock => write!(f, "Copylock"),
            ProtectionKind::VMax => write!(f, "V-MAX!"),
            ProtectionKind::RapidLok => write!(f, "RapidLok"),
            ProtectionKind::Spiral => write!(f, "Spiral"),
            ProtectionKind::Macrodos => write!(f, "Macrodos"),
            ProtectionKind::Flaschel => write!(f, "Flaschel"),
            ProtectionKind::Generic => write!(f, "Generic"),
        }
    }
}

impl ProtectionKind {
    pub fn is_none(&self) -> bool {
        matches!(self, ProtectionKind::None)
    }
}

/// The result of scanning a whole disk for copy protection.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProtectionMatch {
    pub kind: ProtectionKind,
    pub confidence: u8,
    /// The track on which the strongest evidence was found.
    pub track: TrackKey,
}

impl DiskImage {
    /// Attempt to determine the copy protection scheme used on the disk image from the latency
    /// profiles attached to its tracks. Tracks carrying weak bits are treated as generic
    /// protection if no timing pattern matched.
    /// Returns None if no copy protection is detected.
    pub fn detect_copy_protection(&self) -> Option<ProtectionMatch> {
        let mut best: Option<ProtectionMatch> = None;

        for track in self.track_iter() {
            if let Some(profile) = &track.latency {
                if !profile.protection.is_none()
                    && best.map(|b| profile.protection_confidence > b.confidence).unwrap_or(true)
                {
                    best = Some(ProtectionMatch {
                        kind: profile.protection,
                        confidence: profile.protection_confidence,
                        track: track.key,
                    });
                }
            }
        }

        if best.is_none() {
            if let Some(track) = self
                .track_iter()
                .find(|t| t.sectors.iter().any(|s| s.has_weak_bits()))
            {
                log::debug!(
                    "DiskImage::detect_copy_protection(): weak bits found on track {}",
                    track.key
                );
                best = Some(ProtectionMatch {
                    kind: ProtectionKind::Generic,
                    confidence: 50,
                    track: track.key,
                });
            }
        }
        best
    }
}
