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

    src/hardware/analysis.rs

    Analysis-only adapter: container conversion and disk reports without hardware.
*/

use crate::{
    copy_protection::ProtectionMatch,
    file_parsers::{DiskImageFileFormat, IMAGE_FORMATS},
    hardware::{AdapterCaps, AdapterInfo, HardwareAdapter},
    types::{TrackDataEncoding, TrackKey},
    DiskImage,
    DiskImageError,
};
use std::{
    fmt::{self, Display, Formatter},
    path::Path,
};

/// Summary of one track of an analyzed disk.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackAnalysis {
    pub key: TrackKey,
    pub encoding: TrackDataEncoding,
    pub sectors: usize,
    pub good_sectors: usize,
    pub weak_sectors: usize,
    /// Timing anomalies in the track's latency profile, if one was recorded.
    pub anomalies: Option<u32>,
    pub fingerprint: String,
}

/// A report over every track of a disk image.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiskAnalysis {
    pub tracks: Vec<TrackAnalysis>,
    pub protection: Option<ProtectionMatch>,
}

impl DiskAnalysis {
    pub fn of(image: &DiskImage) -> Self {
        let tracks = image
            .track_iter()
            .map(|track| TrackAnalysis {
                key: track.key,
                encoding: track.encoding,
                sectors: track.sectors.len(),
                good_sectors: track.sectors.iter().filter(|s| s.is_good()).count(),
                weak_sectors: track.sectors.iter().filter(|s| s.has_weak_bits()).count(),
                anomalies: track.latency.as_ref().map(|p| p.anomaly_count()),
                fingerprint: track.fingerprint(),
            })
            .collect();

        DiskAnalysis {
            tracks,
            protection: image.detect_copy_protection(),
        }
    }

    pub fn sector_ct(&self) -> usize {
        self.tracks.iter().map(|t| t.sectors).sum()
    }

    pub fn bad_sector_ct(&self) -> usize {
        self.tracks.iter().map(|t| t.sectors - t.good_sectors).sum()
    }
}

impl Display for DiskAnalysis {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        for t in &self.tracks {
            write!(
                f,
                "{:>8} {:<8} {:>3}/{:<3} sectors good",
                t.key.to_string(),
                t.encoding.to_string(),
                t.good_sectors,
                t.sectors
            )?;
            if t.weak_sectors > 0 {
                write!(f, ", {} weak", t.weak_sectors)?;
            }
            if let Some(anomalies) = t.anomalies {
                write!(f, ", {} timing anomalies", anomalies)?;
            }
            writeln!(f, "  {}", &t.fingerprint[..t.fingerprint.len().min(12)])?;
        }
        writeln!(
            f,
            "{} tracks, {} sectors, {} bad",
            self.tracks.len(),
            self.sector_ct(),
            self.bad_sector_ct()
        )?;
        match &self.protection {
            Some(p) => write!(f, "Protection: {} ({}%) on track {}", p.kind, p.confidence, p.track),
            None => write!(f, "Protection: none detected"),
        }
    }
}

/// An adapter with no device behind it. It converts between containers and reports on images.
#[derive(Default)]
pub struct AnalysisAdapter;

impl AnalysisAdapter {
    pub const NAME: &'static str = "analysis";

    pub fn analyze(&self, image: &DiskImage) -> DiskAnalysis {
        DiskAnalysis::of(image)
    }
}

impl HardwareAdapter for AnalysisAdapter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn capabilities(&self) -> AdapterCaps {
        AdapterCaps::CONVERT | AdapterCaps::INFO
    }

    fn formats(&self) -> Vec<DiskImageFileFormat> {
        IMAGE_FORMATS.to_vec()
    }

    fn is_available(&self) -> bool {
        true
    }

    fn info(&mut self) -> Result<AdapterInfo, DiskImageError> {
        Ok(AdapterInfo {
            name: Self::NAME.to_string(),
            description: "Container conversion and timing analysis".to_string(),
            firmware: None,
            sample_clock: None,
            caps: self.capabilities(),
        })
    }

    fn convert(&mut self, input: &Path, output: &Path, format: DiskImageFileFormat) -> Result<(), DiskImageError> {
        let mut image = DiskImage::load_path(input)?;
        let written = image.save_path(output, Some(format))?;
        log::debug!(
            "AnalysisAdapter::convert(): {} -> {} ({} file(s))",
            input.display(),
            output.display(),
            written.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        diskimage::DiskMetadata,
        track_reader::SectorRecord,
        types::{DiskCh, SectorBytes, SectorFault},
    };

    fn image() -> DiskImage {
        let mut image = DiskImage::new(DiskMetadata::default());
        let mut sectors: Vec<SectorRecord> = (0..4)
            .map(|id| SectorRecord::new(0, 0, id, SectorBytes::from(vec![id; 256])))
            .collect();
        sectors[2].fault = Some(SectorFault::DataChecksum);
        image.add_sector_track(DiskCh::new(0, 0), TrackDataEncoding::GcrCbm, sectors);
        image
    }

    #[test]
    fn test_analysis_counts() {
        let analysis = AnalysisAdapter.analyze(&image());
        assert_eq!(analysis.tracks.len(), 1);
        assert_eq!(analysis.sector_ct(), 4);
        assert_eq!(analysis.bad_sector_ct(), 1);
        assert!(analysis.protection.is_none());
        assert!(analysis.to_string().contains("Protection: none detected"));
    }

    #[test]
    fn test_adapter_caps() {
        let mut adapter = AnalysisAdapter;
        assert!(adapter.is_available());
        assert_eq!(adapter.formats().len(), IMAGE_FORMATS.len());
        assert!(adapter.capabilities().contains(AdapterCaps::CONVERT));
        assert!(adapter.info().is_ok());
    }
}
