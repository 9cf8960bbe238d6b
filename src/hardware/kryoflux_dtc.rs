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

    src/hardware/kryoflux_dtc.rs

    KryoFlux capture through the DTC command-line tool.
*/

//! The KryoFlux DiskTool Console writes one RAW stream file per track. This adapter runs `dtc`
//! into a scratch directory and parses the resulting files with the KryoFlux stream parser.

use crate::{
    file_parsers::{
        kryoflux::{track_file_name, KfxFormat, KfxStream},
        DiskImageFileFormat,
    },
    flux::FluxBuffer,
    hardware::{
        external::{scratch_dir, ExternalTool},
        poll_progress,
        report_progress,
        AdapterCaps,
        AdapterInfo,
        CancelFlag,
        CaptureCallback,
        CaptureStatus,
        DiskRequest,
        HardwareAdapter,
    },
    types::TrackKey,
    DiskImage,
    DiskImageError,
};
use regex::Regex;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DtcConfig {
    pub executable: PathBuf,
    /// Directory under which scratch capture directories are created.
    pub temp_dir: PathBuf,
    /// KryoFlux device index, when more than one board is attached.
    pub device: Option<u8>,
    /// Step the drive twice per track, for 40-track media in an 80-track drive.
    pub double_step: bool,
    /// Read retries performed by DTC itself.
    pub retries: u8,
}

impl Default for DtcConfig {
    fn default() -> Self {
        DtcConfig {
            executable: PathBuf::from("dtc"),
            temp_dir: std::env::temp_dir(),
            device: None,
            double_step: false,
            retries: 0,
        }
    }
}

/// What DTC reports about itself and attached boards.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DtcListing {
    pub version: Option<String>,
    pub devices: usize,
}

/// Parse the banner and device listing printed by DTC.
pub fn parse_listing(text: &str) -> DtcListing {
    let version = Regex::new(r"(?i)DiskTool Console,?\s+v?([0-9][0-9A-Za-z._\-]*)")
        .ok()
        .and_then(|re| re.captures(text).map(|c| c[1].to_string()));
    let devices = Regex::new(r"(?im)^\s*(?:device\s*)?\d+\s*[:\-]\s*KryoFlux")
        .map(|re| re.find_iter(text).count())
        .unwrap_or(0);
    DtcListing { version, devices }
}

pub struct DtcAdapter {
    config: DtcConfig,
    tool: ExternalTool,
}

impl Default for DtcAdapter {
    fn default() -> Self {
        DtcAdapter::new(DtcConfig::default())
    }
}

impl DtcAdapter {
    pub const NAME: &'static str = "kryoflux-dtc";

    pub fn new(config: DtcConfig) -> Self {
        let tool = ExternalTool::new(config.executable.clone());
        DtcAdapter { config, tool }
    }

    pub fn config(&self) -> &DtcConfig {
        &self.config
    }

    /// Arguments for a stream capture of cylinders `first..=last` on `side` (2 for both) into
    /// `dir`. DTC appends `CC.H.raw` to the file prefix.
    pub(crate) fn capture_args(&self, dir: &Path, first: u16, last: u16, side: u8, revolutions: u8) -> Vec<String> {
        let mut args = vec![
            format!("-f{}", dir.join("track").display()),
            "-i0".to_string(),
            format!("-s{}", first),
            format!("-e{}", last),
            format!("-g{}", side),
            format!("-r{}", revolutions.max(1)),
        ];
        if let Some(device) = self.config.device {
            args.push(format!("-d{}", device));
        }
        if self.config.double_step {
            args.push("-k2".to_string());
        }
        if self.config.retries > 0 {
            args.push(format!("-t{}", self.config.retries));
        }
        args
    }
}

impl HardwareAdapter for DtcAdapter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn capabilities(&self) -> AdapterCaps {
        AdapterCaps::READ | AdapterCaps::FLUX | AdapterCaps::INFO | AdapterCaps::HARDWARE
    }

    fn formats(&self) -> Vec<DiskImageFileFormat> {
        vec![DiskImageFileFormat::KryofluxStream]
    }

    fn init(&mut self) -> Result<(), DiskImageError> {
        self.tool.probe(&[])?;
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.tool.probe(&[]).is_ok()
    }

    fn info(&mut self) -> Result<AdapterInfo, DiskImageError> {
        let listing = parse_listing(&self.tool.probe(&["-i"])?);
        Ok(AdapterInfo {
            name: Self::NAME.to_string(),
            description: format!("KryoFlux DTC at {}, {} device(s)", self.tool.path().display(), listing.devices),
            firmware: listing.version,
            sample_clock: Some(crate::file_parsers::kryoflux::KFX_DEFAULT_SCK),
            caps: self.capabilities(),
        })
    }

    fn read_track(&mut self, key: TrackKey, revolutions: u8, cancel: &CancelFlag) -> Result<FluxBuffer, DiskImageError> {
        cancel.check()?;
        if key.half_step {
            return Err(DiskImageError::not_implemented(format!("{}: half-step capture with DTC", key)));
        }
        let dir = scratch_dir(&self.config.temp_dir, "fluxvault-dtc")?;
        let c = key.ch.c();
        self.tool.run(&self.capture_args(&dir, c, c, key.ch.h(), revolutions))?;

        let path = dir.join(track_file_name(key));
        let data = std::fs::read(&path)
            .map_err(|e| DiskImageError::io(format!("DTC produced no stream {}: {}", path.display(), e)))?;
        let flux = KfxStream::parse(&data)?.to_flux_buffer();
        let _ = std::fs::remove_dir_all(&dir);
        flux
    }

    fn read_disk(
        &mut self,
        request: &DiskRequest,
        cancel: &CancelFlag,
        callback: Option<&CaptureCallback>,
    ) -> Result<DiskImage, DiskImageError> {
        poll_progress(cancel, callback, CaptureStatus::Progress(0.0))?;
        if request.geometry.c() == 0 || request.geometry.h() == 0 {
            return Err(DiskImageError::parameter("Empty capture geometry"));
        }
        let dir = scratch_dir(&self.config.temp_dir, "fluxvault-dtc")?;
        let side = if request.geometry.h() > 1 { 2 } else { 0 };
        self.tool.run(&self.capture_args(
            &dir,
            0,
            request.geometry.c() - 1,
            side,
            request.revolutions,
        ))?;
        cancel.check()?;

        let files = KfxFormat::expand_set(&dir)?;
        log::debug!("DtcAdapter::read_disk(): DTC produced {} stream files", files.len());
        let image = KfxFormat::load_set(&files)?;
        let _ = std::fs::remove_dir_all(&dir);
        report_progress(cancel, callback, CaptureStatus::Complete);
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listing() {
        let text = "KryoFlux DiskTool Console, v3.00_lnx, built Apr 13 2018\n\
                    0: KryoFlux DiskSystem, serial 0123\n\
                    1: KryoFlux DiskSystem, serial 0456\n";
        let listing = parse_listing(text);
        assert_eq!(listing.version.as_deref(), Some("3.00_lnx"));
        assert_eq!(listing.devices, 2);
        assert_eq!(parse_listing("command not understood"), DtcListing::default());
    }

    #[test]
    fn test_capture_args() {
        let adapter = DtcAdapter::new(DtcConfig {
            device: Some(1),
            double_step: true,
            ..DtcConfig::default()
        });
        let args = adapter.capture_args(Path::new("/tmp/cap"), 0, 39, 2, 3);
        assert_eq!(args[0], "-f/tmp/cap/track");
        assert_eq!(&args[1..], &["-i0", "-s0", "-e39", "-g2", "-r3", "-d1", "-k2"]);
    }

    #[test]
    fn test_missing_dtc() {
        let mut adapter = DtcAdapter::new(DtcConfig {
            executable: PathBuf::from("/nonexistent/dtc"),
            ..DtcConfig::default()
        });
        assert!(!adapter.is_available());
        assert_eq!(adapter.info().unwrap_err().kind(), crate::ErrorKind::Io);
    }
}
