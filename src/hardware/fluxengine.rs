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

    src/hardware/fluxengine.rs

    FluxEngine-class capture through the fluxengine command-line client.
*/

//! The FluxEngine client reads and writes whole disks given a named format profile. This adapter
//! runs the client with a scratch file in one of our sector containers and loads the result.

use crate::{
    file_parsers::{DiskImageFileFormat, ImageParser},
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
    io::Cursor,
    DiskImage,
    DiskImageError,
};
use std::{fs::File, path::PathBuf};

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FluxEngineConfig {
    pub executable: PathBuf,
    /// The FluxEngine format profile, such as `commodore1541`.
    pub profile: String,
    /// The container the client is asked to produce. Selected by file extension.
    pub image_format: DiskImageFileFormat,
    /// Directory for scratch images.
    pub temp_dir: PathBuf,
    /// Additional arguments passed through to the client.
    pub extra_args: Vec<String>,
}

impl Default for FluxEngineConfig {
    fn default() -> Self {
        FluxEngineConfig {
            executable: PathBuf::from("fluxengine"),
            profile: "commodore1541".to_string(),
            image_format: DiskImageFileFormat::D64,
            temp_dir: std::env::temp_dir(),
            extra_args: Vec::new(),
        }
    }
}

pub struct FluxEngineAdapter {
    config: FluxEngineConfig,
    tool: ExternalTool,
}

impl Default for FluxEngineAdapter {
    fn default() -> Self {
        FluxEngineAdapter::new(FluxEngineConfig::default())
    }
}

impl FluxEngineAdapter {
    pub const NAME: &'static str = "fluxengine";

    pub fn new(config: FluxEngineConfig) -> Self {
        let tool = ExternalTool::new(config.executable.clone());
        FluxEngineAdapter { config, tool }
    }

    pub fn config(&self) -> &FluxEngineConfig {
        &self.config
    }

    fn scratch_image(&self) -> Result<PathBuf, DiskImageError> {
        let dir = scratch_dir(&self.config.temp_dir, "fluxvault-fe")?;
        let ext = self.config.image_format.extensions().first().copied().unwrap_or("img");
        Ok(dir.join(format!("disk.{}", ext)))
    }

    /// Arguments for a read into `path`.
    pub(crate) fn read_args(&self, path: &str) -> Vec<String> {
        let mut args = vec![
            "read".to_string(),
            self.config.profile.clone(),
            "-o".to_string(),
            path.to_string(),
        ];
        args.extend(self.config.extra_args.iter().cloned());
        args
    }

    /// Arguments for a write from `path`.
    pub(crate) fn write_args(&self, path: &str) -> Vec<String> {
        let mut args = vec![
            "write".to_string(),
            self.config.profile.clone(),
            "-i".to_string(),
            path.to_string(),
        ];
        args.extend(self.config.extra_args.iter().cloned());
        args
    }
}

impl HardwareAdapter for FluxEngineAdapter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn capabilities(&self) -> AdapterCaps {
        AdapterCaps::READ | AdapterCaps::WRITE | AdapterCaps::SECTOR | AdapterCaps::INFO | AdapterCaps::HARDWARE
    }

    fn formats(&self) -> Vec<DiskImageFileFormat> {
        vec![self.config.image_format]
    }

    fn init(&mut self) -> Result<(), DiskImageError> {
        self.tool.probe(&[])?;
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.tool.probe(&[]).is_ok()
    }

    fn info(&mut self) -> Result<AdapterInfo, DiskImageError> {
        let banner = self.tool.probe(&[])?;
        let description = banner
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("FluxEngine client")
            .to_string();
        Ok(AdapterInfo {
            name: Self::NAME.to_string(),
            description: crate::bounded_detail(description),
            firmware: None,
            sample_clock: None,
            caps: self.capabilities(),
        })
    }

    fn read_disk(
        &mut self,
        request: &DiskRequest,
        cancel: &CancelFlag,
        callback: Option<&CaptureCallback>,
    ) -> Result<DiskImage, DiskImageError> {
        poll_progress(cancel, callback, CaptureStatus::Progress(0.0))?;
        let path = self.scratch_image()?;
        log::debug!(
            "FluxEngineAdapter::read_disk(): reading {} with profile {} into {}",
            request.geometry,
            self.config.profile,
            path.display()
        );
        self.tool.run(&self.read_args(&path.to_string_lossy()))?;
        cancel.check()?;

        let mut file = File::open(&path)?;
        let image = DiskImage::load_as(self.config.image_format, &mut file)?;
        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
        report_progress(cancel, callback, CaptureStatus::Complete);
        Ok(image)
    }

    fn write_disk(
        &mut self,
        image: &DiskImage,
        cancel: &CancelFlag,
        callback: Option<&CaptureCallback>,
    ) -> Result<(), DiskImageError> {
        poll_progress(cancel, callback, CaptureStatus::Progress(0.0))?;
        let path = self.scratch_image()?;
        let mut buf = Cursor::new(Vec::new());
        image.clone().save(self.config.image_format, &mut buf)?;
        std::fs::write(&path, buf.into_inner())?;

        self.tool.run(&self.write_args(&path.to_string_lossy()))?;
        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
        report_progress(cancel, callback, CaptureStatus::Complete);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arguments() {
        let adapter = FluxEngineAdapter::new(FluxEngineConfig {
            extra_args: vec!["--drive.revolutions=3".to_string()],
            ..FluxEngineConfig::default()
        });
        assert_eq!(
            adapter.read_args("/tmp/disk.d64"),
            vec!["read", "commodore1541", "-o", "/tmp/disk.d64", "--drive.revolutions=3"]
        );
        assert_eq!(adapter.write_args("x.d64")[..3], ["write", "commodore1541", "-i"]);
        assert_eq!(adapter.formats(), vec![DiskImageFileFormat::D64]);
    }

    #[test]
    fn test_missing_client() {
        let mut adapter = FluxEngineAdapter::new(FluxEngineConfig {
            executable: PathBuf::from("/nonexistent/fluxengine"),
            ..FluxEngineConfig::default()
        });
        assert!(!adapter.is_available());
        assert_eq!(adapter.init().unwrap_err().kind(), crate::ErrorKind::Io);
        let err = adapter
            .read_track(crate::TrackKey::from((0, 0)), 1, &CancelFlag::new())
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotImplemented);
    }
}
