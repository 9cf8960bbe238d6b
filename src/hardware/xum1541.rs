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

    src/hardware/xum1541.rs

    XUM1541 / OpenCBM drive access.
*/

//! Commodore drives attached through an XUM1541 or similar cable are reached through OpenCBM.
//! Only the presence of OpenCBM is probed, once; transfers are not supported, and every data
//! operation reports [DiskImageError::NotImplemented].

use crate::{
    file_parsers::DiskImageFileFormat,
    hardware::{external::ExternalTool, AdapterCaps, AdapterInfo, CancelFlag, CaptureCallback, DiskRequest, HardwareAdapter},
    DiskImage,
    DiskImageError,
};
use std::{cell::OnceCell, path::PathBuf};

pub struct Xum1541Adapter {
    tool: ExternalTool,
    /// Result of the OpenCBM probe: the detection output, or `None` if OpenCBM is missing.
    probe: OnceCell<Option<String>>,
}

impl Default for Xum1541Adapter {
    fn default() -> Self {
        Xum1541Adapter::new(PathBuf::from("cbmctrl"))
    }
}

impl Xum1541Adapter {
    pub const NAME: &'static str = "xum1541";

    /// Create an adapter probing OpenCBM through the given `cbmctrl` executable.
    pub fn new(cbmctrl: PathBuf) -> Self {
        Xum1541Adapter {
            tool: ExternalTool::new(cbmctrl),
            probe: OnceCell::new(),
        }
    }

    fn probe(&self) -> Option<&str> {
        self.probe
            .get_or_init(|| match self.tool.probe(&["detect"]) {
                Ok(text) => Some(text),
                Err(e) => {
                    log::debug!("Xum1541Adapter::probe(): OpenCBM not found: {}", e);
                    None
                }
            })
            .as_deref()
    }

    fn unsupported(&self, what: &str) -> DiskImageError {
        DiskImageError::not_implemented(format!("{}: {} through OpenCBM", Self::NAME, what))
    }
}

impl HardwareAdapter for Xum1541Adapter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn capabilities(&self) -> AdapterCaps {
        AdapterCaps::READ | AdapterCaps::WRITE | AdapterCaps::SECTOR | AdapterCaps::HARDWARE
    }

    fn formats(&self) -> Vec<DiskImageFileFormat> {
        vec![DiskImageFileFormat::D64, DiskImageFileFormat::D71, DiskImageFileFormat::D81]
    }

    fn init(&mut self) -> Result<(), DiskImageError> {
        match self.probe() {
            Some(_) => Ok(()),
            None => Err(self.unsupported("drive access")),
        }
    }

    fn is_available(&self) -> bool {
        self.probe().is_some()
    }

    fn info(&mut self) -> Result<AdapterInfo, DiskImageError> {
        let Some(detected) = self.probe()
        else {
            return Err(self.unsupported("drive detection"));
        };
        let description = detected
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("no drives detected")
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
        _request: &DiskRequest,
        _cancel: &CancelFlag,
        _callback: Option<&CaptureCallback>,
    ) -> Result<DiskImage, DiskImageError> {
        Err(self.unsupported("disk read"))
    }

    fn write_disk(
        &mut self,
        _image: &DiskImage,
        _cancel: &CancelFlag,
        _callback: Option<&CaptureCallback>,
    ) -> Result<(), DiskImageError> {
        Err(self.unsupported("disk write"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_without_opencbm() {
        let mut adapter = Xum1541Adapter::new(PathBuf::from("/nonexistent/cbmctrl"));
        assert!(!adapter.is_available());
        assert_eq!(adapter.init().unwrap_err().kind(), crate::ErrorKind::NotImplemented);
        assert_eq!(adapter.info().unwrap_err().kind(), crate::ErrorKind::NotImplemented);
        let err = adapter
            .read_disk(&DiskRequest::default(), &CancelFlag::new(), None)
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotImplemented);
    }
}
