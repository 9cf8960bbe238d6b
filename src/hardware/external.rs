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

    src/hardware/external.rs

    Runs external capture tools as subprocesses.
*/

use crate::DiskImageError;
use std::{
    path::{Path, PathBuf},
    process::{Command, Output, Stdio},
    sync::atomic::{AtomicUsize, Ordering},
};

static SCRATCH_SEQ: AtomicUsize = AtomicUsize::new(0);

/// An external program driven by an adapter.
#[derive(Clone, Debug)]
pub(crate) struct ExternalTool {
    executable: PathBuf,
}

impl ExternalTool {
    pub(crate) fn new(executable: impl Into<PathBuf>) -> Self {
        ExternalTool {
            executable: executable.into(),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.executable
    }

    /// Run the tool and return everything it printed. The exit status is not checked; a tool that
    /// cannot be started is an I/O error.
    pub(crate) fn probe(&self, args: &[&str]) -> Result<String, DiskImageError> {
        let output = Command::new(&self.executable)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| DiskImageError::io(format!("failed to execute {}: {}", self.executable.display(), e)))?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }

    /// Run the tool to completion. A non-zero exit status is reported as a device error carrying
    /// the tool's error output.
    pub(crate) fn run(&self, args: &[String]) -> Result<Output, DiskImageError> {
        log::debug!("ExternalTool::run(): {} {}", self.executable.display(), args.join(" "));
        let output = Command::new(&self.executable)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| DiskImageError::io(format!("failed to execute {}: {}", self.executable.display(), e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DiskImageError::device(format!(
                "{} exited with {}: {}",
                self.executable.display(),
                output.status,
                stderr.trim()
            )));
        }
        Ok(output)
    }
}

/// Create a fresh scratch directory for one tool invocation.
pub(crate) fn scratch_dir(base: &Path, name: &str) -> Result<PathBuf, DiskImageError> {
    let seq = SCRATCH_SEQ.fetch_add(1, Ordering::Relaxed);
    let dir = base.join(format!("{}-{}-{}", name, std::process::id(), seq));
    if dir.exists() {
        std::fs::remove_dir_all(&dir)?;
    }
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_executable_is_io_error() {
        let tool = ExternalTool::new("/nonexistent/fluxvault-no-such-tool");
        assert_eq!(tool.probe(&[]).unwrap_err().kind(), crate::ErrorKind::Io);
        assert_eq!(tool.run(&[]).unwrap_err().kind(), crate::ErrorKind::Io);
    }
}
