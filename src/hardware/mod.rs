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

    src/hardware/mod.rs

    Capture hardware adapters and the adapter registry.
*/

//! Capture hardware is reached through the [HardwareAdapter] trait. Each adapter advertises a set
//! of [AdapterCaps] and the container formats it can produce, and implements whichever data
//! operations its device supports. Operations an adapter does not support return
//! [DiskImageError::NotImplemented].
//!
//! Adapters are owned by an [AdapterRegistry], which selects the best available adapter for a
//! request and initializes adapters lazily on first use.
//!
//! Long-running operations poll a [CancelFlag] at track boundaries and report progress through an
//! optional [CaptureCallback]. A callback returning `false` cancels the operation.

pub mod analysis;
mod external;
pub mod fluxengine;
pub mod greaseweazle;
pub mod kryoflux_dtc;
pub mod mock;
mod registry;
pub mod xum1541;

pub use registry::{AdapterRegistry, REGISTRY_CAPACITY};

use crate::{
    file_parsers::DiskImageFileFormat,
    flux::FluxBuffer,
    track_reader::{TrackReader, TrackReaderOptions, TrackWriter, TrackWriterOptions},
    types::{DiskCh, TrackDataEncoding, TrackKey},
    DiskImage,
    DiskImageError,
};
use bitflags::bitflags;
use std::{
    fmt::{self, Display, Formatter},
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

bitflags! {
    /// The operations an adapter supports.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    #[rustfmt::skip]
    pub struct AdapterCaps: u32 {
        const READ      = 0b0000_0001; // Can read disks
        const WRITE     = 0b0000_0010; // Can write disks
        const FLUX      = 0b0000_0100; // Produces or accepts raw flux
        const BITSTREAM = 0b0000_1000; // Produces or accepts track bitstreams
        const SECTOR    = 0b0001_0000; // Produces or accepts sector images
        const CONVERT   = 0b0010_0000; // Converts between container formats
        const INFO      = 0b0100_0000; // Reports device or image information
        const HARDWARE  = 0b1000_0000; // Drives physical hardware
    }
}

impl AdapterCaps {
    /// The selection score of an adapter with these capabilities.
    pub fn score(&self) -> u32 {
        let mut score = self.bits().count_ones();
        if self.contains(AdapterCaps::HARDWARE) {
            score += 10;
        }
        if self.contains(AdapterCaps::FLUX) {
            score += 5;
        }
        score
    }
}

/// A cancellation flag shared between the caller and a running operation.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Return [DiskImageError::Cancelled] if the flag is set.
    pub fn check(&self) -> Result<(), DiskImageError> {
        if self.is_cancelled() {
            Err(DiskImageError::Cancelled)
        }
        else {
            Ok(())
        }
    }
}

/// Progress reported by long-running adapter operations.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum CaptureStatus {
    /// A track is about to be read or written.
    Track(TrackKey),
    /// Fraction of the operation completed, from 0.0 to 1.0.
    Progress(f64),
    Complete,
}

/// Progress callback. Returning `false` cancels the operation at the next track boundary.
pub type CaptureCallback = Arc<dyn Fn(CaptureStatus) -> bool + Send + Sync>;

/// Report progress without polling. A callback declining to continue sets the cancel flag.
pub(crate) fn report_progress(cancel: &CancelFlag, callback: Option<&CaptureCallback>, status: CaptureStatus) {
    if let Some(callback) = callback {
        if !callback(status) {
            cancel.cancel();
        }
    }
}

/// Poll the cancel flag and the callback at a track boundary.
pub(crate) fn poll_progress(
    cancel: &CancelFlag,
    callback: Option<&CaptureCallback>,
    status: CaptureStatus,
) -> Result<(), DiskImageError> {
    cancel.check()?;
    if let Some(callback) = callback {
        if !callback(status) {
            cancel.cancel();
            return Err(DiskImageError::Cancelled);
        }
    }
    Ok(())
}

/// The shape of a whole-disk capture.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiskRequest {
    /// Number of cylinders and heads to read.
    pub geometry: DiskCh,
    pub revolutions: u8,
    /// Encoding hint passed to the track reader.
    pub encoding: Option<TrackDataEncoding>,
    /// Also read the half-step position after each cylinder.
    pub half_tracks: bool,
}

impl Default for DiskRequest {
    fn default() -> Self {
        DiskRequest {
            geometry: DiskCh::new(35, 1),
            revolutions: 2,
            encoding: None,
            half_tracks: false,
        }
    }
}

impl DiskRequest {
    /// The track keys of the request, in read order.
    pub fn keys(&self) -> Vec<TrackKey> {
        let mut keys = Vec::new();
        for ch in self.geometry.iter() {
            keys.push(TrackKey::from(ch));
            if self.half_tracks {
                keys.push(TrackKey::new(ch.c(), ch.h(), true));
            }
        }
        keys
    }
}

/// Information reported by an adapter about itself and any attached device.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AdapterInfo {
    pub name: String,
    pub description: String,
    pub firmware: Option<String>,
    /// Flux sample clock in Hz, for flux devices.
    pub sample_clock: Option<f64>,
    pub caps: AdapterCaps,
}

impl Display for AdapterInfo {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.description)?;
        if let Some(firmware) = &self.firmware {
            write!(f, " (firmware {})", firmware)?;
        }
        if let Some(clock) = self.sample_clock {
            write!(f, " @ {:.3}MHz", clock / 1_000_000.0)?;
        }
        Ok(())
    }
}

/// A capture device, a wrapper around an external capture tool, or an analysis-only back end.
pub trait HardwareAdapter: Send {
    /// A unique name, used for selection and as the preferred-tool key.
    fn name(&self) -> &str;
    fn capabilities(&self) -> AdapterCaps;
    /// The container formats this adapter can produce or consume.
    fn formats(&self) -> Vec<DiskImageFileFormat>;

    /// Acquire the device. Called once by the registry before first use.
    fn init(&mut self) -> Result<(), DiskImageError> {
        Ok(())
    }

    /// Release the device. Called by the registry on shutdown.
    fn cleanup(&mut self) {}

    /// Probe whether the adapter can currently be used.
    fn is_available(&self) -> bool;

    fn info(&mut self) -> Result<AdapterInfo, DiskImageError>;

    /// Stop the motor and release the drive after an interrupted operation.
    fn release_drive(&mut self) {}

    fn read_track(&mut self, key: TrackKey, revolutions: u8, cancel: &CancelFlag) -> Result<FluxBuffer, DiskImageError> {
        let _ = (key, revolutions, cancel);
        Err(DiskImageError::not_implemented(format!("{}: flux track read", self.name())))
    }

    fn write_track(&mut self, key: TrackKey, flux: &FluxBuffer, cancel: &CancelFlag) -> Result<(), DiskImageError> {
        let _ = (key, flux, cancel);
        Err(DiskImageError::not_implemented(format!("{}: flux track write", self.name())))
    }

    /// Read a whole disk. The default implementation reads each track with
    /// [HardwareAdapter::read_track] and decodes it with a [TrackReader].
    fn read_disk(
        &mut self,
        request: &DiskRequest,
        cancel: &CancelFlag,
        callback: Option<&CaptureCallback>,
    ) -> Result<DiskImage, DiskImageError> {
        let result = read_tracks(self, request, cancel, callback);
        self.release_drive();
        if result.is_ok() {
            report_progress(cancel, callback, CaptureStatus::Complete);
        }
        result
    }

    /// Write a whole disk. The default implementation encodes each track with a [TrackWriter] and
    /// writes it with [HardwareAdapter::write_track].
    fn write_disk(
        &mut self,
        image: &DiskImage,
        cancel: &CancelFlag,
        callback: Option<&CaptureCallback>,
    ) -> Result<(), DiskImageError> {
        if !self.capabilities().contains(AdapterCaps::WRITE) {
            return Err(DiskImageError::not_implemented(format!("{}: disk write", self.name())));
        }
        let result = write_tracks(self, image, cancel, callback);
        self.release_drive();
        if result.is_ok() {
            report_progress(cancel, callback, CaptureStatus::Complete);
        }
        result
    }

    /// Convert a container file to another format.
    fn convert(&mut self, input: &Path, output: &Path, format: DiskImageFileFormat) -> Result<(), DiskImageError> {
        let _ = (input, output, format);
        Err(DiskImageError::not_implemented(format!("{}: conversion", self.name())))
    }
}

/// Track loop of the default [HardwareAdapter::read_disk]. The caller releases the drive.
fn read_tracks<A: HardwareAdapter + ?Sized>(
    adapter: &mut A,
    request: &DiskRequest,
    cancel: &CancelFlag,
    callback: Option<&CaptureCallback>,
) -> Result<DiskImage, DiskImageError> {
    let reader = TrackReader::new(TrackReaderOptions {
        encoding: request.encoding,
        ..TrackReaderOptions::default()
    });
    let keys = request.keys();
    let mut image = DiskImage::default();
    for (i, key) in keys.iter().enumerate() {
        poll_progress(cancel, callback, CaptureStatus::Track(*key))?;
        let flux = adapter.read_track(*key, request.revolutions, cancel)?;
        match reader.read(*key, &flux) {
            Ok(track) => {
                image.insert_track(track);
            }
            Err(e) if e.kind() == crate::ErrorKind::Format => {
                log::warn!("HardwareAdapter::read_disk(): {} could not be decoded: {}", key, e);
            }
            Err(e) => return Err(e),
        }
        report_progress(cancel, callback, CaptureStatus::Progress((i + 1) as f64 / keys.len() as f64));
    }
    Ok(image)
}

/// Track loop of the default [HardwareAdapter::write_disk]. The caller releases the drive.
fn write_tracks<A: HardwareAdapter + ?Sized>(
    adapter: &mut A,
    image: &DiskImage,
    cancel: &CancelFlag,
    callback: Option<&CaptureCallback>,
) -> Result<(), DiskImageError> {
    let mut writer = TrackWriter::new(
        TrackWriterOptions {
            disk_id: image.metadata.id.unwrap_or([0x30, 0x30]),
            ..TrackWriterOptions::default()
        },
        crate::random::WeakBitRng::default(),
    );
    let total = image.track_ct();
    for (i, track) in image.track_iter().enumerate() {
        poll_progress(cancel, callback, CaptureStatus::Track(track.key))?;
        let flux = writer.write(track)?;
        adapter.write_track(track.key, &flux, cancel)?;
        report_progress(cancel, callback, CaptureStatus::Progress((i + 1) as f64 / total as f64));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scores() {
        assert_eq!(AdapterCaps::empty().score(), 0);
        assert_eq!((AdapterCaps::CONVERT | AdapterCaps::INFO).score(), 2);
        let gw = AdapterCaps::READ | AdapterCaps::WRITE | AdapterCaps::FLUX | AdapterCaps::INFO | AdapterCaps::HARDWARE;
        assert_eq!(gw.score(), 5 + 10 + 5);
    }

    #[test]
    fn test_cancel_flag_shared() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(flag.check().is_ok());
        other.cancel();
        assert_eq!(flag.check(), Err(DiskImageError::Cancelled));
        flag.reset();
        assert!(!other.is_cancelled());
    }

    #[test]
    fn test_callback_cancels() {
        let flag = CancelFlag::new();
        let callback: CaptureCallback = Arc::new(|status| !matches!(status, CaptureStatus::Track(k) if k.ch.c() == 2));
        assert!(poll_progress(&flag, Some(&callback), CaptureStatus::Track(TrackKey::from((1, 0)))).is_ok());
        assert_eq!(
            poll_progress(&flag, Some(&callback), CaptureStatus::Track(TrackKey::from((2, 0)))),
            Err(DiskImageError::Cancelled)
        );
        assert!(flag.is_cancelled());
    }

    #[test]
    fn test_request_keys() {
        let request = DiskRequest {
            geometry: DiskCh::new(2, 2),
            half_tracks: true,
            ..DiskRequest::default()
        };
        let keys = request.keys();
        assert_eq!(keys.len(), 8);
        assert_eq!(keys[1], TrackKey::new(0, 0, true));
        assert_eq!(keys[2], TrackKey::from((0, 1)));
    }

    /// An adapter whose drive fails on every track read.
    #[derive(Default)]
    struct FailingDrive {
        reads: usize,
        released: usize,
    }

    impl HardwareAdapter for FailingDrive {
        fn name(&self) -> &str {
            "failing"
        }
        fn capabilities(&self) -> AdapterCaps {
            AdapterCaps::READ | AdapterCaps::FLUX
        }
        fn formats(&self) -> Vec<DiskImageFileFormat> {
            Vec::new()
        }
        fn is_available(&self) -> bool {
            true
        }
        fn info(&mut self) -> Result<AdapterInfo, DiskImageError> {
            Ok(AdapterInfo::default())
        }
        fn release_drive(&mut self) {
            self.released += 1;
        }
        fn read_track(&mut self, _key: TrackKey, _revs: u8, _cancel: &CancelFlag) -> Result<FluxBuffer, DiskImageError> {
            self.reads += 1;
            Err(DiskImageError::device("no index pulse"))
        }
    }

    #[test]
    fn test_read_failure_releases_drive() {
        let mut drive = FailingDrive::default();
        let completed = Arc::new(AtomicBool::new(false));
        let seen = completed.clone();
        let callback: CaptureCallback = Arc::new(move |status: CaptureStatus| {
            if matches!(status, CaptureStatus::Complete) {
                seen.store(true, Ordering::SeqCst);
            }
            true
        });
        let request = DiskRequest {
            geometry: DiskCh::new(2, 1),
            ..DiskRequest::default()
        };

        let err = drive.read_disk(&request, &CancelFlag::new(), Some(&callback)).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Io);
        assert_eq!(drive.reads, 1);
        assert_eq!(drive.released, 1);
        assert!(!completed.load(Ordering::SeqCst));

        // Cancellation before the first track also releases the drive.
        let cancel = CancelFlag::new();
        cancel.cancel();
        assert_eq!(drive.read_disk(&request, &cancel, None).unwrap_err(), DiskImageError::Cancelled);
        assert_eq!(drive.reads, 1);
        assert_eq!(drive.released, 2);
    }
}
