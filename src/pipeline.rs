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

    src/pipeline.rs

    Coordinates capture, decoding, conversion and filesystem access for a single disk.
*/

//! A [Pipeline] owns an [AdapterRegistry] and runs every stage between a capture device and a
//! container file for one disk at a time:
//!
//! ```text
//! adapter.read_track() -> FluxBuffer -> TrackReader -> TrackRecord -> DiskImage -> container
//! ```
//!
//! Tracks whose sectors fail with a recoverable fault are captured again up to
//! [PipelineConfig::retries] times and the re-reads merged. Fatal errors abandon a capture and
//! return the tracks read so far in a [CaptureOutcome] marked incomplete.
//!
//! A pipeline is single-threaded. Independent pipelines may run on separate threads, each with
//! its own registry.

use crate::{
    file_parsers::{format_from_ext, DiskImageFileFormat},
    file_system::{
        cbm::{self, CbmFileSystem},
        cpm::{self, CpmFileSystem},
        FileEntry,
        FileSystem,
        FileSystemError,
        FsFinding,
    },
    hardware::{
        poll_progress,
        report_progress,
        AdapterCaps,
        AdapterRegistry,
        CancelFlag,
        CaptureCallback,
        CaptureStatus,
        DiskRequest,
        HardwareAdapter,
    },
    io::Cursor,
    track_reader::{TrackReader, TrackReaderOptions, TrackRecord},
    types::{ContainerBytes, TrackDataEncoding, TrackKey},
    DiskImage,
    DiskImageError,
    DosFlavor,
    ErrorKind,
    DETAIL_STRING_LEN,
};
use std::{
    fmt::{self, Display, Formatter},
    path::{Path, PathBuf},
};

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PipelineConfig {
    /// Re-captures attempted for a track with recoverable sector faults.
    pub retries: u8,
    /// Revolutions captured per read.
    pub revolutions: u8,
    /// Adapter to use whenever it can satisfy a request.
    pub preferred_tool: Option<String>,
    /// Track encoding, if known. Detected per track otherwise.
    pub encoding: Option<TrackDataEncoding>,
    /// Maximum length of detail strings in reports. Must be at least [DETAIL_STRING_LEN].
    pub detail_len: usize,
    pub reader: TrackReaderOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            retries: 3,
            revolutions: 2,
            preferred_tool: None,
            encoding: None,
            detail_len: DETAIL_STRING_LEN,
            reader: TrackReaderOptions::default(),
        }
    }
}

/// The result of a disk capture. A fatal error stops the capture; the tracks read before it are
/// kept and `complete` is false.
#[derive(Debug)]
pub struct CaptureOutcome {
    pub image: DiskImage,
    pub complete: bool,
    pub error: Option<DiskImageError>,
    /// Tracks that produced no decodable data.
    pub skipped: Vec<TrackKey>,
}

/// One sector that did not read cleanly.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SectorFailure {
    pub track: TrackKey,
    pub sector_id: u8,
    pub reason: String,
}

impl Display for SectorFailure {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{} sector {}: {}", self.track, self.sector_id, self.reason)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ValidationReport {
    pub tracks: usize,
    pub sectors: usize,
    pub sector_failures: Vec<SectorFailure>,
    /// Name of the filesystem that was checked, if one was found.
    pub filesystem: Option<String>,
    pub files_checked: usize,
    pub fs_findings: Vec<FsFinding>,
    pub complete: bool,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.complete && self.sector_failures.is_empty() && self.fs_findings.is_empty()
    }
}

impl Display for ValidationReport {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        writeln!(
            f,
            "{} tracks, {} sectors, {} bad sectors{}",
            self.tracks,
            self.sectors,
            self.sector_failures.len(),
            if self.complete { "" } else { " (incomplete image)" }
        )?;
        for failure in &self.sector_failures {
            writeln!(f, "  {}", failure)?;
        }
        match &self.filesystem {
            Some(fs) => writeln!(
                f,
                "{}: {} files checked, {} problems",
                fs,
                self.files_checked,
                self.fs_findings.len()
            )?,
            None => writeln!(f, "No filesystem found")?,
        }
        for finding in &self.fs_findings {
            writeln!(f, "  {}", finding)?;
        }
        write!(f, "{}", if self.passed() { "PASSED" } else { "FAILED" })
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    registry: AdapterRegistry,
    cancel: CancelFlag,
    callback: Option<CaptureCallback>,
}

impl Pipeline {
    /// Create a pipeline using the default set of adapters.
    pub fn new(config: PipelineConfig) -> Result<Self, DiskImageError> {
        Pipeline::with_registry(config, AdapterRegistry::with_defaults())
    }

    pub fn with_registry(config: PipelineConfig, mut registry: AdapterRegistry) -> Result<Self, DiskImageError> {
        if config.detail_len < DETAIL_STRING_LEN {
            return Err(DiskImageError::parameter(format!(
                "detail_len must be at least {}, got {}",
                DETAIL_STRING_LEN, config.detail_len
            )));
        }
        if config.revolutions == 0 {
            return Err(DiskImageError::parameter("At least one revolution must be captured"));
        }
        registry.set_preferred_tool(config.preferred_tool.as_deref());
        Ok(Pipeline {
            config,
            registry,
            cancel: CancelFlag::new(),
            callback: None,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut AdapterRegistry {
        &mut self.registry
    }

    /// A handle to this pipeline's cancel flag. Cancelling it stops the running capture at the
    /// next track boundary.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Install a progress callback. Returning false from the callback cancels the operation.
    pub fn set_callback(&mut self, callback: Option<CaptureCallback>) {
        self.callback = callback;
    }

    fn reader(&self, key: TrackKey) -> TrackReader {
        TrackReader::new(TrackReaderOptions {
            encoding: self.config.encoding.or(self.config.reader.encoding),
            expected_ch: Some(key.ch),
            ..self.config.reader.clone()
        })
    }

    fn detail(&self, text: impl Into<String>) -> String {
        let text = text.into();
        if text.chars().count() <= self.config.detail_len {
            text
        }
        else {
            text.chars().take(self.config.detail_len).collect()
        }
    }

    /// Capture and decode a single track with the best available flux-capable adapter.
    pub fn capture_track(&mut self, key: TrackKey) -> Result<TrackRecord, DiskImageError> {
        let reader = self.reader(key);
        let (retries, revolutions) = (self.config.retries, self.config.revolutions);
        let adapter = self.registry.acquire_for(AdapterCaps::READ | AdapterCaps::FLUX)?;
        let result = capture_with_retries(adapter, &reader, key, revolutions, retries, &self.cancel);
        adapter.release_drive();
        result
    }

    /// Capture a whole disk. Adapters without flux access read the disk in one operation.
    pub fn capture_disk(&mut self, request: &DiskRequest) -> Result<CaptureOutcome, DiskImageError> {
        self.cancel.reset();
        let request = DiskRequest {
            encoding: request.encoding.or(self.config.encoding),
            ..request.clone()
        };

        if self
            .registry
            .find_for_capability_set(AdapterCaps::READ | AdapterCaps::FLUX)
            .is_none()
        {
            let adapter = self.registry.acquire_for(AdapterCaps::READ)?;
            log::debug!("Pipeline::capture_disk(): {} has no flux access, reading whole disk", adapter.name());
            let image = adapter.read_disk(&request, &self.cancel, self.callback.as_ref())?;
            return Ok(CaptureOutcome {
                image,
                complete: true,
                error: None,
                skipped: Vec::new(),
            });
        }

        let keys = request.keys();
        let readers: Vec<TrackReader> = keys.iter().map(|key| self.reader(*key)).collect();
        let (retries, revolutions) = (self.config.retries, request.revolutions.max(1));
        let cancel = self.cancel.clone();
        let callback = self.callback.clone();
        let adapter = self.registry.acquire_for(AdapterCaps::READ | AdapterCaps::FLUX)?;
        log::debug!(
            "Pipeline::capture_disk(): capturing {} tracks with {}",
            keys.len(),
            adapter.name()
        );

        let mut image = DiskImage::default();
        let mut skipped = Vec::new();
        let mut error = None;

        for (i, (key, reader)) in keys.iter().zip(readers.iter()).enumerate() {
            if let Err(e) = poll_progress(&cancel, callback.as_ref(), CaptureStatus::Track(*key)) {
                error = Some(e);
                break;
            }
            match capture_with_retries(adapter, reader, *key, revolutions, retries, &cancel) {
                Ok(track) => {
                    image.insert_track(track);
                }
                Err(e) if e.kind() == ErrorKind::Format => {
                    log::warn!("Pipeline::capture_disk(): {} could not be decoded: {}", key, e);
                    skipped.push(*key);
                }
                Err(e) => {
                    log::error!("Pipeline::capture_disk(): capture abandoned at {}: {}", key, e);
                    error = Some(e);
                    break;
                }
            }
            report_progress(
                &cancel,
                callback.as_ref(),
                CaptureStatus::Progress((i + 1) as f64 / keys.len() as f64),
            );
        }
        adapter.release_drive();

        let complete = error.is_none();
        if complete {
            report_progress(&cancel, callback.as_ref(), CaptureStatus::Complete);
        }
        else {
            image.flags.insert(crate::types::DiskImageFlags::INCOMPLETE);
        }
        if image.dominant_encoding() == Some(TrackDataEncoding::GcrCbm) {
            image.metadata.dos_flavor = DosFlavor::Cbm1541;
        }
        Ok(CaptureOutcome {
            image,
            complete,
            error,
            skipped,
        })
    }

    /// Write a disk image to media with the best available writing adapter.
    pub fn write_disk(&mut self, image: &DiskImage) -> Result<(), DiskImageError> {
        self.cancel.reset();
        let adapter = self.registry.acquire_for(AdapterCaps::WRITE)?;
        adapter.write_disk(image, &self.cancel, self.callback.as_ref())
    }

    /// Parse container bytes. The format is detected if not given.
    pub fn decode_container(
        bytes: &ContainerBytes,
        format: Option<DiskImageFileFormat>,
    ) -> Result<DiskImage, DiskImageError> {
        let mut reader = bytes.reader();
        match format {
            Some(format) => DiskImage::load_as(format, &mut reader),
            None => DiskImage::load(&mut reader),
        }
    }

    /// Serialize a disk image into a container.
    pub fn emit_container(image: &mut DiskImage, format: DiskImageFileFormat) -> Result<ContainerBytes, DiskImageError> {
        let mut out = Cursor::new(Vec::new());
        image.save(format, &mut out)?;
        Ok(ContainerBytes::from(out.into_inner()))
    }

    /// Convert a container file to another container with a conversion-capable adapter. The
    /// output format is taken from the output's extension if not given.
    pub fn convert(
        &mut self,
        input: &Path,
        output: &Path,
        format: Option<DiskImageFileFormat>,
    ) -> Result<(), DiskImageError> {
        let format = match format {
            Some(format) => format,
            None => output
                .extension()
                .and_then(|ext| ext.to_str())
                .and_then(format_from_ext)
                .ok_or_else(|| {
                    DiskImageError::parameter(format!("Cannot determine a format for {}", output.display()))
                })?,
        };
        let adapter = self.registry.acquire_for(AdapterCaps::CONVERT)?;
        adapter.convert(input, output, format)
    }

    /// Load an image file, or a directory of KryoFlux stream files.
    pub fn open(path: &Path) -> Result<DiskImage, DiskImageError> {
        DiskImage::load_path(path)
    }

    /// Save an image, returning the files written.
    pub fn save(
        image: &mut DiskImage,
        path: &Path,
        format: Option<DiskImageFileFormat>,
    ) -> Result<Vec<PathBuf>, DiskImageError> {
        image.save_path(path, format)
    }

    pub fn fs_list(image: &DiskImage) -> Result<Vec<FileEntry>, DiskImageError> {
        Ok(mount(image)?.list()?)
    }

    pub fn fs_extract(image: &DiskImage, name: &str) -> Result<Vec<u8>, DiskImageError> {
        Ok(mount(image)?.extract(name)?)
    }

    pub fn fs_inject(image: &mut DiskImage, name: &str, data: &[u8]) -> Result<(), DiskImageError> {
        Ok(mount_mut(image)?.inject(name, data)?)
    }

    pub fn fs_delete(image: &mut DiskImage, name: &str) -> Result<(), DiskImageError> {
        Ok(mount_mut(image)?.delete(name)?)
    }

    /// Check every sector and, if a filesystem is found, the filesystem structure.
    pub fn validate(&self, image: &DiskImage) -> Result<ValidationReport, DiskImageError> {
        image.check_invariants()?;

        let mut report = ValidationReport {
            tracks: image.track_ct(),
            sectors: image.sector_ct(),
            complete: image.is_complete(),
            ..ValidationReport::default()
        };
        for track in image.track_iter() {
            for sector in track.failed_sectors() {
                let reason = match sector.fault {
                    Some(fault) => fault.to_string(),
                    None => format!("header {} data {}", sector.header_crc, sector.data_crc),
                };
                report.sector_failures.push(SectorFailure {
                    track: track.key,
                    sector_id: sector.sector_id,
                    reason: self.detail(reason),
                });
            }
        }

        match mount(image) {
            Ok(fs) => {
                let validation = fs.validate()?;
                report.filesystem = Some(filesystem_name(image));
                report.files_checked = validation.files_checked;
                report.fs_findings = validation
                    .findings
                    .into_iter()
                    .map(|mut finding| {
                        finding.detail = self.detail(finding.detail);
                        finding
                    })
                    .collect();
            }
            Err(e) if e.kind() == ErrorKind::Format => {
                log::debug!("Pipeline::validate(): no filesystem: {}", e);
            }
            Err(e) => return Err(e),
        }

        log::debug!(
            "Pipeline::validate(): {} sector failures, {} filesystem findings",
            report.sector_failures.len(),
            report.fs_findings.len()
        );
        Ok(report)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.registry.shutdown();
    }
}

/// Read and decode a track, re-reading while any sector has a recoverable fault. Later reads are
/// merged into the first.
fn capture_with_retries(
    adapter: &mut dyn HardwareAdapter,
    reader: &TrackReader,
    key: TrackKey,
    revolutions: u8,
    retries: u8,
    cancel: &CancelFlag,
) -> Result<TrackRecord, DiskImageError> {
    let mut best: Option<TrackRecord> = None;
    let mut last_error = None;

    for attempt in 0..=retries {
        cancel.check()?;
        let result = adapter
            .read_track(key, revolutions, cancel)
            .and_then(|flux| reader.read(key, &flux));
        match result {
            Ok(track) => match best.as_mut() {
                Some(best) => {
                    let replaced = best.merge_retry(&track);
                    log::debug!(
                        "capture_with_retries(): {} attempt {} recovered {} sector(s)",
                        key,
                        attempt,
                        replaced
                    );
                }
                None => best = Some(track),
            },
            Err(e) if e.is_recoverable() => {
                log::warn!("capture_with_retries(): {} attempt {}: {}", key, attempt, e);
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }

        if best.as_ref().map(|t| !t.needs_retry()).unwrap_or(false) {
            break;
        }
    }

    match (best, last_error) {
        (Some(track), _) => {
            let failed = track.failed_sectors().count();
            if failed > 0 {
                log::warn!("capture_with_retries(): {} has {} bad sector(s) after retries", key, failed);
            }
            Ok(track)
        }
        (None, Some(e)) => Err(e),
        (None, None) => Err(DiskImageError::SyncNotFound),
    }
}

fn is_cbm(image: &DiskImage) -> bool {
    image.metadata.dos_flavor.is_cbm() || cbm::detect_geometry(image).is_some()
}

fn filesystem_name(image: &DiskImage) -> String {
    if is_cbm(image) {
        match cbm::detect_geometry(image) {
            Some(geometry) => format!("CBM DOS ({})", geometry),
            None => image.metadata.dos_flavor.to_string(),
        }
    }
    else {
        match cpm::detect_dpb(image) {
            Some(dpb) => format!("CP/M ({})", dpb.name),
            None => DosFlavor::Cpm.to_string(),
        }
    }
}

/// Mount the filesystem found on `image` for reading.
pub fn mount(image: &DiskImage) -> Result<Box<dyn FileSystem + '_>, DiskImageError> {
    if is_cbm(image) {
        return Ok(Box::new(CbmFileSystem::mount(image)?));
    }
    if image.metadata.dos_flavor == DosFlavor::Cpm || cpm::detect_dpb(image).is_some() {
        return Ok(Box::new(CpmFileSystem::mount(image)?));
    }
    Err(FileSystemError::UnsupportedImage("no CBM or CP/M filesystem found".to_string()).into())
}

/// Mount the filesystem found on `image` for reading and writing.
pub fn mount_mut(image: &mut DiskImage) -> Result<Box<dyn FileSystem + '_>, DiskImageError> {
    if is_cbm(image) {
        return Ok(Box::new(CbmFileSystem::mount_mut(image)?));
    }
    if image.metadata.dos_flavor == DosFlavor::Cpm || cpm::detect_dpb(image).is_some() {
        return Ok(Box::new(CpmFileSystem::mount_mut(image)?));
    }
    Err(FileSystemError::UnsupportedImage("no CBM or CP/M filesystem found".to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        file_system::cbm::CbmGeometry,
        hardware::{
            greaseweazle::{GreaseweazleAdapter, GreaseweazleConfig},
            mock::MockGreaseweazle,
        },
        random::WeakBitRng,
        track_reader::{SectorRecord, TrackWriter, TrackWriterOptions},
        types::{DiskCh, SectorBytes, SectorFault},
    };
    use std::time::Duration;

    const CLOCK: u32 = 24_000_000;

    fn pipeline(mock: &MockGreaseweazle) -> Pipeline {
        let mut registry = AdapterRegistry::new();
        registry
            .register(Box::new(GreaseweazleAdapter::with_transport(
                GreaseweazleConfig {
                    timeout: Duration::from_millis(50),
                    ..GreaseweazleConfig::default()
                },
                Box::new(mock.clone()),
            )))
            .unwrap();
        Pipeline::with_registry(
            PipelineConfig {
                revolutions: 1,
                ..PipelineConfig::default()
            },
            registry,
        )
        .unwrap()
    }

    fn mfm_revolution(c: u16, h: u8, bad_sector: Option<u8>) -> Vec<u32> {
        let sectors: Vec<_> = (1..=9)
            .map(|id| {
                let mut s = SectorRecord::new(c, h, id, SectorBytes::filled(512, id));
                if Some(id) == bad_sector {
                    s.fault = Some(SectorFault::DataChecksum);
                }
                s
            })
            .collect();
        let track = TrackRecord::from_sectors(TrackKey::from((c, h)), TrackDataEncoding::Mfm, sectors);
        let mut writer = TrackWriter::new(
            TrackWriterOptions {
                sample_clock: CLOCK as f64,
                ..TrackWriterOptions::default()
            },
            WeakBitRng::default(),
        );
        writer.write(&track).unwrap().revolution(0).unwrap()
    }

    #[test]
    fn test_config_rejects_short_detail() {
        let config = PipelineConfig {
            detail_len: 64,
            ..PipelineConfig::default()
        };
        let err = Pipeline::with_registry(config, AdapterRegistry::new()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_capture_track_retries_until_good() {
        let mock = MockGreaseweazle::new(CLOCK);
        mock.queue_reads(0, 0, vec![mfm_revolution(0, 0, Some(5)), mfm_revolution(0, 0, None)]);
        let mut p = pipeline(&mock);

        let track = p.capture_track(TrackKey::from((0, 0))).unwrap();
        assert_eq!(track.sectors.len(), 9);
        assert!(track.sectors.iter().all(|s| s.is_good()));
        assert!(!track.needs_retry());
        assert!(!mock.motor_on());
    }

    #[test]
    fn test_capture_track_gives_up_after_retries() {
        let mock = MockGreaseweazle::new(CLOCK);
        mock.insert_track(0, 0, mfm_revolution(0, 0, Some(2)));
        let mut p = pipeline(&mock);

        let track = p.capture_track(TrackKey::from((0, 0))).unwrap();
        assert_eq!(track.failed_sectors().count(), 1);
        assert_eq!(track.failed_sectors().next().unwrap().sector_id, 2);
    }

    #[test]
    fn test_capture_disk_partial_on_disconnect() {
        let mock = MockGreaseweazle::new(CLOCK);
        for c in 0..3 {
            mock.insert_track(c as u8, 0, mfm_revolution(c, 0, None));
        }
        let mut p = pipeline(&mock);
        // Establish the adapter, then let the device drop off part way through the disk.
        p.capture_track(TrackKey::from((0, 0))).unwrap();
        mock.disconnect_after(8);

        let request = DiskRequest {
            geometry: DiskCh::new(3, 1),
            revolutions: 1,
            ..DiskRequest::default()
        };
        let outcome = p.capture_disk(&request).unwrap();
        assert!(!outcome.complete);
        assert!(outcome.error.is_some());
        assert!(!outcome.image.is_complete());
        assert!(outcome.image.track_ct() < 3);
    }

    #[test]
    fn test_capture_disk_cancelled_by_callback() {
        let mock = MockGreaseweazle::new(CLOCK);
        mock.insert_track(0, 0, mfm_revolution(0, 0, None));
        let mut p = pipeline(&mock);
        let stop_after_first: CaptureCallback =
            std::sync::Arc::new(|status: CaptureStatus| !matches!(status, CaptureStatus::Progress(_)));
        p.set_callback(Some(stop_after_first));

        let outcome = p.capture_disk(&DiskRequest::default()).unwrap();
        assert!(!outcome.complete);
        assert_eq!(outcome.error.unwrap().kind(), ErrorKind::Cancelled);
        assert_eq!(outcome.image.track_ct(), 1);
    }

    #[test]
    fn test_container_and_fs_round_trip() {
        let mut image = CbmFileSystem::format(CbmGeometry::D64_35, "PIPELINE", "PL").unwrap();
        Pipeline::fs_inject(&mut image, "HELLO", b"HELLO WORLD").unwrap();

        let bytes = Pipeline::emit_container(&mut image, DiskImageFileFormat::D64).unwrap();
        assert_eq!(bytes.len(), 174_848);
        let loaded = Pipeline::decode_container(&bytes, None).unwrap();

        let names: Vec<String> = Pipeline::fs_list(&loaded)
            .unwrap()
            .iter()
            .map(|e| e.name().to_string())
            .collect();
        assert_eq!(names, vec!["HELLO"]);
        assert_eq!(Pipeline::fs_extract(&loaded, "HELLO").unwrap(), b"HELLO WORLD");

        let p = Pipeline::with_registry(PipelineConfig::default(), AdapterRegistry::new()).unwrap();
        let report = p.validate(&loaded).unwrap();
        assert!(report.passed(), "{}", report);
        assert_eq!(report.files_checked, 1);
    }

    #[test]
    fn test_validate_reports_bad_sectors() {
        let mut image = DiskImage::default();
        let mut sectors: Vec<_> = (0..4)
            .map(|id| SectorRecord::new(0, 0, id, SectorBytes::filled(256, 0)))
            .collect();
        sectors[1].fault = Some(SectorFault::DataNotFound);
        image.add_sector_track(DiskCh::new(0, 0), TrackDataEncoding::Mfm, sectors);

        let p = Pipeline::with_registry(PipelineConfig::default(), AdapterRegistry::new()).unwrap();
        let report = p.validate(&image).unwrap();
        assert!(!report.passed());
        assert_eq!(report.sector_failures.len(), 1);
        assert_eq!(report.sector_failures[0].reason, "data_not_found");
        assert!(report.filesystem.is_none());
    }
}
