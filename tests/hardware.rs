mod common;

use common::*;
use fluxvault::{
    hardware::{
        analysis::AnalysisAdapter,
        greaseweazle::{GreaseweazleAdapter, GreaseweazleConfig},
        mock::MockGreaseweazle,
        AdapterCaps,
        AdapterRegistry,
        CaptureCallback,
        CaptureStatus,
        DiskRequest,
        HardwareAdapter,
    },
    pipeline::{Pipeline, PipelineConfig},
    DiskCh,
    DiskImage,
    DiskImageError,
    DiskMetadata,
    ErrorKind,
    TrackDataEncoding,
};
use std::{sync::Arc, time::Duration};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn mock_pipeline(mock: &MockGreaseweazle) -> Pipeline {
    let mut registry = AdapterRegistry::new();
    registry.register(Box::new(AnalysisAdapter)).unwrap();
    let config = GreaseweazleConfig {
        timeout: Duration::from_millis(50),
        ..GreaseweazleConfig::default()
    };
    registry
        .register(Box::new(GreaseweazleAdapter::with_transport(config, Box::new(mock.clone()))))
        .unwrap();
    Pipeline::with_registry(PipelineConfig::default(), registry).unwrap()
}

fn mfm_image(cylinders: u16) -> DiskImage {
    let mut image = DiskImage::new(DiskMetadata::default());
    for c in 0..cylinders {
        image.add_sector_track(DiskCh::new(c, 0), TrackDataEncoding::Mfm, mfm_sectors(c, 0));
    }
    image
}

/// Copy every written track back into the mock's read table.
fn loop_back(mock: &MockGreaseweazle, cylinders: u8) {
    for c in 0..cylinders {
        let written = mock.written_track(c, 0).unwrap();
        mock.insert_flux(c, 0, &written).unwrap();
    }
}

fn request(cylinders: u16) -> DiskRequest {
    DiskRequest {
        geometry: DiskCh::new(cylinders, 1),
        revolutions: 2,
        encoding: Some(TrackDataEncoding::Mfm),
        half_tracks: false,
    }
}

#[test]
fn test_registry_selection() {
    init();
    let mock = MockGreaseweazle::new(72_000_000);
    let pipeline = mock_pipeline(&mock);
    let registry = pipeline.registry();

    assert_eq!(registry.len(), 2);
    let flux = registry
        .find_for_capability_set(AdapterCaps::READ | AdapterCaps::FLUX)
        .unwrap();
    assert_eq!(flux.name(), GreaseweazleAdapter::NAME);
    let convert = registry.find_for_capability_set(AdapterCaps::CONVERT).unwrap();
    assert_eq!(convert.name(), AnalysisAdapter::NAME);
    assert!(registry.find_for_capability_set(AdapterCaps::SECTOR).is_none());
}

#[test]
fn test_write_then_capture() {
    init();
    let mock = MockGreaseweazle::new(72_000_000);
    let mut pipeline = mock_pipeline(&mock);

    let image = mfm_image(2);
    pipeline.write_disk(&image).unwrap();
    loop_back(&mock, 2);

    let outcome = pipeline.capture_disk(&request(2)).unwrap();
    assert!(outcome.complete);
    assert!(outcome.error.is_none());
    assert!(outcome.skipped.is_empty());
    assert_eq!(outcome.image.track_ct(), 2);

    for c in 0..2 {
        let ch = DiskCh::new(c, 0);
        for id in 1..=9u8 {
            let sector = outcome.image.read_sector(ch, id).unwrap();
            assert!(sector.is_good());
            assert_eq!(sector.data.as_slice(), &[id; 512][..]);
        }
    }
    assert!(!mock.motor_on());
}

#[test]
fn test_write_protected() {
    init();
    let mock = MockGreaseweazle::new(72_000_000);
    mock.set_write_protected(true);
    let mut pipeline = mock_pipeline(&mock);

    let err = pipeline.write_disk(&mfm_image(1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Permission);
    assert!(mock.written_track(0, 0).is_none());
}

#[test]
fn test_cancel_keeps_partial_image() {
    init();
    let mock = MockGreaseweazle::new(72_000_000);
    let mut pipeline = mock_pipeline(&mock);
    pipeline.write_disk(&mfm_image(3)).unwrap();
    loop_back(&mock, 3);

    // Decline to continue once the second track is reached.
    let callback: CaptureCallback = Arc::new(|status: CaptureStatus| match status {
        CaptureStatus::Track(key) => key.ch.c() != 1,
        _ => true,
    });
    pipeline.set_callback(Some(callback));

    let outcome = pipeline.capture_disk(&request(3)).unwrap();
    assert!(!outcome.complete);
    assert!(matches!(outcome.error, Some(DiskImageError::Cancelled)));
    assert_eq!(outcome.image.track_ct(), 1);
    assert!(outcome.image.sector(DiskCh::new(0, 0), 5).is_some());
}
