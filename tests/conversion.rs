mod common;

use common::*;
use fluxvault::{
    file_parsers::detect_format,
    hardware::{analysis::AnalysisAdapter, AdapterRegistry},
    pipeline::{Pipeline, PipelineConfig},
    track_reader::SectorRecord,
    DiskCh,
    DiskImage,
    DiskImageFileFormat,
    DiskMetadata,
    ErrorKind,
    SectorBytes,
    TrackDataEncoding,
};
use std::path::PathBuf;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn sample_disk() -> DiskImage {
    let mut image = blank_d64("CONVERT ME", "CV");
    let data: Vec<u8> = (0..2000u32).map(|i| (i * 13) as u8).collect();
    Pipeline::fs_inject(&mut image, "FIRST", &data).unwrap();
    Pipeline::fs_inject(&mut image, "SECOND", b"0123456789").unwrap();
    image
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("fluxvault_{}_{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_gcr_container_chain_preserves_sectors() {
    init();
    let mut image = sample_disk();
    let original = Pipeline::emit_container(&mut image, DiskImageFileFormat::D64).unwrap();
    let original_hash = compute_slice_hash(original.as_slice());

    let mut current = image;
    for format in [
        DiskImageFileFormat::G64,
        DiskImageFileFormat::Nib,
        DiskImageFileFormat::Nbz,
    ] {
        let bytes = Pipeline::emit_container(&mut current, format).unwrap();
        assert_eq!(detect_format(&mut bytes.reader()).unwrap(), format);
        current = Pipeline::decode_container(&bytes, None).unwrap();
        assert_eq!(current.source_format, Some(format));
        assert_eq!(current.track_ct(), 35);
    }

    let round_trip = Pipeline::emit_container(&mut current, DiskImageFileFormat::D64).unwrap();
    assert_eq!(compute_slice_hash(round_trip.as_slice()), original_hash);
    assert_eq!(Pipeline::fs_extract(&current, "SECOND").unwrap(), b"0123456789".to_vec());
}

#[test]
fn test_dmk_keeps_mfm_sectors() {
    init();
    let mut image = DiskImage::new(DiskMetadata::default());
    for c in 0..2u16 {
        image.add_sector_track(DiskCh::new(c, 0), TrackDataEncoding::Mfm, mfm_sectors(c, 0));
    }
    let bytes = Pipeline::emit_container(&mut image, DiskImageFileFormat::Dmk).unwrap();
    let loaded = Pipeline::decode_container(&bytes, Some(DiskImageFileFormat::Dmk)).unwrap();

    assert_eq!(loaded.track_ct(), 2);
    for c in 0..2u16 {
        for id in 1..=9u8 {
            let sector = loaded.read_sector(DiskCh::new(c, 0), id).unwrap();
            assert!(sector.is_good());
            assert_eq!(sector.data.as_slice(), SectorBytes::filled(512, id).as_slice());
        }
    }
}

#[test]
fn test_dmk_rejects_gcr_image() {
    init();
    let mut image = sample_disk();
    assert!(Pipeline::emit_container(&mut image, DiskImageFileFormat::Dmk).is_err());
}

#[test]
fn test_sector_image_rejects_mfm_geometry() {
    init();
    let mut image = DiskImage::new(DiskMetadata::default());
    let sectors: Vec<SectorRecord> = mfm_sectors(0, 0);
    image.add_sector_track(DiskCh::new(0, 0), TrackDataEncoding::Mfm, sectors);
    let err = Pipeline::emit_container(&mut image, DiskImageFileFormat::D64).unwrap_err();
    assert_ne!(err.kind(), ErrorKind::Io);
}

#[test]
fn test_convert_files_with_analysis_adapter() {
    init();
    let dir = scratch_dir("convert");
    let input = dir.join("disk.d64");
    let output = dir.join("disk.g64");

    let mut image = sample_disk();
    let written = Pipeline::save(&mut image, &input, None).unwrap();
    assert_eq!(written, vec![input.clone()]);
    assert_eq!(std::fs::metadata(&input).unwrap().len() as usize, D64_35_LEN);

    let mut registry = AdapterRegistry::new();
    registry.register(Box::new(AnalysisAdapter)).unwrap();
    let mut pipeline = Pipeline::with_registry(PipelineConfig::default(), registry).unwrap();
    pipeline.convert(&input, &output, None).unwrap();

    let converted = Pipeline::open(&output).unwrap();
    assert_eq!(converted.source_format, Some(DiskImageFileFormat::G64));
    let files = Pipeline::fs_list(&converted).unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[1].name(), "SECOND");

    let err = pipeline.convert(&input, &dir.join("disk.unknown"), None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let _ = std::fs::remove_dir_all(&dir);
}
