mod common;

use common::*;
use fluxvault::{
    file_system::{cbm::CbmFileSystem, FindingKind},
    hardware::AdapterRegistry,
    pipeline::{Pipeline, PipelineConfig},
    DiskImageFileFormat,
    ErrorKind,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn validator() -> Pipeline {
    Pipeline::with_registry(PipelineConfig::default(), AdapterRegistry::new()).unwrap()
}

#[test]
fn test_blank_d64_listing() {
    init();
    let mut image = blank_d64("EMPTY DISK", "01");
    let bytes = Pipeline::emit_container(&mut image, DiskImageFileFormat::D64).unwrap();
    assert_eq!(bytes.len(), D64_35_LEN);

    let loaded = Pipeline::decode_container(&bytes, None).unwrap();
    assert_eq!(loaded.source_format, Some(DiskImageFileFormat::D64));
    assert!(Pipeline::fs_list(&loaded).unwrap().is_empty());

    let fs = CbmFileSystem::mount(&loaded).unwrap();
    assert_eq!(fs.header_line().unwrap(), "0 \"EMPTY DISK      \" 01 2A");
    assert_eq!(fs.blocks_free().unwrap(), 664);
    assert!(fs.listing().unwrap().ends_with("664 BLOCKS FREE."));
}

#[test]
fn test_d64_output_is_stable() {
    init();
    let mut image = blank_d64("STABLE", "ST");
    Pipeline::fs_inject(&mut image, "DATA", &[0x42; 3000]).unwrap();
    let first = Pipeline::emit_container(&mut image, DiskImageFileFormat::D64).unwrap();

    let mut reloaded = Pipeline::decode_container(&first, Some(DiskImageFileFormat::D64)).unwrap();
    let second = Pipeline::emit_container(&mut reloaded, DiskImageFileFormat::D64).unwrap();
    assert_eq!(compute_slice_hash(first.as_slice()), compute_slice_hash(second.as_slice()));
}

/// Make block (1,0) link to itself and list it as a one-block file.
fn circular_d64() -> Vec<u8> {
    let mut image = blank_d64("LOOP", "LP");
    let mut bytes = Pipeline::emit_container(&mut image, DiskImageFileFormat::D64)
        .unwrap()
        .into_inner();

    let block = d64_offset(1, 0);
    bytes[block] = 1;
    bytes[block + 1] = 0;

    let entry = d64_offset(18, 1);
    bytes[entry + 2] = 0x82;
    bytes[entry + 3] = 1;
    bytes[entry + 4] = 0;
    bytes[entry + 5..entry + 21].fill(0xA0);
    bytes[entry + 5..entry + 10].copy_from_slice(b"LOOPY");
    bytes[entry + 0x1E] = 1;
    bytes[entry + 0x1F] = 0;

    // Allocate (1,0) in the BAM.
    let bam = d64_offset(18, 0) + 4;
    bytes[bam] -= 1;
    bytes[bam + 1] &= !0x01;
    bytes
}

#[test]
fn test_circular_chain() {
    init();
    let bytes = fluxvault::ContainerBytes::from(circular_d64());
    let image = Pipeline::decode_container(&bytes, Some(DiskImageFileFormat::D64)).unwrap();

    let err = Pipeline::fs_extract(&image, "LOOPY").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Consistency);

    let report = validator().validate(&image).unwrap();
    assert!(!report.passed());
    assert!(report.sector_failures.is_empty());
    assert_eq!(report.fs_findings.len(), 1);
    assert_eq!(report.fs_findings[0].kind, FindingKind::BrokenChain);
    assert!(report.to_string().contains("FAILED"));
}

#[test]
fn test_inject_delete_round_trip() {
    init();
    let mut image = blank_d64("WORK", "WK");
    let data: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    Pipeline::fs_inject(&mut image, "PROGRAM", &data).unwrap();
    Pipeline::fs_inject(&mut image, "NOTES", b"SOME NOTES").unwrap();

    let bytes = Pipeline::emit_container(&mut image, DiskImageFileFormat::D64).unwrap();
    let mut image = Pipeline::decode_container(&bytes, None).unwrap();
    let files = Pipeline::fs_list(&image).unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0].name(), "PROGRAM");
    assert_eq!(files[0].blocks(), 20);
    assert_eq!(Pipeline::fs_extract(&image, "PROGRAM").unwrap(), data);

    Pipeline::fs_delete(&mut image, "PROGRAM").unwrap();
    let err = Pipeline::fs_extract(&image, "PROGRAM").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let report = validator().validate(&image).unwrap();
    assert!(report.passed(), "{}", report);
    assert_eq!(report.files_checked, 1);
    let fs = CbmFileSystem::mount(&image).unwrap();
    assert_eq!(fs.blocks_free().unwrap(), 663);
}

#[test]
fn test_d64_error_trailer_marks_sectors() {
    init();
    let mut image = blank_d64("ERRORS", "ER");
    let mut bytes = Pipeline::emit_container(&mut image, DiskImageFileFormat::D64)
        .unwrap()
        .into_inner();
    // One error byte per block; code 5 is a data checksum error.
    let mut trailer = vec![1u8; 683];
    trailer[2] = 5;
    bytes.extend_from_slice(&trailer);

    let bytes = fluxvault::ContainerBytes::from(bytes);
    let image = Pipeline::decode_container(&bytes, None).unwrap();
    let report = validator().validate(&image).unwrap();
    assert_eq!(report.sector_failures.len(), 1);
    assert_eq!(report.sector_failures[0].sector_id, 2);
    assert!(!report.passed());
}
