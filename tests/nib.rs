mod common;

use common::*;
use fluxvault::{
    file_parsers::{
        compression::lz77,
        detect_format,
        nib::{NibHeader, NIB_HEADER_LEN, NIB_TRACK_LEN},
    },
    pipeline::Pipeline,
    DiskImage,
    DiskImageFileFormat,
    ImageParser,
};
use std::io::Cursor;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_nib_signature_two_entries() {
    init();
    let mut data = vec![0u8; 256 + 7928 * 2];
    data[..16].copy_from_slice(&[
        0x4D, 0x4E, 0x49, 0x42, 0x2D, 0x31, 0x35, 0x34, 0x31, 0x2D, 0x52, 0x41, 0x57, 0x00, 0x00, 0x00,
    ]);

    assert_eq!(detect_format(&mut Cursor::new(&data)).unwrap(), DiskImageFileFormat::Nib);
    let header = NibHeader::parse(&data).unwrap();
    assert_eq!(header.version, 0);
    assert!(!header.half_tracks);

    let image = DiskImage::load(&mut Cursor::new(data)).unwrap();
    assert_eq!(image.source_format, Some(DiskImageFileFormat::Nib));
    assert_eq!(image.track_ct(), 2);
}

#[test]
fn test_nib_layout_of_formatted_disk() {
    init();
    let mut image = blank_d64("LAYOUT", "LY");
    let bytes = Pipeline::emit_container(&mut image, DiskImageFileFormat::Nib).unwrap();
    assert_eq!(bytes.len(), NIB_HEADER_LEN + 35 * NIB_TRACK_LEN);

    let header = NibHeader::parse(bytes.as_slice()).unwrap();
    assert_eq!(header.entries.len(), 35);
    // Full tracks are stored at even halftracks, with density by speed zone.
    assert_eq!(header.entries[0], (2, 3));
    assert_eq!(header.entries[34], (70, 0));
}

#[test]
fn test_nb2_reads_back() {
    init();
    let mut image = blank_d64("PASSES", "PS");
    Pipeline::fs_inject(&mut image, "FILE", &[7; 700]).unwrap();
    let bytes = Pipeline::emit_container(&mut image, DiskImageFileFormat::Nb2).unwrap();
    assert!(DiskImageFileFormat::Nb2.detect(bytes.reader()));

    let loaded = Pipeline::decode_container(&bytes, None).unwrap();
    assert_eq!(loaded.source_format, Some(DiskImageFileFormat::Nb2));
    assert_eq!(Pipeline::fs_extract(&loaded, "FILE").unwrap(), vec![7; 700]);
}

#[test]
fn test_nbz_is_compressed_nib() {
    init();
    let mut image = blank_d64("SQUEEZE", "SQ");
    let nib = Pipeline::emit_container(&mut image, DiskImageFileFormat::Nib).unwrap();
    let nbz = Pipeline::emit_container(&mut image, DiskImageFileFormat::Nbz).unwrap();
    assert!(nbz.len() < nib.len() / 4);
    assert_eq!(lz77::decompress(nbz.as_slice()).unwrap(), nib.as_slice());
}

#[test]
fn test_lz77_round_trip() {
    init();
    let mut data: Vec<u8> = b"abcabcabcabcabc".repeat(40);
    data.extend((0..=255u8).cycle().take(3000));
    data.extend(std::iter::repeat(0x55).take(1000));
    let packed = lz77::compress(&data);
    assert!(packed.len() < data.len());
    assert_eq!(lz77::decompress(&packed).unwrap(), data);
}
