mod common;

use fluxvault::{
    bitstream_codec::{
        crc::{cbm_checksum, crc_ibm_3740},
        gcr::{self, decode_data_block, encode_data_block},
        mfm::{decode_flux, encode_flux},
    },
    DiskImageError,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_mfm_single_zero_byte() {
    init();
    let gaps = encode_flux(&[0x00], false, 1000.0);
    let us: Vec<f64> = gaps.iter().map(|g| g / 1000.0).collect();
    assert_eq!(us, vec![3.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0]);

    let decoded = decode_flux(&gaps, 1000.0, false).unwrap();
    assert_eq!(decoded.bytes[0], 0x00);
    assert!(decoded.header_crc.is_not_applicable());
    assert!(decoded.data_crc.is_not_applicable());
}

#[test]
fn test_mfm_text_round_trip() {
    init();
    let text = b"The quick brown fox jumps over the lazy dog";
    for prev_bit in [false, true] {
        let gaps = encode_flux(text, prev_bit, 2000.0);
        let decoded = decode_flux(&gaps, 2000.0, prev_bit).unwrap();
        assert_eq!(&decoded.bytes[..text.len()], &text[..]);
    }
}

#[test]
fn test_gcr_bad_first_symbol() {
    init();
    let mut block = encode_data_block(&[0xA5; 256], false);
    // Clear the top five bits, making the first symbol 00000.
    block[0] &= 0x07;
    assert_eq!(decode_data_block(&block), Err(DiskImageError::BadGcr));
}

#[test]
fn test_gcr_data_block_checksums() {
    init();
    let data: Vec<u8> = (0..=255u8).collect();
    let (decoded, check) = decode_data_block(&encode_data_block(&data, false)).unwrap();
    assert_eq!(decoded.as_slice(), &data[..]);
    assert!(check.is_valid());

    let (_, check) = decode_data_block(&encode_data_block(&data, true)).unwrap();
    assert!(check.is_error());
}

#[test]
fn test_gcr_zones() {
    init();
    assert_eq!(gcr::sectors_per_track(1), 21);
    assert_eq!(gcr::sectors_per_track(18), 19);
    assert_eq!(gcr::sectors_per_track(30), 18);
    assert_eq!(gcr::sectors_per_track(35), 17);
    assert_eq!(gcr::speed_zone(1), 3);
    assert_eq!(gcr::speed_zone(35), 0);
}

#[test]
fn test_crc_values() {
    init();
    assert_eq!(crc_ibm_3740(b"123456789"), 0x29B1);
    assert_eq!(cbm_checksum(&[0x01, 0x02, 0x04]), 0x07);
}
