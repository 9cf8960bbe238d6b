mod common;

use common::*;
use fluxvault::{
    copy_protection::ProtectionKind,
    file_parsers::kryoflux::{write_stream, KfxStream, KFX_DEFAULT_SCK},
    latency::{LatencyConfig, LatencyProfile},
    random::WeakBitRng,
    track_reader::{TrackReader, TrackWriter, TrackWriterOptions},
    DiskImage,
    DiskImageFileFormat,
    FluxBuffer,
    TrackDataEncoding,
    TrackKey,
};
use std::io::Cursor;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_kryoflux_flux3_and_eof() {
    init();
    let data = [0x0C, 0x10, 0x00, 0x0D, 0x0D, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00];
    let stream = KfxStream::parse(&data).unwrap();
    assert_eq!(stream.flux, vec![0x0010]);
    assert_eq!(stream.eof_position, Some(0));
}

#[test]
fn test_flux_buffer_accumulates() {
    init();
    let mut flux = FluxBuffer::new(16, 24_000_000.0).unwrap();
    for us in [4.0, 6.0, 8.0, 4.0] {
        flux.append(us).unwrap();
    }
    // 22 us at 24 MHz.
    assert_eq!(flux.samples().last().copied(), Some(528));
    assert_eq!(flux.deltas().collect::<Vec<_>>(), vec![96, 144, 192, 96]);
    assert!(flux.append(0.0).is_err());
}

fn speedlock_profile() -> LatencyProfile {
    let mut profile = LatencyProfile::new(2000);
    for bit in 0..50_000u32 {
        let latency = if (20_000..20_500).contains(&bit) { 2400 } else { 2000 };
        profile.record_bit(bit, latency, 2000);
    }
    profile
}

#[test]
fn test_speedlock_classification() {
    init();
    let mut profile = speedlock_profile();
    profile.analyze(&LatencyConfig::default());
    assert_eq!(profile.protection, ProtectionKind::Speedlock);
    assert!(profile.protection_confidence >= 70);
    assert_eq!(profile.regions.len(), 1);
    assert_eq!(profile.regions[0].start_bit, 20_000);
    assert_eq!(profile.regions[0].end_bit, 20_500);

    let mut again = speedlock_profile();
    again.analyze(&LatencyConfig::default());
    assert_eq!(profile, again);
}

#[test]
fn test_kryoflux_gcr_stream_decodes() {
    init();
    let image = blank_d64("STREAM", "SM");
    // Directory track, written as the drive would record it.
    let track = image.track(TrackKey::from((17u16, 0u8))).unwrap();

    let mut writer = TrackWriter::new(
        TrackWriterOptions {
            sample_clock: KFX_DEFAULT_SCK,
            revolutions: 2,
            disk_id: *b"SM",
        },
        WeakBitRng::default(),
    );
    let flux = writer.write(track).unwrap();
    assert_eq!(flux.revolution_ct(), 2);

    let bytes = write_stream(&flux).unwrap();
    let stream = KfxStream::parse(&bytes).unwrap();
    assert_eq!(stream.flux.len(), flux.len());

    let loaded = DiskImage::load(&mut Cursor::new(bytes)).unwrap();
    assert_eq!(loaded.source_format, Some(DiskImageFileFormat::KryofluxStream));
    let decoded = loaded.track_iter().next().unwrap();
    assert_eq!(decoded.encoding, TrackDataEncoding::GcrCbm);
    assert_eq!(decoded.sectors.len(), 19);
    assert!(decoded.sectors.iter().all(|s| s.is_good()));

    // Reading the same flux directly gives the same sectors.
    let direct = TrackReader::default().read(track.key, &flux).unwrap();
    assert_eq!(direct.sectors.len(), 19);
    assert_eq!(direct.sector(0).unwrap().data, track.sector(0).unwrap().data);
}
