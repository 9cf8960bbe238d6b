mod common;

use fluxvault::{
    file_system::cpm::{detect_dpb, dpb::dpb_by_name, CpmFileSystem},
    hardware::AdapterRegistry,
    pipeline::{Pipeline, PipelineConfig},
    DiskImageFileFormat,
    ErrorKind,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_cpm_volume_through_dmk() {
    init();
    let dpb = dpb_by_name("ibm-3740").unwrap();
    let mut image = CpmFileSystem::format(dpb);
    let text: Vec<u8> = b"10 PRINT \"HELLO\"\r\n20 GOTO 10\r\n".repeat(100);
    Pipeline::fs_inject(&mut image, "hello.bas", &text).unwrap();
    Pipeline::fs_inject(&mut image, "3:tool.com", &[0xC3, 0x00, 0x01]).unwrap();

    let bytes = Pipeline::emit_container(&mut image, DiskImageFileFormat::Dmk).unwrap();
    let loaded = Pipeline::decode_container(&bytes, None).unwrap();
    assert_eq!(loaded.source_format, Some(DiskImageFileFormat::Dmk));
    assert_eq!(detect_dpb(&loaded).map(|d| d.name), Some("ibm-3740"));

    let files = Pipeline::fs_list(&loaded).unwrap();
    assert_eq!(files.len(), 2);
    let hello = files.iter().find(|f| f.name() == "HELLO.BAS").unwrap();
    assert_eq!(hello.user(), 0);
    let tool = files.iter().find(|f| f.name() == "TOOL.COM").unwrap();
    assert_eq!(tool.user(), 3);

    let out = Pipeline::fs_extract(&loaded, "HELLO.BAS").unwrap();
    assert_eq!(&out[..text.len()], &text[..]);
    assert_eq!(out.len() % 128, 0);

    let pipeline = Pipeline::with_registry(PipelineConfig::default(), AdapterRegistry::new()).unwrap();
    let report = pipeline.validate(&loaded).unwrap();
    assert!(report.passed(), "{}", report);
    assert_eq!(report.files_checked, 2);
}

#[test]
fn test_cpm_delete_frees_space() {
    init();
    let dpb = dpb_by_name("kaypro2").unwrap();
    let mut image = CpmFileSystem::format(dpb);
    let free = CpmFileSystem::mount(&image).unwrap().free_blocks().unwrap();

    Pipeline::fs_inject(&mut image, "DATA.BIN", &[0x11; 5000]).unwrap();
    assert!(CpmFileSystem::mount(&image).unwrap().free_blocks().unwrap() < free);

    Pipeline::fs_delete(&mut image, "DATA.BIN").unwrap();
    assert_eq!(CpmFileSystem::mount(&image).unwrap().free_blocks().unwrap(), free);
    let err = Pipeline::fs_extract(&image, "DATA.BIN").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
