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

    src/file_parsers/nbz.rs

    NBZ compressed NIB image parser.
*/

//! An NBZ file is a NIB file compressed with the LZ77 variant in [lz77]. It has no header of its
//! own and is detected by decompressing the start of the file and checking for the NIB
//! signature.

use crate::{
    file_parsers::{
        compression::lz77,
        nib::{NibFormat, NIB_HEADER_LEN, NIB_MAX_ENTRIES, NIB_SIGNATURE, NIB_TRACK_LEN},
        FormatCaps,
        ParserWriteCompatibility,
    },
    io::{Read, ReadSeek, ReadWriteSeek, SeekFrom},
    util::read_all,
    DiskImage,
    DiskImageError,
};

/// Compressed bytes read when sniffing for the NIB signature.
const SNIFF_LEN: u64 = 512;
/// The largest NIB image. Decompression stops here.
const MAX_NIB_LEN: usize = NIB_HEADER_LEN + NIB_MAX_ENTRIES * NIB_TRACK_LEN;

pub struct NbzFormat;

impl NbzFormat {
    pub fn extensions() -> Vec<&'static str> {
        vec!["nbz"]
    }

    pub fn capabilities() -> FormatCaps {
        NibFormat::capabilities(false) | FormatCaps::CAP_COMPRESSED
    }

    pub fn detect<RWS: ReadSeek>(mut image: RWS) -> bool {
        if image.seek(SeekFrom::Start(0)).is_err() {
            return false;
        }
        let mut prefix = Vec::new();
        if (&mut image).take(SNIFF_LEN).read_to_end(&mut prefix).is_err() {
            return false;
        }
        match lz77::decompress_limit(&prefix, NIB_SIGNATURE.len()) {
            Ok(plain) => plain.as_slice() == NIB_SIGNATURE,
            Err(_) => false,
        }
    }

    pub fn load_image<RWS: ReadSeek>(mut read_buf: RWS, image: &mut DiskImage) -> Result<(), DiskImageError> {
        let packed = read_all(&mut read_buf)?;
        let data = lz77::decompress_limit(&packed, MAX_NIB_LEN)?;
        log::debug!(
            "NbzFormat::load_image(): {} bytes decompressed to {}",
            packed.len(),
            data.len()
        );
        NibFormat::load_bytes(&data, image)
    }

    pub fn can_write(image: &DiskImage) -> ParserWriteCompatibility {
        NibFormat::can_write(image, false)
    }

    pub fn save_image<RWS: ReadWriteSeek>(image: &DiskImage, output: &mut RWS) -> Result<(), DiskImageError> {
        let plain = NibFormat::to_bytes(image, false);
        let packed = lz77::compress(&plain);
        log::debug!(
            "NbzFormat::save_image(): {} bytes compressed to {}",
            plain.len(),
            packed.len()
        );
        output.seek(SeekFrom::Start(0))?;
        output.write_all(&packed)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        file_parsers::{DiskImageFileFormat, ImageParser},
        file_system::{
            cbm::{CbmFileSystem, CbmGeometry},
            FileSystem,
        },
        io::Cursor,
    };

    #[test]
    fn test_round_trip() {
        let mut image = CbmFileSystem::format(CbmGeometry::D64_35, "PACKED", "PK").unwrap();
        {
            let mut fs = CbmFileSystem::mount_mut(&mut image).unwrap();
            fs.inject("README", &[0x41; 600]).unwrap();
        }
        let mut out = Cursor::new(Vec::new());
        image.save(DiskImageFileFormat::Nbz, &mut out).unwrap();
        let packed = out.into_inner();
        assert!(packed.len() < 256 + 35 * 7928);
        assert!(!DiskImageFileFormat::Nib.detect(Cursor::new(&packed)));

        let loaded = DiskImage::load(&mut Cursor::new(packed)).unwrap();
        assert_eq!(loaded.source_format, Some(DiskImageFileFormat::Nbz));
        assert_eq!(loaded.track_ct(), 35);
        let fs = CbmFileSystem::mount(&loaded).unwrap();
        assert_eq!(fs.extract("README").unwrap(), vec![0x41; 600]);
    }

    #[test]
    fn test_rejects_other_streams() {
        assert!(!NbzFormat::detect(Cursor::new(lz77::compress(b"GCR-1541 not a nib"))));
        assert!(!NbzFormat::detect(Cursor::new(Vec::<u8>::new())));
    }

    #[test]
    fn test_hostile_length_is_not_expanded() {
        // A literal, then a match claiming a 35-bit length.
        let hostile = vec![0x00, 0x41, 0x00, 0x80, 0x80, 0x80, 0x80, 0x7F, 0x01];
        assert!(!NbzFormat::detect(Cursor::new(hostile.clone())));
        assert!(DiskImage::load(&mut Cursor::new(hostile.clone())).is_err());

        let mut image = DiskImage::default();
        let err = NbzFormat::load_image(Cursor::new(hostile), &mut image).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Format);
    }
}
