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

    src/file_parsers/kryoflux.rs

    A parser for the KryoFlux stream format.
*/

//! KryoFlux stream files (.raw) hold the flux transitions of a single track, as captured by the
//! KryoFlux board over several revolutions. A disk is stored as a set of files named
//! `trackCC.H.raw`, one per cylinder and head.
//!
//! The stream interleaves in-band flux values with out-of-band (OOB) blocks. In-band values are
//! counted by the stream position; OOB blocks are not.
//!
//! | Byte      | Meaning                                               |
//! |-----------|-------------------------------------------------------|
//! | 0x00-0x07 | Flux2: `(byte << 8) | next`                           |
//! | 0x08      | Nop1                                                  |
//! | 0x09      | Nop2, one byte follows                                |
//! | 0x0A      | Nop3, two bytes follow                                |
//! | 0x0B      | Ovl16: add 0x10000 to the next flux value             |
//! | 0x0C      | Flux3: a 16-bit little-endian value follows           |
//! | 0x0D      | OOB block: type, 16-bit size, then `size` bytes       |
//! | 0x0E-0xFF | Flux1: the byte is the value                          |

use crate::{
    file_parsers::{bitstream_flags, FormatCaps, ParserWriteCompatibility},
    flux::FluxBuffer,
    format_us,
    io::{Cursor, ReadSeek, ReadWriteSeek, SeekFrom},
    track_reader::{TrackDataResolution, TrackReader, TrackReaderOptions, TrackRecord},
    types::{TrackDataEncoding, TrackKey},
    util::{read_all, read_ascii},
    DiskImage,
    DiskImageError,
    ErrorKind,
};
use binrw::{binrw, BinRead, BinWrite};
use regex::Regex;
use std::path::{Path, PathBuf};

pub const KFX_DEFAULT_MCK: f64 = ((18432000.0 * 73.0) / 14.0) / 2.0;
pub const KFX_DEFAULT_SCK: f64 = KFX_DEFAULT_MCK / 2.0;
pub const KFX_DEFAULT_ICK: f64 = KFX_DEFAULT_MCK / 16.0;

const OP_NOP1: u8 = 0x08;
const OP_NOP2: u8 = 0x09;
const OP_NOP3: u8 = 0x0A;
const OP_OVL16: u8 = 0x0B;
const OP_FLUX3: u8 = 0x0C;
const OP_OOB: u8 = 0x0D;
const FLUX1_MIN: u8 = 0x0E;
/// The size field of a real EOF block is filler and no payload follows.
const EOF_FILLER_SIZE: u16 = 0x0D0D;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OobBlock {
    Invalid(u8),
    StreamInfo,
    Index,
    StreamEnd,
    KfInfo,
    Eof,
}

impl From<u8> for OobBlock {
    fn from(byte: u8) -> Self {
        match byte {
            0x01 => OobBlock::StreamInfo,
            0x02 => OobBlock::Index,
            0x03 => OobBlock::StreamEnd,
            0x04 => OobBlock::KfInfo,
            0x0D => OobBlock::Eof,
            _ => OobBlock::Invalid(byte),
        }
    }
}

impl OobBlock {
    fn type_byte(&self) -> u8 {
        match self {
            OobBlock::Invalid(byte) => *byte,
            OobBlock::StreamInfo => 0x01,
            OobBlock::Index => 0x02,
            OobBlock::StreamEnd => 0x03,
            OobBlock::KfInfo => 0x04,
            OobBlock::Eof => 0x0D,
        }
    }
}

#[derive(Debug)]
#[binrw]
#[brw(little)]
pub struct OobHeader {
    pub block_type: u8,
    pub size: u16,
}

#[derive(Debug)]
#[binrw]
#[brw(little)]
pub struct StreamInfoBlock {
    pub stream_pos: u32,
    pub transfer_time_ms: u32,
}

#[derive(Copy, Clone, Debug, PartialEq)]
#[binrw]
#[brw(little)]
pub struct IndexBlock {
    pub stream_pos: u32,
    pub sample_counter: u32,
    pub index_counter: u32,
}

#[derive(Debug)]
#[binrw]
#[brw(little)]
pub struct StreamEndBlock {
    pub stream_pos: u32,
    pub hw_status_code: u32,
}

/// A decoded KryoFlux stream.
#[derive(Clone, Debug, PartialEq)]
pub struct KfxStream {
    pub sck: f64,
    pub ick: f64,
    /// Flux values in sample clock ticks.
    pub flux: Vec<u32>,
    /// Stream position of the first byte of each flux value.
    pub flux_positions: Vec<u32>,
    pub index: Vec<IndexBlock>,
    pub info: Vec<String>,
    /// Hardware status reported by the stream end block.
    pub hw_status: Option<u32>,
    /// Stream position recorded in the EOF block, if it carried one.
    pub eof_position: Option<u32>,
}

impl Default for KfxStream {
    fn default() -> Self {
        KfxStream {
            sck: KFX_DEFAULT_SCK,
            ick: KFX_DEFAULT_ICK,
            flux: Vec::new(),
            flux_positions: Vec::new(),
            index: Vec::new(),
            info: Vec::new(),
            hw_status: None,
            eof_position: None,
        }
    }
}

impl KfxStream {
    /// Decode a complete stream.
    pub fn parse(data: &[u8]) -> Result<KfxStream, DiskImageError> {
        let mut stream = KfxStream::default();
        let mut pos = 0usize;
        let mut stream_pos = 0u32;
        let mut overflow = 0u32;
        let mut flux_start: Option<u32> = None;

        let truncated = |at: usize| DiskImageError::format(format!("KryoFlux stream truncated at offset {}", at));

        while pos < data.len() {
            let byte = data[pos];
            let (value, len) = match byte {
                0x00..=0x07 => {
                    let lo = *data.get(pos + 1).ok_or_else(|| truncated(pos))?;
                    (Some(((byte as u32) << 8) | lo as u32), 2)
                }
                OP_NOP1 => (None, 1),
                OP_NOP2 => (None, 2),
                OP_NOP3 => (None, 3),
                OP_OVL16 => {
                    flux_start.get_or_insert(stream_pos);
                    overflow = overflow.saturating_add(0x10000);
                    pos += 1;
                    stream_pos += 1;
                    continue;
                }
                OP_FLUX3 => {
                    let bytes = data.get(pos + 1..pos + 3).ok_or_else(|| truncated(pos))?;
                    (Some(u16::from_le_bytes([bytes[0], bytes[1]]) as u32), 3)
                }
                OP_OOB => {
                    let (consumed, eof) = stream.read_oob(&data[pos + 1..], pos)?;
                    pos += 1 + consumed;
                    if eof {
                        break;
                    }
                    continue;
                }
                _ => (Some(byte as u32), 1),
            };
            if pos + len > data.len() {
                return Err(truncated(pos));
            }
            if let Some(value) = value {
                stream.flux_positions.push(flux_start.take().unwrap_or(stream_pos));
                stream.flux.push(value.saturating_add(overflow));
                overflow = 0;
            }
            pos += len;
            stream_pos += len as u32;
        }

        log::debug!(
            "KfxStream::parse(): {} flux values, {} index pulses, sck {:.3}",
            stream.flux.len(),
            stream.index.len(),
            stream.sck
        );
        Ok(stream)
    }

    /// Read an OOB block starting at its type byte. Returns the bytes consumed and whether the
    /// block ended the stream.
    fn read_oob(&mut self, data: &[u8], offset: usize) -> Result<(usize, bool), DiskImageError> {
        let header = OobHeader::read(&mut Cursor::new(data))?;
        let kind = OobBlock::from(header.block_type);
        if kind == OobBlock::Eof {
            let payload = match header.size {
                EOF_FILLER_SIZE => &[][..],
                size => data.get(3..3 + size as usize).unwrap_or(&data[3..]),
            };
            if payload.len() >= 4 {
                self.eof_position = Some(u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]));
            }
            log::trace!("KfxStream::read_oob(): EOF at offset {}", offset);
            return Ok((3 + payload.len(), true));
        }

        let payload = data
            .get(3..3 + header.size as usize)
            .ok_or_else(|| DiskImageError::format(format!("KryoFlux OOB block at offset {} is truncated", offset)))?;
        let mut reader = Cursor::new(payload);
        match kind {
            OobBlock::StreamInfo => {
                let info = StreamInfoBlock::read(&mut reader)?;
                log::trace!(
                    "KfxStream::read_oob(): stream info pos {} transfer {}ms",
                    info.stream_pos,
                    info.transfer_time_ms
                );
            }
            OobBlock::Index => {
                let index = IndexBlock::read(&mut reader)?;
                log::trace!(
                    "KfxStream::read_oob(): index at pos {} sample {} ({}) counter {}",
                    index.stream_pos,
                    index.sample_counter,
                    format_us!(index.sample_counter as f64 / self.sck),
                    index.index_counter
                );
                self.index.push(index);
            }
            OobBlock::StreamEnd => {
                let end = StreamEndBlock::read(&mut reader)?;
                match end.hw_status_code {
                    0 => log::debug!("KfxStream::read_oob(): hardware status OK"),
                    1 => log::warn!("KfxStream::read_oob(): a buffering problem was recorded, stream may be corrupt"),
                    2 => log::warn!("KfxStream::read_oob(): no index signal was detected"),
                    code => log::warn!("KfxStream::read_oob(): unknown hardware status {}", code),
                }
                self.hw_status = Some(end.hw_status_code);
            }
            OobBlock::KfInfo => {
                if let Some(info) = read_ascii(payload) {
                    let (sck, ick) = parse_clock_info(&info);
                    if let Some(sck) = sck {
                        log::debug!("KfxStream::read_oob(): sample clock {}", sck);
                        self.sck = sck;
                    }
                    if let Some(ick) = ick {
                        self.ick = ick;
                    }
                    self.info.push(info);
                }
            }
            OobBlock::Invalid(byte) => {
                log::warn!("KfxStream::read_oob(): skipping unknown OOB block type {:02X}", byte);
            }
            OobBlock::Eof => {}
        }
        Ok((3 + payload.len(), false))
    }

    /// Return the flux transition index of each index pulse.
    pub fn index_positions(&self) -> Vec<usize> {
        self.index
            .iter()
            .map(|ib| self.flux_positions.partition_point(|&p| p < ib.stream_pos))
            .collect()
    }

    pub fn to_flux_buffer(&self) -> Result<FluxBuffer, DiskImageError> {
        FluxBuffer::from_deltas(self.sck, &self.flux, self.index_positions())
    }
}

/// Parse the sample and index clocks from a KfInfo string such as
/// `sck=24027428.5714285, ick=3003428.5714285625`.
pub fn parse_clock_info(info: &str) -> (Option<f64>, Option<f64>) {
    let Ok(re) = Regex::new(r"sck=(\d+(?:\.\d+)?),\s*ick=(\d+(?:\.\d+)?)")
    else {
        return (None, None);
    };
    match re.captures(info) {
        Some(c) => (
            c.get(1).and_then(|m| m.as_str().parse::<f64>().ok()),
            c.get(2).and_then(|m| m.as_str().parse::<f64>().ok()),
        ),
        None => (None, None),
    }
}

/// Parse a stream file name of the form `trackCC.H.raw` into a track key.
pub fn track_key_from_name(name: &str) -> Option<TrackKey> {
    let re = Regex::new(r"(?i)(\d{2})\.(\d)\.raw$").ok()?;
    let caps = re.captures(name)?;
    let c = caps.get(1)?.as_str().parse::<u16>().ok()?;
    let h = caps.get(2)?.as_str().parse::<u8>().ok()?;
    (h < 2).then(|| TrackKey::from((c, h)))
}

/// Return the file name used for a track in a stream set.
pub fn track_file_name(key: TrackKey) -> String {
    format!("track{:02}.{}.raw", key.ch.c(), key.ch.h())
}

/// Encode a flux buffer as a KryoFlux stream.
pub fn write_stream(flux: &FluxBuffer) -> Result<Vec<u8>, DiskImageError> {
    let sck = flux.sample_clock();
    let ick = sck / (KFX_DEFAULT_SCK / KFX_DEFAULT_ICK);
    let mut out = Vec::with_capacity(flux.len() * 2);

    let info = format!("sck={}, ick={}\0", sck, ick);
    write_oob(&mut out, OobBlock::KfInfo, info.as_bytes())?;

    let index = flux.index_positions();
    let mut next_index = index.iter().peekable();
    let mut stream_pos = 0u32;
    let mut sample_time = 0u64;

    let emit_index = |out: &mut Vec<u8>, stream_pos: u32, sample_time: u64| -> Result<(), DiskImageError> {
        let block = IndexBlock {
            stream_pos,
            sample_counter: 0,
            index_counter: (sample_time as f64 * ick / sck) as u32,
        };
        let mut payload = Cursor::new(Vec::new());
        block.write(&mut payload)?;
        write_oob(out, OobBlock::Index, payload.get_ref())
    };

    for (i, delta) in flux.deltas().enumerate() {
        while next_index.next_if(|&&idx| idx <= i).is_some() {
            emit_index(&mut out, stream_pos, sample_time)?;
        }
        let start = out.len();
        let mut value = delta;
        while value > 0xFFFF {
            out.push(OP_OVL16);
            value -= 0x10000;
        }
        match value {
            v if v >= FLUX1_MIN as u32 && v <= 0xFF => out.push(v as u8),
            v if v < 0x800 => out.extend_from_slice(&[(v >> 8) as u8, v as u8]),
            v => {
                out.push(OP_FLUX3);
                out.extend_from_slice(&(v as u16).to_le_bytes());
            }
        }
        // OOB blocks are not counted in the stream position.
        stream_pos += (out.len() - start) as u32;
        sample_time += delta as u64;
    }
    for _ in next_index {
        emit_index(&mut out, stream_pos, sample_time)?;
    }

    let end = StreamEndBlock {
        stream_pos,
        hw_status_code: 0,
    };
    let mut payload = Cursor::new(Vec::new());
    end.write(&mut payload)?;
    write_oob(&mut out, OobBlock::StreamEnd, payload.get_ref())?;
    out.extend_from_slice(&[OP_OOB, OobBlock::Eof.type_byte(), 0x0D, 0x0D]);
    Ok(out)
}

fn write_oob(out: &mut Vec<u8>, kind: OobBlock, payload: &[u8]) -> Result<(), DiskImageError> {
    let size = u16::try_from(payload.len())
        .map_err(|_| DiskImageError::parameter(format!("OOB payload of {} bytes is too long", payload.len())))?;
    let header = OobHeader {
        block_type: kind.type_byte(),
        size,
    };
    out.push(OP_OOB);
    let mut cursor = Cursor::new(Vec::with_capacity(3));
    header.write(&mut cursor)?;
    out.extend_from_slice(cursor.get_ref());
    out.extend_from_slice(payload);
    Ok(())
}

pub struct KfxFormat;

impl KfxFormat {
    pub fn extensions() -> Vec<&'static str> {
        vec!["raw"]
    }

    pub fn capabilities() -> FormatCaps {
        bitstream_flags()
            | FormatCaps::CAP_FLUX
            | FormatCaps::CAP_WEAK_BITS
            | FormatCaps::CAP_ENCODING_FM
            | FormatCaps::CAP_ENCODING_MFM
            | FormatCaps::CAP_ENCODING_GCR
    }

    /// A stream is recognized by an OOB block of a known type at the start of the file.
    pub fn detect<RWS: ReadSeek>(mut image: RWS) -> bool {
        if image.seek(SeekFrom::Start(0)).is_err() {
            return false;
        }
        let mut start = [0u8; 2];
        if image.read_exact(&mut start).is_err() {
            return false;
        }
        start[0] == OP_OOB && !matches!(OobBlock::from(start[1]), OobBlock::Invalid(_))
    }

    /// Load a single stream file as track 0, head 0.
    pub fn load_image<RWS: ReadSeek>(read_buf: RWS, image: &mut DiskImage) -> Result<(), DiskImageError> {
        Self::load_track(read_buf, TrackKey::from((0u16, 0u8)), image)
    }

    /// Load a stream file as the specified track. Streams that do not decode are kept as
    /// flux-only tracks.
    pub fn load_track<RWS: ReadSeek>(mut read_buf: RWS, key: TrackKey, image: &mut DiskImage) -> Result<(), DiskImageError> {
        let data = read_all(&mut read_buf)?;
        let stream = KfxStream::parse(&data)?;
        let flux = stream.to_flux_buffer()?;

        let reader = TrackReader::new(TrackReaderOptions {
            keep_flux: true,
            ..TrackReaderOptions::default()
        });
        let track = match reader.read(key, &flux) {
            Ok(track) => track,
            Err(e) if e.kind() == ErrorKind::Format => {
                log::warn!("KfxFormat::load_track(): {} did not decode ({}), keeping flux only", key, e);
                let mut track = TrackRecord::new(key, TrackDataEncoding::Custom, TrackDataResolution::FluxStream);
                track.flux = Some(flux);
                track
            }
            Err(e) => return Err(e),
        };
        image.insert_track(track);
        Ok(())
    }

    /// Load a set of stream files, keyed by their `trackCC.H.raw` names. Files whose names do not
    /// follow that pattern are skipped.
    pub fn load_set(paths: &[PathBuf]) -> Result<DiskImage, DiskImageError> {
        let mut image = DiskImage::default();
        for path in paths {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            let Some(key) = track_key_from_name(name)
            else {
                log::debug!("KfxFormat::load_set(): skipping {}", path.display());
                continue;
            };
            let file = std::fs::File::open(path)?;
            Self::load_track(std::io::BufReader::new(file), key, &mut image)?;
        }
        if image.track_ct() == 0 {
            return Err(DiskImageError::not_found("no KryoFlux stream files in set"));
        }
        image.source_format = Some(super::DiskImageFileFormat::KryofluxStream);
        Ok(image)
    }

    /// List the stream files of the set in `dir`, in track order.
    pub fn expand_set(dir: &Path) -> Result<Vec<PathBuf>, DiskImageError> {
        let mut files: Vec<(TrackKey, PathBuf)> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter_map(|path| {
                let key = track_key_from_name(path.file_name()?.to_str()?)?;
                Some((key, path))
            })
            .collect();
        files.sort_by_key(|(key, _)| *key);
        Ok(files.into_iter().map(|(_, path)| path).collect())
    }

    pub fn can_write(image: &DiskImage) -> ParserWriteCompatibility {
        match image.track_iter().filter(|t| t.flux.is_some()).count() {
            0 => ParserWriteCompatibility::Incompatible,
            n if n == image.track_ct() && n == 1 => ParserWriteCompatibility::Ok,
            _ => ParserWriteCompatibility::DataLoss,
        }
    }

    /// Write the first flux track of the image as a single stream file.
    pub fn save_image<RWS: ReadWriteSeek>(image: &DiskImage, output: &mut RWS) -> Result<(), DiskImageError> {
        let Some((key, flux)) = image
            .track_iter()
            .find_map(|t| t.flux.as_ref().map(|flux| (t.key, flux)))
        else {
            return Err(DiskImageError::UnsupportedFormat);
        };
        log::debug!("KfxFormat::save_image(): writing {} with {} transitions", key, flux.len());
        output.seek(SeekFrom::Start(0))?;
        output.write_all(&write_stream(flux)?)?;
        Ok(())
    }

    /// Write every flux track of the image into `dir` as a stream set. Returns the paths written.
    pub fn save_set(image: &DiskImage, dir: &Path) -> Result<Vec<PathBuf>, DiskImageError> {
        let mut written = Vec::new();
        for track in image.track_iter() {
            let Some(flux) = track.flux.as_ref()
            else {
                continue;
            };
            if track.key.half_step {
                log::warn!("KfxFormat::save_set(): skipping half-track {}", track.key);
                continue;
            }
            let path = dir.join(track_file_name(track.key));
            std::fs::write(&path, write_stream(flux)?)?;
            written.push(path);
        }
        if written.is_empty() {
            return Err(DiskImageError::UnsupportedFormat);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bitstream_codec::{cells_to_gaps, codec_for, TrackCodec, TrackEncodeParams},
        file_parsers::{DiskImageFileFormat, ImageParser},
        random::WeakBitRng,
        track_reader::SectorRecord,
        types::SectorBytes,
    };

    #[test]
    fn test_flux3_then_eof() {
        let data = [0x0C, 0x10, 0x00, 0x0D, 0x0D, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00];
        let stream = KfxStream::parse(&data).unwrap();
        assert_eq!(stream.flux, vec![0x0010]);
        assert_eq!(stream.eof_position, Some(0));
    }

    #[test]
    fn test_opcodes() {
        // Flux2, Nop1, Nop2, Ovl16 + Flux1, Nop3, Flux1
        let data = [
            0x01, 0x20, 0x08, 0x09, 0xAA, 0x0B, 0x40, 0x0A, 0x00, 0x00, 0x30, 0x0D, 0x0D, 0x0D, 0x0D,
        ];
        let stream = KfxStream::parse(&data).unwrap();
        assert_eq!(stream.flux, vec![0x120, 0x10040, 0x30]);
        assert_eq!(stream.flux_positions, vec![0, 5, 10]);
        assert_eq!(stream.eof_position, None);
    }

    #[test]
    fn test_truncated_flux() {
        let err = KfxStream::parse(&[0x0E, 0x0C, 0x01]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn test_clock_info() {
        let (sck, ick) = parse_clock_info("name=KryoFlux DiskSystem, sck=24027428.5714285, ick=3003428.5714285625");
        assert!((sck.unwrap() - 24027428.5714285).abs() < 1e-6);
        assert!((ick.unwrap() - 3003428.5714285625).abs() < 1e-6);
        assert_eq!(parse_clock_info("host_date=2024.01.01"), (None, None));
    }

    #[test]
    fn test_track_names() {
        assert_eq!(track_key_from_name("track07.1.raw"), Some(TrackKey::from((7u16, 1u8))));
        assert_eq!(track_key_from_name("Track79.0.RAW"), Some(TrackKey::from((79u16, 0u8))));
        assert_eq!(track_key_from_name("track07.2.raw"), None);
        assert_eq!(track_key_from_name("disk.d64"), None);
        assert_eq!(track_file_name(TrackKey::from((3u16, 1u8))), "track03.1.raw");
    }

    #[test]
    fn test_writer_round_trip() {
        let deltas = [48u32, 72, 96, 300, 0x1_2345, 20, 2000];
        let flux = FluxBuffer::from_deltas(KFX_DEFAULT_SCK, &deltas, vec![0, 3, 7]).unwrap();
        let bytes = write_stream(&flux).unwrap();
        assert!(KfxFormat::detect(Cursor::new(&bytes)));

        let stream = KfxStream::parse(&bytes).unwrap();
        assert_eq!(stream.flux, deltas.to_vec());
        assert_eq!(stream.index_positions(), vec![0, 3, 7]);
        assert_eq!(stream.hw_status, Some(0));
        assert!((stream.sck - KFX_DEFAULT_SCK).abs() < 1e-3);
        assert_eq!(stream.to_flux_buffer().unwrap(), flux);
    }

    #[test]
    fn test_load_mfm_stream() {
        let sectors: Vec<_> = (1..=9)
            .map(|id| SectorRecord::new(0, 0, id, SectorBytes::filled(512, id)))
            .collect();
        let codec = codec_for(TrackDataEncoding::Mfm).unwrap();
        let bits = codec
            .encode_sectors(&sectors, &TrackEncodeParams::default(), &mut WeakBitRng::default())
            .unwrap();
        let deltas: Vec<u32> = cells_to_gaps(&bits, 1000.0, 0)
            .iter()
            .map(|g| (g * KFX_DEFAULT_SCK / 1e9).round() as u32)
            .collect();
        let mut all = Vec::new();
        let mut index = Vec::new();
        for _ in 0..2 {
            index.push(all.len());
            all.extend_from_slice(&deltas);
        }
        index.push(all.len());
        let flux = FluxBuffer::from_deltas(KFX_DEFAULT_SCK, &all, index).unwrap();
        let bytes = write_stream(&flux).unwrap();

        let image = DiskImage::load(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(image.source_format, Some(DiskImageFileFormat::KryofluxStream));
        let track = image.track((0u16, 0u8)).unwrap();
        assert_eq!(track.encoding, TrackDataEncoding::Mfm);
        assert_eq!(track.sectors.len(), 9);
        assert!(track.sectors.iter().all(|s| s.is_good()));
        assert_eq!(track.flux.as_ref().unwrap().revolution_ct(), 2);
        assert_eq!(DiskImageFileFormat::KryofluxStream.can_write(&image), ParserWriteCompatibility::Ok);
    }
}
