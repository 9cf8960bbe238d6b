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

    src/track_reader/writer.rs

    Encodes track records back into flux for writing with capture hardware.
*/

//! The [TrackWriter] runs the track reader in reverse: a [TrackRecord] is encoded to a cell
//! bitstream with the codec for its encoding, and the bitstream is converted to flux gaps at the
//! requested sample clock. Tracks that already carry flux are written as captured.

use crate::{
    bitstream_codec::{cells_to_gaps, codec_for, gcr, TrackEncodeParams},
    file_parsers::gcr_track,
    flux::FluxBuffer,
    random::WeakBitRng,
    track_reader::{TrackDataResolution, TrackRecord},
    types::TrackDataEncoding,
    DiskImageError,
};
use bit_vec::BitVec;

/// Sample clock used for synthesized flux when none is requested.
pub const DEFAULT_SAMPLE_CLOCK: f64 = 24_000_000.0;

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackWriterOptions {
    pub sample_clock: f64,
    /// Number of identical revolutions to emit, each preceded by an index pulse.
    pub revolutions: usize,
    /// CBM disk ID written into GCR sector headers.
    pub disk_id: [u8; 2],
}

impl Default for TrackWriterOptions {
    fn default() -> Self {
        TrackWriterOptions {
            sample_clock: DEFAULT_SAMPLE_CLOCK,
            revolutions: 1,
            disk_id: [0x30, 0x30],
        }
    }
}

pub struct TrackWriter {
    options: TrackWriterOptions,
    rng: WeakBitRng,
}

impl TrackWriter {
    pub fn new(options: TrackWriterOptions, rng: WeakBitRng) -> Self {
        TrackWriter { options, rng }
    }

    pub fn options(&self) -> &TrackWriterOptions {
        &self.options
    }

    /// Produce the flux for one track.
    pub fn write(&mut self, track: &TrackRecord) -> Result<FluxBuffer, DiskImageError> {
        if let Some(flux) = &track.flux {
            return Ok(flux.clone());
        }
        if self.options.revolutions == 0 {
            return Err(DiskImageError::parameter("At least one revolution must be written"));
        }

        let (bits, cell_ns) = self.encode_cells(track)?;
        let clock = self.options.sample_clock;
        let deltas: Vec<u32> = cells_to_gaps(&bits, cell_ns, 0)
            .iter()
            .map(|gap| (gap * clock / 1e9).round() as u32)
            .collect();
        if deltas.is_empty() {
            return Err(DiskImageError::parameter(format!("{} encodes to no flux transitions", track.key)));
        }

        let mut all = Vec::with_capacity(deltas.len() * self.options.revolutions);
        let mut index = Vec::with_capacity(self.options.revolutions + 1);
        for _ in 0..self.options.revolutions {
            index.push(all.len());
            all.extend_from_slice(&deltas);
        }
        index.push(all.len());

        log::trace!(
            "TrackWriter::write(): {} {} encoded to {} transitions per revolution",
            track.key,
            track.encoding,
            deltas.len()
        );
        FluxBuffer::from_deltas(clock, &all, index)
    }

    fn encode_cells(&mut self, track: &TrackRecord) -> Result<(BitVec, f64), DiskImageError> {
        match track.encoding {
            TrackDataEncoding::GcrCbm => {
                let bytes = gcr_track::track_bytes(track, self.options.disk_id, &mut self.rng);
                let mut bits = BitVec::from_bytes(&bytes);
                if let Some(len) = track.bit_len {
                    bits.truncate(len);
                }
                let cell_ns = gcr::zone_cell_ns(gcr_track::track_zone(track));
                Ok((bits, cell_ns))
            }
            encoding => {
                let codec = codec_for(encoding)
                    .ok_or_else(|| DiskImageError::not_implemented(format!("Encoding of {} tracks", encoding)))?;
                let params = TrackEncodeParams {
                    track: track.cylinder() as u8,
                    disk_id: self.options.disk_id,
                    ..TrackEncodeParams::default()
                };
                let bits = codec.encode_sectors(&track.sectors, &params, &mut self.rng)?;
                let cell_ns = match track.resolution {
                    TrackDataResolution::MetaSector => encoding.nominal_cell_ns(),
                    _ => track.cell_ns,
                };
                Ok((bits, cell_ns))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        track_reader::{SectorRecord, TrackReader},
        types::{SectorBytes, TrackKey},
    };

    #[test]
    fn test_mfm_track_reads_back() {
        let sectors: Vec<_> = (1..=9)
            .map(|id| SectorRecord::new(2, 1, id, SectorBytes::filled(512, id ^ 0x5A)))
            .collect();
        let track = TrackRecord::from_sectors(TrackKey::from((2, 1)), TrackDataEncoding::Mfm, sectors);

        let mut writer = TrackWriter::new(
            TrackWriterOptions {
                revolutions: 2,
                ..TrackWriterOptions::default()
            },
            WeakBitRng::default(),
        );
        let flux = writer.write(&track).unwrap();
        assert_eq!(flux.revolution_ct(), 2);

        let read = TrackReader::default().read(track.key, &flux).unwrap();
        assert_eq!(read.encoding, TrackDataEncoding::Mfm);
        assert_eq!(read.sectors.len(), 9);
        assert!(read.sectors.iter().all(|s| s.is_good()));
        assert_eq!(read.sector(4).unwrap().data.as_slice(), &[4 ^ 0x5A; 512][..]);
    }

    #[test]
    fn test_flux_passes_through() {
        let mut track = TrackRecord::new(TrackKey::from((0, 0)), TrackDataEncoding::Custom, TrackDataResolution::FluxStream);
        let flux = FluxBuffer::from_deltas(DEFAULT_SAMPLE_CLOCK, &[100, 120, 100], vec![0, 3]).unwrap();
        track.flux = Some(flux.clone());
        let mut writer = TrackWriter::new(TrackWriterOptions::default(), WeakBitRng::default());
        assert_eq!(writer.write(&track).unwrap(), flux);
    }

    #[test]
    fn test_custom_encoding_rejected() {
        let track = TrackRecord::new(TrackKey::from((0, 0)), TrackDataEncoding::GcrApple, TrackDataResolution::MetaSector);
        let mut writer = TrackWriter::new(TrackWriterOptions::default(), WeakBitRng::default());
        assert_eq!(writer.write(&track).unwrap_err().kind(), crate::ErrorKind::NotImplemented);
    }
}
