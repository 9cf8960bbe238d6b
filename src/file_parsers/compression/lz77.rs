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

    src/file_parsers/compression/lz77.rs

    The LZ77 variant used by NBZ images.
*/

//! The stream starts with a marker byte, chosen as the least frequent byte of the plaintext.
//! Every other byte is a literal. A marker introduces one of two tokens:
//!  - `marker, 0x00`: a literal marker byte.
//!  - `marker, length, offset`: copy `length` bytes starting `offset` bytes back.
//!
//! Length and offset are little-endian base-128 integers; bit 7 of each byte flags that another
//! byte follows. Matches are at least [MIN_MATCH] bytes long, so a length is never zero.

use super::CompressionError;

/// Maximum distance of a back-reference.
pub const MAX_OFFSET: usize = 100_000;
pub const MIN_MATCH: usize = 4;
pub const MAX_MATCH: usize = 65535;

const HASH_BITS: u32 = 16;
/// Candidates examined per position before the longest match found so far is taken.
const MAX_CHAIN: usize = 256;
const NO_POS: usize = usize::MAX;

/// Return the least frequent byte value, preferring the lowest value on ties.
pub fn choose_marker(data: &[u8]) -> u8 {
    let mut counts = [0usize; 256];
    for &b in data {
        counts[b as usize] += 1;
    }
    (0..=255u8).min_by_key(|&b| counts[b as usize]).unwrap_or(0)
}

fn push_varint(out: &mut Vec<u8>, mut value: usize) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn read_varint(data: &[u8], pos: &mut usize) -> Result<usize, CompressionError> {
    let start = *pos;
    let mut value = 0usize;
    for shift in (0..35).step_by(7) {
        let byte = *data.get(*pos).ok_or(CompressionError::Truncated(start))?;
        *pos += 1;
        value |= ((byte & 0x7F) as usize) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(CompressionError::VarintOverflow(start))
}

fn hash4(data: &[u8], pos: usize) -> usize {
    let v = u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]);
    (v.wrapping_mul(0x9E37_79B1) >> (32 - HASH_BITS)) as usize
}

/// Hash chains over 4-byte prefixes.
struct MatchFinder {
    head: Vec<usize>,
    prev: Vec<usize>,
}

impl MatchFinder {
    fn new(len: usize) -> Self {
        MatchFinder {
            head: vec![NO_POS; 1 << HASH_BITS],
            prev: vec![NO_POS; len],
        }
    }

    fn insert(&mut self, data: &[u8], pos: usize) {
        if pos + MIN_MATCH <= data.len() {
            let h = hash4(data, pos);
            self.prev[pos] = self.head[h];
            self.head[h] = pos;
        }
    }

    /// Return (length, offset) of the longest match for the bytes at `pos`.
    fn longest(&self, data: &[u8], pos: usize) -> Option<(usize, usize)> {
        if pos + MIN_MATCH > data.len() {
            return None;
        }
        let limit = (data.len() - pos).min(MAX_MATCH);
        let mut best: Option<(usize, usize)> = None;
        let mut candidate = self.head[hash4(data, pos)];
        let mut chain = 0;
        while candidate != NO_POS && chain < MAX_CHAIN {
            let offset = pos - candidate;
            if offset > MAX_OFFSET {
                break;
            }
            let len = data[candidate..]
                .iter()
                .zip(&data[pos..pos + limit])
                .take_while(|(a, b)| a == b)
                .count();
            if len >= MIN_MATCH && best.map(|(l, _)| len > l).unwrap_or(true) {
                best = Some((len, offset));
                if len == limit {
                    break;
                }
            }
            candidate = self.prev[candidate];
            chain += 1;
        }
        best
    }
}

pub fn compress(data: &[u8]) -> Vec<u8> {
    let marker = choose_marker(data);
    let mut out = Vec::with_capacity(data.len() / 2 + 1);
    out.push(marker);

    let mut finder = MatchFinder::new(data.len());
    let mut pos = 0;
    while pos < data.len() {
        match finder.longest(data, pos) {
            Some((len, offset)) => {
                out.push(marker);
                push_varint(&mut out, len);
                push_varint(&mut out, offset);
                for p in pos..pos + len {
                    finder.insert(data, p);
                }
                pos += len;
            }
            None => {
                out.push(data[pos]);
                if data[pos] == marker {
                    out.push(0);
                }
                finder.insert(data, pos);
                pos += 1;
            }
        }
    }
    log::debug!(
        "lz77::compress(): {} bytes -> {} bytes, marker {:02X}",
        data.len(),
        out.len(),
        marker
    );
    out
}

/// Decompress at most `limit` bytes. Decoding stops once `limit` bytes are produced, so the
/// output never grows past it.
pub fn decompress_limit(data: &[u8], limit: usize) -> Result<Vec<u8>, CompressionError> {
    let (&marker, _) = data.split_first().ok_or(CompressionError::Empty)?;
    let mut out = Vec::with_capacity(data.len() * 2);
    let mut pos = 1;
    while pos < data.len() && out.len() < limit {
        let byte = data[pos];
        pos += 1;
        if byte != marker {
            out.push(byte);
            continue;
        }
        let token = pos - 1;
        let len = read_varint(data, &mut pos)?;
        if len == 0 {
            out.push(marker);
            continue;
        }
        if len > MAX_MATCH {
            return Err(CompressionError::BadLength(token, len));
        }
        let offset = read_varint(data, &mut pos)?;
        if offset == 0 || offset > out.len() {
            return Err(CompressionError::BadOffset(token, offset, out.len()));
        }
        let start = out.len() - offset;
        // Overlapping copies repeat the pattern, so copy byte by byte.
        for i in 0..len.min(limit - out.len()) {
            out.push(out[start + i]);
        }
    }
    Ok(out)
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    decompress_limit(data, usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let mut data = Vec::new();
        for i in 0..5000u32 {
            data.extend_from_slice(&(i % 97).to_le_bytes());
        }
        data.extend(std::iter::repeat(0x55).take(3000));
        data.extend((0..=255u8).cycle().take(1000));
        let packed = compress(&data);
        assert!(packed.len() < data.len() / 4);
        assert_eq!(decompress(&packed).unwrap(), data);
    }

    #[test]
    fn test_marker_literal() {
        // Every value appears, so the marker collides with a literal.
        let data: Vec<u8> = (0..=255u8).collect();
        let packed = compress(&data);
        assert_eq!(packed[0], 0);
        assert_eq!(&packed[1..3], &[0, 0]);
        assert_eq!(decompress(&packed).unwrap(), data);
        assert_eq!(decompress(&compress(&[])).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_overlapping_copy() {
        // 'A', then copy 9 bytes from 1 back.
        let packed = [0xFF, b'A', 0xFF, 9, 1];
        assert_eq!(decompress(&packed).unwrap(), vec![b'A'; 10]);
        assert_eq!(decompress_limit(&packed, 4).unwrap(), vec![b'A'; 4]);
    }

    #[test]
    fn test_limit_bounds_copy() {
        // A maximal match from a single byte stops at the limit.
        let packed = [0xFF, b'A', 0xFF, 0xFF, 0xFF, 0x03, 1];
        assert_eq!(decompress(&packed).unwrap().len(), MAX_MATCH + 1);
        assert_eq!(decompress_limit(&packed, 16).unwrap(), vec![b'A'; 16]);
        assert_eq!(decompress_limit(&packed, 1).unwrap(), vec![b'A']);

        // Data after the limit is not decoded, even if it is corrupt.
        let packed = [0xFF, b'A', b'B', 0xFF, 9, 99];
        assert_eq!(decompress_limit(&packed, 2).unwrap(), vec![b'A', b'B']);
    }

    #[test]
    fn test_overlong_match_rejected() {
        let packed = [0xFF, b'A', 0xFF, 0x80, 0x80, 0x04, 1];
        assert_eq!(decompress(&packed), Err(CompressionError::BadLength(2, 0x10000)));
        // A 35-bit length, as a hostile stream would carry.
        let packed = [0x00, 0x41, 0x00, 0x80, 0x80, 0x80, 0x80, 0x7F, 0x01];
        assert!(matches!(decompress(&packed), Err(CompressionError::BadLength(2, _))));
        assert!(matches!(decompress_limit(&packed, 13), Err(CompressionError::BadLength(2, _))));
    }

    #[test]
    fn test_corrupt_streams() {
        assert_eq!(decompress(&[]), Err(CompressionError::Empty));
        assert_eq!(decompress(&[0xFF, 0xFF, 4]), Err(CompressionError::Truncated(3)));
        assert!(matches!(decompress(&[0xFF, 1, 0xFF, 4, 5]), Err(CompressionError::BadOffset(2, 5, 1))));
        assert!(matches!(
            decompress(&[0, 0, 0x80, 0x80, 0x80, 0x80, 0x80, 1]),
            Err(CompressionError::VarintOverflow(2))
        ));
    }
}
