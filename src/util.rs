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

    src/util.rs

    Miscellaneous utility routines.
*/
use crate::io::{Read, Seek, SeekFrom};

pub(crate) fn get_length<T: Seek>(source: &mut T) -> Result<u64, crate::io::Error> {
    // Seek to the end of the source
    let length = source.seek(SeekFrom::End(0))?;
    // Seek back to the beginning of the source
    source.seek(SeekFrom::Start(0))?;
    Ok(length)
}

/// Read the entire contents of a seekable source into a vector, starting from offset 0.
pub(crate) fn read_all<T: Read + Seek>(source: &mut T) -> Result<Vec<u8>, crate::io::Error> {
    let length = get_length(source)?;
    let mut buf = Vec::with_capacity(length as usize);
    source.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Read a null-terminated ASCII string from a byte slice. Reading stops at the first null or
/// non-ASCII byte.
pub(crate) fn read_ascii(bytes: &[u8]) -> Option<String> {
    let string: String = bytes
        .iter()
        .take_while(|&&b| b != 0 && b.is_ascii())
        .map(|&b| b as char)
        .collect();

    if string.is_empty() {
        None
    }
    else {
        Some(string)
    }
}

/// Convert a binary value to packed BCD.
pub fn to_bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

/// Convert a packed BCD value to binary.
pub fn from_bcd(value: u8) -> u8 {
    (value >> 4) * 10 + (value & 0x0F)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bcd() {
        assert_eq!(to_bcd(59), 0x59);
        assert_eq!(from_bcd(0x23), 23);
    }

    #[test]
    fn test_read_ascii() {
        let s = read_ascii(b"sck=24027428.5714285, ick=3003428.5714285625\0junk").unwrap();
        assert!(s.ends_with("5625"));
        assert_eq!(read_ascii(b"\0"), None);
    }
}
