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

    src/bitstream_codec/crc.rs

    CRC and checksum routines.
*/

/// Generate a table for the CCITT polynomial 0x1021, MSB first.
const fn generate_crc_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x1021 } else { crc << 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC_CCITT_TABLE: [u16; 256] = generate_crc_table();

pub const CRC_CCITT_INIT: u16 = 0xFFFF;

/// Continue a CCITT CRC over `data` from a previous value.
pub fn crc_ccitt(data: &[u8], crc: u16) -> u16 {
    data.iter().fold(crc, |crc, &byte| {
        (crc << 8) ^ CRC_CCITT_TABLE[((crc >> 8) ^ byte as u16) as usize]
    })
}

/// Calculate a CRC-16/IBM-3740 (CCITT, initial value 0xFFFF) over `data`.
pub fn crc_ibm_3740(data: &[u8]) -> u16 {
    crc_ccitt(data, CRC_CCITT_INIT)
}

/// The 8-bit XOR checksum used by CBM DOS for GCR header and data blocks.
pub fn cbm_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, &b| acc ^ b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc_check_value() {
        // Standard check value for CRC-16/IBM-3740
        assert_eq!(crc_ibm_3740(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_idam_crc() {
        // A1 A1 A1 FE 00 00 01 02 -> CRC 0xCA6F
        let header = [0xA1, 0xA1, 0xA1, 0xFE, 0x00, 0x00, 0x01, 0x02];
        assert_eq!(crc_ibm_3740(&header), 0xCA6F);
    }

    #[test]
    fn test_crc_continues() {
        let whole = crc_ibm_3740(b"123456789");
        let part = crc_ccitt(b"6789", crc_ibm_3740(b"12345"));
        assert_eq!(whole, part);
    }
}
